//! Arithmetic evaluation with per-operator pacing.
//!
//! Operations are flat expressions over `+ - * /` without parentheses.
//! Evaluation is two left-to-right passes: the first reduces every `*` and
//! `/` in place, the second folds the remaining `+` and `-`. Every binary
//! application sleeps for the operator's cost first; that sleep is the
//! "work" a job represents and what the watchdog's timeout budget is based on.
//!
//! Division by zero evaluates to `0`. It is a defined result, not an error.

use std::time::Duration;

use crate::scheduler::job::{CostTable, OPERATORS};

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// One `"<left> <op> <right> = <result>"` line per binary application, in order
    pub steps: Vec<String>,
    pub result: f64,
}

#[derive(Debug, Clone)]
enum Operand {
    /// As written in the operation, trimmed
    Literal(String, f64),
    /// Produced by an earlier reduction
    Computed(f64),
}

impl Operand {
    fn literal(text: &str) -> Self {
        let text = text.trim();
        Operand::Literal(text.to_string(), text.parse().unwrap_or(0.0))
    }

    fn value(&self) -> f64 {
        match self {
            Operand::Literal(_, v) | Operand::Computed(v) => *v,
        }
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Literal(text, _) => write!(f, "{}", text),
            Operand::Computed(v) => write!(f, "{}", v),
        }
    }
}

/// Split an operation into operands and operators.
///
/// Operands are the non-empty runs between operator characters. The result
/// always has exactly one operator fewer than operands: operators without a
/// right-hand operand are dropped.
pub fn tokenize(operation: &str) -> (Vec<String>, Vec<char>) {
    let operands: Vec<String> = operation
        .split(|c| OPERATORS.contains(&c))
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(str::to_string)
        .collect();

    let mut operators: Vec<char> = operation.chars().filter(|c| OPERATORS.contains(c)).collect();
    operators.truncate(operands.len().saturating_sub(1));

    (operands, operators)
}

/// Sum of the cost of every operator character in `operation`.
///
/// Depends only on the string and the table, never on reduction order.
/// Saturates at `Duration::MAX`.
pub fn expected_duration(operation: &str, costs: &CostTable) -> Duration {
    operation
        .chars()
        .filter(|c| OPERATORS.contains(c))
        .map(|op| costs.cost(op))
        .try_fold(Duration::ZERO, |total, cost| total.checked_add(cost))
        .unwrap_or(Duration::MAX)
}

fn apply(op: char, left: f64, right: f64) -> f64 {
    match op {
        '+' => left + right,
        '-' => left - right,
        '*' => left * right,
        '/' if right == 0.0 => {
            tracing::warn!(left, "Division by zero, result is 0");
            0.0
        }
        '/' => left / right,
        _ => {
            tracing::warn!(op = %op, "Unknown operator, result is 0");
            0.0
        }
    }
}

async fn pace(op: char, costs: &CostTable) {
    let cost = costs.cost(op);
    if !cost.is_zero() {
        tracing::trace!(op = %op, cost_ms = cost.as_millis() as u64, "Pacing operation");
        tokio::time::sleep(cost).await;
    }
}

/// Evaluate `operation`, sleeping `costs[op]` before every binary application.
pub async fn evaluate(operation: &str, costs: &CostTable) -> Evaluation {
    let (raw_operands, mut operators) = tokenize(operation);
    let mut operands: Vec<Operand> = raw_operands.iter().map(|s| Operand::literal(s)).collect();
    let mut steps = Vec::with_capacity(operators.len());

    // Pass 1: reduce '*' and '/' in place. After a reduction the merged
    // operand sits at index i, so scanning resumes there.
    let mut i = 0;
    while i < operators.len() {
        let op = operators[i];
        if op != '*' && op != '/' {
            i += 1;
            continue;
        }
        pace(op, costs).await;
        let value = apply(op, operands[i].value(), operands[i + 1].value());
        steps.push(format!(
            "{} {} {} = {:.6}",
            operands[i],
            op,
            operands[i + 1],
            value
        ));
        operands[i] = Operand::Computed(value);
        operands.remove(i + 1);
        operators.remove(i);
    }

    // Pass 2: fold '+' and '-' left to right.
    let mut operands = operands.into_iter();
    let Some(mut acc) = operands.next() else {
        return Evaluation { steps, result: 0.0 };
    };
    for (op, right) in operators.into_iter().zip(operands) {
        pace(op, costs).await;
        let value = apply(op, acc.value(), right.value());
        steps.push(format!("{} {} {} = {:.6}", acc, op, right, value));
        acc = Operand::Computed(value);
    }

    Evaluation {
        steps,
        result: acc.value(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_simple() {
        let (operands, operators) = tokenize("3 + 4");
        assert_eq!(operands, vec!["3", "4"]);
        assert_eq!(operators, vec!['+']);
    }

    #[test]
    fn tokenize_mixed_with_spaces() {
        let (operands, operators) = tokenize("12    /   4 - 1");
        assert_eq!(operands, vec!["12", "4", "1"]);
        assert_eq!(operators, vec!['/', '-']);
    }

    #[test]
    fn tokenize_drops_dangling_operators() {
        let (operands, operators) = tokenize("2+");
        assert_eq!(operands, vec!["2"]);
        assert!(operators.is_empty());

        let (operands, operators) = tokenize("++");
        assert!(operands.is_empty());
        assert!(operators.is_empty());
    }

    #[tokio::test]
    async fn precedence_and_step_format() {
        let eval = evaluate("2+3*4", &CostTable::new()).await;
        assert_eq!(eval.steps, vec!["3 * 4 = 12.000000", "2 + 12 = 14.000000"]);
        assert_eq!(eval.result, 14.0);
    }

    #[tokio::test]
    async fn division_by_zero_is_zero() {
        let eval = evaluate("5/0", &CostTable::new()).await;
        assert_eq!(eval.result, 0.0);
        assert_eq!(eval.steps, vec!["5 / 0 = 0.000000"]);
    }

    #[tokio::test]
    async fn chained_multiplicative_reduces_left_to_right() {
        let eval = evaluate("8/2*3", &CostTable::new()).await;
        assert_eq!(eval.steps, vec!["8 / 2 = 4.000000", "4 * 3 = 12.000000"]);
        assert_eq!(eval.result, 12.0);
    }

    #[tokio::test]
    async fn additive_fold_is_left_associative() {
        let eval = evaluate("10-4-3", &CostTable::new()).await;
        assert_eq!(eval.steps, vec!["10 - 4 = 6.000000", "6 - 3 = 3.000000"]);
        assert_eq!(eval.result, 3.0);
    }

    #[tokio::test]
    async fn mixed_expression() {
        let eval = evaluate("1 + 6 / 4 * 2 - 0.5", &CostTable::new()).await;
        assert_eq!(
            eval.steps,
            vec![
                "6 / 4 = 1.500000",
                "1.5 * 2 = 3.000000",
                "1 + 3 = 4.000000",
                "4 - 0.5 = 3.500000",
            ]
        );
        assert_eq!(eval.result, 3.5);
    }

    #[tokio::test]
    async fn single_operand_and_empty_input() {
        let eval = evaluate("42", &CostTable::new()).await;
        assert!(eval.steps.is_empty());
        assert_eq!(eval.result, 42.0);

        let eval = evaluate("", &CostTable::new()).await;
        assert_eq!(eval.result, 0.0);

        let eval = evaluate("++", &CostTable::new()).await;
        assert_eq!(eval.result, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn each_application_sleeps_its_cost() {
        let costs = CostTable::new()
            .with_cost('+', Duration::from_secs(2))
            .with_cost('*', Duration::from_secs(5));
        let start = tokio::time::Instant::now();
        let eval = evaluate("1+2*3+4", &costs).await;
        assert_eq!(eval.result, 11.0);
        assert_eq!(start.elapsed(), Duration::from_secs(9));
    }

    #[test]
    fn expected_duration_counts_every_operator_character() {
        let costs = CostTable::new()
            .with_cost('+', Duration::from_secs(60))
            .with_cost('/', Duration::from_secs(7));
        assert_eq!(expected_duration("++", &costs), Duration::from_secs(120));
        assert_eq!(expected_duration("1+2*3/4", &costs), Duration::from_secs(67));
        assert_eq!(expected_duration("42", &costs), Duration::ZERO);
    }

    #[test]
    fn expected_duration_saturates_instead_of_overflowing() {
        let costs = CostTable::new().with_cost('+', Duration::from_millis(u64::MAX));
        let operation = vec!["1"; 1202].join("+");
        assert_eq!(expected_duration(&operation, &costs), Duration::MAX);
    }
}
