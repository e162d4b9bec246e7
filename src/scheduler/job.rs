use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FleetError;
use crate::evaluator;

/// Operators the evaluator understands, in no particular order.
pub const OPERATORS: [char; 4] = ['+', '-', '*', '/'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
}

impl JobStatus {
    /// Pending -> Running (claim), Running -> Completed, Running -> Pending (timeout revert).
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Pending)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Completed => write!(f, "Completed"),
        }
    }
}

/// Per-operator cost. Each application of an operator sleeps for its cost.
///
/// Serialized as a map from operator symbol to milliseconds:
/// `{"+": 1000, "*": 250}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, u64>", into = "BTreeMap<String, u64>")]
pub struct CostTable {
    costs_ms: BTreeMap<char, u64>,
}

impl CostTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cost(mut self, op: char, cost: Duration) -> Self {
        self.costs_ms
            .insert(op, u64::try_from(cost.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Cost of one application of `op`; zero when unmapped.
    pub fn cost(&self, op: char) -> Duration {
        self.costs_ms
            .get(&op)
            .map(|ms| Duration::from_millis(*ms))
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_empty(&self) -> bool {
        self.costs_ms.is_empty()
    }

    /// Wire form used by the gRPC StartJob request.
    pub fn to_wire(&self) -> HashMap<String, u64> {
        self.costs_ms
            .iter()
            .map(|(op, ms)| (op.to_string(), *ms))
            .collect()
    }

    pub fn from_wire(wire: HashMap<String, u64>) -> Result<Self, FleetError> {
        Self::try_from(wire.into_iter().collect::<BTreeMap<_, _>>())
    }
}

impl TryFrom<BTreeMap<String, u64>> for CostTable {
    type Error = FleetError;

    fn try_from(raw: BTreeMap<String, u64>) -> Result<Self, Self::Error> {
        let mut costs_ms = BTreeMap::new();
        for (key, ms) in raw {
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(op), None) if OPERATORS.contains(&op) => {
                    costs_ms.insert(op, ms);
                }
                _ => {
                    return Err(FleetError::MalformedInput(format!(
                        "unknown operator '{}' in cost table",
                        key
                    )))
                }
            }
        }
        Ok(Self { costs_ms })
    }
}

impl From<CostTable> for BTreeMap<String, u64> {
    fn from(table: CostTable) -> Self {
        table
            .costs_ms
            .into_iter()
            .map(|(op, ms)| (op.to_string(), ms))
            .collect()
    }
}

/// Check that an operation only uses digits, '.', whitespace and the four operators.
pub fn validate_operation(operation: &str) -> Result<(), FleetError> {
    if operation.trim().is_empty() {
        return Err(FleetError::MalformedInput(
            "operation cannot be empty".to_string(),
        ));
    }
    if let Some(bad) = operation
        .chars()
        .find(|c| !(c.is_ascii_digit() || *c == '.' || c.is_whitespace() || OPERATORS.contains(c)))
    {
        return Err(FleetError::MalformedInput(format!(
            "unsupported character '{}' in operation",
            bad
        )));
    }
    Ok(())
}

/// A job as handed to the store by the submission path.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: i64,
    pub operation: String,
    pub cost_table: CostTable,
    pub inactive_server_time: Option<Duration>,
}

impl NewJob {
    pub fn new(user_id: i64, operation: impl Into<String>, cost_table: CostTable) -> Self {
        Self {
            user_id,
            operation: operation.into(),
            cost_table,
            inactive_server_time: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub user_id: i64,
    pub operation: String,
    pub cost_table: CostTable,
    /// Per-job override of the watchdog grace period
    pub inactive_server_time: Option<Duration>,
    pub status: JobStatus,
    pub result: Option<f64>,
    /// Number of times the job has been claimed
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(new: NewJob) -> Self {
        Self::with_id(Uuid::new_v4(), new, Utc::now())
    }

    pub fn with_id(id: Uuid, new: NewJob, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: new.user_id,
            operation: new.operation,
            cost_table: new.cost_table,
            inactive_server_time: new.inactive_server_time,
            status: JobStatus::Pending,
            result: None,
            attempts: 0,
            created_at,
            started_at: None,
            completed_at: None,
        }
    }

    /// Sum of the cost of every operator character in the operation.
    pub fn expected_duration(&self) -> Duration {
        evaluator::expected_duration(&self.operation, &self.cost_table)
    }

    /// Grace that applies to this job: its own override if set, otherwise `default`.
    pub fn grace(&self, default: Duration) -> Duration {
        match self.inactive_server_time {
            Some(grace) if !grace.is_zero() => grace,
            _ => default,
        }
    }

    /// `started_at + expected duration + grace`. Falls back to `created_at`
    /// if the start time was never recorded.
    pub fn deadline(&self, default_grace: Duration) -> DateTime<Utc> {
        let start = self.started_at.unwrap_or(self.created_at);
        let budget = self
            .expected_duration()
            .saturating_add(self.grace(default_grace));
        chrono::Duration::from_std(budget)
            .ok()
            .and_then(|budget| start.checked_add_signed(budget))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
