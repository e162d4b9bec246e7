use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::FleetError;

#[derive(Debug)]
struct AdmissionState {
    current: usize,
    max: usize,
    accepting: bool,
}

/// Point-in-time view of a worker's load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdmissionSnapshot {
    pub current: usize,
    pub max: usize,
    pub accepting: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    /// Every slot is taken
    Capacity { current: usize, max: usize },
    /// The worker is draining
    NotAccepting,
}

impl From<AdmissionError> for FleetError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::Capacity { current, max } => {
                FleetError::CapacityExceeded { current, max }
            }
            AdmissionError::NotAccepting => {
                FleetError::Unavailable("worker is draining".to_string())
            }
        }
    }
}

/// Bounded-concurrency gate for one worker.
///
/// All state lives behind a single lock. Callers never see the counter
/// directly: a successful [`try_acquire`](Self::try_acquire) hands out an
/// [`AdmissionPermit`] and the slot is returned when that permit drops.
#[derive(Debug)]
pub struct AdmissionController {
    state: Mutex<AdmissionState>,
}

impl AdmissionController {
    pub fn new(max: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(AdmissionState {
                current: 0,
                max,
                accepting: true,
            }),
        })
    }

    pub fn try_acquire(self: &Arc<Self>) -> Result<AdmissionPermit, AdmissionError> {
        let mut state = self.state.lock();
        if !state.accepting {
            return Err(AdmissionError::NotAccepting);
        }
        if state.current >= state.max {
            return Err(AdmissionError::Capacity {
                current: state.current,
                max: state.max,
            });
        }
        state.current += 1;
        Ok(AdmissionPermit {
            controller: Arc::clone(self),
        })
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.current = state.current.saturating_sub(1);
    }

    /// Stop admitting new jobs. Returns true if this call flipped the flag.
    pub fn begin_draining(&self) -> bool {
        let mut state = self.state.lock();
        std::mem::replace(&mut state.accepting, false)
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        let state = self.state.lock();
        AdmissionSnapshot {
            current: state.current,
            max: state.max,
            accepting: state.accepting,
        }
    }

    /// Poll until no admitted job is in flight.
    pub async fn wait_idle(&self, poll: Duration) {
        loop {
            let current = self.snapshot().current;
            if current == 0 {
                return;
            }
            tracing::info!(in_flight = current, "Waiting for in-flight jobs to finish");
            tokio::time::sleep(poll).await;
        }
    }
}

/// One admission slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    controller: Arc<AdmissionController>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.controller.release();
    }
}
