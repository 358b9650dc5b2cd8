//! Per-job wall-clock budget, checked before every I/O call.

use std::time::{Duration, Instant};

use scriptflow_common::ServiceError;

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: instant }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Short-circuit with a typed timeout once the budget is spent.
    pub fn check(&self, stage: &str) -> Result<(), ServiceError> {
        if Instant::now() >= self.at {
            Err(ServiceError::Timeout {
                stage: stage.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_deadline_allows() {
        let deadline = Deadline::new(Duration::from_secs(60));
        assert!(deadline.check("download").is_ok());
    }

    #[test]
    fn expired_deadline_names_the_stage() {
        let deadline = Deadline::at(Instant::now() - Duration::from_secs(1));
        let err = deadline.check("generate").unwrap_err();
        assert!(matches!(err, ServiceError::Timeout { stage } if stage == "generate"));
    }
}
