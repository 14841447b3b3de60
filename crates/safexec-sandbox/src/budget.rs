//! Execution budget: step count, wall-clock deadline, call depth and
//! sequence size.

use std::time::{Duration, Instant};

use crate::error::SafeError;
use crate::exception::{ExcKind, Unwind};

/// How often (in steps) the wall clock is consulted.
const DEADLINE_CHECK_INTERVAL: u64 = 256;

/// Resource limits for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Statements, loop iterations and calls a run may perform.
    pub max_steps: u64,
    /// Wall-clock budget for a run.
    pub timeout: Duration,
    /// Maximum nesting of script function calls.
    pub max_call_depth: usize,
    /// Largest string, list or range a script may build.
    pub max_sequence_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: 10_000_000,
            timeout: Duration::from_secs(5),
            max_call_depth: 48,
            max_sequence_len: 4 * 1024 * 1024,
        }
    }
}

/// Running account against a [`Limits`].
#[derive(Debug)]
pub(crate) struct Budget {
    limits: Limits,
    steps: u64,
    deadline: Instant,
}

impl Budget {
    pub(crate) fn start(limits: Limits) -> Self {
        Self {
            limits,
            steps: 0,
            deadline: Instant::now() + limits.timeout,
        }
    }

    pub(crate) fn limits(&self) -> &Limits {
        &self.limits
    }

    pub(crate) fn steps(&self) -> u64 {
        self.steps
    }

    /// Consume one step.
    pub(crate) fn tick(&mut self) -> Result<(), Unwind> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(Unwind::fatal(SafeError::StepLimit {
                max: self.limits.max_steps,
            }));
        }
        if self.steps % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= self.deadline {
            return Err(Unwind::fatal(SafeError::Timeout {
                timeout_ms: self.limits.timeout.as_millis() as u64,
            }));
        }
        Ok(())
    }

    /// Refuse to build a sequence longer than the limit.
    pub(crate) fn check_len(&self, len: usize) -> Result<(), Unwind> {
        if len > self.limits.max_sequence_len {
            return Err(Unwind::exc(
                ExcKind::MemoryError,
                format!(
                    "sequence of length {len} exceeds the limit of {}",
                    self.limits.max_sequence_len
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_limit_is_fatal() {
        let mut budget = Budget::start(Limits {
            max_steps: 3,
            ..Limits::default()
        });
        assert!(budget.tick().is_ok());
        assert!(budget.tick().is_ok());
        assert!(budget.tick().is_ok());
        match budget.tick() {
            Err(Unwind::Fatal(err)) => assert!(matches!(*err, SafeError::StepLimit { max: 3 })),
            _ => panic!("expected a fatal step limit"),
        }
    }

    #[test]
    fn deadline_is_checked_periodically() {
        let mut budget = Budget::start(Limits {
            timeout: Duration::ZERO,
            ..Limits::default()
        });
        let mut result = Ok(());
        for _ in 0..DEADLINE_CHECK_INTERVAL {
            result = budget.tick();
            if result.is_err() {
                break;
            }
        }
        assert!(
            matches!(result, Err(Unwind::Fatal(ref e)) if matches!(**e, SafeError::Timeout { .. }))
        );
        assert_eq!(budget.steps(), DEADLINE_CHECK_INTERVAL);
    }

    #[test]
    fn oversize_sequences_raise_memory_error() {
        let budget = Budget::start(Limits {
            max_sequence_len: 10,
            ..Limits::default()
        });
        assert!(budget.check_len(10).is_ok());
        assert!(matches!(budget.check_len(11), Err(Unwind::Raise(_))));
    }
}
