//! Server error budget
//!
//! `stop` aborts on the first non-retryable error, `continue` never aborts,
//! and `<n>` tolerates `n` errors before aborting.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid server error policy {0:?}: expected stop, continue or a number")]
pub struct InvalidPolicy(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    #[default]
    Stop,
    Continue,
    Budget(u64),
}

impl FromStr for ErrorPolicy {
    type Err = InvalidPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "stop" => Ok(ErrorPolicy::Stop),
            "continue" => Ok(ErrorPolicy::Continue),
            other => other
                .parse::<u64>()
                .map(ErrorPolicy::Budget)
                .map_err(|_| InvalidPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::Stop => write!(f, "stop"),
            ErrorPolicy::Continue => write!(f, "continue"),
            ErrorPolicy::Budget(n) => write!(f, "{}", n),
        }
    }
}

/// Tally of non-retryable server errors for one run
#[derive(Debug, Default)]
pub struct ErrorBudget {
    policy: ErrorPolicy,
    count: AtomicU64,
    first_error: Mutex<Option<String>>,
}

impl ErrorBudget {
    pub fn new(policy: ErrorPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    /// Count an error; returns true when the run must abort.
    pub fn record(&self, message: &str) -> bool {
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut first = self.first_error.lock();
            if first.is_none() {
                *first = Some(message.to_string());
            }
        }
        let exceeded = Self::exceeds(self.policy, count);
        if exceeded {
            error!(count, policy = %self.policy, "Server error budget exhausted");
        } else {
            warn!(count, policy = %self.policy, error = message, "Server error");
        }
        exceeded
    }

    fn exceeds(policy: ErrorPolicy, count: u64) -> bool {
        match policy {
            ErrorPolicy::Stop => count > 0,
            ErrorPolicy::Continue => false,
            ErrorPolicy::Budget(n) => count > n,
        }
    }

    pub fn is_exceeded(&self) -> bool {
        Self::exceeds(self.policy, self.count())
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn first_error(&self) -> Option<String> {
        self.first_error.lock().clone()
    }
}
