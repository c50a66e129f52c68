//! Post-bind readiness probing.

use std::time::Duration;

use tokio::net::TcpStream;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("{addr} did not accept a connection after {attempts} attempts: {last_error}")]
    Exhausted {
        addr: String,
        attempts: u32,
        last_error: String,
    },
}

/// Attempt budget for [`wait_for_successful_dial`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialBudget {
    pub attempts: u32,
    /// Upper bound on a single connection attempt.
    pub timeout: Duration,
    /// Pause between failed attempts.
    pub interval: Duration,
}

impl Default for DialBudget {
    fn default() -> Self {
        Self {
            attempts: 100,
            timeout: Duration::from_millis(100),
            interval: Duration::from_millis(100),
        }
    }
}

impl DialBudget {
    /// Worst-case wall-clock time spent before giving up.
    #[must_use]
    pub fn max_wait(&self) -> Duration {
        (self.timeout + self.interval) * self.attempts
    }
}

/// Dial `addr` until a TCP connection succeeds or the budget runs out.
///
/// # Errors
/// Returns [`ProbeError::Exhausted`] when no attempt connected.
#[tracing::instrument(skip(budget), fields(attempts = budget.attempts))]
pub async fn wait_for_successful_dial(addr: &str, budget: DialBudget) -> Result<(), ProbeError> {
    let mut last_error = String::from("no attempts made");

    for attempt in 1..=budget.attempts {
        match tokio::time::timeout(budget.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => {
                tracing::debug!(attempt, "Listener is accepting connections");
                return Ok(());
            }
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => last_error = format!("timed out after {}ms", budget.timeout.as_millis()),
        }
        if attempt < budget.attempts {
            tokio::time::sleep(budget.interval).await;
        }
    }

    Err(ProbeError::Exhausted {
        addr: addr.to_owned(),
        attempts: budget.attempts,
        last_error,
    })
}
