use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::error::HarvestError;

/// Fixed-ceiling retry with a constant pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay_ms: 0,
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Runs `op` until it succeeds or the ceiling is hit. Every error consumes
    /// one attempt. Exhaustion yields `RetriesExhausted` carrying the last
    /// error; an interrupt yields `Cancelled`.
    pub fn run<T, F>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, HarvestError>
    where
        F: FnMut(u32) -> Result<T, HarvestError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut last = None;
        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(HarvestError::Cancelled);
            }
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(HarvestError::Cancelled) => return Err(HarvestError::Cancelled),
                Err(err) => {
                    debug!(attempt, max_attempts, error = %err, "{label}: attempt failed");
                    last = Some(err);
                }
            }
            if attempt < max_attempts && !self.delay().is_zero() && !cancel.sleep(self.delay()) {
                return Err(HarvestError::Cancelled);
            }
        }
        Err(HarvestError::RetriesExhausted {
            url: label.to_string(),
            attempts: max_attempts,
            last: last.map(|err| err.to_string()).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn succeeds_after_transient_failures() {
        let policy = RetryPolicy {
            max_attempts: 3,
            delay_ms: 0,
        };
        let mut calls = 0;
        let value = policy
            .run("x", &CancellationToken::new(), |_| {
                calls += 1;
                if calls < 3 {
                    Err(HarvestError::Http("reset".to_string()))
                } else {
                    Ok(calls)
                }
            })
            .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn exhaustion_reports_attempts() {
        let policy = RetryPolicy {
            max_attempts: 4,
            delay_ms: 0,
        };
        let mut calls = 0;
        let err = policy
            .run::<(), _>("https://x/a.jpg", &CancellationToken::new(), |_| {
                calls += 1;
                Err(HarvestError::AssetStatus {
                    status: 503,
                    url: "https://x/a.jpg".to_string(),
                })
            })
            .unwrap_err();
        assert_eq!(calls, 4);
        assert_matches!(err, HarvestError::RetriesExhausted { attempts: 4, .. });
    }

    #[test]
    fn cancelled_token_stops_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let err = RetryPolicy::default()
            .run::<(), _>("x", &token, |_| panic!("must not be called"))
            .unwrap_err();
        assert_matches!(err, HarvestError::Cancelled);
    }
}
