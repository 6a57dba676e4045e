//! Retry Controller: wraps a single channel-adapter invocation with bounded
//! retry, exponential backoff and jitter. Channel adapters stay free of
//! retry logic; classification comes from their typed `SendError`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::config;
use crate::services::channels::{Channel, ProviderReceipt, SendError};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Random jitter range (0.0-1.0) applied to each delay.
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn from_config(cfg: &config::RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            multiplier: cfg.multiplier,
            jitter: cfg.jitter.clamp(0.0, 1.0),
        }
    }

    /// Backoff before attempt `next_attempt` (2-based: the sleep after the
    /// first failure precedes attempt 2).
    fn backoff_delay(&self, next_attempt: u32) -> Duration {
        let exponent = next_attempt.saturating_sub(2) as i32;
        let exponential = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = exponential.min(self.max_delay.as_millis() as f64);
        let jitter = capped * self.jitter * (rand::thread_rng().gen::<f64>() - 0.5) * 2.0;
        let millis = (capped + jitter).max(0.0);
        Duration::from_millis(millis as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

/// Final failure classification handed back to the orchestrator.
#[derive(Debug)]
pub enum RetryError {
    /// Retryable failures on every permitted attempt.
    Exhausted { attempts: u32, last_error: String },
    /// Permanent rejection; no further attempts. `transmitted` is false
    /// when the adapter rejected before anything reached the provider.
    Terminal { error: String, transmitted: bool },
    /// The caller's deadline expired before an outcome was reached.
    DeadlineExceeded { attempts: u32 },
}

impl RetryError {
    /// Whether any attempt was transmitted to the provider. Transmitted
    /// attempts consume quota and are charged.
    pub fn transmitted(&self) -> bool {
        match self {
            RetryError::Exhausted { .. } => true,
            RetryError::Terminal { transmitted, .. } => *transmitted,
            RetryError::DeadlineExceeded { attempts } => *attempts > 0,
        }
    }

    pub fn message(&self) -> String {
        match self {
            RetryError::Exhausted {
                attempts,
                last_error,
            } => format!("Retries exhausted after {} attempts: {}", attempts, last_error),
            RetryError::Terminal { error, .. } => error.clone(),
            RetryError::DeadlineExceeded { .. } => "Dispatch deadline exceeded".to_string(),
        }
    }
}

/// Ephemeral per-attempt record; surfaced via tracing and then discarded.
#[derive(Debug)]
struct DispatchAttempt<'a> {
    channel: Channel,
    recipient_id: &'a str,
    attempt_number: u32,
    outcome: &'a str,
}

/// Run one adapter send under the policy. Terminal failures short-circuit
/// immediately; the backoff sleep races the caller's deadline so a pending
/// sleep is cancellable, not just the in-flight call.
///
/// Returns the receipt together with the number of attempts made.
pub async fn retry_send<F, Fut>(
    policy: &RetryPolicy,
    deadline: Option<Instant>,
    channel: Channel,
    recipient_id: &str,
    mut op: F,
) -> Result<(ProviderReceipt, u32), RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ProviderReceipt, SendError>>,
{
    let mut attempt = 0u32;

    loop {
        if let Some(d) = deadline {
            if Instant::now() >= d {
                return Err(RetryError::DeadlineExceeded { attempts: attempt });
            }
        }

        attempt += 1;
        match op().await {
            Ok(receipt) => {
                tracing::debug!(
                    attempt = ?DispatchAttempt {
                        channel,
                        recipient_id,
                        attempt_number: attempt,
                        outcome: "success",
                    },
                    "Adapter accepted send"
                );
                return Ok((receipt, attempt));
            }
            Err(SendError::InvalidAddress(e)) => {
                tracing::debug!(
                    attempt = ?DispatchAttempt {
                        channel,
                        recipient_id,
                        attempt_number: attempt,
                        outcome: "invalid_address",
                    },
                    "Send rejected before transmission"
                );
                return Err(RetryError::Terminal {
                    error: e,
                    // Rejected locally: attempt never reached the provider.
                    transmitted: false,
                });
            }
            Err(SendError::Terminal(e)) => {
                tracing::debug!(
                    attempt = ?DispatchAttempt {
                        channel,
                        recipient_id,
                        attempt_number: attempt,
                        outcome: "terminal",
                    },
                    "Provider rejected send permanently"
                );
                return Err(RetryError::Terminal {
                    error: e,
                    transmitted: true,
                });
            }
            Err(SendError::Retryable(e)) => {
                tracing::debug!(
                    attempt = ?DispatchAttempt {
                        channel,
                        recipient_id,
                        attempt_number: attempt,
                        outcome: "retryable",
                    },
                    error = %e,
                    "Transient send failure"
                );
                if attempt >= policy.max_attempts {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }

                let delay = policy.backoff_delay(attempt + 1);
                match deadline {
                    Some(d) => {
                        tokio::select! {
                            _ = tokio::time::sleep_until(d) => {
                                return Err(RetryError::DeadlineExceeded { attempts: attempt });
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => tokio::time::sleep(delay).await,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    fn receipt() -> ProviderReceipt {
        ProviderReceipt {
            provider_message_id: "msg-1".to_string(),
            confirmed: false,
        }
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt_with_no_fourth_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();

        let result = retry_send(&fast_policy(3), None, Channel::Sms, "r1", move || {
            let n = calls_in_op.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(SendError::Retryable("gateway 503".to_string()))
                } else {
                    Ok(receipt())
                }
            }
        })
        .await;

        let (_, attempts) = result.unwrap();
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();

        let result = retry_send(&fast_policy(3), None, Channel::Email, "r1", move || {
            calls_in_op.fetch_add(1, Ordering::SeqCst);
            async { Err(SendError::Terminal("gateway 401".to_string())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result.unwrap_err() {
            RetryError::Terminal { transmitted, .. } => assert!(transmitted),
            other => panic!("expected terminal, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn invalid_address_is_terminal_and_not_transmitted() {
        let result = retry_send(&fast_policy(3), None, Channel::Sms, "r1", || async {
            Err(SendError::InvalidAddress("not a phone number".to_string()))
        })
        .await;

        let err = result.unwrap_err();
        assert!(!err.transmitted());
    }

    #[tokio::test]
    async fn exhaustion_reports_attempt_count() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();

        let result = retry_send(&fast_policy(3), None, Channel::Whatsapp, "r1", move || {
            calls_in_op.fetch_add(1, Ordering::SeqCst);
            async { Err(SendError::Retryable("timeout".to_string())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            RetryError::Exhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_aborts_a_pending_backoff_sleep() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(120),
            multiplier: 2.0,
            jitter: 0.0,
        };
        let deadline = Instant::now() + Duration::from_millis(100);

        let result = retry_send(&policy, Some(deadline), Channel::Sms, "r1", || async {
            Err(SendError::Retryable("gateway 429".to_string()))
        })
        .await;

        match result.unwrap_err() {
            RetryError::DeadlineExceeded { attempts } => {
                assert_eq!(attempts, 1);
            }
            other => panic!("expected deadline abort, got {:?}", other),
        }
    }

    #[test]
    fn backoff_grows_exponentially_up_to_the_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            multiplier: 2.0,
            jitter: 0.0,
        };
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(200));
        // 400ms capped at 350ms.
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(350));
    }
}
