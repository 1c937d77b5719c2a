use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::trace::DebugTrace;

pub trait Sleeper: Send + Sync + 'static {
    fn sleep(&self, duration: Duration);
}

pub type SharedSleeper = Arc<dyn Sleeper>;

#[derive(Debug, Default, Clone)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the `attempt`-th rate-limited response.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1_u32 << attempt.min(16))
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("Rate limit exceeded after {attempts} attempts. Please wait before making more requests.")]
    RateLimitExceeded { attempts: u32 },
    #[error("Request timed out after {attempts} attempts")]
    TimedOut { attempts: u32 },
    #[error("API request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Network error: {0}")]
    Network(String),
}

/// Sends `request` until it returns 200, retrying rate limits with
/// exponential backoff and timeouts immediately. Every other failure is
/// terminal.
pub fn send_with_backoff(
    transport: &dyn HttpTransport,
    sleeper: &dyn Sleeper,
    request: &HttpRequest,
    policy: RetryPolicy,
    trace: &mut DebugTrace,
) -> Result<HttpResponse, RetryError> {
    let mut attempt = 0_u32;
    loop {
        trace.info(format!("Making API request to: {}", request.url));
        match transport.send(request) {
            Ok(resp) if resp.status == 200 => {
                trace.info(format!("API Response Status: {}", resp.status));
                return Ok(resp);
            }
            Ok(resp) if resp.status == 429 => {
                trace.info(format!("API Response Status: {}", resp.status));
                if attempt >= policy.max_retries {
                    return Err(RetryError::RateLimitExceeded {
                        attempts: attempt + 1,
                    });
                }
                let wait = policy.backoff_delay(attempt);
                trace.info(format!(
                    "Rate limited. Waiting {} seconds before retry...",
                    wait.as_secs()
                ));
                sleeper.sleep(wait);
            }
            Ok(resp) => {
                let body = resp.text();
                trace.error(format!("API Response Status: {}", resp.status));
                trace.error(format!("API Response Text: {body}"));
                return Err(RetryError::Status {
                    status: resp.status,
                    body,
                });
            }
            Err(TransportError::Timeout(_)) => {
                if attempt >= policy.max_retries {
                    return Err(RetryError::TimedOut {
                        attempts: attempt + 1,
                    });
                }
                trace.info(format!(
                    "Request timeout. Retrying... ({}/{})",
                    attempt + 1,
                    policy.max_retries
                ));
            }
            Err(TransportError::Network(message)) | Err(TransportError::InvalidRequest(message)) => {
                return Err(RetryError::Network(message))
            }
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::transport::testing::FakeTransport;

    #[derive(Default)]
    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        fn total(&self) -> Duration {
            self.slept.lock().expect("sleeper mutex poisoned").iter().sum()
        }

        fn calls(&self) -> Vec<Duration> {
            self.slept.lock().expect("sleeper mutex poisoned").clone()
        }
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.slept
                .lock()
                .expect("sleeper mutex poisoned")
                .push(duration);
        }
    }

    fn request() -> HttpRequest {
        HttpRequest::get("https://tryon.example/generate", Duration::from_secs(60))
    }

    fn status(code: u16) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse::new(code, "{}"))
    }

    #[test]
    fn rate_limited_twice_then_succeeds_on_third_attempt() {
        let transport = FakeTransport::with_replies(vec![status(429), status(429), status(200)]);
        let sleeper = RecordingSleeper::default();
        let mut trace = DebugTrace::new("test");

        let resp = send_with_backoff(
            &transport,
            &sleeper,
            &request(),
            RetryPolicy::default(),
            &mut trace,
        )
        .expect("third attempt should succeed");

        assert_eq!(resp.status, 200);
        assert_eq!(transport.call_count(), 3);
        assert_eq!(
            sleeper.calls(),
            vec![Duration::from_secs(5), Duration::from_secs(10)]
        );
        assert!(sleeper.total() >= Duration::from_secs(15));
    }

    #[test]
    fn rate_limit_exhaustion_fails_after_four_attempts() {
        let transport = FakeTransport::with_replies(vec![
            status(429),
            status(429),
            status(429),
            status(429),
        ]);
        let sleeper = RecordingSleeper::default();
        let mut trace = DebugTrace::new("test");

        let err = send_with_backoff(
            &transport,
            &sleeper,
            &request(),
            RetryPolicy::default(),
            &mut trace,
        )
        .expect_err("should exhaust retries");

        assert!(matches!(err, RetryError::RateLimitExceeded { attempts: 4 }));
        assert_eq!(transport.call_count(), 4);
        assert_eq!(sleeper.total(), Duration::from_secs(5 + 10 + 20));
    }

    #[test]
    fn timeouts_retry_immediately_then_give_up() {
        let timeout = || -> Result<HttpResponse, TransportError> {
            Err(TransportError::Timeout(String::from("deadline")))
        };
        let transport = FakeTransport::with_replies(vec![timeout(), timeout(), timeout(), timeout()]);
        let sleeper = RecordingSleeper::default();
        let mut trace = DebugTrace::new("test");

        let err = send_with_backoff(
            &transport,
            &sleeper,
            &request(),
            RetryPolicy::default(),
            &mut trace,
        )
        .expect_err("should time out");

        assert!(matches!(err, RetryError::TimedOut { attempts: 4 }));
        assert!(sleeper.calls().is_empty());
    }

    #[test]
    fn timeout_then_success_recovers() {
        let transport = FakeTransport::with_replies(vec![
            Err(TransportError::Timeout(String::from("deadline"))),
            status(200),
        ]);
        let sleeper = RecordingSleeper::default();
        let mut trace = DebugTrace::new("test");

        send_with_backoff(
            &transport,
            &sleeper,
            &request(),
            RetryPolicy::default(),
            &mut trace,
        )
        .expect("second attempt should succeed");
        assert_eq!(transport.call_count(), 2);
    }

    #[test]
    fn other_status_fails_without_retry() {
        let transport = FakeTransport::with_replies(vec![
            Ok(HttpResponse::new(500, "boom")),
            status(200),
        ]);
        let sleeper = RecordingSleeper::default();
        let mut trace = DebugTrace::new("test");

        let err = send_with_backoff(
            &transport,
            &sleeper,
            &request(),
            RetryPolicy::default(),
            &mut trace,
        )
        .expect_err("500 is terminal");

        match err {
            RetryError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.call_count(), 1);
    }

    #[test]
    fn network_errors_are_not_retried() {
        let transport = FakeTransport::with_replies(vec![Err(TransportError::Network(
            String::from("connection refused"),
        ))]);
        let sleeper = RecordingSleeper::default();
        let mut trace = DebugTrace::new("test");

        let err = send_with_backoff(
            &transport,
            &sleeper,
            &request(),
            RetryPolicy::default(),
            &mut trace,
        )
        .expect_err("network errors are terminal");
        assert!(err.to_string().starts_with("Network error:"));
        assert_eq!(transport.call_count(), 1);
    }
}
