//! Asynchronous operation waiting.
//!
//! Unique responsibility: poll an operation until it reaches a terminal state
//! or the time budget runs out. The same function serves every resource kind;
//! callers only supply the poll future and a completion check.
//!
//! States: Polling -> Done | Failed | TimedOut.
//! - Done: the check returned [`Check::Done`].
//! - Failed: the check returned [`Check::Failed`], or polling itself errored.
//! - TimedOut: the deadline passed without a terminal check. The mutation may
//!   still have been applied server-side, so this is reported separately.

use std::{future::Future, time::Duration};

use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Default time budget for a single operation.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(600);

/// Polling schedule.
///
/// The interval starts at `initial_interval` and doubles every `scaleup` polls,
/// capped at `max_interval`. A `scaleup` of 0 keeps the interval fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Total time budget.
    pub timeout: Duration,
    /// First delay between polls.
    pub initial_interval: Duration,
    /// Upper bound for the delay between polls.
    pub max_interval: Duration,
    /// Number of polls after which the delay doubles.
    pub scaleup: u32,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WAIT_TIMEOUT,
            initial_interval: Duration::from_secs(3),
            max_interval: Duration::from_secs(10),
            scaleup: 10,
        }
    }
}

impl WaitPolicy {
    /// Fixed-interval policy.
    #[must_use]
    pub const fn fixed(interval: Duration, timeout: Duration) -> Self {
        Self {
            timeout,
            initial_interval: interval,
            max_interval: interval,
            scaleup: 0,
        }
    }

    /// Same schedule with a different time budget.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn interval_after(&self, polls: u32) -> Duration {
        if self.scaleup == 0 {
            return self.initial_interval.min(self.max_interval);
        }
        let doublings = (polls / self.scaleup).min(16);
        self.initial_interval
            .saturating_mul(1_u32 << doublings)
            .min(self.max_interval)
    }
}

/// Result of inspecting one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// Terminal success.
    Done,
    /// Not there yet.
    Pending,
    /// Terminal failure reported by the API.
    Failed(String),
}

/// Presence of a resource while waiting for it to disappear.
#[derive(Debug, Clone, PartialEq)]
pub enum Presence<T> {
    /// Still reported by the API.
    Present(T),
    /// The API answered "not found".
    Gone,
}

/// Why waiting stopped without success.
#[derive(Debug, Error)]
pub enum WaitError<E> {
    /// Deadline passed; the operation may still complete server-side.
    #[error("operation not confirmed within {0:?}")]
    TimedOut(Duration),
    /// The operation reached a failed terminal state.
    #[error("operation failed: {0}")]
    Failed(String),
    /// Polling itself failed.
    #[error(transparent)]
    Poll(E),
}

/// Poll until `check` reports a terminal state or the policy's timeout passes.
///
/// Polls at least once; the last poll happens at the deadline at the latest.
///
/// # Errors
///
/// - [`WaitError::TimedOut`] if no terminal state was observed in time,
/// - [`WaitError::Failed`] if `check` reported a failure,
/// - [`WaitError::Poll`] if `poll` returned an error.
pub async fn wait_for<T, E, F, Fut, C>(
    policy: &WaitPolicy,
    mut poll: F,
    check: C,
) -> Result<T, WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&T) -> Check,
{
    let start = Instant::now();
    let mut polls: u32 = 0;

    loop {
        let value = poll().await.map_err(WaitError::Poll)?;
        polls = polls.saturating_add(1);

        match check(&value) {
            Check::Done => return Ok(value),
            Check::Failed(reason) => return Err(WaitError::Failed(reason)),
            Check::Pending => {}
        }

        let elapsed = start.elapsed();
        if elapsed >= policy.timeout {
            return Err(WaitError::TimedOut(policy.timeout));
        }

        let delay = policy.interval_after(polls).min(policy.timeout - elapsed);
        debug!(polls, ?elapsed, ?delay, "operation pending");
        tokio::time::sleep(delay).await;
    }
}

/// Extract the request id from a `Location` header such as
/// `https://api.ionos.com/cloudapi/v6/requests/<uuid>/status`.
#[must_use]
pub fn extract_request_id(location: &str) -> Option<&str> {
    let (_, rest) = location.split_once("/requests/")?;
    let (id, _) = rest.split_once('/')?;
    let valid = !id.is_empty() && id.chars().all(|c| c == '-' || c.is_ascii_hexdigit());
    valid.then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast() -> WaitPolicy {
        WaitPolicy::fixed(Duration::from_secs(1), Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn returns_done_before_timeout() {
        let calls = Cell::new(0_u32);
        let result: Result<u32, WaitError<String>> = wait_for(
            &fast(),
            || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move { Ok(n) }
            },
            |n| if *n >= 3 { Check::Done } else { Check::Pending },
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_raising_other_errors() {
        let calls = Cell::new(0_u32);
        let result: Result<(), WaitError<String>> = wait_for(
            &fast(),
            || {
                calls.set(calls.get() + 1);
                async { Ok(()) }
            },
            |_| Check::Pending,
        )
        .await;

        assert!(matches!(result, Err(WaitError::TimedOut(d)) if d == Duration::from_secs(10)));
        // One poll at t=0 and one per second up to and including the deadline.
        assert_eq!(calls.get(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_state_stops_polling() {
        let result: Result<&str, WaitError<String>> = wait_for(
            &fast(),
            || async { Ok("FAILED") },
            |s| {
                if *s == "FAILED" {
                    Check::Failed("provisioning failed".into())
                } else {
                    Check::Pending
                }
            },
        )
        .await;

        assert!(matches!(result, Err(WaitError::Failed(m)) if m == "provisioning failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_errors_are_propagated() {
        let result: Result<(), WaitError<String>> =
            wait_for(&fast(), || async { Err("boom".to_string()) }, |_| Check::Done).await;
        assert!(matches!(result, Err(WaitError::Poll(e)) if e == "boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn gone_counts_as_done_when_waiting_for_deletion() {
        let calls = Cell::new(0_u32);
        let result: Result<Presence<&str>, WaitError<String>> = wait_for(
            &fast(),
            || {
                calls.set(calls.get() + 1);
                let presence = if calls.get() < 2 {
                    Presence::Present("volume")
                } else {
                    Presence::Gone
                };
                async move { Ok(presence) }
            },
            |p| match p {
                Presence::Gone => Check::Done,
                Presence::Present(_) => Check::Pending,
            },
        )
        .await;

        assert_eq!(result.unwrap(), Presence::Gone);
    }

    #[test]
    fn interval_scales_up_and_caps() {
        let policy = WaitPolicy {
            timeout: Duration::from_secs(600),
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(5),
            scaleup: 2,
        };
        assert_eq!(policy.interval_after(1), Duration::from_secs(1));
        assert_eq!(policy.interval_after(2), Duration::from_secs(2));
        assert_eq!(policy.interval_after(4), Duration::from_secs(4));
        assert_eq!(policy.interval_after(6), Duration::from_secs(5));
        assert_eq!(policy.interval_after(1_000), Duration::from_secs(5));
    }

    #[test]
    fn request_id_is_extracted_from_location() {
        let location =
            "https://api.ionos.com/cloudapi/v6/requests/3f9a1c2e-0b7d-4e5f-9a8b-1c2d3e4f5a6b/status";
        assert_eq!(
            extract_request_id(location),
            Some("3f9a1c2e-0b7d-4e5f-9a8b-1c2d3e4f5a6b")
        );
        assert_eq!(extract_request_id("https://api.ionos.com/cloudapi/v6/datacenters"), None);
        assert_eq!(extract_request_id("/requests/not-a-uuid!/status"), None);
        assert_eq!(extract_request_id("/requests/abc"), None);
    }
}
