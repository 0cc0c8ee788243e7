//! Bounded polling for eventually-consistent state.
//!
//! Cross-process references (a log for a test another worker has not
//! registered yet, a parent whose children are still finishing) are resolved
//! by re-checking a condition at a fixed interval until it holds or the time
//! budget runs out. Running out is not fatal: callers log the
//! [`WaitTimeout`] and continue with their next step.

use crate::errors::WaitTimeout;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

/// Interval and budget for one poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    #[serde(rename = "interval_ms", with = "millis")]
    pub interval: Duration,
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
}

impl PollPolicy {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub const fn from_millis(interval_ms: u64, timeout_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(interval_ms),
            Duration::from_millis(timeout_ms),
        )
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_millis(100, 10_000)
    }
}

/// Poll `check` until it yields a value or `policy.timeout` elapses.
///
/// `check` runs once immediately, so an already-satisfied condition costs no
/// sleep.
pub async fn poll_until<T, F>(
    label: &str,
    policy: PollPolicy,
    mut check: F,
) -> Result<T, WaitTimeout>
where
    F: FnMut() -> Option<T>,
{
    let started = Instant::now();
    let interval = policy.interval.max(Duration::from_millis(1));
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        if let Some(value) = check() {
            if attempts > 1 {
                let waited_ms = started.elapsed().as_millis() as u64;
                debug!(label, attempts, waited_ms, "Wait satisfied");
            }
            return Ok(value);
        }

        let waited = started.elapsed();
        if waited >= policy.timeout {
            return Err(WaitTimeout {
                label: label.to_string(),
                waited,
            });
        }
        sleep(interval.min(policy.timeout - waited)).await;
    }
}

/// Like [`poll_until`] for boolean conditions, logging a timeout instead of
/// returning it. Returns whether the condition was observed.
pub async fn wait_for(
    label: &str,
    policy: PollPolicy,
    mut condition: impl FnMut() -> bool,
) -> bool {
    match poll_until(label, policy, || condition().then_some(())).await {
        Ok(()) => true,
        Err(err) => {
            warn!("{err}; proceeding");
            false
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn returns_immediately_when_condition_holds() {
        let policy = PollPolicy::from_millis(1_000, 10_000);
        let started = std::time::Instant::now();
        let value = poll_until("ready", policy, || Some(7)).await.unwrap();
        assert_eq!(value, 7);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn retries_until_condition_holds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let policy = PollPolicy::from_millis(1, 1_000);

        let value = poll_until("third time", policy, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            (n >= 3).then_some(n)
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_timeout() {
        let policy = PollPolicy::from_millis(100, 1_000);
        let err = poll_until::<(), _>("never", policy, || None).await.unwrap_err();
        assert_eq!(err.label, "never");
        assert!(err.waited >= Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_reports_outcome() {
        let policy = PollPolicy::from_millis(10, 50);
        assert!(wait_for("yes", policy, || true).await);
        assert!(!wait_for("no", policy, || false).await);
    }

    #[test]
    fn policy_serde_uses_milliseconds() {
        let policy: PollPolicy =
            serde_json::from_str(r#"{"interval_ms": 250, "timeout_ms": 5000}"#).unwrap();
        assert_eq!(policy, PollPolicy::from_millis(250, 5_000));
        assert_eq!(PollPolicy::default(), PollPolicy::from_millis(100, 10_000));
    }
}
