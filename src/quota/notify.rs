//! Advisory notifications
//!
//! Near-limit notices are pure output: they never feed back into a quota
//! decision and delivery failures are ignored.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Receives near-limit notices.
///
/// A notice is one-shot per transition within one engine instance: repeated
/// status queries at the same `remaining` stay silent. The last observed
/// value lives in memory only, so a host that builds a fresh engine per
/// invocation (such as the CLI) sees the notice again on its first query.
pub trait UsageNotifier: Send + Sync {
    /// Called with the number of uses left in the window (1 or 2)
    fn notify(&self, remaining: u32);
}

impl<F> UsageNotifier for F
where
    F: Fn(u32) + Send + Sync,
{
    fn notify(&self, remaining: u32) {
        self(remaining)
    }
}

/// Text shown for a given remaining count
pub fn advisory_message(remaining: u32) -> Option<&'static str> {
    match remaining {
        2 => Some(
            "Limit Notice\n\nYou have 2 uses remaining today.\n\
             This limit helps prevent misuse of the tool.\n\n\
             Limit resets every 24 hours.",
        ),
        1 => Some(
            "Final Warning\n\nThis is your LAST use for today.\n\
             The tool will be locked for 24 hours after this.",
        ),
        _ => None,
    }
}

/// Discards every notice
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl UsageNotifier for NoopNotifier {
    fn notify(&self, _remaining: u32) {}
}

/// Logs notices through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl UsageNotifier for TracingNotifier {
    fn notify(&self, remaining: u32) {
        if let Some(message) = advisory_message(remaining) {
            info!(remaining, "{}", message.replace('\n', " "));
        }
    }
}

/// Delivers to an inner notifier after a fixed delay.
///
/// Runs on the ambient tokio runtime. Without one the notice is delivered
/// inline, since there is nothing to schedule it on.
#[derive(Clone)]
pub struct DelayedNotifier {
    inner: Arc<dyn UsageNotifier>,
    delay: Duration,
}

impl fmt::Debug for DelayedNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedNotifier")
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

impl DelayedNotifier {
    pub fn new(inner: Arc<dyn UsageNotifier>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

impl UsageNotifier for DelayedNotifier {
    fn notify(&self, remaining: u32) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                let delay = self.delay;
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.notify(remaining);
                });
            }
            Err(_) => self.inner.notify(remaining),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, Arc<dyn UsageNotifier>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let notifier: Arc<dyn UsageNotifier> = Arc::new(move |remaining: u32| {
            sink.lock().unwrap().push(remaining);
        });
        (seen, notifier)
    }

    #[test]
    fn test_advisory_messages() {
        assert!(advisory_message(2).unwrap().contains("2 uses remaining"));
        assert!(advisory_message(1).unwrap().contains("LAST use"));
        assert!(advisory_message(0).is_none());
        assert!(advisory_message(3).is_none());
    }

    #[test]
    fn test_closure_notifier() {
        let (seen, notifier) = recorder();
        notifier.notify(2);
        assert_eq!(*seen.lock().unwrap(), vec![2]);
    }

    #[test]
    fn test_delayed_notifier_without_runtime_is_inline() {
        let (seen, notifier) = recorder();
        DelayedNotifier::new(notifier, Duration::from_secs(60)).notify(1);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_delayed_notifier_fires_after_delay() {
        let (seen, notifier) = recorder();
        let delayed = DelayedNotifier::new(notifier, Duration::from_millis(20));

        delayed.notify(2);
        assert!(seen.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*seen.lock().unwrap(), vec![2]);
    }
}
