//! Typewriter effect for presenting finished text.
//!
//! [`simulate_typewriter`] replays a complete string one character per tick
//! on a spawned tokio task. The returned [`TypewriterHandle`] cancels it.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Tick used by callers that have no preference.
pub const DEFAULT_TICK: Duration = Duration::from_millis(30);

/// Cancellation flag. The task holds the lock while it checks the flag and
/// delivers an update, so `cancel` cannot interleave with a delivery.
type CancelFlag = Arc<Mutex<bool>>;

fn lock(flag: &Mutex<bool>) -> MutexGuard<'_, bool> {
    flag.lock().unwrap_or_else(|e| e.into_inner())
}

/// Handle to a running typewriter task.
#[derive(Debug)]
pub struct TypewriterHandle {
    cancelled: CancelFlag,
    task: JoinHandle<()>,
}

impl TypewriterHandle {
    /// Stop the effect. No further updates are delivered after this returns.
    pub fn cancel(&self) {
        *lock(&self.cancelled) = true;
        self.task.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        *lock(&self.cancelled)
    }

    /// Whether the task has stopped, either by finishing or by cancellation.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task to stop. Returns `true` if the whole text was shown.
    pub async fn join(self) -> bool {
        let finished = self.task.await.is_ok();
        finished && !*lock(&self.cancelled)
    }
}

/// Emit growing prefixes of `text` to `on_update`, one more character every
/// `tick`. The first update arrives after one tick; empty text produces none.
///
/// Must be called from within a tokio runtime.
///
/// ```no_run
/// # async fn demo() {
/// use content_pipeline::typewriter::simulate_typewriter;
/// use std::time::Duration;
///
/// let handle = simulate_typewriter("Hello", Duration::from_millis(30), |shown| {
///     print!("\r{}", shown);
/// });
/// handle.join().await;
/// # }
/// ```
pub fn simulate_typewriter<F>(text: impl Into<String>, tick: Duration, mut on_update: F) -> TypewriterHandle
where
    F: FnMut(&str) + Send + 'static,
{
    let text = text.into();
    let cancelled: CancelFlag = Arc::new(Mutex::new(false));
    let flag = cancelled.clone();

    let task = tokio::spawn(async move {
        let ends = text
            .char_indices()
            .map(|(i, c)| i + c.len_utf8())
            .collect::<Vec<_>>();

        for end in ends {
            tokio::time::sleep(tick).await;
            {
                let cancelled = lock(&flag);
                if *cancelled {
                    return;
                }
                on_update(&text[..end]);
            }
        }
    });

    TypewriterHandle { cancelled, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl FnMut(&str) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |s: &str| sink.lock().unwrap().push(s.to_string()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_every_prefix() {
        let (seen, on_update) = recorder();
        let handle = simulate_typewriter("héllo", Duration::from_millis(10), on_update);
        assert!(handle.join().await);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["h", "hé", "hél", "héll", "héllo"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_text_emits_nothing() {
        let (seen, on_update) = recorder();
        let handle = simulate_typewriter("", DEFAULT_TICK, on_update);
        assert!(handle.join().await);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_updates() {
        let (seen, on_update) = recorder();
        let handle = simulate_typewriter("hello world", Duration::from_millis(10), on_update);

        tokio::time::sleep(Duration::from_millis(35)).await;
        handle.cancel();
        assert!(handle.is_cancelled());
        let shown = seen.lock().unwrap().len();
        assert!(shown > 0 && shown < "hello world".len());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(seen.lock().unwrap().len(), shown);
        assert!(!handle.join().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_update_after_cancel_on_worker_threads() {
        let text = "x".repeat(500);
        for _ in 0..20 {
            let (seen, on_update) = recorder();
            let handle = simulate_typewriter(text.clone(), Duration::from_micros(200), on_update);

            tokio::time::sleep(Duration::from_millis(3)).await;
            handle.cancel();
            let shown = seen.lock().unwrap().len();

            tokio::time::sleep(Duration::from_millis(20)).await;
            assert_eq!(seen.lock().unwrap().len(), shown);
            assert!(shown < text.len());
            assert!(!handle.join().await);
        }
    }
}
