use std::future::Future;

use futures::{Stream, StreamExt};

use crate::console::Console;

/// Interrupts tolerated while the runtime shuts down before giving up on it.
pub const MAX_SHUTDOWN_INTERRUPTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Completed { interrupts: u32 },
    /// The operator interrupted every attempt; processes may be left behind.
    Abandoned { interrupts: u32 },
}

/// Run `attempt` until it completes. Each interrupt aborts the current
/// attempt and starts a new one, up to [`MAX_SHUTDOWN_INTERRUPTS`].
pub async fn shutdown_with_retries<F, Fut, S>(
    mut attempt: F,
    mut interrupts: S,
    console: &Console,
) -> ShutdownOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
    S: Stream<Item = ()> + Unpin,
{
    let mut times_interrupted = 0;
    loop {
        let fut = attempt();
        tokio::pin!(fut);

        let interrupt = tokio::select! {
            _ = &mut fut => {
                return ShutdownOutcome::Completed { interrupts: times_interrupted };
            }
            interrupt = interrupts.next() => interrupt,
        };
        if interrupt.is_none() {
            fut.await;
            return ShutdownOutcome::Completed {
                interrupts: times_interrupted,
            };
        }

        times_interrupted += 1;
        tracing::warn!(times_interrupted, "User interrupted shutdown of the actor runtime");
        if times_interrupted >= MAX_SHUTDOWN_INTERRUPTS {
            console.warn("Terminating now at the risk of leaving child processes behind.");
            return ShutdownOutcome::Abandoned {
                interrupts: times_interrupted,
            };
        }
        console.info("Please wait a moment for racetrack's internal components to shut down.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_gives_up_after_two_interrupts() {
        let attempts = AtomicUsize::new(0);
        let outcome = shutdown_with_retries(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                futures::future::pending::<()>()
            },
            futures::stream::iter(vec![(), (), ()]),
            &Console::new(true),
        )
        .await;

        assert_eq!(outcome, ShutdownOutcome::Abandoned { interrupts: 2 });
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_completes_without_interrupts() {
        let outcome = shutdown_with_retries(
            || async {},
            futures::stream::pending::<()>(),
            &Console::new(true),
        )
        .await;
        assert_eq!(outcome, ShutdownOutcome::Completed { interrupts: 0 });
    }

    #[tokio::test]
    async fn test_retry_after_single_interrupt_completes() {
        let attempts = AtomicUsize::new(0);
        let outcome = shutdown_with_retries(
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        futures::future::pending::<()>().await;
                    }
                }
            },
            futures::stream::iter(vec![()]).chain(futures::stream::pending()),
            &Console::new(true),
        )
        .await;
        assert_eq!(outcome, ShutdownOutcome::Completed { interrupts: 1 });
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
