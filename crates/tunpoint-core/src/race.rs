//! Resolution race
//!
//! Server resolution runs beside engine startup instead of in front of it.
//! A watcher then waits for whichever comes first: resolution finishing or
//! the run being cancelled.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, Instrument};

use crate::cancel::CancelSignal;
use crate::dialer::{ProtectedDialer, ResolveOutcome};

/// Completion side of one run's resolution.
///
/// Completes exactly once; the result is memoized so a late waiter still
/// observes it.
pub struct Resolution {
    rx: watch::Receiver<Option<ResolveOutcome>>,
}

impl Resolution {
    /// Wait for resolution to finish. A resolver that went away without
    /// reporting counts as unresolved.
    pub async fn completed(&mut self) -> ResolveOutcome {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).unwrap_or(ResolveOutcome::Unresolved),
            Err(_) => ResolveOutcome::Unresolved,
        }
    }
}

/// Which signal the watcher saw first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceWinner {
    Completed(ResolveOutcome),
    Cancelled,
}

/// Start resolving `domain` in the background without blocking the caller
pub fn launch(
    dialer: Arc<ProtectedDialer>,
    domain: Option<String>,
    prefer_ipv6: bool,
    cancel: CancelSignal,
) -> Resolution {
    let (tx, rx) = watch::channel(None);
    let span = tracing::info_span!("resolve", run = %cancel.run_id());

    tokio::spawn(
        async move {
            let outcome = dialer
                .resolve_server(domain.as_deref(), prefer_ipv6, &cancel)
                .await;
            debug!("Resolution finished: {:?}", outcome);
            let _ = tx.send(Some(outcome));
        }
        .instrument(span),
    );

    Resolution { rx }
}

/// Wait for resolution or cancellation, whichever fires first.
/// Cancellation wins a tie.
pub async fn race(resolution: &mut Resolution, cancel: &CancelSignal) -> RaceWinner {
    tokio::select! {
        biased;
        _ = cancel.fired() => RaceWinner::Cancelled,
        outcome = resolution.completed() => RaceWinner::Completed(outcome),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialer::{MockResolver, ResolveSettings};
    use crate::host::MockHostCallbacks;
    use std::io;
    use std::time::Duration;

    /// Dialer whose lookups always fail
    fn dialer(max_retries: u32, retry_delay: Duration) -> Arc<ProtectedDialer> {
        let mut resolver = MockResolver::new();
        resolver
            .expect_lookup()
            .returning(|_, _| Err(io::Error::new(io::ErrorKind::NotFound, "no such host")));
        Arc::new(ProtectedDialer::with_resolver(
            Arc::new(MockHostCallbacks::new()),
            Arc::new(resolver),
            ResolveSettings {
                max_retries,
                retry_delay,
            },
        ))
    }

    #[tokio::test]
    async fn test_completion_wins_for_literal_ip() {
        let cancel = CancelSignal::new();
        let mut resolution = launch(
            dialer(1, Duration::from_millis(10)),
            Some("198.51.100.1:443".to_string()),
            false,
            cancel.clone(),
        );

        let winner = race(&mut resolution, &cancel).await;
        assert_eq!(winner, RaceWinner::Completed(ResolveOutcome::Resolved));
    }

    #[tokio::test]
    async fn test_cancellation_wins_while_retrying() {
        let cancel = CancelSignal::new();
        let mut resolution = launch(
            dialer(10, Duration::from_secs(30)),
            Some("server.invalid:443".to_string()),
            false,
            cancel.clone(),
        );

        let racer = {
            let cancel = cancel.clone();
            tokio::spawn(async move { race(&mut resolution, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.fire();

        let winner = tokio::time::timeout(Duration::from_secs(5), racer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(winner, RaceWinner::Cancelled);
    }

    #[tokio::test]
    async fn test_result_is_memoized() {
        let cancel = CancelSignal::new();
        let mut resolution = launch(
            dialer(1, Duration::from_millis(10)),
            None,
            false,
            cancel.clone(),
        );

        assert_eq!(resolution.completed().await, ResolveOutcome::Resolved);
        assert_eq!(resolution.completed().await, ResolveOutcome::Resolved);
    }

    #[tokio::test]
    async fn test_already_cancelled_run_never_reports_completion() {
        let cancel = CancelSignal::new();
        cancel.fire();
        let mut resolution = launch(
            dialer(1, Duration::from_millis(10)),
            None,
            false,
            cancel.clone(),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(race(&mut resolution, &cancel).await, RaceWinner::Cancelled);
    }
}
