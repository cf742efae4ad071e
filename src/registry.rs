//! The fleet: every printer session created at startup.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::PrinterEndpoint;
use crate::printer::{PrinterSession, SessionSnapshot, Uploader};

pub struct Registry {
    sessions: Vec<Arc<PrinterSession>>,
}

impl Registry {
    pub fn new(sessions: Vec<Arc<PrinterSession>>) -> Self {
        Self { sessions }
    }

    /// Connect to every endpoint concurrently. A printer that cannot be reached is still
    /// registered, marked unreachable, so it shows up in listings but is never matched.
    pub async fn connect_all(
        endpoints: &[PrinterEndpoint],
        uploader: Arc<dyn Uploader>,
        response_timeout: Duration,
    ) -> Self {
        let attempts = endpoints.iter().map(|endpoint| {
            let uploader = Arc::clone(&uploader);
            async move {
                match PrinterSession::connect(endpoint.clone(), Arc::clone(&uploader), response_timeout)
                    .await
                {
                    Ok(session) => session,
                    Err(e) => {
                        let (session, _) =
                            PrinterSession::new(endpoint.clone(), uploader, response_timeout);
                        session.mark_unreachable(&e.to_string());
                        session
                    }
                }
            }
        });
        let registry = Self::new(join_all(attempts).await);

        let reachable = registry.sessions.iter().filter(|s| s.is_reachable()).count();
        tracing::info!(
            printers = registry.sessions.len(),
            reachable,
            "Printer registry ready",
        );
        registry
    }

    pub fn sessions(&self) -> &[Arc<PrinterSession>] {
        &self.sessions
    }

    pub fn list_all(&self) -> Vec<SessionSnapshot> {
        self.sessions.iter().map(|s| s.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Send a status query to every reachable session without waiting for answers.
    /// Returns how many queries went out.
    pub fn refresh_all(&self) -> usize {
        let mut sent = 0;
        for session in self.sessions.iter().filter(|s| s.is_reachable()) {
            match session.request_print_status() {
                Ok(()) => sent += 1,
                Err(e) => {
                    tracing::warn!(printer = %session.name(), error = %e, "Status refresh failed");
                }
            }
        }
        sent
    }

    /// Refresh the fleet on a fixed interval until cancelled.
    pub async fn run_refresh(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let sent = self.refresh_all();
                    tracing::trace!(sent, "Fleet status refreshed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::PrinterState;
    use crate::test_support::{FakeUploader, detached_session};

    #[test]
    fn refresh_skips_unreachable_sessions() {
        let (a, mut rx_a) = detached_session("a");
        let (b, mut rx_b) = detached_session("b");
        b.mark_unreachable("down");
        let registry = Registry::new(vec![a, b]);

        assert_eq!(registry.refresh_all(), 1);
        let frame: serde_json::Value = serde_json::from_str(&rx_a.try_recv().unwrap()).unwrap();
        assert_eq!(frame["id"], 3331);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn list_all_reports_every_session() {
        let (a, _rx_a) = detached_session("a");
        let (b, _rx_b) = detached_session("b");
        b.mark_unreachable("down");
        let listed = Registry::new(vec![a, b]).list_all();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "a");
        assert!(listed[0].reachable);
        assert!(!listed[1].reachable);
        assert_eq!(listed[1].state, PrinterState::Standby);
    }

    #[tokio::test]
    async fn failed_connection_is_registered_unreachable() {
        // Port 9 (discard) is not listening in test environments.
        let endpoints = vec![PrinterEndpoint::new("127.0.0.1", 9)];
        let registry = Registry::connect_all(
            &endpoints,
            Arc::new(FakeUploader::default()),
            Duration::from_millis(200),
        )
        .await;
        assert_eq!(registry.len(), 1);
        assert!(!registry.sessions()[0].is_reachable());
        assert_eq!(registry.refresh_all(), 0);
    }

    #[tokio::test]
    async fn run_refresh_stops_on_cancel() {
        let (a, mut rx) = detached_session("a");
        let registry = Arc::new(Registry::new(vec![a]));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            Arc::clone(&registry).run_refresh(Duration::from_millis(10), cancel.clone()),
        );
        let first = rx.recv().await.unwrap();
        assert!(first.contains("printer.objects.query"));
        cancel.cancel();
        handle.await.unwrap();
    }
}
