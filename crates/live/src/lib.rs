//! Fleet live channel: a reconnecting push socket that turns `refresh`
//! messages into soft grid reloads.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use fleet_core::RefreshTarget;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

mod ws;

pub use ws::WsConnector;

/// Recognised invalidation token.
pub const REFRESH_TOKEN: &str = "refresh";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LiveError {
    #[error("invalid push url: {0}")]
    Url(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport: {0}")]
    Transport(String),
}

/// Text frames from an open connection; the stream ends when the server closes.
pub type PushStream = BoxStream<'static, Result<String, LiveError>>;

/// Opens push connections. Dropping the returned stream closes the connection.
#[async_trait::async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self) -> Result<PushStream, LiveError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveConfig {
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self { backoff_base: Duration::from_millis(1000), backoff_max: Duration::from_millis(10_000) }
    }
}

impl LiveConfig {
    /// `FLEET_WS_BACKOFF_BASE_MS`, `FLEET_WS_BACKOFF_MAX_MS`.
    pub fn from_env() -> Self {
        let base = std::env::var("FLEET_WS_BACKOFF_BASE_MS").ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(1000);
        let max = std::env::var("FLEET_WS_BACKOFF_MAX_MS").ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(10_000);
        Self { backoff_base: Duration::from_millis(base), backoff_max: Duration::from_millis(max.max(base)) }
    }
}

/// Doubling reconnect delay with a ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max, next: base }
    }

    /// Delay before the next attempt; doubles the one after, up to the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        let d = self.next;
        self.next = (self.next * 2).min(self.max);
        d
    }

    pub fn reset(&mut self) {
        self.next = self.base;
    }

    pub fn peek(&self) -> Duration {
        self.next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveState {
    Disconnected,
    Connecting,
    Connected,
    /// Torn down; no further attempts.
    Stopped,
}

/// Owner of a running channel. Dropping it tears the channel down as well.
pub struct LiveHandle {
    stop: Option<oneshot::Sender<()>>,
    state_rx: watch::Receiver<LiveState>,
    join: Option<JoinHandle<()>>,
}

impl LiveHandle {
    pub fn state(&self) -> LiveState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LiveState> {
        self.state_rx.clone()
    }

    /// Cancel any pending reconnect, close the connection and wait for the task.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!(error = %e, "live channel task failed");
            }
        }
    }
}

impl Drop for LiveHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
    }
}

/// True for the refresh token, ignoring surrounding whitespace.
pub fn is_refresh(payload: &str) -> bool {
    payload.trim() == REFRESH_TOKEN
}

/// Keep a push connection open for `label`, reconnecting with backoff, and
/// call `target.refresh()` once per refresh message.
pub fn spawn_channel(
    label: impl Into<String>,
    connector: Arc<dyn PushConnector>,
    target: Arc<dyn RefreshTarget>,
    cfg: LiveConfig,
) -> LiveHandle {
    let label = label.into();
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let (state_tx, state_rx) = watch::channel(LiveState::Disconnected);

    let join = tokio::spawn(async move {
        let mut backoff = Backoff::new(cfg.backoff_base, cfg.backoff_max);
        let set_state = |s: LiveState| {
            let _ = state_tx.send(s);
        };

        'outer: loop {
            set_state(LiveState::Connecting);
            let conn = tokio::select! {
                _ = &mut stop_rx => break 'outer,
                r = connector.connect() => r,
            };
            match conn {
                Ok(mut stream) => {
                    backoff.reset();
                    set_state(LiveState::Connected);
                    info!(channel = %label, "push channel connected");
                    loop {
                        tokio::select! {
                            _ = &mut stop_rx => break 'outer,
                            msg = stream.next() => match msg {
                                Some(Ok(text)) => {
                                    if is_refresh(&text) {
                                        metrics::counter!("live_refresh_signal_total", 1);
                                        debug!(channel = %label, "refresh signal");
                                        target.refresh();
                                    } else {
                                        debug!(channel = %label, payload = %text.trim(), "ignoring push message");
                                    }
                                }
                                Some(Err(e)) => {
                                    warn!(channel = %label, error = %e, "push transport error; closing");
                                    break;
                                }
                                None => {
                                    info!(channel = %label, "push channel closed by server");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => warn!(channel = %label, error = %e, "push connect failed"),
            }

            set_state(LiveState::Disconnected);
            let delay = backoff.next_delay();
            metrics::counter!("live_reconnect_total", 1);
            debug!(channel = %label, delay_ms = %delay.as_millis(), "reconnect scheduled");
            tokio::select! {
                _ = &mut stop_rx => break 'outer,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        set_state(LiveState::Stopped);
        info!(channel = %label, "push channel stopped");
    });

    LiveHandle { stop: Some(stop_tx), state_rx, join: Some(join) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_to_ceiling_and_resets() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
        let seq: Vec<u64> = (0..6).map(|_| b.next_delay().as_millis() as u64).collect();
        assert_eq!(seq, vec![1000, 2000, 4000, 8000, 10_000, 10_000]);
        b.reset();
        assert_eq!(b.peek(), Duration::from_secs(1));
    }

    #[test]
    fn only_trimmed_literal_token_is_refresh() {
        assert!(is_refresh("refresh"));
        assert!(is_refresh("  refresh\n"));
        assert!(!is_refresh("Refresh"));
        assert!(!is_refresh("refresh now"));
        assert!(!is_refresh(""));
    }
}
