//! Control channel to the external audiovisual engine.
//!
//! The orchestrator only sees [`EngineControl`]; the concrete OBS client
//! lives in [`obs`]. Every mutating call waits for the engine's
//! acknowledgement or a bounded timeout before returning.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::shutdown::Shutdown;

pub mod obs;
pub mod protocol;

pub use obs::{ObsClient, TextStyle};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot reach engine at {addr}: {reason}")]
    Connect { addr: String, reason: String },
    #[error("engine rejected credentials: {0}")]
    Auth(String),
    #[error("source not found: {0}")]
    SourceNotFound(String),
    #[error("engine could not load {path}: {reason}")]
    MediaLoad { path: String, reason: String },
    #[error("no acknowledgement for {request} within {timeout:?}")]
    Timeout {
        request: &'static str,
        timeout: Duration,
    },
    #[error("not connected to engine")]
    NotConnected,
    #[error("engine rejected {request} (code {code}): {comment}")]
    Rejected {
        request: &'static str,
        code: u16,
        comment: String,
    },
    #[error("engine protocol error: {0}")]
    Protocol(String),
}

impl EngineError {
    /// Errors that mean the control channel is unhealthy.
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            EngineError::Connect { .. }
                | EngineError::Timeout { .. }
                | EngineError::NotConnected
                | EngineError::Protocol(_)
        )
    }

    /// Errors scoped to a single item; skipping the item recovers.
    pub fn is_item_fault(&self) -> bool {
        matches!(
            self,
            EngineError::SourceNotFound(_) | EngineError::MediaLoad { .. }
        )
    }
}

/// Where and how to reach the engine.
#[derive(Clone, PartialEq, Eq)]
pub struct EngineEndpoint {
    pub host: String,
    pub port: u16,
    pub password: String,
}

impl EngineEndpoint {
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for EngineEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Audio and subtitle track selection applied when loading a file.
/// Subtitle index 0 disables subtitles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackSelectors {
    pub audio: u32,
    pub subtitle: u32,
}

/// Bounded exponential backoff for (re)connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    pub attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl ConnectPolicy {
    /// Delay after the failed attempt number `attempt` (0-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    None,
    Opening,
    Buffering,
    Playing,
    Paused,
    Stopped,
    Ended,
    Error,
    Unknown,
}

impl MediaState {
    /// The engine is actively presenting the file.
    pub fn is_running(self) -> bool {
        matches!(self, MediaState::Playing | MediaState::Paused)
    }
}

/// One poll of playback telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub elapsed: Duration,
    /// `None` until the engine has buffered enough to know.
    pub duration: Option<Duration>,
    pub media: MediaState,
}

impl PlaybackState {
    pub fn at_end(&self) -> bool {
        matches!(self.media, MediaState::Ended | MediaState::Stopped)
    }

    pub fn errored(&self) -> bool {
        self.media == MediaState::Error
    }
}

#[async_trait]
pub trait EngineControl: Send {
    /// Handshake and authenticate. Replaces any existing channel.
    async fn connect(&mut self, endpoint: &EngineEndpoint) -> Result<(), EngineError>;

    /// Load `path` into the named media source and start it.
    async fn set_media_file(
        &mut self,
        source: &str,
        path: &Path,
        tracks: TrackSelectors,
    ) -> Result<(), EngineError>;

    async fn playback_state(&mut self, source: &str) -> Result<PlaybackState, EngineError>;

    /// Replace a text source's content. Idempotent.
    async fn set_text(&mut self, source: &str, text: &str) -> Result<(), EngineError>;

    /// Make sure the engine's stream output is running.
    async fn ensure_output(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn stop_output(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Release the channel. Later calls fail with [`EngineError::NotConnected`].
    async fn disconnect(&mut self);
}

#[derive(Debug)]
pub enum ConnectOutcome {
    Connected { attempts: u32 },
    Exhausted(EngineError),
    Interrupted,
}

/// Connect with bounded retries and exponential backoff. Both connect and
/// auth failures are retried; the engine may still be starting up.
pub async fn connect_with_retry<E>(
    engine: &mut E,
    endpoint: &EngineEndpoint,
    policy: &ConnectPolicy,
    shutdown: &mut Shutdown,
) -> ConnectOutcome
where
    E: EngineControl + ?Sized,
{
    let attempts = policy.attempts.max(1);
    let mut last_err = EngineError::NotConnected;

    for attempt in 0..attempts {
        let Some(res) = shutdown.guard(engine.connect(endpoint)).await else {
            return ConnectOutcome::Interrupted;
        };
        match res {
            Ok(()) => {
                info!("engine connected at {} (attempt {})", endpoint.url(), attempt + 1);
                return ConnectOutcome::Connected {
                    attempts: attempt + 1,
                };
            }
            Err(e) => {
                if attempt + 1 == attempts {
                    warn!("engine connect attempt {}/{} failed: {e}", attempt + 1, attempts);
                    last_err = e;
                    break;
                }
                let delay = policy.delay_after(attempt);
                warn!(
                    "engine connect attempt {}/{} failed: {e}; retrying in {:?}",
                    attempt + 1,
                    attempts,
                    delay
                );
                last_err = e;
                if !shutdown.sleep(delay).await {
                    return ConnectOutcome::Interrupted;
                }
            }
        }
    }

    ConnectOutcome::Exhausted(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let p = ConnectPolicy {
            attempts: 10,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(5),
        };
        assert_eq!(p.delay_after(0), Duration::from_millis(500));
        assert_eq!(p.delay_after(1), Duration::from_secs(1));
        assert_eq!(p.delay_after(3), Duration::from_secs(4));
        assert_eq!(p.delay_after(4), Duration::from_secs(5));
        assert_eq!(p.delay_after(40), Duration::from_secs(5));
    }

    #[test]
    fn error_classification() {
        assert!(EngineError::NotConnected.is_connection_fault());
        assert!(EngineError::Timeout {
            request: "GetMediaInputStatus",
            timeout: Duration::from_secs(1)
        }
        .is_connection_fault());
        assert!(EngineError::SourceNotFound("Media".into()).is_item_fault());
        assert!(!EngineError::SourceNotFound("Media".into()).is_connection_fault());
        assert!(!EngineError::Auth("bad".into()).is_item_fault());
    }

    #[test]
    fn endpoint_debug_hides_password() {
        let ep = EngineEndpoint {
            host: "127.0.0.1".into(),
            port: 4455,
            password: "hunter2".into(),
        };
        assert_eq!(ep.url(), "ws://127.0.0.1:4455");
        assert!(!format!("{ep:?}").contains("hunter2"));
    }
}
