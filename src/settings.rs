//! Resolved runtime settings.
//!
//! Everything is read from environment variables (after an optional `.env`
//! file) once at startup. Malformed values are rejected here, before any
//! connection attempt: retrying with a bad track index or a zero poll
//! interval would only burn the stream.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::catalog::PlaylistOrder;
use crate::engine::{ConnectPolicy, EngineEndpoint, TrackSelectors};

/// Errors produced while resolving settings. All of them are fatal.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("failed to load env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub video_directory: PathBuf,
    /// Lower-case extensions without the leading dot.
    pub allowed_extensions: Vec<String>,
    pub loop_playlist: bool,
    pub order: PlaylistOrder,
    pub start_episode: Option<String>,
    pub tracks: TrackSelectors,
    pub endpoint: EngineEndpoint,
    pub media_source: String,
    pub text_source: String,
    pub text_size: u32,
    pub overlay_font: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub start_timeout: Duration,
    pub connect: ConnectPolicy,
    pub max_load_failures: u32,
    pub manage_stream: bool,
    pub db_path: Option<PathBuf>,
    pub status_bind: Option<SocketAddr>,
}

/// Load `.env` (or the file named by `PLAYOUT_ENV_FILE`) into the process
/// environment. Variables that are already set keep their value.
///
/// Returns the path that was loaded, if any.
pub fn load_env_file() -> Result<Option<PathBuf>, SettingsError> {
    let path = std::env::var("PLAYOUT_ENV_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".env"));
    load_env_file_from(&path)
}

fn load_env_file_from(path: &Path) -> Result<Option<PathBuf>, SettingsError> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(Some(path.to_path_buf())),
        Err(dotenvy::Error::Io(_)) => Ok(None),
        Err(source) => Err(SettingsError::EnvFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings through an arbitrary key lookup (the environment in
    /// production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let video_directory = PathBuf::from(env.required("VIDEO_DIR")?);
        let allowed_extensions = parse_exts(&env.string("VIDEO_EXTS", ".mkv"));

        let order = match env.string("PLAYLIST_ORDER", "path").trim().to_ascii_lowercase().as_str() {
            "path" => PlaylistOrder::Path,
            "episode" => PlaylistOrder::Episode,
            "shuffle" => PlaylistOrder::Shuffle {
                seed: env.optional_parse::<u64>("SHUFFLE_SEED")?,
            },
            other => {
                return Err(SettingsError::Invalid {
                    key: "PLAYLIST_ORDER",
                    value: other.to_string(),
                    reason: "expected path, episode or shuffle".into(),
                })
            }
        };

        let tracks = TrackSelectors {
            audio: env.parse("AUDIO_INDEX", 1u32)?,
            subtitle: env.parse("SUB_SI", 1u32)?,
        };

        let endpoint = EngineEndpoint {
            host: env.string("OBS_HOST", "127.0.0.1"),
            port: env.parse("OBS_PORT", 4455u16)?,
            password: env.required("OBS_PASSWORD")?,
        };

        let legacy_media = env.get("OBS_VLC_SOURCE");
        let media_source = env.string("OBS_MEDIA_SOURCE", legacy_media.as_deref().unwrap_or("Media"));
        let text_source = env.string("OBS_TEXT_SOURCE", "NowPlaying");
        if media_source.trim().is_empty() {
            return Err(SettingsError::Missing("OBS_MEDIA_SOURCE"));
        }
        if text_source.trim().is_empty() {
            return Err(SettingsError::Missing("OBS_TEXT_SOURCE"));
        }

        let text_size: u32 = env.parse("TEXT_SIZE", 24)?;
        if text_size == 0 {
            return Err(SettingsError::Invalid {
                key: "TEXT_SIZE",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }

        let connect = ConnectPolicy {
            attempts: env.parse("CONNECT_ATTEMPTS", 10u32)?,
            backoff_base: Duration::from_millis(env.parse("CONNECT_BACKOFF_MS", 1000u64)?),
            backoff_max: Duration::from_millis(env.parse("CONNECT_BACKOFF_MAX_MS", 30_000u64)?),
        };
        if connect.attempts == 0 {
            return Err(SettingsError::Invalid {
                key: "CONNECT_ATTEMPTS",
                value: "0".into(),
                reason: "at least one attempt is required".into(),
            });
        }

        let max_load_failures: u32 = env.parse("MAX_LOAD_FAILURES", 3)?;
        if max_load_failures == 0 {
            return Err(SettingsError::Invalid {
                key: "MAX_LOAD_FAILURES",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let status_bind = match env.get("PLAYOUT_STATUS_BIND").filter(|s| !s.trim().is_empty()) {
            Some(raw) => Some(raw.trim().parse::<SocketAddr>().map_err(|e| SettingsError::Invalid {
                key: "PLAYOUT_STATUS_BIND",
                value: raw.clone(),
                reason: e.to_string(),
            })?),
            None => None,
        };

        Ok(Self {
            video_directory,
            allowed_extensions,
            loop_playlist: env.flag("LOOP", true),
            order,
            start_episode: env.get("START_EP").map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            tracks,
            endpoint,
            media_source,
            text_source,
            text_size,
            overlay_font: env.string("OVERLAY_FONT", "DejaVu Sans"),
            poll_interval: env.seconds("POLL_INTERVAL_SECS", 1.0)?,
            request_timeout: env.seconds("REQUEST_TIMEOUT_SECS", 5.0)?,
            start_timeout: env.seconds("START_TIMEOUT_SECS", 15.0)?,
            connect,
            max_load_failures,
            manage_stream: env.flag("MANAGE_STREAM", true),
            db_path: env.get("PLAYOUT_DB_PATH").filter(|s| !s.trim().is_empty()).map(PathBuf::from),
            status_bind,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    fn required(&self, key: &'static str) -> Result<String, SettingsError> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .ok_or(SettingsError::Missing(key))
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"),
            None => default,
        }
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, SettingsError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.optional_parse(key)?.unwrap_or(default))
    }

    fn optional_parse<T>(&self, key: &'static str) -> Result<Option<T>, SettingsError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key).filter(|v| !v.trim().is_empty()) {
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| SettingsError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
            None => Ok(None),
        }
    }

    fn seconds(&self, key: &'static str, default: f64) -> Result<Duration, SettingsError> {
        let secs: f64 = self.parse(key, default)?;
        if !secs.is_finite() || secs <= 0.0 {
            return Err(SettingsError::Invalid {
                key,
                value: secs.to_string(),
                reason: "must be a positive number of seconds".into(),
            });
        }
        Duration::try_from_secs_f64(secs).map_err(|e| SettingsError::Invalid {
            key,
            value: secs.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Parse `".mkv, mp4 .AVI"` into `["mkv", "mp4", "avi"]`. Falls back to
/// `mkv` when nothing usable is left.
pub fn parse_exts(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in raw.split(|c: char| c == ',' || c.is_whitespace()) {
        let ext = part.trim().trim_start_matches('.').to_ascii_lowercase();
        if ext.is_empty() || out.contains(&ext) {
            continue;
        }
        out.push(ext);
    }
    if out.is_empty() {
        out.push("mkv".into());
    }
    out
}
