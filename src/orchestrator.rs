//! Playout state machine.
//!
//! One task drives everything: it asks the catalog for the next file, loads
//! it into the engine, polls playback on a fixed interval, keeps the overlay
//! in sync, and advances or reconnects as needed. Polling and overlay
//! updates happen inline, so "advance" and "update the overlay for the item
//! that just ended" can never race.
//!
//! ```text
//!   IDLE -> LOADING -> PLAYING -> ADVANCING -> IDLE ...
//!     \                  |
//!      -> DRAINED        -> RECONNECTING -> IDLE | STOPPED
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::catalog::{Catalog, MediaItem, Next};
use crate::engine::{connect_with_retry, ConnectOutcome, EngineControl, EngineError};
use crate::session::PlaybackSession;
use crate::settings::Settings;
use crate::shutdown::Shutdown;
use crate::status::{NowPlaying, SharedStatus};
use crate::store::ResumeStore;

/// Item-level poll failures tolerated before the item is abandoned.
const MAX_POLL_ERRORS: u32 = 3;
/// How often the drained state repeats its log line.
const DRAINED_LOG_EVERY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Loading,
    Playing,
    Advancing,
    Reconnecting,
    Drained,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The control channel could not be re-established.
    ReconnectExhausted,
    /// Consecutive load failures: track indices, source names or the library
    /// itself are wrong.
    Misconfigured,
}

/// How the playout loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Shutdown,
    Stopped(StopReason),
}

impl Exit {
    pub const MISCONFIGURED_CODE: i32 = 2;
    pub const RECONNECT_EXHAUSTED_CODE: i32 = 3;

    pub fn code(self) -> i32 {
        match self {
            Exit::Shutdown => 0,
            Exit::Stopped(StopReason::Misconfigured) => Self::MISCONFIGURED_CODE,
            Exit::Stopped(StopReason::ReconnectExhausted) => Self::RECONNECT_EXHAUSTED_CODE,
        }
    }
}

#[derive(Debug)]
enum State {
    Idle,
    Loading { index: usize, item: MediaItem },
    Playing(PlaybackSession),
    Advancing(PlaybackSession),
    Reconnecting,
    Drained,
    Stopped(StopReason),
}

impl State {
    fn phase(&self) -> Phase {
        match self {
            State::Idle => Phase::Idle,
            State::Loading { .. } => Phase::Loading,
            State::Playing(_) => Phase::Playing,
            State::Advancing(_) => Phase::Advancing,
            State::Reconnecting => Phase::Reconnecting,
            State::Drained => Phase::Drained,
            State::Stopped(_) => Phase::Stopped,
        }
    }
}

/// Distinct items that failed in a row without anything playing in between.
#[derive(Debug, Default)]
struct FailureStreak {
    paths: Vec<PathBuf>,
}

impl FailureStreak {
    fn record(&mut self, item: &MediaItem) -> usize {
        if !self.paths.contains(&item.path) {
            self.paths.push(item.path.clone());
        }
        self.paths.len()
    }

    fn clear(&mut self) {
        self.paths.clear();
    }

    fn len(&self) -> usize {
        self.paths.len()
    }
}

enum OverlayPush {
    Done,
    ConnectionLost,
    Interrupted,
}

pub struct Orchestrator<E: EngineControl> {
    engine: E,
    catalog: Catalog,
    settings: Settings,
    shutdown: Shutdown,
    state: State,
    /// Catalog index of the last item handed to LOADING and consumed.
    cursor: Option<usize>,
    failures: FailureStreak,
    reconnects: u32,
    connected_once: bool,
    drained_logged_at: Option<Instant>,
    status: Option<SharedStatus>,
    store: Option<ResumeStore>,
}

impl<E: EngineControl> Orchestrator<E> {
    /// The loop starts disconnected; the first step connects.
    pub fn new(engine: E, catalog: Catalog, settings: Settings, shutdown: Shutdown) -> Self {
        Self {
            engine,
            catalog,
            settings,
            shutdown,
            state: State::Reconnecting,
            cursor: None,
            failures: FailureStreak::default(),
            reconnects: 0,
            connected_once: false,
            drained_logged_at: None,
            status: None,
            store: None,
        }
    }

    pub fn with_status(mut self, status: SharedStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_store(mut self, store: ResumeStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Begin playback at catalog `index` instead of the first item.
    pub fn start_at(mut self, index: usize) -> Self {
        self.cursor = index.checked_sub(1);
        self
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The item currently loading or playing, if any.
    pub fn current_item(&self) -> Option<&MediaItem> {
        match &self.state {
            State::Loading { item, .. } => Some(item),
            State::Playing(s) | State::Advancing(s) => Some(&s.item),
            _ => None,
        }
    }

    pub fn consecutive_failures(&self) -> usize {
        self.failures.len()
    }

    /// Drive the state machine until shutdown or a fatal stop, then release
    /// the control channel.
    pub async fn run(mut self) -> Exit {
        let exit = loop {
            if let Some(exit) = self.step().await {
                break exit;
            }
        };
        self.release().await;
        exit
    }

    /// Perform one transition. Returns `Some` once the loop must end.
    pub async fn step(&mut self) -> Option<Exit> {
        if self.shutdown.is_triggered() {
            return Some(Exit::Shutdown);
        }

        let prev = self.state.phase();
        let state = std::mem::replace(&mut self.state, State::Idle);
        let next = match state {
            State::Idle => Some(self.on_idle()),
            State::Loading { index, item } => self.on_loading(index, item).await,
            State::Playing(session) => self.on_playing(session).await,
            State::Advancing(session) => Some(self.on_advancing(session)),
            State::Reconnecting => self.on_reconnecting().await,
            State::Drained => self.on_drained().await,
            State::Stopped(reason) => Some(State::Stopped(reason)),
        };

        let Some(next) = next else {
            return Some(Exit::Shutdown);
        };
        if next.phase() != prev {
            debug!("phase {:?} -> {:?}", prev, next.phase());
        }
        self.state = next;
        self.publish().await;

        match self.state {
            State::Stopped(reason) => Some(Exit::Stopped(reason)),
            _ => None,
        }
    }

    fn on_idle(&mut self) -> State {
        let picked = match self.catalog.next(self.cursor, self.settings.loop_playlist) {
            Next::Item { index, item, wrapped } => Some((index, item.clone(), wrapped)),
            Next::EndOfCatalog => None,
        };

        let Some((index, item, wrapped)) = picked else {
            info!("catalog exhausted; nothing left to play");
            self.drained_logged_at = Some(Instant::now());
            return State::Drained;
        };

        if !wrapped {
            return State::Loading { index, item };
        }

        // Starting over: pick up files added since the last scan.
        match self.catalog.rescan() {
            Ok(n) => info!("playlist wrapped; rescanned {} ({n} files)", self.catalog.root().display()),
            Err(e) => {
                warn!("rescan failed, keeping previous playlist: {e}");
                return State::Loading { index, item };
            }
        }
        match self.catalog.next(None, true) {
            Next::Item { index, item, .. } => State::Loading {
                index,
                item: item.clone(),
            },
            Next::EndOfCatalog => {
                info!("library is empty after rescan; nothing left to play");
                self.drained_logged_at = Some(Instant::now());
                State::Drained
            }
        }
    }

    async fn on_loading(&mut self, index: usize, item: MediaItem) -> Option<State> {
        if !item.path.is_file() {
            self.cursor = Some(index);
            return Some(self.item_failed(&item, "file is missing", State::Idle));
        }

        info!("loading {} ({})", item.title, item.path.display());
        let res = self
            .shutdown
            .guard(self.engine.set_media_file(
                &self.settings.media_source,
                &item.path,
                self.settings.tracks,
            ))
            .await?;

        match res {
            Ok(()) => {
                self.cursor = Some(index);
                let mut session = PlaybackSession::new(item, index);
                match self.push_overlay(&mut session).await {
                    OverlayPush::Done => Some(State::Playing(session)),
                    OverlayPush::ConnectionLost => Some(State::Reconnecting),
                    OverlayPush::Interrupted => None,
                }
            }
            Err(e) if e.is_connection_fault() => {
                // The item never started; leave the cursor so it is retried.
                warn!("lost engine while loading {}: {e}", item.title);
                Some(State::Reconnecting)
            }
            Err(e) => {
                self.cursor = Some(index);
                Some(self.item_failed(&item, &e.to_string(), State::Idle))
            }
        }
    }

    async fn on_playing(&mut self, mut session: PlaybackSession) -> Option<State> {
        if !self.shutdown.sleep(self.settings.poll_interval).await {
            return None;
        }

        let res = self
            .shutdown
            .guard(self.engine.playback_state(&self.settings.media_source))
            .await?;

        let state = match res {
            Ok(state) => state,
            Err(e) if e.is_connection_fault() => {
                warn!("lost engine while playing {}: {e}", session.item.title);
                return Some(State::Reconnecting);
            }
            Err(e) => {
                session.consecutive_errors += 1;
                warn!(
                    "status poll for {} failed ({}/{MAX_POLL_ERRORS}): {e}",
                    session.item.title, session.consecutive_errors
                );
                if session.consecutive_errors >= MAX_POLL_ERRORS {
                    let item = session.item.clone();
                    return Some(self.item_failed(&item, &e.to_string(), State::Advancing(session)));
                }
                return Some(State::Playing(session));
            }
        };

        if session.apply(&state) {
            info!("playout start: {} ({})", session.item.title, session.item.path.display());
            self.failures.clear();
            self.remember(&session).await;
        }
        debug!(
            "{} {:?} {:?}/{:?}",
            session.item.title, state.media, state.elapsed, state.duration
        );

        match self.push_overlay(&mut session).await {
            OverlayPush::Done => {}
            OverlayPush::ConnectionLost => return Some(State::Reconnecting),
            OverlayPush::Interrupted => return None,
        }

        if state.errored() {
            let item = session.item.clone();
            return Some(self.item_failed(&item, "engine reported a playback error", State::Advancing(session)));
        }
        if session.at_end {
            info!("playout end: {}", session.item.title);
            return Some(State::Advancing(session));
        }
        if !session.seen_running && session.age() >= self.settings.start_timeout {
            let item = session.item.clone();
            let reason = format!("did not start within {:?}", self.settings.start_timeout);
            return Some(self.item_failed(&item, &reason, State::Advancing(session)));
        }
        Some(State::Playing(session))
    }

    fn on_advancing(&mut self, session: PlaybackSession) -> State {
        debug!(
            "releasing session {} for {} after {:?}",
            session.id,
            session.item.title,
            session.age()
        );
        drop(session);
        State::Idle
    }

    async fn on_reconnecting(&mut self) -> Option<State> {
        if self.connected_once {
            self.reconnects += 1;
            warn!("reconnecting to engine (reconnect #{})", self.reconnects);
        } else {
            info!("connecting to engine at {}", self.settings.endpoint.url());
        }

        let outcome = connect_with_retry(
            &mut self.engine,
            &self.settings.endpoint,
            &self.settings.connect,
            &mut self.shutdown,
        )
        .await;

        match outcome {
            ConnectOutcome::Connected { .. } => {
                self.connected_once = true;
                if self.settings.manage_stream {
                    match self.shutdown.guard(self.engine.ensure_output()).await? {
                        Ok(()) => {}
                        Err(e) if e.is_connection_fault() => {
                            warn!("lost engine while starting stream output: {e}");
                            return Some(State::Reconnecting);
                        }
                        Err(e) => warn!("could not start stream output: {e}"),
                    }
                }
                Some(State::Idle)
            }
            ConnectOutcome::Exhausted(e) => {
                error!(
                    "giving up on engine after {} attempts: {e}",
                    self.settings.connect.attempts
                );
                Some(State::Stopped(StopReason::ReconnectExhausted))
            }
            ConnectOutcome::Interrupted => None,
        }
    }

    async fn on_drained(&mut self) -> Option<State> {
        if !self.shutdown.sleep(self.settings.poll_interval).await {
            return None;
        }
        let due = self
            .drained_logged_at
            .map_or(true, |at| at.elapsed() >= DRAINED_LOG_EVERY);
        if !due {
            return Some(State::Drained);
        }
        self.drained_logged_at = Some(Instant::now());

        if !self.settings.loop_playlist {
            info!("drained: playlist finished and looping is off; idling");
            return Some(State::Drained);
        }

        // A looping playout only drains on an empty library; look again.
        match self.catalog.rescan() {
            Ok(0) => info!("drained: no playable files under {}", self.catalog.root().display()),
            Ok(n) => {
                info!("found {n} files under {}; resuming playout", self.catalog.root().display());
                self.cursor = None;
                return Some(State::Idle);
            }
            Err(e) => warn!("drained: rescan failed: {e}"),
        }
        Some(State::Drained)
    }

    /// Count a per-item failure and decide where to go next.
    fn item_failed(&mut self, item: &MediaItem, reason: &str, continue_with: State) -> State {
        let streak = self.failures.record(item);
        warn!("skipping {} ({}): {reason}", item.title, item.path.display());

        let limit = (self.settings.max_load_failures as usize).min(self.catalog.len().max(1));
        if streak >= limit {
            error!(
                "{streak} different items failed in a row without any playback; \
                 check track indices, source names and the library"
            );
            return State::Stopped(StopReason::Misconfigured);
        }
        continue_with
    }

    async fn push_overlay(&mut self, session: &mut PlaybackSession) -> OverlayPush {
        let Some(text) = session.pending_overlay() else {
            return OverlayPush::Done;
        };
        let res = self
            .shutdown
            .guard(self.engine.set_text(&self.settings.text_source, &text))
            .await;
        match res {
            None => OverlayPush::Interrupted,
            Some(Ok(())) => {
                session.overlay_sent(text);
                OverlayPush::Done
            }
            Some(Err(e)) if e.is_connection_fault() => {
                warn!("lost engine while updating overlay: {e}");
                OverlayPush::ConnectionLost
            }
            Some(Err(EngineError::SourceNotFound(name))) => {
                warn!("text source {name:?} is gone; overlay disabled until the next item");
                session.disable_overlay();
                OverlayPush::Done
            }
            Some(Err(e)) => {
                warn!("overlay update rejected, disabled until the next item: {e}");
                session.disable_overlay();
                OverlayPush::Done
            }
        }
    }

    async fn remember(&self, session: &PlaybackSession) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save_last(&session.item.path).await {
            warn!("failed to persist resume point: {e}");
        }
    }

    async fn publish(&self) {
        let Some(status) = &self.status else {
            return;
        };
        let now = match &self.state {
            State::Playing(s) | State::Advancing(s) => Some(NowPlaying::from(s)),
            _ => None,
        };
        let mut snap = status.write().await;
        snap.phase = self.state.phase();
        snap.now = now;
        snap.catalog_size = self.catalog.len();
        snap.consecutive_failures = self.failures.len();
        snap.reconnects = self.reconnects;
    }

    /// Stop the stream (if we manage it) and close the control channel.
    async fn release(&mut self) {
        if self.settings.manage_stream && self.connected_once {
            let grace = stop_grace(self.settings.request_timeout);
            match tokio::time::timeout(grace, self.engine.stop_output()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("stream output not stopped: {e}"),
                Err(_) => debug!("stream output stop timed out"),
            }
        }
        self.engine.disconnect().await;
        info!("engine connection released");
    }
}

/// Time allowed for stopping the stream output on exit: two request
/// round-trips (status, then stop).
fn stop_grace(request_timeout: Duration) -> Duration {
    request_timeout.checked_mul(2).unwrap_or(Duration::MAX)
}
