//! Study session capture: visibility and attention tracking with time
//! accounting.
//!
//! Two independent axes drive the machine. Visibility flips between visible
//! and hidden on host signals; attention flips between active and idle on
//! qualifying input and the idle timer. Elapsed time always lands in exactly
//! one bucket: hidden, idle (visible) or active (visible).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use studysync_buffer::EventBuffer;
use studysync_core::{Deadline, EventKind, IdGenerator, Interval, NewEvent, SessionState};
use tracing::{debug, info, warn};

use crate::api::{
    CreateSessionRequest, SessionApi, SessionApiError, StudyMetrics, is_local_session_id,
};

const LOCAL_ID_STEM: &str = "local";

/// Study capture timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyConfig {
    /// Silence after which a visible session turns idle.
    pub idle_timeout_ms: u64,
    /// Period of heartbeat snapshots.
    pub heartbeat_interval_ms: u64,
    /// Period of the accounting ticker.
    pub tick_interval_ms: u64,
    /// Trailing debounce of scroll measurements.
    pub scroll_debounce_ms: u64,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 60_000,
            heartbeat_interval_ms: 30_000,
            tick_interval_ms: 1_000,
            scroll_debounce_ms: 500,
        }
    }
}

/// User input that counts as attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSignal {
    /// Pointer moved.
    PointerMove,
    /// Key pressed.
    KeyPress,
    /// Touch started.
    Touch,
    /// Pointer clicked.
    Click,
}

impl InputSignal {
    /// Wire name used in event payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PointerMove => "pointermove",
            Self::KeyPress => "keypress",
            Self::Touch => "touch",
            Self::Click => "click",
        }
    }
}

/// Page visibility as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Page is on screen.
    Visible,
    /// Page is hidden (background tab, minimized window).
    Hidden,
}

impl Visibility {
    fn is_visible(self) -> bool {
        self == Self::Visible
    }
}

/// Raw scroll geometry of the study content.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    /// Distance scrolled from the top.
    pub scroll_top: f64,
    /// Total content height.
    pub scroll_height: f64,
    /// Visible viewport height.
    pub client_height: f64,
}

impl ScrollMetrics {
    /// Scroll position as a percentage of the scrollable range.
    ///
    /// Content that fits the viewport reports 0.
    pub fn depth_percent(&self) -> u8 {
        let scrollable = self.scroll_height - self.client_height;
        if !scrollable.is_finite() || scrollable <= 0.0 || !self.scroll_top.is_finite() {
            return 0;
        }
        (self.scroll_top / scrollable * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

/// Lifecycle phase of a study capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudyPhase {
    /// No session.
    Stopped,
    /// Session creation in flight.
    Starting,
    /// Session running.
    Active,
}

/// Proof of a pending start, redeemed by [`StudyCapture::complete_start`].
#[derive(Debug, Clone)]
pub struct StartTicket {
    generation: u64,
    request: CreateSessionRequest,
}

impl StartTicket {
    /// Body for the create-session call.
    pub fn request(&self) -> &CreateSessionRequest {
        &self.request
    }
}

// Declaration order breaks ties between timers due at the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum StudyTimer {
    Scroll,
    Idle,
    Tick,
    Heartbeat,
}

/// Study session state machine owning its event buffer.
pub struct StudyCapture {
    config: StudyConfig,
    material_ref: String,
    buffer: EventBuffer,
    api: Arc<dyn SessionApi>,
    local_ids: IdGenerator,
    phase: StudyPhase,
    generation: u64,
    visible: bool,
    state: SessionState,
    accounted_at: u64,
    idle_since: Option<u64>,
    idle_timer: Deadline,
    scroll_timer: Deadline,
    ticker: Interval,
    heartbeat: Interval,
    pending_scroll: Option<ScrollMetrics>,
    scroll_events: u32,
    scroll_depth_sum: u64,
}

impl StudyCapture {
    /// Creates a stopped capture for one piece of study material.
    pub fn new(
        config: StudyConfig,
        material_ref: impl Into<String>,
        buffer: EventBuffer,
        api: Arc<dyn SessionApi>,
    ) -> Self {
        Self {
            config,
            material_ref: material_ref.into(),
            buffer,
            api,
            local_ids: IdGenerator::new(LOCAL_ID_STEM),
            phase: StudyPhase::Stopped,
            generation: 0,
            visible: true,
            state: SessionState::default(),
            accounted_at: 0,
            idle_since: None,
            idle_timer: Deadline::default(),
            scroll_timer: Deadline::default(),
            ticker: Interval::new(config.tick_interval_ms),
            heartbeat: Interval::new(config.heartbeat_interval_ms),
            pending_scroll: None,
            scroll_events: 0,
            scroll_depth_sum: 0,
        }
    }

    /// Starts a session, creating the server record synchronously.
    ///
    /// Returns `false` when a session is already running or starting.
    pub fn start(&mut self, now_ms: u64) -> bool {
        let Some(ticket) = self.begin_start(now_ms) else {
            return false;
        };
        let result = self.api.create_session(ticket.request());
        self.complete_start(ticket, result, now_ms)
    }

    /// First half of [`StudyCapture::start`]: claims the start.
    ///
    /// Returns `None` while a session is active or another start is pending.
    pub fn begin_start(&mut self, now_ms: u64) -> Option<StartTicket> {
        if self.phase != StudyPhase::Stopped {
            debug!(phase = ?self.phase, "study start ignored");
            return None;
        }
        self.phase = StudyPhase::Starting;
        self.generation += 1;
        Some(StartTicket {
            generation: self.generation,
            request: CreateSessionRequest {
                material_ref: self.material_ref.clone(),
                started_at: now_ms,
            },
        })
    }

    /// Second half of [`StudyCapture::start`]: activates the session with
    /// the server id, or a local fallback id when creation failed.
    ///
    /// Returns `false` for a ticket that no longer matches the pending start.
    pub fn complete_start(
        &mut self,
        ticket: StartTicket,
        result: Result<String, SessionApiError>,
        now_ms: u64,
    ) -> bool {
        if self.phase != StudyPhase::Starting || ticket.generation != self.generation {
            warn!(generation = ticket.generation, "ignoring stale study start");
            return false;
        }

        let session_id = match result {
            Ok(session_id) => session_id,
            Err(error) => {
                let local_id = self.local_ids.next_id(now_ms);
                warn!(%error, session_id = %local_id, "session creation failed, using local id");
                local_id
            }
        };
        let local = is_local_session_id(&session_id);

        self.state = SessionState::started(session_id, self.visible, now_ms);
        self.accounted_at = now_ms;
        self.idle_since = None;
        self.pending_scroll = None;
        self.scroll_events = 0;
        self.scroll_depth_sum = 0;
        self.ticker.start(now_ms);
        self.heartbeat.start(now_ms);
        if self.visible {
            self.idle_timer.arm(now_ms, self.config.idle_timeout_ms);
        }
        self.phase = StudyPhase::Active;

        let payload = json!({
            "materialRef": self.material_ref,
            "visible": self.visible,
            "localSession": local,
        });
        self.emit(EventKind::StudyStart, payload, now_ms);
        info!(session_id = %self.state.session_id, local, "study session started");
        true
    }

    /// Records qualifying input: ends an idle period and re-arms the idle
    /// timer.
    pub fn on_input(&mut self, signal: InputSignal, now_ms: u64) {
        if self.phase != StudyPhase::Active {
            return;
        }
        self.advance(now_ms);
        self.state.last_activity_at = now_ms;

        if self.state.is_idle {
            self.state.is_idle = false;
            let idle_period = self
                .idle_since
                .take()
                .map_or(0, |since| now_ms.saturating_sub(since));
            let payload = json!({
                "idleTime": self.state.total_idle_time,
                "idlePeriod": idle_period,
                "input": signal.as_str(),
            });
            self.emit(EventKind::StudyIdleEnd, payload, now_ms);
        }

        if self.state.is_visible {
            self.idle_timer.arm(now_ms, self.config.idle_timeout_ms);
        }
    }

    /// Applies a visibility flip. Before a session starts this only records
    /// the visibility the session will start with.
    pub fn on_visibility_change(&mut self, visibility: Visibility, now_ms: u64) {
        let visible = visibility.is_visible();
        if self.phase != StudyPhase::Active {
            self.visible = visible;
            return;
        }
        self.advance(now_ms);
        self.visible = visible;
        if self.state.is_visible == visible {
            return;
        }

        self.state.is_visible = visible;
        self.state.visibility_changes += 1;
        if !visible {
            self.idle_timer.cancel();
        } else if !self.state.is_idle {
            self.idle_timer.arm(now_ms, self.config.idle_timeout_ms);
        }

        let payload = json!({
            "visible": visible,
            "visibilityChanges": self.state.visibility_changes,
            "totalActiveTime": self.state.total_active_time,
            "totalHiddenTime": self.state.total_hidden_time,
        });
        self.emit(EventKind::StudyVisibilityChange, payload, now_ms);
    }

    /// Queues a scroll measurement behind the scroll debounce.
    pub fn on_scroll(&mut self, metrics: ScrollMetrics, now_ms: u64) {
        if self.phase != StudyPhase::Active {
            return;
        }
        self.advance(now_ms);
        self.pending_scroll = Some(metrics);
        self.scroll_timer.arm(now_ms, self.config.scroll_debounce_ms);
    }

    /// Fires due timers in chronological order, settles accounting up to
    /// `now_ms` and polls the buffer.
    pub fn poll(&mut self, now_ms: u64) {
        self.advance(now_ms);
        self.buffer.poll(now_ms);
    }

    /// Ends the session and returns its final metrics.
    ///
    /// Cancels every timer, emits the terminal event, updates the server
    /// record (skipped for local ids), force-flushes the buffer and resets
    /// the accumulators. Ending a pending start abandons it.
    pub fn end(&mut self, now_ms: u64) -> Option<StudyMetrics> {
        match self.phase {
            StudyPhase::Stopped => return None,
            StudyPhase::Starting => {
                self.abandon_start();
                return None;
            }
            StudyPhase::Active => {}
        }

        let metrics = self.finish(now_ms);
        let session_id = std::mem::take(&mut self.state.session_id);
        if is_local_session_id(&session_id) {
            debug!(%session_id, "local session, skipping server update");
        } else if let Err(error) = self.api.update_session(&session_id, &metrics) {
            warn!(%session_id, %error, "session update failed, falling back to best effort");
            self.api.update_session_best_effort(&session_id, &metrics);
        }

        self.buffer.force_flush(now_ms);
        self.reset();
        info!(%session_id, duration = metrics.duration, "study session ended");
        Some(metrics)
    }

    /// Ends a running session without waiting on the network, then hands the
    /// queue to the buffer's unload path. Returns `true` when a best-effort
    /// delivery was issued.
    pub fn on_page_unload(&mut self, now_ms: u64) -> bool {
        match self.phase {
            StudyPhase::Active => {
                let metrics = self.finish(now_ms);
                let session_id = std::mem::take(&mut self.state.session_id);
                if !is_local_session_id(&session_id) {
                    self.api.update_session_best_effort(&session_id, &metrics);
                }
                self.reset();
            }
            StudyPhase::Starting => self.abandon_start(),
            StudyPhase::Stopped => {}
        }
        self.buffer.on_page_unload(now_ms)
    }

    /// Current phase.
    pub fn phase(&self) -> StudyPhase {
        self.phase
    }

    /// Returns `true` while a session runs.
    pub fn is_active(&self) -> bool {
        self.phase == StudyPhase::Active
    }

    /// Id of the running session.
    pub fn session_id(&self) -> Option<&str> {
        (self.phase == StudyPhase::Active).then_some(self.state.session_id.as_str())
    }

    /// State as of the last settle point.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// State with elapsed time up to `now_ms` credited to the current bucket,
    /// without firing timers.
    pub fn state_at(&self, now_ms: u64) -> SessionState {
        let mut state = self.state.clone();
        if self.phase == StudyPhase::Active {
            credit(&mut state, now_ms.saturating_sub(self.accounted_at));
        }
        state
    }

    /// Earliest time at which [`StudyCapture::poll`] has work to do.
    pub fn next_deadline(&self) -> Option<u64> {
        [
            self.scroll_timer.at(),
            self.idle_timer.at(),
            self.ticker.next_at(),
            self.heartbeat.next_at(),
            self.buffer.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Timing configuration.
    pub fn config(&self) -> &StudyConfig {
        &self.config
    }

    /// Event buffer owned by this capture.
    pub fn buffer(&self) -> &EventBuffer {
        &self.buffer
    }

    /// Mutable access to the owned event buffer.
    pub fn buffer_mut(&mut self) -> &mut EventBuffer {
        &mut self.buffer
    }

    fn next_due(&self, now_ms: u64) -> Option<(u64, StudyTimer)> {
        [
            (self.scroll_timer.at(), StudyTimer::Scroll),
            (self.idle_timer.at(), StudyTimer::Idle),
            (self.ticker.next_at(), StudyTimer::Tick),
            (self.heartbeat.next_at(), StudyTimer::Heartbeat),
        ]
        .into_iter()
        .filter_map(|(at, timer)| at.filter(|at| *at <= now_ms).map(|at| (at, timer)))
        .min()
    }

    fn advance(&mut self, now_ms: u64) {
        if self.phase != StudyPhase::Active {
            return;
        }
        while let Some((at, timer)) = self.next_due(now_ms) {
            self.settle(at);
            match timer {
                StudyTimer::Scroll => {
                    self.scroll_timer.take_if_due(at);
                    self.record_scroll(at);
                }
                StudyTimer::Idle => {
                    self.idle_timer.take_if_due(at);
                    self.enter_idle(at);
                }
                StudyTimer::Tick => {
                    self.ticker.take_if_due(at);
                }
                StudyTimer::Heartbeat => {
                    self.heartbeat.take_if_due(at);
                    self.emit_heartbeat(at);
                }
            }
        }
        self.settle(now_ms);
    }

    fn settle(&mut self, at_ms: u64) {
        let at_ms = at_ms.max(self.accounted_at);
        credit(&mut self.state, at_ms - self.accounted_at);
        self.accounted_at = at_ms;
    }

    fn enter_idle(&mut self, at_ms: u64) {
        if !self.state.is_visible || self.state.is_idle {
            return;
        }
        self.state.is_idle = true;
        self.idle_since = Some(at_ms);
        let payload = json!({
            "idleTime": self.state.total_idle_time,
            "idleTimeout": self.config.idle_timeout_ms,
            "lastActivityAt": self.state.last_activity_at,
            "totalActiveTime": self.state.total_active_time,
        });
        self.emit(EventKind::StudyIdleStart, payload, at_ms);
    }

    fn record_scroll(&mut self, at_ms: u64) {
        let Some(metrics) = self.pending_scroll.take() else {
            return;
        };
        let depth = metrics.depth_percent();
        self.state.scroll_depth_current = depth;
        self.state.scroll_depth_max = self.state.scroll_depth_max.max(depth);
        self.scroll_events += 1;
        self.scroll_depth_sum += u64::from(depth);

        let payload = json!({
            "scrollDepth": depth,
            "maxScrollDepth": self.state.scroll_depth_max,
        });
        self.emit(EventKind::StudyScroll, payload, at_ms);
    }

    fn emit_heartbeat(&mut self, at_ms: u64) {
        if !self.state.is_visible || self.state.is_idle {
            return;
        }
        let payload = json!({
            "totalActiveTime": self.state.total_active_time,
            "totalIdleTime": self.state.total_idle_time,
            "totalHiddenTime": self.state.total_hidden_time,
            "scrollDepthMax": self.state.scroll_depth_max,
            "scrollDepthCurrent": self.state.scroll_depth_current,
        });
        self.emit(EventKind::StudyHeartbeat, payload, at_ms);
    }

    // Settles, stops every timer and emits the terminal event.
    fn finish(&mut self, now_ms: u64) -> StudyMetrics {
        self.advance(now_ms);
        if let Some(metrics) = self.pending_scroll.take() {
            let depth = metrics.depth_percent();
            self.state.scroll_depth_current = depth;
            self.state.scroll_depth_max = self.state.scroll_depth_max.max(depth);
        }
        self.idle_timer.cancel();
        self.scroll_timer.cancel();
        self.ticker.stop();
        self.heartbeat.stop();

        let avg_scroll_depth = if self.scroll_events == 0 {
            0
        } else {
            (self.scroll_depth_sum / u64::from(self.scroll_events)) as u8
        };
        let metrics = StudyMetrics {
            total_active_time: self.state.total_active_time,
            total_idle_time: self.state.total_idle_time,
            total_hidden_time: self.state.total_hidden_time,
            max_scroll_depth: self.state.scroll_depth_max,
            avg_scroll_depth,
            scroll_events: self.scroll_events,
            visibility_changes: self.state.visibility_changes,
            duration: now_ms.saturating_sub(self.state.started_at),
        };

        match NewEvent::with_payload(EventKind::StudyEnd, self.state.session_id.clone(), &metrics)
        {
            Ok(event) => {
                self.buffer.push(event, now_ms);
            }
            Err(error) => warn!(%error, "failed to encode study end metrics"),
        }
        self.state.is_active = false;
        self.phase = StudyPhase::Stopped;
        metrics
    }

    fn abandon_start(&mut self) {
        self.phase = StudyPhase::Stopped;
        self.generation += 1;
        debug!("pending study start abandoned");
    }

    fn reset(&mut self) {
        self.state = SessionState::default();
        self.idle_since = None;
        self.pending_scroll = None;
        self.scroll_events = 0;
        self.scroll_depth_sum = 0;
    }

    fn emit(&mut self, kind: EventKind, payload: serde_json::Value, at_ms: u64) {
        let event = NewEvent::new(kind, self.state.session_id.clone(), payload);
        self.buffer.push(event, at_ms);
    }
}

fn credit(state: &mut SessionState, delta_ms: u64) {
    if !state.is_visible {
        state.total_hidden_time += delta_ms;
    } else if state.is_idle {
        state.total_idle_time += delta_ms;
    } else {
        state.total_active_time += delta_ms;
    }
}
