//! The view-owned replay handle: one narration timeline, one playback
//! clock and one camera follow controller behind a single lock.
//!
//! Every mutation (stream handler, timer tick, user command) takes the lock,
//! runs to completion and publishes a fresh [`PlaybackFrame`], so renderers
//! never observe an index that disagrees with its moment or camera target.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::Weak;
use std::time::Duration;

use replaycast_async_utils::CancelErr;
use replaycast_async_utils::OrCancelExt;
use replaycast_protocol::FinalState;
use replaycast_protocol::Moment;
use replaycast_protocol::NarrationRequest;
use replaycast_protocol::RosterEntry;
use replaycast_protocol::RoundContext;
use replaycast_protocol::SimulationEvent;
use replaycast_protocol::Snapshot;
use replaycast_protocol::StreamEvent;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::camera::CameraFollow;
use crate::camera::CameraTarget;
use crate::chat::ChatSession;
use crate::chat::MessageId;
use crate::clock::PlaybackClock;
use crate::clock::PlaybackState;
use crate::clock::TickOutcome;
use crate::clock::TimerSlot;
use crate::clock::spawn_ticker;
use crate::config::EngineConfig;
use crate::context::ChatContextBundle;
use crate::error::ReplayError;
use crate::error::Result;
use crate::error::StateError;
use crate::event_stream::EventSink;
use crate::event_stream::read_events;
use crate::names::NameCache;
use crate::names::NameResolver;
use crate::timeline::NarrationStatus;
use crate::timeline::Timeline;
use crate::transport::EventTransport;

/// Everything a renderer needs for the current position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackFrame {
    pub active_index: usize,
    pub snapshot: Option<Snapshot>,
    pub moment: Option<Moment>,
    /// Moment narration with player ids replaced by display names.
    pub narration: Option<String>,
    pub camera_target: Option<CameraTarget>,
    pub focus_version: u64,
    pub playback_state: PlaybackState,
    pub narration_status: NarrationStatus,
    pub narration_error: Option<String>,
    pub moment_count: usize,
}

#[derive(Debug)]
struct NarrationBuild {
    generation: u64,
    cancel: CancellationToken,
}

struct SessionState {
    timeline: Timeline,
    clock: PlaybackClock,
    camera: CameraFollow,
    round: RoundContext,
    final_state: FinalState,
    events: Arc<[SimulationEvent]>,
    build: Option<NarrationBuild>,
    build_generation: u64,
    destroyed: bool,
}

impl SessionState {
    fn owns_build(&self, generation: u64) -> bool {
        !self.destroyed
            && self
                .build
                .as_ref()
                .is_some_and(|b| b.generation == generation)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.destroyed {
            tracing::warn!("command on destroyed replay session");
            return Err(StateError::Destroyed.into());
        }
        Ok(())
    }

    fn ensure_snapshots(&self) -> Result<()> {
        if self.timeline.is_empty() {
            tracing::warn!("replay session has no snapshots");
            return Err(StateError::NoSnapshots.into());
        }
        Ok(())
    }
}

fn frame_of(state: &SessionState, resolver: &NameResolver) -> PlaybackFrame {
    let index = state.clock.index();
    let moment = state.timeline.moment_at(index).cloned();
    PlaybackFrame {
        active_index: index,
        snapshot: state.timeline.snapshot_at(index).cloned(),
        narration: moment.as_ref().map(|m| resolver.resolve(&m.narration)),
        moment,
        camera_target: state.camera.target(),
        focus_version: state.camera.focus_version(),
        playback_state: state.clock.state(),
        narration_status: state.timeline.status(),
        narration_error: state.timeline.error().map(str::to_string),
        moment_count: state.timeline.moment_count(),
    }
}

struct SessionInner {
    state: Mutex<SessionState>,
    frames: watch::Sender<PlaybackFrame>,
    transport: Arc<dyn EventTransport>,
    config: Arc<EngineConfig>,
    resolver: NameResolver,
    roster: Vec<RosterEntry>,
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-derive the camera for the active index and publish. Called with
    /// the state lock held.
    fn publish(&self, state: &mut SessionState) {
        let index = state.clock.index();
        state.camera.follow(index, state.timeline.moment_at(index));
        self.frames.send_replace(frame_of(state, &self.resolver));
    }

    /// The timer only holds a weak reference; a dropped session ends it.
    fn arm(self: &Arc<Self>, slot: TimerSlot) {
        let weak: Weak<SessionInner> = Arc::downgrade(self);
        spawn_ticker(slot, move |generation| {
            let Some(inner) = weak.upgrade() else {
                return TickOutcome::Stale;
            };
            let mut state = inner.lock();
            if state.destroyed {
                return TickOutcome::Stale;
            }
            let outcome = state.clock.tick(generation);
            if outcome != TickOutcome::Stale {
                inner.publish(&mut state);
            }
            outcome
        });
    }

    fn play_locked(self: &Arc<Self>, state: &mut SessionState) -> bool {
        match state.clock.play() {
            Some(slot) => {
                self.arm(slot);
                true
            }
            None => false,
        }
    }

    fn tick_interval(&self, state: &SessionState) -> Duration {
        if state.timeline.has_narration() {
            self.config.narration_tick()
        } else {
            self.config.scrub_tick()
        }
    }

    /// Leave loading: pick the tick rate for what the timeline holds and
    /// optionally start playing.
    fn settle(self: &Arc<Self>, state: &mut SessionState, play: bool) {
        state.clock.mark_ready();
        let interval = self.tick_interval(state);
        if let Some(slot) = state.clock.set_interval(interval) {
            self.arm(slot);
        }
        if play {
            self.play_locked(state);
        }
    }

    fn apply_moment(&self, generation: u64, moment: Moment) {
        let mut state = self.lock();
        if !state.owns_build(generation) {
            return;
        }
        if state.timeline.push_moment(moment) {
            self.publish(&mut state);
        }
    }

    /// `done` arrived: reconcile and hand over to the clock.
    fn finish_narration(self: &Arc<Self>, generation: u64) {
        let mut state = self.lock();
        if !state.owns_build(generation) {
            return;
        }
        state.build = None;
        if let Some(report) = state.timeline.complete() {
            tracing::info!(
                moments = report.received,
                snapshots = report.snapshots,
                padded = report.padded,
                truncated = report.truncated,
                "narration complete"
            );
        }
        self.settle(&mut state, self.config.auto_play);
        self.publish(&mut state);
    }

    /// Partial moments stay visible and the replay stays playable.
    fn fail_narration(self: &Arc<Self>, generation: u64, error: &ReplayError) {
        let mut state = self.lock();
        if !state.owns_build(generation) {
            return;
        }
        state.build = None;
        tracing::warn!(
            error = %error,
            moments = state.timeline.moment_count(),
            "narration failed, falling back to snapshot playback"
        );
        state.timeline.fail(error.user_message());
        self.settle(&mut state, false);
        self.publish(&mut state);
    }
}

/// View-owned replay handle. Dropping it cancels the narration stream and
/// the playback timer.
pub struct ReplaySession {
    inner: Arc<SessionInner>,
}

impl ReplaySession {
    /// Created `idle`. `names` should already have absorbed `snapshots`;
    /// the resolver and roster are frozen here.
    pub fn new(
        snapshots: impl Into<Arc<[Snapshot]>>,
        names: &NameCache,
        transport: Arc<dyn EventTransport>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let snapshots: Arc<[Snapshot]> = snapshots.into();
        let state = SessionState {
            clock: PlaybackClock::new(snapshots.len(), config.narration_tick()),
            timeline: Timeline::new(snapshots),
            camera: CameraFollow::new(),
            round: RoundContext::default(),
            final_state: FinalState::default(),
            events: Arc::from(Vec::new()),
            build: None,
            build_generation: 0,
            destroyed: false,
        };
        let resolver = names.resolver();
        let (frames, _) = watch::channel(frame_of(&state, &resolver));

        Self {
            inner: Arc::new(SessionInner {
                state: Mutex::new(state),
                frames,
                transport,
                config,
                resolver,
                roster: names.roster(),
            }),
        }
    }

    /// Simulation events used for the chat context excerpt.
    pub fn set_events(&self, events: impl Into<Arc<[SimulationEvent]>>) {
        self.inner.lock().events = events.into();
    }

    /// Open the narration stream. Moments are published as they arrive;
    /// `done` reconciles them against the snapshots and starts playback.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(&self, final_state: FinalState, round: RoundContext) -> Result<()> {
        let mut state = self.inner.lock();
        state.ensure_live()?;
        state.ensure_snapshots()?;
        if let Err(e) = state.timeline.begin_loading() {
            tracing::warn!("narration build requested while another is loading");
            return Err(e.into());
        }

        let body = {
            let request = NarrationRequest::new(
                state.timeline.snapshots(),
                &final_state,
                &round,
                &self.inner.roster,
            );
            serde_json::to_value(&request)?
        };

        state.build_generation += 1;
        let generation = state.build_generation;
        let cancel = CancellationToken::new();
        state.build = Some(NarrationBuild {
            generation,
            cancel: cancel.clone(),
        });
        state.round = round;
        state.final_state = final_state;
        state.camera.reset();
        state.clock.mark_loading();
        self.inner.publish(&mut state);
        drop(state);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_narration_stream(inner, generation, body, cancel).await;
        });
        Ok(())
    }

    /// Snapshot-only playback for views that never request narration.
    pub fn start_without_narration(&self) -> Result<()> {
        let mut state = self.inner.lock();
        state.ensure_live()?;
        state.ensure_snapshots()?;
        if state.timeline.status() == NarrationStatus::Loading {
            return Err(StateError::BuildInProgress.into());
        }
        self.inner.settle(&mut state, self.inner.config.auto_play);
        self.inner.publish(&mut state);
        Ok(())
    }

    /// Returns `true` if a timer was started.
    pub fn play(&self) -> Result<bool> {
        let mut state = self.inner.lock();
        state.ensure_live()?;
        let started = self.inner.play_locked(&mut state);
        self.inner.publish(&mut state);
        Ok(started)
    }

    pub fn pause(&self) -> Result<()> {
        let mut state = self.inner.lock();
        state.ensure_live()?;
        state.clock.pause();
        self.inner.publish(&mut state);
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let mut state = self.inner.lock();
        state.ensure_live()?;
        state.clock.stop();
        self.inner.publish(&mut state);
        Ok(())
    }

    /// Clamped; returns the index actually applied.
    pub fn seek(&self, index: usize) -> Result<usize> {
        let mut state = self.inner.lock();
        state.ensure_live()?;
        let applied = state.clock.seek(index);
        self.inner.publish(&mut state);
        Ok(applied)
    }

    pub fn frame(&self) -> PlaybackFrame {
        self.inner.frames.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackFrame> {
        self.inner.frames.subscribe()
    }

    /// A copy of the current moment list.
    pub fn moments(&self) -> Vec<Moment> {
        self.inner.lock().timeline.moments()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.inner.lock().clock.state()
    }

    pub fn active_index(&self) -> usize {
        self.inner.lock().clock.index()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().destroyed
    }

    /// Context bundle for the chat controller, positioned at the active
    /// index.
    pub fn chat_context(&self) -> ChatContextBundle {
        let state = self.inner.lock();
        let index = state.clock.index();
        let narration = state
            .timeline
            .moment_at(index)
            .map(|m| self.inner.resolver.resolve(&m.narration));
        ChatContextBundle::new(state.round.clone())
            .with_snapshots(Arc::clone(state.timeline.snapshots()))
            .with_events(Arc::clone(&state.events))
            .with_final_state(state.final_state.clone())
            .with_roster(self.inner.roster.clone())
            .with_current(index, narration)
    }

    /// Pause playback, then ask `question` in `chat` with this session's
    /// context.
    pub fn ask_what_if(&self, question: &str, chat: &ChatSession) -> Result<MessageId> {
        self.pause()?;
        chat.send(question, &self.chat_context())
    }

    /// Cancel the narration stream and the timer. Every later command
    /// fails with [`StateError::Destroyed`].
    pub fn destroy(&self) {
        let mut state = self.inner.lock();
        if state.destroyed {
            return;
        }
        state.destroyed = true;
        if let Some(build) = state.build.take() {
            build.cancel.cancel();
        }
        state.clock.shutdown();
        tracing::debug!("replay session destroyed");
    }
}

impl Drop for ReplaySession {
    fn drop(&mut self) {
        self.destroy();
    }
}

async fn run_narration_stream(
    inner: Arc<SessionInner>,
    generation: u64,
    body: serde_json::Value,
    cancel: CancellationToken,
) {
    let idle_timeout = inner.config.stream_idle_timeout();
    let opened = inner
        .transport
        .open(&inner.config.narration_url, body)
        .or_cancel_within(&cancel, idle_timeout)
        .await;

    let stream = match opened {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            inner.fail_narration(generation, &e);
            return;
        }
        Err(CancelErr::Cancelled) => return,
        Err(CancelErr::DeadlineElapsed(limit)) => {
            inner.fail_narration(generation, &ReplayError::Timeout(limit));
            return;
        }
    };

    let mut sink = NarrationSink {
        inner: Arc::clone(&inner),
        generation,
        closed: false,
    };
    let outcome = read_events(stream, &mut sink, &cancel, idle_timeout).await;
    tracing::debug!(?outcome, generation, "narration stream closed");
}

struct NarrationSink {
    inner: Arc<SessionInner>,
    generation: u64,
    /// Set once `done` or `error` was handled; later events are ignored.
    closed: bool,
}

impl EventSink for NarrationSink {
    fn on_event(&mut self, event: StreamEvent) {
        if self.closed {
            return;
        }
        self.closed = event.is_terminal();
        match event {
            StreamEvent::Moment(moment) => self.inner.apply_moment(self.generation, moment),
            StreamEvent::Done { .. } => self.inner.finish_narration(self.generation),
            StreamEvent::Error { message } => {
                self.inner
                    .fail_narration(self.generation, &ReplayError::protocol(message));
            }
            other => {
                tracing::debug!(kind = other.kind(), "ignoring non-narration event");
            }
        }
    }

    fn on_complete(&mut self) {
        if !self.closed {
            tracing::warn!("narration stream ended without done, reconciling what arrived");
            self.closed = true;
            self.inner.finish_narration(self.generation);
        }
    }

    fn on_error(&mut self, error: ReplayError) {
        if !self.closed {
            self.closed = true;
            self.inner.fail_narration(self.generation, &error);
        }
    }
}
