//! Playback clock: one active index advanced by a single repeating timer.
//!
//! [`PlaybackClock`] is a plain state machine; it never spawns anything
//! itself. `play()` hands back a [`TimerSlot`] that the owner arms with
//! [`spawn_ticker`], and every tick is routed back through
//! [`PlaybackClock::tick`] with the slot's generation so a tick from a
//! cancelled timer can never move the index.

use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Done,
}

/// The one live timer of a clock.
#[derive(Debug, Clone)]
pub struct TimerSlot {
    pub generation: u64,
    pub interval: Duration,
    pub token: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Advanced(usize),
    /// The final index was reached; the timer is gone.
    Finished(usize),
    /// The tick belongs to a timer that was already cancelled.
    Stale,
}

#[derive(Debug)]
pub struct PlaybackClock {
    len: usize,
    index: usize,
    state: PlaybackState,
    interval: Duration,
    timer: Option<TimerSlot>,
    generation: u64,
}

impl PlaybackClock {
    pub fn new(len: usize, interval: Duration) -> Self {
        Self {
            len,
            index: 0,
            state: PlaybackState::Idle,
            interval,
            timer: None,
            generation: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    fn last_index(&self) -> usize {
        self.len.saturating_sub(1)
    }

    pub fn mark_loading(&mut self) {
        self.cancel_timer();
        self.state = PlaybackState::Loading;
    }

    pub fn mark_ready(&mut self) {
        self.cancel_timer();
        self.state = PlaybackState::Ready;
    }

    /// Returns the slot to arm, or `None` when nothing should start:
    /// already playing, at the last index, or still idle/loading.
    pub fn play(&mut self) -> Option<TimerSlot> {
        if self.timer.is_some() {
            return None;
        }
        if matches!(self.state, PlaybackState::Idle | PlaybackState::Loading) {
            tracing::debug!(state = ?self.state, "play ignored before timeline is ready");
            return None;
        }
        if self.len == 0 || self.index >= self.last_index() {
            return None;
        }

        self.generation += 1;
        let slot = TimerSlot {
            generation: self.generation,
            interval: self.interval,
            token: CancellationToken::new(),
        };
        self.timer = Some(slot.clone());
        self.state = PlaybackState::Playing;
        Some(slot)
    }

    /// Cancels the timer and leaves the index unchanged.
    pub fn pause(&mut self) -> bool {
        let was_running = self.cancel_timer();
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
        was_running
    }

    /// Back to the first index, not playing.
    pub fn stop(&mut self) {
        self.cancel_timer();
        self.index = 0;
        if !matches!(self.state, PlaybackState::Idle | PlaybackState::Loading) {
            self.state = PlaybackState::Ready;
        }
    }

    /// Clamp and jump. Never starts the timer; landing on the last index
    /// while playing finishes playback the same way the final tick does.
    pub fn seek(&mut self, index: usize) -> usize {
        self.index = index.min(self.last_index());
        if self.index >= self.last_index() && self.cancel_timer() {
            self.state = PlaybackState::Done;
        } else if self.state == PlaybackState::Done && self.index < self.last_index() {
            self.state = PlaybackState::Paused;
        }
        self.index
    }

    pub fn tick(&mut self, generation: u64) -> TickOutcome {
        match &self.timer {
            Some(slot) if slot.generation == generation => {}
            _ => return TickOutcome::Stale,
        }

        if self.index < self.last_index() {
            self.index += 1;
        }
        if self.index >= self.last_index() {
            self.cancel_timer();
            self.state = PlaybackState::Done;
            return TickOutcome::Finished(self.index);
        }
        TickOutcome::Advanced(self.index)
    }

    /// Changes the tick rate. A running timer is replaced by one at the new
    /// rate, returned for arming.
    pub fn set_interval(&mut self, interval: Duration) -> Option<TimerSlot> {
        if self.interval == interval {
            return None;
        }
        self.interval = interval;
        if self.cancel_timer() {
            self.state = PlaybackState::Paused;
            return self.play();
        }
        None
    }

    /// Cancel any timer without touching the index. Used on teardown.
    pub fn shutdown(&mut self) {
        if self.cancel_timer() && self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
    }

    fn cancel_timer(&mut self) -> bool {
        match self.timer.take() {
            Some(slot) => {
                slot.token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Arm `slot`: call `on_tick` with the slot generation every interval
/// until the slot is cancelled or a tick reports anything but `Advanced`.
pub fn spawn_ticker<F>(slot: TimerSlot, mut on_tick: F) -> JoinHandle<()>
where
    F: FnMut(u64) -> TickOutcome + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + slot.interval, slot.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = slot.token.cancelled() => break,
                _ = interval.tick() => {
                    match on_tick(slot.generation) {
                        TickOutcome::Advanced(index) => {
                            tracing::debug!(index, "playback tick");
                        }
                        TickOutcome::Finished(_) | TickOutcome::Stale => break,
                    }
                }
            }
        }
    })
}
