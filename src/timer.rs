//! Countdown timer primitive.
//!
//! A [`Timer`] is a pure state machine advanced one second per
//! [`Timer::tick`]. It owns no clock; whoever owns the timer drives it,
//! either from a [`crate::ticker::Ticker`] in production or by calling
//! `tick()` directly in tests.
//!
//! [`ScheduledTimer`] pairs a timer with its own ticker and delivers
//! `on_tick` / `on_expire` to a [`TimerListener`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ticker::{ControlFlow, Ticker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerState {
    Idle,
    Running,
    Paused,
    /// Terminal until the next `start`.
    Expired,
}

/// Outcome of advancing a timer by one second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Timer was not running; nothing changed.
    Inactive,
    Remaining(u32),
    /// Reached zero on this tick.
    Expired,
}

impl Tick {
    /// Deliver this tick to a listener.
    pub fn dispatch<L: TimerListener + ?Sized>(self, listener: &mut L) {
        match self {
            Tick::Inactive => {}
            Tick::Remaining(remaining) => listener.on_tick(remaining),
            Tick::Expired => {
                listener.on_tick(0);
                listener.on_expire();
            }
        }
    }
}

/// Callbacks for a scheduled timer.
pub trait TimerListener {
    fn on_tick(&mut self, remaining: u32);
    fn on_expire(&mut self);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timer {
    duration_seconds: u32,
    remaining_seconds: u32,
    state: TimerState,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new() -> Self {
        Self {
            duration_seconds: 0,
            remaining_seconds: 0,
            state: TimerState::Idle,
        }
    }

    /// Arm the timer. A paused or expired timer is replaced.
    pub fn start(&mut self, duration_seconds: u32) -> Result<()> {
        if self.state == TimerState::Running {
            return Err(Error::AlreadyRunning);
        }
        self.duration_seconds = duration_seconds;
        self.remaining_seconds = duration_seconds;
        self.state = TimerState::Running;
        Ok(())
    }

    /// Stop and immediately re-arm. Used by reloads.
    pub fn restart(&mut self, duration_seconds: u32) {
        self.stop();
        self.duration_seconds = duration_seconds;
        self.remaining_seconds = duration_seconds;
        self.state = TimerState::Running;
    }

    /// Freeze the countdown. Returns whether anything changed.
    pub fn pause(&mut self) -> bool {
        if self.state != TimerState::Running {
            return false;
        }
        self.state = TimerState::Paused;
        true
    }

    /// Returns whether anything changed.
    pub fn resume(&mut self) -> bool {
        if self.state != TimerState::Paused {
            return false;
        }
        self.state = TimerState::Running;
        true
    }

    /// Back to idle. Never reports expiry.
    pub fn stop(&mut self) {
        self.remaining_seconds = 0;
        self.duration_seconds = 0;
        self.state = TimerState::Idle;
    }

    pub fn tick(&mut self) -> Tick {
        if self.state != TimerState::Running {
            return Tick::Inactive;
        }
        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        if self.remaining_seconds == 0 {
            self.state = TimerState::Expired;
            Tick::Expired
        } else {
            Tick::Remaining(self.remaining_seconds)
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn remaining(&self) -> u32 {
        self.remaining_seconds
    }

    pub fn duration(&self) -> u32 {
        self.duration_seconds
    }

    pub fn elapsed(&self) -> u32 {
        self.duration_seconds - self.remaining_seconds
    }

    pub fn is_running(&self) -> bool {
        self.state == TimerState::Running
    }
}

// ---------------------------------------------------------------------------
// Scheduled timer
// ---------------------------------------------------------------------------

/// A timer with its own tick task. Requires a tokio runtime.
pub struct ScheduledTimer {
    timer: Arc<Mutex<Timer>>,
    ticker: Option<Ticker>,
    period: Duration,
}

impl Default for ScheduledTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduledTimer {
    pub fn new() -> Self {
        Self::with_period(Duration::from_secs(1))
    }

    /// Override the tick period (one logical second).
    pub fn with_period(period: Duration) -> Self {
        Self {
            timer: Arc::new(Mutex::new(Timer::new())),
            ticker: None,
            period,
        }
    }

    pub fn start<L>(&mut self, duration_seconds: u32, mut listener: L) -> Result<()>
    where
        L: TimerListener + Send + 'static,
    {
        lock(&self.timer).start(duration_seconds)?;
        if let Some(old) = self.ticker.take() {
            old.cancel();
        }

        let timer = Arc::clone(&self.timer);
        self.ticker = Some(Ticker::spawn(self.period, move || {
            let tick = lock(&timer).tick();
            tick.dispatch(&mut listener);
            let flow = if tick == Tick::Expired {
                ControlFlow::Break
            } else {
                ControlFlow::Continue
            };
            async move { flow }
        }));
        Ok(())
    }

    pub fn pause(&self) -> bool {
        lock(&self.timer).pause()
    }

    pub fn resume(&self) -> bool {
        lock(&self.timer).resume()
    }

    pub fn stop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel();
        }
        lock(&self.timer).stop();
    }

    pub fn state(&self) -> TimerState {
        lock(&self.timer).state()
    }

    pub fn remaining(&self) -> u32 {
        lock(&self.timer).remaining()
    }
}

impl Drop for ScheduledTimer {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel();
        }
    }
}

// A listener that panicked mid-tick must not take the timer down with it.
fn lock(timer: &Mutex<Timer>) -> MutexGuard<'_, Timer> {
    timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
