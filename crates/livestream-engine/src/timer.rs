//! Cancellable timers for the session loop.
//!
//! Timers are channels the loop selects on. Re-arming or cancelling drops
//! the previous receiver, so a replaced timer can never fire.

use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

/// Fires once after its delay unless cancelled or re-armed.
#[derive(Debug, Default)]
pub struct OneShotTimer {
    rx: Option<Receiver<Instant>>,
}

impl OneShotTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer, replacing any pending deadline.
    pub fn arm(&mut self, delay: Duration) {
        self.rx = Some(crossbeam_channel::after(delay));
    }

    pub fn cancel(&mut self) {
        self.rx = None;
    }

    pub fn is_armed(&self) -> bool {
        self.rx.is_some()
    }

    /// Channel to select on. Never ready while disarmed.
    pub fn receiver(&self) -> Receiver<Instant> {
        self.rx.clone().unwrap_or_else(crossbeam_channel::never)
    }
}

/// Periodic tick, running between `start` and `stop`.
#[derive(Debug, Default)]
pub struct Ticker {
    rx: Option<Receiver<Instant>>,
}

impl Ticker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, period: Duration) {
        self.rx = Some(crossbeam_channel::tick(period));
    }

    pub fn stop(&mut self) {
        self.rx = None;
    }

    pub fn is_running(&self) -> bool {
        self.rx.is_some()
    }

    pub fn receiver(&self) -> Receiver<Instant> {
        self.rx.clone().unwrap_or_else(crossbeam_channel::never)
    }
}
