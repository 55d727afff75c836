//! Ping/pong liveness tracking for WebSocket sessions.
//!
//! [`Keepalive`] holds no I/O of its own. The session task asks it for the
//! current deadline, sleeps until then, and acts on the [`TimerAction`] it
//! returns. Any frame from the peer counts as activity and resets the cycle,
//! so a healthy but quiet peer only ever sees pings, while a dead one is
//! closed one interval after the unanswered ping.

use tokio::time::{Duration, Instant};

/// Where the session is in the ping cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingState {
    /// Peer activity seen within the current interval
    Idle,
    /// Ping decided on, not yet written
    PingPending,
    /// Ping written, waiting for any frame from the peer
    PingSent,
}

/// What the session should do after its timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// The deadline moved while sleeping; sleep again
    Rearm,
    /// Write a ping frame, then report it with [`Keepalive::ping_sent`]
    SendPing,
    /// No sign of life for a whole ping interval; shut the connection down
    Close,
}

#[derive(Debug)]
pub struct Keepalive {
    state: PingState,
    interval: Duration,
    deadline: Instant,
}

impl Keepalive {
    pub fn new(interval: Duration) -> Self {
        Self {
            state: PingState::Idle,
            interval,
            deadline: Instant::now() + interval,
        }
    }

    pub fn state(&self) -> PingState {
        self.state
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Records a frame from the peer.
    pub fn on_activity(&mut self) {
        self.state = PingState::Idle;
        self.deadline = Instant::now() + self.interval;
    }

    /// Evaluates the timer at `now`.
    ///
    /// `open` is whether frames can still be written to the peer; a session
    /// whose writer has failed is closed instead of pinged.
    pub fn on_timer(&mut self, now: Instant, open: bool) -> TimerAction {
        if now < self.deadline {
            return TimerAction::Rearm;
        }

        if open && self.state == PingState::Idle {
            self.state = PingState::PingPending;
            self.deadline = now + self.interval;
            TimerAction::SendPing
        } else {
            TimerAction::Close
        }
    }

    /// Records that the ping frame has been written.
    ///
    /// Activity that raced the write has already put the state back to idle;
    /// that is left alone.
    pub fn ping_sent(&mut self) {
        if self.state == PingState::PingPending {
            self.state = PingState::PingSent;
        }
    }
}
