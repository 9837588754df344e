//! Connection state machine.
//!
//! Pure: [`ConnectionState::apply`] takes a [`Signal`] and returns the
//! [`Effect`] the channel must carry out. No I/O and no timers live here.

use devbridge_core::Phase;
use std::time::Duration;

/// Retry interval when none is configured.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(5000);

/// How the channel retries after an unexpected closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub interval: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONNECT_INTERVAL,
            max_attempts: None,
        }
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Local `connect()` call.
    Connect,
    /// Transport reported open.
    Opened,
    /// Transport failed before or after open.
    Errored,
    /// Transport closed.
    Closed,
    /// The retry timer fired.
    RetryDue,
    /// Local `disconnect()` call.
    Disconnect,
}

/// What the channel has to do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Nothing; the signal does not apply in the current phase.
    Ignore,
    /// Open a new transport.
    Dial,
    /// Send the introduction on the fresh connection.
    Introduce,
    /// Start the retry timer.
    Retry { attempt: u32, delay: Duration },
    /// Give up; report once.
    Exhausted { attempts: u32 },
    /// Cancel timers and close the transport.
    Teardown,
}

#[derive(Debug, Clone)]
pub struct ConnectionState {
    phase: Phase,
    attempts: u32,
    policy: ReconnectPolicy,
}

impl ConnectionState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            phase: Phase::Disconnected,
            attempts: 0,
            policy,
        }
    }

    /// Phase after the last applied signal.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Reconnect attempts since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Retry settings this machine was built with.
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Transition on `signal` and return what the caller must do.
    pub fn apply(&mut self, signal: Signal) -> Effect {
        use Phase::*;

        match (self.phase, signal) {
            (Closed, _) => Effect::Ignore,
            (_, Signal::Disconnect) => {
                self.phase = Closed;
                Effect::Teardown
            }
            (Disconnected | ReconnectScheduled, Signal::Connect)
            | (ReconnectScheduled, Signal::RetryDue) => {
                self.phase = Connecting;
                Effect::Dial
            }
            (Connecting, Signal::Opened) => {
                self.phase = Connected;
                self.attempts = 0;
                Effect::Introduce
            }
            (Connecting | Connected, Signal::Errored | Signal::Closed) => {
                self.phase = Disconnected;
                self.schedule_retry()
            }
            _ => Effect::Ignore,
        }
    }

    fn schedule_retry(&mut self) -> Effect {
        if let Some(max) = self.policy.max_attempts {
            if self.attempts >= max {
                return Effect::Exhausted {
                    attempts: self.attempts,
                };
            }
        }
        self.attempts += 1;
        self.phase = Phase::ReconnectScheduled;
        Effect::Retry {
            attempt: self.attempts,
            delay: self.policy.interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capped(max: u32) -> ConnectionState {
        ConnectionState::new(ReconnectPolicy {
            interval: Duration::from_millis(10),
            max_attempts: Some(max),
        })
    }

    #[test]
    fn happy_path() {
        let mut state = ConnectionState::new(ReconnectPolicy::default());
        assert_eq!(state.apply(Signal::Connect), Effect::Dial);
        assert_eq!(state.phase(), Phase::Connecting);
        assert_eq!(state.apply(Signal::Opened), Effect::Introduce);
        assert_eq!(state.phase(), Phase::Connected);
        // already connected
        assert_eq!(state.apply(Signal::Connect), Effect::Ignore);
    }

    #[test]
    fn closure_schedules_retry_with_default_interval() {
        let mut state = ConnectionState::new(ReconnectPolicy::default());
        state.apply(Signal::Connect);
        state.apply(Signal::Opened);
        assert_eq!(
            state.apply(Signal::Closed),
            Effect::Retry {
                attempt: 1,
                delay: Duration::from_millis(5000),
            }
        );
        assert_eq!(state.phase(), Phase::ReconnectScheduled);
        assert_eq!(state.apply(Signal::RetryDue), Effect::Dial);
        assert_eq!(state.phase(), Phase::Connecting);
    }

    #[test]
    fn open_resets_attempts() {
        let mut state = capped(5);
        state.apply(Signal::Connect);
        state.apply(Signal::Errored);
        state.apply(Signal::RetryDue);
        state.apply(Signal::Errored);
        assert_eq!(state.attempts(), 2);
        state.apply(Signal::RetryDue);
        state.apply(Signal::Opened);
        assert_eq!(state.attempts(), 0);
    }

    #[test]
    fn exhaustion_stops_scheduling() {
        let mut state = capped(2);
        state.apply(Signal::Connect);
        assert!(matches!(state.apply(Signal::Errored), Effect::Retry { attempt: 1, .. }));
        state.apply(Signal::RetryDue);
        assert!(matches!(state.apply(Signal::Errored), Effect::Retry { attempt: 2, .. }));
        state.apply(Signal::RetryDue);
        assert_eq!(state.apply(Signal::Errored), Effect::Exhausted { attempts: 2 });
        assert_eq!(state.phase(), Phase::Disconnected);
        // the timer never fires for an exhausted channel
        assert_eq!(state.apply(Signal::RetryDue), Effect::Ignore);
    }

    #[test]
    fn disconnect_is_terminal_and_idempotent() {
        let mut state = ConnectionState::new(ReconnectPolicy::default());
        state.apply(Signal::Connect);
        state.apply(Signal::Opened);
        assert_eq!(state.apply(Signal::Disconnect), Effect::Teardown);
        assert_eq!(state.apply(Signal::Disconnect), Effect::Ignore);
        assert_eq!(state.apply(Signal::Closed), Effect::Ignore);
        assert_eq!(state.apply(Signal::Connect), Effect::Ignore);
        assert_eq!(state.phase(), Phase::Closed);
    }

    #[test]
    fn disconnect_cancels_scheduled_retry() {
        let mut state = ConnectionState::new(ReconnectPolicy::default());
        state.apply(Signal::Connect);
        state.apply(Signal::Errored);
        assert_eq!(state.phase(), Phase::ReconnectScheduled);
        assert_eq!(state.apply(Signal::Disconnect), Effect::Teardown);
        assert_eq!(state.apply(Signal::RetryDue), Effect::Ignore);
    }

    #[test]
    fn stale_open_is_ignored() {
        let mut state = ConnectionState::new(ReconnectPolicy::default());
        assert_eq!(state.apply(Signal::Opened), Effect::Ignore);
        assert_eq!(state.phase(), Phase::Disconnected);
    }
}
