//! Core types for devbridge.
//!
//! This crate holds the protocol primitives shared by the long-lived editor
//! client and short-lived command-line senders. It does no I/O beyond reading
//! the configuration file.

mod config;
mod identity;
pub mod message;
mod presence;
mod task;

pub use config::{BridgeConfig, ConfigError, DEFAULT_PORT, bridge_url};
pub use identity::{ClientId, ClientIdError};
pub use message::{
    Action, AgentCall, CodecError, Command, Message, Outcome, PeerNotice, PresenceReport,
    Response,
};
pub use presence::{
    EditorPresence, KNOWN_COMPANIONS, PresenceState, detect_companions, detect_editor,
};
pub use task::{ParamError, StepType, TaskUpdate};

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Connection lifecycle phase of a bridge channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No connection and nothing scheduled.
    Disconnected,
    /// Dialing the bridge.
    Connecting,
    /// Open; frames flow.
    Connected,
    /// Waiting out the retry interval.
    ReconnectScheduled,
    /// Shut down locally. Terminal.
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Disconnected => "disconnected",
            Phase::Connecting => "connecting",
            Phase::Connected => "connected",
            Phase::ReconnectScheduled => "reconnect scheduled",
            Phase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Milliseconds since the Unix epoch, as used in message timestamps.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
