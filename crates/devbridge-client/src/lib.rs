//! Client side of the devbridge protocol.
//!
//! [`BridgeClient`] is the long-lived editor client: a reconnecting
//! [`Channel`], the [`Presence`] it introduces itself with, and the
//! [`Dispatcher`] that answers capability commands. [`OneShotSender`] is the
//! connect-send-close path for command-line tools.

mod channel;
mod client;
mod dispatch;
mod error;
mod oneshot;
mod presence;
mod state;
mod transport;

pub use channel::{Channel, ChannelConfig, ChannelEvent, Handshake};
pub use client::{BridgeClient, ClientOptions};
pub use dispatch::{
    ActivationWait, Advisor, AgentHandler, AgentTarget, CLINE_COMPANION, Capability,
    Dispatcher, DispatcherBuilder, LogAdvisor, ROOCODE_COMPANION,
};
pub use error::{ClientError, DispatchError, TaskUpdateError};
pub use oneshot::{DEFAULT_SEND_TIMEOUT, Delivery, OneShotSender, send_task_update};
pub use presence::Presence;
pub use state::{ConnectionState, DEFAULT_RECONNECT_INTERVAL, Effect, ReconnectPolicy, Signal};
pub use transport::{Connector, Frame, FrameSink, FrameStream, Link, NORMAL_CLOSURE, WsConnector};
