//! Reconnecting channel to the bridge.
//!
//! One [`Channel`] owns at most one live connection. On every open it writes
//! the [`Handshake`] introduction before anything else, then pumps inbound
//! frames to the observer as [`ChannelEvent`]s. Unexpected closures are retried
//! on a fixed interval; [`Channel::disconnect`] is final.
//!
//! Sends are at-most-once: while the channel is not connected they are dropped,
//! not queued. The next introduction resynchronises the bridge.

use crate::state::{ConnectionState, Effect, ReconnectPolicy, Signal};
use crate::transport::{
    Connector, Frame, FrameSink, FrameStream, Link, NORMAL_CLOSURE, WsConnector,
};
use crate::ClientError;
use devbridge_core::message::{PING, PONG};
use devbridge_core::{CodecError, DEFAULT_PORT, Message, Phase, bridge_url};
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Channel settings.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: String,
    pub reconnect: ReconnectPolicy,
    /// Write a `ping` frame this often. Off by default.
    pub ping_interval: Option<Duration>,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
            ping_interval: None,
        }
    }

    /// Bridge on `localhost:port`.
    pub fn for_port(port: u16) -> Self {
        Self::new(bridge_url(port))
    }

    /// Delay between a closure and the next dial.
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect.interval = interval;
        self
    }

    /// Stop retrying after `max` consecutive failed attempts.
    pub fn max_reconnect_attempts(mut self, max: u32) -> Self {
        self.reconnect.max_attempts = Some(max);
        self
    }

    /// Enable the `ping` keepalive.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval);
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::for_port(DEFAULT_PORT)
    }
}

/// Supplies the first message written on every new connection.
pub trait Handshake: Send + Sync {
    fn introduction(&self) -> Message;
}

/// What the channel reports to its observer.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    Reconnecting { attempt: u32, delay: Duration },
    /// The attempt cap was hit; no further retries.
    ReconnectExhausted { attempts: u32 },
    Message(Message),
    /// A capability command with invalid arguments.
    Rejected { capability: String, reason: String },
    /// `disconnect()` was called. Last event.
    Closed,
}

#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    handshake: Arc<dyn Handshake>,
    ping_interval: Option<Duration>,
    shared: Mutex<Shared>,
}

struct Shared {
    state: ConnectionState,
    /// Bumped on every open so stale readers can be told apart.
    generation: u64,
    link: Option<LiveLink>,
    retry: Option<JoinHandle<()>>,
    events: Option<mpsc::UnboundedSender<ChannelEvent>>,
}

struct LiveLink {
    outbound: mpsc::UnboundedSender<String>,
    reader: JoinHandle<()>,
}

impl Shared {
    fn emit(&self, event: ChannelEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

impl Channel {
    /// Channel over a WebSocket to `config.url`.
    pub fn new(
        config: ChannelConfig,
        handshake: Arc<dyn Handshake>,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let connector = Arc::new(WsConnector::new(config.url.clone()));
        Self::with_connector(config, connector, handshake)
    }

    /// Channel over any transport. `config.url` is not used for dialing.
    pub fn with_connector(
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        handshake: Arc<dyn Handshake>,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events, observer) = mpsc::unbounded_channel();
        let shared = Shared {
            state: ConnectionState::new(config.reconnect),
            generation: 0,
            link: None,
            retry: None,
            events: Some(events),
        };
        let channel = Self {
            inner: Arc::new(Inner {
                connector,
                handshake,
                ping_interval: config.ping_interval,
                shared: Mutex::new(shared),
            }),
        };
        (channel, observer)
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.shared().state.phase()
    }

    /// Connect and introduce.
    ///
    /// Resolves once the transport is open and the introduction is written.
    /// A failure still schedules a retry, and calling again is safe.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let (effect, phase) = {
            let mut shared = self.shared();
            let effect = shared.state.apply(Signal::Connect);
            if effect == Effect::Dial {
                if let Some(retry) = shared.retry.take() {
                    retry.abort();
                }
            }
            (effect, shared.state.phase())
        };

        match (effect, phase) {
            (Effect::Dial, _) => self.dial().await,
            (_, Phase::Connected) => Ok(()),
            (_, Phase::Closed) => Err(ClientError::Closed),
            _ => Err(ClientError::InProgress),
        }
    }

    /// Queue `message` on the live connection. Dropped when not connected.
    ///
    /// Returns whether the message was accepted for writing.
    pub fn send(&self, message: &Message) -> bool {
        let shared = self.shared();
        let link = match &shared.link {
            Some(link) if shared.state.phase() == Phase::Connected => link,
            _ => {
                tracing::trace!(kind = %message.kind(), "not connected, dropping message");
                return false;
            }
        };
        match message.encode() {
            Ok(frame) => link.outbound.send(frame).is_ok(),
            Err(err) => {
                tracing::warn!(kind = %message.kind(), error = %err, "failed to encode message");
                false
            }
        }
    }

    /// Close for good. Cancels any pending retry. Idempotent.
    pub fn disconnect(&self) {
        let mut shared = self.shared();
        if shared.state.apply(Signal::Disconnect) != Effect::Teardown {
            return;
        }
        if let Some(retry) = shared.retry.take() {
            retry.abort();
        }
        if let Some(link) = shared.link.take() {
            // dropping the outbound queue makes the writer close the transport
            link.reader.abort();
        }
        shared.emit(ChannelEvent::Closed);
        shared.events = None;
        tracing::info!(address = self.inner.connector.address(), "disconnected from bridge");
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn dial(&self) -> Result<(), ClientError> {
        tracing::debug!(address = self.inner.connector.address(), "dialing bridge");
        match self.inner.connector.connect().await {
            Ok(link) => self.establish(link).await,
            Err(err) => {
                tracing::debug!(error = %err, "bridge connection failed");
                self.lost(None, Signal::Errored);
                Err(err)
            }
        }
    }

    /// Installs the link in the same critical section that enters
    /// `Connected`, with the introduction queued ahead of any `send`.
    async fn establish(&self, link: Link) -> Result<(), ClientError> {
        let Link { sink, stream } = link;
        let introduction = match self.inner.handshake.introduction().encode() {
            Ok(frame) => frame,
            Err(err) => {
                self.lost(None, Signal::Errored);
                return Err(err.into());
            }
        };

        let (generation, introduced) = {
            let mut shared = self.shared();
            if shared.state.apply(Signal::Opened) != Effect::Introduce {
                // disconnected while dialing; dropping the link closes it
                return Err(ClientError::Closed);
            }
            shared.generation += 1;
            let generation = shared.generation;

            let (outbound, queue) = mpsc::unbounded_channel();
            let (ack, introduced) = oneshot::channel();
            let writer = Writer {
                sink,
                queue,
                ping_interval: self.inner.ping_interval,
            };
            tokio::spawn(writer.run(introduction, ack));
            let reader = tokio::spawn(self.clone().read_frames(stream, generation));
            shared.link = Some(LiveLink { outbound, reader });
            shared.emit(ChannelEvent::Connected);
            (generation, introduced)
        };

        match introduced.await {
            Ok(Ok(())) if self.phase() == Phase::Closed => Err(ClientError::Closed),
            Ok(Ok(())) => {
                tracing::info!(address = self.inner.connector.address(), "connected to bridge");
                Ok(())
            }
            Ok(Err(err)) => {
                self.lost(Some(generation), Signal::Closed);
                Err(err)
            }
            Err(_) => {
                self.lost(Some(generation), Signal::Closed);
                Err(ClientError::Closed)
            }
        }
    }

    async fn read_frames(self, mut stream: FrameStream, generation: u64) {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Frame::Text(text)) => self.receive(&text),
                Ok(Frame::Close(code)) => {
                    tracing::debug!(?code, "bridge closed the connection");
                    break;
                }
                Err(err) => {
                    tracing::debug!(error = %err, "bridge connection errored");
                    break;
                }
            }
        }
        self.lost(Some(generation), Signal::Closed);
    }

    fn receive(&self, text: &str) {
        if text == PONG {
            return;
        }
        let event = match Message::decode(text) {
            Ok(message) => ChannelEvent::Message(message),
            Err(CodecError::InvalidCommand { capability, reason }) => {
                ChannelEvent::Rejected { capability, reason }
            }
            Err(err) => {
                tracing::trace!(error = %err, "discarding frame");
                return;
            }
        };
        self.shared().emit(event);
    }

    /// The connection (or the dial) went away without a local disconnect.
    fn lost(&self, generation: Option<u64>, signal: Signal) {
        let mut shared = self.shared();
        if generation.is_some_and(|g| g != shared.generation) {
            return;
        }
        let was_connected = shared.state.phase() == Phase::Connected;
        let effect = shared.state.apply(signal);
        if effect == Effect::Ignore {
            return;
        }
        shared.link = None;
        if was_connected {
            tracing::info!(address = self.inner.connector.address(), "lost bridge connection");
            shared.emit(ChannelEvent::Disconnected);
        }

        match effect {
            Effect::Retry { attempt, delay } => {
                tracing::debug!(attempt, ?delay, "scheduling reconnect");
                shared.emit(ChannelEvent::Reconnecting { attempt, delay });
                let channel = self.clone();
                shared.retry = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    channel.retry().await;
                }));
            }
            Effect::Exhausted { attempts } => {
                tracing::warn!(attempts, "giving up on the bridge, reconnect attempts exhausted");
                shared.emit(ChannelEvent::ReconnectExhausted { attempts });
            }
            _ => {}
        }
    }

    async fn retry(&self) {
        if self.shared().state.apply(Signal::RetryDue) != Effect::Dial {
            return;
        }
        if let Err(err) = self.dial().await {
            tracing::debug!(error = %err, "reconnect attempt failed");
        }
    }
}

struct Writer {
    sink: FrameSink,
    queue: mpsc::UnboundedReceiver<String>,
    ping_interval: Option<Duration>,
}

impl Writer {
    /// Write the introduction, report it, then drain the queue until it closes.
    async fn run(mut self, introduction: String, ack: oneshot::Sender<Result<(), ClientError>>) {
        if let Err(err) = self.sink.send(Frame::Text(introduction)).await {
            tracing::debug!(error = %err, "introduction write failed");
            let _ = ack.send(Err(err));
            return;
        }
        let _ = ack.send(Ok(()));

        let mut ticker = self.ping_interval.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            let frame = tokio::select! {
                frame = self.queue.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
                _ = next_tick(&mut ticker) => PING.to_string(),
            };
            if let Err(err) = self.sink.send(Frame::Text(frame)).await {
                tracing::debug!(error = %err, "write to bridge failed");
                return;
            }
        }

        let _ = self.sink.send(Frame::Close(Some(NORMAL_CLOSURE))).await;
        let _ = self.sink.close().await;
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
