//! The long-lived editor client.

use crate::channel::{Channel, ChannelConfig, ChannelEvent};
use crate::dispatch::Dispatcher;
use crate::presence::Presence;
use crate::transport::Connector;
use crate::ClientError;
use devbridge_core::{ClientId, Message, Phase, PresenceState};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Settings for a [`BridgeClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub client_id: ClientId,
    pub initial_state: PresenceState,
    pub channel: ChannelConfig,
}

impl ClientOptions {
    /// Fresh random client id, default channel settings.
    pub fn new(initial_state: PresenceState) -> Self {
        Self {
            client_id: ClientId::generate(),
            initial_state,
            channel: ChannelConfig::default(),
        }
    }

    pub fn client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }
}

/// Presence, channel and dispatch table of one editor instance.
///
/// Inbound commands are dispatched concurrently and answered on the channel.
/// Every channel event is also forwarded to the receiver returned by the
/// constructor. Shut down with [`disconnect`](Self::disconnect).
#[derive(Clone)]
pub struct BridgeClient {
    presence: Arc<Presence>,
    channel: Channel,
    dispatcher: Arc<Dispatcher>,
}

impl BridgeClient {
    pub fn new(
        options: ClientOptions,
        dispatcher: Dispatcher,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let presence = Arc::new(Presence::new(options.client_id, options.initial_state));
        let (channel, events) = Channel::new(options.channel, presence.clone());
        Self::assemble(presence, channel, events, dispatcher)
    }

    pub fn with_connector(
        options: ClientOptions,
        connector: Arc<dyn Connector>,
        dispatcher: Dispatcher,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let presence = Arc::new(Presence::new(options.client_id, options.initial_state));
        let (channel, events) =
            Channel::with_connector(options.channel, connector, presence.clone());
        Self::assemble(presence, channel, events, dispatcher)
    }

    fn assemble(
        presence: Arc<Presence>,
        channel: Channel,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
        dispatcher: Dispatcher,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let dispatcher = Arc::new(dispatcher);
        let (observer, observed) = mpsc::unbounded_channel();
        tokio::spawn(pump(channel.clone(), dispatcher.clone(), events, observer));
        let client = Self {
            presence,
            channel,
            dispatcher,
        };
        (client, observed)
    }

    /// Connect and introduce; see [`Channel::connect`].
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.channel.connect().await
    }

    /// Merge `partial` into the presence state and publish it.
    ///
    /// While disconnected the update is only applied locally; the next
    /// introduction carries it.
    pub fn update_state(&self, partial: PresenceState) {
        let update = self.presence.update(partial);
        self.channel.send(&update);
    }

    /// Current merged presence state.
    pub fn state(&self) -> PresenceState {
        self.presence.snapshot()
    }

    pub fn client_id(&self) -> &ClientId {
        self.presence.client_id()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Send on the live connection; see [`Channel::send`].
    pub fn send(&self, message: &Message) -> bool {
        self.channel.send(message)
    }

    pub fn phase(&self) -> Phase {
        self.channel.phase()
    }

    /// Close the channel for good. In-flight dispatches still finish; their
    /// responses are dropped.
    pub fn disconnect(&self) {
        self.channel.disconnect();
    }
}

async fn pump(
    channel: Channel,
    dispatcher: Arc<Dispatcher>,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    observer: mpsc::UnboundedSender<ChannelEvent>,
) {
    while let Some(event) = events.recv().await {
        match &event {
            ChannelEvent::Message(message) if dispatcher.routes(message) => {
                let channel = channel.clone();
                let dispatcher = dispatcher.clone();
                let message = message.clone();
                tokio::spawn(async move {
                    if let Some(response) = dispatcher.dispatch(&message).await {
                        channel.send(&response.into());
                    }
                });
            }
            ChannelEvent::Message(Message::Error { data }) => {
                tracing::warn!(%data, "bridge reported an error");
            }
            ChannelEvent::Rejected { capability, reason } => {
                if let Some(response) = dispatcher.reject(capability, reason) {
                    channel.send(&response.into());
                }
            }
            _ => {}
        }
        let _ = observer.send(event);
    }
    tracing::debug!("event pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::AgentHandler;
    use crate::dispatch::tests::{FakeCapability, RecordingTarget};
    use crate::transport::memory::MemoryConnector;
    use serde_json::{Value, json};
    use std::sync::atomic::Ordering;

    fn options() -> ClientOptions {
        ClientOptions::new(PresenceState::new().with("folders", json!(["/a"])))
            .client_id(ClientId::new("editor-1").unwrap())
            .channel(ChannelConfig::new("memory"))
    }

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn answers_commands_on_the_channel() {
        let (connector, mut peers) = MemoryConnector::new();
        let cline = Arc::new(FakeCapability::default());
        let cursor = Arc::new(RecordingTarget::default());
        let dispatcher = Dispatcher::builder()
            .capability(AgentHandler::cline(cline.clone()))
            .target("cursor", cursor.clone())
            .build();
        let (client, mut events) = BridgeClient::with_connector(options(), connector, dispatcher);

        client.connect().await.unwrap();
        let mut peer = peers.recv().await.unwrap();
        let intro = parse(&peer.next_text().await.unwrap());
        assert_eq!(intro["type"], "introduction");
        assert_eq!(intro["clientId"], "editor-1");
        assert_eq!(intro["data"]["folders"], json!(["/a"]));

        peer.push(r#"{"type":"cline_send_message","message":"hello"}"#);
        assert_eq!(
            parse(&peer.next_text().await.unwrap()),
            json!({"type": "cline_success_response"})
        );
        assert_eq!(*cline.calls.lock().unwrap(), vec!["send:hello".to_string()]);

        peer.push(r#"{"type":"agent_call","method":"cursor","prompt":"fix bug","files":["x.ts"]}"#);
        assert_eq!(
            parse(&peer.next_text().await.unwrap()),
            json!({"type": "agent_call_success_response"})
        );
        assert_eq!(
            *cursor.instructions.lock().unwrap(),
            vec!["fix bug\n\n use the following files: x.ts".to_string()]
        );

        assert_eq!(events.recv().await, Some(ChannelEvent::Connected));
        assert!(matches!(
            events.recv().await,
            Some(ChannelEvent::Message(Message::Command(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_command_gets_error_response() {
        let (connector, mut peers) = MemoryConnector::new();
        let dispatcher = Dispatcher::builder()
            .capability(AgentHandler::roocode(Arc::new(FakeCapability::default())))
            .build();
        let (client, _events) = BridgeClient::with_connector(options(), connector, dispatcher);

        client.connect().await.unwrap();
        let mut peer = peers.recv().await.unwrap();
        peer.next_text().await.unwrap();

        // unregistered capability: no answer
        peer.push(r#"{"type":"cline_start_task"}"#);
        peer.push(r#"{"type":"roocode_start_task","message":5}"#);
        let reply = parse(&peer.next_text().await.unwrap());
        assert_eq!(reply["type"], "roocode_error_response");
        assert!(reply["error"].as_str().unwrap().starts_with("Invalid arguments"));

        // agent_call is answered even without a registered target
        peer.push(r#"{"type":"agent_call","method":"cursor"}"#);
        let reply = parse(&peer.next_text().await.unwrap());
        assert_eq!(reply["type"], "agent_call_error_response");
        assert!(reply["error"].as_str().unwrap().contains("prompt"));
    }

    #[tokio::test(start_paused = true)]
    async fn state_updates_carry_the_partial() {
        let (connector, mut peers) = MemoryConnector::new();
        let (client, _events) =
            BridgeClient::with_connector(options(), connector, Dispatcher::builder().build());

        // applied locally while down
        client.update_state(PresenceState::new().with("title", "early"));
        client.connect().await.unwrap();
        let mut peer = peers.recv().await.unwrap();
        let intro = parse(&peer.next_text().await.unwrap());
        assert_eq!(intro["data"]["title"], "early");

        client.update_state(PresenceState::new().with("b", 2));
        let update = parse(&peer.next_text().await.unwrap());
        assert_eq!(update["type"], "state_update");
        assert_eq!(update["data"], json!({"b": 2}));
        assert!(update["timestamp"].as_u64().is_some());
        assert_eq!(client.state().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_finishing_after_disconnect_is_dropped() {
        let (connector, mut peers) = MemoryConnector::new();
        let cline = Arc::new(FakeCapability::default());
        cline.active_after.store(u32::MAX, Ordering::SeqCst);
        let dispatcher = Dispatcher::builder()
            .capability(AgentHandler::cline(cline.clone()))
            .build();
        let (client, mut events) = BridgeClient::with_connector(options(), connector, dispatcher);

        client.connect().await.unwrap();
        let mut peer = peers.recv().await.unwrap();
        peer.next_text().await.unwrap();
        peer.push(r#"{"type":"cline_send_message","message":"late"}"#);

        assert_eq!(events.recv().await, Some(ChannelEvent::Connected));
        assert!(matches!(events.recv().await, Some(ChannelEvent::Message(_))));
        client.disconnect();
        assert_eq!(events.recv().await, Some(ChannelEvent::Closed));
        assert_eq!(events.recv().await, None);

        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        // the handler ran to completion, its response went nowhere
        assert_eq!(*cline.calls.lock().unwrap(), vec!["send:late".to_string()]);
        assert_eq!(peer.next_text().await, None);
        assert_eq!(client.phase(), Phase::Closed);
    }
}
