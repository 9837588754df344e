//! Client against a real WebSocket bridge on loopback.

use async_trait::async_trait;
use devbridge_client::{
    BridgeClient, ChannelConfig, ChannelEvent, ClientOptions, Dispatcher, OneShotSender,
    TaskUpdateError, send_task_update,
};
use devbridge_core::{ParamError, Phase, PresenceState};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;

type Bridge = WebSocketStream<TcpStream>;

async fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

async fn accept(listener: &TcpListener) -> Bridge {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

async fn next_json(bridge: &mut Bridge) -> Value {
    loop {
        match bridge.next().await {
            Some(Ok(WsMessage::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("bridge stream ended: {other:?}"),
        }
    }
}

async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<ChannelEvent>,
    wanted: impl Fn(&ChannelEvent) -> bool,
) {
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if wanted(&event) {
                return;
            }
        }
        panic!("event stream ended");
    })
    .await;
    assert!(found.is_ok(), "timed out waiting for event");
}

fn loopback(port: u16) -> ChannelConfig {
    ChannelConfig::new(format!("ws://127.0.0.1:{port}"))
}

#[derive(Default)]
struct Editor {
    instructions: Mutex<Vec<String>>,
}

#[async_trait]
impl devbridge_client::AgentTarget for Editor {
    async fn submit(&self, instruction: &str) -> anyhow::Result<()> {
        self.instructions.lock().unwrap().push(instruction.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn introduces_then_answers_agent_call() {
    let (listener, port) = listen().await;
    let cursor = Arc::new(Editor::default());
    let dispatcher = Dispatcher::builder().target("cursor", cursor.clone()).build();
    let options = ClientOptions::new(PresenceState::new().with("folders", json!(["/a"])))
        .channel(loopback(port));
    let (client, _events) = BridgeClient::new(options, dispatcher);

    let (connected, mut bridge) = tokio::join!(client.connect(), accept(&listener));
    connected.unwrap();

    let intro = next_json(&mut bridge).await;
    assert_eq!(intro["type"], "introduction");
    assert_eq!(intro["data"]["folders"], json!(["/a"]));
    assert_eq!(intro["clientId"], client.client_id().as_str());

    let call = json!({
        "type": "agent_call",
        "method": "cursor",
        "prompt": "fix bug",
        "files": ["x.ts"],
    });
    bridge
        .send(WsMessage::Text(call.to_string().into()))
        .await
        .unwrap();

    let reply = next_json(&mut bridge).await;
    assert_eq!(reply, json!({"type": "agent_call_success_response"}));
    assert_eq!(
        *cursor.instructions.lock().unwrap(),
        vec!["fix bug\n\n use the following files: x.ts".to_string()]
    );

    client.disconnect();
    assert_eq!(client.phase(), Phase::Closed);
}

#[tokio::test]
async fn reconnects_after_the_bridge_drops() {
    let (listener, port) = listen().await;
    let config = loopback(port).reconnect_interval(Duration::from_millis(50));
    let (client, mut events) = BridgeClient::new(
        ClientOptions::new(PresenceState::new()).channel(config),
        Dispatcher::builder().build(),
    );

    let (connected, mut bridge) = tokio::join!(client.connect(), accept(&listener));
    connected.unwrap();
    assert_eq!(next_json(&mut bridge).await["type"], "introduction");

    client.update_state(PresenceState::new().with("title", "second"));
    assert_eq!(next_json(&mut bridge).await["type"], "state_update");
    drop(bridge);

    wait_for(&mut events, |e| *e == ChannelEvent::Disconnected).await;
    let mut bridge = accept(&listener).await;
    let intro = next_json(&mut bridge).await;
    assert_eq!(intro["type"], "introduction");
    assert_eq!(intro["data"]["title"], "second");
    wait_for(&mut events, |e| *e == ChannelEvent::Connected).await;

    client.disconnect();
    wait_for(&mut events, |e| *e == ChannelEvent::Closed).await;
}

#[tokio::test]
async fn one_shot_delivers_task_update() {
    let (listener, port) = listen().await;
    let sender = OneShotSender::new(port);

    let bridge = async {
        let mut bridge = accept(&listener).await;
        let frame = next_json(&mut bridge).await;
        // read until the close handshake completes
        while let Some(Ok(_)) = bridge.next().await {}
        frame
    };
    let params = json!({"task_number": 5, "step_type": "start", "summary": "editing"});
    let (sent, frame) = tokio::join!(send_task_update(&sender, &params), bridge);

    assert_eq!(sent.unwrap().task_number, 5);
    assert_eq!(
        frame,
        json!({"type": "task_update", "task_number": 5, "step_type": "start", "summary": "editing"})
    );
}

#[tokio::test]
async fn one_shot_without_bridge_reports_the_port() {
    let (listener, port) = listen().await;
    drop(listener);

    let params = json!({"task_number": 1, "step_type": "end", "summary": "done"});
    let err = send_task_update(&OneShotSender::new(port), &params)
        .await
        .unwrap_err();
    assert!(matches!(err, TaskUpdateError::Delivery(_)));
    assert!(err.to_string().contains(&port.to_string()));
}

#[tokio::test]
async fn string_task_number_is_rejected_before_connecting() {
    let (listener, port) = listen().await;
    let params = json!({"task_number": "5", "step_type": "start", "summary": "s"});

    let err = send_task_update(&OneShotSender::new(port), &params)
        .await
        .unwrap_err();
    assert_eq!(err, TaskUpdateError::InvalidParams(ParamError::TaskNumber));

    let accepted = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
    assert!(accepted.is_err(), "nothing should have connected");
}
