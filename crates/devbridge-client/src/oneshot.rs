//! Connect, send one message, close.
//!
//! Used by short-lived callers such as the command line. Never retries.

use crate::transport::{Connector, Frame, Link, NORMAL_CLOSURE, WsConnector};
use crate::TaskUpdateError;
use devbridge_core::{Message, TaskUpdate, bridge_url};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Bound on connecting and writing.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on waiting for the bridge to acknowledge the close.
const CLOSE_DRAIN: Duration = Duration::from_secs(1);

/// Result of a one-shot send. Failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Failed(String),
}

impl Delivery {
    pub fn is_sent(&self) -> bool {
        matches!(self, Delivery::Sent)
    }
}

pub struct OneShotSender {
    port: u16,
    connector: Arc<dyn Connector>,
    timeout: Duration,
}

impl OneShotSender {
    /// Sender for the bridge on `localhost:port`.
    pub fn new(port: u16) -> Self {
        Self::with_connector(port, Arc::new(WsConnector::new(bridge_url(port))))
    }

    /// `port` is only used in failure messages.
    pub fn with_connector(port: u16, connector: Arc<dyn Connector>) -> Self {
        Self {
            port,
            connector,
            timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn send(&self, message: &Message) -> Delivery {
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(err) => return Delivery::Failed(err.to_string()),
        };
        match tokio::time::timeout(self.timeout, self.deliver(frame)).await {
            Ok(Ok(())) => Delivery::Sent,
            Ok(Err(reason)) => Delivery::Failed(reason),
            Err(_) => Delivery::Failed(format!(
                "timed out after {:?} talking to the bridge on port {}",
                self.timeout, self.port
            )),
        }
    }

    async fn deliver(&self, frame: String) -> Result<(), String> {
        let Link {
            mut sink,
            mut stream,
        } = self.connector.connect().await.map_err(|err| {
            tracing::debug!(error = %err, "one-shot connect failed");
            format!("No bridge server running on port {}", self.port)
        })?;

        sink.send(Frame::Text(frame)).await.map_err(|err| {
            tracing::debug!(error = %err, "one-shot write failed");
            "connection closed unexpectedly".to_string()
        })?;
        if let Err(err) = sink.send(Frame::Close(Some(NORMAL_CLOSURE))).await {
            tracing::debug!(error = %err, "close handshake failed after send");
            return Ok(());
        }

        let drained = tokio::time::timeout(CLOSE_DRAIN, async {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Frame::Close(code)) if code.is_some_and(|c| c != NORMAL_CLOSURE) => {
                        tracing::debug!(?code, "bridge closed abnormally after send");
                        break;
                    }
                    Ok(Frame::Close(_)) | Err(_) => break,
                    Ok(Frame::Text(_)) => {}
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::debug!("bridge did not acknowledge close");
        }
        Ok(())
    }
}

/// Validate `params` and send them as a `task_update`.
///
/// Invalid parameters are rejected before any connection is opened.
pub async fn send_task_update(
    sender: &OneShotSender,
    params: &Value,
) -> Result<TaskUpdate, TaskUpdateError> {
    let update = TaskUpdate::from_params(params)?;
    match sender.send(&Message::TaskUpdate(update.clone())).await {
        Delivery::Sent => {
            tracing::info!(
                task = update.task_number,
                step = %update.step_type,
                "task update sent"
            );
            Ok(update)
        }
        Delivery::Failed(reason) => Err(TaskUpdateError::Delivery(reason)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryConnector;
    use devbridge_core::{ParamError, StepType};
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn writes_one_frame_then_closes() {
        let (connector, mut peers) = MemoryConnector::new();
        let sender = OneShotSender::with_connector(3434, connector.clone());

        let update = send_task_update(
            &sender,
            &json!({"task_number": 3, "step_type": "end", "summary": "done"}),
        )
        .await
        .unwrap();
        assert_eq!(update.step_type, StepType::End);

        let mut peer = peers.recv().await.unwrap();
        let frame: Value = serde_json::from_str(&peer.next_text().await.unwrap()).unwrap();
        assert_eq!(
            frame,
            json!({"type": "task_update", "task_number": 3, "step_type": "end", "summary": "done"})
        );
        assert_eq!(peer.written.recv().await, Some(Frame::Close(Some(1000))));
        assert_eq!(connector.dials(), 1);
    }

    #[tokio::test]
    async fn refused_connection_names_the_port() {
        let (connector, _peers) = MemoryConnector::new();
        connector.refuse(true);
        let sender = OneShotSender::with_connector(4545, connector.clone());

        let delivery = sender.send(&Message::Peers(Default::default())).await;
        assert_eq!(
            delivery,
            Delivery::Failed("No bridge server running on port 4545".to_string())
        );
        assert_eq!(connector.dials(), 1);
    }

    #[tokio::test]
    async fn invalid_params_never_connect() {
        let (connector, _peers) = MemoryConnector::new();
        let sender = OneShotSender::with_connector(3434, connector.clone());

        let err = send_task_update(
            &sender,
            &json!({"task_number": "5", "step_type": "start", "summary": "s"}),
        )
        .await
        .unwrap_err();
        assert_eq!(err, TaskUpdateError::InvalidParams(ParamError::TaskNumber));
        assert_eq!(connector.dials(), 0);
    }

    #[tokio::test]
    async fn delivery_failure_is_wrapped() {
        let (connector, _peers) = MemoryConnector::new();
        connector.refuse(true);
        let sender = OneShotSender::with_connector(7777, connector);

        let err = send_task_update(
            &sender,
            &json!({"task_number": 1, "step_type": "start", "summary": "s"}),
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to send task update: No bridge server running on port 7777"
        );
    }
}
