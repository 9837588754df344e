//! Transport seam between the channel and the network.
//!
//! The channel only needs "dial, then a sink and a stream of text frames".
//! [`WsConnector`] provides that over a WebSocket; tests plug in their own.

use crate::ClientError;
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt, future};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Close code for an orderly shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// A transport-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// Close handshake, with the close code if one was given.
    Close(Option<u16>),
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = ClientError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, ClientError>> + Send>>;

/// One open connection.
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens connections to the bridge.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Resolves once the transport reports "open", or fails.
    async fn connect(&self) -> Result<Link, ClientError>;

    /// Human-readable address, for logs.
    fn address(&self) -> &str;
}

/// WebSocket connector.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Link, ClientError> {
        let (ws, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|source| ClientError::Connect {
                url: self.url.clone(),
                source,
            })?;
        let (sink, stream) = ws.split();

        let sink = sink
            .sink_map_err(ClientError::from)
            .with(|frame: Frame| future::ready(Ok::<_, ClientError>(to_ws(frame))));
        let stream = stream.filter_map(|item| future::ready(from_ws(item)));

        Ok(Link {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }

    fn address(&self) -> &str {
        &self.url
    }
}

fn to_ws(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(text) => WsMessage::Text(text.into()),
        Frame::Close(code) => WsMessage::Close(code.map(|code| CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        })),
    }
}

fn from_ws(
    item: Result<WsMessage, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<Frame, ClientError>> {
    match item {
        Ok(WsMessage::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
        Ok(WsMessage::Binary(bytes)) => String::from_utf8(bytes.to_vec())
            .ok()
            .map(|text| Ok(Frame::Text(text))),
        Ok(WsMessage::Close(frame)) => Some(Ok(Frame::Close(frame.map(|f| u16::from(f.code))))),
        // ping/pong replies are handled inside tungstenite
        Ok(_) => None,
        Err(err) => Some(Err(err.into())),
    }
}
