//! Wire protocol.
//!
//! Every frame is a JSON object whose `type` field selects the variant. Most
//! types are fixed names; capability commands and their acknowledgements are
//! named after the capability (`cline_start_task`, `cline_error_response`).
//! Types we do not know are kept as [`Message::Unknown`] so the application
//! can look at them.

use crate::presence::PresenceState;
use crate::task::TaskUpdate;
use crate::ClientId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Liveness probe written by clients that want a keepalive.
pub const PING: &str = "ping";
/// Liveness reply from the bridge. Never valid JSON, never decoded.
pub const PONG: &str = "pong";

const INTRODUCTION: &str = "introduction";
const STATE_UPDATE: &str = "state_update";
const PEERS: &str = "peers";
const PEER_JOINED: &str = "peer_joined";
const PEER_LEFT: &str = "peer_left";
const ERROR: &str = "error";
const AGENT_CALL: &str = "agent_call";
const TASK_UPDATE: &str = "task_update";

const START_TASK_SUFFIX: &str = "_start_task";
const SEND_MESSAGE_SUFFIX: &str = "_send_message";
const ERROR_RESPONSE_SUFFIX: &str = "_error_response";
const SUCCESS_RESPONSE_SUFFIX: &str = "_success_response";

/// A protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Full presence, sent once per connection before anything else.
    Introduction(PresenceReport),
    /// Changed presence keys only.
    StateUpdate(PresenceReport),
    Peers(PeerNotice),
    PeerJoined(PeerNotice),
    PeerLeft(PeerNotice),
    /// Error reported by the bridge.
    Error { data: Value },
    AgentCall(AgentCall),
    /// `<capability>_start_task` / `<capability>_send_message`.
    Command(Command),
    /// `<capability>_success_response` / `<capability>_error_response`.
    Response(Response),
    TaskUpdate(TaskUpdate),
    /// Any other `type`, passed through untouched.
    Unknown {
        kind: String,
        body: Map<String, Value>,
    },
}

/// Presence payload of `introduction` and `state_update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceReport {
    #[serde(rename = "clientId")]
    pub client_id: ClientId,
    #[serde(rename = "data")]
    pub state: PresenceState,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Informational notice about other clients on the bridge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerNotice {
    #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl PeerNotice {
    /// The peer this notice is about, from `clientId` or `data.clientId`.
    pub fn peer(&self) -> Option<&str> {
        self.client_id
            .as_ref()
            .map(ClientId::as_str)
            .or_else(|| self.data.get("clientId").and_then(Value::as_str))
    }
}

/// Generic automation request routed by `method`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCall {
    pub method: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

impl AgentCall {
    /// The prompt with the file and image sections appended.
    ///
    /// A section is added only when its list is non-empty; entries are one
    /// per line.
    pub fn instruction(&self) -> String {
        let mut instruction = self.prompt.clone();
        if let Some(files) = self.files.as_deref().filter(|f| !f.is_empty()) {
            instruction.push_str("\n\n use the following files: ");
            instruction.push_str(&files.join("\n"));
        }
        if let Some(images) = self.images.as_deref().filter(|i| !i.is_empty()) {
            instruction.push_str("\n\n use the following images: ");
            instruction.push_str(&images.join("\n"));
        }
        instruction
    }
}

/// Capability-scoped command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub capability: String,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    StartTask { message: String, images: Vec<String> },
    SendMessage { message: String },
}

#[derive(Deserialize)]
struct StartTaskBody {
    message: String,
    #[serde(default)]
    images: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct SendMessageBody {
    message: String,
}

/// Acknowledgement of a capability command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub capability: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error(String),
}

impl Response {
    /// `<capability>_success_response`.
    pub fn success(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            outcome: Outcome::Success,
        }
    }

    /// `<capability>_error_response` carrying `error`.
    pub fn error(capability: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            outcome: Outcome::Error(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Capability name used for `agent_call` acknowledgements.
pub const AGENT_CALL_CAPABILITY: &str = AGENT_CALL;

impl Message {
    /// The wire `type` of this message.
    pub fn kind(&self) -> String {
        match self {
            Message::Introduction(_) => INTRODUCTION.to_string(),
            Message::StateUpdate(_) => STATE_UPDATE.to_string(),
            Message::Peers(_) => PEERS.to_string(),
            Message::PeerJoined(_) => PEER_JOINED.to_string(),
            Message::PeerLeft(_) => PEER_LEFT.to_string(),
            Message::Error { .. } => ERROR.to_string(),
            Message::AgentCall(_) => AGENT_CALL.to_string(),
            Message::Command(cmd) => match cmd.action {
                Action::StartTask { .. } => format!("{}{START_TASK_SUFFIX}", cmd.capability),
                Action::SendMessage { .. } => format!("{}{SEND_MESSAGE_SUFFIX}", cmd.capability),
            },
            Message::Response(resp) => match resp.outcome {
                Outcome::Success => format!("{}{SUCCESS_RESPONSE_SUFFIX}", resp.capability),
                Outcome::Error(_) => format!("{}{ERROR_RESPONSE_SUFFIX}", resp.capability),
            },
            Message::TaskUpdate(_) => TASK_UPDATE.to_string(),
            Message::Unknown { kind, .. } => kind.clone(),
        }
    }

    /// Serialize to a single JSON text frame.
    pub fn encode(&self) -> Result<String, CodecError> {
        let body = match self {
            Message::Introduction(report) | Message::StateUpdate(report) => {
                serde_json::to_value(report)?
            }
            Message::Peers(notice) | Message::PeerJoined(notice) | Message::PeerLeft(notice) => {
                serde_json::to_value(notice)?
            }
            Message::Error { data } => serde_json::json!({ "data": data }),
            Message::AgentCall(call) => serde_json::to_value(call)?,
            Message::Command(cmd) => match &cmd.action {
                Action::StartTask { message, images } if images.is_empty() => {
                    serde_json::json!({ "message": message })
                }
                Action::StartTask { message, images } => {
                    serde_json::json!({ "message": message, "images": images })
                }
                Action::SendMessage { message } => serde_json::json!({ "message": message }),
            },
            Message::Response(resp) => match &resp.outcome {
                Outcome::Success => Value::Object(Map::new()),
                Outcome::Error(error) => serde_json::json!({ "error": error }),
            },
            Message::TaskUpdate(update) => serde_json::to_value(update)?,
            Message::Unknown { body, .. } => Value::Object(body.clone()),
        };

        let Value::Object(mut object) = body else {
            return Err(CodecError::NotAnObject);
        };
        object.insert("type".to_string(), Value::String(self.kind()));
        Ok(serde_json::to_string(&object)?)
    }

    /// Parse and validate one text frame.
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        let Value::Object(mut object) = serde_json::from_str::<Value>(text)? else {
            return Err(CodecError::NotAnObject);
        };
        let kind = match object.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => return Err(CodecError::MissingType),
        };
        Self::from_parts(kind, object)
    }

    fn from_parts(kind: String, body: Map<String, Value>) -> Result<Self, CodecError> {
        match kind.as_str() {
            INTRODUCTION => return Ok(Message::Introduction(fields(&kind, body)?)),
            STATE_UPDATE => return Ok(Message::StateUpdate(fields(&kind, body)?)),
            PEERS => return Ok(Message::Peers(fields(&kind, body)?)),
            PEER_JOINED => return Ok(Message::PeerJoined(fields(&kind, body)?)),
            PEER_LEFT => return Ok(Message::PeerLeft(fields(&kind, body)?)),
            ERROR => {
                let data = body.get("data").cloned().unwrap_or(Value::Null);
                return Ok(Message::Error { data });
            }
            AGENT_CALL => return Ok(Message::AgentCall(command_fields(AGENT_CALL, body)?)),
            TASK_UPDATE => return Ok(Message::TaskUpdate(fields(&kind, body)?)),
            _ => {}
        }

        if let Some(capability) = capability_of(&kind, START_TASK_SUFFIX) {
            let StartTaskBody { message, images } = command_fields(capability, body)?;
            return Ok(Message::Command(Command {
                capability: capability.to_string(),
                action: Action::StartTask {
                    message,
                    images: images.unwrap_or_default(),
                },
            }));
        }
        if let Some(capability) = capability_of(&kind, SEND_MESSAGE_SUFFIX) {
            let SendMessageBody { message } = command_fields(capability, body)?;
            return Ok(Message::Command(Command {
                capability: capability.to_string(),
                action: Action::SendMessage { message },
            }));
        }
        if let Some(capability) = capability_of(&kind, ERROR_RESPONSE_SUFFIX) {
            let error = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Ok(Message::Response(Response::error(capability, error)));
        }
        if let Some(capability) = capability_of(&kind, SUCCESS_RESPONSE_SUFFIX) {
            return Ok(Message::Response(Response::success(capability)));
        }

        Ok(Message::Unknown { kind, body })
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}

impl From<TaskUpdate> for Message {
    fn from(update: TaskUpdate) -> Self {
        Message::TaskUpdate(update)
    }
}

fn capability_of<'a>(kind: &'a str, suffix: &str) -> Option<&'a str> {
    kind.strip_suffix(suffix).filter(|cap| !cap.is_empty())
}

fn fields<T: DeserializeOwned>(kind: &str, body: Map<String, Value>) -> Result<T, CodecError> {
    serde_json::from_value(Value::Object(body)).map_err(|source| CodecError::InvalidFields {
        kind: kind.to_string(),
        source,
    })
}

fn command_fields<T: DeserializeOwned>(
    capability: &str,
    body: Map<String, Value>,
) -> Result<T, CodecError> {
    serde_json::from_value(Value::Object(body)).map_err(|err| CodecError::InvalidCommand {
        capability: capability.to_string(),
        reason: err.to_string(),
    })
}

/// Frame that could not be turned into a [`Message`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("invalid `{kind}` frame: {source}")]
    InvalidFields {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    /// A capability command or `agent_call` with bad arguments. Answerable,
    /// unlike the rest.
    #[error("invalid {capability} command: {reason}")]
    InvalidCommand { capability: String, reason: String },
}
