//! Client identity.
//!
//! Every editor window gets one opaque id when its client is built and keeps it
//! for the life of the process. The bridge uses it to tell peers apart.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque, process-lifetime-stable identifier of a bridge client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientId(String);

impl ClientId {
    /// Wrap an existing id.
    ///
    /// Use [`ClientId::generate`] for new clients; this is for ids that came
    /// from somewhere else (tests, a restored session).
    pub fn new(id: impl Into<String>) -> Result<Self, ClientIdError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ClientIdError::Empty);
        }
        Ok(Self(id))
    }

    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ClientId {
    type Err = ClientIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ClientId {
    type Error = ClientIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ClientId> for String {
    fn from(id: ClientId) -> Self {
        id.0
    }
}

/// Error building a client id.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientIdError {
    #[error("client id cannot be empty")]
    Empty,
}
