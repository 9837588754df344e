//! Presence state published by a client.
//!
//! The state is an open map owned by the client. Updates are shallow: keys in
//! the update replace existing keys, everything else is kept.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Snapshot a client publishes about its current context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresenceState(Map<String, Value>);

impl PresenceState {
    /// Empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value under `key`, if set.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set one key, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Shallow merge: keys in `partial` overwrite, others are retained.
    pub fn merge(&mut self, partial: &PresenceState) {
        for (key, value) in &partial.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Number of top-level keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Top-level entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// The underlying JSON object.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for PresenceState {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for PresenceState {
    fn from_iter<T: IntoIterator<Item = (K, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Presence of an editor window, in the shape the bridge expects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditorPresence {
    /// Workspace display title.
    pub title: Option<String>,
    /// Absolute paths of the open workspace folders.
    pub folders: Vec<String>,
    /// Host editor, see [`detect_editor`].
    pub editor: String,
    /// Installed companion tools, see [`detect_companions`].
    pub extensions: Vec<String>,
}

impl From<EditorPresence> for PresenceState {
    fn from(presence: EditorPresence) -> Self {
        let mut state = PresenceState::new()
            .with("folders", presence.folders)
            .with("editor", presence.editor)
            .with("extensions", presence.extensions);
        if let Some(title) = presence.title {
            state.insert("title", title);
        }
        state
    }
}

/// Map a host application name to the editor name published in presence.
pub fn detect_editor(app_name: &str) -> String {
    let name = app_name.to_lowercase();
    if name.contains("windsurf") {
        "windsurf".to_string()
    } else if name.contains("cursor") {
        "cursor".to_string()
    } else if name.contains("visual studio code") {
        "vscode".to_string()
    } else {
        name
    }
}

/// Companion tools we know how to drive, with the extension ids that provide them.
pub const KNOWN_COMPANIONS: &[(&str, &[&str])] = &[
    ("Cline", &["saoudrizwan.claude-dev"]),
    ("RooCode", &["rooveterinaryinc.roo-cline"]),
    ("Copilot", &["github.copilot-chat", "github.copilot"]),
];

/// Names of the known companion tools for which any extension id is installed.
pub fn detect_companions(is_installed: impl Fn(&str) -> bool) -> Vec<String> {
    KNOWN_COMPANIONS
        .iter()
        .filter(|(_, ids)| ids.iter().any(|id| is_installed(id)))
        .map(|(name, _)| name.to_string())
        .collect()
}
