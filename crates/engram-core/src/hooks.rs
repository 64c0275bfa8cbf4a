use serde::{Deserialize, Serialize};

use crate::kinds::EndReason;

/// Payload delivered by the host when a session begins.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionStartTrigger {
    pub session_id: String,
    pub cwd: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Payload delivered by the host when the user submits a prompt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserPromptTrigger {
    pub session_id: String,
    pub prompt: String,
}

/// Payload delivered by the host when a session ends.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionEndTrigger {
    pub session_id: String,
    pub cwd: String,
    #[serde(default)]
    pub transcript_path: Option<String>,
    pub reason: EndReason,
}

/// Parse a raw hook payload, failing closed: an absent or malformed payload
/// yields `None` and the caller performs no destructive action.
pub fn parse_trigger<T: serde::de::DeserializeOwned>(raw: &str) -> Option<T> {
    if raw.trim().is_empty() {
        return None;
    }
    serde_json::from_str(raw).ok()
}

/// Derive a project name from the host-supplied working directory.
pub fn project_from_cwd(cwd: &str) -> String {
    std::path::Path::new(cwd)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("default")
        .to_string()
}
