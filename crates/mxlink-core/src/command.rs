//! Command/response messages carried inside ordinary text envelopes.
//!
//! A command message is the marker character followed by the body of a
//! JSON object with its outer braces removed:
//!
//! ```text
//! !"cmd":"status","args":["wifi"]
//! !"cmd":"status","ret":0,"out":"connected"
//! ```
//!
//! Only the leading marker is interpreted by the transport; the set of
//! commands is up to the device.

use serde::{Deserialize, Serialize};

/// First character of every command or response message.
pub const COMMAND_MARKER: char = '!';

/// A command request or its response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Command name. Present in both directions.
    pub cmd: String,

    /// Ordered arguments of a request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Result code of a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ret: Option<i64>,

    /// Standard output of a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out: Option<String>,

    /// Error output of a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl Command {
    pub fn request(
        cmd: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            cmd: cmd.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn is_response(&self) -> bool {
        self.ret.is_some() || self.out.is_some() || self.err.is_some()
    }

    /// True for a response that reports success.
    pub fn succeeded(&self) -> bool {
        self.ret == Some(0)
    }

    /// Render as message text, marker included.
    pub fn to_text(&self) -> Result<String, CommandError> {
        let json = serde_json::to_string(self).map_err(CommandError::Encode)?;
        let body = json
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .unwrap_or(&json);
        let mut text = String::with_capacity(body.len() + 1);
        text.push(COMMAND_MARKER);
        text.push_str(body);
        Ok(text)
    }

    /// Parse message text. `None` if the text is not a command at all.
    pub fn parse(text: &str) -> Option<Result<Self, CommandError>> {
        let body = text.strip_prefix(COMMAND_MARKER)?;
        let body = body.trim_end_matches(['\r', '\n']);
        let json = format!("{{{body}}}");
        Some(serde_json::from_str(&json).map_err(CommandError::Decode))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to encode command: {0}")]
    Encode(serde_json::Error),
    #[error("malformed command: {0}")]
    Decode(serde_json::Error),
}
