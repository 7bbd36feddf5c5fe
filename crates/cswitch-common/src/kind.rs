use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The CLI ecosystems the relay fronts. Also used as the blacklist "platform".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    Claude,
    Codex,
    Gemini,
}

impl ClientKind {
    pub const ALL: [ClientKind; 3] = [ClientKind::Claude, ClientKind::Codex, ClientKind::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientKind::Claude => "claude",
            ClientKind::Codex => "codex",
            ClientKind::Gemini => "gemini",
        }
    }

    /// File (relative to the data dir) holding this kind's provider list.
    pub fn provider_file_name(&self) -> &'static str {
        match self {
            ClientKind::Claude => "claude-code.json",
            ClientKind::Codex => "codex.json",
            ClientKind::Gemini => "gemini-providers.json",
        }
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown client kind: {0}")]
pub struct UnknownClientKind(pub String);

impl FromStr for ClientKind {
    type Err = UnknownClientKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" | "claude-code" | "claude_code" => Ok(ClientKind::Claude),
            "codex" => Ok(ClientKind::Codex),
            "gemini" => Ok(ClientKind::Gemini),
            other => Err(UnknownClientKind(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_claude() {
        for alias in ["claude", "Claude-Code", "claude_code"] {
            assert_eq!(alias.parse::<ClientKind>().unwrap(), ClientKind::Claude);
        }
        assert!("copilot".parse::<ClientKind>().is_err());
    }
}
