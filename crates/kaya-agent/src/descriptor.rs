//! Action descriptors: the tagged JSON values the model emits.
//!
//! The `action` tag is matched case-insensitively against a closed set of
//! kinds. Unknown kinds parse to [`ParsedAction::Unsupported`] and known kinds
//! with malformed fields to [`ParsedAction::Malformed`] — never a crash.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Error taxonomy surfaced to the conversation.
pub enum ErrorCode {
    MissingInformation,
    InvalidStructure,
    UnsupportedAction,
    UnauthorizedUser,
    AmbiguousIntent,
    ExecutionFailed,
    ParserRisk,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingInformation => "MISSING_INFORMATION",
            Self::InvalidStructure => "INVALID_STRUCTURE",
            Self::UnsupportedAction => "UNSUPPORTED_ACTION",
            Self::UnauthorizedUser => "UNAUTHORIZED_USER",
            Self::AmbiguousIntent => "AMBIGUOUS_INTENT",
            Self::ExecutionFailed => "EXECUTION_FAILED",
            Self::ParserRisk => "PARSER_RISK",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
/// Supported archive formats, all driven through the `7z` binary.
pub enum ArchiveKind {
    #[default]
    Zip,
    Tar,
    #[serde(rename = "7z")]
    SevenZ,
    #[serde(alias = "tar.gz", alias = "gz")]
    Tgz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Closed set of action kinds; the registry and policy key off this.
pub enum ActionKind {
    Talk,
    None,
    Status,
    Error,
    Messenger,
    Execute,
    Calculate,
    WebSearch,
    Contact,
    Read,
    Write,
    Delete,
    Copy,
    Move,
    MakeDir,
    Exists,
    Download,
    Compress,
    Decompress,
    ArchiveList,
    FetchApi,
    Shutdown,
    Restart,
}

impl ActionKind {
    pub const ALL: &'static [ActionKind] = &[
        Self::Talk,
        Self::None,
        Self::Status,
        Self::Error,
        Self::Messenger,
        Self::Execute,
        Self::Calculate,
        Self::WebSearch,
        Self::Contact,
        Self::Read,
        Self::Write,
        Self::Delete,
        Self::Copy,
        Self::Move,
        Self::MakeDir,
        Self::Exists,
        Self::Download,
        Self::Compress,
        Self::Decompress,
        Self::ArchiveList,
        Self::FetchApi,
        Self::Shutdown,
        Self::Restart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Talk => "talk",
            Self::None => "none",
            Self::Status => "status",
            Self::Error => "error",
            Self::Messenger => "messenger",
            Self::Execute => "execute",
            Self::Calculate => "calculate",
            Self::WebSearch => "web_search",
            Self::Contact => "contact",
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Copy => "copy",
            Self::Move => "move",
            Self::MakeDir => "make_dir",
            Self::Exists => "exists",
            Self::Download => "download",
            Self::Compress => "compress",
            Self::Decompress => "decompress",
            Self::ArchiveList => "archive_list",
            Self::FetchApi => "fetch_api",
            Self::Shutdown => "shutdown",
            Self::Restart => "restart",
        }
    }

    /// Looks up a kind from an already-lowercased tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == tag)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
/// One decoded action descriptor.
pub enum ActionDescriptor {
    Talk {
        text: String,
    },
    None,
    Status {
        state: String,
        #[serde(default)]
        details: String,
    },
    Error {
        error: ErrorCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        missing_fields: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suggested_fix: Option<String>,
    },
    Messenger {
        #[serde(default = "default_platform")]
        platform: String,
        to: String,
        message: String,
        #[serde(default)]
        mentions: Vec<String>,
    },
    Execute {
        command: String,
    },
    Calculate {
        expression: String,
    },
    WebSearch {
        result: String,
    },
    Contact {
        keywords: Vec<String>,
    },
    Read {
        path: String,
    },
    Write {
        path: String,
        content: String,
    },
    Delete {
        path: String,
    },
    Copy {
        from: String,
        to: String,
    },
    Move {
        from: String,
        to: String,
    },
    MakeDir {
        path: String,
    },
    Exists {
        path: String,
        #[serde(default)]
        keywords: Vec<String>,
    },
    Download {
        url: String,
        path: String,
    },
    Compress {
        path: String,
        destination: String,
        #[serde(default)]
        archive: ArchiveKind,
    },
    Decompress {
        path: String,
        destination: String,
    },
    ArchiveList {
        path: String,
    },
    FetchApi {
        #[serde(default = "default_method")]
        method: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
    },
    Shutdown {
        #[serde(default)]
        reason: String,
    },
    Restart {
        #[serde(default)]
        reason: String,
    },
}

fn default_platform() -> String {
    "whatsapp".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

impl ActionDescriptor {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Talk { .. } => ActionKind::Talk,
            Self::None => ActionKind::None,
            Self::Status { .. } => ActionKind::Status,
            Self::Error { .. } => ActionKind::Error,
            Self::Messenger { .. } => ActionKind::Messenger,
            Self::Execute { .. } => ActionKind::Execute,
            Self::Calculate { .. } => ActionKind::Calculate,
            Self::WebSearch { .. } => ActionKind::WebSearch,
            Self::Contact { .. } => ActionKind::Contact,
            Self::Read { .. } => ActionKind::Read,
            Self::Write { .. } => ActionKind::Write,
            Self::Delete { .. } => ActionKind::Delete,
            Self::Copy { .. } => ActionKind::Copy,
            Self::Move { .. } => ActionKind::Move,
            Self::MakeDir { .. } => ActionKind::MakeDir,
            Self::Exists { .. } => ActionKind::Exists,
            Self::Download { .. } => ActionKind::Download,
            Self::Compress { .. } => ActionKind::Compress,
            Self::Decompress { .. } => ActionKind::Decompress,
            Self::ArchiveList { .. } => ActionKind::ArchiveList,
            Self::FetchApi { .. } => ActionKind::FetchApi,
            Self::Shutdown { .. } => ActionKind::Shutdown,
            Self::Restart { .. } => ActionKind::Restart,
        }
    }

    pub fn talk(text: impl Into<String>) -> Self {
        Self::Talk { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Result of decoding one element of the model's output.
pub enum ParsedAction {
    Known(Box<ActionDescriptor>),
    /// The `action` tag names no registered kind.
    Unsupported { action: String },
    /// The kind is known but the fields do not decode.
    Malformed { action: String, error: String },
}

/// Decodes one action value; the tag is lowercased before matching so kinds
/// are case-insensitive.
pub fn parse_action_value(value: &Value) -> ParsedAction {
    let Some(tag) = value.get("action").and_then(Value::as_str) else {
        return ParsedAction::Malformed {
            action: String::new(),
            error: "descriptor has no string 'action' field".to_string(),
        };
    };
    let lowered = tag.to_ascii_lowercase();
    if ActionKind::from_tag(&lowered).is_none() {
        return ParsedAction::Unsupported {
            action: tag.to_string(),
        };
    }

    let mut normalized = value.clone();
    normalized["action"] = Value::String(lowered.clone());
    match serde_json::from_value::<ActionDescriptor>(normalized) {
        Ok(descriptor) => ParsedAction::Known(Box::new(descriptor)),
        Err(error) => ParsedAction::Malformed {
            action: lowered,
            error: error.to_string(),
        },
    }
}
