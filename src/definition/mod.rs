//! Declarative endpoint descriptions, as served by the definition catalog.
//!
//! The engine only reads a handful of fields: the interaction pattern, the
//! poll interval, the required parameters and the declared output kind.
//! Everything else (body templates, auth, output paths) belongs to the
//! proxy and is kept as opaque JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Parameter mapping sent with a request. Ordered so logs and captured
/// requests are stable.
pub type Params = BTreeMap<String, String>;

/// How an endpoint is driven from submission to result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionPattern {
    /// One request, one response.
    #[default]
    Sync,
    /// Newline-delimited event frames over a single response body.
    Streaming,
    /// Submit a job, then poll its status until it settles.
    Polling,
}

impl fmt::Display for InteractionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sync => "sync",
            Self::Streaming => "streaming",
            Self::Polling => "polling",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    #[serde(default)]
    pub pattern: InteractionPattern,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(rename = "type", default)]
    pub kind: OutputKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseSpec {
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
}

/// One callable endpoint. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub interaction: Interaction,
    #[serde(default)]
    pub request: RequestSpec,
    #[serde(default)]
    pub response: ResponseSpec,
}

impl Definition {
    /// A bare definition with the given pattern. Mostly useful in tests.
    pub fn new(id: impl Into<String>, pattern: InteractionPattern) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            provider: String::new(),
            description: String::new(),
            interaction: Interaction {
                pattern,
                poll_interval_ms: None,
            },
            request: RequestSpec::default(),
            response: ResponseSpec::default(),
        }
    }

    pub fn pattern(&self) -> InteractionPattern {
        self.interaction.pattern
    }

    /// Declared poll interval, or `default` when absent or zero.
    pub fn poll_interval(&self, default: Duration) -> Duration {
        match self.interaction.poll_interval_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms),
            _ => default,
        }
    }

    /// First required parameter that is missing or blank in `params`.
    pub fn missing_required<'a>(&'a self, params: &Params) -> Option<&'a str> {
        self.request
            .params
            .iter()
            .filter(|p| p.required)
            .find(|p| params.get(&p.name).is_none_or(|v| v.trim().is_empty()))
            .map(|p| p.name.as_str())
    }

    /// Category of the primary output. Defaults to text.
    pub fn output_kind(&self) -> OutputKind {
        self.response
            .outputs
            .first()
            .map(|o| o.kind)
            .unwrap_or_default()
    }

    /// Whether two endpoints produce comparable results.
    pub fn compatible_with(&self, other: &Definition) -> bool {
        self.output_kind() == other.output_kind()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    #[default]
    Text,
    Image,
    Audio,
    Video,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
        };
        f.write_str(s)
    }
}

/// One typed output extracted from a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    #[serde(rename = "type", default)]
    pub kind: OutputKind,
    /// A single value or a list of values.
    pub value: Value,
    #[serde(default)]
    pub downloadable: bool,
}

impl Output {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Text,
            value: Value::Array(vec![Value::String(text.into())]),
            downloadable: false,
        }
    }

    /// Flatten scalar-or-list into a list, skipping nulls.
    pub fn values(&self) -> Vec<&Value> {
        match &self.value {
            Value::Array(items) => items.iter().filter(|v| !v.is_null()).collect(),
            Value::Null => Vec::new(),
            other => vec![other],
        }
    }
}

/// What a finished execution hands to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub outputs: Vec<Output>,
    /// Raw response payload, for inspection.
    pub response: Value,
}

impl RunResult {
    /// Build a result, falling back to the pretty-printed raw response when
    /// nothing was extracted.
    pub fn from_parts(outputs: Vec<Output>, response: Value) -> Self {
        if !outputs.is_empty() {
            return Self { outputs, response };
        }
        let raw = serde_json::to_string_pretty(&response).unwrap_or_else(|_| response.to_string());
        Self {
            outputs: vec![Output::text(raw)],
            response,
        }
    }

    /// Result of a finished stream: the accumulated text in a text output.
    pub fn streamed(text: String) -> Self {
        Self {
            response: serde_json::json!({ "text": text }),
            outputs: vec![Output::text(text)],
        }
    }

    /// All text values joined with newlines.
    pub fn text(&self) -> String {
        self.outputs
            .iter()
            .filter(|o| o.kind == OutputKind::Text)
            .flat_map(|o| o.values())
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
