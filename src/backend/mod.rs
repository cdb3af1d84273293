pub mod http;
pub mod mock;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::definition::{Definition, Output, Params};

/// Incrementally delivered response body.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// What the engine transmits for a submission or a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentRequest {
    pub definition_id: String,
    pub params: Params,
}

/// Response to a sync call or a polling submission.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubmitResponse {
    /// HTTP status of the envelope. Not part of the JSON body.
    #[serde(skip)]
    pub status: u16,
    #[serde(default, deserialize_with = "error_message")]
    pub error: Option<String>,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default)]
    pub response: Value,
    #[serde(default)]
    pub request_id: Option<String>,
    /// Upstream request as reported by the proxy.
    #[serde(default)]
    pub sent_request: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PollResponse {
    #[serde(default)]
    pub poll_status: String,
    #[serde(default, deserialize_with = "error_message")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResultResponse {
    #[serde(default, deserialize_with = "error_message")]
    pub error: Option<String>,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default)]
    pub response: Value,
}

/// The far side of the engine. An `Err` from any method is a transport
/// failure; application errors come back inside the decoded response.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn fetch_definition(&self, id: &str) -> Result<Definition>;
    async fn submit(&self, request: &SentRequest) -> Result<SubmitResponse>;
    async fn poll_status(&self, definition_id: &str, request_id: &str) -> Result<PollResponse>;
    async fn fetch_result(&self, definition_id: &str, request_id: &str) -> Result<ResultResponse>;
    async fn stream(&self, request: &SentRequest) -> Result<ByteStream>;
}

/// The proxy reports errors either as a string or as the provider's raw
/// error object. Normalize both to a message.
fn error_message<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
