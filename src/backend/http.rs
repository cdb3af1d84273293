use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{Backend, ByteStream, PollResponse, ResultResponse, SentRequest, SubmitResponse};
use crate::definition::{Definition, Params};

/// Talks to the playground proxy, which owns provider auth and wire formats.
pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ProxyRequest<'a> {
    definition_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
    params: &'a Params,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn job_url(&self, path: &str, definition_id: &str, request_id: &str) -> Result<Url> {
        let mut query = vec![("definition_id", definition_id), ("request_id", request_id)];
        if let Some(key) = &self.api_key {
            query.push(("api_key", key.as_str()));
        }
        Url::parse_with_params(&self.url(path), &query)
            .with_context(|| format!("invalid proxy url: {}", self.base_url))
    }

    fn body<'a>(&'a self, request: &'a SentRequest) -> ProxyRequest<'a> {
        ProxyRequest {
            definition_id: &request.definition_id,
            api_key: self.api_key.as_deref(),
            params: &request.params,
        }
    }
}

/// Decode a JSON body regardless of status. The proxy reports failures
/// in-band, so only a body that isn't JSON is a transport problem.
async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    let text = resp.text().await.context("failed to read proxy response")?;
    serde_json::from_str(&text)
        .with_context(|| format!("non-JSON response from proxy ({status}): {text}"))
}

/// Render a rejected stream as the same error frame the proxy uses for
/// upstream failures, so the decoder has a single error path.
fn rejection_frame(message: &str) -> Vec<u8> {
    let data = serde_json::json!({ "error": message });
    format!("event: error\ndata: {data}\n\n").into_bytes()
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_definition(&self, id: &str) -> Result<Definition> {
        let resp = self
            .client
            .get(self.url(&format!("/api/definitions/{id}")))
            .send()
            .await
            .with_context(|| format!("failed to fetch definition '{id}'"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("failed to load definition '{id}' ({status}): {text}");
        }

        resp.json()
            .await
            .with_context(|| format!("definition '{id}' is not valid"))
    }

    async fn submit(&self, request: &SentRequest) -> Result<SubmitResponse> {
        let resp = self
            .client
            .post(self.url("/api/generate"))
            .json(&self.body(request))
            .send()
            .await?;

        let status = resp.status().as_u16();
        let mut decoded: SubmitResponse = decode(resp).await?;
        decoded.status = status;
        Ok(decoded)
    }

    async fn poll_status(&self, definition_id: &str, request_id: &str) -> Result<PollResponse> {
        let url = self.job_url("/api/status", definition_id, request_id)?;
        let resp = self.client.get(url).send().await?;
        decode(resp).await
    }

    async fn fetch_result(&self, definition_id: &str, request_id: &str) -> Result<ResultResponse> {
        let url = self.job_url("/api/result", definition_id, request_id)?;
        let resp = self.client.get(url).send().await?;
        decode(resp).await
    }

    async fn stream(&self, request: &SentRequest) -> Result<ByteStream> {
        let resp = self
            .client
            .post(self.url("/api/stream"))
            .json(&self.body(request))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
                .unwrap_or_else(|| format!("stream request failed ({status})"));
            let frame = rejection_frame(&message);
            return Ok(futures::stream::once(async move { Ok(frame) }).boxed());
        }

        Ok(resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(anyhow::Error::from))
            .boxed())
    }
}
