use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{Backend, ByteStream, PollResponse, ResultResponse, SentRequest, SubmitResponse};
use crate::definition::Definition;

/// A scripted reply: either a decoded response or a transport failure.
#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(T),
    Transport(String),
}

/// One step of a scripted response body.
#[derive(Debug, Clone)]
pub enum Chunk {
    Data(Vec<u8>),
    Delay(Duration),
    Fail(String),
    /// Never yields again. The body stays open until dropped.
    Hang,
}

impl Chunk {
    pub fn text(s: &str) -> Self {
        Self::Data(s.as_bytes().to_vec())
    }
}

/// Replies scripted for one definition.
#[derive(Default)]
struct Script {
    submits: VecDeque<Reply<SubmitResponse>>,
    polls: VecDeque<Reply<PollResponse>>,
    results: VecDeque<Reply<ResultResponse>>,
    streams: VecDeque<Vec<Chunk>>,
}

/// A scripted backend for tests. Replies are keyed by definition id and
/// consumed in order.
#[derive(Default)]
pub struct MockBackend {
    definitions: HashMap<String, Definition>,
    scripts: Mutex<HashMap<String, Script>>,
    submit_delay: Option<Duration>,
    sent: Mutex<Vec<SentRequest>>,
    submit_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    result_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    released: Arc<AtomicBool>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definition(mut self, definition: Definition) -> Self {
        self.definitions.insert(definition.id.clone(), definition);
        self
    }

    fn script(self, definition_id: &str, f: impl FnOnce(&mut Script)) -> Self {
        f(self
            .scripts
            .lock()
            .unwrap()
            .entry(definition_id.to_string())
            .or_default());
        self
    }

    pub fn with_submit(self, definition_id: &str, reply: Reply<SubmitResponse>) -> Self {
        self.script(definition_id, |s| s.submits.push_back(reply))
    }

    pub fn with_polls(
        self,
        definition_id: &str,
        replies: impl IntoIterator<Item = Reply<PollResponse>>,
    ) -> Self {
        self.script(definition_id, |s| s.polls.extend(replies))
    }

    pub fn with_result(self, definition_id: &str, reply: Reply<ResultResponse>) -> Self {
        self.script(definition_id, |s| s.results.push_back(reply))
    }

    pub fn with_stream(self, definition_id: &str, chunks: Vec<Chunk>) -> Self {
        self.script(definition_id, |s| s.streams.push_back(chunks))
    }

    /// Hold every submission for `delay` before replying.
    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = Some(delay);
        self
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn result_calls(&self) -> usize {
        self.result_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Every request passed to `submit` or `stream`, in order.
    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().unwrap().clone()
    }

    /// True once the last stream body handed out has been dropped.
    pub fn stream_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl MockBackend {
    fn pop<T>(
        &self,
        definition_id: &str,
        what: &str,
        call: usize,
        queue: impl FnOnce(&mut Script) -> Option<Reply<T>>,
    ) -> Result<T> {
        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(definition_id)
            .and_then(queue);
        match reply {
            Some(Reply::Ok(value)) => Ok(value),
            Some(Reply::Transport(message)) => Err(anyhow!(message)),
            None => Err(anyhow!(
                "MockBackend: no more {what} replies for '{definition_id}' (call {call})"
            )),
        }
    }
}

/// Flags the body as released when dropped.
struct ReleaseGuard(Arc<AtomicBool>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn fetch_definition(&self, id: &str) -> Result<Definition> {
        self.definitions
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("Definition '{id}' not found"))
    }

    async fn submit(&self, request: &SentRequest) -> Result<SubmitResponse> {
        let call = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.lock().unwrap().push(request.clone());
        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }
        self.pop(&request.definition_id, "submit", call, |s| s.submits.pop_front())
    }

    async fn poll_status(&self, definition_id: &str, _request_id: &str) -> Result<PollResponse> {
        let call = self.poll_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.pop(definition_id, "poll", call, |s| s.polls.pop_front())
    }

    async fn fetch_result(&self, definition_id: &str, _request_id: &str) -> Result<ResultResponse> {
        let call = self.result_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.pop(definition_id, "result", call, |s| s.results.pop_front())
    }

    async fn stream(&self, request: &SentRequest) -> Result<ByteStream> {
        let call = self.stream_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.lock().unwrap().push(request.clone());
        let chunks = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.definition_id)
            .and_then(|s| s.streams.pop_front())
            .ok_or_else(|| {
                anyhow!(
                    "MockBackend: no more streams for '{}' (call {call})",
                    request.definition_id
                )
            })?;

        self.released.store(false, Ordering::SeqCst);
        let guard = ReleaseGuard(Arc::clone(&self.released));
        let state = (VecDeque::from(chunks), guard);

        let body = futures::stream::unfold(state, |(mut chunks, guard)| async move {
            loop {
                match chunks.pop_front()? {
                    Chunk::Data(bytes) => return Some((Ok(bytes), (chunks, guard))),
                    Chunk::Delay(delay) => tokio::time::sleep(delay).await,
                    Chunk::Fail(message) => return Some((Err(anyhow!(message)), (chunks, guard))),
                    Chunk::Hang => futures::future::pending::<()>().await,
                }
            }
        });
        Ok(body.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{InteractionPattern, Params};

    fn request() -> SentRequest {
        SentRequest {
            definition_id: "chat".to_string(),
            params: Params::new(),
        }
    }

    #[tokio::test]
    async fn replies_are_consumed_in_order() {
        let backend = MockBackend::new().with_polls("x", [
            Reply::Ok(PollResponse {
                poll_status: "running".to_string(),
                error: None,
            }),
            Reply::Transport("connection reset".to_string()),
        ]);

        let first = backend.poll_status("x", "abc").await.unwrap();
        assert_eq!(first.poll_status, "running");
        let second = backend.poll_status("x", "abc").await;
        assert!(second.unwrap_err().to_string().contains("connection reset"));
        let third = backend.poll_status("x", "abc").await;
        assert!(third.unwrap_err().to_string().contains("no more poll replies"));
        assert_eq!(backend.poll_calls(), 3);
    }

    #[tokio::test]
    async fn unknown_definition_fails() {
        let backend =
            MockBackend::new().with_definition(Definition::new("chat", InteractionPattern::Sync));
        assert!(backend.fetch_definition("chat").await.is_ok());
        assert!(backend.fetch_definition("nope").await.is_err());
    }

    #[tokio::test]
    async fn stream_yields_chunks_and_releases_on_end() {
        let backend =
            MockBackend::new().with_stream("chat", vec![Chunk::text("a"), Chunk::text("b")]);
        let mut body = backend.stream(&request()).await.unwrap();

        assert_eq!(body.next().await.unwrap().unwrap(), b"a".to_vec());
        assert_eq!(body.next().await.unwrap().unwrap(), b"b".to_vec());
        assert!(body.next().await.is_none());
        drop(body);
        assert!(backend.stream_released());
        assert_eq!(backend.sent().len(), 1);
    }

    #[tokio::test]
    async fn dropping_a_hanging_stream_releases_it() {
        let backend = MockBackend::new().with_stream("chat", vec![Chunk::text("a"), Chunk::Hang]);
        let mut body = backend.stream(&request()).await.unwrap();
        assert!(body.next().await.is_some());
        assert!(!backend.stream_released());
        drop(body);
        assert!(backend.stream_released());
    }
}
