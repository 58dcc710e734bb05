//! OpenAI Assistants API (v2) client.
//!
//! A reply is produced in four steps: append the user message to the thread,
//! start a run of the configured assistant, poll the run until it settles, and
//! read the newest message that run wrote.

use super::{Assistant, ConversationSession, RunStatus};
use crate::error::{CapabilityError, ServiceError};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use dashmap::DashMap;
use reqwest::{Client, Method, RequestBuilder};
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

const TOOL_NAME: &str = "openai-assistant";

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub base_url: String,
    pub api_key: Secret<String>,
    pub assistant_id: String,
    pub thread_id: String,
    /// Delay between run status checks.
    pub poll_interval: Duration,
    /// Upper bound for a whole run, from creation to a terminal state.
    pub run_timeout: Duration,
    /// Upper bound for a single HTTP call.
    pub request_timeout: Duration,
    /// How long transient failures of read-only calls are retried.
    pub retry_window: Duration,
}

pub struct OpenAiAssistant {
    client: Client,
    settings: OpenAiSettings,
    thread_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Exclusive use of one conversation thread. The thread's lock is forgotten
/// once nobody holds or waits for it.
struct ThreadLease<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    thread_id: &'a str,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ThreadLease<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(self.thread_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[derive(Debug, Serialize)]
struct CreateMessageRequest<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateRunRequest<'a> {
    assistant_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessageObject {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: TextContent },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct TextContent {
    value: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<MessageObject>,
}

#[derive(Debug, Deserialize)]
struct RunObject {
    id: String,
    status: RunStatus,
    #[serde(default)]
    last_error: Option<RunError>,
    #[serde(default)]
    incomplete_details: Option<IncompleteDetails>,
}

#[derive(Debug, Deserialize)]
struct RunError {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct IncompleteDetails {
    #[serde(default)]
    reason: Option<String>,
}

impl OpenAiAssistant {
    pub fn new(settings: OpenAiSettings) -> Result<Self, CapabilityError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()?;

        Ok(Self {
            client,
            settings,
            thread_locks: Arc::new(DashMap::new()),
        })
    }

    /// Waits until no other request is using `thread_id`.
    async fn lease<'a>(&'a self, thread_id: &'a str) -> ThreadLease<'a> {
        let lock = self
            .thread_locks
            .entry(thread_id.to_string())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;
        ThreadLease {
            locks: &self.thread_locks,
            thread_id,
            guard: Some(guard),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(self.settings.api_key.expose_secret())
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, CapabilityError> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Api {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| CapabilityError::MalformedOutput {
                tool: TOOL_NAME.to_string(),
                reason: e.to_string(),
            })
    }

    /// Retries transient failures of idempotent calls with exponential backoff.
    async fn with_retry<T, F, Fut>(&self, mut operation: F) -> Result<T, CapabilityError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CapabilityError>>,
    {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
            max_elapsed_time: Some(self.settings.retry_window),
            ..Default::default()
        };

        backoff::future::retry(policy, || {
            let attempt = operation();
            async move {
                attempt.await.map_err(|e| {
                    if e.is_retryable() {
                        tracing::warn!(error = %e, "Assistant API call failed, retrying");
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        })
        .await
    }

    async fn add_message(&self, thread_id: &str, text: &str) -> Result<(), CapabilityError> {
        let request = self
            .request(Method::POST, &format!("threads/{}/messages", thread_id))
            .json(&CreateMessageRequest {
                role: "user",
                content: text,
            });
        Self::send::<serde_json::Value>(request).await?;
        Ok(())
    }

    async fn create_run(&self, thread_id: &str) -> Result<RunObject, CapabilityError> {
        let request = self
            .request(Method::POST, &format!("threads/{}/runs", thread_id))
            .json(&CreateRunRequest {
                assistant_id: &self.settings.assistant_id,
            });
        Self::send(request).await
    }

    async fn fetch_run(&self, thread_id: &str, run_id: &str) -> Result<RunObject, CapabilityError> {
        let path = format!("threads/{}/runs/{}", thread_id, run_id);
        self.with_retry(|| Self::send(self.request(Method::GET, &path)))
            .await
    }

    /// Best effort: a run that cannot be cancelled expires on its own.
    async fn cancel_run(&self, thread_id: &str, run_id: &str) {
        let request = self.request(
            Method::POST,
            &format!("threads/{}/runs/{}/cancel", thread_id, run_id),
        );
        if let Err(e) = Self::send::<serde_json::Value>(request).await {
            tracing::warn!(thread_id = %thread_id, run_id = %run_id, error = %e, "Failed to cancel assistant run");
        }
    }

    async fn wait_for_run(&self, thread_id: &str, run: RunObject) -> Result<RunObject, ServiceError> {
        let run_id = run.id.clone();

        let polled = tokio::time::timeout(self.settings.run_timeout, async {
            let mut run = run;
            while !run.status.is_terminal() {
                tokio::time::sleep(self.settings.poll_interval).await;
                run = self.fetch_run(thread_id, &run.id).await?;
                tracing::debug!(thread_id = %thread_id, run_id = %run.id, status = %run.status, "Polled assistant run");
            }
            Ok::<_, CapabilityError>(run)
        })
        .await;

        match polled {
            Ok(result) => Ok(result?),
            Err(_) => {
                self.cancel_run(thread_id, &run_id).await;
                Err(CapabilityError::Timeout {
                    tool: TOOL_NAME.to_string(),
                    timeout: self.settings.run_timeout,
                }
                .into())
            }
        }
    }

    async fn run_reply(&self, thread_id: &str, run_id: &str) -> Result<String, ServiceError> {
        let path = format!("threads/{}/messages", thread_id);
        let messages: MessageList = self
            .with_retry(|| {
                Self::send(self.request(Method::GET, &path).query(&[
                    ("order", "desc"),
                    ("limit", "1"),
                    ("run_id", run_id),
                ]))
            })
            .await?;

        let block = messages
            .data
            .into_iter()
            .next()
            .and_then(|message| message.content.into_iter().next());

        match block {
            Some(ContentBlock::Text { text }) => Ok(text.value),
            Some(ContentBlock::Other) => Err(ServiceError::RunOutcome {
                run_id: run_id.to_string(),
                status: RunStatus::Completed,
                detail: "the reply does not start with a text block".to_string(),
            }),
            None => Err(ServiceError::RunOutcome {
                run_id: run_id.to_string(),
                status: RunStatus::Completed,
                detail: "the run produced no message".to_string(),
            }),
        }
    }
}

#[async_trait]
impl Assistant for OpenAiAssistant {
    fn default_session(&self) -> ConversationSession {
        ConversationSession::new(self.settings.thread_id.clone())
    }

    async fn reply(
        &self,
        session: &ConversationSession,
        message: &str,
    ) -> Result<String, ServiceError> {
        let thread_id = session.thread_id.as_str();
        if !ConversationSession::is_valid_thread_id(thread_id) {
            return Err(ServiceError::InvalidDocument(format!(
                "invalid thread id `{}`",
                thread_id
            )));
        }

        // A thread accepts no new messages while one of its runs is active,
        // and "newest message" is only meaningful with one writer at a time.
        let _lease = self.lease(thread_id).await;

        self.add_message(thread_id, message).await?;
        let run = self.create_run(thread_id).await?;
        tracing::info!(thread_id = %thread_id, run_id = %run.id, "Assistant run started");

        let run = self.wait_for_run(thread_id, run).await?;
        tracing::info!(thread_id = %thread_id, run_id = %run.id, status = %run.status, "Assistant run settled");

        match run.status {
            RunStatus::Completed => self.run_reply(thread_id, &run.id).await,
            RunStatus::RequiresAction => {
                self.cancel_run(thread_id, &run.id).await;
                Err(ServiceError::RunOutcome {
                    run_id: run.id,
                    status: RunStatus::RequiresAction,
                    detail: "the assistant requested tool outputs, which this service does not provide"
                        .to_string(),
                })
            }
            RunStatus::Failed => {
                let detail = run
                    .last_error
                    .map(|e| match e.code {
                        Some(code) => format!("{}: {}", code, e.message),
                        None => e.message,
                    })
                    .unwrap_or_else(|| "no error reported".to_string());
                Err(ServiceError::RunOutcome {
                    run_id: run.id,
                    status: RunStatus::Failed,
                    detail,
                })
            }
            status => {
                let detail = run
                    .incomplete_details
                    .and_then(|d| d.reason)
                    .unwrap_or_else(|| "the run did not complete".to_string());
                Err(ServiceError::RunOutcome {
                    run_id: run.id,
                    status,
                    detail,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    const THREAD: &str = "thread_abc";

    fn settings(base_url: String) -> OpenAiSettings {
        OpenAiSettings {
            base_url,
            api_key: Secret::new("sk-test".to_string()),
            assistant_id: "asst_123".to_string(),
            thread_id: THREAD.to_string(),
            poll_interval: Duration::from_millis(10),
            run_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            retry_window: Duration::from_secs(2),
        }
    }

    async fn mount_message_and_run(server: &MockServer, initial_status: &str) {
        Mock::given(method("POST"))
            .and(path(format!("/threads/{}/messages", THREAD)))
            .and(header("authorization", "Bearer sk-test"))
            .and(header("openai-beta", "assistants=v2"))
            .and(body_json(json!({"role": "user", "content": "Describe a Person class"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg_user"})))
            .expect(1)
            .mount(server)
            .await;

        Mock::given(method("POST"))
            .and(path(format!("/threads/{}/runs", THREAD)))
            .and(body_json(json!({"assistant_id": "asst_123"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "run_1", "status": initial_status})),
            )
            .expect(1)
            .mount(server)
            .await;
    }

    fn reply_list(text: &str) -> serde_json::Value {
        json!({
            "data": [{
                "id": "msg_reply",
                "role": "assistant",
                "content": [{"type": "text", "text": {"value": text, "annotations": []}}]
            }]
        })
    }

    #[tokio::test]
    async fn test_completed_run_returns_first_text_block() {
        let server = MockServer::start().await;
        mount_message_and_run(&server, "queued").await;

        Mock::given(method("GET"))
            .and(path(format!("/threads/{}/runs/run_1", THREAD)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "run_1", "status": "in_progress"})),
            )
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/threads/{}/runs/run_1", THREAD)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "run_1", "status": "completed"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/threads/{}/messages", THREAD)))
            .and(query_param("run_id", "run_1"))
            .and(query_param("order", "desc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_list("class Person(BaseModel): ...")))
            .mount(&server)
            .await;

        let assistant = OpenAiAssistant::new(settings(server.uri())).unwrap();
        let reply = assistant
            .reply(&assistant.default_session(), "Describe a Person class")
            .await
            .unwrap();

        assert_eq!(reply, "class Person(BaseModel): ...");
    }

    #[tokio::test]
    async fn test_failed_run_reports_last_error() {
        let server = MockServer::start().await;
        mount_message_and_run(&server, "queued").await;

        Mock::given(method("GET"))
            .and(path(format!("/threads/{}/runs/run_1", THREAD)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "run_1",
                "status": "failed",
                "last_error": {"code": "rate_limit_exceeded", "message": "Quota exhausted"}
            })))
            .mount(&server)
            .await;

        let assistant = OpenAiAssistant::new(settings(server.uri())).unwrap();
        let err = assistant
            .reply(&assistant.default_session(), "Describe a Person class")
            .await
            .unwrap_err();

        match err {
            ServiceError::RunOutcome { status, detail, .. } => {
                assert_eq!(status, RunStatus::Failed);
                assert_eq!(detail, "rate_limit_exceeded: Quota exhausted");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_requires_action_cancels_the_run() {
        let server = MockServer::start().await;
        mount_message_and_run(&server, "requires_action").await;

        Mock::given(method("POST"))
            .and(path(format!("/threads/{}/runs/run_1/cancel", THREAD)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "run_1", "status": "cancelling"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let assistant = OpenAiAssistant::new(settings(server.uri())).unwrap();
        let err = assistant
            .reply(&assistant.default_session(), "Describe a Person class")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ServiceError::RunOutcome {
                status: RunStatus::RequiresAction,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_run_that_never_settles_times_out_and_is_cancelled() {
        let server = MockServer::start().await;
        mount_message_and_run(&server, "queued").await;

        Mock::given(method("GET"))
            .and(path(format!("/threads/{}/runs/run_1", THREAD)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "run_1", "status": "in_progress"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/threads/{}/runs/run_1/cancel", THREAD)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let mut settings = settings(server.uri());
        settings.run_timeout = Duration::from_millis(200);
        let assistant = OpenAiAssistant::new(settings).unwrap();

        let err = assistant
            .reply(&assistant.default_session(), "Describe a Person class")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ServiceError::Capability(CapabilityError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_transient_poll_failure_is_retried() {
        let server = MockServer::start().await;
        mount_message_and_run(&server, "queued").await;

        Mock::given(method("GET"))
            .and(path(format!("/threads/{}/runs/run_1", THREAD)))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/threads/{}/runs/run_1", THREAD)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "run_1", "status": "completed"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/threads/{}/messages", THREAD)))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_list("done")))
            .mount(&server)
            .await;

        let assistant = OpenAiAssistant::new(settings(server.uri())).unwrap();
        let reply = assistant
            .reply(&assistant.default_session(), "Describe a Person class")
            .await
            .unwrap();

        assert_eq!(reply, "done");
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(format!("/threads/{}/messages", THREAD)))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .expect(1)
            .mount(&server)
            .await;

        let assistant = OpenAiAssistant::new(settings(server.uri())).unwrap();
        let err = assistant
            .reply(&assistant.default_session(), "Describe a Person class")
            .await
            .unwrap_err();

        match err {
            ServiceError::Capability(CapabilityError::Api { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid api key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_completed_run_without_text_is_an_outcome_error() {
        let server = MockServer::start().await;
        mount_message_and_run(&server, "completed").await;

        Mock::given(method("GET"))
            .and(path(format!("/threads/{}/messages", THREAD)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "m", "content": [{"type": "image_file", "image_file": {"file_id": "f"}}]}]
            })))
            .mount(&server)
            .await;

        let assistant = OpenAiAssistant::new(settings(server.uri())).unwrap();
        let err = assistant
            .reply(&assistant.default_session(), "Describe a Person class")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ServiceError::RunOutcome {
                status: RunStatus::Completed,
                ..
            }
        ));
    }

    /// Every thread accepts messages and starts `run_<thread>`, which reports
    /// `completed` after `settle_delay`.
    async fn mount_any_thread(server: &MockServer, settle_delay: Duration) {
        Mock::given(method("POST"))
            .and(path_regex(r"^/threads/[^/]+/messages$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg_user"})))
            .mount(server)
            .await;
        for thread in ["thread_a", "thread_b"] {
            Mock::given(method("POST"))
                .and(path(format!("/threads/{}/runs", thread)))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({"id": format!("run_{}", thread), "status": "queued"})),
                )
                .mount(server)
                .await;
            Mock::given(method("GET"))
                .and(path(format!("/threads/{}/runs/run_{}", thread, thread)))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({"id": format!("run_{}", thread), "status": "completed"}))
                        .set_delay(settle_delay),
                )
                .mount(server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path_regex(r"^/threads/[^/]+/messages$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_list("ok")))
            .mount(server)
            .await;
    }

    fn positions(requests: &[Request], verb: &str, request_path: &str) -> Vec<usize> {
        requests
            .iter()
            .enumerate()
            .filter(|(_, r)| r.method.to_string() == verb && r.url.path() == request_path)
            .map(|(i, _)| i)
            .collect()
    }

    #[tokio::test]
    async fn test_replies_on_one_thread_are_serialized() {
        let server = MockServer::start().await;
        mount_any_thread(&server, Duration::from_millis(200)).await;

        let assistant = OpenAiAssistant::new(settings(server.uri())).unwrap();
        let session = ConversationSession::new("thread_a");

        let (first, second) = tokio::join!(
            assistant.reply(&session, "first"),
            assistant.reply(&session, "second"),
        );
        assert_eq!(first.unwrap(), "ok");
        assert_eq!(second.unwrap(), "ok");

        let requests = server.received_requests().await.unwrap();
        let posts = positions(&requests, "POST", "/threads/thread_a/messages");
        let reads = positions(&requests, "GET", "/threads/thread_a/messages");
        assert_eq!(posts.len(), 2);
        assert_eq!(reads.len(), 2);
        // The second message is only posted after the first run's reply was read.
        assert!(reads[0] < posts[1], "requests arrived out of order: {:?}", posts);
        assert!(assistant.thread_locks.is_empty());
    }

    #[tokio::test]
    async fn test_replies_on_different_threads_run_concurrently() {
        let server = MockServer::start().await;
        let settle_delay = Duration::from_millis(400);
        mount_any_thread(&server, settle_delay).await;

        let assistant = OpenAiAssistant::new(settings(server.uri())).unwrap();
        let a = ConversationSession::new("thread_a");
        let b = ConversationSession::new("thread_b");

        let started = std::time::Instant::now();
        let (first, second) = tokio::join!(assistant.reply(&a, "first"), assistant.reply(&b, "second"));
        let elapsed = started.elapsed();

        assert_eq!(first.unwrap(), "ok");
        assert_eq!(second.unwrap(), "ok");
        assert!(elapsed < settle_delay * 2, "threads were serialized: {:?}", elapsed);

        let requests = server.received_requests().await.unwrap();
        let a_read = positions(&requests, "GET", "/threads/thread_a/messages");
        let b_post = positions(&requests, "POST", "/threads/thread_b/messages");
        assert!(b_post[0] < a_read[0]);
    }

    #[tokio::test]
    async fn test_thread_locks_are_released_after_use() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/threads/[^/]+/messages$"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let assistant = OpenAiAssistant::new(settings(server.uri())).unwrap();
        for n in 0..50 {
            let session = ConversationSession::new(format!("thread_{}", n));
            assistant.reply(&session, "hello").await.unwrap_err();
        }

        assert!(assistant.thread_locks.is_empty());
    }

    #[tokio::test]
    async fn test_thread_id_outside_path_alphabet_is_never_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "x"})))
            .expect(0)
            .mount(&server)
            .await;

        let assistant = OpenAiAssistant::new(settings(server.uri())).unwrap();
        let err = assistant
            .reply(&ConversationSession::new("../files"), "hello")
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::InvalidDocument(_)));
        assert!(assistant.thread_locks.is_empty());
    }
}
