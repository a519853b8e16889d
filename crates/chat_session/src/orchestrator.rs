use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use agent_api::{AgentApiClient, AgentApiError, MessageKind, MessageRecord};
use agent_stream::{RunStream, StreamCallbacks, StreamStatus, TransportManager};

use crate::error::SessionError;

/// Local ids for not-yet-persisted messages carry this prefix.
pub const OPTIMISTIC_ID_PREFIX: &str = "optimistic-";

/// Thread and run operations the session needs from the backend.
#[async_trait]
pub trait SessionBackend: Send + Sync + 'static {
    async fn create_thread(&self) -> Result<String, AgentApiError>;
    async fn post_user_message(
        &self,
        thread_id: &str,
        text: &str,
    ) -> Result<MessageRecord, AgentApiError>;
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<MessageRecord>, AgentApiError>;
    async fn start_run(&self, thread_id: &str) -> Result<String, AgentApiError>;
}

#[async_trait]
impl SessionBackend for AgentApiClient {
    async fn create_thread(&self) -> Result<String, AgentApiError> {
        AgentApiClient::create_thread(self).await
    }

    async fn post_user_message(
        &self,
        thread_id: &str,
        text: &str,
    ) -> Result<MessageRecord, AgentApiError> {
        AgentApiClient::post_user_message(self, thread_id, text).await
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<MessageRecord>, AgentApiError> {
        AgentApiClient::list_messages(self, thread_id).await
    }

    async fn start_run(&self, thread_id: &str) -> Result<String, AgentApiError> {
        AgentApiClient::start_run(self, thread_id).await
    }
}

struct Shared {
    backend: Arc<dyn SessionBackend>,
    thread_id: Mutex<Option<String>>,
    messages: Mutex<Vec<MessageRecord>>,
}

impl Shared {
    fn lock_messages(&self) -> MutexGuard<'_, Vec<MessageRecord>> {
        self.messages.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_thread(&self) -> MutexGuard<'_, Option<String>> {
        self.thread_id.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove_message(&self, message_id: &str) {
        self.lock_messages().retain(|m| m.message_id != message_id);
    }

    /// Fetch the durable list and replace local state wholesale. The
    /// single point-of-truth reconciliation after a run ends.
    async fn reconcile(&self) {
        let thread_id = match self.lock_thread().clone() {
            Some(id) => id,
            None => return,
        };
        match self.backend.list_messages(&thread_id).await {
            Ok(durable) => *self.lock_messages() = durable,
            Err(error) => {
                tracing::warn!(%thread_id, %error, "message reconciliation failed");
            }
        }
    }
}

/// Replace an existing entry with the same id, or append.
fn upsert(messages: &mut Vec<MessageRecord>, record: MessageRecord) {
    match messages
        .iter_mut()
        .find(|m| m.message_id == record.message_id)
    {
        Some(slot) => *slot = record,
        None => messages.push(record),
    }
}

fn optimistic_record(text: &str) -> MessageRecord {
    MessageRecord {
        message_id: format!("{OPTIMISTIC_ID_PREFIX}{}", Uuid::new_v4()),
        thread_id: String::new(),
        kind: MessageKind::User,
        content: Value::String(text.to_string()),
        created_at: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default(),
    }
}

/// Binds one conversation thread to at most one active run.
///
/// Sends append optimistically and roll back on failure; stream
/// messages land by id-keyed upsert; terminal statuses trigger a
/// wholesale refresh from the durable list.
pub struct ChatSession {
    shared: Arc<Shared>,
    stream: RunStream,
}

impl ChatSession {
    /// Build a session over `backend`, streaming through `manager`.
    /// Consumer callbacks fire after the session has applied each event
    /// to its local state. Must be called from within a tokio runtime.
    pub fn new(
        backend: Arc<dyn SessionBackend>,
        manager: TransportManager,
        mut callbacks: StreamCallbacks,
    ) -> Self {
        let shared = Arc::new(Shared {
            backend,
            thread_id: Mutex::new(None),
            messages: Mutex::new(Vec::new()),
        });

        let on_message = {
            let shared = Arc::clone(&shared);
            let mut forward = callbacks.on_message;
            Box::new(move |record: MessageRecord| {
                upsert(&mut shared.lock_messages(), record.clone());
                forward(record);
            })
        };
        let on_close = {
            let shared = Arc::clone(&shared);
            let mut forward = callbacks.on_close;
            Box::new(move |status: StreamStatus| {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move { shared.reconcile().await });
                forward(status);
            })
        };
        callbacks.on_message = on_message;
        callbacks.on_close = on_close;

        let stream = RunStream::new(manager, callbacks);
        Self { shared, stream }
    }

    pub fn stream(&self) -> &RunStream {
        &self.stream
    }

    pub fn thread_id(&self) -> Option<String> {
        self.shared.lock_thread().clone()
    }

    pub fn messages(&self) -> Vec<MessageRecord> {
        self.shared.lock_messages().clone()
    }

    /// Refresh local state from the durable message list.
    pub async fn reconcile(&self) {
        self.shared.reconcile().await;
    }

    /// Send one user message and begin streaming the run it starts.
    ///
    /// The message appears in local state immediately under a
    /// provisional id. Persistence failure or a billing-rejected start
    /// rolls it back; in the billing case the run is never started.
    pub async fn send_message(&self, text: &str) -> Result<String, SessionError> {
        let optimistic = optimistic_record(text);
        let optimistic_id = optimistic.message_id.clone();
        self.shared.lock_messages().push(optimistic);

        let result = self.send_inner(text, &optimistic_id).await;
        if result.is_err() {
            self.shared.remove_message(&optimistic_id);
        }
        result
    }

    async fn send_inner(&self, text: &str, optimistic_id: &str) -> Result<String, SessionError> {
        // Clone out of the guard before awaiting; holding the thread
        // lock across create_thread would self-deadlock on the re-lock.
        let existing = self.shared.lock_thread().clone();
        let thread_id = match existing {
            Some(id) => id,
            None => {
                let created = self.shared.backend.create_thread().await?;
                *self.shared.lock_thread() = Some(created.clone());
                created
            }
        };

        // Persist and start concurrently; both finish before streaming
        // begins. A persistence failure outranks a job-start failure.
        let (persisted, started) = tokio::join!(
            self.shared.backend.post_user_message(&thread_id, text),
            self.shared.backend.start_run(&thread_id),
        );
        let persisted = persisted.map_err(SessionError::Persistence)?;
        let run_id = started.map_err(SessionError::from_job_start)?;

        {
            let mut messages = self.shared.lock_messages();
            messages.retain(|m| m.message_id != optimistic_id);
            upsert(&mut messages, persisted);
        }

        self.stream.start_streaming(&run_id);
        Ok(run_id)
    }

    /// Stop the active run, if any.
    pub fn stop(&self) {
        self.stream.stop_streaming();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::json;

    use agent_api::{ByteStream, RunStatus};
    use agent_stream::{AgentBackend, TransportKind};

    use super::*;

    #[derive(Default)]
    struct FakeBackend {
        fail_persist: AtomicBool,
        billing_reject: AtomicBool,
        durable: Mutex<Vec<MessageRecord>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeBackend {
        fn record(&self, call: &str) {
            self.calls.lock().expect("calls lock").push(call.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl SessionBackend for FakeBackend {
        async fn create_thread(&self) -> Result<String, AgentApiError> {
            self.record("create_thread");
            Ok("th-1".to_string())
        }

        async fn post_user_message(
            &self,
            thread_id: &str,
            text: &str,
        ) -> Result<MessageRecord, AgentApiError> {
            self.record("post_user_message");
            if self.fail_persist.load(Ordering::SeqCst) {
                return Err(AgentApiError::Unknown("persist down".to_string()));
            }
            let record = MessageRecord {
                message_id: "m-user-1".to_string(),
                thread_id: thread_id.to_string(),
                kind: MessageKind::User,
                content: Value::String(text.to_string()),
                created_at: String::new(),
            };
            self.durable.lock().expect("durable lock").push(record.clone());
            Ok(record)
        }

        async fn list_messages(
            &self,
            _thread_id: &str,
        ) -> Result<Vec<MessageRecord>, AgentApiError> {
            self.record("list_messages");
            Ok(self.durable.lock().expect("durable lock").clone())
        }

        async fn start_run(&self, _thread_id: &str) -> Result<String, AgentApiError> {
            self.record("start_run");
            if self.billing_reject.load(Ordering::SeqCst) {
                return Err(AgentApiError::Billing {
                    message: "upgrade required".to_string(),
                });
            }
            Ok("run-1".to_string())
        }
    }

    // Streaming side of the fake: the run is already over, so any
    // connection attempt resolves without opening a transport.
    #[async_trait]
    impl AgentBackend for FakeBackend {
        async fn run_status(&self, _run_id: &str) -> Result<RunStatus, AgentApiError> {
            Ok(RunStatus::Completed)
        }

        async fn open_stream(
            &self,
            _run_id: &str,
            _kind: TransportKind,
        ) -> Result<ByteStream, AgentApiError> {
            Err(AgentApiError::Unknown("no stream in this fake".to_string()))
        }

        async fn stop_run(&self, _run_id: &str) -> Result<(), AgentApiError> {
            Ok(())
        }
    }

    fn session_over(backend: Arc<FakeBackend>) -> ChatSession {
        let manager = TransportManager::new(backend.clone(), TransportKind::Push);
        ChatSession::new(backend, manager, StreamCallbacks::noop())
    }

    #[tokio::test]
    async fn first_send_creates_thread_and_supersedes_optimistic() {
        let backend = Arc::new(FakeBackend::default());
        let session = session_over(Arc::clone(&backend));

        let run_id = session.send_message("hello").await.expect("send succeeds");
        assert_eq!(run_id, "run-1");
        assert_eq!(session.thread_id().as_deref(), Some("th-1"));

        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_id, "m-user-1");
        assert!(!messages[0].message_id.starts_with(OPTIMISTIC_ID_PREFIX));

        let calls = backend.calls();
        assert_eq!(calls[0], "create_thread");
        assert!(calls.contains(&"post_user_message".to_string()));
        assert!(calls.contains(&"start_run".to_string()));
    }

    #[tokio::test]
    async fn second_send_reuses_the_existing_thread() {
        let backend = Arc::new(FakeBackend::default());
        let session = session_over(Arc::clone(&backend));

        session.send_message("one").await.expect("first send");
        session.send_message("two").await.expect("second send");

        let creates = backend
            .calls()
            .iter()
            .filter(|call| call.as_str() == "create_thread")
            .count();
        assert_eq!(creates, 1);
        assert_eq!(session.thread_id().as_deref(), Some("th-1"));
    }

    #[tokio::test]
    async fn persistence_failure_rolls_back_optimistic() {
        let backend = Arc::new(FakeBackend::default());
        backend.fail_persist.store(true, Ordering::SeqCst);
        let session = session_over(Arc::clone(&backend));

        let error = session.send_message("hello").await.expect_err("must fail");
        assert!(matches!(error, SessionError::Persistence(_)));
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn billing_rejection_rolls_back_and_is_distinct() {
        let backend = Arc::new(FakeBackend::default());
        backend.billing_reject.store(true, Ordering::SeqCst);
        let session = session_over(Arc::clone(&backend));

        let error = session.send_message("hello").await.expect_err("must fail");
        assert!(error.is_billing());
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn reconcile_replaces_local_state_wholesale() {
        let backend = Arc::new(FakeBackend::default());
        let session = session_over(Arc::clone(&backend));
        session.send_message("hello").await.expect("send succeeds");

        backend.durable.lock().expect("durable lock").push(MessageRecord {
            message_id: "m-assistant-1".to_string(),
            thread_id: "th-1".to_string(),
            kind: MessageKind::Assistant,
            content: json!("Hello back"),
            created_at: String::new(),
        });

        session.reconcile().await;
        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].message_id, "m-assistant-1");
    }

    #[test]
    fn upsert_replaces_by_id_and_appends_new() {
        let mut messages = vec![MessageRecord {
            message_id: "a".to_string(),
            thread_id: String::new(),
            kind: MessageKind::User,
            content: json!("one"),
            created_at: String::new(),
        }];

        upsert(
            &mut messages,
            MessageRecord {
                message_id: "a".to_string(),
                thread_id: String::new(),
                kind: MessageKind::User,
                content: json!("replaced"),
                created_at: String::new(),
            },
        );
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, json!("replaced"));

        upsert(
            &mut messages,
            MessageRecord {
                message_id: "b".to_string(),
                thread_id: String::new(),
                kind: MessageKind::Assistant,
                content: json!("two"),
                created_at: String::new(),
            },
        );
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn optimistic_ids_carry_the_provisional_prefix() {
        let record = optimistic_record("hi");
        assert!(record.message_id.starts_with(OPTIMISTIC_ID_PREFIX));
        assert_eq!(record.kind, MessageKind::User);
        assert_eq!(record.content, json!("hi"));
    }
}
