//! Streaming relay between the browser and the model provider.
//!
//! A turn is split in two halves. [`Relay::submit_turn`] validates the
//! request and resolves (or creates) the chat so the id is known before the
//! response starts. The rest runs on its own task: it persists the user
//! message, pumps upstream chunks into a bounded channel while accumulating
//! them, and persists the assistant reply only once the upstream stream has
//! completed cleanly. The task keeps draining upstream after the client goes
//! away so a finished reply is never lost.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::Config;
use crate::entities::{Chat, ChatStore, Message, MessageRole, MessageStore};
use crate::error::ServerError;
use crate::provider::{ErrorCategory, GeneratedImage, ModelProvider, PromptMessage, ProviderError};

#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Longest wait for the next upstream chunk before the turn fails.
    pub idle_timeout: Duration,
    /// Capacity of the channel feeding the response body.
    pub buffer: usize,
    pub max_message_bytes: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(45),
            buffer: 32,
            max_message_bytes: 128 * 1024,
        }
    }
}

impl RelayOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            idle_timeout: config.stream_idle_timeout,
            buffer: config.stream_buffer.max(1),
            max_message_bytes: config.max_message_bytes,
        }
    }
}

/// What the client sees, in order: any number of `Content`, then exactly one
/// of `Done` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Content(String),
    Done,
    /// Carries the user-facing message for the failure category.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub history: Vec<PromptMessage>,
    pub message: String,
    pub chat_id: Option<String>,
}

/// How a turn ended, as seen by the background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed { assistant_saved: bool },
    Failed(ErrorCategory),
}

pub struct TurnStream {
    pub chat_id: String,
    pub events: ReceiverStream<RelayEvent>,
    /// Resolves once the reply is persisted (or the turn failed). Dropping
    /// it does not cancel the turn.
    pub handle: JoinHandle<TurnOutcome>,
}

pub struct Relay<S> {
    store: Arc<S>,
    provider: Arc<dyn ModelProvider>,
    options: RelayOptions,
}

impl<S> Relay<S>
where
    S: ChatStore + MessageStore,
{
    pub fn new(store: Arc<S>, provider: Arc<dyn ModelProvider>, options: RelayOptions) -> Self {
        Self {
            store,
            provider,
            options,
        }
    }

    /// Start a turn. Returns once the chat id is settled; the reply streams
    /// through [`TurnStream::events`].
    pub async fn submit_turn(&self, request: TurnRequest) -> Result<TurnStream, ServerError> {
        validate_text("message", &request.message, self.options.max_message_bytes)?;

        let chat_id = self.resolve_chat(request.chat_id.as_deref()).await?;

        let mut prompt = request.history;
        prompt.push(PromptMessage::user(request.message.clone()));

        let (tx, rx) = mpsc::channel(self.options.buffer);
        let turn = Turn {
            store: Arc::clone(&self.store),
            provider: Arc::clone(&self.provider),
            chat_id: chat_id.clone(),
            idle_timeout: self.options.idle_timeout,
            tx,
        };
        let span = info_span!("turn", chat_id = %chat_id);
        let handle = tokio::spawn(turn.run(request.message, prompt).instrument(span));

        Ok(TurnStream {
            chat_id,
            events: ReceiverStream::new(rx),
            handle,
        })
    }

    /// Single-shot image generation inside an existing chat.
    pub async fn generate_image(
        &self,
        prompt: &str,
        chat_id: &str,
    ) -> Result<GeneratedImage, ServerError> {
        validate_text("prompt", prompt, self.options.max_message_bytes)?;
        if chat_id.trim().is_empty() {
            return Err(ServerError::BadRequest("chatId is required".into()));
        }
        if self.store.get_chat(chat_id).await?.is_none() {
            return Err(ServerError::NotFound(format!("chat {chat_id} not found")));
        }

        let user = Message::image(chat_id, MessageRole::User, prompt, None);
        persist_best_effort(self.store.as_ref(), user).await;

        let image = self.provider.generate_image(prompt).await?;
        info!(chat_id, inline = image.url.starts_with("data:"), "image generated");

        let caption = format!("Here is the image for: {prompt}");
        let assistant = Message::image(
            chat_id,
            MessageRole::Assistant,
            caption,
            Some(image.url.clone()),
        );
        persist_best_effort(self.store.as_ref(), assistant).await;

        Ok(image)
    }

    async fn resolve_chat(&self, requested: Option<&str>) -> Result<String, ServerError> {
        match requested.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => match self.store.get_chat(id).await? {
                Some(chat) => Ok(chat.id),
                None => Err(ServerError::NotFound(format!("chat {id} not found"))),
            },
            None => {
                let chat = Chat::new();
                let id = chat.id.clone();
                self.store.create_chat(chat).await?;
                info!(chat_id = %id, "created chat");
                Ok(id)
            }
        }
    }
}

fn validate_text(field: &str, value: &str, max_bytes: usize) -> Result<(), ServerError> {
    if value.trim().is_empty() {
        return Err(ServerError::BadRequest(format!("{field} must not be empty")));
    }
    if value.len() > max_bytes {
        return Err(ServerError::BadRequest(format!(
            "{field} exceeds {max_bytes} bytes"
        )));
    }
    Ok(())
}

/// Write a message without failing the caller. Returns whether it stuck.
///
/// User-message failures log at `warn`, assistant-message failures at `error`.
async fn persist_best_effort<S: MessageStore>(store: &S, message: Message) -> bool {
    let role = message.role;
    let message_id = message.id.clone();
    let chat_id = message.chat_id.clone();
    match store.append_message(message).await {
        Ok(()) => true,
        Err(e) => {
            match role {
                MessageRole::User => {
                    warn!(%chat_id, %message_id, error = %e, "failed to persist user message")
                }
                MessageRole::Assistant => {
                    error!(%chat_id, %message_id, error = %e, "failed to persist assistant message")
                }
            }
            false
        }
    }
}

struct Turn<S> {
    store: Arc<S>,
    provider: Arc<dyn ModelProvider>,
    chat_id: String,
    idle_timeout: Duration,
    tx: mpsc::Sender<RelayEvent>,
}

impl<S: MessageStore> Turn<S> {
    async fn run(self, message: String, prompt: Vec<PromptMessage>) -> TurnOutcome {
        let user = Message::text(&self.chat_id, MessageRole::User, message);
        persist_best_effort(self.store.as_ref(), user).await;

        // Opening counts against the same deadline as every later chunk.
        let opened = tokio::time::timeout(self.idle_timeout, self.provider.stream_chat(prompt));
        let mut upstream = match opened.await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return self.fail(e, 0).await,
            Err(_) => {
                let err = ProviderError::Timeout(format!(
                    "stream not opened within {}s",
                    self.idle_timeout.as_secs_f32()
                ));
                return self.fail(err, 0).await;
            }
        };

        let mut reply = String::new();
        let mut chunks = 0usize;
        let mut forwarding = true;
        loop {
            let next = match tokio::time::timeout(self.idle_timeout, upstream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    let err = ProviderError::Timeout(format!(
                        "no chunk within {}s",
                        self.idle_timeout.as_secs_f32()
                    ));
                    return self.fail(err, chunks).await;
                }
            };
            match next {
                Some(Ok(chunk)) => {
                    reply.push_str(&chunk);
                    chunks += 1;
                    if forwarding && self.tx.send(RelayEvent::Content(chunk)).await.is_err() {
                        forwarding = false;
                        info!(chunks, "client disconnected; draining upstream");
                    }
                }
                Some(Err(e)) => return self.fail(e, chunks).await,
                None => break,
            }
        }

        let assistant = Message::text(&self.chat_id, MessageRole::Assistant, reply);
        let bytes = assistant.content.len();
        let assistant_saved = persist_best_effort(self.store.as_ref(), assistant).await;
        info!(chunks, bytes, assistant_saved, "turn completed");

        if forwarding {
            let _ = self.tx.send(RelayEvent::Done).await;
        }
        TurnOutcome::Completed { assistant_saved }
    }

    async fn fail(&self, err: ProviderError, chunks: usize) -> TurnOutcome {
        let category = err.category();
        error!(error = %err, %category, chunks, "upstream failed; assistant reply discarded");
        if self
            .tx
            .send(RelayEvent::Failed(category.user_message().to_owned()))
            .await
            .is_err()
        {
            debug!("client already gone; error event dropped");
        }
        TurnOutcome::Failed(category)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;
    use crate::entities::MessageKind;
    use crate::entities::memory::MemoryStore;
    use crate::provider::scripted::ScriptedProvider;
    use tracing_test::traced_test;

    fn relay(store: &Arc<MemoryStore>, provider: &Arc<ScriptedProvider>) -> Relay<MemoryStore> {
        Relay::new(
            Arc::clone(store),
            Arc::clone(provider) as Arc<dyn ModelProvider>,
            RelayOptions::default(),
        )
    }

    fn hello() -> TurnRequest {
        TurnRequest {
            history: vec![],
            message: "Hello".into(),
            chat_id: None,
        }
    }

    async fn run_to_end(turn: TurnStream) -> (Vec<RelayEvent>, TurnOutcome) {
        let events: Vec<RelayEvent> = turn.events.collect().await;
        let outcome = turn.handle.await.unwrap();
        (events, outcome)
    }

    fn content(text: &str) -> RelayEvent {
        RelayEvent::Content(text.to_owned())
    }

    #[tokio::test]
    async fn hello_creates_chat_and_stores_both_messages() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(ScriptedProvider::replying(&["Hi", " there", "!"]));

        let turn = relay(&store, &provider).submit_turn(hello()).await.unwrap();
        let chat_id = turn.chat_id.clone();
        let (events, outcome) = run_to_end(turn).await;

        assert_eq!(
            events,
            vec![content("Hi"), content(" there"), content("!"), RelayEvent::Done]
        );
        assert_eq!(outcome, TurnOutcome::Completed { assistant_saved: true });
        assert_eq!(store.chat_count(), 1);

        let stored = store.messages_for(&chat_id);
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].role, MessageRole::User);
        assert_eq!(stored[0].content, "Hello");
        assert_eq!(stored[1].role, MessageRole::Assistant);
        assert_eq!(stored[1].kind, MessageKind::Text);
        assert_eq!(stored[1].content, "Hi there!");
    }

    #[tokio::test]
    async fn failure_after_three_chunks_keeps_only_user_message() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(
            ScriptedProvider::replying(&["a", "b", "c"])
                .then_fail(ProviderError::Network("connection reset".into())),
        );

        let turn = relay(&store, &provider).submit_turn(hello()).await.unwrap();
        let chat_id = turn.chat_id.clone();
        let (events, outcome) = run_to_end(turn).await;

        assert_eq!(events.len(), 4);
        assert_eq!(&events[..3], &[content("a"), content("b"), content("c")]);
        assert_eq!(
            events[3],
            RelayEvent::Failed(ErrorCategory::Network.user_message().to_owned())
        );
        assert!(!events.contains(&RelayEvent::Done));
        assert_eq!(outcome, TurnOutcome::Failed(ErrorCategory::Network));

        let stored = store.messages_for(&chat_id);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].role, MessageRole::User);
    }

    #[tokio::test]
    async fn provider_refusing_to_open_yields_single_error_event() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(ScriptedProvider::failing_to_open(ProviderError::from_status(
            503,
            "overloaded".into(),
            None,
        )));

        let turn = relay(&store, &provider).submit_turn(hello()).await.unwrap();
        let chat_id = turn.chat_id.clone();
        let (events, outcome) = run_to_end(turn).await;

        assert_eq!(
            events,
            vec![RelayEvent::Failed(
                ErrorCategory::ServiceUnavailable.user_message().to_owned()
            )]
        );
        assert_eq!(outcome, TurnOutcome::Failed(ErrorCategory::ServiceUnavailable));
        assert_eq!(store.messages_for(&chat_id).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_upstream_times_out_without_assistant_message() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(ScriptedProvider::replying(&["partial"]).then_stall());

        let turn = relay(&store, &provider).submit_turn(hello()).await.unwrap();
        let chat_id = turn.chat_id.clone();
        let (events, outcome) = run_to_end(turn).await;

        assert_eq!(
            events,
            vec![
                content("partial"),
                RelayEvent::Failed(ErrorCategory::Timeout.user_message().to_owned()),
            ]
        );
        assert_eq!(outcome, TurnOutcome::Failed(ErrorCategory::Timeout));
        assert_eq!(store.messages_for(&chat_id).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_that_never_opens_times_out() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(ScriptedProvider::stalling_on_open());

        let turn = relay(&store, &provider).submit_turn(hello()).await.unwrap();
        let chat_id = turn.chat_id.clone();
        let (events, outcome) = run_to_end(turn).await;

        assert_eq!(
            events,
            vec![RelayEvent::Failed(
                ErrorCategory::Timeout.user_message().to_owned()
            )]
        );
        assert_eq!(outcome, TurnOutcome::Failed(ErrorCategory::Timeout));
        let stored = store.messages_for(&chat_id);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].role, MessageRole::User);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_but_steady_upstream_is_not_cut_off() {
        let store = Arc::new(MemoryStore::new());
        // Total runtime far beyond the idle timeout, every gap well under it.
        let provider = Arc::new(
            ScriptedProvider::replying(&["1", "2", "3", "4", "5"])
                .with_chunk_delay(Duration::from_secs(30)),
        );

        let turn = relay(&store, &provider).submit_turn(hello()).await.unwrap();
        let (events, outcome) = run_to_end(turn).await;

        assert_eq!(events.len(), 6);
        assert_eq!(events.last(), Some(&RelayEvent::Done));
        assert_eq!(outcome, TurnOutcome::Completed { assistant_saved: true });
    }

    #[tokio::test]
    async fn client_disconnect_still_persists_full_reply() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(
            ScriptedProvider::replying(&["one ", "two ", "three"])
                .with_chunk_delay(Duration::from_millis(5)),
        );

        let turn = relay(&store, &provider).submit_turn(hello()).await.unwrap();
        let chat_id = turn.chat_id.clone();
        drop(turn.events);
        let outcome = turn.handle.await.unwrap();

        assert_eq!(outcome, TurnOutcome::Completed { assistant_saved: true });
        let stored = store.messages_for(&chat_id);
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].content, "one two three");
    }

    #[tokio::test]
    #[traced_test]
    async fn user_message_write_failure_does_not_abort_turn() {
        let store = Arc::new(MemoryStore::new());
        store.fail_user_writes();
        let provider = Arc::new(ScriptedProvider::replying(&["ok"]));

        let turn = relay(&store, &provider).submit_turn(hello()).await.unwrap();
        let chat_id = turn.chat_id.clone();
        let (events, _) = run_to_end(turn).await;

        assert_eq!(events, vec![content("ok"), RelayEvent::Done]);
        let stored = store.messages_for(&chat_id);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].role, MessageRole::Assistant);
        assert!(logs_contain("failed to persist user message"));
    }

    #[tokio::test]
    #[traced_test]
    async fn assistant_message_write_failure_still_ends_with_done() {
        let store = Arc::new(MemoryStore::new());
        store.fail_assistant_writes();
        let provider = Arc::new(ScriptedProvider::replying(&["ok"]));

        let turn = relay(&store, &provider).submit_turn(hello()).await.unwrap();
        let (events, outcome) = run_to_end(turn).await;

        assert_eq!(events, vec![content("ok"), RelayEvent::Done]);
        assert_eq!(outcome, TurnOutcome::Completed { assistant_saved: false });
        assert!(logs_contain("failed to persist assistant message"));
    }

    #[tokio::test]
    async fn existing_chat_receives_history_and_new_message() {
        let store = Arc::new(MemoryStore::new());
        let chat = Chat::new();
        store.create_chat(chat.clone()).await.unwrap();
        let provider = Arc::new(ScriptedProvider::replying(&["4"]));

        let history = vec![
            PromptMessage::user("What is 2+2?"),
            PromptMessage {
                role: MessageRole::Assistant,
                content: "4".into(),
            },
        ];
        let turn = relay(&store, &provider)
            .submit_turn(TurnRequest {
                history: history.clone(),
                message: "And 2+2 again?".into(),
                chat_id: Some(chat.id.clone()),
            })
            .await
            .unwrap();
        assert_eq!(turn.chat_id, chat.id);
        run_to_end(turn).await;

        assert_eq!(store.chat_count(), 1);
        let mut expected = history;
        expected.push(PromptMessage::user("And 2+2 again?"));
        assert_eq!(provider.prompts(), vec![expected]);
    }

    #[tokio::test]
    async fn unknown_chat_is_rejected_before_upstream() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(ScriptedProvider::replying(&["x"]));

        let result = relay(&store, &provider)
            .submit_turn(TurnRequest {
                chat_id: Some("does-not-exist".into()),
                ..hello()
            })
            .await;

        assert!(matches!(result, Err(ServerError::NotFound(_))));
        assert!(provider.prompts().is_empty());
        assert_eq!(store.chat_count(), 0);
    }

    #[tokio::test]
    async fn blank_or_oversized_message_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(ScriptedProvider::replying(&["x"]));
        let relay = Relay::new(
            Arc::clone(&store),
            Arc::clone(&provider) as Arc<dyn ModelProvider>,
            RelayOptions {
                max_message_bytes: 8,
                ..RelayOptions::default()
            },
        );

        for message in ["", "   \n", "way more than eight bytes"] {
            let result = relay
                .submit_turn(TurnRequest {
                    message: message.into(),
                    ..hello()
                })
                .await;
            assert!(matches!(result, Err(ServerError::BadRequest(_))), "{message:?}");
        }
        assert_eq!(store.chat_count(), 0);
        assert!(provider.prompts().is_empty());
    }

    #[tokio::test]
    async fn chat_creation_failure_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        store.fail_chat_writes();
        let provider = Arc::new(ScriptedProvider::replying(&["x"]));

        let result = relay(&store, &provider).submit_turn(hello()).await;
        assert!(matches!(result, Err(ServerError::Database(_))));
        assert!(provider.prompts().is_empty());
    }

    #[tokio::test]
    async fn image_success_stores_prompt_and_url() {
        let store = Arc::new(MemoryStore::new());
        let chat = Chat::new();
        store.create_chat(chat.clone()).await.unwrap();
        let provider = Arc::new(ScriptedProvider::replying(&[]).with_image(Ok(GeneratedImage {
            url: "https://img.example/bike.png".into(),
            revised_prompt: None,
        })));

        let image = relay(&store, &provider)
            .generate_image("a red bicycle", &chat.id)
            .await
            .unwrap();
        assert_eq!(image.url, "https://img.example/bike.png");

        let stored = store.messages_for(&chat.id);
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].role, MessageRole::User);
        assert_eq!(stored[0].kind, MessageKind::Image);
        assert_eq!(stored[0].content, "a red bicycle");
        assert_eq!(stored[0].image_url, None);
        assert_eq!(stored[1].role, MessageRole::Assistant);
        assert_eq!(stored[1].kind, MessageKind::Image);
        assert_eq!(stored[1].image_url.as_deref(), Some("https://img.example/bike.png"));
        assert!(stored[1].content.contains("a red bicycle"));
    }

    #[tokio::test]
    async fn image_failure_stores_no_assistant_message() {
        let store = Arc::new(MemoryStore::new());
        let chat = Chat::new();
        store.create_chat(chat.clone()).await.unwrap();
        let provider = Arc::new(ScriptedProvider::replying(&[]).with_image(Err(
            ProviderError::RateLimited {
                message: "slow down".into(),
                retry_after: Some(2),
            },
        )));

        let result = relay(&store, &provider).generate_image("a cat", &chat.id).await;
        match result {
            Err(ServerError::Provider(e)) => assert_eq!(e.category(), ErrorCategory::RateLimited),
            other => panic!("unexpected: {other:?}"),
        }
        let stored = store.messages_for(&chat.id);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].role, MessageRole::User);
    }

    #[tokio::test]
    async fn image_requires_existing_chat_and_prompt() {
        let store = Arc::new(MemoryStore::new());
        let chat = Chat::new();
        store.create_chat(chat.clone()).await.unwrap();
        let provider = Arc::new(ScriptedProvider::replying(&[]));
        let relay = relay(&store, &provider);

        assert!(matches!(
            relay.generate_image("a cat", "missing").await,
            Err(ServerError::NotFound(_))
        ));
        assert!(matches!(
            relay.generate_image("a cat", " ").await,
            Err(ServerError::BadRequest(_))
        ));
        assert!(matches!(
            relay.generate_image("  ", &chat.id).await,
            Err(ServerError::BadRequest(_))
        ));
        assert!(provider.image_prompts().is_empty());
    }
}
