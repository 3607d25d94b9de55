//! Orchestrator facade: the only component the UI talks to.
//!
//! Each turn runs `Idle → ContextBuilt → Dispatched → Streaming →
//! Completed | Failed` on a spawned task that publishes text chunks onto a
//! channel; the caller drains it through a [`TextStream`]. The local agent
//! is preferred; if it is missing, fails to start, or fails before
//! producing any text, the turn is answered by the hosted fallback instead.
//!
//! Turns are serialized. A turn whose [`TextStream`] is dropped keeps
//! draining in the background so the next turn starts from a clean session.

pub mod prompt;

use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::agent::{Event, Locator, SessionConfig, SessionHandle, SessionManager};
use crate::config::{GlobalConfig, API_KEY_ENV};
use crate::fallback::FallbackClient;
use crate::models::context::Context;
use crate::models::conversation::ConversationTurn;
use crate::models::options::SessionOptions;
use crate::{AppError, Result};

/// Delivered when a turn completes without producing any text.
pub const NO_RESPONSE_SENTINEL: &str = "No response received from the assistant.";

/// Capacity of the per-turn text channel.
const TEXT_CHANNEL_CAPACITY: usize = 64;

/// A tool invocation reported by the agent, for audit display only.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolAudit {
    /// Tool name.
    pub tool: String,
    /// Tool input arguments.
    pub input: Map<String, Value>,
}

/// Per-turn lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// No turn running.
    Idle,
    /// Context and question serialized into a prompt.
    ContextBuilt,
    /// Prompt handed to a backend.
    Dispatched(Backend),
    /// Backend output is being forwarded.
    Streaming,
    /// Turn ended normally.
    Completed,
    /// Turn ended with an error delivered to the caller.
    Failed,
}

/// Backend serving a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Local agent subprocess.
    Agent,
    /// Hosted completion endpoint.
    Fallback,
}

type AuditSink = Arc<dyn Fn(ToolAudit) + Send + Sync>;

/// Facade choosing between the local agent and the hosted fallback.
///
/// Cheap to clone; clones share the session, history, and turn lock.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: GlobalConfig,
    options: SessionOptions,
    locator: Locator,
    manager: RwLock<Option<SessionManager>>,
    session: Mutex<Option<Arc<SessionHandle>>>,
    turn_lock: Mutex<()>,
    fallback: FallbackClient,
    history: Mutex<Vec<ConversationTurn>>,
}

impl Orchestrator {
    /// Build an orchestrator, probing for the agent executable once.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the fallback HTTP client cannot be built.
    pub fn new(config: GlobalConfig) -> Result<Self> {
        let locator = Locator::from_config(&config.agent);
        Self::with_locator(config, locator)
    }

    /// Build an orchestrator with an explicit locator.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the fallback HTTP client cannot be built.
    pub fn with_locator(config: GlobalConfig, locator: Locator) -> Result<Self> {
        let fallback = FallbackClient::new(&config.fallback, config.agent.system_prompt.clone())?;
        let manager = locator
            .resolve()
            .map(|exe| SessionManager::new(exe, SessionConfig::from_global(&config)));

        Ok(Self {
            inner: Arc::new(Inner {
                options: config.session_options(),
                config,
                locator,
                manager: RwLock::new(manager),
                session: Mutex::new(None),
                turn_lock: Mutex::new(()),
                fallback,
                history: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Whether a local agent executable was found.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inner.manager().is_some()
    }

    /// Best-effort local check that some backend has credentials.
    ///
    /// True when a fallback API key is configured, or when the agent is
    /// installed and one of its credential files (or the API key env var)
    /// is present. No network probe is made.
    #[must_use]
    pub fn auth_status(&self) -> bool {
        if self.inner.fallback.is_configured() {
            return true;
        }
        self.is_available()
            && (self
                .inner
                .config
                .agent
                .credential_paths
                .iter()
                .any(|path| path.is_file())
                || std::env::var_os(API_KEY_ENV).is_some())
    }

    /// Re-run executable discovery; returns the new availability.
    ///
    /// The current session, if any, keeps running until stopped.
    pub fn reprobe(&self) -> bool {
        let manager = self
            .inner
            .locator
            .resolve()
            .map(|exe| SessionManager::new(exe, SessionConfig::from_global(&self.inner.config)));
        let available = manager.is_some();
        if let Ok(mut slot) = self.inner.manager.write() {
            *slot = manager;
        }
        available
    }

    /// Send a message and wait for the whole reply.
    ///
    /// # Errors
    ///
    /// Returns the first error delivered by the turn (see
    /// [`send_message_streaming_with_audit`](Self::send_message_streaming_with_audit)).
    pub async fn send_message(&self, text: &str, contexts: &[Context]) -> Result<String> {
        let mut stream = self.send_message_streaming(text, contexts);
        let mut reply = String::new();
        while let Some(chunk) = stream.next().await {
            reply.push_str(&chunk?);
        }
        Ok(reply)
    }

    /// Send a message and receive the reply incrementally.
    #[must_use]
    pub fn send_message_streaming(&self, text: &str, contexts: &[Context]) -> TextStream {
        self.send_message_streaming_with_audit(text, contexts, |_| {})
    }

    /// Send a message, receive text incrementally, and report tool calls.
    ///
    /// `on_tool_use` is called for every tool the agent invokes; tool calls
    /// are never mixed into the text stream. The returned stream yields at
    /// least one item: real text, the [`NO_RESPONSE_SENTINEL`], or an error.
    /// An agent-reported failure ends the stream with
    /// [`AppError::AgentReported`].
    #[must_use]
    pub fn send_message_streaming_with_audit<F>(
        &self,
        text: &str,
        contexts: &[Context],
        on_tool_use: F,
    ) -> TextStream
    where
        F: Fn(ToolAudit) + Send + Sync + 'static,
    {
        let prompt = prompt::build_prompt(text, contexts, &self.inner.config.context);
        transition(TurnState::ContextBuilt);

        let (tx, rx) = mpsc::channel(TEXT_CHANNEL_CAPACITY);
        let sink = TextSink {
            tx,
            delivered: 0,
            caller_gone: false,
        };
        tokio::spawn(Arc::clone(&self.inner).run_turn(prompt, sink, Arc::new(on_tool_use)));

        TextStream { rx }
    }

    /// Stop the current agent session, if any. Idempotent.
    pub async fn stop_session(&self) {
        let session = self.inner.session.lock().await.take();
        if let Some(session) = session {
            session.stop().await;
        }
    }

    /// Interrupt the running agent turn.
    ///
    /// Sends a soft interrupt; if the interrupted turn is still open after
    /// `agent.interrupt_grace_seconds`, the session is stopped. A turn started
    /// after the interrupt is never affected.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the interrupt signal cannot be delivered.
    pub async fn interrupt(&self) -> Result<()> {
        let Some(session) = self.inner.session.lock().await.clone() else {
            debug!("interrupt with no session; no-op");
            return Ok(());
        };
        let turn = session.turn_seq();
        session.interrupt()?;

        let grace = Duration::from_secs(self.inner.config.agent.interrupt_grace_seconds);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if session.is_alive() && session.is_turn_open() && session.turn_seq() == turn {
                warn!(session_id = session.id(), turn, "agent ignored interrupt; stopping session");
                inner.discard_session(&session).await;
            }
        });
        Ok(())
    }

    /// Snapshot of the fallback conversation history.
    pub async fn history(&self) -> Vec<ConversationTurn> {
        self.inner.history.lock().await.clone()
    }

    /// Forget the fallback conversation history.
    pub async fn clear_history(&self) {
        self.inner.history.lock().await.clear();
    }
}

impl Inner {
    fn manager(&self) -> Option<SessionManager> {
        self.manager.read().ok().and_then(|slot| slot.clone())
    }

    async fn run_turn(self: Arc<Self>, prompt: String, mut sink: TextSink, audit: AuditSink) {
        let _turn = self.turn_lock.lock().await;

        let result = match self.run_agent_turn(&prompt, &mut sink, &audit).await {
            Err(err) if falls_back(&err) && sink.delivered == 0 && !sink.is_closed() => {
                if err.is_unavailable() {
                    info!(%err, "local agent unavailable; using fallback");
                } else {
                    warn!(%err, "agent failed before producing output; using fallback");
                }
                self.run_fallback_turn(&prompt, &mut sink).await
            }
            other => other,
        };

        match result {
            Ok(()) => {
                if sink.delivered == 0 {
                    sink.text(NO_RESPONSE_SENTINEL.to_owned()).await;
                }
                transition(TurnState::Completed);
            }
            Err(err) => {
                transition(TurnState::Failed);
                sink.fail(err).await;
            }
        }
        transition(TurnState::Idle);
    }

    async fn run_agent_turn(&self, prompt: &str, sink: &mut TextSink, audit: &AuditSink) -> Result<()> {
        let Some(manager) = self.manager() else {
            return Err(AppError::Unavailable("agent executable not found".into()));
        };

        let session = self.session_for_turn(&manager).await?;
        transition(TurnState::Dispatched(Backend::Agent));

        if let Err(err) = session.send(prompt).await {
            self.discard_session(&session).await;
            return Err(err);
        }

        let mut events = session.stream().await;
        transition(TurnState::Streaming);

        while let Some(item) = events.next().await {
            match item {
                Ok(Event::TextChunk { content }) => sink.text(content).await,
                Ok(Event::ToolUse { tool, input }) => {
                    debug!(session_id = session.id(), tool, "agent tool use");
                    audit(ToolAudit { tool, input });
                }
                Ok(Event::Result {
                    is_error: true,
                    turn_count,
                    ..
                }) => {
                    return Err(AppError::AgentReported(format!(
                        "turn failed after {turn_count} agent turn(s)"
                    )));
                }
                Ok(Event::Result {
                    session_id: agent_session,
                    turn_count,
                    ..
                }) => {
                    debug!(
                        session_id = session.id(),
                        agent_session = agent_session.as_deref().unwrap_or("-"),
                        turn_count,
                        "agent turn completed"
                    );
                }
                Ok(Event::SystemNotice { subtype, .. }) => {
                    debug!(session_id = session.id(), subtype, "agent system notice");
                }
                Ok(Event::DecodeError { raw_line }) => {
                    warn!(session_id = session.id(), raw_line, "ignoring undecodable agent output");
                }
                Err(err) => {
                    drop(events);
                    self.discard_session(&session).await;
                    return Err(err);
                }
            }
        }

        Ok(())
    }

    async fn run_fallback_turn(&self, prompt: &str, sink: &mut TextSink) -> Result<()> {
        transition(TurnState::Dispatched(Backend::Fallback));

        let user_turn = ConversationTurn::user(prompt);
        let mut request = self.history.lock().await.clone();
        request.push(user_turn.clone());

        let reply = self.fallback.complete(&request).await?;
        transition(TurnState::Streaming);
        sink.text(reply.content.clone()).await;

        // Setup guidance is not part of the conversation.
        if self.fallback.is_configured() {
            let mut history = self.history.lock().await;
            history.push(user_turn);
            history.push(reply);
        }
        Ok(())
    }

    /// Reuse the live session or lazily start a new one.
    async fn session_for_turn(&self, manager: &SessionManager) -> Result<Arc<SessionHandle>> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            if session.is_alive() {
                return Ok(Arc::clone(session));
            }
            info!(session_id = session.id(), "previous agent session ended; starting a new one");
            session.stop().await;
        }

        let session = Arc::new(manager.start(&self.options).await?);
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Stop `session` and forget it if it is still the current one.
    async fn discard_session(&self, session: &Arc<SessionHandle>) {
        session.stop().await;
        let mut slot = self.session.lock().await;
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, session)) {
            *slot = None;
        }
    }
}

/// Whether an agent-path failure may be retried on the fallback.
///
/// A failure the agent itself reported is a real answer and is surfaced.
fn falls_back(err: &AppError) -> bool {
    !matches!(err, AppError::AgentReported(_))
}

fn transition(state: TurnState) {
    debug!(?state, "turn state");
}

/// Producer side of a [`TextStream`].
struct TextSink {
    tx: mpsc::Sender<Result<String>>,
    delivered: usize,
    caller_gone: bool,
}

impl TextSink {
    async fn text(&mut self, chunk: String) {
        if chunk.is_empty() {
            return;
        }
        self.delivered += 1;
        if self.caller_gone {
            return;
        }
        if self.tx.send(Ok(chunk)).await.is_err() {
            debug!("caller dropped the text stream; finishing turn in background");
            self.caller_gone = true;
        }
    }

    async fn fail(&mut self, err: AppError) {
        if !self.caller_gone && self.tx.send(Err(err)).await.is_err() {
            self.caller_gone = true;
        }
    }

    fn is_closed(&self) -> bool {
        self.caller_gone || self.tx.is_closed()
    }
}

/// Incremental reply text for one turn.
///
/// Yields text chunks in order and ends after the turn completes; a failed
/// turn ends with a single `Err` item. Dropping the stream does not cancel
/// the agent.
pub struct TextStream {
    rx: mpsc::Receiver<Result<String>>,
}

impl Stream for TextStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
