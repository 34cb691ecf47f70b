//! The tool-orchestration loop.
//!
//! One call to [`Orchestrator::run_turn`] drives a single conversational
//! turn through a bounded number of model rounds:
//!
//! 1. **Ask** the model (streaming) with the transcript and the tools the
//!    execution mode may use
//! 2. **If tool calls**: invoke them, append a tool-request turn and one
//!    result turn per call (in the order the calls were issued), loop
//! 3. **If text only**: that is the answer
//!
//! The loop stops after `max_rounds` and answers with a fallback instead.
//! Every round is a suspension point where a reset can abandon the turn.

use clawdvc_config::AppConfig;
use clawdvc_core::error::{Error, ProviderError};
use clawdvc_core::event::{DomainEvent, EventBus};
use clawdvc_core::message::Turn;
use clawdvc_core::provider::{Provider, ProviderRequest, Usage};
use clawdvc_core::tool::{ToolCall, ToolContext, ToolRegistry};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::stream_event::AgentStreamEvent;

/// Answer used when the round limit is hit without a final answer.
pub const ROUND_LIMIT_REPLY: &str = "I couldn't complete that request. Please try rephrasing it.";

/// Where streamed events go. Send failures (receiver gone) are ignored.
pub type EventSink = mpsc::Sender<AgentStreamEvent>;

/// Input to one orchestrated turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// System directive (persona or custom directive plus knowledge)
    pub system: Option<String>,

    /// Transcript ending with the new user turn
    pub turns: Vec<Turn>,

    /// Who the tools act for, and in which mode
    pub context: ToolContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// The model gave a direct answer
    Answered,
    /// The round limit was reached; `answer` is the fallback
    RoundLimitExceeded,
    /// Abandoned by cancellation; `answer` holds whatever text had streamed
    Cancelled,
}

/// Result of one orchestrated turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub status: TurnStatus,

    /// Final text shown to the user
    pub answer: String,

    /// Turns produced by this run (tool requests, tool results, final
    /// answer), oldest first. Does not include the input turns.
    pub new_turns: Vec<Turn>,

    pub rounds: u32,
    pub tool_calls_made: usize,
    pub usage: Usage,
}

impl TurnOutcome {
    /// Names of the tools that ran successfully this turn, in issue order.
    pub fn successful_tools(&self) -> Vec<String> {
        let mut names = Vec::new();
        for turn in &self.new_turns {
            for call in &turn.tool_calls {
                let ok = self
                    .new_turns
                    .iter()
                    .any(|t| t.tool_call_id.as_deref() == Some(call.id.as_str()) && !t.is_error);
                if ok {
                    names.push(call.name.clone());
                }
            }
        }
        names
    }
}

/// How one model round ended.
enum Round {
    Complete {
        text: String,
        calls: Vec<ToolCall>,
        usage: Option<Usage>,
    },
    Cancelled {
        partial: String,
    },
}

/// Why a streaming attempt failed.
struct AttemptFailure {
    error: ProviderError,
    /// Whether any delta reached the sink before the failure
    forwarded: bool,
}

/// Drives model rounds and tool invocations for a single turn.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_rounds: u32,
    retry_backoff: Duration,
    event_bus: Option<Arc<EventBus>>,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, model: impl Into<String>) -> Self {
        Self {
            provider,
            tools,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            max_rounds: 8,
            retry_backoff: Duration::from_millis(1500),
            event_bus: None,
        }
    }

    /// Interactive orchestrator configured from `[agent]` and `model`.
    pub fn from_config(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, config: &AppConfig) -> Self {
        Self::new(provider, tools, config.model.clone())
            .with_temperature(config.agent.temperature)
            .with_max_tokens(config.agent.max_tokens)
            .with_max_rounds(config.agent.max_tool_rounds)
            .with_retry_backoff(Duration::from_millis(config.agent.model_retry_backoff_ms))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Set the maximum number of model rounds per turn (at least 1).
    pub fn with_max_rounds(mut self, max: u32) -> Self {
        self.max_rounds = max.max(1);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run one turn to completion, round limit, or cancellation.
    ///
    /// Returns `Err(Error::ModelCallFailed)` when a model round fails and
    /// cannot be retried; nothing from the turn should be committed then.
    /// Tool failures never fail the turn: they go back to the model as
    /// error results.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        sink: Option<EventSink>,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, Error> {
        let TurnRequest {
            system,
            mut turns,
            context,
        } = request;
        let conversation = context.conversation.as_ref().map(|k| k.to_string());
        let definitions = self.tools.definitions_for(context.mode);
        let mut new_turns = Vec::new();
        let mut usage = Usage::default();
        let mut tool_calls_made = 0;
        let mut streamed = String::new();

        info!(
            conversation = conversation.as_deref().unwrap_or("-"),
            identity = %context.identity,
            mode = %context.mode,
            turns = turns.len(),
            "Running turn"
        );

        for round in 1..=self.max_rounds {
            debug!(round, "Model round");
            let provider_request = ProviderRequest {
                model: self.model.clone(),
                system: system.clone(),
                turns: turns.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: definitions.clone(),
            };

            let (text, calls) = match self.round(provider_request, sink.as_ref(), &cancel).await? {
                Round::Cancelled { partial } => {
                    streamed.push_str(&partial);
                    info!(round, "Turn abandoned");
                    return Ok(TurnOutcome {
                        status: TurnStatus::Cancelled,
                        answer: streamed,
                        new_turns: Vec::new(),
                        rounds: round,
                        tool_calls_made,
                        usage,
                    });
                }
                Round::Complete { text, calls, usage: round_usage } => {
                    if let Some(u) = round_usage {
                        add_usage(&mut usage, &u);
                    }
                    streamed.push_str(&text);
                    (text, calls)
                }
            };

            if calls.is_empty() {
                new_turns.push(Turn::assistant(text.clone()));
                self.publish_done(&conversation, round, &usage);
                emit(
                    sink.as_ref(),
                    AgentStreamEvent::Done {
                        conversation,
                        usage: Some(usage.clone()),
                        rounds: round,
                        tool_calls_made,
                    },
                )
                .await;
                return Ok(TurnOutcome {
                    status: TurnStatus::Answered,
                    answer: text,
                    new_turns,
                    rounds: round,
                    tool_calls_made,
                    usage,
                });
            }

            tool_calls_made += calls.len();
            let request_turn = Turn::tool_request(text, calls.clone());
            turns.push(request_turn.clone());
            new_turns.push(request_turn);

            let results = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(round, "Turn abandoned during tool calls");
                    return Ok(TurnOutcome {
                        status: TurnStatus::Cancelled,
                        answer: streamed,
                        new_turns: Vec::new(),
                        rounds: round,
                        tool_calls_made,
                        usage,
                    });
                }
                results = self.invoke_all(&calls, &context, sink.as_ref()) => results,
            };
            turns.extend(results.iter().cloned());
            new_turns.extend(results);
        }

        warn!(
            conversation = conversation.as_deref().unwrap_or("-"),
            limit = self.max_rounds,
            "Round limit reached without a final answer"
        );
        emit(
            sink.as_ref(),
            AgentStreamEvent::Chunk {
                content: ROUND_LIMIT_REPLY.into(),
            },
        )
        .await;
        new_turns.push(Turn::assistant(ROUND_LIMIT_REPLY));
        self.publish_done(&conversation, self.max_rounds, &usage);
        emit(
            sink.as_ref(),
            AgentStreamEvent::Done {
                conversation,
                usage: Some(usage.clone()),
                rounds: self.max_rounds,
                tool_calls_made,
            },
        )
        .await;
        Ok(TurnOutcome {
            status: TurnStatus::RoundLimitExceeded,
            answer: ROUND_LIMIT_REPLY.into(),
            new_turns,
            rounds: self.max_rounds,
            tool_calls_made,
            usage,
        })
    }

    /// One blocking model call without tools, for one-shot generation.
    /// Retried once with backoff like any other round.
    pub async fn generate(&self, system: &str, prompt: &str) -> Result<String, Error> {
        let mut request = ProviderRequest::new(self.model.clone(), vec![Turn::user(prompt)]);
        request.system = Some(system.to_string());
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;

        match self.complete_text(request.clone()).await {
            Ok(text) => Ok(text),
            Err(first) => {
                warn!(error = %first, backoff_ms = self.retry_backoff.as_millis() as u64, "Model call failed, retrying");
                tokio::time::sleep(self.retry_backoff).await;
                self.complete_text(request)
                    .await
                    .map_err(|source| Error::ModelCallFailed { attempts: 2, source })
            }
        }
    }

    async fn complete_text(&self, request: ProviderRequest) -> Result<String, ProviderError> {
        let response = self.provider.complete(request).await?;
        if response.turn.content.trim().is_empty() {
            return Err(ProviderError::InvalidResponse("empty answer".into()));
        }
        Ok(response.turn.content)
    }

    /// One model round, retried once if it failed before any text reached
    /// the sink.
    async fn round(
        &self,
        request: ProviderRequest,
        sink: Option<&EventSink>,
        cancel: &CancellationToken,
    ) -> Result<Round, Error> {
        match self.attempt(request.clone(), sink, cancel).await {
            Ok(round) => Ok(round),
            Err(AttemptFailure { error, forwarded: true }) => {
                warn!(error = %error, "Model stream failed after partial output");
                Err(Error::ModelCallFailed { attempts: 1, source: error })
            }
            Err(AttemptFailure { error, forwarded: false }) => {
                warn!(error = %error, backoff_ms = self.retry_backoff.as_millis() as u64, "Model call failed, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(Round::Cancelled { partial: String::new() }),
                    _ = tokio::time::sleep(self.retry_backoff) => {}
                }
                self.attempt(request, sink, cancel).await.map_err(|failure| {
                    warn!(error = %failure.error, "Model call failed again");
                    Error::ModelCallFailed {
                        attempts: 2,
                        source: failure.error,
                    }
                })
            }
        }
    }

    async fn attempt(
        &self,
        request: ProviderRequest,
        sink: Option<&EventSink>,
        cancel: &CancellationToken,
    ) -> Result<Round, AttemptFailure> {
        let mut rx = tokio::select! {
            _ = cancel.cancelled() => return Ok(Round::Cancelled { partial: String::new() }),
            rx = self.provider.stream(request) => rx.map_err(|error| AttemptFailure { error, forwarded: false })?,
        };

        let mut text = String::new();
        let mut calls = Vec::new();
        let mut usage = None;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(Round::Cancelled { partial: text }),
                next = rx.recv() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    if let Some(delta) = chunk.content.filter(|d| !d.is_empty()) {
                        text.push_str(&delta);
                        emit(sink, AgentStreamEvent::Chunk { content: delta }).await;
                    }
                    calls.extend(chunk.tool_calls);
                    if chunk.usage.is_some() {
                        usage = chunk.usage;
                    }
                    if chunk.done {
                        break;
                    }
                }
                Some(Err(error)) => {
                    return Err(AttemptFailure {
                        error,
                        forwarded: !text.is_empty(),
                    });
                }
                None => {
                    if text.is_empty() && calls.is_empty() {
                        return Err(AttemptFailure {
                            error: ProviderError::StreamInterrupted("stream ended without a response".into()),
                            forwarded: false,
                        });
                    }
                    break;
                }
            }
        }
        // A blank answer is never committed as a turn.
        if text.trim().is_empty() && calls.is_empty() {
            return Err(AttemptFailure {
                error: ProviderError::InvalidResponse("empty answer".into()),
                forwarded: !text.is_empty(),
            });
        }
        Ok(Round::Complete { text, calls, usage })
    }

    /// Invoke every call and return one result turn per call, in issue
    /// order. Independent calls run concurrently; account-mutating calls
    /// run one after another.
    async fn invoke_all(&self, calls: &[ToolCall], ctx: &ToolContext, sink: Option<&EventSink>) -> Vec<Turn> {
        let (mutating, independent): (Vec<_>, Vec<_>) = calls
            .iter()
            .enumerate()
            .partition(|(_, call)| self.tools.mutates_account(&call.name));

        let concurrent = join_all(
            independent
                .into_iter()
                .map(|(i, call)| async move { (i, self.invoke(call, ctx, sink).await) }),
        );
        let sequential = async {
            let mut out = Vec::with_capacity(mutating.len());
            for (i, call) in mutating {
                out.push((i, self.invoke(call, ctx, sink).await));
            }
            out
        };

        let (mut results, serialized) = tokio::join!(concurrent, sequential);
        results.extend(serialized);
        results.sort_by_key(|(i, _)| *i);
        results.into_iter().map(|(_, turn)| turn).collect()
    }

    async fn invoke(&self, call: &ToolCall, ctx: &ToolContext, sink: Option<&EventSink>) -> Turn {
        emit(
            sink,
            AgentStreamEvent::ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.arguments.clone(),
            },
        )
        .await;

        let start = Instant::now();
        let result = self.tools.execute(call, ctx).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (output, success) = match result {
            Ok(result) => (result.output, result.success),
            Err(e) => {
                warn!(tool = %call.name, identity = %ctx.identity, error = %e, "Tool invocation failed");
                (format!("Error: {e}"), false)
            }
        };
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ToolExecuted {
                tool_name: call.name.clone(),
                success,
                duration_ms,
                timestamp: chrono::Utc::now(),
            });
        }
        emit(
            sink,
            AgentStreamEvent::ToolResult {
                id: call.id.clone(),
                name: call.name.clone(),
                output: output.clone(),
                success,
            },
        )
        .await;
        Turn::tool_result(call.id.clone(), output, !success)
    }

    fn publish_done(&self, conversation: &Option<String>, rounds: u32, usage: &Usage) {
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ResponseGenerated {
                conversation: conversation.clone().unwrap_or_default(),
                rounds,
                tokens_used: usage.total_tokens,
                timestamp: chrono::Utc::now(),
            });
        }
    }
}

async fn emit(sink: Option<&EventSink>, event: AgentStreamEvent) {
    if let Some(sink) = sink {
        let _ = sink.send(event).await;
    }
}

fn add_usage(total: &mut Usage, round: &Usage) {
    total.prompt_tokens += round.prompt_tokens;
    total.completion_tokens += round.completion_tokens;
    total.total_tokens += round.total_tokens;
}
