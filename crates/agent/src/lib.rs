//! The conversational side of ClawdVC.
//!
//! [`Orchestrator`] runs the bounded tool-calling loop for one turn:
//!
//! 1. **Ask** the model with directive, history window, knowledge summary
//!    and the new user input
//! 2. **If tool calls**: invoke them, feed results back, ask again
//! 3. **If text**: stream it out and hand back the turns to commit
//!
//! [`Dispatcher`] sits in front of it for chat traffic: admission,
//! command parsing, per-conversation ordering, reset, and streamed reply
//! delivery through [`ReplyWriter`].

pub mod command;
pub mod context;
pub mod dispatcher;
pub mod orchestrator;
pub mod reply;
pub mod stream_event;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use command::Command;
pub use context::{DEFAULT_PERSONA, history_window, system_prompt};
pub use dispatcher::{Dispatcher, DispatcherDeps, DispatcherSettings, Disposition, Ticket};
pub use orchestrator::{EventSink, Orchestrator, ROUND_LIMIT_REPLY, TurnOutcome, TurnRequest, TurnStatus};
pub use reply::ReplyWriter;
pub use stream_event::AgentStreamEvent;
