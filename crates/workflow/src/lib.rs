//! Autonomous agent scheduling.
//!
//! A single background loop, independent of chat traffic, runs a one-time
//! startup sequence (setup → learn → post) and then three recurring actions
//! on fixed intervals:
//!
//! - **learn-and-browse**: read MoltBook feeds into the knowledge store,
//!   then search the web for what is trending
//! - **engage**: upvote, follow and comment on fresh posts
//! - **create-post**: publish an original post on the next rotation topic
//!
//! Every run appends one growth-ledger row, whatever its outcome. A run
//! still going when its next tick fires makes that tick a skipped row.

pub mod actions;
pub mod prompts;
pub mod scheduler;

pub use actions::{ActionReport, Actions, Counters};
pub use prompts::{AGENT_PERSONA, TOPIC_ROTATION, TopicPrompt, parse_json_answer};
pub use scheduler::{STARTUP_SEQUENCE, Scheduler, SchedulerSettings, SchedulerState};
