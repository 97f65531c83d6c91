//! services/podcast/src/generator/mod.rs
//!
//! The session orchestrator and the pieces it is built from.

pub mod dispatch;
pub mod orchestrator;
pub mod progress;
pub mod request;

pub use dispatch::{DispatchQueue, DEFAULT_RECEIVE_TIMEOUT};
pub use orchestrator::{AttemptOutcome, AttemptState, GeneratorSettings, PodcastGenerator};
pub use progress::{ProgressStatus, ProgressUpdate};
pub use request::{Action, DialogueTurn, PodcastParams, PodcastRequest, RetryInfo};
