//! Environment collaborator interface.
//!
//! The engine never talks to the updater pipeline directly; it receives an
//! [`Env`] at construction and posts progress and retry notifications
//! through it. The pipeline decides what "retry" means (usually: a prior
//! apply attempt was interrupted and its retry marker is on disk).

/// Collaborator interface supplied by the updater pipeline.
pub trait Env {
    /// Whether this apply is a retry of an interrupted attempt.
    ///
    /// When true, the engine reloads the persisted retry marker and skips
    /// already-completed commands.
    fn is_retry(&self) -> bool;

    /// Deliver a message to the pipeline.
    ///
    /// Known topics are [`crate::constants::TOPIC_SET_PROGRESS`] (payload:
    /// stringified fraction) and [`crate::constants::TOPIC_RETRY_UPDATE`]
    /// (payload: the failing command line).
    fn post_message(&self, topic: &str, payload: &str);
}
