use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Collaborator error: {0}")]
    Collab(#[from] crate::collab::CollabError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Errors raised while executing a job. The precondition variants carry
/// specific, matchable messages; they fail the job without retry.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("No valid session for account '{account}'")]
    MissingSession { account: String },

    #[error("Local artifact not found: {path}")]
    MissingArtifact { path: PathBuf },

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Malformed {job_type} payload for job {job_id}: {source}")]
    Payload {
        job_type: String,
        job_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error(transparent)]
    Collab(#[from] crate::collab::CollabError),

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Campaign not found: {0}")]
    CampaignNotFound(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

pub type Result<T> = std::result::Result<T, RecastError>;
