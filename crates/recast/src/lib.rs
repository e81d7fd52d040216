pub mod broadcast;
pub mod campaign;
pub mod collab;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod queue;
pub mod scheduler;

pub use broadcast::{EngineEvent, EngineEventBroadcaster};
pub use campaign::{CampaignConfig, CampaignEvent, CampaignStatus};
pub use db::Database;
pub use engine::{Collaborators, Engine, EngineConfig, StartupReport};
pub use error::{ConfigError, QueueError, RecastError, Result, SchedulerError};
pub use queue::{JobKind, JobQueue, QueueConfig, ReviewConfig, TickOutcome};
pub use scheduler::{Scheduler, SchedulerConfig};
