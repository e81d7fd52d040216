//! Campaign domain: declarative configuration and the lifecycle
//! state machine.

pub mod config;
pub mod state;

pub use config::{
    ActiveHours, CampaignConfig, EditStep, ExecutionAction, ExecutionEntry, ManualItem,
    PostOrder, ScanMode, SourceKind, SourceSpec,
};
pub use state::{apply_event, transition, CampaignEvent, CampaignStatus};
