//! Campaign lifecycle state machine.
//!
//! `transition` is a pure (status, event) -> status mapping. Unmapped
//! pairs are identity transitions: an unexpected event never corrupts a
//! campaign's state.

use crate::db::time::format_timestamp;
use crate::db::{campaign_repo, Database, DatabaseError};
use chrono::{DateTime, Utc};

/// Campaign lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignStatus {
    Active,
    Paused,
    Scanning,
    Monitoring,
    NeedsCaptcha,
    NeedsReview,
    Finished,
    Archived,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Scanning => "scanning",
            CampaignStatus::Monitoring => "monitoring",
            CampaignStatus::NeedsCaptcha => "needs_captcha",
            CampaignStatus::NeedsReview => "needs_review",
            CampaignStatus::Finished => "finished",
            CampaignStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(CampaignStatus::Active),
            "paused" => Some(CampaignStatus::Paused),
            "scanning" => Some(CampaignStatus::Scanning),
            "monitoring" => Some(CampaignStatus::Monitoring),
            "needs_captcha" => Some(CampaignStatus::NeedsCaptcha),
            "needs_review" => Some(CampaignStatus::NeedsReview),
            "finished" => Some(CampaignStatus::Finished),
            "archived" => Some(CampaignStatus::Archived),
            _ => None,
        }
    }
}

/// Events that drive campaign status transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignEvent {
    ScanStarted,
    ScanCompletedHistory,
    ScanCompletedContinuous,
    MonitorStarted,
    AllJobsDone,
    CaptchaDetected,
    CaptchaResolved,
    ManualPause,
    AppStartup,
    ManualResume,
    NeedsReview,
    ReviewResolved,
}

/// Pure transition function. Unmapped (state, event) pairs return the
/// input state unchanged.
pub fn transition(status: CampaignStatus, event: CampaignEvent) -> CampaignStatus {
    use CampaignEvent::*;
    use CampaignStatus::*;

    match (status, event) {
        (Active, ScanStarted) => Scanning,
        (Scanning, ScanCompletedHistory) => Active,
        (Scanning, ScanCompletedContinuous) => Monitoring,
        (Active, MonitorStarted) => Monitoring,

        (Active | Monitoring, AllJobsDone) => Finished,

        (Active | Scanning | Monitoring, CaptchaDetected) => NeedsCaptcha,
        (NeedsCaptcha, CaptchaResolved) => Active,

        (Active | Scanning | Monitoring, ManualPause) => Paused,
        (Paused, ManualResume) => Active,

        // Conservative restart default: anything that was running when the
        // process died requires an explicit resume.
        (Active | Scanning | Monitoring, AppStartup) => Paused,

        (Active | Scanning | Monitoring, CampaignEvent::NeedsReview) => {
            CampaignStatus::NeedsReview
        }
        (CampaignStatus::NeedsReview, ReviewResolved) => Active,

        _ => status,
    }
}

/// Applies an event to a persisted campaign. The write is guarded by the
/// status the event was computed from, so a concurrent mutation simply
/// makes this a no-op. Returns the resulting status, or `None` when the
/// campaign does not exist.
pub fn apply_event(
    db: &Database,
    campaign_id: &str,
    event: CampaignEvent,
    now: DateTime<Utc>,
) -> Result<Option<CampaignStatus>, DatabaseError> {
    let Some(campaign) = campaign_repo::find_by_id(db, campaign_id)? else {
        return Ok(None);
    };

    let Some(current) = CampaignStatus::parse(&campaign.status) else {
        log::warn!(
            "Campaign {} has unknown status '{}', leaving untouched",
            campaign_id,
            campaign.status
        );
        return Ok(None);
    };

    let next = transition(current, event);
    if next == current {
        return Ok(Some(current));
    }

    let changed = campaign_repo::set_status_if(
        db,
        campaign_id,
        current.as_str(),
        next.as_str(),
        &format_timestamp(now),
    )?;
    if changed {
        log::info!(
            "Campaign {}: {} --{:?}--> {}",
            campaign_id,
            current.as_str(),
            event,
            next.as_str()
        );
        Ok(Some(next))
    } else {
        Ok(Some(current))
    }
}
