//! Campaign configuration schema.
//!
//! The config is persisted as a JSON blob in the `campaigns.config` column
//! and deserialized once wherever the engine needs it. Field names are
//! camelCase to match the persisted form.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Declarative campaign configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignConfig {
    /// Sources to scan for new items (accounts, keywords).
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
    /// Manually specified items to repost.
    #[serde(default)]
    pub manual_items: Vec<ManualItem>,
    /// Ordering rule applied to scanned items before scheduling.
    #[serde(default)]
    pub post_order: PostOrder,
    /// Edit pipeline applied to downloaded media before publishing.
    #[serde(default)]
    pub edit_pipeline: Vec<EditStep>,
    /// Target account ids to publish to.
    #[serde(default)]
    pub target_accounts: Vec<String>,
    /// Minutes between consecutive scheduled posts.
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,
    /// Daily window outside which schedule slots are clamped forward.
    #[serde(default)]
    pub active_hours: Option<ActiveHours>,
    /// Randomize slot spacing by a factor in [0.5, 1.5].
    #[serde(default)]
    pub jitter: bool,
    /// Next due time. Absent means the campaign only runs on manual trigger.
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
    /// Whether scanning is a one-shot backfill or keeps recurring.
    #[serde(default)]
    pub scan_mode: ScanMode,
    /// Optional user-ordered mixed plan. When present it replaces the
    /// legacy items-then-scan layout.
    #[serde(default)]
    pub execution_order: Option<Vec<ExecutionEntry>>,
}

fn default_interval_minutes() -> u32 {
    60
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            sources: vec![],
            manual_items: vec![],
            post_order: PostOrder::default(),
            edit_pipeline: vec![],
            target_accounts: vec![],
            interval_minutes: default_interval_minutes(),
            active_hours: None,
            jitter: false,
            run_at: None,
            scan_mode: ScanMode::default(),
            execution_order: None,
        }
    }
}

impl CampaignConfig {
    /// Parses a persisted config blob.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes for persistence.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Validates the configuration before it is accepted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_minutes == 0 {
            return Err(ConfigError::Validation {
                message: "intervalMinutes must be at least 1".to_string(),
            });
        }
        if !self.has_work() {
            return Err(ConfigError::Validation {
                message: "campaign has no sources, manual items, or execution order entries"
                    .to_string(),
            });
        }
        if let Some(ref hours) = self.active_hours {
            hours.window()?;
        }
        Ok(())
    }

    /// True when the campaign defines anything to do at all.
    pub fn has_work(&self) -> bool {
        !self.sources.is_empty()
            || !self.manual_items.is_empty()
            || self
                .execution_order
                .as_ref()
                .map(|entries| !entries.is_empty())
                .unwrap_or(false)
    }

    /// A recurring campaign keeps generating work as long as it has
    /// sources to rescan.
    pub fn is_recurring(&self) -> bool {
        self.scan_mode == ScanMode::Continuous
    }
}

/// What kind of source a scan targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Account,
    Keyword,
}

/// A single scannable source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpec {
    pub kind: SourceKind,
    pub value: String,
}

/// A manually specified item to repost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualItem {
    pub url: String,
    #[serde(default)]
    pub native_id: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

/// Ordering applied to scanned items before download slots are assigned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PostOrder {
    /// Newest first — non-increasing native id (time-ordered surrogate).
    #[default]
    Newest,
    /// Oldest first — non-decreasing native id.
    Oldest,
    /// Most liked first.
    MostLiked,
    /// Least liked first.
    LeastLiked,
}

/// One named effect in the edit pipeline; parameters are opaque to the
/// engine and interpreted by the transform collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditStep {
    pub effect: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Scan behavior: one-shot history backfill or continuous monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    #[default]
    History,
    Continuous,
}

/// Daily active-hours window, "HH:MM" to "HH:MM", same-day only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveHours {
    pub start: String,
    pub end: String,
}

impl ActiveHours {
    /// Parses and validates the window bounds.
    pub fn window(&self) -> Result<(NaiveTime, NaiveTime), ConfigError> {
        let start = parse_hhmm(&self.start)?;
        let end = parse_hhmm(&self.end)?;
        if end <= start {
            return Err(ConfigError::Validation {
                message: format!(
                    "activeHours window is empty or overnight ({} - {})",
                    self.start, self.end
                ),
            });
        }
        Ok((start, end))
    }
}

fn parse_hhmm(s: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| ConfigError::Validation {
        message: format!("invalid activeHours time '{}', expected HH:MM", s),
    })
}

/// One entry of an explicit execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEntry {
    #[serde(flatten)]
    pub action: ExecutionAction,
    /// Pinned timestamp, used verbatim when the caller already computed one.
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

/// What an execution-order entry does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ExecutionAction {
    PostItem { item: ManualItem },
    ScanSource { source: SourceSpec },
}
