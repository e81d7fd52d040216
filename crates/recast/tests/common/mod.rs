//! Shared test harness: in-memory engine wiring with scripted
//! collaborators.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use recast::campaign::EditStep;
use recast::collab::{
    CollabError, DiscoveredItem, FetchedMedia, MediaFetcher, MediaTransformer, PublishReceipt,
    PublishRequest, Publisher, SourceScanner,
};
use recast::db::account_repo::{self, AccountRow};
use recast::db::time::format_timestamp;
use recast::queue::ProgressSink;
use recast::{Collaborators, Database, Engine, EngineConfig, ReviewConfig};

/// Scanner that returns a scripted item list per source value.
#[derive(Default)]
pub struct ScriptedScanner {
    pub by_source: HashMap<String, Vec<DiscoveredItem>>,
}

impl ScriptedScanner {
    pub fn with(mut self, source: &str, items: Vec<DiscoveredItem>) -> Self {
        self.by_source.insert(source.to_string(), items);
        self
    }
}

impl SourceScanner for ScriptedScanner {
    fn scan(
        &self,
        source: &recast::campaign::SourceSpec,
    ) -> Result<Vec<DiscoveredItem>, CollabError> {
        Ok(self.by_source.get(&source.value).cloned().unwrap_or_default())
    }
}

/// Fetcher that materializes files under a temp dir, caching by native id.
pub struct TempDirFetcher {
    pub dir: PathBuf,
    pub calls: AtomicU32,
}

impl TempDirFetcher {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            calls: AtomicU32::new(0),
        }
    }
}

impl MediaFetcher for TempDirFetcher {
    fn fetch(&self, _url: &str, native_id: &str) -> Result<FetchedMedia, CollabError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.join(format!("{}.mp4", native_id));
        let cached = path.exists();
        if !cached {
            std::fs::write(&path, b"media bytes")?;
        }
        Ok(FetchedMedia {
            local_path: path,
            cached,
            meta: serde_json::json!({"durationSeconds": 17}),
        })
    }
}

/// Transformer that writes an `-edited` sibling of the input.
pub struct SuffixTransformer;

impl MediaTransformer for SuffixTransformer {
    fn transform(
        &self,
        local_path: &Path,
        _pipeline: &[EditStep],
    ) -> Result<PathBuf, CollabError> {
        let stem = local_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let edited = local_path.with_file_name(format!("{}-edited.mp4", stem));
        std::fs::copy(local_path, &edited)?;
        Ok(edited)
    }
}

/// Publisher that records requests and answers from a script.
pub struct ScriptedPublisher {
    pub pending_review: bool,
    pub visible_after_checks: u32,
    pub publishes: Mutex<Vec<String>>,
    pub visibility_checks: AtomicU32,
}

impl ScriptedPublisher {
    pub fn immediate() -> Self {
        Self {
            pending_review: false,
            visible_after_checks: 0,
            publishes: Mutex::new(Vec::new()),
            visibility_checks: AtomicU32::new(0),
        }
    }

    pub fn reviewed(visible_after_checks: u32) -> Self {
        Self {
            pending_review: true,
            visible_after_checks,
            publishes: Mutex::new(Vec::new()),
            visibility_checks: AtomicU32::new(0),
        }
    }
}

impl Publisher for ScriptedPublisher {
    fn publish(
        &self,
        request: &PublishRequest,
        progress: &dyn ProgressSink,
    ) -> Result<PublishReceipt, CollabError> {
        progress.update("Uploading");
        self.publishes
            .lock()
            .unwrap()
            .push(request.username.clone());
        Ok(PublishReceipt {
            external_id: Some(format!("ext-{}", request.username)),
            external_url: Some(format!(
                "https://clipshare.example/@{}/latest",
                request.username
            )),
            pending_review: self.pending_review,
        })
    }

    fn is_visible(&self, _external_id: &str) -> Result<bool, CollabError> {
        let n = self.visibility_checks.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(n >= self.visible_after_checks)
    }
}

/// A fully wired engine over an in-memory database.
pub struct TestHarness {
    pub engine: Engine,
    pub publisher: Arc<ScriptedPublisher>,
    pub fetcher: Arc<TempDirFetcher>,
    pub _tmp: tempfile::TempDir,
}

pub fn harness(scanner: ScriptedScanner, publisher: ScriptedPublisher) -> TestHarness {
    let tmp = tempfile::tempdir().unwrap();
    let db = Database::open_in_memory().unwrap();
    let publisher = Arc::new(publisher);
    let fetcher = Arc::new(TempDirFetcher::new(tmp.path()));

    let engine = Engine::new(
        db,
        Collaborators {
            scanner: Arc::new(scanner),
            fetcher: Arc::clone(&fetcher) as Arc<dyn MediaFetcher>,
            transformer: Arc::new(SuffixTransformer),
            publisher: Arc::clone(&publisher) as Arc<dyn Publisher>,
        },
        EngineConfig {
            review: ReviewConfig {
                poll_interval: std::time::Duration::from_millis(10),
                max_attempts: 20,
            },
            ..Default::default()
        },
    );

    TestHarness {
        engine,
        publisher,
        fetcher,
        _tmp: tmp,
    }
}

/// Inserts a target account with a valid session and returns its id.
pub fn insert_account(db: &Database, id: &str, username: &str) {
    account_repo::insert(
        db,
        &AccountRow {
            id: id.to_string(),
            platform: "clipshare".to_string(),
            username: username.to_string(),
            role: "target".to_string(),
            session_valid: true,
            session_data: Some(r#"{"cookies":"session"}"#.to_string()),
            created_at: format_timestamp(Utc::now()),
        },
    )
    .unwrap();
}

/// A discovered item with the given native id and like count.
pub fn discovered(native_id: &str, likes: i64) -> DiscoveredItem {
    DiscoveredItem {
        native_id: native_id.to_string(),
        url: format!("https://clipshare.example/v/{}", native_id),
        description: Some(format!("clip {}", native_id)),
        thumbnail: None,
        like_count: likes,
        view_count: likes * 10,
        posted_at: None,
    }
}
