//! End-to-end flows through the engine: trigger → scan → download →
//! publish, driven by explicit ticks against an in-memory database.

mod common;

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use recast::campaign::{CampaignConfig, EditStep, ManualItem, ScanMode, SourceKind, SourceSpec};
use recast::db::job_repo::{self, JobFilter};
use recast::db::{campaign_repo, item_repo};
use recast::TickOutcome;

use common::{discovered, harness, insert_account, ScriptedPublisher, ScriptedScanner};

fn t(h: u32, m: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, h, m, 0).unwrap()
}

fn manual_campaign_config() -> CampaignConfig {
    CampaignConfig {
        manual_items: vec![
            ManualItem {
                url: "https://clipshare.example/v/m1".to_string(),
                native_id: Some("m1".to_string()),
                caption: Some("first".to_string()),
            },
            ManualItem {
                url: "https://clipshare.example/v/m2".to_string(),
                native_id: Some("m2".to_string()),
                caption: Some("second".to_string()),
            },
        ],
        target_accounts: vec!["acct-1".to_string()],
        interval_minutes: 10,
        ..Default::default()
    }
}

/// Drains the queue one tick at a time until it reports idle.
fn drain_queue(h: &common::TestHarness, now: chrono::DateTime<Utc>) -> u32 {
    let mut dispatched = 0;
    loop {
        match h.engine.queue().tick(now) {
            TickOutcome::Dispatched { .. } => dispatched += 1,
            TickOutcome::Idle => return dispatched,
            other => panic!("unexpected tick outcome: {:?}", other),
        }
    }
}

#[test]
fn test_manual_items_schedule_then_publish_per_target_account() {
    let h = harness(ScriptedScanner::default(), ScriptedPublisher::immediate());
    insert_account(h.engine.db(), "acct-1", "reposter_one");

    let campaign = h
        .engine
        .create_campaign("Manual", "clipshare", &manual_campaign_config(), t(9, 0))
        .unwrap();

    // Trigger at T: two DOWNLOAD jobs at T and T+10min.
    let created = h.engine.trigger_campaign(&campaign.id, false, t(9, 0)).unwrap();
    assert_eq!(created, 2);

    let (jobs, _) = h.engine.list_jobs(&JobFilter::default()).unwrap();
    let mut slots: Vec<String> = jobs
        .iter()
        .filter_map(|j| j.scheduled_for.clone())
        .collect();
    slots.sort();
    assert_eq!(
        slots,
        vec![
            "2026-01-05T09:00:00+00:00".to_string(),
            "2026-01-05T09:10:00+00:00".to_string(),
        ]
    );

    // At T only the first download is due; it chains one publish job,
    // which (slotless = ASAP) runs on the next tick.
    assert_eq!(drain_queue(&h, t(9, 0)), 2);
    assert_eq!(h.publisher.publishes.lock().unwrap().len(), 1);

    // At T+10 the second download and its publish drain too.
    assert_eq!(drain_queue(&h, t(9, 10)), 2);
    assert_eq!(
        h.publisher.publishes.lock().unwrap().as_slice(),
        ["reposter_one", "reposter_one"]
    );

    // Both items published, all jobs completed, campaign retired
    // (manual items only — nothing recurring).
    let item = item_repo::find_by_native(h.engine.db(), "clipshare", "m1")
        .unwrap()
        .unwrap();
    assert_eq!(item.status, "published");
    assert_eq!(job_repo::count_by_status(h.engine.db(), "completed").unwrap(), 4);
    assert_eq!(
        campaign_repo::find_by_id(h.engine.db(), &campaign.id)
            .unwrap()
            .unwrap()
            .status,
        "finished"
    );
}

#[test]
fn test_scan_dedupes_across_sources_and_orders_by_likes() {
    // Both sources return n2; it must yield exactly one download job.
    let scanner = ScriptedScanner::default()
        .with("@a", vec![discovered("n1", 5), discovered("n2", 50)])
        .with("@b", vec![discovered("n2", 50), discovered("n3", 20)]);
    let h = harness(scanner, ScriptedPublisher::immediate());
    insert_account(h.engine.db(), "acct-1", "reposter_one");

    let config = CampaignConfig {
        sources: vec![
            SourceSpec {
                kind: SourceKind::Account,
                value: "@a".to_string(),
            },
            SourceSpec {
                kind: SourceKind::Account,
                value: "@b".to_string(),
            },
        ],
        target_accounts: vec!["acct-1".to_string()],
        post_order: recast::campaign::PostOrder::MostLiked,
        interval_minutes: 10,
        ..Default::default()
    };
    let campaign = h
        .engine
        .create_campaign("Scan", "clipshare", &config, t(9, 0))
        .unwrap();
    h.engine.trigger_campaign(&campaign.id, false, t(9, 0)).unwrap();

    // Run the scan job.
    assert!(matches!(
        h.engine.queue().tick(t(9, 0)),
        TickOutcome::Dispatched { success: true, .. }
    ));

    let (downloads, total) = h
        .engine
        .list_jobs(&JobFilter {
            job_type: Some("download".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(total, 3, "duplicate native id must collapse to one job");

    // mostLiked ordering drives the slot assignment: n2 (50) first.
    let mut by_slot: Vec<(String, String)> = downloads
        .iter()
        .map(|j| (j.scheduled_for.clone().unwrap(), j.data.clone()))
        .collect();
    by_slot.sort();
    assert!(by_slot[0].1.contains("n2"));
    assert!(by_slot[1].1.contains("n3"));
    assert!(by_slot[2].1.contains("n1"));

    // Scan summary recorded on the job row.
    let (scans, _) = h
        .engine
        .list_jobs(&JobFilter {
            job_type: Some("scan".to_string()),
            ..Default::default()
        })
        .unwrap();
    let result: serde_json::Value =
        serde_json::from_str(scans[0].result.as_deref().unwrap()).unwrap();
    assert_eq!(result["found"], 4);
    assert_eq!(result["scheduled"], 3);
    assert_eq!(result["skipped"], 1);
}

#[test]
fn test_rescan_skips_already_processed_items() {
    let scanner = ScriptedScanner::default().with("@a", vec![discovered("n1", 5)]);
    let h = harness(scanner, ScriptedPublisher::immediate());

    let config = CampaignConfig {
        sources: vec![SourceSpec {
            kind: SourceKind::Account,
            value: "@a".to_string(),
        }],
        scan_mode: ScanMode::Continuous,
        interval_minutes: 10,
        ..Default::default()
    };
    let campaign = h
        .engine
        .create_campaign("Rescan", "clipshare", &config, t(9, 0))
        .unwrap();

    // First cycle: scan, then download n1 (no target accounts, so the
    // chain ends there).
    h.engine.trigger_campaign(&campaign.id, false, t(9, 0)).unwrap();
    drain_queue(&h, t(9, 0));
    drain_queue(&h, t(9, 30));
    assert_eq!(
        item_repo::find_by_native(h.engine.db(), "clipshare", "n1")
            .unwrap()
            .unwrap()
            .status,
        "downloaded"
    );

    // Second cycle re-discovers n1 but schedules nothing.
    h.engine.trigger_campaign(&campaign.id, false, t(10, 0)).unwrap();
    drain_queue(&h, t(10, 0));

    let (scans, _) = h
        .engine
        .list_jobs(&JobFilter {
            job_type: Some("scan".to_string()),
            ..Default::default()
        })
        .unwrap();
    let mut summaries: Vec<serde_json::Value> = scans
        .iter()
        .filter_map(|j| j.result.as_deref())
        .map(|r| serde_json::from_str(r).unwrap())
        .collect();
    summaries.sort_by_key(|s| s["scheduled"].as_u64());
    assert_eq!(summaries[0]["scheduled"], 0);
    assert_eq!(summaries[0]["skipped"], 1);
    assert_eq!(summaries[1]["scheduled"], 1);

    // Continuous mode + sources: the campaign stays alive.
    assert_ne!(
        campaign_repo::find_by_id(h.engine.db(), &campaign.id)
            .unwrap()
            .unwrap()
            .status,
        "finished"
    );
}

#[test]
fn test_edit_pipeline_routes_through_transformer() {
    let h = harness(ScriptedScanner::default(), ScriptedPublisher::immediate());
    insert_account(h.engine.db(), "acct-1", "reposter_one");

    let config = CampaignConfig {
        manual_items: vec![ManualItem {
            url: "https://clipshare.example/v/m1".to_string(),
            native_id: Some("m1".to_string()),
            caption: None,
        }],
        target_accounts: vec!["acct-1".to_string()],
        edit_pipeline: vec![EditStep {
            effect: "trim".to_string(),
            params: serde_json::json!({"seconds": 15}),
        }],
        interval_minutes: 10,
        ..Default::default()
    };
    let campaign = h
        .engine
        .create_campaign("Edited", "clipshare", &config, t(9, 0))
        .unwrap();
    h.engine.trigger_campaign(&campaign.id, false, t(9, 0)).unwrap();
    drain_queue(&h, t(9, 0));

    let item = item_repo::find_by_native(h.engine.db(), "clipshare", "m1")
        .unwrap()
        .unwrap();
    assert!(item.local_path.unwrap().ends_with("m1-edited.mp4"));
}

#[test]
fn test_pending_review_finalizes_via_background_poller() {
    let h = harness(ScriptedScanner::default(), ScriptedPublisher::reviewed(2));
    insert_account(h.engine.db(), "acct-1", "reposter_one");

    let config = CampaignConfig {
        manual_items: vec![ManualItem {
            url: "https://clipshare.example/v/m1".to_string(),
            native_id: Some("m1".to_string()),
            caption: None,
        }],
        target_accounts: vec!["acct-1".to_string()],
        interval_minutes: 10,
        ..Default::default()
    };
    let campaign = h
        .engine
        .create_campaign("Reviewed", "clipshare", &config, t(9, 0))
        .unwrap();
    h.engine.trigger_campaign(&campaign.id, false, t(9, 0)).unwrap();
    drain_queue(&h, t(9, 0));

    // Right after the publish job the item is held for review (the
    // poller may already have finalized it on a slow test machine).
    let item = item_repo::find_by_native(h.engine.db(), "clipshare", "m1")
        .unwrap()
        .unwrap();
    assert!(["reviewing", "published"].contains(&item.status.as_str()));

    // The detached poller confirms visibility and finalizes.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let status = item_repo::find_by_native(h.engine.db(), "clipshare", "m1")
            .unwrap()
            .unwrap()
            .status;
        if status == "published" {
            break;
        }
        assert!(Instant::now() < deadline, "poller never finalized the item");
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(h.publisher.visibility_checks.load(Ordering::SeqCst) >= 2);
}

#[test]
fn test_publish_without_session_fails_with_specific_error() {
    let h = harness(ScriptedScanner::default(), ScriptedPublisher::immediate());
    // Account exists but its session is invalid.
    recast::db::account_repo::insert(
        h.engine.db(),
        &recast::db::account_repo::AccountRow {
            id: "acct-1".to_string(),
            platform: "clipshare".to_string(),
            username: "reposter_one".to_string(),
            role: "target".to_string(),
            session_valid: false,
            session_data: None,
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
        },
    )
    .unwrap();

    let campaign = h
        .engine
        .create_campaign("NoSession", "clipshare", &manual_campaign_config(), t(9, 0))
        .unwrap();
    h.engine.trigger_campaign(&campaign.id, false, t(9, 0)).unwrap();

    // Download succeeds, publish fails fast.
    h.engine.queue().tick(t(9, 0));
    let outcome = h.engine.queue().tick(t(9, 0));
    assert!(matches!(outcome, TickOutcome::Dispatched { success: false, .. }));

    let (failed, total) = h
        .engine
        .list_jobs(&JobFilter {
            status: Some("failed".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(total, 1);
    assert!(failed[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("No valid session for account 'reposter_one'"));
    // No publish call ever reached the collaborator.
    assert!(h.publisher.publishes.lock().unwrap().is_empty());

    // Failed jobs stay failed until explicitly retried.
    assert_eq!(h.engine.queue().tick(t(9, 1)), TickOutcome::Idle);
    assert_eq!(h.engine.retry_failed_jobs(&campaign.id).unwrap(), 1);
    assert!(matches!(
        h.engine.queue().tick(t(9, 2)),
        TickOutcome::Dispatched { success: false, .. }
    ));
}

#[test]
fn test_fetch_cache_short_circuits_on_retry() {
    let h = harness(ScriptedScanner::default(), ScriptedPublisher::immediate());
    insert_account(h.engine.db(), "acct-1", "reposter_one");

    let config = CampaignConfig {
        manual_items: vec![ManualItem {
            url: "https://clipshare.example/v/m1".to_string(),
            native_id: Some("m1".to_string()),
            caption: None,
        }],
        target_accounts: vec![],
        interval_minutes: 10,
        ..Default::default()
    };
    let campaign = h
        .engine
        .create_campaign("Cache", "clipshare", &config, t(9, 0))
        .unwrap();

    h.engine.trigger_campaign(&campaign.id, false, t(9, 0)).unwrap();
    drain_queue(&h, t(9, 0));
    // Trigger the same item again; the second download hits the cache.
    h.engine.trigger_campaign(&campaign.id, true, t(10, 0)).unwrap();
    h.engine.trigger_campaign(&campaign.id, false, t(10, 0)).unwrap();
    drain_queue(&h, t(10, 0));

    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 2);
    let (downloads, _) = h
        .engine
        .list_jobs(&JobFilter {
            job_type: Some("download".to_string()),
            status: Some("completed".to_string()),
            ..Default::default()
        })
        .unwrap();
    let cached: Vec<bool> = downloads
        .iter()
        .map(|j| {
            serde_json::from_str::<serde_json::Value>(j.result.as_deref().unwrap()).unwrap()
                ["cached"]
                .as_bool()
                .unwrap()
        })
        .collect();
    assert!(cached.contains(&true), "second fetch must be a cache hit");
}

#[test]
fn test_recovery_shifts_overdue_schedule_forward() {
    let h = harness(ScriptedScanner::default(), ScriptedPublisher::immediate());
    insert_account(h.engine.db(), "acct-1", "reposter_one");

    let campaign = h
        .engine
        .create_campaign("Recover", "clipshare", &manual_campaign_config(), t(9, 0))
        .unwrap();
    h.engine.trigger_campaign(&campaign.id, false, t(9, 0)).unwrap();

    // Two hours later nothing ran (process was down). Both jobs are missed.
    let now = t(11, 0);
    let missed = h.engine.missed_jobs(now).unwrap();
    assert_eq!(missed.len(), 2);

    let ids: Vec<String> = missed.iter().map(|j| j.id.clone()).collect();
    assert_eq!(h.engine.recover_jobs(&ids, now).unwrap(), 2);

    let (jobs, _) = h.engine.list_jobs(&JobFilter::default()).unwrap();
    let mut slots: Vec<chrono::DateTime<Utc>> = jobs
        .iter()
        .map(|j| {
            recast::db::time::parse_timestamp(j.scheduled_for.as_deref().unwrap())
        })
        .collect();
    slots.sort();
    // Shifted past now, original 10-minute spacing preserved.
    assert!(slots[0] >= now);
    assert_eq!(slots[1] - slots[0], chrono::Duration::minutes(10));
    assert!(h.engine.missed_jobs(now).unwrap().is_empty());
}
