//! End-to-end runs of the reconciliation pipeline against in-memory and
//! on-disk stores.

use std::sync::Mutex;

use async_trait::async_trait;
use playlog_core::config::{PlaylogConfig, StoreConfig};
use playlog_core::identity::{ProfileDocument, ProfileLoader};
use playlog_core::source::ActivityTable;
use playlog_core::store::{FileStore, KvMap, KvStore, MemoryStore};
use playlog_core::{ErrorCode, PageSnapshot, PlaylogError, Reconciler, RunOutcome};
use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

const ACTIVITY_PATH: &str = "/game/2dx/29/djdata/activity.html";

struct StaticProfile {
    id: Option<String>,
    requested: Mutex<Vec<String>>,
}

impl StaticProfile {
    fn with_id(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            requested: Mutex::new(Vec::new()),
        }
    }

    fn blank() -> Self {
        Self {
            id: None,
            requested: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ProfileLoader for StaticProfile {
    async fn load(&self, url: &str) -> Result<ProfileDocument, PlaylogError> {
        self.requested.lock().unwrap().push(url.to_string());
        let cell = |s: &str| Some(s.to_string());
        let mut rows = vec![
            vec![cell("DJ NAME"), cell("ALICE")],
            vec![cell("所属"), cell("TOKYO")],
        ];
        if let Some(id) = &self.id {
            rows.push(vec![cell("IIDX ID"), cell(id)]);
        }
        Ok(ProfileDocument::new(rows))
    }
}

struct HungProfile;

#[async_trait]
impl ProfileLoader for HungProfile {
    async fn load(&self, _url: &str) -> Result<ProfileDocument, PlaylogError> {
        std::future::pending().await
    }
}

fn page(rows: &[(&str, &str, &str)]) -> PageSnapshot {
    let mut cells = vec![vec!["日付", "鍵盤", "皿"]];
    cells.extend(rows.iter().map(|(d, k, s)| vec![*d, *k, *s]));
    PageSnapshot {
        path: ACTIVITY_PATH.to_string(),
        activity_table: Some(ActivityTable::from_text(cells)),
    }
}

fn object(value: Value) -> KvMap {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn seeded(value: Value) -> MemoryStore {
    MemoryStore::with_items(object(value), StoreConfig::default())
}

// ---------------------------------------------------------------------------
// Successful runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_run_writes_metadata_and_buckets() {
    let store = MemoryStore::default();
    let profile = StaticProfile::with_id("1234-5678");
    let config = PlaylogConfig::default();
    let reconciler = Reconciler::new(&store, &profile, &config).with_clock(|| 1_704_200_000);

    let outcome = reconciler
        .run(&page(&[
            ("2024/02/01", "3回", "0回"),
            ("2024/01/31", "7回", "2回"),
        ]))
        .await
        .expect("run succeeds");

    let RunOutcome::Updated(report) = outcome else {
        panic!("expected an update");
    };
    assert_eq!(report.player_id, "1234-5678");
    assert_eq!(report.entries_selected, 2);
    assert_eq!(report.buckets_written, 2);
    assert_eq!(report.watermark.date.as_str(), "20240201");

    assert_eq!(
        Value::Object(store.snapshot()),
        json!({
            "iidxId": "1234-5678",
            "lastDailyActivity": { "d": "20240201", "k": 3, "s": 0 },
            "updatedAt": 1_704_200_000,
            "29_202402": [{ "d": "20240201", "k": 3, "s": 0 }],
            "29_202401": [{ "d": "20240131", "k": 7, "s": 2 }],
        })
    );
    assert_eq!(store.writes(), 1);
    assert_eq!(
        profile.requested.lock().unwrap().as_slice(),
        ["https://p.eagate.573.jp/game/2dx/29/djdata/status.html"]
    );
}

#[tokio::test]
async fn only_rows_past_watermark_are_written() {
    let store = seeded(json!({
        "iidxId": "1234-5678",
        "lastDailyActivity": { "d": "20240101", "k": 5, "s": 1 },
        "updatedAt": 1,
        "29_202401": [{ "d": "20240101", "k": 5, "s": 1 }],
    }));
    let profile = StaticProfile::with_id("1234-5678");
    let config = PlaylogConfig::default();
    let reconciler = Reconciler::new(&store, &profile, &config).with_clock(|| 2);

    let outcome = reconciler
        .run(&page(&[
            ("2024/01/02", "7回", "2回"),
            ("2024/01/01", "5回", "1回"),
        ]))
        .await
        .expect("run succeeds");
    assert!(matches!(outcome, RunOutcome::Updated(ref r) if r.entries_selected == 1));

    let stored = store.snapshot();
    assert_eq!(
        stored["29_202401"],
        json!([{ "d": "20240101", "k": 5, "s": 1 }, { "d": "20240102", "k": 7, "s": 2 }])
    );
    assert_eq!(stored["lastDailyActivity"], json!({ "d": "20240102", "k": 7, "s": 2 }));
    assert_eq!(stored["updatedAt"], json!(2));
}

#[tokio::test]
async fn unchanged_page_is_no_update_without_write() {
    let store = MemoryStore::default();
    let profile = StaticProfile::with_id("1234-5678");
    let config = PlaylogConfig::default();
    let reconciler = Reconciler::new(&store, &profile, &config);
    let snapshot = page(&[("2024/01/02", "7回", "2回"), ("2024/01/01", "5回", "1回")]);

    reconciler.run(&snapshot).await.expect("first run");
    let before = store.snapshot();

    let outcome = reconciler.run(&snapshot).await.expect("second run");
    assert_eq!(outcome, RunOutcome::NoUpdate);
    assert_eq!(store.snapshot(), before);
    assert_eq!(store.writes(), 1);
}

#[tokio::test]
async fn same_day_revision_updates_bucket_in_place() {
    let store = MemoryStore::default();
    let profile = StaticProfile::with_id("1234-5678");
    let config = PlaylogConfig::default();
    let reconciler = Reconciler::new(&store, &profile, &config);

    reconciler
        .run(&page(&[("2024/01/02", "7回", "2回"), ("2024/01/01", "5回", "1回")]))
        .await
        .expect("first run");
    reconciler
        .run(&page(&[("2024/01/02", "9回", "2回"), ("2024/01/01", "5回", "1回")]))
        .await
        .expect("revision run");

    let stored = store.snapshot();
    assert_eq!(
        stored["29_202401"],
        json!([{ "d": "20240102", "k": 9, "s": 2 }, { "d": "20240101", "k": 5, "s": 1 }])
    );
    assert_eq!(stored["lastDailyActivity"], json!({ "d": "20240102", "k": 9, "s": 2 }));

    let again = reconciler
        .run(&page(&[("2024/01/02", "9回", "2回")]))
        .await
        .expect("rerun");
    assert_eq!(again, RunOutcome::NoUpdate);
}

#[tokio::test]
async fn untouched_buckets_survive_partial_overwrite() {
    let store = seeded(json!({
        "iidxId": "1234-5678",
        "lastDailyActivity": { "d": "20231231", "k": 4, "s": 4 },
        "updatedAt": 1,
        "29_202312": [{ "d": "20231231", "k": 4, "s": 4 }],
        "28_202311": [{ "d": "20231101", "k": 1, "s": 0 }],
        "count": 3,
    }));
    let profile = StaticProfile::with_id("1234-5678");
    let config = PlaylogConfig::default();
    let reconciler = Reconciler::new(&store, &profile, &config);

    reconciler
        .run(&page(&[("2024/01/01", "1回", "0回")]))
        .await
        .expect("run succeeds");

    let stored = store.snapshot();
    assert_eq!(stored["29_202312"], json!([{ "d": "20231231", "k": 4, "s": 4 }]));
    assert_eq!(stored["28_202311"], json!([{ "d": "20231101", "k": 1, "s": 0 }]));
    assert_eq!(stored["count"], json!(3));
    assert_eq!(stored["29_202401"], json!([{ "d": "20240101", "k": 1, "s": 0 }]));
}

// ---------------------------------------------------------------------------
// Failed runs write nothing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identity_mismatch_aborts_before_write() {
    let store = seeded(json!({
        "iidxId": "9999-0000",
        "lastDailyActivity": { "d": "20240101", "k": 5, "s": 1 },
        "updatedAt": 1,
    }));
    let before = store.snapshot();
    let profile = StaticProfile::with_id("1234-5678");
    let config = PlaylogConfig::default();
    let reconciler = Reconciler::new(&store, &profile, &config);

    let err = reconciler
        .run(&page(&[("2024/01/02", "7回", "2回")]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PlaylogError::IdentityMismatch { ref stored, ref resolved }
            if stored == "9999-0000" && resolved == "1234-5678"
    ));
    assert_eq!(store.snapshot(), before);
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn missing_table_is_not_found() {
    let store = MemoryStore::default();
    let profile = StaticProfile::with_id("1234-5678");
    let config = PlaylogConfig::default();
    let reconciler = Reconciler::new(&store, &profile, &config);

    let snapshot = PageSnapshot {
        path: ACTIVITY_PATH.to_string(),
        activity_table: None,
    };
    let err = reconciler.run(&snapshot).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    assert!(profile.requested.lock().unwrap().is_empty());
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn unexpected_path_is_version_not_found() {
    let store = MemoryStore::default();
    let profile = StaticProfile::with_id("1234-5678");
    let config = PlaylogConfig::default();
    let reconciler = Reconciler::new(&store, &profile, &config);

    let mut snapshot = page(&[("2024/01/02", "7回", "2回")]);
    snapshot.path = "/game/2dx/activity.html".to_string();

    let err = reconciler.run(&snapshot).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::VersionNotFound);
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn profile_without_id_is_identity_not_found() {
    let store = MemoryStore::default();
    let profile = StaticProfile::blank();
    let config = PlaylogConfig::default();
    let reconciler = Reconciler::new(&store, &profile, &config);

    let err = reconciler
        .run(&page(&[("2024/01/02", "7回", "2回")]))
        .await
        .unwrap_err();
    assert!(matches!(err, PlaylogError::IdentityNotFound { .. }));
    assert_eq!(store.writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn hung_profile_load_is_logged_and_swallowed() {
    let store = MemoryStore::default();
    let mut config = PlaylogConfig::default();
    config.identity.load_timeout_ms = 100;
    let reconciler = Reconciler::new(&store, &HungProfile, &config);

    let outcome = reconciler
        .run_logged(&page(&[("2024/01/02", "7回", "2回")]))
        .await;
    assert_eq!(outcome, None);
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn quota_violation_writes_nothing() {
    let store = MemoryStore::new(StoreConfig {
        quota_bytes_per_item: 64,
        ..StoreConfig::default()
    });
    let profile = StaticProfile::with_id("1234-5678");
    let config = PlaylogConfig::default();
    let reconciler = Reconciler::new(&store, &profile, &config);

    // Three entries in one month bucket exceed 64 bytes.
    let err = reconciler
        .run(&page(&[
            ("2024/01/03", "1回", "1回"),
            ("2024/01/02", "1回", "1回"),
            ("2024/01/01", "1回", "1回"),
        ]))
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::StoreQuotaExceeded);
    assert!(store.snapshot().is_empty());
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn file_store_persists_across_reconcilers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sync/storage.json");
    let profile = StaticProfile::with_id("1234-5678");
    let config = PlaylogConfig::default();

    {
        let store = FileStore::new(&path, config.store);
        Reconciler::new(&store, &profile, &config)
            .run(&page(&[("2024/01/01", "5回", "1回")]))
            .await
            .expect("first run");
    }

    let store = FileStore::new(&path, config.store);
    let outcome = Reconciler::new(&store, &profile, &config)
        .run(&page(&[("2024/01/02", "7回", "2回"), ("2024/01/01", "5回", "1回")]))
        .await
        .expect("second run");
    assert!(matches!(outcome, RunOutcome::Updated(_)));

    let all = store.get_all().await.expect("read back");
    assert_eq!(
        all["29_202401"],
        json!([{ "d": "20240101", "k": 5, "s": 1 }, { "d": "20240102", "k": 7, "s": 2 }])
    );
    assert!(!path.with_extension("json.tmp").exists());
}

#[tokio::test]
async fn corrupt_store_file_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("storage.json");
    std::fs::write(&path, "not json").expect("write");

    let store = FileStore::new(&path, StoreConfig::default());
    let profile = StaticProfile::with_id("1234-5678");
    let config = PlaylogConfig::default();

    let err = Reconciler::new(&store, &profile, &config)
        .run(&page(&[("2024/01/01", "5回", "1回")]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::StoreUnavailable);
    assert_eq!(std::fs::read_to_string(&path).expect("read"), "not json");
}
