mod support;

use handsync_cloud::{
    NullInstaller, PauseSignal, StageStatus, SyncEngine, SyncError, SyncProgress,
};
use handsync_storage::{DrainReport, FileUploadRecord};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use support::{form_fields, pattern, Harness, ALICE};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, ResponseTemplate};

fn engine(h: &Harness) -> SyncEngine {
    SyncEngine::new(Arc::clone(&h.ctx), Arc::new(NullInstaller))
}

async fn no_directives(h: &Harness) {
    Mock::given(method("POST"))
        .and(path("/directives"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "directives": [] })),
        )
        .mount(&h.server)
        .await;
}

async fn accept_saves(h: &Harness) {
    Mock::given(method("POST"))
        .and(path("/save"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&h.server)
        .await;
}

/// Serves the whole upload protocol for a single-chunk file.
async fn accept_uploads(h: &Harness) {
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "uploadLink": h.link("/bucket/upload") })),
        )
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/bucket/upload"))
        .respond_with(ResponseTemplate::new(200).insert_header("Location", h.link("/session/1")))
        .mount(&h.server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/session/1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/verify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "verified": true })))
        .mount(&h.server)
        .await;
}

// ── Full cycle ──

#[tokio::test]
async fn cycle_uploads_everything_and_reports_progress() {
    let h = Harness::start().await;
    no_directives(&h).await;
    accept_saves(&h).await;
    accept_uploads(&h).await;

    h.ctx.add_key_value("clipData-1", "{\"n\":1}").unwrap();
    h.ctx.add_key_value("clipData-2", "{\"n\":2}").unwrap();
    h.write_file("videos/1.mp4", &pattern(2048));
    h.ctx.register_file("videos/1.mp4").unwrap();

    let mut events = Vec::new();
    let report = engine(&h)
        .sync_once(&PauseSignal::new(), |p| events.push(p))
        .await
        .unwrap();

    assert!(report.is_success(), "{report:?}");
    assert_eq!(
        events,
        vec![
            SyncProgress::Directives,
            SyncProgress::KeyValue { index: 1, total: 2 },
            SyncProgress::KeyValue { index: 2, total: 2 },
            SyncProgress::File {
                index: 1,
                total: 1,
                path: "videos/1.mp4".to_string()
            },
        ]
    );
    assert!(h.ctx.key_values().is_empty().unwrap());
    assert!(h.ctx.files().is_empty().unwrap());
    assert!(!h.exists("videos/1.mp4"));

    let saves = h.requests_to("/save").await;
    assert_eq!(saves.len(), 2);
    let first = form_fields(&saves[0]);
    assert_eq!(first["key"], "clipData-1");
    assert_eq!(first["value"], "{\"n\":1}");
    assert_eq!(first["login_token"], ALICE);
}

#[tokio::test]
async fn overwritten_key_is_posted_once_with_last_value() {
    let h = Harness::start().await;
    no_directives(&h).await;
    accept_saves(&h).await;

    h.ctx.add_key_value("state", "first").unwrap();
    h.ctx.add_key_value("state", "second").unwrap();

    let report = engine(&h)
        .sync_once(&PauseSignal::new(), |_| {})
        .await
        .unwrap();
    assert!(report.is_success());

    let saves = h.requests_to("/save").await;
    assert_eq!(saves.len(), 1);
    assert_eq!(form_fields(&saves[0])["value"], "second");
}

// ── Partial failure ──

#[tokio::test]
async fn key_value_failure_keeps_rest_and_still_uploads_files() {
    let h = Harness::start().await;
    no_directives(&h).await;
    Mock::given(method("POST"))
        .and(path("/save"))
        .and(body_string_contains("key=k3"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&h.server)
        .await;
    accept_saves(&h).await;
    accept_uploads(&h).await;

    for i in 1..=5 {
        h.ctx.add_key_value(&format!("k{i}"), &format!("v{i}")).unwrap();
    }
    h.write_file("a.mp4", &pattern(100));
    h.ctx.register_file("a.mp4").unwrap();

    let report = engine(&h)
        .sync_once(&PauseSignal::new(), |_| {})
        .await
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(
        report.key_values,
        StageStatus::Incomplete(DrainReport {
            total: 5,
            acknowledged: 2,
            deferred: 0,
            failed_at: Some(2),
        })
    );
    assert_eq!(report.files, StageStatus::Completed);

    let left: Vec<String> = h
        .ctx
        .key_values()
        .snapshot()
        .unwrap()
        .into_iter()
        .map(|e| e.key)
        .collect();
    assert_eq!(left, vec!["k3", "k4", "k5"]);
    assert_eq!(h.ctx.key_values().get("k4").unwrap().as_deref(), Some("v4"));
    assert!(h.ctx.files().is_empty().unwrap());
}

#[tokio::test]
async fn directive_failure_does_not_block_drains() {
    let h = Harness::start().await;
    Mock::given(method("POST"))
        .and(path("/directives"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&h.server)
        .await;
    accept_saves(&h).await;
    h.ctx.add_key_value("k", "v").unwrap();

    let report = engine(&h)
        .sync_once(&PauseSignal::new(), |_| {})
        .await
        .unwrap();
    assert!(matches!(report.directives, StageStatus::Failed(_)));
    assert_eq!(report.key_values, StageStatus::Completed);
    assert!(h.ctx.key_values().is_empty().unwrap());
}

#[tokio::test]
async fn missing_file_is_dropped_and_others_continue() {
    let h = Harness::start().await;
    no_directives(&h).await;
    accept_uploads(&h).await;

    h.ctx.register_file("gone.mp4").unwrap();
    h.write_file("here.mp4", &pattern(10));
    h.ctx.register_file("here.mp4").unwrap();

    let report = engine(&h)
        .sync_once(&PauseSignal::new(), |_| {})
        .await
        .unwrap();
    assert_eq!(report.files, StageStatus::Completed);
    assert!(h.ctx.files().is_empty().unwrap());
}

#[tokio::test]
async fn unusable_files_do_not_block_later_ones() {
    let h = Harness::start().await;
    no_directives(&h).await;
    accept_uploads(&h).await;

    h.write_file("empty.mp4", b"");
    h.ctx.register_file("empty.mp4").unwrap();
    h.write_file("bad.mp4", &pattern(10));
    let mut bad = FileUploadRecord::new("bad.mp4");
    bad.file_size = Some(10);
    bad.md5 = Some("zz".to_string());
    h.ctx.files().save(&bad).unwrap();
    h.write_file("good.mp4", &pattern(10));
    h.ctx.register_file("good.mp4").unwrap();

    let report = engine(&h)
        .sync_once(&PauseSignal::new(), |_| {})
        .await
        .unwrap();
    assert_eq!(report.files, StageStatus::Completed);
    assert!(!h.exists("good.mp4"));

    // The bad digest was discarded and is recomputed next cycle.
    let left: Vec<FileUploadRecord> = h.ctx.files().snapshot().unwrap();
    assert_eq!(left, vec![FileUploadRecord::new("bad.mp4")]);

    let report = engine(&h)
        .sync_once(&PauseSignal::new(), |_| {})
        .await
        .unwrap();
    assert_eq!(report.files, StageStatus::Completed);
    assert!(h.ctx.files().is_empty().unwrap());
}

#[tokio::test]
async fn credential_change_applies_to_later_stages() {
    let h = Harness::start().await;
    let bob = "bob:00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";
    Mock::given(method("POST"))
        .and(path("/directives"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "directives": [
                { "id": "c1", "op": "changeUser",
                  "value": serde_json::json!({ "loginToken": bob }).to_string() },
                { "id": "n2", "op": "noop", "value": "" },
            ]
        })))
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/directive_completed"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&h.server)
        .await;
    accept_saves(&h).await;
    h.ctx.add_key_value("k", "v").unwrap();

    let report = engine(&h)
        .sync_once(&PauseSignal::new(), |_| {})
        .await
        .unwrap();
    assert_eq!(report.directives, StageStatus::Stopped);
    assert!(report.is_success());

    let acks = h.requests_to("/directive_completed").await;
    assert_eq!(acks.len(), 1);
    assert_eq!(form_fields(&acks[0])["login_token"], ALICE);
    let saves = h.requests_to("/save").await;
    assert_eq!(form_fields(&saves[0])["login_token"], bob);
}

// ── Guards ──

#[tokio::test]
async fn requires_an_account() {
    let h = Harness::start_with(None).await;
    let err = engine(&h)
        .sync_once(&PauseSignal::new(), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::AuthRequired));
    assert!(h.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn cycles_do_not_overlap() {
    let h = Harness::start().await;
    Mock::given(method("POST"))
        .and(path("/directives"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "directives": [] }))
                .set_delay(std::time::Duration::from_millis(300)),
        )
        .mount(&h.server)
        .await;

    let engine = engine(&h);
    let pause = PauseSignal::new();
    let (first, second) = tokio::join!(engine.sync_once(&pause, |_| {}), async {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        engine.sync_once(&pause, |_| {}).await
    });
    assert!(first.unwrap().is_success());
    assert!(matches!(second, Err(SyncError::CycleInProgress)));
}

#[tokio::test]
async fn pause_ends_cycle_without_touching_queues() {
    let h = Harness::start().await;
    h.ctx.add_key_value("k", "v").unwrap();

    let pause = PauseSignal::new();
    pause.pause();
    let report = engine(&h).sync_once(&pause, |_| {}).await.unwrap();

    assert_eq!(report.directives, StageStatus::Paused);
    assert_eq!(report.key_values, StageStatus::Skipped);
    assert_eq!(report.files, StageStatus::Skipped);
    assert!(report.was_paused());
    assert!(!report.is_success());
    assert_eq!(h.ctx.key_values().len().unwrap(), 1);
    assert!(h.server.received_requests().await.unwrap().is_empty());
}
