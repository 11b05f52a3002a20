//! The bundled onboarding demo loads and targets the subjects it documents.

use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use drip_config::CampaignConfig;
use drip_core::SubjectId;
use drip_runtime::bootstrap;
use tokio_util::sync::CancellationToken;

fn demo_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/onboarding")
}

/// Copy the demo into a scratch dir so ledger and outbox writes stay out of
/// the source tree.
fn scratch_copy() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("drips")).unwrap();
    for file in ["drip.toml", "subjects.jsonl", "drips/onboarding.toml"] {
        std::fs::copy(demo_dir().join(file), dir.path().join(file)).unwrap();
    }
    dir
}

#[tokio::test]
async fn onboarding_demo_targets() {
    let dir = scratch_copy();
    let config = CampaignConfig::load(dir.path().join("drip.toml")).unwrap();
    assert_eq!(config.drips.len(), 4);
    let campaign = bootstrap(&config, dir.path()).await.unwrap();
    let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();

    let expect = [
        ("welcome", "u1"),
        ("getting-started", "u2"),
        ("upgrade-nudge", "u5"),
    ];
    for (rule, subject) in expect {
        let preview = campaign.timeline(rule, 0, 0, now).await.unwrap();
        let ids: Vec<_> = preview[0].will_send().into_iter().collect();
        assert_eq!(ids, vec![SubjectId::from(subject)], "drip {rule}");
    }

    let report = campaign
        .run_once(now, 0, 0, &CancellationToken::new())
        .await;
    assert!(report.is_clean());
    assert_eq!(report.sent(), 3);
    assert_eq!(report.disabled, vec!["winback".to_string()]);

    let message = campaign
        .render("getting-started", &SubjectId::from("u4"))
        .await
        .unwrap();
    assert_eq!(message.mime_type, "text/html");
    assert_eq!(
        String::from_utf8(message.content).unwrap(),
        "<p>Hi there, here is what Acme can do.</p>"
    );
}
