use chrono::{TimeZone, Utc};
use listsync_core::{Email, ListId, Mutation, MutationOutcome, SyncConfig};
use listsync_engine::report::{Direction, ListStatus, ListSummary, MutationRecord};
use listsync_engine::testing::{contact, FakeDestination, FakeSource};
use listsync_engine::{pipeline, ManualClock, Platforms, RunOptions, RunReport};
use listsync_notify::{Renderer, SummaryKind};
use tempfile::TempDir;

fn record(mutation: Mutation, outcome: MutationOutcome) -> MutationRecord {
    MutationRecord {
        direction: Direction::Forward,
        list: Some(ListId::from("718")),
        idempotency_key: mutation.idempotency_key(),
        mutation,
        outcome,
    }
}

fn mixed_report() -> RunReport {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let mut report = RunReport::new(start, false);
    report.lists.push(ListSummary {
        direction: Direction::Forward,
        list: ListId::from("718"),
        name: Some("General".into()),
        tag: Some("General".into()),
        members: 2,
        status: ListStatus::Synced,
        error: None,
    });
    report.lists.push(ListSummary {
        direction: Direction::Forward,
        list: ListId::from("719"),
        name: None,
        tag: None,
        members: 0,
        status: ListStatus::Failed,
        error: Some("503 from \"crm\"".into()),
    });
    let alice = Email::parse("alice@x.com").unwrap();
    report.mutations.push(record(
        Mutation::ApplyTag { contact: alice.clone(), tag: "General".into() },
        MutationOutcome::Success,
    ));
    report.mutations.push(record(
        Mutation::Archive { contact: alice },
        MutationOutcome::PermanentFailure { attempts: 3, error: "rate limited".into() },
    ));
    report.archival.skipped_reason = Some("a list failed to fetch".into());
    report.finish(start + chrono::Duration::seconds(5));
    report
}

#[test]
fn text_summary_shows_counts_lists_and_failures() {
    let renderer = Renderer::new().unwrap();
    let text = renderer.render(&mixed_report(), SummaryKind::Text).unwrap();

    assert!(text.starts_with("listsync run completed with failures"));
    assert!(text.contains("1 applied, 0 retried, 1 failed"));
    assert!(text.contains("[forward] 718 \"General\" -> General: 2 members"));
    assert!(text.contains("719: FAILED"));
    assert!(text.contains("archive alice@x.com after 3 attempt(s): rate limited"));
    assert!(text.contains("skipped (a list failed to fetch)"));
}

#[test]
fn card_escapes_quotes_and_stays_valid_json() {
    let renderer = Renderer::new().unwrap();
    let card = renderer.render_card(&mixed_report()).unwrap();

    assert_eq!(card["listsync"]["status"], "failures");
    let blocks = card["blocks"].as_array().unwrap();
    let texts: Vec<String> = blocks.iter().map(|b| b.to_string()).collect();
    assert!(texts.iter().any(|t| t.contains("503 from \\\"crm\\\"")));
    assert_eq!(card["listsync"]["archival"]["ran"], false);
}

#[test]
fn aborted_run_is_announced() {
    let renderer = Renderer::new().unwrap();
    let mut report = mixed_report();
    report.aborted = Some("authentication failed: audience".into());

    let text = renderer.render(&report, SummaryKind::Text).unwrap();
    assert!(text.starts_with("listsync run aborted"));
    assert!(text.contains("Aborted: authentication failed: audience"));

    let card = renderer.render_card(&report).unwrap();
    assert_eq!(card["listsync"]["status"], "aborted");
    assert!(card.to_string().contains("*Aborted:* authentication failed"));
}

#[test]
fn override_directory_replaces_embedded_template() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("summary.txt.tera"),
        "{{ status }}: {{ totals.total }} mutation(s)",
    )
    .unwrap();
    let renderer = Renderer::with_overrides(dir.path()).unwrap();

    let text = renderer.render(&mixed_report(), SummaryKind::Text).unwrap();
    assert_eq!(text, "failures: 2 mutation(s)");
    assert!(renderer.render_card(&mixed_report()).is_ok());
}

#[test]
fn summary_of_a_real_forward_run() {
    let state = TempDir::new().unwrap();
    let crm = FakeSource::new();
    crm.add_list(
        "718",
        "General",
        vec![contact("c1", "alice@x.com"), contact("c2", "bob@x.com")],
    );
    let audience = FakeDestination::new();
    let crm_writes = FakeDestination::new();
    let platforms = Platforms {
        crm_lists: &crm,
        audience: &audience,
        exit_tags: &audience,
        crm: &crm_writes,
    };
    let mut config = SyncConfig::default();
    config.forward.lists = vec![ListId::from("718")];
    let report = pipeline::run(
        &config,
        state.path(),
        &platforms,
        &ManualClock::default(),
        RunOptions::default(),
    )
    .unwrap();

    let renderer = Renderer::new().unwrap();
    let text = renderer.render(&report, SummaryKind::Text).unwrap();
    assert!(text.starts_with("listsync run completed"));
    assert!(text.contains("718 \"General\" -> General: 2 members"));
    let card = renderer.render_card(&report).unwrap();
    assert_eq!(card["listsync"]["status"], "ok");
}
