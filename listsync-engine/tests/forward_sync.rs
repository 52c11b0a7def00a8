use std::time::Duration;

use listsync_core::{ContactStatus, ListId, MutationKind, SyncConfig};
use listsync_engine::name_map;
use listsync_engine::report::{self, WarningKind};
use listsync_engine::testing::{contact, FakeDestination, FakeSource, Op};
use listsync_engine::{pipeline, ManualClock, Pacer, PlatformError, Platforms, RunOptions, RunReport};
use tempfile::TempDir;

fn config(lists: &[&str]) -> SyncConfig {
    let mut config = SyncConfig::default();
    config.forward.lists = lists.iter().map(|l| ListId::from(*l)).collect();
    config
}

fn run_with(
    config: &SyncConfig,
    state: &TempDir,
    crm: &FakeSource,
    audience: &FakeDestination,
    opts: RunOptions,
) -> RunReport {
    let _ = env_logger::builder().is_test(true).try_init();
    let crm_writes = FakeDestination::new();
    let platforms = Platforms {
        crm_lists: crm,
        audience,
        exit_tags: audience,
        crm: &crm_writes,
    };
    let clock = ManualClock::default();
    pipeline::run(config, state.path(), &platforms, &clock, opts).expect("run")
}

fn run(config: &SyncConfig, state: &TempDir, crm: &FakeSource, audience: &FakeDestination) -> RunReport {
    run_with(config, state, crm, audience, RunOptions::default())
}

fn kinds_for(report: &RunReport, email: &str) -> Vec<MutationKind> {
    report
        .mutations
        .iter()
        .filter(|m| m.mutation.contact().is_some_and(|c| c.as_str() == email))
        .map(|m| m.mutation.kind())
        .collect()
}

#[test]
fn alice_and_bob_across_two_passes() {
    let state = TempDir::new().expect("state");
    let crm = FakeSource::new();
    crm.add_list("1", "A", vec![contact("c1", "alice@x.com"), contact("c2", "bob@x.com")]);
    crm.add_list("2", "B", vec![contact("c2", "bob@x.com")]);
    let audience = FakeDestination::new();
    let config = config(&["1", "2"]);

    let first = run(&config, &state, &crm, &audience);
    assert!(first.aborted.is_none());
    assert_eq!(audience.tags("alice@x.com"), vec!["A"]);
    assert_eq!(audience.tags("bob@x.com"), vec!["A", "B"]);
    assert_eq!(audience.field_value("bob@x.com", "ORI_LISTS").as_deref(), Some("1,2"));
    assert_eq!(first.totals.all.success, 5);

    crm.remove_member("1", "c2");
    let second = run(&config, &state, &crm, &audience);

    assert_eq!(audience.tags("bob@x.com"), vec!["B"]);
    assert_eq!(audience.tags("alice@x.com"), vec!["A"]);
    assert_eq!(audience.status("bob@x.com"), Some(ContactStatus::Subscribed));
    assert_eq!(audience.field_value("bob@x.com", "ORI_LISTS").as_deref(), Some("2"));
    assert_eq!(
        kinds_for(&second, "bob@x.com"),
        vec![MutationKind::RemoveTag, MutationKind::Update]
    );
    assert!(kinds_for(&second, "alice@x.com").is_empty());
}

#[test]
fn unchanged_snapshot_plans_nothing_the_second_time() {
    let state = TempDir::new().expect("state");
    let crm = FakeSource::new();
    crm.add_list("1", "A", vec![contact("c1", "alice@x.com"), contact("c2", "bob@x.com")]);
    crm.add_list("2", "B", vec![contact("c2", "bob@x.com")]);
    let audience = FakeDestination::new();
    let config = config(&["1", "2"]);

    run(&config, &state, &crm, &audience);
    let writes = audience.write_calls();
    let second = run(&config, &state, &crm, &audience);

    assert!(second.mutations.is_empty(), "{:?}", second.mutations);
    assert_eq!(audience.write_calls(), writes);
}

#[test]
fn existing_record_is_reused_not_duplicated() {
    let state = TempDir::new().expect("state");
    let crm = FakeSource::new();
    crm.add_list("1", "A", vec![contact("c1", "  ALICE@x.com ")]);
    let audience = FakeDestination::new();
    audience.seed("alice@x.com", ContactStatus::Unsubscribed, &[]);
    let config = config(&["1"]);

    run(&config, &state, &crm, &audience);
    run(&config, &state, &crm, &audience);

    assert_eq!(audience.record_count(), 1);
    assert_eq!(audience.count_calls(Op::Create), 0);
    assert_eq!(audience.status("alice@x.com"), Some(ContactStatus::Subscribed));
    assert_eq!(audience.tags("alice@x.com"), vec!["A"]);
}

#[test]
fn failed_list_closes_the_archival_gate() {
    let state = TempDir::new().expect("state");
    let crm = FakeSource::new();
    crm.add_list("1", "A", vec![contact("c1", "alice@x.com")]);
    crm.add_list("2", "B", vec![contact("c2", "bob@x.com")]);
    let audience = FakeDestination::new();
    let config = config(&["1", "2"]);
    run(&config, &state, &crm, &audience);

    crm.remove_member("1", "c1");
    crm.break_list("2", PlatformError::transient("503"));
    let second = run(&config, &state, &crm, &audience);

    assert_eq!(audience.status("alice@x.com"), Some(ContactStatus::Subscribed));
    assert!(!second.archival.ran);
    assert_eq!(second.failed_lists().count(), 1);
    assert!(second
        .warnings
        .iter()
        .any(|w| w.kind == WarningKind::ListFetchFailed));
    assert_eq!(audience.tags("bob@x.com"), vec!["B"]);

    crm.restore_list("2");
    let third = run(&config, &state, &crm, &audience);
    assert!(third.archival.ran);
    assert_eq!(audience.status("alice@x.com"), Some(ContactStatus::Archived));
    assert_eq!(audience.status("bob@x.com"), Some(ContactStatus::Subscribed));
}

#[test]
fn archive_supersedes_tag_removal() {
    let state = TempDir::new().expect("state");
    let crm = FakeSource::new();
    crm.add_list("1", "A", vec![contact("c1", "alice@x.com"), contact("c2", "bob@x.com")]);
    let audience = FakeDestination::new();
    let config = config(&["1"]);
    run(&config, &state, &crm, &audience);

    crm.remove_member("1", "c1");
    let second = run(&config, &state, &crm, &audience);

    assert_eq!(kinds_for(&second, "alice@x.com"), vec![MutationKind::Archive]);
    assert_eq!(audience.status("alice@x.com"), Some(ContactStatus::Archived));
    assert_eq!(second.archival.candidates, 1);
}

#[test]
fn exempt_contacts_lose_the_tag_but_stay() {
    let state = TempDir::new().expect("state");
    let crm = FakeSource::new();
    crm.add_list("1", "A", vec![contact("c1", "alice@x.com"), contact("c2", "bob@x.com")]);
    let audience = FakeDestination::new();
    audience.seed("alice@x.com", ContactStatus::Subscribed, &["VIP"]);
    let config = config(&["1"]);
    run(&config, &state, &crm, &audience);
    assert_eq!(audience.tags("alice@x.com"), vec!["A", "VIP"]);

    crm.remove_member("1", "c1");
    let second = run(&config, &state, &crm, &audience);

    assert_eq!(audience.status("alice@x.com"), Some(ContactStatus::Subscribed));
    assert_eq!(audience.tags("alice@x.com"), vec!["VIP"]);
    assert_eq!(second.archival.exempt, 1);
}

#[test]
fn contacts_the_engine_never_synced_are_left_alone() {
    let state = TempDir::new().expect("state");
    let crm = FakeSource::new();
    crm.add_list("1", "A", vec![contact("c1", "alice@x.com")]);
    let audience = FakeDestination::new();
    audience.seed("carol@x.com", ContactStatus::Subscribed, &["Event_Summit"]);
    let config = config(&["1"]);

    let report = run(&config, &state, &crm, &audience);

    assert!(report.archival.ran);
    assert_eq!(audience.status("carol@x.com"), Some(ContactStatus::Subscribed));
    assert_eq!(audience.tags("carol@x.com"), vec!["Event_Summit"]);
    assert!(kinds_for(&report, "carol@x.com").is_empty());
}

#[test]
fn dry_run_writes_nothing_but_the_report() {
    let state = TempDir::new().expect("state");
    let crm = FakeSource::new();
    crm.add_list("1", "A", vec![contact("c1", "alice@x.com")]);
    let audience = FakeDestination::new();
    let config = config(&["1"]);

    let opts = RunOptions {
        dry_run: true,
        ..RunOptions::default()
    };
    let report = run_with(&config, &state, &crm, &audience, opts);

    assert_eq!(audience.write_calls(), 0);
    assert_eq!(report.totals.all.would_apply, 2);
    assert!(!name_map::map_path_at(state.path()).exists());
    let saved = report::latest_at(state.path()).expect("latest").expect("saved");
    assert!(saved.dry_run);
}

#[test]
fn rejected_credentials_abort_before_any_mutation() {
    let state = TempDir::new().expect("state");
    let crm = FakeSource::new();
    crm.add_list("1", "A", vec![contact("c1", "alice@x.com")]);
    crm.fail_next(Op::VerifyAccess, PlatformError::auth("401 Unauthorized"), 1);
    let audience = FakeDestination::new();

    let report = run(&config(&["1"]), &state, &crm, &audience);

    assert!(report.aborted.as_deref().is_some_and(|m| m.contains("401")));
    assert_eq!(audience.total_calls(), 0);
    assert!(report::latest_at(state.path()).expect("latest").is_some());
}

#[test]
fn auth_failure_mid_run_stops_the_queue() {
    let state = TempDir::new().expect("state");
    let crm = FakeSource::new();
    crm.add_list("1", "A", vec![contact("c1", "alice@x.com"), contact("c2", "bob@x.com")]);
    let audience = FakeDestination::new();
    audience.fail_next(Op::ApplyTag, PlatformError::auth("key revoked"), 1);

    let report = run(&config(&["1"]), &state, &crm, &audience);

    assert!(report.aborted.is_some());
    assert!(audience.record("bob@x.com").is_none());
}

#[test]
fn transient_failures_are_isolated_per_mutation() {
    let state = TempDir::new().expect("state");
    let crm = FakeSource::new();
    crm.add_list("1", "A", vec![contact("c1", "alice@x.com"), contact("c2", "bob@x.com")]);
    let audience = FakeDestination::new();
    audience.fail_next(Op::ApplyTag, PlatformError::transient("timeout"), 3);

    let report = run(&config(&["1"]), &state, &crm, &audience);

    assert!(report.aborted.is_none());
    assert_eq!(report.totals.all.permanent_failure, 1);
    assert!(!audience.has_tag("alice@x.com", "A"));
    assert!(audience.has_tag("bob@x.com", "A"));

    let retry = run(&config(&["1"]), &state, &crm, &audience);
    assert!(audience.has_tag("alice@x.com", "A"));
    assert_eq!(retry.totals.all.permanent_failure, 0);
}

#[test]
fn hard_excluded_members_are_never_synced() {
    let state = TempDir::new().expect("state");
    let crm = FakeSource::new();
    crm.add_list("1", "A", vec![contact("c1", "alice@x.com"), contact("c2", "bob@x.com")]);
    crm.add_list("99", "Do not contact", vec![contact("c2", "bob@x.com")]);
    let audience = FakeDestination::new();
    let mut config = config(&["1"]);
    config.forward.hard_exclude_lists = vec![ListId::from("99")];

    let report = run(&config, &state, &crm, &audience);

    assert!(audience.record("bob@x.com").is_none());
    assert!(audience.record("alice@x.com").is_some());
    assert!(report.warnings.iter().any(|w| w.kind == WarningKind::HardExcluded));
}

#[test]
fn failed_exclude_list_skips_every_forward_list() {
    let state = TempDir::new().expect("state");
    let crm = FakeSource::new();
    crm.add_list("1", "A", vec![contact("c1", "alice@x.com")]);
    crm.add_list("99", "Do not contact", vec![]);
    crm.break_list("99", PlatformError::transient("502"));
    let audience = FakeDestination::new();
    let mut config = config(&["1"]);
    config.forward.hard_exclude_lists = vec![ListId::from("99")];

    let report = run(&config, &state, &crm, &audience);

    assert_eq!(audience.write_calls(), 0);
    assert_eq!(report.failed_lists().count(), 1);
    assert!(!report.archival.ran);
}

#[test]
fn contact_limit_disables_retraction_and_archival() {
    let state = TempDir::new().expect("state");
    let crm = FakeSource::new();
    crm.add_list(
        "1",
        "A",
        vec![contact("c1", "alice@x.com"), contact("c2", "bob@x.com"), contact("c3", "carol@x.com")],
    );
    let audience = FakeDestination::new();
    audience.seed("old@x.com", ContactStatus::Subscribed, &["A"]);
    let mut config = config(&["1"]);
    config.execution.contact_limit = 1;

    let report = run(&config, &state, &crm, &audience);

    assert!(audience.record("alice@x.com").is_some());
    assert!(audience.record("bob@x.com").is_none());
    assert!(audience.has_tag("old@x.com", "A"));
    assert_eq!(report.archival.skipped_reason.as_deref(), Some("contact limit active"));
}

#[test]
fn unrepairable_schema_aborts_the_pass() {
    let state = TempDir::new().expect("state");
    let crm = FakeSource::new();
    crm.add_list("1", "A", vec![contact("c1", "alice@x.com")]);
    let audience = FakeDestination::new();
    audience.strict_fields(&[]);
    audience.fail_next(Op::CreateField, PlatformError::validation("merge field limit reached"), 1);

    let report = run(&config(&["1"]), &state, &crm, &audience);

    assert!(report.aborted.as_deref().is_some_and(|m| m.contains("ORI_LISTS")));
    assert_eq!(audience.count_calls(Op::Create), 0);
}

#[test]
fn missing_fields_are_created_up_front() {
    let state = TempDir::new().expect("state");
    let crm = FakeSource::new();
    crm.add_list("1", "A", vec![contact("c1", "alice@x.com")]);
    let audience = FakeDestination::new();
    audience.strict_fields(&["FNAME", "LNAME"]);

    let report = run(&config(&["1"]), &state, &crm, &audience);

    assert!(report.aborted.is_none());
    assert_eq!(audience.count_calls(Op::CreateField), 10);
    assert_eq!(audience.field_value("alice@x.com", "ORI_LISTS").as_deref(), Some("1"));
}

#[test]
fn every_destination_call_is_spaced() {
    let state = TempDir::new().expect("state");
    let crm = FakeSource::new();
    crm.add_list("1", "A", vec![contact("c1", "alice@x.com"), contact("c2", "bob@x.com")]);
    let clock = ManualClock::shared();
    let audience = FakeDestination::new().with_pacer(Pacer::new(Duration::from_millis(200), clock.clone()));
    let crm_writes = FakeDestination::new();
    let platforms = Platforms {
        crm_lists: &crm,
        audience: &audience,
        exit_tags: &audience,
        crm: &crm_writes,
    };

    pipeline::run(&config(&["1"]), state.path(), &platforms, &*clock, RunOptions::default()).expect("run");

    let sleeps = clock.sleeps();
    assert_eq!(sleeps.len(), audience.total_calls() - 1);
    assert!(sleeps.iter().all(|d| *d == Duration::from_millis(200)));
}

#[test]
fn invalid_config_is_an_error_not_a_report() {
    let state = TempDir::new().expect("state");
    let crm = FakeSource::new();
    let audience = FakeDestination::new();
    let crm_writes = FakeDestination::new();
    let platforms = Platforms {
        crm_lists: &crm,
        audience: &audience,
        exit_tags: &audience,
        crm: &crm_writes,
    };
    let clock = ManualClock::default();

    let err = pipeline::run(&SyncConfig::default(), state.path(), &platforms, &clock, RunOptions::default())
        .unwrap_err();
    assert!(err.to_string().contains("forward.lists"), "{err}");
    assert!(report::latest_at(state.path()).expect("latest").is_none());
}
