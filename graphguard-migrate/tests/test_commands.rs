//! Tests for the command handlers, against the in-memory graph

use graphguard::migration::{MigrationError, PendingReason};
use graphguard::test_helpers::InMemoryGraph;
use graphguard::MigrationConfig;
use graphguard_migrate::{commands, ConfigOverrides, TomlChangelogSource};
use std::fs;
use tempfile::TempDir;

const CHANGELOG: &str = r#"
[[changeset]]
id = "hello-world"
author = "fbiville"
query = "CREATE (n:Sentence {text:'Hello monde!'})"

[[changeset]]
id = "hello-world-fixed"
author = "fbiville"
query = "MATCH (n:Sentence {text:'Hello monde!'}) SET n.text='Hello world!'"

[[changeset]]
id = "staging-only"
author = "fbiville"
query = "CREATE (:Staging)"
contexts = ["staging"]
"#;

fn setup() -> (TempDir, MigrationConfig, TomlChangelogSource) {
    colored::control::set_override(false);
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("changelog.toml"), CHANGELOG).unwrap();

    let mut config = MigrationConfig::default();
    ConfigOverrides {
        changelog: Some("changelog.toml".to_string()),
        ..ConfigOverrides::default()
    }
    .apply(&mut config);

    let source = TomlChangelogSource::new(temp.path());
    (temp, config, source)
}

#[test]
fn test_validate_needs_no_database() {
    let (_temp, config, source) = setup();
    assert_eq!(commands::validate(&config, &source).unwrap(), 3);
}

#[test]
fn test_validate_reports_duplicates() {
    let (temp, config, source) = setup();
    fs::write(
        temp.path().join("changelog.toml"),
        format!("{CHANGELOG}\n[[changeset]]\nid = \"hello-world\"\nauthor = \"someone\"\nquery = \"RETURN 1\"\n"),
    )
    .unwrap();

    let err = commands::validate(&config, &source).unwrap_err();
    match err {
        MigrationError::Validation(errors) => assert_eq!(
            errors,
            vec!["Changeset IDs should be unique, duplicated IDs: hello-world"]
        ),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_run_then_status() {
    let (_temp, config, source) = setup();
    let graph = InMemoryGraph::new();
    let connection = graph.connection();

    let report = commands::run(&config, &source, &connection, graph.connector()).unwrap();
    assert_eq!(report.executed(), 3);

    let status = commands::status(&config, &source, &connection).unwrap();
    assert!(status.is_up_to_date());
    assert_eq!(status.applied_count, 3);
    let orders: Vec<i64> = status.applied.iter().map(|r| r.order).collect();
    assert_eq!(orders, vec![1, 2, 3]);
}

#[test]
fn test_contexts_override_filters_changesets() {
    let (_temp, mut config, source) = setup();
    ConfigOverrides {
        contexts: Some("production, eu".to_string()),
        ..ConfigOverrides::default()
    }
    .apply(&mut config);
    assert_eq!(config.migration.execution_contexts, vec!["eu", "production"]);

    let graph = InMemoryGraph::new();
    let connection = graph.connection();
    let report = commands::run(&config, &source, &connection, graph.connector()).unwrap();
    assert_eq!(report.executed(), 2);
    assert_eq!(graph.count("CREATE (:Staging)"), 0);
}

#[test]
fn test_status_lists_pending_changesets() {
    let (_temp, config, source) = setup();
    let graph = InMemoryGraph::new();

    let status = commands::status(&config, &source, &graph.connection()).unwrap();

    assert_eq!(status.pending_count, 3);
    assert!(status.pending.iter().all(|p| p.reason == PendingReason::New));

    let rendered = commands::render_status(&status, &graphguard::migration::ExecutionContexts::none());
    assert!(rendered.contains("Pending Changesets (3)"));
    assert!(rendered.contains("hello-world-fixed by fbiville (new)"));
    assert!(rendered.contains("Summary: 0 applied, 3 pending"));
}

#[test]
fn test_dry_run_writes_output_file() {
    let (temp, config, source) = setup();
    let graph = InMemoryGraph::new();
    let output_dir = temp.path().join("out");

    let report = commands::dry_run(&config, &output_dir, &source, &graph.connection(), graph.connector()).unwrap();

    assert!(report.dry_run);
    let output = fs::read_to_string(output_dir.join("output.cypher")).unwrap();
    assert!(output.starts_with("// graphguard changeset[author: fbiville, id: hello-world]\n"));
    assert!(graph.state().changelog.is_empty());

    let rendered = commands::render_report(&report);
    assert!(rendered.starts_with("📝 Dry run: 3 changeset(s) written to"));
}

#[test]
fn test_render_report_summary() {
    let (_temp, config, source) = setup();
    let graph = InMemoryGraph::new();
    let connection = graph.connection();

    let report = commands::run(&config, &source, &connection, graph.connector()).unwrap();
    let rendered = commands::render_report(&report);
    assert!(rendered.contains("✓ hello-world (author: fbiville)"));
    assert!(rendered.contains("Summary: 3 executed, 0 marked as executed, 0 skipped"));

    let again = commands::run(&config, &source, &connection, graph.connector()).unwrap();
    assert!(commands::render_report(&again).contains("No changesets to apply"));
}

#[test]
fn test_render_status_lists_applied_records() {
    let (_temp, config, source) = setup();
    let graph = InMemoryGraph::new();
    let connection = graph.connection();
    commands::run(&config, &source, &connection, graph.connector()).unwrap();

    let status = commands::status(&config, &source, &connection).unwrap();
    let rendered = commands::render_status(&status, &graphguard::migration::ExecutionContexts::none());

    assert!(rendered.contains("Applied Changesets (3):\n"));
    assert!(rendered.contains("#1 hello-world by fbiville ("));
    assert!(rendered.contains("Pending Changesets: None\n"));
    assert!(rendered.ends_with("Summary: 3 applied, 0 pending\n"));
}
