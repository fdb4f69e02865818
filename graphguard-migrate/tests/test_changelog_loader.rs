//! Tests for the TOML changelog loader

use graphguard::migration::{ChangelogSource, MigrationError, PreconditionErrorPolicy, PreconditionQuery};
use graphguard_migrate::{LoadError, TomlChangelogSource};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[test]
fn test_load_single_file() {
    let temp = TempDir::new().unwrap();
    write(
        temp.path(),
        "changelog.toml",
        r#"
[[changeset]]
id = "hello-world"
author = "fbiville"
query = "CREATE (n:Sentence {text:'Hello monde!'})"

[[changeset]]
id = "hello-world-fixed"
author = "fbiville"
queries = [
    "MATCH (n:Sentence {text:'Hello monde!'}) SET n.text='Hello world!'",
    "RETURN 1",
]
contexts = ["dev", "test"]
run-on-change = true
"#,
    );

    let source = TomlChangelogSource::new(temp.path());
    let changesets = source.load("changelog.toml").unwrap();

    assert_eq!(changesets.len(), 2);
    assert_eq!(changesets[0].id(), "hello-world");
    assert_eq!(changesets[0].queries(), ["CREATE (n:Sentence {text:'Hello monde!'})"]);
    assert!(!changesets[0].run_on_change());
    assert_eq!(changesets[1].queries().len(), 2);
    assert_eq!(changesets[1].contexts(), ["dev", "test"]);
    assert!(changesets[1].run_on_change());
    assert!(!changesets[1].run_always());
}

#[test]
fn test_imports_are_loaded_first_and_relative() {
    let temp = TempDir::new().unwrap();
    write(
        temp.path(),
        "changelog.toml",
        r#"
import = ["nested/first.toml", "second.toml"]

[[changeset]]
id = "master"
author = "fbiville"
query = "RETURN 'master'"
"#,
    );
    write(
        temp.path(),
        "nested/first.toml",
        r#"
import = ["../second.toml"]

[[changeset]]
id = "first"
author = "fbiville"
query = "RETURN 'first'"
"#,
    );
    write(
        temp.path(),
        "second.toml",
        r#"
[[changeset]]
id = "second"
author = "fbiville"
query = "RETURN 'second'"
"#,
    );

    let changesets = TomlChangelogSource::new(temp.path()).load("changelog.toml").unwrap();
    let ids: Vec<&str> = changesets.iter().map(|c| c.id()).collect();

    // second.toml is reached twice but loaded once
    assert_eq!(ids, vec!["second", "first", "master"]);
}

#[test]
fn test_import_cycle_is_rejected() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "a.toml", "import = [\"b.toml\"]\n");
    write(temp.path(), "b.toml", "import = [\"a.toml\"]\n");

    let err = TomlChangelogSource::new(temp.path())
        .load_file(&temp.path().join("a.toml"))
        .unwrap_err();

    match err {
        LoadError::Cycle(cycle) => {
            assert!(cycle.contains("a.toml -> "), "{cycle}");
            assert!(cycle.ends_with("a.toml"), "{cycle}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_precondition_tree() {
    let temp = TempDir::new().unwrap();
    write(
        temp.path(),
        "changelog.toml",
        r#"
[[changeset]]
id = "guarded"
author = "fbiville"
query = "CREATE (:Guarded)"

[changeset.precondition]
if-not-met = "mark-as-executed"
or = [
    { query = "RETURN false AS result" },
    { and = [
        { query = "RETURN true AS result" },
        { query = "MATCH (n) RETURN COUNT(n) = 0 AS result" },
    ] },
]
"#,
    );

    let changesets = TomlChangelogSource::new(temp.path()).load("changelog.toml").unwrap();
    let precondition = changesets[0].precondition().unwrap();

    assert_eq!(precondition.policy(), PreconditionErrorPolicy::MarkAsExecuted);
    assert_eq!(
        precondition.query(),
        &PreconditionQuery::or(
            PreconditionQuery::simple("RETURN false AS result"),
            PreconditionQuery::and(
                PreconditionQuery::simple("RETURN true AS result"),
                PreconditionQuery::simple("MATCH (n) RETURN COUNT(n) = 0 AS result"),
            ),
        )
    );
}

#[test]
fn test_compound_precondition_needs_two_children() {
    let temp = TempDir::new().unwrap();
    write(
        temp.path(),
        "changelog.toml",
        r#"
[[changeset]]
id = "broken"
author = "fbiville"
query = "RETURN 1"

[changeset.precondition]
if-not-met = "FAIL"
and = [{ query = "RETURN true AS result" }]
"#,
    );

    let err = TomlChangelogSource::new(temp.path())
        .load_file(&temp.path().join("changelog.toml"))
        .unwrap_err();

    match err {
        LoadError::InvalidEntry { position, reason, .. } => {
            assert_eq!(position, 1);
            assert!(reason.contains("exactly 2"), "{reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_unknown_policy_is_rejected() {
    let temp = TempDir::new().unwrap();
    write(
        temp.path(),
        "changelog.toml",
        r#"
[[changeset]]
id = "a"
author = "fbiville"
query = "RETURN 1"

[changeset.precondition]
if-not-met = "IGNORE"
query = "RETURN true AS result"
"#,
    );

    let err = TomlChangelogSource::new(temp.path()).load("changelog.toml").unwrap_err();
    assert!(matches!(err, MigrationError::Changelog(ref message) if message.contains("IGNORE")));
}

#[test]
fn test_blank_fields_reach_the_validator() {
    let temp = TempDir::new().unwrap();
    write(
        temp.path(),
        "changelog.toml",
        r#"
[[changeset]]
query = " "
"#,
    );

    let changesets = TomlChangelogSource::new(temp.path()).load("changelog.toml").unwrap();
    let errors = graphguard::migration::validate_declared(&changesets);
    assert_eq!(
        errors,
        vec![
            "Changeset 1 - 'id' should not be missing/blank",
            "Changeset 1 - 'author' should not be missing/blank",
            "Changeset 1 - 'query' should not be missing/blank",
        ]
    );
}

#[test]
fn test_missing_file_and_unknown_keys() {
    let temp = TempDir::new().unwrap();
    let source = TomlChangelogSource::new(temp.path());
    assert!(matches!(
        source.load_file(&temp.path().join("missing.toml")),
        Err(LoadError::Io { .. })
    ));

    write(temp.path(), "typo.toml", "[[changesets]]\nid = \"a\"\n");
    assert!(matches!(
        source.load_file(&temp.path().join("typo.toml")),
        Err(LoadError::Parse { .. })
    ));
}
