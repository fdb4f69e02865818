//! Command handlers
//!
//! Each handler takes an already-loaded configuration and an open connection,
//! so the binary only deals with argument parsing and process exit codes.

use colored::Colorize;
use graphguard::config::RunMode;
use graphguard::migration::{
    ensure_declared_valid, run_migrations_with, ChangelogSource, ExecutionContexts, MigrationError,
    MigrationReport, MigrationStatus, Migrator,
};
use graphguard::{Connector, GraphConnection, MigrationConfig};
use std::path::Path;
use std::sync::Arc;

/// Apply pending changesets
///
/// # Errors
///
/// Returns `MigrationError` if the run fails; see [`run_migrations_with`].
pub fn run(
    config: &MigrationConfig,
    source: &dyn ChangelogSource,
    connection: &dyn GraphConnection,
    connector: Arc<dyn Connector>,
) -> Result<MigrationReport, MigrationError> {
    println!("Applying changesets from {}...", config.migration.changelog);
    let report = run_migrations_with(config, source, connection, connector)?;
    print!("{}", render_report(&report));
    Ok(report)
}

/// Print pending changesets to `output_dir/output.cypher` without applying them
///
/// # Errors
///
/// Returns `MigrationError` if the lock is unavailable, history is
/// inconsistent or the file cannot be written.
pub fn dry_run(
    config: &MigrationConfig,
    output_dir: &Path,
    source: &dyn ChangelogSource,
    connection: &dyn GraphConnection,
    connector: Arc<dyn Connector>,
) -> Result<MigrationReport, MigrationError> {
    let mut config = config.clone();
    config.migration.mode = RunMode::DryRun;
    config.migration.dry_run_output = output_dir.to_path_buf();

    let report = run_migrations_with(&config, source, connection, connector)?;
    print!("{}", render_report(&report));
    Ok(report)
}

/// Show applied and pending changesets
///
/// # Errors
///
/// Returns `MigrationError` if the changelog cannot be loaded or is
/// inconsistent with history.
pub fn status(
    config: &MigrationConfig,
    source: &dyn ChangelogSource,
    connection: &dyn GraphConnection,
) -> Result<MigrationStatus, MigrationError> {
    let declared = source.load(&config.migration.changelog)?;
    let migrator = Migrator::from_config(config);
    let status = migrator.status(connection, &declared)?;
    print!("{}", render_status(&status, migrator.contexts()));
    Ok(status)
}

/// Validate the changelog structure without a database
///
/// Returns the number of declared changesets.
///
/// # Errors
///
/// Returns `MigrationError::Validation` listing every problem found.
pub fn validate(config: &MigrationConfig, source: &dyn ChangelogSource) -> Result<usize, MigrationError> {
    println!("Validating {}...", config.migration.changelog);
    let declared = source.load(&config.migration.changelog)?;
    ensure_declared_valid(&declared)?;
    println!("{} {} changeset(s) valid", "✅".green(), declared.len());
    Ok(declared.len())
}

/// Human-readable summary of a run
#[must_use]
pub fn render_report(report: &MigrationReport) -> String {
    let mut out = String::new();
    if let Some(output) = &report.written.output {
        out.push_str(&format!(
            "📝 Dry run: {} changeset(s) written to {}\n",
            report.executed(),
            output.display()
        ));
        return out;
    }

    if report.written.total() == 0 {
        out.push_str(&format!("{} No changesets to apply\n", "✅".green()));
        return out;
    }
    for key in &report.written.executed {
        out.push_str(&format!("  {} {}\n", "✓".green(), key));
    }
    for key in &report.written.marked_as_executed {
        out.push_str(&format!("  {} {} (marked as executed)\n", "✓".yellow(), key));
    }
    for key in &report.written.skipped {
        out.push_str(&format!("  {} {} (skipped)\n", "↷".yellow(), key));
    }
    out.push_str(&format!(
        "\n📈 Summary: {} executed, {} marked as executed, {} skipped\n",
        report.executed(),
        report.marked_as_executed(),
        report.skipped()
    ));
    out
}

/// Human-readable applied/pending listing
#[must_use]
pub fn render_status(status: &MigrationStatus, contexts: &ExecutionContexts) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n📊 Migration Status (contexts: {contexts})\n\n"));

    if status.applied.is_empty() {
        out.push_str("✅ Applied Changesets: None\n");
    } else {
        out.push_str(&format!("✅ Applied Changesets ({}):\n", status.applied_count));
        for record in &status.applied {
            let time = record
                .executed_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "N/A".to_string());
            out.push_str(&format!(
                "  {} #{} {} by {} ({})\n",
                "✓".green(),
                record.order,
                record.id,
                record.author,
                time
            ));
        }
    }

    out.push('\n');

    if status.pending.is_empty() {
        out.push_str("⏳ Pending Changesets: None\n");
    } else {
        out.push_str(&format!("⏳ Pending Changesets ({}):\n", status.pending_count));
        for pending in &status.pending {
            out.push_str(&format!(
                "  ⏳ {} by {} ({})\n",
                pending.id,
                pending.author,
                pending.reason
            ));
        }
    }

    out.push_str(&format!(
        "\n📈 Summary: {} applied, {} pending\n",
        status.applied_count, status.pending_count
    ));
    out
}
