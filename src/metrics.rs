//! Observability hooks
//!
//! - `metrics` feature: OpenTelemetry counters for migration runs, recorded
//!   against the global meter provider installed by the host application.
//! - `tracing` feature: span helpers used around statements, changesets and
//!   lock acquisition.

#[cfg(feature = "metrics")]
pub use self::otel::{MigrationMetrics, METRICS};

#[cfg(feature = "metrics")]
mod otel {
    use once_cell::sync::Lazy;
    use opentelemetry::{global, metrics::Counter, KeyValue};

    pub static METRICS: Lazy<MigrationMetrics> = Lazy::new(MigrationMetrics::init);

    pub struct MigrationMetrics {
        pub changesets_total: Counter<u64>,
        pub lock_failures_total: Counter<u64>,
    }

    impl MigrationMetrics {
        pub fn init() -> Self {
            let meter = global::meter("graphguard");

            let changesets_total = meter
                .u64_counter("graphguard_changesets_total")
                .with_description("Changesets processed, by outcome")
                .build();

            let lock_failures_total = meter
                .u64_counter("graphguard_lock_failures_total")
                .with_description("Failed migration lock acquisitions")
                .build();

            Self {
                changesets_total,
                lock_failures_total,
            }
        }

        /// `outcome` is one of `executed`, `marked`, `skipped`
        pub fn record_changeset(&self, outcome: &'static str) {
            self.changesets_total.add(1, &[KeyValue::new("outcome", outcome)]);
        }

        pub fn record_lock_failure(&self) {
            self.lock_failures_total.add(1, &[]);
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    /// Statements are truncated so spans stay readable
    const STATEMENT_PREVIEW_LEN: usize = 120;

    fn preview(statement: &str) -> &str {
        let trimmed = statement.trim();
        match trimmed.char_indices().nth(STATEMENT_PREVIEW_LEN) {
            Some((idx, _)) => &trimmed[..idx],
            None => trimmed,
        }
    }

    #[must_use]
    pub fn statement_span(statement: &str) -> Span {
        info_span!("graphguard.statement", statement = preview(statement))
    }

    #[must_use]
    pub fn changeset_span(id: &str, author: &str) -> Span {
        info_span!("graphguard.changeset", id = id, author = author)
    }

    #[must_use]
    pub fn precondition_span(id: &str) -> Span {
        info_span!("graphguard.precondition", changeset = id)
    }

    #[must_use]
    pub fn lock_span(uuid: &str) -> Span {
        info_span!("graphguard.lock", uuid = uuid)
    }

}
