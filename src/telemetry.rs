//! Telemetry metric name constants.
//!
//! Centralised metric names for cardsmith operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `cardsmith_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `operation`: pipeline step: "generate", "backfill" or "uncached"
//! - `status`: outcome: "ok" or "error"
//! - `outcome`: cache lookup result: "reserved", "done", "in_progress"

/// Cache lookups, by outcome.
///
/// Labels: `outcome` ("reserved" | "done" | "in_progress").
pub const CACHE_LOOKUPS_TOTAL: &str = "cardsmith_cache_lookups_total";

/// Failed or abandoned records replaced by a fresh reservation.
pub const CACHE_REPLACED_TOTAL: &str = "cardsmith_cache_replaced_total";

/// Calls made to the external generation service.
///
/// Labels: `operation`, `status` ("ok" | "error").
pub const GENERATION_CALLS_TOTAL: &str = "cardsmith_generation_calls_total";

/// External generation call duration in seconds.
///
/// Labels: `operation`.
pub const GENERATION_DURATION_SECONDS: &str = "cardsmith_generation_duration_seconds";

/// Backfill jobs that found nothing left to generate at execution time.
pub const BACKFILL_SKIPPED_TOTAL: &str = "cardsmith_backfill_skipped_total";

/// Jobs finished by the worker pool.
///
/// Labels: `operation` ("generate" | "backfill"), `status` ("ok" | "error").
pub const JOBS_TOTAL: &str = "cardsmith_jobs_total";

/// Failed documents removed by cleanup.
pub const CLEANUPS_TOTAL: &str = "cardsmith_cleanups_total";
