// ─── Sync subsystem ─────────────────────────────────────────────────
// The two jobs (yearly cohort capture, monthly details sync), the
// operation log they both write, and the decrease alert over their output.

pub mod alert;
pub mod cohort;
pub mod details;
pub mod runlog;

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::SyncConfig;
use crate::notify::Notifier;
use crate::upstream::UpstreamReader;

/// Everything a job needs, injected once at startup. No ambient globals,
/// so tests can swap the upstream and the notifier.
pub struct SyncDeps {
    pub local: PgPool,
    pub upstream: Arc<dyn UpstreamReader>,
    pub notifier: Arc<dyn Notifier>,
    pub branches: Vec<String>,
    pub config: SyncConfig,
}
