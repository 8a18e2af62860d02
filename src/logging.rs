//! Subscriber setup for `tracing` output.

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{ChangeError, Result};

/// Directives used when the caller passes an empty filter: the queue and
/// pipeline at `info`, everything else at `warn`.
pub const DEFAULT_FILTER: &str = "warn,sombra_changeset=info";

/// Installs a global `tracing` subscriber filtered by `filter`
/// (any `EnvFilter` directive, e.g. `sombra_changeset::queue=trace`).
///
/// An empty `filter` falls back to [`DEFAULT_FILTER`]. Phase timings are
/// logged under the `sombra_changeset::queue` target.
pub fn init_logging(filter: &str) -> Result<()> {
    fmt()
        .with_env_filter(build_filter(filter)?)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| ChangeError::InvalidArgument("change queue logging already initialized".into()))
}

fn build_filter(filter: &str) -> Result<EnvFilter> {
    let directives = match filter.trim() {
        "" => DEFAULT_FILTER,
        given => given,
    };
    EnvFilter::try_new(directives)
        .map_err(|e| ChangeError::InvalidArgument(format!("invalid log filter {directives:?}: {e}")))
}
