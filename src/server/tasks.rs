use std::future::Future;

use tokio::task::JoinHandle;
use tracing::Instrument;

/// Spawn a background task for one protocol phase, tagged with a span so
/// per-round work can be traced across servers.
pub fn spawn_phase<F, S>(name: S, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
    S: Into<String>,
{
    let name = name.into();
    let span = tracing::info_span!("phase", phase_name = %name);
    tokio::spawn(future.instrument(span))
}
