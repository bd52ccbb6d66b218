//! Editor-side SDK for the runtime service.
//!
//! The pieces an editor embeds to drive a remote workspace over the
//! service's HTTP API: session lifecycle with visibility-aware timers, a
//! mirrored file tree with optimistic writes, per-file write coalescing, a
//! short-TTL listing cache, preview-state projection, and a refresh
//! scheduler that backs off while the tab is hidden.

pub mod api;
pub mod coalescer;
pub mod dir_cache;
pub mod mirror;
pub mod preview;
pub mod scheduler;
pub mod session;
#[cfg(test)]
pub(crate) mod test_support;

pub use api::{HttpRuntimeApi, RuntimeApi};
pub use coalescer::{WriteCoalescer, WriteReceipt, WriteStatus};
pub use dir_cache::DirectoryCache;
pub use mirror::RemoteFilesMirror;
pub use preview::{PreviewState, project};
pub use scheduler::{RefreshBackoff, RefreshScheduler};
pub use session::{EnsureSessionOptions, SessionClient, SessionClientOptions};

use crate::error::RuntimeError;
use session::SessionSnapshot;

/// Bring a workspace up for editing: ensure the session exists, then pull
/// the full remote tree into the mirror. Pair with
/// [`RefreshScheduler::start`] for the ongoing background sync.
pub async fn bootstrap_workspace(
    client: &SessionClient,
    mirror: &RemoteFilesMirror,
    options: EnsureSessionOptions,
) -> Result<Option<SessionSnapshot>, RuntimeError> {
    let Some(snapshot) = client.ensure_session(options).await? else {
        return Ok(None);
    };
    let Some(token) = snapshot.runtime_token.as_deref() else {
        return Ok(Some(snapshot));
    };
    mirror.refresh_from_remote(token, true).await?;
    Ok(Some(snapshot))
}
