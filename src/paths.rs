//! Virtual ↔ platform path mapping.
//!
//! The editor only ever sees paths rooted at [`VIRTUAL_WORKDIR`]; the
//! platform file manager only ever sees relative paths (no leading slash,
//! forward slashes, no `..` segments). This module is the single boundary
//! between the two, and every platform call goes through it.

use crate::error::RuntimeError;

/// The fixed workdir the editor mounts the project under.
pub const VIRTUAL_WORKDIR: &str = "/home/project";

/// Dependency-manifest files at the project root whose write triggers a
/// compose redeploy. Matched case-insensitively, root only.
const REDEPLOY_TRIGGERS: &[&str] = &[
    "package.json",
    "package-lock.json",
    "pnpm-lock.yaml",
    "yarn.lock",
    "bun.lockb",
    "docker-compose.yml",
];

fn invalid_path() -> RuntimeError {
    RuntimeError::bad_request("Invalid runtime path")
}

fn reject_traversal(path: &str) -> Result<(), RuntimeError> {
    if path.split('/').any(|segment| segment == "..") {
        return Err(invalid_path());
    }
    Ok(())
}

/// Map an editor path to the platform-relative form.
pub fn to_platform_path(virtual_path: &str) -> Result<String, RuntimeError> {
    let normalized = virtual_path.replace('\\', "/");

    let workdir_slash = format!("{VIRTUAL_WORKDIR}/");
    let relative = if normalized == VIRTUAL_WORKDIR || normalized == workdir_slash {
        ""
    } else if let Some(rest) = normalized.strip_prefix(workdir_slash.as_str()) {
        rest
    } else {
        normalized.trim_start_matches('/')
    };
    let relative = relative.trim_end_matches('/');

    reject_traversal(relative)?;
    Ok(relative.to_string())
}

/// Map a platform-relative path back under the virtual workdir.
pub fn to_virtual_path(platform_path: &str) -> Result<String, RuntimeError> {
    let normalized = platform_path.replace('\\', "/");
    let relative = normalized.trim_start_matches('/').trim_end_matches('/');

    reject_traversal(relative)?;
    if relative.is_empty() {
        Ok(VIRTUAL_WORKDIR.to_string())
    } else {
        Ok(format!("{VIRTUAL_WORKDIR}/{relative}"))
    }
}

/// True iff the path is one of the root-level dependency manifests whose
/// write requires a redeploy. Nested copies do not count.
pub fn is_redeploy_trigger_path(virtual_path: &str) -> bool {
    let Ok(platform) = to_platform_path(virtual_path) else {
        return false;
    };
    let lowered = platform.to_lowercase();
    REDEPLOY_TRIGGERS.contains(&lowered.as_str())
}
