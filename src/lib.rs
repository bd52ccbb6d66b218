//! bolt-runtime brokers short-lived remote development workspaces.
//!
//! A browser editor asks for a workspace for a (actor, chat) pair; the
//! service provisions or reuses a compose deployment on the platform,
//! seeds it with a project template, exposes a preview domain, and returns
//! a signed session token. Scoped file operations, heartbeat lease
//! renewal, and an idle sweeper round out the lifecycle. The `client`
//! module is the editor-side SDK over the same HTTP surface.

pub mod client;
pub mod config;
pub mod error;
pub mod metadata;
pub mod paths;
pub mod platform;
pub mod rollout;
pub mod server;
pub mod session;
pub mod single_flight;
pub mod token;
