//! OpenCode task-server integration.
//!
//! `OpenCodeLauncher` starts or attaches to `opencode serve`; the handle it
//! returns speaks the session, status and event-feed endpoints over HTTP.
mod adapter;
mod config;
mod launcher;
mod transport;

pub use adapter::OpenCodeServer;
pub use config::{DEFAULT_PORT, OpenCodeClientConfig};
pub use launcher::OpenCodeLauncher;
