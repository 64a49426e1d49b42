//! Concrete task-server integrations.

/// OpenCode (`opencode serve`) over HTTP and server-sent events.
pub mod opencode;
