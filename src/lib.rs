pub mod artifacts;
pub mod cli;
pub mod config;
pub mod handoff;
pub mod harness_log;
pub mod homeserver_config;
pub mod installer;
pub mod launcher;
pub mod lifecycle;
pub mod probe;
pub mod readiness;
pub mod runtime_state;
pub mod shutdown;
pub mod sinks;
pub mod workflow;
