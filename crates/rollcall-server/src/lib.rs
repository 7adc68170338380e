//! # rollcall-server
//!
//! The thin layer between actors and the engine: typed inbound actions,
//! the organizer allow-list, a worker pool, reply rendering and a console
//! adapter for local use.

pub mod access;
pub mod action;
pub mod console;
pub mod error;
pub mod orchestrator;
pub mod render;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use access::AccessPolicy;
pub use action::{Action, Inbound};
pub use console::{run_console, ConsoleMessenger};
pub use error::ServerError;
pub use orchestrator::{Orchestrator, Reply};
pub use worker::{ServerConfig, WorkerPool};
