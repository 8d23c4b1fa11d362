//! The Zeitgeist engine: extension pipeline, monitor fan-out and the
//! built-in extensions, driven by a single-task daemon.
//!
//! [`Engine`] is the façade every log operation goes through. [`Daemon`]
//! runs it on one task and hands out [`Handle`]s to clients.

pub mod bus;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod extension;
pub mod extensions;
pub mod monitor;
pub mod network;
pub mod persist;
pub mod volume;

#[cfg(test)]
pub(crate) mod testing;

pub use config::EngineConfig;
pub use daemon::{Daemon, Handle};
pub use engine::Engine;
pub use error::{Error, Result};
pub use extension::{Extension, ExtensionCollection, ExtensionContext, Notification};
