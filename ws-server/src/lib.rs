//! Workspace server composition root.

pub mod bootstrap;
pub mod config;
pub mod server;
pub mod tasks;

pub use config::Config;
pub use server::Server;
