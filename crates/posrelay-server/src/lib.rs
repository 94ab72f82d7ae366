pub mod config;
pub mod connection;
pub mod registry;
pub mod server;
pub mod session;
pub mod snapshot;
