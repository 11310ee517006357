//! Process configuration.
//!
//! [`AppConfig`] is assembled once from defaults, an optional TOML file and
//! `CONFSYNC__*` environment variables, then passed by reference to every
//! component that needs a section of it.

pub mod models;

pub use models::*;
