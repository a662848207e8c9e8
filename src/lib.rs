//! Satellite-operations control platform core: event bus, layered config,
//! Auth Core, Artifact Store, Plugin Engine, GS Connector, and the HTTP
//! surface tying them together. See `README.md` for the bootstrap sequence
//! `main.rs` drives this library through.

#[macro_use]
extern crate tracing;

pub mod app;
pub mod artifact;
pub mod auth;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod gs;
pub mod http;
pub mod log;
pub mod plugin;
pub mod task;
