//! Persona server library: image jobs, chat relay and the HTTP surface.
//!
//! The modules are public so that the binary and the end-to-end tests can
//! assemble the server from the same pieces.

pub mod auth;
pub mod chat;
pub mod config;
pub mod images;
pub mod jobs;
pub mod persistence;
pub mod relay;
pub mod server;
pub mod storage;
pub mod upstream;

pub use server::{make_app, run_server, RequestsLoggingLevel, ServerState};
