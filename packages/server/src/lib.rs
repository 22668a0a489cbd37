// Device Management Backend - API Core
//
// This crate provisions gateway sites and configures device fleets against a
// digital-twin platform. Multi-step remote work runs as sagas: every step is
// retried, and a failed site is rolled back by compensating what was created.
//
// Workflows are organized per-domain in domains/*/

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
