//! Connections domain - broker connections rendered from named templates

pub mod activities;
pub mod templates;

pub use activities::create_connection;
pub use templates::{ConnectionSpec, ConnectionTemplates, TemplateError};
