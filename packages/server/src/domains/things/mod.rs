//! Things domain - remote digital twins
//!
//! Gateway things are created here with a uniqueness guarantee on one
//! attribute. Device things are never created locally, only searched and
//! patched.

pub mod activities;
pub mod error;

pub use activities::{create_unique_thing, delete_thing, patch_thing_attributes, CreateThingRequest};
pub use error::ThingError;
