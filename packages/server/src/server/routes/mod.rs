// HTTP routes
pub mod devices;
pub mod error;
pub mod executions;
pub mod health;
pub mod sites;

pub use devices::*;
pub use error::ApiError;
pub use executions::*;
pub use health::*;
pub use sites::*;
