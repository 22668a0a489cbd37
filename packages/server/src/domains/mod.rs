// Business domains
pub mod connections;
pub mod devices;
pub mod executions;
pub mod messaging;
pub mod sites;
pub mod things;
