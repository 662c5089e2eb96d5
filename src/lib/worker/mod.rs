pub mod config;
pub mod coordinator;
pub mod stats;
pub mod types;
pub mod worker;
