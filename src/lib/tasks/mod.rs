pub mod docker;
pub mod driver;
pub mod executor;
pub mod ledger;
pub mod state;
pub mod types;
