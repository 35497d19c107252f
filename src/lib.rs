pub mod alert;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod ledger;
pub mod probe;
pub mod report;
pub mod session;
pub mod worker;

pub use config::Config;
pub use error::Error;
pub use ledger::{ConnectionState, OutageLedger, OutageRecord};
pub use session::Session;
pub use worker::{Monitor, Transition};
