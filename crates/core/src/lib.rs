#![forbid(unsafe_code)]

pub mod error;
pub mod integrity;
pub mod ledger;
pub mod model;
pub mod policy;
pub mod progression;
pub mod time;

pub use error::Error;
pub use time::Clock;
