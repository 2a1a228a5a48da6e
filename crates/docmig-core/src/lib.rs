pub mod catalog;
pub mod config;
pub mod document;
pub mod error;
pub mod io;
pub mod migrations;
pub mod observe;
pub mod runner;
pub mod step;
pub mod store;
pub mod tags;
pub mod version;

pub use error::{MigrateError, Result, StoreError};
