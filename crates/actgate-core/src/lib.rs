pub mod backup;
pub mod config;
pub mod error;
pub mod executor;
pub mod io;
pub mod paths;
pub mod process;
pub mod registry;
pub mod safety;
pub mod scanner;
pub mod types;

pub use error::{ActgateError, Result};
