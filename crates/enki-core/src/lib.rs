pub mod error;
pub mod types;
pub mod config;
pub mod store;
pub mod vault;
pub mod catalog;
pub mod session;
pub mod gate;
pub mod provider;
pub mod service;
pub mod util;

pub use error::{EnkiError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");
pub const LOGO: &str = "💬";
