pub mod config;
pub mod error;
pub mod types;

pub use config::{BackendPreference, LoreConfig};
pub use error::{LoreError, Result};
pub use types::*;
