pub mod config;
pub mod error;
pub mod repository;
pub mod types;

pub use config::HelplineConfig;
pub use error::{HelplineError, Result};
pub use repository::SupportRepository;
pub use types::*;
