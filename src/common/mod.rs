pub mod config;
pub mod dev_mode;
pub mod error;
pub mod paths;

pub use config::{Config, ReferencePolicy};
pub use dev_mode::DevMode;
pub use error::{ErrorKind, Result, SecureAuthError, VerificationError};
pub use paths::{resolve_model_path, system_config_file, system_models_dir};
