pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{SettingsOverrides, load_settings};
pub use models::*;
pub use validation::{SettingsValidator, ValidationError, ValidationResult};
