//! Configuration types and loading for safegrub

mod defaults;
mod model;
pub mod paths;
mod settings;

pub use defaults::{GrubDefaults, MANDATORY_KEYS};
pub use model::GrubSettings;
pub use settings::{AppConfig, Commands, Limits};
