//! Configuration loading, validation, and env substitution.
//!
//! Config files: `parley.toml`, `parley.yaml`, or `parley.json`
//! Searched in `./` then `~/.config/parley/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{config_dir, discover_and_load, find_config_file, load_config},
    schema::{
        LimitEntry, OpenAiConfig, ParleyConfig, PresetConfig, RatelimitConfig, RenderMode,
        ResponseConfig, SystemConfig, TextToImageConfig, TextToSpeechConfig, TriggerConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate_config},
};
