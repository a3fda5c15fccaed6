//! Configuration loading, env substitution, overrides and validation.
//!
//! Config files: `paird.toml`, `paird.yaml`, `paird.yml` or `paird.json`,
//! searched in `./` then the user config directory (`~/.config/paird/`).
//!
//! String values may reference the environment with `${VAR}` or
//! `${VAR:-fallback}`.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{
        Error, apply_env_overrides, apply_env_overrides_with, config_dir, discover_and_load,
        load_config, redacted_toml,
    },
    schema::{AuthConfig, PairdConfig, ServerConfig, SessionsConfig, SidecarConfig},
    validate::{Diagnostic, Severity, validate},
};
