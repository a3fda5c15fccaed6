use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::PairdConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["paird.toml", "paird.yaml", "paird.yml", "paird.json"];

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported config format: .{0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSerialize(#[from] toml::ser::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<PairdConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./paird.{toml,yaml,yml,json}`
/// 2. `~/.config/paird/paird.{toml,yaml,yml,json}`
///
/// Returns `PairdConfig::default()` if no config file is found or the file
/// fails to parse.
pub fn discover_and_load() -> PairdConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    PairdConfig::default()
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/paird/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "paird").map(|d| d.config_dir().to_path_buf())
}

/// Apply process environment overrides on top of a loaded config.
pub fn apply_env_overrides(config: &mut PairdConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

/// Apply environment overrides using a custom lookup.
///
/// `PORT` and `ADMIN_TOKEN` are honoured unprefixed because hosting
/// platforms set them that way.
pub fn apply_env_overrides_with(config: &mut PairdConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(port) = get("PORT") {
        match port.trim().parse() {
            Ok(port) => config.server.port = port,
            Err(e) => warn!(value = %port, error = %e, "ignoring invalid PORT"),
        }
    }
    if let Some(bind) = get("PAIRD_BIND") {
        config.server.bind = bind;
    }
    if let Some(token) = get("PAIRD_ADMIN_TOKEN").or_else(|| get("ADMIN_TOKEN")) {
        config.auth.admin_token = Some(Secret::new(token));
    }
    if let Some(flag) = get("PAIRD_PROTECT_READS") {
        config.auth.protect_reads = matches!(flag.as_str(), "1" | "true" | "yes");
    }
    if let Some(dir) = get("PAIRD_SESSIONS_DIR") {
        config.sessions.dir = PathBuf::from(dir);
    }
    if let Some(url) = get("PAIRD_SIDECAR_URL") {
        config.sidecar.url = url;
    }
    if let Some(dir) = get("PAIRD_SIDECAR_DIR") {
        config.sidecar.dir = Some(PathBuf::from(dir));
    }
}

/// Serialize `config` to TOML with the admin token masked.
pub fn redacted_toml(config: &PairdConfig) -> Result<String> {
    let mut value = toml::Value::try_from(config)?;
    if let Some(auth) = value.get_mut("auth").and_then(|v| v.as_table_mut())
        && auth.contains_key("admin_token")
    {
        auth.insert("admin_token".into(), toml::Value::String("[REDACTED]".into()));
    }
    Ok(toml::to_string_pretty(&value)?)
}

fn parse_config(raw: &str, path: &Path) -> Result<PairdConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::UnsupportedFormat(ext.to_string())),
    }
}
