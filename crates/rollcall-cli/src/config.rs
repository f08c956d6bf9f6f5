use rollcall_core::EngineConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error(transparent)]
    Invalid(#[from] rollcall_core::config::ConfigError),
}

/// CLI configuration: engine parameters plus where the database lives.
#[derive(Debug, Clone)]
pub struct Config {
    pub engine: EngineConfig,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
}

/// On-disk layout of `config.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    #[serde(default)]
    engine: EngineConfig,
}

impl Config {
    /// Load the optional TOML file, then apply `ROLLCALL_*` environment overrides.
    ///
    /// The file is `$ROLLCALL_CONFIG` if set (and must exist), otherwise
    /// `$XDG_CONFIG_HOME/rollcall/config.toml` when present.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var("ROLLCALL_CONFIG").ok().map(PathBuf::from);
        let file = match &explicit {
            Some(path) => read_file(path)?,
            None => {
                let path = xdg_dir("XDG_CONFIG_HOME", ".config").join("config.toml");
                if path.exists() {
                    read_file(&path)?
                } else {
                    FileConfig::default()
                }
            }
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let db_path = env("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| xdg_dir("XDG_DATA_HOME", ".local/share").join("rollcall.db"));

        let mut engine = file.engine;
        apply_env(&mut engine, &env);
        engine.validate()?;

        Ok(Self { engine, db_path })
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "config file loaded");
    Ok(file)
}

/// `$<var>/rollcall`, falling back to `$HOME/<fallback>/rollcall`.
fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(fallback)
        })
        .join("rollcall")
}

fn apply_env(engine: &mut EngineConfig, env: &impl Fn(&str) -> Option<String>) {
    env_parse(env, "ROLLCALL_SIMILARITY_THRESHOLD", &mut engine.similarity_threshold);
    env_parse(env, "ROLLCALL_LIVENESS_THRESHOLD", &mut engine.liveness_threshold);
    env_parse(env, "ROLLCALL_CONFIDENCE_THRESHOLD", &mut engine.confidence_threshold);
    env_parse(env, "ROLLCALL_CONSENSUS_FRAMES", &mut engine.consensus_frames);
    env_parse(env, "ROLLCALL_CONSENSUS_THRESHOLD", &mut engine.consensus_threshold);
    env_parse(env, "ROLLCALL_MIN_FRAMES", &mut engine.min_frames_for_decision);
    env_parse(env, "ROLLCALL_EMBEDDING_WEIGHT", &mut engine.embedding_weight);
    env_parse(env, "ROLLCALL_LIVENESS_WEIGHT", &mut engine.liveness_weight);
    env_parse(env, "ROLLCALL_ENROLLMENT_SAMPLES", &mut engine.enrollment_samples);
    env_parse(env, "ROLLCALL_ENROLLMENT_LIVENESS_MIN", &mut engine.enrollment_liveness_min);
    env_parse(env, "ROLLCALL_DUPLICATE_WINDOW_SECS", &mut engine.duplicate_window_secs);
    env_parse(env, "ROLLCALL_ACTION_COOLDOWN_SECS", &mut engine.action_cooldown_secs);
    env_parse(env, "ROLLCALL_MAX_FRAMES", &mut engine.max_frames_per_attempt);
    env_parse(env, "ROLLCALL_ATTEMPT_TIMEOUT_SECS", &mut engine.attempt_timeout_secs);
    env_parse(env, "ROLLCALL_ENROLLMENT_TIMEOUT_SECS", &mut engine.enrollment_timeout_secs);
}

/// Overwrite `slot` when `key` is set and parses; unparsable values are ignored with a warning.
fn env_parse<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(raw) = env(key) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment override"),
        }
    }
}
