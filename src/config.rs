#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_REELFRONT_PORT: u16 = 8080;
pub const DEFAULT_REELFRONT_HOST: &str = "127.0.0.1";
pub const DEFAULT_STATE_DIR: &str = ".reelfront";
pub const DEFAULT_PEXELS_API_BASE: &str = "https://api.pexels.com";
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Everything the binaries need to know at startup. The API key stays
/// optional here because only some commands talk to the upstream service.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub api_key: Option<String>,
    pub api_base: String,
    pub host: String,
    pub port: u16,
    pub state_dir: PathBuf,
    pub cache_ttl: Duration,
}

impl RuntimeSettings {
    /// Returns the upstream credential or fails with a message naming the
    /// variable to set.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| anyhow!("PEXELS_API_KEY not set"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub state_dir: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_runtime_settings(&file_vars, env_var_string, overrides))
}

/// Layers overrides, then `env_lookup`, then `file_vars`, then defaults.
pub fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimeSettings {
    let api_key = non_blank(overrides.api_key)
        .or_else(|| lookup_value("PEXELS_API_KEY", file_vars, &env_lookup));
    let api_base = non_blank(overrides.api_base)
        .or_else(|| lookup_value("PEXELS_API_BASE", file_vars, &env_lookup))
        .map(|value| value.trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_PEXELS_API_BASE.to_string());
    let host = non_blank(overrides.host)
        .or_else(|| lookup_value("REELFRONT_HOST", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_REELFRONT_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| {
            lookup_value("REELFRONT_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_REELFRONT_PORT);
    let state_dir = overrides
        .state_dir
        .or_else(|| lookup_value("REELFRONT_STATE_DIR", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
    let cache_ttl_secs = lookup_value("REELFRONT_CACHE_TTL_SECS", file_vars, &env_lookup)
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(DEFAULT_CACHE_TTL_SECS);

    RuntimeSettings {
        api_key,
        api_base,
        host,
        port,
        state_dir,
        cache_ttl: Duration::from_secs(cache_ttl_secs),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_var_string(key: &str) -> Option<String> {
    non_blank(env::var(key).ok())
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| non_blank(file_vars.get(key).cloned()))
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        vars.insert(key.to_string(), unquote(value_raw.trim()).to_string());
    }
    Ok(vars)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|value| value.strip_suffix('"'))
        .or_else(|| {
            value
                .strip_prefix('\'')
                .and_then(|value| value.strip_suffix('\''))
        })
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn settings_from(contents: &str) -> RuntimeSettings {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_settings(&vars, |_| None, RuntimeOverrides::default())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let settings = settings_from("");
        assert!(settings.api_key.is_none());
        assert_eq!(settings.api_base, DEFAULT_PEXELS_API_BASE);
        assert_eq!(settings.host, DEFAULT_REELFRONT_HOST);
        assert_eq!(settings.port, DEFAULT_REELFRONT_PORT);
        assert_eq!(settings.state_dir, PathBuf::from(DEFAULT_STATE_DIR));
        assert_eq!(settings.cache_ttl, Duration::from_secs(3600));
        assert!(settings.require_api_key().is_err());
    }

    #[test]
    fn reads_values_from_env_file() {
        let settings = settings_from(
            "PEXELS_API_KEY=\"secret\"\nREELFRONT_PORT=\"4242\"\nREELFRONT_STATE_DIR=/tmp/state\nPEXELS_API_BASE=http://localhost:9000/\nREELFRONT_CACHE_TTL_SECS=60\n",
        );
        assert_eq!(settings.require_api_key().unwrap(), "secret");
        assert_eq!(settings.port, 4242);
        assert_eq!(settings.state_dir, PathBuf::from("/tmp/state"));
        assert_eq!(settings.api_base, "http://localhost:9000");
        assert_eq!(settings.cache_ttl, Duration::from_secs(60));
    }

    #[test]
    fn environment_wins_over_file() {
        let vars = read_env_file(make_config("PEXELS_API_KEY=\"file\"\n").path()).unwrap();
        let settings = build_runtime_settings(
            &vars,
            |key| (key == "PEXELS_API_KEY").then(|| "env".to_string()),
            RuntimeOverrides::default(),
        );
        assert_eq!(settings.api_key.as_deref(), Some("env"));
    }

    #[test]
    fn overrides_win_over_environment() {
        let mut vars = HashMap::new();
        vars.insert("REELFRONT_HOST".to_string(), "file-host".to_string());
        vars.insert("REELFRONT_PORT".to_string(), "7000".to_string());

        let settings = build_runtime_settings(
            &vars,
            |key| (key == "REELFRONT_PORT").then(|| "8000".to_string()),
            RuntimeOverrides {
                host: Some("override-host".into()),
                port: Some(9000),
                state_dir: Some(PathBuf::from("/override")),
                ..RuntimeOverrides::default()
            },
        );

        assert_eq!(settings.host, "override-host");
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.state_dir, PathBuf::from("/override"));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let vars = read_env_file(make_config("PEXELS_API_KEY=\"  \"\n").path()).unwrap();
        let settings = build_runtime_settings(
            &vars,
            |_| None,
            RuntimeOverrides {
                host: Some("   ".into()),
                ..RuntimeOverrides::default()
            },
        );
        assert!(settings.api_key.is_none());
        assert_eq!(settings.host, DEFAULT_REELFRONT_HOST);
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let settings = settings_from("REELFRONT_PORT=\"nope\"\nREELFRONT_CACHE_TTL_SECS=-5\n");
        assert_eq!(settings.port, DEFAULT_REELFRONT_PORT);
        assert_eq!(settings.cache_ttl, Duration::from_secs(DEFAULT_CACHE_TTL_SECS));
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export PEXELS_API_KEY="abc"
            REELFRONT_HOST='0.0.0.0'
            REELFRONT_PORT =  "9090"
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("PEXELS_API_KEY").unwrap(), "abc");
        assert_eq!(vars.get("REELFRONT_HOST").unwrap(), "0.0.0.0");
        assert_eq!(vars.get("REELFRONT_PORT").unwrap(), "9090");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn resolve_runtime_settings_uses_given_env_path() {
        let cfg = make_config("REELFRONT_STATE_DIR=/from-file\n");
        let settings = resolve_runtime_settings(RuntimeOverrides {
            env_path: Some(cfg.path().to_path_buf()),
            state_dir: Some(PathBuf::from("/explicit")),
            ..RuntimeOverrides::default()
        })
        .unwrap();
        assert_eq!(settings.state_dir, PathBuf::from("/explicit"));
    }
}
