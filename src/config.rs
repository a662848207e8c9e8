//! Layered configuration (§4.B) and data-root resolution (§6): a small set
//! of free functions resolving a single platform data directory via
//! `directories::ProjectDirs`, overridable by `SATOP_DATA_ROOT`, plus a
//! generic per-key source chain (env var, then user file, then packaged
//! default) instead of a whole-document merge, since §4.B specifies
//! per-key precedence.

use std::env;

use camino::{Utf8Path, Utf8PathBuf};
use directories::ProjectDirs;
use serde::de::DeserializeOwned;

/// Resolves `<data_root>`, honoring `SATOP_DATA_ROOT`.
pub fn data_root() -> Utf8PathBuf {
    if let Ok(over) = env::var("SATOP_DATA_ROOT") {
        return Utf8PathBuf::from(over);
    }

    let dirs = ProjectDirs::from("", "", "SatOP").expect("failed to resolve a home directory for this platform");

    Utf8PathBuf::from_path_buf(dirs.data_dir().to_path_buf())
        .expect("platform data directory is not valid UTF-8")
}

/// Turns `token_secret`-style relative names into `<data_root>/<name>`.
pub fn data_path(relative: impl AsRef<Utf8Path>) -> Utf8PathBuf {
    data_root().join(relative.as_ref())
}

/// A layered named configuration: env vars, then `<data_root>/config/<name>.yaml`,
/// then a packaged default, each consulted independently *per key* so that a
/// user file overriding one setting doesn't shadow the defaults for others.
pub struct Config {
    name: String,
    user: Option<serde_yaml::Value>,
    default: serde_yaml::Value,
}

impl Config {
    /// `default_yaml` is the binary-packaged default document for this
    /// config name (conventionally `include_str!("../config/<name>.yaml")`
    /// at the call site).
    pub fn load(name: &str, default_yaml: &str) -> anyhow::Result<Self> {
        let default: serde_yaml::Value = serde_yaml::from_str(default_yaml)?;

        let user = ["yaml", "yml"].iter().find_map(|ext| {
            let path = data_root().join("config").join(format!("{name}.{ext}"));
            std::fs::read_to_string(&path).ok().and_then(|contents| {
                serde_yaml::from_str(&contents)
                    .inspect_err(|error| warn!(%path, %error, "failed to parse user config file"))
                    .ok()
            })
        });

        Ok(Self {
            name: name.to_owned(),
            user,
            default,
        })
    }

    /// Look up `keypath` (dot-separated, e.g. `"auth.token_ttl"`), checking
    /// the environment, then the user file, then the packaged default, in
    /// that order. The first source where the key resolves to a non-null
    /// value wins.
    pub fn get<T: DeserializeOwned>(&self, keypath: &str) -> Option<T> {
        if let Some(raw) = env::var(env_var_name(&self.name, keypath)).ok() {
            if let Ok(value) = serde_yaml::from_str::<T>(&raw) {
                return Some(value);
            }
        }

        if let Some(user) = &self.user {
            if let Some(value) = dig(user, keypath).and_then(|v| serde_yaml::from_value(v.clone()).ok()) {
                return Some(value);
            }
        }

        dig(&self.default, keypath).and_then(|v| serde_yaml::from_value(v.clone()).ok())
    }
}

/// `SATOP_<CONFIG>__<KEYPATH_UPPER>`, dots replaced by `__`, non-alphanumeric
/// characters stripped, per §4.B.
fn env_var_name(config_name: &str, keypath: &str) -> String {
    let config_upper = scream(config_name);
    let key_upper = keypath.replace('.', "__").chars().map(|c| c.to_ascii_uppercase()).filter(|c| c.is_alphanumeric() || *c == '_').collect::<String>();
    format!("SATOP_{config_upper}__{key_upper}")
}

fn scream(s: &str) -> String {
    s.chars().map(|c| c.to_ascii_uppercase()).filter(|c| c.is_alphanumeric()).collect()
}

fn dig<'a>(value: &'a serde_yaml::Value, keypath: &str) -> Option<&'a serde_yaml::Value> {
    let mut current = value;
    for segment in keypath.split('.') {
        current = current.as_mapping()?.get(serde_yaml::Value::String(segment.to_owned()))?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_name_strips_and_uppercases() {
        assert_eq!(env_var_name("auth", "token.ttl-secs"), "SATOP_AUTH__TOKEN__TTLSECS");
    }

    #[test]
    fn default_used_when_user_absent() {
        let config = Config {
            name: "test".to_owned(),
            user: None,
            default: serde_yaml::from_str("port: 8080").unwrap(),
        };
        assert_eq!(config.get::<u16>("port"), Some(8080));
        assert_eq!(config.get::<u16>("missing"), None);
    }

    #[test]
    fn user_overrides_default_per_key() {
        let config = Config {
            name: "test".to_owned(),
            user: Some(serde_yaml::from_str("port: 9090").unwrap()),
            default: serde_yaml::from_str("port: 8080\nhost: localhost").unwrap(),
        };
        assert_eq!(config.get::<u16>("port"), Some(9090));
        assert_eq!(config.get::<String>("host"), Some("localhost".to_owned()));
    }
}
