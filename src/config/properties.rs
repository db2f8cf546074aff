use super::Setting;
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;

/// `key:default` reference into the static property store
static STATIC_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z][\w.]*\w):([0-9]+)$").expect("static reference pattern is valid")
});

/// Case-insensitive, string-valued view over a settings table.
///
/// Empty values are treated the same as missing ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    pub fn from_settings(settings: &BTreeMap<String, Setting>) -> Self {
        settings
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(&key.to_ascii_lowercase())
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Fetch a value that must be present
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .with_context(|| format!("Parameter {key} not defined"))
    }

    /// Fetch a directory path, applying `${NAME}` environment expansion
    pub fn path(&self, key: &str) -> Result<Option<PathBuf>> {
        self.get(key)
            .map(|raw| expand_env(raw).map(PathBuf::from))
            .transpose()
            .with_context(|| format!("Parameter {key} is invalid"))
    }

    /// Fetch a required directory path, applying `${NAME}` expansion
    pub fn require_path(&self, key: &str) -> Result<PathBuf> {
        self.path(key)?
            .with_context(|| format!("Parameter {key} not specified"))
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(default)
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_ascii_lowercase(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut properties = Properties::default();
        for (k, v) in iter {
            properties.insert(k.as_ref(), v);
        }
        properties
    }
}

/// External key/value store referenced by `key:default` settings
#[derive(Debug, Clone, Default)]
pub struct StaticProperties {
    values: BTreeMap<String, String>,
}

impl StaticProperties {
    pub fn from_settings(settings: &BTreeMap<String, Setting>) -> Self {
        Self {
            values: settings
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &'a str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for StaticProperties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
                .collect(),
        }
    }
}

/// Parse a non-negative age component.
///
/// The value is either a literal integer or a `key:default` reference that is
/// looked up in `statics`, falling back to `default`. A missing value is 0.
pub fn parse_age_component(value: Option<&str>, name: &str, statics: &StaticProperties) -> Result<u64> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(0);
    };

    if let Ok(literal) = value.parse::<i64>() {
        return u64::try_from(literal)
            .map_err(|_| anyhow::anyhow!("Value for property [{name}] must not be negative [{value}]"));
    }

    let Some(caps) = STATIC_REFERENCE.captures(value) else {
        anyhow::bail!("Value for property [{name}] is not a valid long or valid static property key [{value}]");
    };

    let key = &caps[1];
    let resolved = statics.get_or(key, &caps[2]).trim();
    resolved.parse::<u64>().map_err(|_| {
        anyhow::anyhow!("Value of static property [{key}] for property [{name}] is not a valid long [{resolved}]")
    })
}

/// Replace the first `${NAME}` in `value` with the process environment's `NAME`
pub fn expand_env(value: &str) -> Result<String> {
    expand_env_with(value, |name| std::env::var(name).ok())
}

/// [`expand_env`] with an explicit variable lookup
pub fn expand_env_with<F>(value: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(start) = value.find("${") else {
        return Ok(value.to_string());
    };
    let Some(len) = value[start..].find('}') else {
        return Ok(value.to_string());
    };

    let name = &value[start + 2..start + len];
    let replacement =
        lookup(name).with_context(|| format!("Environment variable {name} referenced by \"{value}\" is not set"))?;

    Ok(format!("{}{}{}", &value[..start], replacement, &value[start + len + 1..]))
}
