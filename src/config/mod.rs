//! Configuration management for diskmanager
//!
//! Configuration is layered with figment: embedded defaults, then an optional
//! TOML file, then `DISKMANAGER_` environment variables. The `[dir]` table is
//! exposed to the engine as a flat [`Properties`] view so values can be written
//! either as TOML scalars or as strings.

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

mod properties;

pub use properties::{Properties, StaticProperties, expand_env, expand_env_with, parse_age_component};

// Embed the default config at compile time
const DEFAULT_CONFIG: &str = include_str!("../../default-config.toml");

/// Environment prefix for overrides, e.g. `DISKMANAGER_DIR__ARCHIVEMODE=4`
pub const ENV_PREFIX: &str = "DISKMANAGER_";

/// Fully merged configuration for one diskmanager instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskManagerConfig {
    /// Which technology package / set this run belongs to
    pub instance: InstanceConfig,

    /// Directory settings (`inDir`, `archiveMode`, `fileAgeDay`, ...)
    #[serde(default)]
    pub dir: BTreeMap<String, Setting>,

    /// External key/value store consulted by `key:default` references
    #[serde(default)]
    pub static_properties: BTreeMap<String, Setting>,

    /// Named special cases for individual file names
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Parallel storage mount points used by the failed-subtree traversal
    #[serde(default)]
    pub mounts: MountConfig,
}

/// Instance triple used to label every log record of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceConfig {
    pub tech_pack: String,
    pub set_type: String,
    pub set_name: String,
}

/// A scalar configuration value. TOML integers, booleans and strings are all
/// accepted and read back as text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Setting {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Setting::Bool(b) => write!(f, "{b}"),
            Setting::Int(i) => write!(f, "{i}"),
            Setting::Float(x) => write!(f, "{x}"),
            Setting::Text(s) => f.write_str(s),
        }
    }
}

/// File names that get special treatment regardless of the age policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Never deleted, e.g. the sentinel used by a storage monitoring agent
    #[serde(default)]
    pub exempt_names: Vec<String>,

    /// Live log files that are copied and the copy archived instead
    #[serde(default)]
    pub copy_before_archive: Vec<String>,

    /// Input paths containing this marker use the failed-subtree traversal
    #[serde(default = "default_etldata_marker")]
    pub etldata_marker: String,

    /// Directory name marker of failed work below a technology package
    #[serde(default = "default_failed_marker")]
    pub failed_marker: String,

    /// File name suffixes eligible for deletion inside failed directories
    #[serde(default)]
    pub failed_suffixes: Vec<String>,
}

fn default_etldata_marker() -> String {
    "etldata".to_string()
}

fn default_failed_marker() -> String {
    "failed".to_string()
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            exempt_names: vec![".tagfile".to_string()],
            copy_before_archive: vec!["catalina.out".to_string()],
            etldata_marker: default_etldata_marker(),
            failed_marker: default_failed_marker(),
            failed_suffixes: vec!["zip".to_string(), "xml".to_string()],
        }
    }
}

/// Mount point layout: `count` volumes named `00`, `01`, ... under `base_path`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    #[serde(default)]
    pub count: usize,

    #[serde(default = "default_mount_base")]
    pub base_path: PathBuf,
}

fn default_mount_base() -> PathBuf {
    PathBuf::from("/eniq/data/etldata_")
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            count: 0,
            base_path: default_mount_base(),
        }
    }
}

impl DiskManagerConfig {
    /// Load defaults, then `custom_config` if given, then environment overrides
    pub fn load_with_custom_config(custom_config: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Toml::string(DEFAULT_CONFIG));

        if let Some(path) = custom_config {
            if !path.is_file() {
                anyhow::bail!("Config file {} does not exist", path.display());
            }
            figment = figment.merge(Toml::file(path));
        }

        // Environment variables always have highest priority
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::from_figment(figment)
    }

    /// Parse an in-memory TOML document on top of the defaults
    pub fn from_toml_str(document: &str) -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::string(DEFAULT_CONFIG))
            .merge(Toml::string(document));
        Self::from_figment(figment)
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        figment
            .extract::<DiskManagerConfig>()
            .context("Failed to parse diskmanager configuration")
    }

    /// Flat view over the `[dir]` table
    pub fn properties(&self) -> Properties {
        Properties::from_settings(&self.dir)
    }

    /// Resolver for `key:default` references
    pub fn static_properties(&self) -> StaticProperties {
        StaticProperties::from_settings(&self.static_properties)
    }
}
