//! Configuration loading and validation.
//!
//! Everything the gateway needs to know up front lives in [`Config`]: the
//! base scope, the manifest, and which cache generation is current. Values
//! are layered with [figment], lowest priority first:
//!
//! 1. Built-in defaults ([`Config::default`])
//! 2. A configuration file (TOML, YAML or JSON, chosen by extension)
//! 3. `SHELTER_`-prefixed environment variables, `__` separating nested keys
//!    (e.g. `SHELTER_CACHE__VERSION=v3`)
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = shelter_config::Config::load(None)?;
//! println!("current generation: {}-{}", config.cache.prefix, config.cache.version);
//! # Ok(())
//! # }
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

const ENV_PREFIX: &str = "SHELTER_";
const CONFIG_FILE: &str = "shelter.toml";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "shelter")
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base scope every resource identifier is resolved against.
    pub scope: Url,
    /// Identifier of the index document served to offline navigations.
    pub index: String,
    /// Resources that must be available offline.
    pub manifest: Vec<String>,
    pub cache: CacheConfig,
    pub storage: StorageConfig,
    pub media: MediaConfig,
    pub lifecycle: LifecycleConfig,
    pub navigation: NavigationConfig,
}

/// Naming of cache generations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Fixed prefix shared by every generation of this deployment.
    pub prefix: String,
    /// Version tag of the current generation. Must not contain `-`, which
    /// separates it from the prefix.
    pub version: String,
    /// Only delete stale generations sharing [`prefix`](Self::prefix).
    pub scoped_cleanup: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Absolute root directory of the local blob store.
    pub root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// `Content-Type` used for partial responses whose entry has none.
    pub fallback_content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Activate as soon as install finishes instead of waiting for a signal.
    pub skip_waiting: bool,
    /// Maximum number of manifest fetches in flight during install.
    pub install_concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// Store successful navigation responses for later offline use.
    pub refresh_cache: bool,
}

impl Default for Config {
    fn default() -> Self {
        let manifest = [
            "./",
            "./MYINDEX.html",
            "./manifest.webmanifest",
            "./icon-192.png",
            "./icon-512.png",
            "./DS-DIGIT.woff2",
            "./DS-DIGIT.TTF",
            "./beep.mp3",
            "./beep-10.mp3",
            "./pallet-complete.mp3",
        ];
        Self {
            scope: Url::parse("http://localhost/").expect("constant URL is valid"),
            index: "./MYINDEX.html".to_string(),
            manifest: manifest.into_iter().map(String::from).collect(),
            cache: CacheConfig::default(),
            storage: StorageConfig::default(),
            media: MediaConfig::default(),
            lifecycle: LifecycleConfig::default(),
            navigation: NavigationConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: "contador-cache".to_string(),
            version: "v2".to_string(),
            scoped_cleanup: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let root = project_dirs()
            .map(|dirs| dirs.cache_dir().to_path_buf())
            .unwrap_or_else(|| std::env::temp_dir().join("shelter"));
        Self { root }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            fallback_content_type: "audio/mpeg".to_string(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            skip_waiting: true,
            install_concurrency: 4,
        }
    }
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self { refresh_cache: true }
    }
}

impl Config {
    /// Default configuration file location (`shelter.toml` in the platform
    /// config directory), if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Build the layered [`Figment`] without extracting it.
    ///
    /// A missing file is not an error; its layer is simply empty.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) {
            let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
            figment = match extension.as_deref() {
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate the configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(path))
    }

    /// Extract and validate a configuration from any [`Figment`].
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(
            scope = %config.scope,
            generation = %format_args!("{}-{}", config.cache.prefix, config.cache.version),
            manifest = config.manifest.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Reject values the gateway can't work with.
    pub fn validate(&self) -> Result<()> {
        fn path_safe(s: &str) -> bool {
            !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\', '\0'])
        }
        if self.scope.cannot_be_a_base() {
            exn::bail!(ErrorKind::Invalid(format!("scope `{}` cannot be used as a base URL", self.scope)));
        }
        if !path_safe(&self.cache.prefix) {
            exn::bail!(ErrorKind::Invalid(format!("cache prefix `{}` is not a valid name", self.cache.prefix)));
        }
        if !path_safe(&self.cache.version) || self.cache.version.contains('-') {
            exn::bail!(ErrorKind::Invalid(format!("cache version `{}` must be one name without `-`", self.cache.version)));
        }
        if !self.storage.root.is_absolute() {
            exn::bail!(ErrorKind::Invalid(format!("storage root `{}` must be absolute", self.storage.root.display())));
        }
        if self.index.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("index document must not be empty".to_string()));
        }
        if let Some(position) = self.manifest.iter().position(|entry| entry.trim().is_empty()) {
            exn::bail!(ErrorKind::Invalid(format!("manifest entry #{position} is empty")));
        }
        if self.lifecycle.install_concurrency == 0 {
            exn::bail!(ErrorKind::Invalid("install concurrency must be at least 1".to_string()));
        }
        Ok(())
    }
}
