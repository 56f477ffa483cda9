use anyhow::{bail, Context, Result};
use eventface_backend::BackendConfig;
use eventface_core::{AggregatorOptions, ArchiveResolver};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Config file used when neither `--config` nor `EVENTFACE_CONFIG` is set.
pub const DEFAULT_CONFIG_PATH: &str = "config/eventface.toml";

/// CLI configuration, loaded from a TOML file with `EVENTFACE_*` overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub person_search: PersonSearchConfig,
    #[serde(default)]
    pub backend: BackendSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory of the event photo archive; relative identities resolve against it.
    pub event_photos: PathBuf,
    /// Roots under which user-supplied folders must resolve.
    #[serde(default)]
    pub allowed_directories: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    #[serde(default = "default_allowed_formats")]
    pub allowed_formats: Vec<String>,
    /// Reference images above this size are skipped.
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            allowed_formats: default_allowed_formats(),
            max_size_mb: default_max_size_mb(),
        }
    }
}

fn default_allowed_formats() -> Vec<String> {
    eventface_core::collector::DEFAULT_FORMATS
        .map(String::from)
        .to_vec()
}
fn default_max_size_mb() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonSearchConfig {
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    #[serde(default = "default_max_reference_images")]
    pub max_reference_images: usize,
    #[serde(default = "default_search_timeout_secs")]
    pub search_timeout_secs: u64,
    /// Reference searches in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for PersonSearchConfig {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            max_reference_images: default_max_reference_images(),
            search_timeout_secs: default_search_timeout_secs(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_output_root() -> PathBuf {
    PathBuf::from("./output")
}
fn default_max_reference_images() -> usize {
    20
}
fn default_search_timeout_secs() -> u64 {
    60
}
fn default_concurrency() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSection {
    #[serde(default = "default_backend_url")]
    pub url: String,
    /// Cosine distance cut-off for a match.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            threshold: default_threshold(),
            timeout_secs: default_backend_timeout_secs(),
            max_dimension: default_max_dimension(),
        }
    }
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_threshold() -> f32 {
    0.40
}
fn default_backend_timeout_secs() -> u64 {
    30
}
fn default_max_dimension() -> u32 {
    1920
}

impl Config {
    /// Parse TOML, apply overrides from `lookup`, then validate.
    pub fn from_toml_str(content: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Override individual fields from `EVENTFACE_*` variables. Values that
    /// do not parse leave the file value in place.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("EVENTFACE_BACKEND_URL") {
            self.backend.url = url;
        }
        if let Some(dir) = lookup("EVENTFACE_EVENT_PHOTOS") {
            self.storage.event_photos = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("EVENTFACE_OUTPUT_ROOT") {
            self.person_search.output_root = PathBuf::from(dir);
        }
        if let Some(threshold) = parsed(&lookup, "EVENTFACE_THRESHOLD") {
            self.backend.threshold = threshold;
        }
        if let Some(max) = parsed(&lookup, "EVENTFACE_MAX_REFERENCES") {
            self.person_search.max_reference_images = max;
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.backend.threshold) {
            bail!("backend.threshold must be in [0.0, 2.0]");
        }
        if self.backend.url.trim().is_empty() {
            bail!("backend.url must not be empty");
        }
        if self.person_search.max_reference_images == 0 {
            bail!("person_search.max_reference_images must be >= 1");
        }
        if self.person_search.concurrency == 0 {
            bail!("person_search.concurrency must be >= 1");
        }
        if self.storage.allowed_directories.is_empty() {
            tracing::warn!("storage.allowed_directories is empty; every folder will be rejected");
        }
        Ok(())
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            url: self.backend.url.clone(),
            threshold: self.backend.threshold,
            timeout: Duration::from_secs(self.backend.timeout_secs),
            max_dimension: self.backend.max_dimension,
        }
    }

    /// Resolver for matched identities; `photos_base` overrides `storage.event_photos`.
    pub fn archive_resolver(&self, photos_base: Option<&Path>) -> ArchiveResolver {
        let base = photos_base.unwrap_or(self.storage.event_photos.as_path());
        ArchiveResolver::new(base.to_path_buf())
    }

    pub fn aggregator_options(&self) -> AggregatorOptions {
        AggregatorOptions {
            concurrency: self.person_search.concurrency,
            search_timeout: Duration::from_secs(self.person_search.search_timeout_secs),
            max_image_mb: Some(self.files.max_size_mb),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.parse().ok())
}

/// `--config`, else `EVENTFACE_CONFIG`, else [`DEFAULT_CONFIG_PATH`].
pub fn config_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var("EVENTFACE_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    Config::from_toml_str(&content, |key| std::env::var(key).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
[storage]
event_photos = "/srv/event_photos"
"#;

    const FULL: &str = r#"
[storage]
event_photos = "/srv/event_photos"
allowed_directories = ["/srv/refs", "/home/shared/refs"]

[files]
allowed_formats = ["jpg", "png"]
max_size_mb = 5

[person_search]
output_root = "/srv/output"
max_reference_images = 8
search_timeout_secs = 15
concurrency = 2

[backend]
url = "http://faces.internal:9000"
threshold = 0.35
timeout_secs = 10
max_dimension = 1280
"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_toml_str(MINIMAL, no_env).unwrap();
        assert_eq!(config.storage.event_photos, PathBuf::from("/srv/event_photos"));
        assert!(config.storage.allowed_directories.is_empty());
        assert_eq!(config.files.allowed_formats, vec!["jpg", "jpeg", "png", "webp"]);
        assert_eq!(config.person_search.max_reference_images, 20);
        assert_eq!(config.person_search.output_root, PathBuf::from("./output"));
        assert!((config.backend.threshold - 0.40).abs() < 1e-6);
        assert_eq!(config.backend.url, "http://127.0.0.1:8000");
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_toml_str(FULL, no_env).unwrap();
        assert_eq!(config.storage.allowed_directories.len(), 2);
        assert_eq!(config.files.max_size_mb, 5);
        assert_eq!(config.person_search.concurrency, 2);

        let backend = config.backend_config();
        assert_eq!(backend.url, "http://faces.internal:9000");
        assert_eq!(backend.timeout, Duration::from_secs(10));
        assert_eq!(backend.max_dimension, 1280);

        let options = config.aggregator_options();
        assert_eq!(options.search_timeout, Duration::from_secs(15));
        assert_eq!(options.max_image_mb, Some(5));
    }

    #[test]
    fn test_archive_resolver_prefers_photos_base() {
        let config = Config::from_toml_str(FULL, no_env).unwrap();
        assert_eq!(
            config.archive_resolver(None).resolve("MAY_01/a.jpg"),
            PathBuf::from("/srv/event_photos/MAY_01/a.jpg")
        );
        let base = PathBuf::from("/mnt/archive");
        assert_eq!(
            config.archive_resolver(Some(&base)).resolve("MAY_01/a.jpg"),
            PathBuf::from("/mnt/archive/MAY_01/a.jpg")
        );
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("EVENTFACE_BACKEND_URL", "http://override:1234"),
            ("EVENTFACE_OUTPUT_ROOT", "/tmp/out"),
            ("EVENTFACE_THRESHOLD", "0.3"),
            ("EVENTFACE_MAX_REFERENCES", "3"),
        ]);
        let config =
            Config::from_toml_str(FULL, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.backend.url, "http://override:1234");
        assert_eq!(config.person_search.output_root, PathBuf::from("/tmp/out"));
        assert!((config.backend.threshold - 0.3).abs() < 1e-6);
        assert_eq!(config.person_search.max_reference_images, 3);
    }

    #[test]
    fn test_unparsable_override_keeps_file_value() {
        let config = Config::from_toml_str(FULL, |k| {
            (k == "EVENTFACE_THRESHOLD").then(|| "loose".to_string())
        })
        .unwrap();
        assert!((config.backend.threshold - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_missing_storage() {
        assert!(Config::from_toml_str("[backend]\nurl = \"http://x\"\n", no_env).is_err());
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let content = format!("{MINIMAL}\n[backend]\nthreshold = 3.5\n");
        let err = Config::from_toml_str(&content, no_env).unwrap_err();
        assert!(err.to_string().contains("threshold"));
    }

    #[test]
    fn test_rejects_zero_references() {
        let content = format!("{MINIMAL}\n[person_search]\nmax_reference_images = 0\n");
        assert!(Config::from_toml_str(&content, no_env).is_err());
    }

    #[test]
    fn test_config_serializes_back_to_toml() {
        let config = Config::from_toml_str(FULL, no_env).unwrap();
        let rendered = toml::to_string_pretty(&config).unwrap();
        assert!(rendered.contains("[person_search]"));
        let reparsed = Config::from_toml_str(&rendered, no_env).unwrap();
        assert_eq!(reparsed.person_search.max_reference_images, 8);
    }

    #[test]
    fn test_load_config_reports_missing_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = load_config(&tmp.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_config_path_prefers_flag() {
        assert_eq!(config_path(Some(PathBuf::from("x.toml"))), PathBuf::from("x.toml"));
    }
}
