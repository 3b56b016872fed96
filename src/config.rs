//! Promptd configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::template::RenderLimits;
use crate::watcher::WatcherConfig;

/// Main promptd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where specifications are discovered
    pub discovery: DiscoveryConfig,

    /// Validation pipeline switches
    pub validation: ValidationConfig,

    /// Sandbox resource ceilings
    pub limits: LimitsConfig,

    /// Artifact and render caches
    pub cache: CacheConfig,

    /// Change watcher tuning
    pub watcher: WatcherConfig,

    /// Audit journal
    pub audit: AuditConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .promptd.yml
        let local_config = PathBuf::from(".promptd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/promptd/promptd.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("promptd").join("promptd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.discovery.extensions.is_empty() {
            return Err(eyre::eyre!("discovery.extensions must list at least one extension"));
        }
        if self.limits.max_loop_iterations == 0 || self.limits.max_output_bytes == 0 {
            return Err(eyre::eyre!("limits must be non-zero"));
        }
        if self.cache.render_cache_size == 0 {
            return Err(eyre::eyre!("cache.render-cache-size must be non-zero"));
        }
        if self.watcher.queue_capacity == 0 {
            return Err(eyre::eyre!("watcher.queue-capacity must be non-zero"));
        }
        Ok(())
    }
}

/// What to do when two scan roots declare the same identifier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverridePolicy {
    /// The declaration from the later root replaces the earlier one
    #[default]
    LastWins,
    /// The first declaration seen is kept
    FirstWins,
    /// Keep the first and report every later one as a failure
    Error,
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Scan roots, in override order (later roots are "more local")
    pub paths: Vec<String>,

    /// Duplicate identifier handling
    #[serde(rename = "override-policy")]
    pub override_policy: OverridePolicy,

    /// File extensions treated as specifications
    pub extensions: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            paths: vec!["~/.config/promptd/specs".to_string(), ".promptd/specs".to_string()],
            override_policy: OverridePolicy::LastWins,
            extensions: vec!["yml".to_string(), "yaml".to_string()],
        }
    }
}

impl DiscoveryConfig {
    /// Expand paths (resolve ~/)
    pub fn expanded_paths(&self) -> Vec<PathBuf> {
        self.paths.iter().filter_map(|p| expand_home(p)).collect()
    }

    /// Whether the path carries one of the configured extensions
    pub fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
    }
}

/// Validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Unknown keys are errors (true) or warnings (false)
    pub strict: bool,

    /// Run the non-blocking quality layer
    pub quality: bool,

    /// Maximum nesting of `@include` directives
    #[serde(rename = "include-depth")]
    pub include_depth: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            strict: true,
            quality: true,
            include_depth: 1,
        }
    }
}

/// Sandbox resource ceilings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted template body
    #[serde(rename = "max-template-bytes")]
    pub max_template_bytes: usize,

    /// Total `each` iterations allowed in one render
    #[serde(rename = "max-loop-iterations")]
    pub max_loop_iterations: usize,

    /// Wall-clock budget per render in milliseconds
    #[serde(rename = "render-timeout-ms")]
    pub render_timeout_ms: u64,

    /// Largest accepted render output
    #[serde(rename = "max-output-bytes")]
    pub max_output_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_template_bytes: 64 * 1024,
            max_loop_iterations: 1000,
            render_timeout_ms: 2000,
            max_output_bytes: 256 * 1024,
        }
    }
}

impl LimitsConfig {
    /// Limits as consumed by the renderer
    pub fn render_limits(&self) -> RenderLimits {
        RenderLimits {
            max_loop_iterations: self.max_loop_iterations,
            timeout: Duration::from_millis(self.render_timeout_ms),
            max_output_bytes: self.max_output_bytes,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Artifact cache directory
    pub dir: String,

    /// Number of rendered outputs kept in memory
    #[serde(rename = "render-cache-size")]
    pub render_cache_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        // XDG cache directory (~/.cache/promptd/artifacts on Linux)
        let dir = dirs::cache_dir()
            .map(|d| d.join("promptd").join("artifacts"))
            .unwrap_or_else(|| PathBuf::from(".promptd/artifacts"))
            .to_string_lossy()
            .into_owned();

        Self {
            dir,
            render_cache_size: 256,
        }
    }
}

impl CacheConfig {
    pub fn expanded_dir(&self) -> PathBuf {
        expand_home(&self.dir).unwrap_or_else(|| PathBuf::from(&self.dir))
    }
}

/// Audit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Record pipeline events to the journal
    pub enabled: bool,

    /// Journal file
    pub path: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        let path = dirs::data_local_dir()
            .map(|d| d.join("promptd").join("audit.jsonl"))
            .unwrap_or_else(|| PathBuf::from(".promptd/audit.jsonl"))
            .to_string_lossy()
            .into_owned();

        Self { enabled: true, path }
    }
}

impl AuditConfig {
    pub fn expanded_path(&self) -> PathBuf {
        expand_home(&self.path).unwrap_or_else(|| PathBuf::from(&self.path))
    }
}

fn expand_home(p: &str) -> Option<PathBuf> {
    if let Some(rest) = p.strip_prefix("~/") {
        dirs::home_dir().map(|home| home.join(rest))
    } else {
        Some(PathBuf::from(p))
    }
}
