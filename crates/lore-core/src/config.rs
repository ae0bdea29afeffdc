use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

/// Top-level configuration for a Lore store instance.
///
/// Loaded from a TOML file. Each section corresponds to one subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoreConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub router: RouterConfig,
}

impl LoreConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LoreConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is missing
    /// or unparseable.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// Relational store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory holding the fallback index's persisted files.
    pub index_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/lore.sqlite"),
            index_dir: PathBuf::from("data/lore_index"),
        }
    }
}

/// Which vector backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    /// Probe the native extension, fall back to the ANN graph if it fails.
    #[default]
    Auto,
    /// Require the native similarity-search extension.
    Native,
    /// Always use the in-process ANN graph.
    Fallback,
}

/// Vector index tuning.
///
/// The HNSW parameters are fixed when the fallback graph is built and are
/// not resized automatically; exceeding `max_elements` fails the insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    pub backend: BackendPreference,
    /// Fallback graph capacity.
    pub max_elements: usize,
    /// Graph fan-out (max connections per node).
    pub m: usize,
    /// Construction-time search breadth.
    pub ef_construction: usize,
    /// Query-time search breadth.
    pub ef_search: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            max_elements: 10_000,
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

/// Near-duplicate detection and staleness scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Maximum simhash hamming distance still considered a near-duplicate.
    /// Zero disables near-duplicate detection.
    pub simhash_max_distance: u32,
    /// How far back to look for dedup candidates, in hours.
    pub lookback_hours: i64,
    /// Freshness half-life in hours.
    pub freshness_half_life_hours: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            simhash_max_distance: 3,
            lookback_hours: 168,
            freshness_half_life_hours: 720.0,
        }
    }
}

/// Query-engine oversampling.
///
/// The engine fetches `max(top_k * factor, top_k, floor)` candidates so
/// post-filters still leave enough survivors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub oversample_factor: usize,
    pub oversample_floor: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            oversample_factor: 3,
            oversample_floor: 10,
        }
    }
}

/// Collection-router defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Default number of routes returned by `route` when unspecified.
    pub top_k: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { top_k: 4 }
    }
}
