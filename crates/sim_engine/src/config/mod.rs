//! Configuration system

pub use serde::{Deserialize, Serialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        // Try different formats
        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, Default::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Simulation tuning parameters
///
/// Defaults match the values the game shipped with; the border margin in
/// particular is deliberately adjustable rather than a compiled-in
/// constant, since it trades redundant boundary checks against the risk of
/// missing a fast mover crossing between regions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Maximum live entities in the simulation
    pub max_entities: usize,

    /// Entities a collision region holds before subdividing or falling
    /// back to a linear sweep
    pub region_capacity: usize,

    /// Margin added to a region's radius to form its border radius.
    /// Should exceed scanner range so fast movers approaching a boundary
    /// are still caught by the region on the other side.
    pub region_border_margin: f32,

    /// Whether an over-capacity region may create octant subregions
    pub region_auto_subdivide: bool,

    /// Maximum recursion depth of model collision octrees
    pub octree_max_depth: u32,

    /// Octant half-width below which octree subdivision stops
    pub octree_min_radius: f32,

    /// Seconds between AI think pulses
    pub ai_think_interval: f64,

    /// Scanner range in world units
    pub scanner_range: f32,

    /// Ticks between spatial-structure integrity checks (debug builds only)
    pub integrity_check_interval: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_entities: 2048,
            region_capacity: 128,
            region_border_margin: 32_000.0,
            region_auto_subdivide: false,
            octree_max_depth: 5,
            octree_min_radius: 1.0,
            ai_think_interval: 0.125,
            scanner_range: 25_600.0,
            integrity_check_interval: 16,
        }
    }
}

impl Config for SimConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = SimConfig::default();
        assert!(config.max_entities > 0);
        assert!(config.region_border_margin > config.scanner_range);
        assert!(config.octree_max_depth >= 1);
    }

    #[test]
    fn toml_roundtrip() {
        let config = SimConfig {
            region_border_margin: 48_000.0,
            region_auto_subdivide: true,
            ..Default::default()
        };

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: SimConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.region_border_margin, 48_000.0);
        assert!(parsed.region_auto_subdivide);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let parsed: SimConfig = toml::from_str("max_entities = 64\n").unwrap();
        assert_eq!(parsed.max_entities, 64);
        assert_eq!(parsed.region_capacity, SimConfig::default().region_capacity);
    }
}
