use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{io_error, AnalysisResult};
use crate::value::{HostResolver, Site};

/// Default number of findings printed per report section
pub const DEFAULT_WARNING_LIMIT: usize = 10;

/// Analyzer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Maximum findings printed per category
    pub warning_limit: usize,

    /// Human-readable source locations keyed by site id
    pub locations: BTreeMap<String, String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            warning_limit: DEFAULT_WARNING_LIMIT,
            locations: BTreeMap::new(),
        }
    }
}

impl AnalyzerConfig {
    pub fn from_toml_str(text: &str) -> AnalysisResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> AnalysisResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
        let config = Self::from_toml_str(&text)?;
        log::info!(
            "Loaded analyzer config from {} ({} locations)",
            path.display(),
            config.locations.len()
        );
        Ok(config)
    }

    /// Resolver serving the configured location table
    pub fn location_table(&self) -> StaticLocations {
        StaticLocations {
            locations: self.locations.clone(),
        }
    }
}

/// Location resolver backed by a fixed table
#[derive(Debug, Clone, Default)]
pub struct StaticLocations {
    locations: BTreeMap<String, String>,
}

impl StaticLocations {
    pub fn insert(&mut self, site: Site, location: impl Into<String>) {
        self.locations.insert(site.key(), location.into());
    }
}

impl HostResolver for StaticLocations {
    fn location_of(&self, site: Site) -> Option<String> {
        self.locations.get(&site.key()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalyzerConfig::default();
        assert_eq!(config.warning_limit, 10);
        assert!(config.locations.is_empty());
        assert_eq!(AnalyzerConfig::from_toml_str("").unwrap(), config);
    }

    #[test]
    fn test_parse_toml() {
        let config = AnalyzerConfig::from_toml_str(
            r#"
            warning_limit = 3

            [locations]
            7 = "app.js:12:5"
            "#,
        )
        .unwrap();
        assert_eq!(config.warning_limit, 3);
        let table = config.location_table();
        assert_eq!(table.location_of(Site(7)).as_deref(), Some("app.js:12:5"));
        assert_eq!(table.location_of(Site(8)), None);
    }

    #[test]
    fn test_bad_toml() {
        assert!(AnalyzerConfig::from_toml_str("warning_limit = \"lots\"").is_err());
    }
}
