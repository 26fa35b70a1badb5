use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::Value;

/// A named TOML section that deserializes into a config struct, falling
/// back to defaults when the section is absent.
pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Self {
        match section {
            Some(value) => value
                .clone()
                .try_into()
                .expect("cannot deserialize config section"),
            None => {
                warn!("config section not found, using defaults");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub log_level: String,
    pub timeout: u64,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            timeout: 100_000,
        }
    }
}

impl Config for crate::cache::CacheHierarchyConfig {}
impl Config for crate::dram::MemControllerConfig {}
impl Config for crate::sim::traffic::TrafficConfig {}
