//! Configuration management for nvm-emu.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (NVM_EMU_EVENT, etc.)
//! 2. Project-local config file (`./nvm-emu.toml`)
//! 3. User config file (`~/.config/nvm-emu/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # nvm-emu.toml
//!
//! # Traffic class to monitor
//! event = "remote-reads"
//!
//! # Access count per interval that triggers a stall
//! threshold = 1000
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::emu::Tuning;
use crate::pmon::TrafficClass;

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// nvm-emu configuration.
///
/// Every field is optional in the file; accessors supply the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Traffic class to monitor (see [`TrafficClass`]); anything
    /// unrecognized falls back to "remote-access" with a warning.
    pub event: Option<String>,

    /// Socket whose home agent is sampled.
    pub socket: Option<u8>,

    /// HA instance on that socket.
    pub ha_instance: Option<u8>,

    /// Counter pair used for sampling.
    pub pair: Option<usize>,

    /// Access count per interval at which stalls are injected.
    pub threshold: Option<u64>,

    /// CPU the sampler is pinned to. Must sit on the sampled socket.
    pub sampling_cpu: Option<u32>,

    /// CPU that receives the injected stalls. Should sit on the other
    /// socket, next to the workload under test.
    pub target_cpu: Option<u32>,

    /// Milliseconds between samples.
    pub sample_interval_ms: Option<u64>,

    /// Milliseconds to wait after programming before the first sample.
    pub settle_ms: Option<u64>,

    /// Milliseconds to back off after a failed stall dispatch.
    pub backoff_ms: Option<u64>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `nvm-emu.toml`
    /// 3. User config `~/.config/nvm-emu/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load user config first (lowest priority of file configs)
        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        // Load project-local config (higher priority)
        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        // Environment variables override everything
        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    /// The traffic class to monitor, defaulting to remote access.
    pub fn traffic_class(&self) -> TrafficClass {
        self.event
            .as_deref()
            .map(TrafficClass::parse_or_default)
            .unwrap_or_default()
    }

    /// Socket whose HA is sampled, defaulting to socket 0.
    pub fn socket(&self) -> u8 {
        self.socket.unwrap_or(0)
    }

    /// HA instance, defaulting to instance 0.
    pub fn ha_instance(&self) -> u8 {
        self.ha_instance.unwrap_or(0)
    }

    /// Counter pair, defaulting to pair 0.
    pub fn pair(&self) -> usize {
        self.pair.unwrap_or(0)
    }

    /// Stall threshold, defaulting to 1000 accesses per interval.
    pub fn threshold(&self) -> u64 {
        self.threshold.unwrap_or(1000)
    }

    /// Sampler CPU, defaulting to CPU 1 (socket 0).
    pub fn sampling_cpu(&self) -> u32 {
        self.sampling_cpu.unwrap_or(1)
    }

    /// Stall target CPU, defaulting to CPU 12 (socket 1).
    pub fn target_cpu(&self) -> u32 {
        self.target_cpu.unwrap_or(12)
    }

    /// Sampling interval, defaulting to 10 ms.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.unwrap_or(10))
    }

    /// Post-programming settle time, defaulting to 100 ms.
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms.unwrap_or(100))
    }

    /// Dispatch-failure back-off, defaulting to 2000 ms.
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms.unwrap_or(2000))
    }

    /// The controller tuning this configuration describes.
    pub fn tuning(&self) -> Tuning {
        Tuning {
            event: self.traffic_class().descriptor(),
            threshold: self.threshold(),
            sample_interval: self.sample_interval(),
            settle: self.settle(),
            backoff: self.backoff(),
            sampling_cpu: self.sampling_cpu(),
        }
    }

    /// Load user configuration from ~/.config/nvm-emu/config.toml
    fn load_user_config() -> Option<Self> {
        let config_dir = dirs::config_dir()?;
        let config_path = config_dir.join("nvm-emu").join("config.toml");
        Self::load_from_file(&config_path)
    }

    /// Load project-local configuration from ./nvm-emu.toml
    fn load_local_config() -> Option<Self> {
        let local_path = Path::new("nvm-emu.toml");
        if let Some(config) = Self::load_from_file(local_path) {
            return Some(config);
        }

        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let project_path = Path::new(&manifest_dir).join("nvm-emu.toml");
            if let Some(config) = Self::load_from_file(&project_path) {
                return Some(config);
            }
        }

        None
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        if other.event.is_some() {
            self.event = other.event;
        }
        if other.socket.is_some() {
            self.socket = other.socket;
        }
        if other.ha_instance.is_some() {
            self.ha_instance = other.ha_instance;
        }
        if other.pair.is_some() {
            self.pair = other.pair;
        }
        if other.threshold.is_some() {
            self.threshold = other.threshold;
        }
        if other.sampling_cpu.is_some() {
            self.sampling_cpu = other.sampling_cpu;
        }
        if other.target_cpu.is_some() {
            self.target_cpu = other.target_cpu;
        }
        if other.sample_interval_ms.is_some() {
            self.sample_interval_ms = other.sample_interval_ms;
        }
        if other.settle_ms.is_some() {
            self.settle_ms = other.settle_ms;
        }
        if other.backoff_ms.is_some() {
            self.backoff_ms = other.backoff_ms;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(event) = std::env::var("NVM_EMU_EVENT") {
            log::info!("Using NVM_EMU_EVENT from environment: {}", event);
            self.event = Some(event);
        }
        if let Ok(value) = std::env::var("NVM_EMU_THRESHOLD") {
            match value.parse() {
                Ok(threshold) => {
                    log::info!("Using NVM_EMU_THRESHOLD from environment: {}", threshold);
                    self.threshold = Some(threshold);
                }
                Err(_) => log::warn!("Ignoring unparsable NVM_EMU_THRESHOLD: {value:?}"),
            }
        }
        if let Ok(value) = std::env::var("NVM_EMU_SAMPLING_CPU") {
            match value.parse() {
                Ok(cpu) => self.sampling_cpu = Some(cpu),
                Err(_) => log::warn!("Ignoring unparsable NVM_EMU_SAMPLING_CPU: {value:?}"),
            }
        }
        if let Ok(value) = std::env::var("NVM_EMU_TARGET_CPU") {
            match value.parse() {
                Ok(cpu) => self.target_cpu = Some(cpu),
                Err(_) => log::warn!("Ignoring unparsable NVM_EMU_TARGET_CPU: {value:?}"),
            }
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("nvm-emu").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# nvm-emu configuration
# Place this file at ~/.config/nvm-emu/config.toml or ./nvm-emu.toml

# Traffic class to monitor: remote-access (default), remote-reads,
# remote-writes, reads, writes, local-reads, local-writes, clock-ticks
# event = "remote-reads"

# Home agent to sample
# socket = 0
# ha_instance = 0
# pair = 0

# Access count per sampling interval that triggers a stall
# threshold = 1000

# CPU placement: the sampler must sit on the sampled socket, the stall
# target next to the workload on the other socket
# sampling_cpu = 1
# target_cpu = 12

# Loop timing in milliseconds
# sample_interval_ms = 10
# settle_ms = 100
# backoff_ms = 2000
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmon::events;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.traffic_class(), TrafficClass::RemoteAccess);
        assert_eq!(config.threshold(), 1000);
        assert_eq!(config.socket(), 0);
        assert_eq!(config.sampling_cpu(), 1);
        assert_eq!(config.target_cpu(), 12);
        assert_eq!(config.sample_interval(), Duration::from_millis(10));
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config {
            event: Some("reads".to_string()),
            threshold: None,
            target_cpu: Some(8),
            ..Config::default()
        };

        let overlay = Config {
            event: None,
            threshold: Some(500),
            target_cpu: Some(16),
            ..Config::default()
        };

        base.merge(overlay);

        // event unchanged (overlay was None)
        assert_eq!(base.event.as_deref(), Some("reads"));
        // threshold set from overlay
        assert_eq!(base.threshold, Some(500));
        // target_cpu overridden by overlay
        assert_eq!(base.target_cpu, Some(16));
    }

    #[test]
    fn test_invalid_event_falls_back_with_defaults_intact() {
        let config = Config {
            event: Some("garbage".to_string()),
            ..Config::default()
        };
        assert_eq!(config.traffic_class(), TrafficClass::RemoteAccess);
        assert_eq!(config.tuning().event, events::REMOTE_ACCESS);
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = Config::sample_config();
        let _: Config = toml::from_str(&sample).expect("Sample config should parse");
    }

    #[test]
    fn test_tuning_reflects_fields() {
        let config = Config {
            event: Some("remote-reads".to_string()),
            threshold: Some(2500),
            sample_interval_ms: Some(5),
            ..Config::default()
        };
        let tuning = config.tuning();
        assert_eq!(tuning.event, events::REMOTE_READS);
        assert_eq!(tuning.threshold, 2500);
        assert_eq!(tuning.sample_interval, Duration::from_millis(5));
    }
}
