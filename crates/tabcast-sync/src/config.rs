//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TABCAST_MAIN_CHANNEL=coordination                                  │
//! │     TABCAST_ENABLE_LEADER_ELECTION=true                                │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tabcast/sync.toml (Linux)                                │
//! │     ~/Library/Application Support/dev.tabcast.tabcast/sync.toml (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     both names "tabcast", exclude_self, election off                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! main_channel = "tabcast"
//! module_name = "tabcast"
//!
//! [channel]
//! mode = "exclude_self"   # exclude_self | full_mesh
//! worker_support = false
//!
//! [election]
//! enabled = true
//! response_time_ms = 1000
//! fallback_interval_ms = 3000
//!
//! [modules.todos]
//! broadcast = true
//! mutations = ["pushTodo", "removeTodo"]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tabcast_core::mutation::validate_segment;
use tabcast_core::ModuleCatalog;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::transport::{ChannelOptions, DeliveryMode};

/// Name used for both the coordination channel and the sync module unless
/// configured otherwise.
pub const DEFAULT_NAME: &str = "tabcast";

// =============================================================================
// Channel Settings
// =============================================================================

/// Options applied to every channel this instance opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Delivery mode of the transport.
    #[serde(default)]
    pub mode: DeliveryMode,

    /// Allow channels to be opened from worker contexts.
    #[serde(default)]
    pub worker_support: bool,
}

impl ChannelSettings {
    /// Transport options for opening a channel.
    pub fn options(&self) -> ChannelOptions {
        ChannelOptions {
            mode: self.mode,
            worker_support: self.worker_support,
        }
    }
}

// =============================================================================
// Election Settings
// =============================================================================

/// Leader election settings.
///
/// ## Timing
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                      Election Timing                                    │
/// │                                                                         │
/// │  apply ──── response_time ────► no objection → LEADER                   │
/// │    │                                                                    │
/// │    └─ tell / higher apply ─► lost ── fallback_interval ──► apply again │
/// │                                 └──── death from leader ──► apply now  │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionSettings {
    /// Whether this instance takes part in leader election.
    #[serde(default)]
    pub enabled: bool,

    /// How long an application waits for objections (milliseconds).
    #[serde(default = "default_response_time")]
    pub response_time_ms: u64,

    /// How long a losing elector waits before applying again (milliseconds).
    #[serde(default = "default_fallback_interval")]
    pub fallback_interval_ms: u64,
}

fn default_response_time() -> u64 {
    1000
}

fn default_fallback_interval() -> u64 {
    3000
}

impl Default for ElectionSettings {
    fn default() -> Self {
        ElectionSettings {
            enabled: false,
            response_time_ms: default_response_time(),
            fallback_interval_ms: default_fallback_interval(),
        }
    }
}

impl ElectionSettings {
    /// Response time as a duration.
    pub fn response_time(&self) -> Duration {
        Duration::from_millis(self.response_time_ms)
    }

    /// Fallback interval as a duration.
    pub fn fallback_interval(&self) -> Duration {
        Duration::from_millis(self.fallback_interval_ms)
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Name of the coordination channel used for leader election.
    #[serde(default = "default_name")]
    pub main_channel: String,

    /// Namespace under which the sync module is registered.
    #[serde(default = "default_name")]
    pub module_name: String,

    /// Transport options.
    #[serde(default)]
    pub channel: ChannelSettings,

    /// Leader election settings.
    #[serde(default)]
    pub election: ElectionSettings,

    /// Store modules and whether they are broadcast.
    #[serde(default)]
    pub modules: ModuleCatalog,
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            main_channel: default_name(),
            module_name: default_name(),
            channel: ChannelSettings::default(),
            election: ElectionSettings::default(),
            modules: ModuleCatalog::default(),
        }
    }
}

impl SyncConfig {
    /// Creates a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the module catalog, builder style.
    pub fn with_modules(mut self, modules: ModuleCatalog) -> Self {
        self.modules = modules;
        self
    }

    /// Enables leader election, builder style.
    pub fn with_election(mut self, enabled: bool) -> Self {
        self.election.enabled = enabled;
        self
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        validate_segment("channel", &self.main_channel)?;
        validate_segment("module", &self.module_name)?;
        self.modules.validate()?;

        for (name, _) in self.modules.broadcast_modules() {
            if name == self.main_channel {
                return Err(SyncError::InvalidConfig(format!(
                    "broadcast module '{}' collides with the coordination channel",
                    name
                )));
            }
            if name == self.module_name {
                return Err(SyncError::InvalidConfig(format!(
                    "broadcast module '{}' collides with the sync module",
                    name
                )));
            }
        }

        if self.election.response_time_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "response_time_ms must be greater than 0".into(),
            ));
        }
        if self.election.fallback_interval_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "fallback_interval_ms must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides read through `lookup`, keyed by environment
    /// variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(name) = lookup("TABCAST_MAIN_CHANNEL") {
            debug!(main_channel = %name, "Overriding coordination channel from environment");
            self.main_channel = name;
        }

        if let Some(name) = lookup("TABCAST_MODULE_NAME") {
            debug!(module_name = %name, "Overriding sync module name from environment");
            self.module_name = name;
        }

        if let Some(mode) = lookup("TABCAST_CHANNEL_MODE") {
            match mode.parse() {
                Ok(parsed) => {
                    debug!(mode = %mode, "Overriding channel mode from environment");
                    self.channel.mode = parsed;
                }
                Err(_) => warn!(mode = %mode, "Unknown channel mode in environment"),
            }
        }

        if let Some(value) = lookup("TABCAST_WORKER_SUPPORT") {
            match parse_flag(&value) {
                Some(flag) => self.channel.worker_support = flag,
                None => warn!(value = %value, "Invalid TABCAST_WORKER_SUPPORT value"),
            }
        }

        if let Some(value) = lookup("TABCAST_ENABLE_LEADER_ELECTION") {
            match parse_flag(&value) {
                Some(flag) => {
                    debug!(enabled = flag, "Overriding leader election from environment");
                    self.election.enabled = flag;
                }
                None => warn!(value = %value, "Invalid TABCAST_ENABLE_LEADER_ELECTION value"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "tabcast", "tabcast")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Transport options for every channel.
    pub fn channel_options(&self) -> ChannelOptions {
        self.channel.options()
    }

    /// Returns true if leader election is enabled.
    pub fn is_election_enabled(&self) -> bool {
        self.election.enabled
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tabcast_core::ModuleDeclaration;

    fn todos_config() -> SyncConfig {
        SyncConfig::new().with_modules(
            ModuleCatalog::new()
                .with_module("todos", ModuleDeclaration::broadcast(["pushTodo", "removeTodo"])),
        )
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.main_channel, "tabcast");
        assert_eq!(config.module_name, "tabcast");
        assert_eq!(config.channel.mode, DeliveryMode::ExcludeSelf);
        assert!(!config.channel.worker_support);
        assert!(!config.election.enabled);
        assert_eq!(config.election.response_time(), Duration::from_millis(1000));
        assert_eq!(config.election.fallback_interval(), Duration::from_millis(3000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = todos_config();
        assert!(config.validate().is_ok());

        config.main_channel = "todos".into();
        assert!(config.validate().unwrap_err().is_config_error());

        config.main_channel = "tabcast".into();
        config.module_name = "todos".into();
        assert!(config.validate().is_err());

        config.module_name = "sync/state".into();
        assert!(matches!(config.validate(), Err(SyncError::Protocol(_))));

        config.module_name = "tabcast".into();
        config.election.response_time_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_local_module_may_share_sync_name() {
        let config = SyncConfig::new().with_modules(
            ModuleCatalog::new().with_module("tabcast", ModuleDeclaration::local(["x"])),
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("TABCAST_MAIN_CHANNEL", "coordination"),
            ("TABCAST_CHANNEL_MODE", "full_mesh"),
            ("TABCAST_WORKER_SUPPORT", "yes"),
            ("TABCAST_ENABLE_LEADER_ELECTION", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = SyncConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.main_channel, "coordination");
        assert_eq!(config.module_name, "tabcast");
        assert_eq!(config.channel.mode, DeliveryMode::FullMesh);
        assert!(config.channel.worker_support);
        assert!(config.election.enabled);
    }

    #[test]
    fn test_invalid_overrides_are_ignored() {
        let mut config = SyncConfig::default();
        config.apply_overrides(|key| match key {
            "TABCAST_CHANNEL_MODE" => Some("carrier-pigeon".into()),
            "TABCAST_ENABLE_LEADER_ELECTION" => Some("maybe".into()),
            _ => None,
        });

        assert_eq!(config.channel.mode, DeliveryMode::ExcludeSelf);
        assert!(!config.election.enabled);
    }

    #[test]
    fn test_toml_parsing() {
        let config: SyncConfig = toml::from_str(
            r#"
            main_channel = "main"

            [channel]
            mode = "full_mesh"

            [election]
            enabled = true
            response_time_ms = 50

            [modules.todos]
            broadcast = true
            mutations = ["pushTodo"]
            "#,
        )
        .unwrap();

        assert_eq!(config.main_channel, "main");
        assert_eq!(config.module_name, "tabcast");
        assert_eq!(config.channel.mode, DeliveryMode::FullMesh);
        assert_eq!(config.election.response_time_ms, 50);
        assert_eq!(config.election.fallback_interval_ms, 3000);
        assert!(config.modules.get("todos").unwrap().broadcast);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("tabcast-{}", uuid::Uuid::new_v4()))
            .join("sync.toml");

        let config = todos_config().with_election(true);
        config.save(Some(path.clone())).unwrap();

        let loaded = SyncConfig::load(Some(path.clone())).unwrap();
        assert_eq!(loaded.modules, config.modules);
        assert_eq!(loaded.main_channel, config.main_channel);

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = std::env::temp_dir().join(format!("tabcast-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sync.toml");
        std::fs::write(&path, "main_channel = [").unwrap();

        let err = SyncConfig::load(Some(path)).unwrap_err();
        assert!(err.is_config_error());

        let _ = std::fs::remove_dir_all(dir);
    }
}
