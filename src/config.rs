//! Configuration types for voice session control and command execution.

use crate::commands::CommandCategory;
use crate::safety::SafetyLevel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceControlConfig {
    /// Safety gate settings.
    pub safety: SafetyConfig,
    /// Voice session lifecycle settings.
    pub session: SessionConfig,
    /// Command dispatch and usage tracking settings.
    pub commands: CommandsConfig,
    /// Log output settings (used by the binary).
    pub logging: LoggingConfig,
}

/// Safety gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// How aggressively risky commands are gated.
    pub level: SafetyLevel,
    /// Command categories that may run at all. Others are blocked.
    pub enabled_categories: Vec<CommandCategory>,
    /// Run low-risk commands without asking first.
    pub auto_execute_safe_commands: bool,
    /// Command ids that strict mode confirms instead of blocking, even when
    /// they look destructive.
    pub allowed_critical: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            level: SafetyLevel::Moderate,
            enabled_categories: CommandCategory::all().to_vec(),
            auto_execute_safe_commands: true,
            allowed_critical: Vec::new(),
        }
    }
}

/// Voice session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Connect immediately when the session is enabled.
    pub auto_connect: bool,
    /// Whether `speak()` is allowed to synthesize speech.
    pub tts_enabled: bool,
    /// Maximum reconnection attempts before the session is marked failed.
    pub reconnect_attempts: u32,
    /// Base reconnection delay in milliseconds (doubled per attempt).
    pub reconnect_delay_ms: u64,
    /// Interval between health checks in milliseconds.
    pub health_check_interval_ms: u64,
    /// A connected session idle for this long is considered unhealthy.
    pub session_timeout_ms: u64,
    /// Voice passed to the synthesizer.
    pub voice: Option<String>,
    /// Speech rate multiplier passed to the synthesizer.
    pub speech_rate: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_connect: true,
            tts_enabled: true,
            reconnect_attempts: 5,
            reconnect_delay_ms: 1_000,
            health_check_interval_ms: 5_000,
            session_timeout_ms: 30_000,
            voice: None,
            speech_rate: 1.0,
        }
    }
}

impl SessionConfig {
    /// Base delay before the first reconnection attempt.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Period of the health-check loop.
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Idle time after which a health check fails. Measured from the last
    /// recorded activity.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

/// Command dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// Number of dispatches kept in the in-memory history.
    pub max_command_history: usize,
    /// Where usage records are persisted (None = in memory only).
    pub usage_path: Option<PathBuf>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            max_command_history: 50,
            usage_path: None,
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub filter: String,
    /// Directory for a daily rolling log file (None = stderr only).
    pub file_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "voxcmd=info".to_owned(),
            file_dir: None,
        }
    }
}

impl VoiceControlConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::VoiceCommandError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is
    /// missing, empty, or unreadable. Startup never fails on a bad file.
    pub fn load_or_default(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => {
                tracing::warn!(path = %path.display(), "config file is empty, using defaults");
                Self::default()
            }
            Ok(_) => match Self::from_file(path) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "loaded voice control config");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "config file invalid, using defaults");
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read config, using defaults");
                Self::default()
            }
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::VoiceCommandError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/voxcmd/config.toml`.
    ///
    /// `VOXCMD_CONFIG_DIR` overrides the directory.
    pub fn default_config_path() -> PathBuf {
        if let Some(dir) = std::env::var_os("VOXCMD_CONFIG_DIR") {
            return PathBuf::from(dir).join("config.toml");
        }
        dirs::config_dir()
            .map(|d| d.join("voxcmd"))
            .unwrap_or_else(|| PathBuf::from("/tmp/voxcmd-config"))
            .join("config.toml")
    }

    /// Reject values that would make timers spin or never fire.
    pub fn validate(&self) -> crate::error::Result<()> {
        let session = &self.session;
        if session.health_check_interval_ms == 0 {
            return Err(crate::error::VoiceCommandError::Config(
                "session.health_check_interval_ms must be greater than zero".to_owned(),
            ));
        }
        if session.session_timeout_ms == 0 {
            return Err(crate::error::VoiceCommandError::Config(
                "session.session_timeout_ms must be greater than zero".to_owned(),
            ));
        }
        if session.speech_rate.is_nan() || session.speech_rate <= 0.0 {
            return Err(crate::error::VoiceCommandError::Config(
                "session.speech_rate must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    /// Apply `VOXCMD_*` environment overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup. Invalid values are logged
    /// and ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup("VOXCMD_SAFETY_LEVEL") {
            match raw.parse::<SafetyLevel>() {
                Ok(level) => self.safety.level = level,
                Err(e) => tracing::warn!("ignoring VOXCMD_SAFETY_LEVEL: {e}"),
            }
        }
        if let Some(raw) = lookup("VOXCMD_TTS_ENABLED") {
            self.session.tts_enabled = raw.eq_ignore_ascii_case("true") || raw == "1";
        }
        if let Some(raw) = lookup("VOXCMD_RECONNECT_ATTEMPTS") {
            match raw.parse::<u32>() {
                Ok(n) => self.session.reconnect_attempts = n,
                Err(_) => tracing::warn!("ignoring invalid VOXCMD_RECONNECT_ATTEMPTS={raw:?}"),
            }
        }
        if let Some(raw) = lookup("VOXCMD_SESSION_TIMEOUT_MS") {
            match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => self.session.session_timeout_ms = ms,
                _ => tracing::warn!("ignoring invalid VOXCMD_SESSION_TIMEOUT_MS={raw:?}"),
            }
        }
    }
}
