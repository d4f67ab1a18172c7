use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::defaults;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub capture: CaptureConfig,
    pub timing: TimingConfig,
}

/// Exchange endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Conversation endpoint (phase 1: reply text)
    pub conversation_url: String,
    /// Speech-synthesis endpoint (phase 2)
    pub synthesis_url: String,
    /// Caller identifier sent with every reply request
    pub user_id: String,
    /// Tenant identifier sent with every reply request
    pub company_id: String,
    /// Optional timeout for the reply call, in milliseconds.
    ///
    /// `None` (the default) leaves phase 1 unbounded; stale results are
    /// discarded by the turn-token check either way.
    pub reply_timeout_ms: Option<u64>,
    /// Hard cap on the synthesis call, in milliseconds
    pub synthesis_timeout_ms: u64,
}

/// Capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Recognition language tag.
    ///
    /// The controller does not interpret this; embedders read it when
    /// constructing their `SpeechCapture` adapter and configure the platform
    /// recognizer with it.
    pub language: String,
    /// Minimum transcript length (characters, trimmed) worth a turn
    pub min_transcript_chars: usize,
}

/// Scheduling delays for the listen loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Delay before capture restarts after a benign recognition end
    pub restart_delay_ms: u64,
    /// Delay before capture resumes after a turn completes
    pub resume_delay_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            conversation_url: String::new(),
            synthesis_url: String::new(),
            user_id: String::new(),
            company_id: String::new(),
            reply_timeout_ms: None,
            synthesis_timeout_ms: defaults::SYNTHESIS_TIMEOUT_MS,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            language: defaults::LANGUAGE.to_string(),
            min_transcript_chars: defaults::MIN_TRANSCRIPT_CHARS,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            restart_delay_ms: defaults::RESTART_DELAY_MS,
            resume_delay_ms: defaults::RESUME_DELAY_MS,
        }
    }
}

impl ExchangeConfig {
    pub fn synthesis_timeout(&self) -> Duration {
        defaults::millis(self.synthesis_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout_ms.map(defaults::millis)
    }
}

impl TimingConfig {
    pub fn restart_delay(&self) -> Duration {
        defaults::millis(self.restart_delay_ms)
    }

    pub fn resume_delay(&self) -> Duration {
        defaults::millis(self.resume_delay_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing; invalid TOML is an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Ok(Self::default())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXLOOP_CONVERSATION_URL → exchange.conversation_url
    /// - VOXLOOP_SYNTHESIS_URL → exchange.synthesis_url
    /// - VOXLOOP_USER_ID → exchange.user_id
    /// - VOXLOOP_COMPANY_ID → exchange.company_id
    /// - VOXLOOP_LANGUAGE → capture.language
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("VOXLOOP_CONVERSATION_URL")
            && !url.is_empty()
        {
            self.exchange.conversation_url = url;
        }

        if let Ok(url) = std::env::var("VOXLOOP_SYNTHESIS_URL")
            && !url.is_empty()
        {
            self.exchange.synthesis_url = url;
        }

        if let Ok(user_id) = std::env::var("VOXLOOP_USER_ID")
            && !user_id.is_empty()
        {
            self.exchange.user_id = user_id;
        }

        if let Ok(company_id) = std::env::var("VOXLOOP_COMPANY_ID")
            && !company_id.is_empty()
        {
            self.exchange.company_id = company_id;
        }

        if let Ok(language) = std::env::var("VOXLOOP_LANGUAGE")
            && !language.is_empty()
        {
            self.capture.language = language;
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_voxloop_env() {
        remove_env("VOXLOOP_CONVERSATION_URL");
        remove_env("VOXLOOP_SYNTHESIS_URL");
        remove_env("VOXLOOP_USER_ID");
        remove_env("VOXLOOP_COMPANY_ID");
        remove_env("VOXLOOP_LANGUAGE");
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.exchange.conversation_url, "");
        assert_eq!(config.exchange.synthesis_url, "");
        assert_eq!(config.exchange.user_id, "");
        assert_eq!(config.exchange.company_id, "");
        assert_eq!(config.exchange.reply_timeout_ms, None);
        assert_eq!(config.exchange.synthesis_timeout_ms, 10_000);

        assert_eq!(config.capture.language, "en-US");
        assert_eq!(config.capture.min_transcript_chars, 2);

        assert_eq!(config.timing.restart_delay_ms, 300);
        assert_eq!(config.timing.resume_delay_ms, 300);
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [exchange]
            conversation_url = "https://api.example.com/converse"
            synthesis_url = "https://api.example.com/synthesize"
            user_id = "user-42"
            company_id = "acme"
            reply_timeout_ms = 15000
            synthesis_timeout_ms = 5000

            [capture]
            language = "en-GB"
            min_transcript_chars = 3

            [timing]
            restart_delay_ms = 100
            resume_delay_ms = 250
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(
            config.exchange.conversation_url,
            "https://api.example.com/converse"
        );
        assert_eq!(
            config.exchange.synthesis_url,
            "https://api.example.com/synthesize"
        );
        assert_eq!(config.exchange.user_id, "user-42");
        assert_eq!(config.exchange.company_id, "acme");
        assert_eq!(config.exchange.reply_timeout_ms, Some(15_000));
        assert_eq!(config.exchange.synthesis_timeout_ms, 5000);

        assert_eq!(config.capture.language, "en-GB");
        assert_eq!(config.capture.min_transcript_chars, 3);

        assert_eq!(config.timing.restart_delay_ms, 100);
        assert_eq!(config.timing.resume_delay_ms, 250);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let toml_content = r#"
            [exchange]
            user_id = "user-7"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.exchange.user_id, "user-7");

        // Everything else should be defaults
        assert_eq!(config.exchange.synthesis_timeout_ms, 10_000);
        assert_eq!(config.capture.language, "en-US");
        assert_eq!(config.timing.restart_delay_ms, 300);
    }

    #[test]
    fn test_load_invalid_toml_is_an_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"exchange = not valid toml").unwrap();

        assert!(Config::load(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/voxloop.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_env_override_urls() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxloop_env();

        set_env("VOXLOOP_CONVERSATION_URL", "https://other.example/conv");
        set_env("VOXLOOP_SYNTHESIS_URL", "https://other.example/tts");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.exchange.conversation_url, "https://other.example/conv");
        assert_eq!(config.exchange.synthesis_url, "https://other.example/tts");
        assert_eq!(config.exchange.user_id, ""); // Not overridden

        clear_voxloop_env();
    }

    #[test]
    fn test_env_override_identity() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxloop_env();

        set_env("VOXLOOP_USER_ID", "env-user");
        set_env("VOXLOOP_COMPANY_ID", "env-company");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.exchange.user_id, "env-user");
        assert_eq!(config.exchange.company_id, "env-company");

        clear_voxloop_env();
    }

    #[test]
    fn test_env_override_empty_value_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxloop_env();

        set_env("VOXLOOP_LANGUAGE", "");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.capture.language, "en-US");

        clear_voxloop_env();
    }

    #[test]
    fn test_duration_accessors() {
        let config = Config::default();
        assert_eq!(config.exchange.synthesis_timeout(), Duration::from_secs(10));
        assert_eq!(config.exchange.reply_timeout(), None);
        assert_eq!(config.timing.restart_delay(), Duration::from_millis(300));
        assert_eq!(config.timing.resume_delay(), Duration::from_millis(300));

        let config = Config {
            exchange: ExchangeConfig {
                reply_timeout_ms: Some(2000),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(config.exchange.reply_timeout(), Some(Duration::from_secs(2)));
    }
}
