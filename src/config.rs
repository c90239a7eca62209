//! Configuration loading and defaults for chatterm.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::session::{SessionOptions, SubmissionPolicy};
use crate::prompts;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_AGENT_MODEL: &str = "gpt-4o";
pub const DEFAULT_TEMPERATURE: f32 = 0.1;
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
pub const DEFAULT_ERROR_LOG: &str = "error.log";
pub const DEFAULT_MAX_RETRY_DELAY: f64 = 60.0;

// === Types ===

/// Raw retry configuration loaded from config files.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub enabled: Option<bool>,
    pub max_retries: Option<u32>,
    pub initial_delay: Option<f64>,
    pub max_delay: Option<f64>,
    pub exponential_base: Option<f64>,
}

impl RetryConfig {
    /// Delays must be finite and non-negative, and the growth base at least 1.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("retry.initial_delay", self.initial_delay),
            ("retry.max_delay", self.max_delay),
        ] {
            if let Some(value) = value
                && !(value.is_finite() && value >= 0.0)
            {
                anyhow::bail!("{name} must be a finite, non-negative number of seconds, got {value}");
            }
        }
        if let Some(base) = self.exponential_base
            && !(base.is_finite() && base >= 1.0)
        {
            anyhow::bail!("retry.exponential_base must be a finite number >= 1.0, got {base}");
        }
        Ok(())
    }
}

/// Resolved retry policy with defaults applied.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_retries: u32,
    pub initial_delay: f64,
    pub max_delay: f64,
    pub exponential_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            initial_delay: 1.0,
            max_delay: DEFAULT_MAX_RETRY_DELAY,
            exponential_base: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Compute the backoff delay for a retry attempt.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.initial_delay * self.exponential_base.powi(exponent);
        let delay = delay.min(self.max_delay).max(0.0);
        std::time::Duration::try_from_secs_f64(delay)
            .unwrap_or(std::time::Duration::from_secs_f64(DEFAULT_MAX_RETRY_DELAY))
    }
}

/// Resolved CLI configuration, including defaults and environment overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub chat_model: Option<String>,
    pub agent_model: Option<String>,
    pub temperature: Option<f32>,
    pub max_iterations: Option<u32>,
    /// Replaces the built-in system preamble.
    pub system_prompt: Option<String>,
    /// Replaces the built-in agent instructions.
    pub agent_prompt: Option<String>,
    pub error_log_path: Option<String>,
    /// Diagnostic log written by `tracing`.
    pub log_path: Option<String>,
    pub mcp_config_path: Option<String>,
    pub submission_policy: Option<SubmissionPolicy>,
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigFile {
    #[serde(flatten)]
    base: Config,
    profiles: Option<HashMap<String, Config>>,
}

// === Config Loading ===

impl Config {
    /// Load configuration from disk and merge with environment overrides.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// # use chatterm::config::Config;
    /// let config = Config::load(None, None)?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn load(path: Option<PathBuf>, profile: Option<&str>) -> Result<Self> {
        let path = path.or_else(default_config_path);
        let mut config = if let Some(path) = path.as_ref() {
            if path.exists() {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                let parsed: ConfigFile = toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
                apply_profile(parsed, profile)?
            } else {
                Config::default()
            }
        } else {
            Config::default()
        };

        apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Validate value ranges. A missing API key is allowed until a model is called.
    pub fn validate(&self) -> Result<()> {
        if let Some(ref key) = self.api_key
            && key.trim().is_empty()
        {
            anyhow::bail!("api_key cannot be empty string");
        }
        if let Some(temperature) = self.temperature
            && !(0.0..=2.0).contains(&temperature)
        {
            anyhow::bail!("temperature must be between 0.0 and 2.0, got {temperature}");
        }
        if self.max_iterations == Some(0) {
            anyhow::bail!("max_iterations must be at least 1");
        }
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        Ok(())
    }

    /// Read the API key from config/environment.
    pub fn api_key(&self) -> Result<String> {
        self.api_key.clone().context(
            "Failed to load API key: CHATTERM_API_KEY or OPENAI_API_KEY missing. Set it in config.toml or environment.",
        )
    }

    /// Return the API base URL (normalized, without a trailing `/v1`).
    #[must_use]
    pub fn base_url(&self) -> String {
        let base = self
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        normalize_base_url(&base)
    }

    #[must_use]
    pub fn chat_model(&self) -> String {
        self.chat_model
            .clone()
            .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string())
    }

    #[must_use]
    pub fn agent_model(&self) -> String {
        self.agent_model
            .clone()
            .unwrap_or_else(|| DEFAULT_AGENT_MODEL.to_string())
    }

    #[must_use]
    pub fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    #[must_use]
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS).max(1)
    }

    #[must_use]
    pub fn system_prompt(&self) -> String {
        self.system_prompt
            .as_deref()
            .map(str::trim)
            .filter(|prompt| !prompt.is_empty())
            .map_or_else(prompts::default_system_prompt, str::to_string)
    }

    #[must_use]
    pub fn agent_prompt(&self) -> String {
        self.agent_prompt
            .as_deref()
            .map(str::trim)
            .filter(|prompt| !prompt.is_empty())
            .map_or_else(prompts::agent_system_prompt, str::to_string)
    }

    #[must_use]
    pub fn submission_policy(&self) -> SubmissionPolicy {
        self.submission_policy.unwrap_or_default()
    }

    /// Resolve the durable error log path. Relative paths are kept relative
    /// to the working directory.
    #[must_use]
    pub fn error_log_path(&self) -> PathBuf {
        self.error_log_path
            .as_deref()
            .map_or_else(|| PathBuf::from(DEFAULT_ERROR_LOG), expand_path)
    }

    /// Resolve the diagnostic log path.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.log_path
            .as_deref()
            .map(expand_path)
            .or_else(default_log_path)
            .unwrap_or_else(|| PathBuf::from("./chatterm.log"))
    }

    /// Resolve the MCP config path.
    #[must_use]
    pub fn mcp_config_path(&self) -> PathBuf {
        self.mcp_config_path
            .as_deref()
            .map(expand_path)
            .or_else(default_mcp_config_path)
            .unwrap_or_else(|| PathBuf::from("./mcp.json"))
    }

    /// Resolve the effective retry policy with defaults applied.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();

        let Some(cfg) = &self.retry else {
            return defaults;
        };

        RetryPolicy {
            enabled: cfg.enabled.unwrap_or(defaults.enabled),
            max_retries: cfg.max_retries.unwrap_or(defaults.max_retries),
            initial_delay: cfg.initial_delay.unwrap_or(defaults.initial_delay),
            max_delay: cfg.max_delay.unwrap_or(defaults.max_delay),
            exponential_base: cfg.exponential_base.unwrap_or(defaults.exponential_base),
        }
    }

    /// Session options derived from this config.
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            system_prompt: self.system_prompt(),
            max_iterations: self.max_iterations(),
            submission_policy: self.submission_policy(),
            ..SessionOptions::default()
        }
    }
}

// === Defaults ===

fn chatterm_home() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".chatterm"))
}

fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CHATTERM_CONFIG_PATH")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }
    chatterm_home().map(|dir| dir.join("config.toml"))
}

fn expand_path(path: &str) -> PathBuf {
    let expanded = shellexpand::tilde(path);
    PathBuf::from(expanded.as_ref())
}

fn default_mcp_config_path() -> Option<PathBuf> {
    chatterm_home().map(|dir| dir.join("mcp.json"))
}

fn default_log_path() -> Option<PathBuf> {
    chatterm_home().map(|dir| dir.join("chatterm.log"))
}

// === Environment Overrides ===

fn apply_env_overrides(config: &mut Config) {
    if let Ok(value) = std::env::var("CHATTERM_API_KEY") {
        config.api_key = Some(value);
    } else if config.api_key.is_none()
        && let Ok(value) = std::env::var("OPENAI_API_KEY")
    {
        config.api_key = Some(value);
    }
    if let Ok(value) = std::env::var("CHATTERM_BASE_URL") {
        config.base_url = Some(value);
    }
    if let Ok(value) = std::env::var("CHATTERM_CHAT_MODEL") {
        config.chat_model = Some(value);
    }
    if let Ok(value) = std::env::var("CHATTERM_AGENT_MODEL") {
        config.agent_model = Some(value);
    }
    if let Ok(value) = std::env::var("CHATTERM_MCP_CONFIG") {
        config.mcp_config_path = Some(value);
    }
    if let Ok(value) = std::env::var("CHATTERM_ERROR_LOG") {
        config.error_log_path = Some(value);
    }
    if let Ok(value) = std::env::var("CHATTERM_SUBMISSION_POLICY") {
        match value.trim().to_ascii_lowercase().as_str() {
            "queue" => config.submission_policy = Some(SubmissionPolicy::Queue),
            "overlap" => config.submission_policy = Some(SubmissionPolicy::Overlap),
            other => tracing::warn!("Ignoring unknown CHATTERM_SUBMISSION_POLICY `{other}`"),
        }
    }
}

fn normalize_base_url(base: &str) -> String {
    base.trim_end_matches('/')
        .trim_end_matches("/v1")
        .trim_end_matches('/')
        .to_string()
}

fn apply_profile(config: ConfigFile, profile: Option<&str>) -> Result<Config> {
    if let Some(profile_name) = profile {
        let profiles = config.profiles.as_ref();
        match profiles.and_then(|profiles| profiles.get(profile_name)) {
            Some(override_cfg) => Ok(merge_config(config.base, override_cfg.clone())),
            None => {
                let available = profiles
                    .map(|profiles| {
                        let mut keys = profiles.keys().cloned().collect::<Vec<_>>();
                        keys.sort();
                        if keys.is_empty() {
                            "none".to_string()
                        } else {
                            keys.join(", ")
                        }
                    })
                    .unwrap_or_else(|| "none".to_string());
                anyhow::bail!(
                    "Profile '{}' not found. Available profiles: {}",
                    profile_name,
                    available
                )
            }
        }
    } else {
        Ok(config.base)
    }
}

fn merge_config(base: Config, override_cfg: Config) -> Config {
    Config {
        api_key: override_cfg.api_key.or(base.api_key),
        base_url: override_cfg.base_url.or(base.base_url),
        chat_model: override_cfg.chat_model.or(base.chat_model),
        agent_model: override_cfg.agent_model.or(base.agent_model),
        temperature: override_cfg.temperature.or(base.temperature),
        max_iterations: override_cfg.max_iterations.or(base.max_iterations),
        system_prompt: override_cfg.system_prompt.or(base.system_prompt),
        agent_prompt: override_cfg.agent_prompt.or(base.agent_prompt),
        error_log_path: override_cfg.error_log_path.or(base.error_log_path),
        log_path: override_cfg.log_path.or(base.log_path),
        mcp_config_path: override_cfg.mcp_config_path.or(base.mcp_config_path),
        submission_policy: override_cfg.submission_policy.or(base.submission_policy),
        retry: override_cfg.retry.or(base.retry),
    }
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::ffi::OsString;
    use std::sync::{Mutex, OnceLock};

    const GUARDED_VARS: [&str; 11] = [
        "HOME",
        "USERPROFILE",
        "CHATTERM_CONFIG_PATH",
        "CHATTERM_API_KEY",
        "OPENAI_API_KEY",
        "CHATTERM_BASE_URL",
        "CHATTERM_CHAT_MODEL",
        "CHATTERM_AGENT_MODEL",
        "CHATTERM_MCP_CONFIG",
        "CHATTERM_ERROR_LOG",
        "CHATTERM_SUBMISSION_POLICY",
    ];

    /// Points HOME at `home`, clears every chatterm variable, and restores
    /// the previous values on drop.
    struct EnvGuard {
        saved: Vec<(&'static str, Option<OsString>)>,
    }

    impl EnvGuard {
        fn new(home: &Path) -> Self {
            let saved = GUARDED_VARS
                .iter()
                .map(|key| (*key, env::var_os(key)))
                .collect();
            // Safety: test-only environment mutation guarded by a global mutex.
            unsafe {
                for key in GUARDED_VARS {
                    env::remove_var(key);
                }
                env::set_var("HOME", home);
                env::set_var("USERPROFILE", home);
            }
            Self { saved }
        }

        fn set(&self, key: &str, value: &str) {
            // Safety: test-only environment mutation guarded by a global mutex.
            unsafe {
                env::set_var(key, value);
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                // Safety: test-only environment mutation guarded by a global mutex.
                unsafe {
                    match value {
                        Some(value) => env::set_var(key, value),
                        None => env::remove_var(key),
                    }
                }
            }
        }
    }

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    #[test]
    fn defaults_without_config_file() -> Result<()> {
        let _lock = env_lock().lock().unwrap();
        let temp_root = tempfile::tempdir()?;
        let _guard = EnvGuard::new(temp_root.path());

        let config = Config::load(None, None)?;
        assert_eq!(config.chat_model(), "gpt-4o-mini");
        assert_eq!(config.agent_model(), "gpt-4o");
        assert!((config.temperature() - 0.1).abs() < f32::EPSILON);
        assert_eq!(config.max_iterations(), 10);
        assert_eq!(config.submission_policy(), SubmissionPolicy::Queue);
        assert_eq!(config.error_log_path(), PathBuf::from("error.log"));
        assert_eq!(config.base_url(), "https://api.openai.com");
        assert!(config.api_key().is_err());
        Ok(())
    }

    #[test]
    fn profile_overrides_base_values() -> Result<()> {
        let _lock = env_lock().lock().unwrap();
        let temp_root = tempfile::tempdir()?;
        let _guard = EnvGuard::new(temp_root.path());

        let path = temp_root.path().join("config.toml");
        fs::write(
            &path,
            r#"
api_key = "base-key"
chat_model = "base-model"
submission_policy = "overlap"

[retry]
max_retries = 1

[profiles.local]
base_url = "http://localhost:11434/v1/"
chat_model = "llama3"
"#,
        )?;

        let config = Config::load(Some(path), Some("local"))?;
        assert_eq!(config.chat_model(), "llama3");
        assert_eq!(config.api_key()?, "base-key");
        assert_eq!(config.base_url(), "http://localhost:11434");
        assert_eq!(config.submission_policy(), SubmissionPolicy::Overlap);
        assert_eq!(config.retry_policy().max_retries, 1);
        Ok(())
    }

    #[test]
    fn env_overrides_file_and_prefers_chatterm_key() -> Result<()> {
        let _lock = env_lock().lock().unwrap();
        let temp_root = tempfile::tempdir()?;
        let guard = EnvGuard::new(temp_root.path());
        guard.set("OPENAI_API_KEY", "openai-key");
        guard.set("CHATTERM_AGENT_MODEL", "env-agent");

        let config = Config::load(None, None)?;
        assert_eq!(config.api_key()?, "openai-key");
        assert_eq!(config.agent_model(), "env-agent");

        guard.set("CHATTERM_API_KEY", "chatterm-key");
        let config = Config::load(None, None)?;
        assert_eq!(config.api_key()?, "chatterm-key");
        Ok(())
    }

    #[test]
    fn config_path_env_var_is_used() -> Result<()> {
        let _lock = env_lock().lock().unwrap();
        let temp_root = tempfile::tempdir()?;
        let guard = EnvGuard::new(temp_root.path());
        let path = temp_root.path().join("custom.toml");
        fs::write(&path, "max_iterations = 3\n")?;
        guard.set("CHATTERM_CONFIG_PATH", &path.to_string_lossy());

        let config = Config::load(None, None)?;
        assert_eq!(config.max_iterations(), 3);
        Ok(())
    }

    #[test]
    fn test_tilde_expansion_in_paths() -> Result<()> {
        let _lock = env_lock().lock().unwrap();
        let temp_root = tempfile::tempdir()?;
        let _guard = EnvGuard::new(temp_root.path());

        let config = Config {
            mcp_config_path: Some("~/.chatterm/servers.json".to_string()),
            ..Default::default()
        };
        let expected_home = dirs::home_dir().expect("home dir not found");
        let expected = expected_home.join(".chatterm").join("servers.json");
        assert_eq!(
            config.mcp_config_path().components().collect::<Vec<_>>(),
            expected.components().collect::<Vec<_>>()
        );

        let config = Config {
            error_log_path: Some("./logs/errors.log".to_string()),
            ..Default::default()
        };
        assert_eq!(config.error_log_path(), PathBuf::from("./logs/errors.log"));
        Ok(())
    }

    #[test]
    fn test_nonexistent_profile_error() {
        let mut profiles = HashMap::new();
        profiles.insert("work".to_string(), Config::default());
        let config = ConfigFile {
            base: Config::default(),
            profiles: Some(profiles),
        };

        let err = apply_profile(config, Some("nonexistent")).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Profile 'nonexistent' not found"));
        assert!(message.contains("Available profiles"));
        assert!(message.contains("work"));
    }

    #[test]
    fn test_profile_with_no_profiles_section() {
        let config = ConfigFile {
            base: Config::default(),
            profiles: None,
        };

        let err = apply_profile(config, Some("missing")).unwrap_err();
        assert!(err.to_string().contains("Available profiles: none"));
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let config = Config {
            api_key: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let config = Config {
            temperature: Some(2.5),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            max_iterations: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_api_key_allowed() -> Result<()> {
        let config = Config::default();
        config.validate()?;
        Ok(())
    }

    #[test]
    fn blank_system_prompt_falls_back_to_default() {
        let config = Config {
            system_prompt: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(config.system_prompt(), prompts::default_system_prompt());
    }

    #[test]
    fn agent_prompt_overrides_builtin_instructions() {
        assert_eq!(Config::default().agent_prompt(), prompts::agent_system_prompt());
        let config = Config {
            agent_prompt: Some("Only use tools.".to_string()),
            ..Default::default()
        };
        assert_eq!(config.agent_prompt(), "Only use tools.");
    }

    #[test]
    fn non_finite_retry_delays_are_rejected() {
        let parsed: ConfigFile = toml::from_str("[retry]\nmax_delay = inf\n").unwrap();
        let err = parsed.base.validate().unwrap_err();
        assert!(err.to_string().contains("retry.max_delay"), "{err}");

        let parsed: ConfigFile = toml::from_str("[retry]\ninitial_delay = -1.0\n").unwrap();
        assert!(parsed.base.validate().is_err());

        let parsed: ConfigFile = toml::from_str("[retry]\nexponential_base = nan\n").unwrap();
        assert!(parsed.base.validate().is_err());
    }

    #[test]
    fn overflowing_retry_delay_does_not_panic() {
        let policy = RetryPolicy {
            max_delay: f64::INFINITY,
            ..RetryPolicy::default()
        };
        assert_eq!(
            policy.delay_for_attempt(u32::MAX).as_secs_f64(),
            DEFAULT_MAX_RETRY_DELAY
        );
    }

    #[test]
    fn retry_delay_is_capped() {
        let policy = RetryPolicy {
            max_delay: 5.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(0).as_secs_f64(), 1.0);
        assert_eq!(policy.delay_for_attempt(1).as_secs_f64(), 2.0);
        assert_eq!(policy.delay_for_attempt(10).as_secs_f64(), 5.0);
    }
}
