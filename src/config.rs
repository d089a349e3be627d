use anyhow::{Context, Result, bail};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::events::Emotion;

pub const BASE_URL_ENV: &str = "VOXCHAT_BASE_URL";
pub const PROFILE_ENV: &str = "VOXCHAT_PROFILE";

const DEFAULT_BASE_URL: &str = "https://gptvoice.model1235.com";
const DEFAULT_FAILURE_TEXT: &str = "Fail";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of the voice backend, without a trailing slash
    pub base_url: String,

    /// Name of the active deployment profile
    pub profile: String,

    /// User-defined profiles; these shadow the built-in ones by name
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,

    /// Optional overall timeout for chat requests. Unset means wait forever.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    /// Default `tracing` filter when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Voxchat home directory
    #[serde(skip)]
    pub voxchat_home: PathBuf,
}

/// One entry of a speaker roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaker {
    pub id: u32,
    pub name: String,
}

/// Everything that differs between deployments of the chat page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub speakers: Vec<Speaker>,
    /// Whether an emotion tag is offered and sent at all
    pub emotions_enabled: bool,
    #[serde(default)]
    pub default_emotion: Emotion,
    /// Seeded assistant message; `None` starts with an empty transcript
    pub greeting: Option<String>,
    /// Attach the speaker's display name to assistant replies
    pub label_replies: bool,
    #[serde(default = "default_failure_text")]
    pub failure_text: String,
}

fn default_log_filter() -> String {
    "voxchat=info".to_string()
}

fn default_failure_text() -> String {
    DEFAULT_FAILURE_TEXT.to_string()
}

static BUILTIN_PROFILES: Lazy<BTreeMap<String, Profile>> = Lazy::new(|| {
    let mut profiles = BTreeMap::new();
    profiles.insert(
        "default".to_string(),
        Profile {
            speakers: vec![Speaker { id: 0, name: "0".to_string() }],
            emotions_enabled: true,
            default_emotion: Emotion::Neutral,
            greeting: Some("What can I help you?".to_string()),
            label_replies: false,
            failure_text: default_failure_text(),
        },
    );
    profiles.insert(
        "witcher".to_string(),
        Profile {
            speakers: ["Cirilla", "Emhyr", "Geralt", "Yennefer"]
                .iter()
                .enumerate()
                .map(|(id, name)| Speaker { id: id as u32, name: name.to_string() })
                .collect(),
            emotions_enabled: false,
            default_emotion: Emotion::Neutral,
            greeting: None,
            label_replies: true,
            failure_text: default_failure_text(),
        },
    );
    profiles
});

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));

        Config {
            base_url: DEFAULT_BASE_URL.to_string(),
            profile: "default".to_string(),
            profiles: BTreeMap::new(),
            request_timeout_secs: None,
            log_filter: default_log_filter(),
            voxchat_home: home.join(".voxchat"),
        }
    }
}

impl Config {
    /// Load `~/.voxchat/config.toml`, writing the defaults on first run,
    /// then apply environment overrides.
    pub fn load() -> Result<Self> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        let mut config = Self::load_from(&home.join(".voxchat"))?;
        config.apply_overrides(
            std::env::var(BASE_URL_ENV).ok(),
            std::env::var(PROFILE_ENV).ok(),
        )?;
        Ok(config)
    }

    /// Load configuration rooted at `voxchat_home` without looking at the
    /// environment.
    pub fn load_from(voxchat_home: &Path) -> Result<Self> {
        let config_path = voxchat_home.join("config.toml");

        fs::create_dir_all(voxchat_home)
            .context("Failed to create voxchat home directory")?;

        let mut config: Config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            toml::from_str(&content)
                .context("Failed to parse config file")?
        } else {
            let config = Config {
                voxchat_home: voxchat_home.to_path_buf(),
                ..Config::default()
            };
            config.save()?;
            config
        };

        config.voxchat_home = voxchat_home.to_path_buf();
        config.base_url = normalize_base_url(&config.base_url)?;
        config.active_profile()?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.voxchat_home.join("config.toml");
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;
        fs::write(&config_path, content)
            .context("Failed to write config file")?;
        Ok(())
    }

    /// Apply overrides coming from the environment or the command line.
    /// Later calls win.
    pub fn apply_overrides(
        &mut self,
        base_url: Option<String>,
        profile: Option<String>,
    ) -> Result<()> {
        if let Some(url) = base_url {
            self.base_url = normalize_base_url(&url)?;
        }
        if let Some(name) = profile {
            self.profile = name;
            self.active_profile()?;
        }
        Ok(())
    }

    /// The profile selected by `profile`, user-defined first.
    pub fn active_profile(&self) -> Result<&Profile> {
        self.profiles
            .get(&self.profile)
            .or_else(|| BUILTIN_PROFILES.get(&self.profile))
            .with_context(|| format!("Unknown profile '{}'", self.profile))
    }

    /// Names of every profile that can be selected.
    pub fn profile_names(&self) -> Vec<String> {
        let mut names: Vec<String> = BUILTIN_PROFILES
            .keys()
            .chain(self.profiles.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

/// Check that `raw` is an absolute http(s) URL and strip trailing slashes so
/// paths can be joined with a single `/`.
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = reqwest::Url::parse(trimmed)
        .with_context(|| format!("Invalid base URL '{}'", raw))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        bail!("Base URL must use http or https, got '{}'", url.scheme());
    }
    Ok(trimmed.to_string())
}
