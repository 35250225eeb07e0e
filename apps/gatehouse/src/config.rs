use std::{fs, path::Path};

use anyhow::{bail, Context};
use serde::Deserialize;
use shared::protocol::DEFAULT_PAGE_SIZE;
use tracing::warn;
use url::Url;

pub const CONFIG_FILE: &str = "gatehouse.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_url: String,
    pub page_size: u32,
    pub operator_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080/api".into(),
            page_size: DEFAULT_PAGE_SIZE,
            operator_name: String::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_url: Option<String>,
    page_size: Option<u32>,
    operator_name: Option<String>,
}

pub fn load_settings() -> anyhow::Result<Settings> {
    load_from(Path::new(CONFIG_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then the toml file (if present), then environment variables.
pub fn load_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        let file: FileSettings = toml::from_str(&raw)
            .with_context(|| format!("invalid config file '{}'", path.display()))?;
        if let Some(v) = file.api_url {
            settings.api_url = v;
        }
        if let Some(v) = file.page_size {
            settings.page_size = v;
        }
        if let Some(v) = file.operator_name {
            settings.operator_name = v;
        }
    }

    if let Some(v) = env("GATEHOUSE_API_URL") {
        settings.api_url = v;
    }
    if let Some(v) = env("APP__API_URL") {
        settings.api_url = v;
    }

    if let Some(v) = env("APP__PAGE_SIZE") {
        match v.trim().parse::<u32>() {
            Ok(parsed) => settings.page_size = parsed,
            Err(_) => warn!(value = %v, "ignoring invalid APP__PAGE_SIZE"),
        }
    }

    if let Some(v) = env("APP__OPERATOR") {
        settings.operator_name = v;
    }

    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &Settings) -> anyhow::Result<()> {
    let url = Url::parse(settings.api_url.trim())
        .with_context(|| format!("invalid api_url '{}'", settings.api_url))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("api_url must use http or https, got '{}'", url.scheme());
    }
    if settings.page_size == 0 {
        bail!("page_size must be at least 1");
    }
    Ok(())
}
