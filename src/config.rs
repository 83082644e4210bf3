use crate::error::AppError;
use crate::models::Platform;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const SERVICE_NAME: &str = "billing-lens";
pub const ENV_PREFIX: &str = "BILLING_LENS";
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";
const TOKEN_ACCOUNT: &str = "access-token";

fn app_home_dir() -> Result<PathBuf, AppError> {
    if let Ok(custom) = std::env::var("BILLING_LENS_HOME") {
        return Ok(PathBuf::from(custom));
    }

    if let Some(dirs) = ProjectDirs::from("com", "billing-lens", SERVICE_NAME) {
        let candidate = dirs.data_local_dir().to_path_buf();
        if fs::create_dir_all(&candidate).is_ok() {
            return Ok(candidate);
        }
    }

    let cwd = std::env::current_dir()?;
    Ok(cwd.join(".billing-lens"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    #[default]
    System,
    Light,
    Dark,
}

impl ThemeMode {
    pub fn parse(input: &str) -> Option<ThemeMode> {
        match input.trim().to_ascii_lowercase().as_str() {
            "system" => Some(ThemeMode::System),
            "light" => Some(ThemeMode::Light),
            "dark" => Some(ThemeMode::Dark),
            _ => None,
        }
    }

    /// Resolve `System` from the terminal background. Must run before raw mode.
    pub fn is_dark(self) -> bool {
        match self {
            ThemeMode::Light => false,
            ThemeMode::Dark => true,
            ThemeMode::System => !matches!(terminal_light::luma(), Ok(luma) if luma > 0.6),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub platform: Platform,
    pub year: Option<i32>,
    pub theme: ThemeMode,
    pub top_n: usize,
    pub refresh_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            platform: Platform::Gcp,
            year: None,
            theme: ThemeMode::System,
            top_n: crate::chart::DEFAULT_TOP_N,
            refresh_seconds: 300,
        }
    }
}

impl AppConfig {
    pub fn effective_year(&self) -> i32 {
        use chrono::Datelike;
        self.year.unwrap_or_else(|| chrono::Local::now().year())
    }
}

pub fn config_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("config"))
}

pub fn data_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("data"))
}

pub fn config_path() -> Result<PathBuf, AppError> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn db_path() -> Result<PathBuf, AppError> {
    Ok(data_dir()?.join("billing.sqlite"))
}

pub fn log_path() -> Result<PathBuf, AppError> {
    Ok(data_dir()?.join("billing-lens.log"))
}

pub fn ensure_dirs() -> Result<(), AppError> {
    fs::create_dir_all(config_dir()?)?;
    fs::create_dir_all(data_dir()?)?;
    Ok(())
}

fn normalize_config(config: &mut AppConfig) -> bool {
    let mut changed = false;

    let trimmed = config.api_base_url.trim().trim_end_matches('/').to_string();
    let trimmed = if trimmed.is_empty() {
        DEFAULT_API_BASE_URL.to_string()
    } else {
        trimmed
    };
    if trimmed != config.api_base_url {
        config.api_base_url = trimmed;
        changed = true;
    }

    if config.top_n == 0 {
        config.top_n = 1;
        changed = true;
    }

    if config.refresh_seconds == 0 {
        config.refresh_seconds = AppConfig::default().refresh_seconds;
        changed = true;
    }

    changed
}

fn read_layered(path: &Path) -> Result<AppConfig, AppError> {
    let settings = ::config::Config::builder()
        .add_source(::config::File::from(path.to_path_buf()).required(false))
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .ignore_empty(true),
        )
        .build()?;
    Ok(settings.try_deserialize()?)
}

pub fn load_config() -> Result<AppConfig, AppError> {
    let path = config_path()?;
    let mut parsed = read_layered(&path)?;
    normalize_config(&mut parsed);
    Ok(parsed)
}

/// Stored file values only, so `configure` never persists environment overrides.
pub fn load_file_config() -> Result<AppConfig, AppError> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let settings = ::config::Config::builder()
        .add_source(::config::File::from(path))
        .build()?;
    let mut parsed: AppConfig = settings.try_deserialize()?;
    normalize_config(&mut parsed);
    Ok(parsed)
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    ensure_dirs()?;
    let path = config_path()?;
    let mut normalized = config.clone();
    normalize_config(&mut normalized);
    let raw = toml::to_string_pretty(&normalized)?;
    fs::write(path, raw)?;
    Ok(())
}

fn token_entry() -> Result<keyring::Entry, AppError> {
    Ok(keyring::Entry::new(SERVICE_NAME, TOKEN_ACCOUNT)?)
}

pub fn set_access_token(token: &str) -> Result<(), AppError> {
    token_entry()?.set_password(token)?;
    Ok(())
}

pub fn delete_access_token() -> Result<(), AppError> {
    match token_entry()?.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(AppError::Keyring(e)),
    }
}

pub fn get_access_token() -> Result<String, AppError> {
    if let Ok(entry) = token_entry() {
        if let Ok(value) = entry.get_password() {
            if !value.is_empty() {
                return Ok(value);
            }
        }
    }

    if let Ok(value) = std::env::var(format!("{ENV_PREFIX}_TOKEN")) {
        if !value.is_empty() {
            return Ok(value);
        }
    }

    Err(AppError::Config(
        "No access token found. Run `billing-lens configure --token <TOKEN>` or set BILLING_LENS_TOKEN."
            .into(),
    ))
}

pub fn ensure_initialized() -> Result<(), AppError> {
    ensure_dirs()?;
    let cfg_path = config_path()?;
    if !cfg_path.exists() {
        save_config(&AppConfig::default())?;
    }
    Ok(())
}
