//! Configuration file for mailsweep
//!
//! Settings live in `<config_dir>/mailsweep/config.toml`. Secrets are never
//! stored here; they come from CLI flags or the `MAILSWEEP_*` environment
//! variables.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{SweepError, SweepResult};
use crate::recurrence::ReportLocale;

const CONFIG_VERSION: u32 = 1;
const CONFIG_FILE: &str = "config.toml";

pub const ENV_GRAPH_TOKEN: &str = "MAILSWEEP_GRAPH_TOKEN";
pub const ENV_EWS_PASSWORD: &str = "MAILSWEEP_EWS_PASSWORD";
pub const ENV_EWS_TOKEN: &str = "MAILSWEEP_EWS_TOKEN";

/// Complete configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Version of the config file format
    pub version: u32,
    pub graph: GraphSettings,
    pub ews: EwsSettings,
    pub run: RunSettings,
    pub retry: RetrySettings,
    pub report: ReportSettings,
    pub logging: LoggingSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            graph: GraphSettings::default(),
            ews: EwsSettings::default(),
            run: RunSettings::default(),
            retry: RetrySettings::default(),
            report: ReportSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Microsoft Graph national cloud
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphCloud {
    #[default]
    Global,
    China,
}

impl GraphCloud {
    pub fn endpoint(&self) -> &'static str {
        match self {
            GraphCloud::Global => "https://graph.microsoft.com",
            GraphCloud::China => "https://microsoftgraph.chinacloudapi.cn",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    pub cloud: GraphCloud,
    /// Overrides the cloud endpoint (proxies, test servers)
    pub endpoint: Option<String>,
    /// Informational only; token acquisition happens outside mailsweep
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
}

impl GraphSettings {
    /// Base URL without a trailing slash
    pub fn base_url(&self) -> String {
        self.endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| self.cloud.endpoint())
            .trim()
            .trim_end_matches('/')
            .to_string()
    }
}

/// How the service account reaches other mailboxes over EWS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    #[default]
    Impersonation,
    Delegate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EwsSettings {
    /// Server host or URL; scheme and path are stripped
    pub server: Option<String>,
    pub autodiscover: bool,
    pub access_type: AccessType,
    pub username: Option<String>,
    /// `RequestServerVersion` sent with every SOAP request
    pub server_version: String,
    pub accept_invalid_certs: bool,
}

impl Default for EwsSettings {
    fn default() -> Self {
        Self {
            server: None,
            autodiscover: true,
            access_type: AccessType::Impersonation,
            username: None,
            server_version: "Exchange2013_SP1".to_string(),
            accept_invalid_certs: false,
        }
    }
}

impl EwsSettings {
    /// Fixed service URL derived from `server`, if one is configured
    pub fn service_url(&self) -> Option<String> {
        let host = clean_server_address(self.server.as_deref()?);
        if host.is_empty() {
            None
        } else {
            Some(format!("https://{}/EWS/Exchange.asmx", host))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Mailboxes processed in parallel
    pub concurrency: usize,
    pub graph_batch_size: usize,
    pub ews_batch_size: usize,
    pub page_size: usize,
    /// Where reports are written; the working directory when unset
    pub reports_dir: Option<PathBuf>,
    pub http_timeout_secs: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            concurrency: 10,
            graph_batch_size: 20,
            ews_batch_size: 200,
            page_size: 100,
            reports_dir: None,
            http_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay_ms: 600,
            max_delay_ms: 12_000,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub locale: ReportLocale,
}

/// Log verbosity tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Normal,
    Advanced,
    Expert,
}

impl LogLevel {
    /// `EnvFilter` directive for this tier
    pub fn filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Normal => "mailsweep=info",
            LogLevel::Advanced => "mailsweep=debug",
            LogLevel::Expert => "mailsweep=trace",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: LogLevel,
}

impl AppConfig {
    /// Sanity checks that do not depend on the chosen backend
    pub fn validate(&self) -> SweepResult<()> {
        if self.run.concurrency == 0 {
            return Err(SweepError::config("run.concurrency must be at least 1"));
        }
        if !(1..=20).contains(&self.run.graph_batch_size) {
            return Err(SweepError::config("run.graph_batch_size must be between 1 and 20"));
        }
        if self.run.ews_batch_size == 0 {
            return Err(SweepError::config("run.ews_batch_size must be at least 1"));
        }
        if !(1..=1000).contains(&self.run.page_size) {
            return Err(SweepError::config("run.page_size must be between 1 and 1000"));
        }
        if self.retry.max_attempts == 0 {
            return Err(SweepError::config("retry.max_attempts must be at least 1"));
        }
        Ok(())
    }
}

/// Strip scheme and path from a server address: `https://mail.x.com/EWS/Exchange.asmx` -> `mail.x.com`
pub fn clean_server_address(input: &str) -> String {
    static SERVER_REGEX: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)^\s*(?:[a-z][a-z0-9+.-]*://)?([^/\s]*)").expect("server address pattern")
    });

    SERVER_REGEX
        .captures(input)
        .and_then(|caps| caps.get(1))
        .map(|host| host.as_str().to_string())
        .unwrap_or_default()
}

/// Loads and saves the configuration file
pub struct ConfigManager {
    config_path: PathBuf,
    config: AppConfig,
}

impl ConfigManager {
    /// Default configuration directory (`<config_dir>/mailsweep`)
    pub fn default_dir() -> SweepResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("mailsweep"))
            .ok_or_else(|| SweepError::config("cannot determine the user configuration directory"))
    }

    /// Open the config in `config_dir`, falling back to defaults when no file exists
    pub fn new<P: AsRef<Path>>(config_dir: P) -> SweepResult<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE);

        let config = if config_path.exists() {
            Self::load_config(&config_path)?
        } else {
            debug!("No config file at {}, using defaults", config_path.display());
            AppConfig::default()
        };

        Ok(Self { config_path, config })
    }

    /// Open a config file at an explicit path
    pub fn from_file<P: AsRef<Path>>(path: P) -> SweepResult<Self> {
        let config_path = path.as_ref().to_path_buf();
        let config = Self::load_config(&config_path)?;
        Ok(Self { config_path, config })
    }

    fn load_config(path: &Path) -> SweepResult<AppConfig> {
        let content = fs::read_to_string(path)
            .map_err(|e| SweepError::config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| SweepError::config(format!("failed to parse {}: {}", path.display(), e)))?;

        if config.version > CONFIG_VERSION {
            warn!(
                "Config version {} is newer than supported version {}",
                config.version, CONFIG_VERSION
            );
        }

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Write the current configuration, creating the directory if needed
    pub fn save(&self) -> SweepResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = self.to_toml()?;
        fs::write(&self.config_path, content)?;
        info!("Saved configuration to {}", self.config_path.display());
        Ok(())
    }

    pub fn to_toml(&self) -> SweepResult<String> {
        toml::to_string_pretty(&self.config)
            .map_err(|e| SweepError::config(format!("failed to serialize config: {}", e)))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.run.concurrency, 10);
        assert_eq!(config.run.graph_batch_size, 20);
        assert_eq!(config.run.ews_batch_size, 200);
        assert_eq!(config.retry.max_attempts, 6);
        assert_eq!(config.graph.base_url(), "https://graph.microsoft.com");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let mut manager = ConfigManager::new(dir.path()).unwrap();
        manager.config_mut().graph.cloud = GraphCloud::China;
        manager.config_mut().ews.access_type = AccessType::Delegate;
        manager.config_mut().report.locale = ReportLocale::Chinese;
        manager.save().unwrap();

        let reloaded = ConfigManager::new(dir.path()).unwrap();
        assert_eq!(reloaded.config().graph.cloud, GraphCloud::China);
        assert_eq!(
            reloaded.config().graph.base_url(),
            "https://microsoftgraph.chinacloudapi.cn"
        );
        assert_eq!(reloaded.config().ews.access_type, AccessType::Delegate);
        assert_eq!(reloaded.config().report.locale, ReportLocale::Chinese);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "[run]\nconcurrency = 4\n\n[logging]\nlevel = \"expert\"\n",
        )
        .unwrap();

        let manager = ConfigManager::new(dir.path()).unwrap();
        assert_eq!(manager.config().run.concurrency, 4);
        assert_eq!(manager.config().run.page_size, 100);
        assert_eq!(manager.config().logging.level, LogLevel::Expert);
        assert_eq!(manager.config().logging.level.filter_directive(), "mailsweep=trace");
    }

    #[test]
    fn test_clean_server_address() {
        assert_eq!(clean_server_address("https://mail.x.com/EWS/Exchange.asmx"), "mail.x.com");
        assert_eq!(clean_server_address("http://mail.x.com"), "mail.x.com");
        assert_eq!(clean_server_address(" mail.x.com/ "), "mail.x.com");
        assert_eq!(clean_server_address("HTTPS://Mail.X.com/owa"), "Mail.X.com");

        let ews = EwsSettings {
            server: Some("https://mail.x.com/owa".into()),
            ..Default::default()
        };
        assert_eq!(ews.service_url().unwrap(), "https://mail.x.com/EWS/Exchange.asmx");
    }

    #[test]
    fn test_invalid_batch_size() {
        let mut config = AppConfig::default();
        config.run.graph_batch_size = 50;
        assert!(config.validate().unwrap_err().is_config_error());
    }
}
