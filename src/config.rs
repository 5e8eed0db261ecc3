// Configuration store: one JSON file holding the QRadar connection and the
// incident platform credentials. Reads fall back to defaults when the file
// is missing; writes replace the whole file (last writer wins).

use crate::error::{ConnectorError, ConnectorResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV: &str = "QRADAR_CONNECTOR_CONFIG";

const CONFIG_FILE_NAME: &str = ".qradar_connector.json";

/// Connection settings for the QRadar REST API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Console address, with or without scheme.
    pub address: String,
    /// Authorized service token sent in the `SEC` header.
    pub token: String,
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,
    /// Value of the `Version` header. Accepts `"6.0"` or `6.0` in JSON.
    #[serde(
        default = "default_api_version",
        deserialize_with = "string_or_number"
    )]
    pub api_version: String,
}

impl ConnectorConfig {
    pub fn new(address: impl Into<String>, token: impl Into<String>) -> Self {
        ConnectorConfig {
            address: address.into(),
            token: token.into(),
            verify_ssl: default_verify_ssl(),
            api_version: default_api_version(),
        }
    }
}

fn default_verify_ssl() -> bool {
    true
}

fn default_api_version() -> String {
    "6.0".to_string()
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number for api_version, got {}",
            other
        ))),
    }
}

/// Credentials for the incident-response platform offenses are forwarded to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub cyops_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub verify_ssl: bool,
}

impl PlatformConfig {
    /// Merge submitted form fields. Blank values keep the stored setting.
    pub fn apply_form<I, K, V>(&mut self, fields: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in fields {
            let key = key.as_ref();
            let value = value.as_ref();
            if value.trim().is_empty() {
                continue;
            }
            match key {
                "cyops_url" => self.cyops_url = value.to_string(),
                "username" => self.username = value.to_string(),
                "password" => self.password = value.to_string(),
                "verify_ssl" => match value.trim().parse() {
                    Ok(flag) => self.verify_ssl = flag,
                    Err(_) => warn!("ignoring non-boolean verify_ssl `{}`", value),
                },
                other => warn!("ignoring unknown platform setting `{}`", other),
            }
        }
    }

    /// True when url, username and password are all set.
    pub fn is_complete(&self) -> bool {
        !self.cyops_url.is_empty() && !self.username.is_empty() && !self.password.is_empty()
    }
}

/// Everything persisted by the connector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub qradar: Option<ConnectorConfig>,
    #[serde(default)]
    pub platform: PlatformConfig,
}

impl AppConfig {
    /// Location used when no explicit path is given: `$QRADAR_CONNECTOR_CONFIG`
    /// or a dotfile in the home directory.
    pub fn default_path() -> PathBuf {
        if let Ok(p) = std::env::var(CONFIG_ENV) {
            if !p.trim().is_empty() {
                return PathBuf::from(p);
            }
        }
        let dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        dir.join(CONFIG_FILE_NAME)
    }

    /// Read the configuration. A missing file yields the defaults.
    pub fn load(path: &Path) -> ConnectorResult<Self> {
        debug!("reading configuration: {}", path.display());
        if !path.is_file() {
            debug!("could not find config file, using default values");
            return Ok(AppConfig::default());
        }
        let data = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
        serde_json::from_str(&data).map_err(|e| {
            ConnectorError::Config(format!("malformed config file {}: {}", path.display(), e))
        })
    }

    /// Write the whole configuration, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> ConnectorResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
            }
        }
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| ConnectorError::Config(format!("cannot serialize config: {}", e)))?;
        fs::write(path, data).map_err(|e| io_error(path, e))?;
        debug!("saved new configuration to {}", path.display());
        Ok(())
    }

    /// The QRadar section, or an error explaining it has not been set up.
    pub fn qradar(&self) -> ConnectorResult<&ConnectorConfig> {
        self.qradar.as_ref().ok_or_else(|| {
            ConnectorError::Config(
                "QRadar connection is not configured; set address and token first".into(),
            )
        })
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ConnectorError {
    ConnectorError::Io {
        path: path.display().to_string(),
        source,
    }
}
