//! Configuration management
//!
//! The stored config lives at `~/.casdoor-cli/config.json` (or under
//! `$CASDOOR_CLI_HOME`) with every value base64-encoded.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::Error;
use crate::Result;

/// Environment variable that relocates the config directory
pub const HOME_ENV: &str = "CASDOOR_CLI_HOME";

const KEY_ENDPOINT: &str = "casdoor_endpoint";
const KEY_CLIENT_ID: &str = "client_id";
const KEY_CLIENT_SECRET: &str = "client_secret";
const KEY_CERTIFICATE: &str = "certificate";
const KEY_ORGANIZATION: &str = "organization_name";
const KEY_APPLICATION: &str = "application_name";
const KEY_REDIRECT_URI: &str = "redirect_uri";

const REQUIRED_KEYS: &[&str] = &[
    KEY_ENDPOINT,
    KEY_CLIENT_ID,
    KEY_CLIENT_SECRET,
    KEY_ORGANIZATION,
    KEY_APPLICATION,
    KEY_REDIRECT_URI,
];

/// Connection settings for one Casdoor application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CasdoorConfig {
    /// Casdoor server, also the OIDC issuer base
    pub endpoint: Url,

    pub client_id: String,

    pub client_secret: String,

    /// Application certificate (PEM), kept for reference
    #[serde(default)]
    pub certificate: String,

    pub organization_name: String,

    pub application_name: String,

    /// Must match the callback URL registered on the Casdoor application
    pub redirect_uri: Url,
}

impl CasdoorConfig {
    /// Build a config from a flat key/value map (plain, not encoded)
    pub fn from_values(values: &BTreeMap<String, String>) -> Result<Self> {
        for key in REQUIRED_KEYS {
            let present = values.get(*key).map(|v| !v.trim().is_empty()).unwrap_or(false);
            if !present {
                return Err(Error::Config(format!("missing config value: {}", key)));
            }
        }

        let get = |key: &str| values.get(key).map(|v| v.trim().to_string()).unwrap_or_default();

        let endpoint = Url::parse(&get(KEY_ENDPOINT))
            .map_err(|e| Error::Config(format!("invalid {}: {}", KEY_ENDPOINT, e)))?;
        let redirect_uri = Url::parse(&get(KEY_REDIRECT_URI))
            .map_err(|e| Error::Config(format!("invalid {}: {}", KEY_REDIRECT_URI, e)))?;

        if redirect_uri.port_or_known_default().is_none() {
            return Err(Error::Config(format!(
                "{} must include a port for the local callback server",
                KEY_REDIRECT_URI
            )));
        }

        Ok(Self {
            endpoint,
            client_id: get(KEY_CLIENT_ID),
            client_secret: get(KEY_CLIENT_SECRET),
            certificate: get(KEY_CERTIFICATE),
            organization_name: get(KEY_ORGANIZATION),
            application_name: get(KEY_APPLICATION),
            redirect_uri,
        })
    }

    /// Flatten back into the key/value layout used on disk
    pub fn to_values(&self) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        values.insert(KEY_ENDPOINT.to_string(), trim_endpoint(&self.endpoint));
        values.insert(KEY_CLIENT_ID.to_string(), self.client_id.clone());
        values.insert(KEY_CLIENT_SECRET.to_string(), self.client_secret.clone());
        values.insert(KEY_CERTIFICATE.to_string(), self.certificate.clone());
        values.insert(KEY_ORGANIZATION.to_string(), self.organization_name.clone());
        values.insert(KEY_APPLICATION.to_string(), self.application_name.clone());
        values.insert(KEY_REDIRECT_URI.to_string(), self.redirect_uri.to_string());
        values
    }

    /// Endpoint without a trailing slash, for building request URLs
    pub fn endpoint_base(&self) -> String {
        trim_endpoint(&self.endpoint)
    }
}

fn trim_endpoint(url: &Url) -> String {
    url.as_str().trim_end_matches('/').to_string()
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    if let Some(home) = std::env::var_os(HOME_ENV) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".casdoor-cli")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load configuration from the default location
pub fn load() -> Result<CasdoorConfig> {
    load_from(&config_path())
}

/// Load an encoded configuration file
pub fn load_from(path: &Path) -> Result<CasdoorConfig> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Config not found at {:?}. Run 'casdoor init' first.",
            path
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let encoded: BTreeMap<String, String> = serde_json::from_str(&content)?;

    let mut decoded = BTreeMap::new();
    for (key, value) in encoded {
        let bytes = STANDARD
            .decode(value.as_bytes())
            .map_err(|e| Error::Config(format!("error decoding base64 for {}: {}", key, e)))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| Error::Config(format!("error decoding {}: {}", key, e)))?;
        decoded.insert(key, text);
    }

    tracing::debug!("config file loaded from {:?}", path);
    CasdoorConfig::from_values(&decoded)
}

/// Save configuration, base64-encoding every value
pub fn save_to(config: &CasdoorConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let encoded: BTreeMap<String, String> = config
        .to_values()
        .into_iter()
        .map(|(k, v)| (k, STANDARD.encode(v.as_bytes())))
        .collect();

    let content = serde_json::to_string_pretty(&encoded)?;
    std::fs::write(path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }

    Ok(())
}

/// Read a plain (un-encoded) JSON config supplied by the user
pub fn read_plain(path: &Path) -> Result<CasdoorConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("error reading {:?}: {}", path, e)))?;
    let values: BTreeMap<String, String> = serde_json::from_str(&content)?;
    CasdoorConfig::from_values(&values)
}

/// Import a plain config file into the stored location
pub fn import(source: &Path, destination: &Path) -> Result<CasdoorConfig> {
    let config = read_plain(source)?;
    save_to(&config, destination)?;
    Ok(config)
}

/// Interactive `init`: ask for the plain config path and import it
pub fn init(source: Option<PathBuf>) -> Result<CasdoorConfig> {
    use crate::ui;
    use inquire::Text;

    let source = match source {
        Some(path) => path,
        None => {
            ui::print_warning("Please provide the path to your config.json file below");
            let answer = Text::new("config.json path:")
                .with_default("./config.json")
                .prompt()?;
            PathBuf::from(answer)
        }
    };

    let destination = config_path();
    let config = import(&source, &destination)?;
    ui::print_success(&format!("Configuration stored at {:?}", destination));
    ui::print_step(&format!(
        "Make sure {} is registered as a redirect URL of application {}",
        config.redirect_uri, config.application_name
    ));
    Ok(config)
}
