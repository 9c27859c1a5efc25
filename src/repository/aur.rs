// src/repository/aur.rs

//! AUR RPC client
//!
//! Looks packages up through the RPC v5 `info` endpoint and maps the
//! response onto [`PackageInfo`], the registry record the build pipeline and
//! the security review consume.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Default AUR location
pub const DEFAULT_AUR_URL: &str = "https://aur.archlinux.org";

/// Default timeout for RPC requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum attempts for a request that fails before a response arrives
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds, multiplied by the attempt number
const RETRY_DELAY_MS: u64 = 500;

/// Looks up community packages by name
pub trait Registry: Send + Sync {
    /// Fetch the record for `name`; `Ok(None)` when the package does not exist
    fn package(&self, name: &str) -> Result<Option<PackageInfo>>;
}

/// Registry record for one package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub package_base: String,
    pub version: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub git_clone_url: String,
    /// `None` for orphaned packages
    pub maintainer: Option<String>,
    pub votes: u64,
    pub popularity: f64,
    /// Unix timestamp of the last update
    pub last_modified: i64,
    /// Unix timestamp at which the package was flagged out of date
    pub out_of_date: Option<i64>,
}

impl PackageInfo {
    pub fn is_orphan(&self) -> bool {
        self.maintainer.is_none()
    }

    pub fn is_out_of_date(&self) -> bool {
        self.out_of_date.is_some()
    }

    pub fn last_modified_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.last_modified, 0)
    }

    pub fn out_of_date_at(&self) -> Option<DateTime<Utc>> {
        self.out_of_date.and_then(|ts| DateTime::from_timestamp(ts, 0))
    }
}

/// Registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_AUR_URL.to_string(),
            timeout_secs: HTTP_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    results: Vec<RpcPackage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RpcPackage {
    name: String,
    package_base: String,
    version: String,
    description: Option<String>,
    #[serde(rename = "URL")]
    url: Option<String>,
    maintainer: Option<String>,
    num_votes: u64,
    popularity: f64,
    last_modified: i64,
    out_of_date: Option<i64>,
}

/// [`Registry`] backed by the AUR web RPC
pub struct AurRegistry {
    client: Client,
    base_url: Url,
    max_retries: u32,
}

impl AurRegistry {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url)
            .map_err(|e| Error::ConfigError(format!("Invalid registry URL '{}': {e}", config.url)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("pacforge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::RegistryError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            max_retries: MAX_RETRIES,
        })
    }

    /// URL of the RPC info request for `name`
    pub fn info_url(&self, name: &str) -> Result<Url> {
        let mut url = self
            .base_url
            .join("rpc/")
            .map_err(|e| Error::ConfigError(format!("Invalid registry URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("v", "5")
            .append_pair("type", "info")
            .append_pair("arg[]", name);
        Ok(url)
    }

    /// Clone URL of a package base
    pub fn clone_url(&self, package_base: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/{package_base}.git")
    }

    /// Interpret an RPC response body
    pub fn parse_response(&self, name: &str, body: &str) -> Result<Option<PackageInfo>> {
        let response: RpcResponse = serde_json::from_str(body)
            .map_err(|e| Error::RegistryError(format!("Malformed RPC response: {e}")))?;

        if response.kind == "error" {
            return Err(Error::RegistryError(
                response.error.unwrap_or_else(|| "unknown RPC error".to_string()),
            ));
        }

        let Some(pkg) = response.results.into_iter().find(|p| p.name == name) else {
            debug!("Registry has no package named {}", name);
            return Ok(None);
        };

        Ok(Some(PackageInfo {
            git_clone_url: self.clone_url(&pkg.package_base),
            name: pkg.name,
            package_base: pkg.package_base,
            version: pkg.version,
            description: pkg.description,
            url: pkg.url,
            maintainer: pkg.maintainer,
            votes: pkg.num_votes,
            popularity: pkg.popularity,
            last_modified: pkg.last_modified,
            out_of_date: pkg.out_of_date,
        }))
    }
}

impl Registry for AurRegistry {
    fn package(&self, name: &str) -> Result<Option<PackageInfo>> {
        let url = self.info_url(name)?;
        info!("Querying registry for {}", name);

        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            match self.client.get(url.clone()).send() {
                Ok(response) => break response,
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::RegistryError(format!(
                            "Failed to query {} after {attempt} attempts: {e}",
                            self.base_url
                        )));
                    }
                    warn!("Registry query attempt {} failed: {}, retrying...", attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        };

        if !response.status().is_success() {
            return Err(Error::RegistryError(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let body = response
            .text()
            .map_err(|e| Error::RegistryError(format!("Failed to read response: {e}")))?;
        self.parse_response(name, &body)
    }
}
