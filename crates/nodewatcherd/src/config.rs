//! Configuration: command line flags layered over a TOML file
//!
//! Default file location: /etc/nodewatcherd/nodewatcherd.toml. A missing
//! file is not an error. Command line values win over file values when
//! they are set (non-empty, non-zero).

use crate::crawler::{CrawlOptions, PROBE_TIMEOUT, RENAMED_CLIENT_INTERFACE};
use crate::error::{NodewatcherError, Result};
use crate::routing::{BABELD_ADDRESS, BIRD_SOCKET, ROUTING_TIMEOUT, RoutingConfig};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/nodewatcherd/nodewatcherd.toml";

/// Monitoring endpoint the report is POSTed to
pub const DEFAULT_ENDPOINT: &str = "https://monitoring.freifunk-franken.de/api/alfred2";

/// Pause between two report cycles
pub const DEFAULT_REPORT_INTERVAL_SECS: u64 = 300;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Command line flags
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "nodewatcherd", version, about = "Gateway node-health probe and reporter")]
pub struct Cli {
    /// Hostname to report
    #[arg(long)]
    pub hostname: Option<String>,

    /// Router description
    #[arg(long)]
    pub description: Option<String>,

    /// Latitude
    #[arg(long, allow_negative_numbers = true)]
    pub lat: Option<f64>,

    /// Longitude
    #[arg(long, allow_negative_numbers = true)]
    pub lng: Option<f64>,

    /// Position comment
    #[arg(long)]
    pub position_comment: Option<String>,

    /// Contact information
    #[arg(long)]
    pub contact: Option<String>,

    /// Name of the hood
    #[arg(long)]
    pub hood: Option<String>,

    /// Name of the distribution
    #[arg(long)]
    pub distname: Option<String>,

    /// Version of the distribution
    #[arg(long)]
    pub distversion: Option<String>,

    /// Config file to load
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Don't send the report
    #[arg(long)]
    pub dry: bool,

    /// Print debug information
    #[arg(short = 'd', long)]
    pub debug: bool,
}

/// Values accepted in the TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub hostname: Option<String>,
    pub description: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub position_comment: Option<String>,
    pub contact: Option<String>,
    pub hood: Option<String>,
    pub distname: Option<String>,
    pub distversion: Option<String>,
    pub client_interface: Option<String>,
    pub rename_client_interface: Option<bool>,
    pub endpoint: Option<String>,
    pub report_interval_secs: Option<u64>,
    pub probe_timeout_ms: Option<u64>,
    pub routing_timeout_secs: Option<u64>,
    pub babeld_address: Option<String>,
    pub bird_socket: Option<PathBuf>,
    pub http_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Load the file, falling back to an empty config if it does not exist
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                NodewatcherError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using command line only");
                Ok(Self::default())
            }
            Err(e) => Err(NodewatcherError::Io(e)),
        }
    }
}

/// Node identity reported to the monitoring server
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeIdentity {
    pub hostname: String,
    pub description: String,
    pub lat: f64,
    pub lng: f64,
    pub position_comment: String,
    pub contact: String,
    pub hood: String,
    pub distname: String,
    pub distversion: String,
}

/// Effective, validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub identity: NodeIdentity,
    pub client_interface: String,
    pub rename_client_interface: bool,
    pub endpoint: String,
    pub report_interval: Duration,
    pub probe_timeout: Duration,
    pub http_timeout: Duration,
    pub routing: RoutingConfig,
    pub dry: bool,
    pub debug: bool,
}

impl Config {
    /// Load the file the flags point at, merge and validate
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let file = FileConfig::load_or_default(&cli.config)?;
        Self::merge(cli, file, system_hostname())
    }

    /// Merge flag and file values; `fallback_hostname` fills an unset hostname
    pub fn merge(cli: Cli, file: FileConfig, fallback_hostname: Option<String>) -> Result<Self> {
        let identity = NodeIdentity {
            hostname: str_or(cli.hostname, file.hostname)
                .or(fallback_hostname.filter(|h| !h.is_empty()))
                .unwrap_or_default(),
            description: str_or(cli.description, file.description).unwrap_or_default(),
            lat: float_or(cli.lat, file.lat),
            lng: float_or(cli.lng, file.lng),
            position_comment: str_or(cli.position_comment, file.position_comment)
                .unwrap_or_default(),
            contact: str_or(cli.contact, file.contact).unwrap_or_default(),
            hood: str_or(cli.hood, file.hood).unwrap_or_default(),
            distname: str_or(cli.distname, file.distname).unwrap_or_default(),
            distversion: str_or(cli.distversion, file.distversion).unwrap_or_default(),
        };

        let config = Self {
            identity,
            client_interface: file
                .client_interface
                .unwrap_or_else(|| RENAMED_CLIENT_INTERFACE.to_string()),
            rename_client_interface: file.rename_client_interface.unwrap_or(false),
            endpoint: file.endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            report_interval: Duration::from_secs(
                file.report_interval_secs
                    .unwrap_or(DEFAULT_REPORT_INTERVAL_SECS),
            ),
            probe_timeout: file
                .probe_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(PROBE_TIMEOUT),
            http_timeout: Duration::from_secs(
                file.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            ),
            routing: RoutingConfig {
                babeld_address: file
                    .babeld_address
                    .unwrap_or_else(|| BABELD_ADDRESS.to_string()),
                bird_socket: file.bird_socket.unwrap_or_else(|| PathBuf::from(BIRD_SOCKET)),
                timeout: file
                    .routing_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(ROUTING_TIMEOUT),
            },
            dry: cli.dry,
            debug: cli.debug,
        };

        config.validate()?;
        Ok(config)
    }

    /// Report every missing required option at once
    pub fn validate(&self) -> Result<()> {
        let id = &self.identity;
        let missing: Vec<&str> = [
            ("hostname", id.hostname.is_empty()),
            ("lat", id.lat == 0.0),
            ("lng", id.lng == 0.0),
            ("contact", id.contact.is_empty()),
            ("hood", id.hood.is_empty()),
        ]
        .into_iter()
        .filter_map(|(name, is_missing)| is_missing.then_some(name))
        .collect();

        if !missing.is_empty() {
            return Err(NodewatcherError::Config(format!(
                "required options missing: {}",
                missing.join(", ")
            )));
        }

        if self.report_interval.is_zero() {
            return Err(NodewatcherError::Config(
                "report_interval_secs must be > 0".to_string(),
            ));
        }

        if !self.endpoint.starts_with("https://") && !self.endpoint.starts_with("http://") {
            return Err(NodewatcherError::Config(format!(
                "endpoint must be an http(s) URL: {}",
                self.endpoint
            )));
        }

        Ok(())
    }

    pub fn crawl_options(&self) -> CrawlOptions {
        CrawlOptions {
            client_interface: self.client_interface.clone(),
            rename_client_interface: self.rename_client_interface,
            probe_timeout: self.probe_timeout,
        }
    }
}

fn str_or(value: Option<String>, fallback: Option<String>) -> Option<String> {
    value
        .filter(|v| !v.is_empty())
        .or(fallback.filter(|v| !v.is_empty()))
}

fn float_or(value: Option<f64>, fallback: Option<f64>) -> f64 {
    value
        .filter(|v| *v != 0.0)
        .or(fallback)
        .unwrap_or_default()
}

#[cfg(target_os = "linux")]
fn system_hostname() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .map(|h| h.to_string_lossy().into_owned())
}

#[cfg(not(target_os = "linux"))]
fn system_hostname() -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_file() -> FileConfig {
        FileConfig {
            hostname: Some("gw01".into()),
            lat: Some(49.45),
            lng: Some(11.08),
            contact: Some("admin@example.org".into()),
            hood: Some("Nuernberg".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_file_values_fill_defaults() {
        let config = Config::merge(Cli::default(), complete_file(), None).unwrap();
        assert_eq!(config.identity.hostname, "gw01");
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.report_interval, Duration::from_secs(300));
        assert_eq!(config.probe_timeout, Duration::from_secs(2));
        assert_eq!(config.client_interface, "br-client");
        assert_eq!(config.routing.babeld_address, "[::1]:33123");
    }

    #[test]
    fn test_cli_overrides_file() {
        let cli = Cli {
            hostname: Some("gw02".into()),
            lat: Some(50.0),
            hood: Some(String::new()),
            ..Default::default()
        };
        let config = Config::merge(cli, complete_file(), None).unwrap();
        assert_eq!(config.identity.hostname, "gw02");
        assert_eq!(config.identity.lat, 50.0);
        // Empty flag does not clobber the file value
        assert_eq!(config.identity.hood, "Nuernberg");
    }

    #[test]
    fn test_hostname_falls_back_to_system() {
        let mut file = complete_file();
        file.hostname = None;
        let config = Config::merge(Cli::default(), file, Some("kernel-host".into())).unwrap();
        assert_eq!(config.identity.hostname, "kernel-host");
    }

    #[test]
    fn test_missing_required_options_reported_together() {
        let err = Config::merge(Cli::default(), FileConfig::default(), None).unwrap_err();
        let msg = err.to_string();
        for name in ["hostname", "lat", "lng", "contact", "hood"] {
            assert!(msg.contains(name), "{msg} should mention {name}");
        }
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
hostname = "gw03"
lat = 49.1
lng = 10.9
contact = "noc@example.org"
hood = "Fuerth"
client_interface = "br-mesh"
rename_client_interface = true
report_interval_secs = 60
"#;
        let file: FileConfig = toml::from_str(toml_str).unwrap();
        let config = Config::merge(Cli::default(), file, None).unwrap();
        assert_eq!(config.client_interface, "br-mesh");
        assert!(config.rename_client_interface);
        assert_eq!(config.report_interval, Duration::from_secs(60));
        assert!(config.crawl_options().rename_client_interface);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(toml::from_str::<FileConfig>("colour = \"blue\"").is_err());
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let file = FileConfig::load_or_default("/nonexistent/nodewatcherd.toml").unwrap();
        assert!(file.hostname.is_none());
    }

    #[test]
    fn test_load_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "hostname = [").unwrap();
        assert!(matches!(
            FileConfig::load_or_default(&path),
            Err(NodewatcherError::Config(_))
        ));
    }

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from([
            "nodewatcherd",
            "--hostname",
            "gw04",
            "--lat",
            "49.5",
            "-d",
            "--dry",
        ])
        .unwrap();
        assert_eq!(cli.hostname.as_deref(), Some("gw04"));
        assert_eq!(cli.lat, Some(49.5));
        assert!(cli.debug && cli.dry);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }
}
