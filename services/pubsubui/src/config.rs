use anyhow::{Context, Result, bail};
use clap::Parser;
use pubsubui_broker::BrokerConnector;
use pubsubui_broker::memory::MemoryBroker;
use pubsubui_broker::rest::RestConnector;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::provision::ProvisionTimeouts;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_METRICS_BIND: &str = "0.0.0.0:9090";
const DEFAULT_BROKER_URL: &str = "https://pubsub.googleapis.com";
const DEFAULT_TOPIC_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_SUBSCRIPTION_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

// Command-line flags. Every flag has an environment variable that takes
// precedence over it.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "pubsubui")]
#[command(about = "Administrative front-end for a managed publish/subscribe broker")]
pub struct CliArgs {
    /// The host to which to bind the service
    #[arg(long)]
    pub host: Option<String>,

    /// The port to which to bind the service
    #[arg(long)]
    pub port: Option<String>,

    /// The path to the topics config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Comma-separated projects to target (in addition to the config file)
    #[arg(long)]
    pub projects: Option<String>,

    /// Prometheus metrics listener (host:port)
    #[arg(long)]
    pub metrics_bind: Option<String>,

    /// Broker backend: rest or memory
    #[arg(long)]
    pub broker: Option<String>,

    /// Base URL of the Pub/Sub REST API
    #[arg(long)]
    pub broker_url: Option<String>,

    /// Directory of static frontend files to serve
    #[arg(long)]
    pub static_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerBackend {
    Rest,
    Memory,
}

impl BrokerBackend {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rest" => Ok(Self::Rest),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown broker backend {other:?} (expected rest or memory)"),
        }
    }
}

// Service configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct PubsubuiConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    // Projects from GOOGLE_CLOUD_PROJECTS / --projects, blanks dropped.
    pub projects: Vec<String>,
    // Topics document; `None` disables declarative provisioning.
    pub catalog_path: Option<PathBuf>,
    pub broker: BrokerBackend,
    pub broker_url: String,
    pub emulator_host: Option<String>,
    pub access_token: Option<String>,
    pub static_dir: Option<PathBuf>,
    pub topic_timeout: Duration,
    pub subscription_timeout: Duration,
    pub shutdown_grace: Duration,
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn env_millis(key: &str, default: u64) -> Result<Duration> {
    let Some(value) = env_value(key) else {
        return Ok(Duration::from_millis(default));
    };
    let millis: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("parse {key}: {value:?}"))?;
    if millis == 0 {
        bail!("{key} must be greater than zero");
    }
    Ok(Duration::from_millis(millis))
}

fn socket_addr(host: &str, port: u16) -> Result<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("resolve host {host:?}"))?
        .next()
        .with_context(|| format!("no address for host {host:?}"))
}

pub fn split_projects(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|project| !project.is_empty())
        .map(str::to_string)
        .collect()
}

impl PubsubuiConfig {
    /// Resolves each setting from the environment, then `args`, then the
    /// built-in default.
    pub fn resolve(args: &CliArgs) -> Result<Self> {
        let host = env_value("PUBSUBUI_HOST")
            .or_else(|| args.host.clone())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = match env_value("PUBSUBUI_PORT").or_else(|| args.port.clone()) {
            Some(value) => value
                .trim()
                .parse::<u16>()
                .with_context(|| format!("parse PUBSUBUI_PORT: {value:?}"))?,
            None => DEFAULT_PORT,
        };
        let bind_addr = socket_addr(&host, port)?;
        let metrics_bind = env_value("PUBSUBUI_METRICS_BIND")
            .or_else(|| args.metrics_bind.clone())
            .unwrap_or_else(|| DEFAULT_METRICS_BIND.to_string())
            .parse()
            .with_context(|| "parse PUBSUBUI_METRICS_BIND")?;
        let projects = env_value("GOOGLE_CLOUD_PROJECTS")
            .or_else(|| args.projects.clone())
            .map(|value| split_projects(&value))
            .unwrap_or_default();
        let catalog_path = env_value("PUBSUBUI_CONFIG")
            .map(PathBuf::from)
            .or_else(|| args.config.clone())
            .filter(|path| !path.as_os_str().is_empty());
        let broker = match env_value("PUBSUBUI_BROKER").or_else(|| args.broker.clone()) {
            Some(value) => BrokerBackend::parse(&value).with_context(|| "parse PUBSUBUI_BROKER")?,
            None => BrokerBackend::Rest,
        };
        let broker_url = env_value("PUBSUBUI_BROKER_URL")
            .or_else(|| args.broker_url.clone())
            .unwrap_or_else(|| DEFAULT_BROKER_URL.to_string());
        let emulator_host = env_value("PUBSUB_EMULATOR_HOST").filter(|host| !host.is_empty());
        let access_token = env_value("PUBSUBUI_ACCESS_TOKEN").filter(|token| !token.is_empty());
        let static_dir = env_value("PUBSUBUI_STATIC_DIR")
            .map(PathBuf::from)
            .or_else(|| args.static_dir.clone())
            .filter(|path| !path.as_os_str().is_empty());
        let topic_timeout = env_millis("PUBSUBUI_TOPIC_TIMEOUT_MS", DEFAULT_TOPIC_TIMEOUT_MS)?;
        let subscription_timeout = env_millis(
            "PUBSUBUI_SUBSCRIPTION_TIMEOUT_MS",
            DEFAULT_SUBSCRIPTION_TIMEOUT_MS,
        )?;
        let shutdown_grace = env_millis("PUBSUBUI_SHUTDOWN_GRACE_MS", DEFAULT_SHUTDOWN_GRACE_MS)?;
        Ok(Self {
            bind_addr,
            metrics_bind,
            projects,
            catalog_path,
            broker,
            broker_url,
            emulator_host,
            access_token,
            static_dir,
            topic_timeout,
            subscription_timeout,
            shutdown_grace,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::resolve(&CliArgs::default())
    }

    pub fn provision_timeouts(&self) -> ProvisionTimeouts {
        ProvisionTimeouts {
            topic: self.topic_timeout,
            subscription: self.subscription_timeout,
        }
    }

    /// Builds the connector for the configured backend. The emulator host
    /// wins over the REST base URL when both are set.
    pub fn connector(&self) -> Result<Arc<dyn BrokerConnector>> {
        match self.broker {
            BrokerBackend::Memory => Ok(Arc::new(MemoryBroker::new())),
            BrokerBackend::Rest => {
                let connector = match &self.emulator_host {
                    Some(host) => RestConnector::emulator(host),
                    None => RestConnector::new(self.broker_url.clone(), self.access_token.clone()),
                }
                .with_context(|| "build rest connector")?;
                Ok(Arc::new(connector))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::EnvGuard;
    use serial_test::serial;

    const KEYS: [&str; 13] = [
        "PUBSUBUI_HOST",
        "PUBSUBUI_PORT",
        "PUBSUBUI_CONFIG",
        "GOOGLE_CLOUD_PROJECTS",
        "PUBSUBUI_METRICS_BIND",
        "PUBSUBUI_BROKER",
        "PUBSUBUI_BROKER_URL",
        "PUBSUB_EMULATOR_HOST",
        "PUBSUBUI_STATIC_DIR",
        "PUBSUBUI_ACCESS_TOKEN",
        "PUBSUBUI_TOPIC_TIMEOUT_MS",
        "PUBSUBUI_SUBSCRIPTION_TIMEOUT_MS",
        "PUBSUBUI_SHUTDOWN_GRACE_MS",
    ];

    fn clean_env() -> Vec<EnvGuard> {
        KEYS.into_iter().map(EnvGuard::unset).collect()
    }

    #[test]
    fn split_projects_drops_blanks() {
        assert_eq!(split_projects("p1, ,p2,,"), vec!["p1", "p2"]);
        assert!(split_projects("").is_empty());
    }

    #[test]
    #[serial]
    fn defaults_apply_without_env_or_flags() {
        let _env = clean_env();
        let config = PubsubuiConfig::from_env().expect("config");
        assert_eq!(config.bind_addr, "0.0.0.0:8080".parse().expect("addr"));
        assert_eq!(config.metrics_bind, "0.0.0.0:9090".parse().expect("addr"));
        assert!(config.projects.is_empty());
        assert!(config.catalog_path.is_none());
        assert_eq!(config.broker, BrokerBackend::Rest);
        assert_eq!(config.broker_url, DEFAULT_BROKER_URL);
        assert_eq!(config.provision_timeouts(), ProvisionTimeouts::default());
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn env_overrides_flags() {
        let _env = clean_env();
        let _host = EnvGuard::set("PUBSUBUI_HOST", "127.0.0.1");
        let _projects = EnvGuard::set("GOOGLE_CLOUD_PROJECTS", "env-a,env-b");
        let args = CliArgs {
            host: Some("10.0.0.1".to_string()),
            port: Some("9000".to_string()),
            projects: Some("flag-a".to_string()),
            broker: Some("memory".to_string()),
            ..Default::default()
        };
        let config = PubsubuiConfig::resolve(&args).expect("config");
        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().expect("addr"));
        assert_eq!(config.projects, vec!["env-a", "env-b"]);
        assert_eq!(config.broker, BrokerBackend::Memory);
    }

    #[test]
    #[serial]
    fn invalid_values_are_fatal() {
        let _env = clean_env();
        {
            let _port = EnvGuard::set("PUBSUBUI_PORT", "eighty");
            let err = PubsubuiConfig::from_env().expect_err("bad port");
            assert!(err.to_string().contains("PUBSUBUI_PORT"));
        }
        {
            let _timeout = EnvGuard::set("PUBSUBUI_TOPIC_TIMEOUT_MS", "soon");
            assert!(PubsubuiConfig::from_env().is_err());
        }
        {
            let _broker = EnvGuard::set("PUBSUBUI_BROKER", "kafka");
            assert!(PubsubuiConfig::from_env().is_err());
        }
        {
            let _metrics = EnvGuard::set("PUBSUBUI_METRICS_BIND", "nowhere");
            assert!(PubsubuiConfig::from_env().is_err());
        }
    }

    #[test]
    #[serial]
    fn empty_config_path_means_no_catalog() {
        let _env = clean_env();
        let _config = EnvGuard::set("PUBSUBUI_CONFIG", "");
        let config = PubsubuiConfig::from_env().expect("config");
        assert!(config.catalog_path.is_none());
    }

    #[tokio::test]
    #[serial]
    async fn emulator_host_selects_plain_http_connector() {
        let _env = clean_env();
        let _emulator = EnvGuard::set("PUBSUB_EMULATOR_HOST", "localhost:8681");
        let config = PubsubuiConfig::from_env().expect("config");
        let connector = config.connector().expect("connector");
        assert_eq!(connector.backend_name(), "rest");
        assert_eq!(
            RestConnector::emulator("localhost:8681")
                .expect("connector")
                .base_url(),
            "http://localhost:8681"
        );
    }
}
