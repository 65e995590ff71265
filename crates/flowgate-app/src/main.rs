//! Flowgate - intercepting HTTP/HTTPS proxy.
//!
//! Resolves the listen endpoint, then runs the MITM proxy until Ctrl-C.

mod config;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use flowgate_proxy::{free_port, AddressResolver, CaManager, ProxyConfig, ProxyServer};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{ListenHost, Overrides, Settings};

/// Flowgate - intercepting HTTP/HTTPS proxy
#[derive(Parser, Debug)]
#[command(name = "flowgate", version, about)]
struct Args {
    /// Settings file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on, or "auto" for the default route's address
    #[arg(long)]
    listen_host: Option<String>,

    /// Port to listen on (0 picks a free port)
    #[arg(long)]
    port: Option<u16>,

    /// Value of the xrequestid cookie (default: random UUID)
    #[arg(long)]
    session_id: Option<String>,

    /// Host to answer locally instead of forwarding (repeatable)
    #[arg(long = "skip-host", value_name = "HOST")]
    skip_hosts: Vec<String>,

    /// Host that is never skipped (repeatable)
    #[arg(long = "allow-host", value_name = "HOST")]
    allow_hosts: Vec<String>,

    /// Client address whose traffic is not intercepted (repeatable)
    #[arg(long = "disable-address", value_name = "IP")]
    disable_addresses: Vec<IpAddr>,

    /// Directory holding the root CA
    #[arg(long)]
    ca_dir: Option<PathBuf>,

    /// Warn about responses slower than this many seconds
    #[arg(long)]
    slow_request_secs: Option<f64>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write daily-rotated log files to this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            listen_host: self.listen_host.clone(),
            port: self.port,
            session_id: self.session_id.clone(),
            slow_request_secs: self.slow_request_secs,
            ca_dir: self.ca_dir.clone(),
            allow_hosts: self.allow_hosts.clone(),
            skip_hosts: self.skip_hosts.clone(),
            disable_addresses: self.disable_addresses.clone(),
        }
    }
}

/// Initialize logging, optionally with file rotation.
fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = if args.debug { "debug" } else { &args.log_level };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("flowgate={},warn", log_level)));

    if let Some(log_dir) = &args.log_dir {
        if std::fs::create_dir_all(log_dir).is_ok() {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(5)
                .filename_prefix("flowgate")
                .filename_suffix("log")
                .build(log_dir)
                .ok();

            if let Some(appender) = file_appender {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(std::io::stdout))
                    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                    .init();

                tracing::info!("Logging to {:?}", log_dir);
                return Some(guard);
            }
        }

        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        tracing::warn!("File logging unavailable, using console only");
        return None;
    }

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    None
}

/// Works out the address to bind, resolving "auto" hosts and port 0.
fn listen_addr(settings: &Settings) -> anyhow::Result<SocketAddr> {
    let ip = match settings.listen_host()? {
        ListenHost::Ip(ip) => ip,
        ListenHost::Auto => IpAddr::V4(
            AddressResolver::default()
                .resolve()
                .context("failed to resolve listen address")?,
        ),
    };

    let port = match settings.proxy.port {
        0 => free_port().context("failed to allocate a free port")?,
        port => port,
    };

    Ok(SocketAddr::new(ip, port))
}

fn build_config(settings: &Settings) -> anyhow::Result<ProxyConfig> {
    let ca_manager = match &settings.proxy.ca_dir {
        Some(dir) => CaManager::new(dir),
        None => CaManager::with_default_dir()?,
    };

    let session_id = settings
        .proxy
        .session_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    tracing::info!("Session id: {}", session_id);

    Ok(ProxyConfig::with_ca_manager(ca_manager, session_id)
        .with_addr(listen_addr(settings)?)
        .with_skip_set(settings.skip_set())
        .with_disabled_addresses(settings.disabled_addresses())
        .with_slow_threshold(settings.slow_threshold()?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&args);

    let settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    }
    .apply(args.overrides());

    let config = build_config(&settings)?;
    let server = ProxyServer::new(config).context("failed to create proxy server")?;
    tracing::info!("Proxy listening on {}", server.addr());

    let handle = server.start().context("failed to start proxy server")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down, {} flows in flight", handle.in_flight());
    handle.stop().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn args_collect_repeated_flags() {
        let args = Args::try_parse_from([
            "flowgate",
            "--skip-host",
            "a.example.com",
            "--skip-host",
            "b.example.com",
            "--allow-host",
            "b.example.com",
            "--disable-address",
            "10.0.0.7",
            "--port",
            "0",
        ])
        .unwrap();

        let settings = Settings::default().apply(args.overrides());
        let skip = settings.skip_set();
        assert!(skip.contains("a.example.com"));
        assert!(!skip.contains("b.example.com"));
        assert_eq!(settings.proxy.port, 0);
        assert_eq!(settings.disabled_addresses().len(), 1);
    }

    #[test]
    fn args_reject_bad_address() {
        let args = Args::try_parse_from(["flowgate", "--disable-address", "nope"]);
        assert!(args.is_err());
    }

    #[test]
    fn fixed_listen_addr() {
        let settings = Settings::default().apply(Overrides {
            listen_host: Some("0.0.0.0".into()),
            port: Some(9123),
            ..Default::default()
        });
        assert_eq!(listen_addr(&settings).unwrap(), SocketAddr::from(([0, 0, 0, 0], 9123)));
    }

    #[test]
    fn port_zero_allocates() {
        let settings = Settings::default().apply(Overrides {
            port: Some(0),
            ..Default::default()
        });
        assert_ne!(listen_addr(&settings).unwrap().port(), 0);
    }

    #[test]
    fn config_uses_given_session_and_ca_dir() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::default().apply(Overrides {
            session_id: Some("fixed".into()),
            ca_dir: Some(temp_dir.path().to_path_buf()),
            skip_hosts: vec!["ads.example.com".into()],
            ..Default::default()
        });

        let config = build_config(&settings).unwrap();
        assert_eq!(config.session_id, "fixed");
        assert_eq!(config.ca_manager.ca_dir(), temp_dir.path());
        assert!(config.skip_set.contains("ads.example.com"));
    }

    #[test]
    fn config_generates_session_id() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::default().apply(Overrides {
            ca_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        });

        let config = build_config(&settings).unwrap();
        assert!(uuid::Uuid::parse_str(&config.session_id).is_ok());
    }
}
