mod logging;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use zconf_core::config::AppConfig;
use zconf_discovery::{
    DiscoveryConfig, EventKind, ImplementationHint, PublishRequest, ScanRequest, ServiceCatalog,
    Zeroconf, ZeroconfEvent,
};

/// zconf - browse and advertise Zeroconf services on the local network
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "ZCONF_CONFIG")]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Browse for services and print what is found
    Scan(ScanArgs),
    /// Advertise a service until interrupted
    Publish(PublishArgs),
}

/// Service class selection shared by both commands.
#[derive(Args, Debug)]
struct ServiceArgs {
    /// Service type without the leading underscore (e.g. "http")
    #[arg(long = "type")]
    service_type: Option<String>,

    /// Transport protocol (e.g. "tcp")
    #[arg(long)]
    protocol: Option<String>,

    /// Domain (e.g. "local.")
    #[arg(long)]
    domain: Option<String>,

    /// Discovery backend (mdns-sd, loopback)
    #[arg(long)]
    implementation: Option<ImplementationHint>,
}

impl ServiceArgs {
    fn resolve(&self, defaults: &DiscoveryConfig) -> (String, String, String, ImplementationHint) {
        (
            self.service_type
                .clone()
                .unwrap_or_else(|| defaults.default_type.clone()),
            self.protocol
                .clone()
                .unwrap_or_else(|| defaults.default_protocol.clone()),
            self.domain
                .clone()
                .unwrap_or_else(|| defaults.default_domain.clone()),
            self.implementation
                .clone()
                .unwrap_or_else(|| defaults.default_implementation.clone()),
        )
    }
}

#[derive(Args, Debug)]
struct ScanArgs {
    #[command(flatten)]
    service: ServiceArgs,

    /// Stop scanning after this many seconds
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    /// Print events and the final catalog as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct PublishArgs {
    #[command(flatten)]
    service: ServiceArgs,

    /// Instance name to advertise
    #[arg(long)]
    name: String,

    /// Port the service listens on
    #[arg(long)]
    port: u16,

    /// TXT entry as key=value (repeatable)
    #[arg(long = "txt", value_parser = parse_txt)]
    txt: Vec<(String, String)>,
}

fn parse_txt(entry: &str) -> Result<(String, String)> {
    let (key, value) = entry
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got '{entry}'"))?;
    if key.is_empty() {
        return Err(anyhow!("TXT key cannot be empty"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_config_builder(path)
            .with_context(|| format!("Failed to load config file: {:?}", path))?,
        None => AppConfig::default(),
    };

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    logging::init(&config.logging)?;

    let zeroconf =
        Zeroconf::new(config.discovery.clone()).context("Failed to start discovery")?;

    let result = match cli.command {
        Command::Scan(args) => run_scan(&zeroconf, args).await,
        Command::Publish(args) => run_publish(&zeroconf, args, signal::ctrl_c()).await,
    };

    zeroconf.shutdown().await;
    result
}

async fn run_scan(zeroconf: &Zeroconf, args: ScanArgs) -> Result<()> {
    let (service_type, protocol, domain, hint) = args.service.resolve(zeroconf.config());
    let request = ScanRequest::new(service_type, protocol, domain).with_implementation(hint);

    info!(
        service_type = %request.service_type_string(),
        hint = %request.implementation,
        timeout_secs = args.timeout,
        "Scanning"
    );

    let mut events = zeroconf.subscribe_all();
    zeroconf.scan(request);

    let deadline = tokio::time::sleep(Duration::from_secs(args.timeout));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = signal::ctrl_c() => {
                info!("Interrupted, stopping scan");
                break;
            }
            event = events.recv() => match event {
                Some(event) => print_event(&event, args.json)?,
                None => break,
            },
        }
    }

    zeroconf.stop();
    zeroconf.settled().await;
    print_catalog(&zeroconf.get_services(), args.json)
}

/// Advertises a service until `shutdown` completes.
///
/// An error reported before the service is published ends the command with
/// that error; later errors are only logged.
async fn run_publish<F, T>(zeroconf: &Zeroconf, args: PublishArgs, shutdown: F) -> Result<()>
where
    F: Future<Output = T>,
{
    let (service_type, protocol, domain, hint) = args.service.resolve(zeroconf.config());
    let mut request = PublishRequest::new(args.name, args.port)
        .service(service_type, protocol, domain)
        .with_implementation(hint);
    for (key, value) in args.txt {
        request = request.txt(key, value);
    }

    let mut events = zeroconf.subscribe(&[
        EventKind::Published,
        EventKind::Unpublished,
        EventKind::Error,
    ]);
    let name = request.name.clone();
    zeroconf.publish_service(request);

    tokio::pin!(shutdown);
    let mut published = false;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted, withdrawing service");
                break;
            }
            event = events.recv() => match event {
                Some(ZeroconfEvent::Error(err)) if !published => {
                    return Err(anyhow::Error::new(err).context(format!("Failed to publish '{name}'")));
                }
                Some(ZeroconfEvent::Error(err)) => warn!(error = %err, "Publish error"),
                Some(event) => {
                    if matches!(&event, ZeroconfEvent::Published(record) if record.name == name) {
                        published = true;
                    }
                    print_event(&event, false)?;
                }
                None => break,
            },
        }
    }

    Ok(())
}

fn print_event(event: &ZeroconfEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match event {
        ZeroconfEvent::Start => println!("scan started"),
        ZeroconfEvent::Stop => println!("scan stopped"),
        ZeroconfEvent::Error(err) => println!("error: {err}"),
        ZeroconfEvent::Found(record) => println!("found     {}", record.name),
        ZeroconfEvent::Resolved(record) => println!(
            "resolved  {} {}:{}",
            record.name,
            record.primary_address().unwrap_or("-"),
            record.port
        ),
        ZeroconfEvent::Remove(record) => println!("removed   {}", record.name),
        ZeroconfEvent::Update => {}
        ZeroconfEvent::Published(record) => println!(
            "published {} on {}",
            record.name,
            record.full_name.as_deref().unwrap_or(&record.name)
        ),
        ZeroconfEvent::Unpublished(record) => println!("withdrawn {}", record.name),
    }
    Ok(())
}

fn print_catalog(services: &ServiceCatalog, json: bool) -> Result<()> {
    let mut names: Vec<&String> = services.keys().collect();
    names.sort();

    if json {
        for name in names {
            println!("{}", serde_json::to_string(&services[name])?);
        }
        return Ok(());
    }

    println!("{} service(s)", services.len());
    for name in names {
        let record = &services[name];
        if record.is_resolved() {
            println!(
                "  {} {}:{} {:?}",
                name,
                record.primary_address().unwrap_or("-"),
                record.port,
                record.txt
            );
        } else {
            println!("  {} (unresolved)", name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_txt() {
        assert_eq!(
            parse_txt("path=/admin").unwrap(),
            ("path".to_string(), "/admin".to_string())
        );
        assert_eq!(
            parse_txt("flag=").unwrap(),
            ("flag".to_string(), String::new())
        );
        assert!(parse_txt("novalue").is_err());
        assert!(parse_txt("=x").is_err());
    }

    #[test]
    fn test_cli_parses_scan() {
        let cli = Cli::try_parse_from([
            "zconf",
            "--log-level",
            "debug",
            "scan",
            "--type",
            "ipp",
            "--implementation",
            "Loopback",
            "--timeout",
            "1",
        ])
        .unwrap();

        match cli.command {
            Command::Scan(args) => {
                let (ty, protocol, _, hint) = args.service.resolve(&DiscoveryConfig::default());
                assert_eq!(ty, "ipp");
                assert_eq!(protocol, "tcp");
                assert_eq!(hint, ImplementationHint::loopback());
                assert_eq!(args.timeout, 1);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    fn publish_args(name: &str, port: u16) -> PublishArgs {
        PublishArgs {
            service: ServiceArgs {
                service_type: None,
                protocol: None,
                domain: None,
                implementation: Some(ImplementationHint::loopback()),
            },
            name: name.to_string(),
            port,
            txt: vec![("path".to_string(), "/".to_string())],
        }
    }

    fn loopback() -> Zeroconf {
        Zeroconf::new(DiscoveryConfig {
            default_implementation: ImplementationHint::loopback(),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_publish_error_ends_command() {
        let zeroconf = loopback();

        let result = run_publish(&zeroconf, publish_args("web", 0), std::future::pending::<()>()).await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to publish 'web'"));
        assert!(zeroconf.get_published_services().is_empty());
    }

    #[tokio::test]
    async fn test_publish_runs_until_shutdown() {
        let zeroconf = loopback();
        let shutdown = tokio::time::sleep(std::time::Duration::from_millis(50));

        run_publish(&zeroconf, publish_args("web", 8080), shutdown)
            .await
            .unwrap();

        zeroconf.settled().await;
        assert!(zeroconf.get_published_services().contains_key("web"));
        zeroconf.shutdown().await;
    }

    #[test]
    fn test_cli_parses_publish_txt() {
        let cli = Cli::try_parse_from([
            "zconf", "publish", "--name", "web", "--port", "8080", "--txt", "a=1", "--txt", "b=2",
        ])
        .unwrap();

        match cli.command {
            Command::Publish(args) => {
                assert_eq!(args.name, "web");
                assert_eq!(args.txt.len(), 2);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
