use std::{path::PathBuf, time::Duration};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use instancehub::{
    config::{Config, ConfigStore, load_config},
    monitors::{MetricSampler, MonitorLoop, ProcessSort, RunDuration},
    probes::{
        HealthCheckCoordinator, ProbeRegistry, RedisClient, RedisOptions, RedisProbe,
        ServiceTarget,
    },
    util::{get_config_path, get_log_level},
};
use serde_json::{Value, json};
use tracing::{debug, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(name = "instancehub", about = "Host metrics and service health checks")]
struct Args {
    /// Config file (defaults to INSTANCEHUB_CONFIG or ~/.instancehub/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Host resource metrics
    #[command(subcommand)]
    Monitor(MonitorCommand),

    /// Service health checks
    #[command(subcommand)]
    Services(ServicesCommand),

    /// Inspect and edit the configuration file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Clone, Subcommand)]
enum MonitorCommand {
    /// One sample and its alerts
    Snapshot {
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Sample periodically until the duration expires or Ctrl-C
    Watch {
        /// Seconds to run, 0 runs until interrupted
        #[arg(long, default_value_t = 0)]
        duration: u64,
        /// Seconds between samples
        #[arg(long)]
        interval: Option<u64>,
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Top processes
    Processes {
        #[arg(long, default_value = "cpu")]
        sort: ProcessSort,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// CPU, memory, disk, network and load details
    Details {
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Subcommand)]
enum ServicesCommand {
    /// Check the named services (defaults to services.checks)
    Health {
        #[arg(short, long = "service")]
        services: Vec<String>,
        #[arg(long)]
        host: Option<String>,
        /// Port override, only valid with a single service
        #[arg(long)]
        port: Option<u16>,
    },
    /// Redis inspection
    #[command(subcommand)]
    Redis(RedisCommand),
}

#[derive(Debug, Clone, Subcommand)]
enum RedisCommand {
    /// Version and key count
    Status {
        #[command(flatten)]
        connection: RedisConnection,
    },
    /// Keys matching a pattern with their type and TTL
    Keys {
        #[command(flatten)]
        connection: RedisConnection,
        #[arg(long, default_value = "*")]
        pattern: String,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
}

#[derive(Debug, Clone, clap::Args)]
struct RedisConnection {
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    db: Option<u32>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    Show,
    Get { key: String },
    /// VALUE is parsed as JSON, falling back to a plain string
    Set { key: String, value: String },
    Validate,
    Reset,
}

fn init() {
    let level = get_log_level()
        .and_then(|level| level.parse().ok())
        .unwrap_or(LevelFilter::WARN);

    let filter = filter::Targets::new().with_target("instancehub", level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config_path = args.config.clone().unwrap_or_else(get_config_path);
    let typed = || {
        load_config(&config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))
    };

    match args.command {
        Command::Monitor(command) => monitor(command, &typed()?).await,
        Command::Services(command) => services(command, &typed()?).await,
        Command::Config(command) => {
            let store = ConfigStore::load(&config_path)
                .with_context(|| format!("failed to load {}", config_path.display()))?;
            config(command, store)
        }
    }
}

fn print(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn sampler_for(config: &Config, path: Option<PathBuf>) -> MetricSampler {
    let path = path.unwrap_or_else(|| config.monitoring.disk_path.clone());
    MetricSampler::new().with_disk_path(path)
}

async fn monitor(command: MonitorCommand, config: &Config) -> anyhow::Result<()> {
    match command {
        MonitorCommand::Snapshot { path } => {
            let monitor = MonitorLoop::new(sampler_for(config, path), config.threshold_set()?);
            let (sample, alerts) = monitor.sample_once().await?;
            print(&json!({ "sample": sample, "alerts": alerts }))
        }
        MonitorCommand::Watch {
            duration,
            interval,
            path,
        } => {
            let interval = interval.unwrap_or(config.monitoring.refresh_interval).max(1);
            let monitor = MonitorLoop::new(sampler_for(config, path), config.threshold_set()?);
            debug!("watching for {duration}s every {interval}s");

            let report = monitor
                .run(
                    RunDuration::from_secs(duration),
                    Duration::from_secs(interval),
                    |sample, alerts| {
                        let line = json!({ "sample": sample, "alerts": alerts });
                        println!("{line}");
                    },
                )
                .await;

            println!("{}", json!({ "stopped": report }));
            Ok(())
        }
        MonitorCommand::Processes { sort, limit } => {
            let processes = tokio::task::spawn_blocking(move || {
                MetricSampler::new().top_processes(sort, limit)
            })
            .await?;
            print(&processes)
        }
        MonitorCommand::Details { path } => {
            let sampler = sampler_for(config, path);
            let details = tokio::task::spawn_blocking(move || -> anyhow::Result<Value> {
                Ok(json!({
                    "cpu": sampler.cpu_info(),
                    "memory": sampler.memory_info()?,
                    "disk": sampler.disk_info(sampler.disk_path())?,
                    "network": sampler.network_info(),
                    "load_average": MetricSampler::load_average(),
                }))
            })
            .await??;
            print(&details)
        }
    }
}

fn coordinator_for(config: &Config) -> HealthCheckCoordinator {
    let mut registry = ProbeRegistry::default();
    if cfg!(feature = "redis-probe") {
        registry.register(
            "redis",
            RedisProbe::new(config.redis.password.clone(), config.redis.default_db),
        );
    }

    HealthCheckCoordinator::new(registry)
        .with_timeout(Duration::from_secs(config.services.health_check_timeout))
        .with_parallelism(config.services.parallelism)
}

async fn services(command: ServicesCommand, config: &Config) -> anyhow::Result<()> {
    match command {
        ServicesCommand::Health {
            services,
            host,
            port,
        } => {
            let host = host.unwrap_or_else(|| config.services.default_host.clone());
            let services = if services.is_empty() {
                config.services.checks.clone()
            } else {
                services
            };

            let targets = match (port, services.as_slice()) {
                (Some(port), [service]) => vec![ServiceTarget::new(service, &host).with_port(port)],
                (Some(_), _) => bail!("--port requires exactly one --service"),
                (None, _) => services
                    .iter()
                    .map(|service| ServiceTarget::new(service, &host))
                    .collect(),
            };

            let report = coordinator_for(config).check_targets(targets).await;
            print(&report)
        }
        ServicesCommand::Redis(command) => redis(command, config).await,
    }
}

fn redis_options(connection: RedisConnection, config: &Config) -> RedisOptions {
    RedisOptions {
        password: config.redis.password.clone(),
        db: connection.db.unwrap_or(config.redis.default_db),
        timeout: Duration::from_secs(config.services.health_check_timeout),
        ..RedisOptions::new(
            connection
                .host
                .unwrap_or_else(|| config.redis.default_host.clone()),
            connection.port.unwrap_or(config.redis.default_port),
        )
    }
}

async fn redis(command: RedisCommand, config: &Config) -> anyhow::Result<()> {
    match command {
        RedisCommand::Status { connection } => {
            let options = redis_options(connection, config);
            let mut client = RedisClient::connect(&options).await?;

            let version = client.server_version().await?;
            let keys = client.total_keys(options.db).await?;
            let server = client.info(Some("server")).await?;

            print(&json!({
                "host": options.host,
                "port": options.port,
                "db": options.db,
                "version": version,
                "keys": keys,
                "uptime_in_seconds": server.get("uptime_in_seconds"),
            }))
        }
        RedisCommand::Keys {
            connection,
            pattern,
            limit,
        } => {
            let options = redis_options(connection, config);
            let mut client = RedisClient::connect(&options).await?;

            let mut entries = vec![];
            for key in client.keys(&pattern, limit).await? {
                let key_type = client.key_type(&key).await?;
                let ttl = client.ttl(&key).await?;
                entries.push(json!({ "key": key, "type": key_type, "ttl": ttl }));
            }
            print(&entries)
        }
    }
}

fn config(command: ConfigCommand, mut store: ConfigStore) -> anyhow::Result<()> {
    match command {
        ConfigCommand::Show => {
            let config = store.typed()?;
            print(&json!({
                "path": store.path(),
                "exists": store.exists(),
                "config": config,
            }))
        }
        ConfigCommand::Get { key } => match store.get(&key) {
            Some(value) => print(value),
            None => bail!("{key} is not set in {}", store.path().display()),
        },
        ConfigCommand::Set { key, value } => {
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            store.set(&key, value)?;

            let errors = store.typed()?.validate();
            if !errors.is_empty() {
                bail!("refusing to save invalid config: {}", errors.join("; "));
            }

            store.save()?;
            print(&json!({ "key": key, "value": store.get(&key) }))
        }
        ConfigCommand::Validate => {
            let errors = store.typed()?.validate();
            print(&json!({ "valid": errors.is_empty(), "errors": errors }))
        }
        ConfigCommand::Reset => {
            store.reset()?;
            store.save()?;
            print(&json!({ "reset": store.path() }))
        }
    }
}
