//! Binary entrypoint for the meshbot CLI.
//!
//! Commands:
//! - `start [--port <path>]` - run the relay, optionally connecting to a device
//! - `init` - create a starter `config.toml` with every backend section
//! - `models [--platform <name>]` - list the models a backend offers
//! - `check-config` - validate the configuration and resolve the platform
//! - `status` - print the configuration summary and node cache size
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use meshbot::backend::{BackendRegistry, BackendRouter};
use meshbot::config::Config;
use meshbot::meshtastic::NodeDirectory;
use meshbot::relay::MeshBot;

#[derive(Parser)]
#[command(name = "meshbot")]
#[command(about = "Relay Meshtastic direct messages to AI chat backends")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay
    Start {
        /// Meshtastic device port (e.g., /dev/ttyUSB0)
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// List the models offered by a backend
    Models {
        /// Backend name; defaults to bot.platform
        #[arg(short, long)]
        platform: Option<String>,
    },
    /// Validate the configuration file
    CheckConfig,
    /// Show configuration summary
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&None, cli.verbose);
        if std::path::Path::new(&cli.config).exists() {
            return Err(anyhow!(
                "{} already exists; remove it first to regenerate",
                cli.config
            ));
        }
        Config::create_default(&cli.config).await?;
        info!("Configuration file created at {}", cli.config);
        return Ok(());
    }

    let config = Config::load(&cli.config).await?;
    init_logging(&Some(config.clone()), cli.verbose);

    match cli.command {
        Commands::Start { port } => {
            info!("Starting meshbot v{}", env!("CARGO_PKG_VERSION"));
            let require_device = config.meshtastic.require_device_at_startup;
            let chosen_port = port.or_else(|| {
                let p = config.meshtastic.port.trim();
                (!p.is_empty()).then(|| p.to_string())
            });
            let mut bot = MeshBot::new(config).await?;

            if let Some(port_path) = chosen_port {
                match bot.connect_device(&port_path).await {
                    Ok(_) => info!("Connected to Meshtastic device on {}", port_path),
                    Err(e) if require_device => {
                        error!("Failed to connect to device on {}: {}", port_path, e);
                        return Err(e);
                    }
                    Err(e) => warn!(
                        "Failed to connect to device on {}: {} (continuing without device)",
                        port_path, e
                    ),
                }
            } else {
                warn!("No --port specified and no configured device port set; starting without device.");
            }

            bot.run().await?;
        }
        // Written above, before a config file exists
        Commands::Init => {}
        Commands::Models { platform } => {
            let name = platform.unwrap_or_else(|| config.bot.platform.clone());
            let mut router = BackendRouter::start(
                BackendRegistry::with_builtin(),
                &name,
                config.backend_args(&name),
            )
            .await?;
            if !router.is_ready() {
                router.close().await;
                return Err(anyhow!("backend '{}' is not reachable", name));
            }
            let models = router.get_models().await;
            router.close().await;
            if models.is_empty() {
                println!("{}: no model list available", name);
            } else {
                println!("{} models:", name);
                for m in models {
                    println!("  {}", m);
                }
            }
        }
        Commands::CheckConfig => {
            config.validate()?;
            let registry = BackendRegistry::with_builtin();
            if !registry.contains(&config.bot.platform) {
                return Err(anyhow!(
                    "unknown platform '{}' (available: {})",
                    config.bot.platform,
                    registry.names().join(", ")
                ));
            }
            // Construct without connecting so missing keys and bad URLs surface here.
            let mut backend = registry.build(
                &config.bot.platform,
                config.backend_args(&config.bot.platform),
            )?;
            backend.close().await;
            println!("{}: OK (platform '{}')", cli.config, config.bot.platform);
        }
        Commands::Status => {
            let cache = config.meshtastic.node_cache_file.trim();
            let known = if cache.is_empty() {
                0
            } else {
                NodeDirectory::load(cache.into()).len()
            };
            print!("{}", status_report(&config, known));
        }
    }

    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Foreground runs echo to the console as well
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}

fn status_report(config: &Config, cached_nodes: usize) -> String {
    let port = if config.meshtastic.port.is_empty() {
        "(none)"
    } else {
        config.meshtastic.port.as_str()
    };
    let configured: Vec<&str> = config.backends.keys().map(String::as_str).collect();
    let mut out = format!("meshbot v{}\n", env!("CARGO_PKG_VERSION"));
    out.push_str(&format!("  platform:        {}\n", config.bot.platform));
    out.push_str(&format!("  device port:     {}\n", port));
    out.push_str(&format!("  chunk size:      {} bytes\n", config.bot.max_response_length));
    out.push_str(&format!("  history:         {} exchanges\n", config.bot.history_exchanges));
    out.push_str(&format!("  backend tables:  {}\n", configured.join(", ")));
    out.push_str(&format!("  cached nodes:    {}\n", cached_nodes));
    // Counters belong to this process; a running relay logs its own on shutdown.
    out.push_str(&format!("  counters:        {}\n", meshbot::metrics::snapshot()));
    out
}
