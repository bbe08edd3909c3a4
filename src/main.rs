//! Shotty CLI - manage editor plugins and their updates without the UI

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;

use shotty_lib::api::types::{ApiError, UpdateOutcome};
use shotty_lib::app::{http_client, ShottyConfig};
use shotty_lib::capture::CommandCapture;
use shotty_lib::commands::{capture, plugins, updates};
use shotty_lib::plugins::store::PluginStore;
use shotty_lib::runtime::notifier::Notifier;
use shotty_lib::runtime::preferences::JsonPreferenceStore;
use shotty_lib::runtime::update_agent::{HttpUpdateSource, UpdateAgent};

#[derive(Parser)]
#[command(name = "shotty")]
#[command(author, version, about = "Screenshot editor plugin host", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List installed plugins
    List,

    /// Install a plugin from a directory, .html file or .zip archive
    Install {
        /// Path to the plugin bundle
        path: String,
        /// Replace an installed plugin with the same name
        #[arg(short, long)]
        force: bool,
    },

    /// Choose the plugin the editor loads
    Prefer {
        /// Plugin identifier or http(s) URL
        #[arg(required_unless_present = "live")]
        plugin: Option<String>,
        /// Use the configured live development endpoint
        #[arg(long, conflicts_with = "plugin")]
        live: bool,
    },

    /// Create the plugin directory and install the bundled default plugin
    Bootstrap,

    /// Capture the screen to a PNG file
    Capture {
        /// Output file
        output: PathBuf,
    },

    /// Check for a default plugin update now
    CheckUpdate,

    /// Check for updates periodically until interrupted
    Watch,
}

struct Services {
    store: Arc<PluginStore>,
    updates: Arc<UpdateAgent>,
}

fn build_services(config: &ShottyConfig) -> Result<Services, ApiError> {
    let notifier = Arc::new(Notifier::new());
    let prefs = Arc::new(JsonPreferenceStore::open(config.preferences_path.clone()));
    let store = Arc::new(PluginStore::new(
        config.plugin_root.clone(),
        config.default_plugin_name.clone(),
        config.default_asset.clone(),
        prefs.clone(),
        Arc::clone(&notifier),
    ));

    let client = http_client()?;
    let source = Arc::new(HttpUpdateSource::new(client, config.update_url.clone()));
    let updates = UpdateAgent::new(
        source,
        Arc::clone(&store),
        prefs,
        Arc::clone(&notifier),
        Arc::new(updates::HeadlessReload),
        config.update_interval,
    );

    Ok(Services {
        store,
        updates,
    })
}

fn print<T: Serialize>(format: OutputFormat, value: &T, text: impl FnOnce(&T) -> String) {
    match format {
        OutputFormat::Text => println!("{}", text(value)),
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(e) => log::error!("Failed to serialize output: {e}"),
        },
    }
}

async fn run(cli: Cli, config: ShottyConfig) -> Result<(), ApiError> {
    let services = build_services(&config)?;
    let store = services.store.as_ref();

    match cli.command {
        Commands::List => {
            let list = plugins::plugin_list(store).await;
            print(cli.format, &list, |list| {
                if list.is_empty() {
                    return format!("No plugins installed in {}", store.root().display());
                }
                list.iter()
                    .map(|p| {
                        let marker = if p.is_default { "*" } else { " " };
                        format!("{marker} {}\t{}", p.plugin_id, p.root_dir.display())
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            });
        }
        Commands::Install { path, force } => {
            let descriptor = plugins::plugin_install(store, path, force).await?;
            print(cli.format, &descriptor, |d| {
                format!("Installed {} at {}", d.plugin_id, d.root_dir.display())
            });
        }
        Commands::Prefer { plugin, live } => {
            let plugin = if live {
                config.live_endpoint.clone()
            } else {
                plugin.unwrap_or_default()
            };
            let installed = plugins::plugin_prefer(store, plugin.clone()).await?;
            if !installed {
                log::warn!("Preferred plugin is not installed yet: plugin={plugin}");
            }
            print(cli.format, &plugin, |p| format!("Preferred plugin: {p}"));
        }
        Commands::Bootstrap => {
            let installed = plugins::plugin_bootstrap(store).await;
            print(cli.format, &installed, |installed| {
                if *installed {
                    format!("Installed default plugin {}", store.default_name())
                } else {
                    "Default plugin already present".to_string()
                }
            });
        }
        Commands::Capture { output } => {
            let backend = CommandCapture::platform_default();
            let written = capture::capture_to_file(&backend, &output).await?;
            print(cli.format, &written, |written| match written {
                Some(path) => format!("Saved {}", path.display()),
                None => "Capture cancelled".to_string(),
            });
        }
        Commands::CheckUpdate => {
            let outcome = updates::update_check(&services.updates).await;
            print(cli.format, &outcome, |outcome| match outcome {
                UpdateOutcome::Skipped => "Update check already running".to_string(),
                UpdateOutcome::UpToDate => "Default plugin is up to date".to_string(),
                UpdateOutcome::Installed { validator } => format!(
                    "Installed update ({})",
                    validator.as_deref().unwrap_or("no validator")
                ),
                UpdateOutcome::Failed { message } => format!("Update failed: {message}"),
            });
            if let UpdateOutcome::Failed { message } = outcome {
                return Err(ApiError::NetworkError { message });
            }
        }
        Commands::Watch => {
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    log::error!("Failed to listen for ctrl-c: {e}");
                }
            };
            updates::update_watch(&services.updates, shutdown).await;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = match ShottyConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    log::debug!("Configuration loaded: {config:?}");

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
