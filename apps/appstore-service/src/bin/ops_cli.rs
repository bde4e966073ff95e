use anyhow::{Context, Result, bail};
use appstore_service::build_manager;
use appstore_service::config::Config;
use chrono::SecondsFormat;
use clap::{Args, Parser, Subcommand};
use serde_json::json;

#[derive(Parser)]
#[command(name = "appstore-ops")]
#[command(about = "Operator commands against the configured appstore install store")]
struct Cli {
    /// Emit JSON instead of a plain listing.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every registered application.
    Catalog,
    /// List the applications installed for a user.
    Installs(InstallsArgs),
    /// Remove an install, unsubscribing its webhooks first.
    Uninstall(UninstallArgs),
}

#[derive(Args)]
struct InstallsArgs {
    #[arg(long)]
    user: String,
}

#[derive(Args)]
struct UninstallArgs {
    #[arg(long)]
    key: String,
    #[arg(long)]
    user: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("load appstore configuration")?;
    if config.store_path.is_none() {
        bail!("APPSTORE_STORE_PATH must point at the install store snapshot");
    }
    let manager = build_manager(&config);

    match cli.command {
        Commands::Catalog => {
            let catalog = manager.list_applications();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&catalog)?);
            } else {
                for entry in catalog {
                    println!(
                        "{:<12} {:<12} {}",
                        entry.key,
                        serde_json::to_value(entry.authorization_type)?
                            .as_str()
                            .unwrap_or_default(),
                        entry.name
                    );
                }
            }
        }
        Commands::Installs(args) => {
            let installs = manager
                .get_installed_applications(&args.user)
                .await
                .with_context(|| format!("list installs for {}", args.user))?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&json!({ "items": installs }))?);
            } else {
                for install in installs {
                    println!(
                        "{:<12} authorized={:<5} enabled={:<5} webhooks={} created={}",
                        install.application.key,
                        install.authorized,
                        install.enabled,
                        install.webhooks.len(),
                        install.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                    );
                }
            }
        }
        Commands::Uninstall(args) => {
            let report = manager
                .uninstall_application(&args.key, &args.user)
                .await
                .with_context(|| format!("uninstall {} for {}", args.key, args.user))?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "uninstalled {} for {} ({} webhooks, {} failed remotely)",
                    report.key,
                    report.user,
                    report.webhooks.outcomes.len(),
                    report.webhooks.failure_count(),
                );
            }
        }
    }
    Ok(())
}
