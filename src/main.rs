//! Tunpoint CLI - inspect tunnel control plane inputs
//!
//! Validates engine configuration and prints the strings the controller
//! hands to the host VPN service and to the packet-capture helper.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info};
use tunpoint_core::addressing::{helper_args, helper_path, vpn_setup_arg};
use tunpoint_core::ControllerConfig;

/// Tunpoint - tunnel endpoint control plane
#[derive(Parser, Debug)]
#[command(name = "tunpoint")]
#[command(about = "Tunpoint - tunnel endpoint control plane tools")]
#[command(version)]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show binding and build versions
    Version,

    /// Parse and validate an engine configuration file
    CheckConfig {
        /// Engine configuration (JSON)
        file: PathBuf,
    },

    /// Print the VPN setup string passed to the host
    VpnArgs(RunFlags),

    /// Print the helper command line
    HelperArgs(RunFlags),
}

#[derive(Args, Debug)]
struct RunFlags {
    /// Controller settings file (JSON); defaults apply when omitted
    #[arg(long, env = "TUNPOINT_SETTINGS")]
    settings: Option<PathBuf>,

    /// Host package name
    #[arg(long, env = "TUNPOINT_PACKAGE")]
    package: Option<String>,

    /// Route DNS through the engine's local DNS inbound
    #[arg(long)]
    local_dns: bool,

    /// Forward IPv6 traffic
    #[arg(long)]
    ipv6: bool,
}

impl RunFlags {
    fn load(&self) -> Result<ControllerConfig> {
        let mut config = match &self.settings {
            Some(path) => ControllerConfig::load(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => ControllerConfig::default(),
        };
        if let Some(package) = &self.package {
            config.package_name = package.clone();
        }
        debug!("Controller settings: {:?}", config);
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tunpoint_core::logging::init(if cli.verbose { "debug" } else { "warn" });

    match cli.command {
        Commands::Version => {
            println!(
                "tunpoint {} (commit {}, built {})",
                env!("GIT_TAG"),
                env!("GIT_HASH"),
                env!("BUILD_TIME")
            );
            println!("Binding version: {}", tunpoint_core::check_version());
        }
        Commands::CheckConfig { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;

            let config = tunpoint_core::test_config(&text)
                .with_context(|| format!("Invalid engine config in {}", file.display()))?;
            info!("Config {} is valid", file.display());

            println!(
                "OK: {} inbound(s), {} outbound(s), stats {}",
                config.inbounds.len(),
                config.outbounds.len(),
                if config.stats_enabled() { "enabled" } else { "disabled" }
            );
            let tags: Vec<&str> = config.inbound_tags().collect();
            if !tags.is_empty() {
                println!("Inbound tags: {}", tags.join(", "));
            }
        }
        Commands::VpnArgs(flags) => {
            let config = flags.load()?;
            println!("{}", vpn_setup_arg(config.mtu, flags.local_dns, flags.ipv6));
        }
        Commands::HelperArgs(flags) => {
            let config = flags.load()?;
            let data_dir = config.data_dir_for(&config.package_name);
            let args = helper_args(&config, &data_dir, flags.local_dns, flags.ipv6);
            println!(
                "{} {}",
                helper_path(&config, &data_dir).display(),
                args.join(" ")
            );
        }
    }

    Ok(())
}
