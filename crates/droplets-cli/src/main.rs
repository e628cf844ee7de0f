mod hostkeys;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use droplets_infra::{Blueprint, Fleet, Settings};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "droplets", version)]
#[command(
    about = "Keep DigitalOcean droplets in line with a blueprint and print the inventory",
    long_about = None
)]
struct Cli {
    /// Blueprint file (YAML or JSON) mapping group names to group specs
    #[arg(short, long, env = "DROPLETS_BLUEPRINT", default_value = "blueprint.yml")]
    blueprint: PathBuf,

    /// Prepended to every droplet and volume name
    #[arg(long, env = "DROPLETS_PREFIX")]
    prefix: Option<String>,

    /// Image slug for groups that do not set one
    #[arg(long)]
    image: Option<String>,

    /// Size slug for groups that do not set one
    #[arg(long)]
    size: Option<String>,

    /// Region slug for groups that do not set one
    #[arg(long)]
    region: Option<String>,

    /// Seconds between convergence checks
    #[arg(long, value_name = "SECS")]
    poll_interval: Option<u64>,

    /// Give up waiting on the provider after this many seconds
    #[arg(long, value_name = "SECS")]
    deadline: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Print the inventory as JSON (default)
    List,
    /// Print one `group: host host` line per group
    Human,
    /// Create and delete droplets until the account matches the blueprint
    Reconcile,
    /// Refresh ~/.ssh/known_hosts for every host in the inventory
    Hostkeys,
    /// Delete every droplet of a group (`all` for every declared group)
    Destroy { group: String },
    /// List bootable image slugs
    Images,
}

impl Cli {
    /// Flags win over the environment.
    fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(prefix) = &self.prefix {
            settings.prefix = prefix.clone();
        }
        if let Some(image) = &self.image {
            settings.defaults.image = image.clone();
        }
        if let Some(size) = &self.size {
            settings.defaults.size = size.clone();
        }
        if let Some(region) = &self.region {
            settings.defaults.region = region.clone();
        }
        if let Some(secs) = self.poll_interval {
            settings.reconcile.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.deadline {
            settings = settings.with_deadline(Duration::from_secs(secs));
        }
        settings
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // stdout carries the inventory; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = cli.apply(Settings::from_env()?);
    let blueprint = Blueprint::load(&cli.blueprint)?;
    let mut fleet = Fleet::connect(settings, blueprint)?;

    match cli.command.unwrap_or(Command::List) {
        Command::List => {
            let inventory = fleet.inventory().await?;
            println!("{}", serde_json::to_string_pretty(inventory)?);
        }
        Command::Human => {
            for line in fleet.inventory().await?.human_lines() {
                println!("{line}");
            }
        }
        Command::Reconcile => {
            let report = fleet.reconcile().await?;
            info!(
                noop = report.is_noop(),
                polls = report.poll_rounds,
                created = report.created_droplets.len(),
                volumes = report.created_volumes.len(),
                attached = report.attached_volumes.len(),
                deleted = report.deleted_droplets.len(),
                "reconcile finished"
            );
            for line in fleet.inventory().await?.human_lines() {
                println!("{line}");
            }
        }
        Command::Hostkeys => {
            let known_hosts = hostkeys::known_hosts_path()?;
            let hosts = fleet.inventory().await?.all_hosts();
            let installed = hostkeys::install(hosts, &known_hosts).await?;
            info!(hosts = installed, path = %known_hosts.display(), "host keys refreshed");
        }
        Command::Destroy { group } => {
            let deleted = fleet.destroy_group(&group).await?;
            info!(group = %group, deleted = ?deleted, "destroyed");
        }
        Command::Images => {
            for slug in fleet.image_slugs().await? {
                println!("{slug}");
            }
        }
    }

    Ok(())
}
