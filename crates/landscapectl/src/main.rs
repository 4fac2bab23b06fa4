//! landscapectl — drive replica set lifecycles from the command line.
//!
//! Every invocation runs against a fresh in-memory landscape. Use
//! `--with-replica-set` and `--shared-hosts` to seed it before the command
//! runs; results are printed to stdout as JSON, logs go to stderr.
//!
//! # Usage
//!
//! ```text
//! landscapectl create regatta42 --min-replicas 0 --shared-hosts 2
//! landscapectl --with-replica-set regatta42 upgrade regatta42 --release latest
//! landscapectl --with-replica-set ARCHIVE --with-replica-set regatta42 archive regatta42
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "landscapectl",
    about = "Application replica set lifecycle orchestrator",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to landscape.toml (defaults apply when omitted).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "eu-west-1")]
    region: String,

    /// SSH key pair for hosts launched by the command.
    #[arg(long, global = true)]
    key_name: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    /// Create this replica set before running the command (repeatable).
    #[arg(long = "with-replica-set", global = true)]
    seed_replica_sets: Vec<String>,

    /// Start this many empty shared hosts before running the command.
    #[arg(long, global = true, default_value = "0")]
    shared_hosts: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a replica set with its master on a new dedicated host.
    Create(CreateArgs),
    /// Create a replica set with its master on an existing host.
    Deploy {
        #[command(flatten)]
        args: CreateArgs,
        /// Host id; the first seeded shared host when omitted.
        #[arg(long)]
        host: Option<String>,
    },
    /// Add a replica of an existing replica set on an existing host.
    DeployReplica {
        name: String,
        #[arg(long)]
        host: Option<String>,
        /// Release for the replica; the master's when omitted.
        #[arg(long)]
        release: Option<String>,
        #[command(flatten)]
        replication: ReplicationArgs,
    },
    /// Upgrade master and replicas to another release.
    Upgrade {
        name: String,
        #[arg(long, default_value = "latest")]
        release: String,
        #[command(flatten)]
        replication: ReplicationArgs,
    },
    /// Import the replica set into the archive server and retire it.
    Archive {
        name: String,
        /// Tear the replica set down after the redirect is in place.
        #[arg(long)]
        remove_source: bool,
        /// Copy the database here after teardown (`<uri>/<name>`).
        #[arg(long)]
        database_destination: Option<String>,
        /// Pause before and between content comparisons, e.g. `60s`.
        #[arg(long, default_value = "60s")]
        compare_delay: String,
        #[arg(long, default_value = "5")]
        compare_attempts: u32,
        #[arg(long)]
        bearer_token: Option<String>,
    },
    /// Tear a replica set down.
    Remove { name: String },
    /// Point launch configurations at a new machine image.
    UpdateImage {
        #[arg(required = true)]
        names: Vec<String>,
        /// Image id; the latest image of the configured type when omitted.
        #[arg(long)]
        image: Option<String>,
    },
    /// List shared hosts a replica of the replica set could move to.
    EligibleHosts { name: String },
    /// Launch an empty shared host.
    CreateSharedHost {
        #[arg(long)]
        instance_type: Option<String>,
        #[arg(long)]
        availability_zone: Option<String>,
        #[arg(long)]
        host_name: Option<String>,
    },
    /// Print the current replica set snapshot.
    Show { name: String },
}

#[derive(Args)]
struct CreateArgs {
    name: String,
    #[arg(long, default_value = "latest")]
    release: String,
    #[arg(long)]
    domain: Option<String>,
    /// Route through the region's default load balancer instead of DNS.
    #[arg(long)]
    dynamic: bool,
    /// Landing path for the bare hostname.
    #[arg(long)]
    redirect: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    instance_type: Option<String>,
    /// Launch the master onto a new shared host instead of a dedicated one.
    #[arg(long)]
    shared_master: bool,
    #[arg(long)]
    replica_instance_type: Option<String>,
    #[arg(long, default_value = "1")]
    min_replicas: u32,
    /// Host tried first for the unmanaged replica when `--min-replicas 0`.
    #[arg(long)]
    replica_host: Option<String>,
    #[arg(long, default_value = "30")]
    max_replicas: u32,
    #[command(flatten)]
    replication: ReplicationArgs,
}

#[derive(Args)]
struct ReplicationArgs {
    /// Token replicas use against the master; the session token when omitted.
    #[arg(long)]
    replication_token: Option<String>,
    /// Fixed heap size instead of the default share of host memory.
    #[arg(long)]
    memory_mb: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,landscape=debug".into());
    if cli.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let ctx = commands::Context::open(
        cli.config.as_deref(),
        &cli.region,
        cli.key_name,
        cli.shared_hosts,
        &cli.seed_replica_sets,
    )
    .await?;

    match cli.command {
        Command::Create(args) => commands::replica_set::create(&ctx, &args).await,
        Command::Deploy { args, host } => {
            commands::replica_set::deploy(&ctx, &args, host.as_deref()).await
        }
        Command::DeployReplica {
            name,
            host,
            release,
            replication,
        } => {
            commands::replica_set::deploy_replica(
                &ctx,
                &name,
                host.as_deref(),
                release.as_deref(),
                &replication,
            )
            .await
        }
        Command::Upgrade {
            name,
            release,
            replication,
        } => commands::replica_set::upgrade(&ctx, &name, &release, &replication).await,
        Command::Archive {
            name,
            remove_source,
            database_destination,
            compare_delay,
            compare_attempts,
            bearer_token,
        } => {
            commands::replica_set::archive(
                &ctx,
                &name,
                commands::replica_set::ArchiveArgs {
                    remove_source,
                    database_destination: database_destination.as_deref(),
                    compare_delay: &compare_delay,
                    compare_attempts,
                    bearer_token,
                },
            )
            .await
        }
        Command::Remove { name } => commands::replica_set::remove(&ctx, &name).await,
        Command::Show { name } => commands::replica_set::show(&ctx, &name).await,
        Command::UpdateImage { names, image } => {
            commands::hosts::update_image(&ctx, &names, image).await
        }
        Command::EligibleHosts { name } => commands::hosts::eligible(&ctx, &name).await,
        Command::CreateSharedHost {
            instance_type,
            availability_zone,
            host_name,
        } => {
            commands::hosts::create_shared(&ctx, instance_type, availability_zone, host_name).await
        }
    }
}
