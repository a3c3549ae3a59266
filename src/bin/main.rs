//! tailscale-dns binary entry point.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tailscale_dns::api::{resolve_tailnet, Credentials};
use tailscale_dns::{
    corefile, telemetry, CliStatusSource, Config, DnsServer, Reconciler, RecordCache, RefreshLoop,
    SplitDnsApi, SplitDnsClient, StatusSource, Supervisor,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// DNS for Tailscale nodes with split-DNS registration.
#[derive(Parser, Debug)]
#[command(name = "tailscale-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML). Optional; environment variables
    /// prefixed with `TAILSCALE_DNS__` are applied on top.
    #[arg(short, long, default_value = "tailscale-dns.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the agent, the DNS listener and the responder (default).
    Run,
    /// Manage split-DNS registration against an already running agent.
    SplitDns {
        #[command(subcommand)]
        action: SplitDnsAction,
        /// Comma-separated domains, overriding the configured ones.
        #[arg(long)]
        domains: Option<String>,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum SplitDnsAction {
    /// Register this node for every domain.
    Init,
    /// Remove this node from every domain.
    Cleanup,
    /// Print the registry entries for every domain.
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()).required(false))
        .add_source(
            config::Environment::with_prefix("TAILSCALE_DNS")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("dns.domains")
                .with_list_parse_key("split_dns.domains")
                .with_list_parse_key("tailscale.advertise_tags")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    if let Some(Command::SplitDns {
        domains: Some(ref list),
        ..
    }) = args.command
    {
        config.split_dns.domains = tailscale_dns::config::parse_domains(list)?;
    }
    config.validate()?;

    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    let result = match args.command {
        None | Some(Command::Run) => run(config).await,
        Some(Command::SplitDns { action, .. }) => split_dns(config, action).await,
    };

    telemetry::shutdown();

    if let Err(e) = result {
        error!("tailscale-dns failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}

async fn run(config: Config) -> tailscale_dns::Result<()> {
    info!(
        hostname = %config.tailscale.hostname,
        domains = ?config.dns.domains,
        listen_addr = %config.dns.listen_addr,
        split_dns = config.split_dns.enabled,
        "Starting tailscale-dns"
    );

    corefile::write(&config).await?;

    let token = CancellationToken::new();
    let supervisor = Supervisor::new(
        config.tailscale.clone(),
        config.responder.clone(),
        token.clone(),
    );
    supervisor.cancel_on_signal();

    if let Err(e) = start_agent(&supervisor).await {
        error!("Failed to bring up tailscale: {}", e);
        supervisor.shutdown().await;
        return Err(e);
    }

    let source: Arc<dyn StatusSource> = Arc::new(CliStatusSource::from_config(&config.tailscale));
    let reconciler = match build_reconciler(&config, source.clone()).await {
        Ok(reconciler) => Arc::new(reconciler),
        Err(e) => {
            error!("Failed to set up split DNS: {}", e);
            supervisor.shutdown().await;
            return Err(e);
        }
    };

    if let Err(e) = serve(&config, &supervisor, source, reconciler.clone()).await {
        error!("Startup failed: {}", e);
        cleanup_split_dns(&reconciler).await;
        supervisor.shutdown().await;
        return Err(e);
    }

    info!("tailscale-dns is running");
    supervisor.wait_for_shutdown().await;

    cleanup_split_dns(&reconciler).await;
    let report = supervisor.shutdown().await;
    info!(graceful = report.graceful, killed = ?report.killed, "tailscale-dns shutdown complete");
    Ok(())
}

async fn start_agent(supervisor: &Supervisor) -> tailscale_dns::Result<()> {
    supervisor.start_agent().await?;
    supervisor.wait_for_socket().await?;
    supervisor.authenticate().await?;
    supervisor.wait_for_connection().await
}

/// Spawn the refresh loop and listener, register split DNS, then start the responder.
async fn serve(
    config: &Config,
    supervisor: &Supervisor,
    source: Arc<dyn StatusSource>,
    reconciler: Arc<Reconciler>,
) -> tailscale_dns::Result<()> {
    let token = supervisor.token().clone();
    let cache = RecordCache::new();

    let refresh = RefreshLoop::new(
        source,
        cache.clone(),
        config.dns.domains.clone(),
        config.dns.refresh_interval(),
        reconciler.clone(),
    );
    supervisor.spawn_task("refresh", refresh.run(token.clone()));

    let server = DnsServer::new(config.dns.clone(), cache);
    supervisor.spawn_task("dns-listener", server.run(token));

    reconciler.initialize().await?;
    supervisor.start_responder()?;
    Ok(())
}

async fn build_reconciler(
    config: &Config,
    source: Arc<dyn StatusSource>,
) -> tailscale_dns::Result<Reconciler> {
    if !config.split_dns.enabled {
        return Ok(Reconciler::disabled());
    }

    let client = build_client(config, source.as_ref()).await?;
    Ok(Reconciler::new(
        config.split_dns_domains().to_vec(),
        source,
        Arc::new(client),
    ))
}

async fn build_client(
    config: &Config,
    source: &dyn StatusSource,
) -> tailscale_dns::Result<SplitDnsClient> {
    let self_dns_name = match config.tailscale.tailnet {
        Some(_) => None,
        None => Some(source.status().await?.self_node.dns_name),
    };
    let tailnet = resolve_tailnet(
        config.tailscale.tailnet.as_deref(),
        self_dns_name.as_deref().filter(|name| !name.is_empty()),
    )?;
    info!(tailnet = %tailnet, "Using tailnet");

    SplitDnsClient::new(
        &config.split_dns.api_base_url,
        tailnet,
        Credentials {
            client_id: config.tailscale.client_id.clone(),
            client_secret: config.tailscale.client_secret.clone(),
        },
    )
}

async fn cleanup_split_dns(reconciler: &Reconciler) {
    if let Err(e) = reconciler.cleanup().await {
        warn!("Split DNS cleanup failed: {}", e);
    }
}

async fn split_dns(config: Config, action: SplitDnsAction) -> tailscale_dns::Result<()> {
    let source: Arc<dyn StatusSource> = Arc::new(CliStatusSource::from_config(&config.tailscale));
    let client = Arc::new(build_client(&config, source.as_ref()).await?);
    let domains = config.split_dns_domains().to_vec();

    match action {
        SplitDnsAction::Init => {
            Reconciler::new(domains, source, client).initialize().await?;
        }
        SplitDnsAction::Cleanup => {
            Reconciler::new(domains, source, client).cleanup().await?;
        }
        SplitDnsAction::Status => {
            let own_ip = source.status().await?.self_node.first_ipv4();
            let current = client.get().await?;
            for domain in &domains {
                let servers = current.get(domain).cloned().unwrap_or_default();
                let registered = own_ip
                    .map(|ip| servers.contains(&ip.to_string()))
                    .unwrap_or(false);
                println!(
                    "{domain}: [{}] registered={registered}",
                    servers.join(", ")
                );
            }
        }
    }

    Ok(())
}
