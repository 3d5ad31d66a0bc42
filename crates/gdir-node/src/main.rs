use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use gdir_directory::{
    ClusterMembership, DirectoryConfig, DirectoryOptions, GrainDirectory, MembershipSnapshot,
    MultiClusterConfig, MultiClusterTopology, Reconciler, RetryConfig, SiloDeathWatcher,
    StaticMembership, StrategyConfig, StrategyTable,
};
use gdir_server::{serve_client, serve_cluster, GrpcRemoteClusters};
use gdir_storage::{DirectoryStore, FjallDirectoryStore, MemDirectoryStore};
use gdir_types::{ClusterId, MembershipVersion, SiloAddress};

#[derive(clap::Parser, Debug)]
#[command(name = "gdir-node", about = "Grain directory node")]
struct Cli {
    /// Generation of the silo this node runs in.
    #[arg(long)]
    silo_generation: i64,
    #[arg(long, default_value = "0.0.0.0:17100")]
    client_addr: String,
    #[arg(long, default_value = "0.0.0.0:17101")]
    cluster_addr: String,
    /// Additional live silos: "host:port@generation", repeatable
    #[arg(long = "silo")]
    silos: Vec<String>,
    /// Peer cluster specs: "cluster_id=url" format, repeatable
    #[arg(long = "peer")]
    peers: Vec<String>,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides `storage.data_dir`.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct StorageConfig {
    backend: String,
    data_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ObservabilityConfig {
    log_level: String,
    log_format: String,
}

#[derive(Debug, Deserialize)]
struct Config {
    directory: DirectoryConfig,
    retry: RetryConfig,
    multi_cluster: MultiClusterConfig,
    strategy: StrategyConfig,
    storage: StorageConfig,
    observability: ObservabilityConfig,
}

fn parse_silo(spec: &str) -> anyhow::Result<SiloAddress> {
    let (endpoint, generation) = spec
        .rsplit_once('@')
        .with_context(|| format!("silo '{spec}' must be host:port@generation"))?;
    let endpoint: SocketAddr = endpoint.parse().with_context(|| format!("invalid silo endpoint: {endpoint}"))?;
    let generation: i64 = generation.parse().with_context(|| format!("invalid silo generation: {generation}"))?;
    Ok(SiloAddress::new(endpoint, generation))
}

fn parse_peer(spec: &str) -> anyhow::Result<(String, String)> {
    let (id, url) = spec
        .split_once('=')
        .with_context(|| format!("peer '{spec}' must be cluster_id=url"))?;
    Ok((id.to_string(), url.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;
    let cli = Cli::parse();

    let mut figment = Figment::new()
        .merge(Toml::string(include_str!("../../../config/default.toml")));

    if let Some(ref config_path) = cli.config {
        figment = figment.merge(Toml::file_exact(config_path));
    }

    let mut config: Config = figment
        .merge(Env::prefixed("GRAINDIR_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    match config.observability.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(&config.observability.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(&config.observability.log_level)
                .init();
        }
    }

    for spec in &cli.peers {
        let (id, url) = parse_peer(spec)?;
        config.multi_cluster.peers.insert(id, url);
    }
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.clone();
    }

    tracing::info!(
        cluster = %config.directory.cluster_id,
        provider = %config.directory.provider_id,
        client_addr = %cli.client_addr,
        cluster_addr = %cli.cluster_addr,
        backend = %config.storage.backend,
        "node starting"
    );

    match config.storage.backend.as_str() {
        "fjall" => {
            let store = FjallDirectoryStore::open(&config.storage.data_dir)
                .with_context(|| format!("failed to open store at {}", config.storage.data_dir.display()))?;
            run(cli, config, Arc::new(store)).await
        }
        "memory" => run(cli, config, Arc::new(MemDirectoryStore::new())).await,
        other => anyhow::bail!("unknown storage backend '{other}'"),
    }
}

async fn run<S: DirectoryStore>(cli: Cli, config: Config, store: Arc<S>) -> anyhow::Result<()> {
    let client_addr: SocketAddr = cli
        .client_addr
        .parse()
        .with_context(|| format!("invalid client_addr: {}", cli.client_addr))?;
    let cluster_addr: SocketAddr = cli
        .cluster_addr
        .parse()
        .with_context(|| format!("invalid cluster_addr: {}", cli.cluster_addr))?;

    let mut live_silos = vec![SiloAddress::new(client_addr, cli.silo_generation)];
    for spec in &cli.silos {
        live_silos.push(parse_silo(spec)?);
    }
    let membership = Arc::new(StaticMembership::new(MembershipSnapshot {
        version: MembershipVersion(1),
        live_silos: live_silos.into_iter().collect(),
        dead_silos: Default::default(),
        topology: MultiClusterTopology::new(config.multi_cluster.clusters.iter().cloned().map(ClusterId::new)),
    }));

    let remotes = Arc::new(GrpcRemoteClusters::new(
        config
            .multi_cluster
            .peers
            .iter()
            .map(|(id, url)| (ClusterId::new(id.clone()), url.clone())),
        Duration::from_millis(config.multi_cluster.query_timeout_ms),
    ));

    let options = DirectoryOptions::from_config(&config.directory, &config.retry, &config.multi_cluster);
    let directory = Arc::new(GrainDirectory::new(
        options,
        StrategyTable::from_config(&config.strategy),
        store,
        membership.clone(),
        remotes,
    ));
    tracing::info!(
        version = %membership.version(),
        clusters = config.multi_cluster.clusters.len(),
        "directory ready"
    );

    let (evictions_tx, mut evictions_rx) = tokio::sync::mpsc::channel(1024);
    let reconciler = Reconciler::new(directory.clone(), config.multi_cluster.reconcile_interval(), evictions_tx);
    tokio::spawn(reconciler.run());
    tokio::spawn(SiloDeathWatcher::new(directory.clone()).run());
    tokio::spawn(async move {
        while let Some(notice) = evictions_rx.recv().await {
            tracing::warn!(loser = %notice.loser, winner = %notice.winner, "activation lost cross-cluster race");
        }
    });

    tokio::try_join!(
        serve_client(client_addr, directory.clone()),
        serve_cluster(cluster_addr, directory),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses() {
        let config: Config = Figment::new()
            .merge(Toml::string(include_str!("../../../config/default.toml")))
            .extract()
            .unwrap();
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.directory.freshness_window, 1);
        assert!(config.multi_cluster.clusters.is_empty());
        assert_eq!(config.strategy.default, gdir_directory::RegistrationStrategy::ClusterLocal);
    }

    #[test]
    fn silo_and_peer_specs() {
        let silo = parse_silo("10.0.0.4:11111@7").unwrap();
        assert_eq!(silo.generation, 7);
        assert!(parse_silo("10.0.0.4:11111").is_err());
        assert_eq!(
            parse_peer("eu=http://eu:17101").unwrap(),
            ("eu".to_string(), "http://eu:17101".to_string())
        );
        assert!(parse_peer("eu").is_err());
    }
}
