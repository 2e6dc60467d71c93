use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use stampede_engine::{stock_key, EngineConfig, ReservationEngine, ReserveError};
use stampede_lock::{QuorumLock, SingleNodeLock, StockLock};
use stampede_node::{MemoryNode, NodeCommands, RedisNode};
use stampede_store::{MemoryStore, Product, PurchaseStore};

#[derive(Parser)]
#[command(name = "stampede-admin")]
#[command(about = "Operate stampede coordination nodes", long_about = None)]
struct Cli {
    /// Engine configuration file (JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror a durable stock value onto every configured node.
    Seed {
        product_id: u64,
        quantity: u64,
    },

    /// Read the admission-cache counter for a product from every node.
    Stock {
        product_id: u64,
    },

    /// Run an in-memory flash-sale simulation and print the tallies.
    Simulate {
        /// Concurrent buyers.
        #[arg(long, default_value_t = 300)]
        buyers: usize,

        /// Initial stock, seeded on every simulated node.
        #[arg(long, default_value_t = 100)]
        stock: u64,

        /// Units per buyer.
        #[arg(long, default_value_t = 1)]
        quantity: u64,

        /// Simulated coordination nodes; more than one enables the quorum
        /// lock.
        #[arg(long, default_value_t = 5)]
        nodes: usize,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let path = path.context("--config is required for this command")?;
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: EngineConfig =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

async fn connect_nodes(config: &EngineConfig) -> Result<Vec<Arc<dyn NodeCommands>>> {
    let mut nodes: Vec<Arc<dyn NodeCommands>> = Vec::with_capacity(config.nodes.len());
    for addr in &config.nodes {
        let node = RedisNode::connect(addr, config.node_timeout())
            .await
            .with_context(|| format!("connecting to node {addr}"))?;
        nodes.push(Arc::new(node));
    }
    Ok(nodes)
}

async fn seed(config: EngineConfig, product_id: u64, quantity: u64) -> Result<()> {
    let key = stock_key(product_id);
    for node in connect_nodes(&config).await? {
        node.seed_stock(&key, quantity)
            .await
            .with_context(|| format!("seeding node {}", node.addr()))?;
        info!("seeded {} = {quantity} on {}", key, node.addr());
    }
    println!("seeded product {product_id} with {quantity} unit(s) on {} node(s)", config.nodes.len());
    Ok(())
}

async fn stock(config: EngineConfig, product_id: u64) -> Result<()> {
    let key = stock_key(product_id);
    for node in connect_nodes(&config).await? {
        match node.read_stock(&key).await {
            Ok(Some(value)) => println!("{}\t{value}", node.addr()),
            Ok(None) => println!("{}\t<missing>", node.addr()),
            Err(e) => println!("{}\t<error: {e}>", node.addr()),
        }
    }
    Ok(())
}

async fn simulate(buyers: usize, stock: u64, quantity: u64, node_count: usize) -> Result<()> {
    if node_count == 0 {
        bail!("at least one simulated node is required");
    }
    let use_quorum = node_count > 1;
    let nodes: Vec<Arc<MemoryNode>> = (0..node_count)
        .map(|i| Arc::new(MemoryNode::new(format!("sim-{i}"))))
        .collect();
    let dyn_nodes: Vec<Arc<dyn NodeCommands>> = nodes
        .iter()
        .map(|n| Arc::clone(n) as Arc<dyn NodeCommands>)
        .collect();

    let config = EngineConfig {
        use_quorum,
        nodes: (0..node_count).map(|i| format!("sim-{i}")).collect(),
        lock_ttl_ms: 2_000,
        node_timeout_ms: 200,
        max_retries: 20,
        base_delay_ms: 1,
        max_delay_ms: 4,
        safety_margin_ms: 20,
        ..EngineConfig::default()
    };
    let lock: Arc<dyn StockLock> = if use_quorum {
        Arc::new(QuorumLock::new(dyn_nodes, config.node_timeout())?)
    } else {
        Arc::new(SingleNodeLock::new(Arc::clone(&dyn_nodes[0])))
    };

    let store = Arc::new(MemoryStore::new());
    store.add_product(
        Product {
            id: 1,
            name: "simulated-drop".to_string(),
            price_cents: 4_999,
        },
        stock,
    );
    let engine = Arc::new(ReservationEngine::new(
        lock,
        Arc::clone(&store) as Arc<dyn PurchaseStore>,
        config,
    )?);
    engine
        .seed_stock(1, stock)
        .await
        .map_err(|e| anyhow::anyhow!("seeding simulation: {e}"))?;

    let mut handles = Vec::with_capacity(buyers);
    for i in 0..buyers {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let mut last = ReserveError::Busy;
            for _ in 0..500 {
                match engine.reserve(1, quantity, &format!("buyer-{i}")).await {
                    Ok(_) => return Ok(()),
                    Err(e) if e.retryable() => {
                        last = e;
                        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(last)
        }));
    }

    let mut successes = 0u64;
    let mut refused = 0u64;
    let mut other = 0u64;
    for handle in handles {
        match handle.await? {
            Ok(()) => successes += 1,
            Err(ReserveError::InsufficientStock { .. }) => refused += 1,
            Err(_) => other += 1,
        }
    }

    println!("buyers:            {buyers}");
    println!("successes:         {successes}");
    println!("insufficient:      {refused}");
    println!("other failures:    {other}");
    println!("durable purchases: {}", store.purchases().len());
    println!(
        "durable stock:     {}",
        store.durable_stock(1).await.map_err(|e| anyhow::anyhow!("{e}"))?
    );
    for node in &nodes {
        println!(
            "node {}:        {:?}",
            node.addr(),
            node.stock(&stock_key(1))
        );
    }
    println!(
        "metrics:           {}",
        serde_json::to_string(&engine.metrics().snapshot(1))?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Seed {
            product_id,
            quantity,
        } => seed(load_config(cli.config.as_ref())?, product_id, quantity).await,
        Commands::Stock { product_id } => {
            stock(load_config(cli.config.as_ref())?, product_id).await
        }
        Commands::Simulate {
            buyers,
            stock,
            quantity,
            nodes,
        } => simulate(buyers, stock, quantity, nodes).await,
    }
}
