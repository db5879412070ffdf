mod constants;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use clap::{Parser, ValueEnum};
use constants::{DEFAULT_LISTEN, DEFAULT_NODE_COUNT, NODE_ID_PREFIX};
use ledger_core::{
    chain::{genesis_block, Chain},
    constants::{DIFFICULTY, HASH_HEX_SIZE, IDLE_BACKOFF_MS, MINING_BATCH},
    Transaction,
};
use ledger_network::{
    node::{Node, NodeConfig},
    Network, NodeId,
};
use serde::Serialize;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, default_value = DEFAULT_LISTEN)]
    listen: String,

    /// Number of nodes to run in this process
    #[arg(long, default_value_t = DEFAULT_NODE_COUNT)]
    nodes: usize,

    /// How nodes are wired together
    #[arg(long, value_enum, default_value_t = Topology::Full)]
    topology: Topology,

    /// Leading zero hex characters required in a block hash
    #[arg(long, default_value_t = DIFFICULTY)]
    difficulty: u32,

    /// Nonce attempts between checks for competing blocks
    #[arg(long, default_value_t = MINING_BATCH)]
    mining_batch: u64,

    /// Pause in milliseconds when a node has nothing to mine
    #[arg(long, default_value_t = IDLE_BACKOFF_MS)]
    idle_backoff_ms: u64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Topology {
    /// Each node talks to the next one, both ways
    Ring,
    /// Every node talks to every other node
    Full,
}

fn check_args(args: &Args) -> anyhow::Result<()> {
    anyhow::ensure!(args.nodes > 0, "at least one node is required");
    anyhow::ensure!(
        args.difficulty as usize <= HASH_HEX_SIZE,
        "difficulty {} can never be met by a {HASH_HEX_SIZE} character hash",
        args.difficulty
    );
    Ok(())
}

fn build_network(ids: &[NodeId], topology: Topology) -> Network {
    let network = Network::new();
    for id in ids {
        network.add_node(id);
    }
    match topology {
        Topology::Ring if ids.len() > 1 => {
            for (i, id) in ids.iter().enumerate() {
                network.connect(id, &ids[(i + 1) % ids.len()]);
            }
        }
        Topology::Ring => {}
        Topology::Full => {
            for (i, a) in ids.iter().enumerate() {
                for b in &ids[i + 1..] {
                    network.connect(a, b);
                }
            }
        }
    }
    network
}

#[derive(Clone)]
struct AppState {
    network: Arc<Network>,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize)]
struct NodeSummary {
    id: NodeId,
    height: usize,
    tip: Option<String>,
    neighbours: Vec<NodeId>,
}

#[derive(Serialize)]
struct TxAccepted {
    accepted: bool,
    node: NodeId,
}

async fn list_nodes(State(state): State<AppState>) -> Json<Vec<NodeSummary>> {
    let nodes = state
        .network
        .nodes()
        .into_iter()
        .map(|id| {
            let chain = state.network.get_chain(&id);
            NodeSummary {
                height: chain.as_ref().map_or(0, Chain::len),
                tip: chain.as_ref().and_then(Chain::tip_hash),
                neighbours: state.network.neighbours(&id),
                id,
            }
        })
        .collect();
    Json(nodes)
}

async fn node_chain(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Chain>, StatusCode> {
    state
        .network
        .get_chain(&id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn submit_tx(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(tx): Json<Transaction>,
) -> Result<(StatusCode, Json<TxAccepted>), (StatusCode, String)> {
    if !state.network.contains(&id) {
        return Err((StatusCode::NOT_FOUND, format!("unknown node {id}")));
    }
    tx.verify()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    state
        .network
        .post_transaction(&tx, &id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TxAccepted {
            accepted: true,
            node: id,
        }),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    check_args(&args)?;

    let ids: Vec<NodeId> = (0..args.nodes)
        .map(|i| format!("{NODE_ID_PREFIX}-{i}"))
        .collect();
    let network = Arc::new(build_network(&ids, args.topology));
    let config = NodeConfig {
        difficulty: args.difficulty,
        mining_batch: args.mining_batch,
        idle_backoff: Duration::from_millis(args.idle_backoff_ms),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let genesis = genesis_block();
    let mut handles = Vec::with_capacity(ids.len());
    for id in &ids {
        let node = Node::new(id.clone(), Arc::clone(&network), genesis.clone(), config.clone())
            .with_shutdown(Arc::clone(&shutdown));
        node.publish();
        handles.push(node.spawn()?);
    }
    info!(
        nodes = ids.len(),
        topology = ?args.topology,
        difficulty = args.difficulty,
        "network started"
    );

    let state = AppState {
        network: Arc::clone(&network),
    };
    let app = Router::new()
        .route("/health", get(|| async { Json(Health { status: "ok" }) }))
        .route("/nodes", get(list_nodes))
        .route("/nodes/{id}/chain", get(node_chain))
        .route("/nodes/{id}/tx", post(submit_tx))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = args.listen.parse()?;
    info!("ledger-node listening on http://{addr}");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
        })
        .await?;

    info!("stopping nodes");
    shutdown.store(true, Ordering::Relaxed);
    let finished = tokio::task::spawn_blocking(move || {
        handles
            .into_iter()
            .map(|h| h.join())
            .collect::<Vec<_>>()
    })
    .await?;
    for (id, result) in ids.iter().zip(finished) {
        match result {
            Ok(chain) => {
                info!(node = %id, height = chain.len(), tip = ?chain.tip_hash(), "final chain")
            }
            Err(_) => warn!(node = %id, "node thread panicked"),
        }
    }
    Ok(())
}
