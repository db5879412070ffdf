use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ledger_core::{
    chain::Chain,
    constants::{DIFFICULTY, IDLE_BACKOFF_MS, MINING_BATCH},
    mine::{mine_block, MineOutcome},
    Block, Transaction,
};
use tracing::{debug, info, warn};

use crate::{Network, NodeId};

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub difficulty: u32,
    /// Nonce attempts between checks for competing blocks.
    pub mining_batch: u64,
    /// Pause taken when there is nothing to mine.
    pub idle_backoff: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            difficulty: DIFFICULTY,
            mining_batch: MINING_BATCH,
            idle_backoff: Duration::from_millis(IDLE_BACKOFF_MS),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    Idle,
    Mining,
    Broadcasting,
}

#[derive(Debug, PartialEq, Eq)]
pub enum MineResult {
    /// No valid transactions were waiting.
    Idle,
    /// A block was mined, appended locally and broadcast.
    Mined { hash: String },
    /// The tip moved or shutdown was requested while searching.
    Interrupted,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Resolution {
    Adopted { neighbour: NodeId, length: usize },
    ChainNotLonger,
}

impl Resolution {
    pub fn is_adopted(&self) -> bool {
        matches!(self, Resolution::Adopted { .. })
    }
}

/// A ledger participant. Owns its chain and talks to peers only through the `Network`.
pub struct Node {
    id: NodeId,
    chain: Chain,
    network: Arc<Network>,
    config: NodeConfig,
    /// Transactions drained from the mailbox whose block was abandoned.
    pending: Vec<Transaction>,
    state: NodeState,
    shutdown: Arc<AtomicBool>,
}

impl Node {
    pub fn new(
        id: impl Into<NodeId>,
        network: Arc<Network>,
        genesis: Block,
        config: NodeConfig,
    ) -> Self {
        let id = id.into();
        network.add_node(&id);
        Self {
            id,
            chain: Chain::new(genesis),
            network,
            config,
            pending: Vec::new(),
            state: NodeState::Idle,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shares one stop flag across several nodes.
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Mines one block from the waiting transactions on top of the current tip.
    ///
    /// Every `mining_batch` attempts the search drains inbound blocks and runs
    /// conflict resolution. If either moves the tip, the search is abandoned and
    /// the transactions not yet on the adopted chain are kept for the next round.
    pub fn mine(&mut self) -> MineResult {
        let mut txs = std::mem::take(&mut self.pending);
        txs.extend(self.network.get_transactions(&self.id));
        let id = &self.id;
        let chain = &self.chain;
        txs.retain(|tx| match tx.verify() {
            Ok(()) => true,
            Err(e) => {
                warn!(node = %id, error = %e, "dropping transaction");
                false
            }
        });
        // a wallet may post the same transfer to several nodes
        txs.retain(|tx| {
            let mined = chain.contains_transaction(tx);
            if mined {
                debug!(node = %id, sender = %tx.sender_address, "transaction already on chain");
            }
            !mined
        });
        if txs.is_empty() {
            self.state = NodeState::Idle;
            return MineResult::Idle;
        }
        let Some(previous_hash) = self.chain.tip_hash() else {
            self.pending = txs;
            return MineResult::Idle;
        };

        self.state = NodeState::Mining;
        debug!(node = %self.id, txs = txs.len(), "mining started");
        let candidate = Block::new(previous_hash, txs.clone());
        let difficulty = self.config.difficulty;
        let batch = self.config.mining_batch;
        let shutdown = Arc::clone(&self.shutdown);
        let outcome = mine_block(candidate, difficulty, batch, || {
            shutdown.load(Ordering::Relaxed)
                || self.add_blocks()
                || self.resolve_conflicts().is_adopted()
        });

        let block = match outcome {
            MineOutcome::Found(block) => block,
            MineOutcome::Interrupted { attempts } => {
                info!(node = %self.id, attempts, "mining abandoned");
                self.requeue(txs);
                self.state = NodeState::Idle;
                return MineResult::Interrupted;
            }
        };

        let hash = block.hash_hex();
        if let Err(e) = self.chain.append(block.clone(), difficulty) {
            warn!(node = %self.id, error = %e, "mined block rejected by own chain");
            self.requeue(txs);
            self.state = NodeState::Idle;
            return MineResult::Interrupted;
        }

        self.state = NodeState::Broadcasting;
        match self.network.broadcast_block(&block, &self.id) {
            Ok(recipients) => info!(
                node = %self.id,
                %hash,
                height = self.chain.len(),
                recipients,
                "mined block"
            ),
            Err(e) => warn!(node = %self.id, error = %e, "broadcast failed"),
        }
        self.state = NodeState::Idle;
        MineResult::Mined { hash }
    }

    fn requeue(&mut self, txs: Vec<Transaction>) {
        let chain = &self.chain;
        let keep: Vec<Transaction> = txs
            .into_iter()
            .filter(|tx| !chain.contains_transaction(tx))
            .collect();
        self.pending = keep;
    }

    /// Drains inbound blocks, appending each one that extends the tip and keeps
    /// the chain valid. Returns whether anything was appended.
    pub fn add_blocks(&mut self) -> bool {
        let mut added = false;
        for block in self.network.get_blocks(&self.id) {
            let hash = block.hash_hex();
            match self.chain.append(block, self.config.difficulty) {
                Ok(()) => {
                    info!(node = %self.id, %hash, height = self.chain.len(), "accepted block");
                    added = true;
                }
                Err(e) => debug!(node = %self.id, %hash, error = %e, "rejected block"),
            }
        }
        added
    }

    /// Adopts the longest valid neighbour chain if it is strictly longer than ours.
    ///
    /// Ties keep the current chain. Among equally long candidates the first in
    /// neighbour order wins.
    pub fn resolve_conflicts(&mut self) -> Resolution {
        let mut best: Option<(NodeId, Chain)> = None;
        let candidates = self
            .network
            .get_neighbour_chains_longer_than(&self.id, self.chain.len());
        for (neighbour, chain) in candidates {
            let longest = best.as_ref().map_or(self.chain.len(), |(_, c)| c.len());
            if chain.len() <= longest {
                continue;
            }
            if let Err(e) = chain.validate(self.config.difficulty) {
                debug!(node = %self.id, %neighbour, error = %e, "ignoring invalid chain");
                continue;
            }
            best = Some((neighbour, chain));
        }

        match best {
            Some((neighbour, chain)) => {
                let length = chain.len();
                self.chain = chain;
                info!(node = %self.id, %neighbour, length, "adopted longer chain");
                Resolution::Adopted { neighbour, length }
            }
            None => Resolution::ChainNotLonger,
        }
    }

    pub fn publish(&self) {
        if let Err(e) = self.network.post_chain(&self.chain, &self.id) {
            warn!(node = %self.id, error = %e, "failed to publish chain");
        }
    }

    /// One iteration of the work loop.
    pub fn step(&mut self) {
        if self.mine() == MineResult::Idle {
            thread::sleep(self.config.idle_backoff);
        }
        self.add_blocks();
        self.publish();
        self.resolve_conflicts();
    }

    /// Runs the work loop until the shutdown flag is raised, then hands back the chain.
    pub fn run(mut self) -> Chain {
        info!(node = %self.id, difficulty = self.config.difficulty, "node started");
        while !self.shutdown.load(Ordering::Relaxed) {
            self.step();
        }
        self.publish();
        info!(node = %self.id, height = self.chain.len(), "node stopped");
        self.chain
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<Chain>> {
        thread::Builder::new()
            .name(format!("node-{}", self.id))
            .spawn(move || self.run())
    }
}
