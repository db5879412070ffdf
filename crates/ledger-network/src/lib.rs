//! In-process message transport connecting ledger nodes.
//!
//! Every node owns three mailboxes keyed by its id: pending transactions and
//! inbound blocks (both drained on read) and a published chain snapshot
//! (last write wins). Entries are kept as their JSON encoding, so nodes only
//! ever see decoded copies of each other's data. Each map is sharded, so
//! nodes touching different mailboxes do not contend on one lock.

pub mod node;
pub mod wallet;

use dashmap::DashMap;
use ledger_core::{chain::Chain, Block, LedgerResult, Transaction};
use tracing::{debug, warn};

pub type NodeId = String;

#[derive(Debug, Default)]
pub struct Network {
    neighbours: DashMap<NodeId, Vec<NodeId>>,
    transactions: DashMap<NodeId, Vec<String>>,
    blocks: DashMap<NodeId, Vec<String>>,
    chains: DashMap<NodeId, Snapshot>,
}

/// A published chain, with its length kept beside the encoding so peers can
/// skip snapshots that are not longer than their own without decoding them.
#[derive(Debug, Clone)]
struct Snapshot {
    length: usize,
    raw: String,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a network from a static `id -> neighbours` table.
    pub fn with_topology<I, N>(topology: I) -> Self
    where
        I: IntoIterator<Item = (NodeId, N)>,
        N: IntoIterator<Item = NodeId>,
    {
        let network = Self::new();
        for (id, neighbours) in topology {
            network.set_neighbours(&id, neighbours.into_iter().collect());
        }
        network
    }

    pub fn add_node(&self, id: &str) {
        self.neighbours.entry(id.to_string()).or_default();
    }

    pub fn set_neighbours(&self, id: &str, neighbours: Vec<NodeId>) {
        self.neighbours.insert(id.to_string(), neighbours);
    }

    /// Declares `a` and `b` as neighbours of each other.
    pub fn connect(&self, a: &str, b: &str) {
        for (from, to) in [(a, b), (b, a)] {
            let mut entry = self.neighbours.entry(from.to_string()).or_default();
            if !entry.iter().any(|n| n == to) {
                entry.push(to.to_string());
            }
        }
    }

    pub fn neighbours(&self, id: &str) -> Vec<NodeId> {
        self.neighbours
            .get(id)
            .map(|n| n.value().clone())
            .unwrap_or_default()
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.neighbours.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.neighbours.contains_key(id)
    }

    pub fn post_transaction(&self, tx: &Transaction, target: &str) -> LedgerResult<()> {
        let raw = tx.to_json()?;
        self.transactions
            .entry(target.to_string())
            .or_default()
            .push(raw);
        Ok(())
    }

    /// Drains the transaction mailbox of `id`. Each entry is delivered at most once.
    pub fn get_transactions(&self, id: &str) -> Vec<Transaction> {
        decode_all(drain(&self.transactions, id), id, Transaction::from_json)
    }

    pub fn post_block(&self, block: &Block, target: &str) -> LedgerResult<()> {
        let raw = block.to_json()?;
        self.push_block(raw, target);
        Ok(())
    }

    /// Posts `block` to every declared neighbour of `sender`. Returns the number of recipients.
    pub fn broadcast_block(&self, block: &Block, sender: &str) -> LedgerResult<usize> {
        let raw = block.to_json()?;
        let recipients: Vec<NodeId> = self
            .neighbours(sender)
            .into_iter()
            .filter(|n| n != sender)
            .collect();
        for target in &recipients {
            self.push_block(raw.clone(), target);
        }
        debug!(sender, recipients = recipients.len(), "block broadcast");
        Ok(recipients.len())
    }

    fn push_block(&self, raw: String, target: &str) {
        self.blocks.entry(target.to_string()).or_default().push(raw);
    }

    /// Drains the inbound block mailbox of `id`.
    pub fn get_blocks(&self, id: &str) -> Vec<Block> {
        decode_all(drain(&self.blocks, id), id, Block::from_json)
    }

    pub fn post_chain(&self, chain: &Chain, id: &str) -> LedgerResult<()> {
        let raw = chain.to_json()?;
        self.chains.insert(
            id.to_string(),
            Snapshot {
                length: chain.len(),
                raw,
            },
        );
        Ok(())
    }

    /// Length of the snapshot published by `id`, read without decoding it.
    pub fn chain_len(&self, id: &str) -> Option<usize> {
        self.chains.get(id).map(|s| s.length)
    }

    pub fn get_chain(&self, id: &str) -> Option<Chain> {
        let raw = self.chains.get(id)?.raw.clone();
        match Chain::from_json(&raw) {
            Ok(chain) => Some(chain),
            Err(e) => {
                warn!(node = id, error = %e, "dropping malformed chain snapshot");
                None
            }
        }
    }

    /// Current snapshots of the declared neighbours of `id`, in declaration order.
    /// Neighbours that have not published yet are skipped.
    pub fn get_neighbour_chains(&self, id: &str) -> Vec<(NodeId, Chain)> {
        self.neighbours(id)
            .into_iter()
            .filter(|n| n != id)
            .filter_map(|n| self.get_chain(&n).map(|chain| (n, chain)))
            .collect()
    }

    /// Like `get_neighbour_chains`, but only decodes snapshots longer than `length`.
    pub fn get_neighbour_chains_longer_than(
        &self,
        id: &str,
        length: usize,
    ) -> Vec<(NodeId, Chain)> {
        self.neighbours(id)
            .into_iter()
            .filter(|n| n != id)
            .filter(|n| self.chain_len(n).is_some_and(|len| len > length))
            .filter_map(|n| self.get_chain(&n).map(|chain| (n, chain)))
            .collect()
    }
}

fn drain(mailbox: &DashMap<NodeId, Vec<String>>, id: &str) -> Vec<String> {
    mailbox
        .get_mut(id)
        .map(|mut queue| std::mem::take(queue.value_mut()))
        .unwrap_or_default()
}

fn decode_all<T>(raw: Vec<String>, id: &str, decode: fn(&str) -> LedgerResult<T>) -> Vec<T> {
    raw.iter()
        .filter_map(|s| match decode(s) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(node = id, error = %e, "dropping malformed mailbox entry");
                None
            }
        })
        .collect()
}
