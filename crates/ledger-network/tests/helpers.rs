#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ledger_core::{
    chain::{genesis_block, Chain},
    crypto::{Keypair, Signer},
    mine::{mine_block, MineOutcome},
    Block, Transaction,
};
use ledger_network::{
    node::{Node, NodeConfig},
    Network, NodeId,
};

pub fn test_config(difficulty: u32) -> NodeConfig {
    NodeConfig {
        difficulty,
        mining_batch: 100,
        idle_backoff: Duration::from_millis(5),
    }
}

pub fn ids(list: &[&str]) -> Vec<NodeId> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Builds a network where every listed node is a neighbour of every other one.
pub fn full_mesh(nodes: &[&str]) -> Arc<Network> {
    let network = Network::new();
    for (i, a) in nodes.iter().enumerate() {
        network.add_node(a);
        for b in &nodes[i + 1..] {
            network.connect(a, b);
        }
    }
    Arc::new(network)
}

pub fn node(id: &str, network: &Arc<Network>, difficulty: u32) -> Node {
    Node::new(id, Arc::clone(network), genesis_block(), test_config(difficulty))
}

pub fn signed_tx(from: &Keypair, to: &str, value: u64) -> Transaction {
    Transaction::new(from.address(), to, value).sign(from)
}

/// Mines a block on top of `previous` without any node involved.
pub fn mine_on(previous: &Block, txs: Vec<Transaction>, difficulty: u32) -> Block {
    match mine_block(Block::new(previous.hash_hex(), txs), difficulty, 100, || false) {
        MineOutcome::Found(block) => block,
        MineOutcome::Interrupted { .. } => panic!("uninterruptible search was interrupted"),
    }
}

/// A valid chain of `extra` mined blocks on top of genesis.
pub fn mined_chain(extra: usize, difficulty: u32) -> Chain {
    let alice = Keypair::generate();
    let mut chain = Chain::default();
    for i in 0..extra {
        let block = mine_on(
            chain.tip().expect("chain has a genesis"),
            vec![signed_tx(&alice, "bob", i as u64 + 1)],
            difficulty,
        );
        chain.append(block, difficulty).expect("freshly mined block appends");
    }
    chain
}
