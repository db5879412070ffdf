use std::sync::Arc;

use ledger_core::{
    crypto::{Keypair, Signer},
    LedgerResult, Transaction,
};
use tracing::debug;

use crate::{Network, NodeId};

/// Signs transfers and hands them to a fixed set of nodes.
pub struct Wallet<S: Signer = Keypair> {
    signer: S,
    network: Arc<Network>,
    nodes: Vec<NodeId>,
}

impl Wallet<Keypair> {
    pub fn generate(network: Arc<Network>, nodes: Vec<NodeId>) -> Self {
        Self::new(Keypair::generate(), network, nodes)
    }
}

impl<S: Signer> Wallet<S> {
    pub fn new(signer: S, network: Arc<Network>, nodes: Vec<NodeId>) -> Self {
        Self {
            signer,
            network,
            nodes,
        }
    }

    pub fn address(&self) -> String {
        self.signer.address()
    }

    pub fn sign_transaction(&self, receiver_address: &str, value: u64) -> Transaction {
        Transaction::new(self.signer.address(), receiver_address, value).sign(&self.signer)
    }

    /// Signs a transfer and posts it to every node this wallet knows.
    pub fn send(&self, receiver_address: &str, value: u64) -> LedgerResult<Transaction> {
        let tx = self.sign_transaction(receiver_address, value);
        self.broadcast(&tx)?;
        Ok(tx)
    }

    pub fn broadcast(&self, tx: &Transaction) -> LedgerResult<()> {
        for node in &self.nodes {
            self.network.post_transaction(tx, node)?;
        }
        debug!(sender = %tx.sender_address, nodes = self.nodes.len(), "transaction posted");
        Ok(())
    }
}
