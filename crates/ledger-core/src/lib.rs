pub mod constants;
pub mod crypto;
pub mod error;
pub mod mine;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::crypto::Signer;
pub use crate::error::{LedgerError, LedgerResult};

pub type Hash = [u8; 32];

/// Milliseconds since the unix epoch, or 0 if the clock sits before it.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn finalize(hasher: Sha256) -> Hash {
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..]);
    out
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender_address: String,
    pub receiver_address: String,
    pub value: u64,
    /// Hex encoded signature over `signing_bytes()`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Transaction {
    pub fn new(
        sender_address: impl Into<String>,
        receiver_address: impl Into<String>,
        value: u64,
    ) -> Self {
        Self {
            sender_address: sender_address.into(),
            receiver_address: receiver_address.into(),
            value,
            signature: None,
        }
    }

    /// Canonical payload covered by the signature. The signature itself is excluded.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes =
            Vec::with_capacity(8 + self.sender_address.len() + 8 + self.receiver_address.len() + 8);
        put_bytes(&mut bytes, self.sender_address.as_bytes());
        put_bytes(&mut bytes, self.receiver_address.as_bytes());
        bytes.extend_from_slice(&self.value.to_le_bytes());
        bytes
    }

    /// Canonical encoding used when the transaction is hashed as part of a block.
    pub fn hash_bytes(&self) -> Vec<u8> {
        let mut bytes = self.signing_bytes();
        put_bytes(
            &mut bytes,
            self.signature.as_deref().unwrap_or_default().as_bytes(),
        );
        bytes
    }

    pub fn sign<S: Signer>(mut self, signer: &S) -> Self {
        self.signature = Some(hex::encode(signer.sign(&self.signing_bytes())));
        self
    }

    pub fn verify(&self) -> LedgerResult<()> {
        let signature = self
            .signature
            .as_deref()
            .ok_or_else(|| LedgerError::SignatureMissing {
                sender: self.sender_address.clone(),
            })?;
        let signature = hex::decode(signature).map_err(|_| LedgerError::SignatureInvalid {
            sender: self.sender_address.clone(),
        })?;
        crypto::verify(&self.sender_address, &self.signing_bytes(), &signature)
    }

    pub fn is_valid(&self) -> bool {
        self.verify().is_ok()
    }

    pub fn to_json(&self) -> LedgerResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> LedgerResult<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    /// Hex digest of the predecessor, or `"0"` for genesis.
    pub previous_hash: String,
    pub nonce: u64,
}

impl Block {
    pub fn new(previous_hash: impl Into<String>, transactions: Vec<Transaction>) -> Self {
        Self {
            timestamp: now_millis(),
            transactions,
            previous_hash: previous_hash.into(),
            nonce: 0,
        }
    }

    /// Hasher primed with every field except the nonce. Mining clones it per attempt.
    pub fn prefix_hasher(&self) -> Sha256 {
        let mut bytes = Vec::with_capacity(16 + self.previous_hash.len() + 8);
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&(self.transactions.len() as u64).to_le_bytes());
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        for tx in &self.transactions {
            let mut tx_bytes = Vec::new();
            put_bytes(&mut tx_bytes, &tx.hash_bytes());
            hasher.update(&tx_bytes);
        }
        bytes.clear();
        put_bytes(&mut bytes, self.previous_hash.as_bytes());
        hasher.update(&bytes);
        hasher
    }

    pub fn hash(&self) -> Hash {
        hash_with_nonce(self.prefix_hasher(), self.nonce)
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash())
    }

    pub fn to_json(&self) -> LedgerResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> LedgerResult<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

pub(crate) fn hash_with_nonce(mut prefix: Sha256, nonce: u64) -> Hash {
    prefix.update(nonce.to_le_bytes());
    finalize(prefix)
}

pub mod pow {
    use super::{Block, Hash};

    /// Number of leading `'0'` characters in the hex rendering of `hash`.
    pub fn count_leading_zero_nibbles(hash: &Hash) -> u32 {
        let mut total = 0u32;
        for b in hash {
            if *b == 0 {
                total += 2;
            } else {
                if *b < 0x10 {
                    total += 1;
                }
                break;
            }
        }
        total
    }

    pub fn meets_difficulty(hash: &Hash, difficulty: u32) -> bool {
        count_leading_zero_nibbles(hash) >= difficulty
    }

    pub fn valid_proof(block: &Block, difficulty: u32) -> bool {
        meets_difficulty(&block.hash(), difficulty)
    }
}

pub mod chain {
    use super::*;
    use crate::constants::GENESIS_PREVIOUS_HASH;

    /// The shared genesis block. Its timestamp is fixed so every node starts from the same tip.
    pub fn genesis_block() -> Block {
        Block {
            timestamp: 0,
            transactions: vec![],
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            nonce: 0,
        }
    }

    pub fn is_genesis(block: &Block) -> bool {
        block.previous_hash == GENESIS_PREVIOUS_HASH && block.transactions.is_empty()
    }

    /// Link, signatures, then proof-of-work.
    pub fn validate_block(block: &Block, previous: &Block, difficulty: u32) -> LedgerResult<()> {
        let expected = previous.hash_hex();
        if block.previous_hash != expected {
            return Err(LedgerError::ChainLinkInvalid {
                expected,
                found: block.previous_hash.clone(),
            });
        }
        for tx in &block.transactions {
            tx.verify()?;
        }
        if !pow::valid_proof(block, difficulty) {
            return Err(LedgerError::ProofInvalid {
                hash: block.hash_hex(),
                difficulty,
            });
        }
        Ok(())
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Chain {
        blocks: Vec<Block>,
    }

    impl Default for Chain {
        fn default() -> Self {
            Self::new(genesis_block())
        }
    }

    impl Chain {
        pub fn new(genesis: Block) -> Self {
            Self {
                blocks: vec![genesis],
            }
        }

        /// Wraps blocks as received. Nothing is checked until `validate`.
        pub fn from_blocks(blocks: Vec<Block>) -> Self {
            Self { blocks }
        }

        pub fn blocks(&self) -> &[Block] {
            &self.blocks
        }

        pub fn len(&self) -> usize {
            self.blocks.len()
        }

        pub fn is_empty(&self) -> bool {
            self.blocks.is_empty()
        }

        pub fn tip(&self) -> Option<&Block> {
            self.blocks.last()
        }

        pub fn tip_hash(&self) -> Option<String> {
            self.tip().map(Block::hash_hex)
        }

        pub fn contains_transaction(&self, tx: &Transaction) -> bool {
            self.blocks.iter().any(|b| b.transactions.contains(tx))
        }

        pub fn validate(&self, difficulty: u32) -> LedgerResult<()> {
            let genesis = self.blocks.first().ok_or(LedgerError::EmptyChain)?;
            if !is_genesis(genesis) {
                return Err(LedgerError::GenesisInvalid);
            }
            for pair in self.blocks.windows(2) {
                validate_block(&pair[1], &pair[0], difficulty)?;
            }
            Ok(())
        }

        pub fn is_valid(&self, difficulty: u32) -> bool {
            self.validate(difficulty).is_ok()
        }

        /// Appends `block` if it extends the tip and the extended chain still validates.
        pub fn append(&mut self, block: Block, difficulty: u32) -> LedgerResult<()> {
            let tip = self.tip().ok_or(LedgerError::EmptyChain)?;
            validate_block(&block, tip, difficulty)?;
            self.blocks.push(block);
            if let Err(e) = self.validate(difficulty) {
                self.blocks.pop();
                return Err(e);
            }
            Ok(())
        }

        pub fn to_json(&self) -> LedgerResult<String> {
            Ok(serde_json::to_string(self)?)
        }

        pub fn from_json(s: &str) -> LedgerResult<Self> {
            Ok(serde_json::from_str(s)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::chain::{genesis_block, validate_block, Chain};
    use super::crypto::{Keypair, Signer};
    use super::mine::{mine_block, MineOutcome};
    use super::*;

    fn signed_tx(from: &Keypair, to: &str, value: u64) -> Transaction {
        Transaction::new(from.address(), to, value).sign(from)
    }

    fn mined(previous: &Block, txs: Vec<Transaction>, difficulty: u32) -> Block {
        let block = Block::new(previous.hash_hex(), txs);
        match mine_block(block, difficulty, 100, || false) {
            MineOutcome::Found(b) => b,
            MineOutcome::Interrupted { .. } => panic!("uninterruptible search was interrupted"),
        }
    }

    #[test]
    fn leading_zero_nibble_examples() {
        let mut h = [0u8; 32];
        assert_eq!(pow::count_leading_zero_nibbles(&h), 64);
        h[0] = 0x0F;
        assert_eq!(pow::count_leading_zero_nibbles(&h), 1);
        h[0] = 0x10;
        assert_eq!(pow::count_leading_zero_nibbles(&h), 0);
        h = [0u8; 32];
        h[1] = 0x01; // "0001..."
        assert_eq!(pow::count_leading_zero_nibbles(&h), 3);
        assert!(pow::meets_difficulty(&h, 3));
        assert!(!pow::meets_difficulty(&h, 4));
    }

    #[test]
    fn signed_transaction_verifies() {
        let alice = Keypair::generate();
        let tx = signed_tx(&alice, "bob", 10);
        assert!(tx.signature.is_some());
        tx.verify().unwrap();
    }

    #[test]
    fn tampered_transaction_fails_verification() {
        let alice = Keypair::generate();
        let mallory = Keypair::generate();
        let tx = signed_tx(&alice, "bob", 10);

        let mut more = tx.clone();
        more.value = 1_000;
        assert!(!more.is_valid());

        let mut redirected = tx.clone();
        redirected.receiver_address = mallory.address();
        assert!(!redirected.is_valid());

        let mut spoofed = tx;
        spoofed.sender_address = mallory.address();
        assert!(matches!(
            spoofed.verify(),
            Err(LedgerError::SignatureInvalid { .. })
        ));
    }

    #[test]
    fn unsigned_transaction_is_rejected() {
        let alice = Keypair::generate();
        let tx = Transaction::new(alice.address(), "bob", 1);
        assert!(matches!(
            tx.verify(),
            Err(LedgerError::SignatureMissing { .. })
        ));
    }

    #[test]
    fn garbage_sender_address_is_rejected() {
        let alice = Keypair::generate();
        let mut tx = signed_tx(&alice, "bob", 1);
        tx.sender_address = "not-hex".into();
        assert!(matches!(tx.verify(), Err(LedgerError::InvalidKey(_))));
    }

    #[test]
    fn keypair_round_trips_through_secret_hex() {
        let kp = Keypair::generate();
        let restored = Keypair::from_secret_hex(&kp.secret_hex()).unwrap();
        assert_eq!(kp.address(), restored.address());
        assert!(Keypair::from_secret_hex("abcd").is_err());
    }

    #[test]
    fn block_hash_consistency() {
        let block = Block {
            timestamp: 1_600_000_200,
            transactions: vec![Transaction::new("alice", "bob", 10)],
            previous_hash: "0".into(),
            nonce: 7,
        };
        assert_eq!(block.hash(), block.hash());
        assert_eq!(block.hash_hex().len(), constants::HASH_HEX_SIZE);
    }

    #[test]
    fn block_hash_covers_every_field() {
        let base = Block {
            timestamp: 1_600_000_200,
            transactions: vec![Transaction::new("alice", "bob", 10)],
            previous_hash: "abc".into(),
            nonce: 0,
        };
        let mut other = base.clone();
        other.nonce += 1;
        assert_ne!(base.hash(), other.hash());

        let mut other = base.clone();
        other.timestamp += 1;
        assert_ne!(base.hash(), other.hash());

        let mut other = base.clone();
        other.previous_hash = "abd".into();
        assert_ne!(base.hash(), other.hash());

        let mut other = base.clone();
        other.transactions[0].value = 11;
        assert_ne!(base.hash(), other.hash());
    }

    #[test]
    fn transaction_order_matters() {
        let a = Transaction::new("alice", "bob", 1);
        let b = Transaction::new("bob", "carol", 2);
        let mut block = Block::new("0", vec![a.clone(), b.clone()]);
        let first = block.hash();
        block.transactions = vec![b, a];
        assert_ne!(first, block.hash());
    }

    #[test]
    fn block_serialization_preserves_hash() {
        let alice = Keypair::generate();
        let genesis = genesis_block();
        let block = mined(&genesis, vec![signed_tx(&alice, "bob", 3)], 2);
        let json = block.to_json().unwrap();
        let decoded = Block::from_json(&json).unwrap();
        assert_eq!(decoded.hash(), block.hash());
        assert!(decoded.transactions[0].is_valid());
    }

    #[test]
    fn transaction_serialization_example() {
        let tx = Transaction::new("alice", "bob", 10);
        let json = tx.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"sender_address":"alice","receiver_address":"bob","value":10}"#
        );
        assert_eq!(Transaction::from_json(&json).unwrap(), tx);
    }

    #[test]
    fn malformed_input_is_reported() {
        assert!(matches!(
            Block::from_json("{\"timestamp\": \"yesterday\"}"),
            Err(LedgerError::MalformedSerialization(_))
        ));
        assert!(matches!(
            Chain::from_json("not json"),
            Err(LedgerError::MalformedSerialization(_))
        ));
    }

    #[test]
    fn genesis_chain_is_valid_without_proof() {
        let chain = Chain::default();
        assert_eq!(chain.len(), 1);
        // difficulty is irrelevant for genesis
        assert!(chain.is_valid(64));
    }

    #[test]
    fn difficulty_three_example() {
        let alice = Keypair::generate();
        let genesis = genesis_block();
        let block = mined(&genesis, vec![signed_tx(&alice, "bob", 5)], 3);
        assert!(block.hash_hex().starts_with("000"));
        assert!(pow::valid_proof(&block, 3));

        let mut tampered = block.clone();
        tampered.transactions[0].value = 6;
        assert_ne!(tampered.hash(), block.hash());
        assert!(!pow::valid_proof(&tampered, 3));
        assert!(validate_block(&tampered, &genesis, 3).is_err());
    }

    #[test]
    fn mining_stops_when_interrupted() {
        let block = Block::new("0", vec![]);
        let mut checks = 0;
        let outcome = mine_block(block, 64, 100, || {
            checks += 1;
            checks == 3
        });
        match outcome {
            MineOutcome::Interrupted { attempts } => assert_eq!(attempts, 300),
            MineOutcome::Found(_) => panic!("difficulty 64 cannot be met"),
        }
        assert_eq!(checks, 3);
    }

    #[test]
    fn chain_validation_examples() {
        let alice = Keypair::generate();
        let mut chain = Chain::default();
        let b1 = mined(chain.tip().unwrap(), vec![signed_tx(&alice, "bob", 1)], 2);
        chain.append(b1.clone(), 2).unwrap();
        let b2 = mined(&b1, vec![signed_tx(&alice, "carol", 2)], 2);
        chain.append(b2.clone(), 2).unwrap();
        assert_eq!(chain.len(), 3);
        chain.validate(2).unwrap();

        // broken link
        let orphan = mined(&genesis_block(), vec![signed_tx(&alice, "dave", 3)], 2);
        let broken = Chain::from_blocks(vec![genesis_block(), b1.clone(), orphan]);
        assert!(matches!(
            broken.validate(2),
            Err(LedgerError::ChainLinkInvalid { .. })
        ));

        // proof not met at a higher difficulty
        assert!(matches!(
            chain.validate(40),
            Err(LedgerError::ProofInvalid { .. })
        ));

        // forged signature inside an otherwise mined block
        let mut forged_tx = signed_tx(&alice, "eve", 4);
        forged_tx.value = 400;
        let forged = mined(&b2, vec![forged_tx], 2);
        let bad = Chain::from_blocks(vec![genesis_block(), b1, b2, forged]);
        assert!(matches!(
            bad.validate(2),
            Err(LedgerError::SignatureInvalid { .. })
        ));

        assert!(matches!(
            Chain::from_blocks(vec![]).validate(2),
            Err(LedgerError::EmptyChain)
        ));
        let not_genesis = Block::new("abc", vec![]);
        assert!(matches!(
            Chain::new(not_genesis).validate(2),
            Err(LedgerError::GenesisInvalid)
        ));
    }

    #[test]
    fn append_rejects_block_off_the_tip() {
        let alice = Keypair::generate();
        let mut chain = Chain::default();
        let b1 = mined(chain.tip().unwrap(), vec![signed_tx(&alice, "bob", 1)], 2);
        let sibling = mined(chain.tip().unwrap(), vec![signed_tx(&alice, "carol", 1)], 2);
        chain.append(b1, 2).unwrap();
        assert!(chain.append(sibling, 2).is_err());
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn chain_serialization_preserves_validity() {
        let alice = Keypair::generate();
        let mut chain = Chain::default();
        let b1 = mined(chain.tip().unwrap(), vec![signed_tx(&alice, "bob", 1)], 2);
        chain.append(b1, 2).unwrap();
        let decoded = Chain::from_json(&chain.to_json().unwrap()).unwrap();
        assert_eq!(decoded.tip_hash(), chain.tip_hash());
        assert!(decoded.is_valid(2));
    }
}
