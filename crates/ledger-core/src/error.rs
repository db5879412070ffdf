use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("transaction from {sender} carries no signature")]
    SignatureMissing { sender: String },

    #[error("signature verification failed for sender {sender}")]
    SignatureInvalid { sender: String },

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("block hash {hash} does not meet difficulty {difficulty}")]
    ProofInvalid { hash: String, difficulty: u32 },

    #[error("previous_hash {found} does not match predecessor hash {expected}")]
    ChainLinkInvalid { expected: String, found: String },

    #[error("first block is not a genesis block")]
    GenesisInvalid,

    #[error("chain has no blocks")]
    EmptyChain,

    #[error("malformed serialization: {0}")]
    MalformedSerialization(#[from] serde_json::Error),
}
