pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const GENESIS_PREVIOUS_HASH: &str = "0";
/// Required number of leading zero hex characters in a mined block hash.
pub const DIFFICULTY: u32 = 3;
/// Nonce attempts between two interruption checks while mining.
pub const MINING_BATCH: u64 = 100;
pub const IDLE_BACKOFF_MS: u64 = 100;
