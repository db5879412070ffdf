use crate::{hash_with_nonce, pow::meets_difficulty, Block};
use rand::Rng;
use tracing::debug;

#[derive(Debug)]
pub enum MineOutcome {
    /// The block with a nonce meeting the difficulty.
    Found(Block),
    /// The search was abandoned. The partially searched block is dropped.
    Interrupted { attempts: u64 },
}

/// Searches nonces for `block` until its hash has at least `difficulty` leading zero
/// hex characters.
///
/// The search starts at a random offset and walks the whole `u64` space, wrapping.
/// After every `batch` attempts `interrupted` is polled; returning `true` abandons
/// the search.
pub fn mine_block<F>(
    mut block: Block,
    difficulty: u32,
    batch: u64,
    mut interrupted: F,
) -> MineOutcome
where
    F: FnMut() -> bool,
{
    let batch = batch.max(1);
    // every field but the nonce is fixed for the whole search
    let prefix = block.prefix_hasher();
    let mut nonce: u64 = rand::thread_rng().gen();
    let mut attempts: u64 = 0;

    loop {
        let hash = hash_with_nonce(prefix.clone(), nonce);
        attempts += 1;
        if meets_difficulty(&hash, difficulty) {
            block.nonce = nonce;
            debug!(nonce, attempts, hash = %hex::encode(hash), "nonce found");
            return MineOutcome::Found(block);
        }
        nonce = nonce.wrapping_add(1);

        if attempts % batch == 0 && interrupted() {
            debug!(attempts, "mining interrupted");
            return MineOutcome::Interrupted { attempts };
        }
    }
}
