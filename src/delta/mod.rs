//! Block signatures, delta computation and patching

pub mod rolling;
pub mod signature;
pub mod block_level;
pub mod patch;

pub use block_level::{compute_delta, DeltaStats};
pub use patch::{apply_delta, patch_file, patch_file_or_empty};
pub use signature::{compute_signature, signature_for_path, signature_from_bytes};

pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Length of the truncated BLAKE3 digest kept per block
pub const STRONG_LEN: usize = 16;

/// Signature of one fixed-size block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSignature {
    pub index: u32,
    pub weak: u32,
    pub strong: [u8; STRONG_LEN],
}

/// Ordered block signatures for one snapshot of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureSet {
    pub blocks: Vec<BlockSignature>,
    pub block_size: usize,
}

impl SignatureSet {
    pub fn empty(block_size: usize) -> Self {
        Self {
            blocks: Vec::new(),
            block_size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// One instruction of a delta, in target order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOp {
    /// Reuse block `index` of the base file
    Copy { index: u32 },
    /// Bytes not found in the base file
    Literal { data: Vec<u8> },
}

/// Strong hash of a block: BLAKE3 truncated to [`STRONG_LEN`] bytes
pub fn strong_hash(chunk: &[u8]) -> [u8; STRONG_LEN] {
    let hash = blake3::hash(chunk);
    let mut strong = [0u8; STRONG_LEN];
    strong.copy_from_slice(&hash.as_bytes()[..STRONG_LEN]);
    strong
}
