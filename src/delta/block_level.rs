use super::rolling::RollingChecksum;
use super::{strong_hash, BlockSignature, DeltaOp, SignatureSet};
use std::collections::HashMap;

/// Express `local_data` as copies of the blocks in `remote_sig` plus literals.
///
/// Only full `block_size` windows are matched; the remote's short trailing
/// block never produces a copy.
pub fn compute_delta(local_data: &[u8], remote_sig: &SignatureSet) -> Vec<DeltaOp> {
    let block_size = remote_sig.block_size;
    let mut ops = Vec::new();

    if local_data.is_empty() {
        return ops;
    }
    if block_size == 0 || remote_sig.blocks.is_empty() || local_data.len() < block_size {
        ops.push(DeltaOp::Literal { data: local_data.to_vec() });
        return ops;
    }

    // weak -> candidates, ascending index so the lowest strong match wins
    let mut lookup: HashMap<u32, Vec<&BlockSignature>> = HashMap::new();
    for block in &remote_sig.blocks {
        lookup.entry(block.weak).or_default().push(block);
    }
    for candidates in lookup.values_mut() {
        candidates.sort_by_key(|b| b.index);
    }

    let mut pos = 0;
    let mut literal_start = 0;
    let mut rolling = RollingChecksum::new();
    rolling.update(&local_data[0..block_size]);

    while pos + block_size <= local_data.len() {
        let matched = lookup.get(&rolling.digest()).and_then(|candidates| {
            let strong = strong_hash(&local_data[pos..pos + block_size]);
            candidates.iter().find(|c| c.strong == strong).map(|c| c.index)
        });

        match matched {
            Some(index) => {
                if pos > literal_start {
                    ops.push(DeltaOp::Literal {
                        data: local_data[literal_start..pos].to_vec(),
                    });
                }
                ops.push(DeltaOp::Copy { index });

                pos += block_size;
                literal_start = pos;

                if pos + block_size <= local_data.len() {
                    rolling.update(&local_data[pos..pos + block_size]);
                }
            }
            None => {
                if pos + block_size < local_data.len() {
                    rolling.roll(local_data[pos], local_data[pos + block_size]);
                }
                pos += 1;
            }
        }
    }

    if literal_start < local_data.len() {
        ops.push(DeltaOp::Literal {
            data: local_data[literal_start..].to_vec(),
        });
    }

    ops
}

/// Summary of what a delta reuses and what it carries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaStats {
    pub copied_blocks: usize,
    pub literal_bytes: u64,
}

impl DeltaStats {
    pub fn of(ops: &[DeltaOp]) -> Self {
        ops.iter().fold(Self::default(), |mut stats, op| {
            match op {
                DeltaOp::Copy { .. } => stats.copied_blocks += 1,
                DeltaOp::Literal { data } => stats.literal_bytes += data.len() as u64,
            }
            stats
        })
    }
}
