use super::rolling::RollingChecksum;
use super::{strong_hash, BlockSignature, SignatureSet};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Compute the block signatures of everything `reader` yields
pub fn compute_signature<R: Read>(reader: &mut R, block_size: usize) -> io::Result<SignatureSet> {
    if block_size == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "block size must be non-zero"));
    }

    let mut blocks = Vec::new();
    let mut buffer = vec![0u8; block_size];

    loop {
        let n = read_block(reader, &mut buffer)?;
        if n == 0 {
            break;
        }
        let chunk = &buffer[..n];
        let index = block_index(blocks.len())?;
        blocks.push(BlockSignature {
            index,
            weak: RollingChecksum::of(chunk),
            strong: strong_hash(chunk),
        });

        if n < block_size {
            break;
        }
    }

    Ok(SignatureSet { blocks, block_size })
}

pub fn signature_from_bytes(data: &[u8], block_size: usize) -> SignatureSet {
    let blocks = data
        .chunks(block_size.max(1))
        .enumerate()
        .map(|(i, chunk)| BlockSignature {
            index: i as u32,
            weak: RollingChecksum::of(chunk),
            strong: strong_hash(chunk),
        })
        .collect();

    SignatureSet { blocks, block_size }
}

pub fn signature_for_path(path: &Path, block_size: usize) -> io::Result<SignatureSet> {
    let mut reader = BufReader::new(File::open(path)?);
    compute_signature(&mut reader, block_size)
}

fn block_index(count: usize) -> io::Result<u32> {
    u32::try_from(count).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "too many blocks for a u32 index"))
}

/// Fill `buf` unless the reader hits EOF first; returns bytes read
fn read_block<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_block_index_overflow_is_error() {
        assert_eq!(block_index(0).unwrap(), 0);
        assert_eq!(block_index(u32::MAX as usize).unwrap(), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        assert_eq!(
            block_index(u32::MAX as usize + 1).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }

    /// Hands out at most 3 bytes per read call
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.0.len().min(buf.len()).min(3);
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0 = &self.0[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_block_count_and_indices() {
        let data = b"hello world, this is a test";
        let sig = compute_signature(&mut Cursor::new(data), 10).unwrap();

        assert_eq!(sig.blocks.len(), 3);
        let indices: Vec<u32> = sig.blocks.iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(sig.blocks[2].weak, RollingChecksum::of(b" a test"));
    }

    #[test]
    fn test_empty_input() {
        let sig = compute_signature(&mut Cursor::new(Vec::<u8>::new()), 4096).unwrap();
        assert!(sig.is_empty());
    }

    #[test]
    fn test_deterministic_and_matches_bytes_variant() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 253) as u8).collect();
        let a = compute_signature(&mut Cursor::new(&data), 512).unwrap();
        let b = compute_signature(&mut Cursor::new(&data), 512).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, signature_from_bytes(&data, 512));
    }

    #[test]
    fn test_short_reads_do_not_split_blocks() {
        let data: Vec<u8> = (0..100u8).collect();
        let sig = compute_signature(&mut Trickle(&data), 16).unwrap();
        assert_eq!(sig, signature_from_bytes(&data, 16));
        assert_eq!(sig.blocks.len(), 7);
    }

    #[test]
    fn test_zero_block_size_rejected() {
        let err = compute_signature(&mut Cursor::new(b"abc"), 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
