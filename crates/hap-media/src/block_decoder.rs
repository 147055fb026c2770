// crates/hap-media/src/block_decoder.rs
//
// Hap frames are split into independently-decodable fixed-size blocks;
// `decode_frame_blocks` fans that work out across a `rayon` thread pool
// rather than decoding serially. The codec itself is an external
// interface the spec names but doesn't define the bitstream of — this
// module is the dispatch shim around it.

use rayon::prelude::*;

/// Decodes one compressed Hap block into a fixed-size uncompressed chunk.
/// Implementations are expected to be pure and thread-safe; the dispatcher
/// calls this concurrently across blocks of the same frame.
pub trait BlockDecoder: Send + Sync {
    fn decode_block(&self, block_index: usize, compressed: &[u8], out: &mut [u8]) -> Result<(), String>;
}

/// Decode every block of one frame in parallel. `blocks[i]` is the
/// compressed payload for block `i`; `out` is divided into
/// `blocks.len()` equal chunks of `block_size` bytes each.
pub fn decode_frame_blocks<D: BlockDecoder>(
    decoder: &D,
    blocks: &[Vec<u8>],
    block_size: usize,
    out: &mut [u8],
) -> Result<(), String> {
    if out.len() != blocks.len() * block_size {
        return Err(format!(
            "output buffer size {} does not match {} blocks of {block_size} bytes",
            out.len(),
            blocks.len()
        ));
    }
    out.par_chunks_mut(block_size)
        .zip(blocks.par_iter())
        .enumerate()
        .try_for_each(|(i, (chunk, compressed))| decoder.decode_block(i, compressed, chunk))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDecoder {
        calls: AtomicUsize,
    }

    impl BlockDecoder for CountingDecoder {
        fn decode_block(&self, block_index: usize, compressed: &[u8], out: &mut [u8]) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            out.fill(compressed.first().copied().unwrap_or(block_index as u8));
            Ok(())
        }
    }

    #[test]
    fn decodes_every_block_exactly_once() {
        let decoder = CountingDecoder { calls: AtomicUsize::new(0) };
        let blocks = vec![vec![1u8], vec![2u8], vec![3u8]];
        let mut out = vec![0u8; 3 * 4];
        decode_frame_blocks(&decoder, &blocks, 4, &mut out).unwrap();
        assert_eq!(decoder.calls.load(Ordering::Relaxed), 3);
        assert_eq!(&out[0..4], &[1, 1, 1, 1]);
        assert_eq!(&out[4..8], &[2, 2, 2, 2]);
        assert_eq!(&out[8..12], &[3, 3, 3, 3]);
    }

    #[test]
    fn rejects_mismatched_output_size() {
        struct Noop;
        impl BlockDecoder for Noop {
            fn decode_block(&self, _i: usize, _c: &[u8], _o: &mut [u8]) -> Result<(), String> {
                Ok(())
            }
        }
        let mut out = vec![0u8; 3];
        let err = decode_frame_blocks(&Noop, &[vec![0u8]], 4, &mut out).unwrap_err();
        assert!(err.contains("does not match"));
    }

    #[test]
    fn propagates_first_error() {
        struct Failing;
        impl BlockDecoder for Failing {
            fn decode_block(&self, i: usize, _c: &[u8], _o: &mut [u8]) -> Result<(), String> {
                if i == 1 {
                    Err("bad block".into())
                } else {
                    Ok(())
                }
            }
        }
        let blocks = vec![vec![0u8]; 3];
        let mut out = vec![0u8; 3 * 2];
        let err = decode_frame_blocks(&Failing, &blocks, 2, &mut out).unwrap_err();
        assert_eq!(err, "bad block");
    }
}
