//! Run-length encoding. Each run is a 1-byte count
//! (1..=255) followed by the repeated byte; a run longer than 255 bytes is
//! split across multiple (count, byte) pairs.

use crate::compression::codec::{Codec, CodecKind};
use crate::error::{Error, Result};

pub struct RleCodec;

impl Codec for RleCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Rle
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut iter = input.iter().peekable();
        while let Some(&byte) = iter.next() {
            let mut count: u16 = 1;
            while count < 255 && iter.peek() == Some(&&byte) {
                iter.next();
                count += 1;
            }
            out.push(count as u8);
            out.push(byte);
        }
        Ok(out)
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        if input.len() % 2 != 0 {
            return Err(Error::corruption("RLE stream has an odd number of bytes"));
        }
        let mut out = Vec::with_capacity(input.len() * 2);
        for pair in input.chunks_exact(2) {
            out.extend(std::iter::repeat(pair[1]).take(pair[0] as usize));
        }
        Ok(out)
    }

    fn suitable(&self, input: &[u8]) -> bool {
        repetition_ratio(input) > 0.2
    }
}

/// Fraction of consecutive byte pairs in `input` that repeat the previous
/// byte, used both by `RleCodec::suitable` and the adaptive selector.
pub fn repetition_ratio(input: &[u8]) -> f64 {
    if input.len() < 2 {
        return 0.0;
    }
    let repeats = input.windows(2).filter(|w| w[0] == w[1]).count();
    repeats as f64 / (input.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_bytes() {
        let codec = RleCodec;
        let input = b"aaaabbbccccccccd".to_vec();
        let compressed = codec.compress(&input).unwrap();
        let restored = codec.decompress(&compressed).unwrap();
        assert_eq!(restored, input);
    }

    #[test]
    fn runs_longer_than_255_split_across_pairs() {
        let codec = RleCodec;
        let input = vec![b'x'; 300];
        let compressed = codec.compress(&input).unwrap();
        assert_eq!(compressed, vec![255, b'x', 45, b'x']);
        assert_eq!(codec.decompress(&compressed).unwrap(), input);
    }

    #[test]
    fn highly_repetitive_input_is_suitable() {
        let codec = RleCodec;
        assert!(codec.suitable(&vec![0u8; 100]));
    }

    #[test]
    fn random_looking_input_is_not_suitable() {
        let codec = RleCodec;
        let input: Vec<u8> = (0..100).map(|i| (i * 37 % 251) as u8).collect();
        assert!(!codec.suitable(&input));
    }

    #[test]
    fn malformed_stream_is_rejected() {
        let codec = RleCodec;
        assert!(codec.decompress(&[1, 2, 3]).is_err());
    }
}
