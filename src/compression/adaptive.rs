//! Adaptive codec selection: choose RLE when the input's repetition ratio
//! exceeds 0.2, otherwise leave the page uncompressed.

use crate::compression::codec::CodecKind;
use crate::compression::rle::repetition_ratio;

pub fn select_codec(input: &[u8]) -> CodecKind {
    if repetition_ratio(input) > 0.2 {
        CodecKind::Rle
    } else {
        CodecKind::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repetitive_input_selects_rle() {
        assert_eq!(select_codec(&vec![7u8; 64]), CodecKind::Rle);
    }

    #[test]
    fn varied_input_selects_none() {
        let input: Vec<u8> = (0..64).map(|i| (i * 53 % 241) as u8).collect();
        assert_eq!(select_codec(&input), CodecKind::None);
    }
}
