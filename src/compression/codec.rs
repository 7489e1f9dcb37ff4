//! `Codec` trait.

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    None,
    Rle,
    Dictionary,
    Delta,
    BitPacking,
    Lz4,
    Zstd,
}

pub trait Codec {
    fn kind(&self) -> CodecKind;
    fn compress(&self, input: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// Compressed size over original size for `input`, without allocating a
    /// real compressed buffer when the codec can estimate cheaply.
    fn estimate_ratio(&self, input: &[u8]) -> f64 {
        if input.is_empty() {
            return 1.0;
        }
        match self.compress(input) {
            Ok(out) => out.len() as f64 / input.len() as f64,
            Err(_) => 1.0,
        }
    }

    /// Whether this codec is worth choosing for `input` at all. Pass-through
    /// codecs always answer `false` so the adaptive selector falls back to
    /// `None` rather than paying a compress/decompress round trip for no
    /// size benefit.
    fn suitable(&self, input: &[u8]) -> bool;
}
