//! Pass-through codecs for the Dictionary/Delta/BitPacking/LZ4/ZSTD
//! capabilities not implemented yet. Each is a real
//! `Codec` whose `compress`/`decompress` round-trip is the identity
//! function, binary-compatible at the page boundary with a future codec of
//! the same kind, but `suitable` is always `false` so the adaptive selector
//! never prefers one over `None`.

use crate::compression::codec::{Codec, CodecKind};
use crate::error::Result;

pub struct PassthroughCodec {
    kind: CodecKind,
}

impl PassthroughCodec {
    pub fn new(kind: CodecKind) -> Self {
        Self { kind }
    }
}

impl Codec for PassthroughCodec {
    fn kind(&self) -> CodecKind {
        self.kind
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn suitable(&self, _input: &[u8]) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_identity_for_every_kind() {
        let kinds = [
            CodecKind::Dictionary,
            CodecKind::Delta,
            CodecKind::BitPacking,
            CodecKind::Lz4,
            CodecKind::Zstd,
        ];
        for kind in kinds {
            let codec = PassthroughCodec::new(kind);
            let input = b"arbitrary payload bytes".to_vec();
            let compressed = codec.compress(&input).unwrap();
            assert_eq!(codec.decompress(&compressed).unwrap(), input);
            assert!(!codec.suitable(&input));
        }
    }
}
