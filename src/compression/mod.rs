//! Pluggable compression.
//!
//! RLE is fully implemented. Dictionary/Delta/BitPacking/LZ4/ZSTD are
//! pass-through codecs: each satisfies `compress ∘ decompress = id` at the
//! byte level and reports itself unsuitable, so `select_codec` never
//! prefers them over `None` — they exist so a page's codec tag is
//! meaningful today and a real implementation can later replace one of
//! them without touching callers.

pub mod adaptive;
pub mod codec;
pub mod passthrough;
pub mod rle;

pub use adaptive::select_codec;
pub use codec::{Codec, CodecKind};
pub use passthrough::PassthroughCodec;
pub use rle::RleCodec;
