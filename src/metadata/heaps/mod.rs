//! Metadata heap views and write buffers.
//!
//! The four ECMA-335 heaps come in two flavours here: zero-copy read views over a
//! parsed image (`*Heap`), and deduplicating write buffers the builder fills during
//! its prepare pass (`*Buffer`).
//!
//! # Key Components
//!
//! - [`StringsHeap`] / [`StringsBuffer`] - `#Strings`, NUL-terminated UTF-8 identifiers
//! - [`UserStringsHeap`] / [`UserStringsBuffer`] - `#US`, UTF-16 literals with terminal byte
//! - [`BlobHeap`] / [`BlobBuffer`] - `#Blob`, length-prefixed binary payloads
//! - [`GuidHeap`] / [`GuidBuffer`] - `#GUID`, 16-byte records by 1-based index
//!
//! All buffers intern (`get_or_add`), support uninterned raw appends (`append_raw`),
//! and emit their final bytes through `create_stream`. The empty entry is pre-seeded
//! at offset 0 (`#GUID`: index 0 is the null reference).

mod blob;
mod guid;
mod strings;
mod userstrings;

pub use blob::{BlobBuffer, BlobHeap};
pub use guid::{GuidBuffer, GuidHeap};
pub use strings::{StringsBuffer, StringsHeap, StringsIterator};
pub use userstrings::{UserStringsBuffer, UserStringsHeap};
