//! GUID Heap (`#GUID`) access and construction.
//!
//! Provides the read view [`GuidHeap`] over the ECMA-335 `#GUID` heap, a sequence of
//! 128-bit GUID records addressed by 1-based index, and the interning write buffer
//! [`GuidBuffer`]. Index 0 is the null GUID reference.
//!
//! # Reference
//! - [ECMA-335 II.24.2.5](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use rustc_hash::FxHashMap;
use uguid::Guid;

use crate::{Error, Result};

/// Read view over the `#GUID` heap.
///
/// Unlike the byte-addressed heaps, `#GUID` entries are fixed 16-byte records addressed
/// by 1-based index; index 0 denotes the null reference and has no backing bytes.
///
/// # Examples
///
/// ```rust
/// use cilforge::metadata::heaps::GuidHeap;
/// let data = [0u8; 16];
/// let guids = GuidHeap::from(&data)?;
/// assert_eq!(guids.get(1)?, uguid::Guid::ZERO);
/// # Ok::<(), cilforge::Error>(())
/// ```
pub struct GuidHeap<'a> {
    data: &'a [u8],
}

impl<'a> GuidHeap<'a> {
    /// Create a `GuidHeap` view from a sequence of bytes
    ///
    /// # Arguments
    /// * 'data' - The byte slice from which this view shall be created
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImageFormat`] if the length is not a multiple of 16
    pub fn from(data: &'a [u8]) -> Result<GuidHeap<'a>> {
        if data.len() % 16 != 0 {
            return Err(bad_image_error!(
                "#GUID heap length {} is not a multiple of 16",
                data.len()
            ));
        }

        Ok(GuidHeap { data })
    }

    /// Returns the GUID record at the specified 1-based index
    ///
    /// ## Arguments
    /// * 'index' - The 1-based record index (comes from metadata tables)
    ///
    /// # Errors
    /// Returns [`Error::InvalidHeapReference`] for index 0 or an index past the heap end
    pub fn get(&self, index: u32) -> Result<Guid> {
        if index == 0 {
            return Err(Error::InvalidHeapReference {
                heap: "#GUID",
                offset: index,
            });
        }

        let start = (index as usize - 1) * 16;
        let Some(end) = start.checked_add(16) else {
            return Err(Error::InvalidHeapReference {
                heap: "#GUID",
                offset: index,
            });
        };

        if end > self.data.len() {
            return Err(Error::InvalidHeapReference {
                heap: "#GUID",
                offset: index,
            });
        }

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&self.data[start..end]);
        Ok(Guid::from_bytes(bytes))
    }

    /// The number of GUID records in the heap
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn count(&self) -> u32 {
        (self.data.len() / 16) as u32
    }
}

/// Interning write buffer for the `#GUID` heap.
///
/// Records are interned by value and addressed by 1-based index; the zero GUID maps to
/// the null index 0 and occupies no bytes.
#[derive(Default)]
pub struct GuidBuffer {
    buffer: Vec<u8>,
    index: FxHashMap<[u8; 16], u32>,
}

impl GuidBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        GuidBuffer {
            buffer: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    /// Intern a GUID record, returning its 1-based heap index.
    ///
    /// The zero GUID yields the null index 0 without occupying heap space.
    ///
    /// ## Arguments
    /// * 'guid' - The GUID to intern
    #[must_use]
    pub fn get_or_add(&mut self, guid: Guid) -> u32 {
        if guid == Guid::ZERO {
            return 0;
        }

        let bytes = guid.to_bytes();
        if let Some(&index) = self.index.get(&bytes) {
            return index;
        }

        #[allow(clippy::cast_possible_truncation)]
        let index = (self.buffer.len() / 16) as u32 + 1;
        self.buffer.extend_from_slice(&bytes);
        self.index.insert(bytes, index);
        index
    }

    /// Append a raw 16-byte record without deduplication, returning its 1-based index.
    ///
    /// ## Arguments
    /// * 'bytes' - The record to append verbatim
    #[must_use]
    pub fn append_raw(&mut self, bytes: [u8; 16]) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let index = (self.buffer.len() / 16) as u32 + 1;
        self.buffer.extend_from_slice(&bytes);
        index
    }

    /// Current heap length in bytes
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn len(&self) -> u32 {
        self.buffer.len() as u32
    }

    /// Returns true if no record has been added
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Produce the heap bytes ready for emission
    #[must_use]
    pub fn create_stream(&self) -> Vec<u8> {
        self.buffer.clone()
    }
}
