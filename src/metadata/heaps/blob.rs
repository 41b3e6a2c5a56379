//! Blob Heap (`#Blob`) access and construction.
//!
//! Provides the read view [`BlobHeap`] over the ECMA-335 `#Blob` heap, which stores
//! length-prefixed binary payloads (signatures, constants, public keys), and the
//! interning write buffer [`BlobBuffer`].
//!
//! # Reference
//! - [ECMA-335 II.24.2.4](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use rustc_hash::FxHashMap;

use crate::{file::BinaryReader, Error, Result};

/// Read view over the `#Blob` heap.
///
/// Each entry starts with an ECMA-335 compressed length followed by that many bytes of
/// payload. Entries are addressed by byte offset; offset 0 is the empty blob. Regions
/// between referenced entries are unreachable and never validated.
///
/// # Examples
///
/// ```rust
/// use cilforge::metadata::heaps::BlobHeap;
/// let data = &[0u8, 0x03, 0x41, 0x42, 0x43];
/// let blob = BlobHeap::from(data)?;
/// assert_eq!(blob.get(1)?, &[0x41, 0x42, 0x43]);
/// # Ok::<(), cilforge::Error>(())
/// ```
pub struct BlobHeap<'a> {
    data: &'a [u8],
}

impl<'a> BlobHeap<'a> {
    /// Create a `BlobHeap` view from a sequence of bytes
    ///
    /// # Arguments
    /// * 'data' - The byte slice from which this view shall be created
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImageFormat`] if the heap is empty or does not start
    /// with the mandatory empty entry
    pub fn from(data: &'a [u8]) -> Result<BlobHeap<'a>> {
        if data.is_empty() || data[0] != 0 {
            return Err(bad_image_error!("Invalid memory for #Blob heap"));
        }

        Ok(BlobHeap { data })
    }

    /// Get a view of the payload bytes at the provided heap offset
    ///
    /// ## Arguments
    /// * 'offset' - The byte offset within the heap (comes from metadata tables)
    ///
    /// # Errors
    /// Returns [`Error::InvalidHeapReference`] if the offset is out of bounds or the
    /// length prefix runs past the heap end
    pub fn get(&self, offset: u32) -> Result<&'a [u8]> {
        let index = offset as usize;
        if index >= self.data.len() {
            return Err(Error::InvalidHeapReference {
                heap: "#Blob",
                offset,
            });
        }

        let mut reader = BinaryReader::new(&self.data[index..]);
        let length = reader.read_compressed_uint()? as usize;
        let start = index + reader.pos();

        let Some(end) = start.checked_add(length) else {
            return Err(Error::InvalidHeapReference {
                heap: "#Blob",
                offset,
            });
        };

        if end > self.data.len() {
            return Err(Error::InvalidHeapReference {
                heap: "#Blob",
                offset,
            });
        }

        Ok(&self.data[start..end])
    }
}

/// Interning write buffer for the `#Blob` heap.
///
/// Blobs are interned by raw payload bytes. The empty blob is pre-seeded at offset 0.
/// [`BlobBuffer::append_raw`] bypasses interning; raw slots stay invisible to later
/// [`BlobBuffer::get_or_add`] calls.
#[derive(Default)]
pub struct BlobBuffer {
    buffer: Vec<u8>,
    index: FxHashMap<Vec<u8>, u32>,
}

impl BlobBuffer {
    /// Create a buffer holding only the mandatory empty entry
    #[must_use]
    pub fn new() -> Self {
        BlobBuffer {
            buffer: vec![0],
            index: FxHashMap::default(),
        }
    }

    /// Intern a payload, returning its heap offset.
    ///
    /// ## Arguments
    /// * 'payload' - The bytes to intern (length prefix is added here)
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImageFormat`] if the payload exceeds the compressed
    /// length range
    pub fn get_or_add(&mut self, payload: &[u8]) -> Result<u32> {
        if payload.is_empty() {
            return Ok(0);
        }

        if let Some(&offset) = self.index.get(payload) {
            return Ok(offset);
        }

        #[allow(clippy::cast_possible_truncation)]
        let offset = self.buffer.len() as u32;

        let Ok(length) = u32::try_from(payload.len()) else {
            return Err(bad_image_error!("Blob of {} bytes is too long", payload.len()));
        };

        let mut writer = crate::file::BinaryWriter::with_capacity(payload.len() + 4);
        writer.write_compressed_uint(length)?;

        self.buffer.extend_from_slice(writer.bytes());
        self.buffer.extend_from_slice(payload);
        self.index.insert(payload.to_vec(), offset);
        Ok(offset)
    }

    /// Append raw bytes without deduplication or registration in the intern map.
    ///
    /// The caller is responsible for supplying the length prefix of raw payloads.
    ///
    /// ## Arguments
    /// * 'bytes' - The bytes to append verbatim
    #[must_use]
    pub fn append_raw(&mut self, bytes: &[u8]) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let offset = self.buffer.len() as u32;
        self.buffer.extend_from_slice(bytes);
        offset
    }

    /// Current heap length in bytes
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn len(&self) -> u32 {
        self.buffer.len() as u32
    }

    /// Returns true if the buffer holds only the empty entry
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.len() == 1
    }

    /// Produce the heap bytes ready for emission
    #[must_use]
    pub fn create_stream(&self) -> Vec<u8> {
        self.buffer.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let data = {
            let mut data = vec![0xCCu8; 300];
            /* offset 0  - mandatory empty      */ data[0] = 0x00;
            /* offset 1  - len 10               */ data[1] = 0x0A;
            /* offset 1  - payload              */ data[2..12].copy_from_slice(&[0x0A; 10]);
            /* offset 12 - len 5                */ data[12] = 0x05;
            /* offset 12 - payload              */ data[13..18].copy_from_slice(&[0xAB; 5]);
            /* offset 18 - 2-byte len 0x101     */ data[18] = 0x81;
            /* offset 18 - 2-byte len 0x101     */ data[19] = 0x01;
            /* offset 18 - payload              */ data[20..277].copy_from_slice(&[0xBA; 257]);
            data
        };

        let blob = BlobHeap::from(&data).unwrap();
        assert_eq!(blob.get(0).unwrap().len(), 0);
        assert_eq!(blob.get(1).unwrap(), &[0x0A; 10]);
        assert_eq!(blob.get(12).unwrap(), &[0xAB; 5]);
        assert_eq!(blob.get(18).unwrap(), &[0xBA; 257][..]);
    }

    #[test]
    fn invalid() {
        assert!(BlobHeap::from(&[]).is_err());
        assert!(BlobHeap::from(&[0x01, 0x00]).is_err());

        let blob = BlobHeap::from(&[0x00, 0x7F, 0x01]).unwrap();
        // Length prefix claims more bytes than the heap holds
        assert!(matches!(
            blob.get(1),
            Err(Error::InvalidHeapReference { heap: "#Blob", .. })
        ));
        assert!(matches!(
            blob.get(99),
            Err(Error::InvalidHeapReference { heap: "#Blob", .. })
        ));
    }

    #[test]
    fn buffer_interning() {
        let mut buffer = BlobBuffer::new();
        let a = buffer.get_or_add(&[0x01, 0x02, 0x03]).unwrap();
        let b = buffer.get_or_add(&[0x01, 0x02, 0x03]).unwrap();
        let c = buffer.get_or_add(&[0x04]).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(buffer.get_or_add(&[]).unwrap(), 0);

        let stream = buffer.create_stream();
        let heap = BlobHeap::from(&stream).unwrap();
        assert_eq!(heap.get(a).unwrap(), &[0x01, 0x02, 0x03]);
        assert_eq!(heap.get(c).unwrap(), &[0x04]);
    }

    #[test]
    fn buffer_append_raw_disjoint_from_interning() {
        let mut buffer = BlobBuffer::new();
        let interned = buffer.get_or_add(&[0xAA, 0xBB]).unwrap();
        let raw = buffer.append_raw(&[0x02, 0xAA, 0xBB]);
        assert_ne!(interned, raw);
        assert_eq!(buffer.get_or_add(&[0xAA, 0xBB]).unwrap(), interned);
    }

    #[test]
    fn buffer_large_payload_gets_wide_prefix() {
        let mut buffer = BlobBuffer::new();
        let payload = vec![0x55u8; 0x100];
        let offset = buffer.get_or_add(&payload).unwrap();
        assert_eq!(offset, 1);
        // 2-byte length prefix
        assert_eq!(buffer.len(), 1 + 2 + 0x100);

        let stream = buffer.create_stream();
        let heap = BlobHeap::from(&stream).unwrap();
        assert_eq!(heap.get(offset).unwrap(), &payload[..]);
    }
}
