//! String Heap (`#Strings`) access and construction.
//!
//! Provides the read view [`StringsHeap`] over the ECMA-335 `#Strings` heap, which stores
//! identifier strings in NUL-terminated UTF-8, and the interning write buffer
//! [`StringsBuffer`] used by the builder to assemble a fresh heap.
//!
//! # Reference
//! - [ECMA-335 II.24.2.3](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use std::ffi::CStr;

use rustc_hash::FxHashMap;

use crate::{Error, Result};

/// Read view over the `#Strings` heap.
///
/// `#Strings` holds the identifiers referenced from metadata tables: type names,
/// namespaces, member names, module names. Entries are NUL-terminated UTF-8 and are
/// addressed by byte offset; offset 0 is the empty string.
///
/// # Examples
///
/// ```rust
/// use cilforge::metadata::heaps::StringsHeap;
/// let data = &[0u8, b'H', b'e', b'l', b'l', b'o', 0u8];
/// let strings = StringsHeap::from(data)?;
/// assert_eq!(strings.get(1)?, "Hello");
/// # Ok::<(), cilforge::Error>(())
/// ```
pub struct StringsHeap<'a> {
    data: &'a [u8],
}

impl<'a> StringsHeap<'a> {
    /// Create a `StringsHeap` view from a sequence of bytes
    ///
    /// # Arguments
    /// * 'data' - The byte slice from which this view shall be created
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImageFormat`] if the heap is empty or does not start
    /// with the mandatory empty entry
    pub fn from(data: &'a [u8]) -> Result<StringsHeap<'a>> {
        if data.is_empty() || data[0] != 0 {
            return Err(bad_image_error!("Provided #Strings heap is empty"));
        }

        Ok(StringsHeap { data })
    }

    /// Get a view of the string at the provided heap offset
    ///
    /// ## Arguments
    /// * 'offset' - The byte offset within the heap (comes from metadata tables)
    ///
    /// # Errors
    /// Returns [`Error::InvalidHeapReference`] if the offset is out of bounds,
    /// [`crate::Error::EndOfStream`] if the entry is not terminated, or
    /// [`crate::Error::BadImageFormat`] for invalid UTF-8
    pub fn get(&self, offset: u32) -> Result<&'a str> {
        let index = offset as usize;
        if index >= self.data.len() {
            return Err(Error::InvalidHeapReference {
                heap: "#Strings",
                offset,
            });
        }

        match CStr::from_bytes_until_nul(&self.data[index..]) {
            Ok(terminated) => match terminated.to_str() {
                Ok(value) => Ok(value),
                Err(_) => Err(bad_image_error!("Invalid UTF-8 at #Strings:{}", offset)),
            },
            Err(_) => Err(Error::EndOfStream),
        }
    }

    /// Iterate over all entries as (offset, string) pairs
    #[must_use]
    pub fn iter(&self) -> StringsIterator<'a> {
        StringsIterator {
            data: self.data,
            offset: 1,
        }
    }
}

/// Iterator over the entries of a [`StringsHeap`], yielding (offset, value) pairs.
///
/// Stops at the first malformed entry.
pub struct StringsIterator<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for StringsIterator<'a> {
    type Item = (u32, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }

        let terminated = CStr::from_bytes_until_nul(&self.data[self.offset..]).ok()?;
        let value = terminated.to_str().ok()?;

        #[allow(clippy::cast_possible_truncation)]
        let entry = (self.offset as u32, value);
        self.offset += value.len() + 1;
        Some(entry)
    }
}

/// Interning write buffer for the `#Strings` heap.
///
/// Strings are interned by decoded value, so two semantically equal strings coalesce to
/// one physical entry with equal offsets. The empty string is pre-seeded at offset 0.
/// [`StringsBuffer::append_raw`] bypasses interning entirely; raw slots are never found
/// by later [`StringsBuffer::get_or_add`] calls.
#[derive(Default)]
pub struct StringsBuffer {
    buffer: Vec<u8>,
    index: FxHashMap<String, u32>,
}

impl StringsBuffer {
    /// Create a buffer holding only the mandatory empty entry
    #[must_use]
    pub fn new() -> Self {
        StringsBuffer {
            buffer: vec![0],
            index: FxHashMap::default(),
        }
    }

    /// Intern a string, returning its heap offset.
    ///
    /// Inserting the same value twice yields equal offsets and a single physical entry.
    ///
    /// ## Arguments
    /// * 'value' - The string to intern
    #[must_use]
    pub fn get_or_add(&mut self, value: &str) -> u32 {
        if value.is_empty() {
            return 0;
        }

        if let Some(&offset) = self.index.get(value) {
            return offset;
        }

        #[allow(clippy::cast_possible_truncation)]
        let offset = self.buffer.len() as u32;
        self.buffer.extend_from_slice(value.as_bytes());
        self.buffer.push(0);
        self.index.insert(value.to_string(), offset);
        offset
    }

    /// Append raw bytes without deduplication or registration in the intern map.
    ///
    /// The caller is responsible for NUL termination of raw payloads.
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
        let data: [u8; 24] = [
            0x00,
            0x3c, 0x4d, 0x6f, 0x64, 0x75, 0x6c, 0x65, 0x3e, 0x00,
            0x53, 0x79, 0x73, 0x74, 0x65, 0x6d, 0x00,
            0x4f, 0x62, 0x6a, 0x65, 0x63, 0x74, 0x00,
        ];

        let heap = StringsHeap::from(&data).unwrap();
        assert_eq!(heap.get(0).unwrap(), "");
        assert_eq!(heap.get(1).unwrap(), "<Module>");
        assert_eq!(heap.get(10).unwrap(), "System");
        assert_eq!(heap.get(17).unwrap(), "Object");

        // Offsets may land mid-entry, yielding a suffix
        assert_eq!(heap.get(12).unwrap(), "stem");

        assert!(matches!(
            heap.get(100),
            Err(Error::InvalidHeapReference { heap: "#Strings", offset: 100 })
        ));

        let entries: Vec<_> = heap.iter().collect();
        assert_eq!(
            entries,
            vec![(1, "<Module>"), (10, "System"), (17, "Object")]
        );
    }

    #[test]
    fn invalid() {
        assert!(StringsHeap::from(&[]).is_err());
        assert!(StringsHeap::from(&[0x41, 0x00]).is_err());

        // Unterminated tail
        let heap = StringsHeap::from(&[0x00, 0x41, 0x42]).unwrap();
        assert!(matches!(heap.get(1), Err(Error::EndOfStream)));
    }

    #[test]
    fn buffer_distinct_strings() {
        let mut buffer = StringsBuffer::new();
        let a = buffer.get_or_add("String 1");
        let b = buffer.get_or_add("String 2");
        assert_ne!(a, b);

        let stream = buffer.create_stream();
        let heap = StringsHeap::from(&stream).unwrap();
        assert_eq!(heap.get(a).unwrap(), "String 1");
        assert_eq!(heap.get(b).unwrap(), "String 2");
    }

    #[test]
    fn buffer_duplicate_strings_coalesce() {
        let mut buffer = StringsBuffer::new();
        let first = buffer.get_or_add("String 1");
        let length_after_first = buffer.len();
        let second = buffer.get_or_add("String 1");

        assert_eq!(first, second);
        assert_eq!(buffer.len(), length_after_first);
    }

    #[test]
    fn buffer_empty_string_is_preseeded() {
        let mut buffer = StringsBuffer::new();
        assert_eq!(buffer.get_or_add(""), 0);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn buffer_append_raw_bypasses_interning() {
        let mut buffer = StringsBuffer::new();
        let raw = buffer.append_raw(b"String 1\0");
        let interned = buffer.get_or_add("String 1");
        assert_ne!(raw, interned);

        // And the raw slot stays invisible to future interning
        assert_eq!(buffer.get_or_add("String 1"), interned);
    }
}
