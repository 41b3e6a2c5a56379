//! User String Heap (`#US`) access and construction.
//!
//! Provides the read view [`UserStringsHeap`] over the ECMA-335 `#US` heap, which stores
//! string literals in UTF-16 with a per-entry terminal byte, and the interning write
//! buffer [`UserStringsBuffer`].
//!
//! # Reference
//! - [ECMA-335 II.24.2.4](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use rustc_hash::FxHashMap;
use widestring::U16String;

use crate::{
    file::{BinaryReader, BinaryWriter},
    Error, Result,
};

/// Returns true if a UTF-16 code unit forces the entry's terminal byte to 1.
///
/// Per ECMA-335 II.24.2.4 the terminal byte records whether any code unit falls
/// outside the set that round-trips through naive ANSI handling: 0x01-0x08,
/// 0x0E-0x1F, 0x27, 0x2D and everything at or above 0x7F are flagged.
fn is_special_char(unit: u16) -> bool {
    matches!(unit, 0x01..=0x08 | 0x0E..=0x1F | 0x27 | 0x2D) || unit >= 0x7F
}

/// Read view over the `#US` heap.
///
/// Each entry is a compressed length (covering payload plus terminal byte), the UTF-16
/// payload in little-endian code units, and a terminal byte indicating the presence of
/// "special" characters. Offset 0 is the empty entry.
///
/// # Examples
///
/// ```rust
/// use cilforge::metadata::heaps::UserStringsHeap;
/// let data = &[0x00, 0x03, 0x41, 0x00, 0x00];
/// let us = UserStringsHeap::from(data)?;
/// assert_eq!(us.get(1)?.to_string_lossy(), "A");
/// # Ok::<(), cilforge::Error>(())
/// ```
pub struct UserStringsHeap<'a> {
    data: &'a [u8],
}

impl<'a> UserStringsHeap<'a> {
    /// Create a `UserStringsHeap` view from a sequence of bytes
    ///
    /// # Arguments
    /// * 'data' - The byte slice from which this view shall be created
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImageFormat`] if the heap is empty or does not start
    /// with the mandatory empty entry
    pub fn from(data: &'a [u8]) -> Result<UserStringsHeap<'a>> {
        if data.is_empty() || data[0] != 0 {
            return Err(bad_image_error!("Provided #US heap is empty"));
        }

        Ok(UserStringsHeap { data })
    }

    /// Get the string stored at the provided heap offset
    ///
    /// ## Arguments
    /// * 'offset' - The byte offset within the heap (comes from `ldstr` operands and tables)
    ///
    /// # Errors
    /// Returns [`Error::InvalidHeapReference`] if the offset is out of bounds or the
    /// entry shape is inconsistent
    pub fn get(&self, offset: u32) -> Result<U16String> {
        let index = offset as usize;
        if index >= self.data.len() {
            return Err(Error::InvalidHeapReference { heap: "#US", offset });
        }

        let mut reader = BinaryReader::new(&self.data[index..]);
        let length = reader.read_compressed_uint()? as usize;
        if length == 0 {
            return Ok(U16String::new());
        }

        // Payload is UTF-16 pairs plus the terminal byte, so the length is always odd
        if length % 2 == 0 {
            return Err(Error::InvalidHeapReference { heap: "#US", offset });
        }

        let payload = reader.read_bytes(length - 1)?;
        let units: Vec<u16> = payload
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        // Terminal byte must be present
        reader.read_le::<u8>()?;

        Ok(U16String::from_vec(units))
    }

    /// Read the terminal byte of the entry at the provided heap offset
    ///
    /// ## Arguments
    /// * 'offset' - The byte offset within the heap
    ///
    /// # Errors
    /// Returns [`Error::InvalidHeapReference`] if the offset does not address a
    /// non-empty entry
    pub fn terminal_byte(&self, offset: u32) -> Result<u8> {
        let index = offset as usize;
        if index >= self.data.len() {
            return Err(Error::InvalidHeapReference { heap: "#US", offset });
        }

        let mut reader = BinaryReader::new(&self.data[index..]);
        let length = reader.read_compressed_uint()? as usize;
        if length == 0 {
            return Err(Error::InvalidHeapReference { heap: "#US", offset });
        }

        reader.advance_by(length - 1)?;
        reader.read_le::<u8>()
    }
}

/// Interning write buffer for the `#US` heap.
///
/// Entries are interned by decoded value. The terminal byte is computed from the
/// payload per [`is_special_char`]; the compressed length prefix covers the UTF-16
/// payload plus that byte.
#[derive(Default)]
pub struct UserStringsBuffer {
    buffer: Vec<u8>,
    index: FxHashMap<String, u32>,
}

impl UserStringsBuffer {
    /// Create a buffer holding only the mandatory empty entry
    #[must_use]
    pub fn new() -> Self {
        UserStringsBuffer {
            buffer: vec![0],
            index: FxHashMap::default(),
        }
    }

    /// Intern a string, returning its heap offset.
    ///
    /// ## Arguments
    /// * 'value' - The string to intern
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImageFormat`] if the encoded entry would exceed the
    /// compressed length range
    pub fn get_or_add(&mut self, value: &str) -> Result<u32> {
        if value.is_empty() {
            return Ok(0);
        }

        if let Some(&offset) = self.index.get(value) {
            return Ok(offset);
        }

        #[allow(clippy::cast_possible_truncation)]
        let offset = self.buffer.len() as u32;

        let units: Vec<u16> = value.encode_utf16().collect();
        let mut terminal = 0u8;
        for &unit in &units {
            if is_special_char(unit) {
                terminal = 1;
                break;
            }
        }

        let Ok(length) = u32::try_from(units.len() * 2 + 1) else {
            return Err(bad_image_error!("User string of {} units is too long", units.len()));
        };

        let mut writer = BinaryWriter::with_capacity(units.len() * 2 + 5);
        writer.write_compressed_uint(length)?;
        for unit in units {
            writer.write_le::<u16>(unit);
        }
        writer.write_le::<u8>(terminal);

        self.buffer.extend_from_slice(writer.bytes());
        self.index.insert(value.to_string(), offset);
        Ok(offset)
    }

    /// Append raw bytes without deduplication or registration in the intern map.
    ///
    /// ## Arguments
    /// * 'bytes' - The bytes to append verbatim (length prefix included)
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
        let data: [u8; 30] = [
            0x00,
            0x1b, 0x48, 0x00, 0x65, 0x00, 0x6c, 0x00, 0x6c, 0x00, 0x6f, 0x00, 0x2c, 0x00,
            0x20, 0x00, 0x57, 0x00, 0x6f, 0x00, 0x72, 0x00, 0x6c, 0x00, 0x64, 0x00, 0x21,
            0x00, 0x00,
            0x00,
        ];

        let heap = UserStringsHeap::from(&data).unwrap();
        assert_eq!(heap.get(1).unwrap().to_string_lossy(), "Hello, World!");
        assert_eq!(heap.terminal_byte(1).unwrap(), 0);
        assert_eq!(heap.get(0).unwrap().len(), 0);
    }

    #[test]
    fn invalid() {
        assert!(UserStringsHeap::from(&[]).is_err());
        assert!(UserStringsHeap::from(&[0x22, 0x00]).is_err());

        // Even length: no room for a terminal byte
        let heap = UserStringsHeap::from(&[0x00, 0x02, 0x41, 0x00]).unwrap();
        assert!(heap.get(1).is_err());

        // Truncated payload
        let heap = UserStringsHeap::from(&[0x00, 0x05, 0x41]).unwrap();
        assert!(heap.get(1).is_err());
    }

    #[test]
    fn terminal_byte_for_special_chars() {
        let mut buffer = UserStringsBuffer::new();

        // 0x27 is in the special set
        let apostrophe = buffer.get_or_add("My String\u{27}").unwrap();
        // Plain ASCII letter is not
        let plain = buffer.get_or_add("My StringA").unwrap();
        // 0x09 (tab) is not special either
        let tab = buffer.get_or_add("My String\t").unwrap();

        let stream = buffer.create_stream();
        let heap = UserStringsHeap::from(&stream).unwrap();
        assert_eq!(heap.terminal_byte(apostrophe).unwrap(), 1);
        assert_eq!(heap.terminal_byte(plain).unwrap(), 0);
        assert_eq!(heap.terminal_byte(tab).unwrap(), 0);
    }

    #[test]
    fn special_char_set() {
        assert!(is_special_char(0x01));
        assert!(is_special_char(0x08));
        assert!(!is_special_char(0x09));
        assert!(!is_special_char(0x0D));
        assert!(is_special_char(0x0E));
        assert!(is_special_char(0x1F));
        assert!(!is_special_char(0x20));
        assert!(is_special_char(0x27));
        assert!(is_special_char(0x2D));
        assert!(!is_special_char(0x2E));
        assert!(!is_special_char(0x7E));
        assert!(is_special_char(0x7F));
        assert!(is_special_char(0x263A));
    }

    #[test]
    fn interning_by_decoded_value() {
        let mut buffer = UserStringsBuffer::new();
        let first = buffer.get_or_add("literal").unwrap();
        let second = buffer.get_or_add("literal").unwrap();
        assert_eq!(first, second);

        let other = buffer.get_or_add("different").unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn roundtrip_non_bmp() {
        let mut buffer = UserStringsBuffer::new();
        let offset = buffer.get_or_add("a\u{1F600}b").unwrap();

        let stream = buffer.create_stream();
        let heap = UserStringsHeap::from(&stream).unwrap();
        assert_eq!(heap.get(offset).unwrap().to_string_lossy(), "a\u{1F600}b");
        // Surrogates are >= 0x7F
        assert_eq!(heap.terminal_byte(offset).unwrap(), 1);
    }
}
