//! Per-image column width computation for the metadata tables.
//!
//! Column widths are not intrinsic to a row: whether an index column occupies 2 or
//! 4 bytes follows from the cardinality of the referenced table(s) and from the byte
//! sizes of the heaps. [`TableInfo`] captures one consistent answer for a whole image,
//! built either from a parsed `#~` header or from builder-supplied counts.

use std::sync::Arc;
use strum::{EnumCount, IntoEnumIterator};

use crate::metadata::tables::{CodedIndexKind, TableId};

/// Row count and index width information for one table
#[derive(Clone, Copy, Default, PartialEq, Debug)]
pub struct TableRowInfo {
    /// The count of rows in this table
    pub rows: u32,
    /// Number of bits required to represent any valid row index
    pub bits: u8,
    /// If the count exceeds `u16::MAX`, indexes of other tables into this one widen to 4 bytes
    pub is_large: bool,
}

impl TableRowInfo {
    /// Creates a new `TableRowInfo` for the given row count.
    ///
    /// # Arguments
    /// * `rows` - The number of rows in the table
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(rows: u32) -> Self {
        let bits = if rows == 0 {
            1
        } else {
            (32 - rows.leading_zeros()) as u8
        };

        Self {
            rows,
            bits,
            is_large: rows > u32::from(u16::MAX),
        }
    }
}

/// Column width oracle for one metadata image.
///
/// Holds the row count of every table, the large/small decision for each heap index,
/// and the precomputed bit width of every coded index kind. The builder recomputes an
/// instance whenever cardinalities or heap sizes change, and compares instances to
/// detect width convergence.
#[derive(Clone, Default, PartialEq)]
pub struct TableInfo {
    rows: Vec<TableRowInfo>,
    coded_bits: Vec<u8>,
    is_large_index_str: bool,
    is_large_index_guid: bool,
    is_large_index_blob: bool,
}

/// Cheap-copy reference to a `TableInfo` structure
pub type TableInfoRef = Arc<TableInfo>;

impl TableInfo {
    /// Build a `TableInfo` from per-table row counts and the heap-sizes flag byte of a
    /// parsed `#~` header.
    ///
    /// ## Arguments
    /// * 'counts' - (table, row count) pairs for every present table
    /// * '`heap_size_flags`' - The header flag byte; bit 0 = wide `#Strings`,
    ///   bit 1 = wide `#GUID`, bit 2 = wide `#Blob`
    #[must_use]
    pub fn from_flags(counts: &[(TableId, u32)], heap_size_flags: u8) -> Self {
        let mut info = TableInfo {
            rows: vec![TableRowInfo::default(); TableId::SLOTS],
            coded_bits: vec![0; CodedIndexKind::COUNT],
            is_large_index_str: heap_size_flags & 0x01 != 0,
            is_large_index_guid: heap_size_flags & 0x02 != 0,
            is_large_index_blob: heap_size_flags & 0x04 != 0,
        };

        for (table, rows) in counts {
            info.rows[*table as usize] = TableRowInfo::new(*rows);
        }

        info.calculate_coded_index_bits();
        info
    }

    /// Build a `TableInfo` from builder-side row counts and heap byte sizes.
    ///
    /// A heap index widens to 4 bytes once its heap exceeds `0xFFFF` bytes.
    ///
    /// ## Arguments
    /// * 'counts' - Row counts indexed by `TableId as usize`
    /// * '`string_bytes`' / '`guid_bytes`' / '`blob_bytes`' - Current heap sizes
    #[must_use]
    pub fn from_counts(
        counts: &[u32; TableId::SLOTS],
        string_bytes: u32,
        guid_bytes: u32,
        blob_bytes: u32,
    ) -> Self {
        let mut info = TableInfo {
            rows: counts.iter().map(|rows| TableRowInfo::new(*rows)).collect(),
            coded_bits: vec![0; CodedIndexKind::COUNT],
            is_large_index_str: string_bytes > u32::from(u16::MAX),
            is_large_index_guid: guid_bytes > u32::from(u16::MAX),
            is_large_index_blob: blob_bytes > u32::from(u16::MAX),
        };

        info.calculate_coded_index_bits();
        info
    }

    /// Returns true if the requested table holds more than `u16::MAX` rows, forcing
    /// 4 byte indexes into it
    ///
    /// ## Arguments
    /// * 'id' - The `TableId` to query
    #[must_use]
    pub fn is_large(&self, id: TableId) -> bool {
        self.rows[id as usize].is_large
    }

    /// Row count of the requested table
    ///
    /// ## Arguments
    /// * 'id' - The `TableId` to query
    #[must_use]
    pub fn row_count(&self, id: TableId) -> u32 {
        self.rows[id as usize].rows
    }

    /// Indicates whether indexes into `#Strings` are 4 bytes wide
    #[must_use]
    pub fn is_large_str(&self) -> bool {
        self.is_large_index_str
    }

    /// Indicates whether indexes into `#GUID` are 4 bytes wide
    #[must_use]
    pub fn is_large_guid(&self) -> bool {
        self.is_large_index_guid
    }

    /// Indicates whether indexes into `#Blob` are 4 bytes wide
    #[must_use]
    pub fn is_large_blob(&self) -> bool {
        self.is_large_index_blob
    }

    /// Byte width of `#Strings` indexes (2 or 4)
    #[must_use]
    pub fn str_bytes(&self) -> u8 {
        if self.is_large_index_str {
            4
        } else {
            2
        }
    }

    /// Byte width of `#GUID` indexes (2 or 4)
    #[must_use]
    pub fn guid_bytes(&self) -> u8 {
        if self.is_large_index_guid {
            4
        } else {
            2
        }
    }

    /// Byte width of `#Blob` indexes (2 or 4)
    #[must_use]
    pub fn blob_bytes(&self) -> u8 {
        if self.is_large_index_blob {
            4
        } else {
            2
        }
    }

    /// The heap-sizes flag byte as emitted in the `#~` header
    #[must_use]
    pub fn heap_sizes_flags(&self) -> u8 {
        let mut flags = 0;
        if self.is_large_index_str {
            flags |= 0x01;
        }
        if self.is_large_index_guid {
            flags |= 0x02;
        }
        if self.is_large_index_blob {
            flags |= 0x04;
        }
        flags
    }

    /// Byte width of indexes into a specific table (2 or 4)
    ///
    /// ## Arguments
    /// * '`table_id`' - The table being indexed
    #[must_use]
    pub fn table_index_bytes(&self, table_id: TableId) -> u8 {
        if self.rows[table_id as usize].is_large {
            4
        } else {
            2
        }
    }

    /// Bit width required by a coded index kind for this image
    ///
    /// ## Arguments
    /// * 'kind' - The coded index kind to query
    #[must_use]
    pub fn coded_index_bits(&self, kind: CodedIndexKind) -> u8 {
        self.coded_bits[kind as usize]
    }

    /// Byte width of a coded index kind for this image (2 or 4)
    ///
    /// ## Arguments
    /// * 'kind' - The coded index kind to query
    #[must_use]
    pub fn coded_index_bytes(&self, kind: CodedIndexKind) -> u8 {
        if self.coded_bits[kind as usize] > 16 {
            4
        } else {
            2
        }
    }

    fn calculate_coded_index_bits(&mut self) {
        for kind in CodedIndexKind::iter() {
            let max_bits = kind
                .tables()
                .iter()
                .flatten()
                .map(|table| self.rows[*table as usize].bits)
                .max()
                .unwrap_or(1);

            self.coded_bits[kind as usize] = max_bits + kind.tag_bits();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_with(counts: &[(TableId, u32)]) -> TableInfo {
        TableInfo::from_flags(counts, 0)
    }

    #[test]
    fn row_info_bits() {
        assert_eq!(TableRowInfo::new(0).bits, 1);
        assert_eq!(TableRowInfo::new(1).bits, 1);
        assert_eq!(TableRowInfo::new(2).bits, 2);
        assert_eq!(TableRowInfo::new(0xFFFF).bits, 16);
        assert!(!TableRowInfo::new(0xFFFF).is_large);
        assert!(TableRowInfo::new(0x1_0000).is_large);
    }

    #[test]
    fn small_image_uses_narrow_columns() {
        let info = info_with(&[(TableId::TypeDef, 10), (TableId::TypeRef, 5)]);

        assert_eq!(info.table_index_bytes(TableId::TypeDef), 2);
        assert_eq!(info.coded_index_bytes(CodedIndexKind::TypeDefOrRef), 2);
        assert_eq!(info.str_bytes(), 2);
        assert_eq!(info.heap_sizes_flags(), 0);
    }

    #[test]
    fn coded_index_crosses_threshold_before_plain_index() {
        // 0x4000 rows: a plain index still fits 2 bytes, but shifted left by the
        // 2 tag bits of TypeDefOrRef the coded value no longer does
        let info = info_with(&[(TableId::TypeDef, 0x4000)]);
        assert_eq!(info.table_index_bytes(TableId::TypeDef), 2);
        assert_eq!(info.coded_index_bytes(CodedIndexKind::TypeDefOrRef), 4);

        // 0x3FFF rows shifted by 2 bits still fits
        let info = info_with(&[(TableId::TypeDef, 0x3FFF)]);
        assert_eq!(info.coded_index_bytes(CodedIndexKind::TypeDefOrRef), 2);
    }

    #[test]
    fn coded_index_takes_the_largest_candidate() {
        let info = info_with(&[(TableId::TypeDef, 1), (TableId::TypeSpec, 0x5000)]);
        assert_eq!(info.coded_index_bytes(CodedIndexKind::TypeDefOrRef), 4);
        // Kinds not involving TypeSpec stay narrow
        assert_eq!(info.coded_index_bytes(CodedIndexKind::MethodDefOrRef), 2);
    }

    #[test]
    fn heap_flags_roundtrip() {
        let info = TableInfo::from_flags(&[(TableId::Module, 1)], 0b101);
        assert!(info.is_large_str());
        assert!(!info.is_large_guid());
        assert!(info.is_large_blob());
        assert_eq!(info.heap_sizes_flags(), 0b101);
        assert_eq!(info.str_bytes(), 4);
        assert_eq!(info.guid_bytes(), 2);
        assert_eq!(info.blob_bytes(), 4);
    }

    #[test]
    fn from_counts_matches_heap_sizes() {
        let mut counts = [0u32; TableId::SLOTS];
        counts[TableId::Module as usize] = 1;

        let info = TableInfo::from_counts(&counts, 0x1_0000, 0x10, 0xFFFF);
        assert!(info.is_large_str());
        assert!(!info.is_large_guid());
        assert!(!info.is_large_blob());
        assert_eq!(info.row_count(TableId::Module), 1);
    }
}
