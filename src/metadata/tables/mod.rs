//! Typed metadata tables: schema, coded indexes, lazy row access and the mutable store.
//!
//! The .NET metadata format organizes type, member and reference information in the
//! tables of the `#~` stream (ECMA-335 §II.22). This module provides:
//!
//! - [`TableId`] - identifiers of the standard tables
//! - [`ColumnKind`] / [`TableRow`] - the static per-table column schema
//! - [`TableInfo`] - per-image column width computation
//! - [`CodedIndexKind`] / [`CodedIndex`] - compact cross-table references
//! - [`MetadataTable`] - zero-copy lazy row access over a parsed image
//! - [`TableStore`] - the mutable typed row store the builder serialises
//! - [`TablesStream`] - the parsed `#~` stream header and its tables
//!
//! Row indexes are 1-based at every public surface, matching the CLI convention;
//! index 0 denotes the null reference.

mod coded;
mod id;
mod info;
mod rows;
mod store;
mod stream;
mod table;

pub use coded::{CodedIndex, CodedIndexKind};
pub use id::TableId;
pub use info::{TableInfo, TableInfoRef, TableRowInfo};
pub use rows::{
    AssemblyOsRow, AssemblyProcessorRow, AssemblyRefOsRow, AssemblyRefProcessorRow,
    AssemblyRefRow, AssemblyRow, ClassLayoutRow, ConstantRow, CustomAttributeRow,
    DeclSecurityRow, EncLogRow, EncMapRow, EventMapRow, EventPtrRow, EventRow,
    ExportedTypeRow, FieldLayoutRow, FieldMarshalRow, FieldPtrRow, FieldRow, FieldRvaRow,
    FileRow, GenericParamConstraintRow, GenericParamRow, ImplMapRow, InterfaceImplRow,
    ManifestResourceRow, MemberRefRow, MethodDefRow, MethodImplRow, MethodPtrRow,
    MethodSemanticsRow, MethodSpecRow, ModuleRefRow, ModuleRow, NestedClassRow, ParamPtrRow,
    ParamRow, PropertyMapRow, PropertyPtrRow, PropertyRow, StandAloneSigRow, TypeDefRow,
    TypeRefRow, TypeSpecRow,
};
pub use store::{RowList, TableStore};
pub use stream::TablesStream;
pub use table::{MetadataTable, TableIterator, TableParIterator};

use crate::{
    file::io::{read_le_at_dyn, write_le_at_dyn},
    Result,
};

/// The schema kind of one table column.
///
/// Widths are not intrinsic: index columns are 2 or 4 bytes depending on the
/// cardinality of the referenced table(s) or the size of the referenced heap,
/// resolved per image through [`TableInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Fixed 16-bit column
    Fixed2,
    /// Fixed 32-bit column
    Fixed4,
    /// Index into the `#Strings` heap
    Str,
    /// Index into the `#GUID` heap
    Guid,
    /// Index into the `#Blob` heap
    Blob,
    /// Index into another table
    Table(TableId),
    /// Coded index over a candidate table union
    Coded(CodedIndexKind),
}

impl ColumnKind {
    /// Byte width of this column under the given width oracle (2 or 4)
    ///
    /// ## Arguments
    /// * 'info' - The width oracle of the current image
    #[must_use]
    pub fn bytes(&self, info: &TableInfo) -> u8 {
        match self {
            ColumnKind::Fixed2 => 2,
            ColumnKind::Fixed4 => 4,
            ColumnKind::Str => info.str_bytes(),
            ColumnKind::Guid => info.guid_bytes(),
            ColumnKind::Blob => info.blob_bytes(),
            ColumnKind::Table(table) => info.table_index_bytes(*table),
            ColumnKind::Coded(kind) => info.coded_index_bytes(*kind),
        }
    }
}

/// Reads one column value at its schema width, widening to `u32`.
pub(crate) fn read_column(
    data: &[u8],
    offset: &mut usize,
    kind: ColumnKind,
    info: &TableInfo,
) -> Result<u32> {
    match kind {
        ColumnKind::Fixed4 => crate::file::io::read_le_at::<u32>(data, offset),
        _ => read_le_at_dyn(data, offset, kind.bytes(info) == 4),
    }
}

/// Writes one column value at its schema width.
pub(crate) fn write_column(
    data: &mut [u8],
    offset: &mut usize,
    value: u32,
    kind: ColumnKind,
    info: &TableInfo,
) -> Result<()> {
    match kind {
        ColumnKind::Fixed4 => crate::file::io::write_le_at::<u32>(data, offset, value),
        _ => write_le_at_dyn(data, offset, value, kind.bytes(info) == 4),
    }
}

/// Static description shared by every typed row: the owning table and the ordered
/// column schema.
///
/// Together with [`TableInfo`] this is the complete layout answer for a table; the
/// declarations live in [`rows`](self) next to the row structs themselves.
pub trait TableRow: Sized + Send + Sync + 'static {
    /// The table this row type belongs to
    const TABLE: TableId;

    /// True for tables ECMA-335 requires sorted by their key
    const SORTED: bool = false;

    /// The ordered column schema of this table
    fn schema() -> &'static [ColumnKind];

    /// Byte size of one serialized row under the given width oracle
    ///
    /// ## Arguments
    /// * 'info' - The width oracle of the current image
    fn row_size(info: &TableInfo) -> u32 {
        Self::schema()
            .iter()
            .map(|column| u32::from(column.bytes(info)))
            .sum()
    }

    /// The ECMA-335 sort key of this row, for tables the standard requires sorted.
    ///
    /// Returns `None` for tables without a sort obligation. Keys are (primary,
    /// secondary) raw column values; coded index columns sort by their encoded value.
    fn sort_key(&self) -> Option<(u32, u32)> {
        None
    }
}

/// Deserialization of one table row from its binary representation.
pub trait RowRead: TableRow {
    /// Reads a single row from `data` at `offset`, advancing the offset by the
    /// amount of bytes consumed.
    ///
    /// ## Arguments
    /// * 'data' - The buffer holding the table body
    /// * 'offset' - Current read position, advanced on success
    /// * 'info' - The width oracle of the current image
    ///
    /// # Errors
    /// Returns [`crate::Error::EndOfStream`] if the buffer holds insufficient data
    fn row_read(data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<Self>;
}

/// Serialization of one table row into its binary representation.
pub trait RowWrite: TableRow {
    /// Writes this row into `data` at `offset`, advancing the offset by the amount
    /// of bytes produced.
    ///
    /// ## Arguments
    /// * 'data' - The destination buffer
    /// * 'offset' - Current write position, advanced on success
    /// * 'info' - The width oracle of the current image
    ///
    /// # Errors
    /// Returns [`crate::Error::EndOfStream`] if the buffer lacks space, or
    /// [`crate::Error::BadImageFormat`] if a value overflows its column width
    fn row_write(&self, data: &mut [u8], offset: &mut usize, info: &TableInfo) -> Result<()>;
}
