//! Parsed `#~` table stream: header fields and typed table access.

use std::sync::Arc;
use strum::IntoEnumIterator;

use crate::{
    file::io::{read_le, read_le_at},
    metadata::tables::{MetadataTable, RowRead, TableId, TableInfo, TableInfoRef},
    Error::EndOfStream,
    Result,
};

macro_rules! dispatch_row_size {
    ($table:expr, $info:expr, $(($id:path, $row:ty)),* $(,)?) => {
        match $table {
            $( $id => <$row as TableRow>::row_size($info), )*
        }
    };
}

/// Byte size of one serialized row of the given table under `info`.
#[must_use]
pub(crate) fn row_size_of(table: TableId, info: &TableInfo) -> u32 {
    use crate::metadata::tables::*;

    dispatch_row_size!(
        table,
        info,
        (TableId::Module, ModuleRow),
        (TableId::TypeRef, TypeRefRow),
        (TableId::TypeDef, TypeDefRow),
        (TableId::FieldPtr, FieldPtrRow),
        (TableId::Field, FieldRow),
        (TableId::MethodPtr, MethodPtrRow),
        (TableId::MethodDef, MethodDefRow),
        (TableId::ParamPtr, ParamPtrRow),
        (TableId::Param, ParamRow),
        (TableId::InterfaceImpl, InterfaceImplRow),
        (TableId::MemberRef, MemberRefRow),
        (TableId::Constant, ConstantRow),
        (TableId::CustomAttribute, CustomAttributeRow),
        (TableId::FieldMarshal, FieldMarshalRow),
        (TableId::DeclSecurity, DeclSecurityRow),
        (TableId::ClassLayout, ClassLayoutRow),
        (TableId::FieldLayout, FieldLayoutRow),
        (TableId::StandAloneSig, StandAloneSigRow),
        (TableId::EventMap, EventMapRow),
        (TableId::EventPtr, EventPtrRow),
        (TableId::Event, EventRow),
        (TableId::PropertyMap, PropertyMapRow),
        (TableId::PropertyPtr, PropertyPtrRow),
        (TableId::Property, PropertyRow),
        (TableId::MethodSemantics, MethodSemanticsRow),
        (TableId::MethodImpl, MethodImplRow),
        (TableId::ModuleRef, ModuleRefRow),
        (TableId::TypeSpec, TypeSpecRow),
        (TableId::ImplMap, ImplMapRow),
        (TableId::FieldRva, FieldRvaRow),
        (TableId::EncLog, EncLogRow),
        (TableId::EncMap, EncMapRow),
        (TableId::Assembly, AssemblyRow),
        (TableId::AssemblyProcessor, AssemblyProcessorRow),
        (TableId::AssemblyOs, AssemblyOsRow),
        (TableId::AssemblyRef, AssemblyRefRow),
        (TableId::AssemblyRefProcessor, AssemblyRefProcessorRow),
        (TableId::AssemblyRefOs, AssemblyRefOsRow),
        (TableId::File, FileRow),
        (TableId::ExportedType, ExportedTypeRow),
        (TableId::ManifestResource, ManifestResourceRow),
        (TableId::NestedClass, NestedClassRow),
        (TableId::GenericParam, GenericParamRow),
        (TableId::MethodSpec, MethodSpecRow),
        (TableId::GenericParamConstraint, GenericParamConstraintRow),
    )
}

/// The parsed `#~` stream of one metadata directory.
///
/// Holds the header fields, the per-image [`TableInfo`] derived from the row count
/// vector and heap-sizes flag byte, and the body offsets of every present table.
/// Rows stay unparsed until a typed [`TablesStream::table`] view materialises them.
///
/// # Examples
///
/// ```rust,no_run
/// use cilforge::metadata::tables::{TablesStream, TableId, TypeDefRow};
///
/// # fn example(data: &[u8]) -> cilforge::Result<()> {
/// let tables = TablesStream::parse(data)?;
/// if let Some(typedefs) = tables.table::<TypeDefRow>()? {
///     for row in typedefs.iter() {
///         println!("type name index {}", row.type_name);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct TablesStream<'a> {
    /// Major version of the table schema, 2 for ECMA-335 images
    pub major_version: u8,
    /// Minor version of the table schema, 0 for ECMA-335 images
    pub minor_version: u8,
    /// Bitmask of present tables
    pub valid: u64,
    /// Bitmask of tables the image declares sorted
    pub sorted: u64,
    /// Width oracle derived from the header
    pub info: TableInfoRef,
    data: &'a [u8],
    bodies: Vec<Option<(usize, u32)>>,
}

impl<'a> TablesStream<'a> {
    /// Parse a `#~` stream from its first byte
    ///
    /// ## Arguments
    /// * 'data' - The stream bytes, starting at the reserved leading u32
    ///
    /// # Errors
    /// Returns [`EndOfStream`] for truncated input or
    /// [`crate::Error::BadImageFormat`] for valid-mask bits naming unknown tables
    pub fn parse(data: &'a [u8]) -> Result<TablesStream<'a>> {
        if data.len() < 24 {
            return Err(EndOfStream);
        }

        let major_version = read_le::<u8>(&data[4..])?;
        let minor_version = read_le::<u8>(&data[5..])?;
        let heap_size_flags = read_le::<u8>(&data[6..])?;
        let valid = read_le::<u64>(&data[8..])?;
        let sorted = read_le::<u64>(&data[16..])?;

        if valid == 0 {
            return Err(bad_image_error!("No valid rows in any of the tables"));
        }

        let known_mask = TableId::iter().fold(0u64, |mask, id| mask | (1u64 << (id as usize)));
        if valid & !known_mask != 0 {
            return Err(bad_image_error!(
                "Valid mask 0x{:016x} names unknown tables",
                valid
            ));
        }

        // Row count vector: one u32 per set bit, in table index order
        let mut counts: Vec<(TableId, u32)> = Vec::with_capacity(valid.count_ones() as usize);
        let mut offset = 24usize;
        for table_id in TableId::iter() {
            if valid & (1u64 << (table_id as usize)) == 0 {
                continue;
            }

            counts.push((table_id, read_le_at::<u32>(data, &mut offset)?));
        }

        let info = Arc::new(TableInfo::from_flags(&counts, heap_size_flags));

        let mut bodies = vec![None; TableId::SLOTS];
        for (table_id, rows) in &counts {
            let size = u64::from(*rows) * u64::from(row_size_of(*table_id, &info));
            let Ok(size) = usize::try_from(size) else {
                return Err(EndOfStream);
            };

            if offset + size > data.len() {
                return Err(EndOfStream);
            }

            bodies[*table_id as usize] = Some((offset, *rows));
            offset += size;
        }

        Ok(TablesStream {
            major_version,
            minor_version,
            valid,
            sorted,
            info,
            data,
            bodies,
        })
    }

    /// Number of present tables
    #[must_use]
    pub fn table_count(&self) -> u32 {
        self.valid.count_ones()
    }

    /// Returns true if the given table is present
    ///
    /// ## Arguments
    /// * 'table' - The table to query
    #[must_use]
    pub fn has_table(&self, table: TableId) -> bool {
        self.valid & (1u64 << (table as usize)) != 0
    }

    /// Row count of the given table (0 when absent)
    ///
    /// ## Arguments
    /// * 'table' - The table to query
    #[must_use]
    pub fn row_count(&self, table: TableId) -> u32 {
        match self.bodies[table as usize] {
            Some((_, rows)) => rows,
            None => 0,
        }
    }

    /// Typed lazy view over the rows of table `T`, or `None` when absent
    ///
    /// # Errors
    /// Returns [`EndOfStream`] if the recorded body range is inconsistent
    pub fn table<T: RowRead>(&self) -> Result<Option<MetadataTable<'a, T>>> {
        match self.bodies[T::TABLE as usize] {
            Some((offset, rows)) => Ok(Some(MetadataTable::new(
                &self.data[offset..],
                rows,
                self.info.clone(),
            )?)),
            None => Ok(None),
        }
    }

    /// Materialise every row of table `T` (empty when absent)
    ///
    /// # Errors
    /// Returns [`EndOfStream`] if the recorded body range is inconsistent
    pub fn rows<T: RowRead>(&self) -> Result<Vec<T>> {
        match self.table::<T>()? {
            Some(table) => Ok(table.iter().collect()),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::tables::NestedClassRow;

    fn crafted_stream() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&0u32.to_le_bytes()); // reserved
        data.push(2); // major
        data.push(0); // minor
        data.push(0); // heap sizes
        data.push(1); // reserved
        data.extend_from_slice(&(1u64 << 0x29).to_le_bytes()); // valid: NestedClass
        data.extend_from_slice(&0u64.to_le_bytes()); // sorted
        data.extend_from_slice(&2u32.to_le_bytes()); // NestedClass rows
        data.extend_from_slice(&[0x05, 0x00, 0x02, 0x00]); // row 1
        data.extend_from_slice(&[0x07, 0x00, 0x02, 0x00]); // row 2
        data
    }

    #[test]
    fn parse_crafted() {
        let data = crafted_stream();
        let stream = TablesStream::parse(&data).unwrap();

        assert_eq!(stream.major_version, 2);
        assert_eq!(stream.minor_version, 0);
        assert_eq!(stream.table_count(), 1);
        assert!(stream.has_table(TableId::NestedClass));
        assert!(!stream.has_table(TableId::TypeDef));
        assert_eq!(stream.row_count(TableId::NestedClass), 2);

        let table = stream.table::<NestedClassRow>().unwrap().unwrap();
        assert_eq!(table.get(1).unwrap(), NestedClassRow::new(5, 2));
        assert_eq!(table.get(2).unwrap(), NestedClassRow::new(7, 2));

        assert!(stream.table::<crate::metadata::tables::TypeDefRow>().unwrap().is_none());
    }

    #[test]
    fn rejects_empty_and_unknown() {
        assert!(TablesStream::parse(&[0u8; 8]).is_err());

        // Zero valid mask
        let mut data = crafted_stream();
        data[8..16].copy_from_slice(&0u64.to_le_bytes());
        assert!(TablesStream::parse(&data).is_err());

        // Bit 0x3F names no standard table
        let mut data = crafted_stream();
        data[8..16].copy_from_slice(&(1u64 << 0x3F).to_le_bytes());
        assert!(TablesStream::parse(&data).is_err());
    }

    #[test]
    fn rejects_truncated_body() {
        let mut data = crafted_stream();
        data.truncate(data.len() - 3);
        assert!(matches!(TablesStream::parse(&data), Err(EndOfStream)));
    }
}
