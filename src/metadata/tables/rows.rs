//! Typed row definitions for the standard metadata tables.
//!
//! Each row type declares its ordered column schema (ECMA-335 §II.22) once; reading,
//! writing and sizing all derive from that declaration. Rows store every column
//! widened to `u32` regardless of its serialized width, so row values are independent
//! of the per-image layout and compare structurally across images.
//!
//! Row equality and hashing are structural over the column tuple; hashing folds the
//! columns with the `(h * 397) ^ column` recurrence in 32-bit wrapping space.

use std::hash::{Hash, Hasher};

use crate::{
    metadata::tables::{
        read_column, write_column, CodedIndexKind, ColumnKind, RowRead, RowWrite, TableId,
        TableInfo, TableRow,
    },
    Result,
};

macro_rules! metadata_rows {
    ($(
        $(#[$meta:meta])*
        $name:ident ($table:expr) {
            $($field:ident: $kind:expr),+ $(,)?
        } $(sorted_by ($key0:ident $(, $key1:ident)?))? ;
    )*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
            pub struct $name {
                $(
                    #[doc = concat!("Raw `", stringify!($field), "` column value")]
                    pub $field: u32,
                )+
            }

            impl $name {
                /// Creates a row from its column values in schema order
                #[must_use]
                pub fn new($($field: u32),+) -> Self {
                    Self { $($field),+ }
                }
            }

            impl TableRow for $name {
                const TABLE: TableId = $table;

                fn schema() -> &'static [ColumnKind] {
                    &[$($kind),+]
                }

                $(
                    const SORTED: bool = true;

                    fn sort_key(&self) -> Option<(u32, u32)> {
                        #[allow(unused_mut, unused_assignments)]
                        let mut secondary = 0;
                        $(secondary = self.$key1;)?
                        Some((self.$key0, secondary))
                    }
                )?
            }

            impl RowRead for $name {
                fn row_read(data: &[u8], offset: &mut usize, info: &TableInfo) -> Result<Self> {
                    Ok(Self {
                        $($field: read_column(data, offset, $kind, info)?,)+
                    })
                }
            }

            impl RowWrite for $name {
                fn row_write(
                    &self,
                    data: &mut [u8],
                    offset: &mut usize,
                    info: &TableInfo,
                ) -> Result<()> {
                    $(write_column(data, offset, self.$field, $kind, info)?;)+
                    Ok(())
                }
            }

            impl Hash for $name {
                fn hash<H: Hasher>(&self, state: &mut H) {
                    let mut combined = 0u32;
                    $(combined = combined.wrapping_mul(397) ^ self.$field;)+
                    state.write_u32(combined);
                }
            }
        )*
    };
}

metadata_rows! {
    /// Row of the Module table (0x00): the module definition of this image.
    ModuleRow (TableId::Module) {
        generation: ColumnKind::Fixed2,
        name: ColumnKind::Str,
        mvid: ColumnKind::Guid,
        enc_id: ColumnKind::Guid,
        enc_base_id: ColumnKind::Guid,
    };

    /// Row of the TypeRef table (0x01): a reference to a type in another scope.
    TypeRefRow (TableId::TypeRef) {
        resolution_scope: ColumnKind::Coded(CodedIndexKind::ResolutionScope),
        type_name: ColumnKind::Str,
        type_namespace: ColumnKind::Str,
    };

    /// Row of the TypeDef table (0x02): a type definition of this module.
    ///
    /// `field_list` and `method_list` are the 1-based start indexes of this type's
    /// member ranges; the range ends where the next type's range begins.
    TypeDefRow (TableId::TypeDef) {
        flags: ColumnKind::Fixed4,
        type_name: ColumnKind::Str,
        type_namespace: ColumnKind::Str,
        extends: ColumnKind::Coded(CodedIndexKind::TypeDefOrRef),
        field_list: ColumnKind::Table(TableId::Field),
        method_list: ColumnKind::Table(TableId::MethodDef),
    };

    /// Row of the FieldPtr table (0x03): indirection for uncompressed field lists.
    FieldPtrRow (TableId::FieldPtr) {
        field: ColumnKind::Table(TableId::Field),
    };

    /// Row of the Field table (0x04): a field definition.
    FieldRow (TableId::Field) {
        flags: ColumnKind::Fixed2,
        name: ColumnKind::Str,
        signature: ColumnKind::Blob,
    };

    /// Row of the MethodPtr table (0x05): indirection for uncompressed method lists.
    MethodPtrRow (TableId::MethodPtr) {
        method: ColumnKind::Table(TableId::MethodDef),
    };

    /// Row of the MethodDef table (0x06): a method definition.
    MethodDefRow (TableId::MethodDef) {
        rva: ColumnKind::Fixed4,
        impl_flags: ColumnKind::Fixed2,
        flags: ColumnKind::Fixed2,
        name: ColumnKind::Str,
        signature: ColumnKind::Blob,
        param_list: ColumnKind::Table(TableId::Param),
    };

    /// Row of the ParamPtr table (0x07): indirection for uncompressed parameter lists.
    ParamPtrRow (TableId::ParamPtr) {
        param: ColumnKind::Table(TableId::Param),
    };

    /// Row of the Param table (0x08): a parameter definition.
    ParamRow (TableId::Param) {
        flags: ColumnKind::Fixed2,
        sequence: ColumnKind::Fixed2,
        name: ColumnKind::Str,
    };

    /// Row of the InterfaceImpl table (0x09): one interface implemented by a type.
    InterfaceImplRow (TableId::InterfaceImpl) {
        class: ColumnKind::Table(TableId::TypeDef),
        interface: ColumnKind::Coded(CodedIndexKind::TypeDefOrRef),
    } sorted_by (class, interface);

    /// Row of the MemberRef table (0x0A): a reference to a member of another scope.
    MemberRefRow (TableId::MemberRef) {
        class: ColumnKind::Coded(CodedIndexKind::MemberRefParent),
        name: ColumnKind::Str,
        signature: ColumnKind::Blob,
    };

    /// Row of the Constant table (0x0B): a compile-time constant value.
    ///
    /// `element_type` holds the element-type byte in its low 8 bits; the high byte of
    /// the 16-bit column is padding and always zero.
    ConstantRow (TableId::Constant) {
        element_type: ColumnKind::Fixed2,
        parent: ColumnKind::Coded(CodedIndexKind::HasConstant),
        value: ColumnKind::Blob,
    } sorted_by (parent);

    /// Row of the CustomAttribute table (0x0C): a custom attribute application.
    CustomAttributeRow (TableId::CustomAttribute) {
        parent: ColumnKind::Coded(CodedIndexKind::HasCustomAttribute),
        constructor: ColumnKind::Coded(CodedIndexKind::CustomAttributeType),
        value: ColumnKind::Blob,
    } sorted_by (parent);

    /// Row of the FieldMarshal table (0x0D): a native marshalling descriptor.
    FieldMarshalRow (TableId::FieldMarshal) {
        parent: ColumnKind::Coded(CodedIndexKind::HasFieldMarshal),
        native_type: ColumnKind::Blob,
    } sorted_by (parent);

    /// Row of the DeclSecurity table (0x0E): a declarative security permission set.
    DeclSecurityRow (TableId::DeclSecurity) {
        action: ColumnKind::Fixed2,
        parent: ColumnKind::Coded(CodedIndexKind::HasDeclSecurity),
        permission_set: ColumnKind::Blob,
    } sorted_by (parent);

    /// Row of the ClassLayout table (0x0F): explicit layout of a type.
    ClassLayoutRow (TableId::ClassLayout) {
        packing_size: ColumnKind::Fixed2,
        class_size: ColumnKind::Fixed4,
        parent: ColumnKind::Table(TableId::TypeDef),
    } sorted_by (parent);

    /// Row of the FieldLayout table (0x10): the explicit offset of a field.
    FieldLayoutRow (TableId::FieldLayout) {
        offset: ColumnKind::Fixed4,
        field: ColumnKind::Table(TableId::Field),
    } sorted_by (field);

    /// Row of the StandAloneSig table (0x11): a standalone signature.
    StandAloneSigRow (TableId::StandAloneSig) {
        signature: ColumnKind::Blob,
    };

    /// Row of the EventMap table (0x12): the event range of a type.
    EventMapRow (TableId::EventMap) {
        parent: ColumnKind::Table(TableId::TypeDef),
        event_list: ColumnKind::Table(TableId::Event),
    };

    /// Row of the EventPtr table (0x13): indirection for uncompressed event lists.
    EventPtrRow (TableId::EventPtr) {
        event: ColumnKind::Table(TableId::Event),
    };

    /// Row of the Event table (0x14): an event definition.
    EventRow (TableId::Event) {
        event_flags: ColumnKind::Fixed2,
        name: ColumnKind::Str,
        event_type: ColumnKind::Coded(CodedIndexKind::TypeDefOrRef),
    };

    /// Row of the PropertyMap table (0x15): the property range of a type.
    PropertyMapRow (TableId::PropertyMap) {
        parent: ColumnKind::Table(TableId::TypeDef),
        property_list: ColumnKind::Table(TableId::Property),
    };

    /// Row of the PropertyPtr table (0x16): indirection for uncompressed property lists.
    PropertyPtrRow (TableId::PropertyPtr) {
        property: ColumnKind::Table(TableId::Property),
    };

    /// Row of the Property table (0x17): a property definition.
    PropertyRow (TableId::Property) {
        flags: ColumnKind::Fixed2,
        name: ColumnKind::Str,
        signature: ColumnKind::Blob,
    };

    /// Row of the MethodSemantics table (0x18): an accessor association.
    MethodSemanticsRow (TableId::MethodSemantics) {
        semantics: ColumnKind::Fixed2,
        method: ColumnKind::Table(TableId::MethodDef),
        association: ColumnKind::Coded(CodedIndexKind::HasSemantics),
    } sorted_by (association);

    /// Row of the MethodImpl table (0x19): an explicit method override.
    MethodImplRow (TableId::MethodImpl) {
        class: ColumnKind::Table(TableId::TypeDef),
        method_body: ColumnKind::Coded(CodedIndexKind::MethodDefOrRef),
        method_declaration: ColumnKind::Coded(CodedIndexKind::MethodDefOrRef),
    } sorted_by (class);

    /// Row of the ModuleRef table (0x1A): a reference to an external module.
    ModuleRefRow (TableId::ModuleRef) {
        name: ColumnKind::Str,
    };

    /// Row of the TypeSpec table (0x1B): a type specification signature.
    TypeSpecRow (TableId::TypeSpec) {
        signature: ColumnKind::Blob,
    };

    /// Row of the ImplMap table (0x1C): P/Invoke forwarding of a member.
    ImplMapRow (TableId::ImplMap) {
        mapping_flags: ColumnKind::Fixed2,
        member_forwarded: ColumnKind::Coded(CodedIndexKind::MemberForwarded),
        import_name: ColumnKind::Str,
        import_scope: ColumnKind::Table(TableId::ModuleRef),
    } sorted_by (member_forwarded);

    /// Row of the FieldRVA table (0x1D): the initial data location of a field.
    FieldRvaRow (TableId::FieldRva) {
        rva: ColumnKind::Fixed4,
        field: ColumnKind::Table(TableId::Field),
    } sorted_by (field);

    /// Row of the EncLog table (0x1E): an edit-and-continue log entry.
    EncLogRow (TableId::EncLog) {
        token: ColumnKind::Fixed4,
        func_code: ColumnKind::Fixed4,
    };

    /// Row of the EncMap table (0x1F): an edit-and-continue map entry.
    EncMapRow (TableId::EncMap) {
        token: ColumnKind::Fixed4,
    };

    /// Row of the Assembly table (0x20): the assembly manifest of this image.
    AssemblyRow (TableId::Assembly) {
        hash_alg_id: ColumnKind::Fixed4,
        major_version: ColumnKind::Fixed2,
        minor_version: ColumnKind::Fixed2,
        build_number: ColumnKind::Fixed2,
        revision_number: ColumnKind::Fixed2,
        flags: ColumnKind::Fixed4,
        public_key: ColumnKind::Blob,
        name: ColumnKind::Str,
        culture: ColumnKind::Str,
    };

    /// Row of the AssemblyProcessor table (0x21): reserved.
    AssemblyProcessorRow (TableId::AssemblyProcessor) {
        processor: ColumnKind::Fixed4,
    };

    /// Row of the AssemblyOS table (0x22): reserved.
    AssemblyOsRow (TableId::AssemblyOs) {
        os_platform_id: ColumnKind::Fixed4,
        os_major_version: ColumnKind::Fixed4,
        os_minor_version: ColumnKind::Fixed4,
    };

    /// Row of the AssemblyRef table (0x23): a reference to an external assembly.
    AssemblyRefRow (TableId::AssemblyRef) {
        major_version: ColumnKind::Fixed2,
        minor_version: ColumnKind::Fixed2,
        build_number: ColumnKind::Fixed2,
        revision_number: ColumnKind::Fixed2,
        flags: ColumnKind::Fixed4,
        public_key_or_token: ColumnKind::Blob,
        name: ColumnKind::Str,
        culture: ColumnKind::Str,
        hash_value: ColumnKind::Blob,
    };

    /// Row of the AssemblyRefProcessor table (0x24): reserved.
    AssemblyRefProcessorRow (TableId::AssemblyRefProcessor) {
        processor: ColumnKind::Fixed4,
        assembly_ref: ColumnKind::Table(TableId::AssemblyRef),
    };

    /// Row of the AssemblyRefOS table (0x25): reserved.
    AssemblyRefOsRow (TableId::AssemblyRefOs) {
        os_platform_id: ColumnKind::Fixed4,
        os_major_version: ColumnKind::Fixed4,
        os_minor_version: ColumnKind::Fixed4,
        assembly_ref: ColumnKind::Table(TableId::AssemblyRef),
    };

    /// Row of the File table (0x26): a file of a multi-file assembly.
    FileRow (TableId::File) {
        flags: ColumnKind::Fixed4,
        name: ColumnKind::Str,
        hash_value: ColumnKind::Blob,
    };

    /// Row of the ExportedType table (0x27): a type exported from another module.
    ExportedTypeRow (TableId::ExportedType) {
        flags: ColumnKind::Fixed4,
        type_def_id: ColumnKind::Fixed4,
        type_name: ColumnKind::Str,
        type_namespace: ColumnKind::Str,
        implementation: ColumnKind::Coded(CodedIndexKind::Implementation),
    };

    /// Row of the ManifestResource table (0x28): an embedded or linked resource.
    ManifestResourceRow (TableId::ManifestResource) {
        offset: ColumnKind::Fixed4,
        flags: ColumnKind::Fixed4,
        name: ColumnKind::Str,
        implementation: ColumnKind::Coded(CodedIndexKind::Implementation),
    };

    /// Row of the NestedClass table (0x29): the nesting relation between two types.
    NestedClassRow (TableId::NestedClass) {
        nested_class: ColumnKind::Table(TableId::TypeDef),
        enclosing_class: ColumnKind::Table(TableId::TypeDef),
    } sorted_by (nested_class);

    /// Row of the GenericParam table (0x2A): a generic parameter definition.
    GenericParamRow (TableId::GenericParam) {
        number: ColumnKind::Fixed2,
        flags: ColumnKind::Fixed2,
        owner: ColumnKind::Coded(CodedIndexKind::TypeOrMethodDef),
        name: ColumnKind::Str,
    } sorted_by (owner, number);

    /// Row of the MethodSpec table (0x2B): a generic method instantiation.
    MethodSpecRow (TableId::MethodSpec) {
        method: ColumnKind::Coded(CodedIndexKind::MethodDefOrRef),
        instantiation: ColumnKind::Blob,
    };

    /// Row of the GenericParamConstraint table (0x2C): a constraint on a generic
    /// parameter.
    GenericParamConstraintRow (TableId::GenericParamConstraint) {
        owner: ColumnKind::Table(TableId::GenericParam),
        constraint: ColumnKind::Coded(CodedIndexKind::TypeDefOrRef),
    } sorted_by (owner);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn small_info() -> TableInfo {
        TableInfo::from_flags(&[(TableId::TypeDef, 10), (TableId::NestedClass, 2)], 0)
    }

    fn large_info() -> TableInfo {
        TableInfo::from_flags(
            &[
                (TableId::TypeDef, 0x0002_0000),
                (TableId::NestedClass, 0x0002_0000),
            ],
            0b111,
        )
    }

    fn raw_hash<T: Hash>(row: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        row.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn nested_class_equality_and_hash() {
        // Two rows referencing TypeDef 5 nested in TypeDef 2
        let a = NestedClassRow::new(
            crate::metadata::token::Token::new(0x0200_0005).row(),
            crate::metadata::token::Token::new(0x0200_0002).row(),
        );
        let b = NestedClassRow::new(5, 2);
        assert_eq!(a, b);
        assert_eq!(raw_hash(&a), raw_hash(&b));

        // The combined 32-bit value folds as (5 * 397) ^ 2
        let mut combined = 0u32;
        combined = combined.wrapping_mul(397) ^ 5;
        combined = combined.wrapping_mul(397) ^ 2;
        assert_eq!(combined, (5u32.wrapping_mul(397)) ^ 2);

        let c = NestedClassRow::new(5, 3);
        assert_ne!(a, c);
    }

    #[test]
    fn crafted_short() {
        let data = vec![
            0x01, 0x01, // nested_class
            0x02, 0x02, // enclosing_class
        ];

        let info = small_info();
        let mut offset = 0;
        let row = NestedClassRow::row_read(&data, &mut offset, &info).unwrap();
        assert_eq!(offset, 4);
        assert_eq!(row.nested_class, 0x0101);
        assert_eq!(row.enclosing_class, 0x0202);
        assert_eq!(NestedClassRow::row_size(&info), 4);
    }

    #[test]
    fn crafted_long() {
        let data = vec![
            0x01, 0x01, 0x01, 0x01, // nested_class
            0x02, 0x02, 0x02, 0x02, // enclosing_class
        ];

        let info = large_info();
        let mut offset = 0;
        let row = NestedClassRow::row_read(&data, &mut offset, &info).unwrap();
        assert_eq!(offset, 8);
        assert_eq!(row.nested_class, 0x0101_0101);
        assert_eq!(row.enclosing_class, 0x0202_0202);
        assert_eq!(NestedClassRow::row_size(&info), 8);
    }

    #[test]
    fn write_read_roundtrip_both_widths() {
        let row = TypeDefRow::new(0x0010_0001, 0x42, 0x43, (3 << 2) | 1, 7, 9);

        for info in [small_info(), large_info()] {
            let size = TypeDefRow::row_size(&info) as usize;
            let mut data = vec![0u8; size];
            let mut offset = 0;
            row.row_write(&mut data, &mut offset, &info).unwrap();
            assert_eq!(offset, size);

            let mut read_offset = 0;
            let read = TypeDefRow::row_read(&data, &mut read_offset, &info).unwrap();
            assert_eq!(read, row);
        }
    }

    #[test]
    fn narrow_write_rejects_wide_values() {
        let row = NestedClassRow::new(0x0001_0000, 1);
        let info = small_info();
        let mut data = vec![0u8; 4];
        let mut offset = 0;
        assert!(row.row_write(&mut data, &mut offset, &info).is_err());
    }

    #[test]
    fn module_schema_layout() {
        let info = small_info();
        // generation(2) + name(2) + three guid indexes(2 each)
        assert_eq!(ModuleRow::row_size(&info), 10);

        let info = large_info();
        assert_eq!(ModuleRow::row_size(&info), 2 + 4 + 4 + 4 + 4);
    }

    #[test]
    fn sort_keys() {
        let iface = InterfaceImplRow::new(4, 17);
        assert_eq!(iface.sort_key(), Some((4, 17)));

        let generic = GenericParamRow::new(1, 0, 9, 5);
        assert_eq!(generic.sort_key(), Some((9, 1)));

        let module = ModuleRow::default();
        assert_eq!(module.sort_key(), None);
    }
}
