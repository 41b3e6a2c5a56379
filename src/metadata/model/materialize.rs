//! Materialisation of the object model from a parsed image.
//!
//! Walks the typed tables of a [`MetadataImage`] and builds the descriptor graph
//! rooted at the manifest module. Heap-addressed payloads (names, signature blobs,
//! marshalling blobs) are copied out so the resulting model owns its data; signature
//! blobs stay undecoded until first access.
//!
//! Descriptors are registered in the module's token registry under their source
//! tokens. Because registration follows row order against an empty registry, the
//! provisional token allocator reproduces the source rids exactly.

use std::sync::Arc;

use crate::{
    metadata::{
        heaps::{BlobHeap, StringsHeap},
        image::MetadataImage,
        marshalling,
        model::{
            AssemblyDefinition, AssemblyFlags, AssemblyReference, AssemblyVersion,
            FieldAttributes, FieldDefinition, FieldDefinitionRc, MemberReference,
            MethodAttributes, MethodDefinition, MethodDefinitionRc, ModuleDefinition,
            ModuleDefinitionRc, ParamAttributes, ParameterDefinition, ParameterDefinitionRc,
            TypeAttributes, TypeDefinition, TypeDefinitionRc, TypeRefScope,
            TypeReference, TypeSpecification,
        },
        tables::{
            AssemblyRefRow, AssemblyRow, CodedIndex, CodedIndexKind, ConstantRow,
            CustomAttributeRow, FieldMarshalRow, FieldRow, InterfaceImplRow, MemberRefRow,
            MethodDefRow, ModuleRow, NestedClassRow, ParamRow, TableId, TypeDefRow,
            TypeRefRow, TypeSpecRow,
        },
        token::Token,
    },
    Result,
};

fn heap_string(strings: &StringsHeap<'_>, offset: u32) -> Result<String> {
    Ok(strings.get(offset)?.to_string())
}

fn heap_string_opt(strings: &StringsHeap<'_>, offset: u32) -> Result<Option<String>> {
    if offset == 0 {
        return Ok(None);
    }
    Ok(Some(strings.get(offset)?.to_string()))
}

fn heap_blob_opt(blob: &BlobHeap<'_>, offset: u32) -> Result<Option<Vec<u8>>> {
    if offset == 0 {
        return Ok(None);
    }
    Ok(Some(blob.get(offset)?.to_vec()))
}

/// The end of a member range: the next row's list start, or one past the child
/// table's tail for the last row.
fn range_end<P>(rows: &[P], index: usize, child_count: u32, list_of: impl Fn(&P) -> u32) -> u32 {
    match rows.get(index + 1) {
        Some(next) => list_of(next),
        None => child_count + 1,
    }
}

impl ModuleDefinition {
    /// Materialise the object model from a parsed metadata image.
    ///
    /// Signature blobs are carried over undecoded; malformed signatures and
    /// dangling tokens inside them surface on first access of the owning
    /// descriptor, not here.
    ///
    /// ## Arguments
    /// * 'image' - The parsed image to materialise from
    ///
    /// # Errors
    /// Returns [`crate::Error::UnresolvableToken`] for rows referencing missing
    /// rows, or heap errors for rows referencing invalid heap entries
    pub fn from_image(image: &MetadataImage<'_>) -> Result<ModuleDefinitionRc> {
        let module = ModuleDefinition::default();

        // Module row: name and MVID
        if let Some(table) = image.tables.table::<ModuleRow>()? {
            if let Ok(row) = table.get(1) {
                module.name.set(heap_string(&image.strings, row.name)?);
                module.mvid.set(if row.mvid == 0 {
                    uguid::Guid::ZERO
                } else {
                    image.guid.get(row.mvid)?
                });
            }
        }

        let module = Arc::new(module);

        // Assembly manifest
        if let Some(table) = image.tables.table::<AssemblyRow>()? {
            if let Ok(row) = table.get(1) {
                let assembly = AssemblyDefinition::default();
                assembly.name.set(heap_string(&image.strings, row.name)?);
                assembly
                    .culture
                    .set(heap_string_opt(&image.strings, row.culture)?);
                #[allow(clippy::cast_possible_truncation)]
                assembly.version.set(AssemblyVersion::new(
                    row.major_version as u16,
                    row.minor_version as u16,
                    row.build_number as u16,
                    row.revision_number as u16,
                ));
                assembly
                    .flags
                    .set(AssemblyFlags::from_bits_truncate(row.flags));
                assembly.hash_algorithm.set(row.hash_alg_id);
                assembly
                    .public_key
                    .set(heap_blob_opt(&image.blob, row.public_key)?);
                module.assembly.set(Some(Arc::new(assembly)));
            }
        } else {
            module.assembly.set(None);
        }

        // Assembly references, in row order
        let assembly_refs: Vec<_> = image.tables.rows::<AssemblyRefRow>()?;
        for row in &assembly_refs {
            let reference = AssemblyReference::default();
            reference.name.set(heap_string(&image.strings, row.name)?);
            reference
                .culture
                .set(heap_string_opt(&image.strings, row.culture)?);
            #[allow(clippy::cast_possible_truncation)]
            reference.version.set(AssemblyVersion::new(
                row.major_version as u16,
                row.minor_version as u16,
                row.build_number as u16,
                row.revision_number as u16,
            ));
            reference
                .flags
                .set(AssemblyFlags::from_bits_truncate(row.flags));
            reference
                .public_key_or_token
                .set(heap_blob_opt(&image.blob, row.public_key_or_token)?);
            reference
                .hash_value
                .set(heap_blob_opt(&image.blob, row.hash_value)?);
            module.add_assembly_ref(Arc::new(reference));
        }

        // Type references: create in row order first, resolve scopes second so a
        // reference may scope to a reference with a higher rid
        let type_ref_rows: Vec<TypeRefRow> = image.tables.rows::<TypeRefRow>()?;
        let mut type_refs = Vec::with_capacity(type_ref_rows.len());
        for row in &type_ref_rows {
            let reference = Arc::new(TypeReference::default());
            reference
                .namespace
                .set(heap_string(&image.strings, row.type_namespace)?);
            reference
                .name
                .set(heap_string(&image.strings, row.type_name)?);
            _ = module.add_type_ref(reference.clone());
            type_refs.push(reference);
        }

        for (row, reference) in type_ref_rows.iter().zip(&type_refs) {
            let scope = if row.resolution_scope == 0 {
                TypeRefScope::None
            } else {
                let coded =
                    CodedIndex::decode(row.resolution_scope, CodedIndexKind::ResolutionScope)?;
                match coded.tag {
                    TableId::Module => TypeRefScope::Module(Arc::downgrade(&module)),
                    TableId::AssemblyRef => {
                        let target = module
                            .assembly_refs()
                            .get(coded.row.wrapping_sub(1) as usize)
                            .cloned();
                        match target {
                            Some(assembly_ref) => TypeRefScope::AssemblyRef(assembly_ref),
                            None => return Err(crate::Error::UnresolvableToken(coded.token)),
                        }
                    }
                    TableId::TypeRef => {
                        let target = type_refs.get(coded.row.wrapping_sub(1) as usize).cloned();
                        match target {
                            Some(enclosing) => TypeRefScope::TypeRef(enclosing),
                            None => return Err(crate::Error::UnresolvableToken(coded.token)),
                        }
                    }
                    _ => TypeRefScope::None,
                }
            };
            reference.scope.set(scope);
        }

        // Type definitions: create and register all rows before resolving any
        // cross references
        let type_def_rows: Vec<TypeDefRow> = image.tables.rows::<TypeDefRow>()?;
        let field_rows: Vec<FieldRow> = image.tables.rows::<FieldRow>()?;
        let method_rows: Vec<MethodDefRow> = image.tables.rows::<MethodDefRow>()?;
        let param_rows: Vec<ParamRow> = image.tables.rows::<ParamRow>()?;

        let mut type_defs: Vec<TypeDefinitionRc> = Vec::with_capacity(type_def_rows.len());
        for row in &type_def_rows {
            let definition = Arc::new(TypeDefinition::default());
            definition
                .namespace
                .set(heap_string(&image.strings, row.type_namespace)?);
            definition
                .name
                .set(heap_string(&image.strings, row.type_name)?);
            definition
                .flags
                .set(TypeAttributes::from_bits_truncate(row.flags));
            _ = module.add_type(definition.clone());
            type_defs.push(definition);
        }

        // Fields, methods and params are owned through the list ranges of their
        // declaring rows
        let mut fields_by_rid: Vec<FieldDefinitionRc> = Vec::with_capacity(field_rows.len());
        let mut methods_by_rid: Vec<MethodDefinitionRc> =
            Vec::with_capacity(method_rows.len());
        let mut params_by_rid: Vec<ParameterDefinitionRc> =
            Vec::with_capacity(param_rows.len());

        for row in &field_rows {
            let blob = heap_blob_opt(&image.blob, row.signature)?.unwrap_or_default();
            let field =
                FieldDefinition::from_blob(image.strings.get(row.name)?, blob);
            #[allow(clippy::cast_possible_truncation)]
            field
                .flags
                .set(FieldAttributes::from_bits_truncate(row.flags as u16));
            fields_by_rid.push(field);
        }

        for row in &method_rows {
            let blob = heap_blob_opt(&image.blob, row.signature)?.unwrap_or_default();
            let method =
                MethodDefinition::from_blob(image.strings.get(row.name)?, blob);
            #[allow(clippy::cast_possible_truncation)]
            method
                .flags
                .set(MethodAttributes::from_bits_truncate(row.flags as u16));
            #[allow(clippy::cast_possible_truncation)]
            method.impl_flags.set(row.impl_flags as u16);
            method.rva.set(row.rva);
            methods_by_rid.push(method);
        }

        for row in &param_rows {
            let param = ParameterDefinition::default();
            param
                .name
                .set(heap_string(&image.strings, row.name)?);
            #[allow(clippy::cast_possible_truncation)]
            param.sequence.set(row.sequence as u16);
            #[allow(clippy::cast_possible_truncation)]
            param
                .flags
                .set(ParamAttributes::from_bits_truncate(row.flags as u16));
            params_by_rid.push(Arc::new(param));
        }

        let field_count = image.tables.row_count(TableId::Field);
        let method_count = image.tables.row_count(TableId::MethodDef);
        let param_count = image.tables.row_count(TableId::Param);

        for (index, row) in type_def_rows.iter().enumerate() {
            let definition = &type_defs[index];

            let field_end = range_end(&type_def_rows, index, field_count, |r| r.field_list);
            for rid in row.field_list..field_end {
                if let Some(field) = fields_by_rid.get(rid.wrapping_sub(1) as usize) {
                    definition.add_field(field.clone());
                }
            }

            let method_end = range_end(&type_def_rows, index, method_count, |r| r.method_list);
            for rid in row.method_list..method_end {
                if let Some(method) = methods_by_rid.get(rid.wrapping_sub(1) as usize) {
                    definition.add_method(method.clone());
                }
            }
        }

        for (index, row) in method_rows.iter().enumerate() {
            let method = &methods_by_rid[index];
            let param_end = range_end(&method_rows, index, param_count, |r| r.param_list);
            for rid in row.param_list..param_end {
                if let Some(param) = params_by_rid.get(rid.wrapping_sub(1) as usize) {
                    method.add_param(param.clone());
                }
            }
        }

        // Type specifications
        for row in image.tables.rows::<TypeSpecRow>()? {
            let blob = heap_blob_opt(&image.blob, row.signature)?.unwrap_or_default();
            _ = module.add_type_spec(TypeSpecification::from_blob(blob));
        }

        // Base types and interfaces, now that every type descriptor is registered
        for (row, definition) in type_def_rows.iter().zip(&type_defs) {
            if row.extends != 0 {
                let coded = CodedIndex::decode(row.extends, CodedIndexKind::TypeDefOrRef)?;
                if !coded.token.is_null() {
                    definition
                        .base_type
                        .set(Some(module.resolve_type(coded.token)?));
                }
            } else {
                definition.base_type.set(None);
            }
        }

        for row in image.tables.rows::<InterfaceImplRow>()? {
            let Some(definition) = type_defs.get(row.class.wrapping_sub(1) as usize) else {
                return Err(crate::Error::UnresolvableToken(Token::from_parts(
                    TableId::TypeDef as u8,
                    row.class,
                )));
            };

            let coded = CodedIndex::decode(row.interface, CodedIndexKind::TypeDefOrRef)?;
            definition.add_interface(module.resolve_type(coded.token)?);
        }

        // Nesting relations
        for row in image.tables.rows::<NestedClassRow>()? {
            let nested = type_defs.get(row.nested_class.wrapping_sub(1) as usize);
            let enclosing = type_defs.get(row.enclosing_class.wrapping_sub(1) as usize);
            match (nested, enclosing) {
                (Some(nested), Some(enclosing)) => enclosing.add_nested_type(nested.clone()),
                _ => {
                    return Err(crate::Error::UnresolvableToken(Token::from_parts(
                        TableId::TypeDef as u8,
                        row.nested_class,
                    )))
                }
            }
        }

        // Member references
        for row in image.tables.rows::<MemberRefRow>()? {
            let parent = if row.class == 0 {
                None
            } else {
                let coded = CodedIndex::decode(row.class, CodedIndexKind::MemberRefParent)?;
                match coded.tag {
                    TableId::TypeDef | TableId::TypeRef | TableId::TypeSpec => {
                        Some(module.resolve_type(coded.token)?)
                    }
                    _ => None,
                }
            };

            let blob = heap_blob_opt(&image.blob, row.signature)?.unwrap_or_default();
            module.add_member_ref(MemberReference::from_blob(
                parent,
                image.strings.get(row.name)?,
                blob,
            ));
        }

        // Constants attach to their parent fields
        for row in image.tables.rows::<ConstantRow>()? {
            let coded = CodedIndex::decode(row.parent, CodedIndexKind::HasConstant)?;
            if coded.tag == TableId::Field {
                if let Some(field) = fields_by_rid.get(coded.row.wrapping_sub(1) as usize) {
                    let value = heap_blob_opt(&image.blob, row.value)?.unwrap_or_default();
                    #[allow(clippy::cast_possible_truncation)]
                    field.constant.set(Some((row.element_type as u8, value)));
                }
            }
        }

        // Marshalling descriptors attach to fields and parameters
        for row in image.tables.rows::<FieldMarshalRow>()? {
            let coded = CodedIndex::decode(row.parent, CodedIndexKind::HasFieldMarshal)?;
            let blob = heap_blob_opt(&image.blob, row.native_type)?.unwrap_or_default();
            let descriptor = marshalling::parse_marshal_descriptor(&blob)?;

            match coded.tag {
                TableId::Field => {
                    if let Some(field) = fields_by_rid.get(coded.row.wrapping_sub(1) as usize) {
                        field.marshal.set(Some(descriptor));
                    }
                }
                _ => {
                    if let Some(param) = params_by_rid.get(coded.row.wrapping_sub(1) as usize) {
                        param.marshal.set(Some(descriptor));
                    }
                }
            }
        }

        // Custom attributes are carried as rows only; nothing in the model consumes
        // them yet, but dangling constructors must still surface
        for row in image.tables.rows::<CustomAttributeRow>()? {
            _ = CodedIndex::decode(row.parent, CodedIndexKind::HasCustomAttribute)?;
            _ = CodedIndex::decode(row.constructor, CodedIndexKind::CustomAttributeType)?;
        }

        Ok(module)
    }
}
