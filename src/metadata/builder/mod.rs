//! The builder pipeline: re-emitting a metadata directory from the object model.
//!
//! Two passes over the descriptor graph rooted at the manifest module:
//!
//! **Prepare** walks every reachable descriptor in deterministic order - types by
//! declaration order, members by declaration order within each type - reserving
//! dense 1-based rids per table, interning every heap payload, and re-encoding
//! signature blobs with tokens translated from registry identities to the freshly
//! assigned ones. Mandated-sorted tables are then sorted by their keys.
//!
//! **Write** freezes column widths from the final cardinalities and heap sizes
//! (iterating defensively in case a width flip feeds back into sizes), emits the
//! `#~` stream, and wraps everything into a storage-signature directory.
//!
//! The source model is never mutated; any error during prepare aborts the build.

use rustc_hash::FxHashMap;

use crate::{
    metadata::{
        heaps::{BlobBuffer, GuidBuffer, StringsBuffer, UserStringsBuffer},
        marshalling,
        model::{
            MemberRefSignature, ModuleDefinitionRc, TypeDefOrRef, TypeRefScope,
        },
        root::{MetadataRoot, StreamHeader},
        signatures::{
            encode_field_signature, encode_method_signature, encode_type_signature,
            FieldSignature, MethodSignature, TypeSignature,
        },
        tables::{
            AssemblyRefRow, AssemblyRow, CodedIndex, CodedIndexKind, ConstantRow,
            FieldMarshalRow, FieldRow, InterfaceImplRow, MemberRefRow, MethodDefRow,
            ModuleRow, NestedClassRow, ParamRow, TableId, TableInfo, TableStore, TypeDefRow,
            TypeRefRow, TypeSpecRow,
        },
        token::Token,
    },
    Error, Result,
};

/// Defensive cap on the width-freeze loop; widths grow monotonically, so real
/// inputs converge within two rounds.
const MAX_FREEZE_ITERATIONS: usize = 4;

/// The heap buffers and row store one build pass accumulates into.
///
/// Owned by the builder for the duration of one build; the source model stays
/// untouched.
#[derive(Default)]
pub struct MetadataBuffer {
    /// `#Strings` heap under construction
    pub strings: StringsBuffer,
    /// `#US` heap under construction
    pub user_strings: UserStringsBuffer,
    /// `#Blob` heap under construction
    pub blob: BlobBuffer,
    /// `#GUID` heap under construction
    pub guid: GuidBuffer,
    /// The typed row store under construction
    pub tables: TableStore,
}

impl MetadataBuffer {
    /// Create an empty buffer with pre-seeded heaps
    #[must_use]
    pub fn new() -> Self {
        MetadataBuffer {
            strings: StringsBuffer::new(),
            user_strings: UserStringsBuffer::new(),
            blob: BlobBuffer::new(),
            guid: GuidBuffer::new(),
            tables: TableStore::new(),
        }
    }
}

/// Re-emits a consistent metadata directory from an edited in-memory model.
///
/// # Examples
///
/// ```rust
/// use cilforge::metadata::{builder::MetadataBuilder, model::ModuleDefinition};
///
/// let module = ModuleDefinition::new("demo.dll");
/// let bytes = MetadataBuilder::new().build(&module)?;
/// assert_eq!(&bytes[0..4], &0x424A5342u32.to_le_bytes());
/// # Ok::<(), cilforge::Error>(())
/// ```
pub struct MetadataBuilder {
    version: String,
}

impl Default for MetadataBuilder {
    fn default() -> Self {
        MetadataBuilder::new()
    }
}

impl MetadataBuilder {
    /// Create a builder emitting the default runtime version string
    #[must_use]
    pub fn new() -> Self {
        MetadataBuilder {
            version: "v4.0.30319".to_string(),
        }
    }

    /// Create a builder emitting a custom runtime version string
    ///
    /// ## Arguments
    /// * 'version' - The version string for the storage header
    #[must_use]
    pub fn with_version(version: &str) -> Self {
        MetadataBuilder {
            version: version.to_string(),
        }
    }

    /// Build the metadata directory byte stream for the given module
    ///
    /// ## Arguments
    /// * 'module' - The manifest module to serialize
    ///
    /// # Errors
    /// Any prepare failure (dangling tokens, malformed signatures, overflowing
    /// payloads) is fatal to the whole write and surfaces here
    pub fn build(&self, module: &ModuleDefinitionRc) -> Result<Vec<u8>> {
        let buffer = prepare(module)?;
        write_directory(&buffer, &self.version)
    }

    /// Run only the prepare pass, yielding the populated buffer
    ///
    /// ## Arguments
    /// * 'module' - The manifest module to serialize
    ///
    /// # Errors
    /// See [`MetadataBuilder::build`]
    pub fn prepare(&self, module: &ModuleDefinitionRc) -> Result<MetadataBuffer> {
        prepare(module)
    }
}

/// Identity-keyed token assignment for type descriptors.
struct TokenAssignment {
    by_identity: FxHashMap<usize, Token>,
}

impl TokenAssignment {
    fn new() -> Self {
        TokenAssignment {
            by_identity: FxHashMap::default(),
        }
    }

    fn identity(descriptor: &TypeDefOrRef) -> usize {
        match descriptor {
            TypeDefOrRef::Def(definition) => std::sync::Arc::as_ptr(definition) as usize,
            TypeDefOrRef::Ref(reference) => std::sync::Arc::as_ptr(reference) as usize,
            TypeDefOrRef::Spec(specification) => {
                std::sync::Arc::as_ptr(specification) as usize
            }
        }
    }

    fn assign(&mut self, descriptor: &TypeDefOrRef, token: Token) {
        self.by_identity.insert(Self::identity(descriptor), token);
    }

    fn token_of(&self, descriptor: &TypeDefOrRef) -> Result<Token> {
        self.by_identity
            .get(&Self::identity(descriptor))
            .copied()
            .ok_or(Error::UnresolvableToken(Token::new(0)))
    }
}

fn remap_token(token: Token, translation: &FxHashMap<u32, u32>) -> Result<Token> {
    if token.is_null() {
        return Ok(token);
    }

    translation
        .get(&token.value())
        .map(|new| Token::new(*new))
        .ok_or(Error::UnresolvableToken(token))
}

/// Rewrites every type token in a signature tree through the translation map.
fn remap_type_signature(
    signature: &TypeSignature,
    translation: &FxHashMap<u32, u32>,
) -> Result<TypeSignature> {
    Ok(match signature {
        TypeSignature::Class(token) => {
            TypeSignature::Class(remap_token(*token, translation)?)
        }
        TypeSignature::ValueType(token) => {
            TypeSignature::ValueType(remap_token(*token, translation)?)
        }
        TypeSignature::Ptr(inner) => {
            TypeSignature::Ptr(Box::new(remap_type_signature(inner, translation)?))
        }
        TypeSignature::ByRef(inner) => {
            TypeSignature::ByRef(Box::new(remap_type_signature(inner, translation)?))
        }
        TypeSignature::SzArray(inner) => {
            TypeSignature::SzArray(Box::new(remap_type_signature(inner, translation)?))
        }
        TypeSignature::Pinned(inner) => {
            TypeSignature::Pinned(Box::new(remap_type_signature(inner, translation)?))
        }
        TypeSignature::Array(base, shape) => TypeSignature::Array(
            Box::new(remap_type_signature(base, translation)?),
            shape.clone(),
        ),
        TypeSignature::GenericInst(base, args) => {
            let mut remapped = Vec::with_capacity(args.len());
            for arg in args {
                remapped.push(remap_type_signature(arg, translation)?);
            }
            TypeSignature::GenericInst(
                Box::new(remap_type_signature(base, translation)?),
                remapped,
            )
        }
        TypeSignature::FnPtr(method) => {
            TypeSignature::FnPtr(Box::new(remap_method_signature(method, translation)?))
        }
        TypeSignature::Modified {
            required,
            modifier,
            base,
        } => TypeSignature::Modified {
            required: *required,
            modifier: remap_token(*modifier, translation)?,
            base: Box::new(remap_type_signature(base, translation)?),
        },
        other => other.clone(),
    })
}

fn remap_method_signature(
    signature: &MethodSignature,
    translation: &FxHashMap<u32, u32>,
) -> Result<MethodSignature> {
    let mut params = Vec::with_capacity(signature.params.len());
    for param in &signature.params {
        params.push(remap_type_signature(param, translation)?);
    }

    let mut varargs = Vec::with_capacity(signature.varargs.len());
    for vararg in &signature.varargs {
        varargs.push(remap_type_signature(vararg, translation)?);
    }

    Ok(MethodSignature {
        calling_convention: signature.calling_convention,
        has_this: signature.has_this,
        explicit_this: signature.explicit_this,
        generic_param_count: signature.generic_param_count,
        return_type: remap_type_signature(&signature.return_type, translation)?,
        params,
        varargs,
    })
}

fn remap_field_signature(
    signature: &FieldSignature,
    translation: &FxHashMap<u32, u32>,
) -> Result<FieldSignature> {
    Ok(FieldSignature {
        base: remap_type_signature(&signature.base, translation)?,
    })
}

#[allow(clippy::too_many_lines)]
fn prepare(module: &ModuleDefinitionRc) -> Result<MetadataBuffer> {
    let mut buffer = MetadataBuffer::new();

    // Deterministic traversal order: the module's lists in declaration order.
    // Referenced type descriptors that were never added to the module (a base type
    // pointing at a free-standing reference, say) are appended at the end of the
    // respective list in encounter order.
    let assembly_refs = module.assembly_refs();
    let mut type_refs = module.type_refs();
    let types = module.types();
    let mut type_specs = module.type_specs();
    let member_refs = module.member_refs();

    {
        let mut known = TokenAssignment::new();
        for reference in &type_refs {
            known.assign(&TypeDefOrRef::Ref(reference.clone()), Token::new(0));
        }
        for specification in &type_specs {
            known.assign(&TypeDefOrRef::Spec(specification.clone()), Token::new(0));
        }
        for definition in &types {
            known.assign(&TypeDefOrRef::Def(definition.clone()), Token::new(0));
        }

        let mut adopt = |descriptor: &TypeDefOrRef| {
            if known.token_of(descriptor).is_ok() {
                return;
            }
            known.assign(descriptor, Token::new(0));
            match descriptor {
                TypeDefOrRef::Ref(reference) => type_refs.push(reference.clone()),
                TypeDefOrRef::Spec(specification) => type_specs.push(specification.clone()),
                TypeDefOrRef::Def(_) => {}
            }
        };

        for definition in &types {
            if let Some(base) = definition.base_type.get_cloned().flatten() {
                adopt(&base);
            }
            for interface in definition.interfaces() {
                adopt(&interface);
            }
        }
        for member in &member_refs {
            if let Some(parent) = member.parent.get_cloned().flatten() {
                adopt(&parent);
            }
        }
    }

    // Reserve dense 1-based rids per table, keyed by descriptor identity
    let mut tokens = TokenAssignment::new();
    for (index, definition) in types.iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        tokens.assign(
            &TypeDefOrRef::Def(definition.clone()),
            Token::from_parts(TableId::TypeDef as u8, index as u32 + 1),
        );
    }
    for (index, reference) in type_refs.iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        tokens.assign(
            &TypeDefOrRef::Ref(reference.clone()),
            Token::from_parts(TableId::TypeRef as u8, index as u32 + 1),
        );
    }
    for (index, specification) in type_specs.iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        tokens.assign(
            &TypeDefOrRef::Spec(specification.clone()),
            Token::from_parts(TableId::TypeSpec as u8, index as u32 + 1),
        );
    }

    // Registry keys (source or provisional tokens) translate to the fresh tokens;
    // signatures still carry the old ones
    let mut translation: FxHashMap<u32, u32> = FxHashMap::default();
    for (source, descriptor) in module.registry_entries() {
        if let Ok(fresh) = tokens.token_of(&descriptor) {
            translation.insert(source.value(), fresh.value());
        }
    }

    // Module row
    let mvid = module.mvid.get_cloned().unwrap_or(uguid::Guid::ZERO);
    let module_name = buffer.strings.get_or_add(&module.name());
    _ = buffer.tables.module.push(ModuleRow::new(
        0,
        module_name,
        buffer.guid.get_or_add(mvid),
        0,
        0,
    ));

    // Assembly manifest row
    if let Some(assembly) = module.assembly.get_cloned().flatten() {
        let name = buffer.strings.get_or_add(&assembly.name());
        let culture = match assembly.culture.get_cloned().flatten() {
            Some(culture) => buffer.strings.get_or_add(&culture),
            None => 0,
        };
        let public_key = match assembly.public_key.get_cloned().flatten() {
            Some(key) => buffer.blob.get_or_add(&key)?,
            None => 0,
        };
        let version = assembly.version.get_cloned().unwrap_or_default();
        let flags = assembly.flags.get_cloned().unwrap_or_default();

        _ = buffer.tables.assembly.push(AssemblyRow::new(
            assembly.hash_algorithm.get_cloned().unwrap_or(0x8004),
            u32::from(version.major),
            u32::from(version.minor),
            u32::from(version.build),
            u32::from(version.revision),
            flags.bits(),
            public_key,
            name,
            culture,
        ));
    }

    // Assembly reference rows, remembering rids for resolution scopes
    let mut assembly_ref_rids: FxHashMap<usize, u32> = FxHashMap::default();
    for reference in &assembly_refs {
        let name = buffer.strings.get_or_add(&reference.name());
        let culture = match reference.culture.get_cloned().flatten() {
            Some(culture) => buffer.strings.get_or_add(&culture),
            None => 0,
        };
        let identity = match reference.public_key_or_token.get_cloned().flatten() {
            Some(blob) => buffer.blob.get_or_add(&blob)?,
            None => 0,
        };
        let hash_value = match reference.hash_value.get_cloned().flatten() {
            Some(blob) => buffer.blob.get_or_add(&blob)?,
            None => 0,
        };
        let version = reference.version.get_cloned().unwrap_or_default();
        let flags = reference.flags.get_cloned().unwrap_or_default();

        let rid = buffer.tables.assembly_ref.push(AssemblyRefRow::new(
            u32::from(version.major),
            u32::from(version.minor),
            u32::from(version.build),
            u32::from(version.revision),
            flags.bits(),
            identity,
            name,
            culture,
            hash_value,
        ));
        assembly_ref_rids.insert(std::sync::Arc::as_ptr(reference) as usize, rid);
    }

    // Type reference rows
    for reference in &type_refs {
        let scope_token = match reference.scope.get_cloned().unwrap_or_default() {
            TypeRefScope::None => Token::new(0),
            TypeRefScope::Module(_) => Token::from_parts(TableId::Module as u8, 1),
            TypeRefScope::AssemblyRef(assembly_ref) => {
                let identity = std::sync::Arc::as_ptr(&assembly_ref) as usize;
                match assembly_ref_rids.get(&identity) {
                    Some(rid) => Token::from_parts(TableId::AssemblyRef as u8, *rid),
                    None => return Err(Error::UnresolvableToken(Token::new(0))),
                }
            }
            TypeRefScope::TypeRef(enclosing) => {
                tokens.token_of(&TypeDefOrRef::Ref(enclosing))?
            }
        };

        let scope = CodedIndex::encode(scope_token, CodedIndexKind::ResolutionScope)?;
        let name = buffer.strings.get_or_add(&reference.name());
        let namespace = buffer.strings.get_or_add(&reference.namespace());
        _ = buffer
            .tables
            .type_ref
            .push(TypeRefRow::new(scope, name, namespace));
    }

    // Type definitions with their members; member rids are reserved in
    // declaration order within each type, keeping list ranges contiguous
    for definition in &types {
        let extends = match definition.base_type.get_cloned().flatten() {
            Some(base) => {
                CodedIndex::encode(tokens.token_of(&base)?, CodedIndexKind::TypeDefOrRef)?
            }
            None => 0,
        };

        let field_list = buffer.tables.field.len() + 1;
        let method_list = buffer.tables.method_def.len() + 1;

        let name = buffer.strings.get_or_add(&definition.name());
        let namespace = buffer.strings.get_or_add(&definition.namespace());
        let flags = definition.flags.get_cloned().unwrap_or_default();
        let type_rid = buffer.tables.type_def.push(TypeDefRow::new(
            flags.bits(),
            name,
            namespace,
            extends,
            field_list,
            method_list,
        ));

        for field in definition.fields() {
            let signature = remap_field_signature(&field.signature()?, &translation)?;
            let signature_offset = buffer.blob.get_or_add(&encode_field_signature(&signature)?)?;
            let field_name = buffer.strings.get_or_add(&field.name());
            let field_flags = field.flags.get_cloned().unwrap_or_default();

            let field_rid = buffer.tables.field.push(FieldRow::new(
                u32::from(field_flags.bits()),
                field_name,
                signature_offset,
            ));

            if let Some((element_type, value)) = field.constant.get_cloned().flatten() {
                let parent = CodedIndex::encode(
                    Token::from_parts(TableId::Field as u8, field_rid),
                    CodedIndexKind::HasConstant,
                )?;
                let value_offset = buffer.blob.get_or_add(&value)?;
                _ = buffer.tables.constant.push(ConstantRow::new(
                    u32::from(element_type),
                    parent,
                    value_offset,
                ));
            }

            if let Some(descriptor) = field.marshal.get_cloned().flatten() {
                let parent = CodedIndex::encode(
                    Token::from_parts(TableId::Field as u8, field_rid),
                    CodedIndexKind::HasFieldMarshal,
                )?;
                let blob = marshalling::encode_marshal_descriptor(&descriptor)?;
                let native_type = buffer.blob.get_or_add(&blob)?;
                _ = buffer
                    .tables
                    .field_marshal
                    .push(FieldMarshalRow::new(parent, native_type));
            }
        }

        for method in definition.methods() {
            let signature = remap_method_signature(&method.signature()?, &translation)?;
            let signature_offset =
                buffer.blob.get_or_add(&encode_method_signature(&signature)?)?;
            let method_name = buffer.strings.get_or_add(&method.name());
            let method_flags = method.flags.get_cloned().unwrap_or_default();
            let param_list = buffer.tables.param.len() + 1;

            _ = buffer.tables.method_def.push(MethodDefRow::new(
                method.rva.get_cloned().unwrap_or(0),
                u32::from(method.impl_flags.get_cloned().unwrap_or(0)),
                u32::from(method_flags.bits()),
                method_name,
                signature_offset,
                param_list,
            ));

            for param in method.params() {
                let param_name = buffer.strings.get_or_add(&param.name());
                let param_flags = param.flags.get_cloned().unwrap_or_default();
                _ = buffer.tables.param.push(ParamRow::new(
                    u32::from(param_flags.bits()),
                    u32::from(param.sequence.get_cloned().unwrap_or(0)),
                    param_name,
                ));
            }
        }

        for interface in definition.interfaces() {
            let coded = CodedIndex::encode(
                tokens.token_of(&interface)?,
                CodedIndexKind::TypeDefOrRef,
            )?;
            _ = buffer
                .tables
                .interface_impl
                .push(InterfaceImplRow::new(type_rid, coded));
        }
    }

    // Nesting relations
    for definition in &types {
        if let Some(enclosing) = definition.declaring_type() {
            let nested_rid = tokens
                .token_of(&TypeDefOrRef::Def(definition.clone()))?
                .row();
            let enclosing_rid = tokens.token_of(&TypeDefOrRef::Def(enclosing))?.row();
            _ = buffer
                .tables
                .nested_class
                .push(NestedClassRow::new(nested_rid, enclosing_rid));
        }
    }

    // Member references
    for member in &member_refs {
        let parent = match member.parent.get_cloned().flatten() {
            Some(parent) => CodedIndex::encode(
                tokens.token_of(&parent)?,
                CodedIndexKind::MemberRefParent,
            )?,
            None => 0,
        };

        let signature = match member.signature()? {
            MemberRefSignature::Method(method) => {
                encode_method_signature(&remap_method_signature(&method, &translation)?)?
            }
            MemberRefSignature::Field(field) => {
                encode_field_signature(&remap_field_signature(&field, &translation)?)?
            }
        };

        let name = buffer.strings.get_or_add(&member.name());
        let signature_offset = buffer.blob.get_or_add(&signature)?;
        _ = buffer
            .tables
            .member_ref
            .push(MemberRefRow::new(parent, name, signature_offset));
    }

    // Type specifications
    for specification in &type_specs {
        let signature = remap_type_signature(&specification.signature()?, &translation)?;
        let offset = buffer.blob.get_or_add(&encode_type_signature(&signature)?)?;
        _ = buffer.tables.type_spec.push(TypeSpecRow::new(offset));
    }

    // Mandated sorts run after every reservation
    buffer.tables.sort_tables();

    Ok(buffer)
}

/// Freeze column widths: recompute until two consecutive oracles agree.
fn freeze_layout(buffer: &MetadataBuffer) -> Result<TableInfo> {
    let counts = buffer.tables.row_counts();
    let mut info = TableInfo::from_counts(
        &counts,
        buffer.strings.len(),
        buffer.guid.len(),
        buffer.blob.len(),
    );

    for _ in 0..MAX_FREEZE_ITERATIONS {
        let next = TableInfo::from_counts(
            &counts,
            buffer.strings.len(),
            buffer.guid.len(),
            buffer.blob.len(),
        );
        if next == info {
            return Ok(info);
        }
        info = next;
    }

    Err(bad_image_error!(
        "Table layout did not converge within {} iterations",
        MAX_FREEZE_ITERATIONS
    ))
}

/// Emit the `#~` stream for a prepared buffer.
fn write_tables_stream(buffer: &MetadataBuffer, info: &TableInfo) -> Result<Vec<u8>> {
    let mut out = Vec::new();

    out.extend_from_slice(&0u32.to_le_bytes()); // reserved
    out.push(2); // major version
    out.push(0); // minor version
    out.push(info.heap_sizes_flags());
    out.push(1); // reserved
    out.extend_from_slice(&buffer.tables.valid_mask().to_le_bytes());
    out.extend_from_slice(&buffer.tables.sorted_mask().to_le_bytes());

    let counts = buffer.tables.row_counts();
    for (index, rows) in counts.iter().enumerate() {
        if buffer.tables.valid_mask() & (1u64 << index) != 0 {
            out.extend_from_slice(&rows.to_le_bytes());
        }
    }

    buffer.tables.write_tables(&mut out, info)?;
    Ok(out)
}

/// Emit the full metadata directory for a prepared buffer.
fn write_directory(buffer: &MetadataBuffer, version: &str) -> Result<Vec<u8>> {
    let info = freeze_layout(buffer)?;

    let align4 = |bytes: &mut Vec<u8>| {
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
    };

    let mut bodies: Vec<(&str, Vec<u8>)> = vec![
        ("#~", write_tables_stream(buffer, &info)?),
        ("#Strings", buffer.strings.create_stream()),
        ("#US", buffer.user_strings.create_stream()),
        ("#GUID", buffer.guid.create_stream()),
        ("#Blob", buffer.blob.create_stream()),
    ];

    for (_, body) in &mut bodies {
        align4(body);
    }

    let header_template: Vec<StreamHeader> = bodies
        .iter()
        .map(|(name, body)| {
            #[allow(clippy::cast_possible_truncation)]
            StreamHeader {
                offset: 0,
                size: body.len() as u32,
                name: (*name).to_string(),
            }
        })
        .collect();

    #[allow(clippy::cast_possible_truncation)]
    let mut offset = MetadataRoot::header_size(version, &header_template) as u32;
    let headers: Vec<StreamHeader> = header_template
        .into_iter()
        .map(|mut header| {
            header.offset = offset;
            offset += header.size;
            header
        })
        .collect();

    let mut directory = MetadataRoot::write(version, &headers)?;
    for (_, body) in &bodies {
        directory.extend_from_slice(body);
    }

    Ok(directory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        image::MetadataImage,
        model::{
            FieldDefinition, MethodDefinition, ModuleDefinition, TypeDefinition,
            TypeRefScope, TypeReference,
        },
        signatures::{FieldSignature, MethodSignature, TypeSignature},
    };

    #[test]
    fn empty_module_builds_and_parses() {
        let module = ModuleDefinition::new("empty.dll");
        let bytes = MetadataBuilder::new().build(&module).unwrap();

        let image = MetadataImage::parse(&bytes).unwrap();
        assert_eq!(image.root.version, "v4.0.30319");
        assert_eq!(image.tables.row_count(TableId::Module), 1);

        let module_row = image
            .tables
            .table::<ModuleRow>()
            .unwrap()
            .unwrap()
            .get(1)
            .unwrap();
        assert_eq!(image.strings.get(module_row.name).unwrap(), "empty.dll");
    }

    #[test]
    fn tokens_are_dense_and_declaration_ordered() {
        let module = ModuleDefinition::new("ordered.dll");
        for index in 0..3 {
            let definition = TypeDefinition::new("Ns", &format!("T{index}"));
            definition.base_type.set(None);
            _ = module.add_type(definition);
        }

        let buffer = MetadataBuilder::new().prepare(&module).unwrap();
        assert_eq!(buffer.tables.type_def.len(), 3);

        // Distinct names intern to distinct offsets, in declaration order
        let names: Vec<u32> = buffer
            .tables
            .type_def
            .iter()
            .map(|row| row.type_name)
            .collect();
        let mut deduped = names.clone();
        deduped.dedup();
        assert_eq!(names.len(), deduped.len());
    }

    #[test]
    fn member_ranges_are_contiguous() {
        let module = ModuleDefinition::new("members.dll");

        let first = TypeDefinition::new("Ns", "First");
        first.base_type.set(None);
        first.add_field(FieldDefinition::new(
            "a",
            FieldSignature::new(TypeSignature::I4),
        ));
        first.add_field(FieldDefinition::new(
            "b",
            FieldSignature::new(TypeSignature::I8),
        ));
        _ = module.add_type(first);

        let second = TypeDefinition::new("Ns", "Second");
        second.base_type.set(None);
        second.add_field(FieldDefinition::new(
            "c",
            FieldSignature::new(TypeSignature::String),
        ));
        second.add_method(MethodDefinition::new("M", MethodSignature::default()));
        _ = module.add_type(second);

        let buffer = MetadataBuilder::new().prepare(&module).unwrap();
        let rows: Vec<TypeDefRow> = buffer.tables.type_def.iter().copied().collect();
        assert_eq!(rows[0].field_list, 1);
        assert_eq!(rows[1].field_list, 3);
        assert_eq!(rows[0].method_list, 1);
        assert_eq!(rows[1].method_list, 1);
        assert_eq!(buffer.tables.field.len(), 3);
    }

    #[test]
    fn signature_tokens_are_translated() {
        let module = ModuleDefinition::new("remap.dll");

        // Register the reference first so its provisional token is 0x01000001
        let object = TypeReference::new(TypeRefScope::None, "System", "Object");
        let object_token = module.add_type_ref(object.clone());

        let holder = TypeDefinition::new("Ns", "Holder");
        holder
            .base_type
            .set(Some(crate::metadata::model::TypeDefOrRef::Ref(object)));
        holder.add_field(FieldDefinition::new(
            "obj",
            FieldSignature::new(TypeSignature::Class(object_token)),
        ));
        _ = module.add_type(holder);

        let buffer = MetadataBuilder::new().prepare(&module).unwrap();

        // The field signature blob references the freshly assigned TypeRef rid 1:
        // FIELD prolog, CLASS, coded (1 << 2) | 1
        let field_row = *buffer.tables.field.get(1).unwrap();
        let stream = buffer.blob.create_stream();
        let heap = crate::metadata::heaps::BlobHeap::from(&stream).unwrap();
        assert_eq!(heap.get(field_row.signature).unwrap(), &[0x06, 0x12, 0x05]);
    }

    #[test]
    fn dangling_signature_token_aborts_the_build() {
        let module = ModuleDefinition::new("dangling.dll");
        let holder = TypeDefinition::new("Ns", "Holder");
        holder.base_type.set(None);
        holder.add_field(FieldDefinition::new(
            "bad",
            FieldSignature::new(TypeSignature::Class(Token::new(0x0100_0099))),
        ));
        _ = module.add_type(holder);

        assert!(matches!(
            MetadataBuilder::new().build(&module),
            Err(Error::UnresolvableToken(_))
        ));
    }

    #[test]
    fn nested_class_rows_are_sorted() {
        let module = ModuleDefinition::new("nested.dll");

        let outer = TypeDefinition::new("Ns", "Outer");
        outer.base_type.set(None);
        let inner_a = TypeDefinition::new("", "A");
        inner_a.base_type.set(None);
        let inner_b = TypeDefinition::new("", "B");
        inner_b.base_type.set(None);

        outer.add_nested_type(inner_b.clone());
        outer.add_nested_type(inner_a.clone());

        // Add in an order that would produce unsorted NestedClass rows
        _ = module.add_type(inner_b);
        _ = module.add_type(outer);
        _ = module.add_type(inner_a);

        let buffer = MetadataBuilder::new().prepare(&module).unwrap();
        assert!(buffer.tables.nested_class.is_sorted());
        assert_eq!(buffer.tables.nested_class.len(), 2);
    }
}
