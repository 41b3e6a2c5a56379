//! Build → parse → rebuild round trips over the full pipeline.

use cilforge::{
    metadata::{
        builder::MetadataBuilder,
        marshalling::{CustomMarshalDescriptor, NativeType},
        model::{
            AssemblyDefinition, AssemblyFlags, AssemblyReference, AssemblyVersion,
            FieldAttributes, FieldDefinition, MethodAttributes, MethodDefinition,
            ModuleDefinition, ModuleDefinitionRc, ParameterDefinition, TypeAttributes,
            TypeDefOrRef, TypeDefinition, TypeRefScope, TypeReference, TypeSpecification,
        },
        signatures::{
            FieldSignature, MethodSignature, TypeSignature,
        },
        tables::{
            AssemblyRefRow, AssemblyRow, ConstantRow, FieldMarshalRow, FieldRow,
            InterfaceImplRow, MemberRefRow, MethodDefRow, ModuleRow, NestedClassRow,
            ParamRow, TableId, TypeDefRow, TypeRefRow, TypeSpecRow,
        },
    },
    MetadataImage,
};

/// A module exercising every table the object model carries: assembly manifest,
/// external references, nested types, member ranges, constants, marshalling and
/// type specs.
fn build_sample_module() -> ModuleDefinitionRc {
    let module = ModuleDefinition::new("sample.dll");

    let assembly = AssemblyDefinition::new("Sample");
    assembly.version.set(AssemblyVersion::new(1, 2, 3, 4));
    assembly.hash_algorithm.set(0x8004);
    module.assembly.set(Some(assembly));

    let corlib = AssemblyReference::new("System.Runtime", AssemblyVersion::new(8, 0, 0, 0));
    corlib
        .public_key_or_token
        .set(Some(vec![0xB0, 0x3F, 0x5F, 0x7F, 0x11, 0xD5, 0x0A, 0x3A]));
    module.add_assembly_ref(corlib.clone());

    let object_ref = TypeReference::new(
        TypeRefScope::AssemblyRef(corlib.clone()),
        "System",
        "Object",
    );
    let object_token = module.add_type_ref(object_ref.clone());

    let disposable_ref = TypeReference::new(
        TypeRefScope::AssemblyRef(corlib),
        "System",
        "IDisposable",
    );
    module.add_type_ref(disposable_ref.clone());

    // <Module> first, as compilers emit it
    let module_type = TypeDefinition::new("", "<Module>");
    module_type.flags.set(TypeAttributes::NOT_PUBLIC);
    module_type.base_type.set(None);
    module.add_type(module_type);

    let holder = TypeDefinition::new("Sample.Core", "Holder");
    holder.flags.set(TypeAttributes::PUBLIC);
    holder
        .base_type
        .set(Some(TypeDefOrRef::Ref(object_ref.clone())));
    holder.add_interface(TypeDefOrRef::Ref(disposable_ref));

    let counter = FieldDefinition::new("_counter", FieldSignature::new(TypeSignature::I4));
    counter
        .flags
        .set(FieldAttributes::PRIVATE | FieldAttributes::STATIC);
    holder.add_field(counter);

    let limit = FieldDefinition::new("Limit", FieldSignature::new(TypeSignature::I4));
    limit.flags.set(
        FieldAttributes::PUBLIC | FieldAttributes::LITERAL | FieldAttributes::HAS_DEFAULT,
    );
    limit.constant.set(Some((0x08, vec![0x40, 0x00, 0x00, 0x00])));
    holder.add_field(limit);

    let buffer = FieldDefinition::new(
        "_buffer",
        FieldSignature::new(TypeSignature::SzArray(Box::new(TypeSignature::U1))),
    );
    buffer.flags.set(FieldAttributes::PRIVATE);
    buffer.marshal.set(Some(NativeType::CustomMarshaler(
        CustomMarshalDescriptor {
            guid: uguid::guid!("11111111-2222-3333-4444-555555555555"),
            native_type_name: Some("u".to_string()),
            managed_type_name: Some("m".to_string()),
            cookie: Some("c".to_string()),
        },
    )));
    holder.add_field(buffer);

    let dispose = MethodDefinition::new(
        "Dispose",
        MethodSignature {
            has_this: true,
            return_type: TypeSignature::Void,
            ..Default::default()
        },
    );
    dispose
        .flags
        .set(MethodAttributes::PUBLIC | MethodAttributes::VIRTUAL);
    holder.add_method(dispose);

    let add = MethodDefinition::new(
        "Add",
        MethodSignature {
            has_this: true,
            return_type: TypeSignature::I4,
            params: vec![TypeSignature::I4, TypeSignature::Class(object_token)],
            ..Default::default()
        },
    );
    add.flags.set(MethodAttributes::PUBLIC);
    add.add_param(ParameterDefinition::new("amount", 1));
    add.add_param(ParameterDefinition::new("context", 2));
    holder.add_method(add);

    let nested = TypeDefinition::new("", "Enumerator");
    nested.flags.set(TypeAttributes::NESTED_PUBLIC);
    nested
        .base_type
        .set(Some(TypeDefOrRef::Ref(object_ref.clone())));
    holder.add_nested_type(nested.clone());

    module.add_type(holder);
    module.add_type(nested);

    // An array-of-Object specification and a reference to Object::ToString
    module.add_type_spec(TypeSpecification::new(TypeSignature::SzArray(Box::new(
        TypeSignature::Class(object_token),
    ))));

    module.add_member_ref(cilforge::metadata::model::MemberReference::new(
        TypeDefOrRef::Ref(object_ref),
        "ToString",
        cilforge::metadata::model::MemberRefSignature::Method(MethodSignature {
            has_this: true,
            return_type: TypeSignature::String,
            ..Default::default()
        }),
    ));

    module
}

#[test]
fn build_then_parse() {
    let module = build_sample_module();
    let bytes = MetadataBuilder::new().build(&module).unwrap();

    let image = MetadataImage::parse(&bytes).unwrap();
    assert_eq!(image.root.version, "v4.0.30319");
    assert_eq!(image.tables.major_version, 2);
    assert_eq!(image.tables.minor_version, 0);

    assert_eq!(image.tables.row_count(TableId::Module), 1);
    assert_eq!(image.tables.row_count(TableId::TypeRef), 2);
    assert_eq!(image.tables.row_count(TableId::TypeDef), 3);
    assert_eq!(image.tables.row_count(TableId::Field), 3);
    assert_eq!(image.tables.row_count(TableId::MethodDef), 2);
    assert_eq!(image.tables.row_count(TableId::Param), 2);
    assert_eq!(image.tables.row_count(TableId::InterfaceImpl), 1);
    assert_eq!(image.tables.row_count(TableId::MemberRef), 1);
    assert_eq!(image.tables.row_count(TableId::Constant), 1);
    assert_eq!(image.tables.row_count(TableId::FieldMarshal), 1);
    assert_eq!(image.tables.row_count(TableId::NestedClass), 1);
    assert_eq!(image.tables.row_count(TableId::TypeSpec), 1);
    assert_eq!(image.tables.row_count(TableId::Assembly), 1);
    assert_eq!(image.tables.row_count(TableId::AssemblyRef), 1);

    // Member ranges are dense and 1-based
    let typedefs: Vec<TypeDefRow> = image.tables.rows().unwrap();
    assert_eq!(typedefs[0].field_list, 1);
    assert_eq!(typedefs[1].field_list, 1);
    assert_eq!(typedefs[2].field_list, 4);
    assert_eq!(typedefs[1].method_list, 1);
    assert_eq!(typedefs[2].method_list, 3);
}

#[test]
fn rebuild_reproduces_all_tables() {
    let module = build_sample_module();
    let first = MetadataBuilder::new().build(&module).unwrap();

    let image = MetadataImage::parse(&first).unwrap();
    let reloaded = ModuleDefinition::from_image(&image).unwrap();
    let second = MetadataBuilder::new().build(&reloaded).unwrap();

    let image_a = MetadataImage::parse(&first).unwrap();
    let image_b = MetadataImage::parse(&second).unwrap();

    macro_rules! assert_rows_equal {
        ($($row:ty),* $(,)?) => {
            $(
                let a: Vec<$row> = image_a.tables.rows().unwrap();
                let b: Vec<$row> = image_b.tables.rows().unwrap();
                assert_eq!(a, b, concat!("table mismatch for ", stringify!($row)));
            )*
        };
    }

    assert_rows_equal!(
        ModuleRow,
        TypeRefRow,
        TypeDefRow,
        FieldRow,
        MethodDefRow,
        ParamRow,
        InterfaceImplRow,
        MemberRefRow,
        ConstantRow,
        FieldMarshalRow,
        NestedClassRow,
        TypeSpecRow,
        AssemblyRow,
        AssemblyRefRow,
    );

    // The emitted directories agree byte for byte on a deterministic pipeline
    assert_eq!(first, second);
}

#[test]
fn model_survives_the_round_trip() {
    let module = build_sample_module();
    let bytes = MetadataBuilder::new().build(&module).unwrap();
    let image = MetadataImage::parse(&bytes).unwrap();
    let reloaded = ModuleDefinition::from_image(&image).unwrap();

    assert_eq!(reloaded.name(), "sample.dll");

    let assembly = reloaded.assembly.get_cloned().flatten().unwrap();
    assert_eq!(assembly.full_name(), "Sample, Version=1.2.3.4");

    let types = reloaded.types();
    let names: Vec<String> = types.iter().map(|t| t.full_name()).collect();
    assert_eq!(
        names,
        vec![
            "<Module>",
            "Sample.Core.Holder",
            "Sample.Core.Holder+Enumerator"
        ]
    );

    let holder = &types[1];
    assert_eq!(
        holder.base_type.get_cloned().flatten().unwrap().full_name(),
        "System.Object"
    );
    assert_eq!(holder.interfaces()[0].full_name(), "System.IDisposable");

    let fields = holder.fields();
    let methods = holder.methods();
    assert_eq!(fields.len(), 3);
    assert_eq!(methods.len(), 2);
    assert_eq!(holder.nested_types().len(), 1);

    // Constants and marshalling descriptors made it across
    let limit = &fields[1];
    assert_eq!(
        limit.constant.get_cloned().flatten(),
        Some((0x08, vec![0x40, 0x00, 0x00, 0x00]))
    );

    let buffer = &fields[2];
    match buffer.marshal.get_cloned().flatten().unwrap() {
        NativeType::CustomMarshaler(descriptor) => {
            assert_eq!(
                descriptor.guid_text(),
                "{11111111-2222-3333-4444-555555555555}"
            );
            assert_eq!(descriptor.native_type_name.as_deref(), Some("u"));
            assert_eq!(descriptor.managed_type_name.as_deref(), Some("m"));
            assert_eq!(descriptor.cookie.as_deref(), Some("c"));
        }
        other => panic!("unexpected marshal descriptor {other:?}"),
    }

    // Lazily decoded signatures resolve against the reloaded registry
    let add = &methods[1];
    let signature = add.signature().unwrap();
    assert_eq!(signature.params.len(), 2);
    match &signature.params[1] {
        TypeSignature::Class(token) => {
            let target = reloaded.resolve_type(*token).unwrap();
            assert_eq!(target.full_name(), "System.Object");
        }
        other => panic!("unexpected parameter type {other:?}"),
    }

    let member_refs = reloaded.member_refs();
    assert_eq!(member_refs[0].full_name(), "System.Object::ToString");
}

#[test]
fn sorted_tables_emit_non_decreasing_keys() {
    let module = ModuleDefinition::new("sorted.dll");

    let iface_a = TypeReference::new(TypeRefScope::None, "System", "IDisposable");
    module.add_type_ref(iface_a.clone());
    let iface_b = TypeReference::new(TypeRefScope::None, "System", "IComparable");
    module.add_type_ref(iface_b.clone());

    // Three types, added so that later rids implement interfaces first
    for name in ["C", "B", "A"] {
        let definition = TypeDefinition::new("Ns", name);
        definition.base_type.set(None);
        definition.add_interface(TypeDefOrRef::Ref(iface_a.clone()));
        definition.add_interface(TypeDefOrRef::Ref(iface_b.clone()));
        module.add_type(definition);
    }

    let bytes = MetadataBuilder::new().build(&module).unwrap();
    let image = MetadataImage::parse(&bytes).unwrap();

    let rows: Vec<InterfaceImplRow> = image.tables.rows().unwrap();
    assert_eq!(rows.len(), 6);
    for pair in rows.windows(2) {
        assert!(
            (pair[0].class, pair[0].interface) <= (pair[1].class, pair[1].interface),
            "InterfaceImpl rows out of order: {pair:?}"
        );
    }

    // The sorted bitmask advertises the obligation
    assert_ne!(image.tables.sorted & (1 << (TableId::InterfaceImpl as u64)), 0);
}

#[test]
fn heap_size_flags_match_emitted_widths() {
    // Small module: all heap indexes narrow, flag byte zero
    let module = ModuleDefinition::new("small.dll");
    let bytes = MetadataBuilder::new().build(&module).unwrap();
    let image = MetadataImage::parse(&bytes).unwrap();
    assert!(!image.tables.info.is_large_blob());
    assert_eq!(image.tables.info.heap_sizes_flags(), 0);

    // Push the blob heap across the 16-bit boundary: blob columns widen and the
    // flag byte says so
    let module = ModuleDefinition::new("large.dll");
    let assembly = AssemblyDefinition::new("Large");
    assembly.flags.set(AssemblyFlags::PUBLIC_KEY);
    assembly.public_key.set(Some(vec![0x5A; 0x1_0001]));
    module.assembly.set(Some(assembly));

    let bytes = MetadataBuilder::new().build(&module).unwrap();
    let image = MetadataImage::parse(&bytes).unwrap();
    assert!(image.tables.info.is_large_blob());
    assert!(!image.tables.info.is_large_str());
    assert_eq!(image.tables.info.heap_sizes_flags(), 0b100);

    // And the assembly row still resolves its key through the wide column
    let assembly_row: Vec<AssemblyRow> = image.tables.rows().unwrap();
    let key = image.blob.get(assembly_row[0].public_key).unwrap();
    assert_eq!(key.len(), 0x1_0001);
}

#[test]
fn version_string_is_configurable() {
    let module = ModuleDefinition::new("versioned.dll");
    let bytes = MetadataBuilder::with_version("v2.0.50727")
        .build(&module)
        .unwrap();

    let image = MetadataImage::parse(&bytes).unwrap();
    assert_eq!(image.root.version, "v2.0.50727");
}
