//! Type descriptors: definitions, references and specifications.

use std::sync::{Arc, RwLock, Weak};

use crate::{
    metadata::{
        model::{
            AssemblyReferenceRc, FieldDefinitionRc, LazyCell, MethodDefinitionRc,
            ModuleDefinition, TypeAttributes,
        },
        signatures::{SignatureReader, TypeSignature},
    },
    Result,
};

/// Cheap-copy reference to a [`TypeDefinition`]
pub type TypeDefinitionRc = Arc<TypeDefinition>;
/// Cheap-copy reference to a [`TypeReference`]
pub type TypeReferenceRc = Arc<TypeReference>;
/// Cheap-copy reference to a [`TypeSpecification`]
pub type TypeSpecificationRc = Arc<TypeSpecification>;

/// The resolution scope of a [`TypeReference`].
#[derive(Debug, Clone, Default)]
pub enum TypeRefScope {
    /// No scope recorded; the reference resolves against the exported type table
    #[default]
    None,
    /// The current module
    Module(Weak<ModuleDefinition>),
    /// An external assembly
    AssemblyRef(AssemblyReferenceRc),
    /// The enclosing type, for references to nested types
    TypeRef(TypeReferenceRc),
}

/// A type defined in the current module (a TypeDef row, resolved).
///
/// Owned collections (fields, methods, nested types) set the child's back reference
/// on insertion and clear it on removal; the descriptor itself never stores a token.
#[derive(Debug, Default)]
pub struct TypeDefinition {
    /// Namespace, empty for the global namespace
    pub namespace: LazyCell<String>,
    /// Simple name
    pub name: LazyCell<String>,
    /// Type attributes
    pub flags: LazyCell<TypeAttributes>,
    /// The base type, `None` for interfaces and `<Module>`
    pub base_type: LazyCell<Option<TypeDefOrRef>>,
    module: RwLock<Weak<ModuleDefinition>>,
    declaring_type: RwLock<Option<Weak<TypeDefinition>>>,
    fields: RwLock<Vec<FieldDefinitionRc>>,
    methods: RwLock<Vec<MethodDefinitionRc>>,
    nested_types: RwLock<Vec<TypeDefinitionRc>>,
    interfaces: RwLock<Vec<TypeDefOrRef>>,
}

impl TypeDefinition {
    /// Create a type definition with the given namespace and name
    ///
    /// ## Arguments
    /// * 'namespace' - Namespace, empty for the global namespace
    /// * 'name' - Simple name
    #[must_use]
    pub fn new(namespace: &str, name: &str) -> TypeDefinitionRc {
        let definition = TypeDefinition::default();
        definition.namespace.set(namespace.to_string());
        definition.name.set(name.to_string());
        Arc::new(definition)
    }

    /// The simple name of the type
    #[must_use]
    pub fn name(&self) -> String {
        self.name.get_cloned().unwrap_or_default()
    }

    /// The namespace of the type
    #[must_use]
    pub fn namespace(&self) -> String {
        self.namespace.get_cloned().unwrap_or_default()
    }

    /// The full name: `Namespace.Name`, or `Enclosing+Nested` for nested types
    #[must_use]
    pub fn full_name(&self) -> String {
        if let Some(declaring) = self.declaring_type() {
            return format!("{}+{}", declaring.full_name(), self.name());
        }

        let namespace = self.namespace();
        if namespace.is_empty() {
            self.name()
        } else {
            format!("{}.{}", namespace, self.name())
        }
    }

    /// The module this type belongs to, if it has been added to one
    #[must_use]
    pub fn module(&self) -> Option<Arc<ModuleDefinition>> {
        self.module.read().ok()?.upgrade()
    }

    /// The enclosing type for nested types
    #[must_use]
    pub fn declaring_type(&self) -> Option<TypeDefinitionRc> {
        self.declaring_type
            .read()
            .ok()?
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Snapshot of the field list in declaration order
    #[must_use]
    pub fn fields(&self) -> Vec<FieldDefinitionRc> {
        self.fields.read().map(|list| list.clone()).unwrap_or_default()
    }

    /// Snapshot of the method list in declaration order
    #[must_use]
    pub fn methods(&self) -> Vec<MethodDefinitionRc> {
        self.methods.read().map(|list| list.clone()).unwrap_or_default()
    }

    /// Snapshot of the nested type list in declaration order
    #[must_use]
    pub fn nested_types(&self) -> Vec<TypeDefinitionRc> {
        self.nested_types
            .read()
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the implemented interfaces in declaration order
    #[must_use]
    pub fn interfaces(&self) -> Vec<TypeDefOrRef> {
        self.interfaces
            .read()
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    /// Append a field, setting its declaring-type back reference
    ///
    /// ## Arguments
    /// * 'field' - The field to append
    pub fn add_field(self: &Arc<Self>, field: FieldDefinitionRc) {
        field.set_declaring_type(Some(Arc::downgrade(self)));
        if let Ok(mut fields) = self.fields.write() {
            fields.push(field);
        }
    }

    /// Remove a field, clearing its declaring-type back reference
    ///
    /// ## Arguments
    /// * 'field' - The field to remove
    pub fn remove_field(&self, field: &FieldDefinitionRc) {
        if let Ok(mut fields) = self.fields.write() {
            fields.retain(|existing| !Arc::ptr_eq(existing, field));
        }
        field.set_declaring_type(None);
    }

    /// Append a method, setting its declaring-type back reference
    ///
    /// ## Arguments
    /// * 'method' - The method to append
    pub fn add_method(self: &Arc<Self>, method: MethodDefinitionRc) {
        method.set_declaring_type(Some(Arc::downgrade(self)));
        if let Ok(mut methods) = self.methods.write() {
            methods.push(method);
        }
    }

    /// Remove a method, clearing its declaring-type back reference
    ///
    /// ## Arguments
    /// * 'method' - The method to remove
    pub fn remove_method(&self, method: &MethodDefinitionRc) {
        if let Ok(mut methods) = self.methods.write() {
            methods.retain(|existing| !Arc::ptr_eq(existing, method));
        }
        method.set_declaring_type(None);
    }

    /// Append a nested type, setting its declaring-type back reference
    ///
    /// ## Arguments
    /// * 'nested' - The nested type to append
    pub fn add_nested_type(self: &Arc<Self>, nested: TypeDefinitionRc) {
        if let Ok(mut declaring) = nested.declaring_type.write() {
            *declaring = Some(Arc::downgrade(self));
        }
        if let Ok(mut nested_types) = self.nested_types.write() {
            nested_types.push(nested);
        }
    }

    /// Remove a nested type, clearing its declaring-type back reference
    ///
    /// ## Arguments
    /// * 'nested' - The nested type to remove
    pub fn remove_nested_type(&self, nested: &TypeDefinitionRc) {
        if let Ok(mut nested_types) = self.nested_types.write() {
            nested_types.retain(|existing| !Arc::ptr_eq(existing, nested));
        }
        if let Ok(mut declaring) = nested.declaring_type.write() {
            *declaring = None;
        }
    }

    /// Record an implemented interface
    ///
    /// ## Arguments
    /// * 'interface' - The interface type
    pub fn add_interface(&self, interface: TypeDefOrRef) {
        if let Ok(mut interfaces) = self.interfaces.write() {
            interfaces.push(interface);
        }
    }

    pub(crate) fn set_module(&self, module: Weak<ModuleDefinition>) {
        if let Ok(mut slot) = self.module.write() {
            *slot = module;
        }
    }

    pub(crate) fn clear_module(&self) {
        if let Ok(mut slot) = self.module.write() {
            *slot = Weak::new();
        }
    }
}

/// A reference to a type in another scope (a TypeRef row, resolved).
#[derive(Debug, Default)]
pub struct TypeReference {
    /// Namespace, empty for the global namespace
    pub namespace: LazyCell<String>,
    /// Simple name
    pub name: LazyCell<String>,
    /// The scope the reference resolves in
    pub scope: LazyCell<TypeRefScope>,
}

impl TypeReference {
    /// Create a type reference with the given scope, namespace and name
    ///
    /// ## Arguments
    /// * 'scope' - The resolution scope
    /// * 'namespace' - Namespace, empty for the global namespace
    /// * 'name' - Simple name
    #[must_use]
    pub fn new(scope: TypeRefScope, namespace: &str, name: &str) -> TypeReferenceRc {
        let reference = TypeReference::default();
        reference.scope.set(scope);
        reference.namespace.set(namespace.to_string());
        reference.name.set(name.to_string());
        Arc::new(reference)
    }

    /// The simple name of the referenced type
    #[must_use]
    pub fn name(&self) -> String {
        self.name.get_cloned().unwrap_or_default()
    }

    /// The namespace of the referenced type
    #[must_use]
    pub fn namespace(&self) -> String {
        self.namespace.get_cloned().unwrap_or_default()
    }

    /// The full name: `Namespace.Name`, or `Enclosing+Nested` for references into
    /// an enclosing reference
    #[must_use]
    pub fn full_name(&self) -> String {
        if let Some(TypeRefScope::TypeRef(enclosing)) = self.scope.get_cloned() {
            return format!("{}+{}", enclosing.full_name(), self.name());
        }

        let namespace = self.namespace();
        if namespace.is_empty() {
            self.name()
        } else {
            format!("{}.{}", namespace, self.name())
        }
    }

    /// The module this reference belongs to, when scoped to one
    #[must_use]
    pub fn module(&self) -> Option<Arc<ModuleDefinition>> {
        match self.scope.get_cloned() {
            Some(TypeRefScope::Module(module)) => module.upgrade(),
            _ => None,
        }
    }
}

/// A type specification (a TypeSpec row, resolved): a type given by signature.
#[derive(Debug, Default)]
pub struct TypeSpecification {
    signature_blob: LazyCell<Vec<u8>>,
    signature: LazyCell<TypeSignature>,
}

impl TypeSpecification {
    /// Create a specification from an already decoded signature
    ///
    /// ## Arguments
    /// * 'signature' - The type signature
    #[must_use]
    pub fn new(signature: TypeSignature) -> TypeSpecificationRc {
        let spec = TypeSpecification::default();
        spec.signature.set(signature);
        Arc::new(spec)
    }

    /// Create a specification over a raw blob, decoded on first access
    ///
    /// ## Arguments
    /// * 'blob' - The signature blob bytes
    #[must_use]
    pub fn from_blob(blob: Vec<u8>) -> TypeSpecificationRc {
        let spec = TypeSpecification::default();
        spec.signature_blob.set(blob);
        Arc::new(spec)
    }

    /// The decoded type signature.
    ///
    /// Decoding happens on first access; a malformed blob surfaces here, not at
    /// materialisation time.
    ///
    /// # Errors
    /// Returns [`crate::Error::MalformedSignature`] if the stored blob is invalid
    pub fn signature(&self) -> Result<TypeSignature> {
        if let Some(cached) = self.signature.get_cloned() {
            return Ok(cached);
        }

        let blob = self.signature_blob.get_cloned().unwrap_or_default();
        let decoded = SignatureReader::new(&blob).read_type_signature()?;
        Ok(self.signature.get_or_init(|| decoded).clone())
    }

    /// Replace the signature
    ///
    /// ## Arguments
    /// * 'signature' - The new type signature
    pub fn set_signature(&self, signature: TypeSignature) {
        self.signature.set(signature);
    }

    /// The display name of the specified type, with unresolved tokens rendered raw
    #[must_use]
    pub fn name(&self) -> String {
        match self.signature() {
            Ok(signature) => signature.name_with(&|_| None),
            Err(_) => String::from("<malformed>"),
        }
    }
}

/// A type referenced from rows and signatures: definition, reference or
/// specification.
///
/// This is the resolved counterpart of the `TypeDefOrRef` coded index; the builder
/// computes tokens from the referenced descriptor's identity at write time.
#[derive(Debug, Clone)]
pub enum TypeDefOrRef {
    /// A type defined in the current module
    Def(TypeDefinitionRc),
    /// A type in another scope
    Ref(TypeReferenceRc),
    /// A type given by signature
    Spec(TypeSpecificationRc),
}

impl TypeDefOrRef {
    /// The simple name of the referenced type
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            TypeDefOrRef::Def(definition) => definition.name(),
            TypeDefOrRef::Ref(reference) => reference.name(),
            TypeDefOrRef::Spec(specification) => specification.name(),
        }
    }

    /// The full name of the referenced type
    #[must_use]
    pub fn full_name(&self) -> String {
        match self {
            TypeDefOrRef::Def(definition) => definition.full_name(),
            TypeDefOrRef::Ref(reference) => reference.full_name(),
            TypeDefOrRef::Spec(specification) => specification.name(),
        }
    }

    /// The module of the referenced type, where known
    #[must_use]
    pub fn module(&self) -> Option<Arc<ModuleDefinition>> {
        match self {
            TypeDefOrRef::Def(definition) => definition.module(),
            TypeDefOrRef::Ref(reference) => reference.module(),
            TypeDefOrRef::Spec(_) => None,
        }
    }

    /// Downcast to a type definition
    #[must_use]
    pub fn as_definition(&self) -> Option<&TypeDefinitionRc> {
        match self {
            TypeDefOrRef::Def(definition) => Some(definition),
            _ => None,
        }
    }

    /// Downcast to a type reference
    #[must_use]
    pub fn as_reference(&self) -> Option<&TypeReferenceRc> {
        match self {
            TypeDefOrRef::Ref(reference) => Some(reference),
            _ => None,
        }
    }

    /// Downcast to a type specification
    #[must_use]
    pub fn as_specification(&self) -> Option<&TypeSpecificationRc> {
        match self {
            TypeDefOrRef::Spec(specification) => Some(specification),
            _ => None,
        }
    }

    /// Identity comparison: true if both sides are the same descriptor
    #[must_use]
    pub fn same_as(&self, other: &TypeDefOrRef) -> bool {
        match (self, other) {
            (TypeDefOrRef::Def(a), TypeDefOrRef::Def(b)) => Arc::ptr_eq(a, b),
            (TypeDefOrRef::Ref(a), TypeDefOrRef::Ref(b)) => Arc::ptr_eq(a, b),
            (TypeDefOrRef::Spec(a), TypeDefOrRef::Spec(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_names() {
        let plain = TypeDefinition::new("System.Collections", "ArrayList");
        assert_eq!(plain.full_name(), "System.Collections.ArrayList");

        let global = TypeDefinition::new("", "<Module>");
        assert_eq!(global.full_name(), "<Module>");
    }

    #[test]
    fn nesting_back_references() {
        let outer = TypeDefinition::new("Ns", "Outer");
        let inner = TypeDefinition::new("", "Inner");

        outer.add_nested_type(inner.clone());
        assert!(inner.declaring_type().is_some());
        assert_eq!(inner.full_name(), "Ns.Outer+Inner");
        assert_eq!(outer.nested_types().len(), 1);

        // Removal clears the back reference
        outer.remove_nested_type(&inner);
        assert!(inner.declaring_type().is_none());
        assert_eq!(inner.full_name(), "Inner");
        assert!(outer.nested_types().is_empty());
    }

    #[test]
    fn reference_full_names() {
        let object = TypeReference::new(TypeRefScope::None, "System", "Object");
        assert_eq!(object.full_name(), "System.Object");
        assert_eq!(object.name(), "Object");

        let nested = TypeReference::new(TypeRefScope::TypeRef(object), "", "Nested");
        assert_eq!(nested.full_name(), "System.Object+Nested");
    }

    #[test]
    fn specification_lazy_decode() {
        use crate::metadata::signatures::TypeSignature;

        // int32[]
        let spec = TypeSpecification::from_blob(vec![0x1D, 0x08]);
        assert_eq!(
            spec.signature().unwrap(),
            TypeSignature::SzArray(Box::new(TypeSignature::I4))
        );
        assert_eq!(spec.name(), "Int32[]");

        // Malformed blobs surface at first access
        let broken = TypeSpecification::from_blob(vec![0xF0]);
        assert!(broken.signature().is_err());
        assert_eq!(broken.name(), "<malformed>");
    }

    #[test]
    fn downcasts() {
        let definition = TypeDefinition::new("A", "B");
        let wrapped = TypeDefOrRef::Def(definition.clone());

        assert!(wrapped.as_definition().is_some());
        assert!(wrapped.as_reference().is_none());
        assert!(wrapped.same_as(&TypeDefOrRef::Def(definition)));
        assert!(!wrapped.same_as(&TypeDefOrRef::Def(TypeDefinition::new("A", "B"))));
    }
}
