//! Member descriptors: fields, methods, parameters and member references.

use std::sync::{Arc, RwLock, Weak};

use crate::{
    metadata::{
        marshalling::NativeType,
        model::{
            FieldAttributes, LazyCell, MethodAttributes, ParamAttributes, TypeDefOrRef,
            TypeDefinition, TypeDefinitionRc,
        },
        signatures::{
            FieldSignature, MethodSignature, SignatureReader, SIGNATURE_FLAGS,
        },
    },
    Error, Result,
};

/// Cheap-copy reference to a [`FieldDefinition`]
pub type FieldDefinitionRc = Arc<FieldDefinition>;
/// Cheap-copy reference to a [`MethodDefinition`]
pub type MethodDefinitionRc = Arc<MethodDefinition>;
/// Cheap-copy reference to a [`ParameterDefinition`]
pub type ParameterDefinitionRc = Arc<ParameterDefinition>;
/// Cheap-copy reference to a [`MemberReference`]
pub type MemberReferenceRc = Arc<MemberReference>;

/// A field defined in the current module (a Field row, resolved).
#[derive(Debug, Default)]
pub struct FieldDefinition {
    /// Field name
    pub name: LazyCell<String>,
    /// Field attributes
    pub flags: LazyCell<FieldAttributes>,
    /// Marshalling descriptor, for fields carrying one
    pub marshal: LazyCell<Option<NativeType>>,
    /// Constant value as (element type tag, value blob), for literal fields
    pub constant: LazyCell<Option<(u8, Vec<u8>)>>,
    signature_blob: LazyCell<Vec<u8>>,
    signature: LazyCell<FieldSignature>,
    declaring_type: RwLock<Option<Weak<TypeDefinition>>>,
}

impl FieldDefinition {
    /// Create a field with the given name and signature
    ///
    /// ## Arguments
    /// * 'name' - The field name
    /// * 'signature' - The field signature
    #[must_use]
    pub fn new(name: &str, signature: FieldSignature) -> FieldDefinitionRc {
        let field = FieldDefinition::default();
        field.name.set(name.to_string());
        field.signature.set(signature);
        Arc::new(field)
    }

    /// Create a field over a raw signature blob, decoded on first access
    ///
    /// ## Arguments
    /// * 'name' - The field name
    /// * 'blob' - The signature blob bytes
    #[must_use]
    pub fn from_blob(name: &str, blob: Vec<u8>) -> FieldDefinitionRc {
        let field = FieldDefinition::default();
        field.name.set(name.to_string());
        field.signature_blob.set(blob);
        Arc::new(field)
    }

    /// The field name
    #[must_use]
    pub fn name(&self) -> String {
        self.name.get_cloned().unwrap_or_default()
    }

    /// The full name: `DeclaringType::Name`
    #[must_use]
    pub fn full_name(&self) -> String {
        match self.declaring_type() {
            Some(declaring) => format!("{}::{}", declaring.full_name(), self.name()),
            None => self.name(),
        }
    }

    /// The type declaring this field, if it has been added to one
    #[must_use]
    pub fn declaring_type(&self) -> Option<TypeDefinitionRc> {
        self.declaring_type
            .read()
            .ok()?
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// The module of the declaring type
    #[must_use]
    pub fn module(&self) -> Option<Arc<crate::metadata::model::ModuleDefinition>> {
        self.declaring_type().and_then(|declaring| declaring.module())
    }

    /// The decoded field signature.
    ///
    /// Decoding happens on first access; a malformed blob surfaces here, not at
    /// materialisation time.
    ///
    /// # Errors
    /// Returns [`crate::Error::MalformedSignature`] if the stored blob is invalid
    pub fn signature(&self) -> Result<FieldSignature> {
        if let Some(cached) = self.signature.get_cloned() {
            return Ok(cached);
        }

        let blob = self.signature_blob.get_cloned().unwrap_or_default();
        let decoded = SignatureReader::new(&blob).read_field_signature()?;
        Ok(self.signature.get_or_init(|| decoded).clone())
    }

    /// Replace the signature
    ///
    /// ## Arguments
    /// * 'signature' - The new field signature
    pub fn set_signature(&self, signature: FieldSignature) {
        self.signature.set(signature);
    }

    pub(crate) fn set_declaring_type(&self, declaring: Option<Weak<TypeDefinition>>) {
        if let Ok(mut slot) = self.declaring_type.write() {
            *slot = declaring;
        }
    }
}

/// A method defined in the current module (a MethodDef row, resolved).
#[derive(Debug, Default)]
pub struct MethodDefinition {
    /// Method name
    pub name: LazyCell<String>,
    /// Method attributes
    pub flags: LazyCell<MethodAttributes>,
    /// Method implementation attributes
    pub impl_flags: LazyCell<u16>,
    /// Relative virtual address of the method body, 0 for abstract/extern methods
    pub rva: LazyCell<u32>,
    signature_blob: LazyCell<Vec<u8>>,
    signature: LazyCell<MethodSignature>,
    params: RwLock<Vec<ParameterDefinitionRc>>,
    declaring_type: RwLock<Option<Weak<TypeDefinition>>>,
}

impl MethodDefinition {
    /// Create a method with the given name and signature
    ///
    /// ## Arguments
    /// * 'name' - The method name
    /// * 'signature' - The method signature
    #[must_use]
    pub fn new(name: &str, signature: MethodSignature) -> MethodDefinitionRc {
        let method = MethodDefinition::default();
        method.name.set(name.to_string());
        method.signature.set(signature);
        Arc::new(method)
    }

    /// Create a method over a raw signature blob, decoded on first access
    ///
    /// ## Arguments
    /// * 'name' - The method name
    /// * 'blob' - The signature blob bytes
    #[must_use]
    pub fn from_blob(name: &str, blob: Vec<u8>) -> MethodDefinitionRc {
        let method = MethodDefinition::default();
        method.name.set(name.to_string());
        method.signature_blob.set(blob);
        Arc::new(method)
    }

    /// The method name
    #[must_use]
    pub fn name(&self) -> String {
        self.name.get_cloned().unwrap_or_default()
    }

    /// The full name: `DeclaringType::Name`
    #[must_use]
    pub fn full_name(&self) -> String {
        match self.declaring_type() {
            Some(declaring) => format!("{}::{}", declaring.full_name(), self.name()),
            None => self.name(),
        }
    }

    /// The type declaring this method, if it has been added to one
    #[must_use]
    pub fn declaring_type(&self) -> Option<TypeDefinitionRc> {
        self.declaring_type
            .read()
            .ok()?
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// The module of the declaring type
    #[must_use]
    pub fn module(&self) -> Option<Arc<crate::metadata::model::ModuleDefinition>> {
        self.declaring_type().and_then(|declaring| declaring.module())
    }

    /// The decoded method signature.
    ///
    /// Decoding happens on first access; a malformed blob surfaces here, not at
    /// materialisation time.
    ///
    /// # Errors
    /// Returns [`crate::Error::MalformedSignature`] if the stored blob is invalid
    pub fn signature(&self) -> Result<MethodSignature> {
        if let Some(cached) = self.signature.get_cloned() {
            return Ok(cached);
        }

        let blob = self.signature_blob.get_cloned().unwrap_or_default();
        let decoded = SignatureReader::new(&blob).read_method_signature()?;
        Ok(self.signature.get_or_init(|| decoded).clone())
    }

    /// Replace the signature
    ///
    /// ## Arguments
    /// * 'signature' - The new method signature
    pub fn set_signature(&self, signature: MethodSignature) {
        self.signature.set(signature);
    }

    /// Snapshot of the parameter list in sequence order
    #[must_use]
    pub fn params(&self) -> Vec<ParameterDefinitionRc> {
        self.params.read().map(|list| list.clone()).unwrap_or_default()
    }

    /// Append a parameter definition
    ///
    /// ## Arguments
    /// * 'param' - The parameter to append
    pub fn add_param(&self, param: ParameterDefinitionRc) {
        if let Ok(mut params) = self.params.write() {
            params.push(param);
        }
    }

    pub(crate) fn set_declaring_type(&self, declaring: Option<Weak<TypeDefinition>>) {
        if let Ok(mut slot) = self.declaring_type.write() {
            *slot = declaring;
        }
    }
}

/// A parameter definition (a Param row, resolved).
#[derive(Debug, Default)]
pub struct ParameterDefinition {
    /// Parameter name
    pub name: LazyCell<String>,
    /// 1-based parameter sequence; 0 denotes the return value
    pub sequence: LazyCell<u16>,
    /// Parameter attributes
    pub flags: LazyCell<ParamAttributes>,
    /// Marshalling descriptor, for parameters carrying one
    pub marshal: LazyCell<Option<NativeType>>,
}

impl ParameterDefinition {
    /// Create a parameter with the given name and sequence
    ///
    /// ## Arguments
    /// * 'name' - The parameter name
    /// * 'sequence' - 1-based sequence number, 0 for the return value
    #[must_use]
    pub fn new(name: &str, sequence: u16) -> ParameterDefinitionRc {
        let param = ParameterDefinition::default();
        param.name.set(name.to_string());
        param.sequence.set(sequence);
        Arc::new(param)
    }

    /// The parameter name
    #[must_use]
    pub fn name(&self) -> String {
        self.name.get_cloned().unwrap_or_default()
    }
}

/// The signature of a member reference: method-shaped or field-shaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberRefSignature {
    /// A method reference signature
    Method(MethodSignature),
    /// A field reference signature
    Field(FieldSignature),
}

/// A reference to a member of another scope (a MemberRef row, resolved).
#[derive(Debug, Default)]
pub struct MemberReference {
    /// Member name
    pub name: LazyCell<String>,
    /// The parent the member belongs to
    pub parent: LazyCell<Option<TypeDefOrRef>>,
    signature_blob: LazyCell<Vec<u8>>,
    signature: LazyCell<MemberRefSignature>,
}

impl MemberReference {
    /// Create a member reference with the given parent, name and signature
    ///
    /// ## Arguments
    /// * 'parent' - The parent type
    /// * 'name' - The member name
    /// * 'signature' - The member signature
    #[must_use]
    pub fn new(
        parent: TypeDefOrRef,
        name: &str,
        signature: MemberRefSignature,
    ) -> MemberReferenceRc {
        let member = MemberReference::default();
        member.parent.set(Some(parent));
        member.name.set(name.to_string());
        member.signature.set(signature);
        Arc::new(member)
    }

    /// Create a member reference over a raw signature blob, decoded on first access
    ///
    /// ## Arguments
    /// * 'parent' - The parent type, if resolved
    /// * 'name' - The member name
    /// * 'blob' - The signature blob bytes
    #[must_use]
    pub fn from_blob(
        parent: Option<TypeDefOrRef>,
        name: &str,
        blob: Vec<u8>,
    ) -> MemberReferenceRc {
        let member = MemberReference::default();
        member.parent.set(parent);
        member.name.set(name.to_string());
        member.signature_blob.set(blob);
        Arc::new(member)
    }

    /// The member name
    #[must_use]
    pub fn name(&self) -> String {
        self.name.get_cloned().unwrap_or_default()
    }

    /// The full name: `Parent::Name`
    #[must_use]
    pub fn full_name(&self) -> String {
        match self.parent.get_cloned().flatten() {
            Some(parent) => format!("{}::{}", parent.full_name(), self.name()),
            None => self.name(),
        }
    }

    /// The module of the parent type, where known
    #[must_use]
    pub fn module(&self) -> Option<Arc<crate::metadata::model::ModuleDefinition>> {
        self.parent.get_cloned().flatten().and_then(|parent| parent.module())
    }

    /// The decoded member signature.
    ///
    /// The blob's leading byte discriminates field-shaped from method-shaped
    /// references. Decoding happens on first access.
    ///
    /// # Errors
    /// Returns [`crate::Error::MalformedSignature`] if the stored blob is invalid
    pub fn signature(&self) -> Result<MemberRefSignature> {
        if let Some(cached) = self.signature.get_cloned() {
            return Ok(cached);
        }

        let blob = self.signature_blob.get_cloned().unwrap_or_default();
        let decoded = if blob.first() == Some(&SIGNATURE_FLAGS::FIELD) {
            MemberRefSignature::Field(SignatureReader::new(&blob).read_field_signature()?)
        } else {
            MemberRefSignature::Method(SignatureReader::new(&blob).read_method_signature()?)
        };

        Ok(self.signature.get_or_init(|| decoded).clone())
    }

    /// Resolve the reference to its target definition in another on-disk image.
    ///
    /// Cross-assembly resolution is outside the scope of this crate.
    ///
    /// # Errors
    /// Always returns [`Error::NotImplemented`]
    pub fn resolve(&self) -> Result<()> {
        Err(Error::NotImplemented("cross-assembly member resolution"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::signatures::TypeSignature;

    #[test]
    fn field_back_reference_and_names() {
        let declaring = TypeDefinition::new("Ns", "Holder");
        let field = FieldDefinition::new("_value", FieldSignature::new(TypeSignature::I4));

        declaring.add_field(field.clone());
        assert_eq!(field.full_name(), "Ns.Holder::_value");
        assert_eq!(declaring.fields().len(), 1);

        declaring.remove_field(&field);
        assert!(field.declaring_type().is_none());
        assert_eq!(field.full_name(), "_value");
    }

    #[test]
    fn lazy_field_signature() {
        // FIELD prolog, string type
        let field = FieldDefinition::from_blob("Name", vec![0x06, 0x0E]);
        assert_eq!(
            field.signature().unwrap(),
            FieldSignature::new(TypeSignature::String)
        );

        // Malformed blob surfaces on access, every time
        let broken = FieldDefinition::from_blob("Broken", vec![0x01]);
        assert!(broken.signature().is_err());
        assert!(broken.signature().is_err());
    }

    #[test]
    fn method_with_params() {
        let method = MethodDefinition::from_blob("Add", vec![0x20, 0x02, 0x08, 0x08, 0x08]);
        method.add_param(ParameterDefinition::new("left", 1));
        method.add_param(ParameterDefinition::new("right", 2));

        let signature = method.signature().unwrap();
        assert!(signature.has_this);
        assert_eq!(signature.params.len(), 2);
        assert_eq!(method.params().len(), 2);

        let declaring = TypeDefinition::new("Ns", "Calc");
        declaring.add_method(method.clone());
        assert_eq!(method.full_name(), "Ns.Calc::Add");
    }

    #[test]
    fn member_reference_discriminates_signatures() {
        // Field-shaped blob
        let field_ref = MemberReference::from_blob(None, "s_field", vec![0x06, 0x08]);
        assert!(matches!(
            field_ref.signature().unwrap(),
            MemberRefSignature::Field(_)
        ));

        // Method-shaped blob: static void M()
        let method_ref = MemberReference::from_blob(None, "M", vec![0x00, 0x00, 0x01]);
        assert!(matches!(
            method_ref.signature().unwrap(),
            MemberRefSignature::Method(_)
        ));

        assert!(matches!(
            method_ref.resolve(),
            Err(Error::NotImplemented(_))
        ));
    }

    #[test]
    fn member_reference_full_name() {
        let parent = TypeDefOrRef::Ref(crate::metadata::model::TypeReference::new(
            crate::metadata::model::TypeRefScope::None,
            "System",
            "Console",
        ));
        let member = MemberReference::new(
            parent,
            "WriteLine",
            MemberRefSignature::Method(MethodSignature::default()),
        );
        assert_eq!(member.full_name(), "System.Console::WriteLine");
    }
}
