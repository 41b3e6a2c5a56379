//! The module descriptor: the root of the object model.

use std::sync::{Arc, RwLock};

use crossbeam_skiplist::SkipMap;
use uguid::Guid;

use crate::{
    metadata::{
        model::{
            AssemblyDefinitionRc, AssemblyReferenceRc, LazyCell, MemberReferenceRc,
            TypeDefOrRef, TypeDefinitionRc, TypeReferenceRc, TypeSpecificationRc,
        },
        tables::TableId,
        token::Token,
    },
    Error, Result,
};

/// Cheap-copy reference to a [`ModuleDefinition`]
pub type ModuleDefinitionRc = Arc<ModuleDefinition>;

/// The manifest module of a metadata image: the root every builder pass starts from.
///
/// The module owns its descriptor collections in declaration order; insertion sets
/// the child's back reference and removal clears it. Tokens are never stored on
/// descriptors - the module's registry maps the source image's (or provisionally
/// assigned) tokens to descriptors, and the builder derives fresh tokens from
/// descriptor identity at write time.
#[derive(Default)]
pub struct ModuleDefinition {
    /// Module name (usually the file name)
    pub name: LazyCell<String>,
    /// Module version identifier
    pub mvid: LazyCell<Guid>,
    /// The assembly manifest, `None` for netmodules
    pub assembly: LazyCell<Option<AssemblyDefinitionRc>>,
    assembly_refs: RwLock<Vec<AssemblyReferenceRc>>,
    type_refs: RwLock<Vec<TypeReferenceRc>>,
    types: RwLock<Vec<TypeDefinitionRc>>,
    type_specs: RwLock<Vec<TypeSpecificationRc>>,
    member_refs: RwLock<Vec<MemberReferenceRc>>,
    registry: SkipMap<u32, TypeDefOrRef>,
}

impl ModuleDefinition {
    /// Create an empty module with the given name
    ///
    /// ## Arguments
    /// * 'name' - The module name
    #[must_use]
    pub fn new(name: &str) -> ModuleDefinitionRc {
        let module = ModuleDefinition::default();
        module.name.set(name.to_string());
        module.mvid.set(Guid::ZERO);
        Arc::new(module)
    }

    /// The module name
    #[must_use]
    pub fn name(&self) -> String {
        self.name.get_cloned().unwrap_or_default()
    }

    /// Snapshot of all type definitions in row order (nested types included)
    #[must_use]
    pub fn types(&self) -> Vec<TypeDefinitionRc> {
        self.types.read().map(|list| list.clone()).unwrap_or_default()
    }

    /// Snapshot of the top-level type definitions in row order
    #[must_use]
    pub fn top_level_types(&self) -> Vec<TypeDefinitionRc> {
        self.types()
            .into_iter()
            .filter(|definition| definition.declaring_type().is_none())
            .collect()
    }

    /// Snapshot of the type references in row order
    #[must_use]
    pub fn type_refs(&self) -> Vec<TypeReferenceRc> {
        self.type_refs
            .read()
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the type specifications in row order
    #[must_use]
    pub fn type_specs(&self) -> Vec<TypeSpecificationRc> {
        self.type_specs
            .read()
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the member references in row order
    #[must_use]
    pub fn member_refs(&self) -> Vec<MemberReferenceRc> {
        self.member_refs
            .read()
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the assembly references in row order
    #[must_use]
    pub fn assembly_refs(&self) -> Vec<AssemblyReferenceRc> {
        self.assembly_refs
            .read()
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    /// Append a type definition, setting its module back reference and registering
    /// it under a provisional token.
    ///
    /// ## Arguments
    /// * 'definition' - The type to append
    ///
    /// ## Returns
    /// The token the type is registered under; valid for signature construction
    /// until the next build reassigns tokens.
    pub fn add_type(self: &Arc<Self>, definition: TypeDefinitionRc) -> Token {
        definition.set_module(Arc::downgrade(self));
        if let Ok(mut types) = self.types.write() {
            types.push(definition.clone());
        }
        self.register(TableId::TypeDef as u8, TypeDefOrRef::Def(definition))
    }

    /// Remove a type definition, clearing its module back reference and dropping
    /// its registry entries.
    ///
    /// ## Arguments
    /// * 'definition' - The type to remove
    pub fn remove_type(&self, definition: &TypeDefinitionRc) {
        if let Ok(mut types) = self.types.write() {
            types.retain(|existing| !Arc::ptr_eq(existing, definition));
        }
        definition.clear_module();

        let target = TypeDefOrRef::Def(definition.clone());
        let stale: Vec<u32> = self
            .registry
            .iter()
            .filter(|entry| entry.value().same_as(&target))
            .map(|entry| *entry.key())
            .collect();
        for key in stale {
            _ = self.registry.remove(&key);
        }
    }

    /// Append a type reference, registering it under a provisional token
    ///
    /// ## Arguments
    /// * 'reference' - The reference to append
    pub fn add_type_ref(&self, reference: TypeReferenceRc) -> Token {
        if let Ok(mut refs) = self.type_refs.write() {
            refs.push(reference.clone());
        }
        self.register(TableId::TypeRef as u8, TypeDefOrRef::Ref(reference))
    }

    /// Append a type specification, registering it under a provisional token
    ///
    /// ## Arguments
    /// * 'specification' - The specification to append
    pub fn add_type_spec(&self, specification: TypeSpecificationRc) -> Token {
        if let Ok(mut specs) = self.type_specs.write() {
            specs.push(specification.clone());
        }
        self.register(TableId::TypeSpec as u8, TypeDefOrRef::Spec(specification))
    }

    /// Append a member reference
    ///
    /// ## Arguments
    /// * 'member' - The member reference to append
    pub fn add_member_ref(&self, member: MemberReferenceRc) {
        if let Ok(mut members) = self.member_refs.write() {
            members.push(member);
        }
    }

    /// Append an assembly reference
    ///
    /// ## Arguments
    /// * 'reference' - The assembly reference to append
    pub fn add_assembly_ref(&self, reference: AssemblyReferenceRc) {
        if let Ok(mut refs) = self.assembly_refs.write() {
            refs.push(reference);
        }
    }

    /// Resolve a type token against the module's registry.
    ///
    /// Tokens come from the source image or from prior `add_*` registrations;
    /// signatures decoded lazily may carry tokens past the registered tail, which
    /// surface here as [`Error::UnresolvableToken`] on first access.
    ///
    /// ## Arguments
    /// * 'token' - The token to resolve
    ///
    /// # Errors
    /// Returns [`Error::UnresolvableToken`] if no descriptor is registered under
    /// the token
    pub fn resolve_type(&self, token: Token) -> Result<TypeDefOrRef> {
        match self.registry.get(&token.value()) {
            Some(entry) => Ok(entry.value().clone()),
            None => Err(Error::UnresolvableToken(token)),
        }
    }

    /// The registered (source or provisional) token of a descriptor, if any
    ///
    /// ## Arguments
    /// * 'descriptor' - The descriptor to look up
    #[must_use]
    pub fn token_of(&self, descriptor: &TypeDefOrRef) -> Option<Token> {
        self.registry
            .iter()
            .find(|entry| entry.value().same_as(descriptor))
            .map(|entry| Token::new(*entry.key()))
    }

    /// Iterate the registry as (token, descriptor) pairs
    pub(crate) fn registry_entries(&self) -> Vec<(Token, TypeDefOrRef)> {
        self.registry
            .iter()
            .map(|entry| (Token::new(*entry.key()), entry.value().clone()))
            .collect()
    }

    /// Register a descriptor under the next free row of `table`.
    ///
    /// Against an empty registry and called in row order, the allocation
    /// reproduces source rids exactly; the image materialiser relies on this to
    /// register descriptors under their source tokens.
    fn register(&self, table: u8, descriptor: TypeDefOrRef) -> Token {
        let lower = u32::from(table) << 24;
        let upper = lower | 0x00FF_FFFF;

        let next_row = self
            .registry
            .range(lower..=upper)
            .next_back()
            .map_or(1, |entry| (*entry.key() & 0x00FF_FFFF) + 1);

        let token = Token::from_parts(table, next_row);
        _ = self.registry.insert(token.value(), descriptor);
        token
    }
}

impl std::fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDefinition")
            .field("name", &self.name())
            .field("types", &self.types().len())
            .field("type_refs", &self.type_refs().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::model::{TypeDefinition, TypeRefScope, TypeReference};

    #[test]
    fn add_type_sets_back_reference_and_token() {
        let module = ModuleDefinition::new("test.dll");
        let definition = TypeDefinition::new("Ns", "First");

        let token = module.add_type(definition.clone());
        assert_eq!(token, Token::new(0x0200_0001));
        assert!(Arc::ptr_eq(&definition.module().unwrap(), &module));

        let second = module.add_type(TypeDefinition::new("Ns", "Second"));
        assert_eq!(second, Token::new(0x0200_0002));

        let resolved = module.resolve_type(token).unwrap();
        assert!(resolved.same_as(&TypeDefOrRef::Def(definition)));
    }

    #[test]
    fn remove_type_clears_everything() {
        let module = ModuleDefinition::new("test.dll");
        let definition = TypeDefinition::new("Ns", "Gone");
        let token = module.add_type(definition.clone());

        module.remove_type(&definition);
        assert!(definition.module().is_none());
        assert!(module.types().is_empty());
        assert!(matches!(
            module.resolve_type(token),
            Err(Error::UnresolvableToken(_))
        ));
    }

    #[test]
    fn unresolved_tokens_surface() {
        let module = ModuleDefinition::new("test.dll");
        assert!(matches!(
            module.resolve_type(Token::new(0x0200_0099)),
            Err(Error::UnresolvableToken(token)) if token == Token::new(0x0200_0099)
        ));
    }

    #[test]
    fn provisional_tokens_are_per_table() {
        let module = ModuleDefinition::new("test.dll");
        _ = module.add_type(TypeDefinition::new("A", "B"));

        let reference = TypeReference::new(TypeRefScope::None, "System", "Object");
        let token = module.add_type_ref(reference.clone());
        assert_eq!(token, Token::new(0x0100_0001));

        assert_eq!(
            module.token_of(&TypeDefOrRef::Ref(reference)),
            Some(token)
        );
    }

    #[test]
    fn top_level_filter() {
        let module = ModuleDefinition::new("test.dll");
        let outer = TypeDefinition::new("Ns", "Outer");
        let inner = TypeDefinition::new("", "Inner");
        outer.add_nested_type(inner.clone());

        _ = module.add_type(outer.clone());
        _ = module.add_type(inner);

        assert_eq!(module.types().len(), 2);
        let top_level = module.top_level_types();
        assert_eq!(top_level.len(), 1);
        assert!(Arc::ptr_eq(&top_level[0], &outer));
    }
}
