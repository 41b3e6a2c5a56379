//! The object model: polymorphic descriptors bridging raw rows and resolved
//! references.
//!
//! Descriptors offer a uniform capability set - `name`, `full_name`, `module`,
//! `declaring_type` where meaningful, plus downcasts on the sums - and keep their
//! sub-fields behind [`LazyCell`] so the first observer pays for materialisation
//! and later edits are plain assignments. Persistence back to bytes goes through
//! the builder pipeline exclusively; nothing writes through to the source image.
//!
//! # Key Components
//!
//! - [`ModuleDefinition`] - the root descriptor and token registry
//! - [`TypeDefinition`] / [`TypeReference`] / [`TypeSpecification`] / [`TypeDefOrRef`]
//! - [`FieldDefinition`] / [`MethodDefinition`] / [`ParameterDefinition`] /
//!   [`MemberReference`]
//! - [`AssemblyDefinition`] / [`AssemblyReference`]
//! - [`LazyCell`] - the single-assignment cell behind every lazy field

mod assembly;
mod cell;
mod flags;
mod materialize;
mod members;
mod module;
mod types;

pub use assembly::{
    public_key_token, AssemblyDefinition, AssemblyDefinitionRc, AssemblyReference,
    AssemblyReferenceRc, AssemblyVersion,
};
pub use cell::LazyCell;
pub use flags::{
    AssemblyFlags, FieldAttributes, MethodAttributes, ParamAttributes, TypeAttributes,
};
pub use members::{
    FieldDefinition, FieldDefinitionRc, MemberRefSignature, MemberReference,
    MemberReferenceRc, MethodDefinition, MethodDefinitionRc, ParameterDefinition,
    ParameterDefinitionRc,
};
pub use module::{ModuleDefinition, ModuleDefinitionRc};
pub use types::{
    TypeDefOrRef, TypeDefinition, TypeDefinitionRc, TypeRefScope, TypeReference,
    TypeReferenceRc, TypeSpecification, TypeSpecificationRc,
};
