//! ECMA-335 metadata: heaps, tables, signatures, the object model and the builder.
//!
//! # Architecture
//!
//! The metadata subsystem is layered:
//! - **Physical**: [`heaps`] and [`tables`] give typed, zero-copy access to the
//!   streams of a parsed directory, and their write-side buffers accumulate a new
//!   directory.
//! - **Codec**: [`signatures`] and [`marshalling`] translate between blob bytes and
//!   recursive descriptor trees, with shared recursion protection.
//! - **Logical**: [`model`] offers polymorphic descriptors bridging raw tokens and
//!   resolved references, materialised lazily from an [`image::MetadataImage`].
//! - **Emission**: [`builder`] re-emits a consistent directory from an edited model
//!   in its two-pass prepare/write protocol.
//!
//! # Key Components
//!
//! - [`token::Token`] - 32-bit table/row references
//! - [`image::MetadataImage`] - a parsed metadata directory
//! - [`model::ModuleDefinition`] - the root of the object model
//! - [`builder::MetadataBuilder`] - model to bytes

pub mod builder;
pub mod heaps;
pub mod image;
pub mod marshalling;
pub mod model;
pub mod root;
pub mod signatures;
pub mod tables;
/// Metadata tokens referencing rows in metadata tables.
pub mod token;
