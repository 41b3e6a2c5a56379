// Copyright 2025-2026 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![allow(dead_code)]
// - 'metadata/model/cell.rs' uses raw pointers for its compare-and-swap holder

//! # cilforge
//!
//! A library for reading, modelling, editing, and re-emitting the ECMA-335 CLI
//! metadata of managed executables. Built for disassemblers, obfuscators,
//! deobfuscators, static analyzers, and build tooling that must inspect or
//! transform binaries without executing them.
//!
//! # Architecture
//!
//! The crate is the metadata subsystem of such tooling; the PE container is an
//! external collaborator that locates the metadata root and hands over a byte span.
//!
//! - **File Layer**: bounds-checked binary readers and writers, including the
//!   ECMA-335 compressed integer and serialised string primitives
//! - **Heap Layer**: zero-copy views and deduplicating write buffers for the
//!   `#Strings`, `#US`, `#Blob` and `#GUID` heaps
//! - **Table Layer**: the typed row schema of the `#~` stream, per-image column
//!   width computation, coded indexes, lazy row access and the mutable row store
//! - **Signature Codec**: recursive decode/encode of type, method, field,
//!   property, local-variable, method-spec and marshalling descriptors with
//!   recursion protection against hostile blobs
//! - **Object Model**: polymorphic descriptors (`ModuleDefinition`,
//!   `TypeDefinition`, `MemberReference`, ...) behind single-assignment lazy cells
//! - **Builder**: the two-pass prepare/write pipeline assigning tokens, interning
//!   heap entries and laying out tables at converged coded-index widths
//!
//! # Usage Examples
//!
//! ## Parsing a metadata directory
//!
//! ```rust,no_run
//! use cilforge::MetadataImage;
//!
//! # fn example(metadata_bytes: &[u8]) -> cilforge::Result<()> {
//! let image = MetadataImage::parse(metadata_bytes)?;
//! println!("runtime {}", image.root.version);
//!
//! if let Some(strings) = image.root.stream("#Strings") {
//!     println!("#Strings occupies {} bytes", strings.size);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Materialising and editing the object model
//!
//! ```rust,no_run
//! use cilforge::{
//!     metadata::builder::MetadataBuilder,
//!     metadata::model::ModuleDefinition,
//!     MetadataImage,
//! };
//!
//! # fn example(metadata_bytes: &[u8]) -> cilforge::Result<()> {
//! let image = MetadataImage::parse(metadata_bytes)?;
//! let module = ModuleDefinition::from_image(&image)?;
//!
//! for definition in module.types() {
//!     println!("{}", definition.full_name());
//! }
//!
//! // Edit freely, then re-emit a fresh directory; the source bytes stay untouched
//! module.name.set("patched.dll".to_string());
//! let rebuilt = MetadataBuilder::new().build(&module)?;
//! # let _ = rebuilt;
//! # Ok(())
//! # }
//! ```
//!
//! # Standards Compliance
//!
//! All stream layouts, table schemas and signature encodings follow the ECMA-335
//! specification (6th edition), Partition II.
//!
//! ### References
//!
//! - [ECMA-335 Standard](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)
//!
//! # Error Handling
//!
//! All operations return [`Result<T, Error>`](Result). Failures always surface;
//! the only documented substitutions are the zero GUID for unparseable custom
//! marshaller GUID strings, and the deferral of [`Error::UnresolvableToken`] to
//! first access for lazily decoded signatures.
//!
//! # Thread Safety
//!
//! Descriptors are [`std::marker::Send`] and [`std::marker::Sync`]; their lazy
//! fields initialise once under an atomic compare-and-swap and are freely mutable
//! afterwards. The builder is single-threaded cooperative: prepare and write must
//! not be interleaved with user mutation.

#[macro_use]
pub(crate) mod error;
pub mod file;

/// ECMA-335 metadata parsing, modelling and emission.
pub mod metadata;

/// `cilforge` Result type.
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`crate::Error`], used consistently throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// `cilforge` Error type.
///
/// The main error type for all operations in this crate. See [`error`] for the
/// full variant catalogue and the two documented substitution cases.
pub use error::Error;

/// A parsed metadata directory: root header, heaps and table stream.
pub use metadata::image::MetadataImage;

/// The root descriptor of the object model.
pub use metadata::model::ModuleDefinition;

/// The two-pass metadata emitter.
pub use metadata::builder::MetadataBuilder;

/// Metadata tokens: 32-bit table/row references.
pub use metadata::token::Token;
