//! Signature blob codec: recursive type, method, field, property, local-variable and
//! method-spec descriptors.
//!
//! Signatures are the length-prefixed blobs of the `#Blob` heap describing the shape of
//! every member in CLI metadata (ECMA-335 §II.23.2). Decoding and encoding are both
//! recursive over the element-type grammar and share a depth guard against hostile,
//! deeply nested input.
//!
//! # Key Components
//!
//! - [`TypeSignature`] and the composite signature types in [`types`](self)
//! - [`SignatureReader`] - decoding with recursion protection
//! - the `encode_*` functions and `physical_size` computation in [`writer`](self)

mod reader;
mod types;
mod writer;

pub use reader::{RecursionGuard, SignatureReader, MAX_RECURSION_DEPTH};
pub use types::{
    ArrayShape, CallingConvention, FieldSignature, LocalVariablesSignature, MethodSignature,
    MethodSpecSignature, NameResolver, PropertySignature, TypeSignature,
};
pub use writer::{
    encode_field_signature, encode_local_variables_signature, encode_method_signature,
    encode_method_spec_signature, encode_property_signature, encode_type_signature,
};

#[allow(non_snake_case)]
/// Element type constants as defined in ECMA-335 II.23.1.16.
///
/// These bytes tag every node of the signature grammar; the codec dispatches on them
/// when decoding and emits them when encoding.
pub mod ELEMENT_TYPE {
    /// Marks the end of a list (0x00)
    pub const END: u8 = 0x00;
    /// `void` (0x01)
    pub const VOID: u8 = 0x01;
    /// `bool` (0x02)
    pub const BOOLEAN: u8 = 0x02;
    /// `char` (0x03)
    pub const CHAR: u8 = 0x03;
    /// `int8` (0x04)
    pub const I1: u8 = 0x04;
    /// `uint8` (0x05)
    pub const U1: u8 = 0x05;
    /// `int16` (0x06)
    pub const I2: u8 = 0x06;
    /// `uint16` (0x07)
    pub const U2: u8 = 0x07;
    /// `int32` (0x08)
    pub const I4: u8 = 0x08;
    /// `uint32` (0x09)
    pub const U4: u8 = 0x09;
    /// `int64` (0x0a)
    pub const I8: u8 = 0x0a;
    /// `uint64` (0x0b)
    pub const U8: u8 = 0x0b;
    /// `float32` (0x0c)
    pub const R4: u8 = 0x0c;
    /// `float64` (0x0d)
    pub const R8: u8 = 0x0d;
    /// `System.String` (0x0e)
    pub const STRING: u8 = 0x0e;
    /// Unmanaged pointer, followed by its pointee (0x0f)
    pub const PTR: u8 = 0x0f;
    /// Managed by-reference, followed by its referent (0x10)
    pub const BYREF: u8 = 0x10;
    /// Value type, followed by a TypeDefOrRef coded index (0x11)
    pub const VALUETYPE: u8 = 0x11;
    /// Class, followed by a TypeDefOrRef coded index (0x12)
    pub const CLASS: u8 = 0x12;
    /// Generic parameter of the enclosing type, by index (0x13)
    pub const VAR: u8 = 0x13;
    /// Multi-dimensional array with shape (0x14)
    pub const ARRAY: u8 = 0x14;
    /// Generic instantiation (0x15)
    pub const GENERICINST: u8 = 0x15;
    /// `System.TypedReference` (0x16)
    pub const TYPEDBYREF: u8 = 0x16;
    /// `native int` (0x18)
    pub const I: u8 = 0x18;
    /// `native uint` (0x19)
    pub const U: u8 = 0x19;
    /// Function pointer, followed by a method signature (0x1b)
    pub const FNPTR: u8 = 0x1b;
    /// `System.Object` (0x1c)
    pub const OBJECT: u8 = 0x1c;
    /// Single-dimensional zero-based array (0x1d)
    pub const SZARRAY: u8 = 0x1d;
    /// Generic parameter of the enclosing method, by index (0x1e)
    pub const MVAR: u8 = 0x1e;
    /// Required modifier, followed by a TypeDefOrRef coded index and the inner type (0x1f)
    pub const CMOD_REQD: u8 = 0x1f;
    /// Optional modifier, followed by a TypeDefOrRef coded index and the inner type (0x20)
    pub const CMOD_OPT: u8 = 0x20;
    /// Sentinel separating fixed from vararg parameters (0x41)
    pub const SENTINEL: u8 = 0x41;
    /// Pinned local, followed by its type (0x45)
    pub const PINNED: u8 = 0x45;
}

#[allow(non_snake_case)]
/// Signature prolog and calling convention constants (ECMA-335 II.23.2.1-II.23.2.15).
pub mod SIGNATURE_FLAGS {
    /// Default managed calling convention
    pub const DEFAULT: u8 = 0x00;
    /// Unmanaged `cdecl`
    pub const C: u8 = 0x01;
    /// Unmanaged `stdcall`
    pub const STDCALL: u8 = 0x02;
    /// Unmanaged `thiscall`
    pub const THISCALL: u8 = 0x03;
    /// Unmanaged `fastcall`
    pub const FASTCALL: u8 = 0x04;
    /// Managed variable-argument calling convention
    pub const VARARG: u8 = 0x05;
    /// Field signature prolog
    pub const FIELD: u8 = 0x06;
    /// Local variable signature prolog
    pub const LOCAL_SIG: u8 = 0x07;
    /// Property signature prolog
    pub const PROPERTY: u8 = 0x08;
    /// Generic method instantiation prolog
    pub const GENERIC_INST: u8 = 0x0A;
    /// Mask covering the calling convention kind
    pub const KIND_MASK: u8 = 0x0F;
    /// The method carries a generic parameter count
    pub const GENERIC: u8 = 0x10;
    /// The method has an implicit `this` parameter
    pub const HAS_THIS: u8 = 0x20;
    /// The `this` parameter is explicit in the parameter list
    pub const EXPLICIT_THIS: u8 = 0x40;
}
