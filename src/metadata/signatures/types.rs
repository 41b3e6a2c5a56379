//! The signature value trees produced and consumed by the codec.
//!
//! Signatures are modelled as a flat tagged sum over the element-type domain; each
//! variant carries only its semantically required fields. Shared behaviour - name
//! composition and physical length - lives here as single dispatch points over the
//! variants, so the codec stays a pure grammar walk.

use crate::{
    file::BinaryWriter,
    metadata::{signatures::writer::type_def_or_ref_coded_value, token::Token},
};

/// Resolves a token to the full name of the type it references, for display
/// composition. Returning `None` renders the raw token instead.
pub type NameResolver<'a> = &'a dyn Fn(Token) -> Option<String>;

/// The shape of a multi-dimensional [`TypeSignature::Array`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArrayShape {
    /// Number of dimensions
    pub rank: u32,
    /// Declared sizes, one per leading dimension (may be shorter than `rank`)
    pub sizes: Vec<u32>,
    /// Declared lower bounds, one per leading dimension (may be shorter than `rank`)
    pub lower_bounds: Vec<i32>,
}

/// The managed calling convention kind stored in the low nibble of a method
/// signature's flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallingConvention {
    /// Default managed convention
    #[default]
    Default,
    /// Unmanaged `cdecl`
    C,
    /// Unmanaged `stdcall`
    StdCall,
    /// Unmanaged `thiscall`
    ThisCall,
    /// Unmanaged `fastcall`
    FastCall,
    /// Managed variable-argument convention
    VarArg,
}

/// A parsed type signature (ECMA-335 II.23.2.12).
///
/// The recursive variants own their children; the tree is acyclic by construction,
/// which is why the codec's recursion guard is a plain depth counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSignature {
    /// `void`
    Void,
    /// `bool`
    Boolean,
    /// `char`
    Char,
    /// signed 8-bit integer
    I1,
    /// unsigned 8-bit integer
    U1,
    /// signed 16-bit integer
    I2,
    /// unsigned 16-bit integer
    U2,
    /// signed 32-bit integer
    I4,
    /// unsigned 32-bit integer
    U4,
    /// signed 64-bit integer
    I8,
    /// unsigned 64-bit integer
    U8,
    /// 32-bit floating point
    R4,
    /// 64-bit floating point
    R8,
    /// `System.String`
    String,
    /// `System.Object`
    Object,
    /// `System.TypedReference`
    TypedByRef,
    /// signed integer sized to the executing platform
    I,
    /// unsigned integer sized to the executing platform
    U,
    /// A class, referenced by TypeDef, TypeRef or TypeSpec token
    Class(Token),
    /// A value type, referenced by TypeDef, TypeRef or TypeSpec token
    ValueType(Token),
    /// Unmanaged pointer to the inner type
    Ptr(Box<TypeSignature>),
    /// Managed reference to the inner type
    ByRef(Box<TypeSignature>),
    /// Single-dimensional zero-based array of the inner type
    SzArray(Box<TypeSignature>),
    /// Multi-dimensional array of the base type with explicit shape
    Array(Box<TypeSignature>, ArrayShape),
    /// Generic instantiation: the generic definition (a class or value type) and its
    /// type arguments
    GenericInst(Box<TypeSignature>, Vec<TypeSignature>),
    /// Generic parameter of the enclosing type, by index
    GenericParamType(u32),
    /// Generic parameter of the enclosing method, by index
    GenericParamMethod(u32),
    /// Function pointer carrying an embedded method signature
    FnPtr(Box<MethodSignature>),
    /// `modreq(modifier)` / `modopt(modifier)` annotation over the inner type.
    ///
    /// Modifiers stack: the inner type may itself be `Modified`.
    Modified {
        /// True for `modreq`, false for `modopt`
        required: bool,
        /// The modifier type (TypeDef, TypeRef or TypeSpec token)
        modifier: Token,
        /// The annotated inner type
        base: Box<TypeSignature>,
    },
    /// Pinned local variable type
    Pinned(Box<TypeSignature>),
    /// Sentinel separating fixed from vararg parameters
    Sentinel,
}

impl TypeSignature {
    /// Compose the display name of this signature.
    ///
    /// Suffix forms follow the runtime's conventions: `&` for by-reference, `*` for
    /// pointers, `[]` / `[,,]` for arrays, ` modreq(...)` / ` modopt(...)` appended
    /// after the inner name. Tokens resolve through `resolve`; unresolved tokens
    /// render in raw `0x########` form.
    ///
    /// ## Arguments
    /// * 'resolve' - Maps a type token to its full name, if known
    #[must_use]
    pub fn name_with(&self, resolve: NameResolver<'_>) -> String {
        let token_name =
            |token: &Token| resolve(*token).unwrap_or_else(|| format!("{token}"));

        match self {
            TypeSignature::Void => "Void".to_string(),
            TypeSignature::Boolean => "Boolean".to_string(),
            TypeSignature::Char => "Char".to_string(),
            TypeSignature::I1 => "SByte".to_string(),
            TypeSignature::U1 => "Byte".to_string(),
            TypeSignature::I2 => "Int16".to_string(),
            TypeSignature::U2 => "UInt16".to_string(),
            TypeSignature::I4 => "Int32".to_string(),
            TypeSignature::U4 => "UInt32".to_string(),
            TypeSignature::I8 => "Int64".to_string(),
            TypeSignature::U8 => "UInt64".to_string(),
            TypeSignature::R4 => "Single".to_string(),
            TypeSignature::R8 => "Double".to_string(),
            TypeSignature::String => "String".to_string(),
            TypeSignature::Object => "Object".to_string(),
            TypeSignature::TypedByRef => "TypedReference".to_string(),
            TypeSignature::I => "IntPtr".to_string(),
            TypeSignature::U => "UIntPtr".to_string(),
            TypeSignature::Class(token) | TypeSignature::ValueType(token) => token_name(token),
            TypeSignature::Ptr(inner) => inner.name_with(resolve) + "*",
            TypeSignature::ByRef(inner) => inner.name_with(resolve) + "&",
            TypeSignature::SzArray(inner) => inner.name_with(resolve) + "[]",
            TypeSignature::Array(base, shape) => {
                let commas = ",".repeat(shape.rank.saturating_sub(1) as usize);
                format!("{}[{}]", base.name_with(resolve), commas)
            }
            TypeSignature::GenericInst(base, args) => {
                let arguments: Vec<String> =
                    args.iter().map(|arg| arg.name_with(resolve)).collect();
                format!("{}<{}>", base.name_with(resolve), arguments.join(","))
            }
            TypeSignature::GenericParamType(index) => format!("!{index}"),
            TypeSignature::GenericParamMethod(index) => format!("!!{index}"),
            TypeSignature::FnPtr(_) => "*()".to_string(),
            TypeSignature::Modified {
                required,
                modifier,
                base,
            } => {
                let keyword = if *required { "modreq" } else { "modopt" };
                format!("{} {}({})", base.name_with(resolve), keyword, token_name(modifier))
            }
            TypeSignature::Pinned(inner) => inner.name_with(resolve),
            TypeSignature::Sentinel => "...".to_string(),
        }
    }

    /// The encoded byte length of this signature, computed without writing.
    ///
    /// Sums the tag byte, the compressed size of every embedded integer and coded
    /// index, and the lengths of all children. The builder uses this to size the
    /// blob heap before committing column widths.
    #[must_use]
    pub fn physical_size(&self) -> u32 {
        match self {
            TypeSignature::Void
            | TypeSignature::Boolean
            | TypeSignature::Char
            | TypeSignature::I1
            | TypeSignature::U1
            | TypeSignature::I2
            | TypeSignature::U2
            | TypeSignature::I4
            | TypeSignature::U4
            | TypeSignature::I8
            | TypeSignature::U8
            | TypeSignature::R4
            | TypeSignature::R8
            | TypeSignature::String
            | TypeSignature::Object
            | TypeSignature::TypedByRef
            | TypeSignature::I
            | TypeSignature::U
            | TypeSignature::Sentinel => 1,
            TypeSignature::Class(token) | TypeSignature::ValueType(token) => {
                1 + BinaryWriter::compressed_uint_size(type_def_or_ref_coded_value(*token))
            }
            TypeSignature::Ptr(inner)
            | TypeSignature::ByRef(inner)
            | TypeSignature::SzArray(inner)
            | TypeSignature::Pinned(inner) => 1 + inner.physical_size(),
            TypeSignature::Array(base, shape) => {
                let mut size = 1 + base.physical_size();
                size += BinaryWriter::compressed_uint_size(shape.rank);
                #[allow(clippy::cast_possible_truncation)]
                {
                    size += BinaryWriter::compressed_uint_size(shape.sizes.len() as u32);
                    for declared in &shape.sizes {
                        size += BinaryWriter::compressed_uint_size(*declared);
                    }
                    size += BinaryWriter::compressed_uint_size(shape.lower_bounds.len() as u32);
                    for bound in &shape.lower_bounds {
                        size += compressed_int_size(*bound);
                    }
                }
                size
            }
            TypeSignature::GenericInst(base, args) => {
                #[allow(clippy::cast_possible_truncation)]
                let mut size = 1
                    + base.physical_size()
                    + BinaryWriter::compressed_uint_size(args.len() as u32);
                for arg in args {
                    size += arg.physical_size();
                }
                size
            }
            TypeSignature::GenericParamType(index)
            | TypeSignature::GenericParamMethod(index) => {
                1 + BinaryWriter::compressed_uint_size(*index)
            }
            TypeSignature::FnPtr(method) => 1 + method.physical_size(),
            TypeSignature::Modified {
                modifier, base, ..
            } => {
                1 + BinaryWriter::compressed_uint_size(type_def_or_ref_coded_value(*modifier))
                    + base.physical_size()
            }
        }
    }
}

/// Encoded byte length of a compressed signed integer.
fn compressed_int_size(value: i32) -> u32 {
    match value {
        -64..=63 => 1,
        -8192..=8191 => 2,
        _ => 4,
    }
}

/// A method signature (ECMA-335 II.23.2.1-II.23.2.3).
///
/// Covers `MethodDefSig`, `MethodRefSig` and `StandAloneMethodSig`: the calling
/// convention flags, the optional generic parameter count, the return type, the fixed
/// parameters, and the vararg tail past the sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MethodSignature {
    /// The calling convention kind
    pub calling_convention: CallingConvention,
    /// The method has an implicit `this` parameter
    pub has_this: bool,
    /// The `this` parameter appears explicitly in the parameter list
    pub explicit_this: bool,
    /// Number of generic parameters; 0 for non-generic methods
    pub generic_param_count: u32,
    /// The return type
    pub return_type: TypeSignature,
    /// The fixed parameters
    pub params: Vec<TypeSignature>,
    /// The vararg parameters following the sentinel, for `VARARG` call sites
    pub varargs: Vec<TypeSignature>,
}

impl Default for TypeSignature {
    fn default() -> Self {
        TypeSignature::Void
    }
}

impl MethodSignature {
    /// The encoded byte length of this method signature, computed without writing
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn physical_size(&self) -> u32 {
        let mut size = 1; // flags byte
        if self.generic_param_count > 0 {
            size += BinaryWriter::compressed_uint_size(self.generic_param_count);
        }

        let param_count = (self.params.len() + self.varargs.len()) as u32;
        size += BinaryWriter::compressed_uint_size(param_count);
        size += self.return_type.physical_size();

        for param in &self.params {
            size += param.physical_size();
        }

        if !self.varargs.is_empty() {
            size += 1; // sentinel
            for vararg in &self.varargs {
                size += vararg.physical_size();
            }
        }

        size
    }
}

/// A field signature (ECMA-335 II.23.2.4): the `FIELD` prolog wrapping one type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldSignature {
    /// The field type (modifiers stack inside the type itself)
    pub base: TypeSignature,
}

impl FieldSignature {
    /// Creates a field signature wrapping `base`
    #[must_use]
    pub fn new(base: TypeSignature) -> Self {
        FieldSignature { base }
    }

    /// The encoded byte length of this field signature, computed without writing
    #[must_use]
    pub fn physical_size(&self) -> u32 {
        1 + self.base.physical_size()
    }
}

/// A property signature (ECMA-335 II.23.2.5).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropertySignature {
    /// The property has an implicit `this` parameter
    pub has_this: bool,
    /// The property type
    pub base: TypeSignature,
    /// Indexer parameters, empty for plain properties
    pub params: Vec<TypeSignature>,
}

impl PropertySignature {
    /// The encoded byte length of this property signature, computed without writing
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn physical_size(&self) -> u32 {
        let mut size = 1 + BinaryWriter::compressed_uint_size(self.params.len() as u32);
        size += self.base.physical_size();
        for param in &self.params {
            size += param.physical_size();
        }
        size
    }
}

/// A local variable signature (ECMA-335 II.23.2.6).
///
/// Pinning and by-reference are expressed through the [`TypeSignature::Pinned`] and
/// [`TypeSignature::ByRef`] variants of each local.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalVariablesSignature {
    /// The local variable types in slot order
    pub locals: Vec<TypeSignature>,
}

impl LocalVariablesSignature {
    /// The encoded byte length of this signature, computed without writing
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn physical_size(&self) -> u32 {
        let mut size = 1 + BinaryWriter::compressed_uint_size(self.locals.len() as u32);
        for local in &self.locals {
            size += local.physical_size();
        }
        size
    }
}

/// A method specification signature (ECMA-335 II.23.2.15): the type arguments of a
/// generic method instantiation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MethodSpecSignature {
    /// The generic argument types
    pub generic_args: Vec<TypeSignature>,
}

impl MethodSpecSignature {
    /// The encoded byte length of this signature, computed without writing
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn physical_size(&self) -> u32 {
        let mut size = 1 + BinaryWriter::compressed_uint_size(self.generic_args.len() as u32);
        for arg in &self.generic_args {
            size += arg.physical_size();
        }
        size
    }
}
