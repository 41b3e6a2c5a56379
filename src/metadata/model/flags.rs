//! Attribute flag words of the descriptor model.

use bitflags::bitflags;

bitflags! {
    /// Type attributes (ECMA-335 II.23.1.15), the `Flags` column of TypeDef rows.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TypeAttributes: u32 {
        /// Type is not visible outside the assembly
        const NOT_PUBLIC = 0x0000_0000;
        /// Type is visible outside the assembly
        const PUBLIC = 0x0000_0001;
        /// Nested type with public visibility
        const NESTED_PUBLIC = 0x0000_0002;
        /// Nested type with private visibility
        const NESTED_PRIVATE = 0x0000_0003;
        /// Nested type with family visibility
        const NESTED_FAMILY = 0x0000_0004;
        /// Nested type with assembly visibility
        const NESTED_ASSEMBLY = 0x0000_0005;
        /// Nested type with family-and-assembly visibility
        const NESTED_FAMILY_AND_ASSEMBLY = 0x0000_0006;
        /// Nested type with family-or-assembly visibility
        const NESTED_FAMILY_OR_ASSEMBLY = 0x0000_0007;
        /// Mask covering the visibility bits
        const VISIBILITY_MASK = 0x0000_0007;
        /// Fields are laid out sequentially
        const SEQUENTIAL_LAYOUT = 0x0000_0008;
        /// Field layout is explicit
        const EXPLICIT_LAYOUT = 0x0000_0010;
        /// Type is an interface
        const INTERFACE = 0x0000_0020;
        /// Type is abstract
        const ABSTRACT = 0x0000_0080;
        /// Type cannot be derived from
        const SEALED = 0x0000_0100;
        /// Name is special, the name records how
        const SPECIAL_NAME = 0x0000_0400;
        /// Type is imported from COM
        const IMPORT = 0x0000_1000;
        /// Type is serializable
        const SERIALIZABLE = 0x0000_2000;
        /// Strings are interpreted as ANSI
        const ANSI_CLASS = 0x0000_0000;
        /// Strings are interpreted as UTF-16
        const UNICODE_CLASS = 0x0001_0000;
        /// String interpretation is platform dependent
        const AUTO_CLASS = 0x0002_0000;
        /// Class initializer runs before first static field access only
        const BEFORE_FIELD_INIT = 0x0010_0000;
        /// Runtime should check name encoding
        const RT_SPECIAL_NAME = 0x0000_0800;
        /// Type has declarative security
        const HAS_SECURITY = 0x0004_0000;
    }
}

bitflags! {
    /// Field attributes (ECMA-335 II.23.1.5), the `Flags` column of Field rows.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FieldAttributes: u16 {
        /// Member not referenceable
        const COMPILER_CONTROLLED = 0x0000;
        /// Accessible only by the declaring type
        const PRIVATE = 0x0001;
        /// Accessible by subtypes in this assembly
        const FAMILY_AND_ASSEMBLY = 0x0002;
        /// Accessible throughout the assembly
        const ASSEMBLY = 0x0003;
        /// Accessible by type and subtypes
        const FAMILY = 0x0004;
        /// Accessible by subtypes and the assembly
        const FAMILY_OR_ASSEMBLY = 0x0005;
        /// Accessible by anyone with visibility of the type
        const PUBLIC = 0x0006;
        /// Mask covering the access bits
        const FIELD_ACCESS_MASK = 0x0007;
        /// Field is per-type rather than per-instance
        const STATIC = 0x0010;
        /// Field may only be initialised, not written after
        const INIT_ONLY = 0x0020;
        /// Field value is a compile-time constant
        const LITERAL = 0x0040;
        /// Field is not serialized when the type is remoted
        const NOT_SERIALIZED = 0x0080;
        /// Name is special, the name records how
        const SPECIAL_NAME = 0x0200;
        /// Implementation is forwarded through P/Invoke
        const PINVOKE_IMPL = 0x2000;
        /// Runtime should check name encoding
        const RT_SPECIAL_NAME = 0x0400;
        /// Field carries marshalling information
        const HAS_FIELD_MARSHAL = 0x1000;
        /// Field has a default value
        const HAS_DEFAULT = 0x8000;
        /// Field has an RVA into initialised data
        const HAS_FIELD_RVA = 0x0100;
    }
}

bitflags! {
    /// Method attributes (ECMA-335 II.23.1.10), the `Flags` column of MethodDef rows.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MethodAttributes: u16 {
        /// Member not referenceable
        const COMPILER_CONTROLLED = 0x0000;
        /// Accessible only by the declaring type
        const PRIVATE = 0x0001;
        /// Accessible by subtypes in this assembly
        const FAMILY_AND_ASSEMBLY = 0x0002;
        /// Accessible throughout the assembly
        const ASSEMBLY = 0x0003;
        /// Accessible by type and subtypes
        const FAMILY = 0x0004;
        /// Accessible by subtypes and the assembly
        const FAMILY_OR_ASSEMBLY = 0x0005;
        /// Accessible by anyone with visibility of the type
        const PUBLIC = 0x0006;
        /// Mask covering the access bits
        const MEMBER_ACCESS_MASK = 0x0007;
        /// Method is per-type rather than per-instance
        const STATIC = 0x0010;
        /// Method cannot be overridden
        const FINAL = 0x0020;
        /// Method is virtual
        const VIRTUAL = 0x0040;
        /// Method hides by name and signature
        const HIDE_BY_SIG = 0x0080;
        /// Method always gets a new vtable slot
        const NEW_SLOT = 0x0100;
        /// Overriding requires access to the method
        const STRICT = 0x0200;
        /// Method does not provide an implementation
        const ABSTRACT = 0x0400;
        /// Name is special, the name records how
        const SPECIAL_NAME = 0x0800;
        /// Implementation is forwarded through P/Invoke
        const PINVOKE_IMPL = 0x2000;
        /// Runtime should check name encoding
        const RT_SPECIAL_NAME = 0x1000;
        /// Method has declarative security
        const HAS_SECURITY = 0x4000;
        /// Method calls another method containing security code
        const REQUIRE_SEC_OBJECT = 0x8000;
    }
}

bitflags! {
    /// Parameter attributes (ECMA-335 II.23.1.13), the `Flags` column of Param rows.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ParamAttributes: u16 {
        /// Parameter is an input
        const IN = 0x0001;
        /// Parameter is an output
        const OUT = 0x0002;
        /// Parameter is optional
        const OPTIONAL = 0x0010;
        /// Parameter has a default value
        const HAS_DEFAULT = 0x1000;
        /// Parameter carries marshalling information
        const HAS_FIELD_MARSHAL = 0x2000;
    }
}

bitflags! {
    /// Assembly flags (ECMA-335 II.23.1.2), the `Flags` column of Assembly and
    /// AssemblyRef rows.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AssemblyFlags: u32 {
        /// The blob holds the full public key rather than its token
        const PUBLIC_KEY = 0x0000_0001;
        /// Assembly may be retargeted at runtime
        const RETARGETABLE = 0x0000_0100;
        /// JIT compiler should not generate optimized code
        const DISABLE_JIT_COMPILE_OPTIMIZER = 0x0000_4000;
        /// JIT compiler tracking is enabled
        const ENABLE_JIT_COMPILE_TRACKING = 0x0000_8000;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_masks() {
        let flags = TypeAttributes::NESTED_FAMILY | TypeAttributes::SEALED;
        assert_eq!(
            flags & TypeAttributes::VISIBILITY_MASK,
            TypeAttributes::NESTED_FAMILY
        );
        assert_eq!(flags.bits(), 0x0104);
    }

    #[test]
    fn roundtrip_through_bits() {
        let flags = MethodAttributes::PUBLIC | MethodAttributes::STATIC;
        assert_eq!(
            MethodAttributes::from_bits_truncate(flags.bits()),
            flags
        );
        assert_eq!(flags.bits(), 0x0016);
    }
}
