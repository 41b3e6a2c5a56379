//! Coded index kinds and their encoding/decoding.
//!
//! Coded indexes are the compact cross-table references of CLI metadata: a single value
//! whose low bits select one of a fixed candidate table list and whose remaining bits
//! hold the 1-based row id. Which list applies, and therefore how many tag bits are
//! consumed, depends on the column.
//!
//! # Reference
//! - [ECMA-335 II.24.2.6](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use strum::{EnumCount, EnumIter};

use crate::{
    metadata::{tables::TableId, token::Token},
    Result,
};

/// The coded index kinds defined in ECMA-335 §II.24.2.6.
///
/// Each kind carries an ordered candidate table list; the encoded tag is the position
/// within that list. Slots marked unused in the standard (only `CustomAttributeType`
/// has them) decode as [`crate::Error::BadImageFormat`].
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, EnumIter, EnumCount)]
#[repr(usize)]
pub enum CodedIndexKind {
    /// References `TypeDef`, `TypeRef` or `TypeSpec`
    TypeDefOrRef,
    /// References `Field`, `Param` or `Property` - entities carrying constants
    HasConstant,
    /// References any of the 22 entities that may carry custom attributes
    HasCustomAttribute,
    /// References `Field` or `Param` - entities carrying marshalling descriptors
    HasFieldMarshal,
    /// References `TypeDef`, `MethodDef` or `Assembly` - security attribute targets
    HasDeclSecurity,
    /// References the possible parents of a member reference
    MemberRefParent,
    /// References `Event` or `Property` - semantic method owners
    HasSemantics,
    /// References `MethodDef` or `MemberRef`
    MethodDefOrRef,
    /// References `Field` or `MethodDef` - P/Invoke forwarded members
    MemberForwarded,
    /// References `File`, `AssemblyRef` or `ExportedType` - exported type homes
    Implementation,
    /// References the constructor of a custom attribute (tags 0, 1 and 4 are unused)
    CustomAttributeType,
    /// References the resolution scope of a type reference
    ResolutionScope,
    /// References `TypeDef` or `MethodDef` - generic parameter owners
    TypeOrMethodDef,
}

impl CodedIndexKind {
    /// The ordered candidate table list of this kind.
    ///
    /// `None` marks a tag value the standard reserves but does not assign.
    #[must_use]
    pub fn tables(&self) -> &'static [Option<TableId>] {
        match self {
            CodedIndexKind::TypeDefOrRef => &[
                Some(TableId::TypeDef),
                Some(TableId::TypeRef),
                Some(TableId::TypeSpec),
            ],
            CodedIndexKind::HasConstant => &[
                Some(TableId::Field),
                Some(TableId::Param),
                Some(TableId::Property),
            ],
            CodedIndexKind::HasCustomAttribute => &[
                Some(TableId::MethodDef),
                Some(TableId::Field),
                Some(TableId::TypeRef),
                Some(TableId::TypeDef),
                Some(TableId::Param),
                Some(TableId::InterfaceImpl),
                Some(TableId::MemberRef),
                Some(TableId::Module),
                // Labeled 'Permission' in the standard PDF; no such table exists
                Some(TableId::DeclSecurity),
                Some(TableId::Property),
                Some(TableId::Event),
                Some(TableId::StandAloneSig),
                Some(TableId::ModuleRef),
                Some(TableId::TypeSpec),
                Some(TableId::Assembly),
                Some(TableId::AssemblyRef),
                Some(TableId::File),
                Some(TableId::ExportedType),
                Some(TableId::ManifestResource),
                Some(TableId::GenericParam),
                Some(TableId::GenericParamConstraint),
                Some(TableId::MethodSpec),
            ],
            CodedIndexKind::HasFieldMarshal => &[Some(TableId::Field), Some(TableId::Param)],
            CodedIndexKind::HasDeclSecurity => &[
                Some(TableId::TypeDef),
                Some(TableId::MethodDef),
                Some(TableId::Assembly),
            ],
            CodedIndexKind::MemberRefParent => &[
                Some(TableId::TypeDef),
                Some(TableId::TypeRef),
                Some(TableId::ModuleRef),
                Some(TableId::MethodDef),
                Some(TableId::TypeSpec),
            ],
            CodedIndexKind::HasSemantics => &[Some(TableId::Event), Some(TableId::Property)],
            CodedIndexKind::MethodDefOrRef => {
                &[Some(TableId::MethodDef), Some(TableId::MemberRef)]
            }
            CodedIndexKind::MemberForwarded => &[Some(TableId::Field), Some(TableId::MethodDef)],
            CodedIndexKind::Implementation => &[
                Some(TableId::File),
                Some(TableId::AssemblyRef),
                Some(TableId::ExportedType),
            ],
            CodedIndexKind::CustomAttributeType => &[
                None,
                None,
                Some(TableId::MethodDef),
                Some(TableId::MemberRef),
                None,
            ],
            CodedIndexKind::ResolutionScope => &[
                Some(TableId::Module),
                Some(TableId::ModuleRef),
                Some(TableId::AssemblyRef),
                Some(TableId::TypeRef),
            ],
            CodedIndexKind::TypeOrMethodDef => {
                &[Some(TableId::TypeDef), Some(TableId::MethodDef)]
            }
        }
    }

    /// Number of tag bits consumed by this kind
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn tag_bits(&self) -> u8 {
        let candidates = self.tables().len();
        (usize::BITS - (candidates - 1).leading_zeros()) as u8
    }
}

/// A decoded coded index: the target table, the 1-based row id, and the token they form.
///
/// A row of 0 denotes the null reference; its token is null within the tag's table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodedIndex {
    /// The table this index refers to
    pub tag: TableId,
    /// The 1-based row id within that table; 0 is the null reference
    pub row: u32,
    /// The token formed from tag and row
    pub token: Token,
}

impl CodedIndex {
    /// Creates a new `CodedIndex` from a table and a 1-based row id
    ///
    /// ## Arguments
    /// * 'tag' - The table being referenced
    /// * 'row' - The 1-based row id (0 for null)
    #[must_use]
    pub fn new(tag: TableId, row: u32) -> CodedIndex {
        CodedIndex {
            tag,
            row,
            token: Token::from_parts(tag as u8, row),
        }
    }

    /// Decodes a raw coded value into the referenced table and row
    ///
    /// ## Arguments
    /// * 'value' - The raw coded value as read from a table column
    /// * 'kind' - The coded index kind of that column
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImageFormat`] if the tag selects an unused or
    /// out-of-range candidate slot
    pub fn decode(value: u32, kind: CodedIndexKind) -> Result<CodedIndex> {
        let tables = kind.tables();
        let tag_bits = kind.tag_bits();
        let tag = (value & ((1 << tag_bits) - 1)) as usize;
        let row = value >> tag_bits;

        match tables.get(tag) {
            Some(Some(table)) => Ok(CodedIndex::new(*table, row)),
            _ => Err(bad_image_error!(
                "Tag {} is not assigned for coded index kind {:?}",
                tag,
                kind
            )),
        }
    }

    /// Encodes a token as a raw coded value
    ///
    /// A null token encodes as 0 regardless of its table byte.
    ///
    /// ## Arguments
    /// * 'token' - The token to encode
    /// * 'kind' - The coded index kind of the destination column
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImageFormat`] if the token's table is not a candidate
    /// of this kind
    pub fn encode(token: Token, kind: CodedIndexKind) -> Result<u32> {
        if token.is_null() {
            return Ok(0);
        }

        let Some(table) = TableId::from_byte(token.table()) else {
            return Err(bad_image_error!(
                "Token {} does not name a standard table",
                token
            ));
        };

        let tables = kind.tables();
        let Some(tag) = tables.iter().position(|candidate| *candidate == Some(table)) else {
            return Err(bad_image_error!(
                "Table {:?} is not a candidate of coded index kind {:?}",
                table,
                kind
            ));
        };

        #[allow(clippy::cast_possible_truncation)]
        Ok((token.row() << kind.tag_bits()) | tag as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_bit_counts() {
        assert_eq!(CodedIndexKind::TypeDefOrRef.tag_bits(), 2);
        assert_eq!(CodedIndexKind::HasConstant.tag_bits(), 2);
        assert_eq!(CodedIndexKind::HasCustomAttribute.tag_bits(), 5);
        assert_eq!(CodedIndexKind::HasFieldMarshal.tag_bits(), 1);
        assert_eq!(CodedIndexKind::MemberRefParent.tag_bits(), 3);
        assert_eq!(CodedIndexKind::MethodDefOrRef.tag_bits(), 1);
        assert_eq!(CodedIndexKind::CustomAttributeType.tag_bits(), 3);
        assert_eq!(CodedIndexKind::ResolutionScope.tag_bits(), 2);
    }

    #[test]
    fn decode_typedef_or_ref() {
        let index = CodedIndex::decode((5 << 2) | 0, CodedIndexKind::TypeDefOrRef).unwrap();
        assert_eq!(index.tag, TableId::TypeDef);
        assert_eq!(index.row, 5);
        assert_eq!(index.token, Token::new(0x0200_0005));

        let index = CodedIndex::decode((3 << 2) | 1, CodedIndexKind::TypeDefOrRef).unwrap();
        assert_eq!(index.tag, TableId::TypeRef);
        assert_eq!(index.token, Token::new(0x0100_0003));

        let index = CodedIndex::decode((1 << 2) | 2, CodedIndexKind::TypeDefOrRef).unwrap();
        assert_eq!(index.tag, TableId::TypeSpec);

        // Tag 3 is out of range for three candidates
        assert!(CodedIndex::decode((1 << 2) | 3, CodedIndexKind::TypeDefOrRef).is_err());
    }

    #[test]
    fn encode_decode_roundtrip() {
        let cases = [
            (Token::new(0x0200_0005), CodedIndexKind::TypeDefOrRef),
            (Token::new(0x0100_0042), CodedIndexKind::ResolutionScope),
            (Token::new(0x0600_0001), CodedIndexKind::MethodDefOrRef),
            (Token::new(0x0A00_0007), CodedIndexKind::MethodDefOrRef),
            (Token::new(0x2300_0002), CodedIndexKind::Implementation),
            (Token::new(0x0400_0003), CodedIndexKind::HasFieldMarshal),
        ];

        for (token, kind) in cases {
            let encoded = CodedIndex::encode(token, kind).unwrap();
            let decoded = CodedIndex::decode(encoded, kind).unwrap();
            assert_eq!(decoded.token, token, "{token} via {kind:?}");
        }
    }

    #[test]
    fn encode_custom_attribute_type_skips_unused_tags() {
        let methoddef = CodedIndex::encode(
            Token::new(0x0600_0004),
            CodedIndexKind::CustomAttributeType,
        )
        .unwrap();
        assert_eq!(methoddef, (4 << 3) | 2);

        let memberref = CodedIndex::encode(
            Token::new(0x0A00_0004),
            CodedIndexKind::CustomAttributeType,
        )
        .unwrap();
        assert_eq!(memberref, (4 << 3) | 3);

        // Unused tag 0 does not decode
        assert!(CodedIndex::decode(1 << 3, CodedIndexKind::CustomAttributeType).is_err());
    }

    #[test]
    fn encode_rejects_foreign_tables() {
        assert!(CodedIndex::encode(
            Token::new(0x0600_0001),
            CodedIndexKind::TypeDefOrRef
        )
        .is_err());
    }

    #[test]
    fn null_token_encodes_as_zero() {
        assert_eq!(
            CodedIndex::encode(Token::new(0), CodedIndexKind::TypeDefOrRef).unwrap(),
            0
        );
        assert_eq!(
            CodedIndex::encode(Token::new(0x0200_0000), CodedIndexKind::TypeDefOrRef).unwrap(),
            0
        );
    }
}
