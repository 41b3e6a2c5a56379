//! Encoding of signature trees back into blob form.
//!
//! Each `encode_*` function is the byte-exact inverse of the corresponding
//! [`crate::metadata::signatures::SignatureReader`] method. Encoding recurses over
//! the same grammar as decoding and threads the same [`RecursionGuard`], so a
//! hostile or cyclically constructed tree cannot drive the encoder past the bound
//! either.

use crate::{
    file::BinaryWriter,
    metadata::{
        signatures::{
            FieldSignature, LocalVariablesSignature, MethodSignature, MethodSpecSignature,
            PropertySignature, RecursionGuard, TypeSignature, ELEMENT_TYPE, SIGNATURE_FLAGS,
        },
        token::Token,
    },
    Result,
};

/// Encodes a token as a `TypeDefOrRef` coded value for compressed emission
/// (ECMA-335 II.23.2.8): TypeDef `(rid << 2) | 0`, TypeRef `| 1`, TypeSpec `| 2`.
///
/// Tokens from other tables yield a value that no conforming reader accepts; the
/// encode path rejects them before this function is reached.
#[must_use]
pub(crate) fn type_def_or_ref_coded_value(token: Token) -> u32 {
    let rid = token.row();
    match token.table() {
        0x02 => rid << 2,
        0x01 => (rid << 2) | 1,
        _ => (rid << 2) | 2,
    }
}

fn write_type_token(writer: &mut BinaryWriter, token: Token) -> Result<()> {
    match token.table() {
        0x01 | 0x02 | 0x1B => {
            writer.write_compressed_uint(type_def_or_ref_coded_value(token))
        }
        table => Err(malformed_signature_error!(
            "Token table 0x{:02x} cannot be encoded as TypeDefOrRef",
            table
        )),
    }
}

fn encode_type(
    signature: &TypeSignature,
    writer: &mut BinaryWriter,
    guard: &mut RecursionGuard,
) -> Result<()> {
    guard.enter()?;
    let result = encode_type_inner(signature, writer, guard);
    guard.exit();
    result
}

#[allow(clippy::cast_possible_truncation)]
fn encode_type_inner(
    signature: &TypeSignature,
    writer: &mut BinaryWriter,
    guard: &mut RecursionGuard,
) -> Result<()> {
    match signature {
        TypeSignature::Void => writer.write_le::<u8>(ELEMENT_TYPE::VOID),
        TypeSignature::Boolean => writer.write_le::<u8>(ELEMENT_TYPE::BOOLEAN),
        TypeSignature::Char => writer.write_le::<u8>(ELEMENT_TYPE::CHAR),
        TypeSignature::I1 => writer.write_le::<u8>(ELEMENT_TYPE::I1),
        TypeSignature::U1 => writer.write_le::<u8>(ELEMENT_TYPE::U1),
        TypeSignature::I2 => writer.write_le::<u8>(ELEMENT_TYPE::I2),
        TypeSignature::U2 => writer.write_le::<u8>(ELEMENT_TYPE::U2),
        TypeSignature::I4 => writer.write_le::<u8>(ELEMENT_TYPE::I4),
        TypeSignature::U4 => writer.write_le::<u8>(ELEMENT_TYPE::U4),
        TypeSignature::I8 => writer.write_le::<u8>(ELEMENT_TYPE::I8),
        TypeSignature::U8 => writer.write_le::<u8>(ELEMENT_TYPE::U8),
        TypeSignature::R4 => writer.write_le::<u8>(ELEMENT_TYPE::R4),
        TypeSignature::R8 => writer.write_le::<u8>(ELEMENT_TYPE::R8),
        TypeSignature::String => writer.write_le::<u8>(ELEMENT_TYPE::STRING),
        TypeSignature::Object => writer.write_le::<u8>(ELEMENT_TYPE::OBJECT),
        TypeSignature::TypedByRef => writer.write_le::<u8>(ELEMENT_TYPE::TYPEDBYREF),
        TypeSignature::I => writer.write_le::<u8>(ELEMENT_TYPE::I),
        TypeSignature::U => writer.write_le::<u8>(ELEMENT_TYPE::U),
        TypeSignature::Sentinel => writer.write_le::<u8>(ELEMENT_TYPE::SENTINEL),
        TypeSignature::Class(token) => {
            writer.write_le::<u8>(ELEMENT_TYPE::CLASS);
            write_type_token(writer, *token)?;
        }
        TypeSignature::ValueType(token) => {
            writer.write_le::<u8>(ELEMENT_TYPE::VALUETYPE);
            write_type_token(writer, *token)?;
        }
        TypeSignature::Ptr(inner) => {
            writer.write_le::<u8>(ELEMENT_TYPE::PTR);
            encode_type(inner, writer, guard)?;
        }
        TypeSignature::ByRef(inner) => {
            writer.write_le::<u8>(ELEMENT_TYPE::BYREF);
            encode_type(inner, writer, guard)?;
        }
        TypeSignature::SzArray(inner) => {
            writer.write_le::<u8>(ELEMENT_TYPE::SZARRAY);
            encode_type(inner, writer, guard)?;
        }
        TypeSignature::Pinned(inner) => {
            writer.write_le::<u8>(ELEMENT_TYPE::PINNED);
            encode_type(inner, writer, guard)?;
        }
        TypeSignature::Array(base, shape) => {
            writer.write_le::<u8>(ELEMENT_TYPE::ARRAY);
            encode_type(base, writer, guard)?;
            writer.write_compressed_uint(shape.rank)?;
            writer.write_compressed_uint(shape.sizes.len() as u32)?;
            for size in &shape.sizes {
                writer.write_compressed_uint(*size)?;
            }
            writer.write_compressed_uint(shape.lower_bounds.len() as u32)?;
            for bound in &shape.lower_bounds {
                writer.write_compressed_int(*bound)?;
            }
        }
        TypeSignature::GenericInst(base, args) => {
            if !matches!(
                **base,
                TypeSignature::Class(_) | TypeSignature::ValueType(_)
            ) {
                return Err(malformed_signature_error!(
                    "GENERICINST head must be a class or value type"
                ));
            }

            writer.write_le::<u8>(ELEMENT_TYPE::GENERICINST);
            encode_type(base, writer, guard)?;
            writer.write_compressed_uint(args.len() as u32)?;
            for arg in args {
                encode_type(arg, writer, guard)?;
            }
        }
        TypeSignature::GenericParamType(index) => {
            writer.write_le::<u8>(ELEMENT_TYPE::VAR);
            writer.write_compressed_uint(*index)?;
        }
        TypeSignature::GenericParamMethod(index) => {
            writer.write_le::<u8>(ELEMENT_TYPE::MVAR);
            writer.write_compressed_uint(*index)?;
        }
        TypeSignature::FnPtr(method) => {
            writer.write_le::<u8>(ELEMENT_TYPE::FNPTR);
            encode_method(method, writer, guard)?;
        }
        TypeSignature::Modified {
            required,
            modifier,
            base,
        } => {
            writer.write_le::<u8>(if *required {
                ELEMENT_TYPE::CMOD_REQD
            } else {
                ELEMENT_TYPE::CMOD_OPT
            });
            write_type_token(writer, *modifier)?;
            encode_type(base, writer, guard)?;
        }
    }

    Ok(())
}

#[allow(clippy::cast_possible_truncation)]
fn encode_method(
    signature: &MethodSignature,
    writer: &mut BinaryWriter,
    guard: &mut RecursionGuard,
) -> Result<()> {
    let mut flags = match signature.calling_convention {
        crate::metadata::signatures::CallingConvention::Default => SIGNATURE_FLAGS::DEFAULT,
        crate::metadata::signatures::CallingConvention::C => SIGNATURE_FLAGS::C,
        crate::metadata::signatures::CallingConvention::StdCall => SIGNATURE_FLAGS::STDCALL,
        crate::metadata::signatures::CallingConvention::ThisCall => SIGNATURE_FLAGS::THISCALL,
        crate::metadata::signatures::CallingConvention::FastCall => SIGNATURE_FLAGS::FASTCALL,
        crate::metadata::signatures::CallingConvention::VarArg => SIGNATURE_FLAGS::VARARG,
    };

    if signature.has_this {
        flags |= SIGNATURE_FLAGS::HAS_THIS;
    }
    if signature.explicit_this {
        flags |= SIGNATURE_FLAGS::EXPLICIT_THIS;
    }
    if signature.generic_param_count > 0 {
        flags |= SIGNATURE_FLAGS::GENERIC;
    }

    writer.write_le::<u8>(flags);

    if signature.generic_param_count > 0 {
        writer.write_compressed_uint(signature.generic_param_count)?;
    }

    writer
        .write_compressed_uint((signature.params.len() + signature.varargs.len()) as u32)?;
    encode_type(&signature.return_type, writer, guard)?;

    for param in &signature.params {
        encode_type(param, writer, guard)?;
    }

    if !signature.varargs.is_empty() {
        writer.write_le::<u8>(ELEMENT_TYPE::SENTINEL);
        for vararg in &signature.varargs {
            encode_type(vararg, writer, guard)?;
        }
    }

    Ok(())
}

/// Encode a type signature into blob bytes
///
/// ## Arguments
/// * 'signature' - The type signature to encode
///
/// # Errors
/// Returns [`crate::Error::MalformedSignature`] for structurally impossible trees or
/// a recursion-guard breach
pub fn encode_type_signature(signature: &TypeSignature) -> Result<Vec<u8>> {
    let mut writer = BinaryWriter::with_capacity(signature.physical_size() as usize);
    let mut guard = RecursionGuard::default();
    encode_type(signature, &mut writer, &mut guard)?;
    Ok(writer.into_bytes())
}

/// Encode a method signature into blob bytes
///
/// ## Arguments
/// * 'signature' - The method signature to encode
///
/// # Errors
/// Returns [`crate::Error::MalformedSignature`] for structurally impossible trees or
/// a recursion-guard breach
pub fn encode_method_signature(signature: &MethodSignature) -> Result<Vec<u8>> {
    let mut writer = BinaryWriter::with_capacity(signature.physical_size() as usize);
    let mut guard = RecursionGuard::default();
    encode_method(signature, &mut writer, &mut guard)?;
    Ok(writer.into_bytes())
}

/// Encode a field signature into blob bytes
///
/// ## Arguments
/// * 'signature' - The field signature to encode
///
/// # Errors
/// Returns [`crate::Error::MalformedSignature`] for structurally impossible trees
pub fn encode_field_signature(signature: &FieldSignature) -> Result<Vec<u8>> {
    let mut writer = BinaryWriter::with_capacity(signature.physical_size() as usize);
    writer.write_le::<u8>(SIGNATURE_FLAGS::FIELD);

    let mut guard = RecursionGuard::default();
    encode_type(&signature.base, &mut writer, &mut guard)?;
    Ok(writer.into_bytes())
}

/// Encode a property signature into blob bytes
///
/// ## Arguments
/// * 'signature' - The property signature to encode
///
/// # Errors
/// Returns [`crate::Error::MalformedSignature`] for structurally impossible trees, or
/// [`crate::Error::BadImageFormat`] for parameter counts past the compressed range
#[allow(clippy::cast_possible_truncation)]
pub fn encode_property_signature(signature: &PropertySignature) -> Result<Vec<u8>> {
    let mut writer = BinaryWriter::with_capacity(signature.physical_size() as usize);

    let mut prolog = SIGNATURE_FLAGS::PROPERTY;
    if signature.has_this {
        prolog |= SIGNATURE_FLAGS::HAS_THIS;
    }
    writer.write_le::<u8>(prolog);
    writer.write_compressed_uint(signature.params.len() as u32)?;

    let mut guard = RecursionGuard::default();
    encode_type(&signature.base, &mut writer, &mut guard)?;
    for param in &signature.params {
        encode_type(param, &mut writer, &mut guard)?;
    }

    Ok(writer.into_bytes())
}

/// Encode a local variable signature into blob bytes
///
/// ## Arguments
/// * 'signature' - The local variable signature to encode
///
/// # Errors
/// Returns [`crate::Error::MalformedSignature`] for structurally impossible trees, or
/// [`crate::Error::BadImageFormat`] for local counts past the compressed range
#[allow(clippy::cast_possible_truncation)]
pub fn encode_local_variables_signature(
    signature: &LocalVariablesSignature,
) -> Result<Vec<u8>> {
    let mut writer = BinaryWriter::with_capacity(signature.physical_size() as usize);
    writer.write_le::<u8>(SIGNATURE_FLAGS::LOCAL_SIG);
    writer.write_compressed_uint(signature.locals.len() as u32)?;

    let mut guard = RecursionGuard::default();
    for local in &signature.locals {
        encode_type(local, &mut writer, &mut guard)?;
    }

    Ok(writer.into_bytes())
}

/// Encode a method specification signature into blob bytes
///
/// ## Arguments
/// * 'signature' - The method spec signature to encode
///
/// # Errors
/// Returns [`crate::Error::MalformedSignature`] for structurally impossible trees, or
/// [`crate::Error::BadImageFormat`] for argument counts past the compressed range
#[allow(clippy::cast_possible_truncation)]
pub fn encode_method_spec_signature(signature: &MethodSpecSignature) -> Result<Vec<u8>> {
    let mut writer = BinaryWriter::with_capacity(signature.physical_size() as usize);
    writer.write_le::<u8>(SIGNATURE_FLAGS::GENERIC_INST);
    writer.write_compressed_uint(signature.generic_args.len() as u32)?;

    let mut guard = RecursionGuard::default();
    for arg in &signature.generic_args {
        encode_type(arg, &mut writer, &mut guard)?;
    }

    Ok(writer.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::signatures::{ArrayShape, CallingConvention, SignatureReader};

    fn roundtrip_type(signature: &TypeSignature) {
        let encoded = encode_type_signature(signature).unwrap();
        assert_eq!(
            encoded.len() as u32,
            signature.physical_size(),
            "physical_size mismatch for {signature:?}"
        );

        let mut reader = SignatureReader::new(&encoded);
        let decoded = reader.read_type_signature().unwrap();
        assert_eq!(&decoded, signature);
    }

    #[test]
    fn type_roundtrips() {
        let class = TypeSignature::Class(Token::new(0x0100_0012));

        roundtrip_type(&TypeSignature::Void);
        roundtrip_type(&TypeSignature::I4);
        roundtrip_type(&class);
        roundtrip_type(&TypeSignature::ValueType(Token::new(0x0200_0003)));
        roundtrip_type(&TypeSignature::Ptr(Box::new(TypeSignature::U1)));
        roundtrip_type(&TypeSignature::ByRef(Box::new(TypeSignature::String)));
        roundtrip_type(&TypeSignature::SzArray(Box::new(class.clone())));
        roundtrip_type(&TypeSignature::Pinned(Box::new(TypeSignature::Object)));
        roundtrip_type(&TypeSignature::GenericParamType(7));
        roundtrip_type(&TypeSignature::GenericParamMethod(300));
        roundtrip_type(&TypeSignature::Array(
            Box::new(TypeSignature::I4),
            ArrayShape {
                rank: 2,
                sizes: vec![4, 1000],
                lower_bounds: vec![-1, 200],
            },
        ));
        roundtrip_type(&TypeSignature::GenericInst(
            Box::new(class.clone()),
            vec![TypeSignature::I4, TypeSignature::SzArray(Box::new(class.clone()))],
        ));
        roundtrip_type(&TypeSignature::Modified {
            required: true,
            modifier: Token::new(0x1B00_0002),
            base: Box::new(TypeSignature::Modified {
                required: false,
                modifier: Token::new(0x0100_0001),
                base: Box::new(TypeSignature::I8),
            }),
        });
        roundtrip_type(&TypeSignature::FnPtr(Box::new(MethodSignature {
            calling_convention: CallingConvention::StdCall,
            return_type: TypeSignature::Void,
            params: vec![TypeSignature::I],
            ..Default::default()
        })));
    }

    #[test]
    fn method_roundtrips() {
        let cases = [
            MethodSignature {
                has_this: true,
                return_type: TypeSignature::Void,
                params: vec![TypeSignature::I4, TypeSignature::String],
                ..Default::default()
            },
            MethodSignature {
                generic_param_count: 2,
                return_type: TypeSignature::GenericParamMethod(0),
                params: vec![TypeSignature::GenericParamMethod(1)],
                ..Default::default()
            },
            MethodSignature {
                calling_convention: CallingConvention::VarArg,
                return_type: TypeSignature::Void,
                params: vec![TypeSignature::I4],
                varargs: vec![TypeSignature::R8, TypeSignature::String],
                ..Default::default()
            },
        ];

        for signature in &cases {
            let encoded = encode_method_signature(signature).unwrap();
            assert_eq!(encoded.len() as u32, signature.physical_size());

            let mut reader = SignatureReader::new(&encoded);
            assert_eq!(&reader.read_method_signature().unwrap(), signature);
        }
    }

    #[test]
    fn composite_roundtrips() {
        let field = FieldSignature::new(TypeSignature::SzArray(Box::new(TypeSignature::U8)));
        let encoded = encode_field_signature(&field).unwrap();
        assert_eq!(encoded.len() as u32, field.physical_size());
        let mut reader = SignatureReader::new(&encoded);
        assert_eq!(reader.read_field_signature().unwrap(), field);

        let property = PropertySignature {
            has_this: true,
            base: TypeSignature::I4,
            params: vec![TypeSignature::I4],
        };
        let encoded = encode_property_signature(&property).unwrap();
        assert_eq!(encoded.len() as u32, property.physical_size());
        let mut reader = SignatureReader::new(&encoded);
        assert_eq!(reader.read_property_signature().unwrap(), property);

        let locals = LocalVariablesSignature {
            locals: vec![
                TypeSignature::I4,
                TypeSignature::Pinned(Box::new(TypeSignature::ByRef(Box::new(
                    TypeSignature::String,
                )))),
            ],
        };
        let encoded = encode_local_variables_signature(&locals).unwrap();
        assert_eq!(encoded.len() as u32, locals.physical_size());
        let mut reader = SignatureReader::new(&encoded);
        assert_eq!(reader.read_local_variables_signature().unwrap(), locals);

        let spec = MethodSpecSignature {
            generic_args: vec![TypeSignature::I4, TypeSignature::Object],
        };
        let encoded = encode_method_spec_signature(&spec).unwrap();
        assert_eq!(encoded.len() as u32, spec.physical_size());
        let mut reader = SignatureReader::new(&encoded);
        assert_eq!(reader.read_method_spec_signature().unwrap(), spec);
    }

    #[test]
    fn rejects_bad_generic_head() {
        let bad = TypeSignature::GenericInst(
            Box::new(TypeSignature::I4),
            vec![TypeSignature::I4],
        );
        assert!(encode_type_signature(&bad).is_err());
    }

    #[test]
    fn rejects_foreign_modifier_token() {
        let bad = TypeSignature::Modified {
            required: true,
            modifier: Token::new(0x0600_0001),
            base: Box::new(TypeSignature::Void),
        };
        assert!(encode_type_signature(&bad).is_err());
    }
}
