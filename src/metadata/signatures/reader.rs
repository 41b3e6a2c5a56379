//! Decoding of signature blobs with recursion protection.

use crate::{
    file::BinaryReader,
    metadata::signatures::{
        ArrayShape, CallingConvention, FieldSignature, LocalVariablesSignature, MethodSignature,
        MethodSpecSignature, PropertySignature, TypeSignature, ELEMENT_TYPE, SIGNATURE_FLAGS,
    },
    Result,
};

/// Default bound on signature nesting depth.
///
/// The signature grammar is a tree, so a plain depth counter is sufficient
/// protection; hostile blobs nesting past this bound fail with
/// [`crate::Error::MalformedSignature`] instead of exhausting the stack.
pub const MAX_RECURSION_DEPTH: usize = 100;

/// Depth counter shared by every recursive decode and encode step.
///
/// Incremented on entry to any type-signature node and decremented on exit; a breach
/// unwinds to the nearest enclosing decode as [`crate::Error::MalformedSignature`].
pub struct RecursionGuard {
    depth: usize,
    limit: usize,
}

impl Default for RecursionGuard {
    fn default() -> Self {
        RecursionGuard::new(MAX_RECURSION_DEPTH)
    }
}

impl RecursionGuard {
    /// Create a guard with the given depth limit
    ///
    /// ## Arguments
    /// * 'limit' - Maximum permitted nesting depth
    #[must_use]
    pub fn new(limit: usize) -> Self {
        RecursionGuard { depth: 0, limit }
    }

    /// Enter one nesting level
    ///
    /// The root node does not count towards the limit, so a chain of `limit` nested
    /// wrappers around a leaf still decodes; one more breaches.
    ///
    /// # Errors
    /// Returns [`crate::Error::MalformedSignature`] when the limit is breached
    pub fn enter(&mut self) -> Result<()> {
        if self.depth > self.limit {
            return Err(malformed_signature_error!(
                "Signature nesting exceeds the depth limit of {}",
                self.limit
            ));
        }
        self.depth += 1;
        Ok(())
    }

    /// Leave one nesting level
    pub fn exit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}

/// Decoder for the signature blobs of the `#Blob` heap.
///
/// One reader decodes one signature; do not reuse an instance across blobs. All
/// recursive descents share the reader's [`RecursionGuard`].
///
/// # Example
///
/// ```rust
/// use cilforge::metadata::signatures::SignatureReader;
/// let data = &[0x20, 0x01, 0x01, 0x0E];
/// let mut reader = SignatureReader::new(data);
/// let sig = reader.read_method_signature()?;
/// assert!(sig.has_this);
/// assert_eq!(sig.params.len(), 1);
/// # Ok::<(), cilforge::Error>(())
/// ```
pub struct SignatureReader<'a> {
    reader: BinaryReader<'a>,
    guard: RecursionGuard,
}

impl<'a> SignatureReader<'a> {
    /// Create a `SignatureReader` over a blob with the default depth limit
    ///
    /// ## Arguments
    /// * 'data' - The signature blob (length prefix already stripped)
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        SignatureReader {
            reader: BinaryReader::new(data),
            guard: RecursionGuard::default(),
        }
    }

    /// Create a `SignatureReader` with a custom depth limit
    ///
    /// ## Arguments
    /// * 'data' - The signature blob
    /// * 'limit' - Maximum permitted nesting depth
    #[must_use]
    pub fn with_limit(data: &'a [u8], limit: usize) -> Self {
        SignatureReader {
            reader: BinaryReader::new(data),
            guard: RecursionGuard::new(limit),
        }
    }

    /// Decode a single type signature
    ///
    /// # Errors
    /// Returns [`crate::Error::MalformedSignature`] for unknown element tags or a
    /// recursion-guard breach, [`crate::Error::EndOfStream`] for truncated input
    pub fn read_type_signature(&mut self) -> Result<TypeSignature> {
        self.guard.enter()?;
        let result = self.read_type_inner();
        self.guard.exit();
        result
    }

    fn read_type_inner(&mut self) -> Result<TypeSignature> {
        let tag = self.reader.read_le::<u8>()?;
        match tag {
            ELEMENT_TYPE::VOID => Ok(TypeSignature::Void),
            ELEMENT_TYPE::BOOLEAN => Ok(TypeSignature::Boolean),
            ELEMENT_TYPE::CHAR => Ok(TypeSignature::Char),
            ELEMENT_TYPE::I1 => Ok(TypeSignature::I1),
            ELEMENT_TYPE::U1 => Ok(TypeSignature::U1),
            ELEMENT_TYPE::I2 => Ok(TypeSignature::I2),
            ELEMENT_TYPE::U2 => Ok(TypeSignature::U2),
            ELEMENT_TYPE::I4 => Ok(TypeSignature::I4),
            ELEMENT_TYPE::U4 => Ok(TypeSignature::U4),
            ELEMENT_TYPE::I8 => Ok(TypeSignature::I8),
            ELEMENT_TYPE::U8 => Ok(TypeSignature::U8),
            ELEMENT_TYPE::R4 => Ok(TypeSignature::R4),
            ELEMENT_TYPE::R8 => Ok(TypeSignature::R8),
            ELEMENT_TYPE::STRING => Ok(TypeSignature::String),
            ELEMENT_TYPE::OBJECT => Ok(TypeSignature::Object),
            ELEMENT_TYPE::TYPEDBYREF => Ok(TypeSignature::TypedByRef),
            ELEMENT_TYPE::I => Ok(TypeSignature::I),
            ELEMENT_TYPE::U => Ok(TypeSignature::U),
            ELEMENT_TYPE::CLASS => Ok(TypeSignature::Class(self.reader.read_compressed_token()?)),
            ELEMENT_TYPE::VALUETYPE => Ok(TypeSignature::ValueType(
                self.reader.read_compressed_token()?,
            )),
            ELEMENT_TYPE::PTR => Ok(TypeSignature::Ptr(Box::new(self.read_type_signature()?))),
            ELEMENT_TYPE::BYREF => Ok(TypeSignature::ByRef(Box::new(self.read_type_signature()?))),
            ELEMENT_TYPE::SZARRAY => Ok(TypeSignature::SzArray(Box::new(
                self.read_type_signature()?,
            ))),
            ELEMENT_TYPE::PINNED => Ok(TypeSignature::Pinned(Box::new(
                self.read_type_signature()?,
            ))),
            ELEMENT_TYPE::ARRAY => {
                let base = self.read_type_signature()?;
                let rank = self.reader.read_compressed_uint()?;

                let num_sizes = self.reader.read_compressed_uint()?;
                let mut sizes = Vec::with_capacity(num_sizes.min(64) as usize);
                for _ in 0..num_sizes {
                    sizes.push(self.reader.read_compressed_uint()?);
                }

                let num_lower_bounds = self.reader.read_compressed_uint()?;
                let mut lower_bounds = Vec::with_capacity(num_lower_bounds.min(64) as usize);
                for _ in 0..num_lower_bounds {
                    lower_bounds.push(self.reader.read_compressed_int()?);
                }

                Ok(TypeSignature::Array(
                    Box::new(base),
                    ArrayShape {
                        rank,
                        sizes,
                        lower_bounds,
                    },
                ))
            }
            ELEMENT_TYPE::GENERICINST => {
                let head = self.reader.peek_byte()?;
                if head != ELEMENT_TYPE::CLASS && head != ELEMENT_TYPE::VALUETYPE {
                    return Err(malformed_signature_error!(
                        "GENERICINST head must be CLASS or VALUETYPE, found 0x{:02x}",
                        head
                    ));
                }

                let base = self.read_type_signature()?;
                let arg_count = self.reader.read_compressed_uint()?;

                let mut args = Vec::with_capacity(arg_count.min(64) as usize);
                for _ in 0..arg_count {
                    args.push(self.read_type_signature()?);
                }

                Ok(TypeSignature::GenericInst(Box::new(base), args))
            }
            ELEMENT_TYPE::VAR => Ok(TypeSignature::GenericParamType(
                self.reader.read_compressed_uint()?,
            )),
            ELEMENT_TYPE::MVAR => Ok(TypeSignature::GenericParamMethod(
                self.reader.read_compressed_uint()?,
            )),
            ELEMENT_TYPE::FNPTR => Ok(TypeSignature::FnPtr(Box::new(
                self.read_method_signature()?,
            ))),
            ELEMENT_TYPE::CMOD_REQD | ELEMENT_TYPE::CMOD_OPT => {
                let modifier = self.reader.read_compressed_token()?;
                let base = self.read_type_signature()?;
                Ok(TypeSignature::Modified {
                    required: tag == ELEMENT_TYPE::CMOD_REQD,
                    modifier,
                    base: Box::new(base),
                })
            }
            ELEMENT_TYPE::SENTINEL => Ok(TypeSignature::Sentinel),
            _ => Err(malformed_signature_error!(
                "Unknown element type tag - 0x{:02x}",
                tag
            )),
        }
    }

    /// Decode a method signature - `MethodDefSig`, `MethodRefSig` or
    /// `StandAloneMethodSig` (II.23.2.1-II.23.2.3)
    ///
    /// # Errors
    /// Returns [`crate::Error::MalformedSignature`] for invalid flags or element tags,
    /// [`crate::Error::EndOfStream`] for truncated input
    pub fn read_method_signature(&mut self) -> Result<MethodSignature> {
        let flags = self.reader.read_le::<u8>()?;

        let calling_convention = match flags & SIGNATURE_FLAGS::KIND_MASK {
            SIGNATURE_FLAGS::DEFAULT => CallingConvention::Default,
            SIGNATURE_FLAGS::C => CallingConvention::C,
            SIGNATURE_FLAGS::STDCALL => CallingConvention::StdCall,
            SIGNATURE_FLAGS::THISCALL => CallingConvention::ThisCall,
            SIGNATURE_FLAGS::FASTCALL => CallingConvention::FastCall,
            SIGNATURE_FLAGS::VARARG => CallingConvention::VarArg,
            kind => {
                return Err(malformed_signature_error!(
                    "Unknown calling convention kind - 0x{:02x}",
                    kind
                ))
            }
        };

        let generic_param_count = if flags & SIGNATURE_FLAGS::GENERIC != 0 {
            self.reader.read_compressed_uint()?
        } else {
            0
        };

        let param_count = self.reader.read_compressed_uint()?;
        let return_type = self.read_type_signature()?;

        let mut method = MethodSignature {
            calling_convention,
            has_this: flags & SIGNATURE_FLAGS::HAS_THIS != 0,
            explicit_this: flags & SIGNATURE_FLAGS::EXPLICIT_THIS != 0,
            generic_param_count,
            return_type,
            params: Vec::with_capacity(param_count.min(64) as usize),
            varargs: Vec::new(),
        };

        let mut past_sentinel = false;
        for _ in 0..param_count {
            if !past_sentinel && self.reader.peek_byte()? == ELEMENT_TYPE::SENTINEL {
                self.reader.advance()?;
                past_sentinel = true;
            }

            let param = self.read_type_signature()?;
            if past_sentinel {
                method.varargs.push(param);
            } else {
                method.params.push(param);
            }
        }

        Ok(method)
    }

    /// Decode a field signature (II.23.2.4)
    ///
    /// # Errors
    /// Returns [`crate::Error::MalformedSignature`] if the prolog is not `FIELD`
    pub fn read_field_signature(&mut self) -> Result<FieldSignature> {
        let prolog = self.reader.read_le::<u8>()?;
        if prolog != SIGNATURE_FLAGS::FIELD {
            return Err(malformed_signature_error!(
                "Field signature prolog expected, found 0x{:02x}",
                prolog
            ));
        }

        Ok(FieldSignature {
            base: self.read_type_signature()?,
        })
    }

    /// Decode a property signature (II.23.2.5)
    ///
    /// # Errors
    /// Returns [`crate::Error::MalformedSignature`] if the prolog is not `PROPERTY`
    pub fn read_property_signature(&mut self) -> Result<PropertySignature> {
        let prolog = self.reader.read_le::<u8>()?;
        if prolog & SIGNATURE_FLAGS::PROPERTY == 0 {
            return Err(malformed_signature_error!(
                "Property signature prolog expected, found 0x{:02x}",
                prolog
            ));
        }

        let param_count = self.reader.read_compressed_uint()?;
        let base = self.read_type_signature()?;

        let mut params = Vec::with_capacity(param_count.min(64) as usize);
        for _ in 0..param_count {
            params.push(self.read_type_signature()?);
        }

        Ok(PropertySignature {
            has_this: prolog & SIGNATURE_FLAGS::HAS_THIS != 0,
            base,
            params,
        })
    }

    /// Decode a local variable signature (II.23.2.6)
    ///
    /// # Errors
    /// Returns [`crate::Error::MalformedSignature`] if the prolog is not `LOCAL_SIG`
    pub fn read_local_variables_signature(&mut self) -> Result<LocalVariablesSignature> {
        let prolog = self.reader.read_le::<u8>()?;
        if prolog != SIGNATURE_FLAGS::LOCAL_SIG {
            return Err(malformed_signature_error!(
                "Local variable signature prolog expected, found 0x{:02x}",
                prolog
            ));
        }

        let count = self.reader.read_compressed_uint()?;
        let mut locals = Vec::with_capacity(count.min(64) as usize);
        for _ in 0..count {
            locals.push(self.read_type_signature()?);
        }

        Ok(LocalVariablesSignature { locals })
    }

    /// Decode a method specification signature (II.23.2.15)
    ///
    /// # Errors
    /// Returns [`crate::Error::MalformedSignature`] if the prolog is not `GENERIC_INST`
    pub fn read_method_spec_signature(&mut self) -> Result<MethodSpecSignature> {
        let prolog = self.reader.read_le::<u8>()?;
        if prolog != SIGNATURE_FLAGS::GENERIC_INST {
            return Err(malformed_signature_error!(
                "Method spec prolog expected, found 0x{:02x}",
                prolog
            ));
        }

        let arg_count = self.reader.read_compressed_uint()?;
        let mut generic_args = Vec::with_capacity(arg_count.min(64) as usize);
        for _ in 0..arg_count {
            generic_args.push(self.read_type_signature()?);
        }

        Ok(MethodSpecSignature { generic_args })
    }
}
