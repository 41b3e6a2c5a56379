//! Native marshalling descriptors for P/Invoke and COM interop.
//!
//! Marshalling descriptors are the blobs referenced by the FieldMarshal table,
//! describing how a managed value crosses the native boundary (ECMA-335 II.23.2.9
//! plus the CoreCLR extensions). This module models the native type domain as a
//! tagged sum, decodes descriptors with the same recursion protection as the
//! signature codec, and encodes them byte-exactly back.
//!
//! The custom marshaller descriptor (tag 0x2C) carries four serialised strings:
//! the marshaller GUID in braced form, the unmanaged type name, the managed type
//! name and the cookie. A GUID string that fails to parse decodes as the zero GUID;
//! this is one of the two documented substitutions in the crate (see
//! [`crate::Error`]).

use uguid::Guid;

use crate::{
    file::{BinaryReader, BinaryWriter},
    metadata::signatures::RecursionGuard,
    Result,
};

#[allow(non_snake_case)]
/// Native type constants as defined in ECMA-335 II.23.2.9 and `CoreCLR` extensions.
pub mod NATIVE_TYPE {
    /// End marker (0x00)
    pub const END: u8 = 0x00;
    /// No type / void (0x01)
    pub const VOID: u8 = 0x01;
    /// 1-byte boolean (0x02)
    pub const BOOLEAN: u8 = 0x02;
    /// Signed 8-bit integer (0x03)
    pub const I1: u8 = 0x03;
    /// Unsigned 8-bit integer (0x04)
    pub const U1: u8 = 0x04;
    /// Signed 16-bit integer (0x05)
    pub const I2: u8 = 0x05;
    /// Unsigned 16-bit integer (0x06)
    pub const U2: u8 = 0x06;
    /// Signed 32-bit integer (0x07)
    pub const I4: u8 = 0x07;
    /// Unsigned 32-bit integer (0x08)
    pub const U4: u8 = 0x08;
    /// Signed 64-bit integer (0x09)
    pub const I8: u8 = 0x09;
    /// Unsigned 64-bit integer (0x0a)
    pub const U8: u8 = 0x0a;
    /// 32-bit floating point (0x0b)
    pub const R4: u8 = 0x0b;
    /// 64-bit floating point (0x0c)
    pub const R8: u8 = 0x0c;
    /// Platform character (0x0d)
    pub const SYSCHAR: u8 = 0x0d;
    /// OLE automation VARIANT (0x0e)
    pub const VARIANT: u8 = 0x0e;
    /// OLE automation currency (0x0f)
    pub const CURRENCY: u8 = 0x0f;
    /// Raw pointer with optional pointee (0x10)
    pub const PTR: u8 = 0x10;
    /// .NET decimal (0x11)
    pub const DECIMAL: u8 = 0x11;
    /// OLE automation date (0x12)
    pub const DATE: u8 = 0x12;
    /// OLE BSTR (0x13)
    pub const BSTR: u8 = 0x13;
    /// NUL-terminated ANSI string (0x14)
    pub const LPSTR: u8 = 0x14;
    /// NUL-terminated UTF-16 string (0x15)
    pub const LPWSTR: u8 = 0x15;
    /// NUL-terminated platform string (0x16)
    pub const LPTSTR: u8 = 0x16;
    /// Fixed-length character array (0x17)
    pub const FIXEDSYSSTRING: u8 = 0x17;
    /// Managed object reference (0x18)
    pub const OBJECTREF: u8 = 0x18;
    /// COM `IUnknown` pointer (0x19)
    pub const IUNKNOWN: u8 = 0x19;
    /// COM `IDispatch` pointer (0x1a)
    pub const IDISPATCH: u8 = 0x1a;
    /// Native structure (0x1b)
    pub const STRUCT: u8 = 0x1b;
    /// COM interface with optional IID parameter (0x1c)
    pub const INTERFACE: u8 = 0x1c;
    /// COM safe array (0x1d)
    pub const SAFEARRAY: u8 = 0x1d;
    /// Fixed-size array (0x1e)
    pub const FIXEDARRAY: u8 = 0x1e;
    /// Platform signed integer (0x1f)
    pub const INT: u8 = 0x1f;
    /// Platform unsigned integer (0x20)
    pub const UINT: u8 = 0x20;
    /// Nested structure (0x21)
    pub const NESTEDSTRUCT: u8 = 0x21;
    /// Fixed-length string embedded in a structure (0x22)
    pub const BYVALSTR: u8 = 0x22;
    /// ANSI BSTR (0x23)
    pub const ANSIBSTR: u8 = 0x23;
    /// Platform BSTR (0x24)
    pub const TBSTR: u8 = 0x24;
    /// COM `VARIANT_BOOL` (0x25)
    pub const VARIANTBOOL: u8 = 0x25;
    /// Native function pointer (0x26)
    pub const FUNC: u8 = 0x26;
    /// Marshal as any compatible type (0x28)
    pub const ASANY: u8 = 0x28;
    /// Variable array with element type (0x2a)
    pub const ARRAY: u8 = 0x2a;
    /// Pointer to native structure (0x2b)
    pub const LPSTRUCT: u8 = 0x2b;
    /// User-defined custom marshaller (0x2c)
    pub const CUSTOMMARSHALER: u8 = 0x2c;
    /// HRESULT / error code (0x2d)
    pub const ERROR: u8 = 0x2d;
    /// Windows Runtime `IInspectable` pointer (0x2e)
    pub const IINSPECTABLE: u8 = 0x2e;
    /// Windows Runtime HSTRING (0x2f)
    pub const HSTRING: u8 = 0x2f;
    /// NUL-terminated UTF-8 string (0x30)
    pub const LPUTF8STR: u8 = 0x30;
    /// Upper bound for validation (0x50)
    pub const MAX: u8 = 0x50;
}

/// A parsed native marshalling type.
///
/// Optional parameters mirror the on-disk encoding: a parameter that was absent in
/// the blob stays `None` and is omitted again on encode, keeping round trips
/// byte-exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeType {
    /// No type / void
    Void,
    /// 1-byte boolean
    Boolean,
    /// Signed 8-bit integer
    I1,
    /// Unsigned 8-bit integer
    U1,
    /// Signed 16-bit integer
    I2,
    /// Unsigned 16-bit integer
    U2,
    /// Signed 32-bit integer
    I4,
    /// Unsigned 32-bit integer
    U4,
    /// Signed 64-bit integer
    I8,
    /// Unsigned 64-bit integer
    U8,
    /// 32-bit floating point
    R4,
    /// 64-bit floating point
    R8,
    /// Platform character
    SysChar,
    /// OLE automation VARIANT
    Variant,
    /// OLE automation currency
    Currency,
    /// .NET decimal
    Decimal,
    /// OLE automation date
    Date,
    /// Platform signed integer
    Int,
    /// Platform unsigned integer
    UInt,
    /// HRESULT / error code
    Error,
    /// OLE BSTR
    BStr,
    /// NUL-terminated ANSI string with optional size parameter index
    LPStr {
        /// Index of the parameter carrying the buffer size, if declared
        size_param_index: Option<u32>,
    },
    /// NUL-terminated UTF-16 string with optional size parameter index
    LPWStr {
        /// Index of the parameter carrying the buffer size, if declared
        size_param_index: Option<u32>,
    },
    /// NUL-terminated platform string with optional size parameter index
    LPTStr {
        /// Index of the parameter carrying the buffer size, if declared
        size_param_index: Option<u32>,
    },
    /// NUL-terminated UTF-8 string with optional size parameter index
    LPUtf8Str {
        /// Index of the parameter carrying the buffer size, if declared
        size_param_index: Option<u32>,
    },
    /// Fixed-length character array embedded in a structure
    FixedSysString {
        /// Buffer size in characters
        size: u32,
    },
    /// ANSI BSTR
    AnsiBStr,
    /// Platform BSTR
    TBStr,
    /// Fixed-length string embedded directly in a structure
    ByValStr {
        /// Buffer size in characters
        size: u32,
    },
    /// COM `VARIANT_BOOL`
    VariantBool,
    /// Fixed-size array with optional element type
    FixedArray {
        /// Number of elements
        size: u32,
        /// Element type, if declared
        element_type: Option<Box<NativeType>>,
    },
    /// Variable array with element type and optional size parameters
    Array {
        /// Element type
        element_type: Box<NativeType>,
        /// Index of the parameter carrying the element count, if declared
        num_param: Option<u32>,
        /// Fixed element count, if declared
        num_element: Option<u32>,
    },
    /// COM safe array with optional variant element type
    SafeArray {
        /// VARIANT type of the elements, if declared
        variant_type: Option<u8>,
    },
    /// Raw pointer with optional pointee
    Ptr {
        /// The referenced type, if declared
        ref_type: Option<Box<NativeType>>,
    },
    /// COM `IUnknown` pointer
    IUnknown,
    /// COM `IDispatch` pointer
    IDispatch,
    /// Windows Runtime `IInspectable` pointer
    IInspectable,
    /// COM interface with optional IID parameter index
    Interface {
        /// Index of the parameter carrying the interface IID, if declared
        iid_param_index: Option<u32>,
    },
    /// Native structure with optional packing and size
    Struct {
        /// Structure packing in bytes, if declared
        packing_size: Option<u8>,
        /// Total structure size in bytes, if declared
        class_size: Option<u32>,
    },
    /// Nested structure
    NestedStruct,
    /// Pointer to native structure
    LPStruct,
    /// User-defined custom marshaller
    CustomMarshaler(CustomMarshalDescriptor),
    /// Managed object reference
    ObjectRef,
    /// Native function pointer
    Func,
    /// Marshal as any compatible type
    AsAny,
    /// Windows Runtime HSTRING
    HString,
}

/// The payload of a custom marshaller descriptor (native type 0x2C).
///
/// Serialised as four length-prefixed strings: the marshaller GUID formatted with
/// braces and hyphens, the unmanaged type name, the managed type name, and the
/// cookie passed to the marshaller at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomMarshalDescriptor {
    /// GUID identifying the custom marshaller; zero when the stored string did not
    /// parse as a GUID
    pub guid: Guid,
    /// Unmanaged type name
    pub native_type_name: Option<String>,
    /// Managed marshaller type name
    pub managed_type_name: Option<String>,
    /// Cookie string handed to the marshaller
    pub cookie: Option<String>,
}

impl Default for CustomMarshalDescriptor {
    fn default() -> Self {
        CustomMarshalDescriptor {
            guid: Guid::ZERO,
            native_type_name: None,
            managed_type_name: None,
            cookie: None,
        }
    }
}

impl CustomMarshalDescriptor {
    /// The GUID as stored on disk: braced, hyphenated, lower-case
    #[must_use]
    pub fn guid_text(&self) -> String {
        format!("{{{}}}", self.guid)
    }

    /// The encoded byte length of this descriptor's strings, excluding the
    /// native-type tag
    #[must_use]
    pub fn strings_size(&self) -> u32 {
        let guid_text = self.guid_text();
        BinaryWriter::serialized_string_size(Some(&guid_text))
            + BinaryWriter::serialized_string_size(self.native_type_name.as_deref())
            + BinaryWriter::serialized_string_size(self.managed_type_name.as_deref())
            + BinaryWriter::serialized_string_size(self.cookie.as_deref())
    }
}

/// Parse a braced or bare GUID string, substituting the zero GUID on failure.
fn parse_marshal_guid(text: Option<&str>) -> Guid {
    let Some(text) = text else {
        return Guid::ZERO;
    };

    let trimmed = text
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .unwrap_or(text);

    Guid::try_parse(trimmed).unwrap_or(Guid::ZERO)
}

impl NativeType {
    /// The encoded byte length of this descriptor, computed without writing
    #[must_use]
    pub fn physical_size(&self) -> u32 {
        let param = |value: &Option<u32>| match value {
            Some(v) => BinaryWriter::compressed_uint_size(*v),
            None => 0,
        };

        match self {
            NativeType::LPStr { size_param_index }
            | NativeType::LPWStr { size_param_index }
            | NativeType::LPTStr { size_param_index }
            | NativeType::LPUtf8Str { size_param_index } => 1 + param(size_param_index),
            NativeType::FixedSysString { size } | NativeType::ByValStr { size } => {
                1 + BinaryWriter::compressed_uint_size(*size)
            }
            NativeType::FixedArray { size, element_type } => {
                1 + BinaryWriter::compressed_uint_size(*size)
                    + element_type.as_ref().map_or(0, |inner| inner.physical_size())
            }
            NativeType::Array {
                element_type,
                num_param,
                num_element,
            } => 1 + element_type.physical_size() + param(num_param) + param(num_element),
            NativeType::SafeArray { variant_type } => {
                1 + u32::from(variant_type.is_some())
            }
            NativeType::Ptr { ref_type } => {
                1 + ref_type.as_ref().map_or(0, |inner| inner.physical_size())
            }
            NativeType::Interface { iid_param_index } => 1 + param(iid_param_index),
            NativeType::Struct {
                packing_size,
                class_size,
            } => {
                1 + u32::from(packing_size.is_some())
                    + match class_size {
                        Some(v) => BinaryWriter::compressed_uint_size(*v),
                        None => 0,
                    }
            }
            NativeType::CustomMarshaler(descriptor) => 1 + descriptor.strings_size(),
            _ => 1,
        }
    }
}

/// Parser for marshalling descriptor blobs.
///
/// Shares the recursion protection of the signature codec; nested element types
/// past the bound fail with [`crate::Error::MalformedSignature`].
pub struct MarshalReader<'a> {
    reader: BinaryReader<'a>,
    guard: RecursionGuard,
}

impl<'a> MarshalReader<'a> {
    /// Create a `MarshalReader` over a descriptor blob
    ///
    /// ## Arguments
    /// * 'data' - The descriptor blob (length prefix already stripped)
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        MarshalReader {
            reader: BinaryReader::new(data),
            guard: RecursionGuard::default(),
        }
    }

    fn has_optional_data(&self) -> bool {
        match self.reader.peek_byte() {
            Ok(byte) => byte != NATIVE_TYPE::END,
            Err(_) => false,
        }
    }

    fn read_optional_uint(&mut self) -> Result<Option<u32>> {
        if self.has_optional_data() {
            Ok(Some(self.reader.read_compressed_uint()?))
        } else {
            Ok(None)
        }
    }

    /// Decode a single native type from the current position
    ///
    /// # Errors
    /// Returns [`crate::Error::MalformedSignature`] for unknown native-type tags or
    /// a recursion-guard breach
    pub fn read_native_type(&mut self) -> Result<NativeType> {
        self.guard.enter()?;
        let result = self.read_native_type_inner();
        self.guard.exit();
        result
    }

    fn read_native_type_inner(&mut self) -> Result<NativeType> {
        let tag = self.reader.read_le::<u8>()?;
        match tag {
            NATIVE_TYPE::VOID => Ok(NativeType::Void),
            NATIVE_TYPE::BOOLEAN => Ok(NativeType::Boolean),
            NATIVE_TYPE::I1 => Ok(NativeType::I1),
            NATIVE_TYPE::U1 => Ok(NativeType::U1),
            NATIVE_TYPE::I2 => Ok(NativeType::I2),
            NATIVE_TYPE::U2 => Ok(NativeType::U2),
            NATIVE_TYPE::I4 => Ok(NativeType::I4),
            NATIVE_TYPE::U4 => Ok(NativeType::U4),
            NATIVE_TYPE::I8 => Ok(NativeType::I8),
            NATIVE_TYPE::U8 => Ok(NativeType::U8),
            NATIVE_TYPE::R4 => Ok(NativeType::R4),
            NATIVE_TYPE::R8 => Ok(NativeType::R8),
            NATIVE_TYPE::SYSCHAR => Ok(NativeType::SysChar),
            NATIVE_TYPE::VARIANT => Ok(NativeType::Variant),
            NATIVE_TYPE::CURRENCY => Ok(NativeType::Currency),
            NATIVE_TYPE::DECIMAL => Ok(NativeType::Decimal),
            NATIVE_TYPE::DATE => Ok(NativeType::Date),
            NATIVE_TYPE::INT => Ok(NativeType::Int),
            NATIVE_TYPE::UINT => Ok(NativeType::UInt),
            NATIVE_TYPE::ERROR => Ok(NativeType::Error),
            NATIVE_TYPE::BSTR => Ok(NativeType::BStr),
            NATIVE_TYPE::ANSIBSTR => Ok(NativeType::AnsiBStr),
            NATIVE_TYPE::TBSTR => Ok(NativeType::TBStr),
            NATIVE_TYPE::VARIANTBOOL => Ok(NativeType::VariantBool),
            NATIVE_TYPE::OBJECTREF => Ok(NativeType::ObjectRef),
            NATIVE_TYPE::IUNKNOWN => Ok(NativeType::IUnknown),
            NATIVE_TYPE::IDISPATCH => Ok(NativeType::IDispatch),
            NATIVE_TYPE::IINSPECTABLE => Ok(NativeType::IInspectable),
            NATIVE_TYPE::NESTEDSTRUCT => Ok(NativeType::NestedStruct),
            NATIVE_TYPE::LPSTRUCT => Ok(NativeType::LPStruct),
            NATIVE_TYPE::FUNC => Ok(NativeType::Func),
            NATIVE_TYPE::ASANY => Ok(NativeType::AsAny),
            NATIVE_TYPE::HSTRING => Ok(NativeType::HString),
            NATIVE_TYPE::LPSTR => Ok(NativeType::LPStr {
                size_param_index: self.read_optional_uint()?,
            }),
            NATIVE_TYPE::LPWSTR => Ok(NativeType::LPWStr {
                size_param_index: self.read_optional_uint()?,
            }),
            NATIVE_TYPE::LPTSTR => Ok(NativeType::LPTStr {
                size_param_index: self.read_optional_uint()?,
            }),
            NATIVE_TYPE::LPUTF8STR => Ok(NativeType::LPUtf8Str {
                size_param_index: self.read_optional_uint()?,
            }),
            NATIVE_TYPE::FIXEDSYSSTRING => Ok(NativeType::FixedSysString {
                size: self.reader.read_compressed_uint()?,
            }),
            NATIVE_TYPE::BYVALSTR => Ok(NativeType::ByValStr {
                size: self.reader.read_compressed_uint()?,
            }),
            NATIVE_TYPE::FIXEDARRAY => {
                let size = self.reader.read_compressed_uint()?;
                let element_type = if self.has_optional_data() {
                    Some(Box::new(self.read_native_type()?))
                } else {
                    None
                };
                Ok(NativeType::FixedArray { size, element_type })
            }
            NATIVE_TYPE::ARRAY => {
                let element_type = Box::new(self.read_native_type()?);
                let num_param = self.read_optional_uint()?;
                let num_element = self.read_optional_uint()?;
                Ok(NativeType::Array {
                    element_type,
                    num_param,
                    num_element,
                })
            }
            NATIVE_TYPE::SAFEARRAY => {
                let variant_type = if self.has_optional_data() {
                    Some(self.reader.read_le::<u8>()?)
                } else {
                    None
                };
                Ok(NativeType::SafeArray { variant_type })
            }
            NATIVE_TYPE::PTR => {
                let ref_type = if self.has_optional_data() {
                    Some(Box::new(self.read_native_type()?))
                } else {
                    None
                };
                Ok(NativeType::Ptr { ref_type })
            }
            NATIVE_TYPE::INTERFACE => Ok(NativeType::Interface {
                iid_param_index: self.read_optional_uint()?,
            }),
            NATIVE_TYPE::STRUCT => {
                let packing_size = if self.has_optional_data() {
                    Some(self.reader.read_le::<u8>()?)
                } else {
                    None
                };
                let class_size = self.read_optional_uint()?;
                Ok(NativeType::Struct {
                    packing_size,
                    class_size,
                })
            }
            NATIVE_TYPE::CUSTOMMARSHALER => {
                let guid_text = self.reader.read_serialized_string()?;
                let native_type_name = self.reader.read_serialized_string()?;
                let managed_type_name = self.reader.read_serialized_string()?;
                let cookie = self.reader.read_serialized_string()?;

                Ok(NativeType::CustomMarshaler(CustomMarshalDescriptor {
                    guid: parse_marshal_guid(guid_text.as_deref()),
                    native_type_name,
                    managed_type_name,
                    cookie,
                }))
            }
            _ => Err(malformed_signature_error!(
                "Unknown native type tag - 0x{:02x}",
                tag
            )),
        }
    }
}

/// Parse a complete marshalling descriptor blob into its native type
///
/// ## Arguments
/// * 'data' - The descriptor blob (length prefix already stripped)
///
/// # Errors
/// Returns [`crate::Error::MalformedSignature`] for malformed descriptors
pub fn parse_marshal_descriptor(data: &[u8]) -> Result<NativeType> {
    MarshalReader::new(data).read_native_type()
}

/// Encode a marshalling descriptor into blob bytes
///
/// ## Arguments
/// * 'descriptor' - The native type to encode
///
/// # Errors
/// Returns [`crate::Error::BadImageFormat`] if an embedded value exceeds its
/// encodable range
pub fn encode_marshal_descriptor(descriptor: &NativeType) -> Result<Vec<u8>> {
    let mut writer = BinaryWriter::with_capacity(descriptor.physical_size() as usize);
    encode_native_type(descriptor, &mut writer)?;
    Ok(writer.into_bytes())
}

fn simple_tag(writer: &mut BinaryWriter, tag: u8) -> Result<()> {
    writer.write_le::<u8>(tag);
    Ok(())
}

fn encode_native_type(descriptor: &NativeType, writer: &mut BinaryWriter) -> Result<()> {
    match descriptor {
        NativeType::Void => simple_tag(writer, NATIVE_TYPE::VOID),
        NativeType::Boolean => simple_tag(writer, NATIVE_TYPE::BOOLEAN),
        NativeType::I1 => simple_tag(writer, NATIVE_TYPE::I1),
        NativeType::U1 => simple_tag(writer, NATIVE_TYPE::U1),
        NativeType::I2 => simple_tag(writer, NATIVE_TYPE::I2),
        NativeType::U2 => simple_tag(writer, NATIVE_TYPE::U2),
        NativeType::I4 => simple_tag(writer, NATIVE_TYPE::I4),
        NativeType::U4 => simple_tag(writer, NATIVE_TYPE::U4),
        NativeType::I8 => simple_tag(writer, NATIVE_TYPE::I8),
        NativeType::U8 => simple_tag(writer, NATIVE_TYPE::U8),
        NativeType::R4 => simple_tag(writer, NATIVE_TYPE::R4),
        NativeType::R8 => simple_tag(writer, NATIVE_TYPE::R8),
        NativeType::SysChar => simple_tag(writer, NATIVE_TYPE::SYSCHAR),
        NativeType::Variant => simple_tag(writer, NATIVE_TYPE::VARIANT),
        NativeType::Currency => simple_tag(writer, NATIVE_TYPE::CURRENCY),
        NativeType::Decimal => simple_tag(writer, NATIVE_TYPE::DECIMAL),
        NativeType::Date => simple_tag(writer, NATIVE_TYPE::DATE),
        NativeType::Int => simple_tag(writer, NATIVE_TYPE::INT),
        NativeType::UInt => simple_tag(writer, NATIVE_TYPE::UINT),
        NativeType::Error => simple_tag(writer, NATIVE_TYPE::ERROR),
        NativeType::BStr => simple_tag(writer, NATIVE_TYPE::BSTR),
        NativeType::AnsiBStr => simple_tag(writer, NATIVE_TYPE::ANSIBSTR),
        NativeType::TBStr => simple_tag(writer, NATIVE_TYPE::TBSTR),
        NativeType::VariantBool => simple_tag(writer, NATIVE_TYPE::VARIANTBOOL),
        NativeType::ObjectRef => simple_tag(writer, NATIVE_TYPE::OBJECTREF),
        NativeType::IUnknown => simple_tag(writer, NATIVE_TYPE::IUNKNOWN),
        NativeType::IDispatch => simple_tag(writer, NATIVE_TYPE::IDISPATCH),
        NativeType::IInspectable => simple_tag(writer, NATIVE_TYPE::IINSPECTABLE),
        NativeType::NestedStruct => simple_tag(writer, NATIVE_TYPE::NESTEDSTRUCT),
        NativeType::LPStruct => simple_tag(writer, NATIVE_TYPE::LPSTRUCT),
        NativeType::Func => simple_tag(writer, NATIVE_TYPE::FUNC),
        NativeType::AsAny => simple_tag(writer, NATIVE_TYPE::ASANY),
        NativeType::HString => simple_tag(writer, NATIVE_TYPE::HSTRING),
        NativeType::LPStr { size_param_index } => {
            writer.write_le::<u8>(NATIVE_TYPE::LPSTR);
            write_optional_uint(writer, size_param_index)
        }
        NativeType::LPWStr { size_param_index } => {
            writer.write_le::<u8>(NATIVE_TYPE::LPWSTR);
            write_optional_uint(writer, size_param_index)
        }
        NativeType::LPTStr { size_param_index } => {
            writer.write_le::<u8>(NATIVE_TYPE::LPTSTR);
            write_optional_uint(writer, size_param_index)
        }
        NativeType::LPUtf8Str { size_param_index } => {
            writer.write_le::<u8>(NATIVE_TYPE::LPUTF8STR);
            write_optional_uint(writer, size_param_index)
        }
        NativeType::FixedSysString { size } => {
            writer.write_le::<u8>(NATIVE_TYPE::FIXEDSYSSTRING);
            writer.write_compressed_uint(*size)
        }
        NativeType::ByValStr { size } => {
            writer.write_le::<u8>(NATIVE_TYPE::BYVALSTR);
            writer.write_compressed_uint(*size)
        }
        NativeType::FixedArray { size, element_type } => {
            writer.write_le::<u8>(NATIVE_TYPE::FIXEDARRAY);
            writer.write_compressed_uint(*size)?;
            match element_type {
                Some(inner) => encode_native_type(inner, writer),
                None => Ok(()),
            }
        }
        NativeType::Array {
            element_type,
            num_param,
            num_element,
        } => {
            writer.write_le::<u8>(NATIVE_TYPE::ARRAY);
            encode_native_type(element_type, writer)?;
            write_optional_uint(writer, num_param)?;
            write_optional_uint(writer, num_element)
        }
        NativeType::SafeArray { variant_type } => {
            writer.write_le::<u8>(NATIVE_TYPE::SAFEARRAY);
            if let Some(variant) = variant_type {
                writer.write_le::<u8>(*variant);
            }
            Ok(())
        }
        NativeType::Ptr { ref_type } => {
            writer.write_le::<u8>(NATIVE_TYPE::PTR);
            match ref_type {
                Some(inner) => encode_native_type(inner, writer),
                None => Ok(()),
            }
        }
        NativeType::Interface { iid_param_index } => {
            writer.write_le::<u8>(NATIVE_TYPE::INTERFACE);
            write_optional_uint(writer, iid_param_index)
        }
        NativeType::Struct {
            packing_size,
            class_size,
        } => {
            writer.write_le::<u8>(NATIVE_TYPE::STRUCT);
            if let Some(packing) = packing_size {
                writer.write_le::<u8>(*packing);
            }
            write_optional_uint(writer, class_size)
        }
        NativeType::CustomMarshaler(descriptor) => {
            writer.write_le::<u8>(NATIVE_TYPE::CUSTOMMARSHALER);
            let guid_text = descriptor.guid_text();
            writer.write_serialized_string(Some(&guid_text))?;
            writer.write_serialized_string(descriptor.native_type_name.as_deref())?;
            writer.write_serialized_string(descriptor.managed_type_name.as_deref())?;
            writer.write_serialized_string(descriptor.cookie.as_deref())
        }
    }
}

fn write_optional_uint(writer: &mut BinaryWriter, value: &Option<u32>) -> Result<()> {
    match value {
        Some(v) => writer.write_compressed_uint(*v),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_types() {
        let test_cases = vec![
            (vec![NATIVE_TYPE::VOID], NativeType::Void),
            (vec![NATIVE_TYPE::BOOLEAN], NativeType::Boolean),
            (vec![NATIVE_TYPE::I4], NativeType::I4),
            (vec![NATIVE_TYPE::U8], NativeType::U8),
            (vec![NATIVE_TYPE::INT], NativeType::Int),
            (vec![NATIVE_TYPE::VARIANTBOOL], NativeType::VariantBool),
            (vec![NATIVE_TYPE::HSTRING], NativeType::HString),
        ];

        for (input, expected) in test_cases {
            assert_eq!(parse_marshal_descriptor(&input).unwrap(), expected);
            assert_eq!(encode_marshal_descriptor(&expected).unwrap(), input);
            assert_eq!(expected.physical_size() as usize, input.len());
        }
    }

    #[test]
    fn lpstr_with_and_without_size() {
        let with_size = parse_marshal_descriptor(&[NATIVE_TYPE::LPSTR, 0x05]).unwrap();
        assert_eq!(
            with_size,
            NativeType::LPStr {
                size_param_index: Some(5)
            }
        );

        let without = parse_marshal_descriptor(&[NATIVE_TYPE::LPSTR]).unwrap();
        assert_eq!(
            without,
            NativeType::LPStr {
                size_param_index: None
            }
        );
    }

    #[test]
    fn array_descriptor() {
        let input = [NATIVE_TYPE::ARRAY, NATIVE_TYPE::I4, 0x03, 0x0A];
        let parsed = parse_marshal_descriptor(&input).unwrap();
        assert_eq!(
            parsed,
            NativeType::Array {
                element_type: Box::new(NativeType::I4),
                num_param: Some(3),
                num_element: Some(10),
            }
        );
        assert_eq!(encode_marshal_descriptor(&parsed).unwrap(), input);
        assert_eq!(parsed.physical_size() as usize, input.len());
    }

    #[test]
    fn custom_marshaler_roundtrip() {
        let descriptor = CustomMarshalDescriptor {
            guid: Guid::try_parse("11111111-2222-3333-4444-555555555555").unwrap(),
            native_type_name: Some("u".to_string()),
            managed_type_name: Some("m".to_string()),
            cookie: Some("c".to_string()),
        };
        let native = NativeType::CustomMarshaler(descriptor.clone());

        let encoded = encode_marshal_descriptor(&native).unwrap();
        let decoded = parse_marshal_descriptor(&encoded).unwrap();
        assert_eq!(decoded, native);

        // Physical length: the tag, the braced 38-character GUID text behind its
        // length prefix, and three 1-character serialised strings
        let guid_text = descriptor.guid_text();
        assert_eq!(guid_text, "{11111111-2222-3333-4444-555555555555}");
        assert_eq!(guid_text.len(), 38);
        let expected = 1 + (1 + 38) + (1 + 1) + (1 + 1) + (1 + 1);
        assert_eq!(encoded.len(), expected);
        assert_eq!(native.physical_size() as usize, expected);
    }

    #[test]
    fn invalid_guid_decodes_as_zero() {
        let mut writer = BinaryWriter::new();
        writer.write_le::<u8>(NATIVE_TYPE::CUSTOMMARSHALER);
        writer.write_serialized_string(Some("not a guid")).unwrap();
        writer.write_serialized_string(Some("u")).unwrap();
        writer.write_serialized_string(Some("m")).unwrap();
        writer.write_serialized_string(Some("c")).unwrap();

        let parsed = parse_marshal_descriptor(writer.bytes()).unwrap();
        match parsed {
            NativeType::CustomMarshaler(descriptor) => {
                assert_eq!(descriptor.guid, Guid::ZERO);
                assert_eq!(descriptor.cookie.as_deref(), Some("c"));
            }
            other => panic!("unexpected descriptor {other:?}"),
        }

        // A null GUID string is accepted too
        let mut writer = BinaryWriter::new();
        writer.write_le::<u8>(NATIVE_TYPE::CUSTOMMARSHALER);
        writer.write_serialized_string(None).unwrap();
        writer.write_serialized_string(None).unwrap();
        writer.write_serialized_string(None).unwrap();
        writer.write_serialized_string(None).unwrap();

        let parsed = parse_marshal_descriptor(writer.bytes()).unwrap();
        assert_eq!(
            parsed,
            NativeType::CustomMarshaler(CustomMarshalDescriptor::default())
        );
    }

    #[test]
    fn nested_pointers_guarded() {
        let mut blob = vec![NATIVE_TYPE::PTR; 200];
        blob.push(NATIVE_TYPE::I4);
        assert!(matches!(
            parse_marshal_descriptor(&blob),
            Err(crate::Error::MalformedSignature { .. })
        ));
    }

    #[test]
    fn unknown_tag_is_malformed() {
        assert!(parse_marshal_descriptor(&[0x4F]).is_err());
    }

    #[test]
    fn struct_with_layout() {
        let input = [NATIVE_TYPE::STRUCT, 0x08, 0x10];
        let parsed = parse_marshal_descriptor(&input).unwrap();
        assert_eq!(
            parsed,
            NativeType::Struct {
                packing_size: Some(8),
                class_size: Some(16),
            }
        );
        assert_eq!(encode_marshal_descriptor(&parsed).unwrap(), input);
    }
}
