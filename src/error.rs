use thiserror::Error;

use crate::metadata::token::Token;

macro_rules! bad_image_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::BadImageFormat {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::BadImageFormat {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! malformed_signature_error {
    ($msg:expr) => {
        crate::Error::MalformedSignature {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::MalformedSignature {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every failure in the crate surfaces through one of these variants; the core never
/// substitutes placeholders, with the two documented exceptions (custom-marshaller GUID
/// strings that fail to parse decode as the zero GUID, and lazily decoded signatures that
/// reference past the row-store tail defer their [`Error::UnresolvableToken`] to first
/// access).
///
/// # Error Categories
///
/// ## Stream Errors
/// - [`Error::EndOfStream`] - A read would cross the slice bound
/// - [`Error::MalformedCompressedInt`] - Invalid ECMA-335 compressed integer discriminator
///
/// ## Structural Errors
/// - [`Error::BadImageFormat`] - Corrupted or inconsistent metadata directory structure
/// - [`Error::MalformedSignature`] - Invalid element tag or recursion overflow in a blob
/// - [`Error::UnresolvableToken`] - A row or signature references a non-existent target
/// - [`Error::InvalidHeapReference`] - A heap offset points outside the heap or mid-entry
///
/// ## Reserved Operations
/// - [`Error::NotImplemented`] - Operation is reserved and has no defined semantics yet
///
/// # Examples
///
/// ```rust
/// use cilforge::{Error, MetadataImage};
///
/// match MetadataImage::parse(&[0xCC; 4]) {
///     Ok(_) => println!("parsed"),
///     Err(Error::BadImageFormat { message, file, line }) => {
///         eprintln!("bad image: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A read would have crossed the bound of the underlying slice.
    ///
    /// Raised by [`crate::file::BinaryReader`] for any fixed-width, compressed or
    /// string read that runs out of data, and by heap views for truncated entries.
    #[error("Unexpected end of stream")]
    EndOfStream,

    /// The discriminator bits of an ECMA-335 compressed integer are invalid.
    ///
    /// The first byte of a compressed integer encodes its width in the top bits;
    /// `111xxxxx` does not correspond to any defined encoding. The associated value
    /// is the offending lead byte.
    #[error("Invalid compressed integer lead byte - 0x{0:02x}")]
    MalformedCompressedInt(u8),

    /// A signature blob could not be decoded or encoded.
    ///
    /// Covers unknown element-type tags, structurally impossible input (e.g. a
    /// `GENERICINST` whose head is not a class or value type), and recursion-guard
    /// breaches while walking hostile, deeply nested blobs.
    ///
    /// # Fields
    ///
    /// * `message` - Description of what was malformed
    /// * `file` - Source file in which the error was detected
    /// * `line` - Source line in which the error was detected
    #[error("Malformed signature - {file}:{line}: {message}")]
    MalformedSignature {
        /// The message to be printed for the malformed signature
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A token references a row that does not exist in its declared table.
    ///
    /// The associated [`Token`] identifies the dangling reference.
    #[error("Token does not resolve to an existing row - {0}")]
    UnresolvableToken(Token),

    /// A heap offset or index does not address a valid entry.
    ///
    /// # Fields
    ///
    /// * `heap` - Name of the heap (`#Strings`, `#US`, `#Blob`, `#GUID`)
    /// * `offset` - The offending offset or index
    #[error("Invalid reference into {heap} - {offset}")]
    InvalidHeapReference {
        /// The name of the heap the reference points into
        heap: &'static str,
        /// The offending offset (byte offset, or 1-based index for `#GUID`)
        offset: u32,
    },

    /// The metadata directory structure is damaged or inconsistent.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Bad image format - {file}:{line}: {message}")]
    BadImageFormat {
        /// The message to be printed for the bad image
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The requested operation is reserved and has no defined semantics.
    ///
    /// The associated value names the operation.
    #[error("Not implemented - {0}")]
    NotImplemented(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_image_macro_records_location() {
        let err = bad_image_error!("broken {}", "thing");
        match err {
            Error::BadImageFormat {
                message,
                file,
                line,
            } => {
                assert_eq!(message, "broken thing");
                assert!(file.ends_with("error.rs"));
                assert!(line > 0);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn signature_macro_records_location() {
        let err = malformed_signature_error!("tag 0x{:02x}", 0xFFu8);
        assert!(matches!(err, Error::MalformedSignature { .. }));
        assert!(format!("{err}").contains("tag 0xff"));
    }

    #[test]
    fn display_formats() {
        assert_eq!(format!("{}", Error::EndOfStream), "Unexpected end of stream");
        assert_eq!(
            format!("{}", Error::MalformedCompressedInt(0xE0)),
            "Invalid compressed integer lead byte - 0xe0"
        );
        assert_eq!(
            format!(
                "{}",
                Error::InvalidHeapReference {
                    heap: "#Blob",
                    offset: 42
                }
            ),
            "Invalid reference into #Blob - 42"
        );
        assert_eq!(
            format!("{}", Error::UnresolvableToken(Token::new(0x0200_0010))),
            "Token does not resolve to an existing row - 0x02000010"
        );
    }
}
