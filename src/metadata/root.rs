//! Metadata root: the storage signature header and stream directory.
//!
//! The metadata directory begins with the `BSJB` storage signature, a version
//! string, and a table of stream headers naming `#~`, `#Strings`, `#US`, `#GUID`
//! and `#Blob`; the stream bodies follow at their recorded offsets.
//!
//! # Reference
//! - [ECMA-335 II.24.2.1-II.24.2.2](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use crate::{
    file::io::{read_le_at, write_le_at},
    Error::EndOfStream,
    Result,
};

/// The `BSJB` storage signature opening every metadata directory
pub const METADATA_SIGNATURE: u32 = 0x424A_5342;

/// One entry of the stream directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    /// Byte offset of the stream body, relative to the metadata root
    pub offset: u32,
    /// Byte size of the stream body
    pub size: u32,
    /// Stream name (`#~`, `#Strings`, `#US`, `#GUID`, `#Blob`)
    pub name: String,
}

/// The parsed metadata root.
#[derive(Debug, Clone)]
pub struct MetadataRoot {
    /// Format major version, 1
    pub major_version: u16,
    /// Format minor version, 1
    pub minor_version: u16,
    /// The version string (e.g. `v4.0.30319`)
    pub version: String,
    /// Reserved flags word
    pub flags: u16,
    /// The stream directory in declaration order
    pub streams: Vec<StreamHeader>,
}

impl MetadataRoot {
    /// Parse a metadata root from the first byte of the directory
    ///
    /// ## Arguments
    /// * 'data' - The directory bytes
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImageFormat`] for a wrong storage signature or
    /// inconsistent headers, [`EndOfStream`] for truncated input
    pub fn parse(data: &[u8]) -> Result<MetadataRoot> {
        let mut offset = 0usize;

        let signature = read_le_at::<u32>(data, &mut offset)?;
        if signature != METADATA_SIGNATURE {
            return Err(bad_image_error!(
                "Invalid metadata signature - 0x{:08x}",
                signature
            ));
        }

        let major_version = read_le_at::<u16>(data, &mut offset)?;
        let minor_version = read_le_at::<u16>(data, &mut offset)?;
        offset += 4; // reserved

        let version_length = read_le_at::<u32>(data, &mut offset)? as usize;
        let Some(version_end) = offset.checked_add(version_length) else {
            return Err(EndOfStream);
        };
        if version_end > data.len() {
            return Err(EndOfStream);
        }

        let version_bytes = &data[offset..version_end];
        let version = match version_bytes.iter().position(|byte| *byte == 0) {
            Some(nul) => String::from_utf8_lossy(&version_bytes[..nul]).into_owned(),
            None => String::from_utf8_lossy(version_bytes).into_owned(),
        };
        offset = version_end;

        let flags = read_le_at::<u16>(data, &mut offset)?;
        let stream_count = read_le_at::<u16>(data, &mut offset)?;

        let mut streams = Vec::with_capacity(stream_count as usize);
        for _ in 0..stream_count {
            let stream_offset = read_le_at::<u32>(data, &mut offset)?;
            let stream_size = read_le_at::<u32>(data, &mut offset)?;

            let name_start = offset;
            while offset < data.len() && data[offset] != 0 {
                offset += 1;
            }
            if offset >= data.len() {
                return Err(EndOfStream);
            }

            let name = String::from_utf8_lossy(&data[name_start..offset]).into_owned();
            // Names are NUL-terminated and padded to a 4 byte boundary
            offset += 1;
            offset = name_start + ((offset - name_start) + 3) / 4 * 4;

            let Some(stream_end) = stream_offset.checked_add(stream_size) else {
                return Err(bad_image_error!("Stream '{}' overflows the directory", name));
            };
            if stream_end as usize > data.len() {
                return Err(bad_image_error!(
                    "Stream '{}' extends past the directory end",
                    name
                ));
            }

            streams.push(StreamHeader {
                offset: stream_offset,
                size: stream_size,
                name,
            });
        }

        Ok(MetadataRoot {
            major_version,
            minor_version,
            version,
            flags,
            streams,
        })
    }

    /// Find a stream header by name
    ///
    /// ## Arguments
    /// * 'name' - The stream name to look for
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&StreamHeader> {
        self.streams.iter().find(|header| header.name == name)
    }

    /// Serialize a metadata root for the given streams.
    ///
    /// ## Arguments
    /// * 'version' - The version string to embed
    /// * 'streams' - The stream directory to record
    ///
    /// # Errors
    /// Returns [`crate::Error::EndOfStream`] only on arithmetic overflow of the
    /// internal buffer, which bounded inputs cannot trigger
    pub fn write(version: &str, streams: &[StreamHeader]) -> Result<Vec<u8>> {
        let version_padded = (version.len() + 1).div_ceil(4) * 4;
        let mut buffer = vec![0u8; Self::header_size(version, streams)];
        let mut offset = 0usize;

        write_le_at::<u32>(&mut buffer, &mut offset, METADATA_SIGNATURE)?;
        write_le_at::<u16>(&mut buffer, &mut offset, 1)?;
        write_le_at::<u16>(&mut buffer, &mut offset, 1)?;
        write_le_at::<u32>(&mut buffer, &mut offset, 0)?;

        #[allow(clippy::cast_possible_truncation)]
        write_le_at::<u32>(&mut buffer, &mut offset, version_padded as u32)?;
        buffer[offset..offset + version.len()].copy_from_slice(version.as_bytes());
        offset += version_padded;

        write_le_at::<u16>(&mut buffer, &mut offset, 0)?;
        #[allow(clippy::cast_possible_truncation)]
        write_le_at::<u16>(&mut buffer, &mut offset, streams.len() as u16)?;

        for stream in streams {
            write_le_at::<u32>(&mut buffer, &mut offset, stream.offset)?;
            write_le_at::<u32>(&mut buffer, &mut offset, stream.size)?;

            let name_padded = (stream.name.len() + 1).div_ceil(4) * 4;
            buffer[offset..offset + stream.name.len()]
                .copy_from_slice(stream.name.as_bytes());
            offset += name_padded;
        }

        Ok(buffer)
    }

    /// Byte size of the serialized root header for the given version and streams
    #[must_use]
    pub fn header_size(version: &str, streams: &[StreamHeader]) -> usize {
        let version_padded = (version.len() + 1).div_ceil(4) * 4;
        let names: usize = streams
            .iter()
            .map(|stream| 8 + (stream.name.len() + 1).div_ceil(4) * 4)
            .sum();
        16 + version_padded + 4 + names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_parse_roundtrip() {
        let streams = vec![
            StreamHeader {
                offset: 0x6C,
                size: 0x100,
                name: "#~".to_string(),
            },
            StreamHeader {
                offset: 0x16C,
                size: 0x40,
                name: "#Strings".to_string(),
            },
        ];

        let mut bytes = MetadataRoot::write("v4.0.30319", &streams).unwrap();
        // Body bytes so that the recorded stream ranges stay in bounds
        bytes.resize(0x16C + 0x40, 0);

        let root = MetadataRoot::parse(&bytes).unwrap();
        assert_eq!(root.major_version, 1);
        assert_eq!(root.minor_version, 1);
        assert_eq!(root.version, "v4.0.30319");
        assert_eq!(root.streams, streams);
        assert_eq!(root.stream("#~").unwrap().size, 0x100);
        assert!(root.stream("#Blob").is_none());
    }

    #[test]
    fn rejects_wrong_signature() {
        let bytes = [0u8; 32];
        assert!(matches!(
            MetadataRoot::parse(&bytes),
            Err(crate::Error::BadImageFormat { .. })
        ));
    }

    #[test]
    fn rejects_overflowing_stream() {
        let streams = vec![StreamHeader {
            offset: 0x1000,
            size: 0x1000,
            name: "#~".to_string(),
        }];

        let bytes = MetadataRoot::write("v4.0.30319", &streams).unwrap();
        assert!(MetadataRoot::parse(&bytes).is_err());
    }

    #[test]
    fn version_string_is_nul_padded() {
        let bytes = MetadataRoot::write("v2", &[]).unwrap();
        // 16 header bytes, then the padded version "v2\0\0"
        assert_eq!(&bytes[16..20], b"v2\0\0");

        let root = MetadataRoot::parse(&bytes).unwrap();
        assert_eq!(root.version, "v2");
    }
}
