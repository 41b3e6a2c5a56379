//! A fully wired metadata image: root, heaps and table stream over one byte span.

use crate::{
    metadata::{
        heaps::{BlobHeap, GuidHeap, StringsHeap, UserStringsHeap},
        root::MetadataRoot,
        tables::TablesStream,
    },
    Result,
};

/// A parsed metadata directory.
///
/// Wires the stream directory of the [`MetadataRoot`] to typed views: the four heaps
/// and the `#~` table stream. All views borrow the input span; nothing is copied
/// until descriptors are materialised.
///
/// # Examples
///
/// ```rust,no_run
/// use cilforge::MetadataImage;
///
/// # fn example(data: &[u8]) -> cilforge::Result<()> {
/// let image = MetadataImage::parse(data)?;
/// println!("runtime version {}", image.root.version);
/// println!("{} tables", image.tables.table_count());
/// # Ok(())
/// # }
/// ```
pub struct MetadataImage<'a> {
    /// The storage signature header and stream directory
    pub root: MetadataRoot,
    /// The `#Strings` heap; absent streams yield an empty pre-seeded view
    pub strings: StringsHeap<'a>,
    /// The `#US` heap
    pub user_strings: UserStringsHeap<'a>,
    /// The `#Blob` heap
    pub blob: BlobHeap<'a>,
    /// The `#GUID` heap
    pub guid: GuidHeap<'a>,
    /// The `#~` table stream
    pub tables: TablesStream<'a>,
}

/// The single zero byte standing in for an absent byte-addressed heap.
const EMPTY_HEAP: &[u8] = &[0];

impl<'a> MetadataImage<'a> {
    /// Parse a metadata directory from a byte span positioned at the metadata root
    ///
    /// ## Arguments
    /// * 'data' - The directory bytes (as located by the PE container)
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImageFormat`] for structural violations,
    /// [`crate::Error::EndOfStream`] for truncated input
    pub fn parse(data: &'a [u8]) -> Result<MetadataImage<'a>> {
        let root = MetadataRoot::parse(data)?;

        let body = |name: &str| -> Option<&'a [u8]> {
            root.stream(name)
                .map(|header| &data[header.offset as usize..(header.offset + header.size) as usize])
        };

        let strings = StringsHeap::from(body("#Strings").unwrap_or(EMPTY_HEAP))?;
        let user_strings = UserStringsHeap::from(body("#US").unwrap_or(EMPTY_HEAP))?;
        let blob = BlobHeap::from(body("#Blob").unwrap_or(EMPTY_HEAP))?;
        let guid = GuidHeap::from(body("#GUID").unwrap_or(&[]))?;

        let Some(tables_body) = body("#~") else {
            return Err(bad_image_error!("Metadata directory has no #~ stream"));
        };
        let tables = TablesStream::parse(tables_body)?;

        Ok(MetadataImage {
            root,
            strings,
            user_strings,
            blob,
            guid,
            tables,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tables_stream_is_rejected() {
        let bytes = MetadataRoot::write("v4.0.30319", &[]).unwrap();
        assert!(matches!(
            MetadataImage::parse(&bytes),
            Err(crate::Error::BadImageFormat { .. })
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(MetadataImage::parse(&[0xCC; 4]).is_err());
    }
}
