//! Zero-copy lazy access to the rows of one metadata table.

use std::marker::PhantomData;

use rayon::iter::{
    plumbing::{bridge, Consumer, Producer, ProducerCallback, UnindexedConsumer},
    IndexedParallelIterator, ParallelIterator,
};

use crate::{
    metadata::tables::{RowRead, TableInfoRef},
    Error, Result,
};

/// A typed view over the serialized rows of one table.
///
/// Rows are materialised lazily: `get(rid)` decodes the row at
/// `base + (rid - 1) * row_stride` on access, nothing is parsed up front. Row ids are
/// 1-based externally per the CLI convention; 0 is the null reference and never a
/// valid argument.
///
/// # Examples
///
/// ```rust,no_run
/// use cilforge::metadata::tables::{MetadataTable, NestedClassRow};
/// # fn example(table: &MetadataTable<NestedClassRow>) -> cilforge::Result<()> {
/// let first = table.get(1)?;
/// for row in table.iter() {
///     println!("{} is nested in {}", row.nested_class, row.enclosing_class);
/// }
/// # Ok(())
/// # }
/// ```
pub struct MetadataTable<'a, T: RowRead> {
    data: &'a [u8],
    row_count: u32,
    info: TableInfoRef,
    _marker: PhantomData<T>,
}

impl<'a, T: RowRead> MetadataTable<'a, T> {
    /// Create a table view over `data` holding `row_count` serialized rows
    ///
    /// ## Arguments
    /// * 'data' - The slice the table body starts at
    /// * '`row_count`' - Number of rows in this table
    /// * 'info' - The width oracle of the current image
    ///
    /// # Errors
    /// Returns [`Error::EndOfStream`] if the slice cannot hold all rows
    pub fn new(data: &'a [u8], row_count: u32, info: TableInfoRef) -> Result<Self> {
        let size = u64::from(row_count) * u64::from(T::row_size(&info));
        if size > data.len() as u64 {
            return Err(Error::EndOfStream);
        }

        Ok(MetadataTable {
            data,
            row_count,
            info,
            _marker: PhantomData,
        })
    }

    /// Number of rows in this table
    #[must_use]
    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    /// Returns true if the table holds no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// Total byte size of the serialized table body
    #[must_use]
    pub fn size(&self) -> u64 {
        u64::from(self.row_count) * u64::from(T::row_size(&self.info))
    }

    /// Materialise the row with the given 1-based row id
    ///
    /// ## Arguments
    /// * 'rid' - The 1-based row id
    ///
    /// # Errors
    /// Returns [`Error::UnresolvableToken`] if the rid is 0 or past the table end
    pub fn get(&self, rid: u32) -> Result<T> {
        if rid == 0 || rid > self.row_count {
            return Err(Error::UnresolvableToken(
                crate::metadata::token::Token::from_parts(T::TABLE as u8, rid),
            ));
        }

        let mut offset = (rid as usize - 1) * T::row_size(&self.info) as usize;
        T::row_read(self.data, &mut offset, &self.info)
    }

    /// Iterate over all rows in row id order
    #[must_use]
    pub fn iter(&self) -> TableIterator<'a, '_, T> {
        TableIterator {
            table: self,
            next_rid: 1,
        }
    }

    /// Iterate over all rows in parallel.
    ///
    /// Malformed rows are skipped; the sequential [`MetadataTable::get`] path reports
    /// them individually.
    pub fn par_iter(&self) -> TableParIterator<'a, '_, T> {
        TableParIterator { table: self }
    }
}

impl<'a, T: RowRead> IntoIterator for &'a MetadataTable<'a, T> {
    type Item = T;
    type IntoIter = TableIterator<'a, 'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Sequential iterator over the rows of a [`MetadataTable`].
///
/// Stops at the first row that fails to decode.
pub struct TableIterator<'a, 't, T: RowRead> {
    table: &'t MetadataTable<'a, T>,
    next_rid: u32,
}

impl<T: RowRead> Iterator for TableIterator<'_, '_, T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_rid > self.table.row_count {
            return None;
        }

        let row = self.table.get(self.next_rid).ok()?;
        self.next_rid += 1;
        Some(row)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.table.row_count + 1 - self.next_rid) as usize;
        (remaining, Some(remaining))
    }
}

/// Rayon parallel iterator over the rows of a [`MetadataTable`].
pub struct TableParIterator<'a, 't, T: RowRead> {
    table: &'t MetadataTable<'a, T>,
}

impl<T: RowRead> ParallelIterator for TableParIterator<'_, '_, T> {
    type Item = T;

    fn drive_unindexed<C>(self, consumer: C) -> C::Result
    where
        C: UnindexedConsumer<Self::Item>,
    {
        bridge(self, consumer)
    }

    fn opt_len(&self) -> Option<usize> {
        Some(self.table.row_count as usize)
    }
}

impl<T: RowRead> IndexedParallelIterator for TableParIterator<'_, '_, T> {
    fn len(&self) -> usize {
        self.table.row_count as usize
    }

    fn drive<C: Consumer<Self::Item>>(self, consumer: C) -> C::Result {
        bridge(self, consumer)
    }

    fn with_producer<CB: ProducerCallback<Self::Item>>(self, callback: CB) -> CB::Output {
        callback.callback(RowProducer {
            table: self.table,
            range: 1..self.table.row_count + 1,
        })
    }
}

struct RowProducer<'a, 't, T: RowRead> {
    table: &'t MetadataTable<'a, T>,
    range: std::ops::Range<u32>,
}

impl<'a, 't, T: RowRead> Producer for RowProducer<'a, 't, T> {
    type Item = T;
    type IntoIter = RowRangeIterator<'a, 't, T>;

    fn into_iter(self) -> Self::IntoIter {
        RowRangeIterator {
            table: self.table,
            range: self.range,
        }
    }

    fn split_at(self, index: usize) -> (Self, Self) {
        #[allow(clippy::cast_possible_truncation)]
        let mid = self.range.start + index as u32;
        (
            RowProducer {
                table: self.table,
                range: self.range.start..mid,
            },
            RowProducer {
                table: self.table,
                range: mid..self.range.end,
            },
        )
    }
}

struct RowRangeIterator<'a, 't, T: RowRead> {
    table: &'t MetadataTable<'a, T>,
    range: std::ops::Range<u32>,
}

impl<T: RowRead> Iterator for RowRangeIterator<'_, '_, T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        let rid = self.range.next()?;
        self.table.get(rid).ok()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.range.size_hint()
    }
}

impl<T: RowRead> ExactSizeIterator for RowRangeIterator<'_, '_, T> {}

impl<T: RowRead> DoubleEndedIterator for RowRangeIterator<'_, '_, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let rid = self.range.next_back()?;
        self.table.get(rid).ok()
    }
}
