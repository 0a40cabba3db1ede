use std::collections::VecDeque;

use serde_json::Value;

use crate::{Error, Partition, Partitioner, Result};

/// Running position of an equal-split walk over `len` units.
///
/// Shared by [`EqualSplit`] and [`RowRange`](crate::RowRange): every span has
/// `size` units except the last, which absorbs the `rem` leftovers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Spans {
    len: usize,
    pos: usize,
    size: usize,
    rem: usize,
    done: bool,
}

impl Spans {
    pub(crate) fn new(len: usize, chunks: usize) -> Result<Self> {
        if chunks == 0 {
            return Err(Error::invalid_shard("chunk count must be greater than 0"));
        }

        if len == 0 {
            return Ok(Self {
                len,
                pos: 0,
                size: 0,
                rem: 0,
                done: true,
            });
        }

        let chunks = chunks.min(len);
        let rem = len % chunks;
        Ok(Self {
            len,
            pos: 0,
            size: (len - rem) / chunks,
            rem,
            done: false,
        })
    }

    /// Returns `(start, count)` of the next span.
    pub(crate) fn next_span(&mut self) -> Option<(usize, usize)> {
        if self.done {
            return None;
        }

        let start = self.pos;
        if self.len - (self.pos + self.size) == self.rem {
            self.done = true;
            self.pos = self.len;
            Some((start, self.size + self.rem))
        } else {
            self.pos += self.size;
            Some((start, self.size))
        }
    }
}

/// Splits an ordered sequence into nearly equal contiguous parts.
///
/// With `L` elements and `chunks` parts every part holds `L / chunks`
/// elements, except the last one which also takes the `L % chunks`
/// remainder. Asking for more parts than elements yields one element per
/// part.
///
/// # Example
/// ```
/// use serde_json::json;
/// use shopfloor::{EqualSplit, Partitioner};
///
/// let data = (0..10).map(|n| json!(n)).collect();
/// let mut shards = EqualSplit::new(data, 3).unwrap();
///
/// let sizes: Vec<_> = std::iter::from_fn(|| shards.next())
///     .map(|p| (p.part.as_array().unwrap().len(), p.offset.unwrap()))
///     .collect();
/// assert_eq!(sizes, vec![(3, 0), (3, 3), (4, 6)]);
/// ```
#[derive(Debug, Clone)]
pub struct EqualSplit {
    data: VecDeque<Value>,
    spans: Spans,
    unary: bool,
}

impl EqualSplit {
    /// Creates a splitter over `data` producing at most `chunks` parts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidShard`] if `chunks` is zero.
    pub fn new(data: Vec<Value>, chunks: usize) -> Result<Self> {
        let spans = Spans::new(data.len(), chunks)?;
        Ok(Self {
            data: data.into(),
            spans,
            unary: false,
        })
    }

    /// Creates a splitter that hands out one bare element per part.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidShard`] unless `chunks` equals the number of
    /// elements.
    pub fn unary(data: Vec<Value>, chunks: usize) -> Result<Self> {
        if chunks != data.len() {
            return Err(Error::invalid_shard(format!(
                "unary sharding requires one item per shard ({} items, {chunks} shards)",
                data.len()
            )));
        }

        let mut split = Self::new(data, chunks)?;
        split.unary = true;
        Ok(split)
    }
}

impl Partitioner for EqualSplit {
    fn next(&mut self) -> Option<Partition> {
        let (start, count) = self.spans.next_span()?;
        let part: Vec<Value> = self.data.drain(..count).collect();

        let part = if self.unary {
            part.into_iter().next().unwrap_or(Value::Null)
        } else {
            Value::Array(part)
        };

        Some(Partition::new(part, Some(start)))
    }
}
