use serde_json::{Value, json};

/// One piece of a partitioned dataset.
///
/// `offset` locates the piece in the original data. Its unit depends on the
/// strategy: an element index for [`EqualSplit`], a bucket index for
/// [`Weighted`], a pixel index for [`RowRange`].
///
/// [`EqualSplit`]: crate::EqualSplit
/// [`Weighted`]: crate::Weighted
/// [`RowRange`]: crate::RowRange
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub part: Value,
    pub offset: Option<usize>,
}

impl Partition {
    pub const fn new(part: Value, offset: Option<usize>) -> Self {
        Self { part, offset }
    }

    /// The request params a worker receives for this partition:
    /// `[part, offset]`, with `null` for a missing offset.
    pub fn into_params(self) -> Value {
        json!([self.part, self.offset])
    }
}

/// A stateful strategy that hands out successive partitions of a dataset.
///
/// `next` returns `None` once the data is exhausted and keeps returning `None`
/// on every later call.
pub trait Partitioner: Send {
    fn next(&mut self) -> Option<Partition>;
}

impl<P> Partitioner for Box<P>
where
    P: Partitioner + ?Sized,
{
    fn next(&mut self) -> Option<Partition> {
        (**self).next()
    }
}
