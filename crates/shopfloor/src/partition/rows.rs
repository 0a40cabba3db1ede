use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::equal::Spans;
use crate::{Error, Partition, Partitioner, Result};

/// Bytes per pixel of a [`Raster`] (interleaved RGBA).
pub const BYTES_PER_PIXEL: usize = 4;

/// An RGBA pixel buffer, row-major, four bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Raster {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl Raster {
    /// # Errors
    ///
    /// Returns [`Error::InvalidShard`] if `data` does not hold exactly
    /// `width * height` pixels.
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        let expected = width
            .checked_mul(height)
            .and_then(|px| px.checked_mul(BYTES_PER_PIXEL))
            .ok_or_else(|| Error::invalid_shard("raster dimensions overflow"))?;

        if data.len() != expected {
            return Err(Error::invalid_shard(format!(
                "raster of {width}x{height} needs {expected} bytes, got {}",
                data.len()
            )));
        }

        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A transparent black raster.
    pub fn blank(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height * BYTES_PER_PIXEL],
        }
    }

    const fn row_bytes(&self) -> usize {
        self.width * BYTES_PER_PIXEL
    }

    /// Copies out `rows` full rows starting at row `y`.
    ///
    /// The band is clipped to the raster's height.
    pub fn band(&self, y: usize, rows: usize) -> Self {
        let y = y.min(self.height);
        let rows = rows.min(self.height - y);
        let start = y * self.row_bytes();
        let end = start + rows * self.row_bytes();
        Self {
            width: self.width,
            height: rows,
            data: self.data[start..end].to_vec(),
        }
    }

    /// Writes `band` back at pixel `offset`, the inverse of [`Self::band`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidShard`] if the band is of a different width,
    /// does not start on a row boundary, or runs past the last row.
    pub fn put_band(&mut self, offset: usize, band: &Self) -> Result<()> {
        if band.width != self.width {
            return Err(Error::invalid_shard(format!(
                "band width {} does not match raster width {}",
                band.width, self.width
            )));
        }
        if self.width == 0 || offset % self.width != 0 {
            return Err(Error::invalid_shard(format!(
                "pixel offset {offset} is not on a row boundary"
            )));
        }

        let y = offset / self.width;
        if y + band.height > self.height {
            return Err(Error::invalid_shard(format!(
                "band of {} rows at row {y} overruns raster height {}",
                band.height, self.height
            )));
        }

        let start = offset * BYTES_PER_PIXEL;
        self.data[start..start + band.data.len()].copy_from_slice(&band.data);
        Ok(())
    }
}

impl From<Raster> for Value {
    fn from(raster: Raster) -> Self {
        json!({
            "width": raster.width,
            "height": raster.height,
            "data": raster.data,
        })
    }
}

impl TryFrom<Value> for Raster {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let raster: Self = serde_json::from_value(value)
            .map_err(|e| Error::invalid_shard(format!("not a raster: {e}")))?;
        Self::new(raster.width, raster.height, raster.data)
    }
}

/// Splits a [`Raster`] into horizontal bands of nearly equal height.
///
/// Same arithmetic as [`EqualSplit`](crate::EqualSplit) over the row count;
/// each partition's offset is the band's first pixel (`row * width`).
#[derive(Debug, Clone)]
pub struct RowRange {
    raster: Raster,
    spans: Spans,
}

impl RowRange {
    /// # Errors
    ///
    /// Returns [`Error::InvalidShard`] if `chunks` is zero.
    pub fn new(raster: Raster, chunks: usize) -> Result<Self> {
        let spans = Spans::new(raster.height, chunks)?;
        Ok(Self { raster, spans })
    }
}

impl Partitioner for RowRange {
    fn next(&mut self) -> Option<Partition> {
        let (y, rows) = self.spans.next_span()?;
        let band = self.raster.band(y, rows);
        Some(Partition::new(band.into(), Some(y * self.raster.width)))
    }
}
