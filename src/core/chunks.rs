//! Chunked, index-addressed access to a raster's pixel storage
//!
//! A [`ChunkedView`] splits the `(bands, rows, cols)` array into a regular grid of
//! blocks. Each chunk is described only by its offset and shape; its data is a
//! borrowed view into the raster, so building the view or fetching a chunk never
//! copies pixels. Chunks can be visited in any order, sequentially or on rayon.

use crate::core::raster::RasterImage;
use crate::core::tiling::{tile_windows, TileIter};
use crate::types::{RasterArray, RasterError, RasterResult, Window};
use ndarray::{s, ArrayView3};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// One block of a [`ChunkedView`]
#[derive(Debug, Clone)]
pub struct Chunk<'a> {
    /// Position in the view's iteration order
    pub index: usize,
    /// First band in the chunk
    pub band_off: usize,
    /// Pixel window of the chunk
    pub window: Window,
    pub data: ArrayView3<'a, f64>,
}

impl Chunk<'_> {
    /// Shape as (bands, rows, cols)
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }
}

/// Lazily evaluated block grid over a raster
#[derive(Debug, Clone)]
pub struct ChunkedView<'a> {
    array: &'a RasterArray,
    band_chunk: usize,
    band_chunks: usize,
    windows: TileIter,
}

impl<'a> ChunkedView<'a> {
    /// Split `array` into chunks of at most `(bands, rows, cols)`
    pub fn new(array: &'a RasterArray, chunk_shape: (usize, usize, usize)) -> RasterResult<Self> {
        let (band_chunk, row_chunk, col_chunk) = chunk_shape;
        if band_chunk == 0 || row_chunk == 0 || col_chunk == 0 {
            return Err(RasterError::InvalidTileConfig(format!(
                "Chunk dimensions must be positive, got {:?}",
                chunk_shape
            )));
        }

        let (bands, height, width) = array.dim();
        let windows = tile_windows(width, height, col_chunk, row_chunk, 0)?;
        Ok(Self {
            array,
            band_chunk,
            band_chunks: bands.div_ceil(band_chunk),
            windows,
        })
    }

    pub fn len(&self) -> usize {
        self.band_chunks * self.windows.total()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Chunk grid as (band chunks, row chunks, column chunks)
    pub fn grid(&self) -> (usize, usize, usize) {
        (self.band_chunks, self.windows.rows(), self.windows.columns())
    }

    /// Random access to chunk `index`; band chunks are the outermost axis
    pub fn chunk(&self, index: usize) -> Option<Chunk<'a>> {
        let per_band = self.windows.total();
        if per_band == 0 || index >= self.len() {
            return None;
        }

        let band_off = (index / per_band) * self.band_chunk;
        let band_end = (band_off + self.band_chunk).min(self.array.dim().0);
        let window = self.windows.window_at(index % per_band)?;

        let data = self.array.slice(s![
            band_off..band_end,
            window.row_off..window.row_end(),
            window.col_off..window.col_end()
        ]);
        Some(Chunk {
            index,
            band_off,
            window,
            data,
        })
    }

    pub fn iter(&self) -> ChunkIter<'a> {
        ChunkIter {
            view: self.clone(),
            next: 0,
        }
    }

    #[cfg(feature = "parallel")]
    pub fn par_iter(&self) -> impl ParallelIterator<Item = Chunk<'a>> + '_ {
        (0..self.len()).into_par_iter().filter_map(move |i| self.chunk(i))
    }
}

/// Sequential iterator over a [`ChunkedView`]
#[derive(Debug, Clone)]
pub struct ChunkIter<'a> {
    view: ChunkedView<'a>,
    next: usize,
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Chunk<'a>> {
        let chunk = self.view.chunk(self.next)?;
        self.next += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.view.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChunkIter<'_> {}

impl<'a> IntoIterator for &ChunkedView<'a> {
    type Item = Chunk<'a>;
    type IntoIter = ChunkIter<'a>;

    fn into_iter(self) -> ChunkIter<'a> {
        self.iter()
    }
}

impl RasterImage {
    /// Chunked view over this raster's storage
    pub fn to_chunked_view(&self, chunk_shape: (usize, usize, usize)) -> RasterResult<ChunkedView<'_>> {
        let view = ChunkedView::new(self.array(), chunk_shape)?;
        log::debug!(
            "Chunked view of {:?} with chunk shape {:?}: grid {:?}",
            self.array().dim(),
            chunk_shape,
            view.grid()
        );
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn sample() -> RasterArray {
        Array3::from_shape_fn((3, 5, 7), |(b, r, c)| (b * 100 + r * 10 + c) as f64)
    }

    #[test]
    fn test_chunk_grid_and_order() {
        let array = sample();
        let view = ChunkedView::new(&array, (2, 2, 4)).unwrap();
        assert_eq!(view.grid(), (2, 3, 2));
        assert_eq!(view.len(), 12);

        let first = view.chunk(0).unwrap();
        assert_eq!(first.shape(), (2, 2, 4));
        assert_eq!(first.data[[1, 1, 3]], 113.0);

        // second band chunk holds the single trailing band
        let last = view.chunk(11).unwrap();
        assert_eq!(last.band_off, 2);
        assert_eq!(last.window, Window::new(4, 4, 3, 1));
        assert_eq!(last.shape(), (1, 1, 3));
        assert_eq!(last.data[[0, 0, 0]], 244.0);
        assert!(view.chunk(12).is_none());
    }

    #[test]
    fn test_chunks_cover_every_pixel_once() {
        let array = sample();
        let view = ChunkedView::new(&array, (1, 3, 3)).unwrap();
        let covered: usize = view.iter().map(|c| c.data.len()).sum();
        assert_eq!(covered, array.len());
        let total: f64 = view.iter().map(|c| c.data.sum()).sum();
        assert_eq!(total, array.sum());
    }

    #[test]
    fn test_zero_chunk_rejected() {
        let array = sample();
        assert!(matches!(
            ChunkedView::new(&array, (1, 0, 3)),
            Err(RasterError::InvalidTileConfig(_))
        ));
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_parallel_matches_sequential() {
        let array = sample();
        let view = ChunkedView::new(&array, (2, 2, 2)).unwrap();
        let sequential: Vec<f64> = view.iter().map(|c| c.data.sum()).collect();
        let parallel: Vec<f64> = view.par_iter().map(|c| c.data.sum()).collect();
        assert_eq!(sequential, parallel);
    }
}
