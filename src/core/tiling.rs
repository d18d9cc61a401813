use crate::core::raster::RasterImage;
use crate::types::{BoundingBox, RasterError, RasterResult, Window};
use ndarray::{s, ArrayView3};
use std::iter::FusedIterator;

/// Lazy, row-major sequence of tile windows over a raster grid
///
/// Windows start every `width - overlap` columns and `height - overlap` rows;
/// trailing windows are clamped to the raster edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileIter {
    raster_width: usize,
    raster_height: usize,
    tile_width: usize,
    tile_height: usize,
    step_x: usize,
    step_y: usize,
    cols: usize,
    rows: usize,
    next: usize,
}

impl TileIter {
    /// Number of tile columns
    pub fn columns(&self) -> usize {
        self.cols
    }

    /// Number of tile rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Total number of windows, regardless of iteration progress
    pub fn total(&self) -> usize {
        self.cols * self.rows
    }

    /// Window at row-major position `index`
    pub fn window_at(&self, index: usize) -> Option<Window> {
        if index >= self.total() {
            return None;
        }
        let col_off = (index % self.cols) * self.step_x;
        let row_off = (index / self.cols) * self.step_y;
        let width = self.tile_width.min(self.raster_width - col_off);
        let height = self.tile_height.min(self.raster_height - row_off);
        Some(Window::new(col_off, row_off, width, height))
    }
}

impl Iterator for TileIter {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        let window = self.window_at(self.next)?;
        self.next += 1;
        Some(window)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total().saturating_sub(self.next);
        (remaining, Some(remaining))
    }

    fn nth(&mut self, n: usize) -> Option<Window> {
        self.next = self.next.saturating_add(n);
        self.next()
    }
}

impl ExactSizeIterator for TileIter {}

impl FusedIterator for TileIter {}

/// Tile windows for a `raster_width` x `raster_height` grid
pub fn tile_windows(
    raster_width: usize,
    raster_height: usize,
    width: usize,
    height: usize,
    overlap: usize,
) -> RasterResult<TileIter> {
    if width == 0 || height == 0 {
        return Err(RasterError::InvalidTileConfig(format!(
            "Tile size must be positive, got {}x{}",
            width, height
        )));
    }
    if overlap >= width || overlap >= height {
        return Err(RasterError::InvalidTileConfig(format!(
            "Overlap {} must be smaller than tile size {}x{}",
            overlap, width, height
        )));
    }

    let step_x = width - overlap;
    let step_y = height - overlap;
    let cols = raster_width.div_ceil(step_x);
    let rows = raster_height.div_ceil(step_y);

    Ok(TileIter {
        raster_width,
        raster_height,
        tile_width: width,
        tile_height: height,
        step_x,
        step_y,
        cols,
        rows,
        next: 0,
    })
}

impl RasterImage {
    /// Tile windows covering this raster
    pub fn get_tiles(&self, width: usize, height: usize, overlap: usize) -> RasterResult<TileIter> {
        let tiles = tile_windows(self.width(), self.height(), width, height, overlap)?;
        log::debug!(
            "Tiling {}x{} raster into {} windows of {}x{} (overlap {})",
            self.width(),
            self.height(),
            tiles.len(),
            width,
            height,
            overlap
        );
        Ok(tiles)
    }

    /// All bands within `window` as a borrowed view, plus the window's bounds
    pub fn get_subset(&self, window: &Window) -> RasterResult<(ArrayView3<'_, f64>, BoundingBox)> {
        if !window.fits_within(self.width(), self.height()) {
            return Err(RasterError::WindowOutOfBounds {
                window: *window,
                width: self.width(),
                height: self.height(),
            });
        }

        let view = self.array().slice(s![
            ..,
            window.row_off..window.row_end(),
            window.col_off..window.col_end()
        ]);
        Ok((view, window.bounds(self.transform())))
    }
}
