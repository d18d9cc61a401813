use crate::core::raster::{matches_nodata, RasterImage};
use crate::types::{BoundingBox, Window};
use ndarray::{ArrayView3, Axis};

/// Minimal window enclosing every pixel that is valid in at least one band
///
/// With `nodata == None` every pixel is valid. When nothing is valid the window is
/// `(0, 0, 0, 0)`.
pub fn valid_data_window(array: ArrayView3<'_, f64>, nodata: Option<f64>) -> Window {
    let (_, height, width) = array.dim();
    if nodata.is_none() {
        return Window::new(0, 0, width, height);
    }

    let mut row_range: Option<(usize, usize)> = None;
    let mut col_range: Option<(usize, usize)> = None;

    for band in array.axis_iter(Axis(0)) {
        for ((row, col), &value) in band.indexed_iter() {
            if matches_nodata(value, nodata) {
                continue;
            }
            row_range = Some(match row_range {
                Some((lo, hi)) => (lo.min(row), hi.max(row)),
                None => (row, row),
            });
            col_range = Some(match col_range {
                Some((lo, hi)) => (lo.min(col), hi.max(col)),
                None => (col, col),
            });
        }
    }

    match (row_range, col_range) {
        (Some((r0, r1)), Some((c0, c1))) => Window::new(c0, r0, c1 - c0 + 1, r1 - r0 + 1),
        _ => Window::new(0, 0, 0, 0),
    }
}

impl RasterImage {
    /// Bounding box of the valid (non-nodata) pixels
    ///
    /// `nodata` overrides the raster's own nodata value. A raster without valid pixels
    /// yields a degenerate box at the transform origin.
    pub fn get_valid_data_bbox(&self, nodata: Option<f64>) -> BoundingBox {
        let nodata = nodata.or(self.nodata());
        let window = valid_data_window(self.array().view(), nodata);
        log::debug!("Valid data window (nodata {:?}): {:?}", nodata, window);
        window.bounds(self.transform())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use ndarray::Array3;

    #[test]
    fn test_window_spans_valid_pixels_across_bands() {
        let mut array = Array3::<f64>::zeros((2, 6, 8));
        array[[0, 1, 2]] = 3.0;
        array[[1, 4, 6]] = 7.0;
        let window = valid_data_window(array.view(), Some(0.0));
        assert_eq!(window, Window::new(2, 1, 5, 4));
    }

    #[test]
    fn test_no_nodata_means_full_extent() {
        let array = Array3::<f64>::zeros((1, 3, 5));
        assert_eq!(valid_data_window(array.view(), None), Window::new(0, 0, 5, 3));
    }

    #[test]
    fn test_all_nodata_is_empty_window() {
        let array = Array3::<f64>::from_elem((1, 3, 5), -9999.0);
        let window = valid_data_window(array.view(), Some(-9999.0));
        assert!(window.is_empty());
    }

    #[test]
    fn test_nan_nodata() {
        let mut array = Array3::<f64>::from_elem((1, 4, 4), f64::NAN);
        array[[0, 2, 3]] = 1.5;
        let window = valid_data_window(array.view(), Some(f64::NAN));
        assert_eq!(window, Window::new(3, 2, 1, 1));
    }

    #[test]
    fn test_bbox_falls_back_to_origin() {
        let raster = RasterImage::from_parts(
            Array3::zeros((1, 4, 4)),
            GeoTransform::north_up(11.0, 51.0, 0.1, 0.1),
            "EPSG:4326",
            Some(0.0),
        )
        .unwrap();
        assert_eq!(raster.get_valid_data_bbox(None), BoundingBox::point(11.0, 51.0));
        // override makes every zero pixel valid
        let full = raster.get_valid_data_bbox(Some(1.0));
        assert_eq!(full, raster.bounds());
    }
}
