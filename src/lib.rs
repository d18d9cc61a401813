//! satraster: georeferenced raster engine for optical satellite imagery
//!
//! Loads multi-band rasters into memory together with their affine transform, CRS and
//! nodata value, and provides the operations a typical pre-processing chain needs:
//! valid-data extent detection, masking/cropping, reprojection, tiling, chunked access
//! and Landsat DN to top-of-atmosphere calibration.

pub mod types;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, GeoTransform, PixelType, Platform, RasterArray, RasterError, RasterResult, Window,
};

pub use crate::core::{
    lookup_bands, tile_windows, CalibrationOptions, CalibrationRecord, ChunkedView, MaskGeometry,
    MaskOptions, RasterImage, TileIter, WarpOptions,
};
pub use io::{MtlDocument, WriteOptions};
