//! Core raster processing modules

pub mod bands;
pub mod calibrate;
pub mod chunks;
pub mod masking;
pub mod raster;
pub mod tiling;
pub mod valid_region;
pub mod warp;

// Re-export main types
pub use bands::{lookup_band, lookup_bands};
pub use calibrate::{
    radiometric_model, BandCalibration, BandPlan, CalibrationOptions, CalibrationRecord, LandsatModel,
    PrecorrectedModel, RadiometricModel, TemperatureScale,
};
pub use chunks::{Chunk, ChunkIter, ChunkedView};
pub use masking::{MaskGeometry, MaskOptions};
pub use raster::{matches_nodata, RasterImage};
pub use tiling::{tile_windows, TileIter};
pub use valid_region::valid_data_window;
pub use warp::{ResamplingMethod, WarpOptions};
