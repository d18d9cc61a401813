//! I/O modules for reading and writing rasters and scene metadata

pub mod mtl;
pub mod raster_io;

pub use mtl::{MtlDocument, MtlGroup, MtlValue};
pub use raster_io::{open_dataset, read_dataset_array, read_dataset_info, write_raster, DatasetInfo, WriteOptions};
