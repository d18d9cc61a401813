use crate::io::raster_io::{self, WriteOptions};
use crate::types::{BoundingBox, GeoTransform, PixelType, RasterArray, RasterError, RasterResult};
use gdal::Dataset;
use ndarray::ArrayViewMut3;
use std::fmt;
use std::path::Path;

/// In-memory georeferenced raster
///
/// Owns the pixel array (bands, rows, cols), its affine transform, CRS and nodata value.
/// When loaded from a file the GDAL dataset handle stays open until [`RasterImage::close`]
/// is called or the raster is dropped.
pub struct RasterImage {
    array: RasterArray,
    transform: GeoTransform,
    crs: String,
    nodata: Option<f64>,
    pixel_type: PixelType,
    dataset: Option<Dataset>,
}

impl fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterImage")
            .field("shape", &self.array.dim())
            .field("transform", &self.transform)
            .field("crs", &self.crs)
            .field("nodata", &self.nodata)
            .field("pixel_type", &self.pixel_type)
            .field("has_dataset", &self.dataset.is_some())
            .finish()
    }
}

impl Clone for RasterImage {
    /// Clones the raster state; the clone does not share the dataset handle
    fn clone(&self) -> Self {
        Self {
            array: self.array.clone(),
            transform: self.transform,
            crs: self.crs.clone(),
            nodata: self.nodata,
            pixel_type: self.pixel_type,
            dataset: None,
        }
    }
}

impl RasterImage {
    /// Open a raster file and read all bands into memory
    pub fn open<P: AsRef<Path>>(path: P) -> RasterResult<Self> {
        let (dataset, info, array) = raster_io::open_dataset(path)?;
        let mut raster = Self::from_parts(array, info.transform, info.crs, info.nodata)?;
        raster.pixel_type = info.pixel_type;
        raster.dataset = Some(dataset);
        Ok(raster)
    }

    /// Wrap an already-open dataset together with its pixel array
    ///
    /// The array must have one plane per dataset band and the dataset's raster size.
    pub fn from_dataset(dataset: Dataset, array: RasterArray) -> RasterResult<Self> {
        let info = raster_io::read_dataset_info(&dataset)?;
        let (bands, height, width) = array.dim();
        if (bands, height, width) != (info.band_count, info.height, info.width) {
            return Err(RasterError::Construction(format!(
                "Array shape {:?} does not match dataset shape {:?}",
                (bands, height, width),
                (info.band_count, info.height, info.width)
            )));
        }

        let mut raster = Self::from_parts(array, info.transform, info.crs, info.nodata)?;
        raster.pixel_type = info.pixel_type;
        raster.dataset = Some(dataset);
        Ok(raster)
    }

    /// Build a raster from explicit parts without any file backing
    pub fn from_parts(
        array: RasterArray,
        transform: GeoTransform,
        crs: impl Into<String>,
        nodata: Option<f64>,
    ) -> RasterResult<Self> {
        let (bands, height, width) = array.dim();
        if bands == 0 || height == 0 || width == 0 {
            return Err(RasterError::Construction(format!(
                "Raster array must not be empty, got shape {:?}",
                (bands, height, width)
            )));
        }
        transform.invert()?;

        Ok(Self {
            array,
            transform,
            crs: crs.into(),
            nodata,
            pixel_type: PixelType::Float64,
            dataset: None,
        })
    }

    /// Snapshot sharing this raster's CRS-independent settings but new geometry
    pub(crate) fn with_geometry(&self, array: RasterArray, transform: GeoTransform, crs: String) -> RasterImage {
        RasterImage {
            array,
            transform,
            crs,
            nodata: self.nodata,
            pixel_type: self.pixel_type,
            dataset: None,
        }
    }

    /// Rebind to a snapshot: array, transform, CRS and nodata change together
    pub(crate) fn replace_geometry(&mut self, snapshot: RasterImage) {
        let RasterImage {
            array,
            transform,
            crs,
            nodata,
            pixel_type,
            dataset: _,
        } = snapshot;
        self.array = array;
        self.transform = transform;
        self.crs = crs;
        self.nodata = nodata;
        self.pixel_type = pixel_type;
    }

    pub(crate) fn set_pixel_type(&mut self, pixel_type: PixelType) {
        self.pixel_type = pixel_type;
    }

    pub(crate) fn replace_array(&mut self, array: RasterArray, pixel_type: PixelType) {
        debug_assert_eq!((array.dim().1, array.dim().2), (self.height(), self.width()));
        self.array = array;
        self.pixel_type = pixel_type;
    }

    pub(crate) fn set_nodata_value(&mut self, nodata: Option<f64>) {
        self.nodata = nodata;
    }

    pub fn array(&self) -> &RasterArray {
        &self.array
    }

    /// Mutable pixel access; the shape cannot change through this view
    pub fn array_mut(&mut self) -> ArrayViewMut3<'_, f64> {
        self.array.view_mut()
    }

    pub fn into_array(self) -> RasterArray {
        let RasterImage { array, .. } = self;
        array
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn crs(&self) -> &str {
        &self.crs
    }

    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    pub fn set_nodata(&mut self, nodata: Option<f64>) {
        self.set_nodata_value(nodata);
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn band_count(&self) -> usize {
        self.array.dim().0
    }

    pub fn height(&self) -> usize {
        self.array.dim().1
    }

    pub fn width(&self) -> usize {
        self.array.dim().2
    }

    /// The dataset handle the raster was loaded from, if still open
    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_ref()
    }

    /// Geographic extent derived from transform and shape
    pub fn bounds(&self) -> BoundingBox {
        self.transform
            .footprint(0.0, 0.0, self.width() as f64, self.height() as f64)
    }

    /// True if `value` is this raster's nodata sentinel (NaN matches NaN)
    pub fn is_nodata(&self, value: f64) -> bool {
        matches_nodata(value, self.nodata)
    }

    /// Write the raster to disk, preserving transform, CRS and nodata
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P, options: &WriteOptions) -> RasterResult<()> {
        let pixel_type = options.pixel_type.unwrap_or(self.pixel_type);
        raster_io::write_raster(
            &self.array,
            &self.transform,
            &self.crs,
            self.nodata,
            pixel_type,
            path,
            options,
        )
    }

    /// Drop the dataset handle while keeping the in-memory state
    pub fn release_dataset(&mut self) {
        if let Some(dataset) = self.dataset.take() {
            log::debug!("Closing dataset handle");
            drop(dataset);
        }
    }

    /// Release the underlying dataset handle, returning the in-memory state
    pub fn close(mut self) -> RasterImage {
        self.release_dataset();
        self
    }
}

/// Nodata comparison used by every scanner (NaN matches NaN)
pub fn matches_nodata(value: f64, nodata: Option<f64>) -> bool {
    match nodata {
        Some(nd) if nd.is_nan() => value.is_nan(),
        Some(nd) => value == nd,
        None => false,
    }
}
