use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pixel grid shared by every algorithm: (bands, rows, cols)
pub type RasterArray = Array3<f64>;

/// Tolerance (in pixels) under which fractional pixel positions snap to the grid
pub const PIXEL_SNAP_TOLERANCE: f64 = 1e-6;

/// Satellite platforms known to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Sentinel1,
    Sentinel2,
    Sentinel3,
    Landsat5,
    Landsat7,
    Landsat8,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Sentinel1 => write!(f, "Sentinel-1"),
            Platform::Sentinel2 => write!(f, "Sentinel-2"),
            Platform::Sentinel3 => write!(f, "Sentinel-3"),
            Platform::Landsat5 => write!(f, "Landsat-5"),
            Platform::Landsat7 => write!(f, "Landsat-7"),
            Platform::Landsat8 => write!(f, "Landsat-8"),
        }
    }
}

impl FromStr for Platform {
    type Err = RasterError;

    /// Accepts "Landsat-8", "landsat8", "LANDSAT_8", "Sentinel-2" and similar spellings
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "sentinel1" | "s1" => Ok(Platform::Sentinel1),
            "sentinel2" | "s2" => Ok(Platform::Sentinel2),
            "sentinel3" | "s3" => Ok(Platform::Sentinel3),
            "landsat5" | "lt05" | "l5" => Ok(Platform::Landsat5),
            "landsat7" | "le07" | "l7" => Ok(Platform::Landsat7),
            "landsat8" | "lc08" | "l8" => Ok(Platform::Landsat8),
            _ => Err(RasterError::UnsupportedPlatform(s.to_string())),
        }
    }
}

/// Storage data type of a raster band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelType {
    UInt8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelType::UInt8 => "uint8",
            PixelType::UInt16 => "uint16",
            PixelType::Int16 => "int16",
            PixelType::UInt32 => "uint32",
            PixelType::Int32 => "int32",
            PixelType::Float32 => "float32",
            PixelType::Float64 => "float64",
        };
        write!(f, "{}", name)
    }
}

impl PixelType {
    pub fn is_integer(&self) -> bool {
        !matches!(self, PixelType::Float32 | PixelType::Float64)
    }
}

impl FromStr for PixelType {
    type Err = RasterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uint8" | "byte" => Ok(PixelType::UInt8),
            "uint16" => Ok(PixelType::UInt16),
            "int16" => Ok(PixelType::Int16),
            "uint32" => Ok(PixelType::UInt32),
            "int32" => Ok(PixelType::Int32),
            "float32" => Ok(PixelType::Float32),
            "float64" => Ok(PixelType::Float64),
            other => Err(RasterError::Processing(format!("Unsupported pixel type: {}", other))),
        }
    }
}

/// Geospatial bounding box (minx, miny, maxx, maxy)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BoundingBox {
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self { minx, miny, maxx, maxy }
    }

    /// Degenerate box collapsed onto a single coordinate
    pub fn point(x: f64, y: f64) -> Self {
        Self::new(x, y, x, y)
    }

    pub fn as_tuple(&self) -> (f64, f64, f64, f64) {
        (self.minx, self.miny, self.maxx, self.maxy)
    }

    pub fn width(&self) -> f64 {
        self.maxx - self.minx
    }

    pub fn height(&self) -> f64 {
        self.maxy - self.miny
    }

    pub fn is_finite(&self) -> bool {
        self.minx.is_finite() && self.miny.is_finite() && self.maxx.is_finite() && self.maxy.is_finite()
    }

    /// True if `other` lies completely inside this box (edges included)
    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.minx >= self.minx
            && other.maxx <= self.maxx
            && other.miny >= self.miny
            && other.maxy <= self.maxy
    }

    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let minx = self.minx.max(other.minx);
        let miny = self.miny.max(other.miny);
        let maxx = self.maxx.min(other.maxx);
        let maxy = self.maxy.min(other.maxy);
        if minx <= maxx && miny <= maxy {
            Some(BoundingBox::new(minx, miny, maxx, maxy))
        } else {
            None
        }
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            self.minx.min(other.minx),
            self.miny.min(other.miny),
            self.maxx.max(other.maxx),
            self.maxy.max(other.maxy),
        )
    }

    /// Envelope of a set of (x, y) coordinates
    pub fn from_points<I: IntoIterator<Item = (f64, f64)>>(points: I) -> Option<BoundingBox> {
        let mut iter = points.into_iter();
        let (x0, y0) = iter.next()?;
        let mut bbox = BoundingBox::point(x0, y0);
        for (x, y) in iter {
            bbox.minx = bbox.minx.min(x);
            bbox.miny = bbox.miny.min(y);
            bbox.maxx = bbox.maxx.max(x);
            bbox.maxy = bbox.maxy.max(y);
        }
        Some(bbox)
    }
}

impl From<(f64, f64, f64, f64)> for BoundingBox {
    fn from(t: (f64, f64, f64, f64)) -> Self {
        BoundingBox::new(t.0, t.1, t.2, t.3)
    }
}

impl From<BoundingBox> for (f64, f64, f64, f64) {
    fn from(b: BoundingBox) -> Self {
        b.as_tuple()
    }
}

/// Geospatial transformation parameters (GDAL coefficient order)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square or rectangular pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Pixel (col, row) to geographic (x, y)
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    pub fn determinant(&self) -> f64 {
        self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y
    }

    /// Inverse mapping, geographic (x, y) to fractional pixel (col, row)
    pub fn invert(&self) -> RasterResult<InverseGeoTransform> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return Err(RasterError::Construction(format!(
                "Geotransform {:?} is not invertible",
                self.to_gdal()
            )));
        }
        Ok(InverseGeoTransform {
            forward: *self,
            inv_det: 1.0 / det,
        })
    }

    /// Transform of the grid whose origin is pixel (col, row) of this one
    pub fn shifted(&self, col: f64, row: f64) -> GeoTransform {
        let (x, y) = self.apply(col, row);
        GeoTransform {
            top_left_x: x,
            top_left_y: y,
            ..*self
        }
    }

    /// Absolute pixel size along x and y
    pub fn resolution(&self) -> (f64, f64) {
        (
            self.pixel_width.hypot(self.rotation_y),
            self.rotation_x.hypot(self.pixel_height),
        )
    }

    /// Footprint of a `width` x `height` pixel block starting at (col, row)
    pub fn footprint(&self, col: f64, row: f64, width: f64, height: f64) -> BoundingBox {
        let corners = [
            self.apply(col, row),
            self.apply(col + width, row),
            self.apply(col, row + height),
            self.apply(col + width, row + height),
        ];
        // four corners are always present
        BoundingBox::from_points(corners).unwrap_or_else(|| BoundingBox::point(self.top_left_x, self.top_left_y))
    }
}

/// Inverse affine of a [`GeoTransform`]
#[derive(Debug, Clone, Copy)]
pub struct InverseGeoTransform {
    forward: GeoTransform,
    inv_det: f64,
}

impl InverseGeoTransform {
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let gt = &self.forward;
        let dx = x - gt.top_left_x;
        let dy = y - gt.top_left_y;
        (
            (gt.pixel_height * dx - gt.rotation_x * dy) * self.inv_det,
            (gt.pixel_width * dy - gt.rotation_y * dx) * self.inv_det,
        )
    }
}

/// Rectangular pixel-space region used for tiled processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn new(col_off: usize, row_off: usize, width: usize, height: usize) -> Self {
        Self { col_off, row_off, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn col_end(&self) -> usize {
        self.col_off + self.width
    }

    pub fn row_end(&self) -> usize {
        self.row_off + self.height
    }

    /// Transform whose origin is this window's top-left corner
    pub fn transform(&self, transform: &GeoTransform) -> GeoTransform {
        transform.shifted(self.col_off as f64, self.row_off as f64)
    }

    /// Geographic footprint of the window's pixel corners
    pub fn bounds(&self, transform: &GeoTransform) -> BoundingBox {
        transform.footprint(
            self.col_off as f64,
            self.row_off as f64,
            self.width as f64,
            self.height as f64,
        )
    }

    pub fn fits_within(&self, width: usize, height: usize) -> bool {
        self.col_end() <= width && self.row_end() <= height
    }
}

/// Error types for raster processing
#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Invalid raster construction: {0}")]
    Construction(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Unknown wavelength '{name}' for platform {platform}")]
    UnknownWavelength { platform: Platform, name: String },

    #[error("Platform not supported: {0}")]
    UnsupportedPlatform(String),

    #[error("Unsupported CRS '{crs}': {reason}")]
    UnsupportedCrs { crs: String, reason: String },

    #[error("Calibration metadata required for platform {0}")]
    MissingMetadata(Platform),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Invalid tile configuration: {0}")]
    InvalidTileConfig(String),

    #[error("Window {window:?} exceeds raster of {width}x{height} pixels")]
    WindowOutOfBounds {
        window: Window,
        width: usize,
        height: usize,
    },

    #[error("Band count mismatch: {0}")]
    BandCountMismatch(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for raster operations
pub type RasterResult<T> = Result<T, RasterError>;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_geotransform_roundtrip() {
        let gt = GeoTransform::from_gdal([11.5, 0.001, 0.0, 51.5, 0.0, -0.001]);
        let inv = gt.invert().unwrap();
        let (x, y) = gt.apply(12.0, 7.0);
        let (col, row) = inv.apply(x, y);
        assert_relative_eq!(col, 12.0, epsilon = 1e-9);
        assert_relative_eq!(row, 7.0, epsilon = 1e-9);
        assert_eq!(gt.to_gdal(), [11.5, 0.001, 0.0, 51.5, 0.0, -0.001]);
    }

    #[test]
    fn test_rotated_geotransform_inverse() {
        let gt = GeoTransform::from_gdal([100.0, 2.0, 0.5, 200.0, 0.25, -2.0]);
        let inv = gt.invert().unwrap();
        let (x, y) = gt.apply(3.5, 9.25);
        let (col, row) = inv.apply(x, y);
        assert_relative_eq!(col, 3.5, epsilon = 1e-9);
        assert_relative_eq!(row, 9.25, epsilon = 1e-9);
    }

    #[test]
    fn test_degenerate_geotransform() {
        let gt = GeoTransform::from_gdal([0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(matches!(gt.invert(), Err(RasterError::Construction(_))));
    }

    #[test]
    fn test_window_bounds() {
        let gt = GeoTransform::north_up(10.0, 50.0, 0.5, 0.5);
        let window = Window::new(2, 4, 3, 2);
        let bounds = window.bounds(&gt);
        assert_eq!(bounds, BoundingBox::new(11.0, 47.0, 12.5, 48.0));
        assert_eq!(window.transform(&gt).top_left_x, 11.0);
        assert_eq!(window.transform(&gt).top_left_y, 48.0);
    }

    #[test]
    fn test_bbox_set_operations() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, -5.0, 15.0, 5.0);
        assert_eq!(a.intersection(&b), Some(BoundingBox::new(5.0, 0.0, 10.0, 5.0)));
        assert_eq!(a.union(&b), BoundingBox::new(0.0, -5.0, 15.0, 10.0));
        assert!(a.union(&b).contains(&a));
        assert_eq!(a.intersection(&BoundingBox::new(20.0, 20.0, 30.0, 30.0)), None);
    }

    #[test]
    fn test_platform_parsing() {
        assert_eq!("Landsat-8".parse::<Platform>().unwrap(), Platform::Landsat8);
        assert_eq!("LANDSAT_7".parse::<Platform>().unwrap(), Platform::Landsat7);
        assert_eq!("sentinel2".parse::<Platform>().unwrap(), Platform::Sentinel2);
        assert!(matches!(
            "Landsat-9".parse::<Platform>(),
            Err(RasterError::UnsupportedPlatform(_))
        ));
        assert_eq!(Platform::Landsat5.to_string(), "Landsat-5");
    }

    #[test]
    fn test_pixel_type_names() {
        for pixel_type in [PixelType::UInt8, PixelType::Int16, PixelType::Float32, PixelType::Float64] {
            assert_eq!(pixel_type.to_string().parse::<PixelType>().unwrap(), pixel_type);
        }
        assert_eq!("Byte".parse::<PixelType>().unwrap(), PixelType::UInt8);
        assert!("complex64".parse::<PixelType>().is_err());
    }
}
