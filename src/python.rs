//! Python bindings (`_core` extension module)

use crate::core::{CalibrationRecord, MaskGeometry, RasterImage};
use crate::io::WriteOptions;
use crate::types::{GeoTransform, PixelType, Platform, RasterError, Window};
use numpy::{PyArray3, PyReadonlyArray3, ToPyArray};
use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;

fn to_py_err(err: RasterError) -> PyErr {
    match err {
        RasterError::Io(e) => PyIOError::new_err(e.to_string()),
        RasterError::Gdal(e) => PyRuntimeError::new_err(e.to_string()),
        RasterError::Processing(msg) => PyRuntimeError::new_err(msg),
        other => PyValueError::new_err(other.to_string()),
    }
}

fn mask_geometry(bbox: &PyAny) -> PyResult<MaskGeometry> {
    if let Ok(wkt) = bbox.extract::<String>() {
        return MaskGeometry::from_wkt(&wkt).map_err(to_py_err);
    }
    // shapely geometries
    if bbox.hasattr("wkt")? {
        let wkt: String = bbox.getattr("wkt")?.extract()?;
        return MaskGeometry::from_wkt(&wkt).map_err(to_py_err);
    }
    if let Ok(values) = bbox.extract::<Vec<f64>>() {
        return MaskGeometry::try_from(values.as_slice()).map_err(to_py_err);
    }
    let ring: Vec<(f64, f64)> = bbox
        .extract()
        .map_err(|_| PyValueError::new_err("bbox must be 4 numbers, a coordinate ring or a polygon"))?;
    MaskGeometry::try_from(ring.as_slice()).map_err(to_py_err)
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyImage>()?;
    Ok(())
}

/// Python wrapper for RasterImage
#[pyclass(name = "Image", unsendable)]
struct PyImage {
    inner: RasterImage,
}

#[pymethods]
impl PyImage {
    #[new]
    #[pyo3(signature = (path=None, arr=None, transform=None, crs=None, nodata=None))]
    fn new(
        path: Option<String>,
        arr: Option<PyReadonlyArray3<f64>>,
        transform: Option<[f64; 6]>,
        crs: Option<String>,
        nodata: Option<f64>,
    ) -> PyResult<Self> {
        let inner = match (path, arr) {
            (Some(path), None) => RasterImage::open(&path).map_err(to_py_err)?,
            (None, Some(arr)) => {
                let (Some(transform), Some(crs)) = (transform, crs) else {
                    return Err(PyValueError::new_err("arr requires transform and crs"));
                };
                RasterImage::from_parts(arr.as_array().to_owned(), GeoTransform::from_gdal(transform), crs, nodata)
                    .map_err(to_py_err)?
            }
            _ => return Err(PyValueError::new_err("Provide either path or arr")),
        };
        Ok(PyImage { inner })
    }

    #[getter]
    fn arr<'py>(&self, py: Python<'py>) -> &'py PyArray3<f64> {
        self.inner.array().to_pyarray(py)
    }

    #[getter]
    fn crs(&self) -> String {
        self.inner.crs().to_string()
    }

    /// Affine transform in GDAL order
    #[getter]
    fn transform(&self) -> [f64; 6] {
        self.inner.transform().to_gdal()
    }

    #[getter]
    fn nodata(&self) -> Option<f64> {
        self.inner.nodata()
    }

    #[getter]
    fn bounds(&self) -> (f64, f64, f64, f64) {
        self.inner.bounds().as_tuple()
    }

    #[pyo3(signature = (nodata=None))]
    fn get_valid_data_bbox(&self, nodata: Option<f64>) -> (f64, f64, f64, f64) {
        self.inner.get_valid_data_bbox(nodata).as_tuple()
    }

    /// Crop to `bbox`: (minx, miny, maxx, maxy), a polygon ring, WKT, or any object with a `.wkt`
    #[pyo3(signature = (bbox, pad=false, nodata_fill=None))]
    fn mask_image(&mut self, bbox: &PyAny, pad: bool, nodata_fill: Option<f64>) -> PyResult<()> {
        let geometry = mask_geometry(bbox)?;
        self.inner
            .mask_image(geometry, pad, nodata_fill)
            .map_err(to_py_err)
    }

    #[pyo3(signature = (dst_crs, resolution=None))]
    fn warp(&mut self, dst_crs: &str, resolution: Option<f64>) -> PyResult<()> {
        self.inner.warp(dst_crs, resolution).map_err(to_py_err)
    }

    /// Tile windows as (col_off, row_off, width, height)
    #[pyo3(signature = (width=256, height=256, overlap=0))]
    fn get_tiles(&self, width: usize, height: usize, overlap: usize) -> PyResult<Vec<(usize, usize, usize, usize)>> {
        let tiles = self.inner.get_tiles(width, height, overlap).map_err(to_py_err)?;
        Ok(tiles
            .map(|w| (w.col_off, w.row_off, w.width, w.height))
            .collect())
    }

    fn get_subset<'py>(
        &self,
        py: Python<'py>,
        tile: (usize, usize, usize, usize),
    ) -> PyResult<(&'py PyArray3<f64>, (f64, f64, f64, f64))> {
        let window = Window::new(tile.0, tile.1, tile.2, tile.3);
        let (view, bounds) = self.inner.get_subset(&window).map_err(to_py_err)?;
        Ok((view.to_pyarray(py), bounds.as_tuple()))
    }

    #[pyo3(signature = (platform, mtl_file=None, wavelengths=None))]
    fn dn2toa(&mut self, platform: &str, mtl_file: Option<String>, wavelengths: Option<Vec<String>>) -> PyResult<()> {
        let platform: Platform = platform.parse().map_err(to_py_err)?;
        let record = mtl_file
            .map(CalibrationRecord::from_mtl_file)
            .transpose()
            .map_err(to_py_err)?;
        let names: Option<Vec<&str>> = wavelengths
            .as_ref()
            .map(|w| w.iter().map(String::as_str).collect());
        self.inner
            .dn2toa(platform, record.as_ref(), names.as_deref())
            .map_err(to_py_err)
    }

    #[pyo3(signature = (path, dtype=None, driver="GTiff", compress=None))]
    fn write_to_file(&self, path: &str, dtype: Option<&str>, driver: &str, compress: Option<String>) -> PyResult<()> {
        let pixel_type = dtype.map(str::parse::<PixelType>).transpose().map_err(to_py_err)?;
        let options = WriteOptions {
            driver: driver.to_string(),
            compress,
            pixel_type,
            ..Default::default()
        };
        self.inner.write_to_file(path, &options).map_err(to_py_err)
    }

    /// Release the dataset handle
    fn close(&mut self) {
        self.inner.release_dataset();
    }

    fn __repr__(&self) -> String {
        format!(
            "Image(shape={:?}, crs='{}', nodata={:?})",
            self.inner.array().dim(),
            self.inner.crs(),
            self.inner.nodata()
        )
    }
}
