use crate::types::{GeoTransform, PixelType, RasterArray, RasterError, RasterResult};
use gdal::raster::{Buffer, GdalDataType, GdalType, RasterCreationOption};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::{s, Array2, Array3};
use num_traits::NumCast;
use std::path::Path;

/// Georeferencing read from an open dataset
#[derive(Debug, Clone)]
pub struct DatasetInfo {
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub transform: GeoTransform,
    pub crs: String,
    pub nodata: Option<f64>,
    pub pixel_type: PixelType,
}

/// Options for writing a raster back to disk
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// GDAL driver short name
    pub driver: String,
    /// Internal tiling (GeoTIFF `TILED=YES`)
    pub tiled: bool,
    /// Compression codec, e.g. "LZW" or "DEFLATE"
    pub compress: Option<String>,
    /// Storage type; defaults to the raster's own pixel type
    pub pixel_type: Option<PixelType>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            driver: "GTiff".to_string(),
            tiled: true,
            compress: None,
            pixel_type: None,
        }
    }
}

/// Normalised identifier for a spatial reference ("EPSG:4326" when an authority is known)
pub fn crs_identifier(srs: &SpatialRef) -> RasterResult<String> {
    if let (Ok(name), Ok(code)) = (srs.auth_name(), srs.auth_code()) {
        return Ok(format!("{}:{}", name, code));
    }
    Ok(srs.to_wkt()?)
}

fn pixel_type_of(band_type: GdalDataType) -> PixelType {
    match band_type {
        GdalDataType::UInt8 => PixelType::UInt8,
        GdalDataType::UInt16 => PixelType::UInt16,
        GdalDataType::Int16 => PixelType::Int16,
        GdalDataType::UInt32 => PixelType::UInt32,
        GdalDataType::Int32 => PixelType::Int32,
        GdalDataType::Float32 => PixelType::Float32,
        _ => PixelType::Float64,
    }
}

/// Read size, transform, CRS, nodata and storage type of an open dataset
pub fn read_dataset_info(dataset: &Dataset) -> RasterResult<DatasetInfo> {
    let (width, height) = dataset.raster_size();
    let band_count = dataset.raster_count() as usize;
    if band_count == 0 {
        return Err(RasterError::Construction("Dataset has no raster bands".to_string()));
    }

    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let crs = match dataset.spatial_ref() {
        Ok(srs) => crs_identifier(&srs)?,
        Err(e) => {
            log::warn!("Dataset has no usable spatial reference: {}", e);
            String::new()
        }
    };

    let first_band = dataset.rasterband(1)?;
    let nodata = first_band.no_data_value();
    let pixel_type = pixel_type_of(first_band.band_type());

    log::debug!(
        "Dataset: {}x{} pixels, {} bands, {} ({}), nodata {:?}",
        width,
        height,
        band_count,
        crs,
        pixel_type,
        nodata
    );

    Ok(DatasetInfo {
        width,
        height,
        band_count,
        transform,
        crs,
        nodata,
        pixel_type,
    })
}

/// Read every band of a dataset into a (bands, rows, cols) array
pub fn read_dataset_array(dataset: &Dataset) -> RasterResult<RasterArray> {
    let (width, height) = dataset.raster_size();
    let band_count = dataset.raster_count() as usize;
    let mut array = Array3::<f64>::zeros((band_count, height, width));

    for band_idx in 0..band_count {
        let rasterband = dataset.rasterband(band_idx as isize + 1)?;
        let band_data = rasterband.read_as::<f64>((0, 0), (width, height), (width, height), None)?;
        let band_array = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| RasterError::Processing(format!("Failed to reshape band {}: {}", band_idx + 1, e)))?;
        array.slice_mut(s![band_idx, .., ..]).assign(&band_array);
    }

    Ok(array)
}

/// Open a raster file and read all of it into memory
pub fn open_dataset<P: AsRef<Path>>(path: P) -> RasterResult<(Dataset, DatasetInfo, RasterArray)> {
    log::info!("Opening raster: {}", path.as_ref().display());
    let dataset = Dataset::open(path.as_ref())?;
    let info = read_dataset_info(&dataset)?;
    let array = read_dataset_array(&dataset)?;
    Ok((dataset, info, array))
}

/// Write a georeferenced array to `output_path`
pub fn write_raster<P: AsRef<Path>>(
    array: &RasterArray,
    transform: &GeoTransform,
    crs: &str,
    nodata: Option<f64>,
    pixel_type: PixelType,
    output_path: P,
    options: &WriteOptions,
) -> RasterResult<()> {
    log::info!(
        "Writing {} raster ({} bands) to {}",
        pixel_type,
        array.dim().0,
        output_path.as_ref().display()
    );

    let integral = pixel_type.is_integer();
    match pixel_type {
        PixelType::UInt8 => write_typed::<u8, _>(array, transform, crs, nodata, integral, output_path, options),
        PixelType::UInt16 => write_typed::<u16, _>(array, transform, crs, nodata, integral, output_path, options),
        PixelType::Int16 => write_typed::<i16, _>(array, transform, crs, nodata, integral, output_path, options),
        PixelType::UInt32 => write_typed::<u32, _>(array, transform, crs, nodata, integral, output_path, options),
        PixelType::Int32 => write_typed::<i32, _>(array, transform, crs, nodata, integral, output_path, options),
        PixelType::Float32 => write_typed::<f32, _>(array, transform, crs, nodata, integral, output_path, options),
        PixelType::Float64 => write_typed::<f64, _>(array, transform, crs, nodata, integral, output_path, options),
    }
}

/// Cast every band to `T`, rejecting values the storage type cannot hold exactly
fn cast_bands<T: NumCast + Copy>(array: &RasterArray, integral: bool) -> RasterResult<Vec<Vec<T>>> {
    let mut bands = Vec::with_capacity(array.dim().0);
    for (band_idx, band) in array.outer_iter().enumerate() {
        let mut flat_data: Vec<T> = Vec::with_capacity(band.len());
        for &value in band.iter() {
            let cast = if integral && value.fract() != 0.0 {
                None
            } else {
                <T as NumCast>::from(value)
            };
            let cast = cast.ok_or_else(|| {
                RasterError::Processing(format!(
                    "Value {} in band {} does not fit the output data type",
                    value,
                    band_idx + 1
                ))
            })?;
            flat_data.push(cast);
        }
        bands.push(flat_data);
    }
    Ok(bands)
}

fn write_typed<T, P>(
    array: &RasterArray,
    transform: &GeoTransform,
    crs: &str,
    nodata: Option<f64>,
    integral: bool,
    output_path: P,
    options: &WriteOptions,
) -> RasterResult<()>
where
    T: GdalType + NumCast + Copy,
    P: AsRef<Path>,
{
    // validate before anything touches the disk
    let band_data = cast_bands::<T>(array, integral)?;
    let srs = if crs.is_empty() {
        None
    } else {
        Some(SpatialRef::from_definition(crs).map_err(|e| RasterError::UnsupportedCrs {
            crs: crs.to_string(),
            reason: e.to_string(),
        })?)
    };

    let driver = DriverManager::get_driver_by_name(&options.driver)?;
    let (bands, height, width) = array.dim();

    let compress = options.compress.as_deref().unwrap_or("NONE");
    let mut creation_options = vec![RasterCreationOption {
        key: "COMPRESS",
        value: compress,
    }];
    if options.tiled {
        creation_options.push(RasterCreationOption {
            key: "TILED",
            value: "YES",
        });
    }

    let mut dataset = driver.create_with_band_type_with_options::<T, _>(
        output_path.as_ref(),
        width as isize,
        height as isize,
        bands as isize,
        &creation_options,
    )?;

    dataset.set_geo_transform(&transform.to_gdal())?;
    if let Some(srs) = srs {
        dataset.set_spatial_ref(&srs)?;
    }

    for (band_idx, flat_data) in band_data.into_iter().enumerate() {
        let mut rasterband = dataset.rasterband(band_idx as isize + 1)?;
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;
        if nodata.is_some() {
            rasterband.set_no_data_value(nodata)?;
        }
    }

    log::debug!("Raster written: {}x{}x{}", bands, height, width);
    Ok(())
}
