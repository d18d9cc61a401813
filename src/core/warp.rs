use crate::core::raster::{matches_nodata, RasterImage};
use crate::io::raster_io::crs_identifier;
use crate::types::{
    BoundingBox, GeoTransform, InverseGeoTransform, PixelType, RasterArray, RasterError, RasterResult,
};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use ndarray::{s, Array3};

/// Pixel resampling used when warping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResamplingMethod {
    /// Value of the source pixel containing the target pixel centre
    #[default]
    Nearest,
    /// Distance-weighted mean of the four surrounding source pixel centres
    Bilinear,
}

/// Warp configuration
#[derive(Debug, Clone)]
pub struct WarpOptions {
    /// Target pixel size in target CRS units; computed when `None`
    pub resolution: Option<f64>,
    pub resampling: ResamplingMethod,
    /// Points sampled along each raster edge when projecting the extent
    pub densify_points: usize,
}

impl Default for WarpOptions {
    fn default() -> Self {
        Self {
            resolution: None,
            resampling: ResamplingMethod::Nearest,
            densify_points: 21,
        }
    }
}

/// Resolve a CRS definition ("EPSG:3857", WKT, PROJ string) with x/y axis order
pub fn spatial_ref(crs: &str) -> RasterResult<SpatialRef> {
    if crs.trim().is_empty() {
        return Err(RasterError::UnsupportedCrs {
            crs: crs.to_string(),
            reason: "empty CRS definition".to_string(),
        });
    }
    let srs = SpatialRef::from_definition(crs).map_err(|e| RasterError::UnsupportedCrs {
        crs: crs.to_string(),
        reason: e.to_string(),
    })?;
    srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    Ok(srs)
}

/// Pixel-edge positions (col, row) along the border of a `width` x `height` grid
fn edge_samples(width: usize, height: usize, per_edge: usize) -> Vec<(f64, f64)> {
    let n = per_edge.max(2);
    let (w, h) = (width as f64, height as f64);
    let mut points = Vec::with_capacity(n * 4);
    for i in 0..n {
        let t = i as f64 / (n - 1) as f64;
        points.push((t * w, 0.0));
        points.push((t * w, h));
        points.push((0.0, t * h));
        points.push((w, t * h));
    }
    points
}

/// Transform `xs`/`ys` in place; points GDAL cannot transform become NaN
fn transform_points(transform: &CoordTransform, xs: &mut [f64], ys: &mut [f64]) {
    let (orig_x, orig_y) = (xs.to_vec(), ys.to_vec());
    if transform.transform_coords(xs, ys, &mut []).is_ok() {
        return;
    }

    // batch failed, retry point by point
    let mut failed = 0usize;
    for i in 0..xs.len() {
        let mut x = [orig_x[i]];
        let mut y = [orig_y[i]];
        if transform.transform_coords(&mut x, &mut y, &mut []).is_ok() {
            xs[i] = x[0];
            ys[i] = y[0];
        } else {
            xs[i] = f64::NAN;
            ys[i] = f64::NAN;
            failed += 1;
        }
    }
    if failed > 0 {
        log::warn!("{} of {} points could not be transformed", failed, xs.len());
    }
}

/// Resolution preserving the pixel count along the raster diagonal
pub fn suggested_resolution(target_extent: &BoundingBox, width: usize, height: usize) -> f64 {
    let diagonal_pixels = (width as f64).hypot(height as f64);
    target_extent.width().hypot(target_extent.height()) / diagonal_pixels
}

/// Output grid (transform, width, height) covering `extent` at `resolution`
pub fn output_grid(extent: &BoundingBox, resolution: f64) -> RasterResult<(GeoTransform, usize, usize)> {
    if !(resolution > 0.0 && resolution.is_finite()) {
        return Err(RasterError::Processing(format!("Invalid target resolution {}", resolution)));
    }
    let cells = |span: f64| -> usize {
        let n = span / resolution;
        let rounded = n.round();
        let n = if (n - rounded).abs() < 1e-9 { rounded } else { n.ceil() };
        (n as usize).max(1)
    };
    let width = cells(extent.width());
    let height = cells(extent.height());
    let transform = GeoTransform::north_up(extent.minx, extent.maxy, resolution, resolution);
    Ok((transform, width, height))
}

/// Source pixel (row, col) containing fractional position (col, row)
fn sample_nearest(source: &RasterArray, col: f64, row: f64) -> Option<(usize, usize)> {
    let (_, height, width) = source.dim();
    if !(col >= 0.0 && row >= 0.0 && col < width as f64 && row < height as f64) {
        return None;
    }
    Some((row.floor() as usize, col.floor() as usize))
}

fn sample_bilinear(
    source: &RasterArray,
    nodata: Option<f64>,
    band: usize,
    col: f64,
    row: f64,
) -> Option<f64> {
    let (_, height, width) = source.dim();
    // position relative to pixel centres
    let x = col - 0.5;
    let y = row - 0.5;
    if x < 0.0 || y < 0.0 || x >= (width - 1) as f64 || y >= (height - 1) as f64 {
        return None;
    }

    let x1 = x.floor() as usize;
    let y1 = y.floor() as usize;
    let x2 = (x1 + 1).min(width - 1);
    let y2 = (y1 + 1).min(height - 1);
    let dx = x - x1 as f64;
    let dy = y - y1 as f64;

    let v11 = source[[band, y1, x1]];
    let v12 = source[[band, y2, x1]];
    let v21 = source[[band, y1, x2]];
    let v22 = source[[band, y2, x2]];
    if [v11, v12, v21, v22].iter().any(|&v| matches_nodata(v, nodata)) {
        return None;
    }

    Some(v11 * (1.0 - dx) * (1.0 - dy) + v21 * dx * (1.0 - dy) + v12 * (1.0 - dx) * dy + v22 * dx * dy)
}

fn resample(
    source: &RasterArray,
    nodata: Option<f64>,
    source_inverse: &InverseGeoTransform,
    to_source: &CoordTransform,
    target_transform: &GeoTransform,
    target_shape: (usize, usize),
    method: ResamplingMethod,
) -> RasterArray {
    let bands = source.dim().0;
    let (target_height, target_width) = target_shape;
    let fill = nodata.unwrap_or(0.0);
    let mut output = Array3::from_elem((bands, target_height, target_width), fill);

    let mut xs = vec![0.0; target_width];
    let mut ys = vec![0.0; target_width];

    for i in 0..target_height {
        for j in 0..target_width {
            let (x, y) = target_transform.apply(j as f64 + 0.5, i as f64 + 0.5);
            xs[j] = x;
            ys[j] = y;
        }
        transform_points(to_source, &mut xs, &mut ys);

        for j in 0..target_width {
            if !(xs[j].is_finite() && ys[j].is_finite()) {
                continue;
            }
            let (col, row) = source_inverse.apply(xs[j], ys[j]);
            let Some((src_row, src_col)) = sample_nearest(source, col, row) else {
                continue;
            };

            match method {
                ResamplingMethod::Nearest => {
                    output
                        .slice_mut(s![.., i, j])
                        .assign(&source.slice(s![.., src_row, src_col]));
                }
                ResamplingMethod::Bilinear => {
                    for band in 0..bands {
                        output[[band, i, j]] = sample_bilinear(source, nodata, band, col, row)
                            .unwrap_or(source[[band, src_row, src_col]]);
                    }
                }
            }
        }
    }

    output
}

impl RasterImage {
    /// Snapshot of this raster reprojected into `target_crs`
    pub fn warped(&self, target_crs: &str, options: &WarpOptions) -> RasterResult<RasterImage> {
        log::info!(
            "Warping raster from {} to {} (resolution: {:?}, {:?})",
            self.crs(),
            target_crs,
            options.resolution,
            options.resampling
        );

        let source_srs = spatial_ref(self.crs())?;
        let target_srs = spatial_ref(target_crs)?;
        let target_id = crs_identifier(&target_srs).unwrap_or_else(|_| target_crs.to_string());

        if options.resolution.is_none() && crs_identifier(&source_srs).ok().as_deref() == Some(target_id.as_str()) {
            log::debug!("Source and target CRS are identical, nothing to warp");
            return Ok(self.with_geometry(self.array().clone(), *self.transform(), target_id));
        }

        let to_target = CoordTransform::new(&source_srs, &target_srs)?;
        let to_source = CoordTransform::new(&target_srs, &source_srs)?;

        // project the densified raster border into the target CRS
        let samples = edge_samples(self.width(), self.height(), options.densify_points);
        let (mut xs, mut ys): (Vec<f64>, Vec<f64>) = samples
            .iter()
            .map(|&(col, row)| self.transform().apply(col, row))
            .unzip();
        transform_points(&to_target, &mut xs, &mut ys);

        let extent = BoundingBox::from_points(
            xs.iter()
                .zip(ys.iter())
                .filter(|(x, y)| x.is_finite() && y.is_finite())
                .map(|(&x, &y)| (x, y)),
        )
        .filter(|b| b.width() > 0.0 && b.height() > 0.0)
        .ok_or_else(|| RasterError::Processing(format!("Raster extent cannot be projected into {}", target_crs)))?;
        log::debug!("Target extent: {:?}", extent.as_tuple());

        let resolution = options
            .resolution
            .unwrap_or_else(|| suggested_resolution(&extent, self.width(), self.height()));
        let (target_transform, target_width, target_height) = output_grid(&extent, resolution)?;
        log::debug!("Target grid: {}x{} at {}", target_width, target_height, resolution);

        let inverse = self.transform().invert()?;
        let array = resample(
            self.array(),
            self.nodata(),
            &inverse,
            &to_source,
            &target_transform,
            (target_height, target_width),
            options.resampling,
        );

        let mut warped = self.with_geometry(array, target_transform, target_id);
        // interpolated values no longer fit an integer storage type
        if options.resampling == ResamplingMethod::Bilinear && self.pixel_type().is_integer() {
            warped.set_pixel_type(PixelType::Float64);
        }
        Ok(warped)
    }

    /// Reproject in place with nearest-neighbour resampling
    pub fn warp(&mut self, target_crs: &str, resolution: Option<f64>) -> RasterResult<()> {
        let options = WarpOptions {
            resolution,
            ..Default::default()
        };
        let snapshot = self.warped(target_crs, &options)?;
        self.replace_geometry(snapshot);
        Ok(())
    }
}
