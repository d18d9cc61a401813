use crate::core::raster::RasterImage;
use crate::types::{BoundingBox, InverseGeoTransform, RasterArray, RasterError, RasterResult, PIXEL_SNAP_TOLERANCE};
use geo::{BoundingRect, Coord, Geometry, Intersects, LineString, Polygon, Rect};
use ndarray::{s, Array2, Array3};

/// Area a raster is cropped (and optionally padded) to
#[derive(Debug, Clone, PartialEq)]
pub enum MaskGeometry {
    /// Axis-aligned box in the raster's CRS
    Bounds(BoundingBox),
    /// Arbitrary polygon in the raster's CRS
    Polygon(Polygon<f64>),
}

impl From<BoundingBox> for MaskGeometry {
    fn from(bbox: BoundingBox) -> Self {
        MaskGeometry::Bounds(bbox)
    }
}

impl From<(f64, f64, f64, f64)> for MaskGeometry {
    fn from(t: (f64, f64, f64, f64)) -> Self {
        MaskGeometry::Bounds(BoundingBox::from(t))
    }
}

impl From<Rect<f64>> for MaskGeometry {
    fn from(rect: Rect<f64>) -> Self {
        MaskGeometry::Bounds(BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y))
    }
}

impl From<Polygon<f64>> for MaskGeometry {
    fn from(polygon: Polygon<f64>) -> Self {
        MaskGeometry::Polygon(polygon)
    }
}

impl TryFrom<&[f64]> for MaskGeometry {
    type Error = RasterError;

    fn try_from(values: &[f64]) -> Result<Self, Self::Error> {
        match values {
            [minx, miny, maxx, maxy] => Ok(MaskGeometry::Bounds(BoundingBox::new(*minx, *miny, *maxx, *maxy))),
            _ => Err(RasterError::InvalidGeometry(format!(
                "bbox must have 4 values (minx, miny, maxx, maxy), got {}",
                values.len()
            ))),
        }
    }
}

impl TryFrom<&[(f64, f64)]> for MaskGeometry {
    type Error = RasterError;

    /// Exterior ring of a polygon; closed automatically when the last point differs from the first
    fn try_from(points: &[(f64, f64)]) -> Result<Self, Self::Error> {
        let mut ring: Vec<Coord<f64>> = points.iter().map(|&(x, y)| Coord { x, y }).collect();
        if ring.first() != ring.last() {
            if let Some(&first) = ring.first() {
                ring.push(first);
            }
        }
        if ring.len() < 4 {
            return Err(RasterError::InvalidGeometry(format!(
                "polygon ring needs at least 3 distinct points, got {}",
                points.len()
            )));
        }
        Ok(MaskGeometry::Polygon(Polygon::new(LineString::new(ring), vec![])))
    }
}

impl TryFrom<Geometry<f64>> for MaskGeometry {
    type Error = RasterError;

    fn try_from(geometry: Geometry<f64>) -> Result<Self, Self::Error> {
        match geometry {
            Geometry::Polygon(polygon) => Ok(MaskGeometry::Polygon(polygon)),
            Geometry::Rect(rect) => Ok(MaskGeometry::from(rect)),
            other => Err(RasterError::InvalidGeometry(format!(
                "bbox must be a bounding box or a polygon, got {:?}",
                other
            ))),
        }
    }
}

impl MaskGeometry {
    /// Parse a WKT `POLYGON` (as produced by shapely's `.wkt`)
    pub fn from_wkt(wkt: &str) -> RasterResult<Self> {
        let geometry = gdal::vector::Geometry::from_wkt(wkt)
            .and_then(|g| g.to_geo())
            .map_err(|e| RasterError::InvalidGeometry(format!("cannot parse WKT: {}", e)))?;
        Self::try_from(geometry)
    }

    /// Validated envelope of the geometry
    pub fn envelope(&self) -> RasterResult<BoundingBox> {
        let bbox = match self {
            MaskGeometry::Bounds(bbox) => *bbox,
            MaskGeometry::Polygon(polygon) => {
                let rect = polygon
                    .bounding_rect()
                    .ok_or_else(|| RasterError::InvalidGeometry("polygon is empty".to_string()))?;
                BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
            }
        };

        if !bbox.is_finite() {
            return Err(RasterError::InvalidGeometry(format!("non-finite bounds {:?}", bbox)));
        }
        if bbox.minx > bbox.maxx || bbox.miny > bbox.maxy {
            return Err(RasterError::InvalidGeometry(format!(
                "bounds must be ordered (minx, miny, maxx, maxy), got {:?}",
                bbox.as_tuple()
            )));
        }
        Ok(bbox)
    }

    /// Polygon that needs per-pixel masking, or `None` when the envelope is the shape
    fn clip_polygon(&self) -> Option<&Polygon<f64>> {
        match self {
            MaskGeometry::Bounds(_) => None,
            MaskGeometry::Polygon(polygon) if is_axis_aligned_rectangle(polygon) => None,
            MaskGeometry::Polygon(polygon) => Some(polygon),
        }
    }
}

fn is_axis_aligned_rectangle(polygon: &Polygon<f64>) -> bool {
    if !polygon.interiors().is_empty() {
        return false;
    }
    let Some(rect) = polygon.bounding_rect() else {
        return false;
    };
    let (min, max) = (rect.min(), rect.max());
    let coords: Vec<Coord<f64>> = polygon.exterior().coords().copied().collect();
    // closed ring of four corners
    coords.len() == 5
        && coords
            .iter()
            .all(|c| (c.x == min.x || c.x == max.x) && (c.y == min.y || c.y == max.y))
}

/// Options for [`RasterImage::masked`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MaskOptions {
    /// Extend the raster with fill pixels instead of clipping to the overlap
    pub pad: bool,
    /// Fill value for masked/padded pixels, also the output nodata; defaults to the raster nodata, else 0
    pub nodata_fill: Option<f64>,
}

fn snap_floor(v: f64) -> f64 {
    let r = v.round();
    if (v - r).abs() < PIXEL_SNAP_TOLERANCE {
        r
    } else {
        v.floor()
    }
}

fn snap_ceil(v: f64) -> f64 {
    let r = v.round();
    if (v - r).abs() < PIXEL_SNAP_TOLERANCE {
        r
    } else {
        v.ceil()
    }
}

/// Pixel range (col0, row0, col1, row1), end-exclusive, covering `bbox` on the raster grid
pub fn snapped_pixel_range(bbox: &BoundingBox, inverse: &InverseGeoTransform) -> RasterResult<(i64, i64, i64, i64)> {
    let corners = [
        inverse.apply(bbox.minx, bbox.miny),
        inverse.apply(bbox.minx, bbox.maxy),
        inverse.apply(bbox.maxx, bbox.miny),
        inverse.apply(bbox.maxx, bbox.maxy),
    ];
    let pixels = BoundingBox::from_points(corners)
        .filter(BoundingBox::is_finite)
        .ok_or_else(|| RasterError::InvalidGeometry(format!("cannot map {:?} to pixel space", bbox)))?;

    let limit = i32::MAX as f64;
    if pixels.minx.abs() > limit || pixels.maxx.abs() > limit || pixels.miny.abs() > limit || pixels.maxy.abs() > limit {
        return Err(RasterError::InvalidGeometry(format!(
            "{:?} lies too far from the raster grid",
            bbox
        )));
    }

    Ok((
        snap_floor(pixels.minx) as i64,
        snap_floor(pixels.miny) as i64,
        snap_ceil(pixels.maxx) as i64,
        snap_ceil(pixels.maxy) as i64,
    ))
}

impl RasterImage {
    /// Snapshot of this raster cropped (or padded) to `geometry`
    ///
    /// Leaves `self` untouched; fails before producing anything if the geometry is
    /// degenerate or, without padding, does not overlap the raster.
    pub fn masked(&self, geometry: &MaskGeometry, options: &MaskOptions) -> RasterResult<RasterImage> {
        let envelope = geometry.envelope()?;
        log::info!("Masking raster to {:?} (pad: {})", envelope.as_tuple(), options.pad);

        let inverse = self.transform().invert()?;
        let (c0, r0, c1, r1) = snapped_pixel_range(&envelope, &inverse)?;
        let (width, height) = (self.width() as i64, self.height() as i64);

        let (col0, row0, col1, row1) = if options.pad {
            (c0.min(0), r0.min(0), c1.max(width), r1.max(height))
        } else {
            (c0.max(0), r0.max(0), c1.min(width), r1.min(height))
        };

        if col1 <= col0 || row1 <= row0 {
            return Err(RasterError::InvalidGeometry(format!(
                "{:?} does not overlap raster bounds {:?}",
                envelope.as_tuple(),
                self.bounds().as_tuple()
            )));
        }
        log::debug!("Mask window: cols {}..{}, rows {}..{}", col0, col1, row0, row1);

        let fill = options.nodata_fill.or(self.nodata()).unwrap_or(0.0);
        let out_width = (col1 - col0) as usize;
        let out_height = (row1 - row0) as usize;
        let mut array: RasterArray = Array3::from_elem((self.band_count(), out_height, out_width), fill);

        // overlap of the output window with the source raster
        let src_c0 = col0.max(0);
        let src_r0 = row0.max(0);
        let src_c1 = col1.min(width);
        let src_r1 = row1.min(height);
        let mut filled = (src_c0, src_r0, src_c1, src_r1) != (col0, row0, col1, row1);
        if src_c1 > src_c0 && src_r1 > src_r0 {
            let dst_c0 = (src_c0 - col0) as usize;
            let dst_r0 = (src_r0 - row0) as usize;
            let cols = (src_c1 - src_c0) as usize;
            let rows = (src_r1 - src_r0) as usize;
            array
                .slice_mut(s![.., dst_r0..dst_r0 + rows, dst_c0..dst_c0 + cols])
                .assign(&self.array().slice(s![
                    ..,
                    src_r0 as usize..src_r1 as usize,
                    src_c0 as usize..src_c1 as usize
                ]));
        }

        let transform = self.transform().shifted(col0 as f64, row0 as f64);

        if let Some(polygon) = geometry.clip_polygon() {
            let inside = Array2::from_shape_fn((out_height, out_width), |(row, col)| {
                let (x, y) = transform.apply(col as f64 + 0.5, row as f64 + 0.5);
                polygon.intersects(&Coord { x, y })
            });
            let mut masked_count = 0usize;
            for ((row, col), &keep) in inside.indexed_iter() {
                if !keep {
                    array.slice_mut(s![.., row, col]).fill(fill);
                    masked_count += 1;
                }
            }
            log::debug!("Masked {} pixels outside polygon", masked_count);
            filled |= masked_count > 0;
        }

        // fill pixels are always nodata in the output
        let nodata = options
            .nodata_fill
            .or(self.nodata())
            .or_else(|| filled.then_some(fill));
        let mut snapshot = self.with_geometry(array, transform, self.crs().to_string());
        snapshot.set_nodata_value(nodata);
        Ok(snapshot)
    }

    /// Crop (or pad) this raster in place; see [`RasterImage::masked`]
    pub fn mask_image(
        &mut self,
        geometry: impl Into<MaskGeometry>,
        pad: bool,
        nodata_fill: Option<f64>,
    ) -> RasterResult<()> {
        let snapshot = self.masked(&geometry.into(), &MaskOptions { pad, nodata_fill })?;
        self.replace_geometry(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use geo::{polygon, Point};
    use ndarray::Array3;

    fn raster() -> RasterImage {
        let array = Array3::from_shape_fn((1, 10, 10), |(_, r, c)| (r * 10 + c + 1) as f64);
        RasterImage::from_parts(array, GeoTransform::north_up(0.0, 10.0, 1.0, 1.0), "EPSG:32632", Some(0.0)).unwrap()
    }

    #[test]
    fn test_slice_conversion_requires_four_values() {
        let bad: &[f64] = &[1.0, 2.0, 3.0];
        assert!(matches!(MaskGeometry::try_from(bad), Err(RasterError::InvalidGeometry(_))));
        let good: &[f64] = &[1.0, 2.0, 3.0, 4.0];
        assert_eq!(
            MaskGeometry::try_from(good).unwrap(),
            MaskGeometry::Bounds(BoundingBox::new(1.0, 2.0, 3.0, 4.0))
        );
    }

    #[test]
    fn test_coordinate_ring_and_wkt() {
        let open_ring: &[(f64, f64)] = &[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)];
        let from_ring = MaskGeometry::try_from(open_ring).unwrap();
        let from_wkt = MaskGeometry::from_wkt("POLYGON ((0 0, 10 0, 0 10, 0 0))").unwrap();
        assert_eq!(from_ring, from_wkt);
        assert_eq!(from_wkt.envelope().unwrap(), BoundingBox::new(0.0, 0.0, 10.0, 10.0));

        let too_short: &[(f64, f64)] = &[(0.0, 0.0), (1.0, 1.0)];
        assert!(matches!(MaskGeometry::try_from(too_short), Err(RasterError::InvalidGeometry(_))));
        assert!(matches!(MaskGeometry::from_wkt("POINT (1 1)"), Err(RasterError::InvalidGeometry(_))));
        assert!(matches!(MaskGeometry::from_wkt("not wkt"), Err(RasterError::InvalidGeometry(_))));

        let masked = raster().masked(&from_wkt, &MaskOptions::default()).unwrap();
        assert_eq!(masked.array()[[0, 0, 9]], 0.0);
        assert_eq!(masked.array()[[0, 9, 0]], 91.0);
    }

    #[test]
    fn test_point_geometry_rejected() {
        let geometry = Geometry::Point(Point::new(1.0, 1.0));
        assert!(matches!(MaskGeometry::try_from(geometry), Err(RasterError::InvalidGeometry(_))));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let geometry = MaskGeometry::from((5.0, 5.0, 1.0, 1.0));
        assert!(matches!(geometry.envelope(), Err(RasterError::InvalidGeometry(_))));
    }

    #[test]
    fn test_crop_to_inner_box() {
        let raster = raster();
        let cropped = raster
            .masked(&MaskGeometry::from((2.0, 3.0, 5.0, 8.0)), &MaskOptions::default())
            .unwrap();
        assert_eq!(cropped.array().dim(), (1, 5, 3));
        assert_eq!(cropped.bounds(), BoundingBox::new(2.0, 3.0, 5.0, 8.0));
        // top-left output pixel is source row 2, col 2
        assert_eq!(cropped.array()[[0, 0, 0]], 23.0);
    }

    #[test]
    fn test_partial_pixels_snap_outward() {
        let raster = raster();
        let cropped = raster
            .masked(&MaskGeometry::from((2.4, 3.6, 4.5, 7.2)), &MaskOptions::default())
            .unwrap();
        assert_eq!(cropped.bounds(), BoundingBox::new(2.0, 3.0, 5.0, 8.0));
    }

    #[test]
    fn test_rectangle_polygon_same_as_bounds() {
        let raster = raster();
        let rect = Rect::new(Coord { x: 2.4, y: 3.6 }, Coord { x: 4.5, y: 7.2 });
        let by_polygon = raster
            .masked(&MaskGeometry::Polygon(rect.to_polygon()), &MaskOptions::default())
            .unwrap();
        let by_bounds = raster
            .masked(&MaskGeometry::from(rect), &MaskOptions::default())
            .unwrap();
        assert_eq!(by_polygon.array(), by_bounds.array());
        assert_eq!(by_polygon.transform(), by_bounds.transform());
    }

    #[test]
    fn test_triangle_masks_outside_pixels() {
        let raster = raster();
        let triangle = polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 0.0, y: 10.0), (x: 0.0, y: 0.0)];
        let masked = raster
            .masked(&MaskGeometry::Polygon(triangle), &MaskOptions::default())
            .unwrap();
        assert_eq!(masked.array().dim(), (1, 10, 10));
        // top-right pixel centre (9.5, 9.5) is outside the triangle
        assert_eq!(masked.array()[[0, 0, 9]], 0.0);
        // bottom-left pixel centre (0.5, 0.5) is inside
        assert_eq!(masked.array()[[0, 9, 0]], 91.0);
    }

    #[test]
    fn test_no_overlap_is_error_and_leaves_raster() {
        let mut raster = raster();
        let before = raster.array().clone();
        let result = raster.mask_image((20.0, 20.0, 30.0, 30.0), false, None);
        assert!(matches!(result, Err(RasterError::InvalidGeometry(_))));
        assert_eq!(raster.array(), &before);
    }

    #[test]
    fn test_pad_extends_with_fill() {
        let raster = raster();
        let padded = raster
            .masked(
                &MaskGeometry::from((-2.0, 5.0, 4.0, 12.0)),
                &MaskOptions { pad: true, nodata_fill: Some(-1.0) },
            )
            .unwrap();
        assert_eq!(padded.bounds(), BoundingBox::new(-2.0, 0.0, 10.0, 12.0));
        assert_eq!(padded.array().dim(), (1, 12, 12));
        assert_eq!(padded.array()[[0, 0, 0]], -1.0);
        assert_eq!(padded.array()[[0, 2, 2]], 1.0);
        assert_eq!(padded.nodata(), Some(-1.0));
        // padding is not valid data
        assert_eq!(padded.get_valid_data_bbox(None), raster.bounds());
    }

    #[test]
    fn test_fill_marks_nodata_without_raster_nodata() {
        let mut raster = raster();
        raster.set_nodata(None);

        let cropped = raster
            .masked(&MaskGeometry::from((2.0, 3.0, 5.0, 8.0)), &MaskOptions::default())
            .unwrap();
        assert_eq!(cropped.nodata(), None);

        let padded = raster
            .masked(&MaskGeometry::from((-3.0, 0.0, 10.0, 10.0)), &MaskOptions { pad: true, nodata_fill: None })
            .unwrap();
        assert_eq!(padded.nodata(), Some(0.0));
        assert_eq!(padded.get_valid_data_bbox(None), raster.bounds());
    }
}
