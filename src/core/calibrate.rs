use crate::core::bands;
use crate::core::raster::RasterImage;
use crate::io::mtl::{MtlDocument, MtlValue};
use crate::types::{PixelType, Platform, RasterError, RasterResult};
use chrono::NaiveDate;
use ndarray::{Array2, Array3, ArrayView2, Axis, Zip};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

const RESCALING_GROUPS: &[&str] = &["LEVEL1_RADIOMETRIC_RESCALING", "RADIOMETRIC_RESCALING"];
const THERMAL_GROUPS: &[&str] = &[
    "LEVEL1_THERMAL_CONSTANTS",
    "TIRS_THERMAL_CONSTANTS",
    "THERMAL_CONSTANTS",
];
const ATTRIBUTE_GROUPS: &[&str] = &["IMAGE_ATTRIBUTES", "PRODUCT_METADATA"];

/// Rescaling coefficients of a single band
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandCalibration {
    pub radiance_mult: Option<f64>,
    pub radiance_add: Option<f64>,
    pub reflectance_mult: Option<f64>,
    pub reflectance_add: Option<f64>,
    /// Thermal conversion constant K1
    pub k1: Option<f64>,
    /// Thermal conversion constant K2
    pub k2: Option<f64>,
}

impl BandCalibration {
    pub fn reflective(mult: f64, add: f64) -> Self {
        Self {
            reflectance_mult: Some(mult),
            reflectance_add: Some(add),
            ..Default::default()
        }
    }

    pub fn thermal(radiance_mult: f64, radiance_add: f64, k1: f64, k2: f64) -> Self {
        Self {
            radiance_mult: Some(radiance_mult),
            radiance_add: Some(radiance_add),
            k1: Some(k1),
            k2: Some(k2),
            ..Default::default()
        }
    }
}

/// Scene-level calibration metadata, usually read from a Landsat MTL file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    /// Sun elevation angle in degrees
    pub sun_elevation: f64,
    pub earth_sun_distance: Option<f64>,
    pub spacecraft: Option<String>,
    pub date_acquired: Option<NaiveDate>,
    /// Coefficients keyed by band id ("1", "10", "6_VCID_1", ...)
    pub bands: BTreeMap<String, BandCalibration>,
}

impl CalibrationRecord {
    pub fn new(sun_elevation: f64) -> Self {
        Self {
            sun_elevation,
            earth_sun_distance: None,
            spacecraft: None,
            date_acquired: None,
            bands: BTreeMap::new(),
        }
    }

    pub fn with_band(mut self, band_id: &str, calibration: BandCalibration) -> Self {
        self.bands.insert(band_id.to_string(), calibration);
        self
    }

    pub fn band(&self, band_id: &str) -> Option<&BandCalibration> {
        self.bands.get(band_id)
    }

    pub fn from_mtl_file<P: AsRef<Path>>(path: P) -> RasterResult<Self> {
        let document = MtlDocument::from_file(path)?;
        Self::from_mtl(&document)
    }

    /// Extract rescaling factors and thermal constants from a parsed MTL document
    ///
    /// Both Collection-1 and Collection-2 group names are recognised.
    pub fn from_mtl(document: &MtlDocument) -> RasterResult<Self> {
        let sun_elevation = document
            .lookup_f64(ATTRIBUTE_GROUPS, "SUN_ELEVATION")
            .ok_or_else(|| RasterError::Metadata("SUN_ELEVATION not found in MTL".to_string()))?;

        let mut record = Self::new(sun_elevation);
        record.earth_sun_distance = document.lookup_f64(ATTRIBUTE_GROUPS, "EARTH_SUN_DISTANCE");
        record.spacecraft = document
            .lookup(ATTRIBUTE_GROUPS, "SPACECRAFT_ID")
            .and_then(MtlValue::as_str)
            .map(str::to_string);
        record.date_acquired = document
            .lookup(ATTRIBUTE_GROUPS, "DATE_ACQUIRED")
            .and_then(MtlValue::as_date);

        let rescaling = Regex::new(r"^(RADIANCE|REFLECTANCE)_(MULT|ADD)_BAND_(\w+)$")
            .map_err(|e| RasterError::Metadata(format!("Regex error: {}", e)))?;
        let constants = Regex::new(r"^K([12])_CONSTANT_BAND_(\w+)$")
            .map_err(|e| RasterError::Metadata(format!("Regex error: {}", e)))?;

        // first group name wins, so Collection-2 groups take precedence
        for name in RESCALING_GROUPS.iter().rev() {
            let Some(group) = document.find_group(name) else {
                continue;
            };
            for (key, value) in &group.fields {
                let (Some(caps), Some(value)) = (rescaling.captures(key), value.as_f64()) else {
                    continue;
                };
                let band = record.bands.entry(caps[3].to_string()).or_default();
                match (&caps[1], &caps[2]) {
                    ("RADIANCE", "MULT") => band.radiance_mult = Some(value),
                    ("RADIANCE", _) => band.radiance_add = Some(value),
                    ("REFLECTANCE", "MULT") => band.reflectance_mult = Some(value),
                    _ => band.reflectance_add = Some(value),
                }
            }
        }

        for name in THERMAL_GROUPS.iter().rev() {
            let Some(group) = document.find_group(name) else {
                continue;
            };
            for (key, value) in &group.fields {
                let (Some(caps), Some(value)) = (constants.captures(key), value.as_f64()) else {
                    continue;
                };
                let band = record.bands.entry(caps[2].to_string()).or_default();
                if &caps[1] == "1" {
                    band.k1 = Some(value);
                } else {
                    band.k2 = Some(value);
                }
            }
        }

        if record.bands.is_empty() {
            return Err(RasterError::Metadata(
                "No radiometric rescaling coefficients found in MTL".to_string(),
            ));
        }

        log::debug!(
            "Calibration record: {} bands, sun elevation {:.4}, spacecraft {:?}",
            record.bands.len(),
            record.sun_elevation,
            record.spacecraft
        );
        Ok(record)
    }
}

/// Unit of brightness temperature output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TemperatureScale {
    #[default]
    Kelvin,
    Celsius,
    Fahrenheit,
}

impl TemperatureScale {
    fn from_kelvin(self, kelvin: f32) -> f32 {
        match self {
            TemperatureScale::Kelvin => kelvin,
            TemperatureScale::Celsius => kelvin - 273.15,
            TemperatureScale::Fahrenheit => kelvin * 9.0 / 5.0 - 459.67,
        }
    }
}

/// DN to TOA conversion settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOptions {
    /// DN marking missing data in the source bands
    pub src_nodata: f64,
    /// Clamp reflectance to [0, 1]; off by default to match the Level-1 TOA products
    pub clip_reflectance: bool,
    pub temperature_scale: TemperatureScale,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            src_nodata: 0.0,
            clip_reflectance: false,
            temperature_scale: TemperatureScale::Kelvin,
        }
    }
}

/// Spectral radiance `L = mult * DN + add`; nodata DN yields 0
pub fn dn_to_radiance(dn: ArrayView2<'_, f64>, mult: f64, add: f64, src_nodata: f64) -> Array2<f64> {
    let (mult, add) = (mult as f32, add as f32);
    dn.map(|&value| {
        if value == src_nodata {
            0.0
        } else {
            (mult * value as f32 + add) as f64
        }
    })
}

/// TOA reflectance `(mult * DN + add) / sin(sun_elevation)`; nodata DN yields 0
pub fn toa_reflectance(
    dn: ArrayView2<'_, f64>,
    mult: f64,
    add: f64,
    sun_elevation: f64,
    src_nodata: f64,
    clip: bool,
) -> RasterResult<Array2<f64>> {
    if !(sun_elevation >= 0.0) {
        return Err(RasterError::Processing(format!(
            "Sun elevation must be non-negative, got {}",
            sun_elevation
        )));
    }

    let (mult, add) = (mult as f32, add as f32);
    let sin_elevation = sun_elevation.to_radians().sin() as f32;
    Ok(dn.map(|&value| {
        if value == src_nodata {
            return 0.0;
        }
        let reflectance = (mult * value as f32 + add) / sin_elevation;
        let reflectance = if clip { reflectance.clamp(0.0, 1.0) } else { reflectance };
        reflectance as f64
    }))
}

/// At-sensor brightness temperature `K2 / ln(K1 / L + 1)`; nodata DN yields NaN
pub fn brightness_temperature(
    dn: ArrayView2<'_, f64>,
    calibration: &BandCalibration,
    src_nodata: f64,
    scale: TemperatureScale,
) -> RasterResult<Array2<f64>> {
    let (Some(mult), Some(add), Some(k1), Some(k2)) = (
        calibration.radiance_mult,
        calibration.radiance_add,
        calibration.k1,
        calibration.k2,
    ) else {
        return Err(RasterError::Metadata(
            "Thermal band requires RADIANCE_MULT, RADIANCE_ADD, K1 and K2".to_string(),
        ));
    };

    let radiance = dn_to_radiance(dn, mult, add, src_nodata);
    let (k1, k2) = (k1 as f32, k2 as f32);
    Ok(Zip::from(&radiance).and(&dn).map_collect(|&l, &value| {
        if value == src_nodata {
            return f64::NAN;
        }
        let kelvin = k2 / (k1 / l as f32 + 1.0).ln();
        scale.from_kelvin(kelvin) as f64
    }))
}

/// Mapping of one output band onto its source band and band id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandPlan {
    /// Index of the source band in the raster
    pub band_index: usize,
    pub band_id: &'static str,
    pub thermal: bool,
}

/// Per-platform DN to TOA strategy
pub trait RadiometricModel: Send + Sync {
    fn platform(&self) -> Platform;

    /// Already delivered as TOA; calibration leaves the data untouched
    fn is_precorrected(&self) -> bool {
        false
    }

    fn requires_metadata(&self) -> bool {
        !self.is_precorrected()
    }

    fn lookup_band(&self, name: &str) -> RasterResult<&'static str> {
        bands::lookup_band(self.platform(), name)
    }

    /// Wavelength name and band id of every band, in raster band order when no names are given
    fn band_table(&self) -> &'static [(&'static str, &'static str)] {
        bands::band_table(self.platform()).unwrap_or(&[])
    }

    /// Calibrate one band of DN values
    fn calibrate(
        &self,
        dn: ArrayView2<'_, f64>,
        plan: &BandPlan,
        record: &CalibrationRecord,
        options: &CalibrationOptions,
    ) -> RasterResult<Array2<f64>>;
}

/// Landsat TM/ETM+/OLI-TIRS Level-1 products delivered as scaled DN
#[derive(Debug)]
pub struct LandsatModel {
    platform: Platform,
}

impl RadiometricModel for LandsatModel {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn calibrate(
        &self,
        dn: ArrayView2<'_, f64>,
        plan: &BandPlan,
        record: &CalibrationRecord,
        options: &CalibrationOptions,
    ) -> RasterResult<Array2<f64>> {
        let calibration = record.band(plan.band_id).ok_or_else(|| {
            RasterError::Metadata(format!("No calibration coefficients for band {}", plan.band_id))
        })?;

        if plan.thermal {
            log::debug!("Band {} -> brightness temperature", plan.band_id);
            return brightness_temperature(dn, calibration, options.src_nodata, options.temperature_scale);
        }

        let (Some(mult), Some(add)) = (calibration.reflectance_mult, calibration.reflectance_add) else {
            return Err(RasterError::Metadata(format!(
                "REFLECTANCE_MULT/ADD missing for band {}",
                plan.band_id
            )));
        };
        log::debug!("Band {} -> TOA reflectance", plan.band_id);
        toa_reflectance(
            dn,
            mult,
            add,
            record.sun_elevation,
            options.src_nodata,
            options.clip_reflectance,
        )
    }
}

/// Products already delivered as TOA reflectance (Sentinel-2 L1C)
#[derive(Debug)]
pub struct PrecorrectedModel {
    platform: Platform,
}

impl RadiometricModel for PrecorrectedModel {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn is_precorrected(&self) -> bool {
        true
    }

    fn calibrate(
        &self,
        dn: ArrayView2<'_, f64>,
        _plan: &BandPlan,
        _record: &CalibrationRecord,
        _options: &CalibrationOptions,
    ) -> RasterResult<Array2<f64>> {
        Ok(dn.to_owned())
    }
}

static LANDSAT5: LandsatModel = LandsatModel { platform: Platform::Landsat5 };
static LANDSAT7: LandsatModel = LandsatModel { platform: Platform::Landsat7 };
static LANDSAT8: LandsatModel = LandsatModel { platform: Platform::Landsat8 };
static SENTINEL2: PrecorrectedModel = PrecorrectedModel { platform: Platform::Sentinel2 };

/// Calibration strategy for `platform`
pub fn radiometric_model(platform: Platform) -> RasterResult<&'static dyn RadiometricModel> {
    match platform {
        Platform::Landsat5 => Ok(&LANDSAT5),
        Platform::Landsat7 => Ok(&LANDSAT7),
        Platform::Landsat8 => Ok(&LANDSAT8),
        Platform::Sentinel2 => Ok(&SENTINEL2),
        Platform::Sentinel1 | Platform::Sentinel3 => Err(RasterError::UnsupportedPlatform(format!(
            "{} has no DN to TOA conversion",
            platform
        ))),
    }
}

/// Assign wavelengths to raster bands
pub fn plan_bands(
    model: &dyn RadiometricModel,
    band_count: usize,
    wavelengths: Option<&[&str]>,
) -> RasterResult<Vec<BandPlan>> {
    let plan = |band_index: usize, band_id: &'static str| BandPlan {
        band_index,
        band_id,
        thermal: bands::is_thermal(model.platform(), band_id),
    };

    match wavelengths {
        Some(names) => {
            if names.is_empty() || names.len() > band_count {
                return Err(RasterError::BandCountMismatch(format!(
                    "{} wavelengths given for a raster with {} bands",
                    names.len(),
                    band_count
                )));
            }
            names
                .iter()
                .enumerate()
                .map(|(band_index, name)| Ok(plan(band_index, model.lookup_band(name)?)))
                .collect()
        }
        None => {
            let table = model.band_table();
            if band_count > table.len() {
                return Err(RasterError::BandCountMismatch(format!(
                    "Raster has {} bands but the {} band table has {}; pass wavelengths explicitly",
                    band_count,
                    model.platform(),
                    table.len()
                )));
            }
            Ok(table[..band_count]
                .iter()
                .enumerate()
                .map(|(band_index, &(_, band_id))| plan(band_index, band_id))
                .collect())
        }
    }
}

fn check_spacecraft(platform: Platform, record: &CalibrationRecord) {
    let Some(spacecraft) = record.spacecraft.as_deref() else {
        return;
    };
    match spacecraft.parse::<Platform>() {
        Ok(found) if found == platform => {}
        _ => log::warn!(
            "Metadata spacecraft {} does not match requested platform {}",
            spacecraft,
            platform
        ),
    }
}

impl RasterImage {
    /// Convert DN to top-of-atmosphere reflectance / brightness temperature in place
    pub fn dn2toa(
        &mut self,
        platform: Platform,
        metadata: Option<&CalibrationRecord>,
        wavelengths: Option<&[&str]>,
    ) -> RasterResult<()> {
        self.dn2toa_with(platform, metadata, wavelengths, &CalibrationOptions::default())
    }

    pub fn dn2toa_with(
        &mut self,
        platform: Platform,
        metadata: Option<&CalibrationRecord>,
        wavelengths: Option<&[&str]>,
        options: &CalibrationOptions,
    ) -> RasterResult<()> {
        log::info!(
            "DN to TOA for {} ({} bands, wavelengths: {:?})",
            platform,
            self.band_count(),
            wavelengths
        );

        let model = radiometric_model(platform)?;
        let plans = plan_bands(model, self.band_count(), wavelengths)?;

        if model.is_precorrected() {
            log::info!("{} products are already TOA, leaving data unchanged", platform);
            return Ok(());
        }

        let record = match metadata {
            Some(record) => record,
            None if model.requires_metadata() => return Err(RasterError::MissingMetadata(platform)),
            None => return Ok(()),
        };
        check_spacecraft(platform, record);

        let array = self.array();
        let calibrate_band = |plan: &BandPlan| {
            model.calibrate(array.index_axis(Axis(0), plan.band_index), plan, record, options)
        };

        #[cfg(feature = "parallel")]
        let results: Vec<RasterResult<Array2<f64>>> = plans.par_iter().map(calibrate_band).collect();
        #[cfg(not(feature = "parallel"))]
        let results: Vec<RasterResult<Array2<f64>>> = plans.iter().map(calibrate_band).collect();

        let calibrated = results.into_iter().collect::<RasterResult<Vec<_>>>()?;

        let mut output = Array3::<f64>::zeros((calibrated.len(), self.height(), self.width()));
        for (mut plane, band) in output.axis_iter_mut(Axis(0)).zip(calibrated.iter()) {
            plane.assign(band);
        }

        log::info!("Calibrated {} bands", output.dim().0);
        self.replace_array(output, PixelType::Float32);
        // thermal nodata pixels are NaN; mixed stacks keep the stored nodata
        if plans.iter().all(|plan| plan.thermal) {
            self.set_nodata_value(Some(f64::NAN));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_reflectance_formula() {
        let dn = array![[0.0, 10000.0], [20000.0, 65535.0]];
        let out = toa_reflectance(dn.view(), 2.0e-5, -0.1, 90.0, 0.0, false).unwrap();
        assert_eq!(out[[0, 0]], 0.0);
        assert_relative_eq!(out[[0, 1]], 0.1, epsilon = 1e-6);
        assert_relative_eq!(out[[1, 0]], 0.3, epsilon = 1e-6);
        assert!(out[[1, 1]] > 1.0);

        let clipped = toa_reflectance(dn.view(), 2.0e-5, -0.1, 90.0, 0.0, true).unwrap();
        assert_eq!(clipped[[1, 1]], 1.0);
    }

    #[test]
    fn test_negative_sun_elevation_rejected() {
        let dn = array![[1.0]];
        assert!(toa_reflectance(dn.view(), 1.0, 0.0, -5.0, 0.0, true).is_err());
    }

    #[test]
    fn test_brightness_temperature() {
        let calibration = BandCalibration::thermal(3.342e-4, 0.1, 774.8853, 1321.0789);
        let dn = array![[0.0, 30000.0]];
        let out = brightness_temperature(dn.view(), &calibration, 0.0, TemperatureScale::Kelvin).unwrap();
        assert!(out[[0, 0]].is_nan());

        let radiance = 3.342e-4 * 30000.0 + 0.1;
        let expected = 1321.0789 / (774.8853 / radiance + 1.0_f64).ln();
        assert_relative_eq!(out[[0, 1]], expected, epsilon = 1e-2);

        let celsius = brightness_temperature(dn.view(), &calibration, 0.0, TemperatureScale::Celsius).unwrap();
        assert_relative_eq!(celsius[[0, 1]], expected - 273.15, epsilon = 1e-2);
    }

    #[test]
    fn test_radiance_nodata_is_zero() {
        let dn = array![[0.0, 100.0]];
        let out = dn_to_radiance(dn.view(), 0.5, 1.0, 0.0);
        assert_eq!(out, array![[0.0, 51.0]]);
    }

    #[test]
    fn test_plan_bands_full_table() {
        let model = radiometric_model(Platform::Landsat8).unwrap();
        let plans = plan_bands(model, 11, None).unwrap();
        let ids: Vec<&str> = plans.iter().map(|p| p.band_id).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11"]);
        assert!(plans[9].thermal && plans[10].thermal);
        assert!(!plans[0].thermal && !plans[7].thermal);

        // nine bands: PAN stays band 8, Cirrus band 9
        let plans = plan_bands(model, 9, None).unwrap();
        assert_eq!(plans[7].band_id, "8");
        assert_eq!(plans[8].band_id, "9");

        assert!(matches!(plan_bands(model, 12, None), Err(RasterError::BandCountMismatch(_))));
        assert!(matches!(
            plan_bands(model, 2, Some(&["Blue", "Green", "Red"])),
            Err(RasterError::BandCountMismatch(_))
        ));
    }

    #[test]
    fn test_unsupported_platforms() {
        assert!(matches!(
            radiometric_model(Platform::Sentinel1),
            Err(RasterError::UnsupportedPlatform(_))
        ));
        assert!(radiometric_model(Platform::Sentinel2).unwrap().is_precorrected());
    }

    #[test]
    fn test_record_from_mtl() {
        let mtl = r#"GROUP = LANDSAT_METADATA_FILE
  GROUP = IMAGE_ATTRIBUTES
    SPACECRAFT_ID = "LANDSAT_8"
    DATE_ACQUIRED = 2020-05-09
    SUN_ELEVATION = 55.5
    EARTH_SUN_DISTANCE = 1.0097
  END_GROUP = IMAGE_ATTRIBUTES
  GROUP = LEVEL1_RADIOMETRIC_RESCALING
    RADIANCE_MULT_BAND_10 = 3.3420E-04
    RADIANCE_ADD_BAND_10 = 0.10000
    REFLECTANCE_MULT_BAND_2 = 2.0000E-05
    REFLECTANCE_ADD_BAND_2 = -0.100000
  END_GROUP = LEVEL1_RADIOMETRIC_RESCALING
  GROUP = LEVEL1_THERMAL_CONSTANTS
    K1_CONSTANT_BAND_10 = 774.8853
    K2_CONSTANT_BAND_10 = 1321.0789
  END_GROUP = LEVEL1_THERMAL_CONSTANTS
END_GROUP = LANDSAT_METADATA_FILE
END
"#;
        let record = CalibrationRecord::from_mtl(&MtlDocument::parse(mtl).unwrap()).unwrap();
        assert_eq!(record.sun_elevation, 55.5);
        assert_eq!(record.spacecraft.as_deref(), Some("LANDSAT_8"));
        assert_eq!(record.date_acquired, NaiveDate::from_ymd_opt(2020, 5, 9));
        assert_eq!(record.band("2"), Some(&BandCalibration::reflective(2.0e-5, -0.1)));
        assert_eq!(
            record.band("10"),
            Some(&BandCalibration::thermal(3.342e-4, 0.1, 774.8853, 1321.0789))
        );
    }

    #[test]
    fn test_record_requires_sun_elevation() {
        let mtl = "GROUP = RADIOMETRIC_RESCALING\n  RADIANCE_MULT_BAND_1 = 1.0\nEND_GROUP = RADIOMETRIC_RESCALING\nEND\n";
        let document = MtlDocument::parse(mtl).unwrap();
        assert!(matches!(CalibrationRecord::from_mtl(&document), Err(RasterError::Metadata(_))));
    }
}
