//! Wavelength name to band id tables per platform

use crate::types::{Platform, RasterError, RasterResult};

const LANDSAT5_BANDS: &[(&str, &str)] = &[
    ("Blue", "1"),
    ("Green", "2"),
    ("Red", "3"),
    ("NIR", "4"),
    ("SWIR1", "5"),
    ("TIRS", "6"),
    ("SWIR2", "7"),
];

const LANDSAT7_BANDS: &[(&str, &str)] = &[
    ("Blue", "1"),
    ("Green", "2"),
    ("Red", "3"),
    ("NIR", "4"),
    ("SWIR1", "5"),
    ("TIRS1", "6_VCID_1"),
    ("TIRS2", "6_VCID_2"),
    ("SWIR2", "7"),
    ("PAN", "8"),
];

const LANDSAT8_BANDS: &[(&str, &str)] = &[
    ("Aerosol", "1"),
    ("Blue", "2"),
    ("Green", "3"),
    ("Red", "4"),
    ("NIR", "5"),
    ("SWIR1", "6"),
    ("SWIR2", "7"),
    ("PAN", "8"),
    ("Cirrus", "9"),
    ("TIRS1", "10"),
    ("TIRS2", "11"),
];

const SENTINEL2_BANDS: &[(&str, &str)] = &[
    ("Aerosol", "1"),
    ("Blue", "2"),
    ("Green", "3"),
    ("Red", "4"),
    ("RedEdge1", "5"),
    ("RedEdge2", "6"),
    ("RedEdge3", "7"),
    ("NIR", "8"),
    ("NarrowNIR", "8A"),
    ("WaterVapour", "9"),
    ("Cirrus", "10"),
    ("SWIR1", "11"),
    ("SWIR2", "12"),
];

/// Wavelength table of `platform`, `None` for radar and ocean/land colour sensors
pub fn band_table(platform: Platform) -> Option<&'static [(&'static str, &'static str)]> {
    match platform {
        Platform::Landsat5 => Some(LANDSAT5_BANDS),
        Platform::Landsat7 => Some(LANDSAT7_BANDS),
        Platform::Landsat8 => Some(LANDSAT8_BANDS),
        Platform::Sentinel2 => Some(SENTINEL2_BANDS),
        Platform::Sentinel1 | Platform::Sentinel3 => None,
    }
}

/// Band id for a single wavelength name, case-insensitive
pub fn lookup_band(platform: Platform, name: &str) -> RasterResult<&'static str> {
    let table = band_table(platform).ok_or_else(|| RasterError::UnsupportedPlatform(platform.to_string()))?;
    table
        .iter()
        .find(|(wavelength, _)| wavelength.eq_ignore_ascii_case(name.trim()))
        .map(|(_, id)| *id)
        .ok_or_else(|| RasterError::UnknownWavelength {
            platform,
            name: name.to_string(),
        })
}

/// Band ids for `names`, in order
pub fn lookup_bands<S: AsRef<str>>(platform: Platform, names: &[S]) -> RasterResult<Vec<&'static str>> {
    names
        .iter()
        .map(|name| lookup_band(platform, name.as_ref()))
        .collect()
}

/// Whether `band_id` is a thermal infrared band of `platform`
pub fn is_thermal(platform: Platform, band_id: &str) -> bool {
    match platform {
        Platform::Landsat8 => matches!(band_id, "10" | "11"),
        Platform::Landsat7 => band_id.starts_with("6_VCID"),
        Platform::Landsat5 => band_id == "6",
        _ => false,
    }
}
