//! TIFF/DNG tag numbers and enumerated tag values.

// Baseline TIFF tags.
pub const TAG_NEW_SUBFILE_TYPE: u16 = 254;
pub const TAG_IMAGE_WIDTH: u16 = 256;
pub const TAG_IMAGE_LENGTH: u16 = 257;
pub const TAG_BITS_PER_SAMPLE: u16 = 258;
pub const TAG_COMPRESSION: u16 = 259;
pub const TAG_PHOTOMETRIC: u16 = 262;
pub const TAG_MAKE: u16 = 271;
pub const TAG_MODEL: u16 = 272;
pub const TAG_STRIP_OFFSETS: u16 = 273;
pub const TAG_ORIENTATION: u16 = 274;
pub const TAG_SAMPLES_PER_PIXEL: u16 = 277;
pub const TAG_ROWS_PER_STRIP: u16 = 278;
pub const TAG_STRIP_BYTE_COUNTS: u16 = 279;
pub const TAG_X_RESOLUTION: u16 = 282;
pub const TAG_Y_RESOLUTION: u16 = 283;
pub const TAG_PLANAR_CONFIG: u16 = 284;
pub const TAG_RESOLUTION_UNIT: u16 = 296;
pub const TAG_SOFTWARE: u16 = 305;
pub const TAG_SAMPLE_FORMAT: u16 = 339;

// EXIF tags carried in IFD0 for raw video workflows.
pub const TAG_EXPOSURE_TIME: u16 = 33434;
pub const TAG_ISO_SPEED: u16 = 34855;

// CFA description.
pub const TAG_CFA_REPEAT_PATTERN_DIM: u16 = 33421;
pub const TAG_CFA_PATTERN: u16 = 33422;

// DNG tags.
pub const TAG_DNG_VERSION: u16 = 50706;
pub const TAG_DNG_BACKWARD_VERSION: u16 = 50707;
pub const TAG_UNIQUE_CAMERA_MODEL: u16 = 50708;
pub const TAG_CFA_LAYOUT: u16 = 50711;
pub const TAG_LINEARIZATION_TABLE: u16 = 50712;
pub const TAG_BLACK_LEVEL_REPEAT_DIM: u16 = 50713;
pub const TAG_BLACK_LEVEL: u16 = 50714;
pub const TAG_WHITE_LEVEL: u16 = 50717;
pub const TAG_COLOR_MATRIX_1: u16 = 50721;
pub const TAG_COLOR_MATRIX_2: u16 = 50722;
pub const TAG_CAMERA_CALIBRATION_1: u16 = 50723;
pub const TAG_CAMERA_CALIBRATION_2: u16 = 50724;
pub const TAG_AS_SHOT_NEUTRAL: u16 = 50728;
pub const TAG_BASELINE_EXPOSURE: u16 = 50730;
pub const TAG_FORWARD_MATRIX_1: u16 = 50964;
pub const TAG_FORWARD_MATRIX_2: u16 = 50965;
pub const TAG_CALIBRATION_ILLUMINANT_1: u16 = 50778;
pub const TAG_CALIBRATION_ILLUMINANT_2: u16 = 50779;
pub const TAG_ACTIVE_AREA: u16 = 50829;
pub const TAG_OPCODE_LIST_2: u16 = 51009;
pub const TAG_TIME_CODE: u16 = 51043;
pub const TAG_FRAME_RATE: u16 = 51044;

/// PhotometricInterpretation values used here.
pub const PHOTOMETRIC_RGB: u16 = 2;
pub const PHOTOMETRIC_CFA: u16 = 32803;

pub const COMPRESSION_NONE: u16 = 1;
pub const PLANAR_CONFIG_CHUNKY: u16 = 1;
pub const SAMPLE_FORMAT_UNSIGNED: u16 = 1;
pub const RESOLUTION_UNIT_INCH: u16 = 2;

/// CFALayout value for a rectangular (non-staggered) sensor grid.
pub const CFA_LAYOUT_RECTANGULAR: u16 = 1;

/// DNG CalibrationIlluminant values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Illuminant {
    Unknown = 0,
    Daylight = 1,
    Fluorescent = 2,
    Tungsten = 3,
    Flash = 4,
    FineWeather = 9,
    CloudyWeather = 10,
    Shade = 11,
    DaylightFluorescent = 12,
    DayWhiteFluorescent = 13,
    CoolWhiteFluorescent = 14,
    WhiteFluorescent = 15,
    WarmWhiteFluorescent = 16,
    StandardLightA = 17,
    StandardLightB = 18,
    StandardLightC = 19,
    D55 = 20,
    D65 = 21,
    D75 = 22,
    D50 = 23,
    IsoStudioTungsten = 24,
    Other = 255,
}

impl Illuminant {
    /// Map the container's illuminant label to a DNG value.
    ///
    /// Unrecognized labels become [`Illuminant::Unknown`].
    pub fn from_label(label: &str) -> Illuminant {
        match label {
            "standarda" => Illuminant::StandardLightA,
            "standardb" => Illuminant::StandardLightB,
            "standardc" => Illuminant::StandardLightC,
            "d50" => Illuminant::D50,
            "d55" => Illuminant::D55,
            "d65" => Illuminant::D65,
            "d75" => Illuminant::D75,
            _ => Illuminant::Unknown,
        }
    }
}

/// TIFF Orientation values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum DngOrientation {
    Normal = 1,
    Mirror = 2,
    Rotate180 = 3,
    Mirror180 = 4,
    Mirror90Ccw = 5,
    Rotate90Cw = 6,
    Mirror90Cw = 7,
    Rotate90Ccw = 8,
    Unknown = 9,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illuminant_labels() {
        assert_eq!(Illuminant::from_label("d65"), Illuminant::D65);
        assert_eq!(Illuminant::from_label("standarda"), Illuminant::StandardLightA);
        assert_eq!(Illuminant::from_label("halogen"), Illuminant::Unknown);
    }
}
