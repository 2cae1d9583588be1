//! In-memory little-endian DNG 1.4 writer.
//!
//! Emits a single-IFD TIFF: an 8-byte header, the image strip, the IFD with
//! entries sorted by tag number (readers rely on the ordering), and an
//! out-of-line value area. Output is deterministic: the same inputs produce
//! byte-identical files, which is what lets a sample frame's size stand in
//! for every frame of a source.

use std::collections::BTreeMap;

use thiserror::Error;

use super::tags::*;

/// Errors raised while assembling a DNG.
#[derive(Debug, Error)]
pub enum DngError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("image strip is empty")]
    EmptyStrip,

    #[error("malformed DNG: {0}")]
    Malformed(String),
}

/// TIFF field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub(crate) enum FieldType {
    Byte = 1,
    Ascii = 2,
    Short = 3,
    Long = 4,
    Rational = 5,
    Undefined = 7,
    SRational = 10,
}

/// A single IFD value, already in its wire representation modulo byte order.
#[derive(Debug, Clone)]
enum Value {
    Byte(Vec<u8>),
    Ascii(String),
    Short(Vec<u16>),
    Long(Vec<u32>),
    Rational(Vec<(u32, u32)>),
    SRational(Vec<(i32, i32)>),
    Undefined(Vec<u8>),
}

impl Value {
    fn field_type(&self) -> FieldType {
        match self {
            Value::Byte(_) => FieldType::Byte,
            Value::Ascii(_) => FieldType::Ascii,
            Value::Short(_) => FieldType::Short,
            Value::Long(_) => FieldType::Long,
            Value::Rational(_) => FieldType::Rational,
            Value::SRational(_) => FieldType::SRational,
            Value::Undefined(_) => FieldType::Undefined,
        }
    }

    fn count(&self) -> u32 {
        match self {
            Value::Byte(v) => v.len() as u32,
            Value::Ascii(s) => s.len() as u32 + 1, // includes the NUL
            Value::Short(v) => v.len() as u32,
            Value::Long(v) => v.len() as u32,
            Value::Rational(v) => v.len() as u32,
            Value::SRational(v) => v.len() as u32,
            Value::Undefined(v) => v.len() as u32,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Value::Byte(v) | Value::Undefined(v) => v.clone(),
            Value::Ascii(s) => {
                let mut out = s.as_bytes().to_vec();
                out.push(0);
                out
            }
            Value::Short(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Value::Long(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Value::Rational(v) => v
                .iter()
                .flat_map(|(n, d)| {
                    let mut b = n.to_le_bytes().to_vec();
                    b.extend_from_slice(&d.to_le_bytes());
                    b
                })
                .collect(),
            Value::SRational(v) => v
                .iter()
                .flat_map(|(n, d)| {
                    let mut b = n.to_le_bytes().to_vec();
                    b.extend_from_slice(&d.to_le_bytes());
                    b
                })
                .collect(),
        }
    }
}

/// Signed rational approximation with a fixed denominator, reduced by gcd.
fn srational(value: f64, denom: i32) -> (i32, i32) {
    let num = (value * denom as f64).round() as i64;
    let num = num.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
    let g = gcd(num.unsigned_abs(), denom.unsigned_abs()).max(1);
    (num / g as i32, denom / g as i32)
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Builder for one DNG frame.
///
/// Callers populate the fields a frame needs and [`DngImage::encode`] lays
/// out the file. Optional setters that are never called simply leave their
/// tag out of the IFD.
#[derive(Debug, Default, Clone)]
pub struct DngImage {
    ifd: BTreeMap<u16, Value>,
    strip: Vec<u8>,
    height: u32,
}

impl DngImage {
    pub fn new() -> Self {
        let mut image = Self::default();
        image.ifd.insert(TAG_NEW_SUBFILE_TYPE, Value::Long(vec![0]));
        image
            .ifd
            .insert(TAG_COMPRESSION, Value::Short(vec![COMPRESSION_NONE]));
        image
            .ifd
            .insert(TAG_PLANAR_CONFIG, Value::Short(vec![PLANAR_CONFIG_CHUNKY]));
        image
    }

    pub fn set_image_data(&mut self, data: Vec<u8>) -> &mut Self {
        self.strip = data;
        self
    }

    pub fn set_image_size(&mut self, width: u32, height: u32) -> &mut Self {
        self.height = height;
        self.ifd.insert(TAG_IMAGE_WIDTH, Value::Long(vec![width]));
        self.ifd.insert(TAG_IMAGE_LENGTH, Value::Long(vec![height]));
        self.ifd
            .insert(TAG_ACTIVE_AREA, Value::Long(vec![0, 0, height, width]));
        self
    }

    pub fn set_bits_per_sample(&mut self, bits: u16, samples_per_pixel: u16) -> &mut Self {
        self.ifd.insert(
            TAG_BITS_PER_SAMPLE,
            Value::Short(vec![bits; samples_per_pixel as usize]),
        );
        self.ifd.insert(
            TAG_SAMPLES_PER_PIXEL,
            Value::Short(vec![samples_per_pixel]),
        );
        self.ifd.insert(
            TAG_SAMPLE_FORMAT,
            Value::Short(vec![SAMPLE_FORMAT_UNSIGNED; samples_per_pixel as usize]),
        );
        self
    }

    pub fn set_photometric(&mut self, photometric: u16) -> &mut Self {
        self.ifd
            .insert(TAG_PHOTOMETRIC, Value::Short(vec![photometric]));
        self
    }

    pub fn set_dng_version(&mut self, version: [u8; 4], backward: [u8; 4]) -> &mut Self {
        self.ifd
            .insert(TAG_DNG_VERSION, Value::Byte(version.to_vec()));
        self.ifd
            .insert(TAG_DNG_BACKWARD_VERSION, Value::Byte(backward.to_vec()));
        self
    }

    pub fn set_cfa_pattern(&mut self, pattern: [u8; 4]) -> &mut Self {
        self.ifd
            .insert(TAG_CFA_REPEAT_PATTERN_DIM, Value::Short(vec![2, 2]));
        self.ifd
            .insert(TAG_CFA_PATTERN, Value::Byte(pattern.to_vec()));
        self.ifd
            .insert(TAG_CFA_LAYOUT, Value::Short(vec![CFA_LAYOUT_RECTANGULAR]));
        self
    }

    pub fn set_black_white_levels(&mut self, black: [u16; 4], white: u16) -> &mut Self {
        self.ifd
            .insert(TAG_BLACK_LEVEL_REPEAT_DIM, Value::Short(vec![2, 2]));
        self.ifd
            .insert(TAG_BLACK_LEVEL, Value::Short(black.to_vec()));
        self.ifd.insert(TAG_WHITE_LEVEL, Value::Short(vec![white]));
        self
    }

    pub fn set_linearization_table(&mut self, table: Vec<u16>) -> &mut Self {
        self.ifd.insert(TAG_LINEARIZATION_TABLE, Value::Short(table));
        self
    }

    pub fn set_resolution(&mut self, dpi: u32) -> &mut Self {
        self.ifd
            .insert(TAG_X_RESOLUTION, Value::Rational(vec![(dpi, 1)]));
        self.ifd
            .insert(TAG_Y_RESOLUTION, Value::Rational(vec![(dpi, 1)]));
        self.ifd.insert(
            TAG_RESOLUTION_UNIT,
            Value::Short(vec![RESOLUTION_UNIT_INCH]),
        );
        self
    }

    pub fn set_orientation(&mut self, orientation: DngOrientation) -> &mut Self {
        self.ifd
            .insert(TAG_ORIENTATION, Value::Short(vec![orientation as u16]));
        self
    }

    pub fn set_software(&mut self, software: &str) -> &mut Self {
        self.ifd
            .insert(TAG_SOFTWARE, Value::Ascii(software.to_string()));
        self
    }

    pub fn set_unique_camera_model(&mut self, model: &str) -> &mut Self {
        self.ifd
            .insert(TAG_UNIQUE_CAMERA_MODEL, Value::Ascii(model.to_string()));
        self
    }

    pub fn set_make_model(&mut self, make: &str, model: &str) -> &mut Self {
        self.ifd.insert(TAG_MAKE, Value::Ascii(make.to_string()));
        self.ifd.insert(TAG_MODEL, Value::Ascii(model.to_string()));
        self
    }

    pub fn set_iso(&mut self, iso: u16) -> &mut Self {
        self.ifd.insert(TAG_ISO_SPEED, Value::Short(vec![iso]));
        self
    }

    /// Exposure time in nanoseconds, stored as an exact rational of seconds.
    pub fn set_exposure_time_ns(&mut self, exposure_ns: u64) -> &mut Self {
        let mut num = exposure_ns;
        let mut den: u64 = 1_000_000_000;
        while num > u32::MAX as u64 || den > u32::MAX as u64 {
            num /= 10;
            den /= 10;
        }
        let g = gcd(num as u32, den as u32).max(1);
        self.ifd.insert(
            TAG_EXPOSURE_TIME,
            Value::Rational(vec![(num as u32 / g, den as u32 / g)]),
        );
        self
    }

    pub fn set_baseline_exposure(&mut self, ev: f64) -> &mut Self {
        self.ifd
            .insert(TAG_BASELINE_EXPOSURE, Value::SRational(vec![srational(ev, 1_000_000)]));
        self
    }

    pub fn set_color_matrix_1(&mut self, matrix: &[f32; 9]) -> &mut Self {
        self.ifd
            .insert(TAG_COLOR_MATRIX_1, Value::SRational(matrix_rationals(matrix)));
        self
    }

    pub fn set_color_matrix_2(&mut self, matrix: &[f32; 9]) -> &mut Self {
        self.ifd
            .insert(TAG_COLOR_MATRIX_2, Value::SRational(matrix_rationals(matrix)));
        self
    }

    pub fn set_forward_matrix_1(&mut self, matrix: &[f32; 9]) -> &mut Self {
        self.ifd.insert(
            TAG_FORWARD_MATRIX_1,
            Value::SRational(matrix_rationals(matrix)),
        );
        self
    }

    pub fn set_forward_matrix_2(&mut self, matrix: &[f32; 9]) -> &mut Self {
        self.ifd.insert(
            TAG_FORWARD_MATRIX_2,
            Value::SRational(matrix_rationals(matrix)),
        );
        self
    }

    pub fn set_camera_calibration_identity(&mut self) -> &mut Self {
        const IDENTITY: [f32; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        self.ifd.insert(
            TAG_CAMERA_CALIBRATION_1,
            Value::SRational(matrix_rationals(&IDENTITY)),
        );
        self.ifd.insert(
            TAG_CAMERA_CALIBRATION_2,
            Value::SRational(matrix_rationals(&IDENTITY)),
        );
        self
    }

    pub fn set_as_shot_neutral(&mut self, neutral: &[f32; 3]) -> &mut Self {
        self.ifd.insert(
            TAG_AS_SHOT_NEUTRAL,
            Value::SRational(
                neutral
                    .iter()
                    .map(|&v| srational(v as f64, 1_000_000))
                    .collect(),
            ),
        );
        self
    }

    pub fn set_calibration_illuminants(
        &mut self,
        illuminant1: Illuminant,
        illuminant2: Illuminant,
    ) -> &mut Self {
        self.ifd.insert(
            TAG_CALIBRATION_ILLUMINANT_1,
            Value::Short(vec![illuminant1 as u16]),
        );
        self.ifd.insert(
            TAG_CALIBRATION_ILLUMINANT_2,
            Value::Short(vec![illuminant2 as u16]),
        );
        self
    }

    /// SMPTE timecode, eight bytes as produced by the synthesis stage.
    pub fn set_time_code(&mut self, timecode: [u8; 8]) -> &mut Self {
        self.ifd
            .insert(TAG_TIME_CODE, Value::Byte(timecode.to_vec()));
        self
    }

    pub fn set_frame_rate(&mut self, num: i32, den: i32) -> &mut Self {
        self.ifd
            .insert(TAG_FRAME_RATE, Value::SRational(vec![(num, den)]));
        self
    }

    /// Raw OpcodeList2 payload (already big-endian per the DNG spec).
    pub fn set_opcode_list_2(&mut self, payload: Vec<u8>) -> &mut Self {
        self.ifd
            .insert(TAG_OPCODE_LIST_2, Value::Undefined(payload));
        self
    }

    /// Lay the file out and return its bytes.
    pub fn encode(&self) -> Result<Vec<u8>, DngError> {
        if self.strip.is_empty() {
            return Err(DngError::EmptyStrip);
        }
        if !self.ifd.contains_key(&TAG_IMAGE_WIDTH) {
            return Err(DngError::MissingField("image size"));
        }
        if !self.ifd.contains_key(&TAG_PHOTOMETRIC) {
            return Err(DngError::MissingField("photometric"));
        }

        // Strip bookkeeping is derived, not caller-set.
        let mut ifd = self.ifd.clone();
        ifd.insert(TAG_STRIP_OFFSETS, Value::Long(vec![8]));
        ifd.insert(TAG_ROWS_PER_STRIP, Value::Long(vec![self.height]));
        ifd.insert(
            TAG_STRIP_BYTE_COUNTS,
            Value::Long(vec![self.strip.len() as u32]),
        );

        // Header + strip, padded so the IFD starts on a word boundary.
        let mut out = Vec::with_capacity(8 + self.strip.len() + 4096);
        out.extend_from_slice(b"II");
        out.extend_from_slice(&42u16.to_le_bytes());

        let mut ifd_offset = 8 + self.strip.len() as u32;
        if ifd_offset % 2 != 0 {
            ifd_offset += 1;
        }
        out.extend_from_slice(&ifd_offset.to_le_bytes());
        out.extend_from_slice(&self.strip);
        out.resize(ifd_offset as usize, 0);

        // First pass: out-of-line values follow the entry table directly.
        let entry_count = ifd.len() as u32;
        let mut aux_offset = ifd_offset + 2 + entry_count * 12 + 4;
        let mut aux = Vec::new();

        out.extend_from_slice(&(entry_count as u16).to_le_bytes());

        for (&tag, value) in &ifd {
            let payload = value.payload();

            out.extend_from_slice(&tag.to_le_bytes());
            out.extend_from_slice(&(value.field_type() as u16).to_le_bytes());
            out.extend_from_slice(&value.count().to_le_bytes());

            if payload.len() <= 4 {
                let mut inline = [0u8; 4];
                inline[..payload.len()].copy_from_slice(&payload);
                out.extend_from_slice(&inline);
            } else {
                if aux_offset % 2 != 0 {
                    aux.push(0);
                    aux_offset += 1;
                }
                out.extend_from_slice(&aux_offset.to_le_bytes());
                aux_offset += payload.len() as u32;
                aux.extend_from_slice(&payload);
            }
        }

        // No further IFDs.
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&aux);

        Ok(out)
    }
}

fn matrix_rationals(matrix: &[f32; 9]) -> Vec<(i32, i32)> {
    matrix
        .iter()
        .map(|&v| srational(v as f64, 10_000))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dng::reader::Ifd;

    fn minimal_image() -> DngImage {
        let mut dng = DngImage::new();
        dng.set_image_size(4, 2)
            .set_bits_per_sample(16, 1)
            .set_photometric(PHOTOMETRIC_CFA)
            .set_cfa_pattern([0, 1, 1, 2])
            .set_dng_version([1, 4, 0, 0], [1, 1, 0, 0])
            .set_image_data(vec![0u8; 16]);
        dng
    }

    #[test]
    fn test_encode_requires_strip() {
        let mut dng = DngImage::new();
        dng.set_image_size(4, 2).set_photometric(PHOTOMETRIC_CFA);
        assert!(matches!(dng.encode(), Err(DngError::EmptyStrip)));
    }

    #[test]
    fn test_header_is_little_endian_tiff() {
        let bytes = minimal_image().encode().unwrap();
        assert_eq!(&bytes[0..2], b"II");
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), 42);
    }

    #[test]
    fn test_ifd_entries_are_tag_sorted() {
        let bytes = minimal_image().encode().unwrap();
        let ifd = Ifd::parse(&bytes).unwrap();
        let tags: Vec<u16> = ifd.tags().collect();
        let mut sorted = tags.clone();
        sorted.sort_unstable();
        assert_eq!(tags, sorted);
    }

    #[test]
    fn test_round_trip_core_tags() {
        let mut dng = minimal_image();
        dng.set_black_white_levels([64, 64, 64, 64], 1023)
            .set_iso(800)
            .set_unique_camera_model("Test Cam")
            .set_orientation(DngOrientation::Rotate90Cw);
        let bytes = dng.encode().unwrap();

        let ifd = Ifd::parse(&bytes).unwrap();
        assert_eq!(ifd.u32_values(TAG_IMAGE_WIDTH).unwrap(), vec![4]);
        assert_eq!(ifd.u32_values(TAG_IMAGE_LENGTH).unwrap(), vec![2]);
        assert_eq!(ifd.u16_values(TAG_WHITE_LEVEL).unwrap(), vec![1023]);
        assert_eq!(ifd.u16_values(TAG_BLACK_LEVEL).unwrap(), vec![64; 4]);
        assert_eq!(ifd.u16_values(TAG_ISO_SPEED).unwrap(), vec![800]);
        assert_eq!(ifd.byte_values(TAG_CFA_PATTERN).unwrap(), vec![0, 1, 1, 2]);
        assert_eq!(ifd.ascii_value(TAG_UNIQUE_CAMERA_MODEL).unwrap(), "Test Cam");
        assert_eq!(ifd.u16_values(TAG_ORIENTATION).unwrap(), vec![6]);
    }

    #[test]
    fn test_strip_is_preserved_verbatim() {
        let strip: Vec<u8> = (0u8..16).collect();
        let mut dng = minimal_image();
        dng.set_image_data(strip.clone());
        let bytes = dng.encode().unwrap();

        let ifd = Ifd::parse(&bytes).unwrap();
        let offset = ifd.u32_values(TAG_STRIP_OFFSETS).unwrap()[0] as usize;
        let count = ifd.u32_values(TAG_STRIP_BYTE_COUNTS).unwrap()[0] as usize;
        assert_eq!(&bytes[offset..offset + count], strip.as_slice());
    }

    #[test]
    fn test_encode_is_deterministic() {
        let a = minimal_image().encode().unwrap();
        let b = minimal_image().encode().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_srational_reduction() {
        assert_eq!(srational(-2.0, 1_000_000), (-2, 1));
        assert_eq!(srational(0.5, 1_000_000), (1, 2));
        assert_eq!(srational(0.0, 10_000), (0, 1));
    }
}
