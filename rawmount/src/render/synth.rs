//! Per-frame DNG synthesis.
//!
//! Drives the preprocessor and bit packers, then populates a [`DngImage`]
//! from the container metadata, frame metadata, calibration overrides, and
//! the render config. Two paths share the tag plumbing: Bayer sources
//! (MCRAW) and RGB sources (DirectLog), the latter with optional
//! remosaicing.

use thiserror::Error;
use tracing::debug;

use crate::bitpack::{self, bits_needed, SampleDepth};
use crate::dng::{encode_opcode_list, DngError, DngImage, DngOrientation, Illuminant};
use crate::render::keyframes::{parse_static_ev, ExposureKeyframes};
use crate::render::options::{LogTransform, RenderConfig, RenderOptions, CFA_NO_OVERRIDE};
use crate::render::preprocess::{log_encode_rgb, preprocess_bayer};
use crate::render::remosaic::remosaic_rgb_to_bayer;
use crate::source::{
    CalibrationData, CameraConfiguration, CameraFrameMetadata, CfaPhase, ScreenOrientation,
};
use crate::timing::to_fraction;

const SOFTWARE: &str = "RawMount";

/// White level written alongside a linearization table. Downstream readers
/// expect one less than full scale here.
const LOG_WHITE_LEVEL: u16 = 65534;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid sensor arrangement: {0:?}")]
    UnsupportedSensorArrangement(String),

    #[error("frame has no pixel data")]
    EmptyFrame,

    #[error(transparent)]
    Dng(#[from] DngError),
}

/// Per-source context shared by every frame synthesis.
pub struct SynthesisContext<'a> {
    pub camera: &'a CameraConfiguration,
    pub calibration: Option<&'a CalibrationData>,
    pub config: &'a RenderConfig,
    /// Target (CFR-resolved) frame rate.
    pub fps: f32,
    /// Number of output entries, for keyframe positioning.
    pub total_output_frames: usize,
    /// Smallest `iso * exposure_ns` over the source, the exposure floor the
    /// NORMALIZE_EXPOSURE option normalizes against.
    pub baseline_exposure_floor: f64,
    pub exposure_keyframes: Option<&'a ExposureKeyframes>,
}

impl<'a> SynthesisContext<'a> {
    fn exposure_offset_ev(&self, index: usize) -> f64 {
        match self.exposure_keyframes {
            Some(kf) => kf.exposure_at_frame(index, self.total_output_frames) as f64,
            None => parse_static_ev(&self.config.exposure_compensation) as f64,
        }
    }

    fn camera_model_override(&self) -> Option<&str> {
        let explicit = self.config.options.contains(RenderOptions::CAMMODEL_OVERRIDE);
        if explicit || !self.config.camera_model.is_empty() {
            Some(self.config.camera_model.as_str())
        } else {
            None
        }
    }
}

/// Synthesize a DNG from a decoded Bayer frame.
pub fn synthesize_bayer_dng(
    data: &[u8],
    metadata: &CameraFrameMetadata,
    index: usize,
    ctx: &SynthesisContext,
) -> Result<Vec<u8>, RenderError> {
    if data.is_empty() {
        return Err(RenderError::EmptyFrame);
    }

    let cfa = CfaPhase::parse(&ctx.camera.sensor_arrangement).ok_or_else(|| {
        RenderError::UnsupportedSensorArrangement(ctx.camera.sensor_arrangement.clone())
    })?;

    let samples = bytes_to_u16_le(data);
    let pre = preprocess_bayer(&samples, metadata, ctx.camera, cfa, ctx.config);
    if pre.samples.is_empty() {
        return Err(RenderError::EmptyFrame);
    }

    debug!(
        black = ?pre.black_level,
        white = pre.white_level,
        width = pre.width,
        height = pre.height,
        "Preprocessed frame"
    );

    let depth = SampleDepth::for_bits(bits_needed(pre.white_level));
    let mut strip = u16_to_bytes_le(&pre.samples);
    bitpack::pack_bayer_in_place(&mut strip, pre.width, pre.height, depth);

    // The declared pattern can be overridden by the calibration sidecar.
    let declared_cfa = ctx
        .calibration
        .and_then(|c| c.cfa_phase)
        .unwrap_or(cfa);

    let mut dng = DngImage::new();
    dng.set_image_size(pre.width, pre.height)
        .set_bits_per_sample(depth.bits(), 1)
        .set_photometric(crate::dng::tags::PHOTOMETRIC_CFA)
        .set_cfa_pattern(declared_cfa.pattern())
        .set_dng_version([1, 4, 0, 0], [1, 1, 0, 0])
        .set_resolution(300)
        .set_software(SOFTWARE)
        .set_orientation(orientation_tag(metadata.orientation, ctx.camera.flipped))
        .set_iso(metadata.iso.min(u16::MAX as u32) as u16)
        .set_exposure_time_ns(metadata.exposure_time_ns)
        .set_time_code(smpte_timecode(index, ctx.fps))
        .set_camera_calibration_identity()
        .set_calibration_illuminants(
            Illuminant::from_label(&ctx.camera.color_illuminant1),
            Illuminant::from_label(&ctx.camera.color_illuminant2),
        );

    let (fps_num, fps_den) = to_fraction(ctx.fps, 1000);
    dng.set_frame_rate(fps_num, fps_den);

    // Baseline exposure: optional normalization against the source's
    // exposure floor, shifted by the requested EV.
    let mut ev = ctx.exposure_offset_ev(index);
    if ctx.config.options.contains(RenderOptions::NORMALIZE_EXPOSURE) {
        let frame_exposure = metadata.iso as f64 * metadata.exposure_time_ns as f64;
        if frame_exposure > 0.0 && ctx.baseline_exposure_floor > 0.0 {
            ev += (ctx.baseline_exposure_floor / frame_exposure).log2();
        }
    }
    dng.set_baseline_exposure(ev);

    apply_color_tags(
        &mut dng,
        ctx.camera,
        ctx.calibration,
        Some(metadata.as_shot_neutral),
    );

    match ctx.camera_model_override() {
        Some(model) => set_camera_model(&mut dng, model),
        None => {
            dng.set_unique_camera_model(&ctx.camera.camera_model);
        }
    }

    if let Some(gain_map) = &pre.gain_map {
        dng.set_opcode_list_2(encode_opcode_list(std::slice::from_ref(gain_map)));
    }

    if pre.log_active {
        dng.set_linearization_table(linearization_table(pre.white_level))
            .set_black_white_levels([0; 4], LOG_WHITE_LEVEL);
    } else {
        dng.set_black_white_levels(pre.black_level, pre.white_level);
    }

    dng.set_image_data(strip);
    Ok(dng.encode()?)
}

/// Synthesize a DNG from a decoded 16-bit RGB frame (the DirectLog path).
///
/// `width` must be a multiple of 4; video codecs only emit macroblock
/// aligned dimensions, and the packers group four pixels per block.
pub fn synthesize_rgb_dng(
    rgb: &[u16],
    width: u32,
    height: u32,
    index: usize,
    ctx: &SynthesisContext,
) -> Result<Vec<u8>, RenderError> {
    if rgb.is_empty() {
        return Err(RenderError::EmptyFrame);
    }

    let log = ctx.config.log_transform();
    let (processed, use_bits, dst_white) = match log {
        LogTransform::Off => (rgb.to_vec(), 16u16, u16::MAX),
        LogTransform::Reduce(n) => log_encode_rgb(rgb, n),
        LogTransform::KeepInput | LogTransform::Other => log_encode_rgb(rgb, 0),
    };
    let log_active = log != LogTransform::Off;

    let remosaic = ctx.config.options.contains(RenderOptions::REMOSAIC);
    let cfa = resolved_output_cfa(ctx);

    let depth = SampleDepth::for_bits(use_bits);
    let (strip, samples_per_pixel, photometric) = if remosaic {
        let bayer = remosaic_rgb_to_bayer(&processed, width, height, cfa);
        let mut strip = u16_to_bytes_le(&bayer);
        bitpack::pack_bayer_in_place(&mut strip, width, height, depth);
        (strip, 1u16, crate::dng::tags::PHOTOMETRIC_CFA)
    } else {
        let mut strip = u16_to_bytes_le(&processed);
        bitpack::pack_rgb_in_place(&mut strip, width, height, depth);
        (strip, 3u16, crate::dng::tags::PHOTOMETRIC_RGB)
    };

    let mut dng = DngImage::new();
    dng.set_image_size(width, height)
        .set_bits_per_sample(depth.bits(), samples_per_pixel)
        .set_photometric(photometric)
        .set_dng_version([1, 4, 0, 0], [1, 1, 0, 0])
        .set_resolution(72)
        .set_software(SOFTWARE)
        .set_orientation(DngOrientation::Normal)
        .set_time_code(smpte_timecode(index, ctx.fps))
        .set_camera_calibration_identity();

    let (fps_num, fps_den) = to_fraction(ctx.fps, 1000);
    dng.set_frame_rate(fps_num, fps_den);

    if remosaic {
        dng.set_cfa_pattern(cfa.pattern());
    }

    dng.set_baseline_exposure(ctx.exposure_offset_ev(index));

    let has_matrices = apply_color_tags(&mut dng, ctx.camera, ctx.calibration, None);
    if has_matrices {
        dng.set_calibration_illuminants(Illuminant::StandardLightA, Illuminant::D65);
    }

    let model = ctx.camera_model_override().unwrap_or("DirectLog Video");
    dng.set_make_model("DirectLog", model);
    dng.set_unique_camera_model(model);

    if log_active {
        dng.set_linearization_table(linearization_table(dst_white))
            .set_black_white_levels([0; 4], LOG_WHITE_LEVEL);
    } else {
        dng.set_black_white_levels([0; 4], u16::MAX);
    }

    dng.set_image_data(strip);
    Ok(dng.encode()?)
}

/// Output CFA phase for remosaiced RGB: calibration sidecar first, then the
/// UI setting unless it is the no-override sentinel, then bggr.
fn resolved_output_cfa(ctx: &SynthesisContext) -> CfaPhase {
    if let Some(phase) = ctx.calibration.and_then(|c| c.cfa_phase) {
        return phase;
    }
    if ctx.config.cfa_phase != CFA_NO_OVERRIDE {
        if let Some(phase) = CfaPhase::parse(&ctx.config.cfa_phase) {
            return phase;
        }
    }
    CfaPhase::Bggr
}

/// Write color matrices and neutral, with calibration overrides taking
/// precedence and all-zero matrices left out. Returns whether any color
/// matrix was written.
fn apply_color_tags(
    dng: &mut DngImage,
    camera: &CameraConfiguration,
    calibration: Option<&CalibrationData>,
    container_neutral: Option<[f32; 3]>,
) -> bool {
    let mut any = false;

    let pick = |override_m: Option<[f32; 9]>, fallback: &[f32; 9]| -> Option<[f32; 9]> {
        override_m.or_else(|| (!is_zero_matrix(fallback)).then_some(*fallback))
    };

    if let Some(m) = pick(calibration.and_then(|c| c.color_matrix1), &camera.color_matrix1) {
        dng.set_color_matrix_1(&m);
        any = true;
    }
    if let Some(m) = pick(calibration.and_then(|c| c.color_matrix2), &camera.color_matrix2) {
        dng.set_color_matrix_2(&m);
        any = true;
    }
    if let Some(m) = pick(
        calibration.and_then(|c| c.forward_matrix1),
        &camera.forward_matrix1,
    ) {
        dng.set_forward_matrix_1(&m);
    }
    if let Some(m) = pick(
        calibration.and_then(|c| c.forward_matrix2),
        &camera.forward_matrix2,
    ) {
        dng.set_forward_matrix_2(&m);
    }

    let neutral = calibration
        .and_then(|c| c.as_shot_neutral)
        .or(container_neutral);
    if let Some(n) = neutral {
        dng.set_as_shot_neutral(&n);
    }

    any
}

/// Known camera-model aliases expand to full product names.
fn set_camera_model(dng: &mut DngImage, model: &str) {
    match model {
        "Blackmagic" => {
            dng.set_unique_camera_model("Blackmagic Pocket Cinema Camera 4K");
        }
        "Panasonic" => {
            dng.set_unique_camera_model("Panasonic Varicam RAW");
        }
        "Fujifilm" | "Fujifilm X-T5" => {
            dng.set_unique_camera_model("Fujifilm X-T5");
            dng.set_make_model("Fujifilm", "X-T5");
        }
        other => {
            dng.set_unique_camera_model(other);
        }
    }
}

fn is_zero_matrix(matrix: &[f32; 9]) -> bool {
    matrix.iter().all(|&v| v == 0.0)
}

/// Compose the capture orientation with the mirror flag into a TIFF tag.
fn orientation_tag(orientation: ScreenOrientation, flipped: bool) -> DngOrientation {
    match orientation {
        ScreenOrientation::Portrait => {
            if flipped {
                DngOrientation::Mirror90Cw
            } else {
                DngOrientation::Rotate90Cw
            }
        }
        ScreenOrientation::ReversePortrait => {
            if flipped {
                DngOrientation::Mirror90Ccw
            } else {
                DngOrientation::Rotate90Ccw
            }
        }
        ScreenOrientation::ReverseLandscape => {
            if flipped {
                DngOrientation::Mirror180
            } else {
                DngOrientation::Rotate180
            }
        }
        ScreenOrientation::Landscape => {
            if flipped {
                DngOrientation::Mirror
            } else {
                DngOrientation::Normal
            }
        }
        ScreenOrientation::Invalid => DngOrientation::Unknown,
    }
}

/// SMPTE timecode for output frame `index` at `fps`, BCD encoded.
fn smpte_timecode(index: usize, fps: f32) -> [u8; 8] {
    let time = index as f32 / fps.max(f32::MIN_POSITIVE);

    let hours = (time / 3600.0).floor() as u32;
    let minutes = ((time / 60.0).floor() as u32) % 60;
    let seconds = (time.floor() as u32) % 60;
    let frames = if fps > 1.0 {
        (index as u32) % (fps.round() as u32)
    } else {
        0
    };

    let bcd = |v: u32| (((v / 10) << 4) | (v % 10)) as u8;

    let mut timecode = [0u8; 8];
    timecode[0] = bcd(frames) & 0x3F;
    timecode[1] = bcd(seconds) & 0x7F;
    timecode[2] = bcd(minutes) & 0x7F;
    timecode[3] = bcd(hours) & 0x3F;
    timecode
}

/// Inverse of the log curve, sized for the stored range: entry `i` maps back
/// to `round(65535 * ((2^((i / white) * log2(61)) - 1) / 60))`, with exact
/// identity forced at both endpoints.
pub fn linearization_table(dst_white: u16) -> Vec<u16> {
    let size = dst_white as usize + 1;
    let white = dst_white as f32;

    (0..size)
        .map(|i| {
            if i == 0 {
                0
            } else if i == size - 1 {
                u16::MAX
            } else {
                let normalized = i as f32 / white;
                let linear = ((2.0f32.powf(normalized * 61.0f32.log2()) - 1.0) / 60.0)
                    .clamp(0.0, 1.0);
                (linear * 65535.0).round() as u16
            }
        })
        .collect()
}

fn bytes_to_u16_le(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect()
}

fn u16_to_bytes_le(samples: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}
