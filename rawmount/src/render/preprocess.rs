//! Raw frame preprocessing.
//!
//! Takes a decoded Bayer buffer and produces the 16-bit samples that feed
//! the bit packer: optional centered crop and draft downscale, level remap,
//! lens-shading application, log encoding with triangular dither, and the
//! quad-Bayer special cases. Rows are processed in independent Bayer-block
//! bands, so the work spreads across the rayon pool.

use rayon::prelude::*;
use tracing::debug;

use crate::bitpack::bits_needed;
use crate::dng::GainMap;
use crate::render::levels::{parse_levels, resolve_levels};
use crate::render::options::{LogTransform, RenderConfig, RenderOptions};
use crate::shading::ShadingMap;
use crate::source::{CameraConfiguration, CameraFrameMetadata, CfaPhase};

/// Output of the preprocessing stage.
#[derive(Debug, Clone)]
pub struct PreprocessResult {
    /// `width * height` 16-bit samples, ready for packing.
    pub samples: Vec<u16>,
    pub width: u32,
    pub height: u32,
    /// Destination black levels, one per 2x2 site.
    pub black_level: [u16; 4],
    /// Destination white level; stored values never exceed it.
    pub white_level: u16,
    /// True when samples are log encoded and need a linearization table.
    pub log_active: bool,
    /// Shading map as a gain-map opcode, present when the map was not baked
    /// into the pixels.
    pub gain_map: Option<GainMap>,
}

/// The aggressive log curve: identity at 0 and 1, k = 60.
pub(crate) fn log_encode(linear: f32) -> f32 {
    (1.0 + 60.0 * linear.max(0.0)).log2() / 61.0f32.log2()
}

/// Triangular dither in `[-0.5, 0.5]`, deterministic per output position so
/// repeated renders are bit-identical.
pub(crate) fn triangular_dither(x: u32, y: u32, sub_pixel: usize) -> f32 {
    let sub = sub_pixel as u32;
    let mut seed = x
        .wrapping_add(sub & 1)
        .wrapping_mul(1664525)
        .wrapping_add(y.wrapping_add(sub >> 1).wrapping_mul(1013904223))
        ^ 0xdead_beef;

    seed ^= seed >> 16;
    seed = seed.wrapping_mul(0x85eb_ca6b);
    seed ^= seed >> 13;
    seed = seed.wrapping_mul(0xc2b2_ae35);
    seed ^= seed >> 16;

    let r1 = (seed & 0xffff) as f32 / 65535.0;
    let r2 = ((seed >> 16) & 0xffff) as f32 / 65535.0;
    (r1 + r2 - 1.0) * 0.5
}

fn parse_crop(target: &str) -> Option<(u32, u32)> {
    let (w, h) = target.split_once('x')?;
    let w: u32 = w.trim().parse().ok()?;
    let h: u32 = h.trim().parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

/// Preprocess one Bayer frame according to `config`.
pub fn preprocess_bayer(
    samples: &[u16],
    metadata: &CameraFrameMetadata,
    camera: &CameraConfiguration,
    cfa: CfaPhase,
    config: &RenderConfig,
) -> PreprocessResult {
    let in_w = metadata.width;
    let in_h = metadata.height;
    debug_assert_eq!(samples.len(), (in_w * in_h) as usize);

    let apply_shading = config.options.contains(RenderOptions::APPLY_VIGNETTE_CORRECTION);
    let only_color = config.options.contains(RenderOptions::VIGNETTE_ONLY_COLOR);
    let normalize = config.options.contains(RenderOptions::NORMALIZE_SHADING_MAP);
    let debug_map = config.options.contains(RenderOptions::DEBUG_SHADING_MAP);
    let log = config.log_transform();

    // Draft scale is floored to an even divisor so downscaling walks whole
    // 2x2 Bayer blocks and the CFA phase survives.
    let scale = match config.scale() {
        s if s > 1 => (s / 2) * 2,
        _ => 1,
    };

    // Quad-Bayer frames cluster 2x2 same-color sites.
    let cfa_size: u32 = if metadata.needs_remosaic { 2 } else { 1 };

    // Crop resolution: a valid target not exceeding the source wins,
    // otherwise the full frame is used. Output is aligned down to a
    // multiple of 4 (Bayer phase + packer block alignment).
    let crop = parse_crop(config.crop_target())
        .filter(|&(w, h)| w <= in_w && h <= in_h);
    let (target_w, target_h) = crop.unwrap_or((in_w, in_h));
    let new_w = (target_w / scale) / 4 * 4;
    let new_h = (target_h / scale) / 4 * 4;

    // Crop window centered in the frame, even-aligned to keep the phase.
    let (crop_x0, crop_y0) = match crop {
        Some((w, h)) => ((in_w - w) / 2 / 2 * 2, (in_h - h) / 2 / 2 * 2),
        None => (0, 0),
    };

    // Levels.
    let mode = parse_levels(&config.levels);
    let (mut src_black, mut src_white) = resolve_levels(&mode, metadata, camera);

    // Binned quad downscale sums four sites into one.
    if cfa_size > 1 && scale == 2 {
        src_white *= 4.0;
        for b in &mut src_black {
            *b *= 4.0;
        }
    }

    let linear: [f32; 4] = std::array::from_fn(|i| 1.0 / (src_white - src_black[i]));

    // Output bit depth and destination levels.
    let bits = bits_needed(src_white as u16);
    let (use_bits, rescale_white) = if apply_shading {
        if normalize {
            (bits.saturating_add(4).min(16), true)
        } else if debug_map {
            (bits, false)
        } else {
            match log {
                LogTransform::Reduce(n) if n >= 4 => (bits.saturating_sub(n).max(1).min(16), true),
                _ => (bits.saturating_add(2).min(16), true),
            }
        }
    } else {
        match log {
            LogTransform::Reduce(n) => (bits.saturating_sub(n).max(1).min(16), true),
            LogTransform::Off => (bits, false),
            LogTransform::KeepInput | LogTransform::Other => (bits, true),
        }
    };

    let dst_white: f32 = if rescale_white {
        ((1u32 << use_bits) - 1) as f32
    } else {
        src_white
    };
    let log_active = log != LogTransform::Off && !debug_map;
    let dst_black: [f32; 4] = if apply_shading || log_active {
        [0.0; 4]
    } else {
        src_black
    };

    // Shading map preparation.
    let shading = if apply_shading {
        let mut map = metadata
            .shading_map
            .clone()
            .unwrap_or_else(|| ShadingMap::identity(1, 1));
        if only_color {
            map.color_only(cfa);
        }
        if normalize {
            map.normalize();
        } else if debug_map {
            map.invert();
        }
        Some(map)
    } else {
        None
    };

    // Sensor-space offsets of the output window, for shading lookups and the
    // emitted gain-map geometry.
    let full_w = metadata.original_width.max(in_w);
    let full_h = metadata.original_height.max(in_h);
    let left = (full_w - in_w) / 2 + crop_x0;
    let top = (full_h - in_h) / 2 + crop_y0;
    let inv_full_w = 1.0 / full_w as f32;
    let inv_full_h = 1.0 / full_h as f32;

    let gain_map = if !apply_shading {
        metadata
            .shading_map
            .as_ref()
            .and_then(|map| GainMap::from_shading_map(map, in_w, in_h, left, top))
    } else {
        None
    };

    if new_w == 0 || new_h == 0 {
        debug!(new_w, new_h, "Preprocess target collapsed to zero");
        return PreprocessResult {
            samples: Vec::new(),
            width: 0,
            height: 0,
            black_level: [0; 4],
            white_level: 0,
            log_active,
            gain_map,
        };
    }

    let quad_full_res = cfa_size == 2 && scale == 1;
    let band_rows = if quad_full_res { 4usize } else { 2usize };

    let mut dst = vec![0u16; (new_w * new_h) as usize];
    let src_w = in_w as usize;

    dst.par_chunks_mut(new_w as usize * band_rows)
        .enumerate()
        .for_each(|(band, out)| {
            let y = band as u32 * band_rows as u32;

            let mut x = 0u32;
            while x < new_w {
                if quad_full_res {
                    process_quad_block(
                        samples, out, x, y, src_w, new_w, crop_x0, crop_y0, left, top,
                        inv_full_w, inv_full_h, &linear, &src_black, &dst_black, dst_white,
                        shading.as_ref(), log_active,
                    );
                    x += 4;
                } else {
                    process_bayer_block(
                        samples, out, x, y, src_w, new_w, scale, cfa_size, crop_x0, crop_y0,
                        left, top, inv_full_w, inv_full_h, &linear, &src_black, src_white,
                        &dst_black, dst_white, shading.as_ref(), log_active, debug_map,
                    );
                    x += 2;
                }
            }
        });

    PreprocessResult {
        samples: dst,
        width: new_w,
        height: new_h,
        black_level: std::array::from_fn(|i| dst_black[i].round() as u16),
        white_level: dst_white as u16,
        log_active,
        gain_map,
    }
}

/// One 2x2 output block on the standard path (plain Bayer at any scale, or
/// quad Bayer binned down by 2).
#[allow(clippy::too_many_arguments)]
fn process_bayer_block(
    src: &[u16],
    out: &mut [u16],
    x: u32,
    y: u32,
    src_w: usize,
    new_w: u32,
    scale: u32,
    cfa_size: u32,
    crop_x0: u32,
    crop_y0: u32,
    left: u32,
    top: u32,
    inv_full_w: f32,
    inv_full_h: f32,
    linear: &[f32; 4],
    src_black: &[f32; 4],
    src_white: f32,
    dst_black: &[f32; 4],
    dst_white: f32,
    shading: Option<&ShadingMap>,
    log_active: bool,
    debug_map: bool,
) {
    let sx = (x * scale + crop_x0) as usize;
    let sy = (y * scale + crop_y0) as usize;

    let mut s = [0.0f32; 4];
    if cfa_size == 2 && scale == 2 {
        // Sum each quad cluster down to one site.
        for (i, v) in s.iter_mut().enumerate() {
            let bx = sx + (i & 1) * 2;
            let by = sy + (i >> 1) * 2;
            *v = (src[by * src_w + bx] as u32
                + src[by * src_w + bx + 1] as u32
                + src[(by + 1) * src_w + bx] as u32
                + src[(by + 1) * src_w + bx + 1] as u32) as f32;
        }
    } else {
        let step = cfa_size as usize;
        s[0] = src[sy * src_w + sx] as f32;
        s[1] = src[sy * src_w + sx + step] as f32;
        s[2] = src[(sy + step) * src_w + sx] as f32;
        s[3] = src[(sy + step) * src_w + sx + step] as f32;
    }

    let mut gains = [1.0f32; 4];
    if let Some(map) = shading {
        for (i, g) in gains.iter_mut().enumerate() {
            let dx = (i as u32 & 1) * scale;
            let dy = (i as u32 >> 1) * scale;
            *g = map.sample(
                i,
                (sx as u32 + left + dx) as f32 * inv_full_w,
                (sy as u32 + top + dy) as f32 * inv_full_h,
            );
        }
    }

    let mut p = [0.0f32; 4];
    if debug_map {
        // Constant intensity weighted by the (inverted) gain.
        for i in 0..4 {
            p[i] = (linear[i] * (src_white - src_black[i]) * gains[i]).max(0.0)
                * (dst_white - dst_black[i]);
        }
    } else if !log_active {
        for i in 0..4 {
            p[i] = (linear[i] * (s[i] - src_black[i]) * gains[i]).max(0.0)
                * (dst_white - dst_black[i]);
        }
    } else {
        for i in 0..4 {
            let lin = linear[i] * (s[i] - src_black[i]) * gains[i];
            p[i] = log_encode(lin) * dst_white + triangular_dither(x, y, i);
        }
    }

    let row = new_w as usize;
    for i in 0..4 {
        let value = (p[i] + dst_black[i]).round().clamp(0.0, dst_white) as u16;
        let dx = i & 1;
        let dy = i >> 1;
        out[dy * row + x as usize + dx] = value;
    }
}

/// One 4x4 output block of a full-resolution quad-Bayer frame: the four 2x2
/// clusters are linearized per sample with per-cluster shading lookups and
/// written back in place.
#[allow(clippy::too_many_arguments)]
fn process_quad_block(
    src: &[u16],
    out: &mut [u16],
    x: u32,
    y: u32,
    src_w: usize,
    new_w: u32,
    crop_x0: u32,
    crop_y0: u32,
    left: u32,
    top: u32,
    inv_full_w: f32,
    inv_full_h: f32,
    linear: &[f32; 4],
    src_black: &[f32; 4],
    dst_black: &[f32; 4],
    dst_white: f32,
    shading: Option<&ShadingMap>,
    log_active: bool,
) {
    let sx = (x + crop_x0) as usize;
    let sy = (y + crop_y0) as usize;

    let mut s = [0.0f32; 16];
    for quad in 0..4 {
        let qx = sx + (quad & 1) * 2;
        let qy = sy + (quad >> 1) * 2;
        for sub in 0..4 {
            s[quad * 4 + sub] = src[(qy + (sub >> 1)) * src_w + qx + (sub & 1)] as f32;
        }
    }

    let mut gains = [1.0f32; 16];
    if let Some(map) = shading {
        for quad in 0..4 {
            let qx = (quad as u32 & 1) * 4;
            let qy = (quad as u32 >> 1) * 4;
            for sub in 0..4 {
                let px = sx as u32 + left + qx + (sub as u32 & 1);
                let py = sy as u32 + top + qy + (sub as u32 >> 1);
                gains[quad * 4 + sub] =
                    map.sample(quad, px as f32 * inv_full_w, py as f32 * inv_full_h);
            }
        }
    }

    let mut p = [0.0f32; 16];
    for i in 0..16 {
        p[i] = linear[i % 4] * (s[i] - src_black[i % 4]) * gains[i];
    }

    if !log_active {
        for i in 0..16 {
            p[i] = (p[i] * (dst_white - dst_black[i % 4])).max(0.0);
        }
    } else {
        for (i, v) in p.iter_mut().enumerate() {
            *v = log_encode(*v) * dst_white + triangular_dither(x, y, i);
        }
    }

    let row = new_w as usize;
    for quad in 0..4 {
        let ox = x as usize + (quad & 1) * 2;
        let oy = (quad >> 1) * 2;
        for sub in 0..4 {
            let value =
                (p[quad * 4 + sub] + dst_black[(quad * 4 + sub) % 4]).round().clamp(0.0, dst_white)
                    as u16;
            out[(oy + (sub >> 1)) * row + ox + (sub & 1)] = value;
        }
    }
}

/// Log-encode an interleaved RGB buffer for the DirectLog path.
///
/// The curve lands on a 12-bit base depth, reduced further by `reduce_bits`.
/// Returns the encoded samples, the stored bit depth, and the destination
/// white level. No dither here: the 12-bit base has headroom enough.
pub fn log_encode_rgb(rgb: &[u16], reduce_bits: u16) -> (Vec<u16>, u16, u16) {
    let use_bits = 12u16.saturating_sub(reduce_bits).max(1);
    let dst_white = ((1u32 << use_bits) - 1) as u16;
    let white = dst_white as f32;

    let encoded = rgb
        .iter()
        .map(|&v| {
            let normalized = v as f32 / 65535.0;
            (log_encode(normalized) * white).round().clamp(0.0, white) as u16
        })
        .collect();

    (encoded, use_bits, dst_white)
}
