//! DNG OpcodeList2 gain maps.
//!
//! When vignette correction is not baked into the pixels, the frame's lens
//! shading map travels as a GainMap opcode so downstream raw processors can
//! apply it themselves. Opcode list payloads are always big-endian,
//! regardless of the file's byte order.

use tracing::debug;

use crate::shading::ShadingMap;

/// DNG opcode identifier for GainMap.
pub const OPCODE_GAIN_MAP: u32 = 9;

/// Opcode flag: optional for readers that do not understand it.
const FLAG_OPTIONAL: u32 = 1;

/// DNG version stamp carried by each emitted opcode.
const OPCODE_DNG_VERSION: [u8; 4] = [1, 3, 0, 0];

/// Gains above this are treated as corrupt and clamped.
const MAX_GAIN: f32 = 16.0;

/// A GainMap opcode: grid geometry plus plane-major gain data.
#[derive(Debug, Clone, PartialEq)]
pub struct GainMap {
    pub top: u32,
    pub left: u32,
    pub bottom: u32,
    pub right: u32,
    pub plane: u32,
    pub planes: u32,
    pub row_pitch: u32,
    pub col_pitch: u32,
    pub map_points_v: u32,
    pub map_points_h: u32,
    pub map_spacing_v: f64,
    pub map_spacing_h: f64,
    pub map_origin_v: f64,
    pub map_origin_h: f64,
    pub map_planes: u32,
    pub gains: Vec<f32>,
}

impl GainMap {
    /// Build a gain map covering `width x height` active pixels at the given
    /// crop offset from a frame's shading map.
    ///
    /// Non-finite or non-positive gains become 1.0 and anything above
    /// [`MAX_GAIN`] is clamped, so a corrupt map cannot poison readers.
    pub fn from_shading_map(
        map: &ShadingMap,
        width: u32,
        height: u32,
        left: u32,
        top: u32,
    ) -> Option<GainMap> {
        let points_v = map.height() as u32;
        let points_h = map.width() as u32;
        if points_v == 0 || points_h == 0 || width == 0 || height == 0 {
            return None;
        }

        let row_pitch = if points_v > 1 {
            ((height - 1) / (points_v - 1)).max(1)
        } else {
            height
        };
        let col_pitch = if points_h > 1 {
            ((width - 1) / (points_h - 1)).max(1)
        } else {
            width
        };

        let map_planes = 4u32;
        let mut gains = Vec::with_capacity((points_v * points_h * map_planes) as usize);
        for plane in 0..map_planes as usize {
            for &gain in &map.planes()[plane] {
                let sanitized = if !gain.is_finite() || gain <= 0.0 {
                    1.0
                } else {
                    gain.min(MAX_GAIN)
                };
                gains.push(sanitized);
            }
        }

        Some(GainMap {
            top,
            left,
            bottom: top + height,
            right: left + width,
            plane: 0,
            planes: map_planes,
            row_pitch,
            col_pitch,
            map_points_v: points_v,
            map_points_h: points_h,
            map_spacing_v: f64::from(row_pitch) / f64::from(height),
            map_spacing_h: f64::from(col_pitch) / f64::from(width),
            map_origin_v: f64::from(top) / f64::from(height),
            map_origin_h: f64::from(left) / f64::from(width),
            map_planes,
            gains,
        })
    }

    fn parameter_bytes(&self) -> u32 {
        // 11 u32 fields + 4 f64 fields + gain payload.
        11 * 4 + 4 * 8 + self.gains.len() as u32 * 4
    }
}

/// Serialize a list of gain-map opcodes into an OpcodeList2 payload.
pub fn encode_opcode_list(maps: &[GainMap]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(maps.len() as u32).to_be_bytes());

    for map in maps {
        out.extend_from_slice(&OPCODE_GAIN_MAP.to_be_bytes());
        out.extend_from_slice(&OPCODE_DNG_VERSION);
        out.extend_from_slice(&FLAG_OPTIONAL.to_be_bytes());
        out.extend_from_slice(&map.parameter_bytes().to_be_bytes());

        for v in [
            map.top,
            map.left,
            map.bottom,
            map.right,
            map.plane,
            map.planes,
            map.row_pitch,
            map.col_pitch,
            map.map_points_v,
            map.map_points_h,
        ] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        for v in [
            map.map_spacing_v,
            map.map_spacing_h,
            map.map_origin_v,
            map.map_origin_h,
        ] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        out.extend_from_slice(&map.map_planes.to_be_bytes());
        for &gain in &map.gains {
            out.extend_from_slice(&gain.to_be_bytes());
        }
    }

    out
}

/// Walk an OpcodeList2 payload and return the gain maps it carries.
///
/// Unknown opcodes are skipped via their declared parameter size; a
/// truncated payload yields whatever parsed cleanly before the damage.
pub fn parse_opcode_list(payload: &[u8]) -> Vec<GainMap> {
    let mut maps = Vec::new();

    if payload.len() < 4 {
        return maps;
    }

    let count = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    let mut at = 4usize;

    for _ in 0..count {
        if at + 16 > payload.len() {
            break;
        }
        let id = read_u32(payload, at);
        let param_bytes = read_u32(payload, at + 12) as usize;
        let params_start = at + 16;
        if params_start + param_bytes > payload.len() {
            break;
        }

        if id == OPCODE_GAIN_MAP {
            if let Some(map) = parse_gain_map(&payload[params_start..params_start + param_bytes]) {
                maps.push(map);
            } else {
                debug!(param_bytes, "Skipping malformed gain map opcode");
            }
        }

        at = params_start + param_bytes;
    }

    maps
}

fn parse_gain_map(params: &[u8]) -> Option<GainMap> {
    if params.len() < 11 * 4 + 4 * 8 {
        return None;
    }

    let u = |i: usize| read_u32(params, i * 4);
    let top = u(0);
    let left = u(1);
    let bottom = u(2);
    let right = u(3);
    let plane = u(4);
    let planes = u(5);
    let row_pitch = u(6);
    let col_pitch = u(7);
    let map_points_v = u(8);
    let map_points_h = u(9);

    let f = |at: usize| {
        f64::from_be_bytes([
            params[at],
            params[at + 1],
            params[at + 2],
            params[at + 3],
            params[at + 4],
            params[at + 5],
            params[at + 6],
            params[at + 7],
        ])
    };
    let map_spacing_v = f(40);
    let map_spacing_h = f(48);
    let map_origin_v = f(56);
    let map_origin_h = f(64);
    let map_planes = read_u32(params, 72);

    let gain_count = map_points_v
        .checked_mul(map_points_h)?
        .checked_mul(map_planes)? as usize;
    let gains_start = 76;
    if gains_start + gain_count * 4 > params.len() {
        return None;
    }

    let gains = (0..gain_count)
        .map(|i| {
            let at = gains_start + i * 4;
            f32::from_be_bytes([params[at], params[at + 1], params[at + 2], params[at + 3]])
        })
        .collect();

    Some(GainMap {
        top,
        left,
        bottom,
        right,
        plane,
        planes,
        row_pitch,
        col_pitch,
        map_points_v,
        map_points_h,
        map_spacing_v,
        map_spacing_h,
        map_origin_v,
        map_origin_h,
        map_planes,
        gains,
    })
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_map() -> ShadingMap {
        ShadingMap::new(
            std::array::from_fn(|p| (0..6).map(|i| 1.0 + p as f32 + i as f32 * 0.1).collect()),
            3,
            2,
        )
        .unwrap()
    }

    #[test]
    fn test_round_trip() {
        let gain_map = GainMap::from_shading_map(&test_map(), 1920, 1080, 0, 0).unwrap();
        let payload = encode_opcode_list(&[gain_map.clone()]);
        let parsed = parse_opcode_list(&payload);
        assert_eq!(parsed, vec![gain_map]);
    }

    #[test]
    fn test_sanitizes_bad_gains() {
        let mut map = test_map();
        // Poison a few samples through the public constructor path.
        let mut planes = map.planes().clone();
        planes[0][0] = f32::NAN;
        planes[1][1] = -3.0;
        planes[2][2] = 100.0;
        map = ShadingMap::new(planes, 3, 2).unwrap();

        let gain_map = GainMap::from_shading_map(&map, 640, 480, 0, 0).unwrap();
        assert_eq!(gain_map.gains[0], 1.0);
        assert_eq!(gain_map.gains[6 + 1], 1.0);
        assert_eq!(gain_map.gains[12 + 2], MAX_GAIN);
    }

    #[test]
    fn test_geometry_covers_active_area() {
        let gain_map = GainMap::from_shading_map(&test_map(), 1280, 720, 40, 20).unwrap();
        assert_eq!(gain_map.right, 1320);
        assert_eq!(gain_map.bottom, 740);
        assert_eq!(gain_map.map_points_h, 3);
        assert_eq!(gain_map.map_points_v, 2);
        assert!((gain_map.map_origin_h - 40.0 / 1280.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_opcodes_are_skipped() {
        let gain_map = GainMap::from_shading_map(&test_map(), 64, 64, 0, 0).unwrap();

        // List with a bogus opcode ahead of the gain map.
        let mut payload = Vec::new();
        payload.extend_from_slice(&2u32.to_be_bytes());
        payload.extend_from_slice(&1234u32.to_be_bytes()); // unknown id
        payload.extend_from_slice(&[1, 3, 0, 0]);
        payload.extend_from_slice(&0u32.to_be_bytes()); // flags
        payload.extend_from_slice(&4u32.to_be_bytes()); // param bytes
        payload.extend_from_slice(&0u32.to_be_bytes()); // params

        let single = encode_opcode_list(&[gain_map.clone()]);
        payload.extend_from_slice(&single[4..]); // strip the count header

        let parsed = parse_opcode_list(&payload);
        assert_eq!(parsed, vec![gain_map]);
    }

    #[test]
    fn test_truncated_payload_is_tolerated() {
        let gain_map = GainMap::from_shading_map(&test_map(), 64, 64, 0, 0).unwrap();
        let payload = encode_opcode_list(&[gain_map]);
        assert!(parse_opcode_list(&payload[..payload.len() / 2]).is_empty());
        assert!(parse_opcode_list(&[]).is_empty());
    }
}
