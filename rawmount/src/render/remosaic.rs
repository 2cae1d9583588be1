//! RGB to Bayer remosaicing.
//!
//! Projects an interleaved RGB buffer onto a Bayer grid by keeping, at each
//! site, the channel the CFA phase dictates. Lossy by construction: two of
//! every three samples are discarded.

use crate::source::CfaPhase;

/// Remosaic `width * height` RGB pixels into a single-channel Bayer buffer.
pub fn remosaic_rgb_to_bayer(rgb: &[u16], width: u32, height: u32, phase: CfaPhase) -> Vec<u16> {
    debug_assert_eq!(rgb.len(), (width * height * 3) as usize);

    let pattern = phase.pattern();
    let mut out = Vec::with_capacity((width * height) as usize);

    for y in 0..height as usize {
        for x in 0..width as usize {
            let cfa_index = (y % 2) * 2 + (x % 2);
            let channel = pattern[cfa_index] as usize;
            out.push(rgb[(y * width as usize + x) * 3 + channel]);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 2x2 frame where every pixel has distinct R/G/B values.
    fn test_frame() -> Vec<u16> {
        vec![
            100, 200, 300, /* pixel (0,0) */
            110, 210, 310, /* pixel (1,0) */
            120, 220, 320, /* pixel (0,1) */
            130, 230, 330, /* pixel (1,1) */
        ]
    }

    #[test]
    fn test_rggb_keeps_expected_channels() {
        let bayer = remosaic_rgb_to_bayer(&test_frame(), 2, 2, CfaPhase::Rggb);
        // R at (0,0), G at (1,0), G at (0,1), B at (1,1).
        assert_eq!(bayer, vec![100, 210, 220, 330]);
    }

    #[test]
    fn test_bggr_keeps_expected_channels() {
        let bayer = remosaic_rgb_to_bayer(&test_frame(), 2, 2, CfaPhase::Bggr);
        assert_eq!(bayer, vec![300, 210, 220, 130]);
    }

    #[test]
    fn test_pattern_repeats_across_blocks() {
        let mut rgb = Vec::new();
        for i in 0..16u16 {
            rgb.extend_from_slice(&[i, 1000 + i, 2000 + i]);
        }
        let bayer = remosaic_rgb_to_bayer(&rgb, 4, 4, CfaPhase::Grbg);

        // Row 0 alternates G, R; row 1 alternates B, G.
        assert_eq!(bayer[0], 1000);
        assert_eq!(bayer[1], 1);
        assert_eq!(bayer[4], 2004);
        assert_eq!(bayer[5], 1005);
    }
}
