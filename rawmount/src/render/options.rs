//! Rendering configuration.
//!
//! [`RenderConfig`] is the value-typed bundle the host hands to a virtual
//! filesystem; every transcode decision flows from it. The option bits are a
//! plain newtype over `u32` so a config can be logged and compared cheaply.

use std::fmt;

/// Bitfield of rendering switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderOptions(u32);

impl RenderOptions {
    pub const NONE: RenderOptions = RenderOptions(0);
    pub const DRAFT: RenderOptions = RenderOptions(1 << 0);
    pub const APPLY_VIGNETTE_CORRECTION: RenderOptions = RenderOptions(1 << 1);
    pub const NORMALIZE_SHADING_MAP: RenderOptions = RenderOptions(1 << 2);
    pub const DEBUG_SHADING_MAP: RenderOptions = RenderOptions(1 << 3);
    pub const VIGNETTE_ONLY_COLOR: RenderOptions = RenderOptions(1 << 4);
    pub const NORMALIZE_EXPOSURE: RenderOptions = RenderOptions(1 << 5);
    pub const FRAMERATE_CONVERSION: RenderOptions = RenderOptions(1 << 6);
    pub const CROPPING: RenderOptions = RenderOptions(1 << 7);
    pub const CAMMODEL_OVERRIDE: RenderOptions = RenderOptions(1 << 8);
    pub const LOG_TRANSFORM: RenderOptions = RenderOptions(1 << 9);
    pub const REMOSAIC: RenderOptions = RenderOptions(1 << 10);

    pub fn contains(self, other: RenderOptions) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> RenderOptions {
        RenderOptions(bits)
    }
}

impl std::ops::BitOr for RenderOptions {
    type Output = RenderOptions;

    fn bitor(self, rhs: RenderOptions) -> RenderOptions {
        RenderOptions(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for RenderOptions {
    fn bitor_assign(&mut self, rhs: RenderOptions) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for RenderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(RenderOptions, &str); 11] = [
            (RenderOptions::DRAFT, "DRAFT"),
            (RenderOptions::APPLY_VIGNETTE_CORRECTION, "VIGNETTE_CORRECTION"),
            (RenderOptions::NORMALIZE_SHADING_MAP, "NORMALIZE_SHADING_MAP"),
            (RenderOptions::DEBUG_SHADING_MAP, "DEBUG_SHADING_MAP"),
            (RenderOptions::VIGNETTE_ONLY_COLOR, "VIGNETTE_ONLY_COLOR"),
            (RenderOptions::NORMALIZE_EXPOSURE, "NORMALIZE_EXPOSURE"),
            (RenderOptions::FRAMERATE_CONVERSION, "FRAMERATE_CONVERSION"),
            (RenderOptions::CROPPING, "CROPPING"),
            (RenderOptions::CAMMODEL_OVERRIDE, "CAMMODEL_OVERRIDE"),
            (RenderOptions::LOG_TRANSFORM, "LOG_TRANSFORM"),
            (RenderOptions::REMOSAIC, "REMOSAIC"),
        ];

        if self.0 == 0 {
            return write!(f, "NONE");
        }

        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, " | ")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Sentinel for "leave the CFA phase alone" in [`RenderConfig::cfa_phase`].
pub const CFA_NO_OVERRIDE: &str = "Don't override CFA";

/// Log-curve selection parsed out of [`RenderConfig::log_transform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTransform {
    /// No log curve.
    Off,
    /// Log curve at the source's bit depth.
    KeepInput,
    /// Log curve with the stored depth reduced by this many bits.
    Reduce(u16),
    /// Unrecognized non-empty selection; treated like `KeepInput`.
    Other,
}

impl LogTransform {
    fn parse(label: &str) -> LogTransform {
        match label {
            "" => LogTransform::Off,
            "Keep Input" => LogTransform::KeepInput,
            "Reduce by 2bit" => LogTransform::Reduce(2),
            "Reduce by 4bit" => LogTransform::Reduce(4),
            "Reduce by 6bit" => LogTransform::Reduce(6),
            "Reduce by 8bit" => LogTransform::Reduce(8),
            _ => LogTransform::Other,
        }
    }
}

/// Everything a transcode needs to know, owned by the VFS and replaced
/// atomically on `update_options`.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    pub options: RenderOptions,
    /// Draft divisor; only meaningful with [`RenderOptions::DRAFT`].
    pub draft_scale: u32,
    /// CFR preset name or a numeric frame rate.
    pub cfr_target: String,
    /// "WxH", applied with [`RenderOptions::CROPPING`].
    pub crop_target: String,
    /// Camera model override for the DNG tags.
    pub camera_model: String,
    /// "Dynamic", "Static", or "white/black[,b1,b2,b3]".
    pub levels: String,
    /// Log curve selection; see [`LogTransform`].
    pub log_transform: String,
    /// Static EV ("0.5", "-1ev") or keyframe list ("start:-2, 0.5:0, end:2").
    pub exposure_compensation: String,
    /// Quad-Bayer handling preset.
    pub quad_bayer_option: String,
    /// CFA phase for remosaiced output, or [`CFA_NO_OVERRIDE`].
    pub cfa_phase: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            options: RenderOptions::NONE,
            draft_scale: 1,
            cfr_target: "Prefer Drop Frame".to_string(),
            crop_target: String::new(),
            camera_model: String::new(),
            levels: "Dynamic".to_string(),
            log_transform: String::new(),
            exposure_compensation: String::new(),
            quad_bayer_option: "Remosaic".to_string(),
            cfa_phase: CFA_NO_OVERRIDE.to_string(),
        }
    }
}

impl RenderConfig {
    /// Effective downscale divisor.
    pub fn scale(&self) -> u32 {
        if self.options.contains(RenderOptions::DRAFT) {
            self.draft_scale.max(1)
        } else {
            1
        }
    }

    /// The log curve selection, gated on the LOG_TRANSFORM bit.
    pub fn log_transform(&self) -> LogTransform {
        if self.options.contains(RenderOptions::LOG_TRANSFORM) {
            LogTransform::parse(&self.log_transform)
        } else {
            LogTransform::Off
        }
    }

    /// The crop target, gated on the CROPPING bit.
    pub fn crop_target(&self) -> &str {
        if self.options.contains(RenderOptions::CROPPING) {
            &self.crop_target
        } else {
            ""
        }
    }
}
