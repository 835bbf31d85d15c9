//! Render configuration shared by the binaries
//!
//! [`RenderConfig`] is plain data. Binaries fill it from command line
//! flags and call [`RenderConfig::validated`] before handing it to the
//! backend and the G-buffer.

use crate::gfx::rendering::DEFAULT_ATTACHMENTS;

/// Screen, G-buffer and frame pacing settings
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    /// Upper frame rate, `None` for unlimited
    pub fps_limit: Option<f64>,
    pub clear_color: [f32; 4],
    /// Thumbnails in the G-buffer debug view are `1/thumbnail_divisor` of
    /// the screen in each direction
    pub thumbnail_divisor: u32,
    /// Color attachments of the G-buffer
    pub attachments: u32,
    /// MSAA sample count, 1 disables multisampling
    pub samples: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 800,
            fps_limit: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            thumbnail_divisor: 5,
            attachments: DEFAULT_ATTACHMENTS,
            samples: 1,
        }
    }
}

impl RenderConfig {
    /// Clamps every field into its usable range.
    ///
    /// Sizes, divisor and attachment count become at least 1, the sample
    /// count is rounded down to a power of two, and a zero or non-finite
    /// frame rate limit is dropped.
    pub fn validated(self) -> Self {
        let validated = Self {
            width: self.width.max(1),
            height: self.height.max(1),
            fps_limit: self.fps_limit.filter(|fps| fps.is_finite() && *fps > 0.0),
            clear_color: self
                .clear_color
                .map(|c| if c.is_finite() { c.clamp(0.0, 1.0) } else { 0.0 }),
            thumbnail_divisor: self.thumbnail_divisor.max(1),
            attachments: self.attachments.max(1),
            samples: crate::gfx::math::power_of_two_below(self.samples),
        };
        if validated != self {
            log::warn!("render configuration adjusted: {:?}", validated);
        }
        validated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = RenderConfig::default();
        assert_eq!(config.validated(), config);
        assert_eq!(config.attachments, 6);
    }

    #[test]
    fn test_validated_clamps() {
        let config = RenderConfig {
            width: 0,
            height: 0,
            fps_limit: Some(0.0),
            clear_color: [2.0, -1.0, f32::NAN, 0.5],
            thumbnail_divisor: 0,
            attachments: 0,
            samples: 6,
        }
        .validated();

        assert_eq!((config.width, config.height), (1, 1));
        assert_eq!(config.fps_limit, None);
        assert_eq!(config.clear_color, [1.0, 0.0, 0.0, 0.5]);
        assert_eq!(config.thumbnail_divisor, 1);
        assert_eq!(config.attachments, 1);
        assert_eq!(config.samples, 4);
    }
}
