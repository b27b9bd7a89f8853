//! Linear RGBA color used by sensor materials and viewshed tints.

use serde::{Deserialize, Serialize};

/// Linear RGBA color, components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color(pub [f32; 4]);

impl Color {
    pub const WHITE: Self = Self([1.0, 1.0, 1.0, 1.0]);
    pub const BLACK: Self = Self([0.0, 0.0, 0.0, 1.0]);
    pub const GREEN: Self = Self([0.0, 1.0, 0.0, 1.0]);
    pub const RED: Self = Self([1.0, 0.0, 0.0, 1.0]);
    pub const YELLOW: Self = Self([1.0, 1.0, 0.0, 1.0]);

    /// Build a color from components.
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self([r, g, b, a])
    }

    /// Alpha component.
    pub fn alpha(&self) -> f32 {
        self.0[3]
    }

    /// Whether blending is required to draw this color.
    pub fn is_translucent(&self) -> bool {
        self.0[3] < 1.0
    }

    /// Same color with a different alpha.
    pub fn with_alpha(self, alpha: f32) -> Self {
        let [r, g, b, _] = self.0;
        Self([r, g, b, alpha])
    }

    /// Linear blend toward `other` by `t`, keeping this color's alpha.
    ///
    /// ```text
    /// out.rgb = self.rgb × (1 − t) + other.rgb × t
    /// ```
    pub fn mix(self, other: Color, t: f32) -> Self {
        let mut out = self.0;
        for c in 0..3 {
            out[c] = self.0[c] + (other.0[c] - self.0[c]) * t;
        }
        Self(out)
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl From<[f32; 4]> for Color {
    fn from(value: [f32; 4]) -> Self {
        Self(value)
    }
}
