//! Precondition and environment errors reported by the core.
//!
//! Every setter and constructor validates its inputs synchronously and returns
//! one of these; the target object is left unchanged on error.

/// Errors produced by the sightline core.
#[derive(Debug, thiserror::Error)]
pub enum SightlineError {
    #[error("radius must be non-negative, got {0}")]
    NegativeRadius(f64),

    #[error("half-angle must lie in [0, π/2), got {0} rad")]
    HalfAngleOutOfRange(f64),

    #[error("distance must be non-negative, got {0}")]
    NegativeDistance(f64),

    #[error("view angle must lie in (0°, 180°), got {0}°")]
    ViewAngleOutOfRange(f64),

    #[error("pitch must lie in (-90°, 90°), got {0}°")]
    PitchOutOfRange(f64),

    #[error("alpha must lie in [0, 1], got {0}")]
    AlphaOutOfRange(f32),

    #[error("tessellation must be at least {min}, got {got}")]
    InvalidTessellation { got: u32, min: u32 },

    #[error("scan plane rate must be positive and finite, got {0}")]
    InvalidScanRate(f64),

    #[error("intersection width must be non-negative and finite, got {0}")]
    InvalidIntersectionWidth(f32),

    #[error("shadow map size must be a power of two in [{min}, {max}], got {got}")]
    InvalidShadowMapSize { got: u32, min: u32, max: u32 },

    #[error("{0} must be finite")]
    NonFinite(&'static str),

    #[error("observer is {0} m from the globe center, light up axis is undefined")]
    ObserverNearCenter(f64),

    #[error("view direction is parallel to the up axis")]
    DegenerateLightFrame,

    #[error("observer and target coincide")]
    CoincidentTarget,

    #[error("render backend error: {0}")]
    Backend(#[from] crate::sensor::cache::BackendError),

    #[error("invalid preset: {0}")]
    Preset(#[from] serde_json::Error),
}

/// Reject NaN and infinities for a named input.
pub(crate) fn ensure_finite(value: f64, what: &'static str) -> Result<(), SightlineError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SightlineError::NonFinite(what))
    }
}
