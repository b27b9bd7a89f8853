//! Viewshed analysis: observer frustum, light camera, shadow map and the
//! per-pixel visibility classifier, plus the interactive construction
//! gesture.

pub mod analysis;
pub mod classify;
pub mod frustum;
pub mod gesture;
pub mod light;
pub mod shadow;
