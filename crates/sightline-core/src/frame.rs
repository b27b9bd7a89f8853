//! Per-frame state handed to primitives by the host scene.

use crate::sensor::commands::DrawCommand;

/// How the host scene is currently rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SceneMode {
    /// Full 3D globe / scene. The only mode sensors draw in.
    #[default]
    Scene3D,
    /// Columbus view (2.5D).
    Columbus,
    /// Flat 2D map.
    Scene2D,
    /// Transitioning between modes.
    Morphing,
}

/// State of a single frame: render mode, simulated time, and the command list
/// primitives append their draw commands to.
#[derive(Debug, Default)]
pub struct FrameState {
    pub mode: SceneMode,
    /// Simulated clock time in seconds. Pausing or scrubbing the host clock
    /// pauses or scrubs everything driven from it.
    pub time: f64,
    pub commands: Vec<DrawCommand>,
}

impl FrameState {
    /// Begin a frame with an empty command list.
    pub fn new(mode: SceneMode, time: f64) -> Self {
        Self {
            mode,
            time,
            commands: Vec::new(),
        }
    }
}
