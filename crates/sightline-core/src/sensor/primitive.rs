//! A drawable sensor volume.
//!
//! `SensorPrimitive` ties a [`SensorVolume`] to its [`ResourceCache`] and scan
//! animator. `update` runs once per frame: it brings the cache up to date,
//! samples the scan pose, refreshes per-frame uniforms and appends the draw
//! commands to the frame.

use super::cache::{RenderBackend, ResourceCache};
use super::params::SensorVolumeParameters;
use super::scan::{ScanPlaneAnimator, ScanPose};
use super::volume::SensorVolume;
use crate::error::SightlineError;
use crate::frame::{FrameState, SceneMode};

#[derive(Debug)]
pub struct SensorPrimitive {
    volume: SensorVolume,
    cache: ResourceCache,
    scan: ScanPlaneAnimator,
    destroyed: bool,
}

impl SensorPrimitive {
    pub fn new(params: SensorVolumeParameters) -> Result<Self, SightlineError> {
        Ok(Self {
            volume: SensorVolume::new(params)?,
            cache: ResourceCache::new(),
            scan: ScanPlaneAnimator::new(),
            destroyed: false,
        })
    }

    pub fn volume(&self) -> &SensorVolume {
        &self.volume
    }

    /// Mutable access for setters. Changes take effect on the next update.
    pub fn volume_mut(&mut self) -> &mut SensorVolume {
        &mut self.volume
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    /// Last sampled scan-plane pose.
    pub fn scan_pose(&self) -> Option<ScanPose> {
        self.scan.pose()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Rebuild stale resources and append this frame's draw commands.
    ///
    /// Draws nothing outside [`SceneMode::Scene3D`], when hidden, when the
    /// volume has no extent, or after [`destroy`](Self::destroy). A backend
    /// failure is logged and the frame skipped; the stale tier is retried on
    /// the next update.
    pub fn update(&mut self, frame: &mut FrameState, backend: &mut dyn RenderBackend) {
        if self.destroyed || frame.mode != SceneMode::Scene3D {
            return;
        }
        let params = self.volume.params();
        if !params.show || params.is_degenerate() {
            return;
        }

        if let Err(e) = self.cache.update(&self.volume, backend) {
            tracing::warn!("sensor resource rebuild failed, skipping frame: {e}");
            return;
        }

        let params = self.volume.params();
        let pose = if params.show_scan_plane {
            self.scan.sample(
                frame.time,
                params.scan_plane_rate,
                params.scan_plane_mode,
                params.x_half_angle,
                params.y_half_angle,
            )
        } else {
            None
        };

        let placement = params.model_matrix;
        let mode = params.scan_plane_mode;
        let radius = self.volume.render_radius();
        for command in self.cache.commands_mut() {
            command.refresh(placement, radius, pose.as_ref(), mode);
            frame.commands.push(command.clone());
        }
    }

    /// Release every backend resource. Safe to call more than once.
    pub fn destroy(&mut self, backend: &mut dyn RenderBackend) {
        if self.destroyed {
            return;
        }
        self.cache.release_all(backend);
        self.scan.reset();
        self.destroyed = true;
        tracing::debug!("sensor primitive destroyed");
    }
}
