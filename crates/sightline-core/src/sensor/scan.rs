//! Scan-plane sweep animation driven by the host's simulated clock.
//!
//! ```text
//! p     = max(0, (elapsed mod rate) / rate)
//! sweep = 2 · half · p − half
//! ```
//! Horizontal mode sweeps across the y half-angle and rotates about X;
//! vertical mode sweeps across the x half-angle and rotates about Y. The
//! perpendicular extent narrows with the sweep the same way the sector's
//! effective arcs do.

use glam::DMat4;

use super::params::ScanPlaneMode;

/// Where the scan plane is this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanPose {
    /// Fraction of the current sweep, in `[0, 1)`.
    pub percentage: f64,
    /// Current sweep angle in radians.
    pub sweep_angle: f64,
    /// Half-extent of the wedge along local X.
    pub scan_x: f64,
    /// Half-extent of the wedge along local Y.
    pub scan_y: f64,
    /// Rotation applied between placement and radius scale.
    pub rotation: DMat4,
}

impl ScanPose {
    /// Plane model matrix: `placement · rotation · scale(radius)`.
    pub fn model_matrix(&self, placement: DMat4, radius: f64) -> DMat4 {
        placement * self.rotation * DMat4::from_scale(glam::DVec3::splat(radius))
    }
}

/// Tracks the reference epoch and last sample of the simulated clock.
#[derive(Debug, Clone, Default)]
pub struct ScanPlaneAnimator {
    epoch: Option<f64>,
    last_time: Option<f64>,
    pose: Option<ScanPose>,
}

impl ScanPlaneAnimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent pose, if any sample has been taken.
    pub fn pose(&self) -> Option<ScanPose> {
        self.pose
    }

    /// Forget the epoch; the next sample starts a new sweep.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Advance to `time` and return the pose.
    ///
    /// Non-finite times are ignored and the previous pose is kept. A time
    /// earlier than the last sample restarts the sweep at `time`.
    pub fn sample(
        &mut self,
        time: f64,
        rate: f64,
        mode: ScanPlaneMode,
        x_half_angle: f64,
        y_half_angle: f64,
    ) -> Option<ScanPose> {
        if !time.is_finite() || !(rate.is_finite() && rate > 0.0) {
            return self.pose;
        }

        let epoch = match (self.epoch, self.last_time) {
            (Some(epoch), Some(last)) if time >= last => epoch,
            (Some(_), Some(last)) => {
                tracing::debug!(from = last, to = time, "scan plane clock moved backward, resetting");
                time
            }
            _ => time,
        };
        self.epoch = Some(epoch);
        self.last_time = Some(time);

        let elapsed = time - epoch;
        let percentage = ((elapsed % rate) / rate).max(0.0);
        let pose = pose_at(percentage, mode, x_half_angle, y_half_angle);
        self.pose = Some(pose);
        Some(pose)
    }
}

/// Pose for a sweep fraction.
pub fn pose_at(
    percentage: f64,
    mode: ScanPlaneMode,
    x_half_angle: f64,
    y_half_angle: f64,
) -> ScanPose {
    match mode {
        ScanPlaneMode::Horizontal => {
            let sweep = 2.0 * y_half_angle * percentage - y_half_angle;
            ScanPose {
                percentage,
                sweep_angle: sweep,
                scan_x: (sweep.cos() * x_half_angle.tan()).atan(),
                scan_y: sweep,
                rotation: DMat4::from_rotation_x(sweep),
            }
        }
        ScanPlaneMode::Vertical => {
            let sweep = 2.0 * x_half_angle * percentage - x_half_angle;
            ScanPose {
                percentage,
                sweep_angle: sweep,
                scan_x: sweep,
                scan_y: (sweep.cos() * y_half_angle.tan()).atan(),
                rotation: DMat4::from_rotation_y(sweep),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_sweep_is_periodic() {
        let rate = 3.0;
        let mut anim = ScanPlaneAnimator::new();
        anim.sample(100.0, rate, ScanPlaneMode::Horizontal, 0.4, 0.3);
        let a = anim
            .sample(101.25, rate, ScanPlaneMode::Horizontal, 0.4, 0.3)
            .expect("finite time yields a pose");
        let b = anim
            .sample(101.25 + rate, rate, ScanPlaneMode::Horizontal, 0.4, 0.3)
            .expect("finite time yields a pose");
        assert!((a.sweep_angle - b.sweep_angle).abs() < EPSILON);
    }

    #[test]
    fn test_sweep_starts_at_negative_half_angle() {
        let mut anim = ScanPlaneAnimator::new();
        let pose = anim
            .sample(42.0, 2.0, ScanPlaneMode::Horizontal, 0.4, 0.3)
            .expect("finite time yields a pose");
        assert!((pose.sweep_angle + 0.3).abs() < EPSILON);
        assert!((pose.scan_x - (0.3_f64.cos() * 0.4_f64.tan()).atan()).abs() < EPSILON);
    }

    #[test]
    fn test_backward_jump_resets_epoch() {
        let mut anim = ScanPlaneAnimator::new();
        anim.sample(50.0, 4.0, ScanPlaneMode::Vertical, 0.5, 0.5);
        anim.sample(53.0, 4.0, ScanPlaneMode::Vertical, 0.5, 0.5);
        let pose = anim
            .sample(10.0, 4.0, ScanPlaneMode::Vertical, 0.5, 0.5)
            .expect("finite time yields a pose");
        assert!(pose.percentage.is_finite());
        assert!(pose.percentage >= 0.0);
        assert!((pose.sweep_angle + 0.5).abs() < EPSILON);

        let later = anim
            .sample(11.0, 4.0, ScanPlaneMode::Vertical, 0.5, 0.5)
            .expect("finite time yields a pose");
        assert!((later.percentage - 0.25).abs() < EPSILON);
    }

    #[test]
    fn test_non_finite_time_keeps_pose() {
        let mut anim = ScanPlaneAnimator::new();
        assert!(
            anim.sample(f64::NAN, 1.0, ScanPlaneMode::Horizontal, 0.2, 0.2)
                .is_none()
        );
        let first = anim.sample(1.0, 1.0, ScanPlaneMode::Horizontal, 0.2, 0.2);
        let again = anim.sample(f64::INFINITY, 1.0, ScanPlaneMode::Horizontal, 0.2, 0.2);
        assert_eq!(first, again);
    }

    #[test]
    fn test_vertical_mode_rotates_about_y() {
        let pose = pose_at(1.0, ScanPlaneMode::Vertical, 0.6, 0.2);
        assert!((pose.scan_x - 0.6).abs() < EPSILON);
        let boresight = pose.rotation.transform_vector3(glam::DVec3::Z);
        assert!(boresight.y.abs() < EPSILON);
        assert!((boresight.x - 0.6_f64.sin()).abs() < EPSILON);
    }
}
