//! A viewshed analysis: observer frustum, shadow map lifecycle and
//! classification on the CPU.
//!
//! The GPU renderer mirrors this lifecycle with real textures; both compare
//! the frustum's shadow generation against the one they last built.

use glam::DVec3;

use super::classify::{Classification, VisibilityClassifier};
use super::frustum::{ObserverFrustum, ViewshedSettings};
use super::gesture::Pick;
use super::shadow::{ShadowDepthMap, Triangle};
use crate::color::Color;
use crate::error::SightlineError;
use crate::geodesy::ReferenceFrame;

#[derive(Debug, Clone)]
pub struct Viewshed {
    frustum: ObserverFrustum,
    occluders: Vec<Triangle>,
    shadow_map: Option<ShadowDepthMap>,
    built_generation: u64,
    destroyed: bool,
}

impl Viewshed {
    pub fn new(frustum: ObserverFrustum) -> Self {
        Self {
            frustum,
            occluders: Vec::new(),
            shadow_map: None,
            built_generation: 0,
            destroyed: false,
        }
    }

    /// Build from a committed construction gesture.
    pub fn from_picks(
        frame: ReferenceFrame,
        observer: Pick,
        target: DVec3,
        settings: ViewshedSettings,
    ) -> Result<Self, SightlineError> {
        let mut frustum =
            ObserverFrustum::with_settings(frame, observer.position, target, settings)?;
        frustum.set_pick_surface(observer.surface);
        Ok(Self::new(frustum))
    }

    pub fn frustum(&self) -> &ObserverFrustum {
        &self.frustum
    }

    /// Mutable access for setters. The shadow map follows on the next update.
    pub fn frustum_mut(&mut self) -> &mut ObserverFrustum {
        &mut self.frustum
    }

    pub fn shadow_map(&self) -> Option<&ShadowDepthMap> {
        self.shadow_map.as_ref()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Replace the scene geometry the shadow map is rendered from.
    pub fn set_occluders(&mut self, occluders: Vec<Triangle>) {
        self.occluders = occluders;
        self.built_generation = 0;
    }

    pub fn needs_shadow_update(&self) -> bool {
        !self.destroyed
            && self.frustum.settings().enabled
            && self.built_generation != self.frustum.shadow_generation()
    }

    /// Regenerate the shadow map if the light or filtering changed.
    pub fn update(&mut self) -> bool {
        if !self.needs_shadow_update() {
            return false;
        }
        let size = self.frustum.settings().shadow_map_size;
        self.shadow_map = Some(ShadowDepthMap::render(
            self.frustum.light_camera(),
            size,
            &self.occluders,
        ));
        self.built_generation = self.frustum.shadow_generation();
        tracing::debug!(size, generation = self.built_generation, "viewshed shadow map rebuilt");
        true
    }

    /// Classify a scene point. `None` when disabled, destroyed or not built.
    pub fn classify(&self, point: Option<DVec3>, normal: Option<DVec3>) -> Option<Classification> {
        if self.destroyed || !self.frustum.settings().enabled {
            return None;
        }
        let map = self.shadow_map.as_ref()?;
        Some(VisibilityClassifier::new(&self.frustum, map).classify(point, normal))
    }

    /// Tint a pixel color; untouched when disabled or destroyed.
    pub fn shade(&self, color: Color, point: Option<DVec3>, normal: Option<DVec3>) -> Color {
        if self.destroyed || !self.frustum.settings().enabled {
            return color;
        }
        match &self.shadow_map {
            Some(map) => VisibilityClassifier::new(&self.frustum, map).shade(color, point, normal),
            None => color,
        }
    }

    /// Drop the shadow map and scene data. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.shadow_map = None;
        self.occluders.clear();
        self.destroyed = true;
        tracing::debug!("viewshed destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewshed::shadow::PickSurface;

    fn settings() -> ViewshedSettings {
        ViewshedSettings {
            shadow_map_size: 64,
            ..Default::default()
        }
    }

    fn viewshed() -> Viewshed {
        Viewshed::from_picks(
            ReferenceFrame::y_up(),
            Pick::model(DVec3::new(0.0, 2.0, 0.0)),
            DVec3::new(0.0, 2.0, -100.0),
            settings(),
        )
        .expect("valid picks")
    }

    #[test]
    fn test_picks_set_bias_and_build_on_update() {
        let mut v = viewshed();
        assert_eq!(v.frustum().pick_surface(), PickSurface::Model);
        assert!(v.needs_shadow_update());
        assert!(v.update());
        assert!(!v.update());
        assert_eq!(v.shadow_map().map(|m| m.size()), Some(64));
    }

    #[test]
    fn test_frustum_change_marks_shadow_stale() {
        let mut v = viewshed();
        v.update();
        v.frustum_mut()
            .set_view_distance(80.0)
            .expect("positive distance");
        assert!(v.needs_shadow_update());
        v.update();
        v.frustum_mut().set_alpha(0.2).expect("alpha in range");
        assert!(!v.needs_shadow_update());
    }

    #[test]
    fn test_occluders_change_classification() {
        let mut v = viewshed();
        v.update();
        let ground = Some(DVec3::new(0.0, 0.0, -50.0));
        assert_eq!(v.classify(ground, None), Some(Classification::Visible));

        v.set_occluders(
            Triangle::quad(
                DVec3::new(-10.0, 0.0, -25.0),
                DVec3::new(10.0, 0.0, -25.0),
                DVec3::new(10.0, 5.0, -25.0),
                DVec3::new(-10.0, 5.0, -25.0),
            )
            .to_vec(),
        );
        v.update();
        assert_eq!(v.classify(ground, None), Some(Classification::Occluded));
    }

    #[test]
    fn test_disabled_viewshed_leaves_color() {
        let mut v = viewshed();
        v.update();
        v.frustum_mut().set_enabled(false);
        let p = Some(DVec3::new(0.0, 0.0, -50.0));
        assert_eq!(v.shade(Color::BLACK, p, None), Color::BLACK);
        assert_eq!(v.classify(p, None), None);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut v = viewshed();
        v.update();
        v.destroy();
        v.destroy();
        assert!(v.is_destroyed());
        assert!(v.shadow_map().is_none());
        assert!(!v.update());
        assert_eq!(v.classify(Some(DVec3::ZERO), None), None);
    }
}
