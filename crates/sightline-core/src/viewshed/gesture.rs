//! Two-click construction of a viewshed.
//!
//! ```text
//! Idle ─start→ AwaitingObserver ─left click→ AwaitingTarget ─click→ Committed
//!                     │                          │  ↺ move (preview)
//!                     └──── escape ──────────────┴──→ Cancelled
//! ```
//! A click whose pick failed falls back to the last previewed aim point; with
//! no preview either, the gesture is cancelled. Failed picks on mouse move
//! and on the first click are ignored. Finished gestures ignore all input.

use glam::DVec3;

use super::shadow::PickSurface;

/// A resolved screen-to-world pick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pick {
    pub position: DVec3,
    pub surface: PickSurface,
}

impl Pick {
    pub fn terrain(position: DVec3) -> Self {
        Self {
            position,
            surface: PickSurface::Terrain,
        }
    }

    pub fn model(position: DVec3) -> Self {
        Self {
            position,
            surface: PickSurface::Model,
        }
    }
}

/// Input fed to the gesture. `None` picks mean nothing was hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureInput {
    LeftClick(Option<Pick>),
    RightClick(Option<Pick>),
    Move(Option<Pick>),
    Escape,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum GestureState {
    #[default]
    Idle,
    AwaitingObserver,
    AwaitingTarget {
        observer: Pick,
        preview: Option<DVec3>,
    },
    Committed {
        observer: Pick,
        target: DVec3,
    },
    Cancelled,
}

/// What an input changed, for the host to react to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureEvent {
    Ignored,
    ObserverPlaced(Pick),
    Preview { observer: Pick, target: DVec3 },
    Committed { observer: Pick, target: DVec3 },
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct ConstructionGesture {
    state: GestureState,
}

impl ConstructionGesture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    /// Whether the gesture is consuming input.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            GestureState::AwaitingObserver | GestureState::AwaitingTarget { .. }
        )
    }

    /// Begin (or restart) a gesture.
    pub fn start(&mut self) {
        self.state = GestureState::AwaitingObserver;
    }

    /// Abort from outside, e.g. when the host tool is switched.
    pub fn cancel(&mut self) -> GestureEvent {
        if !self.is_active() {
            return GestureEvent::Ignored;
        }
        self.state = GestureState::Cancelled;
        GestureEvent::Cancelled
    }

    pub fn handle(&mut self, input: GestureInput) -> GestureEvent {
        if input == GestureInput::Escape {
            return self.cancel();
        }

        match (self.state, input) {
            (GestureState::AwaitingObserver, GestureInput::LeftClick(Some(pick))) => {
                self.state = GestureState::AwaitingTarget {
                    observer: pick,
                    preview: None,
                };
                GestureEvent::ObserverPlaced(pick)
            }
            (GestureState::AwaitingTarget { observer, .. }, GestureInput::Move(Some(pick))) => {
                if pick.position == observer.position {
                    return GestureEvent::Ignored;
                }
                self.state = GestureState::AwaitingTarget {
                    observer,
                    preview: Some(pick.position),
                };
                GestureEvent::Preview {
                    observer,
                    target: pick.position,
                }
            }
            (
                GestureState::AwaitingTarget { observer, preview },
                GestureInput::LeftClick(pick) | GestureInput::RightClick(pick),
            ) => {
                let target = pick.map(|p| p.position).or(preview);
                match target {
                    Some(target) if target != observer.position => {
                        self.state = GestureState::Committed { observer, target };
                        GestureEvent::Committed { observer, target }
                    }
                    _ => {
                        self.state = GestureState::Cancelled;
                        GestureEvent::Cancelled
                    }
                }
            }
            _ => GestureEvent::Ignored,
        }
    }
}
