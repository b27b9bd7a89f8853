//! Rectangular sensor volumes: geometry, parameters, resource caching, draw
//! command assembly and the scan-plane sweep.

pub mod cache;
pub mod commands;
pub mod geometry;
pub mod params;
pub mod primitive;
pub mod scan;
pub mod visualizer;
pub mod volume;

#[cfg(test)]
pub(crate) mod testing;
