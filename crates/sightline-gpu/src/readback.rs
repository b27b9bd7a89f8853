//! Double-buffered asynchronous readback of an offscreen RGBA8 target.
//!
//! Two staging slots alternate: the GPU copies into one while the CPU maps
//! the other. The main thread never blocks on the GPU; while both slots are
//! busy, new frames are skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::context::GpuContext;

const MAP_PENDING: u8 = 0;
const MAP_READY: u8 = 1;
const MAP_FAILED: u8 = 2;

/// Pixels of one consumed readback, rows tightly packed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadbackFrame {
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Idle,
    /// Copy recorded, waiting for the submit.
    Recorded,
    /// `map_async` issued; `serial` orders frames across slots.
    Mapping { serial: u64 },
}

struct ReadbackSlot {
    staging: wgpu::Buffer,
    /// Set by the `map_async` callback.
    mapped: Arc<AtomicU8>,
    state: SlotState,
    format: wgpu::TextureFormat,
}

impl ReadbackSlot {
    fn new(device: &wgpu::Device, size: u64, slot_label: &str) -> Self {
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("sightline_target_staging_{slot_label}")),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        Self {
            staging,
            mapped: Arc::new(AtomicU8::new(MAP_PENDING)),
            state: SlotState::Idle,
            format: wgpu::TextureFormat::Rgba8Unorm,
        }
    }

    fn begin_map(&mut self, serial: u64) {
        self.mapped.store(MAP_PENDING, Ordering::Release);
        let mapped = Arc::clone(&self.mapped);
        self.staging
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let value = if result.is_ok() { MAP_READY } else { MAP_FAILED };
                mapped.store(value, Ordering::Release);
            });
        self.state = SlotState::Mapping { serial };
    }
}

/// Copies a render target into CPU memory without stalling the frame.
///
/// Call [`submit_readback`](Self::submit_readback) while recording, submit
/// the encoder, then [`begin_map_after_submit`](Self::begin_map_after_submit).
/// Poll with [`try_consume`](Self::try_consume) on later frames; it returns
/// the newest finished frame.
pub struct TargetReadback {
    slots: [ReadbackSlot; 2],
    width: u32,
    height: u32,
    padded_bytes_per_row: u32,
    next_serial: u64,
}

impl TargetReadback {
    /// Staging for a `width`×`height` target with four bytes per texel.
    pub fn new(context: &GpuContext, (width, height): (u32, u32)) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let padded_bytes_per_row = padded_bytes_per_row(width);
        let size = u64::from(padded_bytes_per_row) * u64::from(height);
        let device = &context.device;
        Self {
            slots: [
                ReadbackSlot::new(device, size, "a"),
                ReadbackSlot::new(device, size, "b"),
            ],
            width,
            height,
            padded_bytes_per_row,
            next_serial: 0,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Whether a readback is currently in flight.
    pub fn has_pending(&self) -> bool {
        self.slots
            .iter()
            .any(|s| matches!(s.state, SlotState::Mapping { .. }))
    }

    /// Record a copy of `texture` into a free slot.
    ///
    /// Returns `false` without recording when both slots are busy, or when
    /// `texture` does not match the staging size or is not a four-byte
    /// color format. `texture` needs `COPY_SRC`.
    pub fn submit_readback(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        texture: &wgpu::Texture,
    ) -> bool {
        let Some(write_idx) = self.slots.iter().position(|s| s.state == SlotState::Idle) else {
            return false;
        };
        if texture.width() != self.width || texture.height() != self.height {
            tracing::warn!(
                texture = ?(texture.width(), texture.height()),
                staging = ?(self.width, self.height),
                "readback skipped, target size differs from staging"
            );
            return false;
        }
        let format = texture.format();
        if format.block_copy_size(None) != Some(4) {
            tracing::warn!(?format, "readback skipped, unsupported target format");
            return false;
        }

        let slot = &mut self.slots[write_idx];
        encoder.copy_texture_to_buffer(
            texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &slot.staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        slot.format = format;
        slot.state = SlotState::Recorded;
        true
    }

    /// Begin `map_async` on the slot recorded this frame. Call this after
    /// `queue.submit()` for the encoder holding the copy.
    pub fn begin_map_after_submit(&mut self) {
        let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| s.state == SlotState::Recorded)
        else {
            return;
        };
        self.next_serial += 1;
        slot.begin_map(self.next_serial);
    }

    /// Non-blocking poll. Returns the newest frame whose map finished and
    /// releases every finished slot.
    pub fn try_consume(&mut self, device: &wgpu::Device) -> Option<ReadbackFrame> {
        // Drive the GPU event loop without blocking.
        let _ = device.poll(wgpu::PollType::Poll);

        let mut newest: Option<(u64, ReadbackFrame)> = None;
        for slot in &mut self.slots {
            let SlotState::Mapping { serial } = slot.state else {
                continue;
            };
            match slot.mapped.load(Ordering::Acquire) {
                MAP_READY => {}
                MAP_FAILED => {
                    tracing::warn!("target readback map failed, frame dropped");
                    slot.state = SlotState::Idle;
                    continue;
                }
                _ => continue,
            }
            if newest.as_ref().is_none_or(|(s, _)| serial > *s) {
                let bytes = {
                    let data = slot.staging.slice(..).get_mapped_range();
                    unpad_rows(&data, self.width, self.height, self.padded_bytes_per_row)
                };
                newest = Some((
                    serial,
                    ReadbackFrame {
                        width: self.width,
                        height: self.height,
                        format: slot.format,
                        bytes,
                    },
                ));
            }
            slot.staging.unmap();
            slot.state = SlotState::Idle;
        }
        newest.map(|(_, frame)| frame)
    }
}

/// Row pitch of a four-byte-per-texel copy, aligned for buffer copies.
pub fn padded_bytes_per_row(width: u32) -> u32 {
    (width * 4).div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
}

/// Strip the per-row alignment padding from a mapped copy.
fn unpad_rows(data: &[u8], width: u32, height: u32, padded_bytes_per_row: u32) -> Vec<u8> {
    let row = (width * 4) as usize;
    data.chunks(padded_bytes_per_row as usize)
        .take(height as usize)
        .flat_map(|chunk| &chunk[..row])
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_pitch_is_aligned() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
        assert_eq!(padded_bytes_per_row(1), 256);
    }

    #[test]
    fn test_unpad_rows_drops_padding() {
        let pitch = padded_bytes_per_row(2) as usize;
        let mut data = vec![0xEEu8; pitch * 2];
        data[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        data[pitch..pitch + 8].copy_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16]);

        let bytes = unpad_rows(&data, 2, 2, pitch as u32);
        assert_eq!(bytes, (1..=16).collect::<Vec<u8>>());
    }
}
