//! Bevy systems for sensors and viewsheds.
//!
//! These systems are the ONLY place sightline state changes. The host sends
//! `SightlineCommand`s, Bevy processes them, updates the visualizers and the
//! gesture, then records the GPU passes and debug gizmos. Finished frames
//! come back through an async readback into the `ViewshedImage`.

use bevy::asset::RenderAssetUsages;
use bevy::prelude::*;
use bevy::render::render_resource::{Extent3d, TextureDimension, TextureFormat};
use bevy::window::PrimaryWindow;
use glam::{DMat4, DQuat, DVec3};

use sightline_core::sensor::geometry::build_sector;
use sightline_core::sensor::volume::INFINITE_RADIUS_EXTENT;
use sightline_core::{FrameState, GestureInput, LightCamera, SensorVolumeParameters};
use sightline_gpu::{
    GpuContext, OccluderMesh, SceneTargets, SensorTarget, TargetFormats, ViewshedRenderer,
};

use crate::config::SightlineConfig;
use crate::events::{SensorFrameReady, SightlineCommand, ViewshedCancelled, ViewshedCommitted};
use crate::resources::{
    GestureOutcome, GpuSightline, HostBackend, Occluders, ScenePicking, SensorFrame, SensorScene,
    ViewshedImage, ViewshedOutput, ViewshedState,
};

// ── Startup ──────────────────────────────────────────────────────

/// Seed the viewshed settings from the configuration.
pub fn apply_config(config: Res<SightlineConfig>, mut state: ResMut<ViewshedState>) {
    state.settings = config.viewshed.clone();
    tracing::debug!(
        shadow_map_size = state.settings.shadow_map_size,
        soft_shadows = state.settings.soft_shadows,
        "viewshed settings configured"
    );
}

/// Create the GPU passes and insert them as a resource.
pub fn init_gpu(mut commands: Commands, config: Res<SightlineConfig>) {
    match GpuContext::create_blocking() {
        Ok(context) => {
            tracing::info!("Sightline GPU passes initialized");
            commands.insert_resource(GpuSightline::new(context, config.offscreen_size));
        }
        Err(e) => {
            tracing::error!("Failed to initialize sightline GPU passes: {e}");
            tracing::warn!("Sensors and viewsheds will not render without a GPU device");
        }
    }
}

/// Allocate a 1x1 placeholder for the viewshed output image.
///
/// Without image assets (headless hosts) frames stay in `ViewshedOutput`.
pub fn setup_viewshed_image(mut commands: Commands, images: Option<ResMut<Assets<Image>>>) {
    let Some(mut images) = images else {
        tracing::debug!("no image assets, viewshed output stays CPU-side");
        return;
    };
    let placeholder = Image::new_fill(
        Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        },
        TextureDimension::D2,
        &[0, 0, 0, 0],
        TextureFormat::Rgba8UnormSrgb,
        RenderAssetUsages::MAIN_WORLD | RenderAssetUsages::RENDER_WORLD,
    );
    let handle = images.add(placeholder);
    commands.insert_resource(ViewshedImage { handle });
}

// ── Commands ─────────────────────────────────────────────────────

/// Process inbound commands from the host UI.
pub fn handle_sightline_commands(
    mut commands: MessageReader<SightlineCommand>,
    mut scene: ResMut<SensorScene>,
    mut state: ResMut<ViewshedState>,
    mut cancelled: MessageWriter<ViewshedCancelled>,
) {
    for cmd in commands.read() {
        match cmd {
            SightlineCommand::UpsertSensor { id, name, params } => {
                if let Err(e) = params.validate() {
                    tracing::warn!("UpsertSensor {}: {e}", id.0);
                    continue;
                }
                let show = scene.entities.get(*id).is_none_or(|e| e.show);
                let mut entity =
                    sightline_core::Entity::new(*id, name.clone()).with_sensor(params.clone());
                entity.show = show;
                scene.entities.insert(entity);
            }
            SightlineCommand::SetSensorShown { id, show } => {
                match scene.entities.get_mut(*id) {
                    Some(entity) => entity.show = *show,
                    None => tracing::warn!("SetSensorShown: unknown entity {}", id.0),
                }
            }
            SightlineCommand::RemoveSensor { id } => {
                if scene.entities.remove(*id).is_none() {
                    tracing::debug!("RemoveSensor: unknown entity {}", id.0);
                }
            }
            SightlineCommand::SetSceneMode(mode) => scene.mode = *mode,
            SightlineCommand::StartViewshed => state.start(),
            SightlineCommand::CancelViewshed => {
                if state.cancel().is_some() {
                    cancelled.write(ViewshedCancelled);
                }
            }
            SightlineCommand::ClearViewshed => state.clear(),
            SightlineCommand::SetViewshedSettings(settings) => {
                state.set_settings(settings.clone());
            }
        }
    }
}

// ── Per frame ────────────────────────────────────────────────────

/// Run the visualizers against the entity collection and collect this
/// frame's draw commands.
pub fn update_sensor_visualizers(
    time: Res<Time>,
    mut scene: ResMut<SensorScene>,
    mut host: ResMut<HostBackend>,
    gpu: Option<ResMut<GpuSightline>>,
    mut sensor_frame: ResMut<SensorFrame>,
    mut ready: MessageWriter<SensorFrameReady>,
) {
    let mut frame = FrameState::new(scene.mode, time.elapsed_secs_f64());
    let (entities, visualizers) = scene.visualizers_mut();
    match gpu {
        Some(mut gpu) => visualizers.update(entities, &mut frame, &mut gpu.backend),
        None => visualizers.update(entities, &mut frame, &mut *host),
    }
    ready.write(SensorFrameReady {
        commands: frame.commands.len(),
    });
    sensor_frame.commands = frame.commands;
}

/// Feed mouse and keyboard input to the construction gesture.
#[allow(clippy::too_many_arguments)]
pub fn drive_viewshed_gesture(
    mouse: Res<ButtonInput<MouseButton>>,
    keys: Res<ButtonInput<KeyCode>>,
    windows: Query<&Window, With<PrimaryWindow>>,
    cameras: Query<(&Camera, &GlobalTransform)>,
    picking: Res<ScenePicking>,
    config: Res<SightlineConfig>,
    mut state: ResMut<ViewshedState>,
    mut committed: MessageWriter<ViewshedCommitted>,
    mut cancelled: MessageWriter<ViewshedCancelled>,
) {
    if !state.is_constructing() {
        return;
    }

    let pick = cursor_ray(&windows, &cameras)
        .and_then(|(origin, direction)| picking.pick(&config.frame, origin, direction));
    let input = if keys.just_pressed(KeyCode::Escape) {
        GestureInput::Escape
    } else if mouse.just_pressed(MouseButton::Left) {
        GestureInput::LeftClick(pick)
    } else if mouse.just_pressed(MouseButton::Right) {
        GestureInput::RightClick(pick)
    } else {
        GestureInput::Move(pick)
    };

    let event = state.gesture.handle(input);
    match state.apply(event, &config.frame) {
        Some(GestureOutcome::Committed { observer, target }) => {
            committed.write(ViewshedCommitted { observer, target });
        }
        Some(GestureOutcome::Cancelled) => {
            cancelled.write(ViewshedCancelled);
        }
        None => {}
    }
}

/// Record the occluders, the sensor pass and the viewshed post-process into
/// the offscreen targets, submit them and start reading the result back.
pub fn render_offscreen(
    gpu: Option<ResMut<GpuSightline>>,
    config: Res<SightlineConfig>,
    sensor_frame: Res<SensorFrame>,
    state: Res<ViewshedState>,
    occluders: Res<Occluders>,
    cameras: Query<(&Camera, &GlobalTransform, &Projection)>,
) {
    let Some(gpu) = gpu else {
        return;
    };
    let gpu = gpu.into_inner();
    let Some((view, projection)) = camera_matrices(&cameras, gpu.targets.size) else {
        return;
    };

    sync_occluders(gpu, &occluders);
    sync_viewshed_renderer(gpu, &state);

    let mut encoder = gpu
        .context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("sightline_frame_encoder"),
        });
    clear_targets(&mut encoder, gpu);

    gpu.scene_pass.record(
        &gpu.context,
        &mut encoder,
        SensorTarget {
            color: &gpu.targets.color_view,
            depth: &gpu.targets.depth_view,
        },
        &gpu.occluder_meshes,
        config.occluder_color,
        view,
        projection,
    );

    if let Err(e) = gpu.sensor_pass.record(
        &mut gpu.backend,
        &mut encoder,
        SensorTarget {
            color: &gpu.targets.color_view,
            depth: &gpu.targets.depth_view,
        },
        &sensor_frame.commands,
        view,
        projection,
    ) {
        tracing::warn!("Sensor pass skipped: {e}");
    }

    let mut tinted = false;
    if let (Some((_, renderer)), Some(viewshed)) = (&mut gpu.viewshed, &state.viewshed) {
        renderer.prepare(&mut encoder, viewshed.frustum());
        tinted = renderer.render(
            &mut encoder,
            viewshed.frustum(),
            &SceneTargets {
                color: &gpu.targets.color_view,
                depth: &gpu.targets.depth_view,
                output: &gpu.targets.output_view,
            },
            view,
            projection,
        );
    }

    let presented = if tinted {
        &gpu.targets.output
    } else {
        &gpu.targets.color
    };
    let reading = gpu.readback.submit_readback(&mut encoder, presented);

    gpu.context.queue.submit(Some(encoder.finish()));
    if reading {
        gpu.readback.begin_map_after_submit();
    }
}

/// Take the newest finished readback, if any.
pub fn consume_viewshed_output(
    gpu: Option<ResMut<GpuSightline>>,
    mut output: ResMut<ViewshedOutput>,
) {
    let Some(gpu) = gpu else {
        return;
    };
    let gpu = gpu.into_inner();
    if let Some(frame) = gpu.readback.try_consume(&gpu.context.device) {
        output.frame = Some(frame);
        output.serial += 1;
    }
}

/// Upload the latest consumed frame into the viewshed image.
pub fn update_viewshed_image(
    output: Res<ViewshedOutput>,
    image: Option<Res<ViewshedImage>>,
    images: Option<ResMut<Assets<Image>>>,
) {
    if !output.is_changed() {
        return;
    }
    let (Some(frame), Some(image), Some(mut images)) = (&output.frame, image, images) else {
        return;
    };

    let new_size = Extent3d {
        width: frame.width,
        height: frame.height,
        depth_or_array_layers: 1,
    };
    let format = if frame.format.is_srgb() {
        TextureFormat::Rgba8UnormSrgb
    } else {
        TextureFormat::Rgba8Unorm
    };

    if let Some(existing) = images.get_mut(&image.handle) {
        if existing.texture_descriptor.size != new_size
            || existing.texture_descriptor.format != format
        {
            *existing = Image::new(
                new_size,
                TextureDimension::D2,
                frame.bytes.clone(),
                format,
                RenderAssetUsages::MAIN_WORLD | RenderAssetUsages::RENDER_WORLD,
            );
        } else {
            existing.data = Some(frame.bytes.clone());
        }
    }
}

/// Outline the observer frustum and sensor volumes.
pub fn draw_debug_gizmos(
    mut gizmos: Gizmos,
    config: Res<SightlineConfig>,
    state: Res<ViewshedState>,
    scene: Res<SensorScene>,
) {
    if config.debug_frustum
        && let Some(frustum) = state.debug_frustum()
    {
        draw_light_frustum(&mut gizmos, frustum.light_camera());
    }
    if config.debug_sensors {
        for entity in scene.entities.iter().filter(|e| e.show) {
            if let Some(params) = &entity.sensor {
                draw_sensor_outline(&mut gizmos, params);
            }
        }
    }
}

/// Release every sensor and viewshed resource when the app exits.
pub fn release_on_exit(
    mut exits: MessageReader<AppExit>,
    mut scene: ResMut<SensorScene>,
    mut host: ResMut<HostBackend>,
    gpu: Option<ResMut<GpuSightline>>,
    mut state: ResMut<ViewshedState>,
) {
    if exits.read().next().is_none() {
        return;
    }
    let (_, visualizers) = scene.visualizers_mut();
    match gpu {
        Some(mut gpu) => {
            visualizers.destroy(&mut gpu.backend);
            gpu.drop_viewshed();
        }
        None => visualizers.destroy(&mut *host),
    }
    state.clear();
    tracing::info!("Sightline resources released");
}

// ── Helpers ──────────────────────────────────────────────────────

fn to_dvec3(v: Vec3) -> DVec3 {
    DVec3::new(f64::from(v.x), f64::from(v.y), f64::from(v.z))
}

fn to_vec3(v: DVec3) -> Vec3 {
    Vec3::new(v.x as f32, v.y as f32, v.z as f32)
}

fn gizmo_color(c: sightline_core::Color) -> Color {
    let [r, g, b, a] = c.0;
    Color::srgba(r, g, b, a)
}

fn cursor_ray(
    windows: &Query<&Window, With<PrimaryWindow>>,
    cameras: &Query<(&Camera, &GlobalTransform)>,
) -> Option<(DVec3, DVec3)> {
    let window = windows.single().ok()?;
    let cursor = window.cursor_position()?;
    let (camera, transform) = cameras.iter().find(|(camera, _)| camera.is_active)?;
    let ray = camera.viewport_to_world(transform, cursor).ok()?;
    Some((to_dvec3(ray.origin), to_dvec3(*ray.direction)))
}

fn camera_matrices(
    cameras: &Query<(&Camera, &GlobalTransform, &Projection)>,
    (width, height): (u32, u32),
) -> Option<(DMat4, DMat4)> {
    let (_, transform, projection) = cameras.iter().find(|(camera, _, _)| camera.is_active)?;
    let Projection::Perspective(perspective) = projection else {
        return None;
    };
    let (_, rotation, translation) = transform.to_scale_rotation_translation();
    let rotation = DQuat::from_xyzw(
        f64::from(rotation.x),
        f64::from(rotation.y),
        f64::from(rotation.z),
        f64::from(rotation.w),
    );
    let world = DMat4::from_rotation_translation(rotation, to_dvec3(translation));
    let aspect = f64::from(width) / f64::from(height.max(1));
    let projection = DMat4::perspective_rh(
        f64::from(perspective.fov),
        aspect,
        f64::from(perspective.near),
        f64::from(perspective.far),
    );
    Some((world.inverse(), projection))
}

/// Re-upload the occluders when the host changed them.
fn sync_occluders(gpu: &mut GpuSightline, occluders: &Occluders) {
    if gpu.occluder_revision == occluders.revision() {
        return;
    }
    gpu.occluder_meshes = vec![OccluderMesh::from_triangles(
        &gpu.context,
        "sightline_occluders",
        occluders.triangles(),
    )];
    gpu.occluder_revision = occluders.revision();
    if let Some((_, renderer)) = &mut gpu.viewshed {
        renderer.set_occluders(gpu.occluder_meshes.clone());
    }
}

/// Match the renderer to the committed viewshed.
fn sync_viewshed_renderer(gpu: &mut GpuSightline, state: &ViewshedState) {
    if state.viewshed.is_none() {
        gpu.drop_viewshed();
        return;
    }
    let current = gpu.viewshed.as_ref().map(|(serial, _)| *serial);
    if current != Some(state.commit_serial) {
        gpu.drop_viewshed();
        let mut renderer =
            ViewshedRenderer::new(gpu.context.clone(), TargetFormats::default().color);
        renderer.set_occluders(gpu.occluder_meshes.clone());
        gpu.viewshed = Some((state.commit_serial, renderer));
    }
}

fn clear_targets(encoder: &mut wgpu::CommandEncoder, gpu: &GpuSightline) {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("sightline_clear_pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: &gpu.targets.color_view,
            depth_slice: None,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: &gpu.targets.depth_view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    });
}

fn draw_light_frustum(gizmos: &mut Gizmos, light: &LightCamera) {
    let far = light.far;
    let half_w = (light.horizontal_view_angle * 0.5).tan() * far;
    let half_h = (light.vertical_view_angle * 0.5).tan() * far;
    let center = light.position + light.direction * far;
    let corners = [
        center - light.right * half_w - light.up * half_h,
        center + light.right * half_w - light.up * half_h,
        center + light.right * half_w + light.up * half_h,
        center - light.right * half_w + light.up * half_h,
    ]
    .map(to_vec3);

    let apex = to_vec3(light.position);
    let color = Color::srgb(1.0, 1.0, 0.0);
    for corner in corners {
        gizmos.line(apex, corner, color);
    }
    gizmos.linestrip(corners.into_iter().chain([corners[0]]), color);
}

fn draw_sensor_outline(gizmos: &mut Gizmos, params: &SensorVolumeParameters) {
    let Some(sector) = build_sector(params.x_half_angle, params.y_half_angle, params.slice) else {
        return;
    };
    let radius = if params.radius.is_finite() {
        params.radius
    } else {
        INFINITE_RADIUS_EXTENT
    };
    let transform = params.model_matrix * DMat4::from_scale(DVec3::splat(radius));
    let rim: Vec<Vec3> = sector
        .rim
        .iter()
        .map(|p| to_vec3(transform.transform_point3(*p)))
        .collect();
    let Some(&first) = rim.first() else {
        return;
    };

    let color = gizmo_color(params.line_color);
    let apex = to_vec3(transform.transform_point3(DVec3::ZERO));
    let edge = (params.slice as usize).saturating_sub(1).max(1);
    for corner in rim.iter().step_by(edge) {
        gizmos.line(apex, *corner, color);
    }
    gizmos.linestrip(rim.iter().copied().chain([first]), color);
}
