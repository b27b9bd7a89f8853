//! GPU integration tests. Require a real wgpu device; each test returns
//! early when no adapter is available.
//!
//! Run with: `cargo test -p sightline-gpu`

use std::sync::Arc;
use std::sync::{Mutex, OnceLock};

use glam::{DMat4, DVec3};
use sightline_core::viewshed::shadow::Triangle;
use sightline_core::{
    Color, FrameState, ObserverFrustum, ReferenceFrame, RenderBackend, SceneMode,
    SensorPrimitive, SensorVolumeParameters, ViewshedSettings,
};
use sightline_gpu::{
    GpuCapabilities, GpuContext, OccluderMesh, ReadbackFrame, ScenePass, SceneTargets,
    SensorPass, SensorTarget, TargetFormats, TargetReadback, ViewshedRenderer, WgpuBackend,
};

const SIZE: u32 = 64;
const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Create a test context, or `None` when the machine has no usable adapter.
fn create_test_context() -> Option<GpuContext> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
    let adapter = match pollster::block_on(instance.request_adapter(
        &wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            ..Default::default()
        },
    )) {
        Ok(adapter) => adapter,
        Err(err) => {
            eprintln!("skipping GPU test, no adapter: {err}");
            return None;
        }
    };

    let limits = adapter.limits();
    let (device, queue) = match pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("sightline_test_device"),
            required_features: sightline_gpu::required_features(),
            required_limits: limits.clone(),
            ..Default::default()
        },
    )) {
        Ok(pair) => pair,
        Err(err) => {
            eprintln!("skipping GPU test, no device: {err}");
            return None;
        }
    };

    let capabilities = GpuCapabilities::detect(&adapter, &limits);
    Some(GpuContext::new(
        Arc::new(device),
        Arc::new(queue),
        capabilities,
    ))
}

fn gpu_test_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn create_texture(
    ctx: &GpuContext,
    label: &str,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: SIZE,
            height: SIZE,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

/// Clear a color and a depth target in one pass.
fn clear(
    encoder: &mut wgpu::CommandEncoder,
    color: &wgpu::TextureView,
    depth: &wgpu::TextureView,
    depth_value: f32,
) {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("sightline_test_clear"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: color,
            depth_slice: None,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: depth,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(depth_value),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    });
}

/// Read back an RGBA8 texture of `SIZE`×`SIZE` texels.
fn read_rgba8(ctx: &GpuContext, texture: &wgpu::Texture) -> Vec<[u8; 4]> {
    // 64 texels × 4 bytes is already a multiple of COPY_BYTES_PER_ROW_ALIGNMENT.
    let bytes_per_row = SIZE * 4;
    let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("sightline_test_readback"),
        size: u64::from(bytes_per_row * SIZE),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
    encoder.copy_texture_to_buffer(
        texture.as_image_copy(),
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(SIZE),
            },
        },
        wgpu::Extent3d {
            width: SIZE,
            height: SIZE,
            depth_or_array_layers: 1,
        },
    );
    ctx.queue.submit(Some(encoder.finish()));

    let slice = buffer.slice(..);
    slice.map_async(wgpu::MapMode::Read, |result| {
        result.expect("readback map failed");
    });
    ctx.device
        .poll(wgpu::PollType::wait_indefinitely())
        .expect("device poll failed");
    let data = slice.get_mapped_range();
    let pixels = data
        .chunks_exact(4)
        .map(|p| [p[0], p[1], p[2], p[3]])
        .collect();
    drop(data);
    buffer.unmap();
    pixels
}

fn center(pixels: &[[u8; 4]]) -> [u8; 4] {
    pixels[(SIZE / 2 * SIZE + SIZE / 2) as usize]
}

// ── Sensor ───────────────────────────────────────────────────────

fn test_formats() -> TargetFormats {
    TargetFormats {
        color: COLOR_FORMAT,
        depth: sightline_gpu::DEPTH_FORMAT,
    }
}

#[test]
fn test_gpu_backend_allocates_and_releases_sensor_resources() {
    let _lock = gpu_test_lock().lock().expect("gpu test lock poisoned");
    let Some(ctx) = create_test_context() else {
        return;
    };
    let mut backend = WgpuBackend::new(ctx, test_formats());
    let mut primitive =
        SensorPrimitive::new(SensorVolumeParameters::default()).expect("default parameters");

    let mut frame = FrameState::new(SceneMode::Scene3D, 0.0);
    primitive.update(&mut frame, &mut backend);
    assert!(!frame.commands.is_empty());
    assert!(backend.resource_count() > 0);
    for command in &frame.commands {
        assert!(backend.vertex_buffer(command.vertex_array).is_some());
    }

    primitive.destroy(&mut backend);
    primitive.destroy(&mut backend);
    assert_eq!(backend.resource_count(), 0);
}

#[test]
fn test_gpu_vertex_array_grows_in_place() {
    let _lock = gpu_test_lock().lock().expect("gpu test lock poisoned");
    let Some(ctx) = create_test_context() else {
        return;
    };
    let mut backend = WgpuBackend::new(ctx, test_formats());
    let dome = sightline_core::sensor::geometry::build_dome(8);
    let small = &dome.surface.vertices[..6];

    let id = backend
        .create_vertex_array("dome", dome.surface.primitive, small)
        .expect("allocation");
    backend
        .update_vertex_array(id, &dome.surface.vertices)
        .expect("update keeps the id");
    let (count, _) = backend.vertex_array_info(id).expect("still alive");
    assert_eq!(count as usize, dome.surface.vertices.len());

    backend.release(id);
    assert!(backend.update_vertex_array(id, small).is_err());
}

/// An opaque green dome of radius 10 with outlines off.
fn green_dome(backend: &mut WgpuBackend) -> (SensorPrimitive, FrameState) {
    let params = SensorVolumeParameters {
        radius: 10.0,
        show_sector_lines: false,
        show_sector_seam_lines: false,
        show_dome_lines: false,
        show_through_ellipsoid: true,
        lateral_surface_color: Color::YELLOW,
        dome_surface_color: Color::GREEN,
        ..Default::default()
    };
    let mut primitive = SensorPrimitive::new(params).expect("valid parameters");
    let mut frame = FrameState::new(SceneMode::Scene3D, 0.0);
    primitive.update(&mut frame, backend);
    (primitive, frame)
}

/// Looking back down the boresight at the dome cap.
fn dome_view() -> DMat4 {
    DMat4::look_at_rh(DVec3::new(0.0, 0.0, 30.0), DVec3::ZERO, DVec3::Y)
}

fn create_color_target(ctx: &GpuContext) -> (wgpu::Texture, wgpu::TextureView) {
    create_texture(
        ctx,
        "sightline_test_color",
        COLOR_FORMAT,
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
    )
}

fn create_depth_target(ctx: &GpuContext) -> (wgpu::Texture, wgpu::TextureView) {
    create_texture(
        ctx,
        "sightline_test_depth",
        sightline_gpu::DEPTH_FORMAT,
        wgpu::TextureUsages::RENDER_ATTACHMENT,
    )
}

#[test]
fn test_gpu_sensor_pass_draws_dome_over_target() {
    let _lock = gpu_test_lock().lock().expect("gpu test lock poisoned");
    let Some(ctx) = create_test_context() else {
        return;
    };
    let mut backend = WgpuBackend::new(ctx.clone(), test_formats());
    let mut pass = SensorPass::new(&backend);

    let (_primitive, frame) = green_dome(&mut backend);
    let (color, color_view) = create_color_target(&ctx);
    let (_depth, depth_view) = create_depth_target(&ctx);
    let view = dome_view();
    let projection = DMat4::perspective_rh(60f64.to_radians(), 1.0, 0.1, 100.0);

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
    clear(&mut encoder, &color_view, &depth_view, 1.0);
    let drawn = pass
        .record(
            &mut backend,
            &mut encoder,
            SensorTarget {
                color: &color_view,
                depth: &depth_view,
            },
            &frame.commands,
            view,
            projection,
        )
        .expect("sensor pass records");
    ctx.queue.submit(Some(encoder.finish()));
    assert_eq!(drawn, frame.commands.len());

    let pixels = read_rgba8(&ctx, &color);
    let [r, g, b, _] = center(&pixels);
    assert!(g > 200, "dome should be green at the center, got {r} {g} {b}");
    assert!(r < 30 && b < 30);
    // Corners are outside the footprint.
    assert_eq!(pixels[0], [0, 0, 0, 255]);
}

#[test]
fn test_gpu_sensor_records_in_one_submission_keep_their_uniforms() {
    let _lock = gpu_test_lock().lock().expect("gpu test lock poisoned");
    let Some(ctx) = create_test_context() else {
        return;
    };
    let mut backend = WgpuBackend::new(ctx.clone(), test_formats());
    let mut pass = SensorPass::new(&backend);
    let (_primitive, frame) = green_dome(&mut backend);
    let projection = DMat4::perspective_rh(60f64.to_radians(), 1.0, 0.1, 100.0);

    let (facing, facing_view) = create_color_target(&ctx);
    let (_facing_depth, facing_depth) = create_depth_target(&ctx);
    let (away, away_view) = create_color_target(&ctx);
    let (_away_depth, away_depth) = create_depth_target(&ctx);
    let looking_away = DMat4::look_at_rh(
        DVec3::new(0.0, 0.0, 30.0),
        DVec3::new(0.0, 0.0, 60.0),
        DVec3::Y,
    );

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
    clear(&mut encoder, &facing_view, &facing_depth, 1.0);
    clear(&mut encoder, &away_view, &away_depth, 1.0);
    for (color, depth, view) in [
        (&facing_view, &facing_depth, dome_view()),
        (&away_view, &away_depth, looking_away),
    ] {
        pass.record(
            &mut backend,
            &mut encoder,
            SensorTarget { color, depth },
            &frame.commands,
            view,
            projection,
        )
        .expect("sensor pass records");
    }
    ctx.queue.submit(Some(encoder.finish()));

    let [_, g, _, _] = center(&read_rgba8(&ctx, &facing));
    assert!(g > 200, "first record should still see the dome, got g={g}");
    assert_eq!(center(&read_rgba8(&ctx, &away)), [0, 0, 0, 255]);
}

// ── Viewshed ─────────────────────────────────────────────────────

fn observer() -> ObserverFrustum {
    ObserverFrustum::with_settings(
        ReferenceFrame::y_up(),
        DVec3::new(0.0, 2.0, 0.0),
        DVec3::new(0.0, 2.0, -100.0),
        ViewshedSettings {
            shadow_map_size: 256,
            ..Default::default()
        },
    )
    .expect("valid observer")
}

fn wall() -> Vec<Triangle> {
    Triangle::quad(
        DVec3::new(-10.0, 0.0, -25.0),
        DVec3::new(10.0, 0.0, -25.0),
        DVec3::new(10.0, 5.0, -25.0),
        DVec3::new(-10.0, 5.0, -25.0),
    )
    .to_vec()
}

/// Render a flat scene 50 m in front of the observer, seen through `view`,
/// and return the tinted output target.
fn render_viewshed_output(
    ctx: &GpuContext,
    renderer: &mut ViewshedRenderer,
    frustum: &ObserverFrustum,
    view: DMat4,
) -> wgpu::Texture {
    let projection = DMat4::perspective_rh(60f64.to_radians(), 1.0, 0.1, 1000.0);
    let scene_depth = projection.project_point3(DVec3::new(0.0, 0.0, -50.0)).z as f32;

    let (_color, color_view) = create_texture(
        ctx,
        "sightline_test_scene_color",
        COLOR_FORMAT,
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
    );
    let (_depth, depth_view) = create_texture(
        ctx,
        "sightline_test_scene_depth",
        sightline_gpu::DEPTH_FORMAT,
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
    );
    let (output, output_view) = create_texture(
        ctx,
        "sightline_test_output",
        COLOR_FORMAT,
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
    );

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
    clear(&mut encoder, &color_view, &depth_view, scene_depth);
    renderer.prepare(&mut encoder, frustum);
    let rendered = renderer.render(
        &mut encoder,
        frustum,
        &SceneTargets {
            color: &color_view,
            depth: &depth_view,
            output: &output_view,
        },
        view,
        projection,
    );
    ctx.queue.submit(Some(encoder.finish()));
    assert!(rendered);
    output
}

/// Render a flat scene 50 m in front of the observer and return the tinted
/// center pixel.
fn render_viewshed_center(
    ctx: &GpuContext,
    renderer: &mut ViewshedRenderer,
    frustum: &ObserverFrustum,
) -> [u8; 4] {
    let view = frustum.light_camera().view();
    let output = render_viewshed_output(ctx, renderer, frustum, view);
    center(&read_rgba8(ctx, &output))
}

/// Copy `texture` through `readback` and wait for the frame.
fn read_back(
    ctx: &GpuContext,
    readback: &mut TargetReadback,
    texture: &wgpu::Texture,
) -> ReadbackFrame {
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
    assert!(readback.submit_readback(&mut encoder, texture));
    ctx.queue.submit(Some(encoder.finish()));
    readback.begin_map_after_submit();
    assert!(readback.has_pending());

    ctx.device
        .poll(wgpu::PollType::wait_indefinitely())
        .expect("device poll failed");
    let frame = readback.try_consume(&ctx.device).expect("readback should be ready");
    assert!(!readback.has_pending());
    frame
}

fn frame_center(frame: &ReadbackFrame) -> [u8; 4] {
    let i = ((frame.height / 2 * frame.width + frame.width / 2) * 4) as usize;
    [frame.bytes[i], frame.bytes[i + 1], frame.bytes[i + 2], frame.bytes[i + 3]]
}

#[test]
fn test_gpu_viewshed_tints_visible_then_occluded() {
    let _lock = gpu_test_lock().lock().expect("gpu test lock poisoned");
    let Some(ctx) = create_test_context() else {
        return;
    };
    let mut renderer = ViewshedRenderer::new(ctx.clone(), COLOR_FORMAT);
    if !renderer.is_supported() {
        return;
    }
    let frustum = observer();

    let [r, g, _, _] = render_viewshed_center(&ctx, &mut renderer, &frustum);
    assert!(g > 100 && r < 20, "expected visible tint, got r={r} g={g}");

    renderer.set_occluders(vec![OccluderMesh::from_triangles(
        &ctx,
        "sightline_test_wall",
        &wall(),
    )]);
    let [r, g, _, _] = render_viewshed_center(&ctx, &mut renderer, &frustum);
    assert!(r > 100 && g < 20, "expected occluded tint, got r={r} g={g}");
}

#[test]
fn test_gpu_viewshed_destroy_is_idempotent() {
    let _lock = gpu_test_lock().lock().expect("gpu test lock poisoned");
    let Some(ctx) = create_test_context() else {
        return;
    };
    let mut renderer = ViewshedRenderer::new(ctx.clone(), COLOR_FORMAT);
    let frustum = observer();
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
    renderer.prepare(&mut encoder, &frustum);

    renderer.destroy();
    renderer.destroy();
    assert!(renderer.is_destroyed());
    assert!(renderer.shadow_map().is_none());
    assert!(!renderer.prepare(&mut encoder, &frustum));
    ctx.queue.submit(Some(encoder.finish()));
}

#[test]
fn test_gpu_readback_follows_frustum_change() {
    let _lock = gpu_test_lock().lock().expect("gpu test lock poisoned");
    let Some(ctx) = create_test_context() else {
        return;
    };
    let mut renderer = ViewshedRenderer::new(ctx.clone(), COLOR_FORMAT);
    if !renderer.is_supported() {
        return;
    }
    let mut frustum = observer();
    let view = frustum.light_camera().view();
    let mut readback = TargetReadback::new(&ctx, (SIZE, SIZE));

    let output = render_viewshed_output(&ctx, &mut renderer, &frustum, view);
    let before = read_back(&ctx, &mut readback, &output);
    assert_eq!((before.width, before.height), (SIZE, SIZE));
    assert_eq!(before.bytes.len(), (SIZE * SIZE * 4) as usize);
    let [r, g, _, _] = frame_center(&before);
    assert!(g > 100 && r < 20, "expected visible tint, got r={r} g={g}");

    // The scene sits 50 m out; a 20 m range leaves it untouched.
    frustum.set_view_distance(20.0).expect("valid distance");
    let output = render_viewshed_output(&ctx, &mut renderer, &frustum, view);
    let after = read_back(&ctx, &mut readback, &output);
    assert_eq!(frame_center(&after), [0, 0, 0, 255]);
    assert_ne!(before.bytes, after.bytes);
}

#[test]
fn test_gpu_readback_skips_mismatched_target() {
    let _lock = gpu_test_lock().lock().expect("gpu test lock poisoned");
    let Some(ctx) = create_test_context() else {
        return;
    };
    let mut readback = TargetReadback::new(&ctx, (SIZE * 2, SIZE));
    let (texture, _view) = create_color_target(&ctx);
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());

    assert!(!readback.submit_readback(&mut encoder, &texture));
    ctx.queue.submit(Some(encoder.finish()));
    readback.begin_map_after_submit();
    assert!(!readback.has_pending());
    assert!(readback.try_consume(&ctx.device).is_none());
}

#[test]
fn test_gpu_scene_pass_feeds_viewshed_depth() {
    let _lock = gpu_test_lock().lock().expect("gpu test lock poisoned");
    let Some(ctx) = create_test_context() else {
        return;
    };
    let mut renderer = ViewshedRenderer::new(ctx.clone(), COLOR_FORMAT);
    if !renderer.is_supported() {
        return;
    }
    let frustum = observer();
    let view = frustum.light_camera().view();
    let projection = DMat4::perspective_rh(60f64.to_radians(), 1.0, 0.1, 1000.0);
    let wall = OccluderMesh::from_triangles(&ctx, "sightline_test_wall", &wall());
    renderer.set_occluders(vec![wall.clone()]);

    let mut scene = ScenePass::new(&ctx, test_formats());
    let (color, color_view) = create_texture(
        &ctx,
        "sightline_test_scene_color",
        COLOR_FORMAT,
        wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
    );
    let (_depth, depth_view) = create_texture(
        &ctx,
        "sightline_test_scene_depth",
        sightline_gpu::DEPTH_FORMAT,
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
    );
    let (output, output_view) = create_texture(
        &ctx,
        "sightline_test_output",
        COLOR_FORMAT,
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
    );

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
    clear(&mut encoder, &color_view, &depth_view, 1.0);
    let drawn = scene.record(
        &ctx,
        &mut encoder,
        SensorTarget {
            color: &color_view,
            depth: &depth_view,
        },
        &[wall],
        Color::WHITE,
        view,
        projection,
    );
    assert_eq!(drawn, 1);
    renderer.prepare(&mut encoder, &frustum);
    assert!(renderer.render(
        &mut encoder,
        &frustum,
        &SceneTargets {
            color: &color_view,
            depth: &depth_view,
            output: &output_view,
        },
        view,
        projection,
    ));
    ctx.queue.submit(Some(encoder.finish()));

    // The wall faces the observer, so it is shaded gray and is itself lit.
    let [r, g, b, _] = center(&read_rgba8(&ctx, &color));
    assert!(r > 100 && r == g && g == b, "expected gray wall, got {r} {g} {b}");
    let [r, g, _, _] = center(&read_rgba8(&ctx, &output));
    assert!(g > r, "expected visible tint on the wall, got r={r} g={g}");
}
