//! Renderer tests against the headless device

use ash::vk;

use super::*;
use crate::foundation::logging::Diagnostics;
use crate::frame::{ActiveFrame, FrameUniforms};
use crate::gpu::headless::{DescriptorWrite, DeviceCall, HeadlessDevice, ObjectKind};
use crate::gpu::{MemoryLocation, RenderError};
use crate::reflection::{BindingKind, PushConstantRange, MATERIAL_SET};
use crate::testing::spirv::{assemble, Member, Resource, Stage};
use crate::testing::{headless_renderer, test_config};

fn quad() -> (Vec<Vertex>, Vec<u32>) {
    let normal = [0.0, 0.0, 1.0];
    let vertices = vec![
        Vertex::new([-0.5, -0.5, 0.0], normal, [0.0, 0.0]),
        Vertex::new([0.5, -0.5, 0.0], normal, [1.0, 0.0]),
        Vertex::new([0.5, 0.5, 0.0], normal, [1.0, 1.0]),
        Vertex::new([-0.5, 0.5, 0.0], normal, [0.0, 1.0]),
    ];
    (vertices, vec![0, 1, 2, 2, 3, 0])
}

/// Uniform block of one mat4 in the vertex stage, texture in the fragment stage
fn textured_shader(renderer: &mut Renderer<HeadlessDevice>) -> ShaderHandle {
    let vertex = assemble(Stage::Vertex, &[Resource::uniform(2, 0, vec![Member::Mat4])]);
    let fragment = assemble(Stage::Fragment, &[Resource::texture(2, 1)]);
    renderer.create_shader(&vertex, &fragment).unwrap()
}

/// Push constants only: mat4 for the vertex stage, vec4 for the fragment stage
fn push_shader(renderer: &mut Renderer<HeadlessDevice>) -> ShaderHandle {
    let vertex = assemble(Stage::Vertex, &[Resource::push(vec![(0, Member::Mat4)])]);
    let fragment = assemble(Stage::Fragment, &[Resource::push(vec![(64, Member::Vec4)])]);
    renderer.create_shader(&vertex, &fragment).unwrap()
}

fn object_with(renderer: &mut Renderer<HeadlessDevice>, shader: ShaderHandle) -> (MaterialHandle, RenderObjectHandle) {
    let material = renderer.create_material(shader).unwrap();
    let (vertices, indices) = quad();
    let mesh = renderer.upload_mesh(&vertices, &indices).unwrap();
    let object = renderer.create_render_object(mesh, material).unwrap();
    (material, object)
}

fn run_frame(renderer: &mut Renderer<HeadlessDevice>) -> ActiveFrame {
    let frame = renderer.begin_frame().unwrap().expect("frame should not be skipped");
    renderer.end_frame().unwrap();
    frame
}

fn render_pass_extents(calls: &[DeviceCall]) -> Vec<vk::Extent2D> {
    calls
        .iter()
        .filter_map(|call| match call {
            DeviceCall::BeginRenderPass { extent, .. } => Some(*extent),
            _ => None,
        })
        .collect()
}

#[test]
fn frames_cycle_through_three_slots() {
    let mut renderer = headless_renderer();
    let mut slots = Vec::new();
    for _ in 0..7 {
        let frame = renderer.begin_frame().unwrap().unwrap();
        assert_eq!(frame.slot as u64, frame.frame_number % 3);
        assert_eq!(renderer.frame_index(), frame.slot);
        slots.push(frame.slot);
        renderer.end_frame().unwrap();
    }

    assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
    assert_eq!(renderer.frame_number(), 7);
    assert!(renderer.device().violations().is_empty());
}

#[test]
fn every_command_buffer_reset_follows_a_fence_wait() {
    let mut renderer = headless_renderer();
    renderer.device().clear_calls();
    for _ in 0..6 {
        run_frame(&mut renderer);
    }

    let mut waited = false;
    let mut resets = 0;
    for call in renderer.device().calls() {
        match call {
            DeviceCall::WaitFence(_) => waited = true,
            DeviceCall::ResetCommandBuffer(_) => {
                assert!(waited, "command buffer reset before its fence was waited on");
                waited = false;
                resets += 1;
            }
            _ => {}
        }
    }
    assert_eq!(resets, 6);
}

#[test]
fn shutdown_destroys_everything_that_was_created() {
    let mut renderer = headless_renderer();
    let shader = textured_shader(&mut renderer);
    let (material, object) = object_with(&mut renderer, shader);
    let texture = renderer.create_texture(2, 2, &[128; 16]).unwrap();
    renderer.set_material_texture(material, 1, texture).unwrap();
    let framebuffer = renderer.create_framebuffer(128, 128).unwrap();
    renderer.queue_framebuffer_draw(framebuffer, object, &[]).unwrap();
    let buffer = renderer
        .create_buffer(64, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryLocation::CpuToGpu)
        .unwrap();

    for _ in 0..4 {
        renderer.begin_frame().unwrap().unwrap();
        renderer.update_frame_uniforms(&FrameUniforms::default()).unwrap();
        renderer.draw(object, &[]).unwrap();
        renderer.end_frame().unwrap();
    }
    renderer.destroy_buffer(buffer).unwrap();
    renderer.shutdown().unwrap();

    let device = renderer.device();
    assert_eq!(device.total_live(), 0);
    for kind in [ObjectKind::Buffer, ObjectKind::Image, ObjectKind::Pipeline, ObjectKind::DescriptorPool, ObjectKind::Fence] {
        assert_eq!(device.created(kind), device.destroyed(kind), "{:?}", kind);
    }
    assert!(device.violations().is_empty(), "{:?}", device.violations());

    let stats = renderer.allocation_stats();
    assert_eq!(stats.live_buffers(), 0);
    assert_eq!(stats.live_images(), 0);

    // Second call is a no-op
    renderer.shutdown().unwrap();
    assert!(renderer.begin_frame().is_err());
}

#[test]
fn create_shader_reflects_the_material_set() {
    let mut renderer = headless_renderer();
    let shader = textured_shader(&mut renderer);
    let layout = renderer.shader_layout(shader).unwrap();

    assert_eq!(layout.set, MATERIAL_SET);
    assert_eq!(layout.bindings.len(), 2);
    assert_eq!(layout.bindings[0].slot, 0);
    assert_eq!(layout.bindings[0].kind, BindingKind::UniformBuffer);
    assert_eq!(layout.bindings[0].size, 64);
    assert_eq!(layout.bindings[0].stages, vk::ShaderStageFlags::VERTEX);
    assert_eq!(layout.bindings[1].slot, 1);
    assert_eq!(layout.bindings[1].kind, BindingKind::SampledImage);
    assert_eq!(layout.bindings[1].stages, vk::ShaderStageFlags::FRAGMENT);
}

#[test]
fn slot_shared_by_both_stages_is_visible_to_both() {
    let mut renderer = headless_renderer();
    let vertex = assemble(Stage::Vertex, &[Resource::uniform(2, 0, vec![Member::Vec4])]);
    let fragment = assemble(Stage::Fragment, &[Resource::uniform(2, 0, vec![Member::Vec4])]);
    let shader = renderer.create_shader(&vertex, &fragment).unwrap();

    let layout = renderer.shader_layout(shader).unwrap();
    assert_eq!(layout.bindings.len(), 1);
    assert_eq!(layout.bindings[0].stages, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
}

#[test]
fn skipped_material_resources_are_reported() {
    let mut renderer = headless_renderer();
    let vertex = assemble(Stage::Vertex, &[
        Resource::uniform(0, 0, vec![Member::Mat4]),
        Resource::uniform(2, 0, vec![Member::Vec4]),
    ]);
    let fragment = assemble(Stage::Fragment, &[Resource::separate_image(2, 1)]);
    renderer.create_shader(&vertex, &fragment).unwrap();

    // The set 0 block is expected outside the material set; the separate image is not
    assert_eq!(renderer.diagnostics().reflection_skips(), 1);
}

#[test]
fn rebinding_a_texture_keeps_the_descriptor_set() {
    let mut renderer = headless_renderer();
    let shader = textured_shader(&mut renderer);
    let material = renderer.create_material(shader).unwrap();
    let set = renderer.material_descriptor_set(material).unwrap().unwrap();

    let default = renderer.texture_binding(renderer.default_texture()).unwrap();
    assert_eq!(
        renderer.device().descriptor_write(set, 1),
        Some(DescriptorWrite::Image { view: default.view, sampler: default.sampler })
    );

    let red = renderer.create_texture(1, 1, &[255, 0, 0, 255]).unwrap();
    let blue = renderer.create_texture(1, 1, &[0, 0, 255, 255]).unwrap();
    renderer.set_material_texture(material, 1, red).unwrap();
    renderer.set_material_texture(material, 1, blue).unwrap();

    assert_eq!(renderer.material_descriptor_set(material).unwrap(), Some(set));
    let blue_binding = renderer.texture_binding(blue).unwrap();
    assert_eq!(
        renderer.device().descriptor_write(set, 1),
        Some(DescriptorWrite::Image { view: blue_binding.view, sampler: blue_binding.sampler })
    );
}

#[test]
fn texture_slot_checks() {
    let mut renderer = headless_renderer();
    let shader = textured_shader(&mut renderer);
    let material = renderer.create_material(shader).unwrap();
    let texture = renderer.default_texture();

    assert!(matches!(
        renderer.set_material_texture(material, 0, texture),
        Err(RenderError::BindingKindMismatch { slot: 0, .. })
    ));
    assert!(matches!(
        renderer.set_material_texture(material, 5, texture),
        Err(RenderError::UnknownBinding { slot: 5 })
    ));
}

#[test]
fn resize_round_trip_restores_targets() {
    let mut renderer = headless_renderer();
    run_frame(&mut renderer);
    let images = renderer.device().live(ObjectKind::Image);
    let views = renderer.device().live(ObjectKind::ImageView);
    let framebuffers = renderer.device().live(ObjectKind::Framebuffer);

    renderer.on_resize(640, 480).unwrap();
    assert_eq!(renderer.swapchain_extent(), vk::Extent2D { width: 640, height: 480 });
    assert_eq!(renderer.device().live(ObjectKind::Image), images);

    renderer.on_resize(1280, 720).unwrap();
    assert_eq!(renderer.swapchain_extent(), vk::Extent2D { width: 1280, height: 720 });
    assert_eq!(renderer.device().live(ObjectKind::Image), images);
    assert_eq!(renderer.device().live(ObjectKind::ImageView), views);
    assert_eq!(renderer.device().live(ObjectKind::Framebuffer), framebuffers);
    assert_eq!(renderer.device().live(ObjectKind::Swapchain), 1);
    assert_eq!(renderer.diagnostics().swapchain_rebuilds(), 2);

    renderer.device().clear_calls();
    run_frame(&mut renderer);
    assert_eq!(render_pass_extents(&renderer.device().calls()), vec![vk::Extent2D { width: 1280, height: 720 }]);
}

#[test]
fn zero_size_suspends_rendering() {
    let mut renderer = headless_renderer();
    renderer.on_resize(0, 720).unwrap();
    renderer.device().clear_calls();

    assert!(renderer.begin_frame().unwrap().is_none());
    assert!(renderer.device().calls().is_empty());

    renderer.on_resize(800, 600).unwrap();
    run_frame(&mut renderer);
    assert_eq!(renderer.swapchain_extent(), vk::Extent2D { width: 800, height: 600 });
}

#[test]
fn push_constant_ranges_per_stage() {
    let mut renderer = headless_renderer();
    let shader = push_shader(&mut renderer);

    assert_eq!(renderer.shader_layout(shader).unwrap().push_constants, vec![
        PushConstantRange { offset: 0, size: 64, stages: vk::ShaderStageFlags::VERTEX },
        PushConstantRange { offset: 64, size: 16, stages: vk::ShaderStageFlags::FRAGMENT },
    ]);

    let (material, object) = object_with(&mut renderer, shader);
    assert_eq!(renderer.material_descriptor_set(material).unwrap(), None);

    renderer.begin_frame().unwrap().unwrap();
    renderer.device().clear_calls();
    renderer.draw(object, &[0; 80]).unwrap();
    renderer.draw(object, &[0; 64]).unwrap();
    assert!(matches!(renderer.draw(object, &[0; 96]), Err(RenderError::InvalidArgument(_))));
    assert!(matches!(renderer.draw(object, &[0; 6]), Err(RenderError::InvalidArgument(_))));
    renderer.end_frame().unwrap();

    let calls = renderer.device().calls();
    let pushes: Vec<DeviceCall> = calls
        .iter()
        .copied()
        .filter(|call| matches!(call, DeviceCall::PushConstants { .. }))
        .collect();
    // The 80 byte payload goes out once per range, each with its own stage
    assert_eq!(pushes, vec![
        DeviceCall::PushConstants { stages: vk::ShaderStageFlags::VERTEX, offset: 0, size: 64 },
        DeviceCall::PushConstants { stages: vk::ShaderStageFlags::FRAGMENT, offset: 64, size: 16 },
        DeviceCall::PushConstants { stages: vk::ShaderStageFlags::VERTEX, offset: 0, size: 64 },
    ]);
    assert!(renderer.device().violations().is_empty(), "{:?}", renderer.device().violations());

    // No material set, so only sets 0 and 1 are bound
    assert!(calls.iter().all(|call| match call {
        DeviceCall::BindDescriptorSets { first_set, count } => *first_set == 0 && *count == 2,
        _ => true,
    }));
    assert_eq!(calls.iter().filter(|call| matches!(call, DeviceCall::DrawIndexed { index_count: 6 })).count(), 2);
}

#[test]
fn material_uniform_upload_is_size_checked() {
    let mut renderer = headless_renderer();
    let shader = textured_shader(&mut renderer);
    let material = renderer.create_material(shader).unwrap();

    assert!(matches!(
        renderer.upload_material_uniform(material, 0, &[0; 63]),
        Err(RenderError::UniformSizeMismatch { slot: 0, expected: 64, actual: 63 })
    ));
    assert!(matches!(
        renderer.upload_material_uniform(material, 1, &[0; 64]),
        Err(RenderError::BindingKindMismatch { slot: 1, .. })
    ));
    assert!(matches!(
        renderer.upload_material_uniform(material, 7, &[0; 64]),
        Err(RenderError::UnknownBinding { slot: 7 })
    ));
    renderer.upload_material_uniform(material, 0, &[1; 64]).unwrap();
}

#[test]
fn material_uniform_waits_for_frames_in_flight() {
    let mut renderer = headless_renderer();
    let shader = textured_shader(&mut renderer);
    let (material, object) = object_with(&mut renderer, shader);
    let set = renderer.material_descriptor_set(material).unwrap().unwrap();
    let Some(DescriptorWrite::Buffer { buffer, .. }) = renderer.device().descriptor_write(set, 0) else {
        panic!("uniform slot should be bound to a buffer");
    };

    renderer.device().clear_calls();
    renderer.begin_frame().unwrap().unwrap();
    renderer.draw(object, &[]).unwrap();
    assert!(matches!(
        renderer.upload_material_uniform(material, 0, &[2; 64]),
        Err(RenderError::InvalidOperation { .. })
    ));
    renderer.end_frame().unwrap();

    let fence = renderer
        .device()
        .calls()
        .iter()
        .rev()
        .find_map(|call| match call {
            DeviceCall::Submit { fence, .. } => Some(*fence),
            _ => None,
        })
        .unwrap();
    assert!(!renderer.device().is_fence_signaled(fence));
    renderer.device().clear_calls();

    renderer.upload_material_uniform(material, 0, &[2; 64]).unwrap();

    assert_eq!(renderer.device().calls(), vec![DeviceCall::WaitFence(fence)]);
    assert!(renderer.device().is_fence_signaled(fence));
    assert_eq!(renderer.device().buffer_contents(buffer), Some(vec![2; 64]));

    assert_eq!(run_frame(&mut renderer).slot, 1);
    assert!(renderer.device().violations().is_empty());
}

#[test]
fn material_creation_failure_releases_its_buffers() {
    let mut renderer = headless_renderer();
    let vertex = assemble(Stage::Vertex, &[Resource::uniform(2, 0, vec![Member::Mat4])]);
    let fragment = assemble(Stage::Fragment, &[Resource::uniform(2, 1, vec![Member::Vec4])]);
    let shader = renderer.create_shader(&vertex, &fragment).unwrap();
    let live = renderer.device().live(ObjectKind::Buffer);
    let created = renderer.device().created(ObjectKind::Buffer);

    // Both uniform buffers exist when the zeroing write fails
    renderer.device().fail_host_writes(1);
    assert!(matches!(
        renderer.create_material(shader),
        Err(RenderError::Api(vk::Result::ERROR_MEMORY_MAP_FAILED))
    ));
    assert_eq!(renderer.device().created(ObjectKind::Buffer), created + 2);
    assert_eq!(renderer.device().live(ObjectKind::Buffer), live);
    assert!(renderer.device().violations().is_empty());

    let material = renderer.create_material(shader).unwrap();
    assert!(renderer.material_descriptor_set(material).unwrap().is_some());
}

#[test]
fn pipeline_cache_persists_across_runs() {
    let path = std::env::temp_dir().join(format!("render_core_pipeline_cache_{}.bin", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let mut config = test_config().with_pipeline_cache_path(&path);
    config.pipeline_cache.enabled = true;

    let mut first = Renderer::with_diagnostics(HeadlessDevice::new(), config.clone(), (64, 64), Diagnostics::new("test"))
        .unwrap();
    assert_eq!(first.device().pipeline_cache_seed(), Some(Vec::new()));
    first.shutdown().unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"headless pipeline cache".to_vec());

    let second = Renderer::with_diagnostics(HeadlessDevice::new(), config, (64, 64), Diagnostics::new("test")).unwrap();
    assert_eq!(second.device().pipeline_cache_seed(), Some(b"headless pipeline cache".to_vec()));
    drop(second);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn out_of_date_acquire_rebuilds_and_skips() {
    let mut renderer = headless_renderer();
    renderer.device().fail_acquires(1);

    assert!(renderer.begin_frame().unwrap().is_none());
    assert_eq!(renderer.diagnostics().skipped_frames(), 1);
    assert_eq!(renderer.diagnostics().swapchain_rebuilds(), 1);
    assert_eq!(renderer.frame_number(), 0);

    assert_eq!(run_frame(&mut renderer).slot, 0);
    assert!(renderer.device().violations().is_empty());
}

#[test]
fn out_of_date_present_is_not_an_error() {
    let mut renderer = headless_renderer();
    renderer.device().fail_presents(1);
    run_frame(&mut renderer);
    run_frame(&mut renderer);
    assert_eq!(renderer.frame_number(), 2);
    assert_eq!(renderer.diagnostics().fatal_errors(), 0);
}

#[test]
fn frame_operations_need_an_active_frame() {
    let mut renderer = headless_renderer();
    let shader = push_shader(&mut renderer);
    let (_, object) = object_with(&mut renderer, shader);

    assert!(matches!(renderer.draw(object, &[]), Err(RenderError::InvalidOperation { .. })));
    assert!(renderer.update_frame_uniforms(&FrameUniforms::default()).is_err());
    assert!(renderer.end_frame().is_err());
    assert_eq!(renderer.diagnostics().fatal_errors(), 1);
}

#[test]
fn destroyed_buffers_outlive_their_frame() {
    let mut renderer = headless_renderer();
    let buffer = renderer
        .create_buffer(256, vk::BufferUsageFlags::VERTEX_BUFFER, MemoryLocation::CpuToGpu)
        .unwrap();
    renderer.write_buffer(buffer, 0, &[3; 256]).unwrap();
    run_frame(&mut renderer);

    let live = renderer.allocation_stats().live_buffers();
    renderer.destroy_buffer(buffer).unwrap();
    assert_eq!(renderer.allocation_stats().live_buffers(), live);
    assert!(matches!(renderer.destroy_buffer(buffer), Err(RenderError::StaleHandle { .. })));
    assert!(renderer.write_buffer(buffer, 0, &[0]).is_err());

    run_frame(&mut renderer);
    run_frame(&mut renderer);
    assert_eq!(renderer.allocation_stats().live_buffers(), live);

    // Third frame reuses the slot the buffer was last used in
    run_frame(&mut renderer);
    assert_eq!(renderer.allocation_stats().live_buffers(), live - 1);
}

#[test]
fn objects_in_use_cannot_be_destroyed() {
    let mut renderer = headless_renderer();
    let shader = textured_shader(&mut renderer);
    let (material, object) = object_with(&mut renderer, shader);
    let texture = renderer.create_texture(1, 1, &[0; 4]).unwrap();
    renderer.set_material_texture(material, 1, texture).unwrap();

    assert!(matches!(renderer.destroy_texture(texture), Err(RenderError::InvalidOperation { .. })));
    assert!(matches!(renderer.destroy_material(material), Err(RenderError::InvalidOperation { .. })));
    assert!(matches!(renderer.destroy_shader(shader), Err(RenderError::InvalidOperation { .. })));
    assert!(renderer.destroy_texture(renderer.default_texture()).is_err());

    renderer.destroy_render_object(object).unwrap();
    renderer.destroy_material(material).unwrap();
    renderer.destroy_texture(texture).unwrap();
    renderer.destroy_shader(shader).unwrap();
    assert!(matches!(renderer.create_material(shader), Err(RenderError::StaleHandle { .. })));
}

#[test]
fn framebuffer_texture_survives_resize() {
    let mut renderer = headless_renderer();
    let framebuffer = renderer.create_framebuffer(256, 256).unwrap();
    let texture = renderer.framebuffer_texture(framebuffer).unwrap();
    let shader = textured_shader(&mut renderer);
    let material = renderer.create_material(shader).unwrap();
    renderer.set_material_texture(material, 1, texture).unwrap();
    let set = renderer.material_descriptor_set(material).unwrap().unwrap();
    let before = renderer.texture_binding(texture).unwrap();

    renderer.resize_framebuffer(framebuffer, 512, 512).unwrap();

    assert_eq!(renderer.framebuffer_texture(framebuffer).unwrap(), texture);
    assert_eq!(renderer.framebuffer_extent(framebuffer).unwrap(), vk::Extent2D { width: 512, height: 512 });
    let after = renderer.texture_binding(texture).unwrap();
    assert_ne!(after.view, before.view);
    assert_eq!(
        renderer.device().descriptor_write(set, 1),
        Some(DescriptorWrite::Image { view: after.view, sampler: after.sampler })
    );
    assert!(matches!(renderer.destroy_texture(texture), Err(RenderError::InvalidOperation { .. })));
    assert!(matches!(renderer.destroy_framebuffer(framebuffer), Err(RenderError::InvalidOperation { .. })));
}

#[test]
fn queued_framebuffer_draws_precede_the_main_pass() {
    let mut renderer = headless_renderer();
    let framebuffer = renderer.create_framebuffer(320, 200).unwrap();
    let shader = push_shader(&mut renderer);
    let (_, object) = object_with(&mut renderer, shader);
    renderer.queue_framebuffer_draw(framebuffer, object, &[0; 64]).unwrap();

    renderer.device().clear_calls();
    renderer.begin_frame().unwrap().unwrap();
    let calls = renderer.device().calls();
    assert_eq!(render_pass_extents(&calls), vec![
        vk::Extent2D { width: 320, height: 200 },
        vk::Extent2D { width: 1280, height: 720 },
    ]);
    assert_eq!(calls.iter().filter(|call| matches!(call, DeviceCall::DrawIndexed { .. })).count(), 1);
    renderer.end_frame().unwrap();

    // Queue is consumed by the frame
    renderer.device().clear_calls();
    run_frame(&mut renderer);
    assert_eq!(render_pass_extents(&renderer.device().calls()).len(), 1);
}

#[test]
fn malformed_uploads_are_rejected() {
    let mut renderer = headless_renderer();
    assert!(matches!(renderer.create_texture(2, 2, &[0; 15]), Err(RenderError::InvalidArgument(_))));
    assert!(matches!(renderer.create_texture(0, 0, &[]), Err(RenderError::InvalidArgument(_))));

    let (vertices, _) = quad();
    assert!(matches!(renderer.upload_mesh(&vertices, &[0, 1, 9]), Err(RenderError::InvalidArgument(_))));
    assert!(matches!(renderer.upload_mesh(&[], &[]), Err(RenderError::InvalidArgument(_))));
}

#[test]
fn shader_creation_failure_leaves_nothing_behind() {
    let mut renderer = headless_renderer();
    let live = renderer.device().total_live();
    let vertex = assemble(Stage::Vertex, &[Resource::uniform(2, 0, vec![Member::Vec4])]);
    let fragment = assemble(Stage::Fragment, &[Resource::texture(2, 0)]);

    assert!(matches!(
        renderer.create_shader(&vertex, &fragment),
        Err(RenderError::ReflectionConflict { slot: 0, .. })
    ));
    assert_eq!(renderer.device().total_live(), live);
}
