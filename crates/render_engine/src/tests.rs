use render_protocol::{
    ColorMatrix, ExternalImageHandle, FramebufferHandle, IDENTITY_MATRIX, Mesh, Primitive, Rect,
    Rotation, Texture, TextureHandle,
};

use super::*;

const SEPIA_MATRIX: ColorMatrix = [
    0.393, 0.349, 0.272, 0.0, //
    0.769, 0.686, 0.534, 0.0, //
    0.189, 0.168, 0.131, 0.0, //
    0.0, 0.0, 0.0, 1.0, //
];

fn engine() -> GpuRenderEngine<RecordingDriver> {
    engine_with_config(RenderEngineConfig::default())
}

fn engine_with_config(config: RenderEngineConfig) -> GpuRenderEngine<RecordingDriver> {
    GpuRenderEngine::new(RecordingDriver::default(), config).expect("create engine")
}

fn set_full_viewport<E: RenderEngine + ?Sized>(engine: &mut E, width: u32, height: u32) {
    engine
        .set_viewport_and_projection(
            width,
            height,
            Rect::from_size(width, height),
            height,
            false,
            Rotation::Rot0,
        )
        .expect("set viewport and projection");
}

fn layer_texture(
    engine: &mut GpuRenderEngine<RecordingDriver>,
    width: u32,
    height: u32,
) -> Texture {
    let handle: TextureHandle = engine
        .driver_mut()
        .create_texture(&TextureDescriptor {
            label: "test.layer",
            width,
            height,
            renderable: false,
        })
        .expect("create layer texture");
    Texture::new_2d(handle, width, height)
}

fn bound_framebuffer(engine: &GpuRenderEngine<RecordingDriver>) -> FramebufferHandle {
    match engine.driver().bound_target() {
        RenderTarget::Framebuffer(framebuffer) => framebuffer,
        RenderTarget::Default => panic!("expected an off-screen framebuffer to be bound"),
    }
}

fn last_draw(engine: &GpuRenderEngine<RecordingDriver>) -> (RenderTarget, DrawDescription) {
    engine
        .driver()
        .draws()
        .last()
        .copied()
        .expect("at least one draw recorded")
}

fn unit_quad() -> Mesh {
    Mesh::textured_quad(1.0, 1.0)
}

fn assert_window_point(actual: (f32, f32), expected: (f32, f32)) {
    assert!(
        (actual.0 - expected.0).abs() < 1e-4 && (actual.1 - expected.1).abs() < 1e-4,
        "expected {expected:?}, got {actual:?}"
    );
}

#[test]
fn nested_groups_restore_enclosing_target_and_leave_depth_zero() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 64, 32);

    engine.begin_group(&IDENTITY_MATRIX).expect("begin outer group");
    let outer = bound_framebuffer(&engine);
    engine.begin_group(&SEPIA_MATRIX).expect("begin inner group");
    let inner = bound_framebuffer(&engine);
    assert_ne!(outer, inner);
    assert_eq!(engine.group_depth(), 2);

    engine.end_group().expect("end inner group");
    assert_eq!(
        engine.driver().bound_target(),
        RenderTarget::Framebuffer(outer)
    );
    engine.end_group().expect("end outer group");
    assert_eq!(engine.driver().bound_target(), RenderTarget::Default);
    assert_eq!(engine.group_depth(), 0);
    engine
        .verify_frame_boundary()
        .expect("frame boundary must be clean");
}

#[test]
fn same_size_group_cycles_reuse_identical_handles() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 128, 128);

    engine.begin_group(&IDENTITY_MATRIX).expect("begin first cycle");
    let first = bound_framebuffer(&engine);
    engine.end_group().expect("end first cycle");
    let textures_after_first = engine.driver().live_texture_count();

    engine.begin_group(&SEPIA_MATRIX).expect("begin second cycle");
    assert_eq!(bound_framebuffer(&engine), first);
    engine.end_group().expect("end second cycle");
    assert_eq!(engine.driver().live_texture_count(), textures_after_first);
}

#[test]
fn different_sizes_never_share_groups() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 64, 32);
    engine.begin_group(&IDENTITY_MATRIX).expect("begin landscape group");
    let landscape = bound_framebuffer(&engine);
    engine.end_group().expect("end landscape group");

    set_full_viewport(&mut engine, 32, 64);
    engine.begin_group(&IDENTITY_MATRIX).expect("begin portrait group");
    let portrait = bound_framebuffer(&engine);
    engine.end_group().expect("end portrait group");

    assert_ne!(landscape, portrait);
    let keys = engine.cached_group_keys();
    assert_eq!(keys.len(), 2);
    assert!(keys.contains(&GroupKey::new(64, 32)));
    assert!(keys.contains(&GroupKey::new(32, 64)));
}

#[test]
fn put_group_then_begin_returns_the_same_handles() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 40, 30);
    engine.begin_group(&IDENTITY_MATRIX).expect("begin group");
    engine.end_group().expect("end group");

    let group = engine.get_group().expect("cached group for viewport size");
    assert!(group.is_valid());
    assert_eq!(engine.get_group(), None);

    engine.put_group(group).expect("return group");
    engine.begin_group(&IDENTITY_MATRIX).expect("begin reused group");
    assert_eq!(bound_framebuffer(&engine), group.framebuffer);
    engine.end_group().expect("end reused group");
    let (_, description) = last_draw(&engine);
    assert_eq!(
        description.texture.map(|texture| texture.handle),
        Some(group.texture)
    );
}

#[test]
fn full_crop_projection_is_identity_onto_viewport() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 320, 240);
    let projection = *engine.projection().expect("projection configured");

    assert_window_point(projection.to_window(0.0, 0.0), (0.0, 0.0));
    assert_window_point(projection.to_window(320.0, 240.0), (320.0, 240.0));
    assert_window_point(projection.to_window(100.0, 40.0), (100.0, 40.0));

    engine.setup_fill_with_color(1.0, 0.0, 0.0, 1.0);
    engine.draw_mesh(&unit_quad()).expect("draw quad");
    let (_, description) = last_draw(&engine);
    assert_eq!(description.projection, projection.matrix());
}

#[test]
fn y_swap_mirrors_the_vertical_axis() {
    let mut engine = engine();
    engine
        .set_viewport_and_projection(
            200,
            100,
            Rect::from_size(200, 100),
            100,
            true,
            Rotation::Rot0,
        )
        .expect("set swapped projection");
    let projection = engine.projection().expect("projection configured");

    assert_window_point(projection.to_window(30.0, 20.0), (30.0, 80.0));
    assert!(engine.projection_y_swap());
}

#[test]
fn projection_queries_reflect_last_configuration() {
    let mut engine = engine();
    assert_eq!(engine.viewport_width(), 0);
    assert_eq!(engine.projection_source_crop(), Rect::default());

    let crop = Rect::new(10, 20, 110, 220);
    engine
        .set_viewport_and_projection(200, 100, crop, 400, false, Rotation::Rot90)
        .expect("set rotated projection");
    assert_eq!(engine.viewport_width(), 200);
    assert_eq!(engine.viewport_height(), 100);
    assert_eq!(engine.projection_source_crop(), crop);
    assert_eq!(engine.projection_rotation(), Rotation::Rot90);
    assert!(!engine.projection_y_swap());
    assert_eq!(engine.driver().viewport(), (200, 100));
}

#[test]
fn viewport_beyond_device_limits_is_rejected_without_state_change() {
    let driver = RecordingDriver::new(DriverLimits {
        max_texture_size: 1024,
        max_viewport_dims: (1024, 512),
    });
    let mut engine =
        GpuRenderEngine::new(driver, RenderEngineConfig::default()).expect("create engine");
    set_full_viewport(&mut engine, 256, 256);

    let error = engine
        .set_viewport_and_projection(
            1024,
            600,
            Rect::from_size(1024, 600),
            600,
            false,
            Rotation::Rot0,
        )
        .expect_err("height above limit must fail");
    assert!(matches!(
        error,
        EngineError::ResourceLimit {
            kind: ResourceKind::ViewportHeight,
            requested: 600,
            max: 512,
        }
    ));
    assert_eq!(engine.viewport_width(), 256);
    assert_eq!(engine.driver().viewport(), (256, 256));
}

#[test]
fn blacked_out_takes_precedence_over_texture_and_mask() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 16, 16);
    let layer = layer_texture(&mut engine, 8, 8);
    let mask = layer_texture(&mut engine, 8, 8);

    engine.setup_layer_texturing(&layer);
    engine.setup_layer_masking(&mask, 0.5);
    engine.setup_layer_blacked_out();
    assert_eq!(
        engine.render_state().effective_source(),
        DrawSource::BlackedOut
    );

    engine.draw_mesh(&unit_quad()).expect("draw blacked out layer");
    let (_, description) = last_draw(&engine);
    assert_eq!(description.texture, Some(engine.protected_texture()));
    assert_eq!(description.mask, None);

    engine.setup_layer_texturing(&layer);
    assert_eq!(
        engine.render_state().effective_source(),
        DrawSource::Texture(layer.handle)
    );
    engine.draw_mesh(&unit_quad()).expect("draw textured layer");
    let (_, description) = last_draw(&engine);
    assert_eq!(description.texture, Some(layer));
    assert_eq!(description.mask.map(|mask| mask.alpha_threshold), Some(0.5));
}

#[test]
fn blending_is_disabled_only_for_opaque_full_alpha() {
    let mut engine = engine();
    for premultiplied in [false, true] {
        for opaque in [false, true] {
            for alpha in [0u8, 128, 254, 255] {
                engine.setup_layer_blending(premultiplied, opaque, alpha);
                let expect_blend = !(opaque && alpha == 255);
                assert_eq!(
                    engine.render_state().blending_enabled(),
                    expect_blend,
                    "premultiplied={premultiplied} opaque={opaque} alpha={alpha}"
                );
                assert_eq!(engine.driver().blend(), engine.render_state().blend());
                if expect_blend {
                    let expected = if premultiplied {
                        BlendFunc::PREMULTIPLIED_OVER
                    } else {
                        BlendFunc::STRAIGHT_OVER
                    };
                    assert_eq!(engine.render_state().blend(), Some(expected));
                }
                assert!(
                    (engine.render_state().plane_alpha() - alpha as f32 / 255.0).abs() < 1e-6
                );
            }
        }
    }
}

#[test]
fn dim_layer_uses_black_with_alpha_and_premultiplied_blend() {
    let mut engine = engine();
    engine.setup_dim_layer_blending(51);
    let state = engine.render_state();
    assert_eq!(state.color(), [0.0, 0.0, 0.0, 0.2]);
    assert!(state.premultiplied_alpha());
    assert!(!state.opaque());
    assert_eq!(state.plane_alpha(), 1.0);
    assert_eq!(state.blend(), Some(BlendFunc::PREMULTIPLIED_OVER));

    engine.setup_dim_layer_blending(255);
    assert_eq!(engine.render_state().blend(), None);
}

#[test]
fn fill_with_color_disables_texturing_and_blending() {
    let mut engine = engine();
    let layer = layer_texture(&mut engine, 4, 4);
    engine.setup_layer_blending(true, false, 100);
    engine.setup_layer_texturing(&layer);

    engine.setup_fill_with_color(0.25, 0.5, 0.75, 1.0);
    let state = engine.render_state();
    assert_eq!(
        state.effective_source(),
        DrawSource::Fill([0.25, 0.5, 0.75, 1.0])
    );
    assert!(!state.blending_enabled());
    assert_eq!(engine.driver().blend(), None);
}

#[test]
fn color_transform_returns_previous_matrix() {
    let mut engine = engine();
    assert_eq!(engine.setup_color_transform(&SEPIA_MATRIX), IDENTITY_MATRIX);
    assert_eq!(engine.setup_color_transform(&IDENTITY_MATRIX), SEPIA_MATRIX);
    assert_eq!(engine.render_state().color_matrix(), IDENTITY_MATRIX);
}

#[test]
fn disable_texturing_clears_only_the_source() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 8, 8);
    let layer = layer_texture(&mut engine, 4, 4);
    let mask = layer_texture(&mut engine, 4, 4);
    engine.setup_layer_blending(true, false, 128);
    engine.setup_layer_texturing(&layer);
    engine.setup_layer_masking(&mask, 0.25);

    engine.disable_texturing();
    engine.draw_mesh(&unit_quad()).expect("draw untextured layer");
    let (_, description) = last_draw(&engine);
    assert_eq!(description.texture, None);
    assert_eq!(
        description.mask.map(|layer_mask| layer_mask.texture),
        Some(mask)
    );
    assert!(description.premultiplied_alpha);
    assert!((description.plane_alpha - 128.0 / 255.0).abs() < 1e-6);
    assert_eq!(
        engine.render_state().blend(),
        Some(BlendFunc::PREMULTIPLIED_OVER)
    );
    assert_eq!(engine.driver().blend(), Some(BlendFunc::PREMULTIPLIED_OVER));
}

#[test]
fn disable_blending_keeps_source_mask_and_alpha() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 8, 8);
    let layer = layer_texture(&mut engine, 4, 4);
    let mask = layer_texture(&mut engine, 4, 4);
    engine.setup_layer_blending(false, false, 200);
    engine.setup_layer_texturing(&layer);
    engine.setup_layer_masking(&mask, 0.5);

    engine.disable_blending();
    assert!(!engine.render_state().blending_enabled());
    assert_eq!(engine.driver().blend(), None);
    engine.draw_mesh(&unit_quad()).expect("draw unblended layer");
    let (_, description) = last_draw(&engine);
    assert_eq!(description.texture, Some(layer));
    assert_eq!(
        description.mask,
        Some(LayerMask {
            texture: mask,
            alpha_threshold: 0.5,
        })
    );
    assert!(!description.premultiplied_alpha);
    assert!(!description.opaque);
    assert!((description.plane_alpha - 200.0 / 255.0).abs() < 1e-6);
}

#[test]
fn disable_layer_masking_keeps_texture_and_blend() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 8, 8);
    let layer = layer_texture(&mut engine, 4, 4);
    let mask = layer_texture(&mut engine, 4, 4);
    engine.setup_layer_blending(true, false, 255);
    engine.setup_layer_texturing(&layer);
    engine.setup_layer_masking(&mask, 0.5);

    engine.disable_layer_masking();
    assert_eq!(engine.render_state().mask(), None);
    engine.draw_mesh(&unit_quad()).expect("draw unmasked layer");
    let (_, description) = last_draw(&engine);
    assert_eq!(description.texture, Some(layer));
    assert_eq!(description.mask, None);
    assert_eq!(
        engine.render_state().blend(),
        Some(BlendFunc::PREMULTIPLIED_OVER)
    );
    assert_eq!(engine.driver().blend(), Some(BlendFunc::PREMULTIPLIED_OVER));
}

#[test]
fn masking_applies_over_fill_and_texture_sources() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 8, 8);
    let layer = layer_texture(&mut engine, 4, 4);
    let mask = layer_texture(&mut engine, 4, 4);
    engine.setup_fill_with_color(0.5, 0.25, 0.75, 1.0);
    engine.setup_layer_masking(&mask, 0.75);
    assert_eq!(
        engine.render_state().effective_source(),
        DrawSource::Fill([0.5, 0.25, 0.75, 1.0])
    );

    engine.draw_mesh(&unit_quad()).expect("draw masked fill");
    let (_, description) = last_draw(&engine);
    assert_eq!(description.texture, None);
    assert_eq!(description.color, [0.5, 0.25, 0.75, 1.0]);
    assert_eq!(
        description.mask.map(|layer_mask| layer_mask.alpha_threshold),
        Some(0.75)
    );
    assert_eq!(engine.driver().blend(), None);

    engine.setup_layer_texturing(&layer);
    engine.draw_mesh(&unit_quad()).expect("draw masked texture");
    let (_, description) = last_draw(&engine);
    assert_eq!(description.texture, Some(layer));
    assert_eq!(
        description.mask.map(|layer_mask| layer_mask.texture),
        Some(mask)
    );
}

#[test]
fn end_group_composites_through_group_color_transform() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 50, 40);
    engine.setup_layer_blending(false, false, 200);
    let caller_blend = engine.render_state().blend();

    engine.begin_group(&SEPIA_MATRIX).expect("begin group");
    let group_framebuffer = bound_framebuffer(&engine);
    engine.end_group().expect("end group");

    let (target, description) = last_draw(&engine);
    assert_eq!(target, RenderTarget::Default);
    assert_eq!(description.color_matrix, Some(SEPIA_MATRIX));
    assert_eq!(description.plane_alpha, 1.0);
    assert!(description.premultiplied_alpha);
    assert!(!description.opaque);
    let group = engine.get_group().expect("group back in cache");
    assert_eq!(group.framebuffer, group_framebuffer);
    assert_eq!(group.color_transform, SEPIA_MATRIX);
    assert_eq!(
        description.texture.map(|texture| texture.handle),
        Some(group.texture)
    );

    let blend_during_composite = engine
        .driver()
        .calls()
        .iter()
        .rev()
        .skip_while(|call| !matches!(call, DriverCall::Draw { .. }))
        .find_map(|call| match call {
            DriverCall::SetBlend(blend) => Some(*blend),
            _ => None,
        })
        .expect("blend set before composite");
    assert_eq!(blend_during_composite, None);
    assert_eq!(engine.render_state().blend(), caller_blend);
    assert_eq!(engine.driver().blend(), caller_blend);
    assert_eq!(engine.render_state().color_matrix(), IDENTITY_MATRIX);
}

#[test]
fn unmatched_end_group_is_a_contract_violation() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 10, 10);
    let error = engine.end_group().expect_err("end without begin must fail");
    assert_eq!(
        error.contract_violation(),
        Some(ContractViolation::UnmatchedEndGroup)
    );
    assert_eq!(engine.group_depth(), 0);
    assert_eq!(engine.driver().bound_target(), RenderTarget::Default);
}

#[test]
fn put_group_rejects_invalid_group() {
    let mut engine = engine();
    let error = engine
        .put_group(Group::default())
        .expect_err("invalid group must be rejected");
    assert_eq!(
        error.contract_violation(),
        Some(ContractViolation::InvalidGroup {
            width: 0,
            height: 0
        })
    );
    assert_eq!(engine.cached_group_count(), 0);
}

#[test]
fn put_group_rejects_a_group_still_on_the_stack() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 40, 30);
    engine.begin_group(&IDENTITY_MATRIX).expect("begin group");
    engine.end_group().expect("end group");
    let stale = engine.get_group().expect("cached group for viewport size");
    engine.put_group(stale).expect("return group");

    engine.begin_group(&IDENTITY_MATRIX).expect("begin reused group");
    assert_eq!(bound_framebuffer(&engine), stale.framebuffer);
    let error = engine
        .put_group(stale)
        .expect_err("group on the stack must be rejected");
    assert_eq!(
        error.contract_violation(),
        Some(ContractViolation::GroupInUse {
            width: 40,
            height: 30
        })
    );
    assert_eq!(engine.cached_group_count(), 0);

    engine.begin_group(&IDENTITY_MATRIX).expect("begin inner group");
    assert_ne!(bound_framebuffer(&engine), stale.framebuffer);
    engine.end_group().expect("end inner group");
    assert_eq!(
        engine.driver().bound_target(),
        RenderTarget::Framebuffer(stale.framebuffer)
    );
    engine.end_group().expect("end outer group");
    assert_eq!(engine.group_depth(), 0);
}

#[test]
fn begin_group_requires_a_viewport() {
    let mut engine = engine();
    let error = engine
        .begin_group(&IDENTITY_MATRIX)
        .expect_err("begin without viewport must fail");
    assert_eq!(
        error.contract_violation(),
        Some(ContractViolation::MissingViewport)
    );
    assert_eq!(engine.get_group(), None);
}

#[test]
fn verify_frame_boundary_reports_open_groups() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 8, 8);
    engine.begin_group(&IDENTITY_MATRIX).expect("begin group");
    let error = engine
        .verify_frame_boundary()
        .expect_err("open group must be reported");
    assert_eq!(
        error.contract_violation(),
        Some(ContractViolation::GroupsActive { depth: 1 })
    );
    engine.end_group().expect("end group");
}

#[test]
fn bounded_cache_releases_least_recently_returned_group() {
    let mut engine = engine_with_config(RenderEngineConfig {
        max_cached_groups: Some(1),
        ..RenderEngineConfig::default()
    });
    for (width, height) in [(16, 16), (32, 32)] {
        set_full_viewport(&mut engine, width, height);
        engine.begin_group(&IDENTITY_MATRIX).expect("begin group");
        engine.end_group().expect("end group");
    }

    assert_eq!(engine.cached_group_keys(), vec![GroupKey::new(32, 32)]);
    // Protected texture plus the surviving group.
    assert_eq!(engine.driver().live_texture_count(), 2);
    assert_eq!(engine.driver().live_framebuffer_count(), 1);
}

#[test]
fn displaced_same_size_group_is_released() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 24, 24);
    engine.begin_group(&IDENTITY_MATRIX).expect("begin outer");
    engine.begin_group(&IDENTITY_MATRIX).expect("begin inner");
    assert_eq!(engine.driver().live_framebuffer_count(), 2);

    engine.end_group().expect("end inner");
    engine.end_group().expect("end outer");
    assert_eq!(engine.cached_group_count(), 1);
    assert_eq!(engine.driver().live_framebuffer_count(), 1);
    assert_eq!(engine.driver().live_texture_count(), 2);
}

#[test]
fn release_cached_groups_frees_every_idle_group() {
    let mut engine = engine();
    for size in [8, 16, 32] {
        set_full_viewport(&mut engine, size, size);
        engine.begin_group(&IDENTITY_MATRIX).expect("begin group");
        engine.end_group().expect("end group");
    }
    assert_eq!(engine.release_cached_groups(), 3);
    assert_eq!(engine.driver().live_framebuffer_count(), 0);
    assert_eq!(engine.driver().live_texture_count(), 1);
}

#[test]
fn begin_group_clears_without_scissor_and_restores_it() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 20, 20);
    let scissor = Rect::new(2, 2, 10, 10);
    engine.set_scissor(scissor);
    engine.driver_mut().take_calls();

    engine.begin_group(&IDENTITY_MATRIX).expect("begin group");
    let framebuffer = bound_framebuffer(&engine);
    let calls = engine.driver_mut().take_calls();
    let clear_index = calls
        .iter()
        .position(|call| matches!(call, DriverCall::Clear { .. }))
        .expect("group cleared on begin");
    assert_eq!(
        calls[clear_index],
        DriverCall::Clear {
            target: RenderTarget::Framebuffer(framebuffer),
            color: [0.0, 0.0, 0.0, 0.0],
        }
    );
    assert_eq!(calls[clear_index - 1], DriverCall::SetScissor(None));
    assert_eq!(
        calls[clear_index + 1],
        DriverCall::SetScissor(Some(scissor))
    );
    assert_eq!(engine.driver().scissor(), Some(scissor));
    engine.end_group().expect("end group");
}

#[test]
fn failed_group_clear_keeps_stack_and_target_unchanged() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 12, 12);
    engine.driver_mut().set_fail_clears(true);

    let error = engine
        .begin_group(&IDENTITY_MATRIX)
        .expect_err("clear failure must surface");
    assert!(matches!(error, EngineError::Driver(_)));
    assert_eq!(engine.group_depth(), 0);
    assert_eq!(engine.driver().bound_target(), RenderTarget::Default);
    assert_eq!(engine.cached_group_count(), 1);
}

#[test]
fn groups_skip_clear_when_configured() {
    let mut engine = engine_with_config(RenderEngineConfig {
        clear_groups_on_begin: false,
        ..RenderEngineConfig::default()
    });
    set_full_viewport(&mut engine, 12, 12);
    engine.begin_group(&IDENTITY_MATRIX).expect("begin group");
    assert!(
        !engine
            .driver()
            .calls()
            .iter()
            .any(|call| matches!(call, DriverCall::Clear { .. }))
    );
    engine.end_group().expect("end group");
}

#[test]
fn readback_binding_copies_pixels_into_image() {
    let mut engine = engine();
    let image = engine.driver_mut().add_external_image(4, 2, false);

    let binding = engine
        .bind_image_as_framebuffer(image, true, 4, 2)
        .expect("bind readback target");
    assert_eq!(binding.status, FramebufferStatus::Complete);
    assert_eq!((binding.width, binding.height), (4, 2));
    set_full_viewport(&mut engine, 4, 2);
    engine
        .clear_with_color(1.0, 0.0, 0.0, 1.0)
        .expect("clear bound image");

    let pixels = engine
        .unbind_framebuffer(binding)
        .expect("unbind readback target")
        .expect("readback path returns pixels");
    let expected: Vec<u8> = [255, 0, 0, 255].repeat(8);
    assert_eq!(pixels.data, expected);
    assert_eq!(
        engine.driver().external_image_pixels(image),
        Some(expected.as_slice())
    );
    assert_eq!(engine.driver().bound_target(), RenderTarget::Default);
    assert!(!engine.driver().has_framebuffer(binding.framebuffer));
    assert!(!engine.driver().has_texture(binding.texture));
}

#[test]
fn direct_binding_reports_unsupported_image_through_status() {
    let mut engine = engine();
    let image = engine.driver_mut().add_external_image(16, 16, false);

    let binding = engine
        .bind_image_as_framebuffer(image, false, 0, 0)
        .expect("binding failure is reported as status");
    assert_eq!(
        binding.status,
        FramebufferStatus::Incomplete(IncompleteReason::UnsupportedAttachment)
    );
    assert_eq!(engine.unbind_framebuffer(binding).expect("unbind"), None);
    assert_eq!(engine.driver().live_framebuffer_count(), 0);
    assert_eq!(engine.driver().live_texture_count(), 1);
}

#[test]
fn direct_binding_renders_into_attachable_image() {
    let mut engine = engine();
    let image = engine.driver_mut().add_external_image(8, 8, true);
    let binding = engine
        .bind_image_as_framebuffer(image, false, 0, 0)
        .expect("bind attachable image");
    assert!(binding.status.is_complete());
    assert_eq!((binding.width, binding.height), (8, 8));
    assert_eq!(
        engine.driver().bound_target(),
        RenderTarget::Framebuffer(binding.framebuffer)
    );
    assert_eq!(engine.unbind_framebuffer(binding).expect("unbind"), None);
}

#[test]
fn zero_sized_readback_binding_is_incomplete() {
    let mut engine = engine();
    let image = engine.driver_mut().add_external_image(8, 8, false);
    let binding = engine
        .bind_image_as_framebuffer(image, true, 0, 8)
        .expect("zero size is reported as status");
    assert_eq!(
        binding.status,
        FramebufferStatus::Incomplete(IncompleteReason::ZeroSizedAttachment)
    );
    assert_eq!(engine.unbind_framebuffer(binding).expect("unbind"), None);
    assert_eq!(engine.active_binding(), None);
}

#[test]
fn second_binding_is_rejected() {
    let mut engine = engine();
    let first = engine.driver_mut().add_external_image(8, 8, true);
    let second = engine.driver_mut().add_external_image(8, 8, true);
    let binding = engine
        .bind_image_as_framebuffer(first, false, 0, 0)
        .expect("bind first image");

    let error = engine
        .bind_image_as_framebuffer(second, false, 0, 0)
        .expect_err("second binding must fail");
    assert_eq!(
        error.contract_violation(),
        Some(ContractViolation::ExternalTargetAlreadyBound)
    );
    assert_eq!(engine.active_binding(), Some(binding));
    engine.unbind_framebuffer(binding).expect("unbind first image");
}

#[test]
fn unbinding_a_foreign_binding_is_rejected() {
    let mut engine = engine();
    let image = engine.driver_mut().add_external_image(8, 8, true);
    let binding = engine
        .bind_image_as_framebuffer(image, false, 0, 0)
        .expect("bind image");
    let forged = ImageBinding {
        width: 9,
        ..binding
    };
    let error = engine
        .unbind_framebuffer(forged)
        .expect_err("mismatched binding must fail");
    assert_eq!(
        error.contract_violation(),
        Some(ContractViolation::BindingMismatch)
    );
    engine.unbind_framebuffer(binding).expect("unbind real binding");
    let error = engine
        .unbind_framebuffer(binding)
        .expect_err("double unbind must fail");
    assert_eq!(
        error.contract_violation(),
        Some(ContractViolation::NoActiveBinding)
    );
}

#[test]
fn binding_requires_an_empty_group_stack() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 8, 8);
    let image = engine.driver_mut().add_external_image(8, 8, true);
    engine.begin_group(&IDENTITY_MATRIX).expect("begin group");
    let error = engine
        .bind_image_as_framebuffer(image, false, 0, 0)
        .expect_err("bind inside group must fail");
    assert_eq!(
        error.contract_violation(),
        Some(ContractViolation::GroupsActive { depth: 1 })
    );
    engine.end_group().expect("end group");
}

#[test]
fn group_inside_binding_returns_to_bound_image() {
    let mut engine = engine();
    let image = engine.driver_mut().add_external_image(30, 20, true);
    let binding = engine
        .bind_image_as_framebuffer(image, false, 0, 0)
        .expect("bind image");
    set_full_viewport(&mut engine, 30, 20);

    engine.begin_group(&SEPIA_MATRIX).expect("begin group");
    engine.end_group().expect("end group");
    assert_eq!(
        engine.driver().bound_target(),
        RenderTarget::Framebuffer(binding.framebuffer)
    );
    let (target, _) = last_draw(&engine);
    assert_eq!(target, RenderTarget::Framebuffer(binding.framebuffer));
    engine.unbind_framebuffer(binding).expect("unbind image");
}

#[test]
fn draw_mesh_validates_attributes_and_skips_empty_meshes() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 8, 8);
    engine
        .draw_mesh(&Mesh::new(Primitive::Triangles, Vec::new()))
        .expect("empty mesh is a no-op");
    assert!(engine.driver().draws().is_empty());

    let mismatched = Mesh::new(
        Primitive::TriangleFan,
        vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]],
    )
    .with_tex_coords(vec![[0.0, 0.0]]);
    let error = engine
        .draw_mesh(&mismatched)
        .expect_err("mismatched attributes must fail");
    assert_eq!(
        error.contract_violation(),
        Some(ContractViolation::MeshAttributeMismatch {
            positions: 3,
            tex_coords: 1
        })
    );
}

#[test]
fn draw_mesh_rejects_textures_beyond_device_limit() {
    let driver = RecordingDriver::new(DriverLimits {
        max_texture_size: 64,
        max_viewport_dims: (64, 64),
    });
    let mut engine =
        GpuRenderEngine::new(driver, RenderEngineConfig::default()).expect("create engine");
    let oversized = layer_texture(&mut engine, 128, 16);
    engine.setup_layer_texturing(&oversized);
    let error = engine
        .draw_mesh(&unit_quad())
        .expect_err("oversized texture must fail");
    assert!(matches!(
        error,
        EngineError::ResourceLimit {
            kind: ResourceKind::TextureWidth,
            requested: 128,
            max: 64,
        }
    ));
    assert!(engine.driver().draws().is_empty());
    assert!(engine.check_texture_size(64, 64).is_ok());
}

#[test]
fn fill_region_converts_top_left_rects_into_window_space() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 100, 50);
    engine
        .fill_region_with_color(
            &[Rect::new(0, 0, 10, 10), Rect::new(5, 5, 5, 9)],
            0.0,
            1.0,
            0.0,
            1.0,
        )
        .expect("fill region");

    let positions = engine
        .driver()
        .calls()
        .iter()
        .rev()
        .find_map(|call| match call {
            DriverCall::Draw { positions, .. } => Some(positions.clone()),
            _ => None,
        })
        .expect("fill draw recorded");
    assert_eq!(positions.len(), 6);
    assert!(positions.contains(&[0.0, 50.0]));
    assert!(positions.contains(&[10.0, 40.0]));
    let (_, description) = last_draw(&engine);
    assert_eq!(description.color, [0.0, 1.0, 0.0, 1.0]);
    assert_eq!(description.texture, None);
}

#[test]
fn read_pixels_of_empty_rect_is_empty() {
    let mut engine = engine();
    assert!(engine
        .read_pixels(Rect::new(4, 4, 4, 8))
        .expect("empty read")
        .is_empty());
}

#[test]
fn group_scope_ends_group_on_early_return() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 16, 16);
    {
        let scope = engine.scoped_group(&IDENTITY_MATRIX).expect("begin scope");
        assert_eq!(scope.group_depth(), 1);
    }
    assert_eq!(engine.group_depth(), 0);
    assert_eq!(engine.driver().bound_target(), RenderTarget::Default);

    let mismatched = Mesh::new(Primitive::Triangles, vec![[0.0, 0.0]; 3])
        .with_tex_coords(vec![[0.0, 0.0]]);
    let result = (|| -> Result<(), EngineError> {
        let mut scope = engine.scoped_group(&SEPIA_MATRIX)?;
        scope.setup_fill_with_color(1.0, 1.0, 1.0, 1.0);
        scope.draw_mesh(&mismatched)?;
        scope.end()
    })();
    assert!(result.is_err());
    assert_eq!(engine.group_depth(), 0);
    assert_eq!(engine.cached_group_count(), 1);
}

#[test]
fn group_scope_does_not_end_an_enclosing_group() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 16, 16);
    engine.begin_group(&IDENTITY_MATRIX).expect("begin outer group");
    let outer = bound_framebuffer(&engine);
    {
        let mut scope = engine.scoped_group(&SEPIA_MATRIX).expect("begin scope");
        scope.end_group().expect("end the scope's group directly");
    }
    assert_eq!(engine.group_depth(), 1);
    assert_eq!(
        engine.driver().bound_target(),
        RenderTarget::Framebuffer(outer)
    );
    engine.end_group().expect("end outer group");
    assert_eq!(engine.group_depth(), 0);
}

#[test]
fn group_scope_end_reports_unclosed_inner_group() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 16, 16);
    let mut scope = engine.scoped_group(&IDENTITY_MATRIX).expect("begin scope");
    scope.begin_group(&SEPIA_MATRIX).expect("begin inner group");
    let error = scope.end().expect_err("scope must not pop the inner group");
    assert_eq!(
        error.contract_violation(),
        Some(ContractViolation::GroupScopeMismatch {
            expected: 1,
            actual: 2
        })
    );
    assert_eq!(engine.group_depth(), 2);
    engine.end_group().expect("end inner group");
    engine.end_group().expect("end scope group");
    engine
        .verify_frame_boundary()
        .expect("frame boundary must be clean");
}

#[test]
fn image_target_scope_releases_binding_on_drop() {
    let mut engine = engine();
    let image = engine.driver_mut().add_external_image(6, 6, true);
    {
        let scope = ImageTargetScope::bind(&mut engine, image, false, 0, 0).expect("bind scope");
        assert!(scope.status().is_complete());
    }
    assert_eq!(engine.active_binding(), None);
    assert_eq!(engine.driver().bound_target(), RenderTarget::Default);

    let readback_image = engine.driver_mut().add_external_image(2, 2, false);
    let mut scope =
        ImageTargetScope::bind(&mut engine, readback_image, true, 2, 2).expect("bind readback");
    scope
        .clear_with_color(0.0, 0.0, 1.0, 1.0)
        .expect("clear readback target");
    let pixels = scope
        .finish()
        .expect("finish readback")
        .expect("readback pixels");
    assert_eq!(pixels.data, [0, 0, 255, 255].repeat(4));
}

#[test]
fn engine_is_usable_as_trait_object() {
    let mut engine: Box<dyn RenderEngine> = Box::new(engine());
    set_full_viewport(engine.as_mut(), 32, 32);
    {
        let mut scope = GroupScope::begin(engine.as_mut(), &SEPIA_MATRIX).expect("begin scope");
        scope.setup_dim_layer_blending(128);
        scope.draw_mesh(&unit_quad()).expect("draw dim layer");
        scope.end().expect("end scope");
    }
    assert_eq!(engine.group_depth(), 0);
    assert_eq!(engine.max_texture_size(), 4096);
    assert_eq!(engine.max_viewport_dims(), (4096, 4096));
    engine.verify_frame_boundary().expect("clean boundary");
}

#[test]
fn dump_reports_groups_and_binding() {
    let mut engine = engine();
    set_full_viewport(&mut engine, 48, 24);
    engine.begin_group(&IDENTITY_MATRIX).expect("begin group");
    let mut out = String::new();
    engine.dump(&mut out);
    assert!(out.contains("viewport: 48x24"));
    assert!(out.contains("groups: depth=1 cached=0 allocated=1"));
    assert!(out.contains("binding: none"));
    engine.end_group().expect("end group");
}

#[test]
fn invalid_config_is_rejected_at_construction() {
    let error = GpuRenderEngine::new(
        RecordingDriver::default(),
        RenderEngineConfig {
            max_cached_groups: Some(0),
            ..RenderEngineConfig::default()
        },
    )
    .err()
    .expect("zero cache bound must fail");
    assert!(matches!(
        error,
        EngineError::Config(ConfigError::ZeroCacheBound)
    ));
}

#[cfg(feature = "wgpu-driver")]
mod gpu {
    use super::*;

    fn wgpu_engine() -> GpuRenderEngine<WgpuDriver> {
        let (device, queue) = pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::LowPower,
                    compatible_surface: None,
                    force_fallback_adapter: true,
                })
                .await
                .expect("request test adapter");
            adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("render_engine.test_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    experimental_features: wgpu::ExperimentalFeatures::disabled(),
                    memory_hints: wgpu::MemoryHints::Performance,
                    trace: wgpu::Trace::Off,
                })
                .await
                .expect("request test device")
        });
        GpuRenderEngine::new(
            WgpuDriver::new(device, queue),
            RenderEngineConfig::default(),
        )
        .expect("create wgpu engine")
    }

    fn readback_target(engine: &mut GpuRenderEngine<WgpuDriver>, size: u32) -> ExternalImageHandle {
        let texture = engine
            .driver()
            .device()
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("render_engine.test_image"),
                size: wgpu::Extent3d {
                    width: size,
                    height: size,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
        engine.driver_mut().register_external_image(texture)
    }

    fn pixel(pixels: &ReadbackPixels, x: u32, y: u32) -> [u8; 4] {
        let offset = ((y * pixels.width + x) * 4) as usize;
        [
            pixels.data[offset],
            pixels.data[offset + 1],
            pixels.data[offset + 2],
            pixels.data[offset + 3],
        ]
    }

    #[test]
    #[ignore = "needs a wgpu adapter; run explicitly on machines with one"]
    fn fill_region_lands_at_top_left_of_readback() {
        let mut engine = wgpu_engine();
        let image = readback_target(&mut engine, 8);
        let binding = engine
            .bind_image_as_framebuffer(image, true, 8, 8)
            .expect("bind readback target");
        assert!(binding.status.is_complete());
        set_full_viewport(&mut engine, 8, 8);
        engine
            .clear_with_color(0.0, 0.0, 1.0, 1.0)
            .expect("clear to blue");
        engine
            .fill_region_with_color(&[Rect::new(0, 0, 4, 4)], 1.0, 0.0, 0.0, 1.0)
            .expect("fill top-left quadrant");

        let pixels = engine
            .unbind_framebuffer(binding)
            .expect("unbind readback target")
            .expect("readback pixels");
        assert_eq!(pixel(&pixels, 0, 0), [255, 0, 0, 255]);
        assert_eq!(pixel(&pixels, 3, 3), [255, 0, 0, 255]);
        assert_eq!(pixel(&pixels, 7, 0), [0, 0, 255, 255]);
        assert_eq!(pixel(&pixels, 7, 7), [0, 0, 255, 255]);
    }

    #[test]
    #[ignore = "needs a wgpu adapter; run explicitly on machines with one"]
    fn group_composite_keeps_orientation() {
        let mut engine = wgpu_engine();
        let image = readback_target(&mut engine, 8);
        let binding = engine
            .bind_image_as_framebuffer(image, true, 8, 8)
            .expect("bind readback target");
        set_full_viewport(&mut engine, 8, 8);
        engine
            .clear_with_color(0.0, 0.0, 1.0, 1.0)
            .expect("clear to blue");

        engine.begin_group(&IDENTITY_MATRIX).expect("begin group");
        engine
            .fill_region_with_color(&[Rect::new(4, 4, 8, 8)], 0.0, 1.0, 0.0, 1.0)
            .expect("fill bottom-right quadrant");
        engine.end_group().expect("end group");

        let pixels = engine
            .unbind_framebuffer(binding)
            .expect("unbind readback target")
            .expect("readback pixels");
        // Groups composite without blending, so untouched group pixels stay transparent.
        assert_eq!(pixel(&pixels, 0, 0), [0, 0, 0, 0]);
        assert_eq!(pixel(&pixels, 7, 7), [0, 255, 0, 255]);
        assert_eq!(pixel(&pixels, 5, 4), [0, 255, 0, 255]);
        assert!(engine.driver().pipeline_count() >= 1);
    }
}
