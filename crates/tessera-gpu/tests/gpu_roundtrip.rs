//! Tests that need a Vulkan device. Each returns early when none is available.

use tessera_gpu::vk;
use tessera_gpu::{
    create_buffer, DeviceContext, DeviceContextBuilder, FrameSlots, FrameUniforms, GpuError,
    PipelineState, Texture, Uploader,
};

fn headless_context() -> Option<DeviceContext> {
    match DeviceContextBuilder::new()
        .app_name("tessera-gpu-tests")
        .validation(false)
        .headless()
        .build()
    {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("Skipping GPU test: {e}");
            None
        }
    }
}

#[test]
fn staged_upload_round_trips() {
    let Some(ctx) = headless_context() else {
        return;
    };
    let uploader = Uploader::new(&ctx).unwrap();

    let data: Vec<u8> = (0..=255u8).cycle().take(4099).collect();
    let mut buffer = uploader
        .upload_via_staging(
            &ctx,
            &data,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
        )
        .unwrap();

    assert_eq!(buffer.size, data.len() as u64);
    assert!(buffer.usage.contains(vk::BufferUsageFlags::TRANSFER_DST));

    let read = uploader.read_back(&ctx, &buffer).unwrap();
    assert_eq!(read, data);

    unsafe {
        buffer.destroy(ctx.device());
        uploader.destroy(ctx.device());
    }
}

#[test]
fn zero_sized_buffer_is_rejected() {
    let Some(ctx) = headless_context() else {
        return;
    };

    let err = create_buffer(
        &ctx,
        0,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        vk::MemoryPropertyFlags::HOST_VISIBLE,
    )
    .err()
    .unwrap();
    assert!(matches!(err, GpuError::ZeroSizedBuffer { .. }));
}

#[test]
fn texture_upload_and_unsupported_transition() {
    let Some(ctx) = headless_context() else {
        return;
    };
    let uploader = Uploader::new(&ctx).unwrap();

    let texels = vec![255u8; 4 * 4 * 4];
    let mut texture = Texture::from_rgba8(&ctx, &uploader, &texels, 4, 4).unwrap();
    assert_eq!(texture.image.extent.width, 4);

    let err = uploader
        .transition_image_layout(
            &ctx,
            texture.image.image,
            texture.image.format,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::GENERAL,
        )
        .unwrap_err();
    assert!(matches!(err, GpuError::UnsupportedTransition { .. }));

    let short = uploader.upload_texture(&ctx, &texels[..10], 4, 4);
    assert!(matches!(short, Err(GpuError::InvalidState(_))));

    unsafe {
        texture.destroy(ctx.device());
        uploader.destroy(ctx.device());
    }
}

#[test]
fn frame_resources_are_created_per_slot() {
    let Some(ctx) = headless_context() else {
        return;
    };
    let device = ctx.device();

    let layout = unsafe {
        tessera_gpu::pipeline::descriptor_layout_builder(false)
            .build(device)
            .unwrap()
    };

    let mut slots = FrameSlots::new(&ctx, 3).unwrap();
    assert_eq!(slots.len(), 3);
    assert!(slots.get(3).is_err());

    let mut uniforms = FrameUniforms::new(&ctx, layout, 3, 192, None).unwrap();
    assert_eq!(uniforms.len(), 3);
    uniforms.update_uniforms(2, &[1.0f32; 48]).unwrap();
    assert!(uniforms.update_uniforms(3, &[0.0f32; 4]).is_err());
    assert!(uniforms.update_uniforms(0, &[0.0f32; 64]).is_err());

    unsafe {
        uniforms.destroy(device);
        slots.destroy(device);
        device.destroy_descriptor_set_layout(layout, None);
    }
}

#[test]
fn pipeline_rejects_empty_shaders() {
    let Some(ctx) = headless_context() else {
        return;
    };

    let result = PipelineState::new(&ctx, &tessera_gpu::PipelineConfig::default());
    assert!(matches!(result, Err(GpuError::ShaderModule(_))));
}
