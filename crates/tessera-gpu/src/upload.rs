//! Staged resource uploads and image layout transitions.
//!
//! Everything here runs at setup time: each operation records a one-shot
//! command buffer, submits it and waits for the queue to go idle before
//! returning, so staging resources can be freed immediately.

use crate::command::{execute_single_time_commands, CommandPool};
use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use crate::memory::{create_buffer, create_image, GpuBuffer, GpuImage, ImageDesc, HOST_MEMORY};
use ash::vk;
use tessera_core::constants::RGBA8_TEXEL_SIZE;

/// Access masks and pipeline stages for one layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Look up the barrier masks for `old -> new`.
///
/// Only the three transitions the renderer performs are known; anything else
/// is rejected.
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<TransitionMasks> {
    use vk::ImageLayout as L;

    let masks = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        },
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        },
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        },
        _ => return Err(GpuError::UnsupportedTransition { old, new }),
    };

    Ok(masks)
}

/// Whether `format` carries a depth component.
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Whether `format` carries a stencil component.
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Image aspect addressed by layout transitions of `format`.
///
/// Combined depth/stencil formats must transition both aspects together.
pub fn aspect_mask_for(format: vk::Format) -> vk::ImageAspectFlags {
    let mut aspect = vk::ImageAspectFlags::empty();
    if is_depth_format(format) {
        aspect |= vk::ImageAspectFlags::DEPTH;
    }
    if has_stencil_component(format) {
        aspect |= vk::ImageAspectFlags::STENCIL;
    }
    if aspect.is_empty() {
        vk::ImageAspectFlags::COLOR
    } else {
        aspect
    }
}

/// Owns the transient command pool used for one-shot transfers.
pub struct Uploader {
    pool: CommandPool,
}

impl Uploader {
    /// Create the uploader's command pool on the context's queue family.
    pub fn new(ctx: &DeviceContext) -> Result<Self> {
        let pool = unsafe {
            CommandPool::new(
                ctx.device(),
                ctx.queue_family(),
                vk::CommandPoolCreateFlags::TRANSIENT,
            )?
        };
        Ok(Self { pool })
    }

    /// Record `f` into a one-shot command buffer and wait for it to finish.
    pub fn one_shot<F>(&self, ctx: &DeviceContext, f: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = ctx.device();
        unsafe { execute_single_time_commands(device, &self.pool, ctx.queue(), |cmd| f(device, cmd)) }
    }

    /// Copy `data` into a new device-local buffer through a staging buffer.
    ///
    /// The destination gets `destination_usage | TRANSFER_DST`. The staging
    /// buffer is destroyed before returning, on success and on failure.
    pub fn upload_via_staging(
        &self,
        ctx: &DeviceContext,
        data: &[u8],
        destination_usage: vk::BufferUsageFlags,
    ) -> Result<GpuBuffer> {
        let device = ctx.device();
        let size = data.len() as u64;

        let mut staging = create_buffer(ctx, size, vk::BufferUsageFlags::TRANSFER_SRC, HOST_MEMORY)?;

        let result = (|| -> Result<GpuBuffer> {
            staging.map(device)?;
            staging.write_bytes(0, data)?;
            staging.unmap(device);

            let mut destination = create_buffer(
                ctx,
                size,
                destination_usage | vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?;

            if let Err(e) = self.copy_buffer(ctx, &staging, &destination, size) {
                unsafe { destination.destroy(device) };
                return Err(e);
            }

            Ok(destination)
        })();

        unsafe { staging.destroy(device) };

        if let Ok(buffer) = &result {
            tracing::debug!("Uploaded {} bytes ({:?})", size, buffer.usage);
        }
        result
    }

    /// Upload a slice of plain-old-data values.
    pub fn upload_slice<T: bytemuck::Pod>(
        &self,
        ctx: &DeviceContext,
        data: &[T],
        destination_usage: vk::BufferUsageFlags,
    ) -> Result<GpuBuffer> {
        self.upload_via_staging(ctx, bytemuck::cast_slice(data), destination_usage)
    }

    /// Copy `size` bytes from the start of `src` to the start of `dst`.
    pub fn copy_buffer(
        &self,
        ctx: &DeviceContext,
        src: &GpuBuffer,
        dst: &GpuBuffer,
        size: u64,
    ) -> Result<()> {
        if size > src.size || size > dst.size {
            return Err(GpuError::InvalidState(format!(
                "Copy of {size} bytes exceeds buffer sizes ({} -> {})",
                src.size, dst.size
            )));
        }

        self.one_shot(ctx, |device, cmd| {
            let region = vk::BufferCopy::default().size(size);
            unsafe { device.cmd_copy_buffer(cmd, src.buffer, dst.buffer, &[region]) };
        })
    }

    /// Copy tightly packed texels from `buffer` into mip 0 of `image`.
    ///
    /// The image must already be in `TRANSFER_DST_OPTIMAL`.
    pub fn copy_buffer_to_image(
        &self,
        ctx: &DeviceContext,
        buffer: &GpuBuffer,
        image: vk::Image,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.one_shot(ctx, |device, cmd| {
            let region = vk::BufferImageCopy::default()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(0)
                        .base_array_layer(0)
                        .layer_count(1),
                )
                .image_offset(vk::Offset3D::default())
                .image_extent(vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                });

            unsafe {
                device.cmd_copy_buffer_to_image(
                    cmd,
                    buffer.buffer,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
        })
    }

    /// Move `image` from `old` to `new` layout with a pipeline barrier.
    pub fn transition_image_layout(
        &self,
        ctx: &DeviceContext,
        image: vk::Image,
        format: vk::Format,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> Result<()> {
        let masks = transition_masks(old, new)?;

        self.one_shot(ctx, |device, cmd| {
            let barrier = vk::ImageMemoryBarrier::default()
                .old_layout(old)
                .new_layout(new)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(aspect_mask_for(format))
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                )
                .src_access_mask(masks.src_access)
                .dst_access_mask(masks.dst_access);

            unsafe {
                device.cmd_pipeline_barrier(
                    cmd,
                    masks.src_stage,
                    masks.dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier],
                );
            }
        })
    }

    /// Upload RGBA8 texels into a sampled, shader-read-only image.
    pub fn upload_texture(
        &self,
        ctx: &DeviceContext,
        rgba: &[u8],
        width: u32,
        height: u32,
    ) -> Result<GpuImage> {
        let expected = u64::from(width) * u64::from(height) * RGBA8_TEXEL_SIZE as u64;
        if rgba.len() as u64 != expected {
            return Err(GpuError::InvalidState(format!(
                "Texture {width}x{height} needs {expected} bytes, got {}",
                rgba.len()
            )));
        }

        let device = ctx.device();
        let format = vk::Format::R8G8B8A8_SRGB;

        let mut staging =
            create_buffer(ctx, expected, vk::BufferUsageFlags::TRANSFER_SRC, HOST_MEMORY)?;

        let result = (|| -> Result<GpuImage> {
            staging.map(device)?;
            staging.write_bytes(0, rgba)?;
            staging.unmap(device);

            let mut image = create_image(
                ctx,
                &ImageDesc {
                    width,
                    height,
                    format,
                    usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
                },
            )?;

            let copied = self
                .transition_image_layout(
                    ctx,
                    image.image,
                    format,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                )
                .and_then(|()| self.copy_buffer_to_image(ctx, &staging, image.image, width, height))
                .and_then(|()| {
                    self.transition_image_layout(
                        ctx,
                        image.image,
                        format,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    )
                });

            if let Err(e) = copied {
                unsafe { image.destroy(device) };
                return Err(e);
            }

            Ok(image)
        })();

        unsafe { staging.destroy(device) };

        if result.is_ok() {
            tracing::debug!("Uploaded {}x{} texture", width, height);
        }
        result
    }

    /// Copy a buffer's contents back to the host.
    ///
    /// `buffer` must have been created with `TRANSFER_SRC` usage.
    pub fn read_back(&self, ctx: &DeviceContext, buffer: &GpuBuffer) -> Result<Vec<u8>> {
        let device = ctx.device();
        let mut readback =
            create_buffer(ctx, buffer.size, vk::BufferUsageFlags::TRANSFER_DST, HOST_MEMORY)?;

        let result = (|| -> Result<Vec<u8>> {
            self.copy_buffer(ctx, buffer, &readback, buffer.size)?;
            readback.map(device)?;
            readback.read_bytes()
        })();

        unsafe { readback.destroy(device) };
        result
    }

    /// Destroy the command pool.
    ///
    /// # Safety
    /// The device must be valid and no upload may be in progress.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe { self.pool.destroy(device) };
    }
}
