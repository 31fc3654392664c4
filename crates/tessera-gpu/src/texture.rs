//! Sampled textures.

use crate::context::DeviceContext;
use crate::error::Result;
use crate::memory::{create_image_view, GpuImage};
use crate::upload::Uploader;
use ash::vk;

/// A shader-readable image with its view and sampler.
pub struct Texture {
    pub image: GpuImage,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
}

impl Texture {
    /// Upload RGBA8 texels and wrap them for sampling.
    pub fn from_rgba8(
        ctx: &DeviceContext,
        uploader: &Uploader,
        rgba: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let device = ctx.device();
        let mut image = uploader.upload_texture(ctx, rgba, width, height)?;

        let view = match unsafe {
            create_image_view(device, image.image, image.format, vk::ImageAspectFlags::COLOR)
        } {
            Ok(view) => view,
            Err(e) => {
                unsafe { image.destroy(device) };
                return Err(e);
            }
        };

        let sampler = match unsafe { create_sampler(ctx) } {
            Ok(sampler) => sampler,
            Err(e) => {
                unsafe {
                    device.destroy_image_view(view, None);
                    image.destroy(device);
                }
                return Err(e);
            }
        };

        Ok(Self {
            image,
            view,
            sampler,
        })
    }

    /// Descriptor info for binding as a combined image sampler.
    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo::default()
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .image_view(self.view)
            .sampler(self.sampler)
    }

    /// Destroy the sampler, view and image.
    ///
    /// # Safety
    /// The device must be valid and the texture must not be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_sampler(self.sampler, None);
            device.destroy_image_view(self.view, None);
            self.image.destroy(device);
        }
    }
}

/// Linear, repeating sampler; anisotropic when the device enabled it.
unsafe fn create_sampler(ctx: &DeviceContext) -> Result<vk::Sampler> {
    let info = ctx.info();
    let sampler_info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(info.supports_sampler_anisotropy)
        .max_anisotropy(if info.supports_sampler_anisotropy {
            info.max_sampler_anisotropy
        } else {
            1.0
        })
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR);

    let sampler = unsafe { ctx.device().create_sampler(&sampler_info, None)? };
    Ok(sampler)
}
