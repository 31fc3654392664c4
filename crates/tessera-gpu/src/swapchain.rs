//! Swapchain management.
//!
//! The swapchain owns its surface, one view per presentable image and the
//! depth buffer. Creation is all-or-nothing and teardown runs in a fixed
//! order: views, depth, swapchain, surface.

use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use crate::memory::{create_image, create_image_view, GpuImage, ImageDesc};
use crate::surface::Surface;
use crate::upload::Uploader;
use ash::vk;

/// Depth format used for the depth attachment.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// How presentation is paced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresentMode {
    /// Wait for vertical blank.
    #[default]
    Fifo,
    /// Replace the queued image; falls back to FIFO when unsupported.
    Mailbox,
}

impl PresentMode {
    /// FIFO with vsync, MAILBOX without.
    pub fn from_vsync(vsync: bool) -> Self {
        if vsync {
            Self::Fifo
        } else {
            Self::Mailbox
        }
    }
}

/// Swapchain creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainConfig {
    /// Size to use when the surface leaves the extent to the swapchain.
    pub width: u32,
    pub height: u32,
    /// Requested image count; 0 means one more than the surface minimum.
    pub desired_image_count: u32,
    pub present_mode: PresentMode,
    /// Create a depth buffer alongside the images.
    pub depth: bool,
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            desired_image_count: 3,
            present_mode: PresentMode::Fifo,
            depth: true,
        }
    }
}

/// Depth image shared by every framebuffer.
pub struct DepthBuffer {
    pub image: GpuImage,
    pub view: vk::ImageView,
}

/// Swapchain wrapper.
pub struct Swapchain {
    surface: Surface,
    loader: ash::khr::swapchain::Device,
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub depth: Option<DepthBuffer>,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Create the swapchain, its image views and depth buffer for `surface`.
    ///
    /// Takes ownership of the surface. If any step fails, everything created
    /// so far is destroyed (the surface included) before the error returns.
    pub fn new(
        ctx: &DeviceContext,
        uploader: &Uploader,
        surface: Surface,
        config: &SwapchainConfig,
    ) -> Result<Self> {
        let mut swapchain = Self {
            loader: ash::khr::swapchain::Device::new(ctx.instance(), ctx.device()),
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            depth: None,
            format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
        };

        if let Err(e) = swapchain.create_resources(ctx, uploader, config) {
            tracing::error!("Swapchain creation failed: {e}");
            unsafe { swapchain.destroy(ctx.device()) };
            return Err(e);
        }

        tracing::info!(
            "Swapchain created: {} images, {}x{}, {:?}, {:?}",
            swapchain.images.len(),
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.format.format,
            swapchain.present_mode,
        );

        Ok(swapchain)
    }

    fn create_resources(
        &mut self,
        ctx: &DeviceContext,
        uploader: &Uploader,
        config: &SwapchainConfig,
    ) -> Result<()> {
        if !self.surface.supports_present(ctx)? {
            return Err(GpuError::PresentNotSupported(ctx.queue_family()));
        }

        let support = self.surface.support(ctx)?;
        let caps = &support.capabilities;

        self.format = select_surface_format(&support.formats)?;
        self.present_mode = select_present_mode(&support.present_modes, config.present_mode);
        self.extent = calculate_extent(caps, config.width, config.height);
        let image_count = clamp_image_count(
            config.desired_image_count,
            caps.min_image_count,
            caps.max_image_count,
        );

        let queue_families = [ctx.queue_family()];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface.handle)
            .min_image_count(image_count)
            .image_format(self.format.format)
            .image_color_space(self.format.color_space)
            .image_extent(self.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_families)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        self.swapchain = unsafe { self.loader.create_swapchain(&create_info, None) }
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        self.images = unsafe { self.loader.get_swapchain_images(self.swapchain)? };

        let device = ctx.device();
        for &image in &self.images {
            let view = unsafe {
                create_image_view(device, image, self.format.format, vk::ImageAspectFlags::COLOR)?
            };
            self.image_views.push(view);
        }

        if config.depth {
            self.depth = Some(create_depth_buffer(ctx, uploader, self.extent)?);
        }

        Ok(())
    }

    /// Loader for the swapchain extension.
    pub fn loader(&self) -> &ash::khr::swapchain::Device {
        &self.loader
    }

    /// Number of presentable images.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// View of the depth buffer, if one was created.
    pub fn depth_view(&self) -> Option<vk::ImageView> {
        self.depth.as_ref().map(|d| d.view)
    }

    /// Acquire the next presentable image, signaling `semaphore` when ready.
    ///
    /// An out-of-date or lost surface is reported as
    /// [`GpuError::SwapchainOutOfDate`].
    pub fn acquire_next_image(&self, timeout_ns: u64, semaphore: vk::Semaphore) -> Result<u32> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, timeout_ns, semaphore, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    tracing::debug!("Acquired image {index} from a suboptimal swapchain");
                }
                Ok(index)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::ERROR_SURFACE_LOST_KHR) => {
                Err(GpuError::SwapchainOutOfDate)
            }
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Queue `image_index` for presentation after `wait_semaphores` signal.
    ///
    /// A suboptimal swapchain is accepted; every error is returned.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<()> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(()),
            Ok(true) => {
                tracing::debug!("Presented image {image_index} to a suboptimal swapchain");
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(GpuError::SwapchainOutOfDate),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Destroy views, depth buffer, swapchain and surface, in that order.
    ///
    /// Null handles left by a failed creation are skipped.
    ///
    /// # Safety
    /// The device must be idle with respect to every swapchain image.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
            if let Some(mut depth) = self.depth.take() {
                device.destroy_image_view(depth.view, None);
                depth.image.destroy(device);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
            self.images.clear();
            if self.surface.handle != vk::SurfaceKHR::null() {
                self.surface.destroy();
                self.surface.handle = vk::SurfaceKHR::null();
            }
        }
    }
}

fn create_depth_buffer(
    ctx: &DeviceContext,
    uploader: &Uploader,
    extent: vk::Extent2D,
) -> Result<DepthBuffer> {
    let device = ctx.device();
    let mut image = create_image(
        ctx,
        &ImageDesc {
            width: extent.width,
            height: extent.height,
            format: DEPTH_FORMAT,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        },
    )?;

    let view = unsafe { create_image_view(device, image.image, DEPTH_FORMAT, vk::ImageAspectFlags::DEPTH) }
        .and_then(|view| {
            uploader
                .transition_image_layout(
                    ctx,
                    image.image,
                    DEPTH_FORMAT,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                )
                .map(|()| view)
                .inspect_err(|_| unsafe { device.destroy_image_view(view, None) })
        });

    match view {
        Ok(view) => Ok(DepthBuffer { image, view }),
        Err(e) => {
            unsafe { image.destroy(device) };
            Err(e)
        }
    }
}

/// Clamp the requested image count to what the surface allows.
///
/// A `desired` of 0 asks for one more than the minimum. A `max` of 0 means
/// the surface has no upper bound.
pub fn clamp_image_count(desired: u32, min: u32, max: u32) -> u32 {
    let desired = if desired == 0 {
        min.saturating_add(1)
    } else {
        desired
    };
    let count = desired.max(min);
    if max > 0 {
        count.min(max)
    } else {
        count
    }
}

/// Select the surface format.
///
/// Prefers `B8G8R8A8_UNORM`/`SRGB_NONLINEAR`, then `B8G8R8A8_SRGB`, then the
/// first format the surface reports.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    let preferred = |format: vk::Format| {
        available.iter().copied().find(|f| {
            f.format == format && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
    };

    preferred(vk::Format::B8G8R8A8_UNORM)
        .or_else(|| preferred(vk::Format::B8G8R8A8_SRGB))
        .or_else(|| available.first().copied())
        .ok_or_else(|| GpuError::SwapchainCreation("Surface reports no formats".to_string()))
}

/// Select the present mode, falling back to FIFO (always supported).
pub fn select_present_mode(available: &[vk::PresentModeKHR], wanted: PresentMode) -> vk::PresentModeKHR {
    match wanted {
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::Mailbox => {
            if available.contains(&vk::PresentModeKHR::MAILBOX) {
                vk::PresentModeKHR::MAILBOX
            } else {
                tracing::warn!("MAILBOX present mode unsupported, using FIFO");
                vk::PresentModeKHR::FIFO
            }
        }
    }
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn image_count_stays_within_bounds() {
        for min in 1..=4 {
            for max in [0, min, min + 1, 8] {
                for desired in 0..=10 {
                    let count = clamp_image_count(desired, min, max);
                    assert!(count >= min, "{desired} in [{min}, {max}] gave {count}");
                    if max > 0 {
                        assert!(count <= max, "{desired} in [{min}, {max}] gave {count}");
                    }
                }
            }
        }
    }

    #[test]
    fn image_count_defaults_and_unbounded_max() {
        assert_eq!(clamp_image_count(0, 2, 0), 3);
        assert_eq!(clamp_image_count(0, 2, 2), 2);
        assert_eq!(clamp_image_count(3, 2, 8), 3);
        assert_eq!(clamp_image_count(16, 2, 0), 16);
        assert_eq!(clamp_image_count(1, 2, 0), 2);
    }

    #[test]
    fn unorm_bgra_is_preferred() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM),
            format(vk::Format::B8G8R8A8_SRGB),
            format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(
            select_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_UNORM
        );
    }

    #[test]
    fn format_fallbacks() {
        let srgb = [format(vk::Format::R8G8B8A8_UNORM), format(vk::Format::B8G8R8A8_SRGB)];
        assert_eq!(
            select_surface_format(&srgb).unwrap().format,
            vk::Format::B8G8R8A8_SRGB
        );

        let other = [format(vk::Format::R16G16B16A16_SFLOAT)];
        assert_eq!(
            select_surface_format(&other).unwrap().format,
            vk::Format::R16G16B16A16_SFLOAT
        );

        assert!(matches!(
            select_surface_format(&[]),
            Err(GpuError::SwapchainCreation(_))
        ));
    }

    #[test]
    fn present_mode_selection() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            select_present_mode(&modes, PresentMode::Fifo),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            select_present_mode(&modes, PresentMode::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            select_present_mode(&modes[..1], PresentMode::Mailbox),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(PresentMode::from_vsync(true), PresentMode::Fifo);
        assert_eq!(PresentMode::from_vsync(false), PresentMode::Mailbox);
    }

    #[test]
    fn extent_follows_surface_when_defined() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1024,
                height: 768,
            },
            ..Default::default()
        };
        assert_eq!(calculate_extent(&caps, 10, 10), caps.current_extent);

        let undefined = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        };
        let extent = calculate_extent(&undefined, 8000, 600);
        assert_eq!((extent.width, extent.height), (4096, 600));
    }
}
