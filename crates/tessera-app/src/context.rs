//! Application context.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ash::vk;
use raw_window_handle::HasDisplayHandle;
use tessera_gpu::swapchain::{PresentMode, SwapchainConfig};
use tessera_gpu::{DeviceContext, DeviceContextBuilder, Surface, Swapchain, Uploader};
use winit::window::Window;

use crate::config::AppConfig;

/// Window and long-lived GPU objects shared with the application.
///
/// Dropping the context destroys the swapchain and uploader, then the
/// device. Renderer resources must be destroyed before that.
pub struct AppContext {
    /// The window handle.
    pub window: Arc<Window>,
    /// Device, queue and memory types.
    pub gpu: DeviceContext,
    /// One-shot transfer command pool.
    pub uploader: Uploader,
    /// Presentable images and depth buffer.
    pub swapchain: Swapchain,
    /// Total frames presented.
    pub frame_count: u64,
    pub(crate) last_frame_time: Instant,
    start_time: Instant,
}

impl AppContext {
    /// Create the device, surface and swapchain for `window`.
    pub(crate) fn new(window: Arc<Window>, config: &AppConfig) -> anyhow::Result<Self> {
        let display = window.display_handle()?.as_raw();

        let gpu = DeviceContextBuilder::new()
            .app_name(&config.title)
            .validation(config.validation)
            .display_handle(display)
            .build()?;

        let uploader = Uploader::new(&gpu)?;

        // SAFETY: the window is kept alive by the context and outlives the surface
        let surface = unsafe { Surface::from_window(&gpu, window.as_ref())? };

        let size = window.inner_size();
        let swapchain_config = SwapchainConfig {
            width: size.width.max(1),
            height: size.height.max(1),
            desired_image_count: config.swapchain_images,
            present_mode: PresentMode::from_vsync(config.vsync),
            depth: config.depth_test,
        };

        let swapchain = match Swapchain::new(&gpu, &uploader, surface, &swapchain_config) {
            Ok(swapchain) => swapchain,
            Err(e) => {
                unsafe { uploader.destroy(gpu.device()) };
                return Err(e.into());
            }
        };

        let now = Instant::now();
        Ok(Self {
            window,
            gpu,
            uploader,
            swapchain,
            frame_count: 0,
            last_frame_time: now,
            start_time: now,
        })
    }

    /// Get the current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Get the swapchain width.
    pub fn width(&self) -> u32 {
        self.swapchain.extent.width
    }

    /// Get the swapchain height.
    pub fn height(&self) -> u32 {
        self.swapchain.extent.height
    }

    /// Get the aspect ratio (width / height).
    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.extent.width as f32 / self.swapchain.extent.height.max(1) as f32
    }

    /// Time since the context was created.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        if let Err(e) = self.gpu.wait_idle() {
            tracing::error!("Failed to wait idle: {e}");
        }
        let device = self.gpu.device();
        unsafe {
            self.swapchain.destroy(device);
            self.uploader.destroy(device);
        }
    }
}
