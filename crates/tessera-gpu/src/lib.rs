//! Vulkan layer of the Tessera renderer.
//!
//! This crate provides:
//! - Instance creation and deterministic physical device selection
//! - A device context with a single graphics/present queue
//! - Per-resource memory allocation with explicit memory-type lookup
//! - Staged uploads and image layout transitions
//! - Swapchain, render pass and graphics pipeline setup
//! - The frames-in-flight state machine and per-frame uniforms

pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod frame;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod upload;

pub use capabilities::{DeviceInfo, GpuVendor};
pub use context::{DeviceContext, DeviceContextBuilder};
pub use descriptors::{DescriptorPool, DescriptorSetLayoutBuilder, FrameUniforms};
pub use error::{GpuError, Result};
pub use frame::{DrawCall, FrameBackend, FrameInfo, FrameSynchronizer, VulkanFrameBackend};
pub use memory::{create_buffer, create_image, GpuBuffer, GpuImage, ImageDesc, MemoryTypeTable};
pub use pipeline::{Framebuffers, PipelineConfig, PipelineState};
pub use surface::{Surface, SurfaceSupport};
pub use swapchain::{PresentMode, Swapchain, SwapchainConfig};
pub use sync::{FrameSlot, FrameSlots, SlotEvent, SlotState};
pub use texture::Texture;
pub use upload::{transition_masks, TransitionMasks, Uploader};

/// Re-exported so applications can name Vulkan types without depending on ash.
pub use ash::vk;
