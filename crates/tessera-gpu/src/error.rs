//! GPU error types.

use ash::vk;
use thiserror::Error;

use crate::sync::{SlotEvent, SlotState};

/// GPU-related errors.
///
/// Every variant is fatal to the renderer: nothing in this crate retries or
/// degrades, errors propagate to the application which terminates.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// The Vulkan loader could not be found or initialised.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// No memory type satisfies the allocation.
    #[error("No memory type in filter {type_bits:#b} has properties {required:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    /// Buffers must have a non-zero size.
    #[error("Refusing to create zero-sized buffer (usage {usage:?})")]
    ZeroSizedBuffer { usage: vk::BufferUsageFlags },

    /// Memory allocation failed.
    #[error("Allocation of {size} bytes for {usage} failed: {source}")]
    AllocationFailed {
        size: u64,
        usage: String,
        source: vk::Result,
    },

    /// Layout pair missing from the transition table.
    #[error("Unsupported image layout transition {old:?} -> {new:?}")]
    UnsupportedTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// The selected queue cannot present to the surface.
    #[error("Queue family {0} cannot present to this surface")]
    PresentNotSupported(u32),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// The swapchain no longer matches the surface.
    #[error("Swapchain is out of date")]
    SwapchainOutOfDate,

    /// Shader module creation failed.
    #[error("Shader module creation failed: {0}")]
    ShaderModule(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// A fence wait exceeded its timeout.
    #[error("Fence wait timed out after {0} ns")]
    FenceTimeout(u64),

    /// A frame slot was driven through an illegal transition.
    #[error("Frame slot cannot go from {from:?} on {event:?}")]
    InvalidSlotTransition { from: SlotState, event: SlotEvent },

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
