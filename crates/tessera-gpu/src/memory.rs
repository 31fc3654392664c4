//! GPU memory management.
//!
//! Every buffer and image gets its own `VkDeviceMemory` allocation, chosen
//! from the device's memory-type table and bound exactly once right after
//! allocation.

use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::c_void;
use std::ptr::NonNull;

/// Snapshot of the device's memory types, captured at device creation.
#[derive(Debug, Clone, Default)]
pub struct MemoryTypeTable {
    types: Vec<vk::MemoryPropertyFlags>,
}

impl MemoryTypeTable {
    /// Build the table from raw device memory properties.
    pub fn from_properties(properties: &vk::PhysicalDeviceMemoryProperties) -> Self {
        let types = properties
            .memory_types
            .iter()
            .take(properties.memory_type_count as usize)
            .map(|t| t.property_flags)
            .collect();
        Self { types }
    }

    /// Build the table from property flags, index order preserved.
    pub fn from_flags(types: impl IntoIterator<Item = vk::MemoryPropertyFlags>) -> Self {
        Self {
            types: types.into_iter().collect(),
        }
    }

    /// Number of memory types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the device reported no memory types.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Lowest-indexed memory type allowed by `type_bits` that has all of
    /// `required`.
    pub fn find_memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        self.types
            .iter()
            .enumerate()
            .take(32)
            .find(|(i, flags)| type_bits & (1 << i) != 0 && flags.contains(required))
            .map(|(i, _)| i as u32)
            .ok_or(GpuError::NoSuitableMemoryType {
                type_bits,
                required,
            })
    }
}

/// Host-visible memory that needs no explicit flush.
pub const HOST_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// A GPU buffer with its dedicated memory.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    mapped: Option<NonNull<c_void>>,
}

/// Allocate and bind memory for a buffer in one step.
///
/// A zero `size` is rejected before any Vulkan call. If allocation or binding
/// fails, the buffer and any memory are destroyed before returning.
pub fn create_buffer(
    ctx: &DeviceContext,
    size: u64,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
) -> Result<GpuBuffer> {
    if size == 0 {
        return Err(GpuError::ZeroSizedBuffer { usage });
    }

    let device = ctx.device();
    let buffer_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.create_buffer(&buffer_info, None)? };
    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

    let memory = match allocate(ctx, &requirements, properties, size, &format!("{usage:?}")) {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(e);
        }
    };

    if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
        unsafe {
            device.destroy_buffer(buffer, None);
            device.free_memory(memory, None);
        }
        return Err(e.into());
    }

    tracing::debug!("Created buffer: {} bytes, {:?}, {:?}", size, usage, properties);

    Ok(GpuBuffer {
        buffer,
        memory,
        size,
        usage,
        mapped: None,
    })
}

fn allocate(
    ctx: &DeviceContext,
    requirements: &vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
    size: u64,
    usage: &str,
) -> Result<vk::DeviceMemory> {
    let memory_type_index = ctx
        .memory_types()
        .find_memory_type(requirements.memory_type_bits, properties)?;

    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    unsafe { ctx.device().allocate_memory(&alloc_info, None) }.map_err(|source| {
        GpuError::AllocationFailed {
            size,
            usage: usage.to_string(),
            source,
        }
    })
}

impl GpuBuffer {
    /// Map the whole buffer for CPU access, keeping it mapped until destroyed.
    ///
    /// Mapping an already mapped buffer is a no-op.
    pub fn map(&mut self, device: &ash::Device) -> Result<()> {
        if self.mapped.is_some() {
            return Ok(());
        }
        let ptr = unsafe {
            device.map_memory(self.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())?
        };
        self.mapped = NonNull::new(ptr);
        Ok(())
    }

    /// Release the CPU mapping.
    pub fn unmap(&mut self, device: &ash::Device) {
        if self.mapped.take().is_some() {
            unsafe { device.unmap_memory(self.memory) };
        }
    }

    /// Whether the buffer is currently mapped.
    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Write raw bytes at `offset` through the mapping (host-coherent memory only).
    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        let ptr = self
            .mapped
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;

        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| GpuError::InvalidState("Offset overflow".to_string()))?;
        if end > self.size {
            return Err(GpuError::InvalidState(format!(
                "Write of {} bytes at {offset} exceeds buffer size {}",
                data.len(),
                self.size
            )));
        }

        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                ptr.as_ptr().cast::<u8>().add(offset as usize),
                data.len(),
            );
        }

        Ok(())
    }

    /// Write a plain-old-data value at the start of the buffer.
    pub fn write<T: bytemuck::Pod>(&self, value: &T) -> Result<()> {
        self.write_bytes(0, bytemuck::bytes_of(value))
    }

    /// Copy the mapped contents out.
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        let ptr = self
            .mapped
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;
        let bytes =
            unsafe { std::slice::from_raw_parts(ptr.as_ptr().cast::<u8>(), self.size as usize) };
        Ok(bytes.to_vec())
    }

    /// Destroy the buffer and free its memory.
    ///
    /// # Safety
    /// The device must be valid and the buffer must not be in use by the GPU.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        self.unmap(device);
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
        self.buffer = vk::Buffer::null();
        self.memory = vk::DeviceMemory::null();
    }
}

/// Parameters for a 2D device-local image.
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
}

/// A GPU image with its dedicated memory.
pub struct GpuImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub usage: vk::ImageUsageFlags,
}

/// Create a single-mip, optimally tiled, device-local 2D image.
pub fn create_image(ctx: &DeviceContext, desc: &ImageDesc) -> Result<GpuImage> {
    if desc.width == 0 || desc.height == 0 {
        return Err(GpuError::InvalidState(format!(
            "Image extent {}x{} has a zero dimension",
            desc.width, desc.height
        )));
    }

    let device = ctx.device();
    let extent = vk::Extent3D {
        width: desc.width,
        height: desc.height,
        depth: 1,
    };

    let image_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .extent(extent)
        .mip_levels(1)
        .array_layers(1)
        .format(desc.format)
        .tiling(vk::ImageTiling::OPTIMAL)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(desc.usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .samples(vk::SampleCountFlags::TYPE_1);

    let image = unsafe { device.create_image(&image_info, None)? };
    let requirements = unsafe { device.get_image_memory_requirements(image) };

    let memory = match allocate(
        ctx,
        &requirements,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        requirements.size,
        &format!("{:?} image", desc.usage),
    ) {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { device.destroy_image(image, None) };
            return Err(e);
        }
    };

    if let Err(e) = unsafe { device.bind_image_memory(image, memory, 0) } {
        unsafe {
            device.destroy_image(image, None);
            device.free_memory(memory, None);
        }
        return Err(e.into());
    }

    tracing::debug!(
        "Created image: {}x{} {:?}, {:?}",
        desc.width,
        desc.height,
        desc.format,
        desc.usage
    );

    Ok(GpuImage {
        image,
        memory,
        format: desc.format,
        extent,
        usage: desc.usage,
    })
}

impl GpuImage {
    /// Destroy the image and free its memory.
    ///
    /// # Safety
    /// The device must be valid and the image must not be in use by the GPU.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
        self.image = vk::Image::null();
        self.memory = vk::DeviceMemory::null();
    }
}

/// Create a 2D view covering the single mip and layer of `image`.
///
/// # Safety
/// The device and image must be valid.
pub unsafe fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect_mask)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );

    let view = unsafe { device.create_image_view(&view_info, None)? };
    Ok(view)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typical_table() -> MemoryTypeTable {
        MemoryTypeTable::from_flags([
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | HOST_MEMORY,
        ])
    }

    #[test]
    fn lowest_compatible_index_wins() {
        let table = typical_table();
        assert_eq!(table.find_memory_type(0b1111, HOST_MEMORY).unwrap(), 1);
        assert_eq!(
            table
                .find_memory_type(0b1111, vk::MemoryPropertyFlags::DEVICE_LOCAL)
                .unwrap(),
            0
        );
    }

    #[test]
    fn type_filter_is_respected() {
        let table = typical_table();
        assert_eq!(table.find_memory_type(0b1100, HOST_MEMORY).unwrap(), 2);
        assert_eq!(
            table
                .find_memory_type(0b1000, vk::MemoryPropertyFlags::DEVICE_LOCAL)
                .unwrap(),
            3
        );
    }

    #[test]
    fn missing_type_is_reported() {
        let table = typical_table();
        let err = table
            .find_memory_type(0b0001, vk::MemoryPropertyFlags::HOST_VISIBLE)
            .unwrap_err();
        assert!(matches!(
            err,
            GpuError::NoSuitableMemoryType { type_bits: 0b0001, .. }
        ));
        assert!(MemoryTypeTable::default()
            .find_memory_type(u32::MAX, vk::MemoryPropertyFlags::empty())
            .is_err());
    }

    #[test]
    fn lookup_is_deterministic() {
        let table = typical_table();
        let first = table.find_memory_type(0b1110, HOST_MEMORY).unwrap();
        for _ in 0..16 {
            assert_eq!(table.find_memory_type(0b1110, HOST_MEMORY).unwrap(), first);
        }
    }

    #[test]
    fn table_from_raw_properties_honours_count() {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            ..Default::default()
        };
        properties.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        properties.memory_types[1].property_flags = HOST_MEMORY;
        properties.memory_types[2].property_flags = HOST_MEMORY;

        let table = MemoryTypeTable::from_properties(&properties);
        assert_eq!(table.len(), 2);
        assert!(table.find_memory_type(0b100, HOST_MEMORY).is_err());
    }
}
