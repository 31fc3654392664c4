//! Descriptor sets and per-frame uniform buffers.

use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use crate::memory::{create_buffer, GpuBuffer, HOST_MEMORY};
use crate::pipeline::{SAMPLER_BINDING, UNIFORM_BINDING};
use crate::texture::Texture;
use ash::vk;

/// Descriptor set layout builder.
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl<'a> DescriptorSetLayoutBuilder<'a> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Add a binding.
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags),
        );
        self
    }

    /// Add a uniform buffer binding.
    pub fn uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    /// Add a combined image sampler binding.
    pub fn sampled_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            1,
            stage_flags,
        )
    }

    /// Bindings added so far.
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding<'a>] {
        &self.bindings
    }

    /// Build the descriptor set layout.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn build(self, device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);

        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None)? };
        Ok(layout)
    }
}

impl Default for DescriptorSetLayoutBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Pool sizes for `frames` sets, each with one uniform buffer and, when
/// textured, one combined image sampler.
pub fn frame_pool_sizes(frames: u32, textured: bool) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes = vec![vk::DescriptorPoolSize {
        ty: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: frames,
    }];
    if textured {
        sizes.push(vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: frames,
        });
    }
    sizes
}

/// Descriptor pool for allocating descriptor sets.
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Create a new descriptor pool.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&create_info, None)? };
        Ok(Self { pool })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Allocate descriptor sets.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(
        &self,
        device: &ash::Device,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        let sets = unsafe { device.allocate_descriptor_sets(&alloc_info)? };
        Ok(sets)
    }

    /// Destroy the pool and every set allocated from it.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_descriptor_pool(self.pool, None) };
    }
}

/// Write a uniform buffer descriptor.
///
/// # Safety
/// Device and buffer must be valid.
pub unsafe fn write_uniform_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    buffer: vk::Buffer,
    range: u64,
) {
    let buffer_info = vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(0)
        .range(range);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(std::slice::from_ref(&buffer_info));

    unsafe { device.update_descriptor_sets(&[write], &[]) };
}

/// Write a combined image sampler descriptor.
///
/// # Safety
/// Device, view and sampler must be valid.
pub unsafe fn write_combined_image_sampler(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    image_info: vk::DescriptorImageInfo,
) {
    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(std::slice::from_ref(&image_info));

    unsafe { device.update_descriptor_sets(&[write], &[]) };
}

/// Per-frame uniform buffers with one descriptor set each.
///
/// Buffer `i` and set `i` belong to frame slot `i`. Buffers stay mapped
/// until [`FrameUniforms::destroy`], and sets are written once at creation.
pub struct FrameUniforms {
    buffers: Vec<GpuBuffer>,
    pool: DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    uniform_size: u64,
}

impl FrameUniforms {
    /// Allocate `frames` mapped uniform buffers and their descriptor sets.
    pub fn new(
        ctx: &DeviceContext,
        layout: vk::DescriptorSetLayout,
        frames: usize,
        uniform_size: u64,
        texture: Option<&Texture>,
    ) -> Result<Self> {
        let device = ctx.device();
        let frame_count = frames as u32;

        let pool = unsafe {
            DescriptorPool::new(
                device,
                frame_count,
                &frame_pool_sizes(frame_count, texture.is_some()),
            )?
        };

        let mut uniforms = Self {
            buffers: Vec::with_capacity(frames),
            pool,
            sets: Vec::new(),
            uniform_size,
        };

        if let Err(e) = uniforms.populate(ctx, layout, frames, texture) {
            unsafe { uniforms.destroy(device) };
            return Err(e);
        }

        tracing::debug!(
            "Allocated {} uniform buffers of {} bytes",
            frames,
            uniform_size
        );

        Ok(uniforms)
    }

    fn populate(
        &mut self,
        ctx: &DeviceContext,
        layout: vk::DescriptorSetLayout,
        frames: usize,
        texture: Option<&Texture>,
    ) -> Result<()> {
        let device = ctx.device();

        for _ in 0..frames {
            let mut buffer = create_buffer(
                ctx,
                self.uniform_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                HOST_MEMORY,
            )?;
            if let Err(e) = buffer.map(device) {
                unsafe { buffer.destroy(device) };
                return Err(e);
            }
            self.buffers.push(buffer);
        }

        let layouts = vec![layout; frames];
        self.sets = unsafe { self.pool.allocate(device, &layouts)? };

        for (set, buffer) in self.sets.iter().zip(&self.buffers) {
            unsafe {
                write_uniform_buffer(device, *set, UNIFORM_BINDING, buffer.buffer, self.uniform_size);
                if let Some(texture) = texture {
                    write_combined_image_sampler(
                        device,
                        *set,
                        SAMPLER_BINDING,
                        texture.descriptor_info(),
                    );
                }
            }
        }

        Ok(())
    }

    /// Number of frame slots served.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether no slots are served.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Descriptor set of `slot`.
    pub fn descriptor_set(&self, slot: usize) -> Result<vk::DescriptorSet> {
        self.sets
            .get(slot)
            .copied()
            .ok_or_else(|| slot_out_of_range(slot, self.sets.len()))
    }

    /// Write `value` into `slot`'s uniform buffer through its mapping.
    ///
    /// The slot's previous submission must have completed.
    pub fn update_uniforms<T: bytemuck::Pod>(&self, slot: usize, value: &T) -> Result<()> {
        let buffer = self
            .buffers
            .get(slot)
            .ok_or_else(|| slot_out_of_range(slot, self.buffers.len()))?;

        let bytes = bytemuck::bytes_of(value);
        if bytes.len() as u64 > self.uniform_size {
            return Err(GpuError::InvalidState(format!(
                "Uniform data of {} bytes exceeds buffer size {}",
                bytes.len(),
                self.uniform_size
            )));
        }

        buffer.write_bytes(0, bytes)
    }

    /// Destroy buffers, then the pool (freeing the sets).
    ///
    /// # Safety
    /// The device must be valid and no frame may be in flight.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for mut buffer in self.buffers.drain(..) {
            unsafe { buffer.destroy(device) };
        }
        self.sets.clear();
        unsafe { self.pool.destroy(device) };
        self.pool = DescriptorPool {
            pool: vk::DescriptorPool::null(),
        };
    }
}

fn slot_out_of_range(slot: usize, len: usize) -> GpuError {
    GpuError::InvalidState(format!("Frame slot {slot} out of range (0..{len})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_builder_records_bindings() {
        let builder = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .sampled_image(1, vk::ShaderStageFlags::FRAGMENT);
        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(
            bindings[1].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(bindings[1].descriptor_count, 1);
    }

    #[test]
    fn pool_sized_per_frame() {
        let sizes = frame_pool_sizes(3, true);
        assert_eq!(sizes.len(), 2);
        assert!(sizes.iter().all(|s| s.descriptor_count == 3));

        let untextured = frame_pool_sizes(2, false);
        assert_eq!(untextured.len(), 1);
        assert_eq!(untextured[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
    }

    #[test]
    fn pipeline_layout_helper_matches_bindings() {
        let textured = crate::pipeline::descriptor_layout_builder(true);
        assert_eq!(textured.bindings().len(), 2);
        assert_eq!(textured.bindings()[1].binding, SAMPLER_BINDING);

        let plain = crate::pipeline::descriptor_layout_builder(false);
        assert_eq!(plain.bindings().len(), 1);
        assert_eq!(plain.bindings()[0].binding, UNIFORM_BINDING);
    }
}
