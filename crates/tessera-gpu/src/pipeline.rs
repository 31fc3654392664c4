//! Render pass, graphics pipeline and framebuffers.
//!
//! Everything here is built once at startup and only read afterwards.

use crate::context::DeviceContext;
use crate::descriptors::DescriptorSetLayoutBuilder;
use crate::error::{GpuError, Result};
use crate::swapchain::Swapchain;
use ash::vk;
use std::mem::{offset_of, size_of};
use tessera_core::Vertex;

/// Descriptor binding of the per-frame uniform buffer.
pub const UNIFORM_BINDING: u32 = 0;
/// Descriptor binding of the texture sampler.
pub const SAMPLER_BINDING: u32 = 1;

/// Graphics pipeline configuration.
#[derive(Clone)]
pub struct PipelineConfig {
    pub vertex_shader: Vec<u32>,
    pub fragment_shader: Vec<u32>,
    pub color_format: vk::Format,
    /// Depth attachment format; `None` disables depth testing.
    pub depth_format: Option<vk::Format>,
    /// Add the combined image sampler binding.
    pub textured: bool,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            vertex_shader: Vec::new(),
            fragment_shader: Vec::new(),
            color_format: vk::Format::B8G8R8A8_UNORM,
            depth_format: Some(vk::Format::D32_SFLOAT),
            textured: true,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        }
    }
}

/// Vertex buffer binding for [`Vertex`].
pub fn vertex_binding() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription::default()
        .binding(0)
        .stride(size_of::<Vertex>() as u32)
        .input_rate(vk::VertexInputRate::VERTEX)
}

/// Position, color and texture coordinate at locations 0, 1 and 2.
pub fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 3] {
    [
        vk::VertexInputAttributeDescription::default()
            .binding(0)
            .location(0)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(offset_of!(Vertex, position) as u32),
        vk::VertexInputAttributeDescription::default()
            .binding(0)
            .location(1)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(offset_of!(Vertex, color) as u32),
        vk::VertexInputAttributeDescription::default()
            .binding(0)
            .location(2)
            .format(vk::Format::R32G32_SFLOAT)
            .offset(offset_of!(Vertex, tex_coord) as u32),
    ]
}

/// Color attachment first, then the optional depth attachment.
pub fn attachment_descriptions(
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
) -> Vec<vk::AttachmentDescription> {
    let color = vk::AttachmentDescription::default()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let mut attachments = vec![color];

    if let Some(depth_format) = depth_format {
        attachments.push(
            vk::AttachmentDescription::default()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        );
    }

    attachments
}

/// External-to-subpass dependency guarding attachment writes.
pub fn subpass_dependency(depth: bool) -> vk::SubpassDependency {
    let (stages, access) = if depth {
        (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
    } else {
        (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        )
    };

    vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(stages)
        .dst_access_mask(access)
}

/// Layout with the uniform buffer and, if `textured`, the sampler.
pub fn descriptor_layout_builder<'a>(textured: bool) -> DescriptorSetLayoutBuilder<'a> {
    let builder = DescriptorSetLayoutBuilder::new()
        .uniform_buffer(UNIFORM_BINDING, vk::ShaderStageFlags::VERTEX);
    if textured {
        builder.sampled_image(SAMPLER_BINDING, vk::ShaderStageFlags::FRAGMENT)
    } else {
        builder
    }
}

/// Render pass, descriptor layout, pipeline layout and pipeline.
pub struct PipelineState {
    pub render_pass: vk::RenderPass,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub depth_format: Option<vk::Format>,
    pub textured: bool,
}

impl PipelineState {
    /// Build every pipeline object from `config`.
    ///
    /// On failure the objects already created are destroyed.
    pub fn new(ctx: &DeviceContext, config: &PipelineConfig) -> Result<Self> {
        let mut state = Self {
            render_pass: vk::RenderPass::null(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            depth_format: config.depth_format,
            textured: config.textured,
        };

        if let Err(e) = unsafe { state.create_objects(ctx.device(), config) } {
            unsafe { state.destroy(ctx.device()) };
            return Err(e);
        }

        tracing::info!(
            "Graphics pipeline built ({:?}, depth {:?}, textured {})",
            config.color_format,
            config.depth_format,
            config.textured
        );

        Ok(state)
    }

    unsafe fn create_objects(&mut self, device: &ash::Device, config: &PipelineConfig) -> Result<()> {
        self.render_pass = unsafe { create_render_pass(device, config.color_format, config.depth_format)? };

        self.descriptor_set_layout = unsafe { descriptor_layout_builder(config.textured).build(device)? };

        let set_layouts = [self.descriptor_set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        self.layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| GpuError::PipelineCreation(e.to_string()))?;

        let vert_module = unsafe { create_shader_module(device, &config.vertex_shader, "Vertex")? };
        let frag_module = match unsafe { create_shader_module(device, &config.fragment_shader, "Fragment") } {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.destroy_shader_module(vert_module, None) };
                return Err(e);
            }
        };

        let pipeline = unsafe {
            create_graphics_pipeline(device, config, vert_module, frag_module, self.layout, self.render_pass)
        };

        unsafe {
            device.destroy_shader_module(vert_module, None);
            device.destroy_shader_module(frag_module, None);
        }

        self.pipeline = pipeline?;
        Ok(())
    }

    /// Whether the render pass has a depth attachment.
    pub fn has_depth(&self) -> bool {
        self.depth_format.is_some()
    }

    /// Destroy the pipeline objects.
    ///
    /// # Safety
    /// The device must be valid and the pipeline must not be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
            device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            device.destroy_render_pass(self.render_pass, None);
        }
        self.pipeline = vk::Pipeline::null();
        self.layout = vk::PipelineLayout::null();
        self.descriptor_set_layout = vk::DescriptorSetLayout::null();
        self.render_pass = vk::RenderPass::null();
    }
}

unsafe fn create_shader_module(device: &ash::Device, code: &[u32], stage: &str) -> Result<vk::ShaderModule> {
    if code.is_empty() {
        return Err(GpuError::ShaderModule(format!("{stage}: empty bytecode")));
    }
    let info = vk::ShaderModuleCreateInfo::default().code(code);
    unsafe { device.create_shader_module(&info, None) }
        .map_err(|e| GpuError::ShaderModule(format!("{stage}: {e}")))
}

unsafe fn create_render_pass(
    device: &ash::Device,
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
) -> Result<vk::RenderPass> {
    let attachments = attachment_descriptions(color_format, depth_format);

    let color_refs = [vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
    let depth_ref = vk::AttachmentReference::default()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if depth_format.is_some() {
        subpass = subpass.depth_stencil_attachment(&depth_ref);
    }

    let subpasses = [subpass];
    let dependencies = [subpass_dependency(depth_format.is_some())];

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.create_render_pass(&create_info, None) }
        .map_err(|e| GpuError::PipelineCreation(format!("Render pass: {e}")))
}

unsafe fn create_graphics_pipeline(
    device: &ash::Device,
    config: &PipelineConfig,
    vert_module: vk::ShaderModule,
    frag_module: vk::ShaderModule,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
) -> Result<vk::Pipeline> {
    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_module)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_module)
            .name(c"main"),
    ];

    let bindings = [vertex_binding()];
    let attributes = vertex_attributes();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Viewport and scissor are set per frame
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(config.cull_mode)
        .front_face(config.front_face)
        .depth_bias_enable(false)
        .line_width(1.0);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1)
        .sample_shading_enable(false);

    let depth_enabled = config.depth_format.is_some();
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(depth_enabled)
        .depth_write_enable(depth_enabled)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(false)
        .color_write_mask(vk::ColorComponentFlags::RGBA)];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_pipelines, e)| GpuError::PipelineCreation(e.to_string()))?;

    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| GpuError::PipelineCreation("Driver returned no pipeline".to_string()))
}

/// One framebuffer per swapchain image, sharing the depth view.
pub struct Framebuffers {
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl Framebuffers {
    /// Create framebuffers for every swapchain view.
    pub fn new(ctx: &DeviceContext, pipeline: &PipelineState, swapchain: &Swapchain) -> Result<Self> {
        let device = ctx.device();
        let depth_view = match (pipeline.has_depth(), swapchain.depth_view()) {
            (true, Some(view)) => Some(view),
            (true, None) => {
                return Err(GpuError::InvalidState(
                    "Render pass expects depth but the swapchain has no depth buffer".to_string(),
                ))
            }
            (false, _) => None,
        };

        let mut framebuffers = Self {
            framebuffers: Vec::with_capacity(swapchain.image_views.len()),
        };

        for &view in &swapchain.image_views {
            let attachments: Vec<vk::ImageView> = std::iter::once(view).chain(depth_view).collect();
            let create_info = vk::FramebufferCreateInfo::default()
                .render_pass(pipeline.render_pass)
                .attachments(&attachments)
                .width(swapchain.extent.width)
                .height(swapchain.extent.height)
                .layers(1);

            match unsafe { device.create_framebuffer(&create_info, None) } {
                Ok(framebuffer) => framebuffers.framebuffers.push(framebuffer),
                Err(e) => {
                    unsafe { framebuffers.destroy(device) };
                    return Err(e.into());
                }
            }
        }

        Ok(framebuffers)
    }

    /// Framebuffer for a swapchain image index.
    pub fn get(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }

    /// Destroy all framebuffers.
    ///
    /// # Safety
    /// The device must be valid and no framebuffer may be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for framebuffer in self.framebuffers.drain(..) {
            unsafe { device.destroy_framebuffer(framebuffer, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_struct() {
        let binding = vertex_binding();
        assert_eq!(binding.stride, 32);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);

        let attributes = vertex_attributes();
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, [0, 12, 24]);
        let locations: Vec<u32> = attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, [0, 1, 2]);
        assert_eq!(attributes[2].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn color_attachment_ends_presentable() {
        let attachments = attachment_descriptions(vk::Format::B8G8R8A8_UNORM, None);
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachments[0].store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(attachments[0].initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn depth_attachment_is_discarded_after_pass() {
        let attachments =
            attachment_descriptions(vk::Format::B8G8R8A8_UNORM, Some(vk::Format::D32_SFLOAT));
        assert_eq!(attachments.len(), 2);
        let depth = attachments[1];
        assert_eq!(depth.format, vk::Format::D32_SFLOAT);
        assert_eq!(depth.store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(
            depth.final_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn dependency_covers_depth_only_when_enabled() {
        let color_only = subpass_dependency(false);
        assert_eq!(color_only.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(color_only.dst_subpass, 0);
        assert_eq!(
            color_only.dst_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(color_only.dst_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

        let with_depth = subpass_dependency(true);
        assert!(with_depth
            .dst_stage_mask
            .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        assert!(with_depth
            .dst_access_mask
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn default_config_culls_back_faces() {
        let config = PipelineConfig::default();
        assert_eq!(config.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(config.front_face, vk::FrontFace::COUNTER_CLOCKWISE);
        assert_eq!(config.depth_format, Some(vk::Format::D32_SFLOAT));
    }
}
