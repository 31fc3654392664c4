//! Scene resources and the per-frame draw.

use std::mem::size_of;

use anyhow::Context;
use ash::vk;
use tessera_core::{MeshData, TransformUniforms};
use tessera_gpu::frame::{DrawCall, FrameInfo, FrameSynchronizer, VulkanFrameBackend};
use tessera_gpu::swapchain::DEPTH_FORMAT;
use tessera_gpu::{
    DeviceContext, FrameSlots, FrameUniforms, Framebuffers, GpuBuffer, PipelineConfig,
    PipelineState, Texture, Uploader,
};

use crate::app::SceneDesc;
use crate::config::AppConfig;
use crate::context::AppContext;

/// Device-local vertex and index buffers for one mesh.
pub struct MeshBuffers {
    pub vertex: GpuBuffer,
    pub index: Option<GpuBuffer>,
    /// Indices (or vertices when not indexed) per draw.
    pub count: u32,
}

impl MeshBuffers {
    /// Validate `mesh` and upload it through staging buffers.
    pub fn upload(ctx: &DeviceContext, uploader: &Uploader, mesh: &MeshData) -> anyhow::Result<Self> {
        mesh.validate().context("Mesh failed validation")?;

        let mut vertex = uploader
            .upload_slice(ctx, &mesh.vertices, vk::BufferUsageFlags::VERTEX_BUFFER)
            .context("Failed to upload vertex buffer")?;

        let index = if mesh.is_indexed() {
            match uploader.upload_slice(ctx, &mesh.indices, vk::BufferUsageFlags::INDEX_BUFFER) {
                Ok(buffer) => Some(buffer),
                Err(e) => {
                    unsafe { vertex.destroy(ctx.device()) };
                    return Err(e).context("Failed to upload index buffer");
                }
            }
        } else {
            None
        };

        tracing::debug!(
            "Mesh uploaded: {} vertices, {} indices",
            mesh.vertices.len(),
            mesh.indices.len()
        );

        Ok(Self {
            vertex,
            index,
            count: mesh.draw_count(),
        })
    }

    /// Draw parameters for the frame backend.
    pub fn draw_call(&self) -> DrawCall {
        DrawCall {
            vertex_buffer: self.vertex.buffer,
            index_buffer: self.index.as_ref().map(|b| b.buffer),
            count: self.count,
        }
    }

    /// Destroy both buffers.
    ///
    /// # Safety
    /// The device must be valid and no frame may be in flight.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            self.vertex.destroy(device);
            if let Some(mut index) = self.index.take() {
                index.destroy(device);
            }
        }
    }
}

/// Every object the frame loop needs beyond the [`AppContext`].
pub struct Renderer {
    pipeline: PipelineState,
    framebuffers: Framebuffers,
    slots: FrameSlots,
    uniforms: FrameUniforms,
    sync: FrameSynchronizer,
    mesh: MeshBuffers,
    texture: Option<Texture>,
    clear_color: [f32; 4],
}

/// Resources [`Renderer::new`] has created so far.
///
/// Released together when a later step fails, so a failed setup leaves
/// nothing alive on the device.
#[derive(Default)]
struct PartialRenderer {
    mesh: Option<MeshBuffers>,
    texture: Option<Texture>,
    pipeline: Option<PipelineState>,
    slots: Option<FrameSlots>,
    uniforms: Option<FrameUniforms>,
    framebuffers: Option<Framebuffers>,
}

impl PartialRenderer {
    /// Upload the scene and build everything that does not depend on the
    /// swapchain images, recording each object as it is created.
    fn build_scene(
        &mut self,
        gpu: &DeviceContext,
        uploader: &Uploader,
        scene: &SceneDesc,
        config: &AppConfig,
        color_format: vk::Format,
    ) -> anyhow::Result<()> {
        let frames = config.effective_frames_in_flight();

        self.mesh = Some(MeshBuffers::upload(gpu, uploader, &scene.mesh)?);

        self.texture = scene
            .texture
            .as_ref()
            .map(|t| Texture::from_rgba8(gpu, uploader, &t.rgba, t.width, t.height))
            .transpose()
            .context("Failed to upload texture")?;

        let pipeline = self.pipeline.insert(
            PipelineState::new(
                gpu,
                &PipelineConfig {
                    vertex_shader: scene.vertex_shader.clone(),
                    fragment_shader: scene.fragment_shader.clone(),
                    color_format,
                    depth_format: config.depth_test.then_some(DEPTH_FORMAT),
                    textured: self.texture.is_some(),
                    ..Default::default()
                },
            )
            .context("Failed to build graphics pipeline")?,
        );
        let layout = pipeline.descriptor_set_layout;

        self.slots = Some(FrameSlots::new(gpu, frames)?);
        self.uniforms = Some(FrameUniforms::new(
            gpu,
            layout,
            frames,
            size_of::<TransformUniforms>() as u64,
            self.texture.as_ref(),
        )?);

        Ok(())
    }

    /// Destroy whatever was created, newest first.
    ///
    /// # Safety
    /// The device must be idle.
    unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            if let Some(mut framebuffers) = self.framebuffers.take() {
                framebuffers.destroy(device);
            }
            if let Some(mut uniforms) = self.uniforms.take() {
                uniforms.destroy(device);
            }
            if let Some(mut slots) = self.slots.take() {
                slots.destroy(device);
            }
            if let Some(mut pipeline) = self.pipeline.take() {
                pipeline.destroy(device);
            }
            if let Some(mut texture) = self.texture.take() {
                texture.destroy(device);
            }
            if let Some(mut mesh) = self.mesh.take() {
                mesh.destroy(device);
            }
        }
    }
}

impl Renderer {
    /// Upload the scene and build the pipeline and frame resources.
    ///
    /// On failure every object created so far is destroyed before the error
    /// is returned.
    pub fn new(ctx: &AppContext, scene: &SceneDesc, config: &AppConfig) -> anyhow::Result<Self> {
        let gpu = &ctx.gpu;
        let frames = config.effective_frames_in_flight();
        let sync = FrameSynchronizer::new(frames, config.fence_timeout_ns)?;

        let mut partial = PartialRenderer::default();
        let built = partial
            .build_scene(gpu, &ctx.uploader, scene, config, ctx.swapchain.format.format)
            .and_then(|()| {
                let pipeline = partial
                    .pipeline
                    .as_ref()
                    .context("Pipeline missing after setup")?;
                partial.framebuffers = Some(Framebuffers::new(gpu, pipeline, &ctx.swapchain)?);
                Ok(())
            });

        if let Err(e) = built {
            if let Err(idle) = gpu.wait_idle() {
                tracing::error!("Failed to wait idle: {idle}");
            }
            unsafe { partial.destroy(gpu.device()) };
            return Err(e);
        }

        match partial {
            PartialRenderer {
                mesh: Some(mesh),
                texture,
                pipeline: Some(pipeline),
                slots: Some(slots),
                uniforms: Some(uniforms),
                framebuffers: Some(framebuffers),
            } => {
                tracing::info!(
                    "Renderer ready: {} frames in flight, {} framebuffers",
                    frames,
                    framebuffers.framebuffers.len()
                );

                Ok(Self {
                    pipeline,
                    framebuffers,
                    slots,
                    uniforms,
                    sync,
                    mesh,
                    texture,
                    clear_color: config.clear_color,
                })
            }
            mut incomplete => {
                unsafe { incomplete.destroy(gpu.device()) };
                Err(anyhow::anyhow!("Renderer setup left resources missing"))
            }
        }
    }

    /// Frames presented so far.
    pub fn frame_count(&self) -> u64 {
        self.sync.frame_count()
    }

    /// Draw and present one frame with `transforms` in the slot's uniforms.
    pub fn draw_frame(
        &mut self,
        ctx: &AppContext,
        transforms: &TransformUniforms,
    ) -> anyhow::Result<FrameInfo> {
        let mut backend = VulkanFrameBackend {
            ctx: &ctx.gpu,
            swapchain: &ctx.swapchain,
            slots: &self.slots,
            pipeline: &self.pipeline,
            framebuffers: &self.framebuffers,
            uniforms: &self.uniforms,
            draw: self.mesh.draw_call(),
            clear_color: self.clear_color,
        };

        let uniforms = &self.uniforms;
        let info = self
            .sync
            .draw_frame(&mut backend, |slot| uniforms.update_uniforms(slot, transforms))
            .with_context(|| format!("Frame {} failed", self.sync.frame_count()))?;

        Ok(info)
    }

    /// Destroy every renderer resource, newest first.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            self.uniforms.destroy(device);
            self.slots.destroy(device);
            self.framebuffers.destroy(device);
            self.pipeline.destroy(device);
            if let Some(mut texture) = self.texture.take() {
                texture.destroy(device);
            }
            self.mesh.destroy(device);
        }
        tracing::debug!("Renderer destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::TextureData;
    use tessera_gpu::DeviceContextBuilder;

    const COLOR_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

    fn headless() -> Option<(DeviceContext, Uploader)> {
        let ctx = match DeviceContextBuilder::new()
            .app_name("tessera-app-tests")
            .validation(false)
            .headless()
            .build()
        {
            Ok(ctx) => ctx,
            Err(e) => {
                eprintln!("Skipping GPU test: {e}");
                return None;
            }
        };
        let uploader = Uploader::new(&ctx).unwrap();
        Some((ctx, uploader))
    }

    fn scene(vertex_shader: Vec<u32>, fragment_shader: Vec<u32>) -> SceneDesc {
        SceneDesc {
            vertex_shader,
            fragment_shader,
            mesh: MeshData::demo_quads(),
            texture: Some(TextureData {
                rgba: vec![0xff; 2 * 2 * 4],
                width: 2,
                height: 2,
            }),
        }
    }

    #[test]
    fn pipeline_failure_leaves_uploads_tracked_for_release() {
        let Some((ctx, uploader)) = headless() else {
            return;
        };
        let mut partial = PartialRenderer::default();

        let err = partial
            .build_scene(
                &ctx,
                &uploader,
                &scene(Vec::new(), Vec::new()),
                &AppConfig::default(),
                COLOR_FORMAT,
            )
            .unwrap_err();
        assert!(format!("{err:#}").contains("graphics pipeline"), "{err:#}");

        assert!(partial.mesh.is_some());
        assert!(partial.texture.is_some());
        assert!(partial.pipeline.is_none());
        assert!(partial.slots.is_none());
        assert!(partial.uniforms.is_none());

        ctx.wait_idle().unwrap();
        unsafe {
            partial.destroy(ctx.device());
            uploader.destroy(ctx.device());
        }
        assert!(partial.mesh.is_none());
        assert!(partial.texture.is_none());
    }

    #[test]
    fn invalid_mesh_creates_nothing() {
        let Some((ctx, uploader)) = headless() else {
            return;
        };
        let mut partial = PartialRenderer::default();
        let mut bad = scene(Vec::new(), Vec::new());
        bad.mesh.indices[0] = 100;

        assert!(partial
            .build_scene(&ctx, &uploader, &bad, &AppConfig::default(), COLOR_FORMAT)
            .is_err());
        assert!(partial.mesh.is_none());
        assert!(partial.texture.is_none());

        unsafe { uploader.destroy(ctx.device()) };
    }

    #[test]
    fn complete_scene_builds_every_frame_resource() {
        let Some((ctx, uploader)) = headless() else {
            return;
        };
        let mut partial = PartialRenderer::default();
        let config = AppConfig::default().with_frames_in_flight(3);

        partial
            .build_scene(
                &ctx,
                &uploader,
                &scene(
                    tessera_shaders::mesh_vertex_shader().to_vec(),
                    tessera_shaders::textured_fragment_shader().to_vec(),
                ),
                &config,
                COLOR_FORMAT,
            )
            .unwrap();

        assert_eq!(partial.slots.as_ref().map(FrameSlots::len), Some(3));
        assert_eq!(partial.uniforms.as_ref().map(FrameUniforms::len), Some(3));
        assert!(partial.pipeline.as_ref().is_some_and(|p| p.textured));

        ctx.wait_idle().unwrap();
        unsafe {
            partial.destroy(ctx.device());
            uploader.destroy(ctx.device());
        }
        assert!(partial.pipeline.is_none());
        assert!(partial.uniforms.is_none());
    }
}
