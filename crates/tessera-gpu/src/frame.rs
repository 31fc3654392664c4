//! The per-frame record/submit/present loop.
//!
//! [`FrameSynchronizer`] owns the state of every frame slot and drives it
//! through [`SlotState::transition`]; all GPU work goes through a
//! [`FrameBackend`]. A slot's command buffer is only re-recorded after the
//! slot's fence has been waited on, so at most one submission per slot is
//! ever pending.

use crate::context::DeviceContext;
use crate::descriptors::FrameUniforms;
use crate::error::{GpuError, Result};
use crate::pipeline::{Framebuffers, PipelineState};
use crate::swapchain::Swapchain;
use crate::sync::{reset_fence, wait_for_fence, FrameSlots, SlotEvent, SlotState};
use ash::vk;

/// GPU operations the frame loop performs, one slot at a time.
pub trait FrameBackend {
    /// Block until `slot`'s fence is signaled.
    fn wait_for_fence(&mut self, slot: usize, timeout_ns: u64) -> Result<()>;

    /// Return `slot`'s fence to the unsignaled state.
    fn reset_fence(&mut self, slot: usize) -> Result<()>;

    /// Acquire a swapchain image, signaling `slot`'s image-available semaphore.
    fn acquire_next_image(&mut self, slot: usize, timeout_ns: u64) -> Result<u32>;

    /// Reset and re-record `slot`'s command buffer to draw into `image_index`.
    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Submit `slot`'s command buffer, signaling its fence on completion.
    fn submit(&mut self, slot: usize) -> Result<()>;

    /// Present `image_index` once `slot`'s rendering has finished.
    fn present(&mut self, slot: usize, image_index: u32) -> Result<()>;
}

/// What one call to [`FrameSynchronizer::draw_frame`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub slot: usize,
    pub image_index: u32,
    /// Frames presented so far, this one included.
    pub frame_number: u64,
}

/// Round-robin state machine over the frame slots.
pub struct FrameSynchronizer {
    states: Vec<SlotState>,
    current: usize,
    frame_count: u64,
    timeout_ns: u64,
}

impl FrameSynchronizer {
    /// Track `frames` slots, all idle, waiting up to `timeout_ns` on fences.
    pub fn new(frames: usize, timeout_ns: u64) -> Result<Self> {
        if frames == 0 {
            return Err(GpuError::InvalidState(
                "At least one frame in flight is required".to_string(),
            ));
        }
        Ok(Self {
            states: vec![SlotState::Idle; frames],
            current: 0,
            frame_count: 0,
            timeout_ns,
        })
    }

    /// Number of slots.
    pub fn frames_in_flight(&self) -> usize {
        self.states.len()
    }

    /// Slot the next frame will use.
    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// Frames presented so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// State of every slot.
    pub fn states(&self) -> &[SlotState] {
        &self.states
    }

    /// Fence wait timeout in nanoseconds.
    pub fn timeout_ns(&self) -> u64 {
        self.timeout_ns
    }

    /// Record, submit and present one frame on the current slot.
    ///
    /// `prepare` runs after the slot's fence has been observed and before
    /// recording, so it may write the slot's per-frame resources. Any error
    /// is returned as is and leaves the synchronizer on the same slot.
    pub fn draw_frame<B, F>(&mut self, backend: &mut B, prepare: F) -> Result<FrameInfo>
    where
        B: FrameBackend + ?Sized,
        F: FnOnce(usize) -> Result<()>,
    {
        let slot = self.current;

        backend.wait_for_fence(slot, self.timeout_ns)?;
        if self.states[slot].is_in_flight() {
            self.states[slot] = self.states[slot].transition(SlotEvent::Retire)?;
        }
        backend.reset_fence(slot)?;

        let image_index = backend.acquire_next_image(slot, self.timeout_ns)?;
        self.states[slot] = self.states[slot].transition(SlotEvent::BeginRecording(image_index))?;

        prepare(slot)?;
        backend.record(slot, image_index)?;

        backend.submit(slot)?;
        self.states[slot] = self.states[slot].transition(SlotEvent::Submit)?;

        backend.present(slot, image_index)?;

        self.current = (self.current + 1) % self.states.len();
        self.frame_count += 1;

        Ok(FrameInfo {
            slot,
            image_index,
            frame_number: self.frame_count,
        })
    }
}

/// Geometry bound for every frame.
#[derive(Debug, Clone, Copy)]
pub struct DrawCall {
    pub vertex_buffer: vk::Buffer,
    /// 32-bit indices; draws non-indexed when absent.
    pub index_buffer: Option<vk::Buffer>,
    /// Index count when indexed, vertex count otherwise.
    pub count: u32,
}

/// [`FrameBackend`] that talks to the real device.
pub struct VulkanFrameBackend<'a> {
    pub ctx: &'a DeviceContext,
    pub swapchain: &'a Swapchain,
    pub slots: &'a FrameSlots,
    pub pipeline: &'a PipelineState,
    pub framebuffers: &'a Framebuffers,
    pub uniforms: &'a FrameUniforms,
    pub draw: DrawCall,
    pub clear_color: [f32; 4],
}

impl VulkanFrameBackend<'_> {
    fn clear_values(&self) -> Vec<vk::ClearValue> {
        let mut values = vec![vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        }];
        if self.pipeline.has_depth() {
            values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });
        }
        values
    }
}

impl FrameBackend for VulkanFrameBackend<'_> {
    fn wait_for_fence(&mut self, slot: usize, timeout_ns: u64) -> Result<()> {
        let fence = self.slots.get(slot)?.in_flight;
        unsafe { wait_for_fence(self.ctx.device(), fence, timeout_ns) }
    }

    fn reset_fence(&mut self, slot: usize) -> Result<()> {
        let fence = self.slots.get(slot)?.in_flight;
        unsafe { reset_fence(self.ctx.device(), fence) }
    }

    fn acquire_next_image(&mut self, slot: usize, timeout_ns: u64) -> Result<u32> {
        let semaphore = self.slots.get(slot)?.image_available;
        self.swapchain.acquire_next_image(timeout_ns, semaphore)
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let device = self.ctx.device();
        let cmd = self.slots.get(slot)?.command_buffer;
        let framebuffer = self.framebuffers.get(image_index).ok_or_else(|| {
            GpuError::InvalidState(format!("No framebuffer for image {image_index}"))
        })?;
        let descriptor_set = self.uniforms.descriptor_set(slot)?;
        let extent = self.swapchain.extent;
        let clear_values = self.clear_values();

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())?;

            let render_pass_info = vk::RenderPassBeginInfo::default()
                .render_pass(self.pipeline.render_pass)
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent,
                })
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);

            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(
                cmd,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent,
                }],
            );

            device.cmd_bind_vertex_buffers(cmd, 0, &[self.draw.vertex_buffer], &[0]);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout,
                0,
                &[descriptor_set],
                &[],
            );

            match self.draw.index_buffer {
                Some(index_buffer) => {
                    device.cmd_bind_index_buffer(cmd, index_buffer, 0, vk::IndexType::UINT32);
                    device.cmd_draw_indexed(cmd, self.draw.count, 1, 0, 0, 0);
                }
                None => device.cmd_draw(cmd, self.draw.count, 1, 0, 0),
            }

            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd)?;
        }

        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let frame = self.slots.get(slot)?;
        unsafe {
            crate::command::submit_command_buffer(
                self.ctx.device(),
                self.ctx.queue(),
                frame.command_buffer,
                &[frame.image_available],
                &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
                &[frame.render_finished],
                frame.in_flight,
            )
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let render_finished = self.slots.get(slot)?.render_finished;
        self.swapchain
            .present(self.ctx.queue(), image_index, &[render_finished])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Simulated device: submissions complete when their fence is waited on.
    struct MockBackend {
        image_count: u32,
        next_image: u32,
        fence_signaled: Vec<bool>,
        pending: Vec<bool>,
        recorded_slots: Vec<usize>,
        presents: Vec<(usize, u32)>,
        fail_present_at: Option<usize>,
    }

    impl MockBackend {
        fn new(frames: usize, image_count: u32) -> Self {
            Self {
                image_count,
                next_image: 0,
                fence_signaled: vec![true; frames],
                pending: vec![false; frames],
                recorded_slots: Vec::new(),
                presents: Vec::new(),
                fail_present_at: None,
            }
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_for_fence(&mut self, slot: usize, timeout_ns: u64) -> Result<()> {
            if self.pending[slot] {
                self.pending[slot] = false;
                self.fence_signaled[slot] = true;
            }
            if self.fence_signaled[slot] {
                Ok(())
            } else {
                Err(GpuError::FenceTimeout(timeout_ns))
            }
        }

        fn reset_fence(&mut self, slot: usize) -> Result<()> {
            self.fence_signaled[slot] = false;
            Ok(())
        }

        fn acquire_next_image(&mut self, _slot: usize, _timeout_ns: u64) -> Result<u32> {
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(image)
        }

        fn record(&mut self, slot: usize, _image_index: u32) -> Result<()> {
            if self.pending[slot] {
                return Err(GpuError::InvalidState(format!(
                    "slot {slot} re-recorded while its submission is pending"
                )));
            }
            self.recorded_slots.push(slot);
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> Result<()> {
            assert!(!self.fence_signaled[slot], "submitted with a signaled fence");
            self.pending[slot] = true;
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<()> {
            if self.fail_present_at == Some(self.presents.len()) {
                return Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST));
            }
            self.presents.push((slot, image_index));
            Ok(())
        }
    }

    #[test]
    fn two_slots_three_images_ten_frames() {
        let mut backend = MockBackend::new(2, 3);
        let mut sync = FrameSynchronizer::new(2, u64::MAX).unwrap();

        for _ in 0..10 {
            sync.draw_frame(&mut backend, |_| Ok(())).unwrap();
        }

        assert_eq!(backend.presents.len(), 10);
        assert_eq!(sync.frame_count(), 10);
        let images: Vec<u32> = backend.presents.iter().map(|&(_, i)| i).collect();
        assert_eq!(images, [0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn slot_index_cycles_with_period_f() {
        for frames in 1..=3 {
            let mut backend = MockBackend::new(frames, 3);
            let mut sync = FrameSynchronizer::new(frames, 1_000_000).unwrap();
            for _ in 0..(frames * 4) {
                sync.draw_frame(&mut backend, |_| Ok(())).unwrap();
            }
            let expected: Vec<usize> = (0..frames * 4).map(|i| i % frames).collect();
            assert_eq!(backend.recorded_slots, expected);
            assert_eq!(sync.current_slot(), 0);
        }
    }

    #[test]
    fn never_records_over_pending_submission() {
        let mut backend = MockBackend::new(3, 2);
        let mut sync = FrameSynchronizer::new(3, u64::MAX).unwrap();

        for _ in 0..12 {
            let info = sync.draw_frame(&mut backend, |_| Ok(())).unwrap();
            assert!(sync.states()[info.slot].is_in_flight());
        }
        assert_eq!(backend.recorded_slots.len(), 12);
    }

    #[test]
    fn prepare_sees_the_current_slot() {
        let mut backend = MockBackend::new(2, 3);
        let mut sync = FrameSynchronizer::new(2, u64::MAX).unwrap();
        let mut seen = Vec::new();

        for _ in 0..4 {
            sync.draw_frame(&mut backend, |slot| {
                seen.push(slot);
                Ok(())
            })
            .unwrap();
        }
        assert_eq!(seen, [0, 1, 0, 1]);
    }

    #[test]
    fn fence_timeout_is_reported() {
        let mut backend = MockBackend::new(2, 3);
        backend.fence_signaled[0] = false;
        let mut sync = FrameSynchronizer::new(2, 500).unwrap();

        let err = sync.draw_frame(&mut backend, |_| Ok(())).unwrap_err();
        assert!(matches!(err, GpuError::FenceTimeout(500)));
        assert!(backend.presents.is_empty());
        assert_eq!(sync.frame_count(), 0);
    }

    #[test]
    fn present_failure_is_fatal() {
        let mut backend = MockBackend::new(2, 3);
        backend.fail_present_at = Some(1);
        let mut sync = FrameSynchronizer::new(2, u64::MAX).unwrap();

        sync.draw_frame(&mut backend, |_| Ok(())).unwrap();
        let err = sync.draw_frame(&mut backend, |_| Ok(())).unwrap_err();
        assert!(matches!(err, GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST)));
        assert_eq!(sync.frame_count(), 1);
        assert_eq!(sync.current_slot(), 1);
    }

    #[test]
    fn prepare_error_stops_before_recording() {
        let mut backend = MockBackend::new(2, 3);
        let mut sync = FrameSynchronizer::new(2, u64::MAX).unwrap();

        let err = sync
            .draw_frame(&mut backend, |_| {
                Err(GpuError::InvalidState("uniform write failed".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, GpuError::InvalidState(_)));
        assert!(backend.recorded_slots.is_empty());
    }

    #[test]
    fn zero_frames_rejected() {
        assert!(FrameSynchronizer::new(0, u64::MAX).is_err());
    }
}
