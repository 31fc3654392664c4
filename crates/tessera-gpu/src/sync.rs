//! Synchronization primitives and frame slots.

use crate::command::CommandPool;
use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use ash::vk;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = unsafe { device.create_semaphore(&create_info, None)? };
    Ok(semaphore)
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = unsafe { device.create_fence(&create_info, None)? };
    Ok(fence)
}

/// Wait for a fence to be signaled.
///
/// Running out of time is reported as [`GpuError::FenceTimeout`].
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn wait_for_fence(device: &ash::Device, fence: vk::Fence, timeout_ns: u64) -> Result<()> {
    match unsafe { device.wait_for_fences(&[fence], true, timeout_ns) } {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(GpuError::FenceTimeout(timeout_ns)),
        Err(e) => Err(e.into()),
    }
}

/// Reset a fence to unsignaled state.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    unsafe { device.reset_fences(&[fence])? };
    Ok(())
}

/// Where a frame slot is in its record/submit cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    /// Free to record; any earlier submission is known complete.
    #[default]
    Idle,
    /// Command buffer is being recorded for a swapchain image.
    Recording { image_index: u32 },
    /// Submitted; completion is only known after the slot's fence signals.
    Submitted { image_index: u32 },
}

/// Input that moves a slot between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotEvent {
    /// Fence observed and an image acquired.
    BeginRecording(u32),
    /// Command buffer handed to the queue.
    Submit,
    /// Fence of the last submission observed signaled.
    Retire,
}

impl SlotState {
    /// Apply `event`, or fail if the slot cannot take it from here.
    pub fn transition(self, event: SlotEvent) -> Result<Self> {
        match (self, event) {
            (Self::Idle, SlotEvent::BeginRecording(image_index)) => {
                Ok(Self::Recording { image_index })
            }
            (Self::Recording { image_index }, SlotEvent::Submit) => {
                Ok(Self::Submitted { image_index })
            }
            (Self::Submitted { .. }, SlotEvent::Retire) => Ok(Self::Idle),
            (from, event) => Err(GpuError::InvalidSlotTransition { from, event }),
        }
    }

    /// Swapchain image the slot is working on, if any.
    pub fn image_index(self) -> Option<u32> {
        match self {
            Self::Idle => None,
            Self::Recording { image_index } | Self::Submitted { image_index } => Some(image_index),
        }
    }

    /// Whether GPU work from this slot may still be executing.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Submitted { .. })
    }
}

/// Objects owned by one frame slot.
pub struct FrameSlot {
    /// Re-recorded every time the slot comes round
    pub command_buffer: vk::CommandBuffer,
    /// Signaled when the acquired image is ready
    pub image_available: vk::Semaphore,
    /// Signaled when rendering is complete
    pub render_finished: vk::Semaphore,
    /// Signaled when the slot's submission completes; created signaled
    pub in_flight: vk::Fence,
}

impl FrameSlot {
    unsafe fn new(device: &ash::Device, command_buffer: vk::CommandBuffer) -> Result<Self> {
        let mut slot = Self {
            command_buffer,
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
        };

        let created = (|| -> Result<()> {
            unsafe {
                slot.image_available = create_semaphore(device)?;
                slot.render_finished = create_semaphore(device)?;
                slot.in_flight = create_fence(device, true)?;
            }
            Ok(())
        })();

        match created {
            Ok(()) => Ok(slot),
            Err(e) => {
                unsafe { slot.destroy(device) };
                Err(e)
            }
        }
    }

    unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight, None);
        }
    }
}

/// All frame slots plus the pool their command buffers come from.
pub struct FrameSlots {
    pool: CommandPool,
    slots: Vec<FrameSlot>,
}

impl FrameSlots {
    /// Create `count` slots with resettable command buffers.
    pub fn new(ctx: &DeviceContext, count: usize) -> Result<Self> {
        if count == 0 {
            return Err(GpuError::InvalidState(
                "At least one frame slot is required".to_string(),
            ));
        }

        let device = ctx.device();
        let pool = unsafe {
            CommandPool::new(
                device,
                ctx.queue_family(),
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )?
        };

        let mut frame_slots = Self {
            pool,
            slots: Vec::with_capacity(count),
        };

        let created = (|| -> Result<()> {
            let command_buffers =
                unsafe { frame_slots.pool.allocate_command_buffers(device, count as u32)? };
            for command_buffer in command_buffers {
                let slot = unsafe { FrameSlot::new(device, command_buffer)? };
                frame_slots.slots.push(slot);
            }
            Ok(())
        })();

        if let Err(e) = created {
            unsafe { frame_slots.destroy(device) };
            return Err(e);
        }

        tracing::debug!("Created {} frame slots", count);
        Ok(frame_slots)
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there are no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot `index`.
    pub fn get(&self, index: usize) -> Result<&FrameSlot> {
        self.slots.get(index).ok_or_else(|| {
            GpuError::InvalidState(format!(
                "Frame slot {index} out of range (0..{})",
                self.slots.len()
            ))
        })
    }

    /// Destroy every slot and the command pool.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for slot in self.slots.drain(..) {
            unsafe { slot.destroy(device) };
        }
        unsafe { self.pool.destroy(device) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle() {
        let state = SlotState::Idle
            .transition(SlotEvent::BeginRecording(2))
            .unwrap();
        assert_eq!(state, SlotState::Recording { image_index: 2 });
        assert!(!state.is_in_flight());

        let state = state.transition(SlotEvent::Submit).unwrap();
        assert_eq!(state, SlotState::Submitted { image_index: 2 });
        assert!(state.is_in_flight());
        assert_eq!(state.image_index(), Some(2));

        let state = state.transition(SlotEvent::Retire).unwrap();
        assert_eq!(state, SlotState::Idle);
        assert_eq!(state.image_index(), None);
    }

    #[test]
    fn cannot_record_while_submitted() {
        let err = SlotState::Submitted { image_index: 0 }
            .transition(SlotEvent::BeginRecording(1))
            .unwrap_err();
        assert!(matches!(
            err,
            GpuError::InvalidSlotTransition {
                from: SlotState::Submitted { image_index: 0 },
                event: SlotEvent::BeginRecording(1),
            }
        ));
    }

    #[test]
    fn other_illegal_pairs() {
        assert!(SlotState::Idle.transition(SlotEvent::Submit).is_err());
        assert!(SlotState::Idle.transition(SlotEvent::Retire).is_err());
        let recording = SlotState::Recording { image_index: 0 };
        assert!(recording.transition(SlotEvent::Retire).is_err());
        assert!(recording.transition(SlotEvent::BeginRecording(0)).is_err());
        assert!(SlotState::Submitted { image_index: 0 }
            .transition(SlotEvent::Submit)
            .is_err());
    }
}
