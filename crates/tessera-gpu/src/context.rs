//! Device context: instance, physical device, logical device and queue.

use crate::capabilities::DeviceInfo;
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, required_instance_extensions, select_physical_device};
use crate::memory::MemoryTypeTable;
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::c_char;

/// Owns every Vulkan object that lives for the whole run.
///
/// A single queue serves graphics, transfer and presentation. Dropping the
/// context waits for the device to go idle before destroying the device and
/// instance, so every resource created from it must be destroyed first.
pub struct DeviceContext {
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    info: DeviceInfo,
    memory_types: MemoryTypeTable,
    queue_family: u32,
    queue: vk::Queue,
    presentation: bool,
}

impl DeviceContext {
    /// Get the Vulkan entry point.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the logical device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Information about the selected GPU.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Memory types captured at device creation.
    pub fn memory_types(&self) -> &MemoryTypeTable {
        &self.memory_types
    }

    /// Index of the queue family used for everything.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// The single graphics/present queue.
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    /// Whether the swapchain extension was enabled.
    pub fn supports_presentation(&self) -> bool {
        self.presentation
    }

    /// Lowest memory type allowed by `type_bits` with all `required` flags.
    pub fn find_memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        self.memory_types.find_memory_type(type_bits, required)
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::warn!("device_wait_idle failed during teardown: {e}");
            }
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
        tracing::debug!("Device context destroyed");
    }
}

/// Builder for creating a device context.
pub struct DeviceContextBuilder {
    app_name: String,
    enable_validation: bool,
    display: Option<RawDisplayHandle>,
    presentation: bool,
}

impl Default for DeviceContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Tessera".to_string(),
            enable_validation: cfg!(debug_assertions),
            display: None,
            presentation: true,
        }
    }
}

impl DeviceContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Display whose window-system extensions the instance must enable.
    pub fn display_handle(mut self, display: RawDisplayHandle) -> Self {
        self.display = Some(display);
        self.presentation = true;
        self
    }

    /// Build without any surface or swapchain support.
    pub fn headless(mut self) -> Self {
        self.display = None;
        self.presentation = false;
        self
    }

    /// Build the device context.
    pub fn build(self) -> Result<DeviceContext> {
        if self.presentation && self.display.is_none() {
            return Err(GpuError::InvalidState(
                "Presentation needs a display handle; call display_handle() or headless()"
                    .to_string(),
            ));
        }

        let entry = unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;

        let extensions = required_instance_extensions(self.display)?;
        let instance =
            unsafe { create_instance(&entry, &self.app_name, self.enable_validation, &extensions) }?;

        match unsafe { self.finish(entry, instance.clone()) } {
            Ok(ctx) => Ok(ctx),
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                Err(e)
            }
        }
    }

    unsafe fn finish(self, entry: ash::Entry, instance: ash::Instance) -> Result<DeviceContext> {
        let (physical_device, queue_family) = unsafe { select_physical_device(&instance)? };

        let info = unsafe { DeviceInfo::query(&instance, physical_device) };
        tracing::info!("Selected GPU: {}", info.summary());

        let memory_types = MemoryTypeTable::from_properties(&unsafe {
            instance.get_physical_device_memory_properties(physical_device)
        });

        let (device, queue) = unsafe {
            create_logical_device(
                &instance,
                physical_device,
                queue_family,
                self.presentation,
                info.supports_sampler_anisotropy,
            )?
        };

        tracing::debug!(
            "Logical device created on queue family {} ({} memory types)",
            queue_family,
            memory_types.len()
        );

        Ok(DeviceContext {
            entry,
            instance,
            physical_device,
            device,
            info,
            memory_types,
            queue_family,
            queue,
            presentation: self.presentation,
        })
    }
}

/// Create the logical device with one queue from `queue_family`.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
    presentation: bool,
    sampler_anisotropy: bool,
) -> Result<(ash::Device, vk::Queue)> {
    let queue_priority = 1.0_f32;
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority))];

    let mut extension_names: Vec<*const c_char> = Vec::new();
    if presentation {
        extension_names.push(ash::khr::swapchain::NAME.as_ptr());
    }
    #[cfg(target_os = "macos")]
    extension_names.push(ash::khr::portability_subset::NAME.as_ptr());

    let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(sampler_anisotropy);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &device_create_info, None)? };
    let queue = unsafe { device.get_device_queue(queue_family, 0) };

    Ok((device, queue))
}
