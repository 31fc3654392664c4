//! Vulkan instance creation and physical device selection.

use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};

/// Instance extensions needed to present to windows on `display`.
///
/// Without a display only the portability extension (macOS) is requested.
pub fn required_instance_extensions(display: Option<RawDisplayHandle>) -> Result<Vec<*const c_char>> {
    #[cfg_attr(not(target_os = "macos"), allow(unused_mut))]
    let mut extensions = match display {
        Some(display) => ash_window::enumerate_required_extensions(display)?.to_vec(),
        None => Vec::new(),
    };

    #[cfg(target_os = "macos")]
    extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());

    Ok(extensions)
}

/// Validation layers to enable in debug builds.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Create a Vulkan instance.
///
/// # Safety
/// The entry must be a valid Vulkan entry point and every extension pointer
/// must reference a NUL-terminated string that outlives the call.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
    extension_names: &[*const c_char],
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::InvalidState(format!("Application name contains NUL: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Tessera")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_3);

    let requested_layers = if enable_validation {
        validation_layers()
    } else {
        vec![]
    };

    // Missing layers are skipped rather than failing instance creation
    let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };
    let layers: Vec<&CStr> = requested_layers
        .into_iter()
        .filter(|layer| {
            let found = available_layers
                .iter()
                .any(|props| props.layer_name_as_c_str().ok() == Some(*layer));
            if !found {
                tracing::warn!("Validation layer {:?} not available", layer);
            }
            found
        })
        .collect();

    let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = unsafe { entry.create_instance(&create_info, None)? };

    Ok(instance)
}

/// What device selection needs to know about one enumerated GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCandidate {
    pub device_type: vk::PhysicalDeviceType,
    /// First queue family supporting graphics, if any.
    pub graphics_queue_family: Option<u32>,
}

impl DeviceCandidate {
    fn type_rank(&self) -> u32 {
        match self.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 3,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
            _ => 0,
        }
    }
}

/// Pick the candidate to use, returning its position in `candidates`.
///
/// Discrete beats integrated beats virtual beats anything else; ties go to the
/// earliest enumerated device. Devices without a graphics queue are skipped.
pub fn choose_device(candidates: &[DeviceCandidate]) -> Result<usize> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.graphics_queue_family.is_some())
        // max_by_key keeps the last maximum, so rank ties by reversed index
        .max_by_key(|(i, c)| (c.type_rank(), std::cmp::Reverse(*i)))
        .map(|(i, _)| i)
        .ok_or(GpuError::NoSuitableDevice)
}

/// Find the first queue family that supports graphics.
pub fn find_graphics_queue_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    families
        .iter()
        .position(|family| {
            family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .map(|i| i as u32)
}

/// Pick among enumerated `devices`, querying each one through `describe`.
///
/// An empty list fails with [`GpuError::NoSuitableDevice`] without calling
/// `describe`.
pub fn pick_device<D, F>(devices: &[D], describe: F) -> Result<(D, u32)>
where
    D: Copy,
    F: FnMut(D) -> DeviceCandidate,
{
    if devices.is_empty() {
        tracing::error!("No Vulkan physical devices present");
        return Err(GpuError::NoSuitableDevice);
    }

    let candidates: Vec<DeviceCandidate> = devices.iter().copied().map(describe).collect();

    let chosen = choose_device(&candidates)?;
    let queue_family = candidates[chosen]
        .graphics_queue_family
        .ok_or(GpuError::NoSuitableDevice)?;

    Ok((devices[chosen], queue_family))
}

/// Select the physical device and its graphics/present queue family.
///
/// Fails with [`GpuError::NoSuitableDevice`] when no GPU is enumerated, before
/// any device-level query runs.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_physical_device(instance: &ash::Instance) -> Result<(vk::PhysicalDevice, u32)> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    pick_device(&devices, |device| unsafe {
        let properties = instance.get_physical_device_properties(device);
        let families = instance.get_physical_device_queue_family_properties(device);
        DeviceCandidate {
            device_type: properties.device_type,
            graphics_queue_family: find_graphics_queue_family(&families),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(device_type: vk::PhysicalDeviceType, family: Option<u32>) -> DeviceCandidate {
        DeviceCandidate {
            device_type,
            graphics_queue_family: family,
        }
    }

    #[test]
    fn no_devices_is_fatal() {
        assert!(matches!(choose_device(&[]), Err(GpuError::NoSuitableDevice)));
    }

    #[test]
    fn empty_enumeration_fails_before_any_device_query() {
        let mut queried = 0;
        let result = pick_device::<u32, _>(&[], |_| {
            queried += 1;
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, Some(0))
        });
        assert!(matches!(result, Err(GpuError::NoSuitableDevice)));
        assert_eq!(queried, 0);
    }

    #[test]
    fn picks_device_and_its_graphics_family() {
        let devices = [10_u32, 20, 30];
        let mut queried = Vec::new();
        let picked = pick_device(&devices, |device| {
            queried.push(device);
            match device {
                20 => candidate(vk::PhysicalDeviceType::DISCRETE_GPU, Some(2)),
                _ => candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, Some(0)),
            }
        })
        .unwrap();
        assert_eq!(picked, (20, 2));
        assert_eq!(queried, devices);
    }

    #[test]
    fn discrete_gpu_is_preferred() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, Some(0)),
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, Some(0)),
        ];
        assert_eq!(choose_device(&candidates).unwrap(), 1);
    }

    #[test]
    fn ties_go_to_first_enumerated() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::CPU, Some(0)),
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, Some(1)),
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, Some(0)),
        ];
        assert_eq!(choose_device(&candidates).unwrap(), 1);
    }

    #[test]
    fn devices_without_graphics_are_skipped() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, None),
            candidate(vk::PhysicalDeviceType::CPU, Some(2)),
        ];
        assert_eq!(choose_device(&candidates).unwrap(), 1);

        let compute_only = [candidate(vk::PhysicalDeviceType::DISCRETE_GPU, None)];
        assert!(matches!(
            choose_device(&compute_only),
            Err(GpuError::NoSuitableDevice)
        ));
    }

    #[test]
    fn graphics_family_lookup() {
        let families = [
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::TRANSFER,
                queue_count: 1,
                ..Default::default()
            },
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
                queue_count: 16,
                ..Default::default()
            },
        ];
        assert_eq!(find_graphics_queue_family(&families), Some(1));
        assert_eq!(find_graphics_queue_family(&families[..1]), None);
    }
}
