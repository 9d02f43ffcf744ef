use std::ffi::CStr;
use std::fmt;
use ash::vk;
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::instance::RenderInstance;
use crate::renderer::contexts::device_ctx::queue::{pick_queue_families, QueueFamily};
use crate::renderer::error::VkResultExt;

/// A physical device that can drive the window surface
#[derive(Debug, Clone)]
pub struct SuitableDevice {
    pub physical: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub graphics_family: QueueFamily,
    pub present_family: QueueFamily,
}

/// Everything the suitability check looks at, gathered up front
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
    pub missing_extensions: Vec<String>,
    pub surface_format_count: usize,
    pub present_mode_count: usize,
    pub sampler_anisotropy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NoGraphicsQueue,
    NoPresentQueue,
    MissingExtensions(Vec<String>),
    NoSurfaceFormats,
    NoPresentModes,
    NoSamplerAnisotropy,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoGraphicsQueue => write!(f, "no graphics queue family"),
            Rejection::NoPresentQueue => write!(f, "no queue family can present to the surface"),
            Rejection::MissingExtensions(exts) => write!(f, "missing extensions {:?}", exts),
            Rejection::NoSurfaceFormats => write!(f, "no surface formats"),
            Rejection::NoPresentModes => write!(f, "no present modes"),
            Rejection::NoSamplerAnisotropy => write!(f, "samplerAnisotropy not supported"),
        }
    }
}

impl DeviceCapabilities {
    /// The first reason the device cannot be used, if any
    pub fn rejection(&self) -> Option<Rejection> {
        if self.graphics_family.is_none() {
            return Some(Rejection::NoGraphicsQueue);
        }
        if self.present_family.is_none() {
            return Some(Rejection::NoPresentQueue);
        }
        if !self.missing_extensions.is_empty() {
            return Some(Rejection::MissingExtensions(self.missing_extensions.clone()));
        }
        if self.surface_format_count == 0 {
            return Some(Rejection::NoSurfaceFormats);
        }
        if self.present_mode_count == 0 {
            return Some(Rejection::NoPresentModes);
        }
        if !self.sampler_anisotropy {
            return Some(Rejection::NoSamplerAnisotropy);
        }
        None
    }

    pub fn is_suitable(&self) -> bool {
        self.rejection().is_none()
    }
}

/// Lower is better
pub fn device_type_rank(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 3,
        vk::PhysicalDeviceType::OTHER => 4,
        _ => 5,
    }
}

pub fn required_device_extensions() -> Vec<&'static CStr> {
    vec![
        ash::khr::swapchain::NAME,

        #[cfg(target_os = "macos")]
        ash::khr::portability_subset::NAME,
    ]
}

pub(super) fn enumerate_suitable_devices(instance: &RenderInstance) -> Result<Vec<SuitableDevice>> {
    let physical_devices = unsafe {
        instance.instance
            .enumerate_physical_devices()
            .classify("enumerate_physical_devices")?
    };

    let mut suitable = Vec::new();
    for physical in physical_devices {
        let props = unsafe {
            instance.instance.get_physical_device_properties(physical)
        };
        let name = props
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| String::from("<unnamed>"));

        let queue_family_props = unsafe {
            instance.instance.get_physical_device_queue_family_properties(physical)
        };
        let capabilities = query_capabilities(instance, physical, &queue_family_props)?;
        if let Some(reason) = capabilities.rejection() {
            log::info!("Skipping device {}: {}", name, reason);
            continue;
        }

        // Checked by `rejection`
        let (Some(graphics_index), Some(present_index)) =
            (capabilities.graphics_family, capabilities.present_family)
        else {
            continue;
        };

        suitable.push(SuitableDevice {
            physical,
            name,
            device_type: props.device_type,
            graphics_family: QueueFamily::new(
                graphics_index,
                queue_family_props[graphics_index as usize],
                graphics_index == present_index,
            ),
            present_family: QueueFamily::new(
                present_index,
                queue_family_props[present_index as usize],
                true,
            ),
        });
    }

    suitable.sort_by_key(|device| device_type_rank(device.device_type));
    Ok(suitable)
}

fn query_capabilities(
    instance: &RenderInstance,
    physical: vk::PhysicalDevice,
    queue_family_props: &[vk::QueueFamilyProperties],
) -> Result<DeviceCapabilities> {
    let mut families = Vec::with_capacity(queue_family_props.len());
    for (i, props) in queue_family_props.iter().enumerate() {
        let supports_present = unsafe {
            instance.surface_loader.get_physical_device_surface_support(
                physical,
                i as u32,
                instance.surface,
            )
            .classify("get_physical_device_surface_support")?
        };
        families.push((props.queue_flags, supports_present));
    }
    let (graphics_family, present_family) = pick_queue_families(&families);

    let supported_extensions = unsafe {
        instance.instance
            .enumerate_device_extension_properties(physical)
            .classify("enumerate_device_extension_properties")?
    };
    let missing_extensions = required_device_extensions()
        .into_iter()
        .filter(|req| {
            !supported_extensions
                .iter()
                .any(|sup| sup.extension_name_as_c_str().is_ok_and(|name| name == *req))
        })
        .map(|req| req.to_string_lossy().into_owned())
        .collect::<Vec<_>>();

    // Only ask about the surface when the swapchain extension exists
    let (surface_format_count, present_mode_count) = if missing_extensions.is_empty() {
        unsafe {
            (
                instance.surface_loader
                    .get_physical_device_surface_formats(physical, instance.surface)
                    .classify("get_physical_device_surface_formats")?
                    .len(),
                instance.surface_loader
                    .get_physical_device_surface_present_modes(physical, instance.surface)
                    .classify("get_physical_device_surface_present_modes")?
                    .len(),
            )
        }
    } else {
        (0, 0)
    };

    let features = unsafe {
        instance.instance.get_physical_device_features(physical)
    };

    Ok(DeviceCapabilities {
        graphics_family,
        present_family,
        missing_extensions,
        surface_format_count,
        present_mode_count,
        sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capable() -> DeviceCapabilities {
        DeviceCapabilities {
            graphics_family: Some(0),
            present_family: Some(0),
            missing_extensions: Vec::new(),
            surface_format_count: 2,
            present_mode_count: 1,
            sampler_anisotropy: true,
        }
    }

    #[test]
    fn test_capable_device_is_suitable() {
        assert!(capable().is_suitable());
    }

    #[test]
    fn test_rejects_missing_anisotropy() {
        let caps = DeviceCapabilities {
            sampler_anisotropy: false,
            ..capable()
        };
        assert_eq!(caps.rejection(), Some(Rejection::NoSamplerAnisotropy));
    }

    #[test]
    fn test_rejects_empty_present_modes() {
        let caps = DeviceCapabilities {
            present_mode_count: 0,
            ..capable()
        };
        assert_eq!(caps.rejection(), Some(Rejection::NoPresentModes));
    }

    #[test]
    fn test_rejects_missing_queues_and_extensions() {
        let caps = DeviceCapabilities {
            present_family: None,
            ..capable()
        };
        assert_eq!(caps.rejection(), Some(Rejection::NoPresentQueue));

        let caps = DeviceCapabilities {
            graphics_family: None,
            ..capable()
        };
        assert_eq!(caps.rejection(), Some(Rejection::NoGraphicsQueue));

        let caps = DeviceCapabilities {
            missing_extensions: vec![String::from("VK_KHR_swapchain")],
            ..capable()
        };
        assert!(matches!(caps.rejection(), Some(Rejection::MissingExtensions(_))));
    }

    #[test]
    fn test_rejects_empty_formats() {
        let caps = DeviceCapabilities {
            surface_format_count: 0,
            ..capable()
        };
        assert!(!caps.is_suitable());
    }

    #[test]
    fn test_device_ranking() {
        let mut types = vec![
            vk::PhysicalDeviceType::CPU,
            vk::PhysicalDeviceType::INTEGRATED_GPU,
            vk::PhysicalDeviceType::DISCRETE_GPU,
            vk::PhysicalDeviceType::VIRTUAL_GPU,
        ];
        types.sort_by_key(|t| device_type_rank(*t));
        assert_eq!(types[0], vk::PhysicalDeviceType::DISCRETE_GPU);
        assert_eq!(types[1], vk::PhysicalDeviceType::INTEGRATED_GPU);
        assert_eq!(types[3], vk::PhysicalDeviceType::CPU);
    }

    #[test]
    fn test_swapchain_extension_required() {
        assert!(required_device_extensions().contains(&ash::khr::swapchain::NAME));
    }
}
