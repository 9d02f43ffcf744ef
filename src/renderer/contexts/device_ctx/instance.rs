use std::ffi::{c_char, c_void, CStr};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;
use crate::renderer::contexts::device_ctx::selection::{self, SuitableDevice};
use crate::renderer::error::VkResultExt;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const API_DUMP_LAYER: &CStr = c"VK_LAYER_LUNARG_api_dump";

/// Initializes Vulkan, owns the window surface and keeps the Vulkan instance alive
pub struct RenderInstance {
    pub instance: ash::Instance,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,

    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    layers: Vec<&'static CStr>,
    _entry: ash::Entry,
}

impl RenderInstance {
    pub fn new(
        window: &Window,
        enable_validation: bool,
        enable_api_dump: bool,
    ) -> Result<Self> {
        let entry = ash::Entry::linked();

        let layers = requested_layers(enable_validation, enable_api_dump);
        Self::check_layers_supported(&entry, &layers)?;

        let instance = Self::create_instance(&entry, window, &layers, enable_validation)?;

        let debug_utils = if enable_validation {
            Some(Self::create_debug_utils_messenger(&entry, &instance)?)
        } else {
            None
        };

        let (surface, surface_loader) = Self::create_surface(&entry, &instance, window)?;

        Ok(Self {
            instance,
            surface,
            surface_loader,
            debug_utils,
            layers,
            _entry: entry,
        })
    }

    /// Layers that were enabled on the instance, to be repeated on the logical device
    pub fn layers(&self) -> &[&'static CStr] {
        &self.layers
    }

    /// Every device able to drive this surface, best candidate first
    pub fn enumerate_suitable_devices(&self) -> Result<Vec<SuitableDevice>> {
        selection::enumerate_suitable_devices(self)
    }

    fn create_instance(
        entry: &ash::Entry,
        window: &Window,
        layers: &[&'static CStr],
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let application_info = vk::ApplicationInfo::default()
            .application_name(c"vistim")
            .engine_name(c"No engine")
            .api_version(vk::API_VERSION_1_3);
        let enabled_layer_names = layers
            .iter()
            .map(|layer| layer.as_ptr())
            .collect::<Vec<*const c_char>>();
        let enabled_extension_names = Self::get_required_instance_extensions(window, enable_validation)?
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();
        let mut debug_info = debug_utils_messenger_create_info();
        let mut instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&enabled_layer_names)
            .enabled_extension_names(&enabled_extension_names);
        if enable_validation {
            // Also catch messages emitted during instance creation and destruction
            instance_info = instance_info.push_next(&mut debug_info);
        }

        #[cfg(target_os = "macos")]
        let instance_info = instance_info
            .flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

        Ok(unsafe {
            entry
                .create_instance(&instance_info, None)
                .classify("create_instance")?
        })
    }

    fn create_debug_utils_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils_loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let debug_utils_info = debug_utils_messenger_create_info();
        let debug_utils_messenger = unsafe {
            debug_utils_loader
                .create_debug_utils_messenger(&debug_utils_info, None)
                .classify("create_debug_utils_messenger")?
        };
        Ok((debug_utils_loader, debug_utils_messenger))
    }

    fn create_surface(
        entry: &ash::Entry,
        instance: &ash::Instance,
        window: &Window,
    ) -> Result<(vk::SurfaceKHR, ash::khr::surface::Instance)> {
        let surface = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )
            .classify("create_surface")?
        };
        let surface_loader = ash::khr::surface::Instance::new(entry, instance);
        Ok((surface, surface_loader))
    }

    fn get_required_instance_extensions(
        window: &Window,
        enable_validation: bool,
    ) -> Result<Vec<&'static CStr>> {
        let mut exts = ash_window::enumerate_required_extensions(
            window.display_handle()?.as_raw()
        )
            .classify("enumerate_required_extensions")?
            .iter()
            .map(|ext| unsafe {
                CStr::from_ptr(*ext)
            })
            .collect::<Vec<_>>();

        if enable_validation {
            exts.push(ash::ext::debug_utils::NAME);
        }

        #[cfg(target_os = "macos")]
        {
            exts.push(ash::khr::portability_enumeration::NAME);
            exts.push(ash::khr::get_physical_device_properties2::NAME);
        }

        Ok(exts)
    }

    fn check_layers_supported(entry: &ash::Entry, layers: &[&'static CStr]) -> Result<()> {
        if layers.is_empty() {
            return Ok(());
        }

        let supported_layers = unsafe {
            entry
                .enumerate_instance_layer_properties()
                .classify("enumerate_instance_layer_properties")?
        };

        for layer in layers {
            let supported = supported_layers
                .iter()
                .any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == *layer));
            if !supported {
                return Err(eyre!(
                    "Validation layer {:?} not supported",
                    layer
                ));
            }
        }

        Ok(())
    }
}

impl Drop for RenderInstance {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Instance layers for the requested diagnostics
pub fn requested_layers(enable_validation: bool, enable_api_dump: bool) -> Vec<&'static CStr> {
    let mut layers = Vec::new();
    if enable_validation || enable_api_dump {
        layers.push(VALIDATION_LAYER);
    }
    if enable_api_dump {
        layers.push(API_DUMP_LAYER);
    }
    layers
}

fn debug_utils_messenger_create_info(
) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    let message_severity = vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    let message_type = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(message_severity)
        .message_type(message_type)
        .pfn_user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let msg_type = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "[General]",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[Performance]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[Validation]",
        _ => "[Unknown]",
    };
    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe {
        (*p_callback_data).message_as_c_str().unwrap_or(c"<no message>")
    };
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            log::trace!("[Verbose]{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::info!("[Info]{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Warning]{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Error]{} {:?}", msg_type, msg);
        }
        _ => {
            log::warn!("[Unknown]{} {:?}", msg_type, msg);
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_layers_without_diagnostics() {
        assert!(requested_layers(false, false).is_empty());
    }

    #[test]
    fn test_validation_layer() {
        assert_eq!(requested_layers(true, false), vec![VALIDATION_LAYER]);
    }

    #[test]
    fn test_api_dump_adds_both_layers() {
        assert_eq!(requested_layers(false, true), vec![VALIDATION_LAYER, API_DUMP_LAYER]);
        assert_eq!(requested_layers(true, true), vec![VALIDATION_LAYER, API_DUMP_LAYER]);
    }
}
