// Vulkan instance, window surface and the optional validation hook
//
// Responsibilities:
// - Load the Vulkan library and create the instance with the window-system extensions
// - Create/destroy the presentation surface for the native window
// - Route validation layer messages into `log` when the debug hook is enabled

use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_char, CStr};

use crate::error::RenderError;

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance-level handles. Everything else in the session hangs off these.
pub struct VulkanInstance {
    pub entry: Entry,
    pub instance: ash::Instance,
    pub surface_loader: ash::khr::surface::Instance,
    /// Whether the validation layer and debug utils were actually enabled
    pub validation: bool,
}

impl VulkanInstance {
    /// Create the instance.
    ///
    /// `request_validation` is a wish, not a requirement: if the validation layer is
    /// not installed we log it and carry on without the debug hook.
    pub fn new(
        app_name: &str,
        display: RawDisplayHandle,
        request_validation: bool,
    ) -> Result<Self, RenderError> {
        let entry = unsafe { Entry::load() }?;

        let validation = request_validation && Self::validation_layer_available(&entry);
        if request_validation && !validation {
            log::warn!(
                "{} not installed, continuing without validation",
                VALIDATION_LAYER.to_string_lossy()
            );
        }

        let app_name = std::ffi::CString::new(app_name).unwrap_or_else(|_| c"Vulkan".to_owned());
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"No Engine")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        // Window-system surface extensions for this platform
        let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display)
            .map_err(RenderError::vulkan("vkEnumerateInstanceExtensionProperties"))?
            .to_vec();

        if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        // MoltenVK is only listed when portability enumeration is requested
        #[cfg(target_os = "macos")]
        let flags = {
            extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
            extensions.push(ash::khr::get_physical_device_properties2::NAME.as_ptr());
            vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
        };
        #[cfg(not(target_os = "macos"))]
        let flags = vk::InstanceCreateFlags::empty();

        let layer_names = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .flags(flags)
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(RenderError::vulkan("vkCreateInstance"))?;

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        log::info!(
            "Vulkan instance created ({} extensions, validation {})",
            extensions.len(),
            if validation { "on" } else { "off" }
        );

        Ok(Self {
            entry,
            instance,
            surface_loader,
            validation,
        })
    }

    fn validation_layer_available(entry: &Entry) -> bool {
        let layers = match unsafe { entry.enumerate_instance_layer_properties() } {
            Ok(layers) => layers,
            Err(e) => {
                log::warn!("Could not enumerate instance layers: {}", e);
                return false;
            }
        };

        layers
            .iter()
            .filter_map(|layer| layer.layer_name_as_c_str().ok())
            .any(|name| name == VALIDATION_LAYER)
    }

    /// Create the drawable surface for a native window
    pub fn create_surface(
        &self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<vk::SurfaceKHR, RenderError> {
        unsafe { ash_window::create_surface(&self.entry, &self.instance, display, window, None) }
            .map_err(RenderError::surface("vkCreateSurfaceKHR"))
    }

    pub fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        unsafe { self.surface_loader.destroy_surface(surface, None) };
    }

    pub fn destroy(&self) {
        unsafe { self.instance.destroy_instance(None) };
    }
}

/// Validation message sink, only constructed when validation is enabled
pub struct DebugHook {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugHook {
    pub fn new(instance: &VulkanInstance) -> Result<Self, RenderError> {
        let loader = ash::ext::debug_utils::Instance::new(&instance.entry, &instance.instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .map_err(RenderError::vulkan("vkCreateDebugUtilsMessengerEXT"))?;

        Ok(Self { loader, messenger })
    }

    pub fn destroy(&self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None)
        };
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || unsafe { (*p_callback_data).p_message.is_null() } {
        return vk::FALSE;
    }
    let message = unsafe { CStr::from_ptr((*p_callback_data).p_message) };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
