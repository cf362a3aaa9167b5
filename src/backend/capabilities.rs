// Capability probing - read-only driver queries
//
// Everything the selector and the swapchain negotiation need to know about a GPU
// is captured once into a PhysicalDeviceCandidate snapshot. The trait keeps the
// selection logic independent of a live driver.

use ash::vk;
use std::ffi::CString;

use crate::error::RenderError;

/// Capabilities of one queue family relative to the target surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilySupport {
    pub index: u32,
    pub supports_graphics: bool,
    pub supports_present: bool,
}

/// What the surface accepts when paired with a given device
#[derive(Debug, Clone)]
pub struct SurfaceCapabilities {
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub min_image_count: u32,
    /// 0 means no upper bound
    pub max_image_count: u32,
    pub current_extent: vk::Extent2D,
    pub min_extent: vk::Extent2D,
    pub max_extent: vk::Extent2D,
    pub current_transform: vk::SurfaceTransformFlagsKHR,
    pub supported_composite_alpha: vk::CompositeAlphaFlagsKHR,
}

impl SurfaceCapabilities {
    pub fn from_vk(
        caps: &vk::SurfaceCapabilitiesKHR,
        formats: Vec<vk::SurfaceFormatKHR>,
        present_modes: Vec<vk::PresentModeKHR>,
    ) -> Self {
        Self {
            formats,
            present_modes,
            min_image_count: caps.min_image_count,
            max_image_count: caps.max_image_count,
            current_extent: caps.current_extent,
            min_extent: caps.min_image_extent,
            max_extent: caps.max_image_extent,
            current_transform: caps.current_transform,
            supported_composite_alpha: caps.supported_composite_alpha,
        }
    }

    /// At least one format and one present mode to build a swapchain from
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Immutable capability snapshot of one physical device
#[derive(Debug, Clone)]
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub extensions: Vec<CString>,
    pub queue_families: Vec<QueueFamilySupport>,
    pub surface: SurfaceCapabilities,
}

impl PhysicalDeviceCandidate {
    pub fn supports_extension(&self, name: &std::ffi::CStr) -> bool {
        self.extensions.iter().any(|ext| ext.as_c_str() == name)
    }
}

/// Read-only queries against the driver. Failures are fatal: there is no way to
/// continue without device information.
pub trait CapabilitySource {
    fn enumerate_devices(&self) -> Result<Vec<vk::PhysicalDevice>, RenderError>;

    fn device_name(&self, device: vk::PhysicalDevice) -> String;

    fn extensions_of(&self, device: vk::PhysicalDevice) -> Result<Vec<CString>, RenderError>;

    fn queue_families_of(
        &self,
        device: vk::PhysicalDevice,
    ) -> Result<Vec<QueueFamilySupport>, RenderError>;

    fn surface_capabilities_of(
        &self,
        device: vk::PhysicalDevice,
    ) -> Result<SurfaceCapabilities, RenderError>;

    fn snapshot(&self, device: vk::PhysicalDevice) -> Result<PhysicalDeviceCandidate, RenderError> {
        Ok(PhysicalDeviceCandidate {
            handle: device,
            name: self.device_name(device),
            extensions: self.extensions_of(device)?,
            queue_families: self.queue_families_of(device)?,
            surface: self.surface_capabilities_of(device)?,
        })
    }

    /// Snapshot every device, in driver enumeration order
    fn list_candidate_devices(&self) -> Result<Vec<PhysicalDeviceCandidate>, RenderError> {
        self.enumerate_devices()?
            .into_iter()
            .map(|device| self.snapshot(device))
            .collect()
    }
}

/// Capability source backed by a live instance and the target surface
pub struct VulkanCapabilities<'a> {
    instance: &'a ash::Instance,
    surface_loader: &'a ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
}

impl<'a> VulkanCapabilities<'a> {
    pub fn new(
        instance: &'a ash::Instance,
        surface_loader: &'a ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Self {
        Self {
            instance,
            surface_loader,
            surface,
        }
    }
}

impl CapabilitySource for VulkanCapabilities<'_> {
    fn enumerate_devices(&self) -> Result<Vec<vk::PhysicalDevice>, RenderError> {
        unsafe { self.instance.enumerate_physical_devices() }
            .map_err(RenderError::query("vkEnumeratePhysicalDevices"))
    }

    fn device_name(&self, device: vk::PhysicalDevice) -> String {
        let props = unsafe { self.instance.get_physical_device_properties(device) };
        props
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed device>".to_string())
    }

    fn extensions_of(&self, device: vk::PhysicalDevice) -> Result<Vec<CString>, RenderError> {
        let props = unsafe { self.instance.enumerate_device_extension_properties(device) }
            .map_err(RenderError::query("vkEnumerateDeviceExtensionProperties"))?;

        Ok(props
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .map(|name| name.to_owned())
            .collect())
    }

    fn queue_families_of(
        &self,
        device: vk::PhysicalDevice,
    ) -> Result<Vec<QueueFamilySupport>, RenderError> {
        let families = unsafe {
            self.instance
                .get_physical_device_queue_family_properties(device)
        };

        families
            .iter()
            .enumerate()
            .map(|(index, props)| {
                let index = index as u32;
                let supports_present = unsafe {
                    self.surface_loader.get_physical_device_surface_support(
                        device,
                        index,
                        self.surface,
                    )
                }
                .map_err(RenderError::query("vkGetPhysicalDeviceSurfaceSupportKHR"))?;

                Ok(QueueFamilySupport {
                    index,
                    supports_graphics: props.queue_count > 0
                        && props.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                    supports_present,
                })
            })
            .collect()
    }

    fn surface_capabilities_of(
        &self,
        device: vk::PhysicalDevice,
    ) -> Result<SurfaceCapabilities, RenderError> {
        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(device, self.surface)
        }
        .map_err(RenderError::query("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?;

        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(device, self.surface)
        }
        .map_err(RenderError::query("vkGetPhysicalDeviceSurfaceFormatsKHR"))?;

        let present_modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(device, self.surface)
        }
        .map_err(RenderError::query("vkGetPhysicalDeviceSurfacePresentModesKHR"))?;

        log::debug!(
            "Surface support: {} formats, {} present modes, image count {}-{}",
            formats.len(),
            present_modes.len(),
            caps.min_image_count,
            if caps.max_image_count == 0 {
                "unbounded".to_string()
            } else {
                caps.max_image_count.to_string()
            }
        );

        Ok(SurfaceCapabilities::from_vk(&caps, formats, present_modes))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::RefCell;

    pub(crate) fn surface_caps() -> SurfaceCapabilities {
        SurfaceCapabilities {
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D { width: 800, height: 600 },
            min_extent: vk::Extent2D { width: 1, height: 1 },
            max_extent: vk::Extent2D { width: 4096, height: 4096 },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        }
    }

    struct FakeCapabilities {
        devices: Vec<u64>,
        queried: RefCell<Vec<u64>>,
    }

    impl CapabilitySource for FakeCapabilities {
        fn enumerate_devices(&self) -> Result<Vec<vk::PhysicalDevice>, RenderError> {
            Ok(self.devices.iter().map(|&raw| vk::PhysicalDevice::from_raw(raw)).collect())
        }

        fn device_name(&self, device: vk::PhysicalDevice) -> String {
            format!("gpu-{}", device.as_raw())
        }

        fn extensions_of(&self, _device: vk::PhysicalDevice) -> Result<Vec<CString>, RenderError> {
            Ok(vec![ash::khr::swapchain::NAME.to_owned()])
        }

        fn queue_families_of(
            &self,
            device: vk::PhysicalDevice,
        ) -> Result<Vec<QueueFamilySupport>, RenderError> {
            self.queried.borrow_mut().push(device.as_raw());
            Ok(vec![QueueFamilySupport {
                index: 0,
                supports_graphics: true,
                supports_present: true,
            }])
        }

        fn surface_capabilities_of(
            &self,
            device: vk::PhysicalDevice,
        ) -> Result<SurfaceCapabilities, RenderError> {
            if device.as_raw() == 99 {
                return Err(RenderError::query("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")(
                    vk::Result::ERROR_SURFACE_LOST_KHR,
                ));
            }
            Ok(surface_caps())
        }
    }

    #[test]
    fn candidates_keep_enumeration_order() {
        let source = FakeCapabilities {
            devices: vec![3, 1, 2],
            queried: RefCell::new(Vec::new()),
        };

        let candidates = source.list_candidate_devices().unwrap();
        let names: Vec<_> = candidates.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["gpu-3", "gpu-1", "gpu-2"]);
        assert_eq!(*source.queried.borrow(), vec![3, 1, 2]);
        assert!(candidates[0].supports_extension(ash::khr::swapchain::NAME));
    }

    #[test]
    fn query_failure_is_reported_as_device_query_error() {
        let source = FakeCapabilities {
            devices: vec![1, 99],
            queried: RefCell::new(Vec::new()),
        };

        match source.list_candidate_devices() {
            Err(RenderError::DeviceQuery { result, .. }) => {
                assert_eq!(result, vk::Result::ERROR_SURFACE_LOST_KHR)
            }
            other => panic!("expected DeviceQuery, got {other:?}"),
        }
    }

    #[test]
    fn adequacy_requires_formats_and_present_modes() {
        let mut caps = surface_caps();
        assert!(caps.is_adequate());
        caps.present_modes.clear();
        assert!(!caps.is_adequate());
    }
}
