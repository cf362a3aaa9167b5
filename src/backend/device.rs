// Vulkan Device - GPU selection and logical device
//
// Responsibilities:
// - First-fit physical device selection over queried candidates
// - Resolve the Graphics and Present queue roles (they may share a family)
// - Logical device + queue creation

use ash::vk;
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr};

use super::instance::VALIDATION_LAYER;
use super::capabilities::{PhysicalDeviceCandidate, QueueFamilySupport};
use crate::error::RenderError;

/// Device extensions the session cannot run without
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [ash::khr::swapchain::NAME];

/// Logical role a queue plays in the frame loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRole {
    Graphics,
    Present,
}

/// Queue family index resolved for each role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Scan families in index order and keep the first match for each role.
    /// Returns `None` if either role stays unresolved.
    pub fn resolve(families: &[QueueFamilySupport]) -> Option<Self> {
        let mut graphics = None;
        let mut present = None;

        for family in families {
            if graphics.is_none() && family.supports_graphics {
                graphics = Some(family.index);
            }
            if present.is_none() && family.supports_present {
                present = Some(family.index);
            }
            if graphics.is_some() && present.is_some() {
                break;
            }
        }

        Some(Self {
            graphics: graphics?,
            present: present?,
        })
    }

    pub fn family(&self, role: QueueRole) -> u32 {
        match role {
            QueueRole::Graphics => self.graphics,
            QueueRole::Present => self.present,
        }
    }

    /// Both roles served by one family
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct families, ascending; one queue create info per entry
    pub fn unique(&self) -> Vec<u32> {
        [self.graphics, self.present]
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Why a candidate was passed over
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("no graphics-capable queue family")]
    NoGraphicsQueue,
    #[error("no queue family can present to the surface")]
    NoPresentQueue,
    #[error("missing device extension {0}")]
    MissingExtension(String),
    #[error("surface offers no formats or no present modes")]
    InadequateSurface,
}

/// Check one candidate against the selection rules
pub fn evaluate_candidate(
    candidate: &PhysicalDeviceCandidate,
    required_extensions: &[&CStr],
) -> Result<QueueFamilyIndices, Rejection> {
    let families = &candidate.queue_families;
    if !families.iter().any(|f| f.supports_graphics) {
        return Err(Rejection::NoGraphicsQueue);
    }
    if !families.iter().any(|f| f.supports_present) {
        return Err(Rejection::NoPresentQueue);
    }

    if let Some(missing) = required_extensions
        .iter()
        .find(|ext| !candidate.supports_extension(ext))
    {
        return Err(Rejection::MissingExtension(missing.to_string_lossy().into_owned()));
    }

    if !candidate.surface.is_adequate() {
        return Err(Rejection::InadequateSurface);
    }

    QueueFamilyIndices::resolve(families).ok_or(Rejection::NoGraphicsQueue)
}

/// First-fit selection: the first candidate in enumeration order that passes every
/// check wins. There is no scoring between GPUs.
pub fn select_device<'c>(
    candidates: &'c [PhysicalDeviceCandidate],
    required_extensions: &[&CStr],
) -> Result<(&'c PhysicalDeviceCandidate, QueueFamilyIndices), RenderError> {
    for candidate in candidates {
        match evaluate_candidate(candidate, required_extensions) {
            Ok(families) => {
                log::info!(
                    "Selected GPU: {} (graphics family {}, present family {})",
                    candidate.name,
                    families.graphics,
                    families.present
                );
                return Ok((candidate, families));
            }
            Err(reason) => {
                log::debug!("Skipping GPU {}: {}", candidate.name, reason);
            }
        }
    }

    Err(RenderError::NoSuitableDevice {
        candidates: candidates.len(),
    })
}

/// Queue handles for each role; identical handles when the roles share a family
#[derive(Debug, Clone, Copy)]
pub struct QueueRoleAssignment {
    pub families: QueueFamilyIndices,
    pub graphics: vk::Queue,
    pub present: vk::Queue,
}

impl QueueRoleAssignment {
    pub fn family(&self, role: QueueRole) -> u32 {
        self.families.family(role)
    }

    pub fn queue(&self, role: QueueRole) -> vk::Queue {
        match role {
            QueueRole::Graphics => self.graphics,
            QueueRole::Present => self.present,
        }
    }
}

/// Logical device plus the queues resolved for it
pub struct VulkanDevice {
    pub device: ash::Device,
    pub name: String,
    pub queues: QueueRoleAssignment,
}

impl VulkanDevice {
    pub fn new(
        instance: &ash::Instance,
        candidate: &PhysicalDeviceCandidate,
        families: QueueFamilyIndices,
        enable_validation: bool,
    ) -> Result<Self, RenderError> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let mut extensions: Vec<*const c_char> = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();

        // Must be enabled whenever the implementation advertises it (MoltenVK)
        if candidate.supports_extension(ash::khr::portability_subset::NAME) {
            extensions.push(ash::khr::portability_subset::NAME.as_ptr());
        }

        // Device layers are ignored by modern loaders; older ones still look at them
        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let features = vk::PhysicalDeviceFeatures::default();

        #[allow(deprecated)]
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(candidate.handle, &create_info, None) }
            .map_err(RenderError::vulkan("vkCreateDevice"))?;

        let queues = unsafe {
            QueueRoleAssignment {
                families,
                graphics: device.get_device_queue(families.graphics, 0),
                present: device.get_device_queue(families.present, 0),
            }
        };

        log::info!(
            "Logical device ready on {} ({} queue famil{})",
            candidate.name,
            queue_create_infos.len(),
            if families.is_shared() { "y" } else { "ies" }
        );

        Ok(Self {
            device,
            name: candidate.name.clone(),
            queues,
        })
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<(), RenderError> {
        unsafe { self.device.device_wait_idle() }.map_err(|result| match result {
            vk::Result::ERROR_DEVICE_LOST => {
                RenderError::DeviceLost("device lost while draining".to_string())
            }
            result => RenderError::Vulkan {
                operation: "vkDeviceWaitIdle",
                result,
            },
        })
    }

    pub fn destroy(&self) {
        unsafe { self.device.destroy_device(None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::capabilities::tests::surface_caps;
    use ash::vk::Handle;
    use std::ffi::CString;

    fn family(index: u32, graphics: bool, present: bool) -> QueueFamilySupport {
        QueueFamilySupport {
            index,
            supports_graphics: graphics,
            supports_present: present,
        }
    }

    fn candidate(raw: u64, families: Vec<QueueFamilySupport>) -> PhysicalDeviceCandidate {
        PhysicalDeviceCandidate {
            handle: vk::PhysicalDevice::from_raw(raw),
            name: format!("gpu-{raw}"),
            extensions: vec![ash::khr::swapchain::NAME.to_owned()],
            queue_families: families,
            surface: surface_caps(),
        }
    }

    #[test]
    fn roles_resolve_to_first_matching_family() {
        let families = [
            family(0, false, false),
            family(1, true, false),
            family(2, true, true),
            family(3, false, true),
        ];
        let indices = QueueFamilyIndices::resolve(&families).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 1, present: 2 });
        assert!(!indices.is_shared());
        assert_eq!(indices.unique(), vec![1, 2]);
        assert_eq!(indices.family(QueueRole::Present), 2);
    }

    #[test]
    fn roles_may_collapse_onto_one_family() {
        let families = [family(0, true, true), family(1, true, true)];
        let indices = QueueFamilyIndices::resolve(&families).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 0, present: 0 });
        assert!(indices.is_shared());
        assert_eq!(indices.unique(), vec![0]);
    }

    #[test]
    fn unresolved_role_yields_none() {
        assert!(QueueFamilyIndices::resolve(&[family(0, true, false)]).is_none());
        assert!(QueueFamilyIndices::resolve(&[family(0, false, true)]).is_none());
        assert!(QueueFamilyIndices::resolve(&[]).is_none());
    }

    #[test]
    fn selection_is_first_fit_not_best_fit() {
        let candidates = [
            candidate(1, vec![family(0, true, false)]),
            candidate(2, vec![family(0, true, false), family(1, false, true)]),
            candidate(3, vec![family(0, true, true)]),
        ];

        let (chosen, families) = select_device(&candidates, &REQUIRED_DEVICE_EXTENSIONS).unwrap();
        assert_eq!(chosen.handle.as_raw(), 2);
        assert_eq!(families, QueueFamilyIndices { graphics: 0, present: 1 });
    }

    #[test]
    fn missing_extension_rejects_candidate() {
        let mut no_swapchain = candidate(1, vec![family(0, true, true)]);
        no_swapchain.extensions = vec![CString::new("VK_KHR_maintenance1").unwrap()];
        assert_eq!(
            evaluate_candidate(&no_swapchain, &REQUIRED_DEVICE_EXTENSIONS),
            Err(Rejection::MissingExtension("VK_KHR_swapchain".to_string()))
        );

        let good = candidate(2, vec![family(0, true, true)]);
        let candidates = [no_swapchain, good];
        let (chosen, _) = select_device(&candidates, &REQUIRED_DEVICE_EXTENSIONS).unwrap();
        assert_eq!(chosen.handle.as_raw(), 2);
    }

    #[test]
    fn empty_surface_lists_reject_candidate() {
        let mut no_formats = candidate(1, vec![family(0, true, true)]);
        no_formats.surface.formats.clear();
        assert_eq!(
            evaluate_candidate(&no_formats, &REQUIRED_DEVICE_EXTENSIONS),
            Err(Rejection::InadequateSurface)
        );

        let mut no_modes = candidate(2, vec![family(0, true, true)]);
        no_modes.surface.present_modes.clear();
        assert_eq!(
            evaluate_candidate(&no_modes, &REQUIRED_DEVICE_EXTENSIONS),
            Err(Rejection::InadequateSurface)
        );
    }

    #[test]
    fn no_candidate_is_a_fatal_selection_error() {
        let candidates = [
            candidate(1, vec![family(0, false, true)]),
            candidate(2, vec![family(0, true, false)]),
        ];
        match select_device(&candidates, &REQUIRED_DEVICE_EXTENSIONS) {
            Err(RenderError::NoSuitableDevice { candidates }) => assert_eq!(candidates, 2),
            other => panic!("expected NoSuitableDevice, got {:?}", other.map(|(c, _)| c.handle)),
        }

        assert!(matches!(
            select_device(&[], &REQUIRED_DEVICE_EXTENSIONS),
            Err(RenderError::NoSuitableDevice { candidates: 0 })
        ));
    }
}
