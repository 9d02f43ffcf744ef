use std::hash::Hash;
use ash::vk;

pub struct Queue {
    pub family: QueueFamily,
    pub handle: vk::Queue,
}

impl Queue {
    pub fn new(
        family: QueueFamily,
        handle: vk::Queue,
    ) -> Self {
        Self {
            family,
            handle,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueFamily {
    pub index: u32,
    pub properties: vk::QueueFamilyProperties,
    supports_present: bool,
}

impl QueueFamily {
    pub fn new(
        index: u32,
        properties: vk::QueueFamilyProperties,
        supports_present: bool,
    ) -> Self {
        Self {
            index,
            properties,
            supports_present,
        }
    }

    pub fn supports_present(&self) -> bool {
        self.supports_present
    }

    pub fn supports_graphics(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::GRAPHICS)
    }
}

impl PartialEq for QueueFamily {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for QueueFamily {}

impl Hash for QueueFamily {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

/// Pick the graphics and present family indices from `(flags, supports_present)` per family.
/// A family that can do both is preferred so the swapchain can stay exclusive.
pub fn pick_queue_families(
    families: &[(vk::QueueFlags, bool)],
) -> (Option<u32>, Option<u32>) {
    let shared = families
        .iter()
        .position(|(flags, present)| flags.contains(vk::QueueFlags::GRAPHICS) && *present);
    if let Some(index) = shared {
        return (Some(index as u32), Some(index as u32));
    }

    let graphics = families
        .iter()
        .position(|(flags, _)| flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|i| i as u32);
    let present = families
        .iter()
        .position(|(_, present)| *present)
        .map(|i| i as u32);
    (graphics, present)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_shared_family() {
        let families = [
            (vk::QueueFlags::GRAPHICS, false),
            (vk::QueueFlags::TRANSFER, true),
            (vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, true),
        ];
        assert_eq!(pick_queue_families(&families), (Some(2), Some(2)));
    }

    #[test]
    fn test_split_families() {
        let families = [
            (vk::QueueFlags::TRANSFER, true),
            (vk::QueueFlags::GRAPHICS, false),
        ];
        assert_eq!(pick_queue_families(&families), (Some(1), Some(0)));
    }

    #[test]
    fn test_missing_present() {
        let families = [(vk::QueueFlags::GRAPHICS, false)];
        assert_eq!(pick_queue_families(&families), (Some(0), None));
    }

    #[test]
    fn test_queue_family_equality_by_index() {
        let props = vk::QueueFamilyProperties::default();
        assert_eq!(QueueFamily::new(1, props, true), QueueFamily::new(1, props, false));
        assert_ne!(QueueFamily::new(1, props, true), QueueFamily::new(2, props, true));
    }
}
