// Adapter selection - which GPU and which queue families
//
// Pure decision logic over a description of the available adapters, shared
// by the Vulkan backend (which fills AdapterInfo from the driver) and the
// simulated device.

use ash::vk;

use crate::error::{EngineError, EngineResult};

/// Capabilities of one queue family relevant to the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub graphics: bool,
    /// Can present to the window surface
    pub present: bool,
}

/// Device features the engine cannot run without.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdapterFeatures {
    pub dynamic_rendering: bool,
    pub buffer_device_address: bool,
    pub sampler_anisotropy: bool,
}

impl AdapterFeatures {
    pub const ALL: AdapterFeatures = AdapterFeatures {
        dynamic_rendering: true,
        buffer_device_address: true,
        sampler_anisotropy: true,
    };

    /// Name of the first missing feature, if any.
    pub fn first_missing(&self) -> Option<&'static str> {
        if !self.dynamic_rendering {
            Some("dynamicRendering")
        } else if !self.buffer_device_address {
            Some("bufferDeviceAddress")
        } else if !self.sampler_anisotropy {
            Some("samplerAnisotropy")
        } else {
            None
        }
    }
}

#[derive(Clone, Debug)]
pub struct AdapterInfo {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: Vec<QueueFamilyInfo>,
    pub features: AdapterFeatures,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// First graphics family and first present family; they may be the same.
    pub fn find(families: &[QueueFamilyInfo]) -> EngineResult<Self> {
        let graphics = families
            .iter()
            .position(|f| f.graphics)
            .ok_or(EngineError::QueueFamilyMissing("graphics"))?;
        let present = families
            .iter()
            .position(|f| f.present)
            .ok_or(EngineError::QueueFamilyMissing("presentation"))?;

        Ok(Self {
            graphics: graphics as u32,
            present: present as u32,
        })
    }

    pub fn shared(&self) -> bool {
        self.graphics == self.present
    }

    /// One entry per distinct family, for queue create infos.
    pub fn unique(&self) -> Vec<u32> {
        if self.shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// The chosen adapter and its queues.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdapterChoice {
    pub index: usize,
    pub queues: QueueFamilyIndices,
}

/// First discrete GPU, else the first adapter with a warning. The chosen
/// adapter must expose the required queues and features; there is no
/// second pick.
pub fn select_adapter(adapters: &[AdapterInfo]) -> EngineResult<AdapterChoice> {
    let index = match adapters
        .iter()
        .position(|a| a.device_type == vk::PhysicalDeviceType::DISCRETE_GPU)
    {
        Some(index) => index,
        None => {
            let first = adapters.first().ok_or(EngineError::NoAdapter)?;
            log::warn!("No discrete GPU found, falling back to {}", first.name);
            0
        }
    };

    let adapter = &adapters[index];
    let queues = QueueFamilyIndices::find(&adapter.queue_families)?;
    if let Some(missing) = adapter.features.first_missing() {
        return Err(EngineError::MissingFeature(missing));
    }

    log::info!(
        "Selected GPU: {} ({:?}), graphics queue {}, present queue {}",
        adapter.name,
        adapter.device_type,
        queues.graphics,
        queues.present
    );

    Ok(AdapterChoice { index, queues })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTH: QueueFamilyInfo = QueueFamilyInfo { graphics: true, present: true };

    fn adapter(name: &str, device_type: vk::PhysicalDeviceType) -> AdapterInfo {
        AdapterInfo {
            name: name.to_string(),
            device_type,
            queue_families: vec![BOTH],
            features: AdapterFeatures::ALL,
        }
    }

    #[test]
    fn discrete_gpu_wins_over_earlier_integrated() {
        let adapters = [
            adapter("igpu", vk::PhysicalDeviceType::INTEGRATED_GPU),
            adapter("dgpu", vk::PhysicalDeviceType::DISCRETE_GPU),
        ];

        assert_eq!(select_adapter(&adapters).unwrap().index, 1);
    }

    #[test]
    fn falls_back_to_first_adapter() {
        let adapters = [
            adapter("cpu", vk::PhysicalDeviceType::CPU),
            adapter("igpu", vk::PhysicalDeviceType::INTEGRATED_GPU),
        ];

        assert_eq!(select_adapter(&adapters).unwrap().index, 0);
    }

    #[test]
    fn no_adapters_is_fatal() {
        assert!(matches!(select_adapter(&[]), Err(EngineError::NoAdapter)));
    }

    #[test]
    fn missing_feature_is_fatal() {
        let mut dgpu = adapter("dgpu", vk::PhysicalDeviceType::DISCRETE_GPU);
        dgpu.features.sampler_anisotropy = false;

        assert!(matches!(
            select_adapter(&[dgpu]),
            Err(EngineError::MissingFeature("samplerAnisotropy"))
        ));
    }

    #[test]
    fn separate_graphics_and_present_families() {
        let families = [
            QueueFamilyInfo { graphics: false, present: false },
            QueueFamilyInfo { graphics: true, present: false },
            QueueFamilyInfo { graphics: false, present: true },
        ];

        let queues = QueueFamilyIndices::find(&families).unwrap();

        assert_eq!(queues, QueueFamilyIndices { graphics: 1, present: 2 });
        assert!(!queues.shared());
        assert_eq!(queues.unique(), vec![1, 2]);
    }

    #[test]
    fn missing_present_family_is_fatal() {
        let families = [QueueFamilyInfo { graphics: true, present: false }];

        assert!(matches!(
            QueueFamilyIndices::find(&families),
            Err(EngineError::QueueFamilyMissing("presentation"))
        ));
    }
}
