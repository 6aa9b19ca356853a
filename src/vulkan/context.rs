use ash::vk;
use std::sync::Arc;

use crate::sync::QueueFamilies;
use crate::{CullError, Result};

/// Device features the culling pipeline cannot run without.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequiredFeatures {
    pub draw_indirect_count: bool,
    pub sampler_filter_minmax: bool,
    pub multi_draw_indirect: bool,
}

impl RequiredFeatures {
    /// Queries the physical device.
    ///
    /// # Safety
    /// `physical_device` must belong to `instance`.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut vulkan12);
        instance.get_physical_device_features2(physical_device, &mut features2);
        let multi_draw_indirect = features2.features.multi_draw_indirect == vk::TRUE;

        Self {
            draw_indirect_count: vulkan12.draw_indirect_count == vk::TRUE,
            sampler_filter_minmax: vulkan12.sampler_filter_minmax == vk::TRUE,
            multi_draw_indirect,
        }
    }

    /// Fails on the first missing feature.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.draw_indirect_count, "drawIndirectCount"),
            (self.sampler_filter_minmax, "samplerFilterMinmax"),
            (self.multi_draw_indirect, "multiDrawIndirect"),
        ];
        match checks.iter().find(|(supported, _)| !supported) {
            Some((_, name)) => Err(CullError::MissingFeature((*name).to_string())),
            None => Ok(()),
        }
    }
}

/// Caller-owned Vulkan handles plus the two queues the culling frame runs on.
pub struct VulkanContext {
    pub instance: ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: Arc<ash::Device>,
    pub graphics_queue: vk::Queue,
    pub compute_queue: vk::Queue,
    pub families: QueueFamilies,
}

impl VulkanContext {
    /// Wraps existing handles after checking the required features.
    ///
    /// # Safety
    /// `device` must have been created from `physical_device` with the
    /// required features enabled and at least one queue in each family. The
    /// caller keeps the instance and device alive for the lifetime of this
    /// context and everything created from it.
    pub unsafe fn new(
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: Arc<ash::Device>,
        families: QueueFamilies,
    ) -> Result<Self> {
        RequiredFeatures::query(&instance, physical_device).validate()?;

        let graphics_queue = device.get_device_queue(families.graphics, 0);
        let compute_queue = device.get_device_queue(families.compute, 0);

        log::info!(
            "Vulkan context: graphics family {}, compute family {}{}",
            families.graphics,
            families.compute,
            if families.is_shared() { " (shared)" } else { "" }
        );

        Ok(Self {
            instance,
            physical_device,
            device,
            graphics_queue,
            compute_queue,
            families,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_feature_is_named() {
        let features = RequiredFeatures {
            draw_indirect_count: true,
            sampler_filter_minmax: false,
            multi_draw_indirect: true,
        };
        match features.validate() {
            Err(CullError::MissingFeature(name)) => assert_eq!(name, "samplerFilterMinmax"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_all_features_present() {
        let features = RequiredFeatures {
            draw_indirect_count: true,
            sampler_filter_minmax: true,
            multi_draw_indirect: true,
        };
        assert!(features.validate().is_ok());
    }
}
