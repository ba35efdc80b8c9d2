// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers (when available)
// - Window surface
// - Physical device selection (prefer discrete GPU)
// - Logical device + graphics/present queues
// - Memory allocator setup

use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocation, Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;

use super::surface;
use crate::adapter::{self, AdapterFeatures, AdapterInfo, QueueFamilyIndices, QueueFamilyInfo};
use crate::error::{EngineError, EngineResult};
use crate::gpu::{DeviceLimits, GpuHandle};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance-level options.
#[derive(Clone, Debug)]
pub struct DeviceSettings {
    pub app_name: String,
    /// Enable the Khronos validation layer if it is installed
    pub validation: bool,
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Memory (dropped explicitly before the device)
    pub(super) allocator: ManuallyDrop<Mutex<Allocator>>,
    pub(super) allocations: Mutex<HashMap<GpuHandle, Allocation>>,

    // Device
    pub(super) device: ash::Device,
    pub(super) swapchain_loader: khr::Swapchain,
    pub(super) graphics_queue: vk::Queue,
    pub(super) present_queue: vk::Queue,
    pub(super) queues: QueueFamilyIndices,
    pub(super) physical_device: vk::PhysicalDevice,
    pub(super) adapter_name: String,
    pub(super) limits: DeviceLimits,

    // Surface
    pub(super) surface_loader: khr::Surface,
    pub(super) surface: vk::SurfaceKHR,

    // Instance
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    instance: ash::Instance,
    _entry: Entry,
}

impl VulkanDevice {
    /// Bring up everything between the Vulkan loader and a usable device for
    /// `window`.
    ///
    /// Fatal: no adapter, no graphics or present queue family, a missing
    /// required feature. Objects created before the failure are destroyed.
    pub fn new<W>(window: &W, settings: &DeviceSettings) -> EngineResult<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        log::info!("Creating Vulkan device: {}", settings.app_name);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Load Vulkan library
        // ─────────────────────────────────────────────────────────────────────
        let entry = unsafe { Entry::load() }?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Instance (+ debug messenger when validation is on)
        // ─────────────────────────────────────────────────────────────────────
        let display = window
            .display_handle()
            .map_err(|e| EngineError::Surface(e.to_string()))?
            .as_raw();
        let raw_window = window
            .window_handle()
            .map_err(|e| EngineError::Surface(e.to_string()))?
            .as_raw();

        let validation = settings.validation && Self::validation_layer_available(&entry)?;
        let instance = Self::create_instance(&entry, &settings.app_name, display, validation)?;
        let debug_utils = if validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(debug) => Some(debug),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        // Everything after this point unwinds through `Partial` on failure
        let mut partial = Partial {
            armed: true,
            instance: instance.clone(),
            debug_utils: debug_utils.clone(),
            surface: None,
            device: None,
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Surface
        // ─────────────────────────────────────────────────────────────────────
        let surface_loader = khr::Surface::new(&entry, &instance);
        let surface = unsafe { surface::create_surface(&entry, &instance, display, raw_window) }?;
        partial.surface = Some((surface_loader.clone(), surface));

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Pick physical device (GPU)
        // ─────────────────────────────────────────────────────────────────────
        let physical_devices = unsafe { instance.enumerate_physical_devices() }?;
        let adapters = physical_devices
            .iter()
            .map(|&pd| Self::describe_adapter(&instance, &surface_loader, surface, pd))
            .collect::<EngineResult<Vec<_>>>()?;
        let choice = adapter::select_adapter(&adapters)?;
        let physical_device = physical_devices[choice.index];

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Create logical device
        // ─────────────────────────────────────────────────────────────────────
        let device = Self::create_logical_device(&instance, physical_device, choice.queues)?;
        partial.device = Some(device.clone());
        let graphics_queue = unsafe { device.get_device_queue(choice.queues.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(choice.queues.present, 0) };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 6: Create memory allocator
        // ─────────────────────────────────────────────────────────────────────
        let allocator = Self::create_allocator(&instance, physical_device, &device)?;

        partial.disarm();
        let swapchain_loader = khr::Swapchain::new(&instance, &device);

        Ok(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            allocations: Mutex::new(HashMap::new()),
            device,
            swapchain_loader,
            graphics_queue,
            present_queue,
            queues: choice.queues,
            physical_device,
            adapter_name: adapters[choice.index].name.clone(),
            limits: DeviceLimits {
                max_sampler_anisotropy: properties.limits.max_sampler_anisotropy,
            },
            surface_loader,
            surface,
            debug_utils,
            instance,
            _entry: entry,
        })
    }

    fn validation_layer_available(entry: &Entry) -> EngineResult<bool> {
        let layers = entry.enumerate_instance_layer_properties()?;
        let available = layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);
        if !available {
            log::warn!("Validation requested but {:?} is not installed, continuing without it", VALIDATION_LAYER);
        }
        Ok(available)
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        display: raw_window_handle::RawDisplayHandle,
        enable_validation: bool,
    ) -> EngineResult<ash::Instance> {
        let app_name_cstr = CString::new(app_name).unwrap_or_default();
        let engine_name = c"vk-engine";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        // Surface extensions for this platform
        let mut extensions = surface::required_extensions(display)?;
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }?;
        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> EngineResult<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

        Ok((debug_utils, messenger))
    }

    /// Translate one physical device into the driver-independent description
    /// adapter selection works on.
    fn describe_adapter(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> EngineResult<AdapterInfo> {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let mut queue_families = Vec::with_capacity(families.len());
        for (index, family) in families.iter().enumerate() {
            let present = unsafe {
                surface_loader.get_physical_device_surface_support(physical_device, index as u32, surface)
            }?;
            queue_families.push(QueueFamilyInfo {
                graphics: family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                present,
            });
        }

        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut features = vk::PhysicalDeviceFeatures2::builder()
            .push_next(&mut features12)
            .push_next(&mut features13);
        unsafe { instance.get_physical_device_features2(physical_device, &mut features) };
        let sampler_anisotropy = features.features.sampler_anisotropy == vk::TRUE;

        log::debug!("Found adapter {} ({:?})", name, properties.device_type);

        Ok(AdapterInfo {
            name,
            device_type: properties.device_type,
            queue_families,
            features: AdapterFeatures {
                dynamic_rendering: features13.dynamic_rendering == vk::TRUE,
                buffer_device_address: features12.buffer_device_address == vk::TRUE,
                sampler_anisotropy,
            },
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queues: QueueFamilyIndices,
    ) -> EngineResult<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queues
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        // Dynamic rendering is core in 1.3, only the swapchain is an extension
        let extensions = [khr::Swapchain::name().as_ptr()];

        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            ..Default::default()
        };
        let mut features12 = vk::PhysicalDeviceVulkan12Features {
            buffer_device_address: vk::TRUE,
            ..Default::default()
        };
        let mut features13 = vk::PhysicalDeviceVulkan13Features {
            dynamic_rendering: vk::TRUE,
            ..Default::default()
        };

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features)
            .push_next(&mut features12)
            .push_next(&mut features13);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }?;
        Ok(device)
    }

    fn create_allocator(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> EngineResult<Allocator> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })?;

        Ok(allocator)
    }
}

/// Objects created during `VulkanDevice::new` that must be destroyed if a
/// later step fails.
struct Partial {
    armed: bool,
    instance: ash::Instance,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    surface: Option<(khr::Surface, vk::SurfaceKHR)>,
    device: Option<ash::Device>,
}

impl Partial {
    /// Bring-up succeeded; the objects now belong to the `VulkanDevice`.
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Partial {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        log::warn!("Device bring-up failed, destroying partially created objects");
        unsafe {
            if let Some(device) = &self.device {
                device.destroy_device(None);
            }
            if let Some((loader, surface)) = &self.surface {
                loader.destroy_surface(*surface, None);
            }
            if let Some((debug_utils, messenger)) = &self.debug_utils {
                debug_utils.destroy_debug_utils_messenger(*messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            log::error!("vkDeviceWaitIdle failed during shutdown: {}", e);
        }

        let leaked = self.allocations.get_mut().len();
        if leaked > 0 {
            log::warn!("{} allocations still live at device destruction", leaked);
        }

        // Cleanup in reverse order
        unsafe {
            self.allocations.get_mut().clear();
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::info!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
