use std::{
    borrow::Cow,
    ffi::{c_char, c_void, CStr, CString},
    mem::ManuallyDrop,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use ash::vk::{self, Handle};
use ember_log::{error, info, warn};
use gpu_allocator::{
    vulkan::{Allocator, AllocatorCreateDesc},
    AllocationError, AllocationSizes, AllocatorDebugSettings,
};
use raw_window_handle::{HandleError, HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::capabilities::DeviceCapabilities;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

const QUEUE_PRIORITIES: [f32; 1] = [1.0];

pub struct ContextCreateInfo<'a, W: HasDisplayHandle + HasWindowHandle> {
    pub app_name: &'a str,
    /// A window is required to find a queue that supports presentation.
    pub window: &'a W,
    /// Enables validation layers and object names.
    pub debug: bool,
}

#[derive(Debug, Error)]
pub enum ContextCreateError {
    #[error("vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
    #[error("unable to load vulkan: {0}")]
    Load(#[from] ash::LoadingError),
    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] HandleError),
    #[error("application name contains a nul byte")]
    InvalidName,
    #[error("unable to create memory allocator: {0}")]
    Allocator(#[from] AllocationError),
    #[error("no suitable graphics device was found")]
    NoDevice,
}

/// Owner of the logical device, its queues, the command pool, and the memory allocator.
///
/// Every GPU object created from a context keeps a clone of it, so the device is only destroyed
/// once all of those objects are gone.
#[derive(Clone)]
pub struct Context(pub(crate) Arc<ContextInner>);

pub struct ContextInner {
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub(crate) debug_names: Option<ash::ext::debug_utils::Device>,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) queue_family_indices: QueueFamilyIndices,
    pub(crate) properties: vk::PhysicalDeviceProperties,
    pub(crate) capabilities: DeviceCapabilities,
    pub(crate) device: ash::Device,
    pub(crate) surface_loader: ash::khr::surface::Instance,
    pub(crate) swapchain_loader: ash::khr::swapchain::Device,
    pub(crate) graphics: vk::Queue,
    pub(crate) present: vk::Queue,
    pub(crate) command_pool: Mutex<vk::CommandPool>,
    pub(crate) allocator: ManuallyDrop<Mutex<Allocator>>,
}

#[derive(Debug, Default, Clone)]
pub struct QueueFamilyIndices {
    /// Must support graphics.
    pub graphics: u32,
    /// Must support presentation.
    pub present: u32,
    /// Set when the graphics family also supports compute. Compute work is recorded into the
    /// graphics command stream so no dedicated family is searched for.
    pub compute: Option<u32>,
    /// Contains all queue families which are unique (some queue families may be equivilent on
    /// certain hardware).
    pub unique: Vec<u32>,
}

struct PhysicalDeviceQuery {
    pub device: vk::PhysicalDevice,
    pub queue_family_indices: QueueFamilyIndices,
    pub graphics_family: vk::QueueFamilyProperties,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
}

/// Destroys the instance and debug messenger if context creation fails part way through.
struct InstanceGuard {
    instance: ash::Instance,
    debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    armed: bool,
}

impl Context {
    pub fn new<W: HasDisplayHandle + HasWindowHandle>(
        create_info: ContextCreateInfo<W>,
    ) -> Result<Self, ContextCreateError> {
        let app_name =
            CString::new(create_info.app_name).map_err(|_| ContextCreateError::InvalidName)?;
        let display_handle = create_info.window.display_handle()?.as_raw();
        let window_handle = create_info.window.window_handle()?.as_raw();

        // Dynamically load Vulkan
        let entry = unsafe { ash::Entry::load()? };

        // Validation is skipped, not fatal, when the layer isn't installed
        let mut debug = create_info.debug;
        let layer_names = if debug {
            let available = unsafe { entry.enumerate_instance_layer_properties()? };
            let found = available.iter().any(|layer| {
                layer
                    .layer_name_as_c_str()
                    .map_or(false, |name| name == VALIDATION_LAYER)
            });
            if found {
                vec![VALIDATION_LAYER.as_ptr()]
            } else {
                warn!("validation layers requested but not installed");
                debug = false;
                Vec::default()
            }
        } else {
            Vec::default()
        };

        // Get required instance extensions
        let instance_extensions = {
            let mut extensions =
                ash_window::enumerate_required_extensions(display_handle)?.to_vec();
            if debug {
                extensions.push(ash::ext::debug_utils::NAME.as_ptr());
            }
            extensions
        };

        let device_extensions = [ash::khr::swapchain::NAME.as_ptr()];

        // Create the instance
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(0)
            .engine_name(&app_name)
            .engine_version(0)
            .api_version(vk::API_VERSION_1_2);

        let instance_create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_names)
            .enabled_extension_names(&instance_extensions);

        let instance = unsafe { entry.create_instance(&instance_create_info, None)? };
        let mut guard = InstanceGuard {
            instance: instance.clone(),
            debug: None,
            armed: true,
        };

        // Create debugging utilities if requested
        if debug {
            let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                )
                .pfn_user_callback(Some(vulkan_debug_callback));
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = unsafe { loader.create_debug_utils_messenger(&debug_info, None)? };
            guard.debug = Some((loader, messenger));
        }

        // Create a surface to check for presentation compatibility
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)?
        };

        // Query for a physical device
        let pd_query =
            unsafe { pick_physical_device(&instance, surface, &surface_loader, &device_extensions) };

        // Cleanup surface since it's not needed anymore
        unsafe {
            surface_loader.destroy_surface(surface, None);
        }

        let pd_query = pd_query.ok_or(ContextCreateError::NoDevice)?;
        let qfi = pd_query.queue_family_indices.clone();

        let queue_infos = qfi
            .unique
            .iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(*family)
                    .queue_priorities(&QUEUE_PRIORITIES)
            })
            .collect::<Vec<_>>();

        // Request features
        let features = vk::PhysicalDeviceFeatures::default()
            .depth_clamp(pd_query.features.depth_clamp == vk::TRUE)
            .depth_bias_clamp(pd_query.features.depth_bias_clamp == vk::TRUE);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&device_extensions)
            .enabled_features(&features);

        // Create the device
        let device =
            unsafe { instance.create_device(pd_query.device, &device_create_info, None)? };

        // Create the memory allocator
        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device: pd_query.device,
            debug_settings: AllocatorDebugSettings {
                log_leaks_on_shutdown: debug,
                ..Default::default()
            },
            buffer_device_address: false,
            allocation_sizes: AllocationSizes::default(),
        }) {
            Ok(allocator) => allocator,
            Err(err) => {
                unsafe { device.destroy_device(None) };
                return Err(err.into());
            }
        };

        // Command pool for the graphics queue
        let pool_create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(qfi.graphics);
        let command_pool = match unsafe { device.create_command_pool(&pool_create_info, None) } {
            Ok(pool) => pool,
            Err(err) => {
                std::mem::drop(allocator);
                unsafe { device.destroy_device(None) };
                return Err(err.into());
            }
        };

        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);
        let debug_names = guard
            .debug
            .as_ref()
            .map(|_| ash::ext::debug_utils::Device::new(&instance, &device));
        let (graphics, present) = unsafe {
            (
                device.get_device_queue(qfi.graphics, 0),
                device.get_device_queue(qfi.present, 0),
            )
        };

        let capabilities = DeviceCapabilities::new(
            &pd_query.graphics_family,
            &pd_query.properties,
            &pd_query.features,
        );

        info!(
            "using device `{}` (compute: {})",
            pd_query
                .properties
                .device_name_as_c_str()
                .map(CStr::to_string_lossy)
                .unwrap_or(Cow::Borrowed("unknown")),
            capabilities.compute
        );

        let (instance, debug) = guard.disarm();

        Ok(Context(Arc::new(ContextInner {
            entry,
            instance,
            debug,
            debug_names,
            physical_device: pd_query.device,
            queue_family_indices: qfi,
            properties: pd_query.properties,
            capabilities,
            device,
            surface_loader,
            swapchain_loader,
            graphics,
            present,
            command_pool: Mutex::new(command_pool),
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
        })))
    }

    #[inline(always)]
    pub fn device(&self) -> &ash::Device {
        &self.0.device
    }

    #[inline(always)]
    pub fn instance(&self) -> &ash::Instance {
        &self.0.instance
    }

    #[inline(always)]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.0.physical_device
    }

    #[inline(always)]
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.0.properties
    }

    #[inline(always)]
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.0.capabilities
    }

    #[inline(always)]
    pub fn queue_family_indices(&self) -> &QueueFamilyIndices {
        &self.0.queue_family_indices
    }

    #[inline(always)]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.0.graphics
    }

    /// Compute work shares the graphics queue when the family supports it.
    #[inline(always)]
    pub fn compute_queue(&self) -> Option<vk::Queue> {
        self.0
            .queue_family_indices
            .compute
            .map(|_| self.0.graphics)
    }

    #[inline(always)]
    pub fn present_queue(&self) -> vk::Queue {
        self.0.present
    }

    #[inline(always)]
    pub(crate) fn allocator(&self) -> MutexGuard<'_, Allocator> {
        self.0
            .allocator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until all queues are idle.
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        unsafe { self.0.device.device_wait_idle() }
    }

    pub fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>, vk::Result> {
        let pool = self
            .0
            .command_pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        unsafe { self.0.device.allocate_command_buffers(&alloc_info) }
    }

    pub fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        if command_buffers.is_empty() {
            return;
        }
        let pool = self
            .0
            .command_pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        unsafe {
            self.0.device.free_command_buffers(*pool, command_buffers);
        }
    }

    /// Names an object for debugging tools. Does nothing when debugging is disabled.
    pub fn set_debug_name<H: Handle>(&self, handle: H, name: &str) {
        let Some(debug) = &self.0.debug_names else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);
        unsafe {
            let _ = debug.set_debug_utils_object_name(&name_info);
        }
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                error!("unable to wait for device idle during shutdown: {err}");
            }
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_command_pool(
                *self
                    .command_pool
                    .get_mut()
                    .unwrap_or_else(PoisonError::into_inner),
                None,
            );
            self.device.destroy_device(None);
            if let Some((loader, messenger)) = &self.debug {
                loader.destroy_debug_utils_messenger(*messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

impl InstanceGuard {
    fn disarm(
        mut self,
    ) -> (
        ash::Instance,
        Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    ) {
        self.armed = false;
        (self.instance.clone(), self.debug.take())
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        unsafe {
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

impl QueueFamilyIndices {
    // Returns `None` if there is no graphics or present family.
    fn find(
        instance: &ash::Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> Option<(QueueFamilyIndices, vk::QueueFamilyProperties)> {
        let properties = unsafe { instance.get_physical_device_queue_family_properties(device) };

        // Prefer a graphics family that can also run compute
        let graphics = properties
            .iter()
            .position(|family| {
                family
                    .queue_flags
                    .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            })
            .or_else(|| {
                properties
                    .iter()
                    .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            })?;

        // Presentation from the graphics family avoids concurrent sharing of swapchain images
        let supports_present = |family_idx: usize| unsafe {
            surface_loader
                .get_physical_device_surface_support(device, family_idx as u32, surface)
                .unwrap_or(false)
        };

        let present = if supports_present(graphics) {
            graphics
        } else {
            (0..properties.len()).find(|idx| supports_present(*idx))?
        };

        let compute = if properties[graphics]
            .queue_flags
            .contains(vk::QueueFlags::COMPUTE)
        {
            Some(graphics as u32)
        } else {
            None
        };

        let mut unique = vec![graphics as u32];
        if present != graphics {
            unique.push(present as u32);
        }

        Some((
            QueueFamilyIndices {
                graphics: graphics as u32,
                present: present as u32,
                compute,
                unique,
            },
            properties[graphics],
        ))
    }
}

unsafe fn pick_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    loader: &ash::khr::surface::Instance,
    extensions: &[*const c_char],
) -> Option<PhysicalDeviceQuery> {
    let devices = instance.enumerate_physical_devices().ok()?;

    let mut best_rank = 0;
    let mut query = None;
    for device in devices {
        let properties = instance.get_physical_device_properties(device);
        let features = instance.get_physical_device_features(device);

        // Must support requested extensions
        if let Some(missing) = check_device_extensions(instance, device, extensions) {
            info!("skipping device missing extension `{missing}`");
            continue;
        }

        // Must support surface stuff
        let formats = match loader.get_physical_device_surface_formats(device, surface) {
            Ok(formats) => formats,
            Err(_) => continue,
        };

        let present_modes = match loader.get_physical_device_surface_present_modes(device, surface)
        {
            Ok(modes) => modes,
            Err(_) => continue,
        };

        if formats.is_empty() || present_modes.is_empty() {
            continue;
        }

        let Some((queue_family_indices, graphics_family)) =
            QueueFamilyIndices::find(instance, device, surface, loader)
        else {
            continue;
        };

        // Pick this device if it's better than the old one
        let rank = device_type_rank(properties.device_type)
            + if queue_family_indices.compute.is_some() { 8 } else { 0 };
        if query.is_none() || rank > best_rank {
            best_rank = rank;
            query = Some(PhysicalDeviceQuery {
                device,
                queue_family_indices,
                graphics_family,
                properties,
                features,
            });
        }
    }

    query
}

/// Check that a physical devices supports required device extensions.
///
/// Returns `None` on a success, or `Some` containing the name of the missing extension.
unsafe fn check_device_extensions(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    extensions: &[*const c_char],
) -> Option<String> {
    let found_extensions = match instance.enumerate_device_extension_properties(device) {
        Ok(extensions) => extensions,
        Err(_) => return Some(String::default()),
    };

    for extension_name in extensions {
        let extension_name = CStr::from_ptr(*extension_name);
        let found = found_extensions
            .iter()
            .any(|property| {
                property
                    .extension_name_as_c_str()
                    .map_or(false, |name| name == extension_name)
            });

        if !found {
            return Some(extension_name.to_string_lossy().into_owned());
        }
    }

    None
}

fn device_type_rank(ty: vk::PhysicalDeviceType) -> u32 {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => 4,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
        vk::PhysicalDeviceType::CPU => 2,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
        _ => 0,
    }
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    let callback_data = &*p_callback_data;
    let message_id_number = callback_data.message_id_number;

    let message_id_name = if callback_data.p_message_id_name.is_null() {
        Cow::from("")
    } else {
        CStr::from_ptr(callback_data.p_message_id_name).to_string_lossy()
    };

    let message = if callback_data.p_message.is_null() {
        Cow::from("")
    } else {
        CStr::from_ptr(callback_data.p_message).to_string_lossy()
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!(
            "{:?} [{} ({})] : {}",
            message_type, message_id_name, message_id_number, message,
        ),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!(
            "{:?} [{} ({})] : {}",
            message_type, message_id_name, message_id_number, message,
        ),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => ember_log::debug!(
            "{:?} [{} ({})] : {}",
            message_type, message_id_name, message_id_number, message,
        ),
        _ => {}
    }

    vk::FALSE
}
