//! Thin abstraction over the Vulkan handles and device entry points the
//! rest of the runtime needs, grounded on
//! `src/core/public/render/vk/device-vk.h` and `surface-vk.h`. Kept
//! separate from `vkrt-discard`/`vkrt-cmdpool`/`vkrt-lifecycle` so those
//! crates depend on a trait rather than a concrete `ash::Device`, which is
//! what makes it possible to unit-test them with a fake device that just
//! counts calls instead of standing up a real Vulkan instance.

pub use ash;
pub use ash::vk;
pub use vk_mem;

/// Per-platform window-system handles needed to create a `VkSurfaceKHR`.
/// Mirrors `avk::vk::SurfaceSpec`'s `#ifdef`-selected single struct with one
/// variant per platform instead.
#[derive(Debug, Clone)]
pub enum SurfaceSpec {
    Win32 {
        hinstance: *mut std::ffi::c_void,
        hwnd: *mut std::ffi::c_void,
    },
    Android {
        native_window: *mut std::ffi::c_void,
    },
    Wayland {
        display: *mut std::ffi::c_void,
        surface: *mut std::ffi::c_void,
    },
    Metal {
        layer: *mut std::ffi::c_void,
    },
}

// SAFETY: the raw pointers are opaque window-system handles passed through
// to platform surface-creation calls; they are never dereferenced by this
// crate and the handshake that hands a `SurfaceSpec` across threads (UI
// thread building it, render thread consuming it) already has its own
// synchronization via `vkrt-lifecycle`'s coordinator.
unsafe impl Send for SurfaceSpec {}

/// A VMA-backed allocation paired with the resource it backs. Discarding
/// an image/buffer always discards its allocation alongside it (spec.md
/// §4.6), so the two travel together instead of as separate pool entries.
pub type GpuAllocation = vk_mem::Allocation;

/// The device-level operations the Discard Pool, Command Pool Registry and
/// lifecycle coordinator need. A production implementation wraps a real
/// `ash::Device` + `vk_mem::Allocator`; tests use a fake that just records
/// calls. Grounded on `Device::table()`/`device()`/`physicalDevice()`/
/// `vmaAllocator()` in `device-vk.h`.
pub trait GpuDevice: Send + Sync {
    fn handle(&self) -> vk::Device;

    fn create_timeline_semaphore(&self, initial_value: u64) -> Result<vk::Semaphore, GpuCreateError>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn semaphore_counter_value(&self, semaphore: vk::Semaphore) -> u64;

    fn destroy_image_view(&self, view: vk::ImageView);
    fn destroy_buffer_view(&self, view: vk::BufferView);
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn destroy_render_pass(&self, pass: vk::RenderPass);
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn destroy_surface(&self, surface: vk::SurfaceKHR);
    fn destroy_command_pool(&self, pool: vk::CommandPool);

    fn destroy_image(&self, image: vk::Image, allocation: GpuAllocation);
    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: GpuAllocation);

    fn create_command_pool(&self, queue_family: u32) -> Result<vk::CommandPool, GpuCreateError>;
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> Vec<vk::CommandBuffer>;
    fn reset_command_pool(&self, pool: vk::CommandPool);
}

/// Surfaces the lifecycle coordinator's render-thread entry points needs
/// from the embedding application — the virtual interface of
/// `ApplicationBase` in `avk-application.h`, translated into a single
/// trait object the coordinator drives. A concrete renderer implements
/// this once; `vkrt-demo` has a toy implementation.
pub trait LifecycleHost: Send + Sync {
    fn on_window_init(&self);
    fn on_device_lost(&self);
    fn on_device_regained(&self) -> Result<(), DeviceRecreationFailed>;
    fn on_render(&self, frame_index: u64) -> Result<(), DeviceLost>;
    fn on_resize(&self);
    fn on_surface_lost(&self);
    fn on_early_surface_regained(&self);
    fn on_late_surface_regained(&self);
    fn surface_spec(&self) -> SurfaceSpec;

    fn on_fixed_update(&self);
    fn on_update(&self);

    fn on_save_state(&self);
    fn on_restore_state(&self);
}

/// Returned by [`LifecycleHost::on_render`] when the underlying submit or
/// present call reported `VK_ERROR_DEVICE_LOST`.
#[derive(Debug, thiserror::Error)]
#[error("device lost during render submission")]
pub struct DeviceLost;

/// Returned by [`GpuDevice::create_timeline_semaphore`]/
/// `create_command_pool` when the underlying Vulkan create call fails.
#[derive(Debug, thiserror::Error)]
#[error("GPU object creation failed")]
pub struct GpuCreateError;

/// Returned by [`LifecycleHost::on_device_regained`] when the host fails
/// to rebuild its device-dependent state after a device-lost recovery.
#[derive(Debug, thiserror::Error)]
#[error("device-lost recreation failed")]
pub struct DeviceRecreationFailed;
