//! A toy three-thread application wiring every `vkrt-*` component
//! together: a main (UI) thread drives window lifecycle events, an update
//! thread ticks fixed/variable simulation state and drains the event bus,
//! and a render thread submits a small per-frame job graph to the
//! scheduler and drives it through the lifecycle coordinator. Grounded on
//! `ApplicationBase`'s `UTmain`/`RTmain` thread entry points in
//! `avk-application.h`.
//!
//! There is no real Vulkan instance here — `NullDevice` is a
//! `vkrt_gpu_iface::GpuDevice` that hands out fabricated handles, enough to
//! exercise the Discard Pool / Command Pool Registry / lifecycle paths end
//! to end without a windowing system.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;

use vkrt_cmdpool::CommandPoolRegistry;
use vkrt_discard::{DiscardPool, DiscardPoolMonitorConfig};
use vkrt_eventbus::{kinds, Event, EventBus, EventListener, EventPayload};
use vkrt_gpu_iface::{vk, DeviceLost, GpuAllocation, GpuDevice, LifecycleHost, SurfaceSpec};
use vkrt_job::{Job, Priority};
use vkrt_lifecycle::{LifecycleCoordinator, RenderOutcome};
use vkrt_scheduler::{Scheduler, SchedulerConfig};

struct NullDevice {
    next_handle: AtomicU64,
}

impl NullDevice {
    fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
        }
    }

    fn next(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }
}

impl GpuDevice for NullDevice {
    fn handle(&self) -> vk::Device {
        vk::Device::null()
    }
    fn create_timeline_semaphore(&self, _initial_value: u64) -> Result<vk::Semaphore, vkrt_gpu_iface::GpuCreateError> {
        Ok(vk::Semaphore::from_raw(self.next()))
    }
    fn destroy_semaphore(&self, _semaphore: vk::Semaphore) {}
    fn semaphore_counter_value(&self, _semaphore: vk::Semaphore) -> u64 {
        0
    }
    fn destroy_image_view(&self, _view: vk::ImageView) {}
    fn destroy_buffer_view(&self, _view: vk::BufferView) {}
    fn destroy_shader_module(&self, _module: vk::ShaderModule) {}
    fn destroy_pipeline(&self, _pipeline: vk::Pipeline) {}
    fn destroy_pipeline_layout(&self, _layout: vk::PipelineLayout) {}
    fn destroy_render_pass(&self, _pass: vk::RenderPass) {}
    fn destroy_framebuffer(&self, _framebuffer: vk::Framebuffer) {}
    fn destroy_surface(&self, _surface: vk::SurfaceKHR) {}
    fn destroy_command_pool(&self, _pool: vk::CommandPool) {}
    fn destroy_image(&self, _image: vk::Image, _allocation: GpuAllocation) {}
    fn destroy_buffer(&self, _buffer: vk::Buffer, _allocation: GpuAllocation) {}
    fn create_command_pool(&self, _queue_family: u32) -> Result<vk::CommandPool, vkrt_gpu_iface::GpuCreateError> {
        Ok(vk::CommandPool::from_raw(self.next()))
    }
    fn allocate_command_buffers(
        &self,
        _pool: vk::CommandPool,
        _level: vk::CommandBufferLevel,
        count: u32,
    ) -> Vec<vk::CommandBuffer> {
        (0..count).map(|_| vk::CommandBuffer::from_raw(self.next())).collect()
    }
    fn reset_command_pool(&self, _pool: vk::CommandPool) {}
}

struct ResizeLogger;

impl EventListener for ResizeLogger {
    fn on_event(&self, event: &Event) -> bool {
        if let EventPayload::Window { width, height, .. } = event.payload {
            log::info!("window resized to {width}x{height}");
        }
        false
    }
}

/// Drives a small geometry -> lighting -> composite job graph through the
/// scheduler once per frame, standing in for a real render graph.
struct DemoHost {
    scheduler: Arc<Scheduler>,
    event_bus: Arc<EventBus>,
    frames_rendered: AtomicU64,
}

impl LifecycleHost for DemoHost {
    fn on_window_init(&self) {
        log::info!("window initialized");
    }

    fn on_device_lost(&self) {
        log::warn!("device lost");
    }

    fn on_device_regained(&self) -> Result<(), vkrt_gpu_iface::DeviceRecreationFailed> {
        log::info!("device regained");
        Ok(())
    }

    fn on_render(&self, frame_index: u64) -> Result<(), DeviceLost> {
        let geometry = Job::new();
        let lighting = Job::new();
        let composite = Job::new();
        geometry.configure_boxed(|_name, _thread, _fiber| {}, Priority::High, "geometry-pass".to_string());
        lighting.configure_boxed(|_name, _thread, _fiber| {}, Priority::Medium, "lighting-pass".to_string());
        composite.configure_boxed(|_name, _thread, _fiber| {}, Priority::Medium, "composite-pass".to_string());

        lighting.add_dependency(&geometry);
        composite.add_dependency(&lighting);

        // Only the graph's root is submitted directly; `lighting` and
        // `composite` are auto-enqueued by the scheduler once their
        // predecessor completes.
        self.scheduler.safe_submit(geometry);
        self.scheduler.wait_for(&composite);

        self.frames_rendered.fetch_add(1, Ordering::Relaxed);
        log::debug!("frame {frame_index} rendered");
        Ok(())
    }

    fn on_resize(&self) {
        log::info!("resize requested");
    }

    fn on_surface_lost(&self) {
        log::warn!("surface lost");
    }

    fn on_early_surface_regained(&self) {}

    fn on_late_surface_regained(&self) {
        log::info!("surface regained");
    }

    fn surface_spec(&self) -> SurfaceSpec {
        SurfaceSpec::Wayland {
            display: std::ptr::null_mut(),
            surface: std::ptr::null_mut(),
        }
    }

    fn on_fixed_update(&self) {}

    fn on_update(&self) {
        self.event_bus.process_events();
    }

    fn on_save_state(&self) {
        log::info!("saving state");
    }

    fn on_restore_state(&self) {
        log::info!("restoring state");
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let device = Arc::new(NullDevice::new());
    let scheduler = Arc::new(Scheduler::new(SchedulerConfig::default()));
    scheduler.start();

    let discard_pool = Arc::new(DiscardPool::new(Arc::clone(&device)));
    let command_pools = Arc::new(CommandPoolRegistry::new(Arc::clone(&device), 0, 64));

    let event_bus = Arc::new(EventBus::new(256));
    event_bus.add_event(kinds::WINDOW_RESIZE);
    let resize_logger: Arc<dyn EventListener> = Arc::new(ResizeLogger);
    event_bus.subscribe(kinds::WINDOW_RESIZE, resize_logger);

    let host = Arc::new(DemoHost {
        scheduler: Arc::clone(&scheduler),
        event_bus: Arc::clone(&event_bus),
        frames_rendered: AtomicU64::new(0),
    });

    let coordinator = Arc::new(LifecycleCoordinator::new(
        host,
        discard_pool,
        DiscardPoolMonitorConfig::default(),
        command_pools,
    ));

    let update_coordinator = Arc::clone(&coordinator);
    let update_thread = thread::spawn(move || {
        update_coordinator.ut_on_init();
        while update_coordinator.ut_should_run() {
            update_coordinator.ut_on_fixed_update();
            update_coordinator.ut_on_update();
            thread::sleep(Duration::from_millis(8));
        }
    });

    let render_coordinator = Arc::clone(&coordinator);
    let render_thread = thread::spawn(move || {
        render_coordinator.rt_wait_ready_for_init();
        loop {
            match render_coordinator.rt_on_render() {
                RenderOutcome::Stopped => break,
                RenderOutcome::Rendered(_) | RenderOutcome::Paused | RenderOutcome::SurfaceLost | RenderOutcome::DeviceLost => {}
            }
            if !render_coordinator.rt_wait_for_next_round() {
                break;
            }
        }
    });

    // UI-thread role: bring up the window, publish a resize, run a short
    // while, then wind everything down.
    coordinator.on_window_init();
    event_bus.publish(Event::new(
        kinds::WINDOW_RESIZE,
        0,
        EventPayload::Window {
            width: 1920,
            height: 1080,
            focused: true,
            maximized: false,
            minimized: false,
        },
    ));

    thread::sleep(Duration::from_millis(200));

    coordinator.signal_stop_updating();
    coordinator.rt_signal_exit();

    update_thread.join().expect("update thread panicked");
    render_thread.join().expect("render thread panicked");

    scheduler.shutdown();
    log::info!("shutdown complete");
    Ok(())
}
