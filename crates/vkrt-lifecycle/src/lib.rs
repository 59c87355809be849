//! Three-thread (UI / Update / Render) application lifecycle coordination.
//! Grounded on `RenderCoordinator`/`UpdateCoordinator`/`ApplicationBase` in
//! `src/core/public/app/avk-application.h` and the render-loop orchestration
//! in `src/core/private/app/avk-application.cpp`'s `RTonRender`,
//! `RThandleDeviceLost` and `RThandleSurfaceLost`.
//!
//! The UI thread owns window/surface events and forwards them here; the
//! update thread advances simulation state and bumps `state_version`; the
//! render thread polls `state_version` against `consumed_version`, renders,
//! and reacts to device-lost/surface-lost by driving the Discard Pool and
//! Command Pool Registry through their teardown/reuse paths.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use vkrt_cmdpool::CommandPoolRegistry;
use vkrt_discard::{DiscardPool, DiscardPoolMonitor, DiscardPoolMonitorConfig};
use vkrt_gpu_iface::{DeviceLost, GpuDevice, LifecycleHost};

/// Mirrors `RTwaitForNextRound`'s `MaxWaitMillis` — the render thread never
/// blocks longer than this waiting for new state before re-checking its
/// running/surface-lost flags.
const MAX_WAIT_MILLIS: u64 = 16;

/// The render thread's shared coordination state. Grounded line-for-line on
/// `RenderCoordinator` in `avk-application.h`.
pub struct RenderCoordinator {
    should_initialize: AtomicBool,
    init_requested: AtomicBool,
    window_init: AtomicBool,
    surface_lost: AtomicBool,
    render_running: AtomicBool,
    running: AtomicBool,
    state_version: AtomicU64,
    consumed_version: AtomicU64,
    lock: Mutex<()>,
    cv: Condvar,
}

impl Default for RenderCoordinator {
    fn default() -> Self {
        Self {
            should_initialize: AtomicBool::new(true),
            init_requested: AtomicBool::new(false),
            window_init: AtomicBool::new(false),
            surface_lost: AtomicBool::new(false),
            render_running: AtomicBool::new(false),
            running: AtomicBool::new(true),
            state_version: AtomicU64::new(0),
            consumed_version: AtomicU64::new(0),
            lock: Mutex::new(()),
            cv: Condvar::new(),
        }
    }
}

impl RenderCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` the first time it's called, `false` after — distinguishes the
    /// true first-time `RTwindowInit` from a surface regained after a
    /// mobile app was backgrounded.
    fn consume_should_initialize(&self) -> bool {
        self.should_initialize.swap(false, Ordering::AcqRel)
    }

    /// Called by the UI thread's true first `on_window_init`: wakes the
    /// render thread blocked in `rt_wait_ready_for_init` without running
    /// any host callback itself — the render thread performs the actual
    /// device/swapchain creation once it wakes.
    fn request_window_init(&self) {
        self.init_requested.store(true, Ordering::Release);
        let _guard = self.lock.lock().unwrap();
        self.cv.notify_all();
    }

    /// Called by the render thread once it has run the host's
    /// window-init callback.
    fn signal_window_init(&self) {
        self.window_init.store(true, Ordering::Release);
        self.render_running.store(true, Ordering::Release);
        let _guard = self.lock.lock().unwrap();
        self.cv.notify_all();
    }

    pub fn window_initialized_once(&self) -> bool {
        self.window_init.load(Ordering::Acquire)
    }

    /// Blocks the render thread until the UI thread's first
    /// `on_window_init` has requested initialization.
    pub fn rt_wait_ready_for_init(&self) {
        let guard = self.lock.lock().unwrap();
        let _guard = self
            .cv
            .wait_while(guard, |_| !self.init_requested.load(Ordering::Acquire))
            .unwrap();
    }

    fn is_render_running(&self) -> bool {
        self.render_running.load(Ordering::Acquire)
    }

    fn pause_rendering(&self) {
        self.render_running.store(false, Ordering::Release);
        let _guard = self.lock.lock().unwrap();
        self.cv.notify_all();
    }

    fn resume_rendering(&self) {
        self.render_running.store(true, Ordering::Release);
        let _guard = self.lock.lock().unwrap();
        self.cv.notify_all();
    }

    pub fn rt_should_run(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Final shutdown of the render thread. Uses `SeqCst` on `running`
    /// deliberately — the original's `signalStopRendering` uses
    /// `seq_cst` on `renderRunning` and that ordering choice is carried
    /// through verbatim rather than relaxed to `Release`.
    pub fn signal_stop_rendering(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _guard = self.lock.lock().unwrap();
        self.cv.notify_all();
    }

    fn on_surface_lost(&self) {
        self.surface_lost.store(true, Ordering::Release);
        let _guard = self.lock.lock().unwrap();
        self.cv.notify_all();
    }

    fn clear_surface_lost(&self) {
        self.surface_lost.store(false, Ordering::Release);
        let _guard = self.lock.lock().unwrap();
        self.cv.notify_all();
    }

    pub fn rt_surface_was_lost(&self) -> bool {
        self.surface_lost.load(Ordering::Acquire)
    }

    /// The CAS dance at `RTshouldUpdate`: claims the latest published
    /// `state_version` if the render thread hasn't consumed it yet.
    pub fn rt_should_update(&self) -> bool {
        let current = self.state_version.load(Ordering::Acquire);
        loop {
            let consumed = self.consumed_version.load(Ordering::Acquire);
            if consumed == current {
                return false;
            }
            match self.consumed_version.compare_exchange(
                consumed,
                current,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(_) => continue,
            }
        }
    }

    /// Called by the update thread after publishing new state.
    pub fn signal_state_updated(&self) {
        self.state_version.fetch_add(1, Ordering::Release);
        let _guard = self.lock.lock().unwrap();
        self.cv.notify_all();
    }

    /// Bounded wait mirroring `RTwaitForNextRound`: sleeps for up to 16ms,
    /// waking early if the thread should stop, the surface was lost, or
    /// fresh state has been published. Returns whether the render thread
    /// should keep running at all.
    pub fn rt_wait_for_next_round(&self) -> bool {
        let guard = self.lock.lock().unwrap();
        let keep_waiting = |_: &mut ()| {
            self.running.load(Ordering::Acquire)
                && !self.surface_lost.load(Ordering::Acquire)
                && self.state_version.load(Ordering::Acquire)
                    == self.consumed_version.load(Ordering::Acquire)
        };
        let _guard = self
            .cv
            .wait_timeout_while(guard, Duration::from_millis(MAX_WAIT_MILLIS), keep_waiting)
            .unwrap();
        self.running.load(Ordering::Acquire)
    }
}

/// The update thread's shared coordination state. Grounded on
/// `UpdateCoordinator` in `avk-application.h` — carried from the original
/// even though spec.md only lists `update_running` informally.
#[derive(Default)]
pub struct UpdateCoordinator {
    update_should_run: AtomicBool,
}

impl UpdateCoordinator {
    pub fn new() -> Self {
        Self {
            update_should_run: AtomicBool::new(true),
        }
    }

    pub fn ut_should_run(&self) -> bool {
        self.update_should_run.load(Ordering::Acquire)
    }

    pub fn signal_stop_updating(&self) {
        self.update_should_run.store(false, Ordering::SeqCst);
    }
}

/// Outcome of one `rt_on_render` call, for the render thread's driver loop
/// to log / react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// `rt_should_run` was false; the render thread should exit.
    Stopped,
    /// Rendering is paused (app backgrounded); no frame was submitted.
    Paused,
    /// The surface was lost; handled inline, no frame was submitted.
    SurfaceLost,
    /// The GPU device was lost mid-frame; handled inline.
    DeviceLost,
    /// A frame was rendered, carrying its frame index.
    Rendered(u64),
}

/// Ties a [`LifecycleHost`] to a [`RenderCoordinator`]/[`UpdateCoordinator`]
/// pair plus the Discard Pool and Command Pool Registry the device/surface
/// lost paths need to drive. One instance is shared by all three threads.
pub struct LifecycleCoordinator<H: LifecycleHost, D: GpuDevice> {
    host: Arc<H>,
    render: RenderCoordinator,
    update: UpdateCoordinator,
    frame_index: AtomicU64,
    discard_pool: Arc<DiscardPool<D>>,
    discard_monitor: DiscardPoolMonitor<D>,
    command_pools: Arc<CommandPoolRegistry<D>>,
}

impl<H: LifecycleHost, D: GpuDevice + 'static> LifecycleCoordinator<H, D> {
    pub fn new(
        host: Arc<H>,
        discard_pool: Arc<DiscardPool<D>>,
        discard_monitor_config: DiscardPoolMonitorConfig,
        command_pools: Arc<CommandPoolRegistry<D>>,
    ) -> Self {
        let discard_monitor = DiscardPoolMonitor::new(Arc::clone(&discard_pool), discard_monitor_config);
        Self {
            host,
            render: RenderCoordinator::new(),
            update: UpdateCoordinator::new(),
            frame_index: AtomicU64::new(0),
            discard_pool,
            discard_monitor,
            command_pools,
        }
    }

    pub fn render_coordinator(&self) -> &RenderCoordinator {
        &self.render
    }

    pub fn update_coordinator(&self) -> &UpdateCoordinator {
        &self.update
    }

    // ---- UI thread ----

    /// Mirrors `onWindowInit`: the true first call only flags that
    /// initialization was requested and wakes the render thread, which
    /// performs the host's window-init path itself once it wakes in
    /// `rt_wait_ready_for_init` — device/swapchain creation happens on the
    /// render thread, never on the caller of this method. Any later call
    /// (surface regained on mobile after being backgrounded) just clears
    /// `surface_lost` and resumes rendering.
    pub fn on_window_init(&self) {
        if self.render.consume_should_initialize() {
            self.render.request_window_init();
        } else {
            self.render.clear_surface_lost();
            self.render.resume_rendering();
        }
    }

    pub fn on_resize(&self) {
        self.host.on_resize();
    }

    pub fn on_surface_lost(&self) {
        self.render.on_surface_lost();
        self.host.on_surface_lost();
    }

    pub fn pause_rendering(&self) {
        self.render.pause_rendering();
    }

    pub fn resume_rendering(&self) {
        self.render.resume_rendering();
    }

    pub fn on_save_state(&self) {
        self.host.on_save_state();
    }

    pub fn on_restore_state(&self) {
        self.host.on_restore_state();
    }

    // ---- Update thread ----

    pub fn ut_should_run(&self) -> bool {
        self.update.ut_should_run()
    }

    pub fn signal_stop_updating(&self) {
        self.update.signal_stop_updating();
    }

    /// Blocks the update thread until the window has been initialized at
    /// least once, so the first fixed/variable update doesn't race ahead
    /// of any state the render thread expects to exist.
    pub fn ut_on_init(&self) {
        while self.update.ut_should_run() && !self.render.window_initialized_once() {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn ut_on_fixed_update(&self) {
        self.host.on_fixed_update();
    }

    pub fn ut_on_update(&self) {
        self.host.on_update();
        self.render.signal_state_updated();
    }

    // ---- Render thread ----

    /// Mirrors `RTwindowInit`: blocks until the UI thread's first
    /// `on_window_init` wakes this thread, then runs the host's
    /// window-init callback here, on the render thread, before publishing
    /// `window_init`/`render_running`.
    pub fn rt_wait_ready_for_init(&self) {
        self.render.rt_wait_ready_for_init();
        self.host.on_window_init();
        self.render.signal_window_init();
    }

    pub fn rt_should_run(&self) -> bool {
        self.render.rt_should_run()
    }

    pub fn rt_signal_exit(&self) {
        self.render.signal_stop_rendering();
    }

    pub fn rt_should_update(&self) -> bool {
        self.render.rt_should_update()
    }

    pub fn rt_wait_for_next_round(&self) -> bool {
        self.render.rt_wait_for_next_round()
    }

    pub fn rt_surface_was_lost(&self) -> bool {
        self.render.rt_surface_was_lost()
    }

    /// One call per render-thread iteration. Mirrors `RTonRender`: ticks
    /// the discard pool monitor, handles a pending surface loss inline,
    /// otherwise submits a frame and handles device loss inline if the
    /// host reports one.
    pub fn rt_on_render(&self) -> RenderOutcome {
        if !self.render.rt_should_run() {
            return RenderOutcome::Stopped;
        }
        self.discard_monitor.on_frame();

        if self.render.rt_surface_was_lost() {
            self.rt_handle_surface_lost();
            return RenderOutcome::SurfaceLost;
        }
        if !self.render.is_render_running() {
            return RenderOutcome::Paused;
        }

        let frame = self.frame_index.fetch_add(1, Ordering::Relaxed);
        match self.host.on_render(frame) {
            Ok(()) => RenderOutcome::Rendered(frame),
            Err(DeviceLost) => {
                self.rt_handle_device_lost();
                RenderOutcome::DeviceLost
            }
        }
    }

    /// Mirrors `RThandleDeviceLost`: notify the host, shut down this
    /// thread's command pools, force-sweep the discard pool (its timeline
    /// semaphore is no longer safe to query against a lost device), then
    /// let the host rebuild whatever device-dependent state it owns.
    fn rt_handle_device_lost(&self) {
        log::warn!("device lost, recovering");
        self.host.on_device_lost();
        self.command_pools.thread_shutdown();
        self.discard_pool.destroy_discarded_resources(true);
        if let Err(reason) = self.host.on_device_regained() {
            vkrt_error::abort_on_fatal(vkrt_error::FatalError::DeviceLostRecreationFailed {
                reason: reason.to_string(),
            });
        }
    }

    /// Mirrors `RThandleSurfaceLost`: discard the render thread's active
    /// command pool and force-sweep the discard pool before handing
    /// control to the host to rebuild the surface/swapchain, then clear
    /// the flag once the host confirms the surface is usable again.
    fn rt_handle_surface_lost(&self) {
        log::warn!("surface lost, recovering");
        let now = self.discard_pool.query_time();
        self.command_pools.discard_active_pool(&self.discard_pool, now);
        self.host.on_early_surface_regained();
        self.discard_pool.destroy_discarded_resources(true);
        let _ = self.host.surface_spec();
        self.host.on_late_surface_regained();
        self.render.clear_surface_lost();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64 as Counter;
    use std::sync::Mutex as StdMutex;
    use vkrt_gpu_iface::{vk, GpuAllocation, SurfaceSpec};

    #[derive(Default)]
    struct FakeDevice {
        timeline_value: Counter,
    }

    impl GpuDevice for FakeDevice {
        fn handle(&self) -> vk::Device {
            vk::Device::null()
        }
        fn create_timeline_semaphore(&self, _initial_value: u64) -> Result<vk::Semaphore, vkrt_gpu_iface::GpuCreateError> {
            Ok(vk::Semaphore::from_raw(1))
        }
        fn destroy_semaphore(&self, _semaphore: vk::Semaphore) {}
        fn semaphore_counter_value(&self, _semaphore: vk::Semaphore) -> u64 {
            self.timeline_value.load(Ordering::SeqCst)
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
            Ok(vk::CommandPool::null())
        }
        fn allocate_command_buffers(
            &self,
            _pool: vk::CommandPool,
            _level: vk::CommandBufferLevel,
            count: u32,
        ) -> Vec<vk::CommandBuffer> {
            (0..count).map(|_| vk::CommandBuffer::null()).collect()
        }
        fn reset_command_pool(&self, _pool: vk::CommandPool) {}
    }

    #[derive(Default)]
    struct FakeHost {
        calls: StdMutex<Vec<&'static str>>,
        fail_next_render: AtomicBool,
    }

    impl FakeHost {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl LifecycleHost for FakeHost {
        fn on_window_init(&self) {
            self.calls.lock().unwrap().push("window_init");
        }
        fn on_device_lost(&self) {
            self.calls.lock().unwrap().push("device_lost");
        }
        fn on_device_regained(&self) -> Result<(), vkrt_gpu_iface::DeviceRecreationFailed> {
            self.calls.lock().unwrap().push("device_regained");
            Ok(())
        }
        fn on_render(&self, _frame_index: u64) -> Result<(), DeviceLost> {
            self.calls.lock().unwrap().push("render");
            if self.fail_next_render.swap(false, Ordering::SeqCst) {
                Err(DeviceLost)
            } else {
                Ok(())
            }
        }
        fn on_resize(&self) {
            self.calls.lock().unwrap().push("resize");
        }
        fn on_surface_lost(&self) {
            self.calls.lock().unwrap().push("surface_lost");
        }
        fn on_early_surface_regained(&self) {
            self.calls.lock().unwrap().push("early_surface_regained");
        }
        fn on_late_surface_regained(&self) {
            self.calls.lock().unwrap().push("late_surface_regained");
        }
        fn surface_spec(&self) -> SurfaceSpec {
            SurfaceSpec::Wayland {
                display: std::ptr::null_mut(),
                surface: std::ptr::null_mut(),
            }
        }
        fn on_fixed_update(&self) {
            self.calls.lock().unwrap().push("fixed_update");
        }
        fn on_update(&self) {
            self.calls.lock().unwrap().push("update");
        }
        fn on_save_state(&self) {
            self.calls.lock().unwrap().push("save_state");
        }
        fn on_restore_state(&self) {
            self.calls.lock().unwrap().push("restore_state");
        }
    }

    fn make_coordinator() -> LifecycleCoordinator<FakeHost, FakeDevice> {
        let host = Arc::new(FakeHost::default());
        let device = Arc::new(FakeDevice::default());
        let discard_pool = Arc::new(DiscardPool::new(Arc::clone(&device)));
        let command_pools = Arc::new(CommandPoolRegistry::new(device, 0, 8));
        LifecycleCoordinator::new(host, discard_pool, DiscardPoolMonitorConfig::default(), command_pools)
    }

    #[test]
    fn render_thread_waits_until_window_init_then_proceeds() {
        let coord = make_coordinator();
        assert!(!coord.render.window_initialized_once());
        coord.on_window_init();
        // The UI thread only requests init; the host callback and the
        // `window_init` flag are the render thread's job.
        assert!(!coord.render.window_initialized_once());
        assert!(coord.host.calls().is_empty());
        coord.rt_wait_ready_for_init();
        assert!(coord.render.window_initialized_once());
        assert_eq!(coord.host.calls(), vec!["window_init"]);
    }

    #[test]
    fn second_on_window_init_call_is_a_surface_regained_path() {
        let coord = make_coordinator();
        coord.on_window_init();
        coord.rt_wait_ready_for_init();
        coord.on_surface_lost();
        assert!(coord.rt_surface_was_lost());

        coord.on_window_init();
        assert!(!coord.rt_surface_was_lost());
        // The second call must not run the host's window-init path again.
        assert_eq!(coord.host.calls(), vec!["window_init", "surface_lost"]);
    }

    #[test]
    fn should_update_fires_exactly_once_per_published_version() {
        let coord = make_coordinator();
        let rc = coord.render_coordinator();
        assert!(!rc.rt_should_update());

        rc.signal_state_updated();
        assert!(rc.rt_should_update());
        assert!(!rc.rt_should_update(), "consuming a version must not double-fire");

        rc.signal_state_updated();
        rc.signal_state_updated();
        assert!(rc.rt_should_update(), "coalesced updates still produce one pending update");
        assert!(!rc.rt_should_update());
    }

    #[test]
    fn wait_for_next_round_returns_promptly_on_state_update() {
        let rc = Arc::new(RenderCoordinator::new());
        let rc2 = Arc::clone(&rc);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(2));
            rc2.signal_state_updated();
        });
        let start = std::time::Instant::now();
        let kept_running = rc.rt_wait_for_next_round();
        handle.join().unwrap();
        assert!(kept_running);
        assert!(
            start.elapsed() < Duration::from_millis(MAX_WAIT_MILLIS),
            "should wake on state update rather than waiting the full timeout"
        );
    }

    #[test]
    fn wait_for_next_round_times_out_bounded_when_nothing_changes() {
        let rc = RenderCoordinator::new();
        let start = std::time::Instant::now();
        let kept_running = rc.rt_wait_for_next_round();
        assert!(kept_running);
        assert!(start.elapsed() >= Duration::from_millis(MAX_WAIT_MILLIS));
        assert!(start.elapsed() < Duration::from_millis(MAX_WAIT_MILLIS * 5));
    }

    #[test]
    fn surface_lost_is_handled_inline_and_cleared() {
        let coord = make_coordinator();
        coord.on_window_init();
        coord.rt_wait_ready_for_init();
        coord.on_surface_lost();

        let outcome = coord.rt_on_render();
        assert_eq!(outcome, RenderOutcome::SurfaceLost);
        assert!(!coord.rt_surface_was_lost());
        assert_eq!(
            coord.host.calls(),
            vec![
                "window_init",
                "surface_lost",
                "early_surface_regained",
                "late_surface_regained"
            ]
        );
    }

    #[test]
    fn device_lost_during_render_is_recovered_inline() {
        let coord = make_coordinator();
        coord.on_window_init();
        coord.rt_wait_ready_for_init();
        coord.host.fail_next_render.store(true, Ordering::SeqCst);

        let outcome = coord.rt_on_render();
        assert_eq!(outcome, RenderOutcome::DeviceLost);
        assert_eq!(
            coord.host.calls(),
            vec!["window_init", "render", "device_lost", "device_regained"]
        );

        // Subsequent frames render normally again.
        let outcome = coord.rt_on_render();
        assert_eq!(outcome, RenderOutcome::Rendered(1));
    }

    #[test]
    fn paused_rendering_skips_the_host_render_call() {
        let coord = make_coordinator();
        coord.on_window_init();
        coord.rt_wait_ready_for_init();
        coord.pause_rendering();
        assert_eq!(coord.rt_on_render(), RenderOutcome::Paused);
        assert_eq!(coord.host.calls(), vec!["window_init"]);

        coord.resume_rendering();
        assert_eq!(coord.rt_on_render(), RenderOutcome::Rendered(0));
    }

    #[test]
    fn signal_exit_stops_the_render_loop_permanently() {
        let coord = make_coordinator();
        coord.on_window_init();
        coord.rt_wait_ready_for_init();
        assert!(coord.rt_should_run());
        coord.rt_signal_exit();
        assert!(!coord.rt_should_run());
        assert_eq!(coord.rt_on_render(), RenderOutcome::Stopped);
    }

    #[test]
    fn update_coordinator_stops_on_signal() {
        let update = UpdateCoordinator::new();
        assert!(update.ut_should_run());
        update.signal_stop_updating();
        assert!(!update.ut_should_run());
    }
}
