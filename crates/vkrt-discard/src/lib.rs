//! GPU-timeline-keyed deferred resource destruction. Grounded on
//! `src/core/public/render/vk/discard-pool.h` and
//! `src/core/private/render/vk/discard-pool.cpp`: every `discard_*` call
//! stages a resource under a timeline value pulled from the pool's own
//! timeline semaphore; `destroy_discarded_resources` sweeps every category
//! whose staged value has already been reached (or everything,
//! unconditionally, when `force` is set — used on teardown).
//!
//! Descriptor pools and command pools are handed back to their owning
//! manager for *reuse* rather than destroyed outright, via the
//! [`DescriptorPoolRecycler`]/[`CommandPoolRecycler`] traits — this is the
//! "recycle vs. destroy" split the rest of the categories don't have.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;

use vkrt_gpu_iface::{vk, GpuAllocation, GpuDevice};
use vkrt_timeline::TimelineBucket;

pub trait DescriptorPoolRecycler: Send + Sync {
    fn recycle_descriptor_pool(&self, pool: vk::DescriptorPool);
}

pub trait CommandPoolRecycler: Send + Sync {
    fn recycle_command_pool(&self, thread: ThreadId, pool: vk::CommandPool);
}

struct Buckets {
    images: TimelineBucket<(vk::Image, GpuAllocation)>,
    buffers: TimelineBucket<(vk::Buffer, GpuAllocation)>,
    image_views: TimelineBucket<vk::ImageView>,
    buffer_views: TimelineBucket<vk::BufferView>,
    shader_modules: TimelineBucket<vk::ShaderModule>,
    pipelines: TimelineBucket<vk::Pipeline>,
    pipeline_layouts: TimelineBucket<vk::PipelineLayout>,
    descriptor_pools: TimelineBucket<(vk::DescriptorPool, Arc<dyn DescriptorPoolRecycler>)>,
    command_pools: TimelineBucket<(ThreadId, vk::CommandPool, Arc<dyn CommandPoolRecycler>)>,
    surfaces: TimelineBucket<vk::SurfaceKHR>,
    render_passes: TimelineBucket<vk::RenderPass>,
    framebuffers: TimelineBucket<vk::Framebuffer>,
}

impl Buckets {
    fn new() -> Self {
        Self {
            images: TimelineBucket::new(),
            buffers: TimelineBucket::new(),
            image_views: TimelineBucket::new(),
            buffer_views: TimelineBucket::new(),
            shader_modules: TimelineBucket::new(),
            pipelines: TimelineBucket::new(),
            pipeline_layouts: TimelineBucket::new(),
            descriptor_pools: TimelineBucket::new(),
            command_pools: TimelineBucket::new(),
            surfaces: TimelineBucket::new(),
            render_passes: TimelineBucket::new(),
            framebuffers: TimelineBucket::new(),
        }
    }
}

/// Snapshot of pending-resource counts, used by [`DiscardPoolMonitor`]'s
/// pressure check.
#[derive(Debug, Default, Clone, Copy)]
pub struct BucketSizes {
    pub images: usize,
    pub buffers: usize,
    pub framebuffers: usize,
    pub pipelines: usize,
}

pub struct DiscardPool<D: GpuDevice> {
    device: Arc<D>,
    timeline: vk::Semaphore,
    buckets: Mutex<Buckets>,
}

impl<D: GpuDevice> DiscardPool<D> {
    pub fn new(device: Arc<D>) -> Self {
        let timeline = device
            .create_timeline_semaphore(0)
            .unwrap_or_else(|_| vkrt_error::abort_on_fatal(vkrt_error::FatalError::SemaphoreCreateFailed));
        Self {
            device,
            timeline,
            buckets: Mutex::new(Buckets::new()),
        }
    }

    pub fn timeline_semaphore(&self) -> vk::Semaphore {
        self.timeline
    }

    /// Queries the pool's timeline semaphore for the value `destroy_discarded_resources`
    /// should compare staged entries against when not forcing a full sweep.
    pub fn query_time(&self) -> u64 {
        self.device.semaphore_counter_value(self.timeline)
    }

    pub fn discard_image(&self, image: vk::Image, allocation: GpuAllocation, value: u64) {
        self.buckets.lock().images.append(value, (image, allocation));
    }

    pub fn discard_buffer(&self, buffer: vk::Buffer, allocation: GpuAllocation, value: u64) {
        self.buckets.lock().buffers.append(value, (buffer, allocation));
    }

    pub fn discard_image_view(&self, view: vk::ImageView, value: u64) {
        self.buckets.lock().image_views.append(value, view);
    }

    pub fn discard_buffer_view(&self, view: vk::BufferView, value: u64) {
        self.buckets.lock().buffer_views.append(value, view);
    }

    pub fn discard_shader_module(&self, module: vk::ShaderModule, value: u64) {
        self.buckets.lock().shader_modules.append(value, module);
    }

    pub fn discard_pipeline(&self, pipeline: vk::Pipeline, value: u64) {
        self.buckets.lock().pipelines.append(value, pipeline);
    }

    pub fn discard_pipeline_layout(&self, layout: vk::PipelineLayout, value: u64) {
        self.buckets.lock().pipeline_layouts.append(value, layout);
    }

    pub fn discard_descriptor_pool_for_reuse(
        &self,
        pool: vk::DescriptorPool,
        recycler: Arc<dyn DescriptorPoolRecycler>,
        value: u64,
    ) {
        self.buckets
            .lock()
            .descriptor_pools
            .append(value, (pool, recycler));
    }

    pub fn discard_command_pool_for_reuse(
        &self,
        thread: ThreadId,
        pool: vk::CommandPool,
        recycler: Arc<dyn CommandPoolRecycler>,
        value: u64,
    ) {
        self.buckets
            .lock()
            .command_pools
            .append(value, (thread, pool, recycler));
    }

    pub fn discard_surface(&self, surface: vk::SurfaceKHR, value: u64) {
        self.buckets.lock().surfaces.append(value, surface);
    }

    pub fn discard_render_pass(&self, render_pass: vk::RenderPass, value: u64) {
        self.buckets.lock().render_passes.append(value, render_pass);
    }

    pub fn discard_framebuffer(&self, framebuffer: vk::Framebuffer, value: u64) {
        self.buckets.lock().framebuffers.append(value, framebuffer);
    }

    /// Retags every pending entry in every category to `new_value`. Used
    /// when a frame's submission fails and its staged discards must be
    /// handed to the next frame's timeline value instead (spec.md §4.6).
    pub fn retag_all(&self, new_value: u64) {
        let mut b = self.buckets.lock();
        b.images.retag(new_value);
        b.buffers.retag(new_value);
        b.image_views.retag(new_value);
        b.buffer_views.retag(new_value);
        b.shader_modules.retag(new_value);
        b.pipelines.retag(new_value);
        b.pipeline_layouts.retag(new_value);
        b.descriptor_pools.retag(new_value);
        b.command_pools.retag(new_value);
        b.surfaces.retag(new_value);
        b.render_passes.retag(new_value);
        b.framebuffers.retag(new_value);
    }

    /// Cross-frame merge: re-tags every pending entry in `src` to `value`
    /// and appends them into `self` (spec.md §4.6), used from the
    /// device-lost/surface-lost recovery paths to fold a frame's staged
    /// discards into another pool under a fresh timeline value. Locks
    /// both pools' bucket sets in address order so merging in either
    /// direction can't deadlock.
    pub fn move_data(&self, src: &DiscardPool<D>, value: u64) {
        if std::ptr::eq(self, src) {
            self.retag_all(value);
            return;
        }
        let (mut dst, mut from) = if (self as *const Self as usize) < (src as *const Self as usize) {
            (self.buckets.lock(), src.buckets.lock())
        } else {
            let from = src.buckets.lock();
            let dst = self.buckets.lock();
            (dst, from)
        };

        from.images.retag(value);
        from.images.drain_into(&mut dst.images);
        from.buffers.retag(value);
        from.buffers.drain_into(&mut dst.buffers);
        from.image_views.retag(value);
        from.image_views.drain_into(&mut dst.image_views);
        from.buffer_views.retag(value);
        from.buffer_views.drain_into(&mut dst.buffer_views);
        from.shader_modules.retag(value);
        from.shader_modules.drain_into(&mut dst.shader_modules);
        from.pipelines.retag(value);
        from.pipelines.drain_into(&mut dst.pipelines);
        from.pipeline_layouts.retag(value);
        from.pipeline_layouts.drain_into(&mut dst.pipeline_layouts);
        from.descriptor_pools.retag(value);
        from.descriptor_pools.drain_into(&mut dst.descriptor_pools);
        from.command_pools.retag(value);
        from.command_pools.drain_into(&mut dst.command_pools);
        from.surfaces.retag(value);
        from.surfaces.drain_into(&mut dst.surfaces);
        from.render_passes.retag(value);
        from.render_passes.drain_into(&mut dst.render_passes);
        from.framebuffers.retag(value);
        from.framebuffers.drain_into(&mut dst.framebuffers);
    }

    pub fn sizes(&self) -> BucketSizes {
        let b = self.buckets.lock();
        BucketSizes {
            images: b.images.len(),
            buffers: b.buffers.len(),
            framebuffers: b.framebuffers.len(),
            pipelines: b.pipelines.len(),
        }
    }

    /// Sweeps every category. When `force` is false, only entries whose
    /// timeline value has already been reached are released; when true,
    /// every staged entry is released regardless of timeline value (used
    /// on teardown, where the timeline semaphore may no longer be safe to
    /// query).
    pub fn destroy_discarded_resources(&self, force: bool) {
        let now = if force {
            u64::MAX
        } else {
            self.query_time()
        };
        let mut b = self.buckets.lock();
        let device = self.device.as_ref();

        b.image_views.drop_ready(now, |v| device.destroy_image_view(v));
        b.images
            .drop_ready(now, |(image, allocation)| device.destroy_image(image, allocation));
        b.buffer_views
            .drop_ready(now, |v| device.destroy_buffer_view(v));
        b.buffers
            .drop_ready(now, |(buffer, allocation)| device.destroy_buffer(buffer, allocation));
        b.pipelines.drop_ready(now, |p| device.destroy_pipeline(p));
        b.pipeline_layouts
            .drop_ready(now, |l| device.destroy_pipeline_layout(l));
        b.shader_modules
            .drop_ready(now, |m| device.destroy_shader_module(m));
        b.descriptor_pools
            .drop_ready(now, |(pool, recycler)| recycler.recycle_descriptor_pool(pool));
        b.command_pools.drop_ready(now, |(tid, pool, recycler)| {
            recycler.recycle_command_pool(tid, pool)
        });
        b.surfaces.drop_ready(now, |s| device.destroy_surface(s));
        b.render_passes
            .drop_ready(now, |rp| device.destroy_render_pass(rp));
        b.framebuffers
            .drop_ready(now, |fb| device.destroy_framebuffer(fb));
    }
}

impl<D: GpuDevice> Drop for DiscardPool<D> {
    fn drop(&mut self) {
        self.destroy_discarded_resources(true);
        self.device.destroy_semaphore(self.timeline);
    }
}

/// Periodic companion that checks a handful of the higher-churn categories
/// every `check_every_n_frames` frames and triggers a non-forced sweep if
/// any of them is over its configured threshold. Grounded on
/// `DiscardPoolMonitor` in `discard-pool.h`.
#[derive(Debug, Clone, Copy)]
pub struct DiscardPoolMonitorConfig {
    pub max_images: usize,
    pub max_buffers: usize,
    pub max_framebuffers: usize,
    pub max_pipelines: usize,
    pub check_every_n_frames: u32,
}

impl Default for DiscardPoolMonitorConfig {
    fn default() -> Self {
        Self {
            max_images: 32,
            max_buffers: 64,
            max_framebuffers: 32,
            max_pipelines: 16,
            check_every_n_frames: 240,
        }
    }
}

pub struct DiscardPoolMonitor<D: GpuDevice> {
    pool: Arc<DiscardPool<D>>,
    config: DiscardPoolMonitorConfig,
    frame_counter: AtomicU64,
}

impl<D: GpuDevice> DiscardPoolMonitor<D> {
    pub fn new(pool: Arc<DiscardPool<D>>, config: DiscardPoolMonitorConfig) -> Self {
        Self {
            pool,
            config,
            frame_counter: AtomicU64::new(0),
        }
    }

    /// Call once per frame. Every `check_every_n_frames` calls, checks
    /// bucket pressure and triggers a sweep if needed.
    pub fn on_frame(&self) {
        let count = self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1;
        if count < self.config.check_every_n_frames as u64 {
            return;
        }
        self.frame_counter.store(0, Ordering::Relaxed);
        self.check_and_cleanup();
    }

    fn check_and_cleanup(&self) {
        let sizes = self.pool.sizes();
        let over_limit = sizes.images > self.config.max_images
            || sizes.buffers > self.config.max_buffers
            || sizes.framebuffers > self.config.max_framebuffers
            || sizes.pipelines > self.config.max_pipelines;
        if over_limit {
            log::info!(
                "discard pool pressure: {} images, {} buffers, {} framebuffers, {} pipelines; sweeping",
                sizes.images,
                sizes.buffers,
                sizes.framebuffers,
                sizes.pipelines
            );
            self.pool.destroy_discarded_resources(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64 as Counter;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeDevice {
        timeline_value: Counter,
        destroyed_image_views: StdMutex<Vec<vk::ImageView>>,
        destroyed_pipelines: StdMutex<Vec<vk::Pipeline>>,
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
        fn destroy_image_view(&self, view: vk::ImageView) {
            self.destroyed_image_views.lock().unwrap().push(view);
        }
        fn destroy_buffer_view(&self, _view: vk::BufferView) {}
        fn destroy_shader_module(&self, _module: vk::ShaderModule) {}
        fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
            self.destroyed_pipelines.lock().unwrap().push(pipeline);
        }
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
            _count: u32,
        ) -> Vec<vk::CommandBuffer> {
            Vec::new()
        }
        fn reset_command_pool(&self, _pool: vk::CommandPool) {}
    }

    #[test]
    fn sweep_releases_only_entries_at_or_below_current_timeline() {
        let device = Arc::new(FakeDevice::default());
        let pool = DiscardPool::new(Arc::clone(&device));

        pool.discard_image_view(vk::ImageView::from_raw(1), 10);
        pool.discard_image_view(vk::ImageView::from_raw(2), 20);

        device.timeline_value.store(10, Ordering::SeqCst);
        pool.destroy_discarded_resources(false);
        assert_eq!(
            *device.destroyed_image_views.lock().unwrap(),
            vec![vk::ImageView::from_raw(1)]
        );

        device.timeline_value.store(20, Ordering::SeqCst);
        pool.destroy_discarded_resources(false);
        assert_eq!(
            *device.destroyed_image_views.lock().unwrap(),
            vec![vk::ImageView::from_raw(1), vk::ImageView::from_raw(2)]
        );
    }

    #[test]
    fn force_sweep_ignores_timeline_value() {
        let device = Arc::new(FakeDevice::default());
        let pool = DiscardPool::new(Arc::clone(&device));
        pool.discard_pipeline(vk::Pipeline::from_raw(7), u64::MAX - 1);

        pool.destroy_discarded_resources(true);
        assert_eq!(
            *device.destroyed_pipelines.lock().unwrap(),
            vec![vk::Pipeline::from_raw(7)]
        );
    }

    #[test]
    fn monitor_triggers_sweep_only_after_threshold_frames_and_pressure() {
        let device = Arc::new(FakeDevice::default());
        device.timeline_value.store(u64::MAX, Ordering::SeqCst);
        let pool = Arc::new(DiscardPool::new(Arc::clone(&device)));
        for i in 0..5 {
            pool.discard_pipeline(vk::Pipeline::from_raw(i), 0);
        }

        let monitor = DiscardPoolMonitor::new(
            Arc::clone(&pool),
            DiscardPoolMonitorConfig {
                max_pipelines: 2,
                check_every_n_frames: 3,
                ..Default::default()
            },
        );

        monitor.on_frame();
        monitor.on_frame();
        assert_eq!(pool.sizes().pipelines, 5, "sweep must not run before the Nth frame");

        monitor.on_frame();
        assert_eq!(pool.sizes().pipelines, 0, "sweep should run on the Nth frame once over threshold");
    }

    #[test]
    fn move_data_retags_and_merges_src_into_self() {
        let device = Arc::new(FakeDevice::default());
        let src = DiscardPool::new(Arc::clone(&device));
        let dst = DiscardPool::new(Arc::clone(&device));

        src.discard_pipeline(vk::Pipeline::from_raw(1), 5);
        src.discard_image_view(vk::ImageView::from_raw(2), 7);
        dst.discard_pipeline(vk::Pipeline::from_raw(9), 3);

        dst.move_data(&src, 100);

        assert_eq!(src.sizes().pipelines, 0);
        assert_eq!(dst.sizes().pipelines, 2);

        device.timeline_value.store(100, Ordering::SeqCst);
        dst.destroy_discarded_resources(false);
        assert_eq!(
            *device.destroyed_pipelines.lock().unwrap(),
            vec![vk::Pipeline::from_raw(9), vk::Pipeline::from_raw(1)]
        );
        assert_eq!(
            *device.destroyed_image_views.lock().unwrap(),
            vec![vk::ImageView::from_raw(2)]
        );
    }

    #[test]
    fn move_data_onto_self_is_a_plain_retag() {
        let device = Arc::new(FakeDevice::default());
        let pool = DiscardPool::new(Arc::clone(&device));
        pool.discard_pipeline(vk::Pipeline::from_raw(3), 1);

        pool.move_data(&pool, 50);

        device.timeline_value.store(50, Ordering::SeqCst);
        pool.destroy_discarded_resources(false);
        assert_eq!(
            *device.destroyed_pipelines.lock().unwrap(),
            vec![vk::Pipeline::from_raw(3)]
        );
    }

    struct RecordingRecycler {
        recycled: StdMutex<Vec<vk::CommandPool>>,
    }

    impl CommandPoolRecycler for RecordingRecycler {
        fn recycle_command_pool(&self, _thread: ThreadId, pool: vk::CommandPool) {
            self.recycled.lock().unwrap().push(pool);
        }
    }

    #[test]
    fn command_pool_discard_recycles_instead_of_destroying() {
        let device = Arc::new(FakeDevice::default());
        let pool = DiscardPool::new(Arc::clone(&device));
        let recycler = Arc::new(RecordingRecycler {
            recycled: StdMutex::new(Vec::new()),
        });

        pool.discard_command_pool_for_reuse(
            std::thread::current().id(),
            vk::CommandPool::from_raw(42),
            recycler.clone(),
            0,
        );
        pool.destroy_discarded_resources(true);

        assert_eq!(
            *recycler.recycled.lock().unwrap(),
            vec![vk::CommandPool::from_raw(42)]
        );
    }
}
