//! Per-thread command pool registry. Grounded on
//! `src/core/public/render/vk/command-pools.h` /
//! `src/core/private/render/vk/command-pools.cpp`: every thread that calls
//! [`CommandPoolRegistry::allocate_primary`]/`allocate_secondary` gets its
//! own lazily-created pseudo-TLS entry (an active pool plus a recycled-pool
//! channel); the Discard Pool is the sole producer on that channel (it owns
//! [`CommandPoolRecycler::recycle_command_pool`]), the owning thread the
//! sole consumer — hence `vkrt-queue`'s SPSC ring rather than the MPMC one.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::{Mutex, RwLock};

use vkrt_discard::{CommandPoolRecycler, DiscardPool};
use vkrt_gpu_iface::{vk, GpuDevice};
use vkrt_queue::SpscQueue;

#[cfg(feature = "command-buffer-caching")]
use std::collections::HashMap as CacheMap;

struct ThreadStorage {
    active: Mutex<Option<vk::CommandPool>>,
    recycled: SpscQueue<vk::CommandPool>,
    #[cfg(feature = "command-buffer-caching")]
    cache: Mutex<CacheMap<(vk::CommandPool, u64), vk::CommandBuffer>>,
}

impl ThreadStorage {
    fn new(spsc_capacity: usize) -> Self {
        Self {
            active: Mutex::new(None),
            recycled: SpscQueue::new(spsc_capacity),
            #[cfg(feature = "command-buffer-caching")]
            cache: Mutex::new(CacheMap::with_capacity(64)),
        }
    }
}

/// Owns one command pool per thread that has ever allocated a command
/// buffer through it, recycling discarded pools back to their owning
/// thread instead of destroying them outright.
pub struct CommandPoolRegistry<D: GpuDevice> {
    device: Arc<D>,
    queue_family_index: u32,
    spsc_capacity: usize,
    registry: RwLock<HashMap<ThreadId, Arc<ThreadStorage>>>,
}

impl<D: GpuDevice + 'static> CommandPoolRegistry<D> {
    pub fn new(device: Arc<D>, queue_family_index: u32, spsc_capacity: usize) -> Self {
        Self {
            device,
            queue_family_index,
            spsc_capacity,
            registry: RwLock::new(HashMap::new()),
        }
    }

    /// Looks up (or lazily creates) the calling thread's storage. Mirrors
    /// `ensureThreadPoolsForThisThread`'s read-lock-first, then
    /// write-lock-and-recheck sequence.
    fn ensure_thread_storage(&self) -> Arc<ThreadStorage> {
        let tid = std::thread::current().id();
        if let Some(tp) = self.registry.read().get(&tid) {
            return Arc::clone(tp);
        }
        let mut registry = self.registry.write();
        if let Some(tp) = registry.get(&tid) {
            return Arc::clone(tp);
        }
        let tp = Arc::new(ThreadStorage::new(self.spsc_capacity));
        registry.insert(tid, Arc::clone(&tp));
        tp
    }

    fn storage_for(&self, tid: ThreadId) -> Option<Arc<ThreadStorage>> {
        self.registry.read().get(&tid).cloned()
    }

    fn allocate_for_level(
        &self,
        caller_id: u64,
        level: vk::CommandBufferLevel,
    ) -> vk::CommandBuffer {
        let tp = self.ensure_thread_storage();
        let mut active = tp.active.lock();
        if active.is_none() {
            *active = Some(tp.recycled.try_pop().unwrap_or_else(|_| {
                self.device
                    .create_command_pool(self.queue_family_index)
                    .unwrap_or_else(|_| {
                        vkrt_error::abort_on_fatal(vkrt_error::FatalError::CommandPoolCreateFailed {
                            queue_family: self.queue_family_index,
                        })
                    })
            }));
        }
        let pool = active.unwrap();
        drop(active);

        #[cfg(feature = "command-buffer-caching")]
        {
            let mut cache = tp.cache.lock();
            if let Some(&cmd) = cache.get(&(pool, caller_id)) {
                return cmd;
            }
            let cmd = self
                .device
                .allocate_command_buffers(pool, level, 1)
                .pop()
                .expect("allocate_command_buffers must return exactly one buffer");
            cache.insert((pool, caller_id), cmd);
            cmd
        }
        #[cfg(not(feature = "command-buffer-caching"))]
        {
            self.device
                .allocate_command_buffers(pool, level, 1)
                .pop()
                .expect("allocate_command_buffers must return exactly one buffer")
        }
    }

    pub fn allocate_primary(&self, caller_id: u64) -> vk::CommandBuffer {
        self.allocate_for_level(caller_id, vk::CommandBufferLevel::PRIMARY)
    }

    pub fn allocate_secondary(&self, caller_id: u64) -> vk::CommandBuffer {
        self.allocate_for_level(caller_id, vk::CommandBufferLevel::SECONDARY)
    }

    /// Hands the calling thread's active pool to `discard_pool` for
    /// reuse once `value` is reached on its timeline, clearing any cached
    /// command buffers that belonged to it. A no-op if the thread has no
    /// active pool. Requires an `Arc<Self>` receiver because the Discard
    /// Pool stores the registry as `Arc<dyn CommandPoolRecycler>`.
    pub fn discard_active_pool(self: &Arc<Self>, discard_pool: &DiscardPool<D>, value: u64) {
        let tp = self.ensure_thread_storage();
        let mut active = tp.active.lock();
        let Some(pool) = active.take() else {
            return;
        };
        drop(active);

        #[cfg(feature = "command-buffer-caching")]
        tp.cache.lock().retain(|(cached_pool, _), _| *cached_pool != pool);

        let owner = std::thread::current().id();
        discard_pool.discard_command_pool_for_reuse(owner, pool, Arc::clone(self) as _, value);
    }

    /// Drains and destroys the calling thread's recycled-pool channel and
    /// active pool, then removes its registry entry. Intended to run on a
    /// thread as it winds down, rather than relying solely on the
    /// registry's own `Drop`.
    pub fn thread_shutdown(&self) {
        let tid = std::thread::current().id();
        let tp = { self.registry.write().remove(&tid) };
        let Some(tp) = tp else {
            return;
        };
        self.drain_and_destroy(&tp);
    }

    fn drain_and_destroy(&self, tp: &ThreadStorage) {
        let mut drained = Vec::new();
        tp.recycled.drain_to(&mut drained);
        for pool in drained {
            self.device.destroy_command_pool(pool);
        }
        if let Some(pool) = tp.active.lock().take() {
            self.device.destroy_command_pool(pool);
        }
    }
}

impl<D: GpuDevice> CommandPoolRecycler for CommandPoolRegistry<D> {
    /// Producer side (called from the Discard Pool's sweep): pushes the
    /// pool onto its owner's recycled channel, destroying it immediately
    /// if the owner has since shut down or its channel is full.
    fn recycle_command_pool(&self, thread: ThreadId, pool: vk::CommandPool) {
        match self.storage_for(thread) {
            None => self.device.destroy_command_pool(pool),
            Some(tp) => {
                if let Err(pool) = tp.recycled.try_push(pool) {
                    log::warn!("command pool recycle channel full, destroying instead");
                    self.device.destroy_command_pool(pool);
                }
            }
        }
    }
}

impl<D: GpuDevice> Drop for CommandPoolRegistry<D> {
    fn drop(&mut self) {
        let registry = std::mem::take(&mut *self.registry.write());
        for (_, tp) in registry {
            self.drain_and_destroy(&tp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeDevice {
        next_pool: std::sync::atomic::AtomicU64,
        created_pools: StdMutex<Vec<vk::CommandPool>>,
        destroyed_pools: StdMutex<Vec<vk::CommandPool>>,
    }

    impl GpuDevice for FakeDevice {
        fn handle(&self) -> vk::Device {
            vk::Device::null()
        }
        fn create_timeline_semaphore(&self, _initial_value: u64) -> Result<vk::Semaphore, vkrt_gpu_iface::GpuCreateError> {
            Ok(vk::Semaphore::null())
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
        fn destroy_command_pool(&self, pool: vk::CommandPool) {
            self.destroyed_pools.lock().unwrap().push(pool);
        }
        fn destroy_image(&self, _image: vk::Image, _allocation: vkrt_gpu_iface::GpuAllocation) {}
        fn destroy_buffer(&self, _buffer: vk::Buffer, _allocation: vkrt_gpu_iface::GpuAllocation) {}
        fn create_command_pool(&self, _queue_family: u32) -> Result<vk::CommandPool, vkrt_gpu_iface::GpuCreateError> {
            use std::sync::atomic::Ordering;
            let raw = self.next_pool.fetch_add(1, Ordering::SeqCst) + 1;
            let pool = vk::CommandPool::from_raw(raw);
            self.created_pools.lock().unwrap().push(pool);
            Ok(pool)
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

    #[test]
    fn first_allocation_on_a_thread_creates_a_pool() {
        let device = Arc::new(FakeDevice::default());
        let registry = CommandPoolRegistry::new(Arc::clone(&device), 0, 8);
        registry.allocate_primary(1);
        assert_eq!(device.created_pools.lock().unwrap().len(), 1);
    }

    #[cfg(feature = "command-buffer-caching")]
    #[test]
    fn repeated_allocation_with_same_caller_id_hits_the_cache() {
        let device = Arc::new(FakeDevice::default());
        let registry = CommandPoolRegistry::new(Arc::clone(&device), 0, 8);
        let a = registry.allocate_primary(42);
        let b = registry.allocate_primary(42);
        assert_eq!(a, b);
    }

    #[test]
    fn thread_shutdown_destroys_active_and_recycled_pools() {
        let device = Arc::new(FakeDevice::default());
        let registry = CommandPoolRegistry::new(Arc::clone(&device), 0, 8);
        registry.allocate_primary(1);
        registry.thread_shutdown();
        assert_eq!(device.destroyed_pools.lock().unwrap().len(), 1);
    }

    #[test]
    fn recycle_onto_a_shutdown_thread_destroys_immediately() {
        let device = Arc::new(FakeDevice::default());
        let registry = CommandPoolRegistry::new(Arc::clone(&device), 0, 8);
        // No thread storage has ever been created for this made-up id, so
        // the registry should fall back to destroying directly.
        let unknown_thread = std::thread::spawn(|| std::thread::current().id())
            .join()
            .unwrap();
        registry.recycle_command_pool(unknown_thread, vk::CommandPool::from_raw(99));
        assert_eq!(
            *device.destroyed_pools.lock().unwrap(),
            vec![vk::CommandPool::from_raw(99)]
        );
    }

    #[test]
    fn recycled_pool_is_reused_before_creating_a_new_one() {
        let device = Arc::new(FakeDevice::default());
        let registry = Arc::new(CommandPoolRegistry::new(Arc::clone(&device), 0, 8));
        let gpu_device = Arc::new(FakeDevice::default());
        let discard_pool = DiscardPool::new(gpu_device);

        registry.allocate_primary(1);
        assert_eq!(device.created_pools.lock().unwrap().len(), 1);

        registry.discard_active_pool(&discard_pool, 0);
        discard_pool.destroy_discarded_resources(true);

        registry.allocate_primary(2);
        // The recycled pool should have been handed back rather than a
        // fresh `create_command_pool` call happening.
        assert_eq!(device.created_pools.lock().unwrap().len(), 1);
    }
}
