//! Sandbox runtime: engine, shared memory, heap, and the worker pool.
//!
//! The `Sandbox` is the coordinator that owns everything the boundary
//! shares: the linear memory every worker attaches to, the guest heap over
//! it, the external reference table, and the resource tables behind every
//! handle. Host bindings hold it through an `Arc`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use rayon::prelude::*;
use wasmtime::{Config, Engine};

use crate::alloc::GuestAllocator;
use crate::config::{SandboxConfig, WASM_PAGE_SIZE};
use crate::error::{Result, SandboxError};
use crate::externref::ExternRefTable;
use crate::guest::Resources;
use crate::memory::LinearMemory;
use crate::pool::{self, WorkerImage, WorkerPool};
use crate::registry::HandleId;

/// The wallet sandbox.
pub struct Sandbox {
    config: SandboxConfig,
    engine: Engine,
    memory: LinearMemory,
    heap: Mutex<GuestAllocator>,
    externrefs: ExternRefTable,
    pub(crate) resources: Resources,
    wrappers: Mutex<HashSet<HandleId>>,
    worker_image: WorkerImage,
    pool: OnceLock<WorkerPool>,
    bootstrapping: AtomicBool,
    stranded: Mutex<Vec<rayon::ThreadPool>>,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("memory", &self.memory)
            .field("threads", &self.thread_count())
            .field("live_handles", &self.live_handles())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Sandbox {
    /// Create a sandbox with its shared memory and compiled worker image.
    pub fn new(config: SandboxConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let engine = create_engine()?;
        let memory =
            LinearMemory::new(&engine, config.initial_memory_pages, config.max_memory_pages)?;
        let worker_image = WorkerImage::compile(&engine, config.worker_image.as_deref())?;
        let heap_limit = u64::from(config.max_memory_pages) * WASM_PAGE_SIZE;

        tracing::debug!(
            initial_pages = config.initial_memory_pages,
            max_pages = config.max_memory_pages,
            "sandbox created"
        );
        Ok(Arc::new(Self {
            engine,
            memory,
            heap: Mutex::new(GuestAllocator::new(heap_limit)),
            externrefs: ExternRefTable::new(),
            resources: Resources::new(),
            wrappers: Mutex::new(HashSet::new()),
            worker_image,
            pool: OnceLock::new(),
            bootstrapping: AtomicBool::new(false),
            stranded: Mutex::new(Vec::new()),
            config,
        }))
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn memory(&self) -> &LinearMemory {
        &self.memory
    }

    pub fn externrefs(&self) -> &ExternRefTable {
        &self.externrefs
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }

    pub(crate) fn worker_image(&self) -> &WorkerImage {
        &self.worker_image
    }

    // ── Guest heap ──

    /// Allocate `size` bytes in linear memory, growing it if needed.
    pub fn malloc(&self, size: u32, align: u32) -> Result<u32> {
        let mut heap = lock(&self.heap);
        let ptr = heap.allocate(size, align)?;
        if let Err(e) = self.memory.ensure_size(heap.top()) {
            heap.deallocate(ptr, size, align)?;
            return Err(e);
        }
        Ok(ptr)
    }

    /// Resize an allocation, moving it if it cannot grow in place.
    /// A null `ptr` allocates.
    pub fn realloc(&self, ptr: u32, old_size: u32, new_size: u32, align: u32) -> Result<u32> {
        if ptr == 0 {
            return self.malloc(new_size, align);
        }
        let mut heap = lock(&self.heap);
        if heap.resize_in_place(ptr, old_size, new_size)? {
            if let Err(e) = self.memory.ensure_size(heap.top()) {
                heap.resize_in_place(ptr, new_size, old_size)?;
                return Err(e);
            }
            return Ok(ptr);
        }

        let moved = heap.allocate(new_size, align)?;
        if let Err(e) = self.memory.ensure_size(heap.top()) {
            heap.deallocate(moved, new_size, align)?;
            return Err(e);
        }
        self.memory.copy_within(ptr, moved, old_size.min(new_size))?;
        heap.deallocate(ptr, old_size, align)?;
        Ok(moved)
    }

    pub fn free(&self, ptr: u32, size: u32, align: u32) -> Result<()> {
        lock(&self.heap).deallocate(ptr, size, align)
    }

    /// Heap blocks currently allocated.
    pub fn live_allocations(&self) -> usize {
        lock(&self.heap).live_allocations()
    }

    // ── Handles ──

    pub(crate) fn register_wrapper(&self, id: HandleId) -> Result<()> {
        if !lock(&self.wrappers).insert(id) {
            return Err(SandboxError::lifecycle(format!("handle {id} is already wrapped")));
        }
        Ok(())
    }

    pub(crate) fn unregister_wrapper(&self, id: HandleId) {
        lock(&self.wrappers).remove(&id);
    }

    /// Whether some host wrapper currently owns `id`.
    pub fn is_wrapped(&self, id: HandleId) -> bool {
        lock(&self.wrappers).contains(&id)
    }

    /// Whether `id` names an object that has not been consumed or freed.
    pub fn is_live(&self, id: HandleId) -> bool {
        self.resources.contains(id)
    }

    /// Free the object behind `id`.
    pub fn free_resource(&self, id: HandleId) -> Result<()> {
        crate::guest::exports::resource_free(self, id.raw()).into_result(self)?;
        Ok(())
    }

    /// Objects alive in the sandbox, across all classes.
    pub fn live_handles(&self) -> usize {
        self.resources.live_count()
    }

    // ── Worker pool ──

    /// Start `threads` workers and wait until every one has attached.
    ///
    /// May succeed only once per sandbox.
    pub async fn init_thread_pool(self: &Arc<Self>, threads: usize) -> Result<()> {
        if threads == 0 || threads > self.config.max_workers {
            return Err(SandboxError::Pool(format!(
                "thread count must be between 1 and {}, got {threads}",
                self.config.max_workers
            )));
        }
        if self.pool.get().is_some()
            || self
                .bootstrapping
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return Err(SandboxError::Pool("thread pool already initialized".into()));
        }

        tracing::info!(threads, "starting worker pool");
        let sandbox = Arc::clone(self);
        let started = tokio::task::spawn_blocking(move || pool::bootstrap(&sandbox, threads))
            .await
            .map_err(|e| SandboxError::Pool(format!("bootstrap task failed: {e}")));

        let result = match started {
            Ok(Ok(pool)) => {
                let _ = self.pool.set(pool);
                tracing::info!(threads, "worker pool ready");
                Ok(())
            }
            Ok(Err(e)) | Err(e) => {
                tracing::error!(threads, error = %e, "worker pool bootstrap failed");
                Err(e)
            }
        };
        self.bootstrapping.store(false, Ordering::Release);
        result
    }

    /// Threads available for parallel work: the pool size, or 1 before the
    /// pool is initialized.
    pub fn thread_count(&self) -> usize {
        self.pool.get().map_or(1, WorkerPool::threads)
    }

    /// Workers currently attached, as counted in shared memory.
    pub fn ready_workers(&self) -> Result<u32> {
        match self.pool.get() {
            Some(pool) => self.memory.atomic_load_u32(pool.ready_cell()),
            None => Ok(0),
        }
    }

    /// Map `f` over `items` on the worker pool, or sequentially on the
    /// calling thread when there is none.
    pub fn par_map<T, R>(&self, items: &[T], f: impl Fn(&T) -> R + Sync + Send) -> Vec<R>
    where
        T: Sync,
        R: Send,
    {
        match self.pool.get() {
            Some(pool) => pool.install(|| items.par_iter().map(f).collect()),
            None => items.iter().map(f).collect(),
        }
    }

    /// Park a partially started pool whose bootstrap failed.
    pub(crate) fn strand(&self, pool: rayon::ThreadPool) {
        let mut stranded = lock(&self.stranded);
        stranded.push(pool);
        tracing::warn!(stranded = stranded.len(), "left partially started worker pool running");
    }
}

fn create_engine() -> Result<Engine> {
    let mut config = Config::new();
    config.wasm_threads(true);
    Ok(Engine::new(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> Arc<Sandbox> {
        Sandbox::new(SandboxConfig {
            initial_memory_pages: 1,
            max_memory_pages: 64,
            ..SandboxConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SandboxConfig {
            initial_memory_pages: 0,
            ..SandboxConfig::default()
        };
        assert!(matches!(Sandbox::new(config), Err(SandboxError::Config(_))));
    }

    #[test]
    fn test_malloc_grows_memory() {
        let sb = sandbox();
        assert_eq!(sb.memory().pages(), 1);
        let epoch = sb.memory().epoch();
        let ptr = sb.malloc(3 * WASM_PAGE_SIZE as u32, 8).unwrap();
        assert!(sb.memory().pages() >= 4);
        assert!(sb.memory().epoch() > epoch);
        sb.memory().write_bytes(ptr + 3 * WASM_PAGE_SIZE as u32 - 1, &[1]).unwrap();
        sb.free(ptr, 3 * WASM_PAGE_SIZE as u32, 8).unwrap();
        assert_eq!(sb.live_allocations(), 0);
    }

    #[test]
    fn test_realloc_moves_and_preserves_contents() {
        let sb = sandbox();
        let a = sb.malloc(8, 1).unwrap();
        sb.memory().write_bytes(a, b"abcdefgh").unwrap();
        let _blocker = sb.malloc(8, 1).unwrap();
        let b = sb.realloc(a, 8, 64, 1).unwrap();
        assert_ne!(a, b);
        assert_eq!(sb.memory().read_bytes(b, 8).unwrap(), b"abcdefgh");
        assert!(sb.free(a, 8, 1).is_err());
        sb.free(b, 64, 1).unwrap();
    }

    #[test]
    fn test_heap_limit_is_memory_error() {
        let sb = sandbox();
        let err = sb.malloc(65 * WASM_PAGE_SIZE as u32, 8).unwrap_err();
        assert!(matches!(err, SandboxError::Memory(_)));
        assert_eq!(sb.live_allocations(), 0);
    }

    #[test]
    fn test_par_map_without_pool_is_sequential() {
        let sb = sandbox();
        assert_eq!(sb.thread_count(), 1);
        assert_eq!(sb.ready_workers().unwrap(), 0);
        let doubled = sb.par_map(&[1, 2, 3], |x| x * 2);
        assert_eq!(doubled, vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn test_thread_count_bounds() {
        let sb = sandbox();
        assert!(matches!(sb.init_thread_pool(0).await, Err(SandboxError::Pool(_))));
        assert!(sb.init_thread_pool(10_000).await.is_err());
        assert_eq!(sb.thread_count(), 1);
    }
}
