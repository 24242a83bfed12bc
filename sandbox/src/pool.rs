//! Worker pool bootstrap.
//!
//! Each worker is an OS thread owning its own wasmtime store and an
//! instance of the worker image, which imports the sandbox's shared memory
//! instead of defining one. On startup a worker calls `worker_attach`, which
//! atomically increments a readiness cell in shared memory and notifies
//! waiters. The bootstrapping thread waits on that cell until every worker
//! has attached, then the pool is published.
//!
//! Workers then sit in rayon's dispatch loop until the pool shuts down, and
//! call `worker_detach` on the way out.
//!
//! If any worker fails to attach, bootstrap fails as a whole. Workers that
//! already attached are left running: the partial pool is parked on the
//! sandbox rather than torn down.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use rayon::{ThreadBuilder, ThreadPool, ThreadPoolBuilder};
use wasmtime::{Engine, ExternType, Linker, Module, SharedMemory, Store, TypedFunc, ValType};

use crate::error::{Result, SandboxError};
use crate::runtime::Sandbox;

/// Built-in worker image.
pub const WORKER_IMAGE: &str = r#"
(module
  (import "env" "memory" (memory 1 65536 shared))
  (func (export "worker_attach") (param $cell i32)
    (drop (i32.atomic.rmw.add (local.get $cell) (i32.const 1)))
    (drop (memory.atomic.notify (local.get $cell) (i32.const -1))))
  (func (export "worker_detach") (param $cell i32)
    (drop (i32.atomic.rmw.sub (local.get $cell) (i32.const 1)))
    (drop (memory.atomic.notify (local.get $cell) (i32.const -1)))))
"#;

const ATTACH_EXPORT: &str = "worker_attach";
const DETACH_EXPORT: &str = "worker_detach";

/// Upper bound on a single wait for the readiness cell.
const READY_POLL: Duration = Duration::from_millis(25);

/// The compiled worker image, shared by every worker.
#[derive(Clone)]
pub struct WorkerImage {
    module: Module,
}

impl std::fmt::Debug for WorkerImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerImage").finish_non_exhaustive()
    }
}

impl WorkerImage {
    /// Compile `source` (text format), or the built-in image when `None`,
    /// and check it against the worker ABI.
    pub fn compile(engine: &Engine, source: Option<&str>) -> Result<Self> {
        let module = Module::new(engine, source.unwrap_or(WORKER_IMAGE))?;
        validate_image(&module)?;
        Ok(Self { module })
    }

    pub fn module(&self) -> &Module {
        &self.module
    }
}

fn validate_image(module: &Module) -> Result<()> {
    let mut imports = module.imports();
    match (imports.next(), imports.next()) {
        (Some(import), None)
            if import.module() == "env"
                && import.name() == "memory"
                && matches!(import.ty(), ExternType::Memory(ref m) if m.is_shared()) => {}
        _ => {
            return Err(SandboxError::Config(
                "worker image must import exactly one shared memory as env.memory".into(),
            ))
        }
    }

    for name in [ATTACH_EXPORT, DETACH_EXPORT] {
        let export = module.get_export(name).ok_or_else(|| {
            SandboxError::Config(format!("worker image is missing export '{name}'"))
        })?;
        let ok = match export {
            ExternType::Func(ty) => {
                let params: Vec<ValType> = ty.params().collect();
                params.len() == 1 && matches!(params[0], ValType::I32) && ty.results().len() == 0
            }
            _ => false,
        };
        if !ok {
            return Err(SandboxError::Config(format!(
                "worker image export '{name}' must be a function of (i32) -> ()"
            )));
        }
    }
    Ok(())
}

/// One worker's instance of the worker image.
struct WorkerContext {
    store: Store<()>,
    detach: TypedFunc<i32, ()>,
    cell: u32,
    index: usize,
}

impl WorkerContext {
    /// Instantiate the image against the shared memory and report ready.
    fn attach(
        engine: &Engine,
        module: &Module,
        shared: &SharedMemory,
        cell: u32,
        index: usize,
    ) -> Result<Self> {
        let mut store = Store::new(engine, ());
        let mut linker = Linker::new(engine);
        linker.define(&store, "env", "memory", shared.clone())?;
        let instance = linker.instantiate(&mut store, module)?;
        let attach = instance.get_typed_func::<i32, ()>(&mut store, ATTACH_EXPORT)?;
        let detach = instance.get_typed_func::<i32, ()>(&mut store, DETACH_EXPORT)?;

        attach
            .call(&mut store, cell as i32)
            .map_err(|e| SandboxError::GuestTrapped(format!("worker {index} attach: {e}")))?;
        tracing::debug!(worker = index, "worker attached");

        Ok(Self {
            store,
            detach,
            cell,
            index,
        })
    }

    /// Serve the pool until it shuts down, then detach.
    fn run(mut self, thread: ThreadBuilder) {
        thread.run();
        if let Err(e) = self.detach.call(&mut self.store, self.cell as i32) {
            tracing::warn!(worker = self.index, error = %e, "worker detach trapped");
        }
        tracing::debug!(worker = self.index, "worker exited");
    }
}

/// A fully attached pool.
pub struct WorkerPool {
    pool: ThreadPool,
    threads: usize,
    ready_cell: u32,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads)
            .field("ready_cell", &self.ready_cell)
            .finish()
    }
}

impl WorkerPool {
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Address of the readiness cell in shared memory.
    pub fn ready_cell(&self) -> u32 {
        self.ready_cell
    }

    /// Run `op` inside the pool.
    pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        self.pool.install(op)
    }
}

/// Start `threads` workers and block until all have attached.
pub(crate) fn bootstrap(sandbox: &Sandbox, threads: usize) -> Result<WorkerPool> {
    let config = sandbox.config();
    let memory = sandbox.memory();

    let cell = sandbox.malloc(4, 4)?;
    memory.atomic_store_u32(cell, 0)?;

    let engine = sandbox.engine().clone();
    let module = sandbox.worker_image().module().clone();
    let shared = memory.shared().clone();
    let stack_size = config.worker_stack_size;
    let prefix = config.worker_name_prefix.clone();
    let (failures_tx, failures_rx) = mpsc::channel::<SandboxError>();

    let pool = ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |index| format!("{prefix}{index}"))
        .spawn_handler(move |thread| {
            let engine = engine.clone();
            let module = module.clone();
            let shared = shared.clone();
            let failures = failures_tx.clone();

            let mut builder = std::thread::Builder::new().stack_size(stack_size);
            if let Some(name) = thread.name() {
                builder = builder.name(name.to_owned());
            }
            builder.spawn(move || {
                let index = thread.index();
                match WorkerContext::attach(&engine, &module, &shared, cell, index) {
                    Ok(context) => context.run(thread),
                    Err(e) => {
                        tracing::error!(worker = index, error = %e, "worker failed to attach");
                        let _ = failures.send(e);
                    }
                }
            })?;
            Ok(())
        })
        .build()
        .map_err(|e| SandboxError::Pool(format!("cannot start worker threads: {e}")))?;

    let deadline = Instant::now() + config.bootstrap_timeout;
    loop {
        let ready = memory.atomic_load_u32(cell)?;
        if ready as usize >= threads {
            break;
        }
        if let Ok(e) = failures_rx.try_recv() {
            sandbox.strand(pool);
            return Err(SandboxError::Pool(format!(
                "worker failed to attach ({ready} of {threads} ready): {e}"
            )));
        }
        let now = Instant::now();
        if now >= deadline {
            sandbox.strand(pool);
            return Err(SandboxError::Pool(format!(
                "timed out waiting for workers: {ready} of {threads} ready"
            )));
        }
        memory.atomic_wait32(cell, ready, Some((deadline - now).min(READY_POLL)))?;
    }

    Ok(WorkerPool {
        pool,
        threads,
        ready_cell: cell,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        let mut config = wasmtime::Config::new();
        config.wasm_threads(true);
        Engine::new(&config).unwrap()
    }

    #[test]
    fn test_builtin_image_validates() {
        assert!(WorkerImage::compile(&engine(), None).is_ok());
    }

    #[test]
    fn test_image_without_shared_memory_rejected() {
        let wat = r#"
            (module
              (func (export "worker_attach") (param i32))
              (func (export "worker_detach") (param i32)))
        "#;
        let err = WorkerImage::compile(&engine(), Some(wat)).unwrap_err();
        assert!(err.to_string().contains("env.memory"));
    }

    #[test]
    fn test_image_with_wrong_signature_rejected() {
        let wat = r#"
            (module
              (import "env" "memory" (memory 1 65536 shared))
              (func (export "worker_attach") (param i32))
              (func (export "worker_detach") (param i64)))
        "#;
        let err = WorkerImage::compile(&engine(), Some(wat)).unwrap_err();
        assert!(err.to_string().contains("worker_detach"));
    }
}
