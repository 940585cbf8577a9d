//! Library lifecycle and the process-global runtime.
//!
//! The backend registry is the one piece of process-wide state; it is built
//! once by `init`, torn down by `finalize`, and those two calls are not
//! thread-safe against themselves. Everything else the public operations
//! touch (handle table, type factory) hangs off the same runtime record.

use std::sync::{Arc, RwLock};

use log::warn;

use strata_backend::{BackendRegistry, SimBackend};
use strata_core::builtin::Builtin;
use strata_core::handle::HandleTable;
use strata_core::node::{TypeFactory, TypeHooks};

use crate::error::Error;

/// Engine configuration handed to [`init_with`](crate::init_with).
#[derive(Debug, Clone)]
pub struct Config {
    /// Bytes reserved per backend for each pre-allocated staging slab.
    pub staging_slab_bytes: usize,
    /// Devices exposed by each simulated backend; 0 disables device
    /// backends entirely (host-only build).
    pub sim_devices: u32,
    /// Number of simulated backends to register. More than one exercises
    /// cross-backend staging.
    pub sim_backends: u32,
    /// Simulated event latency: completion is reported only after this
    /// many probes.
    pub sim_latency: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            staging_slab_bytes: 1 << 20,
            sim_devices: 2,
            sim_backends: 1,
            sim_latency: 0,
        }
    }
}

pub(crate) struct Runtime {
    pub(crate) table: HandleTable,
    pub(crate) registry: Arc<BackendRegistry>,
    pub(crate) factory: TypeFactory,
}

static RUNTIME: RwLock<Option<Arc<Runtime>>> = RwLock::new(None);

pub(crate) fn runtime() -> Result<Arc<Runtime>, Error> {
    RUNTIME
        .read()
        .unwrap()
        .clone()
        .ok_or(Error::NotInitialized)
}

const SIM_NAMES: [&str; 4] = ["sim", "sim2", "sim3", "sim4"];

/// Initialize the library with explicit configuration: register backends,
/// reserve staging slabs, and publish the predefined types.
pub fn init_with(config: Config) -> Result<(), Error> {
    let mut guard = RUNTIME.write().unwrap();
    if guard.is_some() {
        return Err(Error::AlreadyInitialized);
    }

    let mut registry = BackendRegistry::new();
    if config.sim_devices > 0 {
        for i in 0..config.sim_backends.min(SIM_NAMES.len() as u32) {
            let sim = SimBackend::named(SIM_NAMES[i as usize], config.sim_devices)
                .with_latency(config.sim_latency);
            if let Err(e) = registry.register(Box::new(sim), config.staging_slab_bytes) {
                let _ = registry.finalize();
                return Err(e.into());
            }
        }
    }
    let registry = Arc::new(registry);

    let factory = TypeFactory::new(Arc::clone(&registry) as Arc<dyn TypeHooks>);
    let table = HandleTable::new();
    for builtin in Builtin::ALL {
        match factory.builtin(builtin) {
            Ok(node) => table.publish_predefined(builtin.handle(), node),
            Err(e) => {
                table.clear();
                let _ = registry.finalize();
                return Err(e.into());
            }
        }
    }

    *guard = Some(Arc::new(Runtime {
        table,
        registry,
        factory,
    }));
    Ok(())
}

/// Initialize with defaults.
pub fn init() -> Result<(), Error> {
    init_with(Config::default())
}

/// Tear the library down: drop every handle-table entry (their free hooks
/// run), return the staging slabs, and finalize every backend.
pub fn finalize() -> Result<(), Error> {
    let runtime = RUNTIME
        .write()
        .unwrap()
        .take()
        .ok_or(Error::NotInitialized)?;

    let live = runtime.table.user_count();
    if live > 0 {
        warn!("finalize with {live} live user type handles");
    }
    runtime.table.clear();
    runtime.registry.finalize()?;
    Ok(())
}
