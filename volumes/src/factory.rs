// Process-wide registry of logical volume factories

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use strata_core::Result;

use crate::manager::{Disk, LogicalVolumeInfo, PhysicalVolumeInfo};

/// Aggregates physical volumes into logical ones, e.g. a dynamic-disk or
/// software-RAID layer. Factories must be stateless enough to live in the
/// process-wide registry.
pub trait LogicalVolumeFactory: Send + Sync {
    /// Registry key; registering a second factory with the same name is a
    /// no-op.
    fn name(&self) -> &'static str;

    /// True when this factory claims the volume, excluding it from
    /// one-to-one passthrough wrapping.
    fn handles_physical_volume(&self, volume: &PhysicalVolumeInfo) -> bool;

    /// Inject composite volumes built from the registered disks into the
    /// result map; may override existing entries.
    fn map_disks(
        &self,
        disks: &[Disk],
        result: &mut BTreeMap<String, LogicalVolumeInfo>,
    ) -> Result<()>;
}

type FactoryList = Arc<Vec<Arc<dyn LogicalVolumeFactory>>>;

// Readers take a snapshot; registration swaps in a fresh list so a scan in
// progress never observes an in-place mutation.
static REGISTRY: Lazy<Mutex<FactoryList>> = Lazy::new(|| Mutex::new(Arc::new(Vec::new())));

fn lock_registry() -> std::sync::MutexGuard<'static, FactoryList> {
    REGISTRY.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Immutable snapshot of the registered factories.
pub fn registered_factories() -> FactoryList {
    lock_registry().clone()
}

/// Append a factory to the process-wide list; a no-op when a factory with
/// the same name is already registered.
pub fn register_logical_volume_factory(factory: Arc<dyn LogicalVolumeFactory>) {
    let mut guard = lock_registry();
    if guard.iter().any(|existing| existing.name() == factory.name()) {
        return;
    }
    let mut next: Vec<Arc<dyn LogicalVolumeFactory>> = guard.as_ref().clone();
    next.push(factory);
    *guard = Arc::new(next);
}
