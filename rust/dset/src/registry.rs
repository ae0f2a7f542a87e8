//! Handle registry
//!
//! Maps opaque 64-bit handles to live datasets. A handle packs a slot index
//! with that slot's generation, so destroying a dataset and reusing its slot
//! never lets an old handle reach the new occupant.
//!
//! Locking is two-level: the slot table sits behind one `RwLock` that is only
//! held long enough to resolve or (un)register a handle, and each dataset has
//! its own `RwLock`. Operations on different datasets therefore never contend
//! beyond the brief table lookup.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::dataset::Dataset;
use crate::error::{DatasetError, Result};

/// Opaque dataset reference handed to callers. `0` is never valid.
pub type DatasetHandle = u64;

type Shared = Arc<RwLock<Dataset>>;

#[derive(Debug, Default)]
struct Entry {
    generation: u32,
    dataset: Option<Shared>,
}

#[derive(Debug, Default)]
struct Slots {
    entries: Vec<Entry>,
    free: Vec<usize>,
    live: usize,
}

fn encode(index: usize, generation: u32) -> DatasetHandle {
    (u64::from(generation) << 32) | (index as u64 + 1)
}

fn decode(handle: DatasetHandle) -> Option<(usize, u32)> {
    let low = handle & u64::from(u32::MAX);
    if low == 0 {
        return None;
    }
    Some(((low - 1) as usize, (handle >> 32) as u32))
}

fn invalid(handle: DatasetHandle) -> DatasetError {
    DatasetError::InvalidHandle(format!("Invalid dataset handle: {handle}"))
}

impl Slots {
    fn get(&self, handle: DatasetHandle) -> Option<&Shared> {
        let (index, generation) = decode(handle)?;
        let entry = self.entries.get(index)?;
        if entry.generation != generation {
            return None;
        }
        entry.dataset.as_ref()
    }
}

/// Owner of every live dataset reachable by handle.
#[derive(Debug)]
pub struct Registry {
    slots: RwLock<Slots>,
    config: EngineConfig,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Registry whose new datasets use `config`.
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            slots: RwLock::new(Slots::default()),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of live datasets.
    pub fn len(&self) -> usize {
        self.slots.read().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_live(&self, handle: DatasetHandle) -> bool {
        self.slots.read().get(handle).is_some()
    }

    /// Register an empty dataset.
    pub fn create(&self) -> Result<DatasetHandle> {
        self.insert(Dataset::new(self.config.clone()))
    }

    fn insert(&self, dataset: Dataset) -> Result<DatasetHandle> {
        let id = dataset.id();
        let shared = Arc::new(RwLock::new(dataset));
        let mut slots = self.slots.write();

        let index = match slots.free.pop() {
            Some(index) => index,
            None => {
                let index = slots.entries.len();
                if index >= u32::MAX as usize {
                    return Err(DatasetError::AllocationFailure(
                        "dataset handle space exhausted".to_string(),
                    ));
                }
                slots.entries.try_reserve(1)?;
                slots.entries.push(Entry::default());
                index
            }
        };
        let entry = &mut slots.entries[index];
        entry.dataset = Some(shared);
        let handle = encode(index, entry.generation);
        slots.live += 1;
        debug!(handle, dataset = id, "dataset registered");
        Ok(handle)
    }

    /// Look up a live dataset. The returned reference keeps the dataset alive
    /// even if its handle is destroyed concurrently.
    pub fn resolve(&self, handle: DatasetHandle) -> Result<Shared> {
        self.slots
            .read()
            .get(handle)
            .cloned()
            .ok_or_else(|| invalid(handle))
    }

    /// Unregister a dataset and free it once in-flight operations finish.
    pub fn destroy(&self, handle: DatasetHandle) -> Result<()> {
        let shared = {
            let mut slots = self.slots.write();
            let (index, _) = decode(handle).ok_or_else(|| invalid(handle))?;
            if slots.get(handle).is_none() {
                return Err(invalid(handle));
            }
            let entry = &mut slots.entries[index];
            let shared = entry.dataset.take().ok_or_else(|| invalid(handle))?;
            match entry.generation.checked_add(1) {
                Some(next) => {
                    entry.generation = next;
                    slots.free.push(index);
                }
                // generation would wrap: retire the slot for good
                None => warn!(handle, index, "handle slot retired"),
            }
            slots.live -= 1;
            shared
        };

        // wait out readers and writers that resolved the handle before removal
        drop(shared.write());
        debug!(handle, "dataset destroyed");
        Ok(())
    }

    /// Deep-copy a dataset under a fresh handle.
    ///
    /// The source is held exclusively for the duration of the copy.
    pub fn clone_dataset(&self, handle: DatasetHandle) -> Result<DatasetHandle> {
        let source = self.resolve(handle)?;
        let copy = source.write().try_clone()?;
        self.insert(copy)
    }

    /// Run `f` under the dataset's shared lock.
    ///
    /// The lock is not reentrant: `f` must not call back into this registry
    /// (or [`crate::DatasetStore`]) for the same handle, or the thread
    /// deadlocks. Other handles are fine.
    pub fn read<R>(&self, handle: DatasetHandle, f: impl FnOnce(&Dataset) -> Result<R>) -> Result<R> {
        let shared = self.resolve(handle)?;
        let guard = shared.read();
        f(&guard)
    }

    /// Run `f` under the dataset's exclusive lock.
    ///
    /// The lock is not reentrant: `f` must not call back into this registry
    /// (or [`crate::DatasetStore`]) for the same handle, or the thread
    /// deadlocks. Other handles are fine.
    pub fn write<R>(
        &self,
        handle: DatasetHandle,
        f: impl FnOnce(&mut Dataset) -> Result<R>,
    ) -> Result<R> {
        let shared = self.resolve(handle)?;
        let mut guard = shared.write();
        f(&mut guard)
    }
}
