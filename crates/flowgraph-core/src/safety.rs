use std::collections::HashMap;

use crate::error::EngineError;
use crate::handle::GraphValueId;

/// Declared access mode for a buffer a job touches, used by
/// [`AtomicSafetyManager::mark_used`] to catch jobs that read or write a
/// buffer without having declared the dependency edge that buffer implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

/// A per-render-generation capability token for one buffer slot.
///
/// Render generations are bumped every tick; a handle minted in generation
/// `N` is rejected once the manager has moved to generation `N + 1`, which
/// is what makes a kernel's attempt to retain a buffer pointer across ticks
/// fail loudly instead of silently reading stale data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyHandle {
    slot: u32,
    generation: u64,
}

/// Tracks, for the render graph currently executing, which buffer slots
/// have been declared as touched by the scheduled jobs, and at what access
/// mode. The scheduler consults this before handing the render graph to a
/// [`crate::node_def::Kernel`] execution runtime, and fails the tick with
/// [`EngineError::MissingDependency`] if a job's declared reads/writes do
/// not match what the topology says it should touch.
pub struct AtomicSafetyManager {
    generation: u64,
    declared: HashMap<u32, AccessMode>,
    used: HashMap<u32, AccessMode>,
}

impl AtomicSafetyManager {
    pub fn new() -> Self {
        Self {
            generation: 0,
            declared: HashMap::new(),
            used: HashMap::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Advance to the next render generation, invalidating every handle
    /// minted under the previous one and clearing the used-buffer ledger.
    pub fn bump_temporary_handle_versions(&mut self) {
        self.generation += 1;
        self.declared.clear();
        self.used.clear();
    }

    pub fn handle_for_slot(&self, slot: u32) -> SafetyHandle {
        SafetyHandle {
            slot,
            generation: self.generation,
        }
    }

    pub fn is_current(&self, handle: SafetyHandle) -> bool {
        handle.generation == self.generation
    }

    /// Record that the topology database expects a slot to be touched with
    /// a given access mode this generation. Called while building the job
    /// list, before any job executes.
    pub fn declare(&mut self, slot: u32, mode: AccessMode) {
        self.declared
            .entry(slot)
            .and_modify(|existing| {
                if mode == AccessMode::ReadWrite {
                    *existing = AccessMode::ReadWrite;
                }
            })
            .or_insert(mode);
    }

    /// Record that a job actually touched a slot at a given access mode.
    /// Called by the kernel execution runtime as jobs run. A slot touched
    /// by more than one job this generation (its producer's write, then a
    /// consumer's read) keeps the strongest mode seen rather than the last
    /// one recorded, matching `declare`'s merge rule.
    pub fn mark_used(&mut self, handle: SafetyHandle, mode: AccessMode) -> Result<(), EngineError> {
        if !self.is_current(handle) {
            return Err(EngineError::InvalidHandle);
        }
        self.used
            .entry(handle.slot)
            .and_modify(|existing| {
                if mode == AccessMode::ReadWrite {
                    *existing = AccessMode::ReadWrite;
                }
            })
            .or_insert(mode);
        Ok(())
    }

    /// Verify every declared dependency was actually used, and no
    /// undeclared slot was touched with write access. Called once per tick
    /// after the render graph finishes executing.
    pub fn check_complete(&self) -> Result<(), EngineError> {
        for (slot, mode) in &self.declared {
            match self.used.get(slot) {
                Some(used_mode) if used_mode == mode || *used_mode == AccessMode::ReadWrite => {}
                Some(_) | None => return Err(EngineError::MissingDependency),
            }
        }
        Ok(())
    }
}

impl Default for AtomicSafetyManager {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscription record binding a [`GraphValueId`] to the node/port it
/// mirrors, used by the graph value side-buffer copy each tick. Lives
/// here because the safety manager is what decides whether a value is safe
/// to read this generation.
#[derive(Debug, Clone, Copy)]
pub struct GraphValueBinding {
    pub value: GraphValueId,
    pub target_exists: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_generation_handle_rejected() {
        let mut mgr = AtomicSafetyManager::new();
        let h = mgr.handle_for_slot(0);
        mgr.bump_temporary_handle_versions();
        assert!(!mgr.is_current(h));
        assert!(matches!(
            mgr.mark_used(h, AccessMode::ReadOnly),
            Err(EngineError::InvalidHandle)
        ));
    }

    #[test]
    fn missing_dependency_detected() {
        let mut mgr = AtomicSafetyManager::new();
        mgr.declare(3, AccessMode::ReadWrite);
        assert!(matches!(
            mgr.check_complete(),
            Err(EngineError::MissingDependency)
        ));

        let h = mgr.handle_for_slot(3);
        mgr.mark_used(h, AccessMode::ReadWrite).unwrap();
        assert!(mgr.check_complete().is_ok());
    }
}
