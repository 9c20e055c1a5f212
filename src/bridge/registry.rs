//! Mode → Bridge binding.

use std::collections::HashMap;

use super::Bridge;
use crate::error::{LinkError, Result};
use crate::protocol::Mode;

/// The enabled protocols and their bridges. Fixed once the host starts.
#[derive(Default)]
pub struct BridgeSet {
    bridges: HashMap<Mode, Box<dyn Bridge>>,
}

impl BridgeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a bridge to its mode.
    ///
    /// # Errors
    ///
    /// Returns `LinkError::Config` for an `Idle` bridge or a second bridge
    /// for the same mode.
    pub fn insert(&mut self, bridge: Box<dyn Bridge>) -> Result<()> {
        let mode = bridge.mode();
        if mode.is_idle() {
            return Err(LinkError::Config("IDLE cannot have a bridge".into()));
        }
        if self.bridges.contains_key(&mode) {
            return Err(LinkError::Config(format!(
                "Duplicate bridge for mode: {}",
                mode
            )));
        }
        self.bridges.insert(mode, bridge);
        Ok(())
    }

    pub fn get(&self, mode: Mode) -> Option<&dyn Bridge> {
        self.bridges.get(&mode).map(|b| b.as_ref())
    }

    pub fn get_mut(&mut self, mode: Mode) -> Option<&mut (dyn Bridge + 'static)> {
        self.bridges.get_mut(&mode).map(|b| b.as_mut())
    }

    pub fn contains(&self, mode: Mode) -> bool {
        self.bridges.contains_key(&mode)
    }

    /// Enabled modes in set-mode order.
    pub fn modes(&self) -> Vec<Mode> {
        let mut modes: Vec<Mode> = self.bridges.keys().copied().collect();
        modes.sort();
        modes
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }
}

impl std::fmt::Debug for BridgeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSet")
            .field("modes", &self.modes())
            .finish()
    }
}
