use crate::config::MountConfig;
use std::path::PathBuf;

/// Source of the physical roots that replace one logical input directory
pub trait MountPoints {
    /// Roots to walk; empty when the input is a single tree
    fn expand(&self) -> Vec<PathBuf>;
}

/// `base/00`, `base/01`, … one per storage volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountLayout {
    pub count: usize,
    pub base_path: PathBuf,
}

impl MountLayout {
    pub fn from_config(config: &MountConfig) -> Self {
        Self {
            count: config.count,
            base_path: config.base_path.clone(),
        }
    }
}

impl MountPoints for MountLayout {
    fn expand(&self) -> Vec<PathBuf> {
        (0..self.count)
            .map(|i| self.base_path.join(format!("{i:02}")))
            .collect()
    }
}
