//! Reclaim engine tunables

use serde::{Deserialize, Serialize};

use crate::error::{ReclaimError, ReclaimResult};

/// Default page shift (4 KiB pages)
pub const DEFAULT_PAGE_SHIFT: u32 = 12;

/// Default per-notification cap on vmap teardowns
///
/// Unmapping is not free (it can serialize GPU access), so one address-space
/// pressure notification is never allowed to unmap everything. If more space
/// is needed the notifier fires again.
pub const DEFAULT_VMAP_UNMAP_CAP: usize = 15;

/// Reclaim configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimConfig {
    /// log2 of the allocation unit size in bytes
    pub page_shift: u32,
    /// Maximum objects unmapped per vmap-pressure notification
    pub vmap_unmap_cap: usize,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            page_shift: DEFAULT_PAGE_SHIFT,
            vmap_unmap_cap: DEFAULT_VMAP_UNMAP_CAP,
        }
    }
}

impl ReclaimConfig {
    /// Validate tunable values
    pub fn validate(&self) -> ReclaimResult<()> {
        if self.page_shift == 0 || self.page_shift > 30 {
            return Err(ReclaimError::InvalidConfig {
                message: format!("page_shift {} out of range (1..=30)", self.page_shift),
            });
        }
        if self.vmap_unmap_cap == 0 {
            return Err(ReclaimError::InvalidConfig {
                message: "vmap_unmap_cap must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ReclaimConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.page_shift, 12);
        assert_eq!(config.vmap_unmap_cap, 15);
    }

    #[test]
    fn test_rejects_zero_cap() {
        let config = ReclaimConfig {
            vmap_unmap_cap: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ReclaimError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_page_shift() {
        let config = ReclaimConfig {
            page_shift: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
