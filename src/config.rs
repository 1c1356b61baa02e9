//! Construction settings shared by every matrix of a run.

use serde::{Deserialize, Serialize};

use crate::algs::communicator::CommTag;
use crate::debug_invariants::invariant_checks_enabled;

/// Knobs of the construction protocol.
///
/// Every process of a communicator must use the same configuration: both
/// fields change which collective exchanges are issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstructionConfig {
    /// Check that every row and column is owned by exactly one process when
    /// building from index sets. Costs nothing extra in messages (the data
    /// rides on the exchange that is made anyway) but is off in release
    /// builds unless invariant checks are compiled in.
    pub verify_partition: bool,
    /// Base tag of the layer's own collective exchanges. Uses this tag and
    /// the next one.
    pub comm_tag: CommTag,
}

impl Default for ConstructionConfig {
    fn default() -> Self {
        Self {
            verify_partition: invariant_checks_enabled(),
            comm_tag: CommTag::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: ConstructionConfig = serde_json::from_str(r#"{ "verify_partition": true }"#).unwrap();
        assert!(cfg.verify_partition);
        assert_eq!(cfg.comm_tag, CommTag::default());

        let cfg: ConstructionConfig = serde_json::from_str(r#"{ "comm_tag": 512 }"#).unwrap();
        assert_eq!(cfg.comm_tag, CommTag::new(512));
        assert_eq!(cfg.verify_partition, ConstructionConfig::default().verify_partition);
    }
}
