//! Stable cell identity.
//!
//! A [`CellId`] is an opaque identifier assigned when a cell is created and
//! never reused. Its `Ord` is the deterministic tie-break key for execution
//! planning; display ordinals never participate in ordering decisions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque, stable identifier for a cell.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    pub fn new(id: impl Into<String>) -> CellId {
        CellId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CellId {
    fn from(id: &str) -> CellId {
        CellId::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::CellId;

    #[test]
    fn test_ordering_is_lexicographic() {
        let mut ids = vec![CellId::new("c"), CellId::new("a"), CellId::new("b")];
        ids.sort();
        assert_eq!(ids, vec!["a".into(), "b".into(), "c".into()]);
    }
}
