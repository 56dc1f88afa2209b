use serde::{Deserialize, Serialize};

/// Bounds on the work a single resolution may do.
///
/// Schemas can describe structures that never terminate, such as a struct containing
/// itself or an offset expression that reads its own offset. When a bound is hit the
/// affected value reads as unknown, a warning is logged, and
/// [Workspace::limit_hits](crate::Workspace::limit_hits) is incremented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveLimits {
    /// The maximum number of nested resolution frames.
    pub max_depth: usize,
    /// Element counts above this are clamped.
    pub max_elements: i64,
    /// The maximum number of instances a single expand pass may create.
    pub max_expand_instances: usize,
}

impl Default for ResolveLimits {
    fn default() -> Self {
        Self {
            max_depth: 64,
            max_elements: 1 << 20,
            max_expand_instances: 10_000,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_json() {
        let limits: ResolveLimits = serde_json::from_str(r#"{ "max_depth": 8 }"#).unwrap();
        assert_eq!(limits.max_depth, 8);
        assert_eq!(
            limits.max_elements,
            ResolveLimits::default().max_elements
        );
    }
}
