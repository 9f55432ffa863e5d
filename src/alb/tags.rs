//! # Tag and Attribute Differ
//!
//! Pure functions computing the minimal change set between two key-value
//! collections. Used identically for AWS resource tags and for load
//! balancer / target group attributes.

use super::Tags;

/// The minimal set of changes converging `current` into `desired`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    /// Keys to add or overwrite, with their desired values
    pub to_upsert: Tags,
    /// Keys present in current but absent from desired
    pub to_remove: Tags,
}

impl TagDiff {
    pub fn is_empty(&self) -> bool {
        self.to_upsert.is_empty() && self.to_remove.is_empty()
    }
}

/// Diff two tag maps. Keys with equal values in both appear in neither
/// output. Deterministic, no I/O.
pub fn diff(desired: &Tags, current: &Tags) -> TagDiff {
    let mut result = TagDiff::default();

    for (key, value) in desired {
        if current.get(key) != Some(value) {
            result.to_upsert.insert(key.clone(), value.clone());
        }
    }

    for (key, value) in current {
        if !desired.contains_key(key) {
            result.to_remove.insert(key.clone(), value.clone());
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_diff_empty_maps() {
        let result = diff(&Tags::new(), &Tags::new());
        assert!(result.is_empty());
    }

    #[test]
    fn test_diff_all_new() {
        let desired = tags(&[("a", "1"), ("b", "2")]);
        let result = diff(&desired, &Tags::new());
        assert_eq!(result.to_upsert, desired);
        assert!(result.to_remove.is_empty());
    }

    #[test]
    fn test_diff_all_removed() {
        let current = tags(&[("a", "1"), ("b", "2")]);
        let result = diff(&Tags::new(), &current);
        assert!(result.to_upsert.is_empty());
        assert_eq!(result.to_remove, current);
    }

    #[test]
    fn test_diff_changed_value() {
        let desired = tags(&[("a", "new"), ("b", "2")]);
        let current = tags(&[("a", "old"), ("b", "2")]);
        let result = diff(&desired, &current);
        assert_eq!(result.to_upsert, tags(&[("a", "new")]));
        assert!(result.to_remove.is_empty());
    }

    #[test]
    fn test_diff_mixed() {
        let desired = tags(&[("keep", "same"), ("update", "v2"), ("add", "x")]);
        let current = tags(&[("keep", "same"), ("update", "v1"), ("drop", "y")]);
        let result = diff(&desired, &current);
        assert_eq!(result.to_upsert, tags(&[("update", "v2"), ("add", "x")]));
        assert_eq!(result.to_remove, tags(&[("drop", "y")]));
    }

    #[test]
    fn test_diff_unchanged_keys_in_neither_output() {
        let desired = tags(&[("a", "1"), ("b", "2")]);
        let current = tags(&[("a", "1"), ("b", "2")]);
        let result = diff(&desired, &current);
        assert!(result.is_empty());
    }
}
