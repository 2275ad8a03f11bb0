use crate::ConfigDocument;
use serde::Serialize;
use serde_json::Value;

/// Structural difference between two configuration documents, as sorted
/// dotted paths of leaf values.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DiffSummary {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
    pub has_changes: bool,
}

impl DiffSummary {
    fn empty() -> Self {
        Self {
            added: Vec::new(),
            modified: Vec::new(),
            removed: Vec::new(),
            has_changes: false,
        }
    }
}

/// Compare `before` and `after`, reporting leaf paths that were added,
/// modified, or removed. Arrays compare as units.
pub fn diff_documents(before: &ConfigDocument, after: &ConfigDocument) -> DiffSummary {
    let mut summary = DiffSummary::empty();
    walk(
        &before.to_value(),
        &after.to_value(),
        String::new(),
        &mut summary,
    );
    summary.added.sort();
    summary.modified.sort();
    summary.removed.sort();
    summary.has_changes =
        !summary.added.is_empty() || !summary.modified.is_empty() || !summary.removed.is_empty();
    summary
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}.{key}")
    }
}

fn record_all(value: &Value, prefix: &str, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if map.is_empty() {
                out.push(prefix.to_owned());
            }
            for (key, val) in map {
                record_all(val, &join(prefix, key), out);
            }
        }
        _ => out.push(prefix.to_owned()),
    }
}

fn walk(before: &Value, after: &Value, prefix: String, summary: &mut DiffSummary) {
    match (before, after) {
        (Value::Object(b), Value::Object(a)) => {
            for (key, b_val) in b {
                let path = join(&prefix, key);
                match a.get(key) {
                    Some(a_val) => walk(b_val, a_val, path, summary),
                    None => record_all(b_val, &path, &mut summary.removed),
                }
            }
            for (key, a_val) in a {
                if !b.contains_key(key) {
                    record_all(a_val, &join(&prefix, key), &mut summary.added);
                }
            }
        }
        (b, a) => {
            if b != a {
                summary.modified.push(prefix);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: serde_json::Value) -> ConfigDocument {
        ConfigDocument::from_value(v).unwrap()
    }

    #[test]
    fn identical_documents_have_no_changes() {
        let a = doc(json!({"firewall": {"default_policy": "drop"}}));
        let summary = diff_documents(&a, &a.clone());
        assert!(!summary.has_changes);
        assert!(summary.added.is_empty());
        assert!(summary.modified.is_empty());
        assert!(summary.removed.is_empty());
    }

    #[test]
    fn modified_leaf_detected() {
        let before = doc(json!({"firewall": {"default_policy": "accept"}}));
        let after = doc(json!({"firewall": {"default_policy": "drop"}}));
        let summary = diff_documents(&before, &after);
        assert!(summary.has_changes);
        assert_eq!(summary.modified, vec!["firewall.default_policy"]);
    }

    #[test]
    fn added_subtree_reports_leaves() {
        let before = doc(json!({}));
        let after = doc(json!({"vpn": {"enabled": true, "port": 1194}}));
        let summary = diff_documents(&before, &after);
        assert_eq!(summary.added, vec!["vpn.enabled", "vpn.port"]);
        assert!(summary.removed.is_empty());
    }

    #[test]
    fn removed_subtree_reports_leaves() {
        let before = doc(json!({"nat": {"outbound": "auto"}}));
        let after = doc(json!({}));
        let summary = diff_documents(&before, &after);
        assert_eq!(summary.removed, vec!["nat.outbound"]);
    }

    #[test]
    fn array_change_is_one_modification() {
        let before = doc(json!({"firewall": {"rules": [1, 2]}}));
        let after = doc(json!({"firewall": {"rules": [1, 2, 3]}}));
        let summary = diff_documents(&before, &after);
        assert_eq!(summary.modified, vec!["firewall.rules"]);
    }

    #[test]
    fn type_change_object_to_scalar_is_modification_paths() {
        let before = doc(json!({"lb": {"enabled": false}}));
        let after = doc(json!({"lb": "off"}));
        let summary = diff_documents(&before, &after);
        assert!(summary.has_changes);
        // object vs scalar at the same path: scalar side compares as a unit
        assert_eq!(summary.modified, vec!["lb"]);
    }

    #[test]
    fn empty_object_counts_as_leaf() {
        let before = doc(json!({}));
        let after = doc(json!({"nat": {}}));
        let summary = diff_documents(&before, &after);
        assert_eq!(summary.added, vec!["nat"]);
    }

    #[test]
    fn paths_are_sorted() {
        let before = doc(json!({}));
        let after = doc(json!({"b": 1, "a": 1, "c": 1}));
        let summary = diff_documents(&before, &after);
        assert_eq!(summary.added, vec!["a", "b", "c"]);
    }
}
