use crate::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// One configuration snapshot: a hierarchical key-value tree addressed by
/// dotted paths, plus an optional creation timestamp.
///
/// `ConfigDocument` is a pure value type. Callers clone before handing a
/// document to the engine; the engine never mutates a document it received.
/// Equality and the content hash cover the tree only — `created_at` is an
/// envelope field and does not participate in change detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    root: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ConfigDocument {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl Eq for ConfigDocument {}

impl ConfigDocument {
    /// Create an empty document.
    pub fn new() -> Self {
        Self {
            root: Map::new(),
            created_at: None,
        }
    }

    /// Build a document from a JSON value. Fails unless the value is an object.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        match value {
            Value::Object(root) => Ok(Self {
                root,
                created_at: None,
            }),
            _ => Err(ConfigError::NotAnObject),
        }
    }

    /// The tree as a JSON value (cloned).
    pub fn to_value(&self) -> Value {
        Value::Object(self.root.clone())
    }

    pub fn created_at(&self) -> Option<&str> {
        self.created_at.as_deref()
    }

    /// Stamp the envelope with the current UTC time.
    pub fn stamp(&mut self) {
        self.created_at = Some(chrono::Utc::now().to_rfc3339());
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Deep lookup by dotted path. Returns `None` for a missing key or when
    /// a path segment indexes through a non-object (arrays are not
    /// addressable; they are replaced as units).
    pub fn get(&self, path: &str) -> Option<&Value> {
        let segments = split_path(path).ok()?;
        let (last, parents) = segments.split_last()?;
        let mut current = &self.root;
        for seg in parents {
            current = current.get(*seg)?.as_object()?;
        }
        current.get(*last)
    }

    /// Deep insert by dotted path, creating intermediate objects as needed.
    /// An intermediate scalar or array in the way is replaced by an object.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), ConfigError> {
        let segments = split_path(path)?;
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| ConfigError::InvalidPath(path.to_owned()))?;
        let mut current = &mut self.root;
        for seg in parents {
            let entry = current
                .entry((*seg).to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = entry
                .as_object_mut()
                .ok_or_else(|| ConfigError::InvalidPath(path.to_owned()))?;
        }
        current.insert((*last).to_owned(), value);
        Ok(())
    }

    /// Remove a key by dotted path. Returns the removed value, if any.
    pub fn remove(&mut self, path: &str) -> Result<Option<Value>, ConfigError> {
        let segments = split_path(path)?;
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| ConfigError::InvalidPath(path.to_owned()))?;
        let mut current = &mut self.root;
        for seg in parents {
            match current.get_mut(*seg).and_then(Value::as_object_mut) {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(current.remove(*last))
    }

    /// Deep-merge a patch into this document.
    ///
    /// Objects merge recursively; scalars and arrays are replaced wholesale
    /// by the patch value; an explicit JSON `null` in the patch removes the
    /// key. This matches how operator updates are layered onto the working
    /// draft.
    pub fn merge(&mut self, patch: &ConfigDocument) {
        merge_objects(&mut self.root, &patch.root);
    }

    /// Extract a top-level subtree as its own document.
    ///
    /// A missing or non-object subtree yields an empty document, which
    /// appliers interpret as "nothing configured for this domain".
    pub fn subtree(&self, name: &str) -> ConfigDocument {
        let root = match self.root.get(name) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        Self {
            root,
            created_at: None,
        }
    }

    /// Blake3 hex digest over the canonical JSON rendering of the tree.
    ///
    /// `serde_json`'s map type keeps keys sorted, so serializing the root
    /// directly is already canonical: equal trees hash equal regardless of
    /// insertion order. The envelope timestamp is excluded.
    pub fn content_hash(&self) -> String {
        let canonical =
            serde_json::to_string(&self.root).unwrap_or_else(|_| String::from("{}"));
        blake3::hash(canonical.as_bytes()).to_hex().to_string()
    }
}

fn split_path(path: &str) -> Result<Vec<&str>, ConfigError> {
    if path.is_empty() {
        return Err(ConfigError::InvalidPath(path.to_owned()));
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(ConfigError::InvalidPath(path.to_owned()));
    }
    Ok(segments)
}

fn merge_objects(base: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, patch_val) in patch {
        match patch_val {
            Value::Null => {
                base.remove(key);
            }
            Value::Object(patch_map) => match base.get_mut(key) {
                Some(Value::Object(base_map)) => merge_objects(base_map, patch_map),
                _ => {
                    base.insert(key.clone(), Value::Object(patch_map.clone()));
                }
            },
            other => {
                base.insert(key.clone(), other.clone());
            }
        }
    }
}

/// The compiled-in fallback configuration, used when no snapshot exists yet.
///
/// Ships a locked-down firewall (default drop inbound on WAN) with the LAN
/// interface reachable, so a fresh appliance is safe but administrable.
pub fn default_document() -> ConfigDocument {
    let value = json!({
        "system": {
            "hostname": "palisade",
            "timezone": "UTC",
        },
        "network": {
            "interfaces": {
                "wan": { "device": "eth0", "mode": "dhcp" },
                "lan": { "device": "eth1", "mode": "static", "address": "192.168.1.1/24" },
            },
        },
        "firewall": {
            "default_policy": "drop",
            "rules": [
                { "action": "accept", "interface": "lan", "proto": "any" },
            ],
        },
        "nat": {
            "outbound": "auto",
            "port_forwards": [],
        },
        "loadbalancer": {
            "enabled": false,
            "backends": [],
        },
        "vpn": {
            "enabled": false,
        },
    });
    ConfigDocument::from_value(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(v: Value) -> ConfigDocument {
        ConfigDocument::from_value(v).unwrap()
    }

    #[test]
    fn get_deep_path() {
        let d = doc(json!({"firewall": {"default_policy": "drop"}}));
        assert_eq!(
            d.get("firewall.default_policy"),
            Some(&json!("drop"))
        );
        assert_eq!(d.get("firewall.missing"), None);
        assert_eq!(d.get("missing.path"), None);
    }

    #[test]
    fn get_through_scalar_is_none() {
        let d = doc(json!({"a": 1}));
        assert_eq!(d.get("a.b"), None);
    }

    #[test]
    fn set_creates_intermediates() {
        let mut d = ConfigDocument::new();
        d.set("firewall.default_policy", json!("accept")).unwrap();
        assert_eq!(d.get("firewall.default_policy"), Some(&json!("accept")));
    }

    #[test]
    fn set_replaces_scalar_intermediate() {
        let mut d = doc(json!({"a": 1}));
        d.set("a.b", json!(2)).unwrap();
        assert_eq!(d.get("a.b"), Some(&json!(2)));
    }

    #[test]
    fn empty_path_segment_rejected() {
        let mut d = ConfigDocument::new();
        assert!(d.set("", json!(1)).is_err());
        assert!(d.set("a..b", json!(1)).is_err());
        assert!(d.get("a..b").is_none());
    }

    #[test]
    fn remove_existing_key() {
        let mut d = doc(json!({"vpn": {"enabled": true}}));
        let removed = d.remove("vpn.enabled").unwrap();
        assert_eq!(removed, Some(json!(true)));
        assert_eq!(d.get("vpn.enabled"), None);
    }

    #[test]
    fn remove_missing_key_is_none() {
        let mut d = ConfigDocument::new();
        assert_eq!(d.remove("not.there").unwrap(), None);
    }

    #[test]
    fn merge_recursive_objects() {
        let mut base = doc(json!({"firewall": {"default_policy": "accept", "log": true}}));
        let patch = doc(json!({"firewall": {"default_policy": "drop"}}));
        base.merge(&patch);
        assert_eq!(base.get("firewall.default_policy"), Some(&json!("drop")));
        assert_eq!(base.get("firewall.log"), Some(&json!(true)));
    }

    #[test]
    fn merge_replaces_arrays_wholesale() {
        let mut base = doc(json!({"firewall": {"rules": [1, 2, 3]}}));
        let patch = doc(json!({"firewall": {"rules": [9]}}));
        base.merge(&patch);
        assert_eq!(base.get("firewall.rules"), Some(&json!([9])));
    }

    #[test]
    fn merge_null_removes_key() {
        let mut base = doc(json!({"vpn": {"enabled": true, "peers": []}}));
        let patch = doc(json!({"vpn": {"peers": null}}));
        base.merge(&patch);
        assert_eq!(base.get("vpn.peers"), None);
        assert_eq!(base.get("vpn.enabled"), Some(&json!(true)));
    }

    #[test]
    fn subtree_extraction() {
        let d = doc(json!({"firewall": {"default_policy": "drop"}, "nat": {}}));
        let fw = d.subtree("firewall");
        assert_eq!(fw.get("default_policy"), Some(&json!("drop")));
        assert!(d.subtree("loadbalancer").is_empty());
    }

    #[test]
    fn content_hash_ignores_insertion_order() {
        let mut a = ConfigDocument::new();
        a.set("x", json!(1)).unwrap();
        a.set("y", json!(2)).unwrap();
        let mut b = ConfigDocument::new();
        b.set("y", json!(2)).unwrap();
        b.set("x", json!(1)).unwrap();
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn content_hash_detects_change() {
        let a = doc(json!({"firewall": {"default_policy": "drop"}}));
        let b = doc(json!({"firewall": {"default_policy": "accept"}}));
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn content_hash_ignores_timestamp() {
        let mut a = doc(json!({"k": "v"}));
        let b = a.clone();
        a.stamp();
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a, b, "equality covers the tree only");
    }

    #[test]
    fn stamp_sets_created_at() {
        let mut d = ConfigDocument::new();
        assert!(d.created_at().is_none());
        d.stamp();
        assert!(d.created_at().is_some());
    }

    #[test]
    fn serde_roundtrip_preserves_tree() {
        let mut d = doc(json!({"firewall": {"default_policy": "drop"}}));
        d.stamp();
        let json_text = serde_json::to_string_pretty(&d).unwrap();
        let back: ConfigDocument = serde_json::from_str(&json_text).unwrap();
        assert_eq!(back, d);
        assert_eq!(back.created_at(), d.created_at());
    }

    #[test]
    fn from_value_rejects_non_object() {
        assert!(ConfigDocument::from_value(json!([1, 2])).is_err());
        assert!(ConfigDocument::from_value(json!("str")).is_err());
    }

    #[test]
    fn default_document_is_locked_down() {
        let d = default_document();
        assert_eq!(d.get("firewall.default_policy"), Some(&json!("drop")));
        assert!(d.get("network.interfaces.lan").is_some());
        assert_eq!(d.get("vpn.enabled"), Some(&json!(false)));
    }
}
