use rustc_hash::FxHashMap;

use crate::value::Value;

/// Key-wise comparison of two checkpoints' `state` maps (`spec.md` §4.D).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    pub added: FxHashMap<String, Value>,
    pub removed: FxHashMap<String, Value>,
    pub modified: FxHashMap<String, (Value, Value)>,
}

/// Non-map states compare as a single `modified` entry under the empty key,
/// since `spec.md` only defines diff semantics for map states but
/// checkpoints are not required to carry one.
pub fn diff_states(a: &Value, b: &Value) -> Diff {
    let (Some(map_a), Some(map_b)) = (a.as_map(), b.as_map()) else {
        let mut diff = Diff::default();
        if a != b {
            diff.modified.insert(String::new(), (a.clone(), b.clone()));
        }
        return diff;
    };

    let mut diff = Diff::default();
    for (k, v) in map_b {
        match map_a.get(k) {
            None => {
                diff.added.insert(k.clone(), v.clone());
            }
            Some(old) if old != v => {
                diff.modified.insert(k.clone(), (old.clone(), v.clone()));
            }
            Some(_) => {}
        }
    }
    for (k, v) in map_a {
        if !map_b.contains_key(k) {
            diff.removed.insert(k.clone(), v.clone());
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_added_removed_modified() {
        let mut a = FxHashMap::default();
        a.insert("x".to_string(), Value::Number(1.0));
        a.insert("y".to_string(), Value::Number(2.0));
        let mut b = FxHashMap::default();
        b.insert("y".to_string(), Value::Number(3.0));
        b.insert("z".to_string(), Value::Number(4.0));

        let diff = diff_states(&Value::Map(a), &Value::Map(b));
        assert_eq!(diff.added.get("z"), Some(&Value::Number(4.0)));
        assert_eq!(diff.removed.get("x"), Some(&Value::Number(1.0)));
        assert_eq!(
            diff.modified.get("y"),
            Some(&(Value::Number(2.0), Value::Number(3.0)))
        );
    }
}
