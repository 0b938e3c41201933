//! Opérations sur l'arbre YAML de configuration
//!
//! Les clés sont comparées en minuscules ; un chemin est une suite de clés
//! de mapping (`["radio", "cache", "directory"]`).

use anyhow::{bail, Result};
use serde_yaml::{Mapping, Value};

fn key(segment: &str) -> Value {
    Value::String(segment.to_lowercase())
}

/// Nœud situé à `path`, s'il existe
pub(crate) fn lookup<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(root, |node, segment| node.as_mapping()?.get(key(segment)))
}

/// Écrit `value` à `path`, en créant les mappings intermédiaires
pub(crate) fn assign(root: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        *root = value;
        return Ok(());
    };

    let mut node = root;
    for (depth, segment) in parents.iter().enumerate() {
        let Value::Mapping(map) = node else {
            bail!("{} is not a mapping", path[..depth].join("."));
        };
        node = map
            .entry(key(segment))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
    }

    match node {
        Value::Mapping(map) => {
            map.insert(key(last), value);
            Ok(())
        }
        _ => bail!("{} is not a mapping", parents.join(".")),
    }
}

/// Superpose `overlay` à `base` : les mappings fusionnent, le reste remplace
///
/// Une valeur `null` dans `overlay` laisse `base` intact.
pub(crate) fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (k, v) in overlay {
                match base.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

/// Met toutes les clés de mapping en minuscules, récursivement
pub(crate) fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| {
                    let k = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    (k, lowercase_keys(v))
                })
                .collect(),
        ),
        Value::Sequence(items) => Value::Sequence(items.into_iter().map(lowercase_keys).collect()),
        other => other,
    }
}

/// Interprète une valeur d'environnement comme un scalaire YAML
pub(crate) fn parse_scalar(raw: &str) -> Value {
    serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_assign_creates_parents() {
        let mut root = Value::Mapping(Mapping::new());
        assign(&mut root, &["Radio", "cache", "directory"], "x".into()).unwrap();
        assert_eq!(
            lookup(&root, &["radio", "CACHE", "directory"]),
            Some(&Value::from("x"))
        );
    }

    #[test]
    fn test_assign_through_scalar_fails() {
        let mut root = yaml("radio: 3");
        assert!(assign(&mut root, &["radio", "cache"], Value::Null).is_err());
    }

    #[test]
    fn test_merge_keeps_siblings() {
        let mut base = yaml("a: {b: 1, c: 2}\nlist: [1, 2]");
        merge(&mut base, yaml("a: {c: 3}\nlist: [9]"));
        assert_eq!(base, yaml("a: {b: 1, c: 3}\nlist: [9]"));
    }

    #[test]
    fn test_env_scalars() {
        assert_eq!(parse_scalar("42"), Value::Number(42u64.into()));
        assert_eq!(parse_scalar("true"), Value::Bool(true));
        assert_eq!(parse_scalar("http://x"), Value::from("http://x"));
    }
}
