use std::hash::Hash;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use super::finite::{self, Rejection};

/// Failure to derive a stable cache key from an argument value.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("arguments cannot be serialized into a cache key: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("arguments are not usable as a cache key: {0}")]
    Unsupported(String),
}

impl KeyError {
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported(reason.into())
    }
}

/// Derives the store key for one call's arguments.
///
/// Two argument values that are equal by value must map to the same key;
/// values that differ (including in order) must not.
pub trait KeyStrategy<A: ?Sized> {
    type Key: Hash + Eq + Clone + Send + Sync + 'static;

    fn derive(&self, args: &A) -> Result<Self::Key, KeyError>;
}

/// Uses the argument value itself as the key.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueKey;

impl<A> KeyStrategy<A> for ValueKey
where
    A: Hash + Eq + Clone + Send + Sync + 'static,
{
    type Key = A;

    fn derive(&self, args: &A) -> Result<A, KeyError> {
        Ok(args.clone())
    }
}

/// Canonical JSON text of the arguments.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(pub Arc<str>);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serializes arguments to canonical JSON.
///
/// Going through `serde_json::Value` sorts object keys, so two maps with the
/// same contents produce the same key regardless of iteration order. Map keys
/// that are not strings fail with [`KeyError::Serialization`]. NaN and
/// infinities fail with [`KeyError::Unsupported`], since JSON would render
/// them all as `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonKey;

impl<A> KeyStrategy<A> for JsonKey
where
    A: Serialize + ?Sized,
{
    type Key = CacheKey;

    fn derive(&self, args: &A) -> Result<CacheKey, KeyError> {
        if let Err(rejection @ Rejection::NonFinite(_)) = finite::check(args) {
            return Err(KeyError::unsupported(rejection.to_string()));
        }
        let value = serde_json::to_value(args)?;
        Ok(CacheKey(Arc::from(value.to_string())))
    }
}

/// Adapts a closure into a [`KeyStrategy`].
#[derive(Clone)]
pub struct FnKey<F>(pub F);

impl<A, K, F> KeyStrategy<A> for FnKey<F>
where
    A: ?Sized,
    K: Hash + Eq + Clone + Send + Sync + 'static,
    F: Fn(&A) -> Result<K, KeyError>,
{
    type Key = K;

    fn derive(&self, args: &A) -> Result<K, KeyError> {
        (self.0)(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn json_key_is_order_sensitive_for_tuples() {
        let forward = JsonKey.derive(&(1, 2)).unwrap();
        let reverse = JsonKey.derive(&(2, 1)).unwrap();
        assert_ne!(forward, reverse);
        assert_eq!(forward.as_str(), "[1,2]");
    }

    #[test]
    fn json_key_sorts_map_entries() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for (k, v) in [("b", 2), ("a", 1), ("c", 3)] {
            first.insert(k.to_string(), v);
        }
        for (k, v) in [("c", 3), ("a", 1), ("b", 2)] {
            second.insert(k.to_string(), v);
        }
        assert_eq!(JsonKey.derive(&first).unwrap(), JsonKey.derive(&second).unwrap());
    }

    #[test]
    fn json_key_rejects_non_string_map_keys() {
        let mut map = HashMap::new();
        map.insert((1, 2), "pair");
        let err = JsonKey.derive(&map).unwrap_err();
        assert!(matches!(err, KeyError::Serialization(_)));
    }

    #[test]
    fn json_key_rejects_non_finite_floats() {
        for value in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            let err = JsonKey.derive(&value).unwrap_err();
            assert!(matches!(err, KeyError::Unsupported(ref reason) if reason.contains("non-finite")));
        }
        assert!(JsonKey.derive(&Some(f64::NAN)).is_err());
        assert_eq!(JsonKey.derive(&None::<f64>).unwrap().as_str(), "null");
    }

    #[test]
    fn fn_key_surfaces_custom_failures() {
        let strategy = FnKey(|value: &f64| {
            if value.is_nan() {
                Err(KeyError::unsupported("NaN has no stable identity"))
            } else {
                Ok(value.to_bits())
            }
        });
        assert_eq!(strategy.derive(&1.5_f64).unwrap(), 1.5_f64.to_bits());
        assert!(matches!(
            strategy.derive(&f64::NAN),
            Err(KeyError::Unsupported(_))
        ));
    }
}
