//! Deterministic conversion of cache keys into remote key strings.
//!
//! A key describes its own shape through [`KeyPart`]: a string form, a
//! sequence, an unordered set, a map, or an opaque value that needs a
//! converter registered in [`KeyConverters`]. Shapes nest, so composite keys
//! stringify recursively: sequences as `[a,b]`, maps as `{k=v,k2=v2}`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::{Error, Result};
use std::any::{Any, TypeId, type_name};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::{self, Debug, Display};
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

/// How a key (or part of a key) turns into a string.
pub enum KeyShape<'a> {
    /// Plain strings and types with their own string form.
    Text(Cow<'a, str>),
    Seq(Vec<&'a dyn KeyPart>),
    /// Unordered collection, elements are sorted after conversion.
    Set(Vec<&'a dyn KeyPart>),
    Map(Vec<(&'a dyn KeyPart, &'a dyn KeyPart)>),
    /// No string form of its own; a registered converter is required.
    Opaque {
        value: &'a (dyn Any + 'static),
        type_name: &'static str,
    },
}

impl<'a> KeyShape<'a> {
    pub fn opaque<T: Any>(value: &'a T) -> Self {
        KeyShape::Opaque {
            value,
            type_name: type_name::<T>(),
        }
    }

    /// Use the value's `Display` output as its string form.
    pub fn display(value: &impl Display) -> Self {
        KeyShape::Text(Cow::Owned(value.to_string()))
    }
}

/// Anything that can appear in a cache key.
pub trait KeyPart: Send + Sync {
    fn key_shape(&self) -> KeyShape<'_>;
}

/// Everything the engine needs from a key type.
pub trait CacheKey:
    KeyPart + Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> CacheKey for T where
    T: KeyPart + Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

type Converter = Arc<dyn Fn(&(dyn Any + 'static)) -> Option<String> + Send + Sync>;

/// Statically registered converters for opaque key types, looked up by type.
#[derive(Clone, Default)]
pub struct KeyConverters {
    converters: HashMap<TypeId, Converter>,
}

impl KeyConverters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T, F>(mut self, convert: F) -> Self
    where
        T: Any,
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        let converter: Converter =
            Arc::new(move |value: &(dyn Any + 'static)| value.downcast_ref::<T>().map(&convert));
        self.converters.insert(TypeId::of::<T>(), converter);
        self
    }

    pub fn contains<T: Any>(&self) -> bool {
        self.converters.contains_key(&TypeId::of::<T>())
    }

    pub fn stringify(&self, key: &dyn KeyPart) -> Result<String> {
        let mut out = String::new();
        self.write(key, &mut out)?;
        Ok(out)
    }

    fn write(&self, part: &dyn KeyPart, out: &mut String) -> Result<()> {
        match part.key_shape() {
            KeyShape::Text(text) => out.push_str(&text),
            KeyShape::Seq(items) => {
                out.push('[');
                for (i, item) in items.into_iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    self.write(item, out)?;
                }
                out.push(']');
            }
            KeyShape::Set(items) => {
                let mut parts = items
                    .into_iter()
                    .map(|item| self.stringify(item))
                    .collect::<Result<Vec<_>>>()?;
                parts.sort();
                out.push('[');
                out.push_str(&parts.join(","));
                out.push(']');
            }
            KeyShape::Map(entries) => {
                let mut parts = entries
                    .into_iter()
                    .map(|(k, v)| Ok(format!("{}={}", self.stringify(k)?, self.stringify(v)?)))
                    .collect::<Result<Vec<_>>>()?;
                parts.sort();
                out.push('{');
                out.push_str(&parts.join(","));
                out.push('}');
            }
            KeyShape::Opaque { value, type_name } => {
                let converted = self
                    .converters
                    .get(&(*value).type_id())
                    .and_then(|convert| convert(value))
                    .ok_or_else(|| Error::KeyConversion {
                        type_name: type_name.to_string(),
                    })?;
                out.push_str(&converted);
            }
        }
        Ok(())
    }
}

impl Debug for KeyConverters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyConverters")
            .field("registered", &self.converters.len())
            .finish()
    }
}

macro_rules! display_key_part {
    ($($t:ty),* $(,)?) => {
        $(
            impl KeyPart for $t {
                fn key_shape(&self) -> KeyShape<'_> {
                    KeyShape::display(self)
                }
            }
        )*
    };
}

display_key_part!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, bool, char
);

impl KeyPart for String {
    fn key_shape(&self) -> KeyShape<'_> {
        KeyShape::Text(Cow::Borrowed(self.as_str()))
    }
}

impl KeyPart for &'static str {
    fn key_shape(&self) -> KeyShape<'_> {
        KeyShape::Text(Cow::Borrowed(*self))
    }
}

impl KeyPart for Box<str> {
    fn key_shape(&self) -> KeyShape<'_> {
        KeyShape::Text(Cow::Borrowed(&**self))
    }
}

impl KeyPart for Arc<str> {
    fn key_shape(&self) -> KeyShape<'_> {
        KeyShape::Text(Cow::Borrowed(&**self))
    }
}

impl<T: KeyPart> KeyPart for Vec<T> {
    fn key_shape(&self) -> KeyShape<'_> {
        KeyShape::Seq(self.iter().map(|v| v as &dyn KeyPart).collect())
    }
}

impl<T: KeyPart> KeyPart for VecDeque<T> {
    fn key_shape(&self) -> KeyShape<'_> {
        KeyShape::Seq(self.iter().map(|v| v as &dyn KeyPart).collect())
    }
}

impl<T: KeyPart, const N: usize> KeyPart for [T; N] {
    fn key_shape(&self) -> KeyShape<'_> {
        KeyShape::Seq(self.iter().map(|v| v as &dyn KeyPart).collect())
    }
}

impl<T: KeyPart> KeyPart for BTreeSet<T> {
    fn key_shape(&self) -> KeyShape<'_> {
        KeyShape::Set(self.iter().map(|v| v as &dyn KeyPart).collect())
    }
}

impl<T: KeyPart, S: BuildHasher + Send + Sync> KeyPart for HashSet<T, S> {
    fn key_shape(&self) -> KeyShape<'_> {
        KeyShape::Set(self.iter().map(|v| v as &dyn KeyPart).collect())
    }
}

impl<K: KeyPart, V: KeyPart> KeyPart for BTreeMap<K, V> {
    fn key_shape(&self) -> KeyShape<'_> {
        KeyShape::Map(
            self.iter()
                .map(|(k, v)| (k as &dyn KeyPart, v as &dyn KeyPart))
                .collect(),
        )
    }
}

impl<K: KeyPart, V: KeyPart, S: BuildHasher + Send + Sync> KeyPart for HashMap<K, V, S> {
    fn key_shape(&self) -> KeyShape<'_> {
        KeyShape::Map(
            self.iter()
                .map(|(k, v)| (k as &dyn KeyPart, v as &dyn KeyPart))
                .collect(),
        )
    }
}

impl<A: KeyPart, B: KeyPart> KeyPart for (A, B) {
    fn key_shape(&self) -> KeyShape<'_> {
        KeyShape::Seq(vec![&self.0 as &dyn KeyPart, &self.1])
    }
}

impl<A: KeyPart, B: KeyPart, C: KeyPart> KeyPart for (A, B, C) {
    fn key_shape(&self) -> KeyShape<'_> {
        KeyShape::Seq(vec![&self.0 as &dyn KeyPart, &self.1, &self.2])
    }
}
