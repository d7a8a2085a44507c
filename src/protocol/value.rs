//! Typed values dan native values
//!
//! - `Value`: value yang membawa tipe wire lengkap (signature bisa diturunkan)
//! - `Native`: bentuk "plain" yang dilihat caller, tanpa envelope variant dan
//!   tanpa lebar integer
//!
//! Konversi `Value -> Native` sengaja lossy (int16 dan int32 sama-sama jadi
//! `Native::Int`). Caller yang butuh tipe persis memakai `Value` langsung.

use std::collections::{BTreeMap, HashSet};

use crate::error::TypeMismatchError;
use crate::protocol::signature::Signature;

/// Value dengan tipe wire persis
#[derive(Debug, Clone)]
pub enum Value {
    Byte(u8),
    Bool(bool),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    Str(String),
    ObjectPath(String),
    /// Tipe `g`, boleh berisi beberapa tipe lengkap
    TypeSig(String),
    /// Semua item wajib bertipe `elem`
    Array {
        elem: Signature,
        items: Vec<Value>,
    },
    Struct(Vec<Value>),
    /// Key unik, urutan entry tidak berarti
    Dict {
        key: Signature,
        value: Signature,
        entries: Vec<(Value, Value)>,
    },
    Variant(Box<Value>),
}

/// Value yang dilihat caller high-level
#[derive(Debug, Clone)]
pub enum Native {
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(String),
    List(Vec<Native>),
    /// Struct tetap dibedakan dari list
    Tuple(Vec<Native>),
    Map(Vec<(Native, Native)>),
}

/// Representasi hashable dari key dict (hanya tipe basic)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DictKey {
    Bool(bool),
    Int(i128),
    Float(u64),
    Str(String),
}

impl Value {
    /// Signature lengkap dari value ini
    pub fn signature(&self) -> Signature {
        match self {
            Value::Byte(_) => Signature::Byte,
            Value::Bool(_) => Signature::Bool,
            Value::Int16(_) => Signature::Int16,
            Value::UInt16(_) => Signature::UInt16,
            Value::Int32(_) => Signature::Int32,
            Value::UInt32(_) => Signature::UInt32,
            Value::Int64(_) => Signature::Int64,
            Value::UInt64(_) => Signature::UInt64,
            Value::Double(_) => Signature::Double,
            Value::Str(_) => Signature::Str,
            Value::ObjectPath(_) => Signature::ObjectPath,
            Value::TypeSig(_) => Signature::TypeSig,
            Value::Array { elem, .. } => Signature::Array(Box::new(elem.clone())),
            Value::Struct(fields) => Signature::Struct(fields.iter().map(Value::signature).collect()),
            Value::Dict { key, value, .. } => {
                Signature::Dict(Box::new(key.clone()), Box::new(value.clone()))
            }
            Value::Variant(_) => Signature::Variant,
        }
    }

    /// Array dengan pengecekan tipe item
    pub fn array(elem: Signature, items: Vec<Value>) -> Result<Self, TypeMismatchError> {
        for item in &items {
            let found = item.signature();
            if found != elem {
                return Err(TypeMismatchError::new(
                    format!("a{}", elem),
                    format!("array item of type '{}'", found),
                ));
            }
        }
        Ok(Value::Array { elem, items })
    }

    /// Struct minimal satu field
    pub fn structure(fields: Vec<Value>) -> Result<Self, TypeMismatchError> {
        if fields.is_empty() {
            return Err(TypeMismatchError::new("(...)", "struct with no fields"));
        }
        Ok(Value::Struct(fields))
    }

    /// Dict dengan pengecekan key basic, tipe entry, dan key unik
    pub fn dict(
        key: Signature,
        value: Signature,
        entries: Vec<(Value, Value)>,
    ) -> Result<Self, TypeMismatchError> {
        let expected = Signature::Dict(Box::new(key.clone()), Box::new(value.clone())).to_string();
        if !key.is_basic() {
            return Err(TypeMismatchError::new(expected, format!("non-basic key type '{}'", key)));
        }
        let mut seen = HashSet::with_capacity(entries.len());
        for (k, v) in &entries {
            if k.signature() != key || v.signature() != value {
                return Err(TypeMismatchError::new(
                    expected,
                    format!("entry of type '{{{}{}}}'", k.signature(), v.signature()),
                ));
            }
            if let Some(dk) = k.dict_key() {
                if !seen.insert(dk) {
                    return Err(TypeMismatchError::new(expected, "duplicate dict key"));
                }
            }
        }
        Ok(Value::Dict { key, value, entries })
    }

    /// Bungkus value dalam variant
    pub fn variant(inner: Value) -> Self {
        Value::Variant(Box::new(inner))
    }

    /// Lepas satu lapis envelope variant
    pub fn into_variant_inner(self) -> Value {
        match self {
            Value::Variant(inner) => *inner,
            other => other,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::ObjectPath(s) | Value::TypeSig(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::UInt32(v) => Some(*v),
            _ => None,
        }
    }

    /// Konversi ke native, semua envelope variant dilepas (lossy)
    pub fn to_native(&self) -> Native {
        match self {
            Value::Byte(v) => Native::Int(i128::from(*v)),
            Value::Bool(v) => Native::Bool(*v),
            Value::Int16(v) => Native::Int(i128::from(*v)),
            Value::UInt16(v) => Native::Int(i128::from(*v)),
            Value::Int32(v) => Native::Int(i128::from(*v)),
            Value::UInt32(v) => Native::Int(i128::from(*v)),
            Value::Int64(v) => Native::Int(i128::from(*v)),
            Value::UInt64(v) => Native::Int(i128::from(*v)),
            Value::Double(v) => Native::Float(*v),
            Value::Str(s) | Value::ObjectPath(s) | Value::TypeSig(s) => Native::Str(s.clone()),
            Value::Array { items, .. } => Native::List(items.iter().map(Value::to_native).collect()),
            Value::Struct(fields) => Native::Tuple(fields.iter().map(Value::to_native).collect()),
            Value::Dict { entries, .. } => Native::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_native(), v.to_native()))
                    .collect(),
            ),
            Value::Variant(inner) => inner.to_native(),
        }
    }

    fn dict_key(&self) -> Option<DictKey> {
        Some(match self {
            Value::Bool(v) => DictKey::Bool(*v),
            Value::Double(v) => DictKey::Float(v.to_bits()),
            Value::Str(s) | Value::ObjectPath(s) | Value::TypeSig(s) => DictKey::Str(s.clone()),
            Value::Byte(_)
            | Value::Int16(_)
            | Value::UInt16(_)
            | Value::Int32(_)
            | Value::UInt32(_)
            | Value::Int64(_)
            | Value::UInt64(_) => match self.to_native() {
                Native::Int(i) => DictKey::Int(i),
                _ => return None,
            },
            _ => return None,
        })
    }
}

/// Key set untuk deteksi duplikat saat decode
#[derive(Default)]
pub(crate) struct KeySet(HashSet<DictKey>);

impl KeySet {
    /// `false` jika key sudah pernah dilihat
    pub(crate) fn insert(&mut self, key: &Value) -> bool {
        match key.dict_key() {
            Some(k) => self.0.insert(k),
            None => true,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int16(a), Value::Int16(b)) => a == b,
            (Value::UInt16(a), Value::UInt16(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::UInt32(a), Value::UInt32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::UInt64(a), Value::UInt64(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::ObjectPath(a), Value::ObjectPath(b)) => a == b,
            (Value::TypeSig(a), Value::TypeSig(b)) => a == b,
            (Value::Array { elem: ea, items: a }, Value::Array { elem: eb, items: b }) => {
                ea == eb && a == b
            }
            (Value::Struct(a), Value::Struct(b)) => a == b,
            (
                Value::Dict { key: ka, value: va, entries: a },
                Value::Dict { key: kb, value: vb, entries: b },
            ) => ka == kb && va == vb && unordered_eq(a, b),
            (Value::Variant(a), Value::Variant(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for Native {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Native::Bool(a), Native::Bool(b)) => a == b,
            (Native::Int(a), Native::Int(b)) => a == b,
            (Native::Float(a), Native::Float(b)) => a == b,
            (Native::Str(a), Native::Str(b)) => a == b,
            (Native::List(a), Native::List(b)) => a == b,
            (Native::Tuple(a), Native::Tuple(b)) => a == b,
            (Native::Map(a), Native::Map(b)) => unordered_eq(a, b),
            _ => false,
        }
    }
}

/// Perbandingan mapping tanpa memperhatikan urutan entry (sebagai multiset)
fn unordered_eq<K: PartialEq, V: PartialEq>(a: &[(K, V)], b: &[(K, V)]) -> bool {
    let count = |side: &[(K, V)], (k, v): &(K, V)| {
        side.iter().filter(|(ks, vs)| ks == k && vs == v).count()
    };
    a.len() == b.len() && a.iter().all(|entry| count(a, entry) == count(b, entry))
}

impl Native {
    /// Map dari pasangan (key, value)
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<Native>,
        V: Into<Native>,
        I: IntoIterator<Item = (K, V)>,
    {
        Native::Map(entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Deskripsi singkat untuk pesan error
    fn describe(&self) -> String {
        match self {
            Native::Bool(b) => format!("boolean {}", b),
            Native::Int(i) => format!("integer {}", i),
            Native::Float(f) => format!("double {}", f),
            Native::Str(s) => format!("string {:?}", s),
            Native::List(items) => format!("list of {} items", items.len()),
            Native::Tuple(items) => format!("tuple of {} fields", items.len()),
            Native::Map(entries) => format!("map of {} entries", entries.len()),
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Native::Str(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Native::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Lookup key string pada `Native::Map`
    pub fn get(&self, key: &str) -> Option<&Native> {
        match self {
            Native::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

macro_rules! native_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Native {
            fn from(v: $t) -> Self {
                Native::Int(i128::from(v))
            }
        })*
    };
}

native_from_int!(i8, i16, i32, i64, u8, u16, u32, u64);

impl From<bool> for Native {
    fn from(v: bool) -> Self {
        Native::Bool(v)
    }
}

impl From<f64> for Native {
    fn from(v: f64) -> Self {
        Native::Float(v)
    }
}

impl From<&str> for Native {
    fn from(v: &str) -> Self {
        Native::Str(v.to_string())
    }
}

impl From<String> for Native {
    fn from(v: String) -> Self {
        Native::Str(v)
    }
}

impl<T: Into<Native>> From<Vec<T>> for Native {
    fn from(v: Vec<T>) -> Self {
        Native::List(v.into_iter().map(Into::into).collect())
    }
}

impl<V: Into<Native>> From<BTreeMap<String, V>> for Native {
    fn from(v: BTreeMap<String, V>) -> Self {
        Native::map(v)
    }
}

/// Validasi struktural native terhadap signature, menghasilkan `Value`.
///
/// Integer dicek range-nya; nilai di luar range ditolak, tidak di-truncate.
/// Posisi `v` di dalam signature diisi lewat `infer`.
pub fn validate(native: &Native, sig: &Signature) -> Result<Value, TypeMismatchError> {
    let mismatch = || TypeMismatchError::new(sig.to_string(), native.describe());
    let int = |native: &Native| -> Result<i128, TypeMismatchError> {
        native.as_int().ok_or_else(mismatch)
    };
    let out_of_range = |i: i128| {
        TypeMismatchError::new(sig.to_string(), format!("integer {} out of range", i))
    };

    match sig {
        Signature::Byte => {
            let i = int(native)?;
            u8::try_from(i).map(Value::Byte).map_err(|_| out_of_range(i))
        }
        Signature::Int16 => {
            let i = int(native)?;
            i16::try_from(i).map(Value::Int16).map_err(|_| out_of_range(i))
        }
        Signature::UInt16 => {
            let i = int(native)?;
            u16::try_from(i).map(Value::UInt16).map_err(|_| out_of_range(i))
        }
        Signature::Int32 => {
            let i = int(native)?;
            i32::try_from(i).map(Value::Int32).map_err(|_| out_of_range(i))
        }
        Signature::UInt32 => {
            let i = int(native)?;
            u32::try_from(i).map(Value::UInt32).map_err(|_| out_of_range(i))
        }
        Signature::Int64 => {
            let i = int(native)?;
            i64::try_from(i).map(Value::Int64).map_err(|_| out_of_range(i))
        }
        Signature::UInt64 => {
            let i = int(native)?;
            u64::try_from(i).map(Value::UInt64).map_err(|_| out_of_range(i))
        }
        Signature::Bool => match native {
            Native::Bool(b) => Ok(Value::Bool(*b)),
            _ => Err(mismatch()),
        },
        Signature::Double => match native {
            Native::Float(f) => Ok(Value::Double(*f)),
            Native::Int(i) => Ok(Value::Double(*i as f64)),
            _ => Err(mismatch()),
        },
        Signature::Str => match native {
            Native::Str(s) => Ok(Value::Str(s.clone())),
            _ => Err(mismatch()),
        },
        Signature::ObjectPath => match native {
            Native::Str(s) if is_valid_object_path(s) => Ok(Value::ObjectPath(s.clone())),
            Native::Str(s) => Err(TypeMismatchError::new("o", format!("invalid object path {:?}", s))),
            _ => Err(mismatch()),
        },
        Signature::TypeSig => match native {
            Native::Str(s) => Signature::parse_list(s)
                .map(|_| Value::TypeSig(s.clone()))
                .map_err(|e| TypeMismatchError::new("g", e.to_string())),
            _ => Err(mismatch()),
        },
        Signature::Variant => Ok(Value::variant(infer(native)?)),
        Signature::Array(elem) => match native {
            Native::List(items) => {
                let items = items
                    .iter()
                    .map(|item| validate(item, elem))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array {
                    elem: (**elem).clone(),
                    items,
                })
            }
            _ => Err(mismatch()),
        },
        Signature::Struct(fields) => match native {
            Native::Tuple(items) | Native::List(items) if items.len() == fields.len() => {
                let values = items
                    .iter()
                    .zip(fields)
                    .map(|(item, field)| validate(item, field))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Struct(values))
            }
            _ => Err(mismatch()),
        },
        Signature::Dict(key, value) => match native {
            Native::Map(entries) => {
                let mut seen = KeySet::default();
                let mut out = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    let k = validate(k, key)?;
                    if !seen.insert(&k) {
                        return Err(TypeMismatchError::new(sig.to_string(), "duplicate dict key"));
                    }
                    out.push((k, validate(v, value)?));
                }
                Ok(Value::Dict {
                    key: (**key).clone(),
                    value: (**value).clone(),
                    entries: out,
                })
            }
            _ => Err(mismatch()),
        },
    }
}

/// Inferensi signature best-effort dari native value.
///
/// - integer: `i` jika muat, lalu `x`, lalu `t`
/// - list homogen: `a<elem>`, heterogen atau kosong: `av`
/// - map: key harus basic dan seragam; value homogen `a{k<v>}`, selain itu `a{kv}`
pub fn infer(native: &Native) -> Result<Value, TypeMismatchError> {
    match native {
        Native::Bool(b) => Ok(Value::Bool(*b)),
        Native::Int(i) => {
            if let Ok(v) = i32::try_from(*i) {
                Ok(Value::Int32(v))
            } else if let Ok(v) = i64::try_from(*i) {
                Ok(Value::Int64(v))
            } else if let Ok(v) = u64::try_from(*i) {
                Ok(Value::UInt64(v))
            } else {
                Err(TypeMismatchError::new("x", format!("integer {} out of range", i)))
            }
        }
        Native::Float(f) => Ok(Value::Double(*f)),
        Native::Str(s) => Ok(Value::Str(s.clone())),
        Native::List(items) => {
            let values = items.iter().map(infer).collect::<Result<Vec<_>, _>>()?;
            match common_signature(&values) {
                Some(elem) => Ok(Value::Array { elem, items: values }),
                None => Ok(Value::Array {
                    elem: Signature::Variant,
                    items: values.into_iter().map(Value::variant).collect(),
                }),
            }
        }
        Native::Tuple(items) => {
            let values = items.iter().map(infer).collect::<Result<Vec<_>, _>>()?;
            Value::structure(values)
        }
        Native::Map(entries) => {
            let mut keys = Vec::with_capacity(entries.len());
            let mut values = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                keys.push(infer(k)?);
                values.push(infer(v)?);
            }
            let key = match common_signature(&keys) {
                Some(sig) if sig.is_basic() => sig,
                Some(sig) => {
                    return Err(TypeMismatchError::new("a{..}", format!("non-basic key type '{}'", sig)))
                }
                None if keys.is_empty() => Signature::Str,
                None => return Err(TypeMismatchError::new("a{..}", "keys of mixed types")),
            };
            let (value, values) = match common_signature(&values) {
                Some(sig) => (sig, values),
                None => (
                    Signature::Variant,
                    values.into_iter().map(Value::variant).collect(),
                ),
            };
            Value::dict(key, value, keys.into_iter().zip(values).collect())
        }
    }
}

/// Sesuaikan typed value ke signature target.
///
/// Tipe sama: diterima apa adanya. Target `v`: dibungkus tanpa kehilangan tipe.
/// Selain itu dikonversi lewat native dan divalidasi ulang (dengan cek range).
pub fn conform(value: Value, sig: &Signature) -> Result<Value, TypeMismatchError> {
    if value.signature() == *sig {
        return Ok(value);
    }
    if *sig == Signature::Variant {
        return Ok(Value::variant(value));
    }
    validate(&value.to_native(), sig)
}

/// Signature bersama jika semua value bertipe sama (None untuk slice kosong)
fn common_signature(values: &[Value]) -> Option<Signature> {
    let first = values.first()?.signature();
    values
        .iter()
        .skip(1)
        .all(|v| v.signature() == first)
        .then_some(first)
}

/// Sintaks object path: `/` atau `/seg(/seg)*`, seg = [A-Za-z0-9_]+
pub fn is_valid_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    match path.strip_prefix('/') {
        Some(rest) => rest.split('/').all(|seg| {
            !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
        }),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(s: &str) -> Signature {
        Signature::parse(s).unwrap()
    }

    #[test]
    fn test_validate_integer_ranges() {
        assert_eq!(validate(&Native::Int(255), &sig("y")).unwrap(), Value::Byte(255));
        assert!(validate(&Native::Int(256), &sig("y")).is_err());
        assert!(validate(&Native::Int(-1), &sig("u")).is_err());
        assert!(validate(&Native::Int(i128::from(i32::MAX) + 1), &sig("i")).is_err());
        assert_eq!(
            validate(&Native::Int(i128::from(u64::MAX)), &sig("t")).unwrap(),
            Value::UInt64(u64::MAX)
        );
        let err = validate(&Native::Int(70000), &sig("n")).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_validate_containers() {
        let value = validate(&Native::from(vec![42, 43]), &sig("ai")).unwrap();
        assert_eq!(value.signature(), sig("ai"));

        let tuple = Native::Tuple(vec![Native::from("a"), Native::from(1)]);
        assert_eq!(
            validate(&tuple, &sig("(si)")).unwrap(),
            Value::Struct(vec![Value::Str("a".into()), Value::Int32(1)])
        );
        assert!(validate(&tuple, &sig("(sii)")).is_err());

        let map = Native::map([("a", 1), ("b", 2)]);
        assert_eq!(validate(&map, &sig("a{sq}")).unwrap().signature(), sig("a{sq}"));
        assert!(validate(&map, &sig("a{ss}")).is_err());

        let dup = Native::Map(vec![("a".into(), 1.into()), ("a".into(), 2.into())]);
        assert!(validate(&dup, &sig("a{si}")).is_err());
    }

    #[test]
    fn test_validate_object_path() {
        assert!(validate(&Native::from("/org/example/Obj_1"), &sig("o")).is_ok());
        assert!(validate(&Native::from("org/example"), &sig("o")).is_err());
        assert!(validate(&Native::from("/trailing/"), &sig("o")).is_err());
        assert!(validate(&Native::from("/a//b"), &sig("o")).is_err());
    }

    #[test]
    fn test_infer_heterogeneous_map() {
        let native = Native::map([
            ("one", Native::from(1)),
            ("two", Native::from("dva")),
            ("three", Native::from(vec![3, 3, 3])),
        ]);
        let value = infer(&native).unwrap();
        assert_eq!(value.signature(), sig("a{sv}"));
        assert_eq!(value.to_native(), native);
    }

    #[test]
    fn test_infer_lists() {
        assert_eq!(infer(&Native::from(vec![1, 2])).unwrap().signature(), sig("ai"));
        assert_eq!(infer(&Native::List(vec![])).unwrap().signature(), sig("av"));
        let mixed = Native::List(vec![Native::from(1), Native::from("x")]);
        assert_eq!(infer(&mixed).unwrap().signature(), sig("av"));
        assert_eq!(infer(&Native::Int(1 << 40)).unwrap(), Value::Int64(1 << 40));
    }

    #[test]
    fn test_struct_is_not_a_list() {
        let as_struct = Value::Struct(vec![Value::Int32(1), Value::Int32(2)]);
        let as_array = Value::array(Signature::Int32, vec![Value::Int32(1), Value::Int32(2)]).unwrap();
        assert_ne!(as_struct.to_native(), as_array.to_native());
        assert_eq!(as_struct.to_native(), Native::Tuple(vec![1.into(), 2.into()]));
    }

    #[test]
    fn test_native_lossiness() {
        assert_eq!(Value::Int16(7).to_native(), Value::Int32(7).to_native());
        let nested = Value::variant(Value::variant(Value::Str("x".into())));
        assert_eq!(nested.to_native(), Native::from("x"));
    }

    #[test]
    fn test_dict_equality_ignores_order() {
        let a = Value::dict(
            Signature::Str,
            Signature::Int32,
            vec![(Value::Str("a".into()), Value::Int32(1)), (Value::Str("b".into()), Value::Int32(2))],
        )
        .unwrap();
        let b = Value::dict(
            Signature::Str,
            Signature::Int32,
            vec![(Value::Str("b".into()), Value::Int32(2)), (Value::Str("a".into()), Value::Int32(1))],
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_map_equality_counts_entries() {
        let dup = Native::Map(vec![
            (Native::from("k"), Native::from(1)),
            (Native::from("k"), Native::from(1)),
        ]);
        let distinct = Native::Map(vec![
            (Native::from("k"), Native::from(1)),
            (Native::from("j"), Native::from(2)),
        ]);
        assert_ne!(dup, distinct);
        assert_ne!(distinct, dup);
        assert_eq!(distinct, Native::map([("j", 2), ("k", 1)]));
    }

    #[test]
    fn test_checked_constructors() {
        assert!(Value::array(Signature::Str, vec![Value::Int32(1)]).is_err());
        assert!(Value::structure(vec![]).is_err());
        assert!(Value::dict(Signature::Variant, Signature::Str, vec![]).is_err());
    }

    #[test]
    fn test_conform() {
        assert_eq!(conform(Value::Int64(5), &Signature::Int32).unwrap(), Value::Int32(5));
        assert!(conform(Value::Int64(1 << 40), &Signature::Int32).is_err());
        assert_eq!(
            conform(Value::Int16(5), &Signature::Variant).unwrap(),
            Value::variant(Value::Int16(5))
        );
        assert!(conform(Value::Str("x".into()), &Signature::Int32).is_err());
    }
}
