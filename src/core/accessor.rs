//! Property descriptor dan accessor hooks
//!
//! Getter/setter dimodelkan sebagai trait object `PropertyAccessor`;
//! registry hanya memegang `Arc<dyn PropertyAccessor>` per property.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::{AccessorError, Result};
use crate::lock;
use crate::protocol::signature::Signature;
use crate::protocol::value::{validate, Native, Value};

/// Kemampuan baca/tulis satu property.
///
/// Bisa dipanggil bersamaan dari thread call sinkron dan thread event loop,
/// jadi implementasi wajib aman untuk akses konkuren.
pub trait PropertyAccessor: Send + Sync {
    fn read(&self) -> std::result::Result<Value, AccessorError>;
    fn write(&self, value: Value) -> std::result::Result<(), AccessorError>;
}

/// Value yang disimpan di memori
#[derive(Debug)]
pub struct StoredValue {
    value: Mutex<Value>,
}

impl StoredValue {
    pub fn new(value: Value) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    pub fn get(&self) -> Value {
        lock(&self.value).clone()
    }
}

impl PropertyAccessor for StoredValue {
    fn read(&self) -> std::result::Result<Value, AccessorError> {
        Ok(self.get())
    }

    fn write(&self, value: Value) -> std::result::Result<(), AccessorError> {
        *lock(&self.value) = value;
        Ok(())
    }
}

type Getter = Box<dyn Fn() -> std::result::Result<Value, AccessorError> + Send + Sync>;
type Setter = Box<dyn Fn(Value) -> std::result::Result<(), AccessorError> + Send + Sync>;

/// Accessor berbasis closure
pub struct FnAccessor {
    getter: Getter,
    setter: Option<Setter>,
}

impl FnAccessor {
    pub fn new<G>(getter: G) -> Self
    where
        G: Fn() -> std::result::Result<Value, AccessorError> + Send + Sync + 'static,
    {
        Self {
            getter: Box::new(getter),
            setter: None,
        }
    }

    pub fn with_setter<S>(mut self, setter: S) -> Self
    where
        S: Fn(Value) -> std::result::Result<(), AccessorError> + Send + Sync + 'static,
    {
        self.setter = Some(Box::new(setter));
        self
    }
}

impl PropertyAccessor for FnAccessor {
    fn read(&self) -> std::result::Result<Value, AccessorError> {
        (self.getter)()
    }

    fn write(&self, value: Value) -> std::result::Result<(), AccessorError> {
        match &self.setter {
            Some(setter) => setter(value),
            None => Err(AccessorError::new("property has no setter")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    #[inline]
    pub fn readable(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    #[inline]
    pub fn writable(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

/// Kebijakan PropertiesChanged per property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitsChanged {
    /// Value baru dikirim di `changed`
    #[default]
    True,
    /// Hanya nama yang dikirim di `invalidated`
    Invalidates,
    /// Tidak pernah disinyalkan
    False,
}

/// Deklarasi satu property; immutable setelah diregister
pub struct PropertyDescriptor {
    interface: String,
    name: String,
    signature: Signature,
    access: Access,
    emits: EmitsChanged,
    affects: Vec<String>,
    accessor: Arc<dyn PropertyAccessor>,
}

impl PropertyDescriptor {
    pub fn new(
        interface: &str,
        name: &str,
        signature: Signature,
        access: Access,
        accessor: Arc<dyn PropertyAccessor>,
    ) -> Self {
        Self {
            interface: interface.to_string(),
            name: name.to_string(),
            signature,
            access,
            emits: EmitsChanged::default(),
            affects: Vec::new(),
            accessor,
        }
    }

    /// Property dengan value tersimpan; signature diambil dari value
    pub fn stored(interface: &str, name: &str, value: Value, access: Access) -> Self {
        let signature = value.signature();
        Self::new(interface, name, signature, access, Arc::new(StoredValue::new(value)))
    }

    /// Property tersimpan dari native value, divalidasi terhadap `signature`
    pub fn stored_native(
        interface: &str,
        name: &str,
        signature: &str,
        value: &Native,
        access: Access,
    ) -> Result<Self> {
        let signature = Signature::parse(signature)?;
        let value = validate(value, &signature)?;
        Ok(Self::new(
            interface,
            name,
            signature,
            access,
            Arc::new(StoredValue::new(value)),
        ))
    }

    pub fn with_emits(mut self, emits: EmitsChanged) -> Self {
        self.emits = emits;
        self
    }

    /// Property lain di interface yang sama yang ikut berubah saat property ini di-set
    pub fn affects<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affects.extend(names.into_iter().map(Into::into));
        self
    }

    #[inline]
    pub fn interface(&self) -> &str {
        &self.interface
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    #[inline]
    pub fn access(&self) -> Access {
        self.access
    }

    #[inline]
    pub fn emits(&self) -> EmitsChanged {
        self.emits
    }

    pub fn affected(&self) -> &[String] {
        &self.affects
    }

    pub fn accessor(&self) -> &Arc<dyn PropertyAccessor> {
        &self.accessor
    }
}

impl fmt::Debug for PropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("interface", &self.interface)
            .field("name", &self.name)
            .field("signature", &self.signature.to_string())
            .field("access", &self.access)
            .field("emits", &self.emits)
            .field("affects", &self.affects)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_stored_value_read_write() {
        let desc = PropertyDescriptor::stored("org.example.I", "Name", Value::Str("a".into()), Access::ReadWrite);
        assert_eq!(desc.signature(), &Signature::Str);
        desc.accessor().write(Value::Str("b".into())).unwrap();
        assert_eq!(desc.accessor().read().unwrap(), Value::Str("b".into()));
    }

    #[test]
    fn test_fn_accessor_failure_and_missing_setter() {
        let accessor = FnAccessor::new(|| Err(AccessorError::new("Something failed")));
        assert_eq!(accessor.read().unwrap_err().to_string(), "Something failed");
        assert!(accessor.write(Value::Bool(true)).is_err());
    }

    #[test]
    fn test_stored_native_validates() {
        let desc = PropertyDescriptor::stored_native(
            "org.example.I",
            "MyArray",
            "ai",
            &Native::from(vec![42, 43]),
            Access::Read,
        )
        .unwrap();
        assert_eq!(desc.signature().to_string(), "ai");

        let err = PropertyDescriptor::stored_native(
            "org.example.I",
            "Small",
            "y",
            &Native::from(300),
            Access::Read,
        )
        .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));
    }

    #[test]
    fn test_access_flags() {
        assert!(Access::Read.readable() && !Access::Read.writable());
        assert!(!Access::Write.readable() && Access::Write.writable());
        assert!(Access::ReadWrite.readable() && Access::ReadWrite.writable());
    }
}
