//! Property Registry: tabel (interface, name) -> descriptor
//!
//! Lock hanya dipegang saat lookup; accessor dipanggil setelah lock
//! dilepas, jadi accessor boleh lambat atau memanggil registry lagi.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::core::accessor::PropertyDescriptor;
use crate::error::PropertyError;
use crate::protocol::signature::Signature;
use crate::protocol::value::{conform, Native, Value};
use crate::{read, write};

type Interfaces = BTreeMap<String, BTreeMap<String, Arc<PropertyDescriptor>>>;

/// Hasil `GetAll`: snapshot point-in-time, bukan live view
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertySnapshot(BTreeMap<String, Value>);

impl PropertySnapshot {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }

    /// Value polos tanpa envelope variant (lossy)
    pub fn into_native(self) -> BTreeMap<String, Native> {
        self.0
            .into_iter()
            .map(|(name, value)| (name, value.to_native()))
            .collect()
    }

    /// Bentuk wire `a{sv}`
    pub fn to_value(&self) -> Value {
        Value::Dict {
            key: Signature::Str,
            value: Signature::Variant,
            entries: self
                .0
                .iter()
                .map(|(name, value)| (Value::Str(name.clone()), Value::variant(value.clone())))
                .collect(),
        }
    }
}

impl From<BTreeMap<String, Value>> for PropertySnapshot {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

/// Registry property untuk satu object path
#[derive(Debug, Default)]
pub struct PropertyRegistry {
    interfaces: RwLock<Interfaces>,
}

impl PropertyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gagal dengan `DuplicateProperty` jika (interface, name) sudah ada
    pub fn register(&self, descriptor: PropertyDescriptor) -> Result<(), PropertyError> {
        let mut interfaces = write(&self.interfaces);
        let props = interfaces.entry(descriptor.interface().to_string()).or_default();
        if props.contains_key(descriptor.name()) {
            return Err(PropertyError::DuplicateProperty {
                interface: descriptor.interface().to_string(),
                property: descriptor.name().to_string(),
            });
        }
        props.insert(descriptor.name().to_string(), Arc::new(descriptor));
        Ok(())
    }

    /// Interface dicek dulu, baru nama property
    pub fn lookup(&self, interface: &str, name: &str) -> Result<Arc<PropertyDescriptor>, PropertyError> {
        let interfaces = read(&self.interfaces);
        let props = interfaces
            .get(interface)
            .ok_or_else(|| PropertyError::UnknownInterface {
                interface: interface.to_string(),
                property: name.to_string(),
            })?;
        props
            .get(name)
            .cloned()
            .ok_or_else(|| PropertyError::UnknownProperty {
                interface: interface.to_string(),
                property: name.to_string(),
            })
    }

    pub fn has_interface(&self, interface: &str) -> bool {
        read(&self.interfaces).contains_key(interface)
    }

    pub fn interfaces(&self) -> Vec<String> {
        read(&self.interfaces).keys().cloned().collect()
    }

    /// Semua descriptor di interface, urut nama
    pub fn properties(&self, interface: &str) -> Vec<Arc<PropertyDescriptor>> {
        read(&self.interfaces)
            .get(interface)
            .map(|props| props.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, interface: &str, name: &str) -> Result<Value, PropertyError> {
        let descriptor = self.lookup(interface, name)?;
        if !descriptor.access().readable() {
            return Err(PropertyError::NotReadable {
                interface: interface.to_string(),
                property: name.to_string(),
            });
        }
        read_descriptor(&descriptor)
    }

    /// Value dikonversi ke signature yang dideklarasikan sebelum setter dipanggil
    pub fn set(&self, interface: &str, name: &str, value: Value) -> Result<(), PropertyError> {
        let descriptor = self.lookup(interface, name)?;
        if !descriptor.access().writable() {
            return Err(PropertyError::NotWritable {
                interface: interface.to_string(),
                property: name.to_string(),
            });
        }
        let value = conform(value, descriptor.signature()).map_err(|source| PropertyError::TypeMismatch {
            interface: interface.to_string(),
            property: name.to_string(),
            source,
        })?;
        descriptor.accessor().write(value)?;
        Ok(())
    }

    /// Semua property readable. Satu getter gagal = seluruh call gagal.
    pub fn all(&self, interface: &str) -> Result<PropertySnapshot, PropertyError> {
        let descriptors = {
            let interfaces = read(&self.interfaces);
            let props = interfaces
                .get(interface)
                .ok_or_else(|| PropertyError::UnknownInterface {
                    interface: interface.to_string(),
                    property: String::new(),
                })?;
            props.values().cloned().collect::<Vec<_>>()
        };

        let mut out = BTreeMap::new();
        for descriptor in descriptors.iter().filter(|d| d.access().readable()) {
            out.insert(descriptor.name().to_string(), read_descriptor(descriptor)?);
        }
        Ok(PropertySnapshot(out))
    }
}

/// Panggil getter dan pastikan hasilnya sesuai signature deklarasi
fn read_descriptor(descriptor: &PropertyDescriptor) -> Result<Value, PropertyError> {
    let value = descriptor.accessor().read()?;
    conform(value, descriptor.signature()).map_err(|source| PropertyError::TypeMismatch {
        interface: descriptor.interface().to_string(),
        property: descriptor.name().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::accessor::{Access, FnAccessor};
    use crate::error::AccessorError;

    const IFACE: &str = "org.example.Test";

    fn registry() -> PropertyRegistry {
        let reg = PropertyRegistry::new();
        reg.register(PropertyDescriptor::stored(IFACE, "ReadOrWriteMe", Value::Str("initial".into()), Access::ReadWrite))
            .unwrap();
        reg.register(PropertyDescriptor::stored(IFACE, "ReadMe", Value::Str("ro".into()), Access::Read))
            .unwrap();
        reg.register(PropertyDescriptor::stored(IFACE, "WriteMe", Value::Int32(0), Access::Write))
            .unwrap();
        reg
    }

    #[test]
    fn test_get_and_set() {
        let reg = registry();
        reg.set(IFACE, "ReadOrWriteMe", Value::Str("VALUE".into())).unwrap();
        assert_eq!(reg.get(IFACE, "ReadOrWriteMe").unwrap(), Value::Str("VALUE".into()));
    }

    #[test]
    fn test_duplicate_registration() {
        let reg = registry();
        let err = reg
            .register(PropertyDescriptor::stored(IFACE, "ReadMe", Value::Bool(true), Access::Read))
            .unwrap_err();
        assert!(matches!(err, PropertyError::DuplicateProperty { .. }));
    }

    #[test]
    fn test_access_policy() {
        let reg = registry();
        assert!(matches!(reg.get(IFACE, "WriteMe"), Err(PropertyError::NotReadable { .. })));
        assert!(matches!(
            reg.set(IFACE, "ReadMe", Value::Str("x".into())),
            Err(PropertyError::NotWritable { .. })
        ));
    }

    #[test]
    fn test_unknown_interface_takes_precedence() {
        let reg = registry();
        assert!(matches!(
            reg.get("org.example.Other", "ReadMe"),
            Err(PropertyError::UnknownInterface { .. })
        ));
        assert!(matches!(reg.get(IFACE, "Nope"), Err(PropertyError::UnknownProperty { .. })));
        assert!(matches!(reg.all("org.example.Other"), Err(PropertyError::UnknownInterface { .. })));
    }

    #[test]
    fn test_all_skips_unreadable_only() {
        let reg = registry();
        let snapshot = reg.all(IFACE).unwrap();
        assert_eq!(snapshot.names(), vec!["ReadMe", "ReadOrWriteMe"]);

        reg.register(PropertyDescriptor::new(
            IFACE,
            "Broken",
            Signature::Str,
            Access::Read,
            Arc::new(FnAccessor::new(|| Err(AccessorError::new("Something failed")))),
        ))
        .unwrap();
        let err = reg.all(IFACE).unwrap_err();
        assert_eq!(err.to_string(), "Something failed");
    }

    #[test]
    fn test_set_coerces_compatible_values() {
        let reg = registry();
        reg.set(IFACE, "WriteMe", Value::Int64(12)).unwrap();
        let err = reg.set(IFACE, "WriteMe", Value::Int64(i64::MAX)).unwrap_err();
        assert!(matches!(err, PropertyError::TypeMismatch { .. }));
        let err = reg.set(IFACE, "WriteMe", Value::Str("x".into())).unwrap_err();
        assert!(matches!(err, PropertyError::TypeMismatch { .. }));
    }

    #[test]
    fn test_getter_result_conforms_to_declared_signature() {
        let reg = PropertyRegistry::new();
        reg.register(PropertyDescriptor::new(
            IFACE,
            "Wide",
            Signature::UInt16,
            Access::Read,
            Arc::new(FnAccessor::new(|| Ok(Value::Int32(7)))),
        ))
        .unwrap();
        assert_eq!(reg.get(IFACE, "Wide").unwrap(), Value::UInt16(7));
    }
}
