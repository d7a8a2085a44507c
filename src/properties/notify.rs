//! Change Notification: signal `PropertiesChanged`
//!
//! Satu unit kerja (Set, atau penandaan dirty eksplisit) menghasilkan tepat
//! satu signal yang mengagregasi semua property yang berubah.

use std::collections::BTreeMap;

use tracing::warn;

use super::{PROPERTIES_CHANGED, PROPERTIES_INTERFACE};
use crate::core::{EmitsChanged, PropertyRegistry};
use crate::error::{Error, PropertyError, Result};
use crate::network::{Connection, SignalMatcher, SubscriptionId};
use crate::protocol::message::Frame;
use crate::protocol::signature::Signature;
use crate::protocol::value::{Native, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeNotification {
    pub interface: String,
    /// Property -> value baru
    pub changed: BTreeMap<String, Value>,
    /// Property yang berubah tapi value-nya tidak disertakan
    pub invalidated: Vec<String>,
}

impl ChangeNotification {
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            ..Self::default()
        }
    }

    /// Kumpulkan notifikasi untuk `names` sesuai kebijakan `EmitsChanged`.
    ///
    /// Nama duplikat digabung. Property dengan `EmitsChanged::True` yang
    /// tidak readable dilaporkan sebagai invalidated.
    pub fn collect(registry: &PropertyRegistry, interface: &str, names: &[&str]) -> std::result::Result<Self, PropertyError> {
        let mut out = Self::new(interface);
        for (idx, name) in names.iter().enumerate() {
            if names[..idx].contains(name) {
                continue;
            }
            let descriptor = registry.lookup(interface, name)?;
            match descriptor.emits() {
                EmitsChanged::True if descriptor.access().readable() => {
                    let value = registry.get(interface, name)?;
                    out.changed.insert(name.to_string(), value);
                }
                EmitsChanged::True | EmitsChanged::Invalidates => out.invalidated.push(name.to_string()),
                EmitsChanged::False => {}
            }
        }
        Ok(out)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.invalidated.is_empty()
    }

    /// Value yang berubah tanpa envelope variant
    pub fn changed_native(&self) -> BTreeMap<String, Native> {
        self.changed
            .iter()
            .map(|(name, value)| (name.clone(), value.to_native()))
            .collect()
    }

    /// Signal `PropertiesChanged(s, a{sv}, as)` untuk object di `path`
    pub fn to_frame(&self, path: &str) -> Frame {
        let changed = Value::Dict {
            key: Signature::Str,
            value: Signature::Variant,
            entries: self
                .changed
                .iter()
                .map(|(name, value)| (Value::Str(name.clone()), Value::variant(value.clone())))
                .collect(),
        };
        let invalidated = Value::Array {
            elem: Signature::Str,
            items: self.invalidated.iter().cloned().map(Value::Str).collect(),
        };
        Frame::signal(
            path,
            PROPERTIES_INTERFACE,
            PROPERTIES_CHANGED,
            vec![Value::Str(self.interface.clone()), changed, invalidated],
        )
    }

    pub fn from_frame(frame: &Frame) -> Result<Self> {
        if frame.interface.as_deref() != Some(PROPERTIES_INTERFACE)
            || frame.member.as_deref() != Some(PROPERTIES_CHANGED)
        {
            return Err(Error::Protocol("not a PropertiesChanged signal".to_string()));
        }
        match frame.body.as_slice() {
            [Value::Str(interface), Value::Dict { key: Signature::Str, entries, .. }, Value::Array { elem: Signature::Str, items }] => {
                let mut changed = BTreeMap::new();
                for (name, value) in entries {
                    if let Value::Str(name) = name {
                        changed.insert(name.clone(), value.clone().into_variant_inner());
                    }
                }
                let invalidated = items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect();
                Ok(Self {
                    interface: interface.clone(),
                    changed,
                    invalidated,
                })
            }
            _ => Err(Error::Protocol(format!(
                "PropertiesChanged with unexpected signature '{}'",
                frame.signature()
            ))),
        }
    }
}

/// Kirim notifikasi di satu connection
pub fn emit(conn: &Connection, path: &str, notification: &ChangeNotification) -> Result<u32> {
    conn.send(notification.to_frame(path))
}

/// Handler `(interface, changed, invalidated)` untuk semua object di connection
pub fn on_properties_changed<F>(conn: &Connection, interface: &str, handler: F) -> SubscriptionId
where
    F: Fn(&str, &BTreeMap<String, Native>, &[String]) + Send + Sync + 'static,
{
    subscribe_native(conn, matcher(interface), handler)
}

/// Sama seperti `on_properties_changed`, dibatasi ke satu object path
pub fn on_properties_changed_at<F>(conn: &Connection, path: &str, interface: &str, handler: F) -> SubscriptionId
where
    F: Fn(&str, &BTreeMap<String, Native>, &[String]) + Send + Sync + 'static,
{
    subscribe_native(conn, matcher(interface).path(path), handler)
}

/// Handler dengan notifikasi typed (signature tetap utuh)
pub fn on_change_notification<F>(conn: &Connection, path: Option<&str>, interface: &str, handler: F) -> SubscriptionId
where
    F: Fn(&ChangeNotification) + Send + Sync + 'static,
{
    let matcher = match path {
        Some(path) => matcher(interface).path(path),
        None => matcher(interface),
    };
    conn.subscribe(matcher, move |frame| match ChangeNotification::from_frame(frame) {
        Ok(notification) => handler(&notification),
        Err(e) => warn!(error = %e, "dropping malformed PropertiesChanged"),
    })
}

fn matcher(interface: &str) -> SignalMatcher {
    SignalMatcher::new()
        .interface(PROPERTIES_INTERFACE)
        .member(PROPERTIES_CHANGED)
        .arg0(interface)
}

fn subscribe_native<F>(conn: &Connection, matcher: SignalMatcher, handler: F) -> SubscriptionId
where
    F: Fn(&str, &BTreeMap<String, Native>, &[String]) + Send + Sync + 'static,
{
    conn.subscribe(matcher, move |frame| match ChangeNotification::from_frame(frame) {
        Ok(n) => handler(&n.interface, &n.changed_native(), &n.invalidated),
        Err(e) => warn!(error = %e, "dropping malformed PropertiesChanged"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Access, PropertyDescriptor};

    const IFACE: &str = "org.example.Test";

    fn registry() -> PropertyRegistry {
        let reg = PropertyRegistry::new();
        reg.register(PropertyDescriptor::stored(IFACE, "A", Value::Int32(1), Access::ReadWrite))
            .unwrap();
        reg.register(
            PropertyDescriptor::stored(IFACE, "B", Value::Str("b".into()), Access::Read)
                .with_emits(EmitsChanged::Invalidates),
        )
        .unwrap();
        reg.register(
            PropertyDescriptor::stored(IFACE, "C", Value::Bool(false), Access::Read)
                .with_emits(EmitsChanged::False),
        )
        .unwrap();
        reg.register(PropertyDescriptor::stored(IFACE, "D", Value::Bool(true), Access::Write))
            .unwrap();
        reg
    }

    #[test]
    fn test_collect_applies_policy() {
        let reg = registry();
        let n = ChangeNotification::collect(&reg, IFACE, &["A", "B", "C", "D", "A"]).unwrap();
        assert_eq!(n.changed.len(), 1);
        assert_eq!(n.changed.get("A"), Some(&Value::Int32(1)));
        assert_eq!(n.invalidated, vec!["B".to_string(), "D".to_string()]);
    }

    #[test]
    fn test_collect_unknown_property_fails() {
        let reg = registry();
        assert!(ChangeNotification::collect(&reg, IFACE, &["Nope"]).is_err());
    }

    #[test]
    fn test_frame_conversion() {
        let reg = registry();
        let n = ChangeNotification::collect(&reg, IFACE, &["A", "B"]).unwrap();
        let mut frame = n.to_frame("/org/example/Obj");
        assert_eq!(frame.signature(), "sa{sv}as");

        frame.serial = 1;
        let decoded = crate::protocol::message::decode_frame(&frame.encode().unwrap()).unwrap();
        assert_eq!(ChangeNotification::from_frame(&decoded).unwrap(), n);
    }

    #[test]
    fn test_from_frame_rejects_wrong_shape() {
        let frame = Frame::signal("/", PROPERTIES_INTERFACE, PROPERTIES_CHANGED, vec![Value::Str(IFACE.into())]);
        assert!(matches!(ChangeNotification::from_frame(&frame), Err(Error::Protocol(_))));
    }
}
