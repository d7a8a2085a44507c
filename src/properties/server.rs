//! Server dispatch untuk interface Properties
//!
//! Memetakan error registry 1:1 ke nama + pesan error wire. Pesan memuat
//! substring yang dipakai client untuk membedakan kasus:
//! "not found", "no such interface", "not readable", "not writable".

use tracing::{debug, warn};

use super::error_names;
use super::notify::ChangeNotification;
use super::{GET, GET_ALL, PROPERTIES_INTERFACE, SET};
use crate::core::PropertyRegistry;
use crate::error::{MethodError, PropertyError};
use crate::protocol::message::Frame;
use crate::protocol::value::Value;

/// Hasil dispatch: body reply + notifikasi yang harus di-emit (untuk Set)
#[derive(Debug)]
pub struct Dispatched {
    pub reply: Vec<Value>,
    pub notification: Option<ChangeNotification>,
}

/// Jalankan `Get`/`Set`/`GetAll` terhadap registry object di `path`
pub fn dispatch(registry: &PropertyRegistry, path: &str, call: &Frame) -> Result<Dispatched, MethodError> {
    let member = call.member.as_deref().unwrap_or("");
    match member {
        GET => {
            let (interface, name) = match call.body.as_slice() {
                [Value::Str(interface), Value::Str(name)] => (interface, name),
                _ => return Err(bad_args(member, "ss", call)),
            };
            let value = registry
                .get(interface, name)
                .map_err(|e| to_method_error(&e, path))?;
            Ok(Dispatched {
                reply: vec![Value::variant(value)],
                notification: None,
            })
        }
        SET => {
            let (interface, name, value) = match call.body.as_slice() {
                [Value::Str(interface), Value::Str(name), Value::Variant(value)] => (interface, name, value),
                _ => return Err(bad_args(member, "ssv", call)),
            };
            registry
                .set(interface, name, (**value).clone())
                .map_err(|e| to_method_error(&e, path))?;
            Ok(Dispatched {
                reply: Vec::new(),
                notification: changed_after_set(registry, interface, name),
            })
        }
        GET_ALL => {
            let interface = match call.body.as_slice() {
                [Value::Str(interface)] => interface,
                _ => return Err(bad_args(member, "s", call)),
            };
            let snapshot = registry
                .all(interface)
                .map_err(|e| to_method_error(&e, path))?;
            Ok(Dispatched {
                reply: vec![snapshot.to_value()],
                notification: None,
            })
        }
        _ => Err(MethodError::unknown_method(PROPERTIES_INTERFACE, member)),
    }
}

/// Notifikasi untuk property yang di-set plus property yang terhubung
fn changed_after_set(registry: &PropertyRegistry, interface: &str, name: &str) -> Option<ChangeNotification> {
    let descriptor = registry.lookup(interface, name).ok()?;
    let mut names = vec![name];
    names.extend(descriptor.affected().iter().map(String::as_str));

    match ChangeNotification::collect(registry, interface, &names) {
        Ok(notification) if notification.is_empty() => None,
        Ok(notification) => Some(notification),
        Err(e) => {
            // Set sudah berhasil; kegagalan membaca value baru tidak menggagalkannya
            warn!(interface, property = name, error = %e, "cannot collect PropertiesChanged");
            None
        }
    }
}

fn bad_args(member: &str, expected: &str, call: &Frame) -> MethodError {
    debug!(member, expected, got = %call.signature(), "invalid Properties arguments");
    MethodError::invalid_args(format!(
        "Invalid arguments for {}: expected '{}', got '{}'",
        member,
        expected,
        call.signature()
    ))
}

/// Mapping error registry ke error wire
pub fn to_method_error(err: &PropertyError, path: &str) -> MethodError {
    match err {
        PropertyError::UnknownInterface { interface, property } if property.is_empty() => MethodError::new(
            error_names::UNKNOWN_PROPERTY,
            format!(
                "Interface '{}' (on object '{}') not found: no such interface",
                interface, path
            ),
        ),
        PropertyError::UnknownInterface { interface, property } => MethodError::new(
            error_names::UNKNOWN_PROPERTY,
            format!(
                "Property '{}.{}' (on object '{}') not found: no such interface",
                interface, property, path
            ),
        ),
        PropertyError::UnknownProperty { interface, property } => MethodError::new(
            error_names::UNKNOWN_PROPERTY,
            format!("Property '{}.{}' (on object '{}') not found", interface, property, path),
        ),
        PropertyError::NotReadable { interface, property } => MethodError::new(
            error_names::NOT_READABLE,
            format!("Property '{}.{}' (on object '{}') is not readable", interface, property, path),
        ),
        PropertyError::NotWritable { interface, property } => MethodError::new(
            error_names::NOT_WRITABLE,
            format!("Property '{}.{}' (on object '{}') is not writable", interface, property, path),
        ),
        PropertyError::TypeMismatch { .. } => MethodError::invalid_args(err.to_string()),
        PropertyError::AccessorFailed(cause) => MethodError::failed(cause.to_string()),
        PropertyError::DuplicateProperty { .. } => MethodError::failed(err.to_string()),
    }
}
