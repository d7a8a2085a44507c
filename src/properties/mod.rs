//! Property Access Protocol dan Change Notification
//!
//! Interface standar `org.freedesktop.DBus.Properties`:
//! - `Get(s interface, s name) -> v`
//! - `Set(s interface, s name, v value) -> ()`
//! - `GetAll(s interface) -> a{sv}`
//! - signal `PropertiesChanged(s interface, a{sv} changed, as invalidated)`

pub mod notify;
pub mod proxy;
pub mod server;

pub use notify::{on_properties_changed, ChangeNotification};
pub use proxy::{InterfaceProxy, ObjectProxy, RemoteService};

pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

pub const GET: &str = "Get";
pub const SET: &str = "Set";
pub const GET_ALL: &str = "GetAll";
pub const PROPERTIES_CHANGED: &str = "PropertiesChanged";

/// Nama error wire
///
/// Catatan: `UNKNOWN_PROPERTY` dipakai untuk interface yang tidak dikenal
/// maupun property yang tidak dikenal; keduanya hanya dibedakan oleh teks
/// pesan ("no such interface" vs "not found"). Dipertahankan untuk
/// kompatibilitas wire.
pub mod error_names {
    pub const UNKNOWN_PROPERTY: &str = "org.freedesktop.DBus.Error.UnknownProperty";
    pub const NOT_READABLE: &str = "org.freedesktop.DBus.Error.PropertyNotReadable";
    pub const NOT_WRITABLE: &str = "org.freedesktop.DBus.Error.PropertyReadOnly";
    pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
    pub const FAILED: &str = "org.freedesktop.DBus.Error.Failed";
}
