//! Core module: property registry dan object server
//!
//! Prinsip desain:
//! - Descriptor immutable setelah diregister, di-share lewat `Arc`
//! - Lock registry tidak pernah dipegang saat accessor dipanggil
//! - Tidak ada state global: object server dibuat per proses/test

mod accessor;
mod object_server;
mod registry;

pub use accessor::{Access, EmitsChanged, FnAccessor, PropertyAccessor, PropertyDescriptor, StoredValue};
pub use object_server::ObjectServer;
pub use registry::{PropertyRegistry, PropertySnapshot};
