//! Hermes Props - typed property access di atas message-bus wire protocol
//!
//! Arsitektur (leaf-first):
//! - `protocol`: signature, typed value, marshalling dengan alignment, frame
//! - `core`: property registry, accessor hooks, object server per path
//! - `properties`: Get/Set/GetAll (server dispatch + client proxy), PropertiesChanged
//! - `network`: connection di atas unix socket (mio) dan event loop kooperatif
//!
//! Tidak ada state global: setiap test/proses membangun `EventLoop`,
//! `Connection` dan `ObjectServer` sendiri.

pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod properties;
pub mod protocol;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use crate::config::{ConnectionConfig, LoopConfig};
pub use crate::core::{Access, EmitsChanged, ObjectServer, PropertyDescriptor, PropertyRegistry, PropertySnapshot};
pub use crate::error::{Error, MethodError, MethodErrorKind, PropertyError, Result};
pub use crate::network::{Connection, EventLoop, LoopHandle, SignalMatcher, SubscriptionId};
pub use crate::properties::{ChangeNotification, InterfaceProxy, ObjectProxy, RemoteService};
pub use crate::protocol::{Native, Signature, Value};

// State di balik lock selalu data biasa, jadi lock yang poisoned tetap dipakai
#[inline(always)]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[inline(always)]
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

#[inline(always)]
pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
