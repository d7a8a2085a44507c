//! Object server: object path -> property registry
//!
//! Di-export ke satu atau lebih connection sebagai call handler.
//! Notifikasi PropertiesChanged dikirim ke semua connection tempat
//! object server di-export.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, warn};

use crate::core::registry::PropertyRegistry;
use crate::error::{Error, MethodError, Result};
use crate::network::{CallHandler, Connection, WeakConnection};
use crate::properties::notify::{self, ChangeNotification};
use crate::properties::{server, PROPERTIES_INTERFACE};
use crate::protocol::message::Frame;
use crate::protocol::value::{is_valid_object_path, Value};
use crate::{lock, read, write};

#[derive(Default)]
pub struct ObjectServer {
    objects: RwLock<BTreeMap<String, Arc<PropertyRegistry>>>,
    connections: Mutex<Vec<WeakConnection>>,
}

impl ObjectServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registry untuk `path`, dibuat jika belum ada
    pub fn add_object(&self, path: &str) -> Result<Arc<PropertyRegistry>> {
        if !is_valid_object_path(path) {
            return Err(Error::Protocol(format!("invalid object path '{}'", path)));
        }
        let mut objects = write(&self.objects);
        Ok(objects.entry(path.to_string()).or_default().clone())
    }

    pub fn object(&self, path: &str) -> Option<Arc<PropertyRegistry>> {
        read(&self.objects).get(path).cloned()
    }

    pub fn remove_object(&self, path: &str) -> bool {
        write(&self.objects).remove(path).is_some()
    }

    pub fn paths(&self) -> Vec<String> {
        read(&self.objects).keys().cloned().collect()
    }

    /// Pasang object server sebagai call handler di `conn`
    pub fn export_on(self: &Arc<Self>, conn: &Connection) {
        conn.set_call_handler(self.clone());
        let mut connections = lock(&self.connections);
        if !connections
            .iter()
            .filter_map(WeakConnection::upgrade)
            .any(|c| c.same_as(conn))
        {
            connections.push(conn.downgrade());
        }
        debug!(conn = conn.id(), "object server exported");
    }

    /// Connection yang masih hidup; yang sudah mati dibuang
    pub fn connections(&self) -> Vec<Connection> {
        let mut connections = lock(&self.connections);
        let live: Vec<Connection> = connections
            .iter()
            .filter_map(WeakConnection::upgrade)
            .filter(|c| !c.is_closed())
            .collect();
        connections.retain(|weak| weak.upgrade().is_some_and(|c| !c.is_closed()));
        live
    }

    /// Tandai property dirty dan kirim satu notifikasi agregat.
    ///
    /// Mengembalikan jumlah connection yang menerima signal.
    pub fn properties_changed(&self, path: &str, interface: &str, names: &[&str]) -> Result<usize> {
        let registry = self
            .object(path)
            .ok_or_else(|| Error::Protocol(format!("no object at '{}'", path)))?;
        let notification = ChangeNotification::collect(&registry, interface, names)?;
        if notification.is_empty() {
            return Ok(0);
        }
        Ok(self.emit(path, &notification))
    }

    /// Kirim notifikasi ke semua connection; gagal kirim hanya di-log
    pub fn emit(&self, path: &str, notification: &ChangeNotification) -> usize {
        let mut sent = 0;
        for conn in self.connections() {
            match notify::emit(&conn, path, notification) {
                Ok(_) => sent += 1,
                Err(e) => warn!(conn = conn.id(), path, error = %e, "failed to emit PropertiesChanged"),
            }
        }
        sent
    }
}

impl CallHandler for ObjectServer {
    fn handle_call(&self, _conn: &Connection, call: &Frame) -> std::result::Result<Vec<Value>, MethodError> {
        let path = call.path.as_deref().unwrap_or("/");
        let member = call.member.as_deref().unwrap_or("");
        let registry = self
            .object(path)
            .ok_or_else(|| MethodError::unknown_object(path))?;

        match call.interface.as_deref() {
            Some(PROPERTIES_INTERFACE) => {
                let dispatched = server::dispatch(&registry, path, call)?;
                // Signal dikirim sebelum reply Set
                if let Some(notification) = dispatched.notification {
                    self.emit(path, &notification);
                }
                Ok(dispatched.reply)
            }
            other => Err(MethodError::unknown_method(other.unwrap_or(""), member)),
        }
    }
}
