//! Client proxy untuk property object remote
//!
//! Dua jalur lookup yang setara:
//! - `ObjectProxy::new(conn, dest, path).interface(name)`
//! - `RemoteService::new(conn, dest).properties(path, name)`
//!
//! `read`/`read_all` mengembalikan value polos (lossy untuk lebar integer);
//! `read_typed`/`read_all_typed` mempertahankan signature persis.

use std::collections::BTreeMap;

use tracing::trace;

use super::notify::on_properties_changed_at;
use super::{GET, GET_ALL, PROPERTIES_INTERFACE, SET};
use crate::core::PropertySnapshot;
use crate::error::{Error, Result};
use crate::network::{Connection, SubscriptionId};
use crate::protocol::message::Frame;
use crate::protocol::signature::Signature;
use crate::protocol::value::{infer, validate, Native, Value};

/// Service remote di satu connection
#[derive(Clone)]
pub struct RemoteService {
    conn: Connection,
    destination: Option<String>,
}

impl RemoteService {
    pub fn new(conn: &Connection, destination: Option<&str>) -> Self {
        Self {
            conn: conn.clone(),
            destination: destination.map(str::to_string),
        }
    }

    pub fn object(&self, path: &str) -> ObjectProxy {
        ObjectProxy::new(&self.conn, self.destination.as_deref(), path)
    }

    /// Shortcut langsung ke interface
    pub fn properties(&self, path: &str, interface: &str) -> InterfaceProxy {
        self.object(path).interface(interface)
    }
}

/// Satu object remote
#[derive(Clone)]
pub struct ObjectProxy {
    conn: Connection,
    destination: Option<String>,
    path: String,
}

impl ObjectProxy {
    pub fn new(conn: &Connection, destination: Option<&str>, path: &str) -> Self {
        Self {
            conn: conn.clone(),
            destination: destination.map(str::to_string),
            path: path.to_string(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn interface(&self, name: &str) -> InterfaceProxy {
        InterfaceProxy {
            conn: self.conn.clone(),
            destination: self.destination.clone(),
            path: self.path.clone(),
            interface: name.to_string(),
        }
    }
}

/// Pasangan (object, interface) remote
#[derive(Clone)]
pub struct InterfaceProxy {
    conn: Connection,
    destination: Option<String>,
    path: String,
    interface: String,
}

impl InterfaceProxy {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn interface_name(&self) -> &str {
        &self.interface
    }

    /// `Get`, envelope variant dilepas
    pub fn read(&self, name: &str) -> Result<Native> {
        self.read_typed(name).map(|value| value.to_native())
    }

    /// `Get` dengan signature value persis
    pub fn read_typed(&self, name: &str) -> Result<Value> {
        let reply = self.call(GET, vec![self.interface_arg(), Value::Str(name.to_string())])?;
        match reply.body.as_slice() {
            [Value::Variant(value)] => Ok((**value).clone()),
            _ => Err(unexpected_reply(GET, &reply)),
        }
    }

    /// `Set` dengan signature hasil inferensi
    pub fn write(&self, name: &str, value: impl Into<Native>) -> Result<()> {
        let value = infer(&value.into())?;
        self.write_typed(name, value)
    }

    /// `Set` dengan signature eksplisit (lebar integer persis)
    pub fn write_as(&self, name: &str, value: &Native, signature: &Signature) -> Result<()> {
        let value = validate(value, signature)?;
        self.write_typed(name, value)
    }

    pub fn write_typed(&self, name: &str, value: Value) -> Result<()> {
        let reply = self.call(
            SET,
            vec![self.interface_arg(), Value::Str(name.to_string()), Value::variant(value)],
        )?;
        match reply.body.as_slice() {
            [] => Ok(()),
            _ => Err(unexpected_reply(SET, &reply)),
        }
    }

    /// `GetAll`, envelope variant dilepas
    pub fn read_all(&self) -> Result<BTreeMap<String, Native>> {
        self.read_all_typed().map(PropertySnapshot::into_native)
    }

    pub fn read_all_typed(&self) -> Result<PropertySnapshot> {
        let reply = self.call(GET_ALL, vec![self.interface_arg()])?;
        match reply.body.as_slice() {
            [Value::Dict { key: Signature::Str, entries, .. }] => {
                let mut out = BTreeMap::new();
                for (name, value) in entries {
                    if let Value::Str(name) = name {
                        out.insert(name.clone(), value.clone().into_variant_inner());
                    }
                }
                Ok(PropertySnapshot::from(out))
            }
            _ => Err(unexpected_reply(GET_ALL, &reply)),
        }
    }

    /// Handler PropertiesChanged untuk object dan interface ini saja
    pub fn on_properties_changed<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&str, &BTreeMap<String, Native>, &[String]) + Send + Sync + 'static,
    {
        on_properties_changed_at(&self.conn, &self.path, &self.interface, handler)
    }

    #[inline]
    fn interface_arg(&self) -> Value {
        Value::Str(self.interface.clone())
    }

    fn call(&self, member: &str, body: Vec<Value>) -> Result<Frame> {
        trace!(path = %self.path, interface = %self.interface, member, "property call");
        let call = Frame::method_call(&self.path, PROPERTIES_INTERFACE, member, body)
            .with_destination(self.destination.as_deref());
        self.conn.call(call)
    }
}

fn unexpected_reply(member: &str, reply: &Frame) -> Error {
    Error::Protocol(format!(
        "unexpected reply signature '{}' for {}",
        reply.signature(),
        member
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    /// Peer yang membalas setiap call dengan body tetap
    fn fake_peer(server: Connection, body: Vec<Value>) -> thread::JoinHandle<Frame> {
        thread::spawn(move || {
            let call = server.wait_for_frame(Duration::from_secs(2)).unwrap().unwrap();
            server.send(Frame::method_return(&call, body)).unwrap();
            call
        })
    }

    #[test]
    fn test_read_unwraps_variant() {
        let (client, server) = Connection::pair().unwrap();
        let peer = fake_peer(server, vec![Value::variant(Value::UInt16(7))]);
        let proxy = ObjectProxy::new(&client, Some("org.example.Service"), "/obj").interface("org.example.I");

        assert_eq!(proxy.read("Level").unwrap(), Native::Int(7));
        let call = peer.join().unwrap();
        assert_eq!(call.member.as_deref(), Some(GET));
        assert_eq!(call.destination.as_deref(), Some("org.example.Service"));
        assert_eq!(
            call.body,
            vec![Value::Str("org.example.I".into()), Value::Str("Level".into())]
        );
    }

    #[test]
    fn test_write_as_uses_explicit_signature() {
        let (client, server) = Connection::pair().unwrap();
        let peer = fake_peer(server, vec![]);
        let proxy = RemoteService::new(&client, None).properties("/obj", "org.example.I");

        proxy.write_as("Level", &Native::Int(3), &Signature::Byte).unwrap();
        let call = peer.join().unwrap();
        assert_eq!(call.signature(), "ssv");
        assert_eq!(call.body[2], Value::variant(Value::Byte(3)));
    }

    #[test]
    fn test_write_as_rejects_out_of_range_locally() {
        let (client, _server) = Connection::pair().unwrap();
        let proxy = RemoteService::new(&client, None).properties("/obj", "org.example.I");
        assert!(matches!(
            proxy.write_as("Level", &Native::Int(300), &Signature::Byte),
            Err(Error::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_unexpected_reply_shape_is_protocol_error() {
        let (client, server) = Connection::pair().unwrap();
        let peer = fake_peer(server, vec![Value::Int32(1)]);
        let proxy = ObjectProxy::new(&client, None, "/obj").interface("org.example.I");

        assert!(matches!(proxy.read("Level"), Err(Error::Protocol(_))));
        peer.join().unwrap();
    }
}
