//! Event loop kooperatif single-threaded
//!
//! Menggunakan mio untuk menunggu readiness di semua connection.
//! Handler dijalankan berurutan, satu per satu, sesuai urutan frame
//! di-dequeue (FIFO per connection).
//!
//! `quit()` bisa dipanggil dari thread mana pun lewat `LoopHandle`;
//! `mio::Waker` membangunkan poll sehingga `run()` kembali dengan cepat.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::{Events, Poll, Token, Waker};
use tracing::{debug, trace};

use super::connection::{Connection, Inbound};
use crate::config::LoopConfig;
use crate::error::{Error, Result};
use crate::protocol::message::{Frame, MessageType};

const WAKER_TOKEN: Token = Token(0);
const EVENTS_CAPACITY: usize = 128;

/// Handle untuk menghentikan loop dari thread lain
#[derive(Clone)]
pub struct LoopHandle {
    quit: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl LoopHandle {
    /// Idempotent; jika loop belum berjalan, `run()` berikutnya langsung kembali
    pub fn quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
        let _ = self.waker.wake();
    }
}

pub struct EventLoop {
    poll: Poll,
    events: Events,
    connections: Vec<(Token, Connection)>,
    next_token: usize,
    handle: LoopHandle,
    config: LoopConfig,
}

impl EventLoop {
    pub fn new() -> Result<Self> {
        Self::with_config(LoopConfig::default())
    }

    pub fn with_config(config: LoopConfig) -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            connections: Vec::new(),
            next_token: 1,
            handle: LoopHandle {
                quit: Arc::new(AtomicBool::new(false)),
                waker,
            },
            config,
        })
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    pub fn quit(&self) {
        self.handle.quit();
    }

    /// Register connection untuk read events (no-op jika sudah terdaftar)
    pub fn add_connection(&mut self, conn: &Connection) -> Result<()> {
        if self.connections.iter().any(|(_, c)| c.same_as(conn)) {
            return Ok(());
        }
        let token = Token(self.next_token);
        self.next_token += 1;
        conn.register(self.poll.registry(), token)?;
        self.connections.push((token, conn.clone()));
        debug!(conn = conn.id(), token = token.0, "connection added to loop");
        Ok(())
    }

    pub fn remove_connection(&mut self, conn: &Connection) -> Result<bool> {
        match self.connections.iter().position(|(_, c)| c.same_as(conn)) {
            Some(idx) => {
                let (_, conn) = self.connections.remove(idx);
                conn.deregister(self.poll.registry())?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Blok sampai `quit()`, deadline, atau error transport fatal.
    ///
    /// - `Ok(())` setelah quit
    /// - `Err(Error::LoopTimeout)` jika deadline di `LoopConfig` lewat
    /// - error fatal dari connection (EOF, I/O, stream rusak)
    pub fn run(&mut self) -> Result<()> {
        let deadline = self.config.deadline.map(|d| Instant::now() + d);
        debug!(connections = self.connections.len(), "event loop started");

        loop {
            // Quit di-consume sekali, termasuk yang diminta sebelum run()
            if self.handle.quit.swap(false, Ordering::SeqCst) {
                debug!("event loop quit");
                return Ok(());
            }
            let timeout = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!("event loop deadline elapsed");
                        return Err(Error::LoopTimeout);
                    }
                    (deadline - now).min(self.config.poll_interval)
                }
                None => self.config.poll_interval,
            };
            if let Err(e) = self.turn(timeout) {
                // quit yang datang bersamaan dengan error tetap menang
                if self.handle.quit.swap(false, Ordering::SeqCst) {
                    return Ok(());
                }
                return Err(e);
            }
        }
    }

    /// Satu iterasi: poll (maks `timeout`), pompa connection, dispatch inbox.
    ///
    /// Mengembalikan jumlah item yang di-dispatch.
    pub fn run_once(&mut self, timeout: Duration) -> Result<usize> {
        self.turn(timeout)
    }

    fn turn(&mut self, timeout: Duration) -> Result<usize> {
        if let Err(e) = self.poll.poll(&mut self.events, Some(timeout)) {
            if e.kind() == std::io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(e.into());
        }

        let ready: Vec<Token> = self
            .events
            .iter()
            .map(|event| event.token())
            .filter(|token| *token != WAKER_TOKEN)
            .collect();

        let mut fatal = None;
        for (token, conn) in &self.connections {
            if ready.contains(token) {
                if let Err(e) = conn.pump() {
                    fatal.get_or_insert(e);
                }
            }
        }

        // Frame yang sempat terbaca sebelum error fatal tetap di-dispatch
        let dispatched = self.dispatch_pending();
        match fatal {
            Some(e) => Err(e),
            None => Ok(dispatched),
        }
    }

    fn dispatch_pending(&self) -> usize {
        let mut dispatched = 0;
        for (_, conn) in &self.connections {
            // Flag quit dicek di antara dequeue
            while !self.handle.quit.load(Ordering::SeqCst) {
                let Some(item) = conn.pop_inbound() else {
                    break;
                };
                self.dispatch(conn, item);
                dispatched += 1;
            }
        }
        dispatched
    }

    fn dispatch(&self, conn: &Connection, item: Inbound) {
        let frame = match item {
            Inbound::Frame(frame) => frame,
            Inbound::Malformed(e) => {
                self.report(&Error::Decode(e));
                return;
            }
        };

        match frame.msg_type {
            MessageType::Signal => {
                let handlers = conn.dispatch_signal(&frame);
                trace!(
                    conn = conn.id(),
                    member = frame.member.as_deref().unwrap_or(""),
                    handlers,
                    "signal dispatched"
                );
            }
            MessageType::MethodCall => {
                debug!(
                    conn = conn.id(),
                    serial = frame.serial,
                    path = frame.path.as_deref().unwrap_or(""),
                    interface = frame.interface.as_deref().unwrap_or(""),
                    member = frame.member.as_deref().unwrap_or(""),
                    "dispatch method call"
                );
                if let Err(e) = conn.dispatch_call(&frame) {
                    self.report(&e);
                }
            }
            MessageType::MethodReturn | MessageType::Error => {
                self.report(&unmatched_reply(&frame));
            }
        }
    }

    #[inline]
    fn report(&self, err: &Error) {
        (self.config.error_sink)(err);
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        for (_, conn) in &self.connections {
            let _ = conn.deregister(self.poll.registry());
        }
    }
}

fn unmatched_reply(frame: &Frame) -> Error {
    Error::Protocol(format!(
        "unmatched reply for serial {}",
        frame.reply_serial.unwrap_or(0)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MethodError;
    use crate::network::connection::{CallHandler, SignalMatcher};
    use crate::protocol::value::Value;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::thread;

    fn counting_sink(counter: Arc<AtomicUsize>) -> LoopConfig {
        LoopConfig::default().with_error_sink(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_quit_before_run_is_consumed_once() {
        let mut ev = EventLoop::with_config(
            LoopConfig::default().with_deadline(Duration::from_millis(50)),
        )
        .unwrap();
        ev.quit();
        ev.quit();
        assert!(ev.run().is_ok());
        // quit sudah di-consume, run berikutnya berhenti karena deadline
        assert!(matches!(ev.run(), Err(Error::LoopTimeout)));
    }

    #[test]
    fn test_quit_from_other_thread() {
        let mut ev = EventLoop::new().unwrap();
        let handle = ev.handle();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            handle.quit();
        });
        let started = Instant::now();
        ev.run().unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        worker.join().unwrap();
    }

    #[test]
    fn test_signal_handlers_fire_in_registration_order() {
        let (a, b) = Connection::pair().unwrap();
        let mut ev = EventLoop::new().unwrap();
        ev.add_connection(&b).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let order = order.clone();
            let handle = ev.handle();
            b.subscribe(SignalMatcher::new().member("Tick"), move |_| {
                let mut order = order.lock().unwrap();
                order.push(tag);
                if order.len() == 2 {
                    handle.quit();
                }
            });
        }

        a.send_signal("/", "org.example.I", "Tick", vec![]).unwrap();
        ev.run().unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    struct Echo;

    impl CallHandler for Echo {
        fn handle_call(&self, _conn: &Connection, call: &Frame) -> std::result::Result<Vec<Value>, MethodError> {
            match call.member.as_deref() {
                Some("Echo") => Ok(call.body.clone()),
                _ => Err(MethodError::failed("unsupported")),
            }
        }
    }

    #[test]
    fn test_method_call_dispatch_sends_reply() {
        let (client, server) = Connection::pair().unwrap();
        server.set_call_handler(Arc::new(Echo));

        let mut ev = EventLoop::new().unwrap();
        ev.add_connection(&server).unwrap();
        let handle = ev.handle();
        let worker = thread::spawn(move || {
            let reply = client.call(Frame::method_call("/", "org.example.I", "Echo", vec![Value::Bool(true)]));
            handle.quit();
            reply
        });
        ev.run().unwrap();
        let reply = worker.join().unwrap().unwrap();
        assert_eq!(reply.body, vec![Value::Bool(true)]);
    }

    #[test]
    fn test_unmatched_reply_goes_to_sink_and_loop_continues() {
        let (a, b) = Connection::pair().unwrap();
        let errors = Arc::new(AtomicUsize::new(0));
        let mut ev = EventLoop::with_config(counting_sink(errors.clone())).unwrap();
        ev.add_connection(&b).unwrap();

        let mut call = Frame::method_call("/", "org.example.I", "M", vec![]);
        call.serial = 99;
        a.send(Frame::method_return(&call, vec![])).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while errors.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            ev.run_once(Duration::from_millis(10)).unwrap();
        }
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_peer_disconnect_ends_run() {
        let (a, b) = Connection::pair().unwrap();
        let mut ev = EventLoop::with_config(
            LoopConfig::default().with_deadline(Duration::from_secs(5)),
        )
        .unwrap();
        ev.add_connection(&b).unwrap();
        drop(a);
        assert!(matches!(ev.run(), Err(Error::Disconnected)));
    }

    #[test]
    fn test_add_connection_is_idempotent() {
        let (_a, b) = Connection::pair().unwrap();
        let mut ev = EventLoop::new().unwrap();
        ev.add_connection(&b).unwrap();
        ev.add_connection(&b).unwrap();
        assert!(ev.remove_connection(&b).unwrap());
        assert!(!ev.remove_connection(&b).unwrap());
    }
}
