//! Connection di atas unix socket dengan buffered I/O
//!
//! Satu `Connection` bisa dipakai dari beberapa thread sekaligus:
//! - thread yang melakukan `call()` sinkron memompa socket sendiri
//! - `EventLoop` memompa socket saat readiness event dan men-dispatch inbox
//!
//! Reply yang sedang ditunggu diarahkan ke tabel `replies` (per serial),
//! semua frame lain masuk `inbox` dengan urutan FIFO per connection.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock, Weak};
use std::thread;
use std::time::Instant;

use mio::net::UnixStream;
use mio::{Interest, Registry, Token};
use tracing::{debug, trace, warn};

use crate::config::ConnectionConfig;
use crate::error::{DecodeError, EncodeError, Error, MethodError, Result};
use crate::protocol::message::{Frame, FrameReader, MessageType, NO_REPLY_EXPECTED};
use crate::protocol::value::Value;
use crate::{lock, read, write};

/// Ukuran chunk per read syscall
const READ_CHUNK: usize = 64 * 1024; // 64KB

/// Handler untuk method call yang masuk
pub trait CallHandler: Send + Sync {
    /// Body reply, atau error wire yang dikirim balik ke caller
    fn handle_call(&self, conn: &Connection, call: &Frame) -> std::result::Result<Vec<Value>, MethodError>;
}

type SignalHandler = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Filter signal: field yang `None` cocok dengan apa saja
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalMatcher {
    pub path: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
    /// Argumen string pertama body
    pub arg0: Option<String>,
}

impl SignalMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    pub fn interface(mut self, interface: &str) -> Self {
        self.interface = Some(interface.to_string());
        self
    }

    pub fn member(mut self, member: &str) -> Self {
        self.member = Some(member.to_string());
        self
    }

    pub fn arg0(mut self, arg0: &str) -> Self {
        self.arg0 = Some(arg0.to_string());
        self
    }

    pub fn matches(&self, frame: &Frame) -> bool {
        fn field(want: &Option<String>, got: &Option<String>) -> bool {
            want.is_none() || want == got
        }

        frame.msg_type == MessageType::Signal
            && field(&self.path, &frame.path)
            && field(&self.interface, &frame.interface)
            && field(&self.member, &frame.member)
            && match &self.arg0 {
                Some(want) => frame.body.first().and_then(Value::as_str) == Some(want.as_str()),
                None => true,
            }
    }
}

/// Token untuk `Connection::unsubscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    matcher: SignalMatcher,
    handler: SignalHandler,
}

/// Item di inbox: frame utuh, atau frame malformed yang sudah dilewati
#[derive(Debug)]
pub(crate) enum Inbound {
    Frame(Frame),
    Malformed(DecodeError),
}

/// Socket + buffer baca/tulis
struct Transport {
    stream: UnixStream,
    read_buffer: Vec<u8>,
    read_pos: usize,
    write_buffer: Vec<u8>,
}

impl Transport {
    fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            read_buffer: Vec::with_capacity(READ_CHUNK),
            read_pos: 0,
            write_buffer: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Read satu chunk ke buffer. `Ok(0)` berarti peer menutup socket.
    #[inline]
    fn fill_read_buffer(&mut self) -> io::Result<usize> {
        // Compact buffer jika perlu
        if self.read_pos > 0 {
            self.read_buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }

        let len = self.read_buffer.len();
        self.read_buffer.resize(len + READ_CHUNK, 0);
        let result = self.stream.read(&mut self.read_buffer[len..]);
        let n = *result.as_ref().unwrap_or(&0);
        self.read_buffer.truncate(len + n);
        result
    }

    /// Data yang belum dikonsumsi (zero-copy)
    #[inline(always)]
    fn readable(&self) -> &[u8] {
        &self.read_buffer[self.read_pos..]
    }

    #[inline(always)]
    fn consume(&mut self, n: usize) {
        self.read_pos += n.min(self.read_buffer.len() - self.read_pos);
    }

    #[inline]
    fn queue_write(&mut self, data: &[u8]) {
        self.write_buffer.extend_from_slice(data);
    }

    /// `Ok(true)` jika buffer tulis sudah kosong
    #[inline]
    fn flush_write_buffer(&mut self) -> io::Result<bool> {
        let mut written = 0;
        let result = loop {
            if written == self.write_buffer.len() {
                break Ok(true);
            }
            match self.stream.write(&self.write_buffer[written..]) {
                Ok(0) => {
                    break Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write to socket",
                    ))
                }
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(false),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };
        // Partial write, compact buffer
        self.write_buffer.drain(..written);
        result
    }
}

#[derive(Default)]
struct Shared {
    /// Serial call yang reply-nya sedang ditunggu
    awaiting: HashSet<u32>,
    replies: HashMap<u32, Frame>,
    inbox: VecDeque<Inbound>,
    /// Item inbox yang dibuang karena antrean penuh
    dropped: u64,
    closed: bool,
}

impl Shared {
    /// Antrekan item; jika penuh, item tertua dibuang. `false` jika ada yang dibuang.
    fn enqueue(&mut self, item: Inbound, limit: usize) -> bool {
        let mut kept = true;
        while self.inbox.len() >= limit.max(1) {
            self.inbox.pop_front();
            self.dropped += 1;
            kept = false;
        }
        self.inbox.push_back(item);
        kept
    }
}

struct Inner {
    config: ConnectionConfig,
    transport: Mutex<Transport>,
    state: Mutex<Shared>,
    reply_ready: Condvar,
    next_serial: AtomicU32,
    next_subscription: AtomicU64,
    subscriptions: Mutex<Vec<Subscription>>,
    call_handler: RwLock<Option<Arc<dyn CallHandler>>>,
}

/// Handle connection, murah untuk di-clone
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

/// Referensi lemah, dipakai object server agar tidak membentuk siklus
#[derive(Clone)]
pub struct WeakConnection {
    inner: Weak<Inner>,
}

impl WeakConnection {
    pub fn upgrade(&self) -> Option<Connection> {
        self.inner.upgrade().map(|inner| Connection { inner })
    }
}

impl Connection {
    /// Dua connection yang saling terhubung (socketpair)
    pub fn pair() -> Result<(Connection, Connection)> {
        Self::pair_with_config(ConnectionConfig::default())
    }

    pub fn pair_with_config(config: ConnectionConfig) -> Result<(Connection, Connection)> {
        let (a, b) = StdUnixStream::pair()?;
        Ok((
            Self::from_std(a, config.clone())?,
            Self::from_std(b, config)?,
        ))
    }

    /// Connect ke unix socket di `path`
    pub fn connect(path: impl AsRef<Path>, config: ConnectionConfig) -> Result<Connection> {
        Self::from_std(StdUnixStream::connect(path)?, config)
    }

    /// Wrap stream yang sudah terhubung
    pub fn from_std(stream: StdUnixStream, config: ConnectionConfig) -> Result<Connection> {
        // Set non-blocking mode
        stream.set_nonblocking(true)?;
        apply_socket_buffers(&stream, config.socket_buffer_size);

        let inner = Inner {
            config,
            transport: Mutex::new(Transport::new(UnixStream::from_std(stream))),
            state: Mutex::new(Shared::default()),
            reply_ready: Condvar::new(),
            next_serial: AtomicU32::new(1),
            next_subscription: AtomicU64::new(1),
            subscriptions: Mutex::new(Vec::new()),
            call_handler: RwLock::new(None),
        };
        Ok(Connection {
            inner: Arc::new(inner),
        })
    }

    /// Identitas connection (stabil selama connection hidup)
    #[inline]
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            inner: Arc::downgrade(&self.inner),
        }
    }

    #[inline]
    pub fn same_as(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).closed
    }

    /// Jumlah frame di inbox yang belum di-dispatch
    pub fn pending_inbound(&self) -> usize {
        lock(&self.inner.state).inbox.len()
    }

    /// Total frame yang dibuang karena inbox melebihi `max_inbox_len`
    pub fn dropped_inbound(&self) -> u64 {
        lock(&self.inner.state).dropped
    }

    #[inline]
    fn next_serial(&self) -> u32 {
        loop {
            let serial = self.inner.next_serial.fetch_add(1, Ordering::Relaxed);
            // serial 0 tidak valid di wire
            if serial != 0 {
                return serial;
            }
        }
    }

    /// Kirim frame tanpa menunggu reply. Serial di-assign jika masih 0.
    pub fn send(&self, mut frame: Frame) -> Result<u32> {
        if frame.serial == 0 {
            frame.serial = self.next_serial();
        }
        self.send_assigned(&frame)?;
        Ok(frame.serial)
    }

    /// Emit signal
    pub fn send_signal(&self, path: &str, interface: &str, member: &str, body: Vec<Value>) -> Result<u32> {
        self.send(Frame::signal(path, interface, member, body))
    }

    /// Kirim method call tanpa meminta reply
    pub fn send_method_call(&self, call: Frame) -> Result<u32> {
        self.send(call.with_flags(NO_REPLY_EXPECTED))
    }

    fn send_assigned(&self, frame: &Frame) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Disconnected);
        }
        let bytes = frame.encode()?;
        if bytes.len() > self.inner.config.max_message_size {
            return Err(EncodeError::MessageTooLarge(bytes.len()).into());
        }
        trace!(
            conn = self.id(),
            serial = frame.serial,
            msg_type = ?frame.msg_type,
            member = frame.member.as_deref().unwrap_or(""),
            len = bytes.len(),
            "send frame"
        );

        let deadline = Instant::now() + self.inner.config.call_timeout;
        let mut transport = lock(&self.inner.transport);
        transport.queue_write(&bytes);
        loop {
            match transport.flush_write_buffer() {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => {
                    drop(transport);
                    self.mark_closed();
                    return Err(e.into());
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::CallTimeout);
            }
            // Socket penuh: lepas lock, kuras sisi baca supaya peer bisa lanjut
            drop(transport);
            self.pump()?;
            thread::sleep(self.inner.config.poll_slice);
            transport = lock(&self.inner.transport);
        }
    }

    /// Kirim method call dan blok sampai reply/error datang atau timeout.
    ///
    /// Frame ERROR dikembalikan sebagai `Error::Remote`.
    pub fn call(&self, mut call: Frame) -> Result<Frame> {
        call.flags &= !NO_REPLY_EXPECTED;
        call.serial = self.next_serial();
        let serial = call.serial;
        lock(&self.inner.state).awaiting.insert(serial);

        let result = self
            .send_assigned(&call)
            .and_then(|()| self.wait_reply(serial));
        if result.is_err() {
            let mut state = lock(&self.inner.state);
            state.awaiting.remove(&serial);
            state.replies.remove(&serial);
        }
        result
    }

    fn wait_reply(&self, serial: u32) -> Result<Frame> {
        let deadline = Instant::now() + self.inner.config.call_timeout;
        loop {
            {
                let mut state = lock(&self.inner.state);
                if let Some(reply) = state.replies.remove(&serial) {
                    return reply_result(reply);
                }
                if state.closed {
                    return Err(Error::Disconnected);
                }
            }
            if Instant::now() >= deadline {
                debug!(conn = self.id(), serial, "call timed out");
                return Err(Error::CallTimeout);
            }
            match self.pump() {
                Ok(n) if n > 0 => continue,
                Ok(_) => {}
                Err(e) => {
                    // Reply bisa saja ikut terbaca tepat sebelum EOF
                    if let Some(reply) = lock(&self.inner.state).replies.remove(&serial) {
                        return reply_result(reply);
                    }
                    return Err(e);
                }
            }
            let state = lock(&self.inner.state);
            if !state.replies.contains_key(&serial) {
                drop(self.inner.reply_ready.wait_timeout(state, self.inner.config.poll_slice));
            }
        }
    }

    /// Tunggu frame berikutnya di inbox (bukan reply yang sedang ditunggu).
    ///
    /// Frame malformed dilewati. `Ok(None)` jika timeout.
    pub fn wait_for_frame(&self, timeout: std::time::Duration) -> Result<Option<Frame>> {
        let deadline = Instant::now() + timeout;
        loop {
            while let Some(item) = self.pop_inbound() {
                match item {
                    Inbound::Frame(frame) => return Ok(Some(frame)),
                    Inbound::Malformed(e) => debug!(conn = self.id(), error = %e, "skip malformed frame"),
                }
            }
            if self.is_closed() {
                return Err(Error::Disconnected);
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            if self.pump()? == 0 {
                thread::sleep(self.inner.config.poll_slice);
            }
        }
    }

    /// Daftarkan handler signal; dipanggil oleh event loop sesuai urutan registrasi
    pub fn subscribe<F>(&self, matcher: SignalMatcher, handler: F) -> SubscriptionId
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.subscriptions).push(Subscription {
            id,
            matcher,
            handler: Arc::new(handler),
        });
        id
    }

    /// `false` jika id tidak dikenal (sudah di-unsubscribe)
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = lock(&self.inner.subscriptions);
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Pasang handler method call (menggantikan handler sebelumnya)
    pub fn set_call_handler(&self, handler: Arc<dyn CallHandler>) {
        *write(&self.inner.call_handler) = Some(handler);
    }

    pub fn clear_call_handler(&self) {
        *write(&self.inner.call_handler) = None;
    }

    /// Tutup sisi tulis dan baca; peer akan melihat EOF
    pub fn close(&self) {
        {
            let transport = lock(&self.inner.transport);
            let _ = transport.stream.shutdown(std::net::Shutdown::Both);
        }
        self.mark_closed();
    }

    fn mark_closed(&self) {
        lock(&self.inner.state).closed = true;
        self.inner.reply_ready.notify_all();
    }

    /// Baca semua data yang tersedia (non-blocking) dan route frame.
    ///
    /// Mengembalikan jumlah frame yang diterima. Error yang dikembalikan
    /// selalu fatal (EOF, I/O, stream rusak).
    pub(crate) fn pump(&self) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::Disconnected);
        }

        let mut inbound = Vec::new();
        let mut eof = false;
        let mut fatal = None;
        {
            let mut transport = lock(&self.inner.transport);
            loop {
                match transport.fill_read_buffer() {
                    Ok(0) => {
                        eof = true;
                        break;
                    }
                    Ok(_) => {}
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        fatal = Some(Error::Io(e));
                        break;
                    }
                }
            }

            let mut reader = FrameReader::with_limit(transport.readable(), self.inner.config.max_message_size);
            while let Some(result) = reader.next() {
                match result {
                    Ok(frame) => inbound.push(Inbound::Frame(frame)),
                    Err(e @ DecodeError::CorruptStream(_)) => {
                        fatal.get_or_insert(Error::Decode(e));
                        break;
                    }
                    Err(e) => inbound.push(Inbound::Malformed(e)),
                }
            }
            let consumed = reader.consumed();
            transport.consume(consumed);
        }

        let count = inbound.len();
        let limit = self.inner.config.max_inbox_len;
        let mut overflow = 0usize;
        {
            let mut state = lock(&self.inner.state);
            for item in inbound {
                match item {
                    Inbound::Frame(frame) => {
                        trace!(
                            conn = self.id(),
                            serial = frame.serial,
                            msg_type = ?frame.msg_type,
                            member = frame.member.as_deref().unwrap_or(""),
                            "recv frame"
                        );
                        match awaited_serial(&frame) {
                            Some(serial) if state.awaiting.remove(&serial) => {
                                state.replies.insert(serial, frame);
                            }
                            _ => {
                                if !state.enqueue(Inbound::Frame(frame), limit) {
                                    overflow += 1;
                                }
                            }
                        }
                    }
                    malformed => {
                        if !state.enqueue(malformed, limit) {
                            overflow += 1;
                        }
                    }
                }
            }
            if eof || fatal.is_some() {
                state.closed = true;
            }
        }
        self.inner.reply_ready.notify_all();
        if overflow > 0 {
            warn!(
                conn = self.id(),
                dropped = overflow,
                limit,
                "inbox full, oldest frames dropped (is an event loop attached?)"
            );
        }

        match fatal {
            Some(e) => Err(e),
            None if eof => {
                debug!(conn = self.id(), "peer closed connection");
                Err(Error::Disconnected)
            }
            None => Ok(count),
        }
    }

    pub(crate) fn pop_inbound(&self) -> Option<Inbound> {
        lock(&self.inner.state).inbox.pop_front()
    }

    /// Panggil semua handler yang cocok, sesuai urutan registrasi
    pub(crate) fn dispatch_signal(&self, frame: &Frame) -> usize {
        // Handler di-clone keluar dari lock supaya boleh subscribe/unsubscribe
        let handlers: Vec<SignalHandler> = lock(&self.inner.subscriptions)
            .iter()
            .filter(|s| s.matcher.matches(frame))
            .map(|s| s.handler.clone())
            .collect();
        for handler in &handlers {
            handler(frame);
        }
        handlers.len()
    }

    /// Jalankan call handler dan kirim reply (kecuali NO_REPLY_EXPECTED)
    pub(crate) fn dispatch_call(&self, call: &Frame) -> Result<()> {
        let handler = read(&self.inner.call_handler).clone();
        let outcome = match handler {
            Some(handler) => handler.handle_call(self, call),
            None => Err(MethodError::unknown_method(
                call.interface.as_deref().unwrap_or(""),
                call.member.as_deref().unwrap_or(""),
            )),
        };
        if !call.expects_reply() {
            return Ok(());
        }
        let reply = match outcome {
            Ok(body) => Frame::method_return(call, body),
            Err(err) => {
                debug!(conn = self.id(), serial = call.serial, error = %err, "method call failed");
                Frame::error(call, &err)
            }
        };
        match self.send(reply) {
            Ok(_) => Ok(()),
            // Caller tetap dapat jawaban walau body reply tidak bisa di-encode
            Err(Error::Encode(e)) => {
                warn!(conn = self.id(), serial = call.serial, error = %e, "reply body cannot be encoded");
                let err = MethodError::failed(format!("reply cannot be encoded: {}", e));
                self.send(Frame::error(call, &err)).map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) fn register(&self, registry: &Registry, token: Token) -> io::Result<()> {
        let mut transport = lock(&self.inner.transport);
        registry.register(&mut transport.stream, token, Interest::READABLE)
    }

    pub(crate) fn deregister(&self, registry: &Registry) -> io::Result<()> {
        let mut transport = lock(&self.inner.transport);
        registry.deregister(&mut transport.stream)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[inline]
fn awaited_serial(frame: &Frame) -> Option<u32> {
    match frame.msg_type {
        MessageType::MethodReturn | MessageType::Error => frame.reply_serial,
        _ => None,
    }
}

fn reply_result(reply: Frame) -> Result<Frame> {
    match reply.to_method_error() {
        Some(err) => Err(Error::Remote(err)),
        None => Ok(reply),
    }
}

/// Set SO_SNDBUF/SO_RCVBUF; gagal diabaikan (hanya tuning)
fn apply_socket_buffers(stream: &StdUnixStream, size: usize) {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();
    let optval: libc::c_int = size.min(libc::c_int::MAX as usize) as libc::c_int;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn quick() -> ConnectionConfig {
        ConnectionConfig::default().with_call_timeout(Duration::from_millis(300))
    }

    #[test]
    fn test_signal_reaches_peer_inbox() {
        let (a, b) = Connection::pair().unwrap();
        a.send_signal("/obj", "org.example.I", "Ping", vec![Value::Str("hi".into())])
            .unwrap();

        let frame = b.wait_for_frame(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(frame.msg_type, MessageType::Signal);
        assert_eq!(frame.member.as_deref(), Some("Ping"));
        assert_eq!(frame.body, vec![Value::Str("hi".into())]);
    }

    #[test]
    fn test_serials_are_unique_and_nonzero() {
        let (a, _b) = Connection::pair().unwrap();
        let s1 = a.send_signal("/", "org.example.I", "A", vec![]).unwrap();
        let s2 = a.send_signal("/", "org.example.I", "B", vec![]).unwrap();
        assert_ne!(s1, 0);
        assert_ne!(s1, s2);
    }

    #[test]
    fn test_call_times_out_without_server() {
        let (a, _b) = Connection::pair_with_config(quick()).unwrap();
        let call = Frame::method_call("/", "org.example.I", "M", vec![]);
        assert!(matches!(a.call(call), Err(Error::CallTimeout)));
    }

    #[test]
    fn test_call_reply_and_remote_error() {
        let (client, server) = Connection::pair_with_config(quick()).unwrap();
        let worker = thread::spawn(move || {
            for _ in 0..2 {
                let call = server.wait_for_frame(Duration::from_secs(2)).unwrap().unwrap();
                let reply = match call.member.as_deref() {
                    Some("Echo") => Frame::method_return(&call, call.body.clone()),
                    _ => Frame::error(&call, &MethodError::failed("nope")),
                };
                server.send(reply).unwrap();
            }
        });

        let reply = client
            .call(Frame::method_call("/", "org.example.I", "Echo", vec![Value::UInt32(7)]))
            .unwrap();
        assert_eq!(reply.body, vec![Value::UInt32(7)]);

        let err = client
            .call(Frame::method_call("/", "org.example.I", "Other", vec![]))
            .unwrap_err();
        let remote = err.remote().unwrap();
        assert_eq!(remote.message, "nope");
        worker.join().unwrap();
    }

    #[test]
    fn test_peer_close_is_disconnected() {
        let (a, b) = Connection::pair_with_config(quick()).unwrap();
        drop(b);
        assert!(matches!(a.pump(), Err(Error::Disconnected)));
        assert!(a.is_closed());
        assert!(matches!(
            a.send_signal("/", "org.example.I", "S", vec![]),
            Err(Error::Disconnected)
        ));
    }

    #[test]
    fn test_subscription_matching_and_unsubscribe() {
        let (a, _b) = Connection::pair().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = a.subscribe(
            SignalMatcher::new().interface("org.example.I").arg0("x"),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        let mut matching = Frame::signal("/p", "org.example.I", "S", vec![Value::Str("x".into())]);
        matching.serial = 1;
        let mut other = Frame::signal("/p", "org.example.I", "S", vec![Value::Str("y".into())]);
        other.serial = 2;

        assert_eq!(a.dispatch_signal(&matching), 1);
        assert_eq!(a.dispatch_signal(&other), 0);
        assert!(a.unsubscribe(id));
        assert!(!a.unsubscribe(id));
        assert_eq!(a.dispatch_signal(&matching), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_malformed_frame_goes_to_inbox() {
        let (a, b) = Connection::pair().unwrap();
        let mut bad = Frame::signal("/", "org.example.I", "S", vec![]).encode().unwrap();
        bad[8..12].copy_from_slice(&0u32.to_le_bytes()); // serial 0
        {
            let mut transport = lock(&a.inner.transport);
            transport.queue_write(&bad);
            assert!(transport.flush_write_buffer().unwrap());
        }
        a.send_signal("/", "org.example.I", "Good", vec![]).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut seen = Vec::new();
        while seen.len() < 2 && Instant::now() < deadline {
            b.pump().unwrap();
            while let Some(item) = b.pop_inbound() {
                seen.push(item);
            }
        }
        assert!(matches!(seen[0], Inbound::Malformed(DecodeError::InvalidHeader("serial"))));
        assert!(matches!(&seen[1], Inbound::Frame(f) if f.member.as_deref() == Some("Good")));
    }

    #[test]
    fn test_inbox_is_bounded_without_event_loop() {
        let (a, b) = Connection::pair_with_config(ConnectionConfig::default().with_max_inbox_len(4)).unwrap();
        for i in 0..10u32 {
            a.send_signal("/obj", "org.example.I", "Tick", vec![Value::UInt32(i)]).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        while (b.pending_inbound() as u64 + b.dropped_inbound()) < 10 && Instant::now() < deadline {
            b.pump().unwrap();
        }
        assert_eq!(b.pending_inbound(), 4);
        assert_eq!(b.dropped_inbound(), 6);

        // Yang tersisa adalah yang terbaru, urutan tetap
        let mut ticks = Vec::new();
        while let Some(Inbound::Frame(frame)) = b.pop_inbound() {
            ticks.push(frame.body[0].as_u32().unwrap());
        }
        assert_eq!(ticks, vec![6, 7, 8, 9]);
    }

    #[test]
    fn test_unencodable_frame_fails_locally() {
        let (a, _b) = Connection::pair_with_config(quick()).unwrap();
        assert!(matches!(
            a.send_signal("/obj", "org.example.I", "S", vec![Value::Str("a\0b".into())]),
            Err(Error::Encode(EncodeError::InteriorNul))
        ));

        let started = Instant::now();
        let call = Frame::method_call(
            "/obj",
            "org.example.I",
            "M",
            vec![Value::variant(Value::Struct(vec![Value::Int32(1); 300]))],
        );
        assert!(matches!(a.call(call), Err(Error::Encode(EncodeError::InvalidSignature(_)))));
        assert!(started.elapsed() < Duration::from_millis(300));
        assert!(lock(&a.inner.state).awaiting.is_empty());
    }

    struct BadReply;

    impl CallHandler for BadReply {
        fn handle_call(&self, _conn: &Connection, _call: &Frame) -> std::result::Result<Vec<Value>, MethodError> {
            Ok(vec![Value::Str("a\0b".into())])
        }
    }

    #[test]
    fn test_unencodable_reply_becomes_error_reply() {
        let (client, server) = Connection::pair_with_config(quick()).unwrap();
        server.set_call_handler(Arc::new(BadReply));
        let worker = thread::spawn(move || {
            let call = server.wait_for_frame(Duration::from_secs(2)).unwrap().unwrap();
            server.dispatch_call(&call).unwrap();
        });

        let err = client
            .call(Frame::method_call("/obj", "org.example.I", "M", vec![]))
            .unwrap_err();
        let remote = err.remote().unwrap();
        assert_eq!(remote.kind(), crate::error::MethodErrorKind::Failed);
        assert!(remote.message.contains("interior NUL"));
        worker.join().unwrap();
    }
}
