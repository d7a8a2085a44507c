//! Frame format (method call, reply, error, signal)
//!
//! Layout:
//! ┌─────────────────────────────────────────────────────┐
//! │ Fixed header (12 bytes)                             │
//! │   endian | type | flags | version | body_len | serial│
//! ├─────────────────────────────────────────────────────┤
//! │ Header fields a(yv), padding ke 8                   │
//! ├─────────────────────────────────────────────────────┤
//! │ Body (signature dari header field SIGNATURE)        │
//! └─────────────────────────────────────────────────────┘
//!
//! Panjang total frame bisa dihitung dari 16 byte pertama, jadi stream
//! decoder tahu kapan frame sudah lengkap tanpa parsing isi.

use crate::error::{DecodeError, EncodeError, MethodError};
use crate::protocol::encoder::{Decoder, Encoder, Endian};
use crate::protocol::signature::Signature;
use crate::protocol::value::Value;

/// Fixed header + panjang array header fields
pub const HEADER_SIZE: usize = 16;
pub const PROTOCOL_VERSION: u8 = 1;
/// Ukuran frame maksimum (128 MiB)
pub const MAX_MESSAGE_SIZE: usize = 128 * 1024 * 1024;

/// Flag: pengirim tidak menunggu reply
pub const NO_REPLY_EXPECTED: u8 = 0x1;

const FIELD_PATH: u8 = 1;
const FIELD_INTERFACE: u8 = 2;
const FIELD_MEMBER: u8 = 3;
const FIELD_ERROR_NAME: u8 = 4;
const FIELD_REPLY_SERIAL: u8 = 5;
const FIELD_DESTINATION: u8 = 6;
const FIELD_SENDER: u8 = 7;
const FIELD_SIGNATURE: u8 = 8;

/// Tipe frame
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    MethodCall = 1,
    MethodReturn = 2,
    Error = 3,
    Signal = 4,
}

impl MessageType {
    #[inline(always)]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::MethodCall),
            2 => Some(Self::MethodReturn),
            3 => Some(Self::Error),
            4 => Some(Self::Signal),
            _ => None,
        }
    }
}

/// Satu frame lengkap dengan body ter-decode
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub msg_type: MessageType,
    pub flags: u8,
    /// 0 = belum di-assign (diisi connection saat kirim)
    pub serial: u32,
    pub path: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
    pub error_name: Option<String>,
    pub reply_serial: Option<u32>,
    pub destination: Option<String>,
    pub sender: Option<String>,
    pub body: Vec<Value>,
}

impl Frame {
    fn empty(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            flags: 0,
            serial: 0,
            path: None,
            interface: None,
            member: None,
            error_name: None,
            reply_serial: None,
            destination: None,
            sender: None,
            body: Vec::new(),
        }
    }

    pub fn method_call(path: &str, interface: &str, member: &str, body: Vec<Value>) -> Self {
        Self {
            path: Some(path.to_string()),
            interface: Some(interface.to_string()),
            member: Some(member.to_string()),
            body,
            ..Self::empty(MessageType::MethodCall)
        }
    }

    pub fn signal(path: &str, interface: &str, member: &str, body: Vec<Value>) -> Self {
        Self {
            path: Some(path.to_string()),
            interface: Some(interface.to_string()),
            member: Some(member.to_string()),
            body,
            ..Self::empty(MessageType::Signal)
        }
    }

    /// Reply sukses untuk `call`
    pub fn method_return(call: &Frame, body: Vec<Value>) -> Self {
        Self {
            reply_serial: Some(call.serial),
            destination: call.sender.clone(),
            body,
            ..Self::empty(MessageType::MethodReturn)
        }
    }

    /// Reply error untuk `call`; pesan dibawa sebagai argumen string pertama
    pub fn error(call: &Frame, error: &MethodError) -> Self {
        Self {
            reply_serial: Some(call.serial),
            destination: call.sender.clone(),
            error_name: Some(error.name.clone()),
            body: vec![Value::Str(error.message.clone())],
            ..Self::empty(MessageType::Error)
        }
    }

    pub fn with_destination(mut self, destination: Option<&str>) -> Self {
        self.destination = destination.map(str::to_string);
        self
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags |= flags;
        self
    }

    #[inline]
    pub fn expects_reply(&self) -> bool {
        self.msg_type == MessageType::MethodCall && self.flags & NO_REPLY_EXPECTED == 0
    }

    /// Signature body sebagai string
    pub fn signature(&self) -> String {
        self.body.iter().map(|v| v.signature().to_string()).collect()
    }

    /// Frame ERROR sebagai `MethodError`
    pub fn to_method_error(&self) -> Option<MethodError> {
        if self.msg_type != MessageType::Error {
            return None;
        }
        Some(MethodError {
            name: self.error_name.clone().unwrap_or_default(),
            message: self
                .body
                .first()
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    /// Encode frame lengkap (little-endian).
    ///
    /// Value yang tidak valid di wire ditolak di sini, sebelum dikirim.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut fields = Vec::new();
        let mut field = |code: u8, value: Value| {
            fields.push(Value::Struct(vec![Value::Byte(code), Value::variant(value)]));
        };
        if let Some(path) = &self.path {
            field(FIELD_PATH, Value::ObjectPath(path.clone()));
        }
        if let Some(interface) = &self.interface {
            field(FIELD_INTERFACE, Value::Str(interface.clone()));
        }
        if let Some(member) = &self.member {
            field(FIELD_MEMBER, Value::Str(member.clone()));
        }
        if let Some(name) = &self.error_name {
            field(FIELD_ERROR_NAME, Value::Str(name.clone()));
        }
        if let Some(serial) = self.reply_serial {
            field(FIELD_REPLY_SERIAL, Value::UInt32(serial));
        }
        if let Some(destination) = &self.destination {
            field(FIELD_DESTINATION, Value::Str(destination.clone()));
        }
        if let Some(sender) = &self.sender {
            field(FIELD_SENDER, Value::Str(sender.clone()));
        }
        if !self.body.is_empty() {
            field(FIELD_SIGNATURE, Value::TypeSig(self.signature()));
        }

        let mut encoder = Encoder::with_capacity(128);
        encoder.write_u8(Endian::Little.marker());
        encoder.write_u8(self.msg_type as u8);
        encoder.write_u8(self.flags);
        encoder.write_u8(PROTOCOL_VERSION);
        encoder.write_u32(0); // body length, di-patch setelah body ditulis
        encoder.write_u32(self.serial);
        encoder.encode(&Value::Array {
            elem: field_signature(),
            items: fields,
        })?;
        encoder.pad_to(8);

        let body_start = encoder.len();
        for value in &self.body {
            encoder.encode(value)?;
        }
        if encoder.len() > MAX_MESSAGE_SIZE {
            return Err(EncodeError::MessageTooLarge(encoder.len()));
        }
        let body_len = encoder.len() - body_start;
        encoder.patch_u32(4, body_len as u32);
        Ok(encoder.into_bytes())
    }

    /// Header field wajib per tipe frame
    fn check_required(&self) -> Result<(), DecodeError> {
        let missing = match self.msg_type {
            MessageType::MethodCall if self.path.is_none() => Some("PATH"),
            MessageType::MethodCall if self.member.is_none() => Some("MEMBER"),
            MessageType::Signal if self.path.is_none() => Some("PATH"),
            MessageType::Signal if self.interface.is_none() => Some("INTERFACE"),
            MessageType::Signal if self.member.is_none() => Some("MEMBER"),
            MessageType::Error if self.error_name.is_none() => Some("ERROR_NAME"),
            MessageType::Error | MessageType::MethodReturn if self.reply_serial.is_none() => {
                Some("REPLY_SERIAL")
            }
            _ => None,
        };
        match missing {
            Some(name) => Err(DecodeError::MissingField(name)),
            None => Ok(()),
        }
    }
}

fn field_signature() -> Signature {
    Signature::Struct(vec![Signature::Byte, Signature::Variant])
}

/// Hitung panjang frame dari fixed header.
///
/// `Ok(None)` jika header belum lengkap. Error di sini fatal untuk stream
/// karena batas frame berikutnya tidak bisa diketahui.
pub fn frame_len(buf: &[u8]) -> Result<Option<usize>, DecodeError> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }
    let endian = Endian::from_marker(buf[0]).ok_or(DecodeError::CorruptStream("endianness"))?;
    if buf[3] != PROTOCOL_VERSION {
        return Err(DecodeError::CorruptStream("protocol version"));
    }
    let mut decoder = Decoder::at(buf, 4, endian);
    let body_len = decoder.read_u32()? as usize;
    let _serial = decoder.read_u32()?;
    let fields_len = decoder.read_u32()? as usize;

    let header_end = (HEADER_SIZE + fields_len + 7) & !7;
    let total = header_end + body_len;
    if fields_len > MAX_MESSAGE_SIZE || total > MAX_MESSAGE_SIZE {
        return Err(DecodeError::CorruptStream("message too large"));
    }
    Ok(Some(total))
}

/// Decode satu frame lengkap; `buf` harus tepat sepanjang `frame_len`
pub fn decode_frame(buf: &[u8]) -> Result<Frame, DecodeError> {
    if buf.len() < HEADER_SIZE {
        return Err(DecodeError::UnexpectedEof("header"));
    }
    let endian = Endian::from_marker(buf[0]).ok_or(DecodeError::InvalidHeader("endianness"))?;
    let msg_type = MessageType::from_u8(buf[1]).ok_or(DecodeError::UnknownMessageType(buf[1]))?;
    let mut frame = Frame::empty(msg_type);
    frame.flags = buf[2];

    let mut decoder = Decoder::at(buf, 4, endian);
    let body_len = decoder.read_u32()? as usize;
    frame.serial = decoder.read_u32()?;
    if frame.serial == 0 {
        return Err(DecodeError::InvalidHeader("serial"));
    }

    let fields = match decoder.decode(&Signature::Array(Box::new(field_signature())))? {
        Value::Array { items, .. } => items,
        _ => return Err(DecodeError::InvalidHeader("header fields")),
    };
    let mut signature = String::new();
    for field in fields {
        let (code, value) = match field {
            Value::Struct(mut pair) if pair.len() == 2 => {
                let value = pair.pop().map(Value::into_variant_inner);
                match (pair.pop(), value) {
                    (Some(Value::Byte(code)), Some(value)) => (code, value),
                    _ => return Err(DecodeError::InvalidHeader("header fields")),
                }
            }
            _ => return Err(DecodeError::InvalidHeader("header fields")),
        };
        match (code, value) {
            (FIELD_PATH, Value::ObjectPath(v)) => frame.path = Some(v),
            (FIELD_INTERFACE, Value::Str(v)) => frame.interface = Some(v),
            (FIELD_MEMBER, Value::Str(v)) => frame.member = Some(v),
            (FIELD_ERROR_NAME, Value::Str(v)) => frame.error_name = Some(v),
            (FIELD_REPLY_SERIAL, Value::UInt32(v)) => frame.reply_serial = Some(v),
            (FIELD_DESTINATION, Value::Str(v)) => frame.destination = Some(v),
            (FIELD_SENDER, Value::Str(v)) => frame.sender = Some(v),
            (FIELD_SIGNATURE, Value::TypeSig(v)) => signature = v,
            (FIELD_PATH..=FIELD_SIGNATURE, _) => return Err(DecodeError::InvalidField(code)),
            // field yang tidak dikenal diabaikan
            _ => {}
        }
    }
    frame.check_required()?;

    decoder.align(8)?;
    let body_end = decoder.position() + body_len;
    if body_end != buf.len() {
        return Err(DecodeError::InvalidHeader("body length"));
    }
    for sig in Signature::parse_list(&signature)? {
        frame.body.push(decoder.decode(&sig)?);
    }
    match decoder.remaining() {
        0 => Ok(frame),
        n => Err(DecodeError::TrailingBytes(n)),
    }
}

/// Stream decoder atas buffer baca connection
///
/// - `None`: butuh bytes tambahan
/// - `Some(Err(e))` dengan `e` fatal: stream rusak, posisi tidak maju
/// - `Some(Err(e))` lainnya: frame malformed dilewati, posisi maju
pub struct FrameReader<'a> {
    buffer: &'a [u8],
    read_pos: usize,
    limit: usize,
}

impl<'a> FrameReader<'a> {
    #[inline(always)]
    pub fn new(buffer: &'a [u8]) -> Self {
        Self::with_limit(buffer, MAX_MESSAGE_SIZE)
    }

    /// Reader dengan batas ukuran frame yang lebih ketat
    #[inline(always)]
    pub fn with_limit(buffer: &'a [u8], limit: usize) -> Self {
        Self {
            buffer,
            read_pos: 0,
            limit: limit.min(MAX_MESSAGE_SIZE),
        }
    }

    /// Bytes yang sudah dikonsumsi
    #[inline(always)]
    pub fn consumed(&self) -> usize {
        self.read_pos
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Result<Frame, DecodeError>> {
        let rest = &self.buffer[self.read_pos..];
        let total = match frame_len(rest) {
            Ok(Some(total)) if total > self.limit => {
                return Some(Err(DecodeError::CorruptStream("message too large")))
            }
            Ok(Some(total)) if total <= rest.len() => total,
            Ok(_) => return None,
            Err(e) => return Some(Err(e)),
        };
        self.read_pos += total;
        Some(decode_frame(&rest[..total]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_call() -> Frame {
        let mut frame = Frame::method_call(
            "/org/example/Obj",
            "org.freedesktop.DBus.Properties",
            "Get",
            vec![Value::Str("org.example.Iface".into()), Value::Str("Name".into())],
        );
        frame.serial = 7;
        frame
    }

    #[test]
    fn test_header_size_and_padding() {
        let bytes = sample_call().encode().unwrap();
        assert_eq!(bytes[0], b'l');
        assert_eq!(bytes[1], MessageType::MethodCall as u8);
        assert_eq!(bytes[3], PROTOCOL_VERSION);
        assert_eq!(frame_len(&bytes).unwrap(), Some(bytes.len()));
        assert_eq!(frame_len(&bytes[..HEADER_SIZE - 1]).unwrap(), None);
    }

    #[test]
    fn test_frame_roundtrip() {
        let frame = sample_call();
        let decoded = decode_frame(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.signature(), "ss");
    }

    #[test]
    fn test_error_frame() {
        let call = sample_call();
        let err = MethodError {
            name: "org.freedesktop.DBus.Error.Failed".into(),
            message: "Something failed".into(),
        };
        let mut reply = Frame::error(&call, &err);
        reply.serial = 8;
        let decoded = decode_frame(&reply.encode().unwrap()).unwrap();
        assert_eq!(decoded.reply_serial, Some(7));
        assert_eq!(decoded.to_method_error(), Some(err));
    }

    #[test]
    fn test_reader_handles_partial_and_multiple_frames() {
        let mut first = sample_call();
        first.serial = 1;
        let mut second = Frame::signal("/a", "org.example.I", "Changed", vec![]);
        second.serial = 2;

        let mut stream = first.encode().unwrap();
        stream.extend_from_slice(&second.encode().unwrap());

        let mut reader = FrameReader::new(&stream[..stream.len() - 1]);
        assert_eq!(reader.next().unwrap().unwrap(), first);
        assert!(reader.next().is_none());

        let mut reader = FrameReader::new(&stream);
        assert_eq!(reader.next().unwrap().unwrap(), first);
        assert_eq!(reader.next().unwrap().unwrap(), second);
        assert!(reader.next().is_none());
        assert_eq!(reader.consumed(), stream.len());
    }

    #[test]
    fn test_malformed_frame_is_skipped() {
        let mut bad = Frame::method_call("/a", "org.example.I", "M", vec![]);
        bad.serial = 1;
        let mut bytes = bad.encode().unwrap();
        bytes[1] = 9; // tipe tidak dikenal

        let mut good = Frame::signal("/a", "org.example.I", "S", vec![]);
        good.serial = 2;
        bytes.extend_from_slice(&good.encode().unwrap());

        let mut reader = FrameReader::new(&bytes);
        assert_eq!(reader.next().unwrap(), Err(DecodeError::UnknownMessageType(9)));
        assert_eq!(reader.next().unwrap().unwrap(), good);
    }

    #[test]
    fn test_corrupt_header_is_fatal() {
        let mut bytes = sample_call().encode().unwrap();
        bytes[0] = b'x';
        let mut reader = FrameReader::new(&bytes);
        assert_eq!(reader.next().unwrap(), Err(DecodeError::CorruptStream("endianness")));
        assert_eq!(reader.consumed(), 0);
    }

    #[test]
    fn test_reader_limit_is_fatal() {
        let bytes = sample_call().encode().unwrap();
        let mut reader = FrameReader::with_limit(&bytes, 32);
        assert_eq!(
            reader.next().unwrap(),
            Err(DecodeError::CorruptStream("message too large"))
        );
        assert_eq!(reader.consumed(), 0);
    }

    #[test]
    fn test_short_buffer_is_eof() {
        for len in 0..HEADER_SIZE {
            let bytes = vec![b'l'; len];
            assert_eq!(decode_frame(&bytes), Err(DecodeError::UnexpectedEof("header")));
        }
    }

    #[test]
    fn test_encode_rejects_unencodable_body() {
        let mut frame = sample_call();
        frame.body.push(Value::Str("a\0b".into()));
        assert_eq!(frame.encode(), Err(EncodeError::InteriorNul));

        let mut frame = sample_call();
        frame.path = Some("no/slash".into());
        assert!(matches!(frame.encode(), Err(EncodeError::InvalidObjectPath(_))));
    }

    #[test]
    fn test_missing_required_field() {
        let mut frame = Frame::signal("/a", "org.example.I", "S", vec![]);
        frame.serial = 3;
        frame.interface = None;
        assert_eq!(
            decode_frame(&frame.encode().unwrap()),
            Err(DecodeError::MissingField("INTERFACE"))
        );
    }

    #[test]
    fn test_big_endian_frame() {
        // Signal "/" org.a.B / C, tanpa body, big-endian
        let mut enc = Vec::new();
        enc.extend_from_slice(&[b'B', 4, 0, 1]);
        enc.extend_from_slice(&0u32.to_be_bytes());
        enc.extend_from_slice(&5u32.to_be_bytes());
        let mut fields = Vec::new();
        // (y v<o>) PATH "/"
        fields.extend_from_slice(&[FIELD_PATH, 1, b'o', 0]);
        fields.extend_from_slice(&1u32.to_be_bytes());
        fields.extend_from_slice(&[b'/', 0]);
        fields.extend_from_slice(&[0; 6]);
        // INTERFACE "org.a.B"
        fields.extend_from_slice(&[FIELD_INTERFACE, 1, b's', 0]);
        fields.extend_from_slice(&7u32.to_be_bytes());
        fields.extend_from_slice(b"org.a.B\0");
        // MEMBER "C"
        fields.extend_from_slice(&[FIELD_MEMBER, 1, b's', 0]);
        fields.extend_from_slice(&1u32.to_be_bytes());
        fields.extend_from_slice(b"C\0");
        enc.extend_from_slice(&(fields.len() as u32).to_be_bytes());
        enc.extend_from_slice(&fields);
        while enc.len() % 8 != 0 {
            enc.push(0);
        }

        let frame = decode_frame(&enc).unwrap();
        assert_eq!(frame.msg_type, MessageType::Signal);
        assert_eq!(frame.serial, 5);
        assert_eq!(frame.path.as_deref(), Some("/"));
        assert_eq!(frame.interface.as_deref(), Some("org.a.B"));
        assert_eq!(frame.member.as_deref(), Some("C"));
    }
}
