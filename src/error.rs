//! Error taxonomy
//!
//! Semua error lokal (signature, type, decode) selalu dikembalikan ke caller,
//! tidak pernah di-coerce diam-diam. Error registry dipetakan 1:1 ke nama error
//! wire oleh dispatcher `properties::server`.

use std::io;

use thiserror::Error;

use crate::properties::error_names;

/// Signature string tidak valid
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature is empty")]
    Empty,
    #[error("unknown type code '{0}'")]
    UnknownCode(char),
    #[error("unbalanced container: missing '{0}'")]
    Unbalanced(char),
    #[error("unexpected '{0}' outside of a container")]
    UnexpectedClose(char),
    #[error("struct must have at least one field")]
    EmptyStruct,
    #[error("dict key must be a basic type, got '{0}'")]
    NonBasicDictKey(String),
    #[error("dict entry must have exactly one key and one value")]
    DictArity,
    #[error("dict entry is only allowed as an array element")]
    BareDictEntry,
    #[error("array is missing its element type")]
    MissingElement,
    #[error("nesting depth exceeds {0}")]
    TooDeep(usize),
    #[error("signature is longer than {0} bytes")]
    TooLong(usize),
    #[error("expected a single complete type, found trailing '{0}'")]
    Trailing(String),
}

/// Value tidak sesuai dengan signature
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("type mismatch: expected '{expected}', {found}")]
pub struct TypeMismatchError {
    pub expected: String,
    pub found: String,
}

impl TypeMismatchError {
    pub fn new(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// Wire bytes tidak bisa di-decode
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of input while reading {0}")]
    UnexpectedEof(&'static str),
    #[error("string does not contain valid UTF-8")]
    InvalidUtf8,
    #[error("string is not NUL terminated")]
    MissingNul,
    #[error("string contains an interior NUL byte")]
    InteriorNul,
    #[error("non-zero padding byte at offset {0}")]
    NonZeroPadding(usize),
    #[error("boolean value was {0}, expected 0 or 1")]
    InvalidBool(u32),
    #[error("nesting depth exceeds {0}")]
    TooDeep(usize),
    #[error("array length {0} exceeds limit")]
    ArrayTooLong(usize),
    #[error("array contents do not match declared length")]
    ArrayLengthMismatch,
    #[error("invalid object path '{0}'")]
    InvalidObjectPath(String),
    #[error("invalid signature on the wire: {0}")]
    InvalidSignature(#[from] SignatureError),
    #[error("duplicate dict key")]
    DuplicateKey,
    #[error("invalid frame header: {0}")]
    InvalidHeader(&'static str),
    #[error("corrupt stream: {0}")]
    CorruptStream(&'static str),
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("header field {0} has the wrong type")]
    InvalidField(u8),
    #[error("frame is missing required header field {0}")]
    MissingField(&'static str),
    #[error("{0} trailing bytes after body")]
    TrailingBytes(usize),
}

/// Value yang akan menghasilkan bytes yang ditolak decoder
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("string contains an interior NUL byte")]
    InteriorNul,
    #[error("invalid object path '{0}'")]
    InvalidObjectPath(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),
    #[error("nesting depth exceeds {0}")]
    TooDeep(usize),
    #[error("array length {0} exceeds limit")]
    ArrayTooLong(usize),
    #[error("container element has signature '{found}', expected '{expected}'")]
    ElementMismatch { expected: String, found: String },
    #[error("duplicate dict key")]
    DuplicateKey,
    #[error("frame of {0} bytes exceeds the message size limit")]
    MessageTooLarge(usize),
}

/// Error dari Property Registry (server side)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyError {
    #[error("no such interface '{interface}'")]
    UnknownInterface { interface: String, property: String },
    #[error("property '{interface}.{property}' not found")]
    UnknownProperty { interface: String, property: String },
    #[error("property '{interface}.{property}' is not readable")]
    NotReadable { interface: String, property: String },
    #[error("property '{interface}.{property}' is not writable")]
    NotWritable { interface: String, property: String },
    #[error("property '{interface}.{property}' is already registered")]
    DuplicateProperty { interface: String, property: String },
    #[error("property '{interface}.{property}': {source}")]
    TypeMismatch {
        interface: String,
        property: String,
        #[source]
        source: TypeMismatchError,
    },
    #[error("{0}")]
    AccessorFailed(#[from] AccessorError),
}

/// Kegagalan yang di-raise oleh getter/setter user
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct AccessorError(pub String);

impl AccessorError {
    pub fn new(description: impl Into<String>) -> Self {
        Self(description.into())
    }
}

/// Error wire (nama + pesan) yang dikirim/diterima lewat frame ERROR
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct MethodError {
    pub name: String,
    pub message: String,
}

/// Klasifikasi nama error wire yang dikenal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodErrorKind {
    UnknownProperty,
    NotReadable,
    NotWritable,
    InvalidArgs,
    UnknownMethod,
    UnknownObject,
    Failed,
    Other,
}

impl MethodError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Kegagalan generik, pesan diteruskan apa adanya
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(error_names::FAILED, message)
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(error_names::INVALID_ARGS, message)
    }

    pub fn unknown_method(interface: &str, member: &str) -> Self {
        Self::new(
            error_names::UNKNOWN_METHOD,
            format!("Unknown method '{}' on interface '{}'", member, interface),
        )
    }

    pub fn unknown_object(path: &str) -> Self {
        Self::new(
            error_names::UNKNOWN_OBJECT,
            format!("Object '{}' not found", path),
        )
    }

    /// Klasifikasi berdasarkan nama error wire
    pub fn kind(&self) -> MethodErrorKind {
        match self.name.as_str() {
            error_names::UNKNOWN_PROPERTY => MethodErrorKind::UnknownProperty,
            error_names::NOT_READABLE => MethodErrorKind::NotReadable,
            error_names::NOT_WRITABLE => MethodErrorKind::NotWritable,
            error_names::INVALID_ARGS => MethodErrorKind::InvalidArgs,
            error_names::UNKNOWN_METHOD => MethodErrorKind::UnknownMethod,
            error_names::UNKNOWN_OBJECT => MethodErrorKind::UnknownObject,
            error_names::FAILED => MethodErrorKind::Failed,
            _ => MethodErrorKind::Other,
        }
    }
}

/// Top-level error crate
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatchError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Property(#[from] PropertyError),
    #[error(transparent)]
    Remote(#[from] MethodError),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("event loop deadline elapsed")]
    LoopTimeout,
    #[error("no reply within the call timeout")]
    CallTimeout,
    #[error("connection closed by peer")]
    Disconnected,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Error wire yang diterima dari peer, jika ada
    pub fn remote(&self) -> Option<&MethodError> {
        match self {
            Error::Remote(e) => Some(e),
            _ => None,
        }
    }

    /// Error transport yang membuat connection tidak bisa dipakai lagi
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Disconnected | Error::Io(_))
            || matches!(self, Error::Decode(DecodeError::CorruptStream(_)))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessor_failure_text_is_forwarded() {
        let err = PropertyError::from(AccessorError::new("Something failed"));
        assert_eq!(err.to_string(), "Something failed");
    }

    #[test]
    fn test_method_error_display() {
        let err = MethodError {
            name: "org.example.Error".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(Error::from(err).to_string(), "org.example.Error: boom");
    }

    #[test]
    fn test_method_error_kind() {
        assert_eq!(MethodError::failed("x").kind(), MethodErrorKind::Failed);
        assert_eq!(
            MethodError::unknown_object("/nope").kind(),
            MethodErrorKind::UnknownObject
        );
        assert_eq!(
            MethodError::new("org.example.Custom", "x").kind(),
            MethodErrorKind::Other
        );
        let err = MethodError::unknown_method("org.example.I", "Frob");
        assert!(err.message.contains("Frob"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Disconnected.is_fatal());
        assert!(Error::Decode(DecodeError::CorruptStream("endianness")).is_fatal());
        assert!(!Error::Decode(DecodeError::InvalidHeader("serial")).is_fatal());
        assert!(!Error::Decode(DecodeError::InvalidUtf8).is_fatal());
        assert!(!Error::LoopTimeout.is_fatal());
        assert!(!Error::Encode(EncodeError::InteriorNul).is_fatal());
    }
}
