//! Protocol Layer: type system, marshalling, dan frame
//!
//! Prinsip desain:
//! - Signature di-parse sekali, encoder/decoder hanya melihat tipe valid
//! - Alignment relatif terhadap awal frame, padding selalu nol
//! - Encode little-endian, decode kedua byte order

pub mod encoder;
pub mod message;
pub mod signature;
pub mod value;

pub use encoder::{decode, encode, Decoder, Encoder, Endian, MAX_ARRAY_LEN};
pub use message::{decode_frame, frame_len, Frame, FrameReader, MessageType, HEADER_SIZE, NO_REPLY_EXPECTED};
pub use signature::{Signature, MAX_DEPTH, MAX_SIGNATURE_LEN};
pub use value::{conform, infer, is_valid_object_path, validate, Native, Value};
