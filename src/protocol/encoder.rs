//! Value Codec: marshalling dengan alignment
//!
//! Aturan wire:
//! - Setiap scalar mulai di boundary natural-nya (lihat `Signature::alignment`)
//! - Padding selalu berisi nol, decoder menolak padding non-zero
//! - Alignment dihitung relatif terhadap awal buffer (awal frame)
//!
//! Encoder selalu menulis little-endian; decoder menerima kedua byte order.

use crate::error::{DecodeError, EncodeError, SignatureError};
use crate::protocol::signature::{Signature, MAX_DEPTH};
use crate::protocol::value::{is_valid_object_path, KeySet, Value};

/// Panjang maksimum isi array dalam bytes (64 MiB)
pub const MAX_ARRAY_LEN: usize = 64 * 1024 * 1024;

/// Byte order di wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Penanda byte order di header frame
    #[inline(always)]
    pub fn marker(self) -> u8 {
        match self {
            Endian::Little => b'l',
            Endian::Big => b'B',
        }
    }

    #[inline(always)]
    pub fn from_marker(b: u8) -> Option<Self> {
        match b {
            b'l' => Some(Endian::Little),
            b'B' => Some(Endian::Big),
            _ => None,
        }
    }
}

/// Encoder ke buffer yang bisa tumbuh
///
/// Posisi alignment = panjang buffer saat ini, jadi satu encoder
/// dipakai untuk satu frame utuh (header + body).
///
/// `encode` menolak value yang akan ditolak decoder di sisi lain; isi
/// buffer setelah error tidak terdefinisi dan harus di-`reset`.
#[derive(Debug)]
pub struct Encoder {
    buffer: Vec<u8>,
    endian: Endian,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::with_endian(Endian::Little)
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Membuat encoder dengan kapasitas awal tertentu
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            endian: Endian::Little,
        }
    }

    pub fn with_endian(endian: Endian) -> Self {
        Self {
            buffer: Vec::new(),
            endian,
        }
    }

    #[inline(always)]
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Reset encoder untuk reuse
    #[inline(always)]
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Tulis padding nol sampai posisi kelipatan `align`
    #[inline(always)]
    pub fn pad_to(&mut self, align: usize) {
        let rem = self.buffer.len() % align;
        if rem != 0 {
            self.buffer.resize(self.buffer.len() + align - rem, 0);
        }
    }

    #[inline(always)]
    pub fn write_u8(&mut self, v: u8) {
        self.buffer.push(v);
    }

    #[inline(always)]
    pub fn write_u16(&mut self, v: u16) {
        self.pad_to(2);
        let raw = match self.endian {
            Endian::Little => v.to_le_bytes(),
            Endian::Big => v.to_be_bytes(),
        };
        self.buffer.extend_from_slice(&raw);
    }

    #[inline(always)]
    pub fn write_u32(&mut self, v: u32) {
        self.pad_to(4);
        let raw = match self.endian {
            Endian::Little => v.to_le_bytes(),
            Endian::Big => v.to_be_bytes(),
        };
        self.buffer.extend_from_slice(&raw);
    }

    #[inline(always)]
    pub fn write_u64(&mut self, v: u64) {
        self.pad_to(8);
        let raw = match self.endian {
            Endian::Little => v.to_le_bytes(),
            Endian::Big => v.to_be_bytes(),
        };
        self.buffer.extend_from_slice(&raw);
    }

    /// Overwrite u32 yang sudah ditulis (dipakai untuk patch panjang)
    #[inline(always)]
    pub fn patch_u32(&mut self, at: usize, v: u32) {
        let raw = match self.endian {
            Endian::Little => v.to_le_bytes(),
            Endian::Big => v.to_be_bytes(),
        };
        self.buffer[at..at + 4].copy_from_slice(&raw);
    }

    fn write_str(&mut self, s: &str) -> Result<(), EncodeError> {
        if s.as_bytes().contains(&0) {
            return Err(EncodeError::InteriorNul);
        }
        self.write_u32(s.len() as u32);
        self.buffer.extend_from_slice(s.as_bytes());
        self.buffer.push(0);
        Ok(())
    }

    /// Signature sudah divalidasi caller, panjangnya muat di satu byte
    fn write_sig(&mut self, s: &str) {
        self.write_u8(s.len() as u8);
        self.buffer.extend_from_slice(s.as_bytes());
        self.buffer.push(0);
    }

    /// Encode satu value di posisi saat ini
    pub fn encode(&mut self, value: &Value) -> Result<(), EncodeError> {
        self.encode_value(value, 0)
    }

    fn encode_value(&mut self, value: &Value, depth: usize) -> Result<(), EncodeError> {
        // Batas yang sama dengan Decoder::decode_value
        if depth > MAX_DEPTH {
            return Err(EncodeError::TooDeep(MAX_DEPTH));
        }

        match value {
            Value::Byte(v) => self.write_u8(*v),
            Value::Bool(v) => self.write_u32(u32::from(*v)),
            Value::Int16(v) => self.write_u16(*v as u16),
            Value::UInt16(v) => self.write_u16(*v),
            Value::Int32(v) => self.write_u32(*v as u32),
            Value::UInt32(v) => self.write_u32(*v),
            Value::Int64(v) => self.write_u64(*v as u64),
            Value::UInt64(v) => self.write_u64(*v),
            Value::Double(v) => self.write_u64(v.to_bits()),
            Value::Str(s) => self.write_str(s)?,
            Value::ObjectPath(s) => {
                if !is_valid_object_path(s) {
                    return Err(EncodeError::InvalidObjectPath(s.clone()));
                }
                self.write_str(s)?;
            }
            Value::TypeSig(s) => {
                Signature::parse_list(s)?;
                self.write_sig(s);
            }
            Value::Array { elem, items } => {
                self.write_u32(0);
                let len_at = self.buffer.len() - 4;
                // Padding ke elemen pertama tidak dihitung dalam panjang array
                self.pad_to(elem.alignment());
                let start = self.buffer.len();
                for item in items {
                    check_element(elem, item)?;
                    self.encode_value(item, depth + 1)?;
                }
                self.patch_len(len_at, start)?;
            }
            Value::Struct(fields) => {
                if fields.is_empty() {
                    return Err(SignatureError::EmptyStruct.into());
                }
                self.pad_to(8);
                for field in fields {
                    self.encode_value(field, depth + 1)?;
                }
            }
            Value::Dict { key, value, entries } => {
                if !key.is_basic() {
                    return Err(SignatureError::NonBasicDictKey(key.to_string()).into());
                }
                self.write_u32(0);
                let len_at = self.buffer.len() - 4;
                self.pad_to(8);
                let start = self.buffer.len();
                let mut seen = KeySet::default();
                for (k, v) in entries {
                    check_element(key, k)?;
                    check_element(value, v)?;
                    if !seen.insert(k) {
                        return Err(EncodeError::DuplicateKey);
                    }
                    self.pad_to(8);
                    self.encode_value(k, depth + 1)?;
                    self.encode_value(v, depth + 1)?;
                }
                self.patch_len(len_at, start)?;
            }
            Value::Variant(inner) => {
                let sig = inner.signature().to_string();
                // Satu tipe utuh, panjang <= 255
                Signature::parse(&sig)?;
                self.write_sig(&sig);
                self.encode_value(inner, depth + 1)?;
            }
        }
        Ok(())
    }

    fn patch_len(&mut self, len_at: usize, start: usize) -> Result<(), EncodeError> {
        let len = self.buffer.len() - start;
        if len > MAX_ARRAY_LEN {
            return Err(EncodeError::ArrayTooLong(len));
        }
        self.patch_u32(len_at, len as u32);
        Ok(())
    }
}

#[inline]
fn check_element(expected: &Signature, item: &Value) -> Result<(), EncodeError> {
    let found = item.signature();
    if &found != expected {
        return Err(EncodeError::ElementMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        });
    }
    Ok(())
}

/// Decoder atas slice, posisi absolut terhadap awal frame
pub struct Decoder<'a> {
    buffer: &'a [u8],
    read_pos: usize,
    endian: Endian,
}

impl<'a> Decoder<'a> {
    /// Membuat decoder little-endian dari buffer
    #[inline(always)]
    pub fn new(buffer: &'a [u8]) -> Self {
        Self::at(buffer, 0, Endian::Little)
    }

    /// Decoder mulai dari posisi tertentu dengan byte order tertentu
    #[inline(always)]
    pub fn at(buffer: &'a [u8], read_pos: usize, endian: Endian) -> Self {
        Self {
            buffer,
            read_pos,
            endian,
        }
    }

    #[inline(always)]
    pub fn position(&self) -> usize {
        self.read_pos
    }

    /// Remaining bytes
    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.read_pos)
    }

    /// Decode satu value bertipe `sig`
    pub fn decode(&mut self, sig: &Signature) -> Result<Value, DecodeError> {
        self.decode_value(sig, 0)
    }

    /// Lewati padding sampai kelipatan `align`; padding wajib nol
    pub fn align(&mut self, align: usize) -> Result<(), DecodeError> {
        let rem = self.read_pos % align;
        if rem == 0 {
            return Ok(());
        }
        let target = self.read_pos + align - rem;
        if target > self.buffer.len() {
            return Err(DecodeError::UnexpectedEof("padding"));
        }
        if let Some(off) = self.buffer[self.read_pos..target].iter().position(|&b| b != 0) {
            return Err(DecodeError::NonZeroPadding(self.read_pos + off));
        }
        self.read_pos = target;
        Ok(())
    }

    #[inline(always)]
    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], DecodeError> {
        let end = self
            .read_pos
            .checked_add(n)
            .filter(|&end| end <= self.buffer.len())
            .ok_or(DecodeError::UnexpectedEof(what))?;
        let out = &self.buffer[self.read_pos..end];
        self.read_pos = end;
        Ok(out)
    }

    #[inline(always)]
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1, "byte")?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.align(2)?;
        let raw: [u8; 2] = self.take(2, "int16")?.try_into().map_err(|_| DecodeError::UnexpectedEof("int16"))?;
        Ok(match self.endian {
            Endian::Little => u16::from_le_bytes(raw),
            Endian::Big => u16::from_be_bytes(raw),
        })
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.align(4)?;
        let raw: [u8; 4] = self.take(4, "int32")?.try_into().map_err(|_| DecodeError::UnexpectedEof("int32"))?;
        Ok(match self.endian {
            Endian::Little => u32::from_le_bytes(raw),
            Endian::Big => u32::from_be_bytes(raw),
        })
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        self.align(8)?;
        let raw: [u8; 8] = self.take(8, "int64")?.try_into().map_err(|_| DecodeError::UnexpectedEof("int64"))?;
        Ok(match self.endian {
            Endian::Little => u64::from_le_bytes(raw),
            Endian::Big => u64::from_be_bytes(raw),
        })
    }

    /// Bytes string + terminator NUL
    fn read_text(&mut self, len: usize, what: &'static str) -> Result<String, DecodeError> {
        let raw = self.take(len, what)?;
        if self.take(1, what)?[0] != 0 {
            return Err(DecodeError::MissingNul);
        }
        if raw.contains(&0) {
            return Err(DecodeError::InteriorNul);
        }
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8)
    }

    pub fn read_str(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        self.read_text(len, "string")
    }

    pub fn read_sig(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u8()? as usize;
        self.read_text(len, "signature")
    }

    fn decode_value(&mut self, sig: &Signature, depth: usize) -> Result<Value, DecodeError> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::TooDeep(MAX_DEPTH));
        }

        Ok(match sig {
            Signature::Byte => Value::Byte(self.read_u8()?),
            Signature::Bool => match self.read_u32()? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => return Err(DecodeError::InvalidBool(other)),
            },
            Signature::Int16 => Value::Int16(self.read_u16()? as i16),
            Signature::UInt16 => Value::UInt16(self.read_u16()?),
            Signature::Int32 => Value::Int32(self.read_u32()? as i32),
            Signature::UInt32 => Value::UInt32(self.read_u32()?),
            Signature::Int64 => Value::Int64(self.read_u64()? as i64),
            Signature::UInt64 => Value::UInt64(self.read_u64()?),
            Signature::Double => Value::Double(f64::from_bits(self.read_u64()?)),
            Signature::Str => Value::Str(self.read_str()?),
            Signature::ObjectPath => {
                let path = self.read_str()?;
                if !is_valid_object_path(&path) {
                    return Err(DecodeError::InvalidObjectPath(path));
                }
                Value::ObjectPath(path)
            }
            Signature::TypeSig => {
                let s = self.read_sig()?;
                Signature::parse_list(&s)?;
                Value::TypeSig(s)
            }
            Signature::Array(elem) => {
                let end = self.array_bounds(elem.alignment())?;
                let mut items = Vec::new();
                while self.read_pos < end {
                    items.push(self.decode_value(elem, depth + 1)?);
                }
                if self.read_pos != end {
                    return Err(DecodeError::ArrayLengthMismatch);
                }
                Value::Array {
                    elem: (**elem).clone(),
                    items,
                }
            }
            Signature::Dict(key, value) => {
                let end = self.array_bounds(8)?;
                let mut seen = KeySet::default();
                let mut entries = Vec::new();
                while self.read_pos < end {
                    self.align(8)?;
                    let k = self.decode_value(key, depth + 1)?;
                    let v = self.decode_value(value, depth + 1)?;
                    if !seen.insert(&k) {
                        return Err(DecodeError::DuplicateKey);
                    }
                    entries.push((k, v));
                }
                if self.read_pos != end {
                    return Err(DecodeError::ArrayLengthMismatch);
                }
                Value::Dict {
                    key: (**key).clone(),
                    value: (**value).clone(),
                    entries,
                }
            }
            Signature::Struct(fields) => {
                self.align(8)?;
                let mut values = Vec::with_capacity(fields.len());
                for field in fields {
                    values.push(self.decode_value(field, depth + 1)?);
                }
                Value::Struct(values)
            }
            Signature::Variant => {
                let inner_sig = Signature::parse(&self.read_sig()?)?;
                Value::Variant(Box::new(self.decode_value(&inner_sig, depth + 1)?))
            }
        })
    }

    /// Baca panjang array + padding elemen pertama, kembalikan posisi akhir
    fn array_bounds(&mut self, elem_align: usize) -> Result<usize, DecodeError> {
        let len = self.read_u32()? as usize;
        if len > MAX_ARRAY_LEN {
            return Err(DecodeError::ArrayTooLong(len));
        }
        self.align(elem_align)?;
        let end = self.read_pos + len;
        if end > self.buffer.len() {
            return Err(DecodeError::UnexpectedEof("array"));
        }
        Ok(end)
    }
}

/// Encode satu value mulai dari offset 0 (little-endian)
pub fn encode(value: &Value) -> Result<Vec<u8>, EncodeError> {
    let mut encoder = Encoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// Decode satu value dari seluruh buffer (little-endian, offset 0)
pub fn decode(bytes: &[u8], sig: &Signature) -> Result<Value, DecodeError> {
    let mut decoder = Decoder::new(bytes);
    let value = decoder.decode(sig)?;
    match decoder.remaining() {
        0 => Ok(value),
        n => Err(DecodeError::TrailingBytes(n)),
    }
}
