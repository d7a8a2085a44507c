//! Type System: signature parsing dan metadata per tipe
//!
//! Signature adalah deretan type code:
//! - Atomic: `y b n q i u x t d s o g`
//! - Container: `a<elem>`, `(<fields>)`, `a{<key><value>}`, `v`
//!
//! Parsing selesai sebelum marshalling, jadi encoder/decoder tidak pernah
//! melihat signature yang belum tervalidasi.

use std::fmt;
use std::str::FromStr;

use crate::error::SignatureError;

/// Panjang maksimum signature string (bytes)
pub const MAX_SIGNATURE_LEN: usize = 255;
/// Kedalaman container maksimum, membatasi stack saat parse/decode
pub const MAX_DEPTH: usize = 32;

/// Satu tipe lengkap
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Signature {
    Byte,
    Bool,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Double,
    Str,
    ObjectPath,
    /// Tipe `g`: signature sebagai value
    TypeSig,
    Variant,
    Array(Box<Signature>),
    Struct(Vec<Signature>),
    /// Selalu muncul sebagai `a{kv}`
    Dict(Box<Signature>, Box<Signature>),
}

impl Signature {
    /// Parse tepat satu tipe lengkap
    pub fn parse(s: &str) -> Result<Self, SignatureError> {
        if s.is_empty() {
            return Err(SignatureError::Empty);
        }
        if s.len() > MAX_SIGNATURE_LEN {
            return Err(SignatureError::TooLong(MAX_SIGNATURE_LEN));
        }
        let mut parser = Parser::new(s.as_bytes());
        let sig = parser.parse_one(0)?;
        if parser.pos < s.len() {
            return Err(SignatureError::Trailing(s[parser.pos..].to_string()));
        }
        Ok(sig)
    }

    /// Parse nol atau lebih tipe lengkap (misalnya signature body frame)
    pub fn parse_list(s: &str) -> Result<Vec<Self>, SignatureError> {
        if s.len() > MAX_SIGNATURE_LEN {
            return Err(SignatureError::TooLong(MAX_SIGNATURE_LEN));
        }
        let mut parser = Parser::new(s.as_bytes());
        let mut out = Vec::new();
        while parser.pos < s.len() {
            out.push(parser.parse_one(0)?);
        }
        Ok(out)
    }

    /// Render list tipe menjadi satu signature string
    pub fn list_to_string(list: &[Signature]) -> String {
        list.iter().map(ToString::to_string).collect()
    }

    /// Tipe basic (boleh jadi key dict)
    #[inline]
    pub fn is_basic(&self) -> bool {
        !matches!(
            self,
            Signature::Variant | Signature::Array(_) | Signature::Struct(_) | Signature::Dict(..)
        )
    }

    /// Alignment wire dalam bytes
    #[inline]
    pub fn alignment(&self) -> usize {
        match self {
            Signature::Byte | Signature::TypeSig | Signature::Variant => 1,
            Signature::Int16 | Signature::UInt16 => 2,
            Signature::Bool
            | Signature::Int32
            | Signature::UInt32
            | Signature::Str
            | Signature::ObjectPath
            | Signature::Array(_)
            | Signature::Dict(..) => 4,
            Signature::Int64 | Signature::UInt64 | Signature::Double | Signature::Struct(_) => 8,
        }
    }

    /// Type code pertama
    pub fn code(&self) -> char {
        match self {
            Signature::Byte => 'y',
            Signature::Bool => 'b',
            Signature::Int16 => 'n',
            Signature::UInt16 => 'q',
            Signature::Int32 => 'i',
            Signature::UInt32 => 'u',
            Signature::Int64 => 'x',
            Signature::UInt64 => 't',
            Signature::Double => 'd',
            Signature::Str => 's',
            Signature::ObjectPath => 'o',
            Signature::TypeSig => 'g',
            Signature::Variant => 'v',
            Signature::Array(_) | Signature::Dict(..) => 'a',
            Signature::Struct(_) => '(',
        }
    }

    /// Kedalaman container (atomic = 0)
    pub fn depth(&self) -> usize {
        match self {
            Signature::Array(elem) => 1 + elem.depth(),
            Signature::Dict(k, v) => 1 + k.depth().max(v.depth()),
            Signature::Struct(fields) => 1 + fields.iter().map(Signature::depth).max().unwrap_or(0),
            _ => 0,
        }
    }

    fn atomic(code: u8) -> Option<Self> {
        Some(match code {
            b'y' => Signature::Byte,
            b'b' => Signature::Bool,
            b'n' => Signature::Int16,
            b'q' => Signature::UInt16,
            b'i' => Signature::Int32,
            b'u' => Signature::UInt32,
            b'x' => Signature::Int64,
            b't' => Signature::UInt64,
            b'd' => Signature::Double,
            b's' => Signature::Str,
            b'o' => Signature::ObjectPath,
            b'g' => Signature::TypeSig,
            b'v' => Signature::Variant,
            _ => return None,
        })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signature::Array(elem) => write!(f, "a{}", elem),
            Signature::Dict(k, v) => write!(f, "a{{{}{}}}", k, v),
            Signature::Struct(fields) => {
                f.write_str("(")?;
                for field in fields {
                    write!(f, "{}", field)?;
                }
                f.write_str(")")
            }
            atomic => write!(f, "{}", atomic.code()),
        }
    }
}

impl FromStr for Signature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Signature::parse(s)
    }
}

/// Recursive-descent parser atas bytes signature
struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    /// Caller menjamin masih ada minimal satu byte
    fn parse_one(&mut self, depth: usize) -> Result<Signature, SignatureError> {
        if depth > MAX_DEPTH {
            return Err(SignatureError::TooDeep(MAX_DEPTH));
        }
        let code = self.peek().ok_or(SignatureError::Empty)?;
        self.pos += 1;

        if let Some(sig) = Signature::atomic(code) {
            return Ok(sig);
        }

        match code {
            b'a' => match self.peek() {
                None => Err(SignatureError::MissingElement),
                Some(b'{') => {
                    self.pos += 1;
                    self.parse_dict_entry(depth + 1)
                }
                Some(_) => Ok(Signature::Array(Box::new(self.parse_one(depth + 1)?))),
            },
            b'(' => {
                let mut fields = Vec::new();
                loop {
                    match self.peek() {
                        None => return Err(SignatureError::Unbalanced(')')),
                        Some(b')') => {
                            self.pos += 1;
                            break;
                        }
                        Some(_) => fields.push(self.parse_one(depth + 1)?),
                    }
                }
                if fields.is_empty() {
                    return Err(SignatureError::EmptyStruct);
                }
                Ok(Signature::Struct(fields))
            }
            b'{' => Err(SignatureError::BareDictEntry),
            b')' | b'}' => Err(SignatureError::UnexpectedClose(code as char)),
            other => Err(SignatureError::UnknownCode(other as char)),
        }
    }

    fn parse_dict_entry(&mut self, depth: usize) -> Result<Signature, SignatureError> {
        let key = match self.peek() {
            None => return Err(SignatureError::Unbalanced('}')),
            Some(b'}') => return Err(SignatureError::DictArity),
            Some(_) => self.parse_one(depth + 1)?,
        };
        if !key.is_basic() {
            return Err(SignatureError::NonBasicDictKey(key.to_string()));
        }
        let value = match self.peek() {
            None => return Err(SignatureError::Unbalanced('}')),
            Some(b'}') => return Err(SignatureError::DictArity),
            Some(_) => self.parse_one(depth + 1)?,
        };
        match self.peek() {
            Some(b'}') => {
                self.pos += 1;
                Ok(Signature::Dict(Box::new(key), Box::new(value)))
            }
            None => Err(SignatureError::Unbalanced('}')),
            Some(_) => Err(SignatureError::DictArity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip_strings() {
        for s in ["y", "s", "av", "a{sv}", "(ii)", "a(sa{sv})", "aai", "a{oa{sa{sv}}}", "(y(dd)v)"] {
            assert_eq!(Signature::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_parse_structure() {
        let sig = Signature::parse("a{sv}").unwrap();
        assert_eq!(
            sig,
            Signature::Dict(Box::new(Signature::Str), Box::new(Signature::Variant))
        );
        assert_eq!(sig.alignment(), 4);
        assert_eq!(Signature::parse("(yy)").unwrap().alignment(), 8);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Signature::parse(""), Err(SignatureError::Empty));
        assert_eq!(Signature::parse("z"), Err(SignatureError::UnknownCode('z')));
        assert_eq!(Signature::parse("(ii"), Err(SignatureError::Unbalanced(')')));
        assert_eq!(Signature::parse("()"), Err(SignatureError::EmptyStruct));
        assert_eq!(Signature::parse("a"), Err(SignatureError::MissingElement));
        assert_eq!(Signature::parse("{sv}"), Err(SignatureError::BareDictEntry));
        assert_eq!(Signature::parse("i)"), Err(SignatureError::Trailing(")".into())));
        assert_eq!(Signature::parse("a{s}"), Err(SignatureError::DictArity));
        assert_eq!(Signature::parse("a{svv}"), Err(SignatureError::DictArity));
        assert_eq!(Signature::parse("a{sv"), Err(SignatureError::Unbalanced('}')));
        assert_eq!(
            Signature::parse("a{vs}"),
            Err(SignatureError::NonBasicDictKey("v".into()))
        );
        assert_eq!(
            Signature::parse("a{(i)s}"),
            Err(SignatureError::NonBasicDictKey("(i)".into()))
        );
        assert_eq!(Signature::parse("ii"), Err(SignatureError::Trailing("i".into())));
    }

    #[test]
    fn test_depth_limit() {
        let ok = format!("{}i", "a".repeat(MAX_DEPTH));
        assert_eq!(Signature::parse(&ok).unwrap().depth(), MAX_DEPTH);

        let too_deep = format!("{}i", "a".repeat(MAX_DEPTH + 1));
        assert_eq!(Signature::parse(&too_deep), Err(SignatureError::TooDeep(MAX_DEPTH)));
    }

    #[test]
    fn test_length_limit() {
        let long = "i".repeat(MAX_SIGNATURE_LEN + 1);
        assert_eq!(
            Signature::parse_list(&long),
            Err(SignatureError::TooLong(MAX_SIGNATURE_LEN))
        );
    }

    #[test]
    fn test_parse_list() {
        let list = Signature::parse_list("sa{sv}as").unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(Signature::list_to_string(&list), "sa{sv}as");
        assert!(Signature::parse_list("").unwrap().is_empty());
    }

    #[test]
    fn test_basic_types() {
        assert!(Signature::parse("o").unwrap().is_basic());
        assert!(Signature::parse("g").unwrap().is_basic());
        assert!(!Signature::Variant.is_basic());
        assert!(!Signature::parse("ai").unwrap().is_basic());
    }
}
