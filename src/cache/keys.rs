//! Fragment cache key derivation.
//!
//! A key is `format % {hash: b64(sha256(canonical(parameters)))}`. The canonical
//! encoding is tagged and length-prefixed so that distinct parameter values never
//! share a byte sequence.

use std::fmt;
use std::str::FromStr;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use minijinja::value::{Value, ValueKind};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Default namespace template for fragment keys.
pub const DEFAULT_KEY_FORMAT: &str = "jinja_frag_%(hash)s";

const HASH_SLOT: &str = "%(hash)s";

const TAG_NULL: u8 = b'N';
const TAG_TRUE: u8 = b'T';
const TAG_FALSE: u8 = b'F';
const TAG_INT: u8 = b'i';
const TAG_FLOAT: u8 = b'g';
const TAG_STR: u8 = b's';
const TAG_BYTES: u8 = b'b';
const TAG_SEQ: u8 = b'[';

/// Value supplied by a template author to identify a cached fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheParameters {
    Null,
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Seq(Vec<CacheParameters>),
}

/// The parameters contain a value with no canonical encoding.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot serialize {kind} value at {path} into a cache key")]
pub struct SerializationError {
    kind: String,
    path: String,
}

impl SerializationError {
    fn new(kind: impl fmt::Display, path: &[usize]) -> Self {
        let path = if path.is_empty() {
            "root".to_string()
        } else {
            path.iter()
                .map(|index| format!("[{index}]"))
                .collect::<String>()
        };
        Self {
            kind: kind.to_string(),
            path,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }
}

/// The configured key format does not contain exactly one `%(hash)s` slot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyFormatError {
    #[error("key format `{0}` must contain exactly one `%(hash)s` slot")]
    Slot(String),
    #[error("key format `{0}` must not contain whitespace or control characters")]
    Character(String),
}

/// Namespace template for fragment cache keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFormat {
    prefix: String,
    suffix: String,
}

impl KeyFormat {
    pub fn render(&self, hash: &str) -> String {
        let mut key = String::with_capacity(self.prefix.len() + hash.len() + self.suffix.len());
        key.push_str(&self.prefix);
        key.push_str(hash);
        key.push_str(&self.suffix);
        key
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for KeyFormat {
    fn default() -> Self {
        Self {
            prefix: "jinja_frag_".to_string(),
            suffix: String::new(),
        }
    }
}

impl FromStr for KeyFormat {
    type Err = KeyFormatError;

    fn from_str(format: &str) -> Result<Self, Self::Err> {
        if format.matches(HASH_SLOT).count() != 1 {
            return Err(KeyFormatError::Slot(format.to_string()));
        }
        if format
            .chars()
            .any(|ch| ch.is_whitespace() || ch.is_control())
        {
            return Err(KeyFormatError::Character(format.to_string()));
        }

        let (prefix, suffix) = format
            .split_once(HASH_SLOT)
            .ok_or_else(|| KeyFormatError::Slot(format.to_string()))?;
        Ok(Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        })
    }
}

impl fmt::Display for KeyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{HASH_SLOT}{}", self.prefix, self.suffix)
    }
}

impl CacheParameters {
    /// Canonical byte encoding used as digest input.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Null => out.push(TAG_NULL),
            Self::Bool(true) => out.push(TAG_TRUE),
            Self::Bool(false) => out.push(TAG_FALSE),
            Self::Int(value) => {
                out.push(TAG_INT);
                out.extend_from_slice(&value.to_le_bytes());
            }
            Self::Float(value) => {
                let bits = if value.is_nan() {
                    f64::NAN.to_bits()
                } else {
                    value.to_bits()
                };
                out.push(TAG_FLOAT);
                out.extend_from_slice(&bits.to_le_bytes());
            }
            Self::Str(value) => {
                out.push(TAG_STR);
                encode_len(out, value.len());
                out.extend_from_slice(value.as_bytes());
            }
            Self::Bytes(value) => {
                out.push(TAG_BYTES);
                encode_len(out, value.len());
                out.extend_from_slice(value);
            }
            Self::Seq(items) => {
                out.push(TAG_SEQ);
                encode_len(out, items.len());
                for item in items {
                    item.encode_into(out);
                }
            }
        }
    }

    fn from_template_value(value: &Value, path: &mut Vec<usize>) -> Result<Self, SerializationError> {
        match value.kind() {
            ValueKind::None => Ok(Self::Null),
            ValueKind::Bool => Ok(Self::Bool(value.is_true())),
            ValueKind::Number if value.is_integer() => i128::try_from(value.clone())
                .map(Self::Int)
                .map_err(|_| SerializationError::new("integer", path)),
            ValueKind::Number => f64::try_from(value.clone())
                .map(Self::Float)
                .map_err(|_| SerializationError::new("number", path)),
            ValueKind::String => value
                .as_str()
                .map(|text| Self::Str(text.to_string()))
                .ok_or_else(|| SerializationError::new("string", path)),
            ValueKind::Bytes => value
                .as_bytes()
                .map(|bytes| Self::Bytes(bytes.to_vec()))
                .ok_or_else(|| SerializationError::new("bytes", path)),
            ValueKind::Seq => {
                let iter = value
                    .try_iter()
                    .map_err(|_| SerializationError::new("sequence", path))?;
                let mut items = Vec::new();
                for (index, item) in iter.enumerate() {
                    path.push(index);
                    items.push(Self::from_template_value(&item, path)?);
                    path.pop();
                }
                Ok(Self::Seq(items))
            }
            other => Err(SerializationError::new(other, path)),
        }
    }

    fn from_json_value(
        value: &serde_json::Value,
        path: &mut Vec<usize>,
    ) -> Result<Self, SerializationError> {
        use serde_json::Value as Json;

        match value {
            Json::Null => Ok(Self::Null),
            Json::Bool(flag) => Ok(Self::Bool(*flag)),
            Json::Number(number) => {
                if let Some(int) = number.as_i64() {
                    Ok(Self::Int(int.into()))
                } else if let Some(int) = number.as_u64() {
                    Ok(Self::Int(int.into()))
                } else {
                    number
                        .as_f64()
                        .map(Self::Float)
                        .ok_or_else(|| SerializationError::new("number", path))
                }
            }
            Json::String(text) => Ok(Self::Str(text.clone())),
            Json::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    path.push(index);
                    out.push(Self::from_json_value(item, path)?);
                    path.pop();
                }
                Ok(Self::Seq(out))
            }
            Json::Object(_) => Err(SerializationError::new("object", path)),
        }
    }
}

fn encode_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u64).to_le_bytes());
}

impl TryFrom<&Value> for CacheParameters {
    type Error = SerializationError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        Self::from_template_value(value, &mut Vec::new())
    }
}

impl TryFrom<&serde_json::Value> for CacheParameters {
    type Error = SerializationError;

    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        Self::from_json_value(value, &mut Vec::new())
    }
}

impl From<bool> for CacheParameters {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for CacheParameters {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for CacheParameters {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<f64> for CacheParameters {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

macro_rules! int_parameters {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for CacheParameters {
                fn from(value: $ty) -> Self {
                    Self::Int(value.into())
                }
            }
        )*
    };
}

int_parameters!(i8, i16, i32, i64, u8, u16, u32, u64);

impl<T: Into<CacheParameters>> From<Option<T>> for CacheParameters {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<CacheParameters>> From<Vec<T>> for CacheParameters {
    fn from(items: Vec<T>) -> Self {
        Self::Seq(items.into_iter().map(Into::into).collect())
    }
}

impl<A, B> From<(A, B)> for CacheParameters
where
    A: Into<CacheParameters>,
    B: Into<CacheParameters>,
{
    fn from((a, b): (A, B)) -> Self {
        Self::Seq(vec![a.into(), b.into()])
    }
}

impl<A, B, C> From<(A, B, C)> for CacheParameters
where
    A: Into<CacheParameters>,
    B: Into<CacheParameters>,
    C: Into<CacheParameters>,
{
    fn from((a, b, c): (A, B, C)) -> Self {
        Self::Seq(vec![a.into(), b.into(), c.into()])
    }
}

/// Derive the cache key for `parameters` under `format`.
pub fn derive_cache_key(parameters: &CacheParameters, format: &KeyFormat) -> String {
    let digest = Sha256::digest(parameters.canonical_bytes());
    let encoded = URL_SAFE_NO_PAD.encode(digest);
    format.render(encoded.trim_end_matches(['=', '\r', '\n']))
}
