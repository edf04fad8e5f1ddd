use std::io;

use thiserror::Error;

use crate::tlv_common::{ElementType, Tag, TagClass};

#[derive(Error, Debug, PartialEq, Clone, Copy)]
pub enum Error {
    #[error("unexpected end of input")]
    UnexpectedEOF,
    #[error("unknown element type code 0x{code:02x}")]
    UnknownType { code: u8 },
    #[error("container is not balanced")]
    UnbalancedContainer,
    #[error("invalid {class:?} tag: {detail}")]
    InvalidTag {
        class: TagClass,
        detail: &'static str,
    },
    #[error("item length {reported_len} exceeds the allowed maximum")]
    OversizedItem { reported_len: u64 },
    #[error("containers nested too deep")]
    NestingTooDeep,
    #[error("type mismatch: expected {expected}, found {actual:?}")]
    TypeMismatch {
        expected: &'static str,
        actual: ElementType,
    },
    #[error("missing field {tag}")]
    MissingField { tag: Tag },
    #[error("duplicate field {tag}")]
    DuplicateField { tag: Tag },
    #[error("value {value} does not fit in {target_width} bits")]
    Overflow { value: i128, target_width: u8 },
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    #[error("malformed TLV: {reason}")]
    MalformedTlv { reason: &'static str },
    #[error("writer finished with open containers")]
    Unterminated,
    #[error("payload of {len} bytes is too long to encode")]
    Overlong { len: u64 },
    #[error("no space left in the output buffer")]
    NoSpace,
    #[error("I/O error: {0:?}")]
    Io(io::ErrorKind),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Self::UnexpectedEOF,
            io::ErrorKind::WriteZero => Self::NoSpace,
            kind => Self::Io(kind),
        }
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_e: std::str::Utf8Error) -> Self {
        Self::InvalidUtf8
    }
}
