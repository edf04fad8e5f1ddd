use std::fmt;

use log::error;

use crate::{
    error::Error,
    tlv_common::{
        le_int_bytes, le_uint_bytes, read_le_int, read_le_uint, signed_width, unsigned_width,
        ContainerType, ElementType, Tag,
    },
};

/// One decoded TLV node.
///
/// `value` holds the raw value bytes: the little-endian integer or float for
/// numeric types and the payload (without its length prefix) for strings. It
/// is empty for booleans, null and containers. `children` is only populated
/// for containers and never contains the end-of-container marker.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: Tag,
    pub element_type: ElementType,
    pub value: Vec<u8>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(tag: Tag, element_type: ElementType, value: Vec<u8>) -> Self {
        Element {
            tag,
            element_type,
            value,
            children: Vec::new(),
        }
    }

    pub fn signed(tag: Tag, value: i64) -> Self {
        let width = signed_width(value);
        // widths out of signed_width() are always valid
        let element_type = ElementType::signed(width).unwrap_or(ElementType::S64);
        Self::new(tag, element_type, le_int_bytes(value, width))
    }

    pub fn unsigned(tag: Tag, value: u64) -> Self {
        let width = unsigned_width(value);
        let element_type = ElementType::unsigned(width).unwrap_or(ElementType::U64);
        Self::new(tag, element_type, le_uint_bytes(value, width))
    }

    pub fn bool(tag: Tag, value: bool) -> Self {
        let element_type = if value {
            ElementType::True
        } else {
            ElementType::False
        };
        Self::new(tag, element_type, Vec::new())
    }

    pub fn null(tag: Tag) -> Self {
        Self::new(tag, ElementType::Null, Vec::new())
    }

    pub fn f32(tag: Tag, value: f32) -> Self {
        Self::new(tag, ElementType::F32, value.to_le_bytes().to_vec())
    }

    pub fn f64(tag: Tag, value: f64) -> Self {
        Self::new(tag, ElementType::F64, value.to_le_bytes().to_vec())
    }

    pub fn utf8(tag: Tag, value: &str) -> Self {
        let width = unsigned_width(value.len() as u64);
        let element_type = ElementType::utf8(width).unwrap_or(ElementType::Utf64l);
        Self::new(tag, element_type, value.as_bytes().to_vec())
    }

    pub fn octets(tag: Tag, value: &[u8]) -> Self {
        let width = unsigned_width(value.len() as u64);
        let element_type = ElementType::octets(width).unwrap_or(ElementType::Str64l);
        Self::new(tag, element_type, value.to_vec())
    }

    pub fn container(tag: Tag, container: ContainerType, children: Vec<Element>) -> Self {
        Element {
            tag,
            element_type: container.element_type(),
            value: Vec::new(),
            children,
        }
    }

    pub fn end_of_container() -> Self {
        Self::new(Tag::anonymous(), ElementType::EndCnt, Vec::new())
    }

    pub fn is_container(&self) -> bool {
        self.element_type.is_container()
    }

    pub fn is_end_of_container(&self) -> bool {
        self.element_type == ElementType::EndCnt
    }

    pub fn is_null(&self) -> bool {
        self.element_type == ElementType::Null
    }

    fn mismatch(&self, expected: &'static str) -> Error {
        Error::TypeMismatch {
            expected,
            actual: self.element_type,
        }
    }

    pub fn get_signed(&self) -> Result<i64, Error> {
        if !self.element_type.is_signed() {
            return Err(self.mismatch("signed integer"));
        }
        read_le_int(&self.value)
    }

    pub fn get_unsigned(&self) -> Result<u64, Error> {
        if !self.element_type.is_unsigned() {
            return Err(self.mismatch("unsigned integer"));
        }
        read_le_uint(&self.value)
    }

    pub fn get_bool(&self) -> Result<bool, Error> {
        match self.element_type {
            ElementType::False => Ok(false),
            ElementType::True => Ok(true),
            _ => Err(self.mismatch("boolean")),
        }
    }

    pub fn get_f32(&self) -> Result<f32, Error> {
        if self.element_type != ElementType::F32 {
            return Err(self.mismatch("single precision float"));
        }
        let mut raw = [0_u8; 4];
        if self.value.len() != raw.len() {
            return Err(Error::MalformedTlv {
                reason: "float value has the wrong size",
            });
        }
        raw.copy_from_slice(&self.value);
        Ok(f32::from_le_bytes(raw))
    }

    pub fn get_f64(&self) -> Result<f64, Error> {
        if self.element_type != ElementType::F64 {
            return Err(self.mismatch("double precision float"));
        }
        let mut raw = [0_u8; 8];
        if self.value.len() != raw.len() {
            return Err(Error::MalformedTlv {
                reason: "float value has the wrong size",
            });
        }
        raw.copy_from_slice(&self.value);
        Ok(f64::from_le_bytes(raw))
    }

    pub fn get_str(&self) -> Result<&str, Error> {
        if !self.element_type.is_utf8() {
            return Err(self.mismatch("UTF-8 string"));
        }
        Ok(std::str::from_utf8(&self.value)?)
    }

    pub fn get_slice(&self) -> Result<&[u8], Error> {
        if !self.element_type.is_octets() {
            return Err(self.mismatch("byte string"));
        }
        Ok(&self.value)
    }

    fn confirm(&self, element_type: ElementType, expected: &'static str) -> Result<&Self, Error> {
        if self.element_type == element_type {
            Ok(self)
        } else {
            Err(self.mismatch(expected))
        }
    }

    pub fn confirm_struct(&self) -> Result<&Self, Error> {
        self.confirm(ElementType::Struct, "structure")
    }

    pub fn confirm_array(&self) -> Result<&Self, Error> {
        self.confirm(ElementType::Array, "array")
    }

    pub fn confirm_list(&self) -> Result<&Self, Error> {
        self.confirm(ElementType::List, "list")
    }

    /// First child whose tag matches `tag`
    pub fn find_tag(&self, tag: &Tag) -> Option<&Element> {
        self.children.iter().find(|c| c.tag.matches(tag))
    }

    pub fn find_ctx(&self, number: u8) -> Option<&Element> {
        self.children.iter().find(|c| c.tag.is_context(number))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Element> {
        self.children.iter()
    }

    /// Checks the in-memory invariants of this element and all its children
    pub fn validate(&self) -> Result<(), Error> {
        let malformed = |reason| Err(Error::MalformedTlv { reason });

        let ty = self.element_type;
        if ty == ElementType::EndCnt {
            return malformed("end of container is not an element");
        }
        if !ty.is_container() && !self.children.is_empty() {
            return malformed("only containers have children");
        }
        if ty.value_size() != 0 && self.value.len() != ty.value_size() {
            return malformed("value size does not match element type");
        }
        if (ty.is_bool() || ty.is_container() || ty == ElementType::Null) && !self.value.is_empty() {
            return malformed("element type carries no value");
        }
        for child in &self.children {
            match ty {
                ElementType::Struct if child.tag.is_anonymous() => {
                    return malformed("structure member with anonymous tag")
                }
                ElementType::Array if !child.tag.is_anonymous() => {
                    return malformed("array member with a tag")
                }
                _ => (),
            }
            child.validate()?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Element {
    type Item = &'a Element;
    type IntoIter = std::slice::Iter<'a, Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.children.iter()
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tag.is_anonymous() {
            write!(f, "{}: ", self.tag)?;
        }
        let ty = self.element_type;
        if let Some(container) = ty.container() {
            let (open, close) = match container {
                ContainerType::Structure => ("{", "}"),
                ContainerType::Array => ("[", "]"),
                ContainerType::List => ("[[", "]]"),
            };
            write!(f, "{}", open)?;
            for (i, child) in self.children.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", child)?;
            }
            return write!(f, "{}", close);
        }

        let shown = if ty.is_signed() {
            self.get_signed().map(|v| write!(f, "{}", v))
        } else if ty.is_unsigned() {
            self.get_unsigned().map(|v| write!(f, "{}", v))
        } else if ty == ElementType::F32 {
            self.get_f32().map(|v| write!(f, "{}", v))
        } else if ty == ElementType::F64 {
            self.get_f64().map(|v| write!(f, "{}", v))
        } else if ty.is_utf8() {
            match std::str::from_utf8(&self.value) {
                Ok(s) => Ok(write!(f, "len[{}]\"{}\"", s.len(), s)),
                Err(_) => Ok(write!(f, "len[{}]{:x?}", self.value.len(), self.value)),
            }
        } else if ty.is_octets() {
            Ok(write!(f, "len[{}]{:02x?}", self.value.len(), self.value))
        } else {
            Ok(match ty {
                ElementType::True => write!(f, "True"),
                ElementType::False => write!(f, "False"),
                ElementType::Null => write!(f, "Null"),
                _ => write!(f, ">"),
            })
        };
        match shown {
            Ok(r) => r,
            Err(e) => {
                error!("Cannot display element: {}", e);
                write!(f, "{:?}{:x?}", ty, self.value)
            }
        }
    }
}
