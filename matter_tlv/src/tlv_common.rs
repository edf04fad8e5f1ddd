use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::error::Error;

pub const TAG_SHIFT_BITS: u8 = 5;
pub const TAG_MASK: u8 = 0xe0;
pub const TYPE_MASK: u8 = 0x1f;
pub const WIDTH_MASK: u8 = 0x03;
pub const MAX_TAG_INDEX: usize = 8;

/// Deepest container nesting accepted by the reader and the writer
pub const MAX_DEPTH: usize = 16;
/// Longest string or byte string payload the reader accepts
pub const MAX_ITEM_LEN: u64 = i32::MAX as u64;

pub static TAG_SIZE_MAP: [usize; MAX_TAG_INDEX] = [
    0, // Anonymous
    1, // Context
    2, // CommonPrf16
    4, // CommonPrf32
    2, // ImplPrf16
    4, // ImplPrf32
    6, // FullQual48
    8, // FullQual64
];

/* Tag Classes */
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive)]
pub enum TagClass {
    Anonymous = 0,
    Context = 1,
    CommonPrf16 = 2,
    CommonPrf32 = 3,
    ImplPrf16 = 4,
    ImplPrf32 = 5,
    FullQual48 = 6,
    FullQual64 = 7,
}

impl TagClass {
    pub fn from_control(control: u8) -> Result<Self, Error> {
        let index = (control & TAG_MASK) >> TAG_SHIFT_BITS;
        TagClass::from_u8(index).ok_or(Error::MalformedTlv {
            reason: "reserved tag class bits",
        })
    }

    /// The class bits as they appear in the control byte
    pub fn code(self) -> u8 {
        (self as u8) << TAG_SHIFT_BITS
    }

    /// Number of tag bytes following the control byte
    pub fn tag_size(self) -> usize {
        TAG_SIZE_MAP[self as usize]
    }

    // 16 and 32-bit forms of the same profile scheme identify the same tag
    fn family(self) -> u8 {
        match self {
            TagClass::Anonymous => 0,
            TagClass::Context => 1,
            TagClass::CommonPrf16 | TagClass::CommonPrf32 => 2,
            TagClass::ImplPrf16 | TagClass::ImplPrf32 => 3,
            TagClass::FullQual48 | TagClass::FullQual64 => 4,
        }
    }
}

/* Element Types */
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive)]
pub enum ElementType {
    S8 = 0,
    S16 = 1,
    S32 = 2,
    S64 = 3,
    U8 = 4,
    U16 = 5,
    U32 = 6,
    U64 = 7,
    False = 8,
    True = 9,
    F32 = 10,
    F64 = 11,
    Utf8l = 12,
    Utf16l = 13,
    Utf32l = 14,
    Utf64l = 15,
    Str8l = 16,
    Str16l = 17,
    Str32l = 18,
    Str64l = 19,
    Null = 20,
    Struct = 21,
    Array = 22,
    List = 23,
    EndCnt = 24,
}

const BASE_SIGNED: u8 = ElementType::S8 as u8;
const BASE_UNSIGNED: u8 = ElementType::U8 as u8;
const BASE_UTF8: u8 = ElementType::Utf8l as u8;
const BASE_OCTETS: u8 = ElementType::Str8l as u8;

impl ElementType {
    pub fn from_code(code: u8) -> Result<Self, Error> {
        ElementType::from_u8(code).ok_or(Error::UnknownType { code })
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    fn base(self) -> u8 {
        self.code() & !WIDTH_MASK
    }

    // Byte count selected by the low two bits
    fn selected_width(self) -> usize {
        1 << (self.code() & WIDTH_MASK)
    }

    pub fn signed(width: usize) -> Result<Self, Error> {
        Self::from_code(BASE_SIGNED | width_bits(width)?)
    }

    pub fn unsigned(width: usize) -> Result<Self, Error> {
        Self::from_code(BASE_UNSIGNED | width_bits(width)?)
    }

    pub fn utf8(len_width: usize) -> Result<Self, Error> {
        Self::from_code(BASE_UTF8 | width_bits(len_width)?)
    }

    pub fn octets(len_width: usize) -> Result<Self, Error> {
        Self::from_code(BASE_OCTETS | width_bits(len_width)?)
    }

    pub fn is_signed(self) -> bool {
        self.base() == BASE_SIGNED
    }

    pub fn is_unsigned(self) -> bool {
        self.base() == BASE_UNSIGNED
    }

    pub fn is_bool(self) -> bool {
        matches!(self, ElementType::False | ElementType::True)
    }

    pub fn is_float(self) -> bool {
        matches!(self, ElementType::F32 | ElementType::F64)
    }

    pub fn is_utf8(self) -> bool {
        self.base() == BASE_UTF8
    }

    pub fn is_octets(self) -> bool {
        self.base() == BASE_OCTETS
    }

    pub fn is_container(self) -> bool {
        matches!(
            self,
            ElementType::Struct | ElementType::Array | ElementType::List
        )
    }

    /// Size of the fixed value body for integers and floats, 0 for everything else
    pub fn value_size(self) -> usize {
        if self.is_signed() || self.is_unsigned() {
            self.selected_width()
        } else {
            match self {
                ElementType::F32 => 4,
                ElementType::F64 => 8,
                _ => 0,
            }
        }
    }

    /// Size of the length prefix for strings, 0 for everything else
    pub fn len_size(self) -> usize {
        if self.is_utf8() || self.is_octets() {
            self.selected_width()
        } else {
            0
        }
    }

    pub fn container(self) -> Option<ContainerType> {
        match self {
            ElementType::Struct => Some(ContainerType::Structure),
            ElementType::Array => Some(ContainerType::Array),
            ElementType::List => Some(ContainerType::List),
            _ => None,
        }
    }
}

fn width_bits(width: usize) -> Result<u8, Error> {
    match width {
        1 => Ok(0),
        2 => Ok(1),
        4 => Ok(2),
        8 => Ok(3),
        _ => Err(Error::MalformedTlv {
            reason: "width must be 1, 2, 4 or 8 bytes",
        }),
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ContainerType {
    Structure,
    Array,
    List,
}

impl ContainerType {
    pub fn element_type(self) -> ElementType {
        match self {
            ContainerType::Structure => ElementType::Struct,
            ContainerType::Array => ElementType::Array,
            ContainerType::List => ElementType::List,
        }
    }
}

pub fn control_byte(class: TagClass, element_type: ElementType) -> u8 {
    class.code() | element_type.code()
}

pub fn split_control(control: u8) -> Result<(TagClass, ElementType), Error> {
    let class = TagClass::from_control(control)?;
    let element_type = ElementType::from_code(control & TYPE_MASK)?;
    Ok((class, element_type))
}

/// A TLV tag. `vendor_id` and `profile_id` are only populated for the
/// fully-qualified classes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    pub class: TagClass,
    pub vendor_id: Option<u16>,
    pub profile_id: Option<u16>,
    pub number: u64,
}

impl Tag {
    pub const fn anonymous() -> Self {
        Tag {
            class: TagClass::Anonymous,
            vendor_id: None,
            profile_id: None,
            number: 0,
        }
    }

    pub const fn context(number: u8) -> Self {
        Tag {
            class: TagClass::Context,
            vendor_id: None,
            profile_id: None,
            number: number as u64,
        }
    }

    pub fn common(number: u32) -> Self {
        let class = if number <= u16::MAX as u32 {
            TagClass::CommonPrf16
        } else {
            TagClass::CommonPrf32
        };
        Tag {
            class,
            vendor_id: None,
            profile_id: None,
            number: number as u64,
        }
    }

    pub fn implicit(number: u32) -> Self {
        let class = if number <= u16::MAX as u32 {
            TagClass::ImplPrf16
        } else {
            TagClass::ImplPrf32
        };
        Tag {
            class,
            vendor_id: None,
            profile_id: None,
            number: number as u64,
        }
    }

    pub fn fully_qualified(vendor_id: u16, profile_id: u16, number: u32) -> Self {
        let class = if number <= u16::MAX as u32 {
            TagClass::FullQual48
        } else {
            TagClass::FullQual64
        };
        Tag {
            class,
            vendor_id: Some(vendor_id),
            profile_id: Some(profile_id),
            number: number as u64,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.class == TagClass::Anonymous
    }

    pub fn is_context(&self, number: u8) -> bool {
        self.class == TagClass::Context && self.number == number as u64
    }

    /// Tag identity used when matching fields: the 16 and 32-bit forms of a
    /// profile or fully-qualified tag with the same number are the same tag.
    pub fn matches(&self, other: &Tag) -> bool {
        self.class.family() == other.class.family()
            && self.vendor_id == other.vendor_id
            && self.profile_id == other.profile_id
            && self.number == other.number
    }

    /// Checks that the populated fields agree with the class
    pub fn validate(&self) -> Result<(), Error> {
        let qualified = matches!(self.class, TagClass::FullQual48 | TagClass::FullQual64);
        let max = match self.class {
            TagClass::Anonymous => 0,
            TagClass::Context => u8::MAX as u64,
            TagClass::CommonPrf16 | TagClass::ImplPrf16 | TagClass::FullQual48 => {
                u16::MAX as u64
            }
            TagClass::CommonPrf32 | TagClass::ImplPrf32 | TagClass::FullQual64 => {
                u32::MAX as u64
            }
        };
        let invalid = |detail| Error::InvalidTag {
            class: self.class,
            detail,
        };

        if self.number > max {
            return Err(invalid("tag number too large for class"));
        }
        if qualified {
            if self.vendor_id.is_none() || self.profile_id.is_none() {
                return Err(invalid("vendor and profile id required"));
            }
        } else if self.vendor_id.is_some() || self.profile_id.is_some() {
            return Err(invalid("vendor and profile id not allowed"));
        }
        Ok(())
    }
}

impl Default for Tag {
    fn default() -> Self {
        Tag::anonymous()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.class {
            TagClass::Anonymous => write!(f, "anon"),
            TagClass::Context => write!(f, "ctx:{}", self.number),
            TagClass::CommonPrf16 | TagClass::CommonPrf32 => write!(f, "common:{}", self.number),
            TagClass::ImplPrf16 | TagClass::ImplPrf32 => write!(f, "implicit:{}", self.number),
            TagClass::FullQual48 | TagClass::FullQual64 => write!(
                f,
                "{:04x}:{:04x}:{}",
                self.vendor_id.unwrap_or_default(),
                self.profile_id.unwrap_or_default(),
                self.number
            ),
        }
    }
}

/// Smallest width in bytes that holds `value`
pub fn unsigned_width(value: u64) -> usize {
    if value <= u8::MAX as u64 {
        1
    } else if value <= u16::MAX as u64 {
        2
    } else if value <= u32::MAX as u64 {
        4
    } else {
        8
    }
}

/// Smallest width in bytes that holds `value` in two's complement
pub fn signed_width(value: i64) -> usize {
    if value >= i8::MIN as i64 && value <= i8::MAX as i64 {
        1
    } else if value >= i16::MIN as i64 && value <= i16::MAX as i64 {
        2
    } else if value >= i32::MIN as i64 && value <= i32::MAX as i64 {
        4
    } else {
        8
    }
}

pub fn read_le_uint(bytes: &[u8]) -> Result<u64, Error> {
    width_bits(bytes.len())?;
    Ok(LittleEndian::read_uint(bytes, bytes.len()))
}

pub fn read_le_int(bytes: &[u8]) -> Result<i64, Error> {
    width_bits(bytes.len())?;
    Ok(LittleEndian::read_int(bytes, bytes.len()))
}

/// `value` as `width` little-endian bytes; `width` must hold the value
pub fn le_uint_bytes(value: u64, width: usize) -> Vec<u8> {
    let mut buf = [0_u8; 8];
    LittleEndian::write_uint(&mut buf, value, width);
    buf[..width].to_vec()
}

pub fn le_int_bytes(value: i64, width: usize) -> Vec<u8> {
    let mut buf = [0_u8; 8];
    LittleEndian::write_int(&mut buf, value, width);
    buf[..width].to_vec()
}

// These versions of string only keep references to data owned elsewhere.
// OctetString is the owned byte string that can also be decoded into.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct UtfStr<'a>(pub &'a str);

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct OctetStr<'a>(pub &'a [u8]);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OctetString(pub Vec<u8>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_byte_split() {
        assert_eq!(control_byte(TagClass::Context, ElementType::U16), 0x25);
        assert_eq!(
            split_control(0x36).unwrap(),
            (TagClass::Context, ElementType::Array)
        );
        assert_eq!(
            split_control(0xe0).unwrap(),
            (TagClass::FullQual64, ElementType::S8)
        );
        assert_eq!(split_control(0x1f), Err(Error::UnknownType { code: 0x1f }));
        assert_eq!(split_control(0x39), Err(Error::UnknownType { code: 0x19 }));
    }

    #[test]
    fn test_type_widths() {
        assert_eq!(ElementType::S32.value_size(), 4);
        assert_eq!(ElementType::U64.value_size(), 8);
        assert_eq!(ElementType::F32.value_size(), 4);
        assert_eq!(ElementType::True.value_size(), 0);
        assert_eq!(ElementType::Utf16l.len_size(), 2);
        assert_eq!(ElementType::Str64l.len_size(), 8);
        assert_eq!(ElementType::U8.len_size(), 0);
        assert_eq!(ElementType::unsigned(4).unwrap(), ElementType::U32);
        assert_eq!(ElementType::octets(2).unwrap(), ElementType::Str16l);
        assert!(ElementType::signed(3).is_err());
    }

    #[test]
    fn test_tag_sizes() {
        let sizes: Vec<usize> = (0..8)
            .map(|i| TagClass::from_control(i << TAG_SHIFT_BITS).unwrap().tag_size())
            .collect();
        assert_eq!(sizes, [0, 1, 2, 4, 2, 4, 6, 8]);
    }

    #[test]
    fn test_tag_validation() {
        assert!(Tag::context(255).validate().is_ok());
        assert!(Tag::fully_qualified(0xfff1, 0xdead, 70000).validate().is_ok());

        let too_big = Tag {
            number: 256,
            ..Tag::context(0)
        };
        assert!(matches!(
            too_big.validate(),
            Err(Error::InvalidTag {
                class: TagClass::Context,
                ..
            })
        ));

        let missing_vendor = Tag {
            class: TagClass::FullQual48,
            vendor_id: None,
            profile_id: Some(1),
            number: 1,
        };
        assert!(missing_vendor.validate().is_err());

        let stray_profile = Tag {
            profile_id: Some(1),
            ..Tag::common(7)
        };
        assert!(stray_profile.validate().is_err());
    }

    #[test]
    fn test_tag_matching() {
        let long_form = Tag {
            class: TagClass::CommonPrf32,
            ..Tag::common(5)
        };
        assert_ne!(long_form, Tag::common(5));
        assert!(long_form.matches(&Tag::common(5)));
        assert!(!Tag::implicit(5).matches(&Tag::common(5)));
        assert!(!Tag::context(5).matches(&Tag::common(5)));
    }

    #[test]
    fn test_integer_fitting() {
        assert_eq!(unsigned_width(255), 1);
        assert_eq!(unsigned_width(256), 2);
        assert_eq!(unsigned_width(u32::MAX as u64 + 1), 8);
        assert_eq!(signed_width(-128), 1);
        assert_eq!(signed_width(-129), 2);
        assert_eq!(signed_width(i32::MIN as i64), 4);
        assert_eq!(signed_width(i64::MIN), 8);
        assert_eq!(le_int_bytes(-2, 2), vec![0xfe, 0xff]);
        assert_eq!(read_le_int(&[0xfe, 0xff]).unwrap(), -2);
        assert_eq!(read_le_uint(&[0x2c, 0x01]).unwrap(), 300);
        assert!(read_le_uint(&[1, 2, 3]).is_err());
    }
}
