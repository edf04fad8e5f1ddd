use std::convert::TryFrom;
use std::io::{Read, Write};

use log::{debug, warn};

use super::{parse, Element, TLVReader, TLVWriter};
use crate::{
    error::Error,
    tlv_common::{ContainerType, OctetStr, OctetString, Tag, UtfStr},
};

pub trait ToTLV {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: Tag) -> Result<(), Error>;

    /// True when there is no value to write, in which case an optional
    /// structure field is left out
    fn is_absent(&self) -> bool {
        false
    }
}

pub trait FromTLV: Sized {
    fn from_tlv(element: &Element) -> Result<Self, Error>;

    /// Value to use when an optional field's tag is not on the wire
    fn tlv_not_found(tag: Tag) -> Result<Self, Error> {
        Err(Error::MissingField { tag })
    }
}

/// Writes one structure field, honouring the field's `optional` modifier
pub fn put_field<T: ToTLV + ?Sized>(
    tw: &mut TLVWriter,
    tag: Tag,
    value: &T,
    optional: bool,
) -> Result<(), Error> {
    if value.is_absent() {
        if optional {
            return Ok(());
        }
        return Err(Error::MissingField { tag });
    }
    value.to_tlv(tw, tag)
}

macro_rules! totlv_for {
    ($put:ident, $wide:ty, $($t:ident)*) => {
        $(
            impl ToTLV for $t {
                fn to_tlv(&self, tw: &mut TLVWriter, tag: Tag) -> Result<(), Error> {
                    tw.$put(tag, *self as $wide)
                }
            }
        )*
    };
}

macro_rules! fromtlv_for {
    ($get:ident, $($t:ident)*) => {
        $(
            impl FromTLV for $t {
                fn from_tlv(element: &Element) -> Result<Self, Error> {
                    let v = element.$get()?;
                    $t::try_from(v).map_err(|_| Error::Overflow {
                        value: v as i128,
                        target_width: $t::BITS as u8,
                    })
                }
            }
        )*
    };
}

// Generate ToTLV and FromTLV for standard data types
totlv_for!(put_signed, i64, i8 i16 i32 i64);
totlv_for!(put_unsigned, u64, u8 u16 u32 u64);
fromtlv_for!(get_signed, i8 i16 i32 i64);
fromtlv_for!(get_unsigned, u8 u16 u32 u64);

impl ToTLV for bool {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: Tag) -> Result<(), Error> {
        tw.put_bool(tag, *self)
    }
}

impl FromTLV for bool {
    fn from_tlv(element: &Element) -> Result<Self, Error> {
        element.get_bool()
    }
}

impl ToTLV for f32 {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: Tag) -> Result<(), Error> {
        tw.put_f32(tag, *self)
    }
}

impl FromTLV for f32 {
    fn from_tlv(element: &Element) -> Result<Self, Error> {
        element.get_f32()
    }
}

impl ToTLV for f64 {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: Tag) -> Result<(), Error> {
        tw.put_f64(tag, *self)
    }
}

impl FromTLV for f64 {
    fn from_tlv(element: &Element) -> Result<Self, Error> {
        element.get_f64()
    }
}

impl ToTLV for str {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: Tag) -> Result<(), Error> {
        tw.put_string(tag, self)
    }
}

impl ToTLV for String {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: Tag) -> Result<(), Error> {
        tw.put_string(tag, self)
    }
}

impl FromTLV for String {
    fn from_tlv(element: &Element) -> Result<Self, Error> {
        Ok(element.get_str()?.to_owned())
    }
}

impl<'a> ToTLV for UtfStr<'a> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: Tag) -> Result<(), Error> {
        tw.put_string(tag, self.0)
    }
}

impl<'a> ToTLV for OctetStr<'a> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: Tag) -> Result<(), Error> {
        tw.put_bytes(tag, self.0)
    }
}

impl ToTLV for OctetString {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: Tag) -> Result<(), Error> {
        tw.put_bytes(tag, &self.0)
    }
}

impl FromTLV for OctetString {
    fn from_tlv(element: &Element) -> Result<Self, Error> {
        Ok(OctetString(element.get_slice()?.to_vec()))
    }
}

impl<T: ToTLV> ToTLV for [T] {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: Tag) -> Result<(), Error> {
        tw.put_start_array(tag)?;
        for i in self {
            i.to_tlv(tw, Tag::anonymous())?;
        }
        tw.end_container()
    }
}

impl<T: ToTLV, const N: usize> ToTLV for [T; N] {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: Tag) -> Result<(), Error> {
        self[..].to_tlv(tw, tag)
    }
}

impl<T: ToTLV> ToTLV for Vec<T> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: Tag) -> Result<(), Error> {
        self.as_slice().to_tlv(tw, tag)
    }
}

impl<T: FromTLV> FromTLV for Vec<T> {
    fn from_tlv(element: &Element) -> Result<Self, Error> {
        if element.confirm_array().is_err() && element.confirm_list().is_err() {
            return Err(Error::TypeMismatch {
                expected: "array",
                actual: element.element_type,
            });
        }
        element.iter().map(T::from_tlv).collect()
    }
}

impl<T: ToTLV + ?Sized> ToTLV for &T {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: Tag) -> Result<(), Error> {
        (**self).to_tlv(tw, tag)
    }

    fn is_absent(&self) -> bool {
        (**self).is_absent()
    }
}

impl<T: ToTLV + ?Sized> ToTLV for Box<T> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: Tag) -> Result<(), Error> {
        (**self).to_tlv(tw, tag)
    }

    fn is_absent(&self) -> bool {
        (**self).is_absent()
    }
}

impl<T: FromTLV> FromTLV for Box<T> {
    fn from_tlv(element: &Element) -> Result<Self, Error> {
        T::from_tlv(element).map(Box::new)
    }

    fn tlv_not_found(tag: Tag) -> Result<Self, Error> {
        T::tlv_not_found(tag).map(Box::new)
    }
}

// `None` can only be left out by `put_field` for an optional structure
// field; anywhere else there is nothing to write in its place
impl<T: ToTLV> ToTLV for Option<T> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: Tag) -> Result<(), Error> {
        match self {
            Some(s) => s.to_tlv(tw, tag),
            None => Err(Error::MissingField { tag }),
        }
    }

    fn is_absent(&self) -> bool {
        self.is_none()
    }
}

impl<T: FromTLV> FromTLV for Option<T> {
    fn from_tlv(element: &Element) -> Result<Self, Error> {
        if element.is_null() {
            return Ok(None);
        }
        T::from_tlv(element).map(Some)
    }

    fn tlv_not_found(_tag: Tag) -> Result<Self, Error> {
        Ok(None)
    }
}

/// A value that is present on the wire but may be Null
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nullable<T> {
    Null,
    NotNull(T),
}

impl<T> Nullable<T> {
    pub fn is_null(&self) -> bool {
        matches!(self, Nullable::Null)
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Nullable::Null => None,
            Nullable::NotNull(v) => Some(v),
        }
    }
}

impl<T> Default for Nullable<T> {
    fn default() -> Self {
        Nullable::Null
    }
}

impl<T: ToTLV> ToTLV for Nullable<T> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: Tag) -> Result<(), Error> {
        match self {
            Nullable::Null => tw.put_null(tag),
            Nullable::NotNull(v) => v.to_tlv(tw, tag),
        }
    }
}

impl<T: FromTLV> FromTLV for Nullable<T> {
    fn from_tlv(element: &Element) -> Result<Self, Error> {
        if element.is_null() {
            return Ok(Nullable::Null);
        }
        T::from_tlv(element).map(Nullable::NotNull)
    }
}

impl ToTLV for Element {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: Tag) -> Result<(), Error> {
        tw.put_element_as(tag, self)
    }
}

impl FromTLV for Element {
    fn from_tlv(element: &Element) -> Result<Self, Error> {
        Ok(element.clone())
    }
}

fn container_name(container: ContainerType) -> &'static str {
    match container {
        ContainerType::Structure => "structure",
        ContainerType::Array => "array",
        ContainerType::List => "list",
    }
}

/// Field lookup over the children of a decoded structure or list.
///
/// Fields are matched by tag in whatever order they arrive. Tags nobody asks
/// for are ignored. A repeated tag resolves to its first occurrence, or fails
/// with `DuplicateField` in strict mode.
pub struct StructReader<'a> {
    element: &'a Element,
    strict: bool,
}

impl<'a> StructReader<'a> {
    pub fn new(element: &'a Element, container: ContainerType, strict: bool) -> Result<Self, Error> {
        if element.element_type != container.element_type() {
            return Err(Error::TypeMismatch {
                expected: container_name(container),
                actual: element.element_type,
            });
        }
        Ok(StructReader { element, strict })
    }

    pub fn element(&self) -> &'a Element {
        self.element
    }

    fn lookup(&self, tag: &Tag) -> Result<Option<&'a Element>, Error> {
        let mut found = self.element.iter().filter(|c| c.tag.matches(tag));
        let first = found.next();
        if first.is_some() && found.next().is_some() {
            if self.strict {
                warn!("Rejecting duplicate field {}", tag);
                return Err(Error::DuplicateField { tag: *tag });
            }
            debug!("Ignoring duplicates of field {}", tag);
        }
        Ok(first)
    }

    pub fn required<T: FromTLV>(&self, tag: Tag) -> Result<T, Error> {
        match self.lookup(&tag)? {
            Some(e) => T::from_tlv(e),
            None => Err(Error::MissingField { tag }),
        }
    }

    pub fn optional<T: FromTLV>(&self, tag: Tag) -> Result<T, Error> {
        match self.lookup(&tag)? {
            Some(e) => T::from_tlv(e),
            None => T::tlv_not_found(tag),
        }
    }

    pub fn or_else<T: FromTLV, F: FnOnce() -> T>(&self, tag: Tag, default: F) -> Result<T, Error> {
        match self.lookup(&tag)? {
            Some(e) => T::from_tlv(e),
            None => Ok(default()),
        }
    }

    /// Union discriminant: context tag 0 in a structure, the leading
    /// anonymous unsigned integer in a list
    pub fn discriminant(&self) -> Result<u64, Error> {
        if self.element.confirm_list().is_ok() {
            return match self.element.children.first() {
                Some(first) if first.tag.is_anonymous() => first.get_unsigned(),
                _ => Err(Error::MissingField {
                    tag: Tag::anonymous(),
                }),
            };
        }
        self.required::<u64>(Tag::context(0))
    }

    /// Logs the tags that `known` does not cover
    pub fn ignore_unknown(&self, known: &[Tag]) {
        for child in self.element.iter() {
            if child.tag.is_anonymous() {
                continue;
            }
            if !known.iter().any(|k| k.matches(&child.tag)) {
                debug!("Ignoring unknown field {}", child.tag);
            }
        }
    }
}

/// Encodes `value` under an anonymous tag into a new buffer
pub fn encode<T: ToTLV + ?Sized>(value: &T) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    encode_into(&mut out, value)?;
    Ok(out)
}

pub fn encode_into<T: ToTLV + ?Sized>(sink: &mut dyn Write, value: &T) -> Result<(), Error> {
    let mut tw = TLVWriter::new(sink);
    value.to_tlv(&mut tw, Tag::anonymous())?;
    tw.finish()
}

/// Decodes one value from `b`, which must hold exactly one root element
pub fn decode<T: FromTLV>(b: &[u8]) -> Result<T, Error> {
    T::from_tlv(&parse(b)?)
}

/// Decodes one value from the source, leaving whatever follows it unread
pub fn decode_from<T: FromTLV>(src: &mut dyn Read) -> Result<T, Error> {
    let root = TLVReader::new(src).read_tree()?;
    T::from_tlv(&root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tlv_common::ElementType;

    #[test]
    fn test_integer_narrowing() {
        let e = Element::unsigned(Tag::context(1), 511);
        assert_eq!(u16::from_tlv(&e), Ok(511));
        assert_eq!(
            u8::from_tlv(&e),
            Err(Error::Overflow {
                value: 511,
                target_width: 8
            })
        );

        let e = Element::signed(Tag::context(1), -200);
        assert_eq!(i16::from_tlv(&e), Ok(-200));
        assert!(matches!(i8::from_tlv(&e), Err(Error::Overflow { .. })));
        assert!(matches!(
            u16::from_tlv(&e),
            Err(Error::TypeMismatch {
                actual: ElementType::S16,
                ..
            })
        ));
    }

    #[test]
    fn test_slices_are_arrays() {
        assert_eq!(encode(&[1_u8, 2_u8]).unwrap(), [0x16, 0x04, 0x01, 0x04, 0x02, 0x18]);
        let v: Vec<u8> = decode(&[0x16, 0x04, 0x01, 0x04, 0x02, 0x18]).unwrap();
        assert_eq!(v, vec![1, 2]);
        // Lists are accepted as well
        let v: Vec<u8> = decode(&[0x17, 0x04, 0x01, 0x18]).unwrap();
        assert_eq!(v, vec![1]);
    }

    #[test]
    fn test_strings() {
        let bytes = encode("hi").unwrap();
        assert_eq!(bytes, [0x0c, 0x02, b'h', b'i']);
        assert_eq!(decode::<String>(&bytes), Ok("hi".to_string()));
        assert_eq!(decode::<String>(&[0x0c, 0x01, 0xff]), Err(Error::InvalidUtf8));

        let bytes = encode(&OctetStr(&[0xde, 0xad])).unwrap();
        assert_eq!(bytes, [0x10, 0x02, 0xde, 0xad]);
        assert_eq!(
            decode::<OctetString>(&bytes),
            Ok(OctetString(vec![0xde, 0xad]))
        );
        assert!(decode::<String>(&bytes).is_err());
    }

    #[test]
    fn test_nullable_and_option() {
        assert_eq!(encode(&Nullable::<u8>::Null).unwrap(), [0x14]);
        assert_eq!(decode::<Nullable<u8>>(&[0x14]), Ok(Nullable::Null));
        assert_eq!(decode::<Nullable<u8>>(&[0x04, 0x07]), Ok(Nullable::NotNull(7)));
        assert_eq!(decode::<Option<u8>>(&[0x14]), Ok(None));
        assert_eq!(Option::<u8>::tlv_not_found(Tag::context(1)), Ok(None));
        assert_eq!(
            u8::tlv_not_found(Tag::context(1)),
            Err(Error::MissingField {
                tag: Tag::context(1)
            })
        );
    }

    #[test]
    fn test_put_field_absent() {
        let mut out = Vec::new();
        let mut tw = TLVWriter::new(&mut out);
        tw.put_start_struct(Tag::anonymous()).unwrap();
        put_field(&mut tw, Tag::context(1), &None::<u8>, true).unwrap();
        assert_eq!(
            put_field(&mut tw, Tag::context(2), &None::<u8>, false),
            Err(Error::MissingField {
                tag: Tag::context(2)
            })
        );
    }

    #[test]
    fn test_none_outside_optional_field() {
        assert_eq!(
            encode(&None::<u8>),
            Err(Error::MissingField {
                tag: Tag::anonymous()
            })
        );
        assert_eq!(
            encode(&vec![None, Some(1_u8)]),
            Err(Error::MissingField {
                tag: Tag::anonymous()
            })
        );
        assert_eq!(
            encode(&Box::new(None::<u8>)),
            Err(Error::MissingField {
                tag: Tag::anonymous()
            })
        );
        assert_eq!(
            encode(&vec![Some(2_u8), Some(1)]).unwrap(),
            [0x16, 0x04, 0x02, 0x04, 0x01, 0x18]
        );
        assert_eq!(
            decode::<Vec<Option<u8>>>(&[0x16, 0x14, 0x04, 0x01, 0x18]),
            Ok(vec![None, Some(1)])
        );
    }

    #[test]
    fn test_struct_reader() {
        let root = Element::container(
            Tag::anonymous(),
            ContainerType::Structure,
            vec![
                Element::unsigned(Tag::context(2), 9),
                Element::unsigned(Tag::context(1), 5),
                Element::unsigned(Tag::context(1), 6),
                Element::utf8(Tag::context(40), "unknown"),
            ],
        );
        let fields = StructReader::new(&root, ContainerType::Structure, false).unwrap();
        assert_eq!(fields.required::<u8>(Tag::context(1)), Ok(5));
        assert_eq!(fields.required::<u32>(Tag::context(2)), Ok(9));
        assert_eq!(fields.optional::<Option<u8>>(Tag::context(3)), Ok(None));
        assert_eq!(fields.or_else(Tag::context(3), || 77_u8), Ok(77));
        assert_eq!(
            fields.required::<u8>(Tag::context(3)),
            Err(Error::MissingField {
                tag: Tag::context(3)
            })
        );
        fields.ignore_unknown(&[Tag::context(1), Tag::context(2)]);

        let strict = StructReader::new(&root, ContainerType::Structure, true).unwrap();
        assert_eq!(
            strict.required::<u8>(Tag::context(1)),
            Err(Error::DuplicateField {
                tag: Tag::context(1)
            })
        );

        assert!(matches!(
            StructReader::new(&root, ContainerType::List, false),
            Err(Error::TypeMismatch {
                expected: "list",
                ..
            })
        ));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        assert!(matches!(
            decode::<u8>(&[0x04, 0x01, 0x04]),
            Err(Error::MalformedTlv { .. })
        ));
        let mut src: &[u8] = &[0x04, 0x01, 0x04, 0x02];
        assert_eq!(decode_from::<u8>(&mut src), Ok(1));
        assert_eq!(decode_from::<u8>(&mut src), Ok(2));
    }

    #[test]
    fn test_element_passthrough() {
        let bytes = [0x15, 0x24, 0x01, 0x05, 0x36, 0x02, 0x04, 0x01, 0x18, 0x18];
        let e: Element = decode(&bytes).unwrap();
        assert_eq!(encode(&e).unwrap(), bytes);
    }
}
