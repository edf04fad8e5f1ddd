use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use log::info;

use super::Element;
use crate::{
    error::Error,
    tlv_common::{split_control, ElementType, Tag, TagClass, MAX_DEPTH, MAX_ITEM_LEN},
};

/// Streaming TLV decoder over a blocking byte source.
///
/// `read_element` returns one element at a time, including container-open
/// elements (with no children) and the end-of-container marker.
/// `read_container_children` drains the body of the container that was just
/// opened. Once an error is returned, every later call returns that error.
pub struct TLVReader<'a> {
    src: &'a mut dyn Read,
    depth: usize,
    last_open: Option<ElementType>,
    failed: Option<Error>,
}

impl<'a> TLVReader<'a> {
    pub fn new(src: &'a mut dyn Read) -> Self {
        TLVReader {
            src,
            depth: 0,
            last_open: None,
            failed: None,
        }
    }

    fn record<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(e) = &result {
            self.failed = Some(*e);
        }
        result
    }

    fn check(&self) -> Result<(), Error> {
        match self.failed {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn read_element(&mut self) -> Result<Element, Error> {
        self.check()?;
        let result = self.src.read_u8().map_err(Error::from);
        let result = match result {
            Ok(control) => self.read_element_body(control),
            Err(e) => Err(e),
        };
        let element = self.record(result)?;
        self.last_open = if element.is_container() {
            Some(element.element_type)
        } else {
            None
        };
        Ok(element)
    }

    /// Reads elements up to and including the end-of-container marker that
    /// closes the current container. Nested containers are filled in
    /// recursively; the marker itself is not returned.
    pub fn read_container_children(&mut self) -> Result<Vec<Element>, Error> {
        self.check()?;
        let parent = self.last_open.take();
        let result = self.read_children(parent);
        self.record(result)
    }

    /// Reads one element and, if it opens a container, its whole body
    pub fn read_tree(&mut self) -> Result<Element, Error> {
        let mut element = self.read_element()?;
        if element.is_end_of_container() {
            return self.record(Err(Error::UnbalancedContainer));
        }
        if element.is_container() {
            element.children = self.read_container_children()?;
        }
        Ok(element)
    }

    fn read_element_body(&mut self, control: u8) -> Result<Element, Error> {
        let (class, element_type) = split_control(control)?;
        if element_type == ElementType::EndCnt && class != TagClass::Anonymous {
            return Err(Error::InvalidTag {
                class,
                detail: "end of container cannot carry a tag",
            });
        }
        let tag = self.read_tag(class)?;
        let value = self.read_value(element_type)?;
        Ok(Element::new(tag, element_type, value))
    }

    fn read_tag(&mut self, class: TagClass) -> Result<Tag, Error> {
        let src = &mut self.src;
        let (vendor_id, profile_id, number) = match class {
            TagClass::Anonymous => (None, None, 0),
            TagClass::Context => (None, None, src.read_u8()? as u64),
            TagClass::CommonPrf16 | TagClass::ImplPrf16 => {
                (None, None, src.read_u16::<LittleEndian>()? as u64)
            }
            TagClass::CommonPrf32 | TagClass::ImplPrf32 => {
                (None, None, src.read_u32::<LittleEndian>()? as u64)
            }
            TagClass::FullQual48 => {
                let vendor = src.read_u16::<LittleEndian>()?;
                let profile = src.read_u16::<LittleEndian>()?;
                let number = src.read_u16::<LittleEndian>()? as u64;
                (Some(vendor), Some(profile), number)
            }
            TagClass::FullQual64 => {
                let vendor = src.read_u16::<LittleEndian>()?;
                let profile = src.read_u16::<LittleEndian>()?;
                let number = src.read_u32::<LittleEndian>()? as u64;
                (Some(vendor), Some(profile), number)
            }
        };
        Ok(Tag {
            class,
            vendor_id,
            profile_id,
            number,
        })
    }

    fn read_value(&mut self, element_type: ElementType) -> Result<Vec<u8>, Error> {
        let size = element_type.value_size();
        if size > 0 {
            let mut value = vec![0; size];
            self.src.read_exact(&mut value)?;
            return Ok(value);
        }

        let len_size = element_type.len_size();
        if len_size == 0 {
            return Ok(Vec::new());
        }
        let len = self.src.read_uint::<LittleEndian>(len_size)?;
        if len > MAX_ITEM_LEN {
            return Err(Error::OversizedItem { reported_len: len });
        }
        // Grow with the data actually present instead of trusting the prefix
        let mut value = Vec::new();
        let read = (&mut self.src).take(len).read_to_end(&mut value)?;
        if (read as u64) < len {
            return Err(Error::UnexpectedEOF);
        }
        Ok(value)
    }

    fn read_children(&mut self, parent: Option<ElementType>) -> Result<Vec<Element>, Error> {
        if self.depth >= MAX_DEPTH {
            return Err(Error::NestingTooDeep);
        }
        self.depth += 1;

        let mut children = Vec::new();
        loop {
            let control = match self.src.read_u8() {
                Ok(c) => c,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(Error::UnbalancedContainer)
                }
                Err(e) => return Err(e.into()),
            };
            let mut element = self.read_element_body(control)?;
            if element.is_end_of_container() {
                break;
            }
            check_member(parent, &element)?;
            if element.is_container() {
                element.children = self.read_children(Some(element.element_type))?;
            }
            children.push(element);
        }

        self.depth -= 1;
        Ok(children)
    }
}

fn check_member(parent: Option<ElementType>, element: &Element) -> Result<(), Error> {
    let anonymous = element.tag.is_anonymous();
    match parent {
        Some(ElementType::Struct) if anonymous => Err(Error::MalformedTlv {
            reason: "structure member with anonymous tag",
        }),
        Some(ElementType::Array) if !anonymous => Err(Error::MalformedTlv {
            reason: "array member with a tag",
        }),
        _ => Ok(()),
    }
}

/// Decodes exactly one element tree from `b`; bytes left after it are an error
pub fn parse(b: &[u8]) -> Result<Element, Error> {
    let mut rest = b;
    let root = TLVReader::new(&mut rest).read_tree()?;
    if !rest.is_empty() {
        return Err(Error::MalformedTlv {
            reason: "trailing bytes after the root element",
        });
    }
    Ok(root)
}

pub fn get_root_node_struct(b: &[u8]) -> Result<Element, Error> {
    let root = parse(b)?;
    root.confirm_struct()?;
    Ok(root)
}

pub fn get_root_node_list(b: &[u8]) -> Result<Element, Error> {
    let root = parse(b)?;
    root.confirm_list()?;
    Ok(root)
}

/// Logs every element of `b` on its own line, indented by nesting level.
/// Stops at the first element that cannot be decoded.
pub fn print_tlv_list(b: &[u8]) {
    let mut rest = b;
    let mut depth: usize = 0;

    info!("TLV list:");
    while !rest.is_empty() {
        match TLVReader::new(&mut rest).read_element() {
            Ok(element) => {
                if element.is_end_of_container() {
                    depth = depth.saturating_sub(1);
                }
                info!("{:indent$}{}", "", element, indent = depth * 2);
                if element.is_container() {
                    depth += 1;
                }
            }
            Err(e) => {
                info!("<decoding stopped: {}>", e);
                break;
            }
        }
    }
    info!("---------");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_over(b: &[u8]) -> Vec<Result<Element, Error>> {
        let mut src = b;
        let mut reader = TLVReader::new(&mut src);
        let mut out = Vec::new();
        for _ in 0..32 {
            let r = reader.read_element();
            let stop = r.is_err();
            out.push(r);
            if stop {
                break;
            }
        }
        out
    }

    #[test]
    fn test_short_length_tag() {
        // The 0x36 is an array with a tag, but we leave out the tag field
        let out = reader_over(&[0x15, 0x36]);
        assert!(out[0].is_ok());
        assert_eq!(out[1], Err(Error::UnexpectedEOF));
    }

    #[test]
    fn test_short_length_value_immediate() {
        // The 0x24 is a a tagged integer, here we leave out the integer value
        let out = reader_over(&[0x15, 0x24, 0x0]);
        assert_eq!(out[1], Err(Error::UnexpectedEOF));
    }

    #[test]
    fn test_short_length_value_string() {
        // This is a tagged string, with tag 0 and length 0xb, but we only have 4 bytes in the string
        let out = reader_over(&[0x15, 0x30, 0x00, 0x0b, 0x73, 0x6d, 0x61, 0x72]);
        assert_eq!(out[1], Err(Error::UnexpectedEOF));
    }

    #[test]
    fn test_valid_tag() {
        // The 0x36 is an array with a tag, here tag is 0
        let out = reader_over(&[0x15, 0x36, 0x0]);
        assert_eq!(
            out[1],
            Ok(Element::new(Tag::context(0), ElementType::Array, vec![]))
        );
    }

    #[test]
    fn test_valid_value_string() {
        // This is a tagged string, with tag 5 and length 4, and we have 4 bytes in the string
        let out = reader_over(&[0x15, 0x30, 0x5, 0x04, 0x73, 0x6d, 0x61, 0x72]);
        assert_eq!(
            out[1],
            Ok(Element::octets(Tag::context(5), &[0x73, 0x6d, 0x61, 0x72]))
        );
    }

    #[test]
    fn test_errors_are_sticky() {
        let b = [0x1f, 0x24, 0x01, 0x02];
        let mut src = &b[..];
        let mut reader = TLVReader::new(&mut src);
        assert_eq!(reader.read_element(), Err(Error::UnknownType { code: 0x1f }));
        assert_eq!(reader.read_element(), Err(Error::UnknownType { code: 0x1f }));
        assert_eq!(
            reader.read_container_children(),
            Err(Error::UnknownType { code: 0x1f })
        );
    }

    #[test]
    fn test_all_tag_classes() {
        let b = [
            0x04, 0x01, // anonymous
            0x24, 0x07, 0x02, // context 7
            0x44, 0x34, 0x12, 0x03, // common 0x1234
            0x64, 0x78, 0x56, 0x34, 0x12, 0x04, // common 0x12345678
            0x84, 0x01, 0x00, 0x05, // implicit 1
            0xa4, 0x00, 0x00, 0x01, 0x00, 0x06, // implicit 0x10000
            0xc4, 0xf1, 0xff, 0xad, 0xde, 0x02, 0x00, 0x07, // fully qualified 6
            0xe4, 0xf1, 0xff, 0xad, 0xde, 0x00, 0x00, 0x02, 0x00, 0x08, // fully qualified 8
        ];
        let tags: Vec<Tag> = reader_over(&b)
            .into_iter()
            .filter_map(|r| r.ok())
            .map(|e| e.tag)
            .collect();
        assert_eq!(
            tags,
            vec![
                Tag::anonymous(),
                Tag::context(7),
                Tag::common(0x1234),
                Tag::common(0x12345678),
                Tag::implicit(1),
                Tag::implicit(0x10000),
                Tag::fully_qualified(0xfff1, 0xdead, 2),
                Tag::fully_qualified(0xfff1, 0xdead, 0x20000),
            ]
        );
    }

    #[test]
    fn test_floats_and_wide_lengths() {
        let mut b = vec![0x0a];
        b.extend_from_slice(&1.5_f32.to_le_bytes());
        b.push(0x0b);
        b.extend_from_slice(&(-0.25_f64).to_le_bytes());
        // UTF-8 string with an 8 byte length prefix
        b.extend_from_slice(&[0x0f, 0x02, 0, 0, 0, 0, 0, 0, 0, b'h', b'i']);
        let out = reader_over(&b);
        assert_eq!(out[0].as_ref().unwrap().get_f32(), Ok(1.5));
        assert_eq!(out[1].as_ref().unwrap().get_f64(), Ok(-0.25));
        assert_eq!(out[2].as_ref().unwrap().get_str(), Ok("hi"));
        assert_eq!(out[3], Err(Error::UnexpectedEOF));
    }

    #[test]
    fn test_oversized_length() {
        let b = [0x12, 0x00, 0x00, 0x00, 0x80];
        let out = reader_over(&b);
        assert_eq!(
            out[0],
            Err(Error::OversizedItem {
                reported_len: 0x8000_0000
            })
        );
    }

    #[test]
    fn test_tagged_end_of_container() {
        let out = reader_over(&[0x38, 0x01]);
        assert!(matches!(out[0], Err(Error::InvalidTag { .. })));
    }

    #[test]
    fn test_complex_structure_invoke_cmd() {
        // This is what we typically get in an invoke command
        let b = [
            0x15, 0x36, 0x0, 0x15, 0x37, 0x0, 0x24, 0x0, 0x2, 0x24, 0x2, 0x6, 0x24, 0x3, 0x1, 0x18,
            0x35, 0x1, 0x18, 0x18, 0x18, 0x18,
        ];

        let root = get_root_node_struct(&b).unwrap();
        let cmd_list = root.find_ctx(0).unwrap().confirm_array().unwrap();
        assert_eq!(cmd_list.children.len(), 1);

        // This is an array of CommandDataIB, but we'll only use the first element
        let cmd_data_ib = &cmd_list.children[0];
        let cmd_path = cmd_data_ib.find_ctx(0).unwrap().confirm_list().unwrap();
        assert_eq!(cmd_path.find_ctx(0).unwrap().get_unsigned(), Ok(2));
        assert_eq!(cmd_path.find_ctx(2).unwrap().get_unsigned(), Ok(6));
        assert_eq!(cmd_path.find_ctx(3).unwrap().get_unsigned(), Ok(1));
        assert_eq!(cmd_path.find_ctx(1), None);

        // This is the variable of the invoke command
        let fields = cmd_data_ib.find_ctx(1).unwrap().confirm_struct().unwrap();
        assert!(fields.children.is_empty());
    }

    #[test]
    fn test_stream_elements_then_drain() {
        let b = [0x15, 0x35, 0x0, 0x24, 0x1, 0x2, 0x18, 0x24, 0x0, 0x2, 0x18];
        let mut src = &b[..];
        let mut reader = TLVReader::new(&mut src);
        let root = reader.read_element().unwrap();
        assert_eq!(root.element_type, ElementType::Struct);
        let children = reader.read_container_children().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].children, vec![Element::unsigned(Tag::context(1), 2)]);
        assert_eq!(children[1], Element::unsigned(Tag::context(0), 2));
        // Source is drained, the next read hits the end
        assert_eq!(reader.read_element(), Err(Error::UnexpectedEOF));
    }

    #[test]
    fn test_unbalanced_containers() {
        assert_eq!(parse(&[0x15, 0x24, 0x01, 0x02]), Err(Error::UnbalancedContainer));
        assert_eq!(parse(&[0x18]), Err(Error::UnbalancedContainer));
        assert!(parse(&[0x15, 0x18, 0x18]).is_err());
    }

    #[test]
    fn test_member_tag_rules() {
        // anonymous member inside a structure
        assert!(matches!(
            parse(&[0x15, 0x04, 0x01, 0x18]),
            Err(Error::MalformedTlv { .. })
        ));
        // tagged member inside an array
        assert!(matches!(
            parse(&[0x16, 0x24, 0x01, 0x01, 0x18]),
            Err(Error::MalformedTlv { .. })
        ));
        // lists take anything
        assert!(parse(&[0x17, 0x24, 0x01, 0x01, 0x04, 0x02, 0x18]).is_ok());
    }

    #[test]
    fn test_nesting_limit() {
        let mut b = vec![0x16; MAX_DEPTH];
        b.extend(vec![0x18; MAX_DEPTH]);
        assert!(parse(&b).is_ok());

        let mut b = vec![0x16; MAX_DEPTH + 1];
        b.extend(vec![0x18; MAX_DEPTH + 1]);
        assert_eq!(parse(&b), Err(Error::NestingTooDeep));
    }
}
