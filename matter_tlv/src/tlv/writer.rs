use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use super::{Element, ToTLV};
use crate::{
    error::Error,
    tlv_common::{
        control_byte, signed_width, unsigned_width, ContainerType, ElementType, Tag, TagClass,
        MAX_DEPTH,
    },
};

/// Streaming TLV encoder over a blocking byte sink.
///
/// Integers and length prefixes always take the narrowest encoding that
/// holds the value, so equal inputs give identical bytes. Once an error is
/// returned, every later call returns that error; whatever was written before
/// the failure stays in the sink.
pub struct TLVWriter<'a> {
    sink: &'a mut dyn Write,
    stack: Vec<ContainerType>,
    failed: Option<Error>,
}

impl<'a> TLVWriter<'a> {
    pub fn new(sink: &'a mut dyn Write) -> Self {
        TLVWriter {
            sink,
            stack: Vec::with_capacity(MAX_DEPTH),
            failed: None,
        }
    }

    /// Number of containers currently open
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn guard<F>(&mut self, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Self) -> Result<(), Error>,
    {
        if let Some(e) = self.failed {
            return Err(e);
        }
        let result = f(self);
        if let Err(e) = result {
            self.failed = Some(e);
        }
        result
    }

    fn check_member(&self, tag: &Tag) -> Result<(), Error> {
        match self.stack.last() {
            Some(ContainerType::Structure) if tag.is_anonymous() => Err(Error::InvalidTag {
                class: tag.class,
                detail: "structure members must be tagged",
            }),
            Some(ContainerType::Array) if !tag.is_anonymous() => Err(Error::InvalidTag {
                class: tag.class,
                detail: "array members must be anonymous",
            }),
            _ => Ok(()),
        }
    }

    fn put_control_tag(&mut self, tag: Tag, element_type: ElementType) -> Result<(), Error> {
        tag.validate()?;
        self.check_member(&tag)?;

        let sink = &mut self.sink;
        sink.write_u8(control_byte(tag.class, element_type))?;
        match tag.class {
            TagClass::Anonymous => (),
            TagClass::Context => sink.write_u8(tag.number as u8)?,
            TagClass::CommonPrf16 | TagClass::ImplPrf16 => {
                sink.write_u16::<LittleEndian>(tag.number as u16)?
            }
            TagClass::CommonPrf32 | TagClass::ImplPrf32 => {
                sink.write_u32::<LittleEndian>(tag.number as u32)?
            }
            TagClass::FullQual48 | TagClass::FullQual64 => {
                sink.write_u16::<LittleEndian>(tag.vendor_id.unwrap_or_default())?;
                sink.write_u16::<LittleEndian>(tag.profile_id.unwrap_or_default())?;
                if tag.class == TagClass::FullQual48 {
                    sink.write_u16::<LittleEndian>(tag.number as u16)?;
                } else {
                    sink.write_u32::<LittleEndian>(tag.number as u32)?;
                }
            }
        }
        Ok(())
    }

    pub fn put_signed(&mut self, tag: Tag, data: i64) -> Result<(), Error> {
        self.guard(|tw| {
            let width = signed_width(data);
            tw.put_control_tag(tag, ElementType::signed(width)?)?;
            tw.sink.write_int::<LittleEndian>(data, width)?;
            Ok(())
        })
    }

    pub fn put_unsigned(&mut self, tag: Tag, data: u64) -> Result<(), Error> {
        self.guard(|tw| {
            let width = unsigned_width(data);
            tw.put_control_tag(tag, ElementType::unsigned(width)?)?;
            tw.sink.write_uint::<LittleEndian>(data, width)?;
            Ok(())
        })
    }

    pub fn put_bool(&mut self, tag: Tag, data: bool) -> Result<(), Error> {
        let element_type = if data {
            ElementType::True
        } else {
            ElementType::False
        };
        self.guard(|tw| tw.put_control_tag(tag, element_type))
    }

    pub fn put_null(&mut self, tag: Tag) -> Result<(), Error> {
        self.guard(|tw| tw.put_control_tag(tag, ElementType::Null))
    }

    pub fn put_f32(&mut self, tag: Tag, data: f32) -> Result<(), Error> {
        self.guard(|tw| {
            tw.put_control_tag(tag, ElementType::F32)?;
            tw.sink.write_f32::<LittleEndian>(data)?;
            Ok(())
        })
    }

    pub fn put_f64(&mut self, tag: Tag, data: f64) -> Result<(), Error> {
        self.guard(|tw| {
            tw.put_control_tag(tag, ElementType::F64)?;
            tw.sink.write_f64::<LittleEndian>(data)?;
            Ok(())
        })
    }

    pub fn put_string(&mut self, tag: Tag, data: &str) -> Result<(), Error> {
        self.guard(|tw| tw.put_str(tag, true, data.as_bytes()))
    }

    pub fn put_bytes(&mut self, tag: Tag, data: &[u8]) -> Result<(), Error> {
        self.guard(|tw| tw.put_str(tag, false, data))
    }

    fn put_str(&mut self, tag: Tag, utf8: bool, data: &[u8]) -> Result<(), Error> {
        let len = data.len() as u64;
        if len > u32::MAX as u64 {
            return Err(Error::Overlong { len });
        }
        let width = unsigned_width(len);
        let element_type = if utf8 {
            ElementType::utf8(width)?
        } else {
            ElementType::octets(width)?
        };
        self.put_control_tag(tag, element_type)?;
        self.sink.write_uint::<LittleEndian>(len, width)?;
        self.sink.write_all(data)?;
        Ok(())
    }

    pub fn start_container(&mut self, tag: Tag, container: ContainerType) -> Result<(), Error> {
        self.guard(|tw| {
            if tw.stack.len() >= MAX_DEPTH {
                return Err(Error::NestingTooDeep);
            }
            tw.put_control_tag(tag, container.element_type())?;
            tw.stack.push(container);
            Ok(())
        })
    }

    pub fn put_start_struct(&mut self, tag: Tag) -> Result<(), Error> {
        self.start_container(tag, ContainerType::Structure)
    }

    pub fn put_start_array(&mut self, tag: Tag) -> Result<(), Error> {
        self.start_container(tag, ContainerType::Array)
    }

    pub fn put_start_list(&mut self, tag: Tag) -> Result<(), Error> {
        self.start_container(tag, ContainerType::List)
    }

    pub fn end_container(&mut self) -> Result<(), Error> {
        self.guard(|tw| {
            if tw.stack.is_empty() {
                return Err(Error::UnbalancedContainer);
            }
            tw.sink.write_u8(ElementType::EndCnt.code())?;
            tw.stack.pop();
            Ok(())
        })
    }

    pub fn put_object(&mut self, tag: Tag, object: &dyn ToTLV) -> Result<(), Error> {
        object.to_tlv(self, tag)
    }

    /// Writes `element` and all its children under the element's own tag
    pub fn put_element(&mut self, element: &Element) -> Result<(), Error> {
        self.put_element_as(element.tag, element)
    }

    /// Writes `element` and all its children, replacing the root tag with `tag`
    pub fn put_element_as(&mut self, tag: Tag, element: &Element) -> Result<(), Error> {
        self.guard(|tw| {
            element.validate()?;
            tw.write_tree(tag, element)
        })
    }

    fn write_tree(&mut self, tag: Tag, element: &Element) -> Result<(), Error> {
        let ty = element.element_type;
        if let Some(container) = ty.container() {
            if self.stack.len() >= MAX_DEPTH {
                return Err(Error::NestingTooDeep);
            }
            self.put_control_tag(tag, ty)?;
            self.stack.push(container);
            for child in &element.children {
                self.write_tree(child.tag, child)?;
            }
            self.sink.write_u8(ElementType::EndCnt.code())?;
            self.stack.pop();
            return Ok(());
        }

        if ty.is_signed() {
            let v = element.get_signed()?;
            let width = signed_width(v);
            self.put_control_tag(tag, ElementType::signed(width)?)?;
            self.sink.write_int::<LittleEndian>(v, width)?;
        } else if ty.is_unsigned() {
            let v = element.get_unsigned()?;
            let width = unsigned_width(v);
            self.put_control_tag(tag, ElementType::unsigned(width)?)?;
            self.sink.write_uint::<LittleEndian>(v, width)?;
        } else if ty.is_utf8() || ty.is_octets() {
            self.put_str(tag, ty.is_utf8(), &element.value)?;
        } else {
            // floats, booleans and null are written as they are
            self.put_control_tag(tag, ty)?;
            self.sink.write_all(&element.value)?;
        }
        Ok(())
    }

    /// Flushes the sink. Fails with `Unterminated` if a container is still open.
    pub fn finish(mut self) -> Result<(), Error> {
        self.guard(|tw| {
            if !tw.stack.is_empty() {
                return Err(Error::Unterminated);
            }
            tw.sink.flush()?;
            Ok(())
        })
    }
}
