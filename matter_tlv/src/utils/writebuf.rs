use std::io;

/// A byte sink over a caller-provided buffer of fixed size.
///
/// Unlike writing into a bare `&mut [u8]`, the buffer stays borrowed whole,
/// so the encoded bytes can be read back with `as_slice` and the buffer
/// reused after `reset`. Once it is full, writes make no progress and the
/// TLV writer reports `Error::NoSpace`.
pub struct WriteBuf<'a> {
    buf: &'a mut [u8],
    end: usize,
}

impl<'a> WriteBuf<'a> {
    pub fn new(buf: &'a mut [u8]) -> WriteBuf<'a> {
        WriteBuf { buf, end: 0 }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.end]
    }

    pub fn len(&self) -> usize {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn reset(&mut self) {
        self.end = 0;
    }
}

impl<'a> io::Write for WriteBuf<'a> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = self.buf.len() - self.end;
        let len = data.len().min(room);
        self.buf[self.end..self.end + len].copy_from_slice(&data[..len]);
        self.end += len;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::WriteBuf;
    use crate::{error::Error, tlv, tlv_common::Tag};

    #[test]
    fn test_encode_into_fixed_buffer() {
        let mut buf = [0_u8; 8];
        let mut wb = WriteBuf::new(&mut buf);
        tlv::encode_into(&mut wb, &vec![1_u16, 300]).unwrap();
        assert_eq!(wb.as_slice(), [0x16, 0x04, 0x01, 0x05, 0x2c, 0x01, 0x18]);
        assert_eq!(wb.len(), 7);

        wb.reset();
        assert!(wb.is_empty());
        assert_eq!(wb.capacity(), 8);

        // The same buffer takes the next message
        tlv::encode_into(&mut wb, &true).unwrap();
        assert_eq!(wb.as_slice(), [0x09]);
    }

    #[test]
    fn test_no_space() {
        let mut buf = [0_u8; 4];
        let mut wb = WriteBuf::new(&mut buf);
        assert_eq!(tlv::encode_into(&mut wb, "hello"), Err(Error::NoSpace));
        // Partial output stays in the buffer
        assert_eq!(wb.as_slice(), [0x0c, 0x05, b'h', b'e']);

        let mut buf = [0_u8; 1];
        let mut wb = WriteBuf::new(&mut buf);
        let mut tw = tlv::TLVWriter::new(&mut wb);
        assert_eq!(tw.put_unsigned(Tag::context(1), 1), Err(Error::NoSpace));
    }
}
