// marshal.rs — tagged binary codec primitives
//
// Every multi-byte value is little-endian. There is no implicit coercion:
// each call site reads exactly the width it wrote. Strings and blobs are
// u32-length-prefixed.

use std::io::{Read, Write};

use crate::error::{SaveError, SaveResult};

/// Longest length-prefixed value we accept. No real save data comes close;
/// a prefix above this is a corrupt file, and refusing it up front keeps
/// corruption from forcing a multi-gigabyte allocation.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Write half of the codec. Wraps any io::Write.
pub struct Writer<'a> {
    out: &'a mut dyn Write,
}

impl<'a> Writer<'a> {
    pub fn new(out: &'a mut dyn Write) -> Writer<'a> {
        Writer { out }
    }

    pub fn write_u8(&mut self, v: u8) -> SaveResult<()> {
        self.out.write_all(&[v])?;
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16) -> SaveResult<()> {
        self.out.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> SaveResult<()> {
        self.out.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    pub fn write_i32(&mut self, v: i32) -> SaveResult<()> {
        self.out.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    pub fn write_bool(&mut self, v: bool) -> SaveResult<()> {
        self.write_u8(v as u8)
    }

    pub fn write_string(&mut self, s: &str) -> SaveResult<()> {
        self.write_u32(s.len() as u32)?;
        self.out.write_all(s.as_bytes())?;
        Ok(())
    }

    pub fn write_blob(&mut self, b: &[u8]) -> SaveResult<()> {
        self.write_u32(b.len() as u32)?;
        self.out.write_all(b)?;
        Ok(())
    }

    pub fn write_raw(&mut self, b: &[u8]) -> SaveResult<()> {
        self.out.write_all(b)?;
        Ok(())
    }
}

/// Read half of the codec. Running out of bytes mid-value is UnexpectedEof.
pub struct Reader<'a> {
    inp: &'a mut dyn Read,
}

impl<'a> Reader<'a> {
    pub fn new(inp: &'a mut dyn Read) -> Reader<'a> {
        Reader { inp }
    }

    fn fill(&mut self, buf: &mut [u8]) -> SaveResult<()> {
        self.inp.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                SaveError::UnexpectedEof
            } else {
                SaveError::Io(e)
            }
        })
    }

    pub fn read_u8(&mut self) -> SaveResult<u8> {
        let mut buf = [0u8; 1];
        self.fill(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self) -> SaveResult<u16> {
        let mut buf = [0u8; 2];
        self.fill(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&mut self) -> SaveResult<u32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_i32(&mut self) -> SaveResult<i32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    pub fn read_bool(&mut self) -> SaveResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_string(&mut self) -> SaveResult<String> {
        let len = self.read_len()?;
        let mut buf = vec![0u8; len];
        self.fill(&mut buf)?;
        String::from_utf8(buf).map_err(|e| {
            let at = e.utf8_error().valid_up_to();
            SaveError::InvalidValue {
                what: "string encoding",
                value: e.as_bytes()[at] as u32,
            }
        })
    }

    pub fn read_blob(&mut self) -> SaveResult<Vec<u8>> {
        let len = self.read_len()?;
        let mut buf = vec![0u8; len];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    pub fn read_raw(&mut self, len: usize) -> SaveResult<Vec<u8>> {
        if len > MAX_CHUNK_SIZE {
            return Err(SaveError::InvalidValue {
                what: "length prefix",
                value: len as u32,
            });
        }
        let mut buf = vec![0u8; len];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    fn read_len(&mut self) -> SaveResult<usize> {
        let len = self.read_u32()? as usize;
        if len > MAX_CHUNK_SIZE {
            return Err(SaveError::InvalidValue {
                what: "length prefix",
                value: len as u32,
            });
        }
        Ok(len)
    }

    /// Read a u16 at a position where clean end-of-stream is legal.
    /// Returns None on EOF before the first byte; a lone trailing byte is
    /// still UnexpectedEof.
    pub fn try_read_u16(&mut self) -> SaveResult<Option<u16>> {
        let mut first = [0u8; 1];
        match self.inp.read(&mut first) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(e) => return Err(SaveError::Io(e)),
        }
        let mut second = [0u8; 1];
        self.fill(&mut second)?;
        Ok(Some(u16::from_le_bytes([first[0], second[0]])))
    }
}
