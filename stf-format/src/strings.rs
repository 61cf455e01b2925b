use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use stf_types::Error as CodecError;

use crate::error::{FormatError, Result};

/// Reads a length-prefixed string: a `u16` byte length followed by that many
/// bytes, no null terminator (spec §4.1).
pub fn read_string<R: Read + ?Sized>(r: &mut R) -> Result<String> {
    let len = r
        .read_u16::<LittleEndian>()
        .map_err(|_| FormatError::CorruptStream(CodecError::UnexpectedEof))?;
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)
        .map_err(|_| FormatError::CorruptStream(CodecError::UnexpectedEof))?;
    String::from_utf8(buf)
        .map_err(|_| FormatError::CorruptStream(CodecError::InvalidStringLength(len as u32)))
}

/// Writes a length-prefixed string (spec §4.1). The byte length, not the
/// character count, is written; callers are expected to pass ASCII/UTF-8
/// text short enough to fit a `u16`.
pub fn write_string<W: Write + ?Sized>(w: &mut W, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    if bytes.len() > stf_types::MAX_STRING_LEN {
        return Err(FormatError::CorruptStream(CodecError::InvalidStringLength(
            bytes.len() as u32,
        )));
    }
    w.write_u16::<LittleEndian>(bytes.len() as u16)?;
    w.write_all(bytes)?;
    Ok(())
}
