//! Parses a binary IJVM image (magic, constant pool, text) into the raw
//! sections `Ijvm::init` needs. See §4.A / §6 of the design notes for the
//! on-disk layout.

use std::fs;
use std::io;
use std::path::Path;

use crate::bytes::read_u32;
use crate::error::LoadError;
use crate::stack::Word;

const MAGIC_NUMBER: u32 = 0x1DEA_DFAD;

#[derive(Debug)]
pub struct Image {
    pub constant_pool: Vec<Word>,
    pub text: Vec<u8>,
}

fn truncated_eof(what: &str) -> LoadError {
    LoadError::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("image truncated while reading {what}"),
    ))
}

fn take_u32(buf: &[u8], pos: usize, what: &str) -> Result<u32, LoadError> {
    buf.get(pos..pos + 4)
        .map(read_u32)
        .ok_or_else(|| truncated_eof(what))
}

/// Parses a complete in-memory image per the §4.A layout.
pub fn parse(buf: &[u8]) -> Result<Image, LoadError> {
    let magic = take_u32(buf, 0, "magic number")?;
    if magic != MAGIC_NUMBER {
        return Err(LoadError::BadMagic(magic));
    }

    // offset 4: reserved/version, ignored but must still be present.
    take_u32(buf, 4, "reserved header field")?;

    let cp_byte_size = take_u32(buf, 8, "constant pool size")?;
    let cp_start = 12usize;
    let cp_end = cp_start + cp_byte_size as usize;
    let cp_bytes = buf.get(cp_start..cp_end).ok_or(LoadError::TruncatedConstantPool {
        declared: cp_byte_size,
        available: buf.len().saturating_sub(cp_start),
    })?;
    let constant_pool: Vec<Word> = cp_bytes
        .chunks_exact(4)
        .map(|w| read_u32(w) as Word)
        .collect();

    // offset cp_end: reserved/origin, ignored.
    take_u32(buf, cp_end, "reserved origin field")?;

    let text_size_pos = cp_end + 4;
    let text_byte_size = buf
        .get(text_size_pos..text_size_pos + 4)
        .map(read_u32)
        .ok_or(LoadError::MissingTextSection)?;
    let text_start = text_size_pos + 4;
    let text_end = text_start + text_byte_size as usize;
    let text = buf
        .get(text_start..text_end)
        .ok_or(LoadError::TruncatedText {
            declared: text_byte_size,
            available: buf.len().saturating_sub(text_start),
        })?
        .to_vec();

    Ok(Image {
        constant_pool,
        text,
    })
}

/// Reads the file at `path` and parses it as an IJVM image.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Image, LoadError> {
    let buf = fs::read(path)?;
    parse(&buf)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Hand-assembles a well-formed image: header + constant pool + text,
    /// matching the layout in §4.A / §6. Mirrors how the teacher repo
    /// builds its own bytecode fixtures by hand rather than through a
    /// textual assembler.
    pub fn build_image(constants: &[i32], text: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC_NUMBER.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes()); // reserved/version
        let cp_bytes = (constants.len() * 4) as u32;
        buf.extend_from_slice(&cp_bytes.to_be_bytes());
        for c in constants {
            buf.extend_from_slice(&(*c as u32).to_be_bytes());
        }
        buf.extend_from_slice(&0u32.to_be_bytes()); // reserved/origin
        buf.extend_from_slice(&(text.len() as u32).to_be_bytes());
        buf.extend_from_slice(text);
        buf
    }

    #[test]
    fn parses_a_well_formed_image() {
        let buf = build_image(&[10, -1], &[0x00, 0xFF]);
        let image = parse(&buf).unwrap();
        assert_eq!(image.constant_pool, vec![10, -1]);
        assert_eq!(image.text, vec![0x00, 0xFF]);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = build_image(&[], &[0x00]);
        buf[0] = 0x00;
        match parse(&buf) {
            Err(LoadError::BadMagic(_)) => {}
            other => panic!("expected BadMagic, got {other:?}"),
        }
    }

    #[test]
    fn rejects_truncated_constant_pool() {
        let mut buf = build_image(&[1, 2, 3], &[0xFF]);
        buf.truncate(buf.len() - 10); // chop off part of the pool and all of the text
        match parse(&buf) {
            Err(LoadError::TruncatedConstantPool { .. }) => {}
            other => panic!("expected TruncatedConstantPool, got {other:?}"),
        }
    }

    #[test]
    fn rejects_truncated_text() {
        let mut buf = build_image(&[], &[0x00, 0x01, 0x02, 0x03]);
        buf.truncate(buf.len() - 2);
        match parse(&buf) {
            Err(LoadError::TruncatedText { .. }) => {}
            other => panic!("expected TruncatedText, got {other:?}"),
        }
    }

    #[test]
    fn rejects_image_with_no_text_section_field() {
        let buf = build_image(&[1], &[]);
        let buf = buf[..buf.len() - 4].to_vec(); // drop the text-size field itself
        match parse(&buf) {
            Err(LoadError::MissingTextSection) => {}
            other => panic!("expected MissingTextSection, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_an_io_error() {
        match load_from_path("/nonexistent/path/to/nowhere.ijvm") {
            Err(LoadError::Io(_)) => {}
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[test]
    fn real_path_round_trip() {
        let dir = std::env::temp_dir();
        let path = dir.join("ijvm_loader_roundtrip_test.bin");
        let buf = build_image(&[42], &[0xFF]);
        std::fs::write(&path, &buf).unwrap();
        let image = load_from_path(&path).unwrap();
        assert_eq!(image.constant_pool, vec![42]);
        std::fs::remove_file(&path).ok();
    }
}
