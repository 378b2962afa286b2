//! Checksummed framing shared by the raw journal and snapshot files.
//!
//! A file opens with `RCDB` plus a version byte. Each frame after it is
//! `[version u8][len u32 LE][json][crc32 u32 LE]`; the checksum covers the
//! JSON body only.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

pub const CODEC_VERSION: u8 = 1;

pub const MAGIC: [u8; 4] = *b"RCDB";

/// Upper bound on a frame body; a larger length prefix means a corrupt file.
const MAX_FRAME_BODY: usize = 256 * 1024 * 1024;

const FRAME_OVERHEAD: usize = 1 + 4 + 4;

fn corrupt(msg: impl Into<String>) -> IoError {
    IoError::new(ErrorKind::InvalidData, msg.into())
}

fn read_array<const N: usize>(reader: &mut impl Read) -> IoResult<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Serializes `value` into one frame.
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let body = serde_json::to_vec(value).map_err(|e| corrupt(format!("cannot encode frame: {e}")))?;
    let len = u32::try_from(body.len()).map_err(|_| corrupt(format!("frame body of {} bytes", body.len())))?;
    let checksum = crc32fast::hash(&body);

    let mut frame = Vec::with_capacity(body.len() + FRAME_OVERHEAD);
    frame.push(CODEC_VERSION);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend(body);
    frame.extend_from_slice(&checksum.to_le_bytes());
    Ok(frame)
}

/// Reads the next frame and deserializes its body.
///
/// # Errors
///
/// `UnexpectedEof` when the frame is cut short, which the journal treats as
/// a torn tail. `InvalidData` for anything else that does not check out.
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let [version] = read_array::<1>(reader)?;
    if version != CODEC_VERSION {
        return Err(corrupt(format!("frame version {version}, this build reads {CODEC_VERSION}")));
    }

    let len = u32::from_le_bytes(read_array(reader)?) as usize;
    if len > MAX_FRAME_BODY {
        return Err(corrupt(format!("frame body of {len} bytes exceeds maximum {MAX_FRAME_BODY}")));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;

    let stored = u32::from_le_bytes(read_array(reader)?);
    let actual = crc32fast::hash(&body);
    if stored != actual {
        return Err(corrupt(format!("frame checksum {stored:08x} does not match body {actual:08x}")));
    }

    serde_json::from_slice(&body).map_err(|e| corrupt(format!("cannot decode frame: {e}")))
}

pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])
}

/// Checks the file header and returns the version it was written with.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let magic = read_array::<4>(reader)?;
    if magic != MAGIC {
        return Err(corrupt(format!(
            "not a recondb file (header {:?})",
            String::from_utf8_lossy(&magic)
        )));
    }
    let [version] = read_array::<1>(reader)?;
    Ok(version)
}
