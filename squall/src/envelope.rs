/* Copyright (c) 2018 University of Utah
 *
 * Permission to use, copy, modify, and distribute this software for any
 * purpose with or without fee is hereby granted, provided that the above
 * copyright notice and this permission notice appear in all copies.
 *
 * THE SOFTWARE IS PROVIDED "AS IS" AND THE AUTHOR(S) DISCLAIM ALL WARRANTIES
 * WITH REGARD TO THIS SOFTWARE INCLUDING ALL IMPLIED WARRANTIES OF
 * MERCHANTABILITY AND FITNESS. IN NO EVENT SHALL AUTHORS BE LIABLE FOR
 * ANY SPECIAL, DIRECT, INDIRECT, OR CONSEQUENTIAL DAMAGES OR ANY DAMAGES
 * WHATSOEVER RESULTING FROM LOSS OF USE, DATA OR PROFITS, WHETHER IN AN
 * ACTION OF CONTRACT, NEGLIGENCE OR OTHER TORTIOUS ACTION, ARISING OUT OF
 * OR IN CONNECTION WITH THE USE OR PERFORMANCE OF THIS SOFTWARE.
 */

//! Helpers for packing application payloads into the opaque envelopes the
//! runtime moves around. The runtime itself never looks inside an envelope;
//! these exist so that conversion functors on either end of a call have a
//! common, checked wire shape to agree on.

use std::io::{self, Cursor};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;

/// Packs a string into a length-prefixed envelope.
pub fn pack_str(value: &str) -> Bytes {
    let mut buf = Vec::with_capacity(4 + value.len());
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
    Bytes::from(buf)
}

/// Unpacks a length-prefixed string envelope.
///
/// # Return
///
/// The string, or an `InvalidData` error if the envelope is truncated or
/// not valid UTF-8.
pub fn unpack_str(envelope: &Bytes) -> io::Result<String> {
    let mut cursor = Cursor::new(&envelope[..]);
    let length = cursor.read_u32::<LittleEndian>()? as usize;
    let offset = cursor.position() as usize;

    if envelope.len() < offset + length {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "string envelope is truncated",
        ));
    }

    String::from_utf8(envelope[offset..offset + length].to_vec())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Packs an unsigned 64-bit integer into an envelope.
pub fn pack_u64(value: u64) -> Bytes {
    let mut buf = Vec::with_capacity(8);
    buf.extend_from_slice(&value.to_le_bytes());
    Bytes::from(buf)
}

/// Unpacks an unsigned 64-bit integer envelope.
pub fn unpack_u64(envelope: &Bytes) -> io::Result<u64> {
    let mut cursor = Cursor::new(&envelope[..]);
    cursor.read_u64::<LittleEndian>()
}

/// Writes a length-prefixed string into an envelope under construction.
/// Useful when one envelope carries several fields.
pub fn write_str(buf: &mut Vec<u8>, value: &str) -> io::Result<()> {
    buf.write_u32::<LittleEndian>(value.len() as u32)?;
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

/// Reads a length-prefixed string out of an envelope cursor.
pub fn read_str(cursor: &mut Cursor<&[u8]>) -> io::Result<String> {
    let length = cursor.read_u32::<LittleEndian>()? as usize;
    let offset = cursor.position() as usize;
    let buf = *cursor.get_ref();

    if buf.len() < offset + length {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "string field is truncated",
        ));
    }

    cursor.set_position((offset + length) as u64);
    String::from_utf8(buf[offset..offset + length].to_vec())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_survive_packing() {
        let envelope = pack_str("monsoon season");
        assert_eq!(unpack_str(&envelope).unwrap(), "monsoon season");
    }

    #[test]
    fn truncated_string_envelope_is_rejected() {
        let envelope = pack_str("monsoon season");
        let truncated = envelope.slice(0..6);
        assert!(unpack_str(&truncated).is_err());
    }

    #[test]
    fn integer_envelopes() {
        assert_eq!(unpack_u64(&pack_u64(0xdead_beef)).unwrap(), 0xdead_beef);
        assert!(unpack_u64(&Bytes::from_static(&[1, 2, 3])).is_err());
    }

    #[test]
    fn multi_field_envelopes() {
        let mut buf = Vec::new();
        write_str(&mut buf, "alpha").unwrap();
        write_str(&mut buf, "beta").unwrap();

        let bytes = Bytes::from(buf);
        let mut cursor = Cursor::new(&bytes[..]);
        assert_eq!(read_str(&mut cursor).unwrap(), "alpha");
        assert_eq!(read_str(&mut cursor).unwrap(), "beta");
    }
}
