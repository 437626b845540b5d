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

//! The datagram wireformat. One request or response per UDP datagram, all
//! integers little-endian:
//!
//! ```text
//! request:  magic u16 | kind u8 (0) | method u32 | call_id u64 | payload
//! response: magic u16 | kind u8 (1) | call_id u64 | code i32
//!           | message_len u16 | message | payload
//! ```
//!
//! Payloads are opaque to the runtime; they are handed to application code
//! as `Bytes` envelopes.

use std::io::{self, Cursor};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;

use squall::status::{RpcStatus, RpcStatusCode, WIRE_STATUS_SENTINEL};

/// Identifies an RPC method on a service. Assigned by the application; the
/// runtime only routes on it.
pub type MethodId = u32;

/// Identifies one in-flight call on one channel.
pub type CallId = u64;

// First two bytes of every datagram. Anything else is dropped on receive.
const PACKET_MAGIC: u16 = 0x6d73;

const KIND_REQUEST: u8 = 0;
const KIND_RESPONSE: u8 = 1;

/// The largest datagram the transport will attempt to receive.
pub const MAX_DATAGRAM: usize = 63 * 1024;

/// The status carried on a response datagram: a signed wire code plus a
/// free-form message. The runtime taxonomy (`RpcStatusCode`) round-trips
/// through the `code` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: i32,
    pub message: String,
}

// Implementation of methods on Status.
impl Status {
    pub fn new<S: Into<String>>(code: i32, message: S) -> Status {
        Status {
            code: code,
            message: message.into(),
        }
    }

    /// The success status.
    pub fn ok() -> Status {
        Status {
            code: RpcStatusCode::Ok.to_wire(),
            message: String::new(),
        }
    }

    /// A status with the sentinel code; used to initialize reply slots
    /// before the transport has reported anything.
    pub fn unset() -> Status {
        Status {
            code: WIRE_STATUS_SENTINEL,
            message: String::new(),
        }
    }

    pub fn unavailable<S: Into<String>>(message: S) -> Status {
        Status::new(RpcStatusCode::Unavailable.to_wire(), message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Status {
        Status::new(RpcStatusCode::Internal.to_wire(), message)
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.code == RpcStatusCode::Ok.to_wire()
    }
}

/// Converts a wire status into the runtime taxonomy, preserving the message
/// verbatim.
pub fn status_to_rpc(status: &Status) -> RpcStatus {
    RpcStatus::with_details(RpcStatusCode::from_wire(status.code), status.message.clone())
}

/// Converts a runtime status into its wire form, preserving the details
/// verbatim.
pub fn rpc_to_status(status: &RpcStatus) -> Status {
    Status::new(status.code().to_wire(), status.details())
}

/// The fixed fields of a request datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub method: MethodId,
    pub call_id: CallId,
}

/// Encodes a request datagram.
pub fn encode_request(method: MethodId, call_id: CallId, payload: &Bytes) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(15 + payload.len());
    buf.write_u16::<LittleEndian>(PACKET_MAGIC)?;
    buf.write_u8(KIND_REQUEST)?;
    buf.write_u32::<LittleEndian>(method)?;
    buf.write_u64::<LittleEndian>(call_id)?;
    buf.extend_from_slice(&payload[..]);
    Ok(buf)
}

/// Decodes a request datagram, returning the header and the payload
/// envelope.
pub fn decode_request(buf: &[u8]) -> io::Result<(RequestHeader, Bytes)> {
    let mut cursor = Cursor::new(buf);
    check_preamble(&mut cursor, KIND_REQUEST)?;

    let method = cursor.read_u32::<LittleEndian>()?;
    let call_id = cursor.read_u64::<LittleEndian>()?;
    let payload = Bytes::copy_from_slice(&buf[cursor.position() as usize..]);

    Ok((
        RequestHeader {
            method: method,
            call_id: call_id,
        },
        payload,
    ))
}

/// Encodes a response datagram.
pub fn encode_response(call_id: CallId, status: &Status, payload: &Bytes) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(17 + status.message.len() + payload.len());
    buf.write_u16::<LittleEndian>(PACKET_MAGIC)?;
    buf.write_u8(KIND_RESPONSE)?;
    buf.write_u64::<LittleEndian>(call_id)?;
    buf.write_i32::<LittleEndian>(status.code)?;
    buf.write_u16::<LittleEndian>(status.message.len() as u16)?;
    buf.extend_from_slice(status.message.as_bytes());
    buf.extend_from_slice(&payload[..]);
    Ok(buf)
}

/// Decodes a response datagram, returning the call identifier, the wire
/// status, and the payload envelope.
pub fn decode_response(buf: &[u8]) -> io::Result<(CallId, Status, Bytes)> {
    let mut cursor = Cursor::new(buf);
    check_preamble(&mut cursor, KIND_RESPONSE)?;

    let call_id = cursor.read_u64::<LittleEndian>()?;
    let code = cursor.read_i32::<LittleEndian>()?;
    let message_len = cursor.read_u16::<LittleEndian>()? as usize;
    let offset = cursor.position() as usize;

    if buf.len() < offset + message_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "response status message is truncated",
        ));
    }

    let message = String::from_utf8(buf[offset..offset + message_len].to_vec())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let payload = Bytes::copy_from_slice(&buf[offset + message_len..]);

    Ok((call_id, Status::new(code, message), payload))
}

fn check_preamble(cursor: &mut Cursor<&[u8]>, expected_kind: u8) -> io::Result<()> {
    let magic = cursor.read_u16::<LittleEndian>()?;
    if magic != PACKET_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "datagram does not carry the protocol magic",
        ));
    }

    let kind = cursor.read_u8()?;
    if kind != expected_kind {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unexpected datagram kind",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_datagrams_decode_to_what_was_sent() {
        let payload = Bytes::from_static(b"envelope");
        let buf = encode_request(7, 99, &payload).unwrap();
        let (header, decoded) = decode_request(&buf).unwrap();
        assert_eq!(header.method, 7);
        assert_eq!(header.call_id, 99);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn response_datagrams_carry_status_and_payload() {
        let status = Status::new(RpcStatusCode::NotFound.to_wire(), "m");
        let payload = Bytes::from_static(b"body");
        let buf = encode_response(42, &status, &payload).unwrap();
        let (call_id, decoded_status, decoded) = decode_response(&buf).unwrap();
        assert_eq!(call_id, 42);
        assert_eq!(decoded_status, status);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_request(b"\xff\xff\x00garbage").is_err());
        assert!(decode_response(&[0u8; 4]).is_err());

        // A request datagram is not a response datagram.
        let buf = encode_request(1, 1, &Bytes::new()).unwrap();
        assert!(decode_response(&buf).is_err());
    }

    #[test]
    fn status_round_trips_through_the_runtime_taxonomy() {
        let wire = Status::new(RpcStatusCode::Aborted.to_wire(), "halted");
        let rpc = status_to_rpc(&wire);
        assert_eq!(rpc.code(), RpcStatusCode::Aborted);
        assert_eq!(rpc.details(), "halted");
        assert_eq!(rpc_to_status(&rpc), wire);
    }
}
