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

//! The interface half of the runtime. Application logic links against this
//! crate alone: the sender/receiver computation model, the status taxonomy
//! carried on the error channel, and helpers for packing payload envelopes.
//! The engine (completion queues, wire transport, worker threads) lives in
//! the `monsoon` crate.

pub mod envelope;
pub mod exec;
pub mod status;

pub use status::{RpcStatus, RpcStatusCode};

pub use bytes::Bytes;
pub use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
