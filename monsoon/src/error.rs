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

use std::io;

use thiserror::Error;

/// Errors raised at construction boundaries: building a context or a server
/// container, binding sockets, loading configuration. Errors that occur
/// while a call is in flight never surface here; those travel down the
/// sender error channel as an `RpcStatus`.
#[derive(Debug, Error)]
pub enum Error {
    // Construction-time misuse, e.g. zero worker threads or work queues.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    // An operation was attempted in a lifecycle state that forbids it,
    // e.g. attaching a server to a context that is already running.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed configuration: {0}")]
    Config(#[from] toml::de::Error),
}
