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

use std::fs;

use serde::{Deserialize, Serialize};

use super::error::Error;

/// Configuration for the demo server binary, read from a toml file.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    // The UDP port the wire server binds to. Zero picks a free port.
    pub udp_port: u16,

    // Number of worker threads in the execution context.
    pub workers: usize,

    // Number of client-side completion queues in the execution context.
    pub client_queues: usize,

    // Number of server work queues to service requests on.
    pub work_queues: usize,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            udp_port: 9090,
            workers: 4,
            client_queues: 1,
            work_queues: 2,
        }
    }
}

/// Configuration for the demo client binary, read from a toml file.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ClientConfig {
    // Address of the server to send requests to.
    pub server_ip: String,
    pub server_port: u16,

    // Execution context sizing.
    pub workers: usize,
    pub client_queues: usize,

    // Number of requests the demo client issues.
    pub requests: u32,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            server_ip: "127.0.0.1".to_string(),
            server_port: 9090,
            workers: 2,
            client_queues: 1,
            requests: 8,
        }
    }
}

/// Loads a server configuration.
///
/// # Arguments
///
/// * `path`: The toml file to read. A missing file yields the defaults; a
///           malformed one is an error.
pub fn load_server(path: &str) -> Result<ServerConfig, Error> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No configuration at {}; using defaults", path);
            Ok(ServerConfig::default())
        }
        Err(e) => Err(Error::Io(e)),
    }
}

/// Loads a client configuration. Same conventions as `load_server`.
pub fn load_client(path: &str) -> Result<ClientConfig, Error> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No configuration at {}; using defaults", path);
            Ok(ClientConfig::default())
        }
        Err(e) => Err(Error::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: ServerConfig = toml::from_str("workers = 8").unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.udp_port, 9090);
        assert_eq!(config.work_queues, 2);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let result: Result<ServerConfig, _> = toml::from_str("workers = \"many\"");
        assert!(result.is_err());
    }
}
