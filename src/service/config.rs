// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

/// Largest backlog accepted by `listen(2)`; the kernel clamps it to its own
/// maximum (`somaxconn` on Linux).
pub const MAX_LISTEN_BACKLOG: u32 = i32::MAX as u32;

/// Tuning knobs of a [`Network`](crate::Network) reactor.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Initial capacity of each connection's receive buffer.
    pub receive_buffer_size: usize,
    /// Upper bound of a single frame (code + payload). Larger frames are a
    /// protocol error and close the connection.
    pub max_message_size: usize,
    pub listen_backlog: u32,
    pub reuse_address: bool,
    pub tcp_nodelay: bool,
    /// How long `release` waits for I/O tasks to observe shutdown before the
    /// runtime is dropped under them.
    pub shutdown_timeout_ms: u64,
    pub reactor_thread_name: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            receive_buffer_size: 1024,
            max_message_size: 16 * 1024 * 1024,
            listen_backlog: MAX_LISTEN_BACKLOG,
            reuse_address: false,
            tcp_nodelay: true,
            shutdown_timeout_ms: 1000,
            reactor_thread_name: "stonenet-reactor".to_string(),
        }
    }
}

impl NetworkConfig {
    /// Loads a config file (any format the `config` crate recognises by
    /// extension) layered over the defaults, then `STONENET_*` environment
    /// variables on top.
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<NetworkConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .add_source(config::Environment::with_prefix("STONENET").try_parsing(true))
            .build()?;

        let network_config: NetworkConfig = config.try_deserialize()?;
        network_config.validate()?;

        Ok(network_config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.receive_buffer_size == 0 {
            return Err(AppError::InvalidValue(
                "receive_buffer_size must be greater than 0".to_string(),
            ));
        }
        if self.max_message_size < crate::message::CODE_SIZE {
            return Err(AppError::InvalidValue(format!(
                "max_message_size {} cannot hold a message code",
                self.max_message_size
            )));
        }
        if self.max_message_size > u32::MAX as usize {
            return Err(AppError::InvalidValue(format!(
                "max_message_size {} does not fit the frame length field",
                self.max_message_size
            )));
        }
        if self.listen_backlog == 0 {
            return Err(AppError::InvalidValue(
                "listen_backlog must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::Builder;

    use super::*;

    #[test]
    fn test_load_partial_config() -> AppResult<()> {
        let mut file = Builder::new().suffix(".toml").tempfile()?;
        writeln!(file, "receive_buffer_size = 4096")?;
        writeln!(file, "reuse_address = true")?;
        writeln!(file, "reactor_thread_name = \"net-io\"")?;

        let config = NetworkConfig::set_up_config(file.path())?;
        assert_eq!(config.receive_buffer_size, 4096);
        assert!(config.reuse_address);
        assert_eq!(config.reactor_thread_name, "net-io");
        // untouched keys keep their defaults
        assert_eq!(config.max_message_size, NetworkConfig::default().max_message_size);
        assert_eq!(config.listen_backlog, MAX_LISTEN_BACKLOG);
        Ok(())
    }

    #[test]
    fn test_reject_invalid_config() -> AppResult<()> {
        let mut file = Builder::new().suffix(".toml").tempfile()?;
        writeln!(file, "max_message_size = 4")?;

        let result = NetworkConfig::set_up_config(file.path());
        assert!(matches!(result, Err(AppError::InvalidValue(_))));
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        let result = NetworkConfig::set_up_config("/definitely/not/here/stonenet.toml");
        assert!(matches!(result, Err(AppError::ConfigFileError(_))));
    }

    #[test]
    fn test_default_is_valid() {
        assert!(NetworkConfig::default().validate().is_ok());
        assert_eq!(NetworkConfig::default().shutdown_timeout(), Duration::from_secs(1));
    }
}
