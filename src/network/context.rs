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

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::{EnterGuard, Handle};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::connection::ConnectionTable;
use crate::{NetworkConfig, Shutdown};

/// Everything a listener or connection task needs from its reactor.
///
/// Cloned into every task. Each clone carries a `shutdown_complete_tx`; the
/// reactor thread knows all tasks are gone once every sender is dropped.
#[derive(Debug, Clone)]
pub(crate) struct ReactorContext {
    handle: Handle,
    table: ConnectionTable,
    config: Arc<NetworkConfig>,
    notify_shutdown: Arc<watch::Sender<bool>>,
    shutdown_complete_tx: mpsc::Sender<()>,
}

impl ReactorContext {
    pub(crate) fn new(
        handle: Handle,
        config: Arc<NetworkConfig>,
        notify_shutdown: Arc<watch::Sender<bool>>,
        shutdown_complete_tx: mpsc::Sender<()>,
    ) -> Self {
        ReactorContext {
            handle,
            table: ConnectionTable::default(),
            config,
            notify_shutdown,
            shutdown_complete_tx,
        }
    }

    /// Queue a task on the reactor thread. Callable from any thread.
    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Sockets created outside the reactor thread must be registered with its
    /// I/O driver, which requires entering the runtime.
    pub(crate) fn enter(&self) -> EnterGuard<'_> {
        self.handle.enter()
    }

    pub(crate) fn shutdown(&self) -> Shutdown {
        Shutdown::new(self.notify_shutdown.subscribe())
    }

    pub(crate) fn signal_shutdown(&self) {
        self.notify_shutdown.send_replace(true);
    }

    pub(crate) fn shutdown_complete_tx(&self) -> mpsc::Sender<()> {
        self.shutdown_complete_tx.clone()
    }

    pub(crate) fn table(&self) -> &ConnectionTable {
        &self.table
    }

    pub(crate) fn config(&self) -> &NetworkConfig {
        &self.config
    }
}
