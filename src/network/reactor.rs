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

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::runtime::{self, Runtime};
use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing::{debug, info, trace, warn};

use super::connection::{Connection, ConnectionId, ConnectionState, Direction};
use super::context::ReactorContext;
use super::handler::HandlerRef;
use super::listener::Listener;
use crate::message::Message;
use crate::{AppError, AppResult, NetworkConfig, Shutdown};

struct Reactor {
    context: ReactorContext,
    thread: thread::JoinHandle<()>,
}

/// A TCP messaging endpoint: server and client at once.
///
/// All socket I/O runs on one background thread driving a single-threaded
/// tokio runtime. Handlers registered through [`add_listener`] or
/// [`connect_to_with_handler`] are called on that thread.
///
/// Configuration calls take `&mut self`, so the owner serializes them; the
/// listener and outgoing collections are never touched by the reactor thread.
///
/// [`add_listener`]: Network::add_listener
/// [`connect_to_with_handler`]: Network::connect_to_with_handler
pub struct Network {
    config: Arc<NetworkConfig>,
    reactor: Option<Reactor>,
    listeners: Vec<Listener>,
    outgoing: Vec<ConnectionId>,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    pub fn new() -> Self {
        Self::with_config(NetworkConfig::default())
    }

    pub fn with_config(config: NetworkConfig) -> Self {
        Network {
            config: Arc::new(config),
            reactor: None,
            listeners: Vec::new(),
            outgoing: Vec::new(),
        }
    }

    /// Starts the reactor thread. Must be called once before anything else.
    #[tracing::instrument(skip(self))]
    pub fn initialize(&mut self) -> AppResult<()> {
        if self.reactor.is_some() {
            return Err(AppError::IllegalStateError(
                "network already initialized".to_string(),
            ));
        }
        self.config.validate()?;

        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (notify_shutdown, _) = watch::channel(false);
        let notify_shutdown = Arc::new(notify_shutdown);
        let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);

        let context = ReactorContext::new(
            runtime.handle().clone(),
            self.config.clone(),
            notify_shutdown.clone(),
            shutdown_complete_tx,
        );
        let shutdown = Shutdown::new(notify_shutdown.subscribe());
        let grace = self.config.shutdown_timeout();

        let thread = thread::Builder::new()
            .name(self.config.reactor_thread_name.clone())
            .spawn(move || run_reactor(runtime, shutdown, shutdown_complete_rx, grace))?;

        self.reactor = Some(Reactor { context, thread });
        info!("network reactor started");
        Ok(())
    }

    /// Listens on `port` of every local IPv4 interface. Connections accepted
    /// there dispatch their messages to `handler`.
    ///
    /// Returns the bound address, which carries the real port when `port` is 0.
    #[tracing::instrument(skip(self, handler))]
    pub fn add_listener(&mut self, port: u16, handler: HandlerRef) -> AppResult<SocketAddr> {
        let context = context_of(&self.reactor)?;
        let listener = Listener::bind(port, handler, context)?;
        let local_addr = listener.local_addr();
        self.listeners.push(listener);
        Ok(local_addr)
    }

    /// Opens an outgoing connection, blocking until the connect completes.
    /// Messages the peer sends back are discarded.
    #[tracing::instrument(skip(self))]
    pub fn connect_to(&mut self, host: &str, port: u16) -> AppResult<ConnectionId> {
        self.connect(host, port, None)
    }

    /// Like [`connect_to`](Network::connect_to), but messages the peer sends
    /// back are dispatched to `handler`.
    #[tracing::instrument(skip(self, handler))]
    pub fn connect_to_with_handler(
        &mut self,
        host: &str,
        port: u16,
        handler: HandlerRef,
    ) -> AppResult<ConnectionId> {
        self.connect(host, port, Some(handler))
    }

    fn connect(
        &mut self,
        host: &str,
        port: u16,
        handler: Option<HandlerRef>,
    ) -> AppResult<ConnectionId> {
        let context = context_of(&self.reactor)?;
        let mut connection = Connection::bind(host, port, context)?;
        if let Some(handler) = handler {
            connection.register_message_handler(handler);
        }
        let peer_addr = connection.peer_addr();
        let id = connection.receive(context);

        // forget outgoing connections the reactor already tore down
        let table = context.table();
        self.outgoing.retain(|id| table.contains(id));
        self.outgoing.push(id);
        info!(id, %peer_addr, "connected to {}:{}", host, port);
        Ok(id)
    }

    /// Queues `message` on the outgoing connection to `host:port`.
    ///
    /// Without such a connection (never connected, or already closed) the
    /// message is dropped and `Ok` is returned. Only a message too large to
    /// frame is an error.
    pub fn send_message(&self, host: &str, port: u16, message: Message) -> AppResult<()> {
        if message.wire_size() > self.config.max_message_size {
            return Err(AppError::Protocol(format!(
                "message of length {} exceeds the limit of {}",
                message.wire_size(),
                self.config.max_message_size
            )));
        }
        let Some(reactor) = &self.reactor else {
            debug!("network not initialized, message {} dropped", message.code());
            return Ok(());
        };

        let endpoints = resolve(host, port);
        let table = reactor.context.table();
        let connection = self.outgoing.iter().find_map(|id| {
            table
                .get(id)
                .filter(|entry| {
                    entry.direction() == Direction::Outgoing
                        && endpoints.contains(&entry.peer_addr())
                })
                .map(|entry| (*id, entry))
        });

        match connection {
            Some((id, entry)) => {
                let code = message.code();
                if entry.send(message) {
                    trace!(id, code, "message queued");
                } else {
                    debug!(id, code, "connection closing, message dropped");
                }
            }
            None => debug!(
                "no outgoing connection to {}:{}, message {} dropped",
                host,
                port,
                message.code()
            ),
        }
        Ok(())
    }

    /// Stops the reactor: every pending operation is cancelled, the reactor
    /// thread is joined, and all listeners and connections are forgotten.
    #[tracing::instrument(skip(self))]
    pub fn release(&mut self) -> AppResult<()> {
        let Reactor { context, thread } = self.reactor.take().ok_or_else(|| {
            AppError::IllegalStateError("network is not initialized".to_string())
        })?;

        context.signal_shutdown();
        let table = context.table().clone();
        // our copy of shutdown_complete_tx must go before the reactor waits on it
        drop(context);

        let joined = thread.join();

        self.listeners.clear();
        self.outgoing.clear();
        table.clear();

        joined.map_err(|_| AppError::IllegalStateError("reactor thread panicked".to_string()))?;
        info!("network reactor released");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.reactor.is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Listeners whose accept loop is still running.
    pub fn accepting_listener_count(&self) -> usize {
        self.listeners.iter().filter(|l| l.is_accepting()).count()
    }

    /// Live connections, incoming and outgoing.
    pub fn connection_count(&self) -> usize {
        self.reactor
            .as_ref()
            .map_or(0, |reactor| reactor.context.table().len())
    }

    pub fn outgoing_connection_count(&self) -> usize {
        self.reactor.as_ref().map_or(0, |reactor| {
            let table = reactor.context.table();
            self.outgoing.iter().filter(|id| table.contains(id)).count()
        })
    }

    pub fn connection_state(&self, id: ConnectionId) -> ConnectionState {
        self.reactor
            .as_ref()
            .and_then(|reactor| reactor.context.table().get(&id).map(|entry| entry.state()))
            .unwrap_or(ConnectionState::Closed)
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }
}

// borrows only the reactor field, leaving the collections free for mutation
fn context_of(reactor: &Option<Reactor>) -> AppResult<&ReactorContext> {
    reactor
        .as_ref()
        .map(|reactor| &reactor.context)
        .ok_or_else(|| AppError::IllegalStateError("network is not initialized".to_string()))
}

impl Drop for Network {
    fn drop(&mut self) {
        if self.reactor.is_some() {
            if let Err(err) = self.release() {
                warn!("failed to release network on drop: {}", err);
            }
        }
    }
}

/// Body of the reactor thread.
///
/// The pending shutdown wait keeps `block_on` alive while the reactor is idle.
/// After the signal every task gets `grace` to notice it; whatever is left is
/// cancelled when the runtime is dropped.
fn run_reactor(
    runtime: Runtime,
    mut shutdown: Shutdown,
    mut shutdown_complete_rx: mpsc::Receiver<()>,
    grace: Duration,
) {
    debug!("reactor thread started");
    runtime.block_on(async {
        shutdown.recv().await;
        debug!("reactor received shutdown signal");
        // recv returns None once every task has dropped its sender
        if time::timeout(grace, shutdown_complete_rx.recv())
            .await
            .is_err()
        {
            warn!("tasks still running after {:?}, cancelling them", grace);
        }
    });
    drop(runtime);
    debug!("reactor thread exited");
}

fn resolve(host: &str, port: u16) -> Vec<SocketAddr> {
    match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs.collect(),
        Err(err) => {
            debug!("can not resolve {}:{}: {}", host, port, err);
            Vec::new()
        }
    }
}
