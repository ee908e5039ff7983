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

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::connection::{Connection, Direction};
use super::context::ReactorContext;
use super::handler::HandlerRef;
use crate::{AppError, AppResult, Shutdown};

/// A bound TCP acceptor whose accepted connections dispatch to one handler.
#[derive(Debug)]
pub struct Listener {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Listener {
    /// Binds on every local IPv4 interface and starts accepting.
    pub(crate) fn bind(port: u16, handler: HandlerRef, context: &ReactorContext) -> AppResult<Self> {
        let config = context.config();
        let endpoint = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let bind_error = |e: std::io::Error| AppError::Bind(format!("{}: {}", endpoint, e));

        let _guard = context.enter();
        let socket = TcpSocket::new_v4().map_err(bind_error)?;
        socket
            .set_reuseaddr(config.reuse_address)
            .map_err(bind_error)?;
        socket.bind(endpoint).map_err(bind_error)?;
        let listener = socket.listen(config.listen_backlog).map_err(bind_error)?;
        let local_addr = listener.local_addr()?;
        info!("tcp listener binding to {} for listening", local_addr);

        let acceptor = Acceptor {
            listener,
            local_addr,
            handler,
            context: context.clone(),
            shutdown: context.shutdown(),
            _shutdown_complete_tx: context.shutdown_complete_tx(),
        };
        let task = context.spawn(acceptor.run());

        Ok(Listener { local_addr, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// False once the accept loop has ended, after shutdown or an accept error.
    pub fn is_accepting(&self) -> bool {
        !self.task.is_finished()
    }
}

struct Acceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: HandlerRef,
    context: ReactorContext,
    shutdown: Shutdown,
    _shutdown_complete_tx: mpsc::Sender<()>,
}

impl Acceptor {
    /// Accepts until shutdown. Each accepted connection gets the listener's
    /// handler and starts receiving before the next accept is awaited.
    async fn run(mut self) {
        loop {
            let accepted = tokio::select! {
                res = self.listener.accept() => res,
                _ = self.shutdown.recv() => {
                    debug!(addr = %self.local_addr, "listener exit accept loop after shutdown signal");
                    return;
                }
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    match Connection::new(stream, Direction::Incoming, self.context.config()) {
                        Ok(mut connection) => {
                            connection.register_message_handler(self.handler.clone());
                            let id = connection.accept(&self.context);
                            debug!(id, %peer_addr, addr = %self.local_addr, "accepted connection");
                        }
                        Err(err) => {
                            // the peer went away between accept and setup
                            warn!(%peer_addr, "dropping accepted connection: {}", err);
                        }
                    }
                }
                Err(err) => {
                    let err = AppError::Accept(err.to_string());
                    error!(addr = %self.local_addr, "listener stopped: {}", err);
                    if let Some(handler) = self.handler.upgrade() {
                        handler.connection_error(self.local_addr, &err);
                    }
                    return;
                }
            }
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        debug!(addr = %self.local_addr, "tcp listener dropped");
    }
}
