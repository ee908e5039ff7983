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

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::{Encoder, FramedRead};
use tracing::{debug, error, trace, warn};

use super::context::ReactorContext;
use super::frame::MessageCodec;
use super::handler::HandlerRef;
use crate::message::Message;
use crate::{AppError, AppResult, NetworkConfig, Shutdown};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle of a connection inside its reactor.
pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket established, receive loop not started yet.
    Idle,
    Receiving,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted by one of our listeners.
    Incoming,
    /// Opened by `connect_to`.
    Outgoing,
}

/// What the reactor knows about a live connection.
#[derive(Debug)]
pub(crate) struct ConnectionEntry {
    peer_addr: SocketAddr,
    direction: Direction,
    state: ConnectionState,
    handler: Option<HandlerRef>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl ConnectionEntry {
    pub(crate) fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub(crate) fn direction(&self) -> Direction {
        self.direction
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    /// Queue a message for the connection task. Returns false if the task is
    /// already gone.
    pub(crate) fn send(&self, message: Message) -> bool {
        self.outbound.send(message).is_ok()
    }
}

/// Live connections keyed by id, shared between the configuring thread and the
/// reactor thread. Tasks only hold ids; a missing id means the connection was
/// torn down and whatever completed is dropped.
#[derive(Debug, Clone, Default)]
pub(crate) struct ConnectionTable(Arc<DashMap<ConnectionId, ConnectionEntry>>);

impl ConnectionTable {
    pub(crate) fn get(
        &self,
        id: &ConnectionId,
    ) -> Option<dashmap::mapref::one::Ref<'_, ConnectionId, ConnectionEntry>> {
        self.0.get(id)
    }

    pub(crate) fn contains(&self, id: &ConnectionId) -> bool {
        self.0.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn clear(&self) {
        self.0.clear();
    }

    fn insert(&self, id: ConnectionId, entry: ConnectionEntry) {
        self.0.insert(id, entry);
    }

    fn handler(&self, id: &ConnectionId) -> Option<Option<HandlerRef>> {
        self.0.get(id).map(|entry| entry.handler.clone())
    }

    fn close(&self, id: &ConnectionId) -> Option<ConnectionEntry> {
        self.0.remove(id).map(|(_, mut entry)| {
            entry.state = ConnectionState::Closed;
            entry
        })
    }
}

/// A TCP peer before its receive loop starts.
///
/// Built either by [`bind`](Connection::bind) for outgoing connections or by a
/// listener for incoming ones. Starting the loop moves the socket into a task
/// on the reactor thread and leaves only the id behind.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    stream: TcpStream,
    peer_addr: SocketAddr,
    direction: Direction,
    handler: Option<HandlerRef>,
}

impl Connection {
    pub(crate) fn new(
        stream: TcpStream,
        direction: Direction,
        config: &NetworkConfig,
    ) -> AppResult<Connection> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(config.tcp_nodelay)?;
        Ok(Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            stream,
            peer_addr,
            direction,
            handler: None,
        })
    }

    /// Synchronously connects to `host:port`, blocking the caller until the
    /// connect succeeds or every resolved address has failed.
    pub(crate) fn bind(host: &str, port: u16, context: &ReactorContext) -> AppResult<Connection> {
        let stream = std::net::TcpStream::connect((host, port))
            .map_err(|e| AppError::Connect(format!("{}:{}: {}", host, port, e)))?;
        stream.set_nonblocking(true)?;

        let _guard = context.enter();
        let stream = TcpStream::from_std(stream)?;
        Connection::new(stream, Direction::Outgoing, context.config())
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Always `Idle`: a started connection leaves this value behind, and its
    /// live state is read through [`Network::connection_state`](crate::Network::connection_state).
    pub fn state(&self) -> ConnectionState {
        ConnectionState::Idle
    }

    pub fn register_message_handler(&mut self, handler: HandlerRef) {
        self.handler = Some(handler);
    }

    /// Starts the receive loop of a connection handed over by a listener.
    pub(crate) fn accept(self, context: &ReactorContext) -> ConnectionId {
        debug_assert_eq!(self.direction, Direction::Incoming);
        self.receive(context)
    }

    /// Registers the connection in the reactor table and spawns its task.
    ///
    /// The task runs until the peer closes, the reactor shuts down, or an I/O
    /// or protocol error closes this one connection.
    pub(crate) fn receive(self, context: &ReactorContext) -> ConnectionId {
        let Connection {
            id,
            stream,
            peer_addr,
            direction,
            handler,
        } = self;
        let config = context.config();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (reader, writer) = stream.into_split();

        if handler.is_none() {
            debug!(id, %peer_addr, "connection started without a message handler");
        }
        context.table().insert(
            id,
            ConnectionEntry {
                peer_addr,
                direction,
                state: ConnectionState::Receiving,
                handler,
                outbound: outbound_tx,
            },
        );

        let mut task = ConnectionHandler {
            id,
            peer_addr,
            reader: FramedRead::with_capacity(
                reader,
                MessageCodec::new(config.max_message_size),
                config.receive_buffer_size,
            ),
            writer,
            codec: MessageCodec::new(config.max_message_size),
            write_buffer: BytesMut::with_capacity(config.receive_buffer_size),
            outbound_rx,
            table: context.table().clone(),
            shutdown: context.shutdown(),
            _shutdown_complete_tx: context.shutdown_complete_tx(),
        };
        context.spawn(async move {
            if let Err(err) = task.handle_connection().await {
                error!(id = task.id, peer = %task.peer_addr, "connection error: {}", err);
                task.report(&err);
            }
        });
        id
    }
}

enum Event {
    Incoming(Option<AppResult<Message>>),
    Outgoing(Option<Message>),
    Shutdown,
}

// drives one connection: reads, dispatch, and the ordered outgoing queue
struct ConnectionHandler {
    id: ConnectionId,
    peer_addr: SocketAddr,
    reader: FramedRead<OwnedReadHalf, MessageCodec>,
    writer: OwnedWriteHalf,
    codec: MessageCodec,
    write_buffer: BytesMut,
    outbound_rx: mpsc::UnboundedReceiver<Message>,
    table: ConnectionTable,
    shutdown: Shutdown,
    _shutdown_complete_tx: mpsc::Sender<()>,
}

impl ConnectionHandler {
    async fn handle_connection(&mut self) -> AppResult<()> {
        loop {
            let event = tokio::select! {
                frame = self.reader.next() => Event::Incoming(frame),
                outgoing = self.outbound_rx.recv() => Event::Outgoing(outgoing),
                _ = self.shutdown.recv() => Event::Shutdown,
            };

            match event {
                Event::Incoming(Some(frame)) => {
                    let message = frame.map_err(|e| match e {
                        AppError::IoError(e) => AppError::Read(e.to_string()),
                        other => other,
                    })?;
                    if !self.dispatch(message) {
                        return Ok(());
                    }
                }
                Event::Incoming(None) => {
                    debug!(id = self.id, peer = %self.peer_addr, "peer closed the connection");
                    return Ok(());
                }
                Event::Outgoing(Some(message)) => self.write(&message).await?,
                Event::Outgoing(None) => {
                    // the table entry (and with it the queue sender) is gone
                    debug!(id = self.id, "connection removed from reactor");
                    return Ok(());
                }
                Event::Shutdown => {
                    // messages queued before release still go out
                    self.flush_queued().await?;
                    debug!(id = self.id, "connection handler exit after shutdown signal");
                    return Ok(());
                }
            }
        }
    }

    /// Hands a message to the registered handler. Returns false once the
    /// connection is no longer in the table.
    fn dispatch(&self, message: Message) -> bool {
        let handler = match self.table.handler(&self.id) {
            Some(handler) => handler,
            None => {
                debug!(id = self.id, "message for a torn down connection dropped");
                return false;
            }
        };
        trace!(
            id = self.id,
            code = message.code(),
            size = message.wire_size(),
            "incoming message"
        );
        match handler.as_ref().map(|h| h.upgrade()) {
            Some(Some(handler)) => handler.incoming_message(message),
            Some(None) => warn!(
                id = self.id,
                code = message.code(),
                "message handler was dropped, message discarded"
            ),
            None => debug!(
                id = self.id,
                code = message.code(),
                "no message handler registered, message discarded"
            ),
        }
        true
    }

    async fn write(&mut self, message: &Message) -> AppResult<()> {
        self.write_buffer.clear();
        self.codec.encode(message, &mut self.write_buffer)?;
        self.writer
            .write_all(&self.write_buffer)
            .await
            .map_err(|e| AppError::Write(e.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|e| AppError::Write(e.to_string()))?;
        trace!(id = self.id, code = message.code(), "message written");
        Ok(())
    }

    async fn flush_queued(&mut self) -> AppResult<()> {
        while let Ok(message) = self.outbound_rx.try_recv() {
            self.write(&message).await?;
        }
        Ok(())
    }

    fn report(&self, error: &AppError) {
        if let Some(Some(handler)) = self.table.handler(&self.id) {
            if let Some(handler) = handler.upgrade() {
                handler.connection_error(self.peer_addr, error);
            }
        }
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        // runs on every exit path, including a panicking handler and the
        // runtime being dropped at release
        if self.table.close(&self.id).is_some() {
            debug!(id = self.id, peer = %self.peer_addr, "connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::net::TcpListener;

    use super::*;
    use crate::network::MessageHandler;

    #[derive(Default)]
    struct Collect {
        messages: Mutex<Vec<Message>>,
        errors: Mutex<Vec<String>>,
    }

    impl MessageHandler for Collect {
        fn incoming_message(&self, message: Message) {
            self.messages.lock().push(message);
        }

        fn connection_error(&self, _peer_addr: SocketAddr, error: &AppError) {
            self.errors.lock().push(error.to_string());
        }
    }

    fn test_context() -> (ReactorContext, mpsc::Receiver<()>) {
        let (notify_shutdown, _) = tokio::sync::watch::channel(false);
        let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);
        let context = ReactorContext::new(
            tokio::runtime::Handle::current(),
            Arc::new(NetworkConfig::default()),
            Arc::new(notify_shutdown),
            shutdown_complete_tx,
        );
        (context, shutdown_complete_rx)
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..100 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    async fn connected_pair(context: &ReactorContext) -> (Connection, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let client =
            Connection::new(client.unwrap(), Direction::Outgoing, context.config()).unwrap();
        let server =
            Connection::new(accepted.unwrap().0, Direction::Incoming, context.config()).unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_messages_dispatched_in_order() {
        let (context, _complete_rx) = test_context();
        let (client, mut server) = connected_pair(&context).await;

        let collect = Arc::new(Collect::default());
        let handler: Arc<dyn MessageHandler> = collect.clone();
        server.register_message_handler(Arc::downgrade(&handler));
        assert_eq!(server.state(), ConnectionState::Idle);

        let server_id = server.accept(&context);
        let client_id = client.receive(&context);
        assert_eq!(
            context.table().get(&server_id).unwrap().state(),
            ConnectionState::Receiving
        );

        for code in 0..10u64 {
            assert!(context.table().get(&client_id).unwrap().send(Message::new(code)));
        }
        assert!(wait_for(|| collect.messages.lock().len() == 10).await);
        let codes: Vec<u64> = collect.messages.lock().iter().map(|m| m.code()).collect();
        assert_eq!(codes, (0..10u64).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_peer_close_tears_down() {
        let (context, _complete_rx) = test_context();
        let (client, server) = connected_pair(&context).await;
        let server_id = server.accept(&context);
        let client_id = client.receive(&context);
        assert_eq!(context.table().len(), 2);

        // removing the entry closes the client's queue and ends its task
        context.table().close(&client_id);
        assert!(wait_for(|| !context.table().contains(&server_id)).await);
        assert_eq!(context.table().len(), 0);
    }

    #[tokio::test]
    async fn test_dropped_handler_discards_message() {
        let (context, _complete_rx) = test_context();
        let (client, mut server) = connected_pair(&context).await;

        let handler: Arc<dyn MessageHandler> = Arc::new(Collect::default());
        let weak: Weak<dyn MessageHandler> = Arc::downgrade(&handler);
        drop(handler);
        server.register_message_handler(weak);

        let server_id = server.accept(&context);
        let client_id = client.receive(&context);
        assert!(context.table().get(&client_id).unwrap().send(Message::new(1)));
        assert!(context.table().get(&client_id).unwrap().send(Message::new(2)));

        // the connection survives a missing handler
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(context.table().contains(&server_id));
    }

    #[tokio::test]
    async fn test_garbage_closes_only_offending_connection() {
        let (context, _complete_rx) = test_context();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (raw, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let mut raw = raw.unwrap();
        let server =
            Connection::new(accepted.unwrap().0, Direction::Incoming, context.config()).unwrap();
        let server_id = server.accept(&context);

        let (other_client, other_server) = connected_pair(&context).await;
        let other_id = other_server.accept(&context);
        let _other_client_id = other_client.receive(&context);

        // frame length 3 cannot hold a code
        raw.write_all(&[0, 0, 0, 3, 1, 2, 3]).await.unwrap();
        assert!(wait_for(|| !context.table().contains(&server_id)).await);
        assert!(context.table().contains(&other_id));
    }

    #[tokio::test]
    async fn test_reset_reports_read_error() {
        let (context, _complete_rx) = test_context();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (raw, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let raw = raw.unwrap();
        let mut server =
            Connection::new(accepted.unwrap().0, Direction::Incoming, context.config()).unwrap();

        let collect = Arc::new(Collect::default());
        let handler: Arc<dyn MessageHandler> = collect.clone();
        server.register_message_handler(Arc::downgrade(&handler));
        let server_id = server.accept(&context);

        let (other_client, other_server) = connected_pair(&context).await;
        let other_id = other_server.accept(&context);
        let _other_client_id = other_client.receive(&context);

        // zero linger turns the close into a RST
        raw.set_linger(Some(Duration::ZERO)).unwrap();
        drop(raw);

        assert!(wait_for(|| !context.table().contains(&server_id)).await);
        assert_eq!(collect.errors.lock().len(), 1);
        assert!(collect.errors.lock()[0].starts_with("read error"));
        assert!(context.table().contains(&other_id));
    }
}
