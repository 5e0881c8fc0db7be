//! WebSocket connections and rooms.
//!
//! The HTTP parser has already consumed the upgrade request by the time a
//! handler runs, so the 101 handshake is written by hand and the raw stream
//! is wrapped with tungstenite in server role. The read half stays with the
//! serving loop; the write half sits behind a mutex on a cloned stream so
//! room broadcasts from other connections can interleave with replies.
//! Every outbound frame goes through that one guarded writer: the read
//! half's protocol layer writes into a discarding sink, and inbound pings
//! are answered explicitly via the writer, so two coroutines can never
//! interleave frame bytes on the wire.

use crate::error::{Error, Result};
use crate::server::{Request, ResponseWriter};
use dashmap::DashMap;
use may::net::TcpStream;
use may::sync::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use tungstenite::handshake::derive_accept_key;
use tungstenite::protocol::Role;
use tungstenite::WebSocket;

pub use tungstenite::Message;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Write halves of the members of one room, keyed by connection id.
pub(crate) type Room = HashMap<u64, WsWriter>;

/// All rooms of an application.
pub(crate) type RoomSet = DashMap<String, Room>;

/// Shareable write half of a connection.
#[derive(Clone)]
pub(crate) struct WsWriter {
    socket: Arc<Mutex<WebSocket<TcpStream>>>,
}

impl WsWriter {
    fn send(&self, message: Message) -> Result<()> {
        let mut socket = self.socket.lock().map_err(|_| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "websocket writer poisoned",
            ))
        })?;
        socket.send(message)?;
        Ok(())
    }
}

/// Inbound half of the connection. The protocol layer's automatic replies
/// (pongs, close acks) are swallowed here; the real answers are sent
/// through the shared [`WsWriter`] so only one socket ever writes.
struct ReadHalf(TcpStream);

impl Read for ReadHalf {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for ReadHalf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An upgraded WebSocket connection, bound to a handler for its lifetime.
pub struct WsConnection {
    id: u64,
    path: String,
    reader: WebSocket<ReadHalf>,
    writer: WsWriter,
    rooms: Arc<RoomSet>,
    joined: Vec<String>,
}

impl WsConnection {
    /// Perform the server side of the WebSocket handshake.
    pub(crate) fn upgrade(
        request: &Request,
        response: &mut ResponseWriter,
        rooms: Arc<RoomSet>,
    ) -> Result<Self> {
        if !request.is_websocket_upgrade() {
            return Err(Error::UpgradeRejected(
                "missing Upgrade/Connection headers".to_string(),
            ));
        }
        let key = request
            .header("sec-websocket-key")
            .ok_or_else(|| Error::UpgradeRejected("missing Sec-WebSocket-Key".to_string()))?;
        let accept = derive_accept_key(key.as_bytes());
        let mut stream = response.take_stream()?;
        let handshake = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {accept}\r\n\r\n"
        );
        stream.write_all(handshake.as_bytes())?;
        stream.flush()?;

        let write_half = stream.try_clone()?;
        let id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
        debug!(conn = id, path = %request.path, "websocket upgraded");
        Ok(WsConnection {
            id,
            path: request.path.clone(),
            reader: WebSocket::from_raw_socket(ReadHalf(stream), Role::Server, None),
            writer: WsWriter {
                socket: Arc::new(Mutex::new(WebSocket::from_raw_socket(
                    write_half,
                    Role::Server,
                    None,
                ))),
            },
            rooms,
            joined: Vec::new(),
        })
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Request path this connection was opened on.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Block until the next frame arrives. Pings are answered through the
    /// shared writer and never surface.
    pub fn read(&mut self) -> Result<Message> {
        loop {
            match self.reader.read()? {
                Message::Ping(data) => self.writer.send(Message::Pong(data))?,
                message => return Ok(message),
            }
        }
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.writer.send(Message::Text(text.into()))
    }

    pub fn send_binary(&self, data: Vec<u8>) -> Result<()> {
        self.writer.send(Message::Binary(data))
    }

    /// Serialize a value to JSON and send it as a text frame.
    pub fn send_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let text = serde_json::to_string(value).map_err(|e| {
            Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        self.send_text(text)
    }

    /// Join a room, creating it if needed. Joining twice is a no-op.
    pub fn join_room(&mut self, name: &str) {
        self.rooms
            .entry(name.to_string())
            .or_default()
            .insert(self.id, self.writer.clone());
        if !self.joined.iter().any(|r| r == name) {
            self.joined.push(name.to_string());
        }
    }

    pub fn leave_room(&mut self, name: &str) {
        remove_member(&self.rooms, name, self.id);
        self.joined.retain(|r| r != name);
    }

    /// Send a text frame to every member of a room, this connection
    /// included. Members whose sockets fail are dropped from the room.
    pub fn broadcast(&self, room: &str, text: &str) {
        broadcast_text(&self.rooms, room, text);
    }

    /// Leave all rooms and send a close frame. Errors are logged, not
    /// propagated: the peer may already be gone.
    pub(crate) fn close(&mut self) {
        for room in std::mem::take(&mut self.joined) {
            remove_member(&self.rooms, &room, self.id);
        }
        if let Err(e) = self.writer.send(Message::Close(None)) {
            debug!(conn = self.id, error = %e, "close frame not delivered");
        }
    }
}

fn remove_member(rooms: &RoomSet, name: &str, id: u64) {
    let empty = match rooms.get_mut(name) {
        Some(mut room) => {
            room.remove(&id);
            room.is_empty()
        }
        None => false,
    };
    if empty {
        rooms.remove_if(name, |_, room| room.is_empty());
    }
}

pub(crate) fn broadcast_text(rooms: &RoomSet, room: &str, text: &str) {
    let Some(members) = rooms.get(room) else {
        return;
    };
    let mut dead = Vec::new();
    for (id, writer) in members.iter() {
        if let Err(e) = writer.send(Message::Text(text.to_string())) {
            warn!(conn = id, room, error = %e, "dropping unreachable room member");
            dead.push(*id);
        }
    }
    drop(members);
    for id in dead {
        remove_member(rooms, room, id);
    }
}
