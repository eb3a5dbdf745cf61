//! The blocking RPC client: connect, find a handler by name, call it (§4.7).

use std::io;
use std::net::TcpStream;
use std::sync::atomic::{AtomicI32, Ordering};

use log::{debug, warn};

use crate::protocol::{receive_message, send_message, Message, Operation, Payload};

/// A handler resolved by a prior [`Client::find`] call.
///
/// Carries only the name; the wire protocol has no separate handle token, so
/// binding a name once and reusing the `Handle` for many calls is purely a
/// convenience against repeated typos, not a cheaper call path (§4.7, §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handle {
    name: String,
}

/// A connected client. Requests and replies on one connection are strictly
/// FIFO: `call` always reads the reply to the request it just sent before
/// any other request may be issued, since `&mut self` prevents concurrent
/// use of the same connection.
pub struct Client {
    stream: TcpStream,
    next_request_id: AtomicI32,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("peer_addr", &self.stream.peer_addr().ok())
            .finish()
    }
}

impl Client {
    /// Connects to `host:port`. `host` may be any string `ToSocketAddrs`
    /// resolves, including a bare IPv6 literal like `"::1"`.
    pub fn connect(host: &str, port: u16) -> Option<Client> {
        match TcpStream::connect((host, port)) {
            Ok(stream) => {
                debug!("connected to {host}:{port}");
                Some(Client {
                    stream,
                    next_request_id: AtomicI32::new(0),
                })
            }
            Err(e) => {
                warn!("failed to connect to {host}:{port}: {e}");
                None
            }
        }
    }

    /// Asks the server whether a handler is registered under `name`.
    /// Returns `None` if it isn't, or if the exchange fails for any reason.
    pub fn find(&mut self, name: &str) -> Option<Handle> {
        let request = Message {
            request_id: self.next_request_id(),
            operation: Operation::FindRequest,
            function_name: name.to_string(),
            data: Payload::empty(),
        };

        let reply = self.roundtrip(&request).ok()?;
        match reply.operation {
            Operation::ReplySuccess if reply.data.data1 == 1 => Some(Handle {
                name: name.to_string(),
            }),
            _ => None,
        }
    }

    /// Invokes the handler bound to `handle` with `payload`. Returns `None`
    /// if the server replies with failure, or if the exchange fails.
    pub fn call(&mut self, handle: &Handle, payload: Payload) -> Option<Payload> {
        let request = Message {
            request_id: self.next_request_id(),
            operation: Operation::CallRequest,
            function_name: handle.name.clone(),
            data: payload,
        };

        let reply = self.roundtrip(&request).ok()?;
        match reply.operation {
            Operation::ReplySuccess => Some(reply.data),
            _ => None,
        }
    }

    /// Closes the connection. Idempotent: dropping a `Client` without
    /// calling this also closes the socket.
    pub fn close(self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    fn roundtrip(&mut self, request: &Message) -> io::Result<Message> {
        send_message(&mut self.stream, request).map_err(io::Error::from)?;
        receive_message(&mut self.stream).map_err(io::Error::from)
    }

    fn next_request_id(&self) -> i32 {
        self.next_request_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl From<crate::protocol::RpcError> for io::Error {
    fn from(e: crate::protocol::RpcError) -> Self {
        match e {
            crate::protocol::RpcError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}
