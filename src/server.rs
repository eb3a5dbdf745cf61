//! The server core: accept loop, per-connection worker, request dispatch,
//! and orderly shutdown (§4.6).

use std::io;
use std::net::{Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use socket2::{Domain, Protocol, Socket, Type};

use crate::protocol::{receive_message, send_message, Message, Operation, Payload, RpcError};
use crate::registry::Registry;

/// How long `serve_all` sleeps between non-blocking accept attempts when no
/// connection is pending. Short enough that shutdown is observed promptly,
/// long enough not to spin the accept thread.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Read timeout set on every accepted connection, so a worker blocked in
/// `is_socket_closed`'s peek between requests wakes up periodically to
/// re-check the running flag instead of blocking forever on an idle-but-open
/// peer (§5: "Workers observe the flag at each loop iteration").
const WORKER_READ_TIMEOUT: Duration = Duration::from_millis(200);

/// The backlog passed to `listen`, per §4.6 step 2.
const LISTEN_BACKLOG: i32 = 128;

/// A clonable handle onto the server's shutdown flag.
///
/// The library never installs an OS signal handler itself; callers that
/// want `serve_all` to stop on SIGINT wire one up externally and call
/// [`ShutdownHandle::shutdown`] from it (see `demos/server.rs`). This keeps
/// the library usable from embedders that drive shutdown some other way.
#[derive(Clone, Debug)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    /// Requests that the accept loop and every worker stop at their next
    /// opportunity.
    pub fn shutdown(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Whether shutdown has *not* been requested yet.
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A bound, not-yet-serving RPC server.
pub struct Server {
    listener: TcpListener,
    registry: Registry,
    running: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("registry", &self.registry)
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish()
    }
}

impl Server {
    /// Binds a dual-stack IPv6 listening socket with `SO_REUSEADDR` on
    /// `port`. Returns `None` on any bind failure; the underlying error is
    /// logged, since the caller only sees the absence (§4.6, §7).
    pub fn init(port: u16) -> Option<Server> {
        match bind_listener(port) {
            Ok(listener) => Some(Server {
                listener,
                registry: Registry::new(),
                running: Arc::new(AtomicBool::new(true)),
                workers: Mutex::new(Vec::new()),
            }),
            Err(e) => {
                error!("failed to bind listening socket on port {port}: {e}");
                None
            }
        }
    }

    /// The address this server is actually listening on. Useful when
    /// `init` was called with port 0 to pick an ephemeral port.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Registers `handler` under `name`, replacing any existing entry.
    pub fn register<F>(&self, name: &str, handler: F) -> Result<(), RpcError>
    where
        F: Fn(Payload) -> Option<Payload> + Send + Sync + 'static,
    {
        self.registry.register(name, handler)
    }

    /// A clonable shutdown handle for this server.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.running.clone())
    }

    /// Runs the accept loop until the shutdown handle is triggered.
    ///
    /// Spawns one OS thread per accepted connection; on exit, joins every
    /// spawned worker before returning (§4.6 step 5).
    pub fn serve_all(&self) -> Result<(), RpcError> {
        info!("accept loop starting on {:?}", self.listener.local_addr());

        while self.running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    stream.set_read_timeout(Some(WORKER_READ_TIMEOUT))?;
                    info!("accepted connection from {peer}");

                    let registry = self.registry.clone();
                    let running = self.running.clone();
                    let worker = thread::spawn(move || {
                        handle_all_requests(stream, registry, running, peer);
                    });

                    self.workers
                        .lock()
                        .expect("worker list lock poisoned")
                        .push(worker);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!("accept loop exiting, joining workers");
        let workers: Vec<_> = self
            .workers
            .lock()
            .expect("worker list lock poisoned")
            .drain(..)
            .collect();
        for worker in workers {
            let _ = worker.join();
        }

        Ok(())
    }
}

fn bind_listener(port: u16) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_only_v6(false)?;

    let addr: SocketAddr = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

/// A zero-byte `MSG_PEEK` the way `is_socket_closed` does it: blocks until
/// either data is pending (returns `false`), the peer has cleanly closed the
/// connection (returns `true`), or the connection's read timeout elapses
/// (returns `false`, so the caller re-checks the running flag instead of
/// blocking on an idle-but-open peer).
fn is_socket_closed(stream: &TcpStream) -> bool {
    let mut probe = [0u8; 1];
    match stream.peek(&mut probe) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
            false
        }
        Err(_) => false,
    }
}

fn handle_all_requests(
    mut stream: TcpStream,
    registry: Registry,
    running: Arc<AtomicBool>,
    peer: SocketAddr,
) {
    while running.load(Ordering::SeqCst) {
        if is_socket_closed(&stream) {
            debug!("peer {peer} disconnected");
            break;
        }

        if let Err(e) = handle_request(&mut stream, &registry) {
            warn!("connection {peer} ending: {e}");
            break;
        }
    }

    let _ = stream.shutdown(std::net::Shutdown::Both);
    debug!("worker for {peer} exiting");
}

fn handle_request(stream: &mut TcpStream, registry: &Registry) -> Result<(), RpcError> {
    let request = match receive_message(stream) {
        Ok(msg) => msg,
        Err(e) => {
            // Best-effort failure reply: we don't know the real request_id
            // or function_name since decoding never got that far.
            let failure = Message {
                request_id: 0,
                operation: Operation::ReplyFailure,
                function_name: "?".to_string(),
                data: Payload::empty(),
            };
            let _ = send_message(stream, &failure);
            return Err(e);
        }
    };

    match request.operation {
        Operation::FindRequest => {
            let found = registry.contains(&request.function_name);
            let reply = Message {
                request_id: request.request_id,
                operation: Operation::ReplySuccess,
                function_name: request.function_name,
                data: Payload::scalar(found as i32),
            };
            send_message(stream, &reply)
        }
        Operation::CallRequest => {
            let reply_data = registry
                .lookup(&request.function_name)
                .and_then(|handler| handler(request.data));

            let reply = match reply_data {
                Some(data) => Message {
                    request_id: request.request_id,
                    operation: Operation::ReplySuccess,
                    function_name: request.function_name,
                    data,
                },
                None => Message {
                    request_id: request.request_id,
                    operation: Operation::ReplyFailure,
                    function_name: request.function_name,
                    data: Payload::empty(),
                },
            };
            send_message(stream, &reply)
        }
        // The server never initiates requests, so a reply arriving here is
        // a no-op; an operation tag outside the known four is rejected
        // earlier, at decode time, and never reaches this match.
        Operation::ReplySuccess | Operation::ReplyFailure => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use pretty_assertions::assert_eq;
    use std::thread;
    use std::time::Duration;

    fn spawn_test_server() -> (u16, ShutdownHandle, JoinHandle<()>) {
        let server = Server::init(0).expect("bind ephemeral port");
        let port = server.local_addr().unwrap().port();
        server
            .register("add2", |p| {
                let rhs = p.data2.as_ref().and_then(|b| b.first()).copied().unwrap_or(0) as i8;
                Some(Payload::scalar(p.data1 + rhs as i32))
            })
            .unwrap();

        let handle = server.shutdown_handle();
        let join = thread::spawn(move || server.serve_all().unwrap());

        // Give the accept loop a moment to start listening.
        thread::sleep(Duration::from_millis(50));
        (port, handle, join)
    }

    #[test]
    fn add2_happy_path_and_negative_operand() {
        let (port, shutdown, join) = spawn_test_server();

        let mut client = Client::connect("::1", port).expect("client connects");
        let handle = client.find("add2").expect("add2 is registered");

        let reply = client
            .call(&handle, Payload {
                data1: 1,
                data2: Some(vec![100]),
            })
            .expect("call succeeds");
        assert_eq!(reply, Payload::scalar(101));

        let reply = client
            .call(&handle, Payload {
                data1: 0,
                data2: Some(vec![100]),
            })
            .expect("call succeeds");
        assert_eq!(reply, Payload::scalar(100));

        shutdown.shutdown();
        join.join().unwrap();
    }

    #[test]
    fn find_missing_handler_returns_none() {
        let (port, shutdown, join) = spawn_test_server();

        let mut client = Client::connect("::1", port).unwrap();
        assert!(client.find("sub2").is_none());

        shutdown.shutdown();
        join.join().unwrap();
    }

    #[test]
    fn overwrite_replaces_handler() {
        let server = Server::init(0).unwrap();
        let port = server.local_addr().unwrap().port();
        server.register("op", |p| Some(Payload::scalar(p.data1 + 1))).unwrap();
        server.register("op", |p| Some(Payload::scalar(p.data1 - 1))).unwrap();

        let shutdown = server.shutdown_handle();
        let join = thread::spawn(move || server.serve_all().unwrap());
        thread::sleep(Duration::from_millis(50));

        let mut client = Client::connect("::1", port).unwrap();
        let handle = client.find("op").unwrap();
        let reply = client.call(&handle, Payload::scalar(5)).unwrap();
        assert_eq!(reply, Payload::scalar(4));

        shutdown.shutdown();
        join.join().unwrap();
    }

    #[test]
    fn handler_returning_none_yields_reply_failure_and_connection_continues() {
        let server = Server::init(0).unwrap();
        let port = server.local_addr().unwrap().port();
        server.register("flaky", |_| None).unwrap();
        server.register("add2", |p| Some(Payload::scalar(p.data1))).unwrap();

        let shutdown = server.shutdown_handle();
        let join = thread::spawn(move || server.serve_all().unwrap());
        thread::sleep(Duration::from_millis(50));

        let mut client = Client::connect("::1", port).unwrap();
        let flaky = client.find("flaky").unwrap();
        assert!(client.call(&flaky, Payload::empty()).is_none());

        // The connection must still be usable for a subsequent request.
        let add2 = client.find("add2").unwrap();
        assert_eq!(client.call(&add2, Payload::scalar(7)).unwrap(), Payload::scalar(7));

        shutdown.shutdown();
        join.join().unwrap();
    }

    #[test]
    fn peer_disconnect_does_not_affect_other_workers() {
        let server = Server::init(0).unwrap();
        let port = server.local_addr().unwrap().port();
        server.register("add2", |p| Some(Payload::scalar(p.data1))).unwrap();

        let shutdown = server.shutdown_handle();
        let join = thread::spawn(move || server.serve_all().unwrap());
        thread::sleep(Duration::from_millis(50));

        let mut first = Client::connect("::1", port).unwrap();
        let handle = first.find("add2").unwrap();
        assert_eq!(first.call(&handle, Payload::scalar(1)).unwrap(), Payload::scalar(1));
        first.close();

        thread::sleep(Duration::from_millis(100));

        let mut second = Client::connect("::1", port).unwrap();
        let handle = second.find("add2").unwrap();
        assert_eq!(second.call(&handle, Payload::scalar(2)).unwrap(), Payload::scalar(2));

        shutdown.shutdown();
        join.join().unwrap();
    }

    #[test]
    fn interrupt_during_serve_finishes_in_flight_and_exits_cleanly() {
        let (port, shutdown, join) = spawn_test_server();

        let mut client = Client::connect("::1", port).unwrap();
        let handle = client.find("add2").unwrap();
        assert_eq!(client.call(&handle, Payload {
            data1: 1,
            data2: Some(vec![100]),
        }).unwrap(), Payload::scalar(101));

        shutdown.shutdown();
        join.join().expect("serve_all returns normally after shutdown");
    }
}
