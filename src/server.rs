//! TCP accept loop.
//!
//! A single thread owns the listening socket, the buffer pool and the
//! connection registry. Each iteration it polls the listener with a zero
//! timeout, accepts at most one connection, and hands it to a freshly
//! spawned worker thread. Workers report back over a channel when they are
//! done; only this loop ever mutates the registry or the pool.

use crate::config::{Config, ConfigError};
use crate::runtime::{
    BufferPool, Connection, ConnectionRegistry, Handler, ServerStats, StatsSnapshot, Worker,
    WorkerContext, WorkerExit,
};
use crate::shutdown::Shutdown;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::AsRawFd;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(0);

/// Server instance
pub struct Server<H> {
    config: Config,
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<H>,
    stats: Arc<ServerStats>,
}

impl<H: Handler> Server<H> {
    /// Validate the configuration and bind the listening socket.
    ///
    /// Fails outright if the socket cannot be opened; there is no
    /// half-constructed server.
    pub fn bind(config: Config, handler: H) -> Result<Self, ServerError> {
        config.validate()?;

        let listener = resolve(&config.listen)
            .and_then(|addr| create_listener(addr, config.backlog))
            .map_err(|e| ServerError::Bind(config.listen.clone(), e))?;
        let local_addr = listener.local_addr()?;

        info!(
            address = %local_addr,
            max_clients = config.max_clients,
            slot_size = config.slot_size(),
            "Server listening"
        );

        Ok(Server {
            config,
            listener,
            local_addr,
            handler: Arc::new(handler),
            stats: Arc::new(ServerStats::new()),
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live counters, shared with the running server.
    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    /// Accept and serve connections until `shutdown` is triggered.
    ///
    /// Returns once every worker has exited; the listening socket is closed
    /// last.
    pub fn run(self, shutdown: Shutdown) -> Result<StatsSnapshot, ServerError> {
        let Server {
            config,
            listener,
            handler,
            stats,
            ..
        } = self;

        let poll = Poll::new()?;
        let fd = listener.as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&fd), LISTENER_TOKEN, Interest::READABLE)?;

        let (exit_tx, exits) = mpsc::channel();
        let ctx = WorkerContext {
            handler,
            shutdown: shutdown.clone(),
            stats: Arc::clone(&stats),
            write_policy: config.write_policy,
        };

        let mut mux = Multiplexer {
            listener,
            poll,
            events: Events::with_capacity(config.max_clients + 1),
            pool: BufferPool::partition(config.buffer_size, config.max_clients),
            registry: ConnectionRegistry::new(config.max_clients),
            exit_tx,
            exits,
            ctx,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            listener_ready: false,
            deferring: false,
        };

        loop {
            if !mux.poll_and_accept() {
                // Nothing ready: give the CPU back.
                thread::sleep(config.poll_interval);
            }
            if shutdown.is_triggered() {
                break;
            }
        }

        mux.finish();
        Ok(stats.snapshot())
    }
}

/// State owned by the accept loop.
struct Multiplexer<H> {
    listener: TcpListener,
    poll: Poll,
    events: Events,
    pool: BufferPool,
    registry: ConnectionRegistry,
    exit_tx: Sender<WorkerExit>,
    exits: Receiver<WorkerExit>,
    ctx: WorkerContext<H>,
    read_timeout: Duration,
    write_timeout: Duration,
    /// Readiness is edge-triggered, so remember it until accept drains it.
    listener_ready: bool,
    /// All slots busy; pending connections wait in the backlog.
    deferring: bool,
}

impl<H: Handler> Multiplexer<H> {
    /// One iteration of the accept loop. Returns whether any work was done.
    fn poll_and_accept(&mut self) -> bool {
        let mut busy = self.reap_exits() > 0;

        match self.poll.poll(&mut self.events, Some(Duration::ZERO)) {
            Ok(()) => {
                if self.events.iter().any(|e| e.token() == LISTENER_TOKEN) {
                    self.listener_ready = true;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!(error = %e, "Error polling the listen socket");
            }
        }

        if !self.listener_ready {
            return busy;
        }

        if self.registry.is_full() || self.pool.available() == 0 {
            if !self.deferring {
                warn!(
                    active = self.registry.len(),
                    max_clients = self.registry.capacity(),
                    "Too many clients, deferring accept"
                );
                self.deferring = true;
            }
            return busy;
        }
        self.deferring = false;

        busy |= self.accept_one();
        busy
    }

    fn accept_one(&mut self) -> bool {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                self.start_worker(stream, peer);
                true
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.listener_ready = false;
                false
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => false,
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                false
            }
        }
    }

    fn start_worker(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = configure_stream(&stream, self.read_timeout, self.write_timeout) {
            warn!(peer = %peer, error = %e, "Failed to configure client socket");
            return;
        }

        let Some(buffer) = self.pool.alloc() else {
            warn!(peer = %peer, "Buffer pool exhausted, dropping connection");
            return;
        };
        let slot = buffer.slot();

        let Some(conn_id) = self.registry.insert(Connection::new(slot, peer)) else {
            warn!(peer = %peer, "Connection limit reached, dropping connection");
            self.pool.free(buffer);
            return;
        };

        // Counted before the worker can answer anything.
        let active = self.ctx.stats.record_accept();
        let worker = Worker::new(conn_id, stream, buffer, self.ctx.clone());
        match worker.spawn(self.exit_tx.clone()) {
            Ok(handle) => {
                if let Some(conn) = self.registry.get_mut(conn_id) {
                    conn.handle = Some(handle);
                }
                info!(conn_id, slot, peer = %peer, active, "Accepted connection");
            }
            Err(e) => {
                error!(conn_id, error = %e, "Failed to spawn worker");
                self.ctx.stats.record_close();
                self.registry.remove(conn_id);
                // The buffer went down with the unspawned closure.
                self.pool.reclaim(slot);
            }
        }
    }

    /// Release every connection whose worker has reported its exit.
    fn reap_exits(&mut self) -> usize {
        let mut reaped = 0;
        while let Ok(exit) = self.exits.try_recv() {
            self.release(exit);
            reaped += 1;
        }
        reaped
    }

    fn release(&mut self, exit: WorkerExit) {
        // Entries are already gone when reaping after a shutdown drain.
        let peer = self.registry.remove(exit.conn_id).map(|mut conn| {
            debug_assert_eq!(conn.slot, exit.buffer.slot());
            conn.join();
            conn.peer
        });
        let slot = exit.buffer.slot();
        self.pool.free(exit.buffer);
        let active = self.ctx.stats.record_close();
        info!(
            conn_id = exit.conn_id,
            slot,
            peer = ?peer,
            reason = ?exit.reason,
            active,
            "Connection closed"
        );
    }

    /// Wait for every worker, then reclaim what they hand back.
    fn finish(mut self) {
        if self.registry.is_empty() {
            info!("Shutting down");
        } else {
            info!(
                active = self.registry.len(),
                "Shutting down, waiting for workers"
            );
        }

        let fd = self.listener.as_raw_fd();
        if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
            debug!(error = %e, "Failed to deregister listener");
        }

        // Workers own their sockets; joining first means nothing is closed
        // twice or while still in use.
        for mut conn in self.registry.drain() {
            conn.join();
        }
        self.reap_exits();

        debug!(
            free_slots = self.pool.available(),
            total_slots = self.pool.capacity(),
            "All workers stopped"
        );
    }
}

fn resolve(listen: &str) -> io::Result<SocketAddr> {
    listen.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("'{listen}' did not resolve to any address"),
        )
    })
}

/// Create a non-blocking listening socket.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// Workers do blocking I/O, bounded both ways so they always get back to
/// checking for shutdown. A peer that stops reading is dropped once a write
/// stalls past `write_timeout`.
fn configure_stream(
    stream: &TcpStream,
    read_timeout: Duration,
    write_timeout: Duration,
) -> io::Result<()> {
    // Accepted sockets inherit O_NONBLOCK on some platforms.
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(read_timeout))?;
    stream.set_write_timeout(Some(write_timeout))
}

/// Server startup errors
#[derive(Debug)]
pub enum ServerError {
    Config(ConfigError),
    Bind(String, io::Error),
    Io(io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Config(e) => write!(f, "{}", e),
            ServerError::Bind(addr, e) => {
                write!(f, "Unable to open TCP socket on '{}': {}", addr, e)
            }
            ServerError::Io(e) => write!(f, "Server I/O error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Config(e) => Some(e),
            ServerError::Bind(_, e) | ServerError::Io(e) => Some(e),
        }
    }
}

impl From<ConfigError> for ServerError {
    fn from(e: ConfigError) -> Self {
        ServerError::Config(e)
    }
}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        ServerError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::PingHandler;
    use std::io::{Read, Write};
    use std::time::Instant;

    fn test_config() -> Config {
        Config {
            listen: "127.0.0.1:0".to_string(),
            max_clients: 2,
            buffer_size: 2 * 1024,
            read_timeout: Duration::from_millis(20),
            ..Config::default()
        }
    }

    #[test]
    fn test_server_creation() {
        let server = Server::bind(test_config(), PingHandler).unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.stats().active(), 0);
    }

    #[test]
    fn test_bind_rejects_invalid_config() {
        let config = Config {
            max_clients: 0,
            ..test_config()
        };
        assert!(matches!(
            Server::bind(config, PingHandler),
            Err(ServerError::Config(_))
        ));
    }

    #[test]
    fn test_bind_fails_when_address_taken() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = Config {
            listen: taken.local_addr().unwrap().to_string(),
            ..test_config()
        };

        let err = Server::bind(config, PingHandler).err().unwrap();
        assert!(matches!(err, ServerError::Bind(_, _)));
        assert!(err.to_string().starts_with("Unable to open TCP socket"));
    }

    #[test]
    fn test_run_until_shutdown() {
        let server = Server::bind(test_config(), PingHandler).unwrap();
        let addr = server.local_addr();
        let stats = server.stats();
        let shutdown = Shutdown::new();
        let runner = {
            let shutdown = shutdown.clone();
            thread::spawn(move || server.run(shutdown))
        };

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(b"PING\r\n").unwrap();
        let mut buf = [0u8; 6];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"PONG\r\n");
        assert_eq!(stats.active(), 1);

        // The worker is still connected; shutdown must not hang on it.
        let started = Instant::now();
        shutdown.trigger();
        let snapshot = runner.join().unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));

        assert_eq!(snapshot.accepted, 1);
        assert_eq!(snapshot.packets, 1);
        assert_eq!(snapshot.active, 0);

        // Worker closed its end of the connection.
        let mut rest = Vec::new();
        assert_eq!(client.read_to_end(&mut rest).unwrap_or(0), 0);
    }
}
