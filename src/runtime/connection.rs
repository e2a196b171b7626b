//! Connection state machine and the registry of tracked connections.
//!
//! The registry is owned by the accept loop only. Workers never touch it;
//! they report their exit over a channel and the accept loop removes them.

use slab::Slab;
use std::net::SocketAddr;
use std::thread::JoinHandle;

/// Current state of a connection worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for bytes from the peer.
    Reading,
    /// Buffered bytes are ready to be handed to the handler.
    Handling,
    /// A response of `total` bytes sits in the output view.
    Writing {
        /// Total bytes to write.
        total: usize,
    },
    /// Connection is being closed.
    Closing,
}

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Peer closed, handler said done, or a socket error.
    Done,
    /// Shutdown token observed.
    Shutdown,
    /// The handler panicked.
    Panicked,
}

/// A tracked client connection.
#[derive(Debug)]
pub struct Connection {
    /// Slot whose buffer the worker owns.
    pub slot: usize,
    /// Remote address.
    pub peer: SocketAddr,
    /// Worker thread, taken when joined.
    pub handle: Option<JoinHandle<()>>,
}

impl Connection {
    pub fn new(slot: usize, peer: SocketAddr) -> Self {
        Self {
            slot,
            peer,
            handle: None,
        }
    }

    /// Wait for the worker thread to finish.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    /// Get a mutable reference to a connection.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: usize) -> Option<Connection> {
        self.connections.try_remove(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if there are no connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Check if no further connection can be tracked.
    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    /// Maximum number of connections allowed.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    /// Remove every connection, yielding them for joining.
    pub fn drain(&mut self) -> impl Iterator<Item = Connection> + '_ {
        self.connections.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_connection_registry() {
        let mut registry = ConnectionRegistry::new(2);

        let id1 = registry.insert(Connection::new(0, addr(1000))).unwrap();
        let id2 = registry.insert(Connection::new(1, addr(1001))).unwrap();

        // At capacity
        assert!(registry.is_full());
        assert!(registry.insert(Connection::new(2, addr(1002))).is_none());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get_mut(id1).unwrap().slot, 0);
        assert_eq!(registry.get_mut(id2).unwrap().peer, addr(1001));

        let removed = registry.remove(id1).unwrap();
        assert_eq!(removed.slot, 0);
        assert!(registry.get_mut(id1).is_none());
        assert!(registry.remove(id1).is_none());
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_full());
    }

    #[test]
    fn test_drain_joins_workers() {
        let mut registry = ConnectionRegistry::new(4);
        for slot in 0..3 {
            let id = registry.insert(Connection::new(slot, addr(2000))).unwrap();
            registry.get_mut(id).unwrap().handle = Some(std::thread::spawn(|| {}));
        }

        let mut joined = 0;
        for mut conn in registry.drain() {
            conn.join();
            assert!(conn.handle.is_none());
            joined += 1;
        }
        assert_eq!(joined, 3);
        assert!(registry.is_empty());
        assert_eq!(registry.capacity(), 4);
    }
}
