//! Demultiplexing datagram responses to pending requests.
//!
//! A [`Dispatch`] owns one UDP socket and a table of pending requests
//! keyed by transaction ID and peer address. The receive loop reads
//! datagrams off the socket and hands each to the request that is
//! waiting for it; datagrams that match no pending request are dropped
//! without further effect. One dispatch serves all the requests of one
//! worker loop.

use crate::invariant;
use rand::Rng;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::trace;

/// The receive buffer size. Large enough for any DNS datagram.
const RECV_BUF: usize = 65_536;

//------------ Dispatch ------------------------------------------------------

/// A pending table entry.
#[derive(Debug)]
enum Slot {
    /// The ID is taken but no request is listening yet.
    Reserved,

    /// A request is waiting for the response.
    Armed(oneshot::Sender<Vec<u8>>),
}

/// The transaction ID demultiplexer over a datagram socket.
#[derive(Debug)]
pub struct Dispatch {
    /// The socket requests are sent on and responses arrive on.
    socket: Arc<UdpSocket>,

    /// The pending requests, keyed by transaction ID and peer.
    pending: Mutex<HashMap<(u16, SocketAddr), Slot>>,
}

impl Dispatch {
    /// Binds a dispatch socket.
    ///
    /// With no explicit local address, binds to an ephemeral port on the
    /// unspecified IPv4 address.
    pub async fn bind(
        local: Option<SocketAddr>,
    ) -> Result<Arc<Self>, io::Error> {
        let local = local
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
        let socket = UdpSocket::bind(local).await?;
        Ok(Arc::new(Dispatch {
            socket: Arc::new(socket),
            pending: Default::default(),
        }))
    }

    /// Spawns the receive loop onto the current runtime.
    pub fn spawn_receiver(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; RECV_BUF];
            loop {
                match this.socket.recv_from(&mut buf).await {
                    Ok((len, source)) => {
                        this.deliver(&buf[..len], source)
                    }
                    Err(err) => {
                        trace!(error = %err, "dispatch receive error");
                    }
                }
            }
        })
    }

    /// Allocates a transaction ID for a request to the given peer.
    ///
    /// The ID is guaranteed distinct from every pending request to the
    /// same peer and stays reserved until the request registers or the
    /// reservation is released via [`unregister`][Self::unregister].
    pub fn allocate_id(&self, peer: SocketAddr) -> u16 {
        let mut pending = self.pending.lock().expect("poisoned dispatch");
        let mut rng = rand::thread_rng();
        loop {
            let id = rng.gen::<u16>();
            if let Entry::Vacant(entry) = pending.entry((id, peer)) {
                entry.insert(Slot::Reserved);
                return id;
            }
        }
    }

    /// Arms a pending entry with the channel to complete the request on.
    pub(crate) fn register(
        &self,
        id: u16,
        peer: SocketAddr,
        sender: oneshot::Sender<Vec<u8>>,
    ) {
        let mut pending = self.pending.lock().expect("poisoned dispatch");
        let slot = pending.insert((id, peer), Slot::Armed(sender));
        invariant!(
            !matches!(slot, Some(Slot::Armed(_))),
            "two requests registered for one transaction ID"
        );
    }

    /// Removes a pending entry.
    ///
    /// Called on completion, cancellation, and reservation release. Runs
    /// under the table lock, so once it returns no response can reach
    /// the request anymore.
    pub(crate) fn unregister(&self, id: u16, peer: SocketAddr) {
        self.pending
            .lock()
            .expect("poisoned dispatch")
            .remove(&(id, peer));
    }

    /// Hands a received datagram to the request waiting for it.
    ///
    /// A datagram that is too short to carry a transaction ID, or whose
    /// ID and source match no armed entry, is dropped silently.
    pub fn deliver(&self, octets: &[u8], source: SocketAddr) {
        if octets.len() < 2 {
            trace!(%source, "dropping runt datagram");
            return;
        }
        let id = u16::from_be_bytes([octets[0], octets[1]]);
        let mut pending = self.pending.lock().expect("poisoned dispatch");
        match pending.get(&(id, source)) {
            Some(Slot::Armed(_)) => {}
            _ => {
                trace!(%source, id, "dropping unexpected datagram");
                return;
            }
        }
        if let Some(Slot::Armed(sender)) = pending.remove(&(id, source)) {
            // The receiver may be gone if the request timed out between
            // the lookup and here; the datagram is dropped then, too.
            let _ = sender.send(octets.to_vec());
        }
    }

    /// Sends a datagram to the given peer.
    pub(crate) async fn send(
        &self,
        octets: &[u8],
        peer: SocketAddr,
    ) -> Result<(), io::Error> {
        let sent = self.socket.send_to(octets, peer).await?;
        if sent != octets.len() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "short datagram send",
            ));
        }
        Ok(())
    }

    /// Returns the local address of the dispatch socket.
    pub fn local_addr(&self) -> Result<SocketAddr, io::Error> {
        self.socket.local_addr()
    }

    /// Returns the number of pending entries. For tests.
    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.lock().expect("poisoned dispatch").len()
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    async fn dispatch() -> Arc<Dispatch> {
        Dispatch::bind(Some(SocketAddr::from(([127, 0, 0, 1], 0))))
            .await
            .unwrap()
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 5300))
    }

    #[tokio::test]
    async fn allocated_ids_are_distinct() {
        let dispatch = dispatch().await;
        let mut ids = std::collections::HashSet::new();
        for _ in 0..100 {
            assert!(ids.insert(dispatch.allocate_id(peer())));
        }
        assert_eq!(dispatch.pending_len(), 100);
    }

    #[tokio::test]
    async fn delivery_matches_id_and_source() {
        let dispatch = dispatch().await;
        let id = dispatch.allocate_id(peer());
        let (tx, mut rx) = oneshot::channel();
        dispatch.register(id, peer(), tx);

        // Wrong ID and wrong source both fall on the floor.
        let mut wrong = (id ^ 0xFFFF).to_be_bytes().to_vec();
        wrong.extend_from_slice(&[0; 10]);
        dispatch.deliver(&wrong, peer());
        let other = SocketAddr::from(([127, 0, 0, 2], 5300));
        let mut right = id.to_be_bytes().to_vec();
        right.extend_from_slice(&[0; 10]);
        dispatch.deliver(&right, other);
        assert!(rx.try_recv().is_err());

        dispatch.deliver(&right, peer());
        assert_eq!(rx.try_recv().unwrap(), right);
        assert_eq!(dispatch.pending_len(), 0);
    }

    #[tokio::test]
    async fn unregister_suppresses_delivery() {
        let dispatch = dispatch().await;
        let id = dispatch.allocate_id(peer());
        let (tx, mut rx) = oneshot::channel();
        dispatch.register(id, peer(), tx);
        dispatch.unregister(id, peer());

        let mut datagram = id.to_be_bytes().to_vec();
        datagram.extend_from_slice(&[0; 10]);
        dispatch.deliver(&datagram, peer());
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn runt_datagram_dropped() {
        let dispatch = dispatch().await;
        // One octet cannot carry a transaction ID.
        dispatch.deliver(&[0x42], peer());
        assert_eq!(dispatch.pending_len(), 0);
    }
}
