//! Point-to-point messaging and the collectives built on it.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::backend::TransportError;

/// A rank's view of a group of processes exchanging byte frames.
///
/// Implementations provide ordered point-to-point `send`/`recv`; the
/// collectives have default implementations in terms of those. Every rank
/// must call a collective in the same order with the same root.
pub trait Communicator: Send {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn send(&self, dest: usize, payload: Vec<u8>) -> Result<(), TransportError>;

    fn recv(&self, source: usize) -> Result<Vec<u8>, TransportError>;

    /// Root sends `payload` to every other rank; every rank returns it.
    fn broadcast(&self, root: usize, payload: Option<Vec<u8>>) -> Result<Vec<u8>, TransportError> {
        if self.rank() != root {
            return self.recv(root);
        }
        let payload = payload.ok_or_else(|| TransportError::UnexpectedFrame {
            expected: "broadcast payload at root".into(),
            found: "nothing".into(),
        })?;
        for dest in (0..self.size()).filter(|&dest| dest != root) {
            self.send(dest, payload.clone())?;
        }
        Ok(payload)
    }

    /// Every rank contributes `payload`; the root returns them in rank order.
    fn gather(&self, root: usize, payload: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>, TransportError> {
        if self.rank() != root {
            self.send(root, payload)?;
            return Ok(None);
        }
        let mut own = Some(payload);
        let mut gathered = Vec::with_capacity(self.size());
        for source in 0..self.size() {
            if source == root {
                gathered.push(own.take().unwrap_or_default());
            } else {
                gathered.push(self.recv(source)?);
            }
        }
        Ok(Some(gathered))
    }
}

/// An in-process group of ranks connected by a full mesh of channels.
pub struct LocalCluster;

impl LocalCluster {
    /// Create `size` connected endpoints, indexed by rank.
    pub fn connect(size: usize) -> Vec<LocalComm> {
        // senders[src][dst], receivers[dst][src]
        let mut senders: Vec<Vec<Sender<Vec<u8>>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut receivers: Vec<Vec<Receiver<Vec<u8>>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();
        for outbox in senders.iter_mut() {
            for inbox in receivers.iter_mut() {
                let (tx, rx) = unbounded();
                outbox.push(tx);
                inbox.push(rx);
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (outbox, inbox))| LocalComm {
                rank,
                size,
                outbox,
                inbox,
            })
            .collect()
    }
}

/// One rank of a [`LocalCluster`].
pub struct LocalComm {
    rank: usize,
    size: usize,
    outbox: Vec<Sender<Vec<u8>>>,
    inbox: Vec<Receiver<Vec<u8>>>,
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, dest: usize, payload: Vec<u8>) -> Result<(), TransportError> {
        let disconnected = || TransportError::Disconnected {
            peer: format!("rank {}", dest),
        };
        self.outbox
            .get(dest)
            .ok_or_else(disconnected)?
            .send(payload)
            .map_err(|_| disconnected())
    }

    fn recv(&self, source: usize) -> Result<Vec<u8>, TransportError> {
        let disconnected = || TransportError::Disconnected {
            peer: format!("rank {}", source),
        };
        self.inbox
            .get(source)
            .ok_or_else(disconnected)?
            .recv()
            .map_err(|_| disconnected())
    }
}
