//! The probe multiplexer: one socket per address family, correlating
//! replies to in-flight probes and expiring the ones that never answer.

use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::codec::{self, AddressFamily};
use crate::config::Config;
use crate::error::{PingError, Result};
use crate::outcome::Outcome;
use crate::socket::Transport;

/// Opaque identifier allocated by a multiplexer, unique among its
/// currently in-flight probes.
pub type SessionId = u32;

/// A single-use handoff to a suspended caller. Completion slots never
/// reference the multiplexer that created them, so there is no cycle to
/// worry about: the actor holds the sender half, the caller holds this.
pub struct PendingProbe {
    pub session_id: SessionId,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingProbe {
    /// Await the outcome. If the multiplexer actor is gone (e.g. the
    /// process is shutting down) this resolves to `Lost` rather than
    /// panicking — the caller asked for a probe result, and "we don't
    /// know" is the honest answer closest to a real timeout.
    pub async fn wait(self) -> Outcome {
        self.rx.await.unwrap_or(Outcome::Lost)
    }
}

struct PendingEntry {
    identifier: u16,
    sequence: u16,
    send_timestamp_ns: u64,
    deadline_ns: u64,
    completion: oneshot::Sender<Outcome>,
}

enum Command {
    Submit {
        destination: IpAddr,
        size: usize,
        identifier: u16,
        sequence: u16,
        ack: oneshot::Sender<Result<PendingProbe>>,
    },
}

fn actor_gone() -> PingError {
    PingError::Transport(io::Error::new(io::ErrorKind::BrokenPipe, "multiplexer actor is no longer running"))
}

/// Handle to a running multiplexer actor. Cheap to clone; every probe on a
/// given address family shares the same handle (and socket) through the
/// [`crate::Client`] facade.
#[derive(Clone)]
pub struct Multiplexer {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl Multiplexer {
    /// Open the socket for `family` per `config`'s selection policy, then
    /// spawn the actor task that owns it for the rest of its life.
    pub fn spawn(family: AddressFamily, config: &Config) -> Result<Self> {
        let transport = Transport::open(family, config.policy(), &config.transport_for(family))?;
        let magic: u64 = rand::thread_rng().gen();
        debug!(?family, kind = ?transport.kind(), "opened multiplexer socket");

        let actor = MultiplexerActor {
            family,
            transport,
            magic,
            timeout_ns: config.timeout().as_nanos() as u64,
            clock: Arc::new(Clock::new(config.clock_mode())),
            pending: HashMap::new(),
            fallback_index: HashMap::new(),
            next_session: rand::thread_rng().gen(),
        };

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(actor.run(cmd_rx));
        Ok(Self { cmd_tx })
    }

    /// Submit one echo request and return its session id and completion
    /// slot. Mirrors the spec's `submit(destination, size) -> (session_id,
    /// Awaitable<Result>)` operation.
    pub async fn submit(
        &self,
        destination: IpAddr,
        size: usize,
        identifier: u16,
        sequence: u16,
    ) -> Result<PendingProbe> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Submit { destination, size, identifier, sequence, ack: ack_tx })
            .map_err(|_| actor_gone())?;
        ack_rx.await.map_err(|_| actor_gone())?
    }
}

struct MultiplexerActor {
    family: AddressFamily,
    transport: Transport,
    magic: u64,
    timeout_ns: u64,
    clock: Arc<Clock>,
    pending: HashMap<SessionId, PendingEntry>,
    fallback_index: HashMap<(u16, u16), SessionId>,
    next_session: u32,
}

impl MultiplexerActor {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        // A single reusable timer, reset to the nearest deadline every
        // iteration and gated off entirely when nothing is pending — this
        // is the "schedule one if none is scheduled / re-arm for the
        // nearest deadline / otherwise leave it unarmed" timer from the
        // spec, expressed as one tokio::select branch.
        let sleep = time::sleep(Duration::from_secs(3600));
        tokio::pin!(sleep);

        loop {
            if let Some(deadline_ns) = self.next_deadline_ns() {
                let now_ns = self.clock.now_ns();
                let delay = Duration::from_nanos(deadline_ns.saturating_sub(now_ns));
                sleep.as_mut().reset(time::Instant::now() + delay);
            }

            tokio::select! {
                maybe_cmd = cmd_rx.recv() => {
                    match maybe_cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break, // every Multiplexer handle was dropped
                    }
                }
                res = self.transport.readable() => {
                    if res.is_ok() {
                        self.on_readable();
                    }
                    // Read errors other than would-block are transient; the
                    // expiration sweep ensures forward progress regardless.
                }
                _ = &mut sleep, if self.has_pending() => {
                    self.on_expiration_tick();
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Submit { destination, size, identifier, sequence, ack } => {
                let result = self.submit(destination, size, identifier, sequence);
                let _ = ack.send(result);
            }
        }
    }

    fn submit(
        &mut self,
        destination: IpAddr,
        size: usize,
        identifier: u16,
        sequence: u16,
    ) -> Result<PendingProbe> {
        let session_id = self.alloc_session_id();
        let send_timestamp_ns = self.clock.now_ns();
        let packet = codec::build_echo_request_sized(
            self.family,
            identifier,
            sequence,
            session_id,
            self.magic,
            send_timestamp_ns,
            size,
        )?;

        match self.transport.send(destination, &packet) {
            Ok(n) if n == packet.len() => {}
            Ok(n) => {
                trace!(sent = n, expected = packet.len(), "short write on ICMP send");
            }
            Err(PingError::UnreachableHost) => {
                // No route: the spec requires this resolve immediately to
                // `Lost` without ever becoming a pending entry.
                let (tx, rx) = oneshot::channel();
                let _ = tx.send(Outcome::Lost);
                return Ok(PendingProbe { session_id, rx });
            }
            Err(e) => return Err(e),
        }

        let deadline_ns = send_timestamp_ns + self.timeout_ns;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            session_id,
            PendingEntry { identifier, sequence, send_timestamp_ns, deadline_ns, completion: tx },
        );
        self.fallback_index.insert((identifier, sequence), session_id);
        Ok(PendingProbe { session_id, rx })
    }

    fn on_readable(&mut self) {
        let clock = Arc::clone(&self.clock);
        let magic = self.magic;
        let replies = self.transport.drain_receive(move || clock.now_ns(), magic);

        for (arrival_ts_ns, wire_identity) in replies {
            let session_id = match wire_identity.session_id {
                Some(id) if self.pending.contains_key(&id) => id,
                _ => match self.fallback_index.get(&(wire_identity.identifier, wire_identity.sequence)) {
                    Some(&id) => id,
                    None => continue, // duplicate, foreign, or already-resolved reply
                },
            };
            if let Some(entry) = self.pending.remove(&session_id) {
                self.fallback_index.remove(&(entry.identifier, entry.sequence));
                let rtt_ns = arrival_ts_ns.saturating_sub(entry.send_timestamp_ns);
                let _ = entry.completion.send(Outcome::Rtt(Duration::from_nanos(rtt_ns)));
            }
        }
    }

    fn on_expiration_tick(&mut self) {
        let now_ns = self.clock.now_ns();
        let mut expired: Vec<(u64, SessionId)> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.deadline_ns <= now_ns)
            .map(|(&id, entry)| (entry.deadline_ns, id))
            .collect();
        // Deadline order, ties broken by session_id — `(deadline, id)`
        // tuples sort exactly that way.
        expired.sort_unstable();

        for (_, session_id) in expired {
            if let Some(entry) = self.pending.remove(&session_id) {
                self.fallback_index.remove(&(entry.identifier, entry.sequence));
                let _ = entry.completion.send(Outcome::Lost);
            }
        }
    }

    fn next_deadline_ns(&self) -> Option<u64> {
        self.pending.values().map(|e| e.deadline_ns).min()
    }

    fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Allocate a session id, skipping any id still live in the pending
    /// table (the only case wraparound can actually collide).
    fn alloc_session_id(&mut self) -> SessionId {
        Self::next_free_id(&self.pending, &mut self.next_session)
    }

    fn next_free_id(pending: &HashMap<SessionId, PendingEntry>, cursor: &mut u32) -> SessionId {
        loop {
            let id = *cursor;
            *cursor = cursor.wrapping_add(1);
            if !pending.contains_key(&id) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn dummy_entry() -> PendingEntry {
        let (tx, _rx) = oneshot::channel();
        PendingEntry { identifier: 0, sequence: 0, send_timestamp_ns: 0, deadline_ns: 0, completion: tx }
    }

    #[test]
    fn session_alloc_skips_live_ids() {
        let mut pending = HashMap::new();
        pending.insert(5u32, dummy_entry());
        pending.insert(6u32, dummy_entry());
        let mut cursor = 5u32;
        let id = MultiplexerActor::next_free_id(&pending, &mut cursor);
        assert_eq!(id, 7);
    }

    #[test]
    fn session_alloc_wraps_around() {
        let mut pending = HashMap::new();
        pending.insert(u32::MAX, dummy_entry());
        let mut cursor = u32::MAX;
        let id = MultiplexerActor::next_free_id(&pending, &mut cursor);
        assert_eq!(id, 0);
    }
}
