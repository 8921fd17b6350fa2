//! An sACN Receiver.
//!
//! Responsible for receiving and processing sACN packets.
//!
//! The [Receiver] owns the socket and a worker thread; the actual protocol
//! logic lives in a passive handler the worker (or a test) feeds datagrams
//! into. Callbacks are registered per event kind: availability changes of a
//! universe, or new DMX data on a specific universe.

use crate::packet::{DataPacket, Packet, PacketError, validate_universe};
use crate::socket::{ReceiverSocket, UdpReceiverSocket};
use crate::{DEFAULT_PORT, MAX_UNIVERSE_SIZE, NETWORK_DATA_LOSS_TIMEOUT, Slot, UniverseNumber};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;
use std::{fmt, io, thread};

/// Error type returned by a [Receiver].
#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    /// An [std::io::Error] wrapper.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A [PacketError] wrapper.
    #[error(transparent)]
    Packet(#[from] PacketError),

    /// An unknown listener trigger name.
    #[error("unknown listener trigger {0:?}. Valid triggers: \"availability\" and \"universe\"")]
    UnknownTrigger(String),
}

/// The event kinds a callback can be registered for.
///
/// The string names are part of the public API for compatibility:
/// `"availability"` parses to [Trigger::Availability] and `"universe"` to
/// [Trigger::Universe]; any other name is rejected with
/// [ReceiverError::UnknownTrigger].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A universe became available or timed out.
    /// Subscribe with [Receiver::listen_availability].
    Availability,
    /// New DMX data arrived for a universe.
    /// Subscribe with [Receiver::listen_universe].
    Universe,
}

impl FromStr for Trigger {
    type Err = ReceiverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "availability" => Ok(Trigger::Availability),
            "universe" => Ok(Trigger::Universe),
            other => Err(ReceiverError::UnknownTrigger(other.to_string())),
        }
    }
}

/// Why the availability of a universe changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityChange {
    /// The first data packet of a new cycle arrived for the universe.
    Available,
    /// The universe timed out, or its source terminated the stream.
    Timeout,
}

impl fmt::Display for AvailabilityChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvailabilityChange::Available => write!(f, "available"),
            AvailabilityChange::Timeout => write!(f, "timeout"),
        }
    }
}

type AvailabilityCallback = Box<dyn FnMut(UniverseNumber, AvailabilityChange) + Send>;
type UniverseCallback = Box<dyn FnMut(&DataPacket) + Send>;

/// Configuration for a [Receiver].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// The IP address the receiver should bind to.
    pub ip: IpAddr,
    /// The port the receiver should bind to.
    pub port: u16,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self { ip: Ipv4Addr::UNSPECIFIED.into(), port: DEFAULT_PORT }
    }
}

/// An sACN receiver.
///
/// Consumes E1.31 data packets, arbitrates between concurrent sources per
/// universe (priority, sequence numbers, data-loss timeouts) and notifies
/// registered callbacks. Packet processing runs on a dedicated worker
/// thread started with [Receiver::start].
pub struct Receiver {
    handler: Arc<ReceiverHandler>,
    socket: Arc<dyn ReceiverSocket>,
    enabled: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Receiver {
    /// Creates a new [Receiver] with a UDP socket bound to the configured
    /// address. Bind errors are surfaced here.
    pub fn new(config: ReceiverConfig) -> Result<Self, ReceiverError> {
        let socket = UdpReceiverSocket::bind(config.ip, config.port)?;
        Ok(Self::with_socket(Arc::new(socket)))
    }

    /// Creates a new [Receiver] on top of any [ReceiverSocket] implementation.
    pub fn with_socket(socket: Arc<dyn ReceiverSocket>) -> Self {
        Self {
            handler: Arc::new(ReceiverHandler::default()),
            socket,
            enabled: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    /// Starts the worker thread. Does nothing if it is already running.
    pub fn start(&mut self) {
        if self.thread_handle.is_some() {
            return;
        }

        self.enabled.store(true, Ordering::Release);
        let handler = Arc::clone(&self.handler);
        let socket = Arc::clone(&self.socket);
        let enabled = Arc::clone(&self.enabled);
        self.thread_handle = Some(thread::spawn(move || run_loop(&handler, &*socket, &enabled)));
    }

    /// Stops the worker thread and waits for it to exit. Idempotent, and
    /// tolerates the worker never having been started.
    pub fn stop(&mut self) {
        self.enabled.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            handle.join().ok();
        }
    }

    /// Registers a callback for universe availability changes
    /// (the `"availability"` trigger).
    pub fn listen_availability(
        &self,
        callback: impl FnMut(UniverseNumber, AvailabilityChange) + Send + 'static,
    ) {
        self.handler.callbacks.lock().unwrap().availability.push(Box::new(callback));
    }

    /// Registers a callback for DMX data changes on the given universe
    /// (the `"universe"` trigger). The callback only fires when the data
    /// actually changed.
    pub fn listen_universe(
        &self,
        universe: UniverseNumber,
        callback: impl FnMut(&DataPacket) + Send + 'static,
    ) {
        let mut callbacks = self.handler.callbacks.lock().unwrap();
        callbacks.universe.entry(universe).or_default().push(Box::new(callback));
    }

    /// Joins the multicast group used for the given universe.
    pub fn join_multicast(&self, universe: UniverseNumber) -> Result<(), ReceiverError> {
        validate_universe(universe)?;
        self.socket.join_multicast(crate::multicast_addr(universe))?;
        Ok(())
    }

    /// Leaves the multicast group used for the given universe. Leaving a
    /// group that was never joined is a no-op.
    pub fn leave_multicast(&self, universe: UniverseNumber) -> Result<(), ReceiverError> {
        validate_universe(universe)?;
        if let Err(err) = self.socket.leave_multicast(crate::multicast_addr(universe)) {
            log::debug!("leaving multicast group for universe {universe} failed: {err}");
        }
        Ok(())
    }

    /// Returns every universe a data packet was received for and that has
    /// not timed out since, in ascending order.
    pub fn possible_universes(&self) -> Vec<UniverseNumber> {
        self.handler.possible_universes()
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(handler: &ReceiverHandler, socket: &dyn ReceiverSocket, enabled: &AtomicBool) {
    log::info!("started sACN receiver thread");

    while enabled.load(Ordering::Acquire) {
        handler.on_periodic(Instant::now());

        match socket.recv() {
            Ok(data) => handler.on_data(&data, Instant::now()),
            Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(err) => {
                log::error!("sACN receiver socket error: {err}");
                break;
            }
        }
    }

    log::info!("stopped sACN receiver thread");
}

/// The receiver state machine.
///
/// Keeps the per-universe arbitration state and dispatches callbacks. It
/// does no I/O of its own: the worker thread feeds it datagrams through
/// [ReceiverHandler::on_data] and drives timeout detection through
/// [ReceiverHandler::on_periodic].
#[derive(Default)]
struct ReceiverHandler {
    callbacks: Mutex<Callbacks>,
    state: Mutex<UniverseState>,
}

#[derive(Default)]
struct Callbacks {
    availability: Vec<AvailabilityCallback>,
    universe: HashMap<UniverseNumber, Vec<UniverseCallback>>,
}

#[derive(Default)]
struct UniverseState {
    /// When the most recent non-terminated data packet arrived, per universe.
    /// A universe is "available" exactly while it has an entry here.
    last_data_timestamps: HashMap<UniverseNumber, Instant>,
    /// The winning priority per universe, with the time it was last seen.
    priorities: HashMap<UniverseNumber, (u8, Instant)>,
    /// The last accepted sequence number per universe.
    last_sequences: HashMap<UniverseNumber, u8>,
    /// The last dispatched DMX payload per universe, for change suppression.
    previous_data: HashMap<UniverseNumber, [Slot; MAX_UNIVERSE_SIZE]>,
}

impl ReceiverHandler {
    /// Sweeps for universes whose data stream timed out.
    fn on_periodic(&self, now: Instant) {
        let expired: Vec<UniverseNumber> = {
            let state = self.state.lock().unwrap();
            state
                .last_data_timestamps
                .iter()
                .filter(|&(_, &timestamp)| timed_out(timestamp, now))
                .map(|(&universe, _)| universe)
                .collect()
        };

        for universe in expired {
            {
                let mut state = self.state.lock().unwrap();
                state.last_data_timestamps.remove(&universe);
                // Forget the sequence so a reappearing source is not rejected
                // against numbers from its previous incarnation.
                state.last_sequences.remove(&universe);
            }
            log::debug!("universe {universe} timed out");
            self.fire_availability(universe, AvailabilityChange::Timeout);
        }
    }

    /// Feeds one received datagram through the arbitration pipeline.
    fn on_data(&self, data: &[u8], now: Instant) {
        let packet = match Packet::decode(data) {
            Ok(packet) => packet,
            Err(err) => {
                log::debug!("dropping malformed packet: {err}");
                return;
            }
        };

        match packet {
            Packet::Data(packet) => {
                log::debug!("received data packet: {packet}");
                self.handle_data_packet(packet, now);
            }
            // Synchronized rendering and source enumeration are not this
            // receiver's job; both packet kinds are consumed and dropped.
            Packet::Sync(_) | Packet::Discovery(_) => {}
        }
    }

    fn handle_data_packet(&self, packet: DataPacket, now: Instant) {
        let universe = packet.universe();

        // A terminated stream is treated like an immediate timeout.
        if packet.stream_terminated() {
            let was_tracked = {
                let mut state = self.state.lock().unwrap();
                state.priorities.remove(&universe);
                state.last_sequences.remove(&universe);
                state.last_data_timestamps.remove(&universe).is_some()
            };
            if was_tracked {
                log::debug!("source terminated its stream: {packet}");
                self.fire_availability(universe, AvailabilityChange::Timeout);
            }
            return;
        }

        let (newly_available, dispatch) = {
            let mut state = self.state.lock().unwrap();

            let newly_available = state.last_data_timestamps.insert(universe, now).is_none();

            // Refresh the winning priority: a missing or stale entry is
            // replaced unconditionally; an equal or higher incoming priority
            // takes over, so ties resolve to the most recent source.
            let refresh = match state.priorities.get(&universe) {
                Some(&(priority, timestamp)) => {
                    timed_out(timestamp, now) || priority <= packet.priority()
                }
                None => true,
            };
            if refresh {
                state.priorities.insert(universe, (packet.priority(), now));
            }

            let active_priority = state.priorities[&universe].0;
            let dispatch = active_priority <= packet.priority()
                && Self::is_legal_sequence(&mut state, &packet)
                && Self::has_changed(&mut state, &packet);

            (newly_available, dispatch)
        };

        // Availability is always announced before the first data dispatch of
        // a cycle. Callbacks run without the state lock held, so they may
        // call back into the receiver.
        if newly_available {
            self.fire_availability(universe, AvailabilityChange::Available);
        }
        if dispatch {
            self.fire_universe(&packet);
        }
    }

    /// E1.31 6.7.2: a packet up to 20 sequence steps older than the last
    /// accepted one is out of order and dropped. The comparison goes through
    /// signed 8-bit arithmetic so the window follows the wrap-around.
    fn is_legal_sequence(state: &mut UniverseState, packet: &DataPacket) -> bool {
        let universe = packet.universe();
        if let Some(&last) = state.last_sequences.get(&universe) {
            let diff = packet.sequence_number().wrapping_sub(last) as i8;
            if diff <= 0 && diff > -20 {
                return false;
            }
        }
        state.last_sequences.insert(universe, packet.sequence_number());
        true
    }

    fn has_changed(state: &mut UniverseState, packet: &DataPacket) -> bool {
        let universe = packet.universe();
        if state.previous_data.get(&universe) == Some(packet.dmx_data()) {
            return false;
        }
        state.previous_data.insert(universe, *packet.dmx_data());
        true
    }

    fn fire_availability(&self, universe: UniverseNumber, change: AvailabilityChange) {
        let mut callbacks = self.callbacks.lock().unwrap();
        for callback in &mut callbacks.availability {
            // A panicking callback must not take down the worker thread.
            if catch_unwind(AssertUnwindSafe(|| callback(universe, change))).is_err() {
                log::error!("availability callback panicked for universe {universe}");
            }
        }
    }

    fn fire_universe(&self, packet: &DataPacket) {
        let mut callbacks = self.callbacks.lock().unwrap();
        let Some(listeners) = callbacks.universe.get_mut(&packet.universe()) else {
            return;
        };
        for callback in listeners {
            if catch_unwind(AssertUnwindSafe(|| callback(packet))).is_err() {
                log::error!("universe callback panicked for {packet}");
            }
        }
    }

    fn possible_universes(&self) -> Vec<UniverseNumber> {
        let state = self.state.lock().unwrap();
        let mut universes: Vec<_> = state.last_data_timestamps.keys().copied().collect();
        universes.sort_unstable();
        universes
    }
}

fn timed_out(timestamp: Instant, now: Instant) -> bool {
    now.saturating_duration_since(timestamp) > NETWORK_DATA_LOSS_TIMEOUT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ComponentIdentifier;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    /// Records multicast membership calls instead of touching the network.
    #[derive(Default)]
    struct TestReceiverSocket {
        joined: Mutex<Vec<Ipv4Addr>>,
        left: Mutex<Vec<Ipv4Addr>>,
    }

    impl ReceiverSocket for TestReceiverSocket {
        fn recv(&self) -> io::Result<Vec<u8>> {
            Err(io::Error::from(io::ErrorKind::WouldBlock))
        }

        fn join_multicast(&self, group: Ipv4Addr) -> io::Result<()> {
            self.joined.lock().unwrap().push(group);
            Ok(())
        }

        fn leave_multicast(&self, group: Ipv4Addr) -> io::Result<()> {
            self.left.lock().unwrap().push(group);
            Ok(())
        }
    }

    fn receiver() -> Receiver {
        Receiver::with_socket(Arc::new(TestReceiverSocket::default()))
    }

    fn cid() -> ComponentIdentifier {
        ComponentIdentifier::from_bytes([
            16, 1, 15, 2, 14, 3, 13, 4, 12, 5, 11, 6, 10, 7, 9, 8,
        ])
    }

    fn data_packet(universe: UniverseNumber, sequence: u8, dmx: &[Slot]) -> Vec<u8> {
        let mut packet = DataPacket::new(cid(), "Test", universe).unwrap();
        packet.set_sequence_number(sequence);
        packet.set_dmx_data(dmx);
        packet.encode()
    }

    fn recorded_events(receiver: &Receiver) -> Arc<Mutex<Vec<String>>> {
        let events = Arc::new(Mutex::new(Vec::new()));

        let availability_events = Arc::clone(&events);
        receiver.listen_availability(move |universe, change| {
            availability_events.lock().unwrap().push(format!("{universe}:{change}"));
        });
        events
    }

    #[test]
    fn availability_fires_before_data() {
        let receiver = receiver();
        let events = recorded_events(&receiver);

        let data_events = Arc::clone(&events);
        receiver.listen_universe(1, move |packet| {
            data_events.lock().unwrap().push(format!("{}:data", packet.universe()));
        });

        let now = Instant::now();
        receiver.handler.on_data(&data_packet(1, 0, &[1, 2, 3]), now);

        assert_eq!(*events.lock().unwrap(), vec!["1:available", "1:data"]);
    }

    #[test]
    fn availability_fires_once_per_cycle() {
        let receiver = receiver();
        let events = recorded_events(&receiver);

        let now = Instant::now();
        receiver.handler.on_data(&data_packet(1, 0, &[1]), now);
        receiver.handler.on_data(&data_packet(1, 1, &[2]), now);

        assert_eq!(*events.lock().unwrap(), vec!["1:available"]);
    }

    #[test]
    fn universe_times_out_after_data_loss() {
        let receiver = receiver();
        let events = recorded_events(&receiver);

        let now = Instant::now();
        receiver.handler.on_data(&data_packet(1, 0, &[1]), now);
        assert_eq!(receiver.possible_universes(), vec![1]);

        // Exactly at the timeout boundary: nothing happens yet.
        receiver.handler.on_periodic(now + Duration::from_millis(2500));
        assert_eq!(receiver.possible_universes(), vec![1]);

        receiver.handler.on_periodic(now + Duration::from_millis(2600));
        assert_eq!(receiver.possible_universes(), Vec::<UniverseNumber>::new());
        assert_eq!(*events.lock().unwrap(), vec!["1:available", "1:timeout"]);
    }

    #[test]
    fn timeout_and_reappearance_produce_a_new_cycle() {
        let receiver = receiver();
        let events = recorded_events(&receiver);

        let now = Instant::now();
        receiver.handler.on_data(&data_packet(1, 50, &[1]), now);
        receiver.handler.on_periodic(now + Duration::from_millis(2600));

        // The source comes back with a lower sequence number; the stale
        // sequence state must not reject it.
        let later = now + Duration::from_millis(3000);
        receiver.handler.on_data(&data_packet(1, 40, &[2]), later);

        assert_eq!(*events.lock().unwrap(), vec!["1:available", "1:timeout", "1:available"]);
        assert_eq!(receiver.possible_universes(), vec![1]);
    }

    #[test]
    fn stream_terminated_drops_universe_immediately() {
        let receiver = receiver();
        let events = recorded_events(&receiver);

        let dispatched = Arc::new(Mutex::new(0));
        let count = Arc::clone(&dispatched);
        receiver.listen_universe(1, move |_| *count.lock().unwrap() += 1);

        let now = Instant::now();
        receiver.handler.on_data(&data_packet(1, 0, &[1]), now);

        let mut terminated = DataPacket::new(cid(), "Test", 1).unwrap();
        terminated.set_sequence_number(1);
        terminated.set_stream_terminated(true);
        terminated.set_dmx_data(&[9, 9, 9]);
        receiver.handler.on_data(&terminated.encode(), now + Duration::from_millis(10));

        assert_eq!(*events.lock().unwrap(), vec!["1:available", "1:timeout"]);
        // The terminated packet itself carries no renderable data.
        assert_eq!(*dispatched.lock().unwrap(), 1);
        assert_eq!(receiver.possible_universes(), Vec::<UniverseNumber>::new());
    }

    #[test]
    fn stream_terminated_for_unknown_universe_is_ignored() {
        let receiver = receiver();
        let events = recorded_events(&receiver);

        let mut terminated = DataPacket::new(cid(), "Test", 7).unwrap();
        terminated.set_stream_terminated(true);
        receiver.handler.on_data(&terminated.encode(), Instant::now());

        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn lower_priority_source_is_dropped() {
        let receiver = receiver();

        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let priorities = Arc::clone(&dispatched);
        receiver.listen_universe(1, move |packet| {
            priorities.lock().unwrap().push(packet.priority());
        });

        let now = Instant::now();
        let mut packet = DataPacket::new(cid(), "Test", 1).unwrap();
        packet.set_priority(100).unwrap();
        packet.set_dmx_data(&[1]);
        receiver.handler.on_data(&packet.encode(), now);

        // A competing source with lower priority is ignored entirely.
        let mut low = DataPacket::new(cid(), "Test", 1).unwrap();
        low.set_priority(50).unwrap();
        low.set_sequence_number(1);
        low.set_dmx_data(&[2]);
        receiver.handler.on_data(&low.encode(), now + Duration::from_millis(10));

        // A higher priority takes over and its data goes through.
        let mut high = DataPacket::new(cid(), "Test", 1).unwrap();
        high.set_priority(150).unwrap();
        high.set_sequence_number(2);
        high.set_dmx_data(&[3]);
        receiver.handler.on_data(&high.encode(), now + Duration::from_millis(20));

        assert_eq!(*dispatched.lock().unwrap(), vec![100, 150]);
    }

    #[test]
    fn stale_priority_entry_is_replaced() {
        let receiver = receiver();

        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let priorities = Arc::clone(&dispatched);
        receiver.listen_universe(1, move |packet| {
            priorities.lock().unwrap().push(packet.priority());
        });

        let now = Instant::now();
        let mut packet = DataPacket::new(cid(), "Test", 1).unwrap();
        packet.set_priority(150).unwrap();
        packet.set_dmx_data(&[1]);
        receiver.handler.on_data(&packet.encode(), now);

        // After the old winner went silent for longer than the timeout, a
        // lower priority source may take over.
        let mut low = DataPacket::new(cid(), "Test", 1).unwrap();
        low.set_priority(50).unwrap();
        low.set_sequence_number(1);
        low.set_dmx_data(&[2]);
        receiver.handler.on_data(&low.encode(), now + Duration::from_millis(2600));

        assert_eq!(*dispatched.lock().unwrap(), vec![150, 50]);
    }

    #[test]
    fn out_of_order_sequences_are_rejected() {
        let receiver = receiver();

        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let sequences = Arc::clone(&dispatched);
        receiver.listen_universe(1, move |packet| {
            sequences.lock().unwrap().push(packet.sequence_number());
        });

        let now = Instant::now();
        receiver.handler.on_data(&data_packet(1, 50, &[1]), now);
        // 45 is 5 steps old: rejected.
        receiver.handler.on_data(&data_packet(1, 45, &[2]), now);
        // 51 advances: accepted.
        receiver.handler.on_data(&data_packet(1, 51, &[3]), now);
        // 30 is 21 steps old, outside the rejection window: accepted.
        receiver.handler.on_data(&data_packet(1, 30, &[4]), now);

        assert_eq!(*dispatched.lock().unwrap(), vec![50, 51, 30]);
    }

    #[test]
    fn sequence_window_follows_wrap_around() {
        let receiver = receiver();

        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let sequences = Arc::clone(&dispatched);
        receiver.listen_universe(1, move |packet| {
            sequences.lock().unwrap().push(packet.sequence_number());
        });

        let now = Instant::now();
        receiver.handler.on_data(&data_packet(1, 250, &[1]), now);
        // 4 is 10 steps ahead across the wrap: accepted.
        receiver.handler.on_data(&data_packet(1, 4, &[2]), now);
        // 250 is now 10 steps old: rejected.
        receiver.handler.on_data(&data_packet(1, 250, &[3]), now);

        assert_eq!(*dispatched.lock().unwrap(), vec![250, 4]);
    }

    #[test]
    fn unchanged_data_is_not_dispatched_again() {
        let receiver = receiver();

        let dispatched = Arc::new(Mutex::new(0));
        let count = Arc::clone(&dispatched);
        receiver.listen_universe(1, move |_| *count.lock().unwrap() += 1);

        let now = Instant::now();
        receiver.handler.on_data(&data_packet(1, 0, &[1, 2, 3]), now);
        receiver.handler.on_data(&data_packet(1, 1, &[1, 2, 3]), now);
        receiver.handler.on_data(&data_packet(1, 2, &[1, 2, 4]), now);

        assert_eq!(*dispatched.lock().unwrap(), 2);
    }

    #[test]
    fn callbacks_only_fire_for_their_universe() {
        let receiver = receiver();

        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let universes = Arc::clone(&dispatched);
        receiver.listen_universe(2, move |packet| {
            universes.lock().unwrap().push(packet.universe());
        });

        let now = Instant::now();
        receiver.handler.on_data(&data_packet(1, 0, &[1]), now);
        receiver.handler.on_data(&data_packet(2, 0, &[1]), now);

        assert_eq!(*dispatched.lock().unwrap(), vec![2]);
    }

    #[test]
    fn malformed_packets_are_dropped() {
        let receiver = receiver();
        let events = recorded_events(&receiver);

        receiver.handler.on_data(&[0u8; 20], Instant::now());
        receiver.handler.on_data(&[0xFFu8; 700], Instant::now());

        assert!(events.lock().unwrap().is_empty());
        assert_eq!(receiver.possible_universes(), Vec::<UniverseNumber>::new());
    }

    #[test]
    fn panicking_callback_does_not_poison_processing() {
        let receiver = receiver();
        receiver.listen_availability(|_, _| panic!("boom"));
        let events = recorded_events(&receiver);

        let now = Instant::now();
        receiver.handler.on_data(&data_packet(1, 0, &[1]), now);

        // The second callback still ran.
        assert_eq!(*events.lock().unwrap(), vec!["1:available"]);
    }

    #[test]
    fn trigger_names_parse() {
        assert_eq!("availability".parse::<Trigger>().unwrap(), Trigger::Availability);
        assert_eq!("universe".parse::<Trigger>().unwrap(), Trigger::Universe);
        assert!(matches!(
            "test".parse::<Trigger>(),
            Err(ReceiverError::UnknownTrigger(name)) if name == "test"
        ));
    }

    #[test]
    fn multicast_membership_uses_universe_addressing() {
        let socket = Arc::new(TestReceiverSocket::default());
        let receiver = Receiver::with_socket(Arc::clone(&socket) as Arc<dyn ReceiverSocket>);

        receiver.join_multicast(1).unwrap();
        assert_eq!(*socket.joined.lock().unwrap(), vec![Ipv4Addr::new(239, 255, 0, 1)]);

        receiver.leave_multicast(1).unwrap();
        assert_eq!(*socket.left.lock().unwrap(), vec![Ipv4Addr::new(239, 255, 0, 1)]);

        assert!(matches!(
            receiver.join_multicast(64000),
            Err(ReceiverError::Packet(PacketError::InvalidUniverse(64000)))
        ));
    }
}
