//! An sACN Source.
//!
//! Responsible for sending sACN packets.
//!
//! A [Source] manages one [Output] per active universe. A dedicated worker
//! thread wakes up `fps` times per second and sends every output whose data
//! changed, plus a keep-alive for every output that has been quiet for a
//! second. Universe discovery packets are broadcast every 10 seconds. The
//! sending decisions live in a passive handler the worker (or a test)
//! drives, so everything is testable without sockets or timing.

use crate::packet::{DataPacket, DiscoveryPacket, PacketError, SyncPacket, validate_universe};
use crate::socket::{SenderSocket, UdpSenderSocket};
use crate::{
    ComponentIdentifier, DEFAULT_PORT, MAX_UNIVERSE_NUMBER, MAX_UNIVERSE_SIZE, Slot,
    UniverseNumber, multicast_addr,
};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Quiescent outputs are re-sent at this interval so receivers do not run
/// into their data loss timeout (E1.31 6.6.1).
const SEND_OUT_INTERVAL: Duration = Duration::from_secs(1);

/// Universe discovery packets go out every 10 seconds (E1.31 4.3). The
/// interval is shortened by a small margin so scheduling jitter cannot
/// stretch it past the deadline.
const UNIVERSE_DISCOVERY_INTERVAL: Duration = Duration::from_millis(9840);

/// The synchronization address used by [Source::flush].
const FLUSH_SYNC_UNIVERSE: UniverseNumber = MAX_UNIVERSE_NUMBER;

/// Default TTL for multicast data packets.
const DEFAULT_TTL: u32 = 8;

/// Error type returned by a [Source].
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// An [std::io::Error] wrapper.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A [PacketError] wrapper.
    #[error(transparent)]
    Packet(#[from] PacketError),

    /// The universe has no active output.
    #[error("universe {0} has no active output")]
    InactiveUniverse(UniverseNumber),

    /// An operation that needs the worker was called before [Source::start].
    #[error("the sender thread is not running")]
    NotStarted,

    /// The configured frame rate is zero.
    #[error("fps must be greater than 0")]
    InvalidFps,
}

/// Configuration for a [Source].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// [ComponentIdentifier] for the source.
    pub cid: ComponentIdentifier,
    /// Name of the source, carried in every data and discovery packet.
    pub name: String,

    /// IP address the source should bind to.
    pub ip: IpAddr,
    /// Port number the source should bind to.
    pub port: u16,

    /// How often per second the worker looks for outputs to send.
    ///
    /// DMX data is sent out every second when nothing changes. Changes are
    /// sub-sampled at this rate: updating a universe faster than `fps`
    /// coalesces into the next frame.
    pub fps: u32,
    /// Whether to periodically announce the active universes with universe
    /// discovery broadcasts.
    pub universe_discovery: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            cid: ComponentIdentifier::new_v4(),
            name: "New sACN Source".to_string(),

            ip: Ipv4Addr::UNSPECIFIED.into(),
            port: DEFAULT_PORT,

            fps: 30,
            universe_discovery: true,
        }
    }
}

/// A single universe's sending state.
///
/// `Output` is a cheaply cloneable handle; the application and the worker
/// thread mutate the same record through it. Obtain one with
/// [Source::output].
#[derive(Clone)]
pub struct Output {
    state: Arc<Mutex<OutputState>>,
}

struct OutputState {
    packet: DataPacket,
    destination: IpAddr,
    multicast: bool,
    ttl: u32,
    last_send: Option<Instant>,
    changed: bool,
}

impl Output {
    fn new(packet: DataPacket) -> Self {
        Self {
            state: Arc::new(Mutex::new(OutputState {
                packet,
                destination: IpAddr::V4(Ipv4Addr::LOCALHOST),
                multicast: false,
                ttl: DEFAULT_TTL,
                last_send: None,
                changed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OutputState> {
        self.state.lock().unwrap()
    }

    /// The universe this output sends on.
    pub fn universe(&self) -> UniverseNumber {
        self.lock().packet.universe()
    }

    /// The current DMX payload.
    pub fn dmx_data(&self) -> [Slot; MAX_UNIVERSE_SIZE] {
        *self.lock().packet.dmx_data()
    }

    /// Sets the DMX payload (normalized to 512 slots) and marks the output
    /// for sending on the next frame.
    pub fn set_dmx_data(&self, data: &[Slot]) {
        let mut state = self.lock();
        state.packet.set_dmx_data(data);
        state.changed = true;
    }

    /// The priority receivers arbitrate with.
    pub fn priority(&self) -> u8 {
        self.lock().packet.priority()
    }

    /// Sets the priority. Must be in `[0, 200]`.
    pub fn set_priority(&self, priority: u8) -> Result<(), PacketError> {
        self.lock().packet.set_priority(priority)
    }

    /// The unicast destination address.
    pub fn destination(&self) -> IpAddr {
        self.lock().destination
    }

    /// Sets the destination address used while multicast is off.
    pub fn set_destination(&self, destination: IpAddr) {
        self.lock().destination = destination;
    }

    /// Whether this output sends to the universe's multicast group.
    pub fn multicast(&self) -> bool {
        self.lock().multicast
    }

    /// Routes this output to the universe's multicast group instead of the
    /// unicast destination.
    pub fn set_multicast(&self, multicast: bool) {
        self.lock().multicast = multicast;
    }

    /// The TTL for multicast sends.
    pub fn ttl(&self) -> u32 {
        self.lock().ttl
    }

    /// Sets the TTL for multicast sends.
    pub fn set_ttl(&self, ttl: u32) {
        self.lock().ttl = ttl;
    }

    /// Whether the data is flagged for visualizer preview only.
    pub fn preview_data(&self) -> bool {
        self.lock().packet.preview_data()
    }

    /// Flags the data as intended for visualization or media server preview
    /// applications, not live output.
    pub fn set_preview_data(&self, preview_data: bool) {
        self.lock().packet.set_preview_data(preview_data);
    }
}

/// An sACN source.
///
/// Manages a set of active universes and sends their DMX data out at a
/// steady rate from a dedicated worker thread.
pub struct Source {
    config: SourceConfig,
    outputs: Arc<Mutex<HashMap<UniverseNumber, Output>>>,
    universe_discovery: Arc<AtomicBool>,
    manual_flush: Arc<AtomicBool>,
    handler: Mutex<Option<Arc<SenderHandler>>>,
    enabled: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Source {
    /// Creates a new [Source]. No socket is bound until [Source::start].
    pub fn new(config: SourceConfig) -> Result<Self, SourceError> {
        // Fail early on values every packet would be rejected for.
        DataPacket::new(config.cid, &config.name, 1)?;
        if config.fps == 0 {
            return Err(SourceError::InvalidFps);
        }

        Ok(Self {
            universe_discovery: Arc::new(AtomicBool::new(config.universe_discovery)),
            manual_flush: Arc::new(AtomicBool::new(false)),
            outputs: Arc::new(Mutex::new(HashMap::new())),
            handler: Mutex::new(None),
            enabled: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            config,
        })
    }

    /// Returns the [SourceConfig] for this [Source].
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Starts the worker thread with a UDP socket bound to the configured
    /// address. Bind errors are surfaced here. Does nothing if the worker is
    /// already running.
    pub fn start(&mut self) -> Result<(), SourceError> {
        if self.thread_handle.is_some() {
            return Ok(());
        }
        let socket = UdpSenderSocket::bind(self.config.ip, self.config.port)?;
        self.start_with_socket(Arc::new(socket));
        Ok(())
    }

    /// Starts the worker thread on top of any [SenderSocket] implementation.
    pub fn start_with_socket(&mut self, socket: Arc<dyn SenderSocket>) {
        if self.thread_handle.is_some() {
            return;
        }

        let handler = Arc::new(SenderHandler {
            cid: self.config.cid,
            source_name: self.config.name.clone(),
            socket,
            outputs: Arc::clone(&self.outputs),
            universe_discovery: Arc::clone(&self.universe_discovery),
            manual_flush: Arc::clone(&self.manual_flush),
            last_discovery: Mutex::new(None),
            sync_sequence: AtomicU8::new(0),
        });
        *self.handler.lock().unwrap() = Some(Arc::clone(&handler));

        self.enabled.store(true, Ordering::Release);
        let enabled = Arc::clone(&self.enabled);
        let fps = self.config.fps;
        self.thread_handle = Some(thread::spawn(move || run_loop(&handler, &enabled, fps)));
    }

    /// Stops the worker thread and waits for it to exit. Idempotent, and
    /// tolerates the worker never having been started.
    pub fn stop(&mut self) {
        self.enabled.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            handle.join().ok();
        }
        *self.handler.lock().unwrap() = None;
    }

    /// Activates a universe so its data is sent out continuously. Does
    /// nothing if the universe is already active.
    pub fn activate_output(&self, universe: UniverseNumber) -> Result<(), SourceError> {
        validate_universe(universe)?;

        let mut outputs = self.outputs.lock().unwrap();
        if outputs.contains_key(&universe) {
            return Ok(());
        }
        let packet = DataPacket::new(self.config.cid, &self.config.name, universe)?;
        outputs.insert(universe, Output::new(packet));
        Ok(())
    }

    /// Deactivates a universe. Three packets with the stream-terminated
    /// option are sent (best effort) so receivers drop the universe
    /// immediately; all output settings are lost.
    pub fn deactivate_output(&self, universe: UniverseNumber) -> Result<(), SourceError> {
        validate_universe(universe)?;

        let output = self.outputs.lock().unwrap().remove(&universe);
        if let (Some(output), Some(handler)) = (output, self.current_handler()) {
            handler.send_terminated(&output);
        }
        Ok(())
    }

    /// Moves an output to another universe, keeping all its settings. The
    /// old universe is terminated on the wire; an existing output on the
    /// target universe is overwritten.
    pub fn move_universe(
        &self,
        from: UniverseNumber,
        to: UniverseNumber,
    ) -> Result<(), SourceError> {
        validate_universe(from)?;
        validate_universe(to)?;

        let output = self
            .outputs
            .lock()
            .unwrap()
            .remove(&from)
            .ok_or(SourceError::InactiveUniverse(from))?;

        if let Some(handler) = self.current_handler() {
            handler.send_terminated(&output);
        }

        {
            let mut state = output.lock();
            state.packet.set_universe(to)?;
            state.changed = true;
        }
        self.outputs.lock().unwrap().insert(to, output);
        Ok(())
    }

    /// Returns the active universes in ascending order.
    pub fn get_active_outputs(&self) -> Vec<UniverseNumber> {
        let outputs = self.outputs.lock().unwrap();
        let mut universes: Vec<_> = outputs.keys().copied().collect();
        universes.sort_unstable();
        universes
    }

    /// Returns a handle to the output for the given universe, if active.
    pub fn output(&self, universe: UniverseNumber) -> Option<Output> {
        self.outputs.lock().unwrap().get(&universe).cloned()
    }

    /// Whether periodic data sending is suspended in favor of
    /// [Source::flush].
    pub fn manual_flush(&self) -> bool {
        self.manual_flush.load(Ordering::Acquire)
    }

    /// Suspends (or resumes) periodic data sending. While suspended, data
    /// only goes out through [Source::flush]; discovery broadcasts continue.
    pub fn set_manual_flush(&self, manual_flush: bool) {
        self.manual_flush.store(manual_flush, Ordering::Release);
    }

    /// Whether universe discovery broadcasts are enabled.
    pub fn universe_discovery(&self) -> bool {
        self.universe_discovery.load(Ordering::Acquire)
    }

    /// Enables or disables universe discovery broadcasts.
    pub fn set_universe_discovery(&self, universe_discovery: bool) {
        self.universe_discovery.store(universe_discovery, Ordering::Release);
    }

    /// Sends every active universe once, released together by a single
    /// synchronization packet (E1.31 11). Runs on the caller's thread, not
    /// the worker. Note that not all receivers support synchronization.
    pub fn flush(&self) -> Result<(), SourceError> {
        let handler = self.current_handler().ok_or(SourceError::NotStarted)?;
        handler.flush(Instant::now())
    }

    fn current_handler(&self) -> Option<Arc<SenderHandler>> {
        self.handler.lock().unwrap().clone()
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(handler: &SenderHandler, enabled: &AtomicBool, fps: u32) {
    log::info!("started sACN sender thread");
    let period = Duration::from_secs_f64(1.0 / f64::from(fps));

    while enabled.load(Ordering::Acquire) {
        let frame_start = Instant::now();
        handler.on_periodic(frame_start);

        // Self-correcting cadence: only sleep for the remainder of the frame.
        let elapsed = frame_start.elapsed();
        if elapsed < period {
            spin_sleep::sleep(period - elapsed);
        }
    }

    log::info!("stopped sACN sender thread");
}

/// The sending state machine.
///
/// Owns the socket and decides per frame what goes out. It keeps no time of
/// its own: the worker thread (or a test) passes the current instant into
/// [SenderHandler::on_periodic].
struct SenderHandler {
    cid: ComponentIdentifier,
    source_name: String,
    socket: Arc<dyn SenderSocket>,
    outputs: Arc<Mutex<HashMap<UniverseNumber, Output>>>,
    universe_discovery: Arc<AtomicBool>,
    manual_flush: Arc<AtomicBool>,
    last_discovery: Mutex<Option<Instant>>,
    sync_sequence: AtomicU8,
}

impl SenderHandler {
    fn on_periodic(&self, now: Instant) {
        if self.universe_discovery.load(Ordering::Acquire) {
            let due = self
                .last_discovery
                .lock()
                .unwrap()
                .is_none_or(|last| now.saturating_duration_since(last) >= UNIVERSE_DISCOVERY_INTERVAL);
            if due {
                self.send_discovery_packets();
                *self.last_discovery.lock().unwrap() = Some(now);
            }
        }

        if self.manual_flush.load(Ordering::Acquire) {
            return;
        }

        for output in self.snapshot() {
            let mut state = output.lock();
            let keep_alive_due = state
                .last_send
                .is_none_or(|last| now.saturating_duration_since(last) >= SEND_OUT_INTERVAL);
            if state.changed || keep_alive_due {
                self.send_out(&mut state, now);
            }
        }
    }

    /// The outputs present at this instant. The application may mutate the
    /// map while a frame runs; iterating a snapshot keeps the two from
    /// racing.
    fn snapshot(&self) -> Vec<Output> {
        self.outputs.lock().unwrap().values().cloned().collect()
    }

    fn send_out(&self, state: &mut OutputState, now: Instant) {
        let universe = state.packet.universe();
        let bytes = state.packet.encode();
        let result = if state.multicast {
            let group = SocketAddr::new(multicast_addr(universe).into(), DEFAULT_PORT);
            self.socket.send_multicast(&bytes, group, state.ttl)
        } else {
            self.socket.send_unicast(&bytes, SocketAddr::new(state.destination, DEFAULT_PORT))
        };
        if let Err(err) = result {
            log::warn!("failed to send data packet for universe {universe}: {err}");
        }

        state.last_send = Some(now);
        state.packet.sequence_increase();
        state.changed = false;
    }

    fn send_discovery_packets(&self) {
        let universes = {
            let outputs = self.outputs.lock().unwrap();
            let mut universes: Vec<_> = outputs.keys().copied().collect();
            universes.sort_unstable();
            universes
        };

        let pages = match DiscoveryPacket::pages(self.cid, &self.source_name, &universes) {
            Ok(pages) => pages,
            Err(err) => {
                log::error!("failed to build universe discovery packets: {err}");
                return;
            }
        };
        for page in pages {
            if let Err(err) = self.socket.send_broadcast(&page.encode(), DEFAULT_PORT) {
                log::warn!("failed to broadcast universe discovery packet: {err}");
            }
        }
    }

    /// Announces the end of an output's stream with three terminated
    /// packets (E1.31 6.7.1).
    fn send_terminated(&self, output: &Output) {
        let mut state = output.lock();
        state.packet.set_stream_terminated(true);
        for _ in 0..3 {
            self.send_out(&mut state, Instant::now());
        }
        state.packet.set_stream_terminated(false);
    }

    /// Sends all universes in one go, stamped with a synchronization address
    /// and released together by one synchronization packet.
    fn flush(&self, now: Instant) -> Result<(), SourceError> {
        for output in self.snapshot() {
            let mut state = output.lock();
            state.packet.set_synchronization_address(FLUSH_SYNC_UNIVERSE)?;
            self.send_out(&mut state, now);
            state.packet.set_synchronization_address(0)?;
        }

        let mut sync = SyncPacket::new(self.cid, FLUSH_SYNC_UNIVERSE)?;
        // `fetch_add` wraps, matching the 8-bit sequence space.
        sync.set_sequence_number(self.sync_sequence.fetch_add(1, Ordering::Relaxed));
        let group = SocketAddr::new(multicast_addr(FLUSH_SYNC_UNIVERSE).into(), DEFAULT_PORT);
        if let Err(err) = self.socket.send_multicast(&sync.encode(), group, DEFAULT_TTL) {
            log::warn!("failed to send sync packet: {err}");
        }
        Ok(())
    }
}
