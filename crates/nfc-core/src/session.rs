//! Scan session - owns a reader and runs the select / read / report cycle.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::card::{self, CardError, UltralightImage, WriteOptions};
use crate::events::{ResultReporter, ScanEvent};
use crate::keyring::{KeyParseError, KeyRing};
use crate::protocol::Target;
use crate::state::{CancelToken, PhaseCell, ScanPhase};
use crate::transport::{DeviceInfo, ReaderDriver, ReaderTransport, TransportError};

/// Granularity of cancellable sleeps.
const PAUSE_SLICE: Duration = Duration::from_millis(10);

/// Configuration for a scan session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Reader connection string; the first reader found when unset.
    pub device: Option<String>,
    /// Pause between select attempts, in milliseconds.
    pub poll_interval_ms: u64,
    /// How long a reporter may take to accept a result, in milliseconds.
    pub liveness_timeout_ms: u64,
    /// Report a card only once while it stays on the reader.
    pub suppress_repeats: bool,
    /// Key B candidates as hex strings. Empty selects the default ring.
    pub keys: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device: None,
            poll_interval_ms: 100,
            liveness_timeout_ms: 5000,
            suppress_repeats: false,
            keys: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn key_ring(&self) -> Result<KeyRing, KeyParseError> {
        if self.keys.is_empty() {
            Ok(KeyRing::default())
        } else {
            KeyRing::from_hex(&self.keys)
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to open reader: {0}")]
    DeviceOpen(#[source] TransportError),
    #[error("Failed to initialise reader: {0}")]
    DeviceInit(#[source] TransportError),
    #[error("Reporter did not respond within {0:?}")]
    ConsumerUnresponsive(Duration),
    #[error("Invalid key ring: {0}")]
    Keys(#[from] KeyParseError),
    #[error("Failed to spawn session thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Work queued for the dispatcher thread.
enum Dispatch {
    Read(card::CardImage),
    Error(String),
    Stopped,
    Event(ScanEvent),
}

impl Dispatch {
    /// Deliveries the worker waits on.
    fn needs_ack(&self) -> bool {
        !matches!(self, Dispatch::Event(_))
    }
}

type PendingWrite = Arc<Mutex<Option<(UltralightImage, WriteOptions)>>>;

/// A running scan session.
///
/// The reader is owned by a worker thread for the lifetime of the session.
/// Dropping the session stops it and waits for the worker.
pub struct ScanSession {
    cancel: CancelToken,
    phase: Arc<PhaseCell>,
    pending_write: PendingWrite,
    device: DeviceInfo,
    worker: Option<JoinHandle<()>>,
}

impl ScanSession {
    /// Open a reader, put it in initiator mode, and start scanning.
    #[instrument(skip(driver, reporter))]
    pub fn start<D, R>(
        driver: &D,
        config: SessionConfig,
        reporter: Arc<R>,
    ) -> Result<Self, SessionError>
    where
        D: ReaderDriver,
        R: ResultReporter + ?Sized + 'static,
    {
        let keys = config.key_ring()?;

        let mut reader = driver
            .open(config.device.as_deref())
            .map_err(SessionError::DeviceOpen)?;
        if let Err(e) = reader.initiator_init() {
            reader.close();
            return Err(SessionError::DeviceInit(e));
        }

        let device = reader.device_info();
        info!(device = %device.connstring, name = %device.name, "Reader ready");

        let (tx, rx) = mpsc::channel();
        let (ack_tx, ack_rx) = mpsc::channel();
        let _ = tx.send(Dispatch::Event(ScanEvent::DeviceReady {
            device_id: device.connstring.clone(),
            device_name: device.name.clone(),
        }));

        thread::Builder::new()
            .name("nfc-reporter".to_string())
            .spawn(move || dispatch_loop(reporter, rx, ack_tx))?;

        let cancel = CancelToken::new();
        let phase = Arc::new(PhaseCell::default());
        let pending_write: PendingWrite = Arc::default();

        let worker = Worker {
            reader,
            keys,
            poll_interval: config.poll_interval(),
            liveness: config.liveness_timeout(),
            suppress_repeats: config.suppress_repeats,
            cancel: cancel.clone(),
            phase: phase.clone(),
            pending_write: pending_write.clone(),
            tx,
            ack: ack_rx,
            last_uid: None,
        };
        let worker = thread::Builder::new()
            .name("nfc-scan".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            cancel,
            phase,
            pending_write,
            device,
            worker: Some(worker),
        })
    }

    /// Ask the session to stop. Returns immediately; safe to call repeatedly.
    pub fn stop(&self) {
        if self.cancel.cancel() {
            info!("Stop requested");
        }
    }

    /// Token that stops the session when cancelled, for signal handlers.
    pub fn stop_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Block until the worker has torn the reader down.
    pub fn wait(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Scan worker panicked");
            }
        }
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase.get()
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    /// Write `image` to the next card selected instead of reading it.
    /// Replaces any write still pending.
    pub fn request_write(&self, image: UltralightImage, options: WriteOptions) {
        let mut pending = self
            .pending_write
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if pending.replace((image, options)).is_some() {
            debug!("Replaced pending write");
        }
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.stop();
        self.wait();
    }
}

fn dispatch_loop<R: ResultReporter + ?Sized>(
    reporter: Arc<R>,
    rx: Receiver<Dispatch>,
    ack: Sender<()>,
) {
    for item in rx {
        let needs_ack = item.needs_ack();
        match item {
            Dispatch::Read(image) => reporter.on_read(image),
            Dispatch::Error(message) => reporter.on_error(&message),
            Dispatch::Stopped => reporter.on_stopped(),
            Dispatch::Event(event) => reporter.on_event(&event),
        }
        if needs_ack {
            let _ = ack.send(());
        }
    }
}

struct Worker<T: ReaderTransport> {
    reader: T,
    keys: KeyRing,
    poll_interval: Duration,
    liveness: Duration,
    suppress_repeats: bool,
    cancel: CancelToken,
    phase: Arc<PhaseCell>,
    pending_write: PendingWrite,
    tx: Sender<Dispatch>,
    ack: Receiver<()>,
    last_uid: Option<String>,
}

impl<T: ReaderTransport> Worker<T> {
    fn run(mut self) {
        let responsive = match self.scan_loop() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Shutting reader down");
                false
            }
        };
        self.teardown(responsive);
    }

    fn scan_loop(&mut self) -> Result<(), SessionError> {
        while !self.cancel.is_cancelled() {
            self.goto(ScanPhase::Selecting);

            let target = match self.reader.select_passive_target() {
                Ok(Some(target)) => target,
                Ok(None) => {
                    self.last_uid = None;
                    self.pause();
                    continue;
                }
                Err(e) if e.is_unrecoverable() => {
                    error!(error = %e, "Reader lost");
                    self.deliver(Dispatch::Error(e.to_string()))?;
                    return Ok(());
                }
                Err(e) => {
                    debug!(error = %e, "Select failed");
                    self.pause();
                    continue;
                }
            };

            if self.cancel.is_cancelled() {
                break;
            }
            self.process(&target)?;
            self.goto(ScanPhase::Idle);
            self.pause();
        }
        Ok(())
    }

    /// Read or write one selected card and report the outcome.
    fn process(&mut self, target: &Target) -> Result<(), SessionError> {
        let uid = target.uid_hex();
        self.emit(ScanEvent::TargetSelected {
            uid: uid.clone(),
            kind: target.kind(),
        });

        let pending = self
            .pending_write
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some((image, options)) = pending {
            self.write(target, &image, options);
            self.last_uid = Some(uid);
            return Ok(());
        }

        if self.suppress_repeats && self.last_uid.as_deref() == Some(uid.as_str()) {
            self.emit(ScanEvent::RepeatSuppressed { uid });
            return Ok(());
        }

        self.goto(ScanPhase::Reading);
        let image = match card::read_card(&mut self.reader, target, &self.keys, &self.cancel) {
            Ok(image) => image,
            Err(CardError::Cancelled) => return Ok(()),
            Err(e) => {
                warn!(uid = %uid, error = %e, "Read failed");
                return Ok(());
            }
        };

        self.goto(ScanPhase::Reporting);
        self.last_uid = Some(uid);
        self.deliver(Dispatch::Read(image))
    }

    fn write(&mut self, target: &Target, image: &UltralightImage, options: WriteOptions) {
        let uid = target.uid_hex();
        self.goto(ScanPhase::Writing);

        match card::write_card(&mut self.reader, target, image, options, &self.cancel) {
            Ok(report) => self.emit(ScanEvent::WriteFinished {
                uid,
                pages_written: report.pages_written,
                error: report.error.map(|e| e.to_string()),
            }),
            Err(CardError::Unsupported(kind)) => {
                self.emit(ScanEvent::WriteSkipped { uid, kind });
            }
            Err(e) => self.emit(ScanEvent::WriteFinished {
                uid,
                pages_written: 0,
                error: Some(e.to_string()),
            }),
        }
    }

    fn goto(&self, to: ScanPhase) {
        let from = self.phase.goto(to);
        if from != to {
            self.emit(ScanEvent::PhaseChanged { from, to });
        }
    }

    fn emit(&self, event: ScanEvent) {
        let _ = self.tx.send(Dispatch::Event(event));
    }

    /// Hand `item` to the reporter and wait for it to be taken.
    fn deliver(&self, item: Dispatch) -> Result<(), SessionError> {
        let needs_ack = item.needs_ack();
        if self.tx.send(item).is_err() {
            return Err(SessionError::ConsumerUnresponsive(self.liveness));
        }
        if !needs_ack {
            return Ok(());
        }
        match self.ack.recv_timeout(self.liveness) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                Err(SessionError::ConsumerUnresponsive(self.liveness))
            }
        }
    }

    /// Sleep for the poll interval, waking early on cancellation.
    fn pause(&self) {
        let deadline = Instant::now() + self.poll_interval;
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep(PAUSE_SLICE.min(deadline - now));
        }
    }

    fn teardown(&mut self, responsive: bool) {
        if let Err(e) = self.reader.abort_command() {
            trace!(error = %e, "Abort on teardown failed");
        }
        self.reader.close();
        self.goto(ScanPhase::Stopped);

        if responsive {
            if let Err(e) = self.deliver(Dispatch::Stopped) {
                warn!(error = %e, "Stop notification not acknowledged");
            }
        } else {
            let _ = self.tx.send(Dispatch::Stopped);
        }
        info!("Session stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::card::CardImage;
    use crate::events::{ChannelReporter, NullReporter, Reported};
    use crate::protocol::CardKind;
    use crate::protocol::constants::{MC_READ, RATS};
    use crate::transport::mock::{MockCall, MockDriver, MockReader, SimCard};
    use crate::transport::ReaderProperty;

    const WAIT: Duration = Duration::from_secs(5);

    fn fast_config() -> SessionConfig {
        SessionConfig {
            poll_interval_ms: 5,
            liveness_timeout_ms: 1000,
            ..Default::default()
        }
    }

    fn next_read(rx: &Receiver<Reported>) -> CardImage {
        loop {
            match rx.recv_timeout(WAIT).unwrap() {
                Reported::Read(image) => return image,
                Reported::Error(e) => panic!("unexpected error: {e}"),
                Reported::Stopped => panic!("stopped before a read"),
                Reported::Event(_) => {}
            }
        }
    }

    /// Everything after the current point up to and including `Stopped`.
    fn drain(rx: &Receiver<Reported>) -> Vec<Reported> {
        let mut out = Vec::new();
        loop {
            let item = rx.recv_timeout(WAIT).unwrap();
            let stopped = item == Reported::Stopped;
            out.push(item);
            if stopped {
                return out;
            }
        }
    }

    fn count_stopped(items: &[Reported]) -> usize {
        items.iter().filter(|r| **r == Reported::Stopped).count()
    }

    #[test]
    fn test_classic_scenario() {
        let reader = MockReader::with_card(SimCard::classic_1k());
        let driver = MockDriver::new(reader.clone());
        let (reporter, rx) = ChannelReporter::new();

        let mut session = ScanSession::start(&driver, fast_config(), Arc::new(reporter)).unwrap();
        let image = next_read(&rx);
        session.stop();
        session.wait();

        assert_eq!(image.kind, CardKind::Classic);
        assert_eq!(image.data.len(), 64 * 16);
        assert_eq!(image.offset, 64);

        let calls = reader.calls();
        let probe = [
            MockCall::SetProperty(ReaderProperty::EasyFraming, false),
            MockCall::Raw(RATS.to_vec()),
            MockCall::SetProperty(ReaderProperty::EasyFraming, true),
        ];
        assert!(calls.windows(3).any(|w| w == probe));

        let first_reads: Vec<u8> = calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Transceive(f) if f[0] == MC_READ => Some(f[1]),
                _ => None,
            })
            .take(64)
            .collect();
        assert_eq!(first_reads, (0..=63u8).rev().collect::<Vec<_>>());

        assert_eq!(count_stopped(&drain(&rx)), 1);
        assert!(reader.is_closed());
        assert_eq!(session.phase(), ScanPhase::Stopped);
    }

    #[test]
    fn test_plus_2k_scenario() {
        let ats = [0x0C, 0x75, 0x77, 0x80, 0x02, 0xC1, 0x05, 0x2F, 0x2F, 0x01];
        let reader = MockReader::with_card(SimCard::classic(0x04, 0x08, 128).with_ats(&ats));
        let driver = MockDriver::new(reader);
        let (reporter, rx) = ChannelReporter::new();

        let session = ScanSession::start(&driver, fast_config(), Arc::new(reporter)).unwrap();
        let image = next_read(&rx);
        drop(session);

        assert!(image.is_complete());
        assert_eq!(image.data.len(), 128 * 16);
    }

    #[test]
    fn test_ultralight_scenario() {
        let reader = MockReader::with_card(SimCard::ultralight());
        let driver = MockDriver::new(reader.clone());
        let (reporter, rx) = ChannelReporter::new();

        let session = ScanSession::start(&driver, fast_config(), Arc::new(reporter)).unwrap();
        let image = next_read(&rx);
        drop(session);

        assert_eq!(image.kind, CardKind::Ultralight);
        assert_eq!(image.offset, 16);
        let reads: Vec<u8> = reader
            .calls()
            .iter()
            .filter_map(|c| match c {
                MockCall::Transceive(f) if f[0] == MC_READ => Some(f[1]),
                _ => None,
            })
            .take(4)
            .collect();
        assert_eq!(reads, vec![0, 4, 8, 12]);
    }

    #[test]
    fn test_empty_field_stays_selecting() {
        let reader = MockReader::new();
        let driver = MockDriver::new(reader.clone());
        let (reporter, rx) = ChannelReporter::new();

        let mut session = ScanSession::start(&driver, fast_config(), Arc::new(reporter)).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(session.phase(), ScanPhase::Selecting);
        assert!(session.is_running());

        session.stop();
        session.wait();
        let items = drain(&rx);
        assert_eq!(count_stopped(&items), 1);
        assert!(
            !items
                .iter()
                .any(|r| matches!(r, Reported::Read(_) | Reported::Error(_)))
        );

        let calls = reader.calls();
        assert!(calls.iter().filter(|c| **c == MockCall::Select).count() > 1);
        assert_eq!(calls[calls.len() - 2..], [MockCall::Abort, MockCall::Close]);
    }

    #[test]
    fn test_double_stop() {
        let driver = MockDriver::new(MockReader::new());
        let (reporter, rx) = ChannelReporter::new();

        let mut session = ScanSession::start(&driver, fast_config(), Arc::new(reporter)).unwrap();
        session.stop();
        session.stop();
        session.wait();
        session.stop();
        session.wait();
        assert!(!session.is_running());

        assert_eq!(count_stopped(&drain(&rx)), 1);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn test_auth_exhausted_reported_as_image() {
        let card = SimCard::classic_1k().with_key_b(14, [0x42; 6]);
        let driver = MockDriver::new(MockReader::with_card(card));
        let (reporter, rx) = ChannelReporter::new();

        let session = ScanSession::start(&driver, fast_config(), Arc::new(reporter)).unwrap();
        let image = next_read(&rx);
        drop(session);

        assert_eq!(image.first_block, 60);
        assert_eq!(image.data.len(), 4 * 16);
        assert!(image.error.is_some());
    }

    #[test]
    fn test_suppress_repeats() {
        let reader = MockReader::with_card(SimCard::ultralight());
        let driver = MockDriver::new(reader.clone());
        let (reporter, rx) = ChannelReporter::new();
        let config = SessionConfig {
            suppress_repeats: true,
            ..fast_config()
        };

        let mut session = ScanSession::start(&driver, config, Arc::new(reporter)).unwrap();
        next_read(&rx);
        thread::sleep(Duration::from_millis(60));
        session.stop();
        session.wait();

        let items = drain(&rx);
        assert!(!items.iter().any(|r| matches!(r, Reported::Read(_))));
        assert!(
            items
                .iter()
                .any(|r| matches!(r, Reported::Event(ScanEvent::RepeatSuppressed { .. })))
        );
    }

    #[test]
    fn test_suppressed_card_reported_again_after_removal() {
        let reader = MockReader::with_card(SimCard::ultralight());
        let driver = MockDriver::new(reader.clone());
        let (reporter, rx) = ChannelReporter::new();
        let config = SessionConfig {
            suppress_repeats: true,
            ..fast_config()
        };

        let session = ScanSession::start(&driver, config, Arc::new(reporter)).unwrap();
        let first = next_read(&rx);
        let card = reader.remove().unwrap();
        thread::sleep(Duration::from_millis(30));
        reader.insert(card);
        let second = next_read(&rx);
        drop(session);

        assert_eq!(first.uid, second.uid);
    }

    #[test]
    fn test_request_write() {
        let reader = MockReader::new();
        let driver = MockDriver::new(reader.clone());
        let (reporter, rx) = ChannelReporter::new();

        let mut session = ScanSession::start(&driver, fast_config(), Arc::new(reporter)).unwrap();
        let image = UltralightImage::from_bytes(&[0x5A; 64]).unwrap();
        session.request_write(image, WriteOptions::default());
        reader.insert(SimCard::ultralight());

        let finished = loop {
            match rx.recv_timeout(WAIT).unwrap() {
                Reported::Event(ScanEvent::WriteFinished {
                    pages_written,
                    error,
                    ..
                }) => break (pages_written, error),
                Reported::Read(_) => panic!("card read instead of written"),
                _ => {}
            }
        };
        session.stop();
        session.wait();

        assert_eq!(finished, (12, None));
        assert_eq!(reader.card().unwrap().page(4), Some([0x5A; 4]));
    }

    #[test]
    fn test_write_skipped_on_classic() {
        let reader = MockReader::new();
        let driver = MockDriver::new(reader.clone());
        let (reporter, rx) = ChannelReporter::new();

        let session = ScanSession::start(&driver, fast_config(), Arc::new(reporter)).unwrap();
        let image = UltralightImage::from_bytes(&[0u8; 64]).unwrap();
        session.request_write(image, WriteOptions::default());
        reader.insert(SimCard::classic_1k());

        let skipped = loop {
            match rx.recv_timeout(WAIT).unwrap() {
                Reported::Event(ScanEvent::WriteSkipped { kind, .. }) => break kind,
                Reported::Error(e) => panic!("unexpected error: {e}"),
                _ => {}
            }
        };
        drop(session);
        assert_eq!(skipped, CardKind::Classic);
    }

    #[test]
    fn test_open_and_init_errors() {
        let reporter = Arc::new(NullReporter);

        let err = ScanSession::start(&MockDriver::empty(), fast_config(), reporter.clone());
        assert!(matches!(err, Err(SessionError::DeviceOpen(_))));

        let reader = MockReader::new();
        reader.fail_init();
        let driver = MockDriver::new(reader.clone());
        let err = ScanSession::start(&driver, fast_config(), reporter.clone());
        assert!(matches!(err, Err(SessionError::DeviceInit(_))));
        assert!(reader.is_closed());

        let config = SessionConfig {
            keys: vec!["nope".to_string()],
            ..fast_config()
        };
        let driver = MockDriver::new(MockReader::new());
        let err = ScanSession::start(&driver, config, reporter);
        assert!(matches!(err, Err(SessionError::Keys(_))));
    }

    #[test]
    fn test_disconnect_reports_error_then_stops() {
        let reader = MockReader::new();
        let driver = MockDriver::new(reader.clone());
        let (reporter, rx) = ChannelReporter::new();

        let mut session = ScanSession::start(&driver, fast_config(), Arc::new(reporter)).unwrap();
        reader.disconnect();
        session.wait();

        let items = drain(&rx);
        let errors: Vec<_> = items
            .iter()
            .filter(|r| matches!(r, Reported::Error(_)))
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(count_stopped(&items), 1);
        assert_eq!(session.phase(), ScanPhase::Stopped);
    }

    struct SlowReporter {
        reads: AtomicUsize,
        stopped: AtomicUsize,
    }

    impl ResultReporter for SlowReporter {
        fn on_read(&self, _image: CardImage) {
            self.reads.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(300));
        }

        fn on_stopped(&self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, _message: &str) {}
    }

    #[test]
    fn test_unresponsive_consumer_tears_down() {
        let reader = MockReader::with_card(SimCard::ultralight());
        let driver = MockDriver::new(reader.clone());
        let reporter = Arc::new(SlowReporter {
            reads: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
        });
        let config = SessionConfig {
            liveness_timeout_ms: 50,
            ..fast_config()
        };

        let mut session = ScanSession::start(&driver, config, reporter.clone()).unwrap();
        session.wait();
        assert!(reader.is_closed());
        assert_eq!(reporter.reads.load(Ordering::SeqCst), 1);

        thread::sleep(Duration::from_millis(500));
        assert_eq!(reporter.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_config_toml_round_trip() {
        let config = SessionConfig {
            device: Some("pn53x_usb:001:004".to_string()),
            suppress_repeats: true,
            keys: vec!["a0a1a2a3a4a5".to_string()],
            ..Default::default()
        };
        let path = std::env::temp_dir().join(format!("nfc-session-{}.toml", std::process::id()));
        config.save_to_file(&path).unwrap();
        let parsed = SessionConfig::load_from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(parsed, config);
        assert_eq!(parsed.key_ring().unwrap().len(), 1);

        let partial: SessionConfig = toml::from_str("poll_interval_ms = 20").unwrap();
        assert_eq!(partial.poll_interval(), Duration::from_millis(20));
        assert_eq!(partial.liveness_timeout(), Duration::from_secs(5));
        assert_eq!(partial.key_ring().unwrap(), KeyRing::default());
    }
}
