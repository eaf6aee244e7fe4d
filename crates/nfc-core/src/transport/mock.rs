//! Mock reader for testing.
//!
//! `MockReader` simulates a reader with at most one card in the field. The
//! simulated card answers the real Mifare frames, so engine and session logic
//! run unchanged against it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::traits::{DeviceInfo, ReaderDriver, ReaderProperty, ReaderTransport, TransportError};
use crate::protocol::constants::*;
use crate::protocol::{Target, colon_hex};

/// Call captured by the mock, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    InitiatorInit,
    Select,
    /// Frame sent with easy framing on.
    Transceive(Vec<u8>),
    /// Frame sent with easy framing off.
    Raw(Vec<u8>),
    SetProperty(ReaderProperty, bool),
    Abort,
    Close,
}

#[derive(Debug, Clone)]
enum Memory {
    Classic {
        blocks: Vec<[u8; BLOCK_SIZE]>,
        keys: HashMap<usize, [u8; KEY_SIZE]>,
        denied: HashSet<u8>,
    },
    Ultralight {
        pages: Vec<[u8; PAGE_SIZE]>,
        failing_writes: HashMap<u8, usize>,
        denied: HashSet<u8>,
    },
    Opaque,
}

/// A simulated card.
#[derive(Debug, Clone)]
pub struct SimCard {
    target: Target,
    memory: Memory,
    ats: Option<Vec<u8>>,
}

impl SimCard {
    /// Classic card with `block_count` blocks, every key B set to `FF..FF`.
    ///
    /// Block `n` is filled with the byte `n`.
    pub fn classic(atqa1: u8, sak: u8, block_count: usize) -> Self {
        let blocks = (0..block_count).map(|n| [n as u8; BLOCK_SIZE]).collect();
        Self {
            target: Target::new(vec![0xDE, 0xAD, 0xBE, 0xEF], [0x00, atqa1], sak),
            memory: Memory::Classic {
                blocks,
                keys: HashMap::new(),
                denied: HashSet::new(),
            },
            ats: None,
        }
    }

    pub fn classic_1k() -> Self {
        Self::classic(ATQA_CLASSIC, 0x08, 64)
    }

    pub fn classic_4k() -> Self {
        Self::classic(ATQA_CLASSIC_4K, 0x18, 256)
    }

    /// Ultralight card; page `n` is filled with the byte `0x80 + n`.
    pub fn ultralight() -> Self {
        let pages = (0..16u8).map(|n| [0x80 + n; PAGE_SIZE]).collect();
        Self {
            target: Target::new(
                vec![0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66],
                [0x00, ATQA_ULTRALIGHT],
                0x00,
            ),
            memory: Memory::Ultralight {
                pages,
                failing_writes: HashMap::new(),
                denied: HashSet::new(),
            },
            ats: None,
        }
    }

    /// A card with an unsupported discriminator.
    pub fn unknown() -> Self {
        Self {
            target: Target::new(vec![0x08, 0x01, 0x02, 0x03], [0x00, 0x08], 0x20),
            memory: Memory::Opaque,
            ats: None,
        }
    }

    /// Answer RATS with `ats`.
    pub fn with_ats(mut self, ats: &[u8]) -> Self {
        self.ats = Some(ats.to_vec());
        self
    }

    /// Set key B of `sector`.
    pub fn with_key_b(mut self, sector: usize, key: [u8; KEY_SIZE]) -> Self {
        if let Memory::Classic { keys, .. } = &mut self.memory {
            keys.insert(sector, key);
        }
        self
    }

    /// Refuse READ of `block` (Classic, even when authenticated) or of the
    /// four pages starting at `block` (Ultralight).
    pub fn deny_block(mut self, block: u8) -> Self {
        match &mut self.memory {
            Memory::Classic { denied, .. } | Memory::Ultralight { denied, .. } => {
                denied.insert(block);
            }
            Memory::Opaque => {}
        }
        self
    }

    /// Fail the next `times` writes to `page`, halting the card each time.
    pub fn fail_page_writes(mut self, page: u8, times: usize) -> Self {
        if let Memory::Ultralight { failing_writes, .. } = &mut self.memory {
            failing_writes.insert(page, times);
        }
        self
    }

    /// Ultralight page contents.
    pub fn page(&self, page: u8) -> Option<[u8; PAGE_SIZE]> {
        match &self.memory {
            Memory::Ultralight { pages, .. } => pages.get(page as usize).copied(),
            _ => None,
        }
    }
}

/// Sector holding `block` (4 block sectors below 128, 16 block sectors above).
pub fn sector_of(block: u8) -> usize {
    if block < LARGE_SECTOR_START {
        (block / SMALL_SECTOR_BLOCKS) as usize
    } else {
        32 + ((block - LARGE_SECTOR_START) / LARGE_SECTOR_BLOCKS) as usize
    }
}

struct MockState {
    card: Option<SimCard>,
    selected: bool,
    authenticated: Option<usize>,
    easy_framing: bool,
    /// Remaining successful selects before the card "leaves".
    select_budget: Option<usize>,
    /// Remaining READ frames answered before the card is pulled.
    read_budget: Option<usize>,
    fail_init: bool,
    disconnected: bool,
    closed: bool,
    calls: Vec<MockCall>,
    info: DeviceInfo,
}

/// Mock reader. Clones share state, so tests keep a handle for inspection.
#[derive(Clone)]
pub struct MockReader {
    state: Arc<Mutex<MockState>>,
}

impl MockReader {
    /// Reader with an empty field.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                card: None,
                selected: false,
                authenticated: None,
                easy_framing: true,
                select_budget: None,
                read_budget: None,
                fail_init: false,
                disconnected: false,
                closed: false,
                calls: Vec::new(),
                info: DeviceInfo {
                    name: "Mock PN533".to_string(),
                    connstring: "mock:001:001".to_string(),
                    capabilities: "chip: mock, supports: ISO14443A".to_string(),
                },
            })),
        }
    }

    pub fn with_card(card: SimCard) -> Self {
        let reader = Self::new();
        reader.insert(card);
        reader
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Place a card in the field.
    pub fn insert(&self, card: SimCard) {
        let mut state = self.lock();
        state.card = Some(card);
        state.selected = false;
        state.authenticated = None;
    }

    /// Take the card out of the field.
    pub fn remove(&self) -> Option<SimCard> {
        let mut state = self.lock();
        state.selected = false;
        state.card.take()
    }

    /// Current card, including any writes made to it.
    pub fn card(&self) -> Option<SimCard> {
        self.lock().card.clone()
    }

    /// Target of the card in the field, without touching the call log.
    pub fn present_target(&self) -> Option<Target> {
        let mut state = self.lock();
        state.selected = state.card.is_some();
        state.card.as_ref().map(|c| c.target.clone())
    }

    /// Allow `n` more successful selects, then report an empty field.
    pub fn fail_selects_after(&self, n: usize) {
        self.lock().select_budget = Some(n);
    }

    /// Pull the card out of the field after `n` more READ frames.
    pub fn remove_after_reads(&self, n: usize) {
        self.lock().read_budget = Some(n);
    }

    /// Make `initiator_init` fail.
    pub fn fail_init(&self) {
        self.lock().fail_init = true;
    }

    /// Simulate the reader being unplugged.
    pub fn disconnect(&self) {
        self.lock().disconnected = true;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn check_open(state: &MockState) -> Result<(), TransportError> {
        if state.disconnected {
            return Err(TransportError::Disconnected);
        }
        if state.closed {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

impl Default for MockReader {
    fn default() -> Self {
        Self::new()
    }
}

impl MockState {
    fn halt(&mut self) {
        self.selected = false;
        self.authenticated = None;
    }

    fn raw_exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>, TransportError> {
        if frame != RATS {
            return Err(TransportError::RfTransmission);
        }
        let ats = self.card.as_ref().and_then(|c| c.ats.clone());
        // RATS moves the card out of the ISO14443-3 command set either way.
        self.halt();
        ats.ok_or(TransportError::Timeout)
    }

    fn mifare_exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>, TransportError> {
        if frame.len() < 2 {
            return Err(TransportError::RfTransmission);
        }
        let (cmd, block) = (frame[0], frame[1]);
        let authenticated = self.authenticated;

        let Some(card) = self.card.as_mut() else {
            return Err(TransportError::Timeout);
        };

        let result = match &mut card.memory {
            Memory::Classic {
                blocks,
                keys,
                denied,
            } => match cmd {
                MC_AUTH_A | MC_AUTH_B => {
                    let sector = sector_of(block);
                    let expected = keys.get(&sector).copied().unwrap_or([0xFF; KEY_SIZE]);
                    if (block as usize) < blocks.len()
                        && frame.len() == 12
                        && frame[2..8] == expected
                    {
                        self.authenticated = Some(sector);
                        return Ok(Vec::new());
                    }
                    Err(TransportError::AuthFailed)
                }
                MC_READ => {
                    if authenticated != Some(sector_of(block)) || denied.contains(&block) {
                        Err(TransportError::RfTransmission)
                    } else {
                        blocks
                            .get(block as usize)
                            .map(|b| b.to_vec())
                            .ok_or(TransportError::RfTransmission)
                    }
                }
                MC_WRITE if frame.len() == 2 + BLOCK_SIZE => {
                    match blocks.get_mut(block as usize) {
                        Some(dst) if authenticated == Some(sector_of(block)) => {
                            dst.copy_from_slice(&frame[2..]);
                            Ok(Vec::new())
                        }
                        _ => Err(TransportError::RfTransmission),
                    }
                }
                _ => Err(TransportError::RfTransmission),
            },
            Memory::Ultralight {
                pages,
                failing_writes,
                denied,
            } => match cmd {
                MC_READ if (block as usize) < pages.len() && !denied.contains(&block) => {
                    let mut out = Vec::with_capacity(BLOCK_SIZE);
                    for i in 0..ULTRALIGHT_PAGES_PER_READ as usize {
                        out.extend_from_slice(&pages[(block as usize + i) % pages.len()]);
                    }
                    Ok(out)
                }
                MC_WRITE if frame.len() == 2 + BLOCK_SIZE => {
                    if let Some(remaining) = failing_writes.get_mut(&block) {
                        if *remaining > 0 {
                            *remaining -= 1;
                            self.selected = false;
                            return Err(TransportError::Timeout);
                        }
                    }
                    if block < ULTRALIGHT_FIRST_WRITABLE_PAGE || (block as usize) >= pages.len() {
                        Err(TransportError::RfTransmission)
                    } else {
                        pages[block as usize].copy_from_slice(&frame[2..2 + PAGE_SIZE]);
                        Ok(Vec::new())
                    }
                }
                _ => Err(TransportError::RfTransmission),
            },
            Memory::Opaque => Err(TransportError::RfTransmission),
        };

        if matches!(result, Err(TransportError::AuthFailed)) {
            self.halt();
        }
        result
    }
}

impl ReaderTransport for MockReader {
    fn initiator_init(&mut self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.push(MockCall::InitiatorInit);
        Self::check_open(&state)?;
        if state.fail_init {
            return Err(TransportError::Chip(0x27));
        }
        Ok(())
    }

    fn select_passive_target(&mut self) -> Result<Option<Target>, TransportError> {
        let mut state = self.lock();
        state.calls.push(MockCall::Select);
        Self::check_open(&state)?;

        if let Some(budget) = state.select_budget.as_mut() {
            if *budget == 0 {
                state.halt();
                return Ok(None);
            }
            *budget -= 1;
        }

        let target = state.card.as_ref().map(|c| c.target.clone());
        state.selected = target.is_some();
        state.authenticated = None;
        Ok(target)
    }

    fn transceive(
        &mut self,
        frame: &[u8],
        _timeout: Option<Duration>,
    ) -> Result<Vec<u8>, TransportError> {
        let mut state = self.lock();
        let call = if state.easy_framing {
            MockCall::Transceive(frame.to_vec())
        } else {
            MockCall::Raw(frame.to_vec())
        };
        state.calls.push(call);
        Self::check_open(&state)?;

        if state.easy_framing && frame.first() == Some(&MC_READ) {
            if let Some(budget) = state.read_budget.as_mut() {
                if *budget == 0 {
                    state.card = None;
                    state.halt();
                } else {
                    *budget -= 1;
                }
            }
        }

        if !state.selected {
            return Err(TransportError::Timeout);
        }
        if state.easy_framing {
            state.mifare_exchange(frame)
        } else {
            state.raw_exchange(frame)
        }
    }

    fn set_property(
        &mut self,
        property: ReaderProperty,
        enabled: bool,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.push(MockCall::SetProperty(property, enabled));
        Self::check_open(&state)?;
        match property {
            ReaderProperty::EasyFraming => state.easy_framing = enabled,
            ReaderProperty::ActivateField => {
                if !enabled {
                    state.halt();
                }
            }
            ReaderProperty::HandleCrc => {}
        }
        Ok(())
    }

    fn abort_command(&mut self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.push(MockCall::Abort);
        Self::check_open(&state)
    }

    fn device_info(&self) -> DeviceInfo {
        self.lock().info.clone()
    }

    fn close(&mut self) {
        let mut state = self.lock();
        state.calls.push(MockCall::Close);
        state.closed = true;
    }
}

/// Driver handing out a shared `MockReader`.
pub struct MockDriver {
    reader: MockReader,
    devices: Vec<String>,
}

impl MockDriver {
    /// Driver with a single device named after the reader's connection string.
    pub fn new(reader: MockReader) -> Self {
        let devices = vec![reader.device_info().connstring];
        Self { reader, devices }
    }

    /// Driver with no attached devices.
    pub fn empty() -> Self {
        Self {
            reader: MockReader::new(),
            devices: Vec::new(),
        }
    }
}

impl ReaderDriver for MockDriver {
    type Reader = MockReader;

    fn list_devices(&self, max: usize) -> Result<Vec<String>, TransportError> {
        Ok(self.devices.iter().take(max).cloned().collect())
    }

    fn open(&self, device: Option<&str>) -> Result<MockReader, TransportError> {
        let found = match device {
            Some(id) => self.devices.iter().any(|d| d == id),
            None => !self.devices.is_empty(),
        };
        if !found {
            return Err(TransportError::DeviceNotFound(
                device.unwrap_or("any").to_string(),
            ));
        }
        Ok(self.reader.clone())
    }

    fn library_version(&self) -> String {
        format!("mock-{}", env!("CARGO_PKG_VERSION"))
    }
}

impl std::fmt::Debug for MockReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MockReader")
            .field(
                "card",
                &state.card.as_ref().map(|c| colon_hex(c.target.uid())),
            )
            .field("calls", &state.calls.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_select() {
        let mut reader = MockReader::new();
        assert_eq!(reader.select_passive_target().unwrap(), None);

        reader.insert(SimCard::classic_1k());
        let target = reader.select_passive_target().unwrap().unwrap();
        assert_eq!(target.uid_hex(), "de:ad:be:ef");
        assert_eq!(reader.calls(), vec![MockCall::Select, MockCall::Select]);
    }

    #[test]
    fn test_mock_classic_needs_auth() {
        let mut reader = MockReader::with_card(SimCard::classic_1k());
        reader.select_passive_target().unwrap();

        assert_eq!(
            reader.transceive(&[MC_READ, 5], None),
            Err(TransportError::RfTransmission)
        );

        let mut auth = vec![MC_AUTH_B, 7];
        auth.extend_from_slice(&[0xFF; 6]);
        auth.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        reader.transceive(&auth, None).unwrap();
        assert_eq!(reader.transceive(&[MC_READ, 5], None).unwrap(), vec![5u8; 16]);
    }

    #[test]
    fn test_mock_close_and_disconnect() {
        let mut reader = MockReader::with_card(SimCard::classic_1k());
        reader.close();
        assert!(reader.is_closed());
        assert_eq!(
            reader.select_passive_target(),
            Err(TransportError::Closed)
        );

        let mut other = MockReader::new();
        other.disconnect();
        assert_eq!(other.initiator_init(), Err(TransportError::Disconnected));
    }

    #[test]
    fn test_mock_driver_open() {
        let driver = MockDriver::new(MockReader::new());
        assert_eq!(driver.list_devices(8).unwrap(), vec!["mock:001:001"]);
        assert!(driver.open(None).is_ok());
        assert!(driver.open(Some("mock:001:001")).is_ok());
        assert!(matches!(
            driver.open(Some("pn53x_usb:002:003")),
            Err(TransportError::DeviceNotFound(_))
        ));
        assert!(MockDriver::empty().open(None).is_err());
    }
}
