//! PN533-family USB readers over nusb.
//!
//! Key PN533 command flow:
//! - host frame on the Bulk OUT endpoint
//! - ACK frame on Bulk IN, then the response frame
//! - an ACK frame sent by the host aborts the running command

pub mod frame;

use std::io::{Read, Write};
use std::time::Duration;

use nusb::transfer::{Bulk, In, Out};
use nusb::{Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, trace, warn};

use self::frame::{ACK_FRAME, FrameError, Incoming};
use super::traits::{DeviceInfo, ReaderDriver, ReaderProperty, ReaderTransport, TransportError};
use crate::protocol::Target;

/// Known PN533 based readers: (VID, PID, name).
pub const SUPPORTED_DEVICES: &[(u16, u16, &str)] = &[
    (0x04CC, 0x2533, "NXP PN533"),
    (0x04E6, 0x5591, "SCM Micro / SCL3711-NFC&RW"),
    (0x04E6, 0x5594, "SCM Micro / SCL3712-NFC&RW"),
    (0x054C, 0x02E1, "Sony / RC-S360"),
];

/// Connection string prefix.
pub const DRIVER_NAME: &str = "pn53x_usb";

// PN533 commands
const CMD_GET_FIRMWARE_VERSION: u8 = 0x02;
const CMD_WRITE_REGISTER: u8 = 0x08;
const CMD_SET_PARAMETERS: u8 = 0x12;
const CMD_RF_CONFIGURATION: u8 = 0x32;
const CMD_IN_DATA_EXCHANGE: u8 = 0x40;
const CMD_IN_COMMUNICATE_THRU: u8 = 0x42;
const CMD_IN_LIST_PASSIVE_TARGET: u8 = 0x4A;

// RFConfiguration items
const RFCI_FIELD: u8 = 0x01;
const RFCI_RETRY_SELECT: u8 = 0x05;

// SetParameters flags
const PARAM_AUTO_ATR_RES: u8 = 0x04;

// CIU registers
const CIU_TX_MODE: u16 = 0x6302;
const CIU_RX_MODE: u16 = 0x6303;
const SYMBOL_CRC_ENABLE: u8 = 0x80;

/// 106 kbps ISO14443-A.
const BRTY_106_TYPE_A: u8 = 0x00;

const MAX_FRAME_LEN: usize = 512;

/// Bound on any USB transfer when the caller gives none.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// The ACK frame follows the command almost at once.
const ACK_TIMEOUT: Duration = Duration::from_millis(100);

/// Driver enumerating PN533 readers on USB.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pn533Driver;

impl Pn533Driver {
    pub fn new() -> Self {
        Self
    }

    fn candidates() -> Result<Vec<(nusb::DeviceInfo, &'static str)>, TransportError> {
        let devices = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        Ok(devices
            .filter_map(|d| {
                SUPPORTED_DEVICES
                    .iter()
                    .find(|(vid, pid, _)| d.vendor_id() == *vid && d.product_id() == *pid)
                    .map(|(_, _, name)| (d, *name))
            })
            .collect())
    }
}

fn connstring(device_info: &nusb::DeviceInfo) -> String {
    format!(
        "{}:{}:{:03}",
        DRIVER_NAME,
        device_info.bus_id(),
        device_info.device_address()
    )
}

impl ReaderDriver for Pn533Driver {
    type Reader = Pn533Reader;

    fn list_devices(&self, max: usize) -> Result<Vec<String>, TransportError> {
        Ok(Self::candidates()?
            .iter()
            .take(max)
            .map(|(d, _)| connstring(d))
            .collect())
    }

    #[instrument(level = "info", skip(self))]
    fn open(&self, device: Option<&str>) -> Result<Pn533Reader, TransportError> {
        let (device_info, name) = Self::candidates()?
            .into_iter()
            .find(|(d, _)| device.is_none_or(|wanted| connstring(d) == wanted))
            .ok_or_else(|| TransportError::DeviceNotFound(device.unwrap_or("any").to_string()))?;

        Pn533Reader::open_device_info(device_info, name)
    }

    fn library_version(&self) -> String {
        format!("nfc-core {} ({})", env!("CARGO_PKG_VERSION"), DRIVER_NAME)
    }
}

/// An opened PN533 reader.
pub struct Pn533Reader {
    interface: Option<Interface>,
    in_endpoint: u8,
    out_endpoint: u8,
    info: DeviceInfo,
    easy_framing: bool,
    handle_crc: bool,
}

impl Pn533Reader {
    fn open_device_info(
        device_info: nusb::DeviceInfo,
        name: &str,
    ) -> Result<Self, TransportError> {
        let connstring = connstring(&device_info);
        info!(
            vendor_id = %format!("{:04X}", device_info.vendor_id()),
            product_id = %format!("{:04X}", device_info.product_id()),
            connstring = %connstring,
            "Found reader"
        );

        let product = device_info
            .product_string()
            .map(str::to_string)
            .unwrap_or_else(|| name.to_string());

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let interface = device
            .claim_interface(0)
            .wait()
            .map_err(|e| TransportError::OpenFailed(format!("claim interface 0: {}", e)))?;

        let mut in_endpoint: u8 = 0;
        let mut out_endpoint: u8 = 0;

        for config in device.configurations() {
            for iface in config.interfaces() {
                if iface.interface_number() == 0 {
                    for alt in iface.alt_settings() {
                        for ep in alt.endpoints() {
                            if ep.transfer_type() == nusb::descriptors::TransferType::Bulk {
                                if ep.direction() == nusb::transfer::Direction::In {
                                    in_endpoint = ep.address();
                                } else {
                                    out_endpoint = ep.address();
                                }
                            }
                        }
                    }
                }
            }
        }

        if in_endpoint == 0 || out_endpoint == 0 {
            return Err(TransportError::OpenFailed(
                "Bulk IN/OUT endpoints not found".into(),
            ));
        }

        let mut reader = Self {
            interface: Some(interface),
            in_endpoint,
            out_endpoint,
            info: DeviceInfo {
                name: product,
                connstring,
                capabilities: String::new(),
            },
            easy_framing: true,
            handle_crc: true,
        };

        // The controller may still be busy with a command from a previous owner.
        reader.write_raw(&ACK_FRAME)?;

        let version = reader.command(CMD_GET_FIRMWARE_VERSION, &[])?;
        reader.info.capabilities = describe_firmware(&version);
        info!(capabilities = %reader.info.capabilities, "Reader opened");

        Ok(reader)
    }

    fn interface(&self) -> Result<&Interface, TransportError> {
        self.interface.as_ref().ok_or(TransportError::Closed)
    }

    fn write_raw(&self, data: &[u8]) -> Result<(), TransportError> {
        let ep = self
            .interface()?
            .endpoint::<Bulk, Out>(self.out_endpoint)
            .map_err(|e| TransportError::Usb(e.to_string()))?;

        let mut writer = ep.writer(MAX_FRAME_LEN).with_write_timeout(DEFAULT_TIMEOUT);
        writer.write_all(data).map_err(io_error)?;
        writer.flush().map_err(io_error)?;
        trace!(len = data.len(), "Frame written");
        Ok(())
    }

    fn read_raw(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let ep = self
            .interface()?
            .endpoint::<Bulk, In>(self.in_endpoint)
            .map_err(|e| TransportError::Usb(e.to_string()))?;

        let mut reader = ep.reader(MAX_FRAME_LEN).with_read_timeout(timeout);
        let mut buf = vec![0u8; MAX_FRAME_LEN];
        let n = reader.read(&mut buf).map_err(io_error)?;
        buf.truncate(n);
        trace!(len = n, "Frame read");
        Ok(buf)
    }

    /// Run one PN533 command with the default response bound.
    fn command(&self, command: u8, params: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.command_within(command, params, DEFAULT_TIMEOUT)
    }

    /// Run one PN533 command and return the response data after `D5 <cmd+1>`.
    ///
    /// A response that does not arrive within `timeout` aborts the command.
    fn command_within(
        &self,
        command: u8,
        params: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.write_raw(&frame::encode(command, params))?;

        match frame::decode(&self.read_raw(ACK_TIMEOUT)?).map_err(frame_error)? {
            Incoming::Ack => {}
            other => {
                return Err(TransportError::Frame(format!(
                    "expected ACK for 0x{:02X}, got {:?}",
                    command, other
                )));
            }
        }

        let response = match self.read_raw(timeout) {
            Err(TransportError::Timeout) => {
                debug!(command = %format!("0x{:02X}", command), ?timeout, "No response");
                if let Err(e) = self.write_raw(&ACK_FRAME) {
                    warn!(error = %e, "Abort after timeout failed");
                }
                return Err(TransportError::Timeout);
            }
            other => other?,
        };
        if response.starts_with(&ACK_FRAME) {
            // A second ACK means the command was aborted before it answered.
            return Err(TransportError::Aborted);
        }
        frame::decode_response(&response, command).map_err(frame_error)
    }

    fn write_register(&self, address: u16, value: u8) -> Result<(), TransportError> {
        let [hi, lo] = address.to_be_bytes();
        self.command(CMD_WRITE_REGISTER, &[hi, lo, value])?;
        Ok(())
    }

    fn rf_configuration(&self, item: u8, values: &[u8]) -> Result<(), TransportError> {
        let mut params = Vec::with_capacity(values.len() + 1);
        params.push(item);
        params.extend_from_slice(values);
        self.command(CMD_RF_CONFIGURATION, &params)?;
        Ok(())
    }
}

fn frame_error(e: FrameError) -> TransportError {
    TransportError::Frame(e.to_string())
}

fn io_error(e: std::io::Error) -> TransportError {
    match e.kind() {
        std::io::ErrorKind::TimedOut => TransportError::Timeout,
        _ => TransportError::Usb(e.to_string()),
    }
}

/// Map an InDataExchange/InCommunicateThru status byte.
fn check_status(status: u8) -> Result<(), TransportError> {
    match status & 0x3F {
        0x00 => Ok(()),
        0x01 => Err(TransportError::Timeout),
        0x14 => Err(TransportError::AuthFailed),
        // CRC, parity, bit count, framing, collision, RF protocol errors.
        0x02..=0x07 | 0x0A | 0x0B | 0x13 | 0x23 => Err(TransportError::RfTransmission),
        0x29 | 0x2A => Err(TransportError::Disconnected),
        other => Err(TransportError::Chip(other)),
    }
}

fn describe_firmware(version: &[u8]) -> String {
    if version.len() < 4 {
        return "chip: unknown".to_string();
    }
    let mut modes = Vec::new();
    if version[3] & 0x01 != 0 {
        modes.push("ISO/IEC 14443A");
    }
    if version[3] & 0x02 != 0 {
        modes.push("ISO/IEC 14443B");
    }
    if version[3] & 0x04 != 0 {
        modes.push("ISO/IEC 18092");
    }
    format!(
        "chip: PN5{:02X} v{}.{}, supports: {}",
        version[0],
        version[1],
        version[2],
        modes.join(", ")
    )
}

/// Parse InListPassiveTarget data for one 106 kbps type A target.
///
/// `NbTg Tg SENS_RES(2) SEL_RES NFCIDLength NFCID [ATS]`
fn parse_target(data: &[u8]) -> Result<Option<Target>, TransportError> {
    match data.first() {
        None => return Err(TransportError::Frame("empty target list".into())),
        Some(0) => return Ok(None),
        Some(_) => {}
    }
    if data.len() < 6 {
        return Err(TransportError::Frame(format!(
            "short target data: {} bytes",
            data.len()
        )));
    }

    let atqa = [data[2], data[3]];
    let sak = data[4];
    let uid_len = data[5] as usize;
    let uid_end = 6 + uid_len;
    if data.len() < uid_end {
        return Err(TransportError::Frame("truncated NFCID".into()));
    }

    let mut target = Target::new(data[6..uid_end].to_vec(), atqa, sak);
    if data.len() > uid_end {
        target = target.with_ats(data[uid_end..].to_vec());
    }
    Ok(Some(target))
}

impl ReaderTransport for Pn533Reader {
    #[instrument(skip(self), fields(device = %self.info.connstring))]
    fn initiator_init(&mut self) -> Result<(), TransportError> {
        // MxRtyATR, MxRtyPSL, MxRtyPassiveActivation: keep selection short
        // so an empty field returns NbTg = 0 instead of blocking.
        self.rf_configuration(RFCI_RETRY_SELECT, &[0xFF, 0x01, 0x02])?;
        // Stay at ISO14443-3 after selection; Mifare commands need it.
        self.command(CMD_SET_PARAMETERS, &[PARAM_AUTO_ATR_RES])?;
        self.set_property(ReaderProperty::HandleCrc, true)?;
        self.set_property(ReaderProperty::ActivateField, true)?;
        self.easy_framing = true;
        debug!("Initiator mode ready");
        Ok(())
    }

    fn select_passive_target(&mut self) -> Result<Option<Target>, TransportError> {
        let data = self.command(CMD_IN_LIST_PASSIVE_TARGET, &[0x01, BRTY_106_TYPE_A])?;
        let target = parse_target(&data)?;
        if let Some(t) = &target {
            debug!(uid = %t.uid_hex(), sak = %format!("{:02X}", t.sak()), "Target selected");
        }
        Ok(target)
    }

    fn transceive(
        &mut self,
        frame: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, TransportError> {
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let response = if self.easy_framing {
            let mut params = Vec::with_capacity(frame.len() + 1);
            params.push(0x01);
            params.extend_from_slice(frame);
            self.command_within(CMD_IN_DATA_EXCHANGE, &params, timeout)?
        } else {
            trace!(crc = self.handle_crc, len = frame.len(), "Raw exchange");
            self.command_within(CMD_IN_COMMUNICATE_THRU, frame, timeout)?
        };

        let (status, data) = response
            .split_first()
            .ok_or_else(|| TransportError::Frame("missing status byte".into()))?;
        check_status(*status)?;
        Ok(data.to_vec())
    }

    fn set_property(
        &mut self,
        property: ReaderProperty,
        enabled: bool,
    ) -> Result<(), TransportError> {
        match property {
            ReaderProperty::EasyFraming => {
                self.easy_framing = enabled;
                Ok(())
            }
            ReaderProperty::ActivateField => {
                self.rf_configuration(RFCI_FIELD, &[u8::from(enabled)])
            }
            ReaderProperty::HandleCrc => {
                let value = if enabled { SYMBOL_CRC_ENABLE } else { 0x00 };
                self.write_register(CIU_TX_MODE, value)?;
                self.write_register(CIU_RX_MODE, value)?;
                self.handle_crc = enabled;
                Ok(())
            }
        }
    }

    fn abort_command(&mut self) -> Result<(), TransportError> {
        debug!("Aborting running command");
        self.write_raw(&ACK_FRAME)
    }

    fn device_info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn close(&mut self) {
        if self.interface.is_none() {
            return;
        }
        if let Err(e) = self.abort_command() {
            warn!(error = %e, "Abort on close failed");
        }
        if let Err(e) = self.rf_configuration(RFCI_FIELD, &[0x00]) {
            debug!(error = %e, "Field off on close failed");
        }
        self.interface = None;
        info!(device = %self.info.connstring, "Reader closed");
    }
}

impl Drop for Pn533Reader {
    fn drop(&mut self) {
        self.close();
    }
}
