//! HCI event frame decoder.
//!
//! Turns a raw frame read from an HCI socket into zero or more
//! [`AdvertisingReport`]s. Decoding is pure: no I/O, no state, and every byte
//! access is bounds-checked so that arbitrary input can never panic.
//!
//! Frame layout (offsets from the start of the frame):
//!
//! ```text
//! 0: packet type (0x04 = event)
//! 1: event code  (0x3E = LE meta event)
//! 2: parameter length
//! 3: LE sub-event (0x02 = advertising report)
//! 4: report count            <- report base for the first report
//! ```
//!
//! Report fields are addressed relative to the report base: advertising event
//! type at `+1`, address type at `+2`, address at `+3..+9` (wire order), data
//! length at `+9`, advertising data from `+10`, followed by one RSSI byte.

use crate::mac_address::MacAddress;
use std::ops::Range;
use thiserror::Error;

// HCI packet types
pub const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
pub const EVT_CONN_COMPLETE: u8 = 0x03;
pub const EVT_DISCONN_COMPLETE: u8 = 0x05;
pub const EVT_NUM_COMP_PKTS: u8 = 0x13;
pub const EVT_INQUIRY_RESULT_WITH_RSSI: u8 = 0x22;
pub const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
pub const EVT_LE_CONN_COMPLETE: u8 = 0x01;
pub const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;
pub const EVT_LE_CONN_UPDATE_COMPLETE: u8 = 0x03;
pub const EVT_LE_READ_REMOTE_USED_FEATURES_COMPLETE: u8 = 0x04;

/// Packet type, event code and parameter length.
pub const HCI_EVENT_HEADER_LEN: usize = 3;

const EVENT_CODE_OFFSET: usize = 1;
const SUBEVENT_OFFSET: usize = 3;
const REPORTS_BASE: usize = 4;

// Relative to a report base
const ADV_EVENT_TYPE_OFFSET: usize = 1;
const ADDRESS_TYPE_OFFSET: usize = 2;
const ADDRESS_OFFSET: usize = 3;
const ADDRESS_LEN: usize = 6;
const DATA_LEN_OFFSET: usize = 9;
/// Start of the advertising data within a report.
pub const AD_DATA_OFFSET: usize = 10;
/// The data length field is a single byte.
const MAX_AD_DATA_END: usize = AD_DATA_OFFSET + u8::MAX as usize;

/// Errors produced for malformed frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Frame is shorter than the header it claims to carry.
    #[error("Truncated frame: need at least {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },
    /// A field window lies outside the frame.
    #[error("Out of bounds: bytes {start}..{end} requested from a {len}-byte frame")]
    OutOfBounds { start: usize, end: usize, len: usize },
}

/// Errors returned when a [`ReportLayout`] is inconsistent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("{0} window must start inside the advertising data (offset 10 or later)")]
    OutsideData(&'static str),
    #[error("{0} window must not be empty")]
    Empty(&'static str),
    #[error("signature and payload windows overlap")]
    Overlap,
    #[error("{0} window ends past the largest possible advertising data")]
    TooLarge(&'static str),
}

/// LE meta sub-event carried by a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectionComplete,
    AdvertisingReport,
    ConnectionUpdateComplete,
    ReadRemoteFeaturesComplete,
    Other(u8),
}

impl From<u8> for EventKind {
    fn from(subevent: u8) -> Self {
        match subevent {
            EVT_LE_CONN_COMPLETE => EventKind::ConnectionComplete,
            EVT_LE_ADVERTISING_REPORT => EventKind::AdvertisingReport,
            EVT_LE_CONN_UPDATE_COMPLETE => EventKind::ConnectionUpdateComplete,
            EVT_LE_READ_REMOTE_USED_FEATURES_COMPLETE => EventKind::ReadRemoteFeaturesComplete,
            other => EventKind::Other(other),
        }
    }
}

/// Classification of a whole HCI frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HciEvent {
    ConnectionComplete,
    DisconnectionComplete,
    NumberOfCompletedPackets,
    InquiryResultWithRssi,
    LeMeta(EventKind),
    /// Any other event code, or a packet that is not an event at all.
    Other { packet_type: u8, event_code: u8 },
}

/// Where the signature and payload live inside an advertising report.
///
/// Offsets are relative to the report base, so the defaults (`12` and `26`)
/// address the bytes right after the first AD structure's length and type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportLayout {
    signature_offset: usize,
    signature_len: usize,
    payload_offset: usize,
    payload_len: usize,
}

impl Default for ReportLayout {
    fn default() -> Self {
        Self {
            signature_offset: 12,
            signature_len: 14,
            payload_offset: 26,
            payload_len: 10,
        }
    }
}

impl ReportLayout {
    pub fn new(
        signature_offset: usize,
        signature_len: usize,
        payload_offset: usize,
        payload_len: usize,
    ) -> Result<Self, LayoutError> {
        if signature_len == 0 {
            return Err(LayoutError::Empty("signature"));
        }
        if payload_len == 0 {
            return Err(LayoutError::Empty("payload"));
        }
        if signature_offset < AD_DATA_OFFSET {
            return Err(LayoutError::OutsideData("signature"));
        }
        if payload_offset < AD_DATA_OFFSET {
            return Err(LayoutError::OutsideData("payload"));
        }
        let fits = |offset: usize, len: usize| {
            offset.checked_add(len).is_some_and(|end| end <= MAX_AD_DATA_END)
        };
        if !fits(signature_offset, signature_len) {
            return Err(LayoutError::TooLarge("signature"));
        }
        if !fits(payload_offset, payload_len) {
            return Err(LayoutError::TooLarge("payload"));
        }

        let layout = Self {
            signature_offset,
            signature_len,
            payload_offset,
            payload_len,
        };
        let (sig, payload) = (layout.signature_range(), layout.payload_range());
        if sig.start < payload.end && payload.start < sig.end {
            return Err(LayoutError::Overlap);
        }
        Ok(layout)
    }

    pub fn signature_range(&self) -> Range<usize> {
        self.signature_offset..self.signature_offset + self.signature_len
    }

    pub fn payload_range(&self) -> Range<usize> {
        self.payload_offset..self.payload_offset + self.payload_len
    }

    /// Number of advertising data bytes a report must declare to hold both windows.
    pub fn required_data_len(&self) -> usize {
        self.signature_range().end.max(self.payload_range().end) - AD_DATA_OFFSET
    }
}

/// A single decoded LE advertising report.
///
/// The signature window is kept private: it is only ever compared, never
/// handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingReport {
    pub event_kind: EventKind,
    pub address: MacAddress,
    pub address_type: u8,
    pub adv_event_type: u8,
    pub payload: Vec<u8>,
    pub rssi: Option<i8>,
    signature: Vec<u8>,
}

impl AdvertisingReport {
    #[cfg(test)]
    pub(crate) fn new(
        event_kind: EventKind,
        address: MacAddress,
        signature: Vec<u8>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            event_kind,
            address,
            address_type: 0,
            adv_event_type: 0,
            payload,
            rssi: None,
            signature,
        }
    }

    /// Exact byte comparison of the signature window.
    pub fn matches_signature(&self, expected: &[u8]) -> bool {
        self.signature == expected
    }
}

/// Bounds-checked view over a frame.
#[derive(Clone, Copy)]
struct Frame<'a>(&'a [u8]);

impl<'a> Frame<'a> {
    fn byte(self, at: usize) -> Result<u8, DecodeError> {
        self.0.get(at).copied().ok_or(DecodeError::OutOfBounds {
            start: at,
            end: at + 1,
            len: self.0.len(),
        })
    }

    fn window(self, start: usize, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = start + len;
        self.0.get(start..end).ok_or(DecodeError::OutOfBounds {
            start,
            end,
            len: self.0.len(),
        })
    }

    fn require(self, needed: usize) -> Result<(), DecodeError> {
        if self.0.len() < needed {
            return Err(DecodeError::Truncated {
                needed,
                actual: self.0.len(),
            });
        }
        Ok(())
    }
}

/// Classify a frame by packet type, event code and (for LE meta events) sub-event.
pub fn classify(frame: &[u8]) -> Result<HciEvent, DecodeError> {
    let frame = Frame(frame);
    frame.require(HCI_EVENT_HEADER_LEN)?;

    let packet_type = frame.byte(0)?;
    let event_code = frame.byte(EVENT_CODE_OFFSET)?;
    if packet_type != HCI_EVENT_PKT {
        return Ok(HciEvent::Other {
            packet_type,
            event_code,
        });
    }

    Ok(match event_code {
        EVT_CONN_COMPLETE => HciEvent::ConnectionComplete,
        EVT_DISCONN_COMPLETE => HciEvent::DisconnectionComplete,
        EVT_NUM_COMP_PKTS => HciEvent::NumberOfCompletedPackets,
        EVT_INQUIRY_RESULT_WITH_RSSI => HciEvent::InquiryResultWithRssi,
        EVT_LE_META_EVENT => {
            frame.require(SUBEVENT_OFFSET + 1)?;
            HciEvent::LeMeta(EventKind::from(frame.byte(SUBEVENT_OFFSET)?))
        }
        _ => HciEvent::Other {
            packet_type,
            event_code,
        },
    })
}

/// Stateless decoder for LE advertising report events.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketDecoder {
    layout: ReportLayout,
}

impl PacketDecoder {
    pub fn new(layout: ReportLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &ReportLayout {
        &self.layout
    }

    /// Decode the first advertising report in `frame`.
    ///
    /// Returns `Ok(None)` for well-formed frames that carry nothing of interest
    /// (other events, other LE sub-events, reports too short for the layout).
    pub fn decode(&self, frame: &[u8]) -> Result<Option<AdvertisingReport>, DecodeError> {
        Ok(self.decode_all(frame)?.into_iter().next())
    }

    /// Decode every advertising report in `frame`.
    ///
    /// Each report's declared data length is validated against the frame
    /// before any window is read. Reports whose declared data is too short to
    /// hold the signature and payload windows belong to some other kind of
    /// broadcaster and are skipped rather than treated as errors.
    pub fn decode_all(&self, frame: &[u8]) -> Result<Vec<AdvertisingReport>, DecodeError> {
        let kind = match classify(frame)? {
            HciEvent::LeMeta(kind) => kind,
            _ => return Ok(Vec::new()),
        };
        if kind != EventKind::AdvertisingReport {
            return Ok(Vec::new());
        }

        let frame = Frame(frame);
        frame.require(REPORTS_BASE + 1)?;
        let count = frame.byte(REPORTS_BASE)? as usize;

        let mut reports = Vec::with_capacity(count);
        let mut base = REPORTS_BASE;
        for _ in 0..count {
            let (report, next) = self.decode_report(frame, base)?;
            reports.extend(report);
            base = next;
        }
        Ok(reports)
    }

    /// Decode the report at `base`; returns it (if the layout fits) and the next base.
    fn decode_report(
        &self,
        frame: Frame<'_>,
        base: usize,
    ) -> Result<(Option<AdvertisingReport>, usize), DecodeError> {
        let adv_event_type = frame.byte(base + ADV_EVENT_TYPE_OFFSET)?;
        let address_type = frame.byte(base + ADDRESS_TYPE_OFFSET)?;
        let mut wire = [0u8; ADDRESS_LEN];
        wire.copy_from_slice(frame.window(base + ADDRESS_OFFSET, ADDRESS_LEN)?);
        let data_len = frame.byte(base + DATA_LEN_OFFSET)? as usize;

        // The declared data must really be in the frame.
        frame.window(base + AD_DATA_OFFSET, data_len)?;
        let data_end = base + AD_DATA_OFFSET + data_len;
        let rssi = frame.byte(data_end).ok().map(|b| b as i8);

        if data_len < self.layout.required_data_len() {
            return Ok((None, data_end));
        }

        let sig = self.layout.signature_range();
        let payload = self.layout.payload_range();
        let report = AdvertisingReport {
            event_kind: EventKind::AdvertisingReport,
            address: MacAddress::from_wire(wire),
            address_type,
            adv_event_type,
            payload: frame.window(base + payload.start, payload.len())?.to_vec(),
            rssi,
            signature: frame.window(base + sig.start, sig.len())?.to_vec(),
        };
        Ok((Some(report), data_end))
    }
}
