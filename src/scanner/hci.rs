//! Raw HCI socket frame source.
//!
//! Opens a raw Linux HCI socket on one controller, enables passive LE
//! scanning and yields every HCI event the controller emits. No BlueZ daemon
//! is involved. Requires CAP_NET_RAW and CAP_NET_ADMIN capabilities or root
//! privileges.

use super::{FrameSource, ReceiveError, ReceiveFuture, ScanError};
use crate::decoder::HCI_EVENT_PKT;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tracing::{debug, warn};

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;
const HCI_COMMAND_PKT: u8 = 0x01;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

const LE_SCAN_PASSIVE: u8 = 0x00;
const LE_PUBLIC_ADDRESS: u8 = 0x00;
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

/// Scan interval and window, in 0.625 ms units (10 ms).
const SCAN_INTERVAL: u16 = 0x0010;
const SCAN_WINDOW: u16 = 0x0010;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    /// Pass every event code of the accepted packet types.
    fn set_all_events(&mut self) {
        self.event_mask = [u32::MAX; 2];
    }
}

fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// LE Set Scan Parameters: passive scan, public own address, accept all.
fn scan_parameters_command() -> Vec<u8> {
    let mut params = Vec::with_capacity(7);
    params.push(LE_SCAN_PASSIVE);
    params.extend_from_slice(&SCAN_INTERVAL.to_le_bytes());
    params.extend_from_slice(&SCAN_WINDOW.to_le_bytes());
    params.push(LE_PUBLIC_ADDRESS);
    params.push(FILTER_POLICY_ACCEPT_ALL);
    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &params)
}

/// LE Set Scan Enable. Duplicates are never filtered; every broadcast is a
/// fresh reading.
fn scan_enable_command(enable: bool) -> Vec<u8> {
    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[enable as u8, 0x00])
}

fn open_hci_socket() -> Result<OwnedFd, ScanError> {
    // SOCK_NONBLOCK is required for AsyncFd.
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };

    if fd < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to create HCI socket: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn bind_hci_socket(fd: &OwnedFd, dev_id: u16) -> Result<(), ScanError> {
    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: HCI_CHANNEL_RAW,
    };

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to bind HCI socket to hci{dev_id}: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

fn set_hci_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::new();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_all_events();

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            SOL_HCI,
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to set HCI filter: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

fn send_hci_command(fd: &OwnedFd, packet: &[u8]) -> io::Result<()> {
    let ret = unsafe { libc::write(fd.as_raw_fd(), packet.as_ptr() as *const c_void, packet.len()) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn read_fd(fd: &impl AsRawFd, buf: &mut [u8]) -> io::Result<usize> {
    let ret = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr() as *mut c_void, buf.len()) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

/// A raw HCI socket only reads zero bytes once the controller is gone.
fn frame_len(read: io::Result<usize>) -> Result<usize, ReceiveError> {
    match read {
        Ok(0) => Err(ReceiveError::Closed),
        Ok(len) => Ok(len),
        Err(error) => Err(ReceiveError::Io(error)),
    }
}

/// Raw HCI event stream from one controller with LE scanning enabled.
///
/// Scanning is disabled again when the source is dropped.
pub struct HciSource {
    events: AsyncFd<OwnedFd>,
    // Commands go through a second socket so the event filter stays simple.
    commands: OwnedFd,
    device: u16,
}

impl HciSource {
    /// Open controller `hci{device}` and start a passive LE scan.
    pub fn open(device: u16) -> Result<Self, ScanError> {
        let events = open_hci_socket()?;
        bind_hci_socket(&events, device)?;
        set_hci_filter(&events)?;

        let commands = open_hci_socket()?;
        bind_hci_socket(&commands, device)?;
        send_hci_command(&commands, &scan_parameters_command()).map_err(|e| {
            ScanError::Bluetooth(format!("Failed to set LE scan parameters: {e}"))
        })?;
        send_hci_command(&commands, &scan_enable_command(true))
            .map_err(|e| ScanError::Bluetooth(format!("Failed to enable LE scan: {e}")))?;

        let events = AsyncFd::new(events)
            .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {e}")))?;

        debug!(device, "LE scan enabled");
        Ok(Self {
            events,
            commands,
            device,
        })
    }
}

impl FrameSource for HciSource {
    fn receive<'a>(&'a mut self, buf: &'a mut [u8]) -> ReceiveFuture<'a> {
        Box::pin(async move {
            loop {
                let mut guard = self.events.readable().await.map_err(ReceiveError::Io)?;
                if let Ok(result) = guard.try_io(|inner| read_fd(inner, &mut *buf)) {
                    return frame_len(result);
                }
            }
        })
    }
}

impl Drop for HciSource {
    fn drop(&mut self) {
        match send_hci_command(&self.commands, &scan_enable_command(false)) {
            Ok(()) => debug!(device = self.device, "LE scan disabled"),
            Err(error) => warn!(device = self.device, %error, "failed to disable LE scan"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hci_filter_setup() {
        let mut filter = HciFilter::new();
        filter.set_ptype(HCI_EVENT_PKT);
        filter.set_all_events();

        // HCI_EVENT_PKT (0x04) sets bit 4 in type_mask
        assert_eq!(filter.type_mask, 1 << HCI_EVENT_PKT);
        assert_eq!(filter.event_mask, [u32::MAX, u32::MAX]);
        assert_eq!(filter.opcode, 0);
    }

    #[test]
    fn test_hci_command_packet() {
        let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[0x01, 0x00]);
        // opcode 0x200C, little-endian
        assert_eq!(packet, vec![0x01, 0x0C, 0x20, 0x02, 0x01, 0x00]);
    }

    #[test]
    fn test_scan_parameters_command() {
        assert_eq!(
            scan_parameters_command(),
            vec![0x01, 0x0B, 0x20, 0x07, 0x00, 0x10, 0x00, 0x10, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_zero_length_read_means_closed() {
        assert!(matches!(frame_len(Ok(0)), Err(ReceiveError::Closed)));
        assert!(matches!(frame_len(Ok(43)), Ok(43)));
        assert!(matches!(
            frame_len(Err(io::ErrorKind::ConnectionReset.into())),
            Err(ReceiveError::Io(_))
        ));
    }

    #[test]
    fn test_scan_enable_command() {
        assert_eq!(scan_enable_command(true)[4..], [0x01, 0x00]);
        assert_eq!(scan_enable_command(false)[4..], [0x00, 0x00]);
    }
}
