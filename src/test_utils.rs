use crate::decoder::{EVT_LE_ADVERTISING_REPORT, EVT_LE_META_EVENT, HCI_EVENT_PKT};
use crate::delivery::{ConnectFuture, Connector};
use crate::mac_address::MacAddress;
use crate::scanner::{FrameSource, ReceiveError, ReceiveFuture};
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

/// A stable address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Signature broadcast by the moisture sensor firmware.
pub const TEST_SIGNATURE: &[u8] = b"MSOT_BLE_Demo:";

const TEST_RSSI: u8 = 0xC4; // -60 dBm

/// Advertising data with one manufacturer-specific AD structure holding
/// `signature` immediately followed by `value`.
pub fn moisture_ad_data(signature: &[u8], value: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(2 + signature.len() + value.len());
    data.push((1 + signature.len() + value.len()) as u8);
    data.push(0xFF);
    data.extend_from_slice(signature);
    data.extend_from_slice(value);
    data
}

/// Build an LE advertising report event carrying one report per entry.
pub fn advertising_frame(reports: &[(MacAddress, Vec<u8>)]) -> Vec<u8> {
    let mut frame = vec![HCI_EVENT_PKT, EVT_LE_META_EVENT, 0x00, EVT_LE_ADVERTISING_REPORT];
    frame.push(reports.len() as u8);
    for (address, data) in reports {
        frame.push(0x00); // ADV_IND
        frame.push(0x00); // public address
        frame.extend_from_slice(&address.to_wire());
        frame.push(data.len() as u8);
        frame.extend_from_slice(data);
        frame.push(TEST_RSSI);
    }
    frame[2] = (frame.len() - 3) as u8;
    frame
}

/// The frame a moisture sensor broadcasts for a single reading.
pub fn single_report_frame(address: MacAddress, signature: &[u8], value: &[u8]) -> Vec<u8> {
    advertising_frame(&[(address, moisture_ad_data(signature, value))])
}

/// Shared view of everything written to a [`ChunkedStream`].
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    written: Arc<Mutex<Vec<u8>>>,
    calls: Arc<AtomicUsize>,
}

impl Recorder {
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    pub fn write_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// A stream that accepts at most `chunk` bytes per write call.
#[derive(Debug)]
pub struct ChunkedStream {
    recorder: Recorder,
    chunk: usize,
    fail_writes: bool,
    fail_shutdown: bool,
}

impl ChunkedStream {
    pub fn new(recorder: Recorder, chunk: usize) -> Self {
        Self {
            recorder,
            chunk,
            fail_writes: false,
            fail_shutdown: false,
        }
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn failing_shutdown(mut self) -> Self {
        self.fail_shutdown = true;
        self
    }
}

impl AsyncWrite for ChunkedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail_writes {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        let n = buf.len().min(self.chunk);
        self.recorder.written.lock().unwrap().extend_from_slice(&buf[..n]);
        self.recorder.calls.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.fail_shutdown {
            return Poll::Ready(Err(io::ErrorKind::NotConnected.into()));
        }
        Poll::Ready(Ok(()))
    }
}

/// Connector that hands out queued results, then refuses forever.
pub struct QueueConnector<S> {
    results: Mutex<VecDeque<io::Result<S>>>,
    attempts: AtomicUsize,
    hangs: AtomicUsize,
}

impl<S> QueueConnector<S> {
    pub fn new(results: Vec<io::Result<S>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            attempts: AtomicUsize::new(0),
            hangs: AtomicUsize::new(0),
        }
    }

    /// The first `count` attempts never complete, like a peer that drops SYNs.
    pub fn hanging_first(self, count: usize) -> Self {
        self.hangs.store(count, Ordering::SeqCst);
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl<S: AsyncWrite + Unpin + Send + 'static> Connector for QueueConnector<S> {
    type Stream = S;

    fn connect(&self) -> ConnectFuture<'_, S> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let hang = self
            .hangs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hang {
            return Box::pin(std::future::pending::<io::Result<S>>());
        }
        let next = self.results.lock().unwrap().pop_front();
        Box::pin(async move { next.unwrap_or_else(|| Err(io::ErrorKind::ConnectionRefused.into())) })
    }

    fn peer(&self) -> &str {
        "test-gateway"
    }
}

/// One scripted controller read.
#[derive(Debug, Clone)]
pub enum Read {
    Frame(Vec<u8>),
    Empty,
    Error,
}

/// Frame source replaying a script, then idling forever.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    script: VecDeque<Read>,
}

impl ScriptedSource {
    pub fn new(script: impl IntoIterator<Item = Read>) -> Self {
        Self {
            script: script.into_iter().collect(),
        }
    }
}

impl FrameSource for ScriptedSource {
    fn receive<'a>(&'a mut self, buf: &'a mut [u8]) -> ReceiveFuture<'a> {
        let next = self.script.pop_front();
        Box::pin(async move {
            match next {
                Some(Read::Frame(frame)) => {
                    buf[..frame.len()].copy_from_slice(&frame);
                    Ok(frame.len())
                }
                Some(Read::Empty) => Ok(0),
                Some(Read::Error) => Err(ReceiveError::Io(io::ErrorKind::Other.into())),
                None => std::future::pending().await,
            }
        })
    }
}
