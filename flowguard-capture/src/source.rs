//! Packet sources.
//!
//! A [`PacketSource`] yields packets one at a time; `Ok(None)` means the read
//! timed out without a packet, which lets the capture loop poll for
//! cancellation on idle links. [`SourceOpener`] turns an interface name into a
//! source so a pipeline run can open its capture lazily, on its own thread.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use pcap::{Activated, Capture, Device};
use tracing::debug;

use crate::error::CaptureError;
use crate::packet::Packet;

pub trait PacketSource: Send {
    /// Blocks until the next packet, a read timeout (`Ok(None)`), or an error.
    /// [`CaptureError::Exhausted`] signals an orderly end of the source.
    fn next_packet(&mut self) -> Result<Option<Packet>, CaptureError>;
}

pub trait SourceOpener: Send + Sync {
    fn open(&self, interface: &str) -> Result<Box<dyn PacketSource>, CaptureError>;
}

impl<F> SourceOpener for F
where
    F: Fn(&str) -> Result<Box<dyn PacketSource>, CaptureError> + Send + Sync,
{
    fn open(&self, interface: &str) -> Result<Box<dyn PacketSource>, CaptureError> {
        self(interface)
    }
}

/// Any activated pcap handle, live or offline.
struct PcapSource<T: Activated + ?Sized> {
    capture: Capture<T>,
}

impl<T: Activated + ?Sized> PacketSource for PcapSource<T>
where
    Capture<T>: Send,
{
    fn next_packet(&mut self) -> Result<Option<Packet>, CaptureError> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let ts = packet.header.ts;
                let timestamp_us = (ts.tv_sec as i64) * 1_000_000 + ts.tv_usec as i64;
                Ok(Some(Packet::new(packet.data.to_vec(), timestamp_us)))
            }
            // No packet received in this timeout window.
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(pcap::Error::NoMorePackets) => Err(CaptureError::Exhausted),
            Err(e) => Err(CaptureError::Read(e.to_string())),
        }
    }
}

/// Opens live devices in the configured mode.
#[derive(Debug, Clone)]
pub struct PcapOpener {
    pub promiscuous: bool,
    pub snaplen: i32,
    pub read_timeout_ms: i32,
}

impl Default for PcapOpener {
    fn default() -> Self {
        Self {
            promiscuous: true,
            snaplen: 64 * 1024,
            read_timeout_ms: 1000,
        }
    }
}

impl SourceOpener for PcapOpener {
    fn open(&self, interface: &str) -> Result<Box<dyn PacketSource>, CaptureError> {
        // List available devices and select the one matching the interface name.
        let device = Device::list()?
            .into_iter()
            .find(|d| d.name == interface)
            .ok_or_else(|| CaptureError::DeviceNotFound(interface.to_string()))?;

        let capture = Capture::from_device(device)
            .and_then(|c| {
                c.promisc(self.promiscuous)
                    .snaplen(self.snaplen)
                    .timeout(self.read_timeout_ms)
                    .open()
            })
            .map_err(|e| CaptureError::Open(e.to_string()))?;

        debug!(interface, snaplen = self.snaplen, "opened live capture");
        Ok(Box::new(PcapSource { capture }))
    }
}

/// Opens a capture file; the interface argument is only used for logging.
#[derive(Debug, Clone)]
pub struct PcapFileOpener {
    path: PathBuf,
}

impl PcapFileOpener {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SourceOpener for PcapFileOpener {
    fn open(&self, interface: &str) -> Result<Box<dyn PacketSource>, CaptureError> {
        let capture = Capture::from_file(&self.path)
            .map_err(|e| CaptureError::Open(format!("{}: {e}", self.path.display())))?;
        debug!(interface, path = %self.path.display(), "opened capture file");
        Ok(Box::new(PcapSource { capture }))
    }
}

/// What an in-memory source does once its packets run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryEnd {
    /// Report the source as exhausted.
    Exhausted,
    /// Behave like an idle link: keep returning read timeouts.
    Idle,
}

#[derive(Debug)]
pub struct MemorySource {
    packets: VecDeque<Packet>,
    end: MemoryEnd,
}

impl MemorySource {
    pub fn new(packets: impl IntoIterator<Item = Packet>, end: MemoryEnd) -> Self {
        Self {
            packets: packets.into_iter().collect(),
            end,
        }
    }
}

impl PacketSource for MemorySource {
    fn next_packet(&mut self) -> Result<Option<Packet>, CaptureError> {
        match self.packets.pop_front() {
            Some(packet) => Ok(Some(packet)),
            None => match self.end {
                MemoryEnd::Exhausted => Err(CaptureError::Exhausted),
                MemoryEnd::Idle => {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    Ok(None)
                }
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    pub name: String,
    pub description: Option<String>,
}

/// Lists the devices pcap can open.
pub fn list_interfaces() -> Result<Vec<InterfaceInfo>, CaptureError> {
    Ok(Device::list()?
        .into_iter()
        .map(|d| InterfaceInfo {
            name: d.name,
            description: d.desc,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_drains_then_exhausts() {
        let mut source = MemorySource::new(
            vec![Packet::new(vec![1], 1), Packet::new(vec![2], 2)],
            MemoryEnd::Exhausted,
        );
        assert_eq!(source.next_packet().unwrap().unwrap().timestamp_us, 1);
        assert_eq!(source.next_packet().unwrap().unwrap().timestamp_us, 2);
        assert!(matches!(source.next_packet(), Err(CaptureError::Exhausted)));
    }

    #[test]
    fn idle_memory_source_times_out() {
        let mut source = MemorySource::new(Vec::new(), MemoryEnd::Idle);
        assert!(source.next_packet().unwrap().is_none());
        assert!(source.next_packet().unwrap().is_none());
    }

    #[test]
    fn closures_open_sources() {
        let opener = |_: &str| -> Result<Box<dyn PacketSource>, CaptureError> {
            Ok(Box::new(MemorySource::new(Vec::new(), MemoryEnd::Exhausted)))
        };
        let mut source = opener.open("lo").unwrap();
        assert!(matches!(source.next_packet(), Err(CaptureError::Exhausted)));
    }

    #[test]
    fn missing_capture_file_fails_to_open() {
        let opener = PcapFileOpener::new("/nonexistent/flowguard.pcap");
        assert!(matches!(opener.open("file"), Err(CaptureError::Open(_))));
    }
}
