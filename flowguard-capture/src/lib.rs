//! flowguard‑capture
//!
//! Provides a unified capture interface for Flowguard: live capture through
//! pcap, offline capture files, and in-memory sources for replay and tests.
//! The capture loop is cooperative; it only observes cancellation between
//! packets and on read timeouts.

pub mod cancel;
pub mod capture;
pub mod error;
pub mod packet;
pub mod source;

pub use cancel::CancelToken;
pub use capture::{run_capture_loop, CaptureExit};
pub use error::CaptureError;
pub use packet::Packet;
pub use source::{
    list_interfaces, InterfaceInfo, MemoryEnd, MemorySource, PacketSource, PcapFileOpener,
    PcapOpener, SourceOpener,
};
