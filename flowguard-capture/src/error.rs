use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Device '{0}' not found")]
    DeviceNotFound(String),

    #[error("Failed to open capture source: {0}")]
    Open(String),

    /// The source has no more packets (end of a capture file or closed handle).
    #[error("Capture source exhausted")]
    Exhausted,

    #[error("Error capturing packet: {0}")]
    Read(String),

    #[error("pcap error: {0}")]
    Pcap(#[from] pcap::Error),
}
