/// A captured frame, as handed to the flow generator.
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Bytes,
    /// Capture timestamp in microseconds since the Unix epoch.
    pub timestamp_us: i64,
}

impl Packet {
    /// Creates a new Packet from raw data.
    pub fn new(data: Vec<u8>, timestamp_us: i64) -> Self {
        // `Bytes::from` will take ownership of the Vec<u8>
        Packet {
            data: Bytes::from(data),
            timestamp_us,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
