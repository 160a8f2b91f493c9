//! ## flowguard-core::flow
//! **Bidirectional flow records and the generator contract**
//!
//! A [`FlowGenerator`] consumes packets and, for any given packet, yields
//! zero or one completed flow. A [`FlowRecord`] is immutable once produced;
//! it renders as one feature line for the inference worker and as one CSV
//! row for the sink.

mod generator;

use std::fmt::Write;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use flowguard_capture::Packet;
use serde::Serialize;

use crate::error::FlowError;

pub use generator::BasicFlowGenerator;

pub trait FlowGenerator: Send {
    /// Feeds one packet; returns a flow when one completes.
    fn add_packet(&mut self, packet: &Packet) -> Option<FlowRecord>;

    /// Completes every flow still held. Called once the source is exhausted.
    fn drain(&mut self) -> Vec<FlowRecord> {
        Vec::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowRecord {
    pub flow_id: String,
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
    pub protocol: u8,
    pub timestamp: DateTime<Utc>,
    /// Microseconds between the first and last packet.
    pub duration_us: i64,
    pub fwd_packets: u64,
    pub bwd_packets: u64,
    /// Payload bytes, forward direction.
    pub fwd_bytes: u64,
    /// Payload bytes, backward direction.
    pub bwd_bytes: u64,
    pub pkt_len_min: u64,
    pub pkt_len_max: u64,
    pub pkt_len_mean: f64,
    pub bytes_per_sec: f64,
    pub packets_per_sec: f64,
    pub iat_mean_us: f64,
    pub iat_min_us: i64,
    pub iat_max_us: i64,
    pub fin_count: u32,
    pub syn_count: u32,
    pub rst_count: u32,
    pub psh_count: u32,
    pub ack_count: u32,
    pub urg_count: u32,
}

const CSV_HEADER: &str = "Flow ID,Src IP,Src Port,Dst IP,Dst Port,Protocol,Timestamp,\
Flow Duration,Tot Fwd Pkts,Tot Bwd Pkts,TotLen Fwd Pkts,TotLen Bwd Pkts,\
Pkt Len Min,Pkt Len Max,Pkt Len Mean,Flow Byts/s,Flow Pkts/s,\
Flow IAT Mean,Flow IAT Min,Flow IAT Max,\
FIN Flag Cnt,SYN Flag Cnt,RST Flag Cnt,PSH Flag Cnt,ACK Flag Cnt,URG Flag Cnt";

impl FlowRecord {
    pub fn csv_header() -> &'static str {
        CSV_HEADER
    }

    pub fn total_packets(&self) -> u64 {
        self.fwd_packets + self.bwd_packets
    }

    /// One CSV row, columns in [`FlowRecord::csv_header`] order.
    pub fn csv_row(&self) -> String {
        let mut row = String::with_capacity(256);
        // Writing into a String cannot fail.
        let _ = write!(
            row,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            self.flow_id,
            self.src_ip,
            self.src_port,
            self.dst_ip,
            self.dst_port,
            self.protocol,
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.6f"),
            self.duration_us,
            self.fwd_packets,
            self.bwd_packets,
            self.fwd_bytes,
            self.bwd_bytes,
            self.pkt_len_min,
            self.pkt_len_max,
            self.pkt_len_mean,
            self.bytes_per_sec,
            self.packets_per_sec,
            self.iat_mean_us,
            self.iat_min_us,
            self.iat_max_us,
            self.fin_count,
            self.syn_count,
            self.rst_count,
            self.psh_count,
            self.ack_count,
            self.urg_count,
        );
        row
    }
}

/// Encoding of the feature line written to the worker's stdin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LineFormat {
    #[default]
    Json,
    Csv,
}

impl LineFormat {
    pub fn encode(self, flow: &FlowRecord) -> Result<String, FlowError> {
        match self {
            LineFormat::Json => Ok(serde_json::to_string(flow)?),
            LineFormat::Csv => Ok(flow.csv_row()),
        }
    }
}

impl FromStr for LineFormat {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LineFormat::Json),
            "csv" => Ok(LineFormat::Csv),
            other => Err(FlowError::UnknownFormat(other.to_string())),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    pub(crate) fn sample_flow() -> FlowRecord {
        FlowRecord {
            flow_id: "10.0.0.1-10.0.0.2-40000-80-6".into(),
            src_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            src_port: 40000,
            dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            dst_port: 80,
            protocol: 6,
            timestamp: DateTime::<Utc>::default(),
            duration_us: 1_500,
            fwd_packets: 2,
            bwd_packets: 1,
            fwd_bytes: 100,
            bwd_bytes: 50,
            pkt_len_min: 0,
            pkt_len_max: 100,
            pkt_len_mean: 50.0,
            bytes_per_sec: 100_000.0,
            packets_per_sec: 2_000.0,
            iat_mean_us: 750.0,
            iat_min_us: 500,
            iat_max_us: 1_000,
            fin_count: 1,
            syn_count: 1,
            rst_count: 0,
            psh_count: 0,
            ack_count: 2,
            urg_count: 0,
        }
    }

    #[test]
    fn csv_row_matches_header_width() {
        let row = sample_flow().csv_row();
        assert_eq!(
            row.split(',').count(),
            FlowRecord::csv_header().split(',').count()
        );
        assert!(row.starts_with("10.0.0.1-10.0.0.2-40000-80-6,10.0.0.1,40000,"));
    }

    #[test]
    fn json_line_is_a_single_line() {
        let line = LineFormat::Json.encode(&sample_flow()).unwrap();
        assert!(!line.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["dst_port"], 80);
        assert_eq!(value["flow_id"], "10.0.0.1-10.0.0.2-40000-80-6");
    }

    #[test]
    fn line_format_parses_case_insensitively() {
        assert_eq!("CSV".parse::<LineFormat>().unwrap(), LineFormat::Csv);
        assert_eq!("json".parse::<LineFormat>().unwrap(), LineFormat::Json);
        assert!(matches!(
            "xml".parse::<LineFormat>(),
            Err(FlowError::UnknownFormat(_))
        ));
    }
}
