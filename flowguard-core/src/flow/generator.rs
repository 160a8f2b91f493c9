use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;

use chrono::{TimeZone, Utc};
use etherparse::{NetHeaders, PacketHeaders, TransportHeader};
use flowguard_capture::Packet;
use tracing::trace;

use super::{FlowGenerator, FlowRecord};

/// Default maximum flow lifetime (120 s).
pub const DEFAULT_FLOW_TIMEOUT_US: i64 = 120_000_000;
/// Default maximum idle gap inside a flow (5 s).
pub const DEFAULT_ACTIVITY_TIMEOUT_US: i64 = 5_000_000;

#[derive(Debug, Clone, Copy, Default)]
struct TcpFlags {
    fin: bool,
    syn: bool,
    rst: bool,
    psh: bool,
    ack: bool,
    urg: bool,
}

#[derive(Debug, Clone, Copy)]
struct PacketInfo {
    src: IpAddr,
    dst: IpAddr,
    src_port: u16,
    dst_port: u16,
    protocol: u8,
    payload_len: u64,
    timestamp_us: i64,
    flags: TcpFlags,
}

impl PacketInfo {
    fn parse(packet: &Packet) -> Option<Self> {
        let headers = PacketHeaders::from_ethernet_slice(&packet.data).ok()?;

        let (src, dst, protocol) = match headers.net? {
            NetHeaders::Ipv4(ipv4, _) => (
                IpAddr::from(ipv4.source),
                IpAddr::from(ipv4.destination),
                ipv4.protocol.0,
            ),
            NetHeaders::Ipv6(ipv6, _) => (
                IpAddr::from(ipv6.source),
                IpAddr::from(ipv6.destination),
                ipv6.next_header.0,
            ),
            #[allow(unreachable_patterns)]
            _ => return None,
        };

        let (src_port, dst_port, flags) = match &headers.transport {
            Some(TransportHeader::Tcp(tcp)) => (
                tcp.source_port,
                tcp.destination_port,
                TcpFlags {
                    fin: tcp.fin,
                    syn: tcp.syn,
                    rst: tcp.rst,
                    psh: tcp.psh,
                    ack: tcp.ack,
                    urg: tcp.urg,
                },
            ),
            Some(TransportHeader::Udp(udp)) => {
                (udp.source_port, udp.destination_port, TcpFlags::default())
            }
            _ => (0, 0, TcpFlags::default()),
        };

        Some(Self {
            src,
            dst,
            src_port,
            dst_port,
            protocol,
            payload_len: headers.payload.slice().len() as u64,
            timestamp_us: packet.timestamp_us,
            flags,
        })
    }
}

/// Direction-agnostic flow key: both endpoints in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FlowKey {
    low: (IpAddr, u16),
    high: (IpAddr, u16),
    protocol: u8,
}

impl FlowKey {
    fn of(info: &PacketInfo) -> Self {
        let a = (info.src, info.src_port);
        let b = (info.dst, info.dst_port);
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            low,
            high,
            protocol: info.protocol,
        }
    }
}

#[derive(Debug)]
struct FlowState {
    src: IpAddr,
    src_port: u16,
    dst: IpAddr,
    dst_port: u16,
    protocol: u8,
    start_us: i64,
    last_us: i64,
    fwd_packets: u64,
    bwd_packets: u64,
    fwd_bytes: u64,
    bwd_bytes: u64,
    len_min: u64,
    len_max: u64,
    iat_sum: i64,
    iat_min: i64,
    iat_max: i64,
    flag_counts: [u32; 6],
}

impl FlowState {
    fn open(info: &PacketInfo) -> Self {
        let mut state = Self {
            src: info.src,
            src_port: info.src_port,
            dst: info.dst,
            dst_port: info.dst_port,
            protocol: info.protocol,
            start_us: info.timestamp_us,
            last_us: info.timestamp_us,
            fwd_packets: 0,
            bwd_packets: 0,
            fwd_bytes: 0,
            bwd_bytes: 0,
            len_min: u64::MAX,
            len_max: 0,
            iat_sum: 0,
            iat_min: i64::MAX,
            iat_max: 0,
            flag_counts: [0; 6],
        };
        state.count(info);
        state
    }

    fn is_forward(&self, info: &PacketInfo) -> bool {
        info.src == self.src && info.src_port == self.src_port
    }

    fn expired(&self, now_us: i64, flow_timeout_us: i64, activity_timeout_us: i64) -> bool {
        now_us - self.start_us > flow_timeout_us || now_us - self.last_us > activity_timeout_us
    }

    fn update(&mut self, info: &PacketInfo) {
        let iat = (info.timestamp_us - self.last_us).max(0);
        self.iat_sum += iat;
        self.iat_min = self.iat_min.min(iat);
        self.iat_max = self.iat_max.max(iat);
        self.last_us = self.last_us.max(info.timestamp_us);
        self.count(info);
    }

    fn count(&mut self, info: &PacketInfo) {
        if self.is_forward(info) {
            self.fwd_packets += 1;
            self.fwd_bytes += info.payload_len;
        } else {
            self.bwd_packets += 1;
            self.bwd_bytes += info.payload_len;
        }
        self.len_min = self.len_min.min(info.payload_len);
        self.len_max = self.len_max.max(info.payload_len);

        let f = info.flags;
        for (slot, set) in [f.fin, f.syn, f.rst, f.psh, f.ack, f.urg].into_iter().enumerate() {
            self.flag_counts[slot] += set as u32;
        }
    }

    fn finish(&self) -> FlowRecord {
        let packets = self.fwd_packets + self.bwd_packets;
        let bytes = self.fwd_bytes + self.bwd_bytes;
        let duration_us = self.last_us - self.start_us;
        let seconds = duration_us as f64 / 1_000_000.0;
        let rate = |n: u64| if seconds > 0.0 { n as f64 / seconds } else { 0.0 };
        let gaps = packets.saturating_sub(1);

        FlowRecord {
            flow_id: format!(
                "{}-{}-{}-{}-{}",
                self.src, self.dst, self.src_port, self.dst_port, self.protocol
            ),
            src_ip: self.src,
            src_port: self.src_port,
            dst_ip: self.dst,
            dst_port: self.dst_port,
            protocol: self.protocol,
            timestamp: Utc
                .timestamp_micros(self.start_us)
                .single()
                .unwrap_or_default(),
            duration_us,
            fwd_packets: self.fwd_packets,
            bwd_packets: self.bwd_packets,
            fwd_bytes: self.fwd_bytes,
            bwd_bytes: self.bwd_bytes,
            pkt_len_min: if packets == 0 { 0 } else { self.len_min },
            pkt_len_max: self.len_max,
            pkt_len_mean: if packets == 0 {
                0.0
            } else {
                bytes as f64 / packets as f64
            },
            bytes_per_sec: rate(bytes),
            packets_per_sec: rate(packets),
            iat_mean_us: if gaps == 0 {
                0.0
            } else {
                self.iat_sum as f64 / gaps as f64
            },
            iat_min_us: if gaps == 0 { 0 } else { self.iat_min },
            iat_max_us: self.iat_max,
            fin_count: self.flag_counts[0],
            syn_count: self.flag_counts[1],
            rst_count: self.flag_counts[2],
            psh_count: self.flag_counts[3],
            ack_count: self.flag_counts[4],
            urg_count: self.flag_counts[5],
        }
    }
}

/// Bidirectional flow aggregation over Ethernet frames.
///
/// The first packet of a flow fixes its forward direction. A flow completes
/// on TCP FIN/RST, when it outlives the flow timeout, or when it stays idle
/// longer than the activity timeout. Flows expired by the periodic sweep are
/// queued and handed out one per call.
pub struct BasicFlowGenerator {
    flow_timeout_us: i64,
    activity_timeout_us: i64,
    flows: HashMap<FlowKey, FlowState>,
    expired: VecDeque<FlowRecord>,
    last_sweep_us: i64,
}

impl BasicFlowGenerator {
    pub fn new(flow_timeout_us: i64, activity_timeout_us: i64) -> Self {
        Self {
            flow_timeout_us,
            activity_timeout_us,
            flows: HashMap::new(),
            expired: VecDeque::new(),
            last_sweep_us: i64::MIN,
        }
    }

    pub fn active_flows(&self) -> usize {
        self.flows.len()
    }

    fn sweep(&mut self, now_us: i64) {
        if self.last_sweep_us != i64::MIN && now_us - self.last_sweep_us < self.activity_timeout_us {
            return;
        }
        self.last_sweep_us = now_us;

        let (flow_timeout, activity_timeout) = (self.flow_timeout_us, self.activity_timeout_us);
        let stale: Vec<FlowKey> = self
            .flows
            .iter()
            .filter(|(_, state)| state.expired(now_us, flow_timeout, activity_timeout))
            .map(|(key, _)| *key)
            .collect();

        for key in stale {
            if let Some(state) = self.flows.remove(&key) {
                self.expired.push_back(state.finish());
            }
        }
    }
}

impl Default for BasicFlowGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_FLOW_TIMEOUT_US, DEFAULT_ACTIVITY_TIMEOUT_US)
    }
}

impl FlowGenerator for BasicFlowGenerator {
    fn add_packet(&mut self, packet: &Packet) -> Option<FlowRecord> {
        let Some(info) = PacketInfo::parse(packet) else {
            trace!(len = packet.len(), "skipping non-IP frame");
            return self.expired.pop_front();
        };
        let key = FlowKey::of(&info);

        let mut completed = None;
        let timed_out = self.flows.get(&key).is_some_and(|state| {
            state.expired(info.timestamp_us, self.flow_timeout_us, self.activity_timeout_us)
        });
        if timed_out {
            completed = self.flows.remove(&key).map(|state| state.finish());
        }

        match self.flows.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().update(&info);
                if info.flags.fin || info.flags.rst {
                    completed = Some(entry.remove().finish());
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(FlowState::open(&info));
            }
        }

        self.sweep(info.timestamp_us);
        match completed {
            Some(flow) => Some(flow),
            None => self.expired.pop_front(),
        }
    }

    fn drain(&mut self) -> Vec<FlowRecord> {
        let mut flows: Vec<FlowRecord> = self.expired.drain(..).collect();
        flows.extend(self.flows.drain().map(|(_, state)| state.finish()));
        flows
    }
}
