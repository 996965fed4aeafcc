//! NetFlow v5 export datagram decoding
//!
//! A NetFlow v5 datagram is a 24-byte header followed by `count` flow
//! records of 48 bytes each. All integers are big-endian.
//!
//! [`decode`] returns a lazy iterator over the records, so that a consumer
//! can forward the first records of a datagram before the last ones are
//! parsed. Malformed input never produces an error: a datagram with a short
//! header or another version yields no records, and records extending past
//! the end of the datagram are not decoded.

use pnet_macros_support::packet::PacketData;
use pnet_macros_support::types::{u16be, u32be};
use std::net::Ipv4Addr;

/// NetFlow export version handled by this module
pub const NETFLOW_V5_VERSION: u16 = 5;
/// Length of the datagram header
pub const NETFLOW_V5_HEADER_LEN: usize = 24;
/// Length of one flow record
pub const NETFLOW_V5_RECORD_LEN: usize = 48;

#[inline]
fn be_u16(data: &[u8], co: usize) -> u16be {
    let b0 = (data[co] as u16be) << 8;
    let b1 = data[co + 1] as u16be;
    b0 | b1
}

#[inline]
fn be_u32(data: &[u8], co: usize) -> u32be {
    let b0 = (data[co] as u32be) << 24;
    let b1 = (data[co + 1] as u32be) << 16;
    let b2 = (data[co + 2] as u32be) << 8;
    let b3 = data[co + 3] as u32be;
    b0 | b1 | b2 | b3
}

#[derive(PartialEq)]
/// A structure enabling manipulation of a NetFlow v5 header on the wire
pub struct NetflowV5HeaderPacket<'p> {
    packet: PacketData<'p>,
}

impl<'a> NetflowV5HeaderPacket<'a> {
    /// Constructs a new NetflowV5HeaderPacket. If the provided buffer is less than the minimum
    /// required packet size, this will return None.
    #[inline]
    pub fn new(packet: &[u8]) -> Option<NetflowV5HeaderPacket<'_>> {
        if packet.len() >= NetflowV5HeaderPacket::minimum_packet_size() {
            Some(NetflowV5HeaderPacket {
                packet: PacketData::Borrowed(packet),
            })
        } else {
            None
        }
    }
    /// The minimum size (in bytes) a packet of this type can be.
    #[inline]
    pub const fn minimum_packet_size() -> usize {
        NETFLOW_V5_HEADER_LEN
    }
    #[inline]
    pub fn get_version(&self) -> u16be {
        be_u16(&self.packet[..], 0)
    }
    #[inline]
    pub fn get_count(&self) -> u16be {
        be_u16(&self.packet[..], 2)
    }
    #[inline]
    pub fn get_sys_uptime(&self) -> u32be {
        be_u32(&self.packet[..], 4)
    }
    #[inline]
    pub fn get_unix_secs(&self) -> u32be {
        be_u32(&self.packet[..], 8)
    }
    #[inline]
    pub fn get_unix_nsecs(&self) -> u32be {
        be_u32(&self.packet[..], 12)
    }
    #[inline]
    pub fn get_flow_sequence(&self) -> u32be {
        be_u32(&self.packet[..], 16)
    }
    #[inline]
    pub fn get_engine_type(&self) -> u8 {
        self.packet[20]
    }
    #[inline]
    pub fn get_engine_id(&self) -> u8 {
        self.packet[21]
    }
    #[inline]
    pub fn get_sampling_interval(&self) -> u16be {
        be_u16(&self.packet[..], 22)
    }
}

impl<'a> ::pnet_macros_support::packet::Packet for NetflowV5HeaderPacket<'a> {
    #[inline]
    fn packet(&self) -> &[u8] {
        &self.packet[..]
    }
    /// The flow records area, possibly truncated
    #[inline]
    fn payload(&self) -> &[u8] {
        let start = NETFLOW_V5_HEADER_LEN;
        if self.packet.len() <= start {
            return &[];
        }
        &self.packet[start..]
    }
}

#[derive(PartialEq)]
/// A structure enabling manipulation of a NetFlow v5 flow record on the wire
pub struct NetflowV5RecordPacket<'p> {
    packet: PacketData<'p>,
}

impl<'a> NetflowV5RecordPacket<'a> {
    /// Constructs a new NetflowV5RecordPacket. If the provided buffer is less than the minimum
    /// required packet size, this will return None.
    #[inline]
    pub fn new(packet: &[u8]) -> Option<NetflowV5RecordPacket<'_>> {
        if packet.len() >= NetflowV5RecordPacket::minimum_packet_size() {
            Some(NetflowV5RecordPacket {
                packet: PacketData::Borrowed(packet),
            })
        } else {
            None
        }
    }
    #[inline]
    pub const fn minimum_packet_size() -> usize {
        NETFLOW_V5_RECORD_LEN
    }
    #[inline]
    pub fn get_source(&self) -> u32be {
        be_u32(&self.packet[..], 0)
    }
    #[inline]
    pub fn get_destination(&self) -> u32be {
        be_u32(&self.packet[..], 4)
    }
    #[inline]
    pub fn get_next_hop(&self) -> u32be {
        be_u32(&self.packet[..], 8)
    }
    #[inline]
    pub fn get_input(&self) -> u16be {
        be_u16(&self.packet[..], 12)
    }
    #[inline]
    pub fn get_output(&self) -> u16be {
        be_u16(&self.packet[..], 14)
    }
    #[inline]
    pub fn get_packets(&self) -> u32be {
        be_u32(&self.packet[..], 16)
    }
    #[inline]
    pub fn get_octets(&self) -> u32be {
        be_u32(&self.packet[..], 20)
    }
    #[inline]
    pub fn get_first(&self) -> u32be {
        be_u32(&self.packet[..], 24)
    }
    #[inline]
    pub fn get_last(&self) -> u32be {
        be_u32(&self.packet[..], 28)
    }
    #[inline]
    pub fn get_source_port(&self) -> u16be {
        be_u16(&self.packet[..], 32)
    }
    #[inline]
    pub fn get_destination_port(&self) -> u16be {
        be_u16(&self.packet[..], 34)
    }
    #[inline]
    pub fn get_pad1(&self) -> u8 {
        self.packet[36]
    }
    #[inline]
    pub fn get_tcp_flags(&self) -> u8 {
        self.packet[37]
    }
    #[inline]
    pub fn get_protocol(&self) -> u8 {
        self.packet[38]
    }
    #[inline]
    pub fn get_tos(&self) -> u8 {
        self.packet[39]
    }
    #[inline]
    pub fn get_source_as(&self) -> u16be {
        be_u16(&self.packet[..], 40)
    }
    #[inline]
    pub fn get_destination_as(&self) -> u16be {
        be_u16(&self.packet[..], 42)
    }
    #[inline]
    pub fn get_source_mask(&self) -> u8 {
        self.packet[44]
    }
    #[inline]
    pub fn get_destination_mask(&self) -> u8 {
        self.packet[45]
    }
    #[inline]
    pub fn get_pad2(&self) -> u16be {
        be_u16(&self.packet[..], 46)
    }
}

impl<'a> ::pnet_macros_support::packet::Packet for NetflowV5RecordPacket<'a> {
    #[inline]
    fn packet(&self) -> &[u8] {
        &self.packet[..NETFLOW_V5_RECORD_LEN]
    }
    #[inline]
    fn payload(&self) -> &[u8] {
        &[]
    }
}

/// NetFlow v5 datagram header
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlowHeader {
    pub version: u16,
    /// Number of records declared by the exporter
    pub count: u16,
    /// Milliseconds since the exporter booted
    pub sys_uptime: u32,
    pub unix_secs: u32,
    pub unix_nsecs: u32,
    /// Total flows seen by the exporter
    pub flow_sequence: u32,
    pub engine_type: u8,
    pub engine_id: u8,
    pub sampling_interval: u16,
}

impl FlowHeader {
    pub fn from_packet(p: &NetflowV5HeaderPacket) -> Self {
        FlowHeader {
            version: p.get_version(),
            count: p.get_count(),
            sys_uptime: p.get_sys_uptime(),
            unix_secs: p.get_unix_secs(),
            unix_nsecs: p.get_unix_nsecs(),
            flow_sequence: p.get_flow_sequence(),
            engine_type: p.get_engine_type(),
            engine_id: p.get_engine_id(),
            sampling_interval: p.get_sampling_interval(),
        }
    }
}

/// One NetFlow v5 flow record
///
/// Addresses are kept as host-order integers, see [`FlowRecord::source_addr`]
/// and friends for the `Ipv4Addr` view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FlowRecord {
    pub src_addr: u32,
    pub dst_addr: u32,
    pub next_hop: u32,
    /// SNMP index of the input interface
    pub input: u16,
    /// SNMP index of the output interface
    pub output: u16,
    pub packets: u32,
    pub octets: u32,
    /// sys_uptime at the start of the flow
    pub first: u32,
    /// sys_uptime when the last packet of the flow was received
    pub last: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub pad1: u8,
    pub tcp_flags: u8,
    pub protocol: u8,
    pub tos: u8,
    pub src_as: u16,
    pub dst_as: u16,
    pub src_mask: u8,
    pub dst_mask: u8,
    pub pad2: u16,
}

impl FlowRecord {
    pub fn from_packet(p: &NetflowV5RecordPacket) -> Self {
        FlowRecord {
            src_addr: p.get_source(),
            dst_addr: p.get_destination(),
            next_hop: p.get_next_hop(),
            input: p.get_input(),
            output: p.get_output(),
            packets: p.get_packets(),
            octets: p.get_octets(),
            first: p.get_first(),
            last: p.get_last(),
            src_port: p.get_source_port(),
            dst_port: p.get_destination_port(),
            pad1: p.get_pad1(),
            tcp_flags: p.get_tcp_flags(),
            protocol: p.get_protocol(),
            tos: p.get_tos(),
            src_as: p.get_source_as(),
            dst_as: p.get_destination_as(),
            src_mask: p.get_source_mask(),
            dst_mask: p.get_destination_mask(),
            pad2: p.get_pad2(),
        }
    }

    #[inline]
    pub fn source_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.src_addr)
    }

    #[inline]
    pub fn destination_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.dst_addr)
    }

    #[inline]
    pub fn next_hop_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.next_hop)
    }
}

/// Lazy iterator over the flow records of a datagram
///
/// Records are yielded in ascending index order. Iteration stops at the
/// declared record count, or at the first record that does not fit entirely
/// in the datagram.
pub struct FlowRecords<'a> {
    header: Option<FlowHeader>,
    records: &'a [u8],
    index: usize,
}

impl<'a> FlowRecords<'a> {
    fn empty(header: Option<FlowHeader>) -> Self {
        FlowRecords {
            header,
            records: &[],
            index: 0,
        }
    }

    /// The datagram header, if the datagram is a NetFlow v5 datagram
    pub fn header(&self) -> Option<&FlowHeader> {
        self.header.as_ref().filter(|h| h.version == NETFLOW_V5_VERSION)
    }

    /// Number of records declared in the header
    pub fn declared(&self) -> usize {
        self.header().map_or(0, |h| h.count as usize)
    }

    /// Number of declared records that fit entirely in the datagram
    pub fn available(&self) -> usize {
        let complete = self.records.len() / NETFLOW_V5_RECORD_LEN;
        complete.min(self.declared())
    }

    /// Test if the datagram declares more records than it holds
    pub fn truncated(&self) -> bool {
        self.available() < self.declared()
    }
}

impl<'a> Iterator for FlowRecords<'a> {
    type Item = FlowRecord;

    fn next(&mut self) -> Option<FlowRecord> {
        if self.index >= self.declared() {
            return None;
        }
        let start = self.index * NETFLOW_V5_RECORD_LEN;
        let end = start + NETFLOW_V5_RECORD_LEN;
        let slice = self.records.get(start..end)?;
        let packet = NetflowV5RecordPacket::new(slice)?;
        self.index += 1;
        Some(FlowRecord::from_packet(&packet))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.available().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

/// Decode a NetFlow v5 datagram
///
/// Datagrams shorter than a header, or carrying another version, yield no
/// records. See [`FlowRecords`] for truncation handling.
pub fn decode(data: &[u8]) -> FlowRecords<'_> {
    let packet = match NetflowV5HeaderPacket::new(data) {
        Some(packet) => packet,
        None => return FlowRecords::empty(None),
    };
    let header = FlowHeader::from_packet(&packet);
    if header.version != NETFLOW_V5_VERSION {
        return FlowRecords::empty(Some(header));
    }
    FlowRecords {
        header: Some(header),
        records: &data[NETFLOW_V5_HEADER_LEN..],
        index: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnet_macros_support::packet::Packet;

    const HEADER: &[u8] = b"\x00\x05\x00\x02\x00\x00\x10\x00\x5f\x00\x00\x01\x00\x00\x00\x07\
                            \x00\x00\x00\x2a\x01\x02\x40\x0a";

    fn record(src: u32, dst_port: u16, octets: u32) -> Vec<u8> {
        let mut r = vec![0u8; NETFLOW_V5_RECORD_LEN];
        r[0..4].copy_from_slice(&src.to_be_bytes());
        r[4..8].copy_from_slice(&0xc0a8_0101_u32.to_be_bytes());
        r[8..12].copy_from_slice(&0x0a00_00fe_u32.to_be_bytes());
        r[12..14].copy_from_slice(&3_u16.to_be_bytes());
        r[14..16].copy_from_slice(&4_u16.to_be_bytes());
        r[16..20].copy_from_slice(&10_u32.to_be_bytes());
        r[20..24].copy_from_slice(&octets.to_be_bytes());
        r[24..28].copy_from_slice(&100_u32.to_be_bytes());
        r[28..32].copy_from_slice(&200_u32.to_be_bytes());
        r[32..34].copy_from_slice(&43210_u16.to_be_bytes());
        r[34..36].copy_from_slice(&dst_port.to_be_bytes());
        r[37] = 0x1b;
        r[38] = 6;
        r[39] = 0x28;
        r[40..42].copy_from_slice(&64512_u16.to_be_bytes());
        r[42..44].copy_from_slice(&64513_u16.to_be_bytes());
        r[44] = 24;
        r[45] = 16;
        r
    }

    fn datagram(version: u16, count: u16, records: &[Vec<u8>]) -> Vec<u8> {
        let mut d = HEADER.to_vec();
        d[0..2].copy_from_slice(&version.to_be_bytes());
        d[2..4].copy_from_slice(&count.to_be_bytes());
        for r in records {
            d.extend_from_slice(r);
        }
        d
    }

    #[test]
    fn header_fields() {
        let packet = NetflowV5HeaderPacket::new(HEADER).expect("NetflowV5HeaderPacket");
        let h = FlowHeader::from_packet(&packet);
        assert_eq!(h.version, 5);
        assert_eq!(h.count, 2);
        assert_eq!(h.sys_uptime, 4096);
        assert_eq!(h.unix_secs, 0x5f00_0001);
        assert_eq!(h.unix_nsecs, 7);
        assert_eq!(h.flow_sequence, 42);
        assert_eq!(h.engine_type, 1);
        assert_eq!(h.engine_id, 2);
        assert_eq!(h.sampling_interval, 0x400a);
        assert!(packet.payload().is_empty());
    }

    #[test]
    fn record_fields() {
        let data = record(0x0a00_0001, 80, 1500);
        let packet = NetflowV5RecordPacket::new(&data).expect("NetflowV5RecordPacket");
        let r = FlowRecord::from_packet(&packet);
        assert_eq!(r.source_addr(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(r.destination_addr().to_string(), "192.168.1.1");
        assert_eq!(r.next_hop_addr(), Ipv4Addr::new(10, 0, 0, 254));
        assert_eq!((r.input, r.output), (3, 4));
        assert_eq!((r.packets, r.octets), (10, 1500));
        assert_eq!((r.first, r.last), (100, 200));
        assert_eq!((r.src_port, r.dst_port), (43210, 80));
        assert_eq!((r.tcp_flags, r.protocol, r.tos), (0x1b, 6, 0x28));
        assert_eq!((r.src_as, r.dst_as), (64512, 64513));
        assert_eq!((r.src_mask, r.dst_mask), (24, 16));
        assert_eq!((r.pad1, r.pad2), (0, 0));
    }

    #[test]
    fn decode_all_records_in_order() {
        let records: Vec<_> = (0..5).map(|i| record(i, 1000 + i as u16, 1)).collect();
        let data = datagram(5, 5, &records);
        let it = decode(&data);
        assert_eq!(it.declared(), 5);
        assert!(!it.truncated());
        let decoded: Vec<_> = it.collect();
        assert_eq!(decoded.len(), 5);
        for (i, r) in decoded.iter().enumerate() {
            assert_eq!(r.src_addr, i as u32);
            assert_eq!(r.dst_port, 1000 + i as u16);
        }
    }

    #[test]
    fn decode_stops_at_declared_count() {
        let records: Vec<_> = (0..3).map(|i| record(i, 53, 1)).collect();
        let data = datagram(5, 2, &records);
        assert_eq!(decode(&data).count(), 2);
    }

    #[test]
    fn decode_other_version() {
        let records = vec![record(1, 53, 1)];
        let data = datagram(9, 1, &records);
        let it = decode(&data);
        assert!(it.header().is_none());
        assert_eq!(it.count(), 0);
    }

    #[test]
    fn decode_short_header() {
        assert_eq!(decode(&HEADER[..23]).count(), 0);
        assert_eq!(decode(&[]).count(), 0);
    }

    #[test]
    fn decode_truncated_datagram() {
        let records: Vec<_> = (0..3).map(|i| record(i, 53, 1)).collect();
        let mut data = datagram(5, 3, &records);
        // cut the last record in half
        data.truncate(NETFLOW_V5_HEADER_LEN + 2 * NETFLOW_V5_RECORD_LEN + 20);
        let it = decode(&data);
        assert!(it.truncated());
        assert_eq!(it.available(), 2);
        let decoded: Vec<_> = it.collect();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].src_addr, 1);
    }

    #[test]
    fn decode_declared_count_larger_than_datagram() {
        let data = datagram(5, u16::MAX, &[record(7, 53, 1)]);
        let it = decode(&data);
        assert_eq!(it.declared(), u16::MAX as usize);
        assert_eq!(it.size_hint(), (1, Some(1)));
        assert_eq!(it.count(), 1);
    }

    #[test]
    fn dotted_decimal() {
        let r = FlowRecord {
            src_addr: 0xC0A8_0101,
            ..FlowRecord::default()
        };
        assert_eq!(r.source_addr().to_string(), "192.168.1.1");
    }
}
