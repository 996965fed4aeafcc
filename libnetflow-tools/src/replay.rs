use crate::error::Error;
use pcap_parser::data::{get_packetdata, PacketData};
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{Block, Linktype, PcapBlockOwned, PcapError};
use pnet_packet::ethernet::{EtherTypes, EthernetPacket};
use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::udp::UdpPacket;
use pnet_packet::Packet as PnetPacket;
use std::cmp::min;
use std::io::Read;
use tracing::{debug, trace, warn};

const ETHERTYPE_IPV4: u16 = 0x0800;
const DEFAULT_READER_CAPACITY: usize = 128 * 1024;

/// Replay of UDP datagrams stored in a pcap/pcap-ng capture
///
/// `CaptureReplay` iterates over the packets of a capture, and returns the
/// payload of each IPv4 UDP datagram. If a port is given, only datagrams sent
/// to this port are returned. Non-first IP fragments are ignored.
pub struct CaptureReplay {
    reader: Box<dyn PcapReaderIterator + Send>,
    /// Link types of the interfaces of the current section
    interfaces: Vec<Linktype>,
    port: Option<u16>,
    block_index: usize,
    last_incomplete_index: usize,
}

impl CaptureReplay {
    pub fn new<R: Read + Send + 'static>(input: R, port: Option<u16>) -> Result<Self, Error> {
        let reader = pcap_parser::create_reader(DEFAULT_READER_CAPACITY, input)
            .map_err(|e| Error::Pcap(format!("{e:?}")))?;
        Ok(CaptureReplay {
            reader,
            interfaces: Vec::new(),
            port,
            block_index: 0,
            last_incomplete_index: usize::MAX,
        })
    }

    /// Copy the next UDP payload into `buf`, and return its length
    ///
    /// Payloads larger than `buf` are truncated. Returns `None` at the end of
    /// the capture.
    pub fn next_datagram(&mut self, buf: &mut [u8]) -> Result<Option<usize>, Error> {
        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    self.block_index += 1;
                    let copied = match block {
                        PcapBlockOwned::LegacyHeader(ref hdr) => {
                            trace!("Legacy pcap,  link type: {}", hdr.network);
                            self.interfaces = vec![hdr.network];
                            None
                        }
                        PcapBlockOwned::Legacy(ref b) => {
                            let blen = b.caplen as usize;
                            self.interfaces.first().and_then(|&link_type| {
                                udp_payload(b.data, link_type, blen, self.port, buf)
                            })
                        }
                        PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                            debug!("pcap-ng: new section");
                            self.interfaces.clear();
                            None
                        }
                        PcapBlockOwned::NG(Block::InterfaceDescription(ref idb)) => {
                            self.interfaces.push(idb.linktype);
                            None
                        }
                        PcapBlockOwned::NG(Block::EnhancedPacket(ref epb)) => {
                            let blen = epb.caplen as usize;
                            self.interfaces
                                .get(epb.if_id as usize)
                                .and_then(|&link_type| {
                                    udp_payload(epb.data, link_type, blen, self.port, buf)
                                })
                        }
                        PcapBlockOwned::NG(Block::SimplePacket(ref spb)) => {
                            let blen = (spb.block_len1 as usize).saturating_sub(16);
                            self.interfaces.first().and_then(|&link_type| {
                                udp_payload(spb.data, link_type, blen, self.port, buf)
                            })
                        }
                        _ => None,
                    };
                    self.reader.consume(offset);
                    if copied.is_some() {
                        return Ok(copied);
                    }
                }
                Err(PcapError::Eof) => return Ok(None),
                Err(PcapError::Incomplete(_)) => {
                    if self.last_incomplete_index == self.block_index
                        && self.reader.reader_exhausted()
                    {
                        warn!(
                            "Could not read complete data block (block_index={})",
                            self.block_index
                        );
                        warn!("Hint: the input file may be truncated.");
                        return Ok(None);
                    }
                    self.last_incomplete_index = self.block_index;
                    trace!("need refill");
                    self.reader
                        .refill()
                        .map_err(|e| Error::Pcap(format!("{e:?}")))?;
                }
                Err(e) => return Err(Error::Pcap(format!("{e:?}"))),
            }
        }
    }
}

/// Extract the UDP payload of a captured packet into `buf`
fn udp_payload(
    data: &[u8],
    link_type: Linktype,
    caplen: usize,
    port: Option<u16>,
    buf: &mut [u8],
) -> Option<usize> {
    // resize slice to remove padding
    let caplen = min(caplen, data.len());
    let ipv4 = match get_packetdata(data, link_type, caplen)? {
        PacketData::L2(data) => {
            let eth = EthernetPacket::new(data)?;
            if eth.get_ethertype() != EtherTypes::Ipv4 {
                return None;
            }
            &data[EthernetPacket::minimum_packet_size()..]
        }
        PacketData::L3(ETHERTYPE_IPV4, data) => data,
        PacketData::L4(17, data) => return copy_udp(data, port, buf),
        _ => return None,
    };
    let ip = Ipv4Packet::new(ipv4)?;
    if ip.get_next_level_protocol() != IpNextHeaderProtocols::Udp || ip.get_fragment_offset() != 0
    {
        return None;
    }
    copy_udp(ip.payload(), port, buf)
}

fn copy_udp(data: &[u8], port: Option<u16>, buf: &mut [u8]) -> Option<usize> {
    let udp = UdpPacket::new(data)?;
    if let Some(port) = port {
        if udp.get_destination() != port {
            return None;
        }
    }
    let payload = udp.payload();
    let len = min(payload.len(), buf.len());
    buf[..len].copy_from_slice(&payload[..len]);
    Some(len)
}
