use libnetflow_tools::FlowRecord;
use serde::Serialize;

/// Publish-ready view of a flow record
///
/// Field names are part of the published format, consumers rely on them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FlowMessage {
    #[serde(rename = "SourceIPaddr")]
    pub source_addr: String,
    #[serde(rename = "DestinationIPaddr")]
    pub destination_addr: String,
    #[serde(rename = "ByteCount")]
    pub byte_count: u32,
    #[serde(rename = "PacketCount")]
    pub packet_count: u32,
    #[serde(rename = "SourcePort")]
    pub source_port: u16,
    #[serde(rename = "DestinationPort")]
    pub destination_port: u16,
    #[serde(rename = "TCPflags")]
    pub tcp_flags: u8,
    #[serde(rename = "Layer4Protocol")]
    pub protocol: u8,
    #[serde(rename = "ToS")]
    pub tos: u8,
}

impl From<&FlowRecord> for FlowMessage {
    fn from(r: &FlowRecord) -> Self {
        FlowMessage {
            source_addr: r.source_addr().to_string(),
            destination_addr: r.destination_addr().to_string(),
            byte_count: r.octets,
            packet_count: r.packets,
            source_port: r.src_port,
            destination_port: r.dst_port,
            tcp_flags: r.tcp_flags,
            protocol: r.protocol,
            tos: r.tos,
        }
    }
}

impl FlowMessage {
    /// Serialize to a JSON text message
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn record() -> FlowRecord {
        FlowRecord {
            src_addr: 0x0a00_0001,
            dst_addr: 0xc0a8_0101,
            next_hop: 0x0a00_00fe,
            packets: 3,
            octets: 1500,
            src_port: 51000,
            dst_port: 80,
            tcp_flags: 0x12,
            protocol: 6,
            tos: 0x10,
            src_as: 64512,
            ..FlowRecord::default()
        }
    }

    #[test]
    fn message_from_record() {
        let m = FlowMessage::from(&record());
        assert_eq!(m.source_addr, "10.0.0.1");
        assert_eq!(m.destination_addr, "192.168.1.1");
        assert_eq!(m.byte_count, 1500);
        assert_eq!(m.packet_count, 3);
        assert_eq!(m.destination_port, 80);
    }

    #[test]
    fn message_json_layout() {
        let json = FlowMessage::from(&record()).to_json().expect("json");
        let text = String::from_utf8(json).expect("utf8");
        assert!(text.contains(r#""SourceIPaddr":"10.0.0.1""#));
        assert!(text.contains(r#""DestinationPort":80"#));
        let v: Value = serde_json::from_str(&text).expect("parse");
        let obj = v.as_object().expect("object");
        let keys: Vec<_> = obj.keys().map(|k| k.as_str()).collect();
        let mut expected = vec![
            "SourceIPaddr",
            "DestinationIPaddr",
            "ByteCount",
            "PacketCount",
            "SourcePort",
            "DestinationPort",
            "TCPflags",
            "Layer4Protocol",
            "ToS",
        ];
        let mut keys_sorted = keys.clone();
        keys_sorted.sort_unstable();
        expected.sort_unstable();
        assert_eq!(keys_sorted, expected);
        assert_eq!(obj["Layer4Protocol"], 6);
        assert_eq!(obj["ToS"], 16);
        assert_eq!(obj["TCPflags"], 18);
        // next hop and AS numbers are not published
        assert!(!text.contains("64512"));
    }
}
