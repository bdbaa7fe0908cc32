//! # mongowire-capture
//!
//! Packet source for the wire analyzer.
//!
//! Reads libpcap capture streams (a file, or `tcpdump -w -` on stdin),
//! decodes Ethernet / loopback / cooked / raw IPv4 frames and yields the TCP
//! payloads sent to the monitored port. Stream reassembly is not attempted:
//! every payload is handed on as captured.

pub mod error;
pub mod packet;
pub mod pcap;
pub mod source;

pub use error::CaptureError;
pub use packet::{decode_tcp, encode_ethernet_tcp, TcpSegment};
pub use pcap::{LinkType, PcapHeader, PcapReader, PcapRecord, PcapWriter};
pub use source::{CapturedPayload, PayloadSource, SourceStats};
