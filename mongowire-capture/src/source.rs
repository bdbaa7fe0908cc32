//! Stream of TCP payloads sent to the monitored port.

use crate::error::CaptureError;
use crate::packet::{decode_tcp, TcpSegment};
use crate::pcap::{LinkType, PcapReader, PcapRecord};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::net::SocketAddrV4;
use tokio::io::AsyncRead;

/// A TCP payload destined to the monitored server.
#[derive(Debug, Clone)]
pub struct CapturedPayload {
    pub captured_at: DateTime<Utc>,
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub payload: Bytes,
}

/// Frame counters for one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames: u64,
    pub matched: u64,
    pub malformed: u64,
}

/// Filters a pcap stream down to non-empty payloads sent to `port`.
pub struct PayloadSource<R> {
    reader: PcapReader<R>,
    port: u16,
    stats: SourceStats,
}

impl<R: AsyncRead + Unpin> PayloadSource<R> {
    pub async fn open(inner: R, port: u16) -> Result<Self, CaptureError> {
        Ok(Self::new(PcapReader::open(inner).await?, port))
    }

    pub fn new(reader: PcapReader<R>, port: u16) -> Self {
        Self {
            reader,
            port,
            stats: SourceStats::default(),
        }
    }

    pub fn link_type(&self) -> LinkType {
        self.reader.header().link_type
    }

    pub fn stats(&self) -> SourceStats {
        self.stats
    }

    /// Returns the next matching payload, or `None` at end of stream.
    ///
    /// Frames that fail to decode are counted and skipped; only stream-level
    /// failures are returned as errors.
    pub async fn next_payload(&mut self) -> Result<Option<CapturedPayload>, CaptureError> {
        let link_type = self.reader.header().link_type;
        while let Some(record) = self.reader.next_record().await? {
            self.stats.frames += 1;
            let PcapRecord {
                captured_at, data, ..
            } = record;

            match decode_tcp(link_type, &data) {
                Ok(Some(TcpSegment { src, dst, payload }))
                    if dst.port() == self.port && !payload.is_empty() =>
                {
                    self.stats.matched += 1;
                    return Ok(Some(CapturedPayload {
                        captured_at,
                        src,
                        dst,
                        payload,
                    }));
                }
                Ok(_) => {}
                Err(e) => {
                    self.stats.malformed += 1;
                    tracing::debug!("skipping frame {}: {}", self.stats.frames, e);
                }
            }
        }
        Ok(None)
    }
}
