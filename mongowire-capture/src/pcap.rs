//! Classic libpcap stream format.
//!
//! ```text
//! global header (24 bytes)
//! +-------+-------+-------+----------+----------+---------+----------+
//! | magic | major | minor | thiszone | sigfigs  | snaplen | linktype |
//! |   4   |   2   |   2   |    4     |    4     |    4    |    4     |
//! +-------+-------+-------+----------+----------+---------+----------+
//!
//! record header (16 bytes), followed by incl_len bytes of frame
//! +--------+-------------+----------+----------+
//! | ts_sec | ts_frac     | incl_len | orig_len |
//! +--------+-------------+----------+----------+
//! ```
//!
//! The magic number fixes both byte order and timestamp resolution.

use crate::error::CaptureError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const GLOBAL_HEADER_SIZE: usize = 24;
pub const RECORD_HEADER_SIZE: usize = 16;

/// Largest frame accepted from a capture (16 MiB).
pub const MAX_RECORD_SIZE: u32 = 16 * 1024 * 1024;

const MAGIC_MICROS: u32 = 0xa1b2_c3d4;
const MAGIC_NANOS: u32 = 0xa1b2_3c4d;

/// Link-layer header types understood by the frame decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    /// BSD loopback: 4-byte address family in host byte order.
    Null,
    Ethernet,
    /// Bare IP packet, no link header.
    Raw,
    /// Linux "cooked" capture (`-i any`).
    LinuxSll,
}

impl LinkType {
    pub fn code(&self) -> u32 {
        match self {
            LinkType::Null => 0,
            LinkType::Ethernet => 1,
            LinkType::Raw => 101,
            LinkType::LinuxSll => 113,
        }
    }
}

impl TryFrom<u32> for LinkType {
    type Error = CaptureError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LinkType::Null),
            1 => Ok(LinkType::Ethernet),
            // 12 is DLT_RAW on some BSDs, 228 is LINKTYPE_IPV4
            12 | 101 | 228 => Ok(LinkType::Raw),
            113 => Ok(LinkType::LinuxSll),
            other => Err(CaptureError::UnsupportedLinkType(other)),
        }
    }
}

/// Parsed global header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcapHeader {
    pub version_major: u16,
    pub version_minor: u16,
    pub snaplen: u32,
    pub link_type: LinkType,
    /// Fractional timestamps are nanoseconds rather than microseconds.
    pub nanos: bool,
    pub big_endian: bool,
}

impl PcapHeader {
    pub fn decode(buf: &[u8; GLOBAL_HEADER_SIZE]) -> Result<Self, CaptureError> {
        let le_magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let (big_endian, nanos) = match le_magic {
            MAGIC_MICROS => (false, false),
            MAGIC_NANOS => (false, true),
            m if m.swap_bytes() == MAGIC_MICROS => (true, false),
            m if m.swap_bytes() == MAGIC_NANOS => (true, true),
            other => return Err(CaptureError::InvalidMagic(other)),
        };

        let mut rest = &buf[4..];
        let field = Fields { big_endian };
        let version_major = field.u16(&mut rest);
        let version_minor = field.u16(&mut rest);
        let _thiszone = field.u32(&mut rest);
        let _sigfigs = field.u32(&mut rest);
        let snaplen = field.u32(&mut rest);
        let link_type = LinkType::try_from(field.u32(&mut rest))?;

        Ok(Self {
            version_major,
            version_minor,
            snaplen,
            link_type,
            nanos,
            big_endian,
        })
    }
}

struct Fields {
    big_endian: bool,
}

impl Fields {
    fn u16(&self, buf: &mut &[u8]) -> u16 {
        if self.big_endian {
            buf.get_u16()
        } else {
            buf.get_u16_le()
        }
    }

    fn u32(&self, buf: &mut &[u8]) -> u32 {
        if self.big_endian {
            buf.get_u32()
        } else {
            buf.get_u32_le()
        }
    }
}

/// One captured frame.
#[derive(Debug, Clone)]
pub struct PcapRecord {
    pub captured_at: DateTime<Utc>,
    /// Length on the wire; larger than `data` when the snaplen cut it.
    pub orig_len: u32,
    pub data: Bytes,
}

impl PcapRecord {
    pub fn is_truncated(&self) -> bool {
        (self.data.len() as u64) < self.orig_len as u64
    }
}

/// Streaming reader over a pcap file or pipe.
pub struct PcapReader<R> {
    inner: R,
    header: PcapHeader,
}

impl<R: AsyncRead + Unpin> PcapReader<R> {
    /// Reads the global header and prepares to stream records.
    pub async fn open(mut inner: R) -> Result<Self, CaptureError> {
        let mut buf = [0u8; GLOBAL_HEADER_SIZE];
        if read_full(&mut inner, &mut buf).await? < GLOBAL_HEADER_SIZE {
            return Err(CaptureError::UnexpectedEof("global header"));
        }
        let header = PcapHeader::decode(&buf)?;
        tracing::debug!(
            "pcap stream v{}.{} linktype={:?} snaplen={}",
            header.version_major,
            header.version_minor,
            header.link_type,
            header.snaplen
        );
        Ok(Self { inner, header })
    }

    pub fn header(&self) -> &PcapHeader {
        &self.header
    }

    /// Returns the next record, or `None` at a clean end of stream.
    pub async fn next_record(&mut self) -> Result<Option<PcapRecord>, CaptureError> {
        let mut hdr = [0u8; RECORD_HEADER_SIZE];
        match read_full(&mut self.inner, &mut hdr).await? {
            0 => return Ok(None),
            RECORD_HEADER_SIZE => {}
            _ => return Err(CaptureError::UnexpectedEof("record header")),
        }

        let mut rest = &hdr[..];
        let field = Fields {
            big_endian: self.header.big_endian,
        };
        let ts_sec = field.u32(&mut rest);
        let ts_frac = field.u32(&mut rest);
        let incl_len = field.u32(&mut rest);
        let orig_len = field.u32(&mut rest);

        if incl_len > MAX_RECORD_SIZE {
            return Err(CaptureError::RecordTooLarge {
                size: incl_len,
                max: MAX_RECORD_SIZE,
            });
        }

        let mut data = BytesMut::zeroed(incl_len as usize);
        if read_full(&mut self.inner, &mut data).await? < incl_len as usize {
            return Err(CaptureError::UnexpectedEof("record body"));
        }

        let nanos = if self.header.nanos {
            ts_frac
        } else {
            ts_frac.saturating_mul(1000)
        };
        let captured_at = DateTime::<Utc>::from_timestamp(ts_sec as i64, nanos).unwrap_or_default();

        Ok(Some(PcapRecord {
            captured_at,
            orig_len,
            data: data.freeze(),
        }))
    }
}

/// Fills `buf` unless the stream ends first; returns the bytes read.
async fn read_full<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<usize, CaptureError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Builds little-endian, microsecond pcap streams.
#[derive(Debug)]
pub struct PcapWriter {
    buf: BytesMut,
}

impl PcapWriter {
    pub fn new(link_type: LinkType) -> Self {
        let mut buf = BytesMut::with_capacity(4096);
        buf.put_u32_le(MAGIC_MICROS);
        buf.put_u16_le(2);
        buf.put_u16_le(4);
        buf.put_i32_le(0);
        buf.put_u32_le(0);
        buf.put_u32_le(65535);
        buf.put_u32_le(link_type.code());
        Self { buf }
    }

    pub fn push(&mut self, captured_at: DateTime<Utc>, frame: &[u8]) {
        self.buf.put_u32_le(captured_at.timestamp() as u32);
        self.buf.put_u32_le(captured_at.timestamp_subsec_micros());
        self.buf.put_u32_le(frame.len() as u32);
        self.buf.put_u32_le(frame.len() as u32);
        self.buf.put_slice(frame);
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}
