//! Metadata block parsing.
//!
//! The metadata section sits between the `fLaC` marker and the first frame:
//! a sequence of blocks, each a one-byte header (last-block flag plus type)
//! and a 24-bit big-endian payload length. STREAMINFO and SEEKTABLE feed the
//! decoder directly; every block is also handed to an optional caller sink as
//! a [`MetadataBlock`] carrying both the typed view and the raw payload
//! bytes. Views borrow from a transient buffer and are only valid for the
//! duration of the callback.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use rivulet_core::{BitCache, ByteSource};
use tracing::{debug, warn};

use crate::{FlacError, Result, SeekPoint, StreamInfo};

/// STREAMINFO payload length in bytes.
pub const STREAM_INFO_LEN: u32 = 34;
/// Length of one seek table entry in bytes.
pub const SEEK_POINT_LEN: u32 = 18;
/// Seek point sample index marking a placeholder entry.
pub const SEEK_POINT_PLACEHOLDER: u64 = u64::MAX;

/// Metadata block type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Mandatory stream parameters.
    StreamInfo,
    /// Reserved space.
    Padding,
    /// Application-specific data tagged with a registered ID.
    Application,
    /// Seek table.
    SeekTable,
    /// Vorbis comment (tags).
    VorbisComment,
    /// CD cuesheet.
    Cuesheet,
    /// Embedded picture.
    Picture,
    /// Reserved or unknown block type.
    Reserved(u8),
}

impl From<u8> for BlockKind {
    fn from(code: u8) -> Self {
        match code {
            0 => BlockKind::StreamInfo,
            1 => BlockKind::Padding,
            2 => BlockKind::Application,
            3 => BlockKind::SeekTable,
            4 => BlockKind::VorbisComment,
            5 => BlockKind::Cuesheet,
            6 => BlockKind::Picture,
            other => BlockKind::Reserved(other),
        }
    }
}

/// One metadata block as seen by the metadata sink.
#[derive(Debug)]
pub struct MetadataBlock<'a> {
    /// Block type.
    pub kind: BlockKind,
    /// Whether this is the final block before the first frame.
    pub is_last: bool,
    /// Raw payload bytes, exactly as stored.
    pub raw: &'a [u8],
    /// Typed view of the payload.
    pub payload: MetadataPayload<'a>,
}

/// Typed view of a metadata block payload.
#[derive(Debug)]
pub enum MetadataPayload<'a> {
    /// Parsed STREAMINFO.
    StreamInfo(StreamInfo),
    /// Padding; only the length is meaningful.
    Padding {
        /// Padding length in bytes.
        length: u32,
    },
    /// Application block.
    Application {
        /// Registered application ID.
        id: [u8; 4],
        /// Application payload.
        data: &'a [u8],
    },
    /// Seek table with placeholder entries already filtered out.
    SeekTable(&'a [SeekPoint]),
    /// Vorbis comment block.
    VorbisComment(VorbisCommentView<'a>),
    /// Cuesheet block.
    Cuesheet(CuesheetView<'a>),
    /// Picture block.
    Picture(PictureView<'a>),
    /// Reserved type, or a known type whose payload failed to parse.
    Unknown(&'a [u8]),
}

/// Borrowed view of a VORBIS_COMMENT payload.
#[derive(Debug, Clone, Copy)]
pub struct VorbisCommentView<'a> {
    vendor: &'a [u8],
    comments: &'a [u8],
    count: u32,
}

impl<'a> VorbisCommentView<'a> {
    fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }
        let vendor_len = LittleEndian::read_u32(data) as usize;
        let rest = data.get(4..)?;
        let vendor = rest.get(..vendor_len)?;
        let rest = rest.get(vendor_len..)?;
        if rest.len() < 4 {
            return None;
        }
        let count = LittleEndian::read_u32(rest);
        Some(VorbisCommentView {
            vendor,
            comments: &rest[4..],
            count,
        })
    }

    /// Vendor string bytes (nominally UTF-8).
    pub fn vendor(&self) -> &'a [u8] {
        self.vendor
    }

    /// Number of comment entries.
    pub fn len(&self) -> u32 {
        self.count
    }

    /// Whether the block has no comment entries.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Iterate over raw `NAME=value` entries. Iteration stops early if the
    /// payload is truncated.
    pub fn iter(&self) -> VorbisCommentIter<'a> {
        VorbisCommentIter {
            data: self.comments,
            remaining: self.count,
        }
    }
}

/// Iterator over Vorbis comment entries.
#[derive(Debug, Clone)]
pub struct VorbisCommentIter<'a> {
    data: &'a [u8],
    remaining: u32,
}

impl<'a> Iterator for VorbisCommentIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.remaining == 0 || self.data.len() < 4 {
            return None;
        }
        let len = LittleEndian::read_u32(self.data) as usize;
        let entry = self.data.get(4..4 + len)?;
        self.data = &self.data[4 + len..];
        self.remaining -= 1;
        Some(entry)
    }
}

/// Borrowed view of a CUESHEET payload.
#[derive(Debug, Clone, Copy)]
pub struct CuesheetView<'a> {
    /// Media catalog number, NUL padded.
    pub catalog: &'a [u8],
    /// Lead-in length in samples.
    pub lead_in_samples: u64,
    /// Whether the cuesheet describes a CD-DA disc.
    pub is_cd: bool,
    track_count: u8,
    tracks: &'a [u8],
}

/// One cuesheet track.
#[derive(Debug, Clone, Copy)]
pub struct CuesheetTrack<'a> {
    /// Track offset in samples from the start of the stream.
    pub offset: u64,
    /// Track number.
    pub number: u8,
    /// ISRC code, NUL padded.
    pub isrc: &'a [u8],
    /// Whether the track holds audio (as opposed to data).
    pub is_audio: bool,
    /// Whether the track was recorded with pre-emphasis.
    pub pre_emphasis: bool,
    index_count: u8,
    indices: &'a [u8],
}

/// One cuesheet track index point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CuesheetIndex {
    /// Index offset in samples, relative to the track offset.
    pub offset: u64,
    /// Index point number.
    pub number: u8,
}

const CUESHEET_HEADER_LEN: usize = 128 + 8 + 1 + 258 + 1;
const CUESHEET_TRACK_LEN: usize = 8 + 1 + 12 + 1 + 13 + 1;
const CUESHEET_INDEX_LEN: usize = 8 + 1 + 3;

impl<'a> CuesheetView<'a> {
    fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < CUESHEET_HEADER_LEN {
            return None;
        }
        Some(CuesheetView {
            catalog: &data[..128],
            lead_in_samples: BigEndian::read_u64(&data[128..]),
            is_cd: data[136] & 0x80 != 0,
            track_count: data[CUESHEET_HEADER_LEN - 1],
            tracks: &data[CUESHEET_HEADER_LEN..],
        })
    }

    /// Number of tracks, including the lead-out track.
    pub fn track_count(&self) -> u8 {
        self.track_count
    }

    /// Iterate over tracks. Iteration stops early if the payload is
    /// truncated.
    pub fn tracks(&self) -> CuesheetTrackIter<'a> {
        CuesheetTrackIter {
            data: self.tracks,
            remaining: self.track_count,
        }
    }
}

/// Iterator over cuesheet tracks.
#[derive(Debug, Clone)]
pub struct CuesheetTrackIter<'a> {
    data: &'a [u8],
    remaining: u8,
}

impl<'a> Iterator for CuesheetTrackIter<'a> {
    type Item = CuesheetTrack<'a>;

    fn next(&mut self) -> Option<CuesheetTrack<'a>> {
        if self.remaining == 0 || self.data.len() < CUESHEET_TRACK_LEN {
            return None;
        }
        let index_count = self.data[CUESHEET_TRACK_LEN - 1];
        let index_bytes = index_count as usize * CUESHEET_INDEX_LEN;
        let indices = self.data.get(CUESHEET_TRACK_LEN..CUESHEET_TRACK_LEN + index_bytes)?;
        let track = CuesheetTrack {
            offset: BigEndian::read_u64(self.data),
            number: self.data[8],
            isrc: &self.data[9..21],
            is_audio: self.data[21] & 0x80 == 0,
            pre_emphasis: self.data[21] & 0x40 != 0,
            index_count,
            indices,
        };
        self.data = &self.data[CUESHEET_TRACK_LEN + index_bytes..];
        self.remaining -= 1;
        Some(track)
    }
}

impl<'a> CuesheetTrack<'a> {
    /// Number of index points in this track.
    pub fn index_count(&self) -> u8 {
        self.index_count
    }

    /// Iterate over the track's index points.
    pub fn indices(&self) -> impl Iterator<Item = CuesheetIndex> + 'a {
        self.indices.chunks_exact(CUESHEET_INDEX_LEN).map(|chunk| CuesheetIndex {
            offset: BigEndian::read_u64(chunk),
            number: chunk[8],
        })
    }
}

/// Borrowed view of a PICTURE payload.
#[derive(Debug, Clone, Copy)]
pub struct PictureView<'a> {
    /// Picture type code (3 = front cover).
    pub picture_type: u32,
    /// MIME type bytes.
    pub mime: &'a [u8],
    /// Description bytes (nominally UTF-8).
    pub description: &'a [u8],
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Color depth in bits per pixel.
    pub depth: u32,
    /// Number of palette colors (0 for non-indexed pictures).
    pub colors: u32,
    /// Encoded picture data.
    pub data: &'a [u8],
}

impl<'a> PictureView<'a> {
    fn parse(data: &'a [u8]) -> Option<Self> {
        let picture_type = BigEndian::read_u32(data.get(..4)?);
        let mime_len = BigEndian::read_u32(data.get(4..8)?) as usize;
        let mime = data.get(8..8 + mime_len)?;
        let mut at = 8 + mime_len;
        let desc_len = BigEndian::read_u32(data.get(at..at + 4)?) as usize;
        let description = data.get(at + 4..at + 4 + desc_len)?;
        at += 4 + desc_len;
        let fields = data.get(at..at + 20)?;
        let data_len = BigEndian::read_u32(&fields[16..]) as usize;
        let picture = data.get(at + 20..at + 20 + data_len)?;
        Some(PictureView {
            picture_type,
            mime,
            description,
            width: BigEndian::read_u32(fields),
            height: BigEndian::read_u32(&fields[4..]),
            depth: BigEndian::read_u32(&fields[8..]),
            colors: BigEndian::read_u32(&fields[12..]),
            data: picture,
        })
    }
}

/// Parse a 34-byte STREAMINFO payload.
pub fn parse_stream_info(data: &[u8]) -> Result<StreamInfo> {
    if data.len() < STREAM_INFO_LEN as usize {
        return Err(FlacError::InvalidMetadata("STREAMINFO too short"));
    }
    let sample_rate = (data[10] as u32) << 12 | (data[11] as u32) << 4 | (data[12] >> 4) as u32;
    let channels = ((data[12] >> 1) & 0x07) + 1;
    let bits_per_sample = ((data[12] & 0x01) << 4 | data[13] >> 4) + 1;
    let total_pcm_frames =
        ((data[13] & 0x0F) as u64) << 32 | BigEndian::read_u32(&data[14..]) as u64;
    if sample_rate == 0 {
        return Err(FlacError::InvalidMetadata("zero sample rate"));
    }
    if bits_per_sample < 4 {
        return Err(FlacError::InvalidMetadata("bits per sample below 4"));
    }
    let mut md5 = [0u8; 16];
    md5.copy_from_slice(&data[18..34]);
    Ok(StreamInfo {
        min_block_size: BigEndian::read_u16(data),
        max_block_size: BigEndian::read_u16(&data[2..]),
        min_frame_size: BigEndian::read_u24(&data[4..]),
        max_frame_size: BigEndian::read_u24(&data[7..]),
        sample_rate,
        channels,
        bits_per_sample,
        total_pcm_frames,
        md5,
    })
}

/// Parse a SEEKTABLE payload, dropping placeholder entries.
pub fn parse_seek_table(data: &[u8]) -> Vec<SeekPoint> {
    data.chunks_exact(SEEK_POINT_LEN as usize)
        .filter_map(|chunk| {
            let first_pcm_frame = BigEndian::read_u64(chunk);
            if first_pcm_frame == SEEK_POINT_PLACEHOLDER {
                return None;
            }
            Some(SeekPoint {
                first_pcm_frame,
                frame_offset: BigEndian::read_u64(&chunk[8..]),
                pcm_frame_count: BigEndian::read_u16(&chunk[16..]),
            })
        })
        .collect()
}

/// STREAMINFO and seek table gathered from the metadata section.
pub(crate) struct ParsedMetadata {
    pub stream_info: Option<StreamInfo>,
    pub seek_points: Vec<SeekPoint>,
}

/// Metadata sink callback type.
pub(crate) type MetadataSink<'s> = &'s mut dyn FnMut(&MetadataBlock<'_>);

/// Walk the metadata section. The reader must be positioned just past the
/// `fLaC` marker; on success it is left at the first byte of the first frame.
pub(crate) fn read_all<S: ByteSource>(
    bits: &mut BitCache<S>,
    mut sink: Option<MetadataSink<'_>>,
) -> Result<ParsedMetadata> {
    let mut parsed = ParsedMetadata {
        stream_info: None,
        seek_points: Vec::new(),
    };
    let mut buf = Vec::new();
    loop {
        let header = bits.read_u8()?;
        let is_last = header & 0x80 != 0;
        let kind = BlockKind::from(header & 0x7F);
        let length = bits.read_u32(24)?;

        // Blocks the decoder itself does not consume are skipped outright
        // when no sink is listening.
        let wanted = matches!(kind, BlockKind::StreamInfo | BlockKind::SeekTable);
        if !wanted && sink.is_none() {
            bits.skip_bytes(length as u64)?;
            if is_last {
                break;
            }
            continue;
        }

        buf.resize(length as usize, 0);
        bits.read_bytes(&mut buf)?;
        debug!(kind = ?kind, length, is_last, "metadata block");

        let payload = match kind {
            BlockKind::StreamInfo => {
                let info = parse_stream_info(&buf)?;
                parsed.stream_info = Some(info.clone());
                MetadataPayload::StreamInfo(info)
            }
            BlockKind::SeekTable => {
                if buf.len() % SEEK_POINT_LEN as usize != 0 {
                    warn!(length, "seek table length not a multiple of 18, truncating");
                }
                parsed.seek_points = parse_seek_table(&buf);
                MetadataPayload::SeekTable(&parsed.seek_points)
            }
            BlockKind::Padding => MetadataPayload::Padding { length },
            BlockKind::Application => {
                if buf.len() >= 4 {
                    let mut id = [0u8; 4];
                    id.copy_from_slice(&buf[..4]);
                    MetadataPayload::Application { id, data: &buf[4..] }
                } else {
                    warn!("application block shorter than its ID");
                    MetadataPayload::Unknown(&buf)
                }
            }
            BlockKind::VorbisComment => match VorbisCommentView::parse(&buf) {
                Some(view) => MetadataPayload::VorbisComment(view),
                None => {
                    warn!("malformed vorbis comment block");
                    MetadataPayload::Unknown(&buf)
                }
            },
            BlockKind::Cuesheet => match CuesheetView::parse(&buf) {
                Some(view) => MetadataPayload::Cuesheet(view),
                None => {
                    warn!("malformed cuesheet block");
                    MetadataPayload::Unknown(&buf)
                }
            },
            BlockKind::Picture => match PictureView::parse(&buf) {
                Some(view) => MetadataPayload::Picture(view),
                None => {
                    warn!("malformed picture block");
                    MetadataPayload::Unknown(&buf)
                }
            },
            BlockKind::Reserved(_) => MetadataPayload::Unknown(&buf),
        };

        if let Some(sink) = sink.as_deref_mut() {
            sink(&MetadataBlock {
                kind,
                is_last,
                raw: &buf,
                payload,
            });
        }

        if is_last {
            break;
        }
    }
    Ok(parsed)
}
