use std::io::{Cursor, Read, Write};

use base64::prelude::*;
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::common::{
    Severity,
    errors::{Error, Result},
    time::Millis,
};

/// Header flag: a version byte follows the header.
const TRACK_INFO_VERSIONED: u32 = 1;
/// Low 30 bits of the header carry the payload size.
const PAYLOAD_SIZE_MASK: u32 = 0x3FFF_FFFF;
const CURRENT_VERSION: u8 = 3;

/// A single audio track with encoded data and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Base64-encoded track data. This is the track's identity on the wire.
    pub encoded: String,
    pub info: TrackInfo,
    #[serde(default = "default_json_object")]
    pub plugin_info: serde_json::Value,
    #[serde(default = "default_json_object")]
    pub user_data: serde_json::Value,
}

fn default_json_object() -> serde_json::Value {
    serde_json::json!({})
}

/// Metadata for an audio track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    /// 0 for live streams.
    pub length: Millis,
    pub is_stream: bool,
    /// Offset the track starts playing from.
    pub position: Millis,
    pub title: String,
    pub uri: Option<String>,
    pub artwork_url: Option<String>,
    pub isrc: Option<String>,
    pub source_name: String,
}

impl Track {
    /// Builds a track from its metadata, encoding the wire handle.
    pub fn from_info(info: TrackInfo) -> Result<Self> {
        Ok(Self {
            encoded: encode(&info)?,
            info,
            plugin_info: default_json_object(),
            user_data: default_json_object(),
        })
    }

    /// Decodes a base64 track handle into its metadata.
    ///
    /// Supports track format versions 1, 2 and 3.
    pub fn decode(encoded: &str) -> Result<Self> {
        let info = decode(encoded)?;
        Ok(Self {
            encoded: encoded.to_string(),
            info,
            plugin_info: default_json_object(),
            user_data: default_json_object(),
        })
    }
}

/// Encodes track metadata.
///
/// Binary format (version 3):
///   [u32 header: payload_size | (flags << 30)]
///   [u8  version]
///   [utf title] [utf author] [u64 length ms] [utf identifier] [u8 is_stream]
///   [opt_utf uri]          v2+
///   [opt_utf artwork_url]  v3+
///   [opt_utf isrc]         v3+
///   [utf source_name] [u64 position ms]
pub fn encode(info: &TrackInfo) -> Result<String> {
    // Header placeholder, back-patched once the payload size is known.
    let mut buf = vec![0u8; 4];
    buf.write_u8(CURRENT_VERSION).map_err(io_err)?;

    write_utf(&mut buf, &info.title)?;
    write_utf(&mut buf, &info.author)?;
    buf.write_u64::<BigEndian>(info.length.0).map_err(io_err)?;
    write_utf(&mut buf, &info.identifier)?;
    buf.write_u8(info.is_stream as u8).map_err(io_err)?;
    write_opt_utf(&mut buf, info.uri.as_deref())?;
    write_opt_utf(&mut buf, info.artwork_url.as_deref())?;
    write_opt_utf(&mut buf, info.isrc.as_deref())?;
    write_utf(&mut buf, &info.source_name)?;
    buf.write_u64::<BigEndian>(info.position.0).map_err(io_err)?;

    let size = (buf.len() - 4) as u32;
    if size > PAYLOAD_SIZE_MASK {
        return Err(Error::InvalidTrack("payload too large".into()));
    }
    BigEndian::write_u32(&mut buf[..4], size | (TRACK_INFO_VERSIONED << 30));

    Ok(BASE64_STANDARD.encode(&buf))
}

pub fn decode(encoded: &str) -> Result<TrackInfo> {
    if encoded.is_empty() {
        return Err(Error::InvalidTrack("empty track handle".into()));
    }
    let data = BASE64_STANDARD
        .decode(encoded)
        .map_err(|e| Error::InvalidTrack(format!("not base64: {e}")))?;
    if data.len() < 4 {
        return Err(Error::InvalidTrack("missing header".into()));
    }

    let header = BigEndian::read_u32(&data[..4]);
    let flags = header >> 30;
    let size = (header & PAYLOAD_SIZE_MASK) as usize;
    let payload = data
        .get(4..4 + size)
        .ok_or_else(|| Error::InvalidTrack(format!("declared {size} bytes, have {}", data.len() - 4)))?;

    let mut cursor = Cursor::new(payload);
    let version = if flags & TRACK_INFO_VERSIONED != 0 {
        cursor.read_u8().map_err(io_err)?
    } else {
        1
    };
    if version > CURRENT_VERSION {
        return Err(Error::InvalidTrack(format!("unsupported version {version}")));
    }

    let title = read_utf(&mut cursor)?;
    let author = read_utf(&mut cursor)?;
    let length = cursor.read_u64::<BigEndian>().map_err(io_err)?;
    let identifier = read_utf(&mut cursor)?;
    let is_stream = cursor.read_u8().map_err(io_err)? != 0;

    let uri = if version >= 2 {
        read_opt_utf(&mut cursor)?
    } else {
        None
    };
    let (artwork_url, isrc) = if version >= 3 {
        (read_opt_utf(&mut cursor)?, read_opt_utf(&mut cursor)?)
    } else {
        (None, None)
    };

    let source_name = read_utf(&mut cursor)?;
    // Older encoders may omit the trailing position.
    let position = cursor.read_u64::<BigEndian>().unwrap_or(0);

    Ok(TrackInfo {
        identifier,
        is_seekable: !is_stream,
        author,
        length: Millis(length),
        is_stream,
        position: Millis(position),
        title,
        uri,
        artwork_url,
        isrc,
        source_name,
    })
}

/// Byte-level failures only happen on short reads of a truncated handle.
fn io_err(e: std::io::Error) -> Error {
    Error::InvalidTrack(format!("truncated track data: {e}"))
}

fn write_utf(w: &mut Vec<u8>, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    let len = u16::try_from(bytes.len())
        .map_err(|_| Error::InvalidTrack(format!("string field of {} bytes", bytes.len())))?;
    w.write_u16::<BigEndian>(len).map_err(io_err)?;
    w.write_all(bytes).map_err(io_err)?;
    Ok(())
}

fn write_opt_utf(w: &mut Vec<u8>, s: Option<&str>) -> Result<()> {
    match s {
        Some(s) => {
            w.write_u8(1).map_err(io_err)?;
            write_utf(w, s)
        }
        None => Ok(w.write_u8(0).map_err(io_err)?),
    }
}

fn read_utf<R: Read>(r: &mut R) -> Result<String> {
    let len = r.read_u16::<BigEndian>().map_err(io_err)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(io_err)?;
    String::from_utf8(buf).map_err(|e| Error::InvalidTrack(format!("invalid utf-8: {e}")))
}

fn read_opt_utf<R: Read>(r: &mut R) -> Result<Option<String>> {
    if r.read_u8().map_err(io_err)? != 0 {
        read_utf(r).map(Some)
    } else {
        Ok(None)
    }
}

/// Result of a track load operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "camelCase")]
pub enum LoadResult {
    Track(Track),
    Playlist(Playlist),
    Search(Vec<Track>),
    Empty {},
    Error(Exception),
}

impl LoadResult {
    /// All tracks carried by the result, in order.
    pub fn tracks(&self) -> &[Track] {
        match self {
            Self::Track(track) => std::slice::from_ref(track),
            Self::Playlist(playlist) => &playlist.tracks,
            Self::Search(tracks) => tracks,
            Self::Empty {} | Self::Error(_) => &[],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub info: PlaylistInfo,
    #[serde(default = "default_json_object")]
    pub plugin_info: serde_json::Value,
    pub tracks: Vec<Track>,
}

impl Playlist {
    /// The track the playlist link pointed at, if any.
    pub fn selected(&self) -> Option<&Track> {
        usize::try_from(self.info.selected_track)
            .ok()
            .and_then(|i| self.tracks.get(i))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: String,
    /// Index of the selected track, or -1 if none.
    pub selected_track: i32,
}

/// Error reported for a failed load or a track exception.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exception {
    pub message: Option<String>,
    pub severity: Severity,
    pub cause: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause_stack_trace: Option<String>,
}
