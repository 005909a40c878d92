use std::path::Path;

use chrono::NaiveDateTime;

use super::chunk::*;
use super::crypto::{decrypt_body, inflate, ZLIB_MAGIC};
use super::ItlError;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ItlTrack {
    pub track_id: u32,
    /// 16 lowercase hex chars.
    pub persistent_id: String,
    pub album_persistent_id: Option<String>,
    pub name: Option<String>,
    pub album: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub kind: Option<String>,
    /// hohm type 0x0D.
    pub location: Option<String>,
    /// hohm type 0x0B; audiobooks and podcasts store their location here.
    pub local_url: Option<String>,
    pub file_size: u32,
    pub total_time_ms: u32,
    pub track_number: u32,
    pub track_count: u32,
    pub year: i16,
    pub bit_rate: u16,
    pub sample_rate: u16,
    pub play_count: u32,
    pub disc_number: u8,
    pub disc_count: u8,
    pub rating: u8,
    pub date_modified: Option<NaiveDateTime>,
    pub date_added: Option<NaiveDateTime>,
    pub last_play: Option<NaiveDateTime>
}

impl ItlTrack {
    /// The track's on-disk whereabouts, whichever field variant carries it.
    pub fn effective_location(&self) -> Option<&str> {
        self.location.as_deref().or(self.local_url.as_deref())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ItlPlaylist {
    pub persistent_id: String,
    pub title: Option<String>,
    pub track_ids: Vec<u32>,
    pub smart_criteria: Option<Vec<u8>>,
    pub smart_info: Option<Vec<u8>>
}

#[derive(Clone, Debug)]
pub struct ItlLibrary {
    pub header: HdfmHeader,
    pub compressed: bool,
    /// Little-endian msdh start marker seen. Such files are flagged, not
    /// parsed further.
    pub little_endian: bool,
    pub tracks: Vec<ItlTrack>,
    pub playlists: Vec<ItlPlaylist>
}

pub fn parse_itl<P: AsRef<Path>>(path: P) -> Result<ItlLibrary, ItlError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ItlError::NotFound(path.to_path_buf()));
    }

    let data = std::fs::read(path)?;
    parse_itl_bytes(&data)
}

pub fn parse_itl_bytes(data: &[u8]) -> Result<ItlLibrary, ItlError> {
    let (header, payload, compressed) = decode_payload(data)?;

    let mut library = ItlLibrary {
        header,
        compressed,
        little_endian: false,
        tracks: Vec::new(),
        playlists: Vec::new()
    };

    walk_chunks(&payload, &mut library)?;
    Ok(library)
}

/// hdfm parse + decrypt + optional inflate, shared by reader and writer.
pub(super) fn decode_payload(data: &[u8]) -> Result<(HdfmHeader, Vec<u8>, bool), ItlError> {
    let header = HdfmHeader::parse(data)?;

    let mut body = data[header.header_len as usize..].to_vec();
    decrypt_body(&mut body, header.major_version());

    if body.first() == Some(&ZLIB_MAGIC) {
        let payload = inflate(&body)?;
        Ok((header, payload, true))
    } else {
        Ok((header, body, false))
    }
}

enum Attach {
    None,
    Track,
    Playlist
}

fn walk_chunks(payload: &[u8], library: &mut ItlLibrary) -> Result<(), ItlError> {
    let mut offset = 0usize;
    let mut attach = Attach::None;

    while offset < payload.len() {
        if offset + 8 > payload.len() {
            return Err(ItlError::UnexpectedEof { offset });
        }

        let tag = read_tag(payload, offset)?;
        let length = read_u32_be(payload, offset + 4)? as usize;

        if &tag == TAG_MSDH {
            library.little_endian = true;
            log::warn!("Little-endian itl payload detected; contents are not parsed.");
            break;
        }

        if length < 8 {
            return Err(ItlError::Parse {
                offset,
                message: format!("chunk length {} is smaller than a chunk header", length)
            });
        }

        let advance = match &tag {
            b"hdsm" => {
                // Section container: the extended length covers its
                // children, which follow inline. Step over the header only.
                let _extended = read_u32_be(payload, offset + 8)?;
                length
            },
            b"htim" => {
                let chunk = read_bytes(payload, offset, length)?;
                library.tracks.push(parse_htim(chunk, offset)?);
                attach = Attach::Track;
                length
            },
            b"hpim" => {
                let chunk = read_bytes(payload, offset, length)?;
                library.playlists.push(parse_hpim(chunk, offset)?);
                attach = Attach::Playlist;
                length
            },
            b"hptm" => {
                let chunk = read_bytes(payload, offset, length)?;
                let track_id = read_u32_be(chunk, 24)?;
                match library.playlists.last_mut() {
                    Some(playlist) => playlist.track_ids.push(track_id),
                    None => log::warn!("hptm at offset {} without a preceding hpim, ignored.", offset)
                }
                length
            },
            b"hohm" => {
                apply_hohm(payload, offset, length, &attach, library)?
            },
            _other => {
                // Chunk types outside the grammar are skipped wholesale.
                log::debug!("Skipping unknown chunk {:?} at offset {}.", String::from_utf8_lossy(&tag), offset);
                length
            }
        };

        if offset + advance > payload.len() {
            return Err(ItlError::UnexpectedEof { offset });
        }
        offset += advance;
    }

    Ok(())
}

fn parse_htim(chunk: &[u8], offset: usize) -> Result<ItlTrack, ItlError> {
    if chunk.len() < 156 {
        return Err(ItlError::Parse {
            offset,
            message: format!("htim is {} bytes, expected at least 156", chunk.len())
        });
    }

    let persistent_id = hex::encode(read_bytes(chunk, 128, 8)?);

    let album_persistent_id = if chunk.len() > 308 {
        Some(hex::encode(read_bytes(chunk, 300, 8)?))
    } else {
        None
    };

    Ok(
        ItlTrack {
            track_id: read_u32_be(chunk, 16)?,
            persistent_id,
            album_persistent_id,
            date_modified: mac_to_naive(read_u32_be(chunk, 32)?),
            file_size: read_u32_be(chunk, 36)?,
            total_time_ms: read_u32_be(chunk, 40)?,
            track_number: read_u32_be(chunk, 44)?,
            track_count: read_u32_be(chunk, 48)?,
            year: read_i16_be(chunk, 54)?,
            bit_rate: read_u16_be(chunk, 58)?,
            sample_rate: read_u16_be(chunk, 60)?,
            play_count: read_u32_be(chunk, 76)?,
            last_play: mac_to_naive(read_u32_be(chunk, 100)?),
            disc_number: read_u8(chunk, 104)?,
            disc_count: read_u8(chunk, 106)?,
            rating: read_u8(chunk, 108)?,
            date_added: mac_to_naive(read_u32_be(chunk, 120)?),
            ..Default::default()
        }
    )
}

fn parse_hpim(chunk: &[u8], offset: usize) -> Result<ItlPlaylist, ItlError> {
    if chunk.len() < 448 {
        return Err(ItlError::Parse {
            offset,
            message: format!("hpim is {} bytes, expected at least 448", chunk.len())
        });
    }

    Ok(
        ItlPlaylist {
            persistent_id: hex::encode(read_bytes(chunk, 440, 8)?),
            ..Default::default()
        }
    )
}

/// Attaches an hohm string field to whichever record came last. Returns how
/// far to advance.
fn apply_hohm(payload: &[u8], offset: usize, length: usize, attach: &Attach, library: &mut ItlLibrary) -> Result<usize, ItlError> {
    let field_type = read_u32_be(payload, offset + HOHM_TYPE_OFFSET)?;
    let flag = read_u8(payload, offset + HOHM_ENCODING_OFFSET)?;
    let str_len = read_u32_be(payload, offset + HOHM_STRLEN_OFFSET)? as usize;
    let data = read_bytes(payload, offset + HOHM_DATA_OFFSET, str_len)?;

    match field_type {
        HOHM_SMART_CRITERIA | HOHM_SMART_INFO => {
            if let (Attach::Playlist, Some(playlist)) = (attach, library.playlists.last_mut()) {
                // Opaque blobs, carried as raw bytes.
                if field_type == HOHM_SMART_CRITERIA {
                    playlist.smart_criteria = Some(data.to_vec());
                } else {
                    playlist.smart_info = Some(data.to_vec());
                }
            }
        },
        HOHM_PLAYLIST_TITLE => {
            if let Some(playlist) = library.playlists.last_mut() {
                playlist.title = Some(decode_field(flag, data, offset)?);
            }
        },
        _ => {
            if let (Attach::Track, Some(track)) = (attach, library.tracks.last_mut()) {
                let value = decode_field(flag, data, offset)?;
                match field_type {
                    HOHM_NAME => track.name = Some(value),
                    HOHM_ALBUM => track.album = Some(value),
                    HOHM_ARTIST => track.artist = Some(value),
                    HOHM_GENRE => track.genre = Some(value),
                    HOHM_KIND => track.kind = Some(value),
                    HOHM_FILE_LOCATION => track.location = Some(value),
                    HOHM_LOCAL_URL => track.local_url = Some(value),
                    other => log::debug!("Ignoring hohm field type {:#x} at offset {}.", other, offset)
                }
            }
        }
    }

    Ok(length.max(HOHM_DATA_OFFSET + str_len))
}

/// A file is considered a valid itl iff the hdfm header parses and the
/// decrypted (and, where applicable, inflated) payload opens with a known
/// chunk tag.
pub fn validate_itl<P: AsRef<Path>>(path: P) -> Result<(), ItlError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ItlError::NotFound(path.to_path_buf()));
    }

    let data = std::fs::read(path)?;
    let (_header, payload, _compressed) = decode_payload(&data)?;

    let start = read_tag(&payload, 0)?;
    let known = matches!(&start, b"hdsm" | b"msdh" | b"htim" | b"hohm");

    if known {
        Ok(())
    } else {
        Err(ItlError::UnknownPayloadStart { found: start })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::itunes::itl::test_support::*;
    use super::*;

    const PID: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

    fn sample_payload() -> Vec<u8> {
        let mut payload = make_htim(42, PID);
        payload.extend(build_hohm(HOHM_NAME, "Hyperion"));
        payload.extend(build_hohm(HOHM_ARTIST, "Dan Simmons"));
        payload.extend(build_hohm(HOHM_FILE_LOCATION, "/music/old/song.mp3"));
        payload.extend(make_hpim([0xAA; 8]));
        payload.extend(build_hohm(HOHM_PLAYLIST_TITLE, "Sci-Fi"));
        payload.extend(make_hptm(42));
        payload
    }

    #[test]
    fn test_parse_plain_payload() -> Result<(), ItlError> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Library.itl");
        write_itl_file(&path, &sample_payload(), "12.0.1", false);

        let library = parse_itl(&path)?;

        assert!(!library.compressed);
        assert_eq!(library.tracks.len(), 1);

        let track = &library.tracks[0];
        assert_eq!(track.track_id, 42);
        assert_eq!(track.persistent_id, "0102030405060708");
        assert_eq!(track.name.as_deref(), Some("Hyperion"));
        assert_eq!(track.artist.as_deref(), Some("Dan Simmons"));
        assert_eq!(track.location.as_deref(), Some("/music/old/song.mp3"));
        assert_eq!(track.effective_location(), Some("/music/old/song.mp3"));

        assert_eq!(library.playlists.len(), 1);
        let playlist = &library.playlists[0];
        assert_eq!(playlist.title.as_deref(), Some("Sci-Fi"));
        assert_eq!(playlist.track_ids, vec![42]);

        Ok(())
    }

    #[test]
    fn test_parse_compressed_payload() -> Result<(), ItlError> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Library.itl");
        write_itl_file(&path, &sample_payload(), "12.0.1", true);

        let library = parse_itl(&path)?;

        assert!(library.compressed);
        assert_eq!(library.tracks.len(), 1);
        assert_eq!(library.tracks[0].name.as_deref(), Some("Hyperion"));

        Ok(())
    }

    #[test]
    fn test_parse_old_version_full_encryption() -> Result<(), ItlError> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Library.itl");
        write_itl_file(&path, &sample_payload(), "9.2", false);

        let library = parse_itl(&path)?;

        assert_eq!(library.header.major_version(), 9);
        assert_eq!(library.tracks.len(), 1);

        Ok(())
    }

    #[test]
    fn test_parse_hdsm_wrapped_payload() -> Result<(), ItlError> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Library.itl");

        let payload = make_hdsm(&sample_payload());
        write_itl_file(&path, &payload, "12.0.1", false);

        let library = parse_itl(&path)?;

        assert_eq!(library.tracks.len(), 1);
        assert_eq!(library.playlists.len(), 1);

        Ok(())
    }

    #[test]
    fn test_parse_truncated_chunk_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Library.itl");

        let mut payload = sample_payload();
        payload.truncate(100);
        write_itl_file(&path, &payload, "12.0.1", false);

        let result = parse_itl(&path);

        assert!(matches!(result, Err(ItlError::UnexpectedEof { .. }) | Err(ItlError::Parse { .. })));
    }

    #[test]
    fn test_parse_missing_file_errors() {
        assert!(matches!(parse_itl("/no/such/Library.itl"), Err(ItlError::NotFound(_))));
    }

    #[test]
    fn test_msdh_sets_little_endian_flag() -> Result<(), ItlError> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Library.itl");

        let mut payload = Vec::new();
        payload.extend_from_slice(TAG_MSDH);
        payload.extend_from_slice(&[0u8; 12]);
        write_itl_file(&path, &payload, "12.0.1", false);

        let library = parse_itl(&path)?;

        assert!(library.little_endian);
        assert!(library.tracks.is_empty());

        Ok(())
    }

    #[test]
    fn test_validate_itl_accepts_valid_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Library.itl");
        write_itl_file(&path, &sample_payload(), "12.0.1", false);

        assert!(validate_itl(&path).is_ok());

        let wrapped = dir.path().join("Wrapped.itl");
        write_itl_file(&wrapped, &make_hdsm(&sample_payload()), "12.0.1", true);
        assert!(validate_itl(&wrapped).is_ok());
    }

    #[test]
    fn test_validate_itl_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("NotALibrary.itl");
        std::fs::write(&path, b"this is not an itl file at all, not even close").unwrap();

        assert!(validate_itl(&path).is_err());
    }

    #[test]
    fn test_validate_itl_rejects_unknown_payload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Library.itl");

        let mut payload = Vec::new();
        payload.extend_from_slice(b"zzzz");
        payload.extend_from_slice(&[0u8; 12]);
        write_itl_file(&path, &payload, "12.0.1", false);

        assert!(matches!(validate_itl(&path), Err(ItlError::UnknownPayloadStart { .. })));
    }
}
