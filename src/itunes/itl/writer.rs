use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use rand::RngCore;

use crate::itunes::location::{encode_location, is_file_url};
use super::chunk::*;
use super::crypto::{deflate, encrypt_body};
use super::reader::decode_payload;
use super::ItlError;

/// Track fields for insertion into an itl. Only non-empty strings get an
/// hohm child; numeric fields land in the fixed htim layout.
#[derive(Clone, Debug, Default)]
pub struct NewItlTrack {
    pub name: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub kind: Option<String>,
    pub location: Option<String>,
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
    pub date_added: Option<NaiveDateTime>
}

/// Rewrites the location field of every track whose persistent id (lowercase
/// hex) appears in `updates`. Both the plain file-location field (0x0D) and
/// the local-url variant audiobooks use (0x0B) are covered. Returns the
/// number of rewritten fields.
pub fn update_locations<P: AsRef<Path>>(in_path: P, out_path: P, updates: &HashMap<String, PathBuf>) -> Result<usize, ItlError> {
    let updates: HashMap<String, &PathBuf> = updates.iter()
        .map(|(persistent_id, path)| (persistent_id.to_lowercase(), path))
        .collect();

    rewrite_itl(in_path.as_ref(), out_path.as_ref(), |payload| {
        let chunks = scan_chunks(payload)?;
        let sections = hdsm_sections(payload, &chunks)?;
        let mut editor = PayloadEditor::new(payload);

        let mut current_pid: Option<String> = None;
        let mut updated = 0usize;

        for chunk in &chunks {
            match &chunk.tag {
                b"htim" => {
                    current_pid = Some(hex::encode(read_bytes(payload, chunk.offset + 128, 8)?));
                },
                b"hpim" => {
                    current_pid = None;
                },
                b"hohm" => {
                    let field_type = read_u32_be(payload, chunk.offset + HOHM_TYPE_OFFSET)?;
                    if field_type != HOHM_FILE_LOCATION && field_type != HOHM_LOCAL_URL {
                        continue;
                    }
                    let Some(pid) = &current_pid else { continue; };
                    let Some(new_path) = updates.get(pid) else { continue; };

                    let value = if field_type == HOHM_LOCAL_URL {
                        let raw = new_path.to_string_lossy();
                        if is_file_url(&raw) {
                            raw.into_owned()
                        } else {
                            encode_location(new_path)
                        }
                    } else {
                        new_path.to_string_lossy().into_owned()
                    };

                    let replacement = build_hohm(field_type, &value);
                    editor.replace_chunk(chunk.offset, chunk.advance, &replacement);
                    updated += 1;
                },
                _ => {}
            }
        }

        Ok((editor.finish(&sections), updated))
    })
}

/// Inserts new tracks after the existing track chunks and strictly before
/// the first playlist. Ids continue from the current maximum; persistent
/// ids are random. Returns the assigned track ids.
pub fn insert_tracks<P: AsRef<Path>>(in_path: P, out_path: P, tracks: &[NewItlTrack]) -> Result<Vec<u32>, ItlError> {
    rewrite_itl(in_path.as_ref(), out_path.as_ref(), |payload| {
        let chunks = scan_chunks(payload)?;
        let sections = hdsm_sections(payload, &chunks)?;

        let mut max_track_id = 0u32;
        let mut last_track_chunk_end: Option<usize> = None;
        let mut first_hpim: Option<usize> = None;
        let mut in_track_run = false;

        for chunk in &chunks {
            match &chunk.tag {
                b"htim" => {
                    max_track_id = max_track_id.max(read_u32_be(payload, chunk.offset + 16)?);
                    last_track_chunk_end = Some(chunk.offset + chunk.advance);
                    in_track_run = true;
                },
                b"hohm" => {
                    if in_track_run {
                        last_track_chunk_end = Some(chunk.offset + chunk.advance);
                    }
                },
                b"hpim" => {
                    if first_hpim.is_none() {
                        first_hpim = Some(chunk.offset);
                    }
                    in_track_run = false;
                },
                _ => {
                    in_track_run = false;
                }
            }
        }

        let mut insert_at = last_track_chunk_end
            .or(first_hpim)
            .unwrap_or(payload.len());
        if let Some(hpim_offset) = first_hpim {
            insert_at = insert_at.min(hpim_offset);
        }

        let mut inserted = Vec::new();
        let mut assigned_ids = Vec::new();
        let mut next_id = max_track_id + 1;

        for track in tracks {
            inserted.extend(build_track_chunks(track, next_id));
            assigned_ids.push(next_id);
            next_id += 1;
        }

        let mut editor = PayloadEditor::new(payload);
        editor.insert_at(insert_at, &inserted);

        Ok((editor.finish(&sections), assigned_ids))
    })
}

/// Appends a plain playlist at the end of the chunk stream: one hpim, its
/// title field, then one hptm per track id.
pub fn insert_playlist<P: AsRef<Path>>(in_path: P, out_path: P, title: &str, track_ids: &[u32]) -> Result<(), ItlError> {
    rewrite_itl(in_path.as_ref(), out_path.as_ref(), |payload| {
        let chunks = scan_chunks(payload)?;
        let sections = hdsm_sections(payload, &chunks)?;

        let mut appended = build_hpim(track_ids.len());
        appended.extend(build_hohm(HOHM_PLAYLIST_TITLE, title));
        for track_id in track_ids {
            appended.extend(build_hptm(*track_id));
        }

        let mut editor = PayloadEditor::new(payload);
        editor.insert_at(payload.len(), &appended);

        Ok((editor.finish(&sections), ()))
    })
}

/// Rewrites every location-ish field whose decoded string ends with
/// `old_ext` (case-insensitive) to end with `new_ext` instead. Returns the
/// number of rewritten fields.
pub fn rewrite_extensions<P: AsRef<Path>>(in_path: P, out_path: P, old_ext: &str, new_ext: &str) -> Result<usize, ItlError> {
    let old_lower = old_ext.to_lowercase();

    rewrite_itl(in_path.as_ref(), out_path.as_ref(), |payload| {
        let chunks = scan_chunks(payload)?;
        let sections = hdsm_sections(payload, &chunks)?;
        let mut editor = PayloadEditor::new(payload);
        let mut rewritten = 0usize;

        for chunk in &chunks {
            if &chunk.tag != b"hohm" {
                continue;
            }
            let field_type = read_u32_be(payload, chunk.offset + HOHM_TYPE_OFFSET)?;
            if field_type != HOHM_FILE_LOCATION && field_type != HOHM_LOCAL_URL {
                continue;
            }

            let flag = read_u8(payload, chunk.offset + HOHM_ENCODING_OFFSET)?;
            let str_len = read_u32_be(payload, chunk.offset + HOHM_STRLEN_OFFSET)? as usize;
            let data = read_bytes(payload, chunk.offset + HOHM_DATA_OFFSET, str_len)?;
            let value = decode_field(flag, data, chunk.offset)?;

            if !value.to_lowercase().ends_with(&old_lower) {
                continue;
            }

            let stem = &value[..value.len() - old_ext.len()];
            let replacement = build_hohm(field_type, &format!("{}{}", stem, new_ext));
            editor.replace_chunk(chunk.offset, chunk.advance, &replacement);
            rewritten += 1;
        }

        Ok((editor.finish(&sections), rewritten))
    })
}

/// Shared write skeleton: decode, transform the plain chunk stream, then
/// re-deflate iff the source was compressed, re-encrypt per the version
/// rule, rebuild hdfm with the new file length and install atomically.
fn rewrite_itl<T>(
    in_path: &Path,
    out_path: &Path,
    transform: impl FnOnce(&[u8]) -> Result<(Vec<u8>, T), ItlError>
) -> Result<T, ItlError> {
    if !in_path.exists() {
        return Err(ItlError::NotFound(in_path.to_path_buf()));
    }

    let data = std::fs::read(in_path)?;
    let (header, payload, compressed) = decode_payload(&data)?;

    let (new_payload, result) = transform(&payload)?;

    let mut body = if compressed {
        deflate(&new_payload)?
    } else {
        new_payload
    };
    encrypt_body(&mut body, header.major_version());

    let file_len = header.header_len as usize + body.len();
    let mut out = header.to_bytes(file_len as u32);
    out.extend_from_slice(&body);

    let tmp_path = out_path.with_extension("tmp");
    std::fs::write(&tmp_path, &out)?;
    std::fs::rename(&tmp_path, out_path)?;

    Ok(result)
}

struct ChunkInfo {
    offset: usize,
    tag: [u8; 4],
    length: usize,
    advance: usize
}

/// Flat walk over the chunk stream with the same stepping rules as the
/// reader. Little-endian payloads cannot be rewritten and are rejected.
fn scan_chunks(payload: &[u8]) -> Result<Vec<ChunkInfo>, ItlError> {
    let mut chunks = Vec::new();
    let mut offset = 0usize;

    while offset < payload.len() {
        if offset + 8 > payload.len() {
            return Err(ItlError::UnexpectedEof { offset });
        }

        let tag = read_tag(payload, offset)?;
        let length = read_u32_be(payload, offset + 4)? as usize;

        if &tag == TAG_MSDH {
            return Err(ItlError::Parse {
                offset,
                message: "little-endian itl payloads cannot be rewritten".to_string()
            });
        }

        if length < 8 {
            return Err(ItlError::Parse {
                offset,
                message: format!("chunk length {} is smaller than a chunk header", length)
            });
        }

        let advance = if &tag == TAG_HOHM {
            let str_len = read_u32_be(payload, offset + HOHM_STRLEN_OFFSET)? as usize;
            length.max(HOHM_DATA_OFFSET + str_len)
        } else {
            length
        };

        if offset + advance > payload.len() {
            return Err(ItlError::UnexpectedEof { offset });
        }

        chunks.push(ChunkInfo { offset, tag, length, advance });
        offset += advance;
    }

    Ok(chunks)
}

struct HdsmSection {
    offset: usize,
    extended: u32,
    span: usize
}

fn hdsm_sections(payload: &[u8], chunks: &[ChunkInfo]) -> Result<Vec<HdsmSection>, ItlError> {
    chunks.iter()
        .filter(|chunk| &chunk.tag == TAG_HDSM)
        .map(|chunk| {
            let extended = read_u32_be(payload, chunk.offset + 8)?;
            let span = chunk.length.max(extended as usize).min(payload.len() - chunk.offset);
            Ok(HdsmSection { offset: chunk.offset, extended, span })
        })
        .collect()
}

/// Streams the input payload into a new byte vector, applying chunk-level
/// replacements and insertions, then patches the extended-length field of
/// every enclosing hdsm whose span grew or shrank.
struct PayloadEditor<'a> {
    payload: &'a [u8],
    out: Vec<u8>,
    copied_until: usize,
    deltas: Vec<(usize, i64)>
}

impl<'a> PayloadEditor<'a> {

    fn new(payload: &'a [u8]) -> Self {
        Self {
            payload,
            out: Vec::with_capacity(payload.len()),
            copied_until: 0,
            deltas: Vec::new()
        }
    }

    fn copy_through(&mut self, until: usize) {
        debug_assert!(until >= self.copied_until);
        self.out.extend_from_slice(&self.payload[self.copied_until..until]);
        self.copied_until = until;
    }

    fn replace_chunk(&mut self, offset: usize, old_len: usize, replacement: &[u8]) {
        self.copy_through(offset);
        self.out.extend_from_slice(replacement);
        self.copied_until = offset + old_len;

        let delta = replacement.len() as i64 - old_len as i64;
        if delta != 0 {
            self.deltas.push((offset, delta));
        }
    }

    fn insert_at(&mut self, offset: usize, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.copy_through(offset);
        self.out.extend_from_slice(bytes);
        self.deltas.push((offset, bytes.len() as i64));
    }

    fn finish(mut self, sections: &[HdsmSection]) -> Vec<u8> {
        self.copy_through(self.payload.len());
        let mut out = self.out;

        for section in sections {
            let section_end = section.offset + section.span;

            let inner_delta: i64 = self.deltas.iter()
                .filter(|(position, _)| *position > section.offset && *position <= section_end)
                .map(|(_, delta)| delta)
                .sum();

            if inner_delta == 0 {
                continue;
            }

            let shift: i64 = self.deltas.iter()
                .filter(|(position, _)| *position <= section.offset)
                .map(|(_, delta)| delta)
                .sum();

            let out_offset = (section.offset as i64 + shift) as usize;
            let new_extended = (i64::from(section.extended) + inner_delta) as u32;
            write_u32_be(&mut out, out_offset + 8, new_extended);
        }

        out
    }
}

fn build_track_chunks(track: &NewItlTrack, track_id: u32) -> Vec<u8> {
    let mut htim = vec![0u8; 156];

    htim[0..4].copy_from_slice(TAG_HTIM);
    write_u32_be(&mut htim, 4, 156);
    write_u32_be(&mut htim, 16, track_id);
    write_u32_be(&mut htim, 36, track.file_size);
    write_u32_be(&mut htim, 40, track.total_time_ms);
    write_u32_be(&mut htim, 44, track.track_number);
    write_u32_be(&mut htim, 48, track.track_count);
    write_i16_be(&mut htim, 54, track.year);
    write_u16_be(&mut htim, 58, track.bit_rate);
    write_u16_be(&mut htim, 60, track.sample_rate);
    write_u32_be(&mut htim, 76, track.play_count);
    htim[104] = track.disc_number;
    htim[106] = track.disc_count;
    htim[108] = track.rating;

    if let Some(date_added) = track.date_added {
        let mac = naive_to_mac(date_added);
        write_u32_be(&mut htim, 32, mac);
        write_u32_be(&mut htim, 120, mac);
    }

    let mut persistent_id = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut persistent_id);
    htim[128..136].copy_from_slice(&persistent_id);

    let mut chunks = htim;
    let string_fields = [
        (HOHM_NAME, &track.name),
        (HOHM_ALBUM, &track.album),
        (HOHM_ARTIST, &track.artist),
        (HOHM_GENRE, &track.genre),
        (HOHM_KIND, &track.kind),
        (HOHM_FILE_LOCATION, &track.location)
    ];
    for (field_type, value) in string_fields {
        if let Some(value) = value {
            if !value.is_empty() {
                chunks.extend(build_hohm(field_type, value));
            }
        }
    }

    chunks
}

fn build_hpim(item_count: usize) -> Vec<u8> {
    let mut chunk = vec![0u8; 448];

    chunk[0..4].copy_from_slice(TAG_HPIM);
    write_u32_be(&mut chunk, 4, 448);
    write_u32_be(&mut chunk, 16, item_count as u32);

    let mut persistent_id = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut persistent_id);
    chunk[440..448].copy_from_slice(&persistent_id);

    chunk
}

fn build_hptm(track_id: u32) -> Vec<u8> {
    let mut chunk = vec![0u8; 28];

    chunk[0..4].copy_from_slice(TAG_HPTM);
    write_u32_be(&mut chunk, 4, 28);
    write_u32_be(&mut chunk, 24, track_id);

    chunk
}
