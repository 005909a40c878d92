use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, NaiveDateTime, Utc};
use plist::{Dictionary, Value};
use plist::stream::XmlWriteOptions;

use super::location::encode_location;
use super::model::{Library, Playlist, Track};

#[derive(Debug, thiserror::Error)]
pub enum PlistError {
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error("Plist parsing failed: {0}")]
    Parse(#[from] plist::Error),

    #[error("Expected a dictionary at the top level of the library plist.")]
    NotADictionary,

    #[error("Track entry '{0}' is not a dictionary.")]
    MalformedTrack(String)
}

/// Reads the raw plist tree. The full tree is what write-back mutates so
/// that keys this tool does not model (smart criteria and friends) survive a
/// round-trip untouched.
pub fn read_value<P: AsRef<Path>>(path: P) -> Result<Value, PlistError> {
    Ok(Value::from_file(path.as_ref())?)
}

/// Writes a plist tree as iTunes-style XML: tab indentation, installed
/// atomically via `<path>.tmp` + rename.
pub fn write_value_atomic<P: AsRef<Path>>(path: P, value: &Value) -> Result<(), PlistError> {
    let path = path.as_ref();
    let tmp_path = path.with_extension("tmp");

    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        let options = XmlWriteOptions::default().indent_string("\t");
        value.to_writer_xml_with_options(&mut writer, &options)?;
    }

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn read_library<P: AsRef<Path>>(path: P) -> Result<Library, PlistError> {
    let value = read_value(path)?;
    parse_library(&value)
}

pub fn write_library<P: AsRef<Path>>(path: P, library: &Library) -> Result<(), PlistError> {
    let value = library_to_value(library);
    write_value_atomic(path, &value)
}

/// Rewrites the `Location` of every track whose `Persistent ID` appears in
/// `updates`, then installs the tree atomically. Returns how many tracks
/// were touched. Unknown keys elsewhere in the plist are left as they are.
pub fn update_locations<P: AsRef<Path>>(path: P, updates: &HashMap<String, PathBuf>) -> Result<usize, PlistError> {
    let path = path.as_ref();
    let mut value = read_value(path)?;

    let root = value.as_dictionary_mut().ok_or(PlistError::NotADictionary)?;
    let mut updated = 0usize;

    if let Some(tracks) = root.get_mut("Tracks").and_then(Value::as_dictionary_mut) {
        for track_value in tracks.values_mut() {
            let Some(track) = track_value.as_dictionary_mut() else { continue; };

            let Some(persistent_id) = track.get("Persistent ID").and_then(Value::as_string) else { continue; };

            let matched = updates.iter()
                .find(|(id, _)| id.eq_ignore_ascii_case(persistent_id))
                .map(|(_, new_path)| new_path.clone());

            if let Some(new_path) = matched {
                track.insert("Location".to_string(), Value::String(encode_location(&new_path)));
                updated += 1;
            }
        }
    }

    write_value_atomic(path, &value)?;
    Ok(updated)
}

pub fn parse_library(value: &Value) -> Result<Library, PlistError> {
    let root = value.as_dictionary().ok_or(PlistError::NotADictionary)?;

    let mut library = Library {
        major_version: get_u64(root, "Major Version").unwrap_or(1),
        minor_version: get_u64(root, "Minor Version").unwrap_or(1),
        app_version: get_string(root, "Application Version").unwrap_or_default(),
        music_folder: get_string(root, "Music Folder"),
        ..Default::default()
    };

    if let Some(tracks) = root.get("Tracks").and_then(Value::as_dictionary) {
        for (track_key, track_value) in tracks {
            let track_dict = track_value
                .as_dictionary()
                .ok_or_else(|| PlistError::MalformedTrack(track_key.clone()))?;

            library.tracks.insert(track_key.clone(), parse_track(track_dict));
        }
    }

    if let Some(playlists) = root.get("Playlists").and_then(Value::as_array) {
        for playlist_value in playlists {
            if let Some(playlist_dict) = playlist_value.as_dictionary() {
                library.playlists.push(parse_playlist(playlist_dict));
            }
        }
    }

    Ok(library)
}

fn parse_track(dict: &Dictionary) -> Track {
    Track {
        track_id: get_u64(dict, "Track ID").unwrap_or(0),
        persistent_id: get_string(dict, "Persistent ID"),
        name: get_string(dict, "Name"),
        artist: get_string(dict, "Artist"),
        album_artist: get_string(dict, "Album Artist"),
        album: get_string(dict, "Album"),
        genre: get_string(dict, "Genre"),
        kind: get_string(dict, "Kind"),
        comments: get_string(dict, "Comments"),
        year: get_i64(dict, "Year"),
        size: get_size_guarded(dict),
        total_time_ms: get_u64(dict, "Total Time").unwrap_or(0),
        date_added: get_date(dict, "Date Added"),
        play_count: get_u64(dict, "Play Count").unwrap_or(0),
        play_date: get_i64(dict, "Play Date"),
        rating: get_u64(dict, "Rating").unwrap_or(0).min(100) as u8,
        bookmark_ms: get_u64(dict, "Bookmark").unwrap_or(0),
        bookmarkable: dict.get("Bookmarkable").and_then(Value::as_boolean).unwrap_or(false),
        location: get_string(dict, "Location")
    }
}

fn parse_playlist(dict: &Dictionary) -> Playlist {
    let track_ids = dict.get("Playlist Items")
        .and_then(Value::as_array)
        .map(|items| {
            items.iter()
                .filter_map(Value::as_dictionary)
                .filter_map(|item| get_u64(item, "Track ID"))
                .collect()
        })
        .unwrap_or_default();

    Playlist {
        playlist_id: get_u64(dict, "Playlist ID").unwrap_or(0),
        name: get_string(dict, "Name").unwrap_or_default(),
        track_ids
    }
}

pub fn library_to_value(library: &Library) -> Value {
    let mut root = Dictionary::new();
    root.insert("Major Version".to_string(), Value::Integer(library.major_version.into()));
    root.insert("Minor Version".to_string(), Value::Integer(library.minor_version.into()));
    root.insert("Application Version".to_string(), Value::String(library.app_version.clone()));
    if let Some(folder) = &library.music_folder {
        root.insert("Music Folder".to_string(), Value::String(folder.clone()));
    }

    let mut tracks = Dictionary::new();
    for (key, track) in &library.tracks {
        tracks.insert(key.clone(), Value::Dictionary(track_to_dict(track)));
    }
    root.insert("Tracks".to_string(), Value::Dictionary(tracks));

    let playlists = library.playlists.iter()
        .map(|playlist| Value::Dictionary(playlist_to_dict(playlist)))
        .collect();
    root.insert("Playlists".to_string(), Value::Array(playlists));

    Value::Dictionary(root)
}

fn track_to_dict(track: &Track) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.insert("Track ID".to_string(), Value::Integer(track.track_id.into()));

    if let Some(name) = &track.name {
        dict.insert("Name".to_string(), Value::String(name.clone()));
    }
    if let Some(artist) = &track.artist {
        dict.insert("Artist".to_string(), Value::String(artist.clone()));
    }
    if let Some(album_artist) = &track.album_artist {
        dict.insert("Album Artist".to_string(), Value::String(album_artist.clone()));
    }
    if let Some(album) = &track.album {
        dict.insert("Album".to_string(), Value::String(album.clone()));
    }
    if let Some(genre) = &track.genre {
        dict.insert("Genre".to_string(), Value::String(genre.clone()));
    }
    if let Some(kind) = &track.kind {
        dict.insert("Kind".to_string(), Value::String(kind.clone()));
    }
    if let Some(comments) = &track.comments {
        dict.insert("Comments".to_string(), Value::String(comments.clone()));
    }
    if let Some(year) = track.year {
        dict.insert("Year".to_string(), Value::Integer(year.into()));
    }
    if track.size > 0 {
        dict.insert("Size".to_string(), Value::Integer(track.size.into()));
    }
    if track.total_time_ms > 0 {
        dict.insert("Total Time".to_string(), Value::Integer(track.total_time_ms.into()));
    }
    if let Some(date_added) = track.date_added {
        dict.insert("Date Added".to_string(), Value::Date(naive_to_plist_date(date_added)));
    }
    if track.play_count > 0 {
        dict.insert("Play Count".to_string(), Value::Integer(track.play_count.into()));
    }
    if let Some(play_date) = track.play_date {
        dict.insert("Play Date".to_string(), Value::Integer(play_date.into()));
    }
    if track.rating > 0 {
        dict.insert("Rating".to_string(), Value::Integer(u64::from(track.rating).into()));
    }
    if track.bookmark_ms > 0 {
        dict.insert("Bookmark".to_string(), Value::Integer(track.bookmark_ms.into()));
    }
    if track.bookmarkable {
        dict.insert("Bookmarkable".to_string(), Value::Boolean(true));
    }
    if let Some(persistent_id) = &track.persistent_id {
        dict.insert("Persistent ID".to_string(), Value::String(persistent_id.clone()));
    }
    if let Some(location) = &track.location {
        dict.insert("Location".to_string(), Value::String(location.clone()));
    }

    dict
}

fn playlist_to_dict(playlist: &Playlist) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.insert("Name".to_string(), Value::String(playlist.name.clone()));
    dict.insert("Playlist ID".to_string(), Value::Integer(playlist.playlist_id.into()));

    let items = playlist.track_ids.iter()
        .map(|track_id| {
            let mut item = Dictionary::new();
            item.insert("Track ID".to_string(), Value::Integer((*track_id).into()));
            Value::Dictionary(item)
        })
        .collect();
    dict.insert("Playlist Items".to_string(), Value::Array(items));

    dict
}

fn get_string(dict: &Dictionary, key: &str) -> Option<String> {
    dict.get(key).and_then(Value::as_string).map(str::to_string)
}

fn get_u64(dict: &Dictionary, key: &str) -> Option<u64> {
    dict.get(key)
        .and_then(Value::as_unsigned_integer)
}

fn get_i64(dict: &Dictionary, key: &str) -> Option<i64> {
    dict.get(key)
        .and_then(Value::as_signed_integer)
}

/// `Size` wrap guard: anything that does not fit a signed 64-bit integer is
/// treated as 0 rather than wrapping.
fn get_size_guarded(dict: &Dictionary) -> u64 {
    match get_u64(dict, "Size") {
        Some(size) if size <= i64::MAX as u64 => size,
        Some(_oversized) => 0,
        None => 0
    }
}

fn get_date(dict: &Dictionary, key: &str) -> Option<NaiveDateTime> {
    dict.get(key)
        .and_then(Value::as_date)
        .map(|date| {
            let system_time: SystemTime = date.into();
            DateTime::<Utc>::from(system_time).naive_utc()
        })
}

fn naive_to_plist_date(naive: NaiveDateTime) -> plist::Date {
    let system_time: SystemTime = naive.and_utc().into();
    plist::Date::from(system_time)
}
