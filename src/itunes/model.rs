use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use serde::{Serialize, Deserialize};

/// Playlists iTunes maintains on its own. They are hidden from playlist tag
/// derivation; matching is exact and case-sensitive.
pub const BUILTIN_PLAYLISTS: [&str; 11] = [
    "Music",
    "Movies",
    "TV Shows",
    "Podcasts",
    "Audiobooks",
    "iTunes U",
    "Books",
    "Genius",
    "Recently Added",
    "Recently Played",
    "Top 25 Most Played"
];

/// Normalized in-memory form of an iTunes library, independent of whether it
/// came from Library.xml or the binary .itl.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Library {
    pub major_version: u64,
    pub minor_version: u64,
    pub app_version: String,
    pub music_folder: Option<String>,
    pub tracks: BTreeMap<String, Track>,
    pub playlists: Vec<Playlist>
}

impl Library {
    pub fn track_by_persistent_id(&self, persistent_id: &str) -> Option<&Track> {
        self.tracks.values().find(|track| {
            track.persistent_id.as_deref()
                .map(|pid| pid.eq_ignore_ascii_case(persistent_id))
                .unwrap_or(false)
        })
    }

    pub fn audiobook_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values().filter(|track| track.is_audiobook())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub track_id: u64,
    pub persistent_id: Option<String>,
    pub name: Option<String>,
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub kind: Option<String>,
    pub comments: Option<String>,
    pub year: Option<i64>,
    /// Bytes. Values above i64::MAX arriving from a plist are coerced to 0.
    pub size: u64,
    pub total_time_ms: u64,
    pub date_added: Option<NaiveDateTime>,
    pub play_count: u64,
    /// Unix seconds.
    pub play_date: Option<i64>,
    pub rating: u8,
    pub bookmark_ms: u64,
    pub bookmarkable: bool,
    pub location: Option<String>
}

impl Track {
    /// Long-form spoken content heuristic: any of kind, genre or location
    /// gives it away.
    pub fn is_audiobook(&self) -> bool {
        let kind = self.kind.as_deref().unwrap_or("").to_lowercase();
        if kind.contains("audiobook") || kind.contains("spoken word") {
            return true;
        }

        let genre = self.genre.as_deref().unwrap_or("").to_lowercase();
        if genre.contains("audiobook") || genre.contains("spoken") {
            return true;
        }

        self.location.as_deref().unwrap_or("")
            .to_lowercase()
            .contains("audiobooks")
    }
}

/// Absent-track form of the audiobook check.
pub fn is_audiobook(track: Option<&Track>) -> bool {
    track.map(Track::is_audiobook).unwrap_or(false)
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub playlist_id: u64,
    pub name: String,
    pub track_ids: Vec<u64>
}

impl Playlist {
    pub fn is_builtin(&self) -> bool {
        BUILTIN_PLAYLISTS.contains(&self.name.as_str())
    }
}

/// Lowercased names of every non-built-in playlist containing the track, in
/// playlist order.
pub fn playlist_tags(track_id: u64, playlists: &[Playlist]) -> Vec<String> {
    playlists.iter()
        .filter(|playlist| !playlist.is_builtin())
        .filter(|playlist| playlist.track_ids.contains(&track_id))
        .map(|playlist| playlist.name.to_lowercase())
        .collect()
}

/// Best-effort series name out of an album string: the part before the
/// first `,`, `-` or `:` (in that preference order). No separator means the
/// whole album is the series name.
pub fn series_from_album(album: &str) -> Option<String> {
    let album = album.trim();
    if album.is_empty() {
        return None;
    }

    for separator in [',', '-', ':'] {
        if let Some((left, _right)) = album.split_once(separator) {
            let series = left.trim();
            if series.is_empty() {
                return None;
            }
            return Some(series.to_string());
        }
    }

    Some(album.to_string())
}

#[derive(Debug, thiserror::Error)]
#[error("No iTunes library file found in the default locations.")]
pub struct LibraryNotFound;

/// Probes the default iTunes/Music library locations, first hit wins.
pub fn find_library_file() -> Result<PathBuf, LibraryNotFound> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .map_err(|_| LibraryNotFound)?;

    let candidates = [
        home.join("Music/Music/Library.xml"),
        home.join("Music/iTunes/iTunes Music Library.xml")
    ];

    candidates.into_iter()
        .find(|candidate| candidate.exists())
        .ok_or(LibraryNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(kind: Option<&str>, genre: Option<&str>, location: Option<&str>) -> Track {
        Track {
            kind: kind.map(str::to_string),
            genre: genre.map(str::to_string),
            location: location.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_audiobook_by_kind() {
        assert!(track(Some("Audiobook file"), None, None).is_audiobook());
        assert!(track(Some("Spoken Word"), None, None).is_audiobook());
        assert!(!track(Some("AAC audio file"), None, None).is_audiobook());
    }

    #[test]
    fn test_audiobook_by_genre() {
        assert!(track(None, Some("Audiobooks"), None).is_audiobook());
        assert!(track(None, Some("Spoken & Audio"), None).is_audiobook());
        assert!(!track(None, Some("Rock"), None).is_audiobook());
    }

    #[test]
    fn test_audiobook_by_location() {
        assert!(track(None, None, Some("file://localhost/Users/x/Music/Audiobooks/b.m4b")).is_audiobook());
        assert!(!track(None, None, Some("file://localhost/Users/x/Music/Music/song.mp3")).is_audiobook());
    }

    #[test]
    fn test_absent_track_is_not_audiobook() {
        assert!(!is_audiobook(None));
    }

    #[test]
    fn test_playlist_tags_skip_builtins() {
        let playlists = vec![
            Playlist { playlist_id: 1, name: "Audiobooks".to_string(), track_ids: vec![7] },
            Playlist { playlist_id: 2, name: "Sci-Fi Marathon".to_string(), track_ids: vec![7, 8] },
            Playlist { playlist_id: 3, name: "Favorites".to_string(), track_ids: vec![9] }
        ];

        assert_eq!(playlist_tags(7, &playlists), vec!["sci-fi marathon".to_string()]);
        assert!(playlist_tags(1, &playlists).is_empty());
    }

    #[test]
    fn test_playlist_tags_follow_playlist_order() {
        let playlists = vec![
            Playlist { playlist_id: 1, name: "Zebra".to_string(), track_ids: vec![1] },
            Playlist { playlist_id: 2, name: "Alpha".to_string(), track_ids: vec![1] }
        ];

        assert_eq!(playlist_tags(1, &playlists), vec!["zebra".to_string(), "alpha".to_string()]);
    }

    #[test]
    fn test_series_from_album_splits() {
        assert_eq!(series_from_album("Hyperion Cantos, Book 1"), Some("Hyperion Cantos".to_string()));
        assert_eq!(series_from_album("Hyperion Cantos - Book 1"), Some("Hyperion Cantos".to_string()));
        assert_eq!(series_from_album("Hyperion Cantos: Book 1"), Some("Hyperion Cantos".to_string()));
    }

    #[test]
    fn test_series_from_album_comma_beats_dash() {
        assert_eq!(series_from_album("Sci-Fi Greats, Vol 2"), Some("Sci-Fi Greats".to_string()));
    }

    #[test]
    fn test_series_from_album_no_separator() {
        assert_eq!(series_from_album("Standalone Album"), Some("Standalone Album".to_string()));
    }

    #[test]
    fn test_series_from_album_empty() {
        assert_eq!(series_from_album(""), None);
        assert_eq!(series_from_album("   "), None);
    }
}
