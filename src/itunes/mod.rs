pub mod model;
pub mod location;
pub mod plist_codec;
pub mod itl;
pub mod fingerprint;
pub mod watcher;

use std::path::Path;

use self::itl::ItlError;
use self::model::Library;
use self::plist_codec::PlistError;

#[derive(Debug, thiserror::Error)]
pub enum LibraryReadError {
    #[error(transparent)]
    Plist(#[from] PlistError),

    #[error(transparent)]
    Itl(#[from] ItlError),

    #[error("Unsupported library file extension: {0}")]
    UnsupportedExtension(String)
}

/// Loads either library flavor into the normalized model, picked by file
/// extension.
pub fn read_any_library<P: AsRef<Path>>(path: P) -> Result<Library, LibraryReadError> {
    let path = path.as_ref();
    let extension = path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "xml" => Ok(plist_codec::read_library(path)?),
        "itl" => {
            let binary = itl::parse_itl(path)?;
            Ok(itl_to_model(&binary))
        },
        other => Err(LibraryReadError::UnsupportedExtension(other.to_string()))
    }
}

fn itl_to_model(binary: &itl::ItlLibrary) -> Library {
    let mut library = Library {
        app_version: binary.header.version.clone(),
        ..Default::default()
    };

    for track in &binary.tracks {
        library.tracks.insert(track.track_id.to_string(), model::Track {
            track_id: u64::from(track.track_id),
            persistent_id: Some(track.persistent_id.to_uppercase()),
            name: track.name.clone(),
            artist: track.artist.clone(),
            album: track.album.clone(),
            genre: track.genre.clone(),
            kind: track.kind.clone(),
            year: if track.year != 0 { Some(i64::from(track.year)) } else { None },
            size: u64::from(track.file_size),
            total_time_ms: u64::from(track.total_time_ms),
            date_added: track.date_added,
            play_count: u64::from(track.play_count),
            play_date: track.last_play.map(|dt| dt.and_utc().timestamp()),
            rating: track.rating,
            location: track.effective_location().map(str::to_string),
            ..Default::default()
        });
    }

    for (index, playlist) in binary.playlists.iter().enumerate() {
        library.playlists.push(model::Playlist {
            playlist_id: index as u64 + 1,
            name: playlist.title.clone().unwrap_or_default(),
            track_ids: playlist.track_ids.iter().map(|id| u64::from(*id)).collect()
        });
    }

    library
}
