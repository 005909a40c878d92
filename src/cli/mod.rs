use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "audiobook-organizer", about = "Organizes an audiobook collection and keeps iTunes in sync with it.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Import audiobooks from an iTunes library (Library.xml or .itl).
    Import {
        /// Library file; probed in the default locations when omitted.
        #[arg(long)]
        library: Option<PathBuf>,

        /// organized | import | organize
        #[arg(long, default_value = "import")]
        mode: String,

        /// Also attach non-built-in playlist names as tags.
        #[arg(long)]
        playlists: bool,

        /// Import files whose content is already cataloged anyway.
        #[arg(long)]
        allow_duplicates: bool
    },

    /// Dry-run a library import: counts, missing files, path prefixes.
    Validate {
        #[arg(long)]
        library: Option<PathBuf>
    },

    /// Scan the configured import roots for loose audiobook files.
    Scan {
        /// Scan this root instead of the configured ones.
        #[arg(long)]
        root: Option<PathBuf>
    },

    /// Move every book in state 'import' into the organized tree.
    Organize,

    /// Write organized paths back into the iTunes library.
    Writeback {
        #[arg(long)]
        library: Option<PathBuf>,

        /// Proceed even if the library changed since the import.
        #[arg(long)]
        force: bool,

        /// Skip the safety copy of the library file.
        #[arg(long)]
        no_backup: bool,

        /// Check what would happen without touching anything.
        #[arg(long)]
        dry_run: bool
    },

    /// Manage the registry of permanently rejected content hashes.
    Blocked {
        #[command(subcommand)]
        action: BlockedActions
    },

    /// Check for (and install) a newer build.
    Update {
        /// stable | develop
        #[arg(long, default_value = "stable")]
        channel: String,

        /// Download and swap the binary instead of only checking.
        #[arg(long)]
        install: bool
    }
}

#[derive(Subcommand)]
pub enum BlockedActions {
    Add {
        hash: String,
        #[arg(long, default_value = "blocked manually")]
        reason: String
    },
    Remove {
        hash: String
    },
    List
}
