use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use pastel_core::{ids, Visibility, ANONYMOUS_USERNAME};
use pastel_db::DbConfig;
use pastel_service::CoordinatorConfig;
use pastel_store::StoreConfig;

#[derive(Debug, Parser)]
#[command(name = "pastel", about = "Paste and attachment storage")]
pub struct Cli {
    /// SQLite metadata database
    #[arg(long, env = "PASTEL_DB_PATH", global = true)]
    pub db_path: Option<PathBuf>,

    /// Directory holding attachment blobs. Must be absolute.
    #[arg(long, env = "PASTEL_ATTACHMENTS_PATH", global = true)]
    pub attachments_path: Option<PathBuf>,

    /// Length of generated paste slugs
    #[arg(
        long,
        env = "PASTEL_RANDOM_SLUG_LENGTH",
        default_value_t = ids::DEFAULT_SLUG_LENGTH,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..),
        global = true
    )]
    pub slug_length: usize,

    /// Attempts at finding a free generated slug
    #[arg(long, env = "PASTEL_SLUG_ATTEMPTS", default_value = "5", global = true)]
    pub slug_attempts: u32,

    /// Act as this user
    #[arg(long = "as", env = "PASTEL_USER", default_value = ANONYMOUS_USERNAME, global = true)]
    pub user: String,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register a user
    UserAdd { username: String },

    /// Store a new paste read from FILE, or stdin
    Create {
        file: Option<PathBuf>,

        /// Paste slug; generated when omitted
        #[arg(long)]
        slug: Option<String>,

        /// Content format, e.g. "text" or "rust"
        #[arg(long, default_value = "text")]
        format: String,

        #[arg(long, default_value = "public", value_parser = parse_visibility)]
        visibility: Visibility,

        /// Lifetime such as "30m", "12h" or "7d"
        #[arg(long, value_parser = parse_duration)]
        expires_in: Option<chrono::Duration>,

        /// Attach a file, optionally with its MIME type: PATH[=MIME]
        #[arg(long = "attach")]
        attachments: Vec<String>,
    },

    /// Print a paste
    Show { owner: String, slug: String },

    /// Print the owner and slug of a paste id
    Resolve { paste_id: String },

    /// List the most recent public pastes
    Latest {
        #[arg(long, default_value = "10")]
        limit: u32,
    },

    /// List the pastes of a user
    List { username: String },

    /// List the attachments of a paste
    Attachments { owner: String, slug: String },

    /// Download an attachment
    Attachment {
        owner: String,
        slug: String,
        attachment: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete one of your pastes
    Delete { paste_id: String },

    /// Delete expired pastes and their attachments
    PurgeExpired,

    /// Delete attachment blobs with no metadata
    SweepOrphans,

    /// Check that the database is reachable
    Check,
}

impl Cli {
    pub fn db_config(&self) -> DbConfig {
        DbConfig {
            sqlite_path: self
                .db_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        match &self.attachments_path {
            Some(root) => StoreConfig::new(root),
            None => StoreConfig::from_env(),
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            slug_length: self.slug_length,
            slug_attempts: self.slug_attempts,
        }
    }
}

fn parse_visibility(s: &str) -> Result<Visibility, String> {
    Visibility::parse_str(s).ok_or_else(|| {
        let names: Vec<_> = Visibility::ALL.iter().map(|v| v.as_str()).collect();
        format!("expected one of: {}", names.join(", "))
    })
}

/// Parse `<n><unit>` where unit is one of `s`, `m`, `h`, `d`.
pub fn parse_duration(s: &str) -> Result<chrono::Duration> {
    let s = s.trim();
    let Some(unit) = s.chars().last() else {
        bail!("empty duration");
    };
    let num = &s[..s.len() - unit.len_utf8()];
    let n: i64 = num
        .parse()
        .with_context(|| format!("invalid duration '{s}'"))?;
    if n <= 0 {
        bail!("duration must be positive: '{s}'");
    }
    let duration = match unit {
        's' => chrono::Duration::try_seconds(n),
        'm' => chrono::Duration::try_minutes(n),
        'h' => chrono::Duration::try_hours(n),
        'd' => chrono::Duration::try_days(n),
        _ => bail!("unknown duration unit in '{s}' (use s, m, h or d)"),
    };
    duration.with_context(|| format!("duration out of range: '{s}'"))
}
