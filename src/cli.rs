//! CLI argument definitions using clap derive macros.

use clap::{Parser, Subcommand};

use urlpipe_core::model::UrlStatus;

/// Job-pipeline core for a media/video downloader service.
#[derive(Parser, Debug)]
#[command(name = "urlpipe")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Subcommand to run; defaults to `server` when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Creates a pending URL row and enqueues it for download and oEmbed lookup.
    CreateUrl {
        /// The URL to enqueue.
        #[arg(long)]
        url: String,
    },

    /// Expands a playlist into individual URLs, deduplicating by video id.
    CreateUrlsFromPlaylist {
        /// The playlist's provider-specific identifier.
        #[arg(long)]
        playlist: String,
    },

    /// Fetches and persists oEmbed metadata for a URL, standalone.
    GetOembed {
        /// The URL to fetch oEmbed metadata for.
        #[arg(long)]
        url: String,
    },

    /// Runs the extractor for a URL standalone, printing logs and the result.
    DownloadUrl {
        /// The URL to download.
        #[arg(long)]
        url: String,
    },

    /// Lists URLs, optionally filtered by status, paginated by cursor/limit.
    ListUrls {
        /// Only list URLs in this status (`pending`, `processing`, `success`, or `failure`).
        #[arg(long, value_parser = parse_status)]
        status: Option<UrlStatus>,

        /// List URLs with id greater than this cursor.
        #[arg(long)]
        cursor: Option<i64>,

        /// Maximum number of rows to return.
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Lists a URL's log lines, paginated by cursor.
    ListLogs {
        /// The URL's id.
        #[arg(long)]
        url_id: i64,

        /// 0-based offset into the log array.
        #[arg(long, default_value_t = 0)]
        cursor: usize,

        /// Maximum number of lines to return.
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// Pops the next dead-lettered `download-url` event and retries it if eligible.
    RetryNextDownloadUrl,

    /// Explicitly retries one URL by id, bypassing the eligibility check and retry bound.
    RetryDownloadUrl {
        /// The URL's id.
        #[arg(long)]
        id: i64,
    },

    /// Runs the Worker loop and periodic Retrier sweeps until interrupted.
    Server,

    /// Runs only the Worker loop until interrupted.
    Worker,
}

fn parse_status(raw: &str) -> Result<UrlStatus, String> {
    raw.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_subcommand_defaults_to_server() {
        let args = Args::try_parse_from(["urlpipe"]).unwrap();
        assert!(args.command.is_none());
    }

    #[test]
    fn unknown_subcommand_exits_with_usage_error() {
        let result = Args::try_parse_from(["urlpipe", "bogus"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn create_url_requires_url_flag() {
        let result = Args::try_parse_from(["urlpipe", "create-url"]);
        assert!(result.is_err());

        let args = Args::try_parse_from(["urlpipe", "create-url", "--url", "https://example.com"]).unwrap();
        assert!(matches!(args.command, Some(Command::CreateUrl { url }) if url == "https://example.com"));
    }

    #[test]
    fn list_urls_parses_optional_status_filter() {
        let args = Args::try_parse_from(["urlpipe", "list-urls", "--status", "failure"]).unwrap();
        assert!(matches!(
            args.command,
            Some(Command::ListUrls {
                status: Some(UrlStatus::Failure),
                ..
            })
        ));
    }

    #[test]
    fn verbose_flag_increments_count() {
        let args = Args::try_parse_from(["urlpipe", "-vv", "server"]).unwrap();
        assert_eq!(args.verbose, 2);
    }
}
