//! Command-line surface for the ferry binary

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::protocol::FrameLimits;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "ferry - point-to-point file transfer over length-prefixed TCP frames"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG wins
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Accept files forever, storing each under the name the sender gives
    Server(ServerOpts),

    /// Send one file to a running server
    Client {
        /// Server address (host:port)
        addr: String,
        /// File to send
        path: PathBuf,
    },

    /// Wait for one peer and stream a file to it without a filename
    Offer {
        /// Bind address (host:port)
        bind: String,
        /// File to send
        path: PathBuf,
    },

    /// Connect to an offering peer and save its stream to DEST
    Fetch {
        /// Peer address (host:port)
        addr: String,
        /// Destination file
        dest: PathBuf,
        /// Largest accepted data frame, in MB
        #[arg(long, default_value_t = 64)]
        max_frame_mb: u32,
    },
}

#[derive(Clone, Debug, Args)]
pub struct ServerOpts {
    /// Port to listen on
    pub port: u16,

    /// Interface to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Directory received files are written into
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Largest accepted data frame, in MB
    #[arg(long, default_value_t = 64)]
    pub max_frame_mb: u32,

    /// Append one JSON line per session event to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,
}

impl ServerOpts {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn limits(&self) -> FrameLimits {
        limits_from_mb(self.max_frame_mb)
    }
}

pub fn limits_from_mb(mb: u32) -> FrameLimits {
    FrameLimits::with_max_frame_size(mb.saturating_mul(1024 * 1024))
}
