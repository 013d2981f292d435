//! CLI argument parsing via clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Member client for the gym API.
#[derive(Debug, Parser)]
#[command(name = "gym", version)]
pub struct Args {
    /// Path to config file (default: $CONFIG_PATH or ./gym.toml).
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a session. The password is read from GYM_PASSWORD or stdin.
    Login { email: String },

    /// Create an account from a JSON profile and start a session.
    Register { profile: PathBuf },

    /// Show the current member's profile.
    Whoami,

    /// End the session and forget the cached profile.
    Logout,

    /// Report whether a session is stored.
    Session,

    /// Register entry to the facility.
    CheckIn,

    /// Register exit from the facility.
    CheckOut,

    /// Report whether you are checked in.
    Status,

    /// Show how many members are inside.
    Occupancy {
        /// Keep polling and print every update.
        #[arg(long)]
        watch: bool,
    },

    /// Heart-rate readings.
    #[command(subcommand)]
    HeartRate(HeartRateCommand),
}

#[derive(Debug, Subcommand)]
pub enum HeartRateCommand {
    /// Store a reading.
    Log { bpm: u32 },

    /// List stored readings.
    History,
}
