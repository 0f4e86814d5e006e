use crate::room::{RoomId, RoomInfo};
use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "meetroom")]
#[command(about = "Join a meeting room from the terminal", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Create a new room and join it
    New(NewArgs),
    /// Join an existing room by its code (e.g. 123-456-789)
    Join(JoinArgs),
    /// Print a freshly generated room code
    RoomId,
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug, Default)]
pub struct NewArgs {
    /// Display name shown to other participants
    #[arg(short, long)]
    pub name: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct JoinArgs {
    /// Room code, three groups of three digits
    pub code: String,
    /// Display name shown to other participants
    #[arg(short, long)]
    pub name: Option<String>,
}

impl JoinArgs {
    /// Resolve the room to join, rejecting malformed codes before anything
    /// touches devices or the network.
    pub fn room(&self) -> Result<RoomInfo> {
        let id = RoomId::parse(&self.code).context("Invalid room code")?;
        Ok(RoomInfo::new(id, None))
    }
}

pub fn handle_room_id_command() {
    println!("{}", RoomId::generate());
}
