use anyhow::Result;
use clap::Parser;
use meetroom::{
    app,
    cli::{handle_room_id_command, Cli, CliCommand},
    room::RoomInfo,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Some(CliCommand::Version) => {
            println!("meetroom {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(CliCommand::RoomId) => {
            handle_room_id_command();
            Ok(())
        }
        Some(CliCommand::Join(args)) => {
            let room = args.room()?;
            app::run_session(room, args.name).await
        }
        Some(CliCommand::New(args)) => app::run_session(RoomInfo::create(None), args.name).await,
        None => app::run_session(RoomInfo::create(None), None).await,
    }
}
