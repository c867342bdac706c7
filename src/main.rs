#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use remux_rs::remux::ffmpeg::FfmpegRemux;
use remux_rs::supervisor::{create_supervisor, StartRequest, SupervisorConfig};
use remux_rs::utils::logger;

#[tokio::main]
async fn main() -> Result<()> {
    remux_rs::init_env();
    let _guard = logger::init(remux_rs::LOG_PATH.clone())?;

    let mut args = std::env::args().skip(1);
    let (Some(input), Some(output)) = (args.next(), args.next()) else {
        eprintln!("usage: remux-rs <input.m3u8> <output.mp4>");
        std::process::exit(2);
    };

    info!("Starting remux supervisor...");
    let config = SupervisorConfig::from_env();
    let (supervisor, sink) = create_supervisor(config, Arc::new(FfmpegRemux::new()));
    let mut events = sink.subscribe();

    supervisor
        .start(StartRequest::new(None, &input, &output))
        .await?;

    while let Ok(event) = events.recv().await {
        println!("{}", event.to_json()?);
        if event.state.is_terminal() {
            break;
        }
    }

    supervisor.shutdown().await;
    Ok(())
}
