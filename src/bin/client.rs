//! `vox` — the interactive client binary (spec §4.11, §6, C9/C11).

use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use voxcore::audio;
use voxcore::client::{Client, DEFAULT_TIMEOUT};
use voxcore::device::{Capture, CpalCapture, CpalPlayback, NullDevice, Playback};
use voxcore::frame::MAX_FRAME;

/// Join a voice-chat room server.
#[derive(Parser, Debug)]
#[command(name = "vox", version, about)]
struct Args {
    user_id: String,
    host: String,
    port: u16,

    #[arg(long, default_value_t = 1.0)]
    input_gain: f32,

    #[arg(long, default_value_t = 1.0)]
    output_gain: f32,

    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
}

fn open_playback() -> Box<dyn Playback> {
    match CpalPlayback::default_device() {
        Ok(mut device) => {
            if device.initialize(audio::SAMPLE_RATE, audio::CHANNELS).and_then(|_| device.start()).is_ok() {
                Box::new(device)
            } else {
                Box::new(NullDevice::new())
            }
        }
        Err(error) => {
            tracing::warn!(%error, "no playback device, using the null device");
            Box::new(NullDevice::new())
        }
    }
}

fn open_capture() -> Box<dyn Capture> {
    match CpalCapture::default_device() {
        Ok(mut device) => {
            if device.initialize(audio::SAMPLE_RATE, audio::CHANNELS).is_ok() {
                Box::new(device)
            } else {
                Box::new(NullDevice::new())
            }
        }
        Err(error) => {
            tracing::warn!(%error, "no capture device, using the null device");
            Box::new(NullDevice::new())
        }
    }
}

fn print_help() {
    println!("commands: join <room> | leave | mute | unmute | help | quit");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let timeout = Duration::from_millis(args.timeout_ms);

    let playback = open_playback();
    let client = match Client::connect(&args.host, args.port, args.user_id.clone(), timeout, MAX_FRAME, playback).await {
        Ok(client) => client,
        Err(error) => {
            tracing::error!(%error, host = %args.host, port = args.port, "failed to connect");
            std::process::exit(1);
        }
    };
    client.set_output_gain(args.output_gain);

    let mut capture = open_capture();
    capture.set_gain(args.input_gain);
    client.start_capture(capture.as_mut());
    let _ = capture.start();

    let unsolicited_client = client.clone();
    tokio::spawn(async move {
        while let Some(message) = unsolicited_client.next_unsolicited().await {
            println!("[server] {}", message.message);
        }
    });

    print_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let mut parts = line.splitn(2, ' ');
        match parts.next().unwrap_or("") {
            "join" => match parts.next().map(str::trim) {
                Some(room) if !room.is_empty() => match client.join(room, timeout).await {
                    Ok(response) => println!("{}", response.message),
                    Err(error) => println!("join failed: {error}"),
                },
                _ => println!("usage: join <room>"),
            },
            "leave" => match client.leave(timeout).await {
                Ok(response) => println!("{}", response.message),
                Err(error) => println!("leave failed: {error}"),
            },
            "mute" => {
                client.mute();
                println!("muted");
            }
            "unmute" => {
                client.unmute();
                println!("unmuted");
            }
            "help" => print_help(),
            "quit" => break,
            "" => {}
            other => println!("unknown command: {other} (try 'help')"),
        }
    }

    client.shutdown();
    Ok(())
}
