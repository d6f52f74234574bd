//! RTMP player example
//!
//! Run with: cargo run --example player -- rtmp://localhost/live/test_key
//!
//! Connects, plays the stream named by the last path segment and prints
//! frames as the playout scheduler presents them.

use rtmp_play::client::{ClientConfig, ConnectionEvent, ParsedUrl, RtmpClient};
use rtmp_play::media::{MediaKind, MediaPacket};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_play=debug".parse()?)
                .add_directive("player=info".parse()?),
        )
        .init();

    let url = std::env::args().nth(1).unwrap_or_else(|| {
        eprintln!("Usage: player <rtmp_url>");
        eprintln!("Example: player rtmp://localhost/live/test_key");
        std::process::exit(1);
    });

    let stream_name = ParsedUrl::parse(&url)?.instance.unwrap_or_default();
    println!("Connecting to {}", url);

    let (client, mut events) = RtmpClient::connect(ClientConfig::new(&url)).await?;

    let mut video_frames = 0u64;
    let mut audio_frames = 0u64;
    let mut keyframes = 0u64;

    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Connected => {
                println!("Connected!");
                client.create_stream().await?;
            }
            ConnectionEvent::StreamCreated { stream, stream_id } => {
                println!("Stream {} created, playing {:?}", stream_id, stream_name);
                client.play(stream, &stream_name, -2.0).await?;
            }
            ConnectionEvent::Status { info, .. } => {
                println!("Status: {} ({})", info.code, info.description);
            }
            ConnectionEvent::Call { name, args, .. } => {
                if name == "onMetaData" {
                    println!("Metadata received:");
                    if let Some(meta) = args.first() {
                        for key in ["width", "height", "framerate", "duration"] {
                            if let Some(value) = meta.get(key) {
                                println!("  {}: {:?}", key, value);
                            }
                        }
                    }
                }
            }
            ConnectionEvent::Frame { frame, .. } => match frame.kind {
                MediaKind::Video => {
                    video_frames += 1;
                    let packet = MediaPacket::new(frame.kind, frame.timestamp, frame.data);
                    if packet.is_keyframe() {
                        keyframes += 1;
                        println!("  Keyframe at {} ({})", frame.timestamp, frame.codec);
                    }
                    if video_frames % 100 == 0 {
                        println!(
                            "Progress: {} video, {} audio, {} keyframes",
                            video_frames, audio_frames, keyframes
                        );
                    }
                }
                MediaKind::Audio => audio_frames += 1,
            },
            ConnectionEvent::PlaybackStarted { kind, .. } => println!("{} playout started", kind),
            ConnectionEvent::PlaybackStopped { kind, .. } => println!("{} playout buffer drained", kind),
            ConnectionEvent::StreamEvent { event, .. } => println!("Stream event: {}", event.name()),
            ConnectionEvent::Closed { error } => {
                match error {
                    Some(e) => eprintln!("Disconnected: {}", e),
                    None => println!("Disconnected"),
                }
                break;
            }
        }
    }

    println!(
        "Final stats: {} video, {} audio, {} keyframes",
        video_frames, audio_frames, keyframes
    );

    Ok(())
}
