//! Log every event delivered to a Stasis application
//!
//! Answers channels entering the application and hangs them up on DTMF `#`.
//!
//! Usage: cargo run --example event_listener -- [host] [application]

use asterisk_ari_tokio::{AriClient, AriConnectOptions, Method, StreamState};
use std::time::Duration;
use tracing::{error, info, warn};

const EVENT_TYPES: &[&str] = &[
    "StasisStart",
    "StasisEnd",
    "ChannelStateChange",
    "ChannelDtmfReceived",
    "ChannelDestroyed",
    "BridgeCreated",
    "BridgeDestroyed",
    "DeviceStateChanged",
];

fn channel_id(event: &asterisk_ari_tokio::AriEvent) -> Option<String> {
    event
        .get_path(&["channel", "id"])
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let mut options = AriConnectOptions::default();
    if let Some(host) = args.next() {
        options.host = host;
    }
    if let Some(application) = args.next() {
        options.application = application;
    }

    let client = AriClient::new(options);

    for event_type in EVENT_TYPES {
        client.on_event(*event_type, |event| {
            info!(
                "{} channel={:?} at {:?}",
                event.event_type(),
                channel_id(event),
                event.timestamp()
            );
            Ok(())
        });
    }

    let commands = client.commands();
    client.on_event("StasisStart", move |event| {
        let id = channel_id(event).ok_or("StasisStart without channel")?;
        commands.submit_with(Method::Post, format!("/ari/channels/{}/answer", id), "", move |result| {
            if let Err(e) = result {
                warn!("Answer failed: {}", e);
            }
        });
        Ok(())
    });

    let commands = client.commands();
    client.on_event("ChannelDtmfReceived", move |event| {
        if event.get_str("digit") == Some("#") {
            let id = channel_id(event).ok_or("DTMF without channel")?;
            commands.submit_with(Method::Delete, format!("/ari/channels/{}", id), "", |_| {});
        }
        Ok(())
    });

    if let Err(e) = client.connect(Duration::from_secs(5)).await {
        error!("Connection error: {}", e);
        return Err(e.into());
    }
    info!("Connected");

    let mut state = client.subscribe_state();
    state
        .wait_for(|s| *s != StreamState::Connected)
        .await?;
    warn!("Event stream is {}", client.stream_state());

    client.close();
    Ok(())
}
