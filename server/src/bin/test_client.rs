//! Headless smoke-test client: announces a random color, wanders in a
//! circle, and prints the roster frames it gets back.

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use shared::{decode_roster, encode_delta, encode_identity, PlayerColor, Vec2, DEFAULT_PORT};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("ws://127.0.0.1:{}", DEFAULT_PORT);
    println!("Connecting to {}", url);
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    let (mut sink, mut source) = ws_stream.split();

    // First payload must be the identity announcement
    let mut rng = rand::thread_rng();
    let color = PlayerColor::opaque(rng.gen(), rng.gen(), rng.gen());
    println!("Announcing color ({}, {}, {})", color.r, color.g, color.b);
    sink.send(Message::Binary(encode_identity(color).to_vec()))
        .await?;

    for i in 0..100 {
        let angle = i as f32 / 5.0;
        let delta = Vec2::new(angle.sin() * 4.0, angle.cos() * 4.0);
        sink.send(Message::Binary(encode_delta(delta).to_vec()))
            .await?;

        // Print whatever roster frames have piled up since the last step
        while let Ok(Some(message)) = timeout(Duration::from_millis(5), source.next()).await {
            match message {
                Ok(Message::Binary(payload)) => match decode_roster(&payload) {
                    Ok(entries) => {
                        if let Some(first) = entries.first() {
                            println!(
                                "Roster: {} players, first at ({:.1}, {:.1})",
                                entries.len(),
                                first.position.x,
                                first.position.y
                            );
                        }
                    }
                    Err(e) => println!("Bad roster frame: {}", e),
                },
                Ok(Message::Close(_)) => {
                    println!("Server closed the connection");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => {
                    println!("Read error: {}", e);
                    return Ok(());
                }
            }
        }

        sleep(Duration::from_millis(50)).await;
    }

    sink.send(Message::Close(None)).await?;
    println!("Test client finished");
    Ok(())
}
