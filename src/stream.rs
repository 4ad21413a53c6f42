//! Server-pushed event stream, delivered into the app as an iced subscription.
//! The worker owns the connection loop: read SSE lines while the stream is
//! healthy, and when it closes, announce it and retry on a fixed backoff.

use iced::Subscription;
use iced::futures::{SinkExt, StreamExt};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::reconcile::ServerEvent;

pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Connected,
    Event(ServerEvent),
    Closed,
}

fn parse_sse_line(line: &str) -> Option<ServerEvent> {
    let payload = line.trim().strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_str(payload) {
        Ok(event) => Some(event),
        Err(error) => {
            warn!("undecodable event: {error}");
            None
        }
    }
}

pub fn subscribe() -> Subscription<StreamEvent> {
    Subscription::run(|| {
        iced::stream::channel(
            100,
            |mut output: iced::futures::channel::mpsc::Sender<StreamEvent>| async move {
                let config = Config::load().unwrap_or_default();
                let url = format!(
                    "{}/api/workspaces/{}/events",
                    config.server_url.trim_end_matches('/'),
                    config.workspace
                );
                let client = reqwest::Client::new();

                loop {
                    match client.get(&url).send().await {
                        Ok(response) if response.status().is_success() => {
                            info!("event stream connected");
                            let _ = output.send(StreamEvent::Connected).await;

                            let mut buffer = String::new();
                            let mut body = response.bytes_stream();
                            while let Some(chunk) = body.next().await {
                                match chunk {
                                    Ok(bytes) => {
                                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                                        while let Some(newline) = buffer.find('\n') {
                                            let line: String = buffer.drain(..=newline).collect();
                                            if let Some(event) = parse_sse_line(&line) {
                                                let _ =
                                                    output.send(StreamEvent::Event(event)).await;
                                            }
                                        }
                                    }
                                    Err(error) => {
                                        warn!("event stream error: {error}");
                                        break;
                                    }
                                }
                            }
                        }
                        Ok(response) => {
                            warn!("event stream returned {}", response.status());
                        }
                        Err(error) => {
                            warn!("event stream connect failed: {error}");
                        }
                    }

                    // Only reached once the stream is closed; a healthy stream
                    // never schedules a reconnect.
                    let _ = output.send(StreamEvent::Closed).await;
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            },
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_lines_decode_into_events() {
        let event = parse_sse_line(r#"data: {"type":"task_started","task_id":"t1"}"#);
        assert!(matches!(
            event,
            Some(ServerEvent::TaskStarted { task_id }) if task_id == "t1"
        ));
    }

    #[test]
    fn non_data_lines_are_skipped() {
        assert!(parse_sse_line(": keep-alive").is_none());
        assert!(parse_sse_line("event: update").is_none());
        assert!(parse_sse_line("data:").is_none());
        assert!(parse_sse_line("data: not json").is_none());
    }
}
