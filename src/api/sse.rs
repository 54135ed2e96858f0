//! Server-Sent Events support

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

/// Convert relayed text increments into an SSE stream, one `data:` frame each.
/// A `: ping` comment goes out after 15 idle seconds so proxies keep the
/// connection open while the provider is slow.
pub fn sse_stream(
    frames: mpsc::Receiver<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = ReceiverStream::new(frames).map(|text| Ok(text_event(&text)));

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn text_event(text: &str) -> Event {
    // SSE fields may not carry carriage returns; a bare newline becomes an
    // extra `data:` line, which clients rejoin with '\n'
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    Event::default().data(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    async fn render(frames: &[&str]) -> String {
        let (tx, rx) = mpsc::channel(frames.len().max(1));
        for frame in frames {
            tx.send((*frame).to_string()).await.unwrap();
        }
        drop(tx);

        let response = sse_stream(rx).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_one_frame_per_increment() {
        let body = render(&["Hel", "lo", " world"]).await;
        assert_eq!(body, "data: Hel\n\ndata: lo\n\ndata:  world\n\n");
    }

    #[tokio::test]
    async fn test_line_breaks_become_data_lines() {
        let body = render(&["a\r\nb\rc"]).await;
        assert_eq!(body, "data: a\ndata: b\ndata: c\n\n");
    }
}
