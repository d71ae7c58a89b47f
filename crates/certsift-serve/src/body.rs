//! Streaming JSON array responses.
//!
//! The three list endpoints share one shape: a channel of row chunks turned
//! into a chunked `application/json` array body. The status line and headers
//! go out immediately; elements follow as store pages arrive, so the full
//! result set is never buffered.

use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::response::Response;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Build a streamed JSON array response from row chunks.
///
/// `first` is the chunk the handler fetched before committing to a 200 (a
/// store failure on the first page can still become a 500); `rest` delivers
/// the remaining chunks. A store error mid-stream can only be logged and
/// the array closed early, since the status line is long gone.
pub fn json_array_response<T, E>(
    first: Option<Vec<T>>,
    mut rest: mpsc::Receiver<Result<Vec<T>, E>>,
) -> Response
where
    T: Serialize + Send + Sync + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(4);

    tokio::spawn(async move {
        let mut first_item = true;

        if tx.send(Ok(Bytes::from_static(b"["))).await.is_err() {
            return;
        }

        if let Some(chunk) = first {
            if send_chunk(&tx, &chunk, &mut first_item).await.is_err() {
                return;
            }
        }

        while let Some(next) = rest.recv().await {
            match next {
                Ok(chunk) => {
                    if send_chunk(&tx, &chunk, &mut first_item).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "store error mid-stream, truncating response");
                    break;
                }
            }
        }

        let _ = tx.send(Ok(Bytes::from_static(b"]"))).await;
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .expect("static response parts are valid")
}

/// Serialize one chunk and hand it to the body channel.
///
/// Errors mean the client went away or an element failed to serialize;
/// either way the stream is over.
async fn send_chunk<T: Serialize>(
    tx: &mpsc::Sender<Result<Bytes, Infallible>>,
    chunk: &[T],
    first_item: &mut bool,
) -> Result<(), ()> {
    if chunk.is_empty() {
        return Ok(());
    }

    let mut buf = Vec::new();
    for item in chunk {
        if *first_item {
            *first_item = false;
        } else {
            buf.push(b',');
        }
        match serde_json::to_vec(item) {
            Ok(json) => buf.extend_from_slice(&json),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize response element");
                return Err(());
            }
        }
    }

    tx.send(Ok(Bytes::from(buf))).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn collect(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn chunks_assemble_into_one_array() {
        let (tx, rx) = mpsc::channel::<Result<Vec<u32>, rusqlite::Error>>(4);
        tx.send(Ok(vec![3, 4])).await.unwrap();
        tx.send(Ok(vec![5])).await.unwrap();
        drop(tx);

        let response = json_array_response(Some(vec![1, 2]), rx);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(collect(response).await, "[1,2,3,4,5]");
    }

    #[tokio::test]
    async fn empty_result_is_an_empty_array() {
        let (tx, rx) = mpsc::channel::<Result<Vec<String>, rusqlite::Error>>(1);
        drop(tx);

        let response = json_array_response(None, rx);
        assert_eq!(collect(response).await, "[]");
    }

    #[tokio::test]
    async fn mid_stream_error_closes_the_array() {
        let (tx, rx) = mpsc::channel::<Result<Vec<u32>, rusqlite::Error>>(4);
        tx.send(Ok(vec![1])).await.unwrap();
        tx.send(Err(rusqlite::Error::QueryReturnedNoRows)).await.unwrap();
        drop(tx);

        let response = json_array_response(None, rx);
        assert_eq!(collect(response).await, "[1]");
    }
}
