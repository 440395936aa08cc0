//! Wire frames between nodes: one JSON document per line over TCP.
//!
//! Two kinds of connections exist:
//! - convention: worker -> leader, `Announce` then `Welcome`, held open for
//!   as long as the worker is a member
//! - placement: coordinator -> worker node server, `Request`/`Reply` pairs
//!   for exactly one host actor, or a single `Shutdown`/`Ack`

use futures::{SinkExt, StreamExt};
use racetrack_types::{Capabilities, LifecycleReply, LifecycleRequest};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

use super::RuntimeError;

const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    Announce {
        capabilities: Capabilities,
        /// Where this node serves host placements.
        node_address: String,
    },
    Welcome {
        leader: String,
    },
    Request {
        request: LifecycleRequest,
    },
    Reply {
        reply: LifecycleReply,
    },
    Shutdown,
    Ack,
}

pub type FrameStream = Framed<TcpStream, LinesCodec>;

pub fn framed(stream: TcpStream) -> FrameStream {
    Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_BYTES))
}

pub async fn send_frame(conn: &mut FrameStream, frame: &Frame) -> Result<(), RuntimeError> {
    let line = serde_json::to_string(frame)?;
    conn.send(line)
        .await
        .map_err(|e| RuntimeError::Transport(e.to_string()))
}

/// Next frame, or `None` once the peer closed the connection.
pub async fn recv_frame(conn: &mut FrameStream) -> Result<Option<Frame>, RuntimeError> {
    match conn.next().await {
        Some(Ok(line)) => Ok(Some(serde_json::from_str(&line)?)),
        Some(Err(e)) => Err(RuntimeError::Transport(e.to_string())),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use racetrack_types::FailureKind;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_frames_cross_a_socket_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = framed(stream);
            let mut seen = Vec::new();
            while let Some(frame) = recv_frame(&mut conn).await.unwrap() {
                seen.push(frame);
            }
            seen
        });

        let mut client = framed(TcpStream::connect(addr).await.unwrap());
        send_frame(
            &mut client,
            &Frame::Request {
                request: LifecycleRequest::OnBenchmarkStart { lap: 1 },
            },
        )
        .await
        .unwrap();
        send_frame(
            &mut client,
            &Frame::Reply {
                reply: LifecycleReply::failure(FailureKind::Launch, "gone", "line one\nline two"),
            },
        )
        .await
        .unwrap();
        drop(client);

        let seen = server.await.unwrap();
        assert_eq!(seen.len(), 2);
        assert!(matches!(
            seen[0],
            Frame::Request {
                request: LifecycleRequest::OnBenchmarkStart { lap: 1 }
            }
        ));
        match &seen[1] {
            Frame::Reply {
                reply: LifecycleReply::Failure { cause, .. },
            } => assert_eq!(cause, "line one\nline two"),
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
