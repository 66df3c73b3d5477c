use artifact_plugin_tonic_core::proto::OpenStreamResponse;
use bytes::{BufMut, BytesMut};
use std::io;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
};
use tonic::Status;

/// Size of every data message except possibly the last.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Totals for a stream that reached its end marker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub bytes: u64,
    pub chunks: u64,
}

#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    /// The receiving side went away. Nothing more is sent.
    #[error("client went away after {bytes} bytes")]
    Cancelled { bytes: u64 },

    /// The source failed. The client has been sent an error in place of the
    /// end marker.
    #[error("read failed after {bytes} bytes: {source}")]
    Read {
        bytes: u64,
        #[source]
        source: io::Error,
    },
}

/// Reads `source` in `chunk_size` pieces and forwards each non-empty piece as
/// a data message, followed by exactly one end marker once the source is
/// exhausted.
///
/// A chunk is sent when the buffer is full or the source reports
/// end-of-data, so every data message but the last carries exactly
/// `chunk_size` bytes. Interrupted reads are retried.
///
/// On a read failure an `Internal` status is sent instead of the end marker.
/// When the receiver is dropped, reading stops at once. `source` is dropped
/// on every exit path.
///
/// # Panics
///
/// If `chunk_size` is zero.
pub async fn encode_stream<R>(
    mut source: R,
    tx: mpsc::Sender<Result<OpenStreamResponse, Status>>,
    chunk_size: usize,
) -> Result<StreamSummary, StreamError>
where
    R: AsyncRead + Unpin,
{
    assert!(chunk_size > 0, "chunk size must be positive");

    let mut summary = StreamSummary::default();
    let mut buf = BytesMut::with_capacity(chunk_size);

    loop {
        let mut eof = false;
        while buf.len() < chunk_size {
            let remaining = chunk_size - buf.len();
            let mut limited = (&mut buf).limit(remaining);
            let read = tokio::select! {
                biased;
                () = tx.closed() => {
                    return Err(StreamError::Cancelled { bytes: summary.bytes });
                }
                read = source.read_buf(&mut limited) => read,
            };
            match read {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    let status = Status::internal(format!(
                        "failed to read artifact stream after {} bytes: {e}",
                        summary.bytes + buf.len() as u64
                    ));
                    if tx.send(Err(status)).await.is_err() {
                        tracing::debug!("Client gone before read error could be reported");
                    }
                    return Err(StreamError::Read {
                        bytes: summary.bytes,
                        source: e,
                    });
                }
            }
        }

        if !buf.is_empty() {
            let data = buf.split().freeze();
            let len = data.len() as u64;
            if tx.send(Ok(OpenStreamResponse::chunk(data))).await.is_err() {
                return Err(StreamError::Cancelled { bytes: summary.bytes });
            }
            summary.bytes += len;
            summary.chunks += 1;
            buf.reserve(chunk_size);
        }

        if eof {
            if tx.send(Ok(OpenStreamResponse::end())).await.is_err() {
                return Err(StreamError::Cancelled { bytes: summary.bytes });
            }
            return Ok(summary);
        }
    }
}
