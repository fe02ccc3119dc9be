use crate::config::ChildOutput;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, warn};

type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Unpin + Sync + Send>>>;

/// Destination of the child's merged stdout and stderr
#[derive(Clone)]
pub struct OutputSink(SharedWriter);

impl OutputSink {
    pub fn new(t: Box<dyn AsyncWrite + Unpin + Sync + Send>) -> OutputSink {
        OutputSink(Arc::new(Mutex::new(t)))
    }

    /// Sink matching the configured output mode
    pub fn for_mode(mode: ChildOutput) -> OutputSink {
        match mode {
            ChildOutput::Forward => OutputSink::new(Box::new(tokio::io::stderr())),
            ChildOutput::Discard => OutputSink::new(Box::new(tokio::io::sink())),
        }
    }

    pub async fn write(&self, text: &str) -> tokio::io::Result<()> {
        let mut lock = self.0.lock().await;
        lock.write_all(text.as_bytes()).await?;
        lock.flush().await
    }
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink").finish_non_exhaustive()
    }
}

/// Background tasks copying a child's pipes into an [`OutputSink`]
#[derive(Debug, Default)]
pub struct OutputPumps {
    tasks: Vec<JoinHandle<tokio::io::Result<u64>>>,
}

impl OutputPumps {
    /// Take the child's stdout/stderr pipes and start draining them
    pub fn attach(child: &mut Child, sink: OutputSink) -> Self {
        let mut tasks = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            tasks.push(tokio::spawn(stream(stdout, sink.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            tasks.push(tokio::spawn(stream(stderr, sink)));
        }
        Self { tasks }
    }

    /// Wait for the pumps to hit EOF, abandoning them after `grace`.
    ///
    /// A grandchild can inherit the pipes and keep them open past the
    /// child's exit, so this never blocks indefinitely.
    pub async fn finish(self, grace: Duration) -> u64 {
        let mut total = 0;
        for mut task in self.tasks {
            match tokio::time::timeout(grace, &mut task).await {
                Ok(Ok(Ok(bytes))) => total += bytes,
                Ok(Ok(Err(e))) => warn!(error = %e, "Child output pump failed"),
                Ok(Err(e)) => warn!(error = %e, "Child output pump panicked"),
                Err(_) => {
                    debug!("Child output still open after {:?}, detaching", grace);
                    task.abort();
                }
            }
        }
        total
    }
}

struct Utf8Codec;

impl Decoder for Utf8Codec {
    type Item = String;
    type Error = tokio::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        match std::str::from_utf8(src) {
            Ok(s) => {
                let out = s.to_owned();
                src.clear();
                Ok(Some(out))
            }
            // Incomplete multi-byte sequence at the end: emit the valid prefix, keep the rest
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();

                if valid == 0 {
                    return Ok(None);
                }

                let out = String::from_utf8_lossy(&src[..valid]).into_owned();
                src.advance(valid);
                Ok(Some(out))
            }
            // Invalid bytes: replace them rather than dropping the child's log line
            Err(_) => {
                let out = String::from_utf8_lossy(src).into_owned();
                src.clear();
                Ok(Some(out))
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let out = String::from_utf8_lossy(src).into_owned();
        src.clear();
        Ok(Some(out))
    }
}

/// Copy `io` into `out` until EOF, returning the number of bytes forwarded
pub async fn stream<A: AsyncRead + Unpin>(io: A, out: OutputSink) -> tokio::io::Result<u64> {
    let mut frames = FramedRead::with_capacity(io, Utf8Codec, 1024);
    let mut total = 0u64;

    while let Some(frame) = frames.next().await {
        let text = frame?;
        total += text.len() as u64;
        out.write(&text).await?;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_codec_holds_back_split_character() {
        let mut codec = Utf8Codec;
        // "hé" where é (0xC3 0xA9) is split across two reads
        let mut buf = BytesMut::from(&b"h\xC3"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("h"));
        assert_eq!(&buf[..], b"\xC3");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"\xA9!");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("é!"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_replaces_invalid_bytes() {
        let mut codec = Utf8Codec;
        let mut buf = BytesMut::from(&b"ok\xFFok"[..]);

        let out = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(out, "ok\u{FFFD}ok");
    }

    #[test]
    fn test_codec_flushes_truncated_tail_at_eof() {
        let mut codec = Utf8Codec;
        let mut buf = BytesMut::from(&b"\xC3"[..]);

        assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("\u{FFFD}"));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_stream_forwards_everything() {
        let (writer, mut reader) = tokio::io::duplex(64 * 1024);
        let sink = OutputSink::new(Box::new(writer));

        let input: &[u8] = b"loading weights\nserver listening\n";
        let forwarded = stream(input, sink).await.unwrap();
        assert_eq!(forwarded, input.len() as u64);

        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "loading weights\nserver listening\n");
    }
}
