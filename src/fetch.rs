use crate::error::{PlayerError, PlayerResult};
use crate::model::{PlaybackLogEntry, Track};
use futures_util::future::BoxFuture;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

const MAX_BUFFER_SIZE: usize = 8 * 1024 * 1024; // 8MB back-pressure limit

/// Cancellation token for an in-flight fetch. Cancelling is idempotent and
/// never an error; a cancelled fetch's bytes are discarded, not applied.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Shared state between the download task and the sink-side reader.
struct StreamBuffer {
    /// Downloaded bytes (append-only from the writer side).
    data: Vec<u8>,
    /// Read cursor position.
    position: usize,
    /// Whether the download has completed.
    finished: bool,
    /// Whether the reader side released the buffer.
    released: bool,
    /// Download error, if any.
    error: Option<String>,
}

/// Adapter that makes an HTTP byte stream look like a seekable `Read` the
/// audio sink can consume. Downloaded bytes are retained so the sink can
/// seek backwards; `release()` frees them deterministically.
pub struct AudioStream {
    shared: Arc<(Mutex<StreamBuffer>, Condvar)>,
    /// Codec hint derived from the response content type, if known.
    pub codec_hint: Option<String>,
}

impl AudioStream {
    pub fn new(codec_hint: Option<String>) -> (Self, StreamWriter) {
        let shared = Arc::new((
            Mutex::new(StreamBuffer {
                data: Vec::with_capacity(1024 * 1024),
                position: 0,
                finished: false,
                released: false,
                error: None,
            }),
            Condvar::new(),
        ));

        let stream = Self {
            shared: Arc::clone(&shared),
            codec_hint,
        };
        let writer = StreamWriter { shared };

        (stream, writer)
    }

    /// Drop all buffered bytes and unblock both sides. Called when a slot is
    /// vacated or a load is superseded; safe to call more than once.
    pub fn release(&self) {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap();
        state.data = Vec::new();
        state.position = 0;
        state.released = true;
        state.finished = true;
        cvar.notify_all();
    }

    pub fn byte_len(&self) -> Option<u64> {
        let (lock, _) = &*self.shared;
        let state = lock.lock().unwrap();
        if state.finished && !state.released {
            Some(state.data.len() as u64)
        } else {
            None
        }
    }
}

impl Read for AudioStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap();
        loop {
            if let Some(err) = state.error.as_deref() {
                return Err(io::Error::other(err.to_string()));
            }
            let available = state.data.len().saturating_sub(state.position);
            if available > 0 {
                let n = available.min(buf.len());
                let start = state.position;
                buf[..n].copy_from_slice(&state.data[start..start + n]);
                state.position = start + n;
                // Unblock a writer parked on back-pressure.
                cvar.notify_all();
                return Ok(n);
            }
            if state.finished {
                return Ok(0);
            }
            state = cvar.wait(state).unwrap();
        }
    }
}

impl Seek for AudioStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (lock, _cvar) = &*self.shared;
        let mut state = lock.lock().unwrap();

        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(offset) => state.position as i128 + i128::from(offset),
            SeekFrom::End(offset) => state.data.len() as i128 + i128::from(offset),
        };
        // Seeking past the buffered end is allowed; the next read blocks
        // until the download catches up or finishes.
        let target = usize::try_from(target).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream")
        })?;

        state.position = target;
        Ok(target as u64)
    }
}

/// Writer end fed by the download task.
pub struct StreamWriter {
    shared: Arc<(Mutex<StreamBuffer>, Condvar)>,
}

impl StreamWriter {
    /// Returns `Err` once the reader side has released the buffer, so the
    /// download task can stop pumping bytes.
    pub fn write_bytes(&self, data: &[u8]) -> Result<(), ()> {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap();

        // Back-pressure: wait if we're too far ahead of the reader
        while (state.data.len() - state.position) >= MAX_BUFFER_SIZE
            && !state.finished
            && !state.released
        {
            state = cvar.wait(state).unwrap();
        }

        if state.released {
            return Err(());
        }
        if state.finished {
            return Ok(());
        }

        state.data.extend_from_slice(data);
        cvar.notify_all();
        Ok(())
    }

    pub fn finish(&self) {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap();
        state.finished = true;
        cvar.notify_all();
    }

    pub fn set_error(&self, error: String) {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap();
        state.error = Some(error);
        state.finished = true;
        cvar.notify_all();
    }
}

/// Resolves a track reference to a streamable audio resource. The engine
/// never retries internally; failures are reported upward.
pub trait ContentFetcher: Send + Sync {
    fn fetch_audio(
        &self,
        track: &Track,
        cancel: CancelToken,
    ) -> BoxFuture<'static, PlayerResult<AudioStream>>;
}

/// Receives playback-log ("scrobble") events. Calls are fire-and-forget;
/// failures never surface to the user or affect playback.
pub trait PlaybackLogger: Send + Sync {
    fn log_playback(&self, entry: PlaybackLogEntry) -> BoxFuture<'static, PlayerResult<()>>;
}

/// Clamp a string to at most `max_bytes`, backing up to the nearest char
/// boundary so multi-byte text never splits mid-character.
fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// `ContentFetcher` over HTTP: resolves the track locator, validates the
/// response, then pumps the body into an `AudioStream` on a background task.
pub struct HttpContentFetcher {
    client: reqwest::Client,
}

impl HttpContentFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn codec_from_content_type(content_type: &str) -> Option<String> {
        let subtype = content_type.split('/').nth(1)?.split(';').next()?.trim();
        match subtype {
            "flac" | "x-flac" => Some("flac".to_string()),
            "mpeg" | "mp3" => Some("mp3".to_string()),
            "mp4" | "aac" | "x-m4a" => Some("aac".to_string()),
            "ogg" => Some("ogg".to_string()),
            _ => None,
        }
    }
}

impl ContentFetcher for HttpContentFetcher {
    fn fetch_audio(
        &self,
        track: &Track,
        cancel: CancelToken,
    ) -> BoxFuture<'static, PlayerResult<AudioStream>> {
        let client = self.client.clone();
        let locator = track.locator.clone();
        let hash = track.hash.clone();

        Box::pin(async move {
            let url = url::Url::parse(&locator)
                .map_err(|e| PlayerError::Fetch(format!("Invalid content locator: {e}")))?;

            log::info!("Starting audio fetch for {hash}");
            let response = client.get(url).send().await?;
            let status = response.status();

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                log::error!(
                    "Audio fetch failed ({}): {}",
                    status,
                    truncate_utf8(&body, 500)
                );
                return Err(PlayerError::Fetch(format!("HTTP {status}")));
            }

            if cancel.is_cancelled() {
                return Err(PlayerError::Superseded);
            }

            let codec_hint = response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .and_then(Self::codec_from_content_type);

            let (stream, writer) = AudioStream::new(codec_hint);

            tokio::spawn(async move {
                use futures_util::StreamExt;
                let mut body = response.bytes_stream();
                let mut total_bytes = 0u64;
                while let Some(chunk) = body.next().await {
                    if cancel.is_cancelled() {
                        log::info!("Audio fetch cancelled after {total_bytes} bytes");
                        return;
                    }
                    match chunk {
                        Ok(bytes) => {
                            total_bytes += bytes.len() as u64;
                            if writer.write_bytes(&bytes).is_err() {
                                log::warn!("Audio fetch: reader released after {total_bytes} bytes");
                                return;
                            }
                        }
                        Err(e) => {
                            log::error!("Audio fetch stream error after {total_bytes} bytes: {e}");
                            writer.set_error(format!("Download error: {e}"));
                            return;
                        }
                    }
                }
                log::info!("Audio fetch complete: {total_bytes} bytes");
                writer.finish();
            });

            Ok(stream)
        })
    }
}

/// `PlaybackLogger` posting JSON records to a logging endpoint.
pub struct HttpPlaybackLogger {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl HttpPlaybackLogger {
    pub fn new(client: reqwest::Client, endpoint: url::Url) -> Self {
        Self { client, endpoint }
    }
}

impl PlaybackLogger for HttpPlaybackLogger {
    fn log_playback(&self, entry: PlaybackLogEntry) -> BoxFuture<'static, PlayerResult<()>> {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        Box::pin(async move {
            let response = client.post(endpoint).json(&entry).send().await?;
            if !response.status().is_success() {
                return Err(PlayerError::Fetch(format!(
                    "Playback log rejected: HTTP {}",
                    response.status()
                )));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_reads_written_bytes_and_seeks_back() {
        let (mut stream, writer) = AudioStream::new(None);
        writer.write_bytes(b"hello world").unwrap();
        writer.finish();

        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        stream.seek(SeekFrom::Start(6)).unwrap();
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"world");

        assert_eq!(stream.byte_len(), Some(11));
    }

    #[test]
    fn release_stops_the_writer() {
        let (stream, writer) = AudioStream::new(None);
        writer.write_bytes(b"abc").unwrap();
        stream.release();
        assert!(writer.write_bytes(b"def").is_err());
        assert_eq!(stream.byte_len(), None);
    }

    #[test]
    fn reader_sees_writer_error() {
        let (mut stream, writer) = AudioStream::new(None);
        writer.set_error("connection reset".to_string());
        let mut buf = [0u8; 4];
        assert!(stream.read(&mut buf).is_err());
    }

    #[test]
    fn seek_before_start_is_rejected() {
        let (mut stream, writer) = AudioStream::new(None);
        writer.write_bytes(b"abcd").unwrap();
        writer.finish();

        assert!(stream.seek(SeekFrom::Current(-1)).is_err());
        assert_eq!(stream.seek(SeekFrom::End(-2)).unwrap(), 2);
    }

    #[test]
    fn error_body_truncation_respects_char_boundaries() {
        // 3-byte chars; the 500-byte cut lands mid-character.
        let body = "€".repeat(200);
        let cut = truncate_utf8(&body, 500);
        assert_eq!(cut.len(), 498);
        assert!(body.starts_with(cut));

        assert_eq!(truncate_utf8("short", 500), "short");
    }

    #[test]
    fn cancel_token_is_idempotent() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn codec_hint_from_content_type() {
        assert_eq!(
            HttpContentFetcher::codec_from_content_type("audio/flac"),
            Some("flac".to_string())
        );
        assert_eq!(
            HttpContentFetcher::codec_from_content_type("audio/mpeg; charset=binary"),
            Some("mp3".to_string())
        );
        assert_eq!(
            HttpContentFetcher::codec_from_content_type("application/octet-stream"),
            None
        );
    }
}
