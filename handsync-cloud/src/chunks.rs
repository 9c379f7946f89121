//! Chunked file reading with pause checks between chunks.

use crate::error::SyncResult;
use crate::pause::PauseSignal;
use futures::Stream;
use handsync_crypto::{ContentDigest, Md5Hex};
use std::io::{self, SeekFrom};
use std::path::Path;
use std::pin::Pin;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

/// Digests a file chunk by chunk, checking `pause` after each chunk.
///
/// Returns the MD5 and the number of bytes read. Nothing is kept if the
/// pause interrupts; the next attempt starts again from the first byte.
pub async fn digest_file(
    path: &Path,
    chunk_size: usize,
    pause: &PauseSignal,
) -> SyncResult<(Md5Hex, u64)> {
    let mut file = File::open(path).await?;
    let mut digest = ContentDigest::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        digest.update(&buf[..read]);
        pause.check()?;
    }
    let bytes = digest.bytes_digested();
    let md5 = digest.finalize();
    debug!("digested {} ({bytes} bytes): {md5}", path.display());
    Ok((md5, bytes))
}

/// Body stream handed to the HTTP client.
pub type ChunkStream = Pin<Box<dyn Stream<Item = io::Result<Vec<u8>>> + Send + Sync>>;

struct ChunkReader {
    file: File,
    remaining: u64,
    chunk_size: usize,
    pause: PauseSignal,
    started: bool,
}

/// Streams `[offset, offset + len)` of `path` in `chunk_size` pieces.
///
/// Before every chunk after the first, the stream checks `pause` and ends
/// with an [`io::ErrorKind::Interrupted`] error if it is asserted. A file
/// shorter than requested ends with [`io::ErrorKind::UnexpectedEof`].
pub async fn file_range_stream(
    path: &Path,
    offset: u64,
    len: u64,
    chunk_size: usize,
    pause: PauseSignal,
) -> io::Result<ChunkStream> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let reader = ChunkReader {
        file,
        remaining: len,
        chunk_size: chunk_size.max(1),
        pause,
        started: false,
    };

    Ok(Box::pin(futures::stream::try_unfold(reader, |mut r| async move {
        if r.remaining == 0 {
            return Ok(None);
        }
        if r.started && r.pause.is_paused() {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "upload paused"));
        }
        r.started = true;
        let want = usize::try_from(r.remaining).map_or(r.chunk_size, |rem| rem.min(r.chunk_size));
        let mut buf = vec![0u8; want];
        r.file.read_exact(&mut buf).await?;
        r.remaining -= want as u64;
        Ok(Some((buf, r)))
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::io::Write;

    fn temp_file(data: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file
    }

    #[tokio::test]
    async fn digest_matches_one_shot() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let file = temp_file(&data);
        let (md5, bytes) = digest_file(file.path(), 333, &PauseSignal::new())
            .await
            .unwrap();
        assert_eq!(bytes, 10_000);
        assert_eq!(md5, ContentDigest::of(&data));
    }

    #[tokio::test]
    async fn digest_stops_when_paused() {
        let file = temp_file(&[7u8; 64]);
        let pause = PauseSignal::new();
        pause.pause();
        let err = digest_file(file.path(), 16, &pause).await.unwrap_err();
        assert!(err.is_paused());
    }

    #[tokio::test]
    async fn range_stream_yields_requested_bytes() {
        let data: Vec<u8> = (0..100u8).collect();
        let file = temp_file(&data);
        let stream = file_range_stream(file.path(), 10, 25, 8, PauseSignal::new())
            .await
            .unwrap();
        let chunks: Vec<Vec<u8>> = stream.try_collect().await.unwrap();
        assert_eq!(
            chunks.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![8, 8, 8, 1]
        );
        assert_eq!(chunks.concat(), data[10..35].to_vec());
    }

    #[tokio::test]
    async fn range_stream_interrupts_between_chunks() {
        let file = temp_file(&[1u8; 40]);
        let pause = PauseSignal::new();
        let mut stream = file_range_stream(file.path(), 0, 40, 10, pause.clone())
            .await
            .unwrap();
        assert_eq!(stream.try_next().await.unwrap().unwrap().len(), 10);
        pause.pause();
        let err = stream.try_next().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }

    #[tokio::test]
    async fn range_stream_reports_short_file() {
        let file = temp_file(&[1u8; 5]);
        let stream = file_range_stream(file.path(), 0, 10, 10, PauseSignal::new())
            .await
            .unwrap();
        let err = stream.try_collect::<Vec<_>>().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
