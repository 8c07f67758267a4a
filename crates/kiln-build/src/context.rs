//! ビルドコンテキストの tar.gz ストリーム生成
//!
//! コンテキスト全体をメモリに載せず、ブロッキングスレッドで圧縮しながら
//! チャネル経由で Docker に流し込む。

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use futures_util::stream::{self, Stream};
use http_body::Frame;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Docker に渡すコンテキストのストリーム
///
/// 書き込み側の失敗は最後の要素として `Err` で流れる。
pub type ContextStream = Pin<Box<dyn Stream<Item = io::Result<Frame<Bytes>>> + Send>>;

const CHANNEL_DEPTH: usize = 16;
const CHUNK_SIZE: usize = 64 * 1024;

/// コンテキストサイズ警告の閾値
const MAX_CONTEXT_SIZE: u64 = 500 * 1024 * 1024;

pub struct ContextBuilder;

impl ContextBuilder {
    /// ディレクトリを tar.gz として流すストリームと、書き込みタスクを返す
    ///
    /// タスクの戻り値は圧縮後のバイト数。受信側が途中で落ちた場合は
    /// `BrokenPipe` で終わる。
    pub fn stream_context(context_path: &Path) -> (ContextStream, JoinHandle<io::Result<u64>>) {
        tracing::debug!("Streaming build context from: {}", context_path.display());

        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_DEPTH);
        let root: PathBuf = context_path.to_path_buf();

        let writer = tokio::task::spawn_blocking(move || -> io::Result<u64> {
            let error_tx = tx.clone();
            let result = Self::write_archive(&root, tx);
            if let Err(e) = &result {
                // 受信側が既に居なければ送れないので無視する
                if e.kind() != io::ErrorKind::BrokenPipe {
                    let _ = error_tx.blocking_send(Err(io::Error::new(e.kind(), e.to_string())));
                }
            }
            result
        });

        let body = stream::unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|chunk| (chunk.map(Frame::data), rx))
        });

        (Box::pin(body), writer)
    }

    fn write_archive(root: &Path, tx: mpsc::Sender<io::Result<Bytes>>) -> io::Result<u64> {
        let sink = ChannelWriter { tx, written: 0 };
        let buffered = BufWriter::with_capacity(CHUNK_SIZE, sink);
        let encoder = GzEncoder::new(buffered, Compression::default());
        let mut tar = tar::Builder::new(encoder);
        tar.append_dir_all(".", root)?;

        let mut buffered = tar.into_inner()?.finish()?;
        buffered.flush()?;
        let sink = buffered.into_inner().map_err(|e| e.into_error())?;

        tracing::debug!("Build context streamed: {} bytes", sink.written);
        Self::check_context_size(sink.written);
        Ok(sink.written)
    }

    /// コンテキストサイズのチェックと警告
    fn check_context_size(size: u64) {
        if size > MAX_CONTEXT_SIZE {
            tracing::warn!(
                "警告: ビルドコンテキストが大きすぎます（{}MB）\n\
                 .dockerignoreファイルで不要なファイルを除外することを推奨します。",
                size / 1024 / 1024
            );
        }
    }
}

/// 書き込まれたバイト列をチャネルへ送る
struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    written: u64,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| {
                io::Error::new(io::ErrorKind::BrokenPipe, "build context receiver closed")
            })?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::fs;
    use tempfile::tempdir;

    async fn collect(mut stream: ContextStream) -> Vec<u8> {
        let mut data = Vec::new();
        while let Some(Ok(frame)) = stream.next().await {
            if let Ok(chunk) = frame.into_data() {
                data.extend_from_slice(&chunk);
            }
        }
        data
    }

    #[tokio::test]
    async fn test_stream_context() {
        let temp_dir = tempdir().unwrap();
        fs::write(
            temp_dir.path().join("Dockerfile"),
            "FROM alpine\nCOPY containerssh /",
        )
        .unwrap();
        fs::write(temp_dir.path().join("containerssh"), "binary").unwrap();
        let subdir = temp_dir.path().join("conf");
        fs::create_dir(&subdir).unwrap();
        fs::write(subdir.join("config.yaml"), "log: {}").unwrap();

        let (stream, writer) = ContextBuilder::stream_context(temp_dir.path());
        let data = collect(stream).await;
        let written = writer.await.unwrap().unwrap();
        assert_eq!(written, data.len() as u64);

        let extract_dir = tempdir().unwrap();
        let decoder = flate2::read::GzDecoder::new(std::io::Cursor::new(data));
        tar::Archive::new(decoder).unpack(extract_dir.path()).unwrap();

        assert!(extract_dir.path().join("Dockerfile").exists());
        assert_eq!(
            fs::read_to_string(extract_dir.path().join("conf/config.yaml")).unwrap(),
            "log: {}"
        );
    }

    #[tokio::test]
    async fn test_missing_context_directory_fails_writer() {
        let temp_dir = tempdir().unwrap();
        let (mut stream, writer) = ContextBuilder::stream_context(&temp_dir.path().join("absent"));

        // ボディ自体もエラーで終わる
        let mut failure = None;
        while let Some(item) = stream.next().await {
            if let Err(e) = item {
                failure = Some(e);
            }
        }
        let failure = failure.expect("stream should end with an error");
        assert_eq!(failure.kind(), io::ErrorKind::NotFound);

        let err = writer.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_dropped_receiver_stops_writer() {
        let temp_dir = tempdir().unwrap();
        // 圧縮されにくいデータでチャネルを溢れさせる
        let mut state = 0x2545_f491_4f6c_dd1du64;
        let payload: Vec<u8> = (0..4 * 1024 * 1024)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 24) as u8
            })
            .collect();
        fs::write(temp_dir.path().join("blob"), payload).unwrap();

        let (stream, writer) = ContextBuilder::stream_context(temp_dir.path());
        drop(stream);

        let err = writer.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
