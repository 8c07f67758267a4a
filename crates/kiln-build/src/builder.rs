use crate::backend::Transcript;
use crate::context::ContextBuilder;
use crate::error::{BuildError, BuildResult};
use bollard::Docker;
use colored::Colorize;
use futures_util::stream::StreamExt;
use http_body_util::{Either, StreamBody};
use std::collections::HashMap;
use std::path::Path;

pub struct ImageBuilder {
    docker: Docker,
}

impl ImageBuilder {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// コンテキストディレクトリからイメージをビルド
    ///
    /// コンテキストは tar.gz に圧縮しながらそのまま Docker に流す。
    pub async fn build_image(
        &self,
        context_path: &Path,
        tag: &str,
        build_args: &HashMap<String, String>,
        transcript: &mut Transcript,
    ) -> BuildResult<()> {
        tracing::info!("Building image: {}", tag);

        let build_args_refs: HashMap<&str, &str> = build_args
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        #[allow(deprecated)]
        let options = bollard::image::BuildImageOptions {
            dockerfile: "Dockerfile",
            t: tag,
            buildargs: build_args_refs,
            rm: true,      // 中間コンテナを削除
            forcerm: true, // ビルド失敗時も中間コンテナを削除
            pull: true,    // ベースイメージを常にpull
            ..Default::default()
        };
        tracing::debug!("Build options: {:?}", options);

        let (body, writer) = ContextBuilder::stream_context(context_path);
        #[allow(deprecated)]
        let mut stream =
            self.docker
                .build_image(options, None, Some(Either::Right(StreamBody::new(body))));

        let mut outcome = Ok(());
        while let Some(msg) = stream.next().await {
            let step = match msg {
                Ok(output) => Self::handle_build_output(output, transcript),
                Err(e) => Err(BuildError::DockerConnection(e)),
            };
            if let Err(e) = step {
                outcome = Err(e);
                break;
            }
        }
        drop(stream);

        // コンテキストの書き込み自体が失敗していればそれが原因。
        // BrokenPipe は Docker 側が先に切った結果なので Docker のエラーを優先する
        let written = writer
            .await
            .unwrap_or_else(|join| Err(std::io::Error::other(join)));
        match written {
            Ok(bytes) => {
                outcome?;
                tracing::debug!("Sent {} bytes of build context", bytes);
            }
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                outcome?;
                return Err(BuildError::Context(e));
            }
            Err(e) => return Err(BuildError::Context(e)),
        }

        tracing::info!("Successfully built: {}", tag);
        Ok(())
    }

    /// ビルド出力の処理
    fn handle_build_output(
        output: bollard::models::BuildInfo,
        transcript: &mut Transcript,
    ) -> BuildResult<()> {
        if let Some(stream) = output.stream {
            transcript.append(&stream);
        }

        if let Some(error) = output.error {
            return Err(BuildError::BuildFailed(error));
        }

        if let Some(error_detail) = output.error_detail {
            let error_msg = error_detail
                .message
                .unwrap_or_else(|| "Unknown build error".to_string());
            return Err(BuildError::BuildFailed(error_msg));
        }

        if let Some(status) = output.status {
            transcript.line(&status.cyan().to_string());
        }

        Ok(())
    }
}
