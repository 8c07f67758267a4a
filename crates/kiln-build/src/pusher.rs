//! イメージプッシュ処理
//!
//! ビルドしたイメージをコンテナレジストリにプッシュします。

use crate::auth::Credentials;
use crate::backend::Transcript;
use crate::error::{BuildError, BuildResult};
use bollard::Docker;
use bollard::models::PushImageInfo;
use colored::Colorize;
use futures_util::StreamExt;

/// イメージプッシュを実行するハンドラ
pub struct ImagePusher {
    docker: Docker,
}

impl ImagePusher {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// イメージをレジストリにプッシュ
    ///
    /// `image_reference` はレジストリとタグを含む完全な参照。
    /// 認証情報は呼び出し側で解決済みのものを渡す。
    pub async fn push(
        &self,
        image_reference: &str,
        credentials: &Credentials,
        transcript: &mut Transcript,
    ) -> BuildResult<()> {
        let (image, tag) = split_image_tag(image_reference);
        validate_tag(&tag)?;

        #[allow(deprecated)]
        let options = bollard::image::PushImageOptions::<String> { tag: tag.clone() };

        tracing::info!("Pushing image: {}", image_reference);
        transcript.line(&format!("  → {}", image_reference.cyan()));

        #[allow(deprecated)]
        let mut stream = self.docker.push_image(
            &image,
            Some(options),
            Some(credentials.to_docker_credentials()),
        );

        let mut last_status = String::new();
        let mut error_message: Option<String> = None;

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(err) = info.error {
                        error_message = Some(err);
                    } else {
                        handle_progress(&info, &mut last_status, transcript);
                    }
                }
                Err(e) => {
                    return Err(BuildError::PushFailed {
                        message: e.to_string(),
                    });
                }
            }
        }

        if let Some(err) = error_message {
            return Err(BuildError::PushFailed { message: err });
        }

        tracing::info!("Pushed: {}", image_reference);
        Ok(())
    }
}

/// タグのバリデーション
///
/// Docker タグの制約:
/// - 128文字以下
/// - 英数字、ピリオド、ハイフン、アンダースコアのみ
/// - 先頭はピリオドまたはハイフンではない
fn validate_tag(tag: &str) -> BuildResult<()> {
    if tag.is_empty() {
        return Err(BuildError::InvalidTag {
            tag: "(empty)".to_string(),
        });
    }

    if tag.len() > 128 {
        return Err(BuildError::InvalidTag {
            tag: format!("Tag too long ({} characters, max 128)", tag.len()),
        });
    }

    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(BuildError::InvalidTag {
            tag: tag.to_string(),
        });
    }

    if let Some(c) = tag
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '.' | '-' | '_'))
    {
        return Err(BuildError::InvalidTag {
            tag: format!("Invalid character '{}' in tag: {}", c, tag),
        });
    }

    Ok(())
}

/// プッシュ進捗をレポートに記録
///
/// 層ごとの途中経過は捨て、完了した層と状態の変化だけを残す。
fn handle_progress(info: &PushImageInfo, last_status: &mut String, transcript: &mut Transcript) {
    let Some(status) = &info.status else {
        return;
    };

    match status.as_str() {
        "Pushed" => transcript.line(&format!("  {} Pushed", "✓".green())),
        "Layer already exists" => {
            transcript.line(&format!("  {} Layer already exists", "✓".green()))
        }
        "Pushing" | "Preparing" | "Waiting" => {}
        _ => {
            if status != last_status {
                transcript.line(&format!("  ℹ {}", status));
                *last_status = status.clone();
            }
        }
    }
}

/// イメージ名とタグを分離
///
/// # Examples
/// - `ghcr.io/org/app:v1.0` -> `("ghcr.io/org/app", "v1.0")`
/// - `ghcr.io/org/app` -> `("ghcr.io/org/app", "latest")`
/// - `localhost:5000/app:dev` -> `("localhost:5000/app", "dev")`
pub fn split_image_tag(image: &str) -> (String, String) {
    if let Some(pos) = image.rfind(':') {
        let potential_tag = &image[pos + 1..];
        let potential_image = &image[..pos];

        // ポート番号は / を含まない純粋な数字
        if !potential_tag.contains('/') && !potential_tag.chars().all(|c| c.is_ascii_digit()) {
            return (potential_image.to_string(), potential_tag.to_string());
        }
    }

    (image.to_string(), "latest".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::OutputMode;

    #[test]
    fn test_split_image_tag_with_tag() {
        let (image, tag) = split_image_tag("ghcr.io/containerssh/containerssh:0.4.1-20240101");
        assert_eq!(image, "ghcr.io/containerssh/containerssh");
        assert_eq!(tag, "0.4.1-20240101");
    }

    #[test]
    fn test_split_image_tag_without_tag() {
        let (image, tag) = split_image_tag("ghcr.io/org/app");
        assert_eq!(image, "ghcr.io/org/app");
        assert_eq!(tag, "latest");
    }

    #[test]
    fn test_split_image_tag_with_port() {
        let (image, tag) = split_image_tag("localhost:5000/app");
        assert_eq!(image, "localhost:5000/app");
        assert_eq!(tag, "latest");
    }

    #[test]
    fn test_split_image_tag_with_port_and_tag() {
        let (image, tag) = split_image_tag("localhost:5000/app:dev");
        assert_eq!(image, "localhost:5000/app");
        assert_eq!(tag, "dev");
    }

    #[test]
    fn test_validate_tag() {
        assert!(validate_tag("0.4.1").is_ok());
        assert!(validate_tag("stable-20240101").is_ok());
        assert!(validate_tag("").is_err());
        assert!(validate_tag("-dev").is_err());
        assert!(validate_tag("a/b").is_err());
        assert!(validate_tag(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_progress_keeps_completed_layers_only() {
        let mut transcript = Transcript::new(OutputMode::Capture);
        let mut last_status = String::new();
        let statuses = ["Preparing", "Pushing", "Pushed", "Layer already exists"];

        for status in statuses {
            let info = PushImageInfo {
                status: Some(status.to_string()),
                ..Default::default()
            };
            handle_progress(&info, &mut last_status, &mut transcript);
        }

        let text = transcript.into_text();
        assert!(text.contains("Pushed"));
        assert!(text.contains("Layer already exists"));
        assert!(!text.contains("Preparing"));
    }
}
