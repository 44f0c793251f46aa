//! Google Drive へのアップロード
//!
//! サービスアカウント鍵（JSON）でアクセストークンを取得し、
//! 指定フォルダにレジューマブルアップロードで保存する。

use std::path::Path;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use yup_oauth2::{ServiceAccountAuthenticator, ServiceAccountKey};

use crate::config::UploadTarget;
use crate::error::ScraperError;

const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const CSV_MIME: &str = "text/csv";

/// 出力ファイルの送り先
#[async_trait]
pub trait Uploader: Send + Sync {
    /// アップロードしてファイルIDを返す
    async fn upload(&self, path: &Path) -> Result<String, ScraperError>;
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

/// サービスアカウントで認証する Google Drive アップローダー
pub struct DriveUploader {
    client: reqwest::Client,
    key: ServiceAccountKey,
    folder_id: String,
}

impl DriveUploader {
    /// `credentials_path` のサービスアカウント鍵を読み込む
    pub async fn from_target(target: &UploadTarget) -> Result<Self, ScraperError> {
        let key = yup_oauth2::read_service_account_key(&target.credentials_path)
            .await
            .map_err(|e| {
                ScraperError::Upload(format!(
                    "認証情報ファイルを読み込めません: {}: {}",
                    target.credentials_path.display(),
                    e
                ))
            })?;
        Ok(Self::with_key(key, target.folder_id.clone()))
    }

    pub fn with_key(key: ServiceAccountKey, folder_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            key,
            folder_id: folder_id.into(),
        }
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    async fn access_token(&self) -> Result<String, ScraperError> {
        let auth = ServiceAccountAuthenticator::builder(self.key.clone())
            .build()
            .await
            .map_err(|e| ScraperError::Upload(format!("認証の初期化に失敗しました: {}", e)))?;

        let token = auth
            .token(&[DRIVE_SCOPE])
            .await
            .map_err(|e| ScraperError::Upload(format!("アクセストークンの取得に失敗しました: {}", e)))?;

        token
            .token()
            .map(str::to_string)
            .ok_or_else(|| ScraperError::Upload("アクセストークンが空です".into()))
    }

    /// アップロードセッションを開始して送信先URLを得る
    async fn start_session(&self, token: &str, name: &str) -> Result<String, ScraperError> {
        let metadata = json!({
            "name": name,
            "parents": [self.folder_id],
        });

        let response = self
            .client
            .post(UPLOAD_URL)
            .query(&[("uploadType", "resumable"), ("fields", "id")])
            .bearer_auth(token)
            .header("X-Upload-Content-Type", CSV_MIME)
            .json(&metadata)
            .send()
            .await
            .map_err(|e| ScraperError::Upload(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ScraperError::Upload(format!(
                "アップロードを開始できません: HTTP {}",
                response.status()
            )));
        }

        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ScraperError::Upload("アップロード先URLが返されませんでした".into()))
    }
}

#[async_trait]
impl Uploader for DriveUploader {
    async fn upload(&self, path: &Path) -> Result<String, ScraperError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ScraperError::Upload(format!("ファイル名がありません: {}", path.display())))?;
        let body = tokio::fs::read(path).await?;

        let token = self.access_token().await?;
        let session_url = self.start_session(&token, &name).await?;
        debug!("アップロードセッション開始: {}", name);

        let response = self
            .client
            .put(&session_url)
            .header(CONTENT_TYPE, CSV_MIME)
            .body(body)
            .send()
            .await
            .map_err(|e| ScraperError::Upload(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ScraperError::Upload(format!("HTTP {}", response.status())));
        }

        let created: CreatedFile = response
            .json()
            .await
            .map_err(|e| ScraperError::Upload(e.to_string()))?;
        info!("Google Driveにアップロードしました: {} (ID: {})", name, created.id);
        Ok(created.id)
    }
}
