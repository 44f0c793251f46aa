use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("ブラウザ初期化エラー: {0}")]
    BrowserInit(String),

    #[error("ナビゲーションエラー: {0}")]
    Navigation(String),

    #[error("ログインエラー: {0}")]
    Login(String),

    #[error("タイムアウト: {0}")]
    Timeout(String),

    #[error("要素が見つかりません: {0}")]
    ElementNotFound(String),

    #[error("JavaScript実行エラー: {0}")]
    JavaScript(String),

    /// ブラウザセッションが失われた（ページ・接続の喪失）
    #[error("セッションエラー: {0}")]
    Session(String),

    #[error("抽出エラー: {0}")]
    Extraction(String),

    #[error("閲覧制限のある案件です: {0}")]
    Restricted(String),

    #[error("設定エラー: {0}")]
    Config(String),

    #[error("CSVエラー: {0}")]
    Csv(#[from] csv::Error),

    #[error("アップロードエラー: {0}")]
    Upload(String),

    #[error("JSONエラー: {0}")]
    Json(String),

    #[error("ファイル操作エラー: {0}")]
    FileIO(#[from] std::io::Error),
}

impl ScraperError {
    /// 再試行で回復しうるエラーか
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScraperError::Navigation(_)
                | ScraperError::Timeout(_)
                | ScraperError::ElementNotFound(_)
                | ScraperError::JavaScript(_)
        )
    }

    /// 行単位では回復できず、実行全体を止めるべきエラーか
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, ScraperError::BrowserInit(_) | ScraperError::Session(_))
    }
}

impl From<serde_json::Error> for ScraperError {
    fn from(e: serde_json::Error) -> Self {
        ScraperError::Json(e.to_string())
    }
}
