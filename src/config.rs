use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::error::ScraperError;

/// チャンクサイズのデフォルト値
pub const DEFAULT_CHUNK_SIZE: usize = 10;
/// 検索モードで取得する最大ページ数のデフォルト値
pub const DEFAULT_MAX_PAGES: u32 = 5;

const ENV_EMAIL: &str = "LANCERS_EMAIL";
const ENV_PASSWORD: &str = "LANCERS_PASSWORD";
const ENV_HEADLESS: &str = "HEADLESS";
const ENV_GDRIVE_FOLDER: &str = "GDRIVE_FOLDER_ID";
const ENV_GDRIVE_CREDENTIALS: &str = "GDRIVE_CREDENTIALS_PATH";

/// ログイン認証情報
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"********")
            .finish()
    }
}

/// アップロード先（Google Drive フォルダ）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub folder_id: String,
    pub credentials_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub credentials: Option<Credentials>,
    pub output_dir: PathBuf,
    pub headless: bool,
    pub debug: bool,
    pub timeout: Duration,
    pub chunk_size: usize,
    pub skip_confirmation: bool,
    pub max_pages: u32,
    pub max_items: Option<usize>,
    pub upload: Option<UploadTarget>,
    pub chrome_path: Option<PathBuf>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            credentials: None,
            output_dir: PathBuf::from("./data/output"),
            headless: true,
            debug: false,
            timeout: Duration::from_secs(30),
            chunk_size: DEFAULT_CHUNK_SIZE,
            skip_confirmation: false,
            max_pages: DEFAULT_MAX_PAGES,
            max_items: None,
            upload: None,
            chrome_path: None,
        }
    }
}

impl ScraperConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 環境変数から設定を読み込む
    ///
    /// 認証情報・アップロード先はどちらも任意。片方だけ設定されている場合は
    /// 警告を出して未設定として扱う。
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.credentials = match (get(ENV_EMAIL), get(ENV_PASSWORD)) {
            (Some(email), Some(password)) => Some(Credentials::new(email, password)),
            (None, None) => None,
            _ => {
                warn!(
                    "{} と {} の片方しか設定されていません。未ログインで実行します",
                    ENV_EMAIL, ENV_PASSWORD
                );
                None
            }
        };

        if let Some(headless) = get(ENV_HEADLESS) {
            config.headless = headless.eq_ignore_ascii_case("true");
        }

        config.upload = match (get(ENV_GDRIVE_FOLDER), get(ENV_GDRIVE_CREDENTIALS)) {
            (Some(folder_id), Some(path)) => Some(UploadTarget {
                folder_id,
                credentials_path: PathBuf::from(path),
            }),
            (None, None) => None,
            _ => {
                warn!(
                    "{} と {} の両方が必要です。アップロードは行いません",
                    ENV_GDRIVE_FOLDER, ENV_GDRIVE_CREDENTIALS
                );
                None
            }
        };

        config.chrome_path = get("CHROME_PATH")
            .or_else(|| get("CHROMIUM_PATH"))
            .map(PathBuf::from);

        config
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_skip_confirmation(mut self, skip: bool) -> Self {
        self.skip_confirmation = skip;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_max_items(mut self, max_items: Option<usize>) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn with_upload(mut self, upload: UploadTarget) -> Self {
        self.upload = Some(upload);
        self
    }

    /// 実行前の設定検証
    pub fn validate(&self) -> Result<(), ScraperError> {
        if self.chunk_size == 0 {
            return Err(ScraperError::Config(
                "チャンクサイズは1以上を指定してください".into(),
            ));
        }
        if self.max_pages == 0 {
            return Err(ScraperError::Config(
                "最大ページ数は1以上を指定してください".into(),
            ));
        }
        if self.max_items == Some(0) {
            return Err(ScraperError::Config(
                "最大取得件数は1以上を指定してください".into(),
            ));
        }
        Ok(())
    }
}
