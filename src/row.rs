//! 行データ（文字列キーの順序付きマップ）とバッチ

/// URL列の名前
pub const URL_FIELD: &str = "url";

/// 1件分のレコード
///
/// 挿入順を保持するキー/値リスト。同じキーへの `set` は値を上書きし、位置は保つ。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    fields: Vec<(String, String)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// 値を取得（存在しなければ空文字列）
    pub fn get_or_empty(&self, key: &str) -> &str {
        self.get(key).unwrap_or_default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// URL（前後の空白を除去、空なら None）
    pub fn url(&self) -> Option<&str> {
        self.get(URL_FIELD)
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// `overlay` のフィールドで上書きした新しい行を返す
    ///
    /// 元の行は変更しない。衝突したキーは `overlay` の値が優先される。
    pub fn merged_with(&self, overlay: &Row) -> Row {
        let mut merged = self.clone();
        for (k, v) in overlay.iter() {
            merged.set(k, v);
        }
        merged
    }
}

impl<K, V> FromIterator<(K, V)> for Row
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.set(k, v);
        }
        row
    }
}

/// 1回の実行で処理する入力行の並び
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    header: Vec<String>,
    rows: Vec<Row>,
}

impl Batch {
    /// 入力ファイルのヘッダー順を保持して作成
    pub fn new(header: Vec<String>, rows: Vec<Row>) -> Self {
        Self { header, rows }
    }

    /// ヘッダー情報がない場合は各行のキーの出現順から作成
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut header: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !header.iter().any(|h| h == key) {
                    header.push(key.to_string());
                }
            }
        }
        Self { header, rows }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 元の列名（入力順）。ヘッダーに無く行にだけあるキーも後ろに続ける
    pub fn original_keys(&self) -> Vec<String> {
        let mut keys = self.header.clone();
        for row in &self.rows {
            for key in row.keys() {
                if !keys.iter().any(|k| k == key) {
                    keys.push(key.to_string());
                }
            }
        }
        keys
    }

    /// URLが空でない行数
    pub fn url_count(&self) -> usize {
        self.rows.iter().filter(|row| row.url().is_some()).count()
    }
}
