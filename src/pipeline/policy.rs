//! グループ間の継続判定

use std::io::{self, BufRead, BufReader, Stderr, Stdin, Write};

use tracing::{info, warn};

/// グループ処理後に次へ進むかを決める
///
/// `completed_group` は処理を終えたグループの番号（1始まり）。
/// 最後のグループの後には呼ばれない。非同期処理の外（専用スレッド）から呼ばれるので、
/// 標準入力の読み込みのようなブロッキング処理をしてよい。
pub trait ContinuationPolicy: Send {
    fn should_continue(&mut self, completed_group: usize, total_groups: usize) -> bool;
}

impl<F> ContinuationPolicy for F
where
    F: FnMut(usize, usize) -> bool + Send,
{
    fn should_continue(&mut self, completed_group: usize, total_groups: usize) -> bool {
        self(completed_group, total_groups)
    }
}

/// 確認をスキップして常に継続する
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysContinue;

impl ContinuationPolicy for AlwaysContinue {
    fn should_continue(&mut self, _completed_group: usize, _total_groups: usize) -> bool {
        true
    }
}

/// オペレーターに1行入力で継続を確認する
///
/// `y` / `yes`（大文字小文字を問わない）以外はすべて中断。入力終端も中断扱い。
pub struct AskOperator<R, W> {
    input: R,
    output: W,
}

impl AskOperator<BufReader<Stdin>, Stderr> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stderr())
    }
}

impl<R: BufRead + Send, W: Write + Send> AskOperator<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, completed_group: usize, total_groups: usize) -> io::Result<Option<String>> {
        write!(
            self.output,
            "グループ {}/{} が完了しました。次のグループ({}/{})に進みますか？ (y/n): ",
            completed_group,
            total_groups,
            completed_group + 1,
            total_groups
        )?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }
}

fn is_affirmative(answer: &str) -> bool {
    let answer = answer.trim();
    answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}

impl<R: BufRead + Send, W: Write + Send> ContinuationPolicy for AskOperator<R, W> {
    fn should_continue(&mut self, completed_group: usize, total_groups: usize) -> bool {
        match self.ask(completed_group, total_groups) {
            Ok(Some(answer)) if is_affirmative(&answer) => true,
            Ok(Some(_)) => {
                info!("ユーザーの選択により処理を中断しました");
                false
            }
            Ok(None) => {
                info!("入力が終了したため処理を中断しました");
                false
            }
            Err(e) => {
                warn!("継続確認の入力を読み込めませんでした: {}", e);
                false
            }
        }
    }
}
