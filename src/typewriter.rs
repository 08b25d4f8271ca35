// 开场白打字机 - 逐字揭示脚本台词

use serde::Serialize;
use std::time::Duration;

/// 开场白脚本
pub const ONBOARDING_SCRIPT: [&str; 6] = [
    "oh. you're finally here. take a seat. don't touch anything yet.",
    "look. the internet is bored and angry. they are waiting for you to slip up so they can destroy you for sport.",
    "i'm the only thing standing between your 'brilliant idea' and a public apology video.",
    "i've seen billion-dollar brands collapse over a single emoji. i've seen careers end because someone thought they were being funny.",
    "so here is the deal. you show me what you want to post. i will tell you exactly how it will ruin your life.",
    "drop the file in the box. and please... try not to make me cringe. i've had a really long week.",
];

/// 一帧：当前行已揭示的前缀
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypewriterFrame {
    pub line_index: usize,
    pub text: String,
    pub line_complete: bool,
    /// 最后一行的最后一帧
    pub finished: bool,
}

/// 打字机
#[derive(Debug, Clone)]
pub struct Typewriter {
    lines: Vec<String>,
    char_delay: Duration,
    line_delay: Duration,
}

impl Typewriter {
    pub fn new(lines: Vec<String>, char_delay: Duration, line_delay: Duration) -> Self {
        Self {
            lines,
            char_delay,
            line_delay,
        }
    }

    /// 使用默认开场白
    pub fn onboarding(char_delay: Duration, line_delay: Duration) -> Self {
        Self::new(
            ONBOARDING_SCRIPT.iter().map(|s| s.to_string()).collect(),
            char_delay,
            line_delay,
        )
    }

    /// 按顺序生成全部帧（按字符而不是字节切分）
    pub fn frames(&self) -> Vec<TypewriterFrame> {
        let mut frames = Vec::new();
        let last_line = self.lines.len().saturating_sub(1);

        for (line_index, line) in self.lines.iter().enumerate() {
            let chars: Vec<char> = line.chars().collect();
            if chars.is_empty() {
                frames.push(TypewriterFrame {
                    line_index,
                    text: String::new(),
                    line_complete: true,
                    finished: line_index == last_line,
                });
                continue;
            }

            for end in 1..=chars.len() {
                let line_complete = end == chars.len();
                frames.push(TypewriterFrame {
                    line_index,
                    text: chars[..end].iter().collect(),
                    line_complete,
                    finished: line_complete && line_index == last_line,
                });
            }
        }

        frames
    }

    /// 完整播放所需时间
    pub fn duration(&self) -> Duration {
        let chars: u32 = self.lines.iter().map(|l| l.chars().count() as u32).sum();
        self.char_delay * chars + self.line_delay * self.lines.len() as u32
    }

    /// 播放：每个字符前等待 `char_delay`，每行结束后等待 `line_delay`
    pub async fn play<F>(&self, mut emit: F)
    where
        F: FnMut(TypewriterFrame),
    {
        for frame in self.frames() {
            if !frame.text.is_empty() {
                tokio::time::sleep(self.char_delay).await;
            }
            let line_complete = frame.line_complete;
            emit(frame);
            if line_complete {
                tokio::time::sleep(self.line_delay).await;
            }
        }
    }
}
