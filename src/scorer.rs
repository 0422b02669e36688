use serde::{Deserialize, Serialize};

use crate::config::ScoringRules;
use crate::priority::Priority;

/// 联系方式 / 售卖信号的固定加分
pub const SIGNAL_BONUS: u32 = 10;
pub const MAX_SCORE: u32 = 100;
pub const MAX_REASONS: usize = 6;
pub const UNKNOWN_SPECIES: &str = "Unknown";

/// 规则引擎的输出 (一次性，不直接落库)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSignal {
    pub risk_score: u8,
    pub priority: Priority,
    pub species: String,
    pub code_words: Vec<String>,
    pub reasons: Vec<String>,
}

/// 规则打分
///
/// 1. 暗语表：每命中一项加分、记录暗语和理由
/// 2. 关键词表：每命中一项加分、记录理由
/// 3. 联系方式 / 售卖两类信号：各自最多加一次 10 分
/// 4. 总分截断到 100，理由只保留前 6 条
///
/// 纯函数：同样的输入永远得到同样的输出。
pub fn score_text(rules: &ScoringRules, text: &str) -> RuleSignal {
    let text = text.to_lowercase();
    let mut score: u32 = 0;
    let mut species: Option<&str> = None;
    let mut code_words = Vec::new();
    let mut reasons = Vec::new();

    for entry in rules.codewords.iter().filter(|e| text.contains(e.pattern.as_str())) {
        score = score.saturating_add(entry.points);
        species.get_or_insert(entry.species.as_str());
        code_words.push(entry.pattern.clone());
        reasons.push(format!("Codeword detected: '{}'", entry.pattern));
    }

    for entry in rules.keywords.iter().filter(|e| text.contains(e.pattern.as_str())) {
        score = score.saturating_add(entry.points);
        species.get_or_insert(entry.species.as_str());
        reasons.push(format!("Keyword detected: '{}'", entry.pattern));
    }

    if rules.has_contact_signal(&text) {
        score = score.saturating_add(SIGNAL_BONUS);
        reasons.push("Contact signal detected".to_string());
    }

    if rules.has_sale_signal(&text) {
        score = score.saturating_add(SIGNAL_BONUS);
        reasons.push("Selling signal detected".to_string());
    }

    let risk_score = score.min(MAX_SCORE) as u8;
    reasons.truncate(MAX_REASONS);

    RuleSignal {
        risk_score,
        priority: Priority::from_score(risk_score),
        species: species.unwrap_or(UNKNOWN_SPECIES).to_string(),
        code_words,
        reasons,
    }
}
