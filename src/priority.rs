use serde::{Deserialize, Serialize};
use std::fmt;

/// 案件优先级 (严重程度分层)
///
/// 变体的声明顺序就是大小顺序：`Low < Medium < High`，
/// 组合器的“只升不降”依赖这里派生出来的 `Ord`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    #[serde(alias = "Low")]
    Low,
    #[serde(alias = "Medium")]
    Medium,
    #[serde(alias = "High")]
    High,
}

impl Priority {
    /// 规则分数 -> 优先级
    /// - `score >= 70` → HIGH
    /// - `40 <= score < 70` → MEDIUM
    /// - 其它 → LOW
    pub fn from_score(score: u8) -> Self {
        if score >= 70 {
            Priority::High
        } else if score >= 40 {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AI 置信度达到这个值，直接判为 HIGH
pub const AI_ESCALATE_HIGH: f64 = 0.85;
/// AI 置信度达到这个值，LOW 被抬到 MEDIUM
pub const AI_ESCALATE_MEDIUM: f64 = 0.75;

/// 混合优先级组合器
///
/// 规则引擎给出一个优先级，AI 给出一个置信度，二者合并成最终优先级。
/// 只会升级，永远不会低于规则优先级。
pub fn combine(rule: Priority, ai_confidence: f64) -> Priority {
    if ai_confidence >= AI_ESCALATE_HIGH {
        Priority::High
    } else if ai_confidence >= AI_ESCALATE_MEDIUM && rule == Priority::Low {
        Priority::Medium
    } else {
        rule
    }
}
