use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

use crate::error::Error;

/// 一条待分诊的证据 (用户提交的截图 / 图片)
///
/// 由外部录入流程创建；本库只通过对账 (`reconcile`) 修改扫描状态字段，从不删除。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    // === 录入字段 (Input) ===
    pub id: String,
    #[serde(default)]
    pub file_url: Option<String>,
    /// 调用方直接给出的图片字节，只作为输入，不落库
    #[serde(skip)]
    pub inline_bytes: Option<Vec<u8>>,
    #[serde(default)]
    pub platform_source: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,

    // === 扫描状态 (Scan state) ===
    #[serde(default)]
    pub case_id: Option<String>,
    #[serde(default)]
    pub ai_summary: Option<String>,
    #[serde(default)]
    pub ai_confidence: Option<f64>,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub is_duplicate: Option<bool>,

    // === 可追溯戳 (Traceability) ===
    // 只在到达 RECONCILED 时写入，外部的“是否需要重扫”判断依赖它们。
    #[serde(default)]
    pub scanner_version: Option<String>,
    #[serde(default)]
    pub ai_model_version: Option<String>,
    #[serde(default)]
    pub processing_node: Option<String>,
    #[serde(default)]
    pub last_scanned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Evidence {
    pub fn platform(&self) -> &str {
        self.platform_source.as_deref().unwrap_or("Unknown")
    }

    /// 已关联的案件号 (空串视为没有)
    pub fn linked_case(&self) -> Option<&str> {
        self.case_id.as_deref().map(str::trim).filter(|id| !id.is_empty())
    }
}

/// 对账时写入证据的字段
#[derive(Debug, Clone, PartialEq)]
pub struct EvidencePatch {
    pub case_id: String,
    pub ai_summary: String,
    pub ai_confidence: f64,
    pub fingerprint: Option<String>,
    pub is_duplicate: bool,
    pub scanner_version: String,
    pub ai_model_version: String,
    pub processing_node: String,
}

impl EvidencePatch {
    /// merge-upsert：`base` 是库里已有的记录 (没有时用调用方传入的证据)，
    /// 录入字段和 `extra` 保持原样
    pub fn apply(&self, base: Evidence, now: DateTime<Utc>) -> Evidence {
        let mut evidence = base;

        evidence.case_id = Some(self.case_id.clone());
        evidence.ai_summary = Some(self.ai_summary.clone());
        evidence.ai_confidence = Some(self.ai_confidence);
        evidence.fingerprint = self.fingerprint.clone();
        evidence.is_duplicate = Some(self.is_duplicate);
        evidence.scanner_version = Some(self.scanner_version.clone());
        evidence.ai_model_version = Some(self.ai_model_version.clone());
        evidence.processing_node = Some(self.processing_node.clone());
        let now = evidence.updated_at.map_or(now, |prev| prev.max(now));
        evidence.last_scanned_at = Some(now);
        evidence.updated_at = Some(now);
        evidence
    }
}

/// 单条证据在一次批处理中的状态机
///
/// ```text
/// UNSCANNED ──(无媒体)──────────────▶ SKIPPED
/// UNSCANNED ──▶ SCANNING ──(AI/IO 失败)──▶ FAILED   (下一轮仍可重试)
///               SCANNING ──▶ SCORED ──▶ RECONCILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanState {
    Unscanned,
    Scanning,
    Scored,
    Reconciled,
    Skipped,
    Failed,
}

/// “这条证据是否还需要扫描” 的判定策略
///
/// 历史上这个判定换过好几次写法，这里把每一种都保留为一个可配置的版本。
/// 扫描器升级后是否要全量重扫：选 `VersionMismatch`；只补扫没扫过的：选 `NeverScanned`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RescanPolicy {
    /// 没有扫描器版本戳
    MissingStamp,
    /// 没有版本戳，或者还没关联案件
    #[default]
    MissingStampOrCase,
    /// 从未成功扫描过 (没有 lastScannedAt)
    NeverScanned,
    /// 版本戳与当前扫描器版本不一致
    VersionMismatch,
}

impl RescanPolicy {
    pub fn is_unscanned(&self, evidence: &Evidence, current_version: &str) -> bool {
        let stamp = evidence.scanner_version.as_deref().filter(|v| !v.is_empty());
        match self {
            RescanPolicy::MissingStamp => stamp.is_none(),
            RescanPolicy::MissingStampOrCase => stamp.is_none() || evidence.linked_case().is_none(),
            RescanPolicy::NeverScanned => evidence.last_scanned_at.is_none(),
            RescanPolicy::VersionMismatch => stamp != Some(current_version),
        }
    }
}

impl FromStr for RescanPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "missing-stamp" => Ok(RescanPolicy::MissingStamp),
            "missing-stamp-or-case" => Ok(RescanPolicy::MissingStampOrCase),
            "never-scanned" => Ok(RescanPolicy::NeverScanned),
            "version-mismatch" => Ok(RescanPolicy::VersionMismatch),
            other => Err(Error::Config(format!("unknown rescan policy: {other}"))),
        }
    }
}
