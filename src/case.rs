use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::priority::Priority;

/// 调查案件的处理状态 (由执法看板推进)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CaseStatus {
    #[default]
    Pending,
    Investigating,
    Resolved,
}

/// 案件地理位置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    pub state: String,
}

impl Location {
    /// 马来西亚地理中心附近，州未知
    pub fn malaysia_center() -> Self {
        Self {
            lat: 4.2105,
            lng: 101.9758,
            state: "Unknown".to_string(),
        }
    }

    /// 以默认位置为底，AI 猜到的州 (非空) 覆盖 `state`
    pub fn with_state_guess(&self, guess: &str) -> Self {
        let mut location = self.clone();
        let guess = guess.trim();
        if !guess.is_empty() {
            location.state = guess.to_string();
        }
        location
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::malaysia_center()
    }
}

/// 调查案件 (Case)
///
/// 存储字段名沿用既有文档：驼峰命名，`SpeciesDetected` 和 `Status` 是历史字段名。
/// 其它写入方 (看板) 加的未知字段全部收在 `extra` 里，读写时原样保留。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Case {
    pub id: String,
    #[serde(default)]
    pub risk_score: u8,
    pub priority: Priority,
    #[serde(rename = "SpeciesDetected", default)]
    pub species_detected: String,
    #[serde(default)]
    pub illegal_product: String,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub code_words: Vec<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub is_duplicate: bool,
    #[serde(default)]
    pub duplicate_of_case_id: Option<String>,
    #[serde(rename = "Status", default)]
    pub status: CaseStatus,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub platform_source: String,
    #[serde(default)]
    pub reason_summary: String,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub scanner_version: Option<String>,
    #[serde(default)]
    pub ai_model_version: Option<String>,
    #[serde(default)]
    pub processing_node: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status_date: DateTime<Utc>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 一次对账要写入案件的字段集合
///
/// 这里出现的字段每次都会覆盖；没出现的 (`Status`、`createdAt`、`statusDate`、
/// 以及 `extra`) 只在新建案件时初始化，之后不动。
#[derive(Debug, Clone, PartialEq)]
pub struct CasePatch {
    pub risk_score: u8,
    pub priority: Priority,
    pub species_detected: String,
    pub illegal_product: String,
    pub reasons: Vec<String>,
    pub code_words: Vec<String>,
    pub fingerprint: Option<String>,
    pub is_duplicate: bool,
    pub duplicate_of_case_id: Option<String>,
    pub confidence_score: f64,
    pub source: String,
    pub platform_source: String,
    pub reason_summary: String,
    pub location: Location,
    pub scanner_version: String,
    pub ai_model_version: String,
    pub processing_node: String,
}

impl CasePatch {
    /// merge-upsert：`existing` 为 `None` 时新建，否则只覆盖补丁里的字段
    pub fn apply(&self, id: &str, existing: Option<Case>, now: DateTime<Utc>) -> Case {
        let mut case = existing.unwrap_or_else(|| Case {
            id: id.to_string(),
            risk_score: 0,
            priority: Priority::Low,
            species_detected: String::new(),
            illegal_product: String::new(),
            reasons: Vec::new(),
            code_words: Vec::new(),
            fingerprint: None,
            is_duplicate: false,
            duplicate_of_case_id: None,
            status: CaseStatus::Pending,
            confidence_score: 0.0,
            source: String::new(),
            platform_source: String::new(),
            reason_summary: String::new(),
            location: Location::default(),
            scanner_version: None,
            ai_model_version: None,
            processing_node: None,
            created_at: now,
            updated_at: now,
            status_date: now,
            extra: Map::new(),
        });

        case.risk_score = self.risk_score;
        case.priority = self.priority;
        case.species_detected = self.species_detected.clone();
        case.illegal_product = self.illegal_product.clone();
        case.reasons = self.reasons.clone();
        case.code_words = self.code_words.clone();
        case.fingerprint = self.fingerprint.clone();
        case.is_duplicate = self.is_duplicate;
        case.duplicate_of_case_id = self.duplicate_of_case_id.clone();
        case.confidence_score = self.confidence_score;
        case.source = self.source.clone();
        case.platform_source = self.platform_source.clone();
        case.reason_summary = self.reason_summary.clone();
        case.location = self.location.clone();
        case.scanner_version = Some(self.scanner_version.clone());
        case.ai_model_version = Some(self.ai_model_version.clone());
        case.processing_node = Some(self.processing_node.clone());
        // 时间戳只前进
        case.updated_at = case.updated_at.max(now);
        case
    }
}
