use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::case::{Case, CasePatch};
use crate::config::TriageConfig;
use crate::dedup::DuplicateCheck;
use crate::evidence::{Evidence, EvidencePatch};
use crate::priority::Priority;
use crate::scorer::{RuleSignal, UNKNOWN_SPECIES};
use crate::signal::AiSignal;
use crate::store::{StoreResult, TriageStore};

pub const CASE_SOURCE: &str = "AI_SCANNER";
pub const DEFAULT_REASON_SUMMARY: &str = "Suspicious content detected.";

/// “空” 的判定，供 `first_non_empty` 使用
pub trait Blank {
    fn is_blank(&self) -> bool;
}

impl Blank for str {
    fn is_blank(&self) -> bool {
        self.trim().is_empty()
    }
}

impl Blank for String {
    fn is_blank(&self) -> bool {
        self.as_str().is_blank()
    }
}

impl<T> Blank for Vec<T> {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

/// 有序回退：按顺序取第一个非空的候选
///
/// 物种、违禁品、暗语、理由都走这一条：AI 的值 -> 规则的值 -> 调用方给的兜底。
pub fn first_non_empty<'a, T, I>(candidates: I) -> Option<&'a T>
where
    T: Blank + ?Sized + 'a,
    I: IntoIterator<Item = &'a T>,
{
    candidates.into_iter().find(|c| !c.is_blank())
}

/// 一次扫描的可追溯戳
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStamp {
    pub scanner_version: String,
    pub ai_model_version: String,
    pub processing_node: String,
}

/// 对账的全部输入
#[derive(Debug, Clone)]
pub struct ComputedSignals<'a> {
    pub evidence: &'a Evidence,
    pub case_id: &'a str,
    pub rule: &'a RuleSignal,
    pub ai: &'a AiSignal,
    pub priority: Priority,
    pub fingerprint: Option<&'a str>,
    pub duplicate: &'a DuplicateCheck,
}

/// 对账结果
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub case: Case,
    pub evidence: Evidence,
    pub case_created: bool,
}

pub fn case_patch(config: &TriageConfig, signals: &ComputedSignals<'_>, stamp: &ScanStamp) -> CasePatch {
    let (ai, rule) = (signals.ai, signals.rule);

    CasePatch {
        risk_score: rule.risk_score,
        priority: signals.priority,
        species_detected: first_non_empty([ai.suspected_species.as_str(), rule.species.as_str()])
            .unwrap_or(UNKNOWN_SPECIES)
            .to_string(),
        // 规则引擎不识别违禁品种类，只有 AI 能给
        illegal_product: first_non_empty([ai.illegal_product.as_str()])
            .unwrap_or(UNKNOWN_SPECIES)
            .to_string(),
        reasons: first_non_empty([&ai.reasons, &rule.reasons]).cloned().unwrap_or_default(),
        code_words: first_non_empty([&ai.code_words, &rule.code_words]).cloned().unwrap_or_default(),
        fingerprint: signals.fingerprint.map(str::to_string),
        is_duplicate: signals.duplicate.is_duplicate,
        duplicate_of_case_id: signals.duplicate.duplicate_of_case_id.clone(),
        confidence_score: ai.confidence,
        source: CASE_SOURCE.to_string(),
        platform_source: signals.evidence.platform().to_string(),
        reason_summary: first_non_empty([ai.summary.as_str()])
            .unwrap_or(DEFAULT_REASON_SUMMARY)
            .to_string(),
        location: config.default_location.with_state_guess(&ai.state_guess),
        scanner_version: stamp.scanner_version.clone(),
        ai_model_version: stamp.ai_model_version.clone(),
        processing_node: stamp.processing_node.clone(),
    }
}

pub fn evidence_patch(signals: &ComputedSignals<'_>, stamp: &ScanStamp) -> EvidencePatch {
    EvidencePatch {
        case_id: signals.case_id.to_string(),
        ai_summary: signals.ai.summary.clone(),
        ai_confidence: signals.ai.confidence,
        fingerprint: signals.fingerprint.map(str::to_string),
        is_duplicate: signals.duplicate.is_duplicate,
        scanner_version: stamp.scanner_version.clone(),
        ai_model_version: stamp.ai_model_version.clone(),
        processing_node: stamp.processing_node.clone(),
    }
}

/// 把计算好的信号写回案件和证据
///
/// 两次写入都是 merge-upsert：先案件，后证据。
/// 同样的输入重复执行，除了时间戳之外所有业务字段保持不变。
pub fn reconcile<S: TriageStore + ?Sized>(
    store: &S,
    config: &TriageConfig,
    signals: &ComputedSignals<'_>,
    stamp: &ScanStamp,
    now: DateTime<Utc>,
) -> StoreResult<Reconciled> {
    let case_created = store.get_case(signals.case_id)?.is_none();

    let case = store.upsert_case(signals.case_id, &case_patch(config, signals, stamp), now)?;
    if case_created {
        tracing::info!(case_id = %case.id, priority = %case.priority, species = %case.species_detected, "Created case");
    }

    let evidence = store.upsert_evidence(signals.evidence, &evidence_patch(signals, stamp), now)?;
    tracing::debug!(evidence_id = %evidence.id, case_id = %case.id, "Linked evidence to case");

    Ok(Reconciled {
        case,
        evidence,
        case_created,
    })
}
