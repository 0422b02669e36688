use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;

use crate::case_id::{allocate_case_id, CaseIdAllocator};
use crate::config::TriageConfig;
use crate::dedup::{find_duplicate, DuplicateCheck};
use crate::error::{Error, Result};
use crate::evidence::{Evidence, RescanPolicy, ScanState};
use crate::fingerprint::fingerprint;
use crate::priority::{combine, Priority};
use crate::reconcile::{reconcile, ComputedSignals, ScanStamp};
use crate::scorer::{score_text, RuleSignal};
use crate::signal::{classify, AiClassifier, AiSignal};
use crate::store::{StoreResult, TriageStore};

/// 媒体下载协作方 (locator -> bytes)
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, locator: &str) -> anyhow::Result<Vec<u8>>;
}

/// 单条证据走完流水线后的结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub evidence_id: String,
    pub case_id: String,
    pub case_created: bool,
    pub fingerprint: Option<String>,
    pub rule: RuleSignal,
    pub ai: AiSignal,
    pub priority: Priority,
    pub duplicate: DuplicateCheck,
}

#[derive(Debug, Clone)]
pub enum ScanOutcome {
    /// 没有可用的媒体 (既没有字节也没有地址)
    Skipped { evidence_id: String },
    Reconciled(ScanReport),
}

impl ScanOutcome {
    pub fn state(&self) -> ScanState {
        match self {
            ScanOutcome::Skipped { .. } => ScanState::Skipped,
            ScanOutcome::Reconciled(_) => ScanState::Reconciled,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub evidence_id: String,
    pub error: String,
}

/// 一轮批处理的汇总
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub reconciled: Vec<ScanReport>,
    pub skipped: Vec<String>,
    pub failed: Vec<FailedItem>,
    /// 按重扫策略不需要处理的条目数
    pub not_eligible: usize,
    /// 文档结构不合法、没能读出来的证据 id
    pub undecodable: Vec<String>,
}

/// 分诊流水线
///
/// 字节 -> 指纹 -> AI -> 规则打分 -> 优先级合并 -> (分配案件号) -> 查重 -> 对账写回
pub struct Triage<S: TriageStore + ?Sized> {
    config: Arc<TriageConfig>,
    store: Arc<S>,
    classifier: Arc<dyn AiClassifier>,
    fetcher: Arc<dyn MediaFetcher>,
    allocator: CaseIdAllocator,
}

impl<S: TriageStore + ?Sized + 'static> Triage<S> {
    pub fn new(
        config: Arc<TriageConfig>,
        store: Arc<S>,
        classifier: Arc<dyn AiClassifier>,
        fetcher: Arc<dyn MediaFetcher>,
    ) -> Self {
        Self {
            config,
            store,
            classifier,
            fetcher,
            allocator: CaseIdAllocator::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// 规则引擎的输入：平台 + 标题 + 描述 + AI 摘要 + AI 暗语 + AI 理由
    pub fn assemble_text(evidence: &Evidence, ai: &AiSignal) -> String {
        let code_words = ai.code_words.join(" ");
        let reasons = ai.reasons.join(" ");

        [
            evidence.platform(),
            evidence.caption.as_deref().unwrap_or(""),
            evidence.description.as_deref().unwrap_or(""),
            ai.summary.as_str(),
            code_words.as_str(),
            reasons.as_str(),
        ]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }

    async fn load_media(&self, evidence: &Evidence) -> Result<Option<Vec<u8>>> {
        if let Some(bytes) = &evidence.inline_bytes {
            return Ok(Some(bytes.clone()));
        }

        let Some(locator) = evidence.file_url.as_deref().filter(|url| !url.trim().is_empty()) else {
            return Ok(None);
        };

        self.fetcher
            .fetch(locator)
            .await
            .map(Some)
            .map_err(|e| Error::MediaUnavailable {
                evidence_id: evidence.id.clone(),
                reason: format!("{e:#}"),
            })
    }

    /// 处理一条证据
    ///
    /// 失败只影响这一条：AI / 下载 / 存储错误原样返回给调用方，
    /// 此时证据上的扫描戳没有被写入，下一轮仍会被选中。
    pub async fn scan(&self, evidence: &Evidence) -> Result<ScanOutcome> {
        let Some(bytes) = self.load_media(evidence).await? else {
            tracing::warn!(evidence_id = %evidence.id, "Skipping evidence: no media");
            return Ok(ScanOutcome::Skipped {
                evidence_id: evidence.id.clone(),
            });
        };
        tracing::debug!(evidence_id = %evidence.id, state = ?ScanState::Scanning, bytes = bytes.len());

        // 哈希是 CPU 密集型操作，放到阻塞线程池
        let (bytes, fingerprint) = tokio::task::spawn_blocking(move || {
            let fingerprint = fingerprint(&bytes);
            (bytes, fingerprint)
        })
        .await?;

        let ai = classify(self.classifier.as_ref(), &self.config.system_instruction, &bytes).await?;
        let rule = score_text(&self.config.rules, &Self::assemble_text(evidence, &ai));
        let priority = combine(rule.priority, ai.confidence);
        tracing::debug!(
            evidence_id = %evidence.id,
            state = ?ScanState::Scored,
            risk_score = rule.risk_score,
            rule_priority = %rule.priority,
            ai_confidence = ai.confidence,
            priority = %priority,
        );

        // 新案件号的预留一直持有到案件写入完成
        let linked_case = evidence.linked_case().map(str::to_string);
        let reservation = match linked_case {
            Some(_) => None,
            None => Some(self.allocator.reserve().await),
        };

        let stamp = ScanStamp {
            scanner_version: self.config.scanner_version.clone(),
            ai_model_version: self.classifier.model_version().to_string(),
            processing_node: self.config.processing_node.clone(),
        };
        let store = Arc::clone(&self.store);
        let config = Arc::clone(&self.config);
        let (evidence_owned, rule_owned, ai_owned, fingerprint_owned) =
            (evidence.clone(), rule.clone(), ai.clone(), fingerprint.clone());

        // sled 读写是同步的，同样不占用异步工作线程
        let (case_id, duplicate, reconciled) = tokio::task::spawn_blocking(move || -> StoreResult<_> {
            let case_id = match linked_case {
                Some(id) => id,
                None => allocate_case_id(store.as_ref())?,
            };
            let duplicate = find_duplicate(store.as_ref(), fingerprint_owned.as_deref(), &case_id)?;
            let signals = ComputedSignals {
                evidence: &evidence_owned,
                case_id: &case_id,
                rule: &rule_owned,
                ai: &ai_owned,
                priority,
                fingerprint: fingerprint_owned.as_deref(),
                duplicate: &duplicate,
            };
            let reconciled = reconcile(store.as_ref(), &config, &signals, &stamp, Utc::now())?;
            Ok((case_id, duplicate, reconciled))
        })
        .await??;
        drop(reservation);

        tracing::info!(
            evidence_id = %evidence.id,
            case_id = %case_id,
            priority = %priority,
            duplicate = duplicate.is_duplicate,
            "Evidence reconciled"
        );

        Ok(ScanOutcome::Reconciled(ScanReport {
            evidence_id: evidence.id.clone(),
            case_id,
            case_created: reconciled.case_created,
            fingerprint,
            rule,
            ai,
            priority,
            duplicate,
        }))
    }

    /// 从存储里取最近一页证据，按配置里的重扫策略和并发度跑一轮
    ///
    /// 解不开的证据文档记进 `undecodable`，不影响同页其它条目。
    pub async fn run_recent(&self, page_size: usize) -> Result<BatchReport> {
        let store = Arc::clone(&self.store);
        let page = tokio::task::spawn_blocking(move || store.recent_evidence(page_size)).await??;

        let mut report = self
            .run_batch(page.items, self.config.rescan_policy, self.config.scan_concurrency)
            .await;
        report.undecodable = page.undecodable;
        Ok(report)
    }

    /// 批处理一页证据
    ///
    /// 并发度为 `concurrency` (至少 1)。单条失败只记入 `failed`，不影响同批其它条目。
    pub async fn run_batch(&self, items: Vec<Evidence>, policy: RescanPolicy, concurrency: usize) -> BatchReport {
        let total = items.len();
        let (eligible, ineligible): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|ev| policy.is_unscanned(ev, &self.config.scanner_version));

        let mut report = BatchReport {
            not_eligible: ineligible.len(),
            ..Default::default()
        };

        let results: Vec<(String, Result<ScanOutcome>)> = stream::iter(eligible)
            .map(|evidence| async move {
                tracing::debug!(evidence_id = %evidence.id, state = ?ScanState::Unscanned, "Queued for scan");
                let outcome = self.scan(&evidence).await;
                (evidence.id, outcome)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        for (evidence_id, outcome) in results {
            match outcome {
                Ok(ScanOutcome::Reconciled(item)) => report.reconciled.push(item),
                Ok(ScanOutcome::Skipped { evidence_id }) => report.skipped.push(evidence_id),
                Err(e) => {
                    tracing::error!(evidence_id = %evidence_id, state = ?ScanState::Failed, error = %e, "Evidence scan failed");
                    report.failed.push(FailedItem {
                        evidence_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            total,
            reconciled = report.reconciled.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            not_eligible = report.not_eligible,
            "Batch finished"
        );
        report
    }
}
