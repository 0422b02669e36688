//! WildScan 分诊核心
//!
//! 把用户提交的疑似野生动物非法交易证据 (截图) 变成带优先级的调查案件：
//! 规则打分 + AI 信号 -> 优先级合并 -> 指纹查重 -> 案件号分配 -> 幂等写回。

pub mod api;
pub mod case;
pub mod case_id;
pub mod config;
pub mod dedup;
pub mod error;
pub mod evidence;
pub mod fingerprint;
pub mod pipeline;
pub mod priority;
pub mod reconcile;
pub mod scorer;
pub mod signal;
pub mod store;

pub use error::{Error, Result, StoreError};
pub use pipeline::{BatchReport, MediaFetcher, ScanOutcome, ScanReport, Triage};
pub use signal::{AiClassifier, AiSignal};
pub use store::{SledStore, TriageStore};
