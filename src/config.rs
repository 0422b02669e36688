use anyhow::Context;
use regex::RegexSet;
use std::env;

use crate::case::Location;
use crate::error::Result;
use crate::evidence::RescanPolicy;

/// 服务级配置 (来自环境变量)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub scanner_version: String,
    pub processing_node: String,
    pub scan_concurrency: usize,
    pub rescan_policy: RescanPolicy,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = env::var("PORT").unwrap_or_else(|_| "3000".to_string());
        let concurrency = env::var("SCAN_CONCURRENCY").unwrap_or_else(|_| DEFAULT_SCAN_CONCURRENCY.to_string());
        let policy = env::var("RESCAN_POLICY").unwrap_or_else(|_| "missing-stamp-or-case".to_string());

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: port.parse().context("PORT must be a number")?,
            db_path: env::var("DB_PATH").unwrap_or_else(|_| "data/db/wildscan_db".to_string()),
            scanner_version: env::var("SCANNER_VERSION").unwrap_or_else(|_| DEFAULT_SCANNER_VERSION.to_string()),
            processing_node: env::var("PROCESSING_NODE").unwrap_or_else(|_| DEFAULT_PROCESSING_NODE.to_string()),
            scan_concurrency: concurrency
                .parse::<usize>()
                .context("SCAN_CONCURRENCY must be a positive number")?
                .max(1),
            rescan_policy: policy.parse()?,
        })
    }
}

pub const DEFAULT_SCANNER_VERSION: &str = "member1-v1.0";
pub const DEFAULT_PROCESSING_NODE: &str = "local-dev";

/// 发给 AI 视觉模型的固定系统指令
pub const SYSTEM_INSTRUCTION: &str = r#"
You assist wildlife enforcement officers in Malaysia.

You will receive ONE screenshot taken from an online marketplace, chat group or social media post.
Decide whether it advertises illegal wildlife or wildlife products.

Reply with a single JSON object and nothing else (no markdown fences, no commentary).

Keys:
- suspectedSpecies: string, e.g. "Pangolin", "Bear Bile", "Ivory", "Sun Bear", "Unknown"
- illegalProduct: string, e.g. "scales", "bile", "tusk carving", "live animal", "" if none
- summary: string, one or two sentences on why the post looks suspicious
- confidence: number from 0 to 1
- codeWords: array of strings, slang or evasive phrases seen in the post
- reasons: array of strings
- stateGuess: string, Malaysian state or city if visible, otherwise "Unknown"
"#;

// ==========================================
// 规则表 (Scoring Rules)
// ==========================================

/// 规则表中的一项：子串命中即加分，并给出物种
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternEntry {
    pub pattern: String,
    pub species: String,
    pub points: u32,
}

impl PatternEntry {
    pub fn new(pattern: &str, species: &str, points: u32) -> Self {
        Self {
            pattern: pattern.to_lowercase(),
            species: species.to_string(),
            points,
        }
    }
}

/// 文本打分规则
///
/// **顺序很重要**: 物种取“第一个命中的暗语”，其次“第一个命中的关键词”。
/// 所以这里用 `Vec` 而不是 `HashMap`，声明顺序就是匹配顺序。
#[derive(Debug, Clone)]
pub struct ScoringRules {
    pub codewords: Vec<PatternEntry>,
    pub keywords: Vec<PatternEntry>,
    contact: RegexSet,
    sale: RegexSet,
}

impl ScoringRules {
    pub fn new(
        codewords: Vec<PatternEntry>,
        keywords: Vec<PatternEntry>,
        contact_patterns: &[&str],
        sale_patterns: &[&str],
    ) -> Result<Self> {
        Ok(Self {
            codewords,
            keywords,
            contact: RegexSet::new(contact_patterns)?,
            sale: RegexSet::new(sale_patterns)?,
        })
    }

    /// 马来西亚部署使用的默认规则表
    pub fn malaysia() -> Result<Self> {
        let codewords = vec![
            PatternEntry::new("black honey", "Bear Bile", 30),
            PatternEntry::new("pineapple scales", "Pangolin", 35),
            PatternEntry::new("special tonic", "Bear Bile", 15),
            PatternEntry::new("medicine tonic", "Bear Bile", 20),
        ];
        let keywords = vec![
            PatternEntry::new("pangolin", "Pangolin", 40),
            PatternEntry::new("tenggiling", "Pangolin", 40),
            PatternEntry::new("bear bile", "Bear Bile", 45),
            PatternEntry::new("hempedu", "Bear Bile", 35),
            PatternEntry::new("ivory", "Ivory", 45),
            PatternEntry::new("gading", "Ivory", 45),
            PatternEntry::new("horn", "Horn", 35),
            PatternEntry::new("tanduk", "Horn", 30),
        ];

        Self::new(
            codewords,
            keywords,
            &["whatsapp", "telegram", "pm me", "dm me", "wasap", "ws"],
            &[r"rm\s?\d+", r"\$\s?\d+", "cod", "delivery", "price", "sell"],
        )
    }

    /// 联系方式类信号 (任意一个命中即可)
    pub fn has_contact_signal(&self, text: &str) -> bool {
        self.contact.is_match(text)
    }

    /// 交易/售卖类信号
    pub fn has_sale_signal(&self, text: &str) -> bool {
        self.sale.is_match(text)
    }
}

// ==========================================
// 分诊配置 (Triage Config)
// ==========================================

/// 一次构造、只读共享的分诊配置
///
/// 规则表、默认位置、系统指令、扫描器版本戳都在这里，
/// 测试里可以各自构造一份，互不干扰。
#[derive(Debug, Clone)]
pub struct TriageConfig {
    pub rules: ScoringRules,
    pub default_location: Location,
    pub system_instruction: String,
    pub scanner_version: String,
    pub processing_node: String,
    /// `run_recent` 用哪种判定挑待扫证据
    pub rescan_policy: RescanPolicy,
    /// 同时在途的证据条数
    pub scan_concurrency: usize,
}

pub const DEFAULT_SCAN_CONCURRENCY: usize = 4;

impl TriageConfig {
    pub fn new(scanner_version: impl Into<String>, processing_node: impl Into<String>) -> Result<Self> {
        Ok(Self {
            rules: ScoringRules::malaysia()?,
            default_location: Location::malaysia_center(),
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            scanner_version: scanner_version.into(),
            processing_node: processing_node.into(),
            rescan_policy: RescanPolicy::default(),
            scan_concurrency: DEFAULT_SCAN_CONCURRENCY,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            rescan_policy: config.rescan_policy,
            scan_concurrency: config.scan_concurrency.max(1),
            ..Self::new(config.scanner_version.clone(), config.processing_node.clone())?
        })
    }
}
