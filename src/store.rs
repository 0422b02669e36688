use chrono::{DateTime, Utc};
use serde_json::Value;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree};
use sled::Transactional;
use std::path::Path;

use crate::case::{Case, CasePatch};
use crate::error::StoreError;
use crate::evidence::{Evidence, EvidencePatch};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// 持久化契约 (Persistence Contract)
///
/// 分诊核心对后端存储的全部要求：
/// - 按 id 点查
/// - 案件 / 证据的 merge-upsert (只写补丁里的字段，不删除其它字段)
/// - 按创建时间倒序取最新一条案件 (分配案件号)
/// - 按指纹等值查询 (查重)
pub trait TriageStore: Send + Sync {
    fn get_case(&self, id: &str) -> StoreResult<Option<Case>>;

    fn upsert_case(&self, id: &str, patch: &CasePatch, now: DateTime<Utc>) -> StoreResult<Case>;

    fn latest_case(&self) -> StoreResult<Option<Case>>;

    fn cases_by_fingerprint(&self, fingerprint: &str, limit: usize) -> StoreResult<Vec<Case>>;

    fn get_evidence(&self, id: &str) -> StoreResult<Option<Evidence>>;

    /// 记录不存在时以 `seed` 为底新建
    fn upsert_evidence(&self, seed: &Evidence, patch: &EvidencePatch, now: DateTime<Utc>) -> StoreResult<Evidence>;

    /// 录入路径用：整条写入证据文档
    fn put_evidence(&self, evidence: &Evidence) -> StoreResult<()>;

    /// 按上传时间倒序取一页证据 (没有上传时间的排在最后)
    ///
    /// 解不开的文档不会让整页失败，只记进 `undecodable`。
    fn recent_evidence(&self, limit: usize) -> StoreResult<EvidencePage>;
}

/// 一页证据
#[derive(Debug, Clone, Default)]
pub struct EvidencePage {
    pub items: Vec<Evidence>,
    /// 文档存在但结构不合法的证据 id
    pub undecodable: Vec<String>,
}

type TxResult<T> = ConflictableTransactionResult<T, serde_json::Error>;

/// 基于 sled 的证据库
///
/// 树：
/// - `cases` / `evidence`：id -> JSON 文档
/// - `case_created`：`created_at 微秒 (大端) ++ id` -> id，`last()` 就是最新案件
/// - `case_fingerprint`：`fingerprint ++ 0x00 ++ id` -> 空，前缀扫描即可按指纹查
/// - `evidence_uploaded`：`有无上传时间 (1 字节) ++ uploaded_at 微秒 (大端) ++ id` -> id
/// - `evidence_upload_key`：id -> 它在 `evidence_uploaded` 里的键
///
/// 文档和它的索引在同一个事务里写入。
pub struct SledStore {
    db: sled::Db,
    cases: sled::Tree,
    evidence: sled::Tree,
    case_created: sled::Tree,
    case_fingerprint: sled::Tree,
    evidence_uploaded: sled::Tree,
    evidence_upload_key: sled::Tree,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// 临时库 (进程退出即删除)，测试和基准用
    pub fn temporary() -> StoreResult<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> StoreResult<Self> {
        let store = Self {
            cases: db.open_tree("cases")?,
            evidence: db.open_tree("evidence")?,
            case_created: db.open_tree("case_created")?,
            case_fingerprint: db.open_tree("case_fingerprint")?,
            evidence_uploaded: db.open_tree("evidence_uploaded")?,
            evidence_upload_key: db.open_tree("evidence_upload_key")?,
            db,
        };
        if store.evidence_upload_key.len() != store.evidence.len() {
            store.reindex_uploads()?;
        }
        Ok(store)
    }

    /// 退出前把脏页刷到磁盘
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// 老库或外部直接写入的文档没有上传时间索引，打开时补齐
    fn reindex_uploads(&self) -> StoreResult<()> {
        self.evidence_uploaded.clear()?;
        self.evidence_upload_key.clear()?;

        for entry in self.evidence.iter() {
            let (id, bytes) = entry?;
            let uploaded = serde_json::from_slice::<Value>(&bytes).ok().and_then(|doc| uploaded_at(&doc));
            let key = upload_key(uploaded, &id);
            self.evidence_uploaded.insert(key.as_slice(), id.clone())?;
            self.evidence_upload_key.insert(id, key)?;
        }

        tracing::info!(evidence = self.evidence.len(), "Rebuilt upload-time index");
        Ok(())
    }

    /// 按原始 JSON 写入一条证据 (录入路径写的文档不一定符合 `Evidence` 的结构)
    pub fn put_evidence_document(&self, id: &str, document: &Value) -> StoreResult<()> {
        let bytes = serde_json::to_vec(document)?;
        let key = upload_key(uploaded_at(document), id.as_bytes());

        (&self.evidence, &self.evidence_uploaded, &self.evidence_upload_key).transaction(
            |(docs, uploaded, upload_keys)| -> TxResult<()> {
                docs.insert(id.as_bytes(), bytes.as_slice())?;
                index_upload(uploaded, upload_keys, id, &key)
            },
        )?;
        Ok(())
    }

    fn read<T: serde::de::DeserializeOwned>(tree: &sled::Tree, id: &str) -> StoreResult<Option<T>> {
        match tree.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn created_key(case: &Case) -> Vec<u8> {
    let micros = case.created_at.timestamp_micros().max(0) as u64;
    let mut key = micros.to_be_bytes().to_vec();
    key.extend_from_slice(case.id.as_bytes());
    key
}

fn fingerprint_prefix(fingerprint: &str) -> Vec<u8> {
    let mut key = fingerprint.as_bytes().to_vec();
    key.push(0);
    key
}

fn fingerprint_key(fingerprint: &str, id: &str) -> Vec<u8> {
    let mut key = fingerprint_prefix(fingerprint);
    key.extend_from_slice(id.as_bytes());
    key
}

/// 倒序遍历时：有上传时间的按时间从新到旧，没有的排在最后
fn upload_key(uploaded: Option<DateTime<Utc>>, id: &[u8]) -> Vec<u8> {
    let mut key = match uploaded {
        Some(at) => {
            let mut key = vec![1u8];
            key.extend_from_slice(&(at.timestamp_micros().max(0) as u64).to_be_bytes());
            key
        }
        None => vec![0u8],
    };
    key.extend_from_slice(id);
    key
}

fn uploaded_at(document: &Value) -> Option<DateTime<Utc>> {
    document
        .get("uploadedAt")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|at| at.with_timezone(&Utc))
}

fn index_upload(uploaded: &TransactionalTree, upload_keys: &TransactionalTree, id: &str, key: &[u8]) -> TxResult<()> {
    if let Some(old) = upload_keys.get(id.as_bytes())? {
        uploaded.remove(old)?;
    }
    uploaded.insert(key, id.as_bytes())?;
    upload_keys.insert(id.as_bytes(), key)?;
    Ok(())
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> TxResult<T> {
    serde_json::from_slice(bytes).map_err(ConflictableTransactionError::Abort)
}

fn encode<T: serde::Serialize>(value: &T) -> TxResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(ConflictableTransactionError::Abort)
}

impl TriageStore for SledStore {
    fn get_case(&self, id: &str) -> StoreResult<Option<Case>> {
        Self::read(&self.cases, id)
    }

    fn upsert_case(&self, id: &str, patch: &CasePatch, now: DateTime<Utc>) -> StoreResult<Case> {
        let case = (&self.cases, &self.case_created, &self.case_fingerprint).transaction(
            |(cases, created, fingerprints)| -> TxResult<Case> {
                let existing: Option<Case> = match cases.get(id.as_bytes())? {
                    Some(bytes) => Some(decode(&bytes)?),
                    None => None,
                };
                let previous_fingerprint = existing.as_ref().and_then(|c| c.fingerprint.clone());
                let is_new = existing.is_none();

                let case = patch.apply(id, existing, now);
                cases.insert(id.as_bytes(), encode(&case)?)?;

                if is_new {
                    created.insert(created_key(&case), id.as_bytes())?;
                }
                if previous_fingerprint != case.fingerprint {
                    if let Some(old) = &previous_fingerprint {
                        fingerprints.remove(fingerprint_key(old, id))?;
                    }
                }
                if let Some(fp) = &case.fingerprint {
                    fingerprints.insert(fingerprint_key(fp, id), &[] as &[u8])?;
                }
                Ok(case)
            },
        )?;

        Ok(case)
    }

    fn latest_case(&self) -> StoreResult<Option<Case>> {
        // 索引里可能残留已被外部删除的案件，往前找第一条还存在的
        for entry in self.case_created.iter().rev() {
            let (_, id) = entry?;
            let id = String::from_utf8_lossy(&id).into_owned();
            if let Some(case) = self.get_case(&id)? {
                return Ok(Some(case));
            }
        }
        Ok(None)
    }

    fn cases_by_fingerprint(&self, fingerprint: &str, limit: usize) -> StoreResult<Vec<Case>> {
        let prefix = fingerprint_prefix(fingerprint);
        let mut found = Vec::new();

        for entry in self.case_fingerprint.scan_prefix(&prefix) {
            if found.len() >= limit {
                break;
            }
            let (key, _) = entry?;
            let id = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            if let Some(case) = self.get_case(&id)? {
                found.push(case);
            }
        }

        Ok(found)
    }

    fn get_evidence(&self, id: &str) -> StoreResult<Option<Evidence>> {
        Self::read(&self.evidence, id)
    }

    fn upsert_evidence(&self, seed: &Evidence, patch: &EvidencePatch, now: DateTime<Utc>) -> StoreResult<Evidence> {
        let id = seed.id.as_str();
        let evidence = (&self.evidence, &self.evidence_uploaded, &self.evidence_upload_key).transaction(
            |(docs, uploaded, upload_keys)| -> TxResult<Evidence> {
                let base = match docs.get(id.as_bytes())? {
                    Some(bytes) => decode(&bytes)?,
                    None => seed.clone(),
                };
                let evidence = patch.apply(base, now);
                docs.insert(id.as_bytes(), encode(&evidence)?)?;
                index_upload(uploaded, upload_keys, id, &upload_key(evidence.uploaded_at, id.as_bytes()))?;
                Ok(evidence)
            },
        )?;

        Ok(evidence)
    }

    fn put_evidence(&self, evidence: &Evidence) -> StoreResult<()> {
        self.put_evidence_document(&evidence.id, &serde_json::to_value(evidence)?)
    }

    fn recent_evidence(&self, limit: usize) -> StoreResult<EvidencePage> {
        let mut page = EvidencePage::default();

        for entry in self.evidence_uploaded.iter().rev() {
            if page.items.len() >= limit {
                break;
            }
            let (_, id) = entry?;
            let Some(bytes) = self.evidence.get(&id)? else {
                continue;
            };
            match serde_json::from_slice::<Evidence>(&bytes) {
                Ok(evidence) => page.items.push(evidence),
                Err(e) => {
                    let evidence_id = String::from_utf8_lossy(&id).into_owned();
                    tracing::warn!(evidence_id = %evidence_id, error = %e, "Skipping undecodable evidence document");
                    page.undecodable.push(evidence_id);
                }
            }
        }

        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::Location;
    use crate::priority::Priority;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn patch(fingerprint: Option<&str>) -> CasePatch {
        CasePatch {
            risk_score: 10,
            priority: Priority::Low,
            species_detected: "Unknown".into(),
            illegal_product: "Unknown".into(),
            reasons: vec![],
            code_words: vec![],
            fingerprint: fingerprint.map(str::to_string),
            is_duplicate: false,
            duplicate_of_case_id: None,
            confidence_score: 0.5,
            source: "AI_SCANNER".into(),
            platform_source: "Unknown".into(),
            reason_summary: String::new(),
            location: Location::default(),
            scanner_version: "v1".into(),
            ai_model_version: "m".into(),
            processing_node: "n".into(),
        }
    }

    fn ev_patch() -> EvidencePatch {
        EvidencePatch {
            case_id: "WS-0001".into(),
            ai_summary: "s".into(),
            ai_confidence: 0.4,
            fingerprint: None,
            is_duplicate: false,
            scanner_version: "v1".into(),
            ai_model_version: "m".into(),
            processing_node: "n".into(),
        }
    }

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, day, 8, 0, 0).unwrap()
    }

    fn ids(page: &EvidencePage) -> Vec<&str> {
        page.items.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn latest_case_follows_creation_time() {
        let store = SledStore::temporary().unwrap();
        assert!(store.latest_case().unwrap().is_none());

        store.upsert_case("WS-0002", &patch(None), t(2)).unwrap();
        store.upsert_case("WS-0001", &patch(None), t(1)).unwrap();
        assert_eq!(store.latest_case().unwrap().unwrap().id, "WS-0002");

        // 更新不改变创建时间，也就不改变“最新”
        store.upsert_case("WS-0001", &patch(None), t(9)).unwrap();
        assert_eq!(store.latest_case().unwrap().unwrap().id, "WS-0002");
    }

    #[test]
    fn fingerprint_index_tracks_changes() {
        let store = SledStore::temporary().unwrap();
        store.upsert_case("WS-0001", &patch(Some("aa")), t(1)).unwrap();
        store.upsert_case("WS-0002", &patch(Some("aa")), t(2)).unwrap();
        store.upsert_case("WS-0003", &patch(Some("aab")), t(3)).unwrap();

        let ids: Vec<String> = store.cases_by_fingerprint("aa", 3).unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, ["WS-0001", "WS-0002"]);
        assert_eq!(store.cases_by_fingerprint("aa", 1).unwrap().len(), 1);

        store.upsert_case("WS-0001", &patch(Some("bb")), t(4)).unwrap();
        let ids: Vec<String> = store.cases_by_fingerprint("aa", 3).unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, ["WS-0002"]);
    }

    #[test]
    fn case_document_and_indexes_commit_together() {
        let store = SledStore::temporary().unwrap();
        store.upsert_case("WS-0001", &patch(Some("aa")), t(1)).unwrap();
        assert_eq!(store.cases.len(), 1);
        assert_eq!(store.case_created.len(), 1);
        assert_eq!(store.case_fingerprint.len(), 1);

        // 已有文档坏掉：事务中止，三棵树都不动
        store.cases.insert("WS-0002", b"not json".to_vec()).unwrap();
        let err = store.upsert_case("WS-0002", &patch(Some("bb")), t(2)).unwrap_err();
        assert!(matches!(err, StoreError::Codec(_)));
        assert_eq!(store.case_created.len(), 1);
        assert_eq!(store.case_fingerprint.len(), 1);
        assert_eq!(&*store.cases.get("WS-0002").unwrap().unwrap(), &b"not json"[..]);
        assert_eq!(store.latest_case().unwrap().unwrap().id, "WS-0001");
    }

    #[test]
    fn evidence_upsert_creates_and_merges() {
        let store = SledStore::temporary().unwrap();

        let seed = Evidence {
            id: "ev-new".into(),
            platform_source: Some("TikTok".into()),
            ..Default::default()
        };
        let created = store.upsert_evidence(&seed, &ev_patch(), t(1)).unwrap();
        assert_eq!(created.id, "ev-new");
        assert_eq!(created.platform_source.as_deref(), Some("TikTok"));

        store
            .put_evidence(&Evidence {
                id: "ev-old".into(),
                caption: Some("keep me".into()),
                ..Default::default()
            })
            .unwrap();
        // 已有记录时以库里的为准，seed 的录入字段不会覆盖
        let stale_seed = Evidence {
            id: "ev-old".into(),
            caption: Some("stale".into()),
            ..Default::default()
        };
        store.upsert_evidence(&stale_seed, &ev_patch(), t(1)).unwrap();
        let merged = store.get_evidence("ev-old").unwrap().unwrap();
        assert_eq!(merged.caption.as_deref(), Some("keep me"));
        assert_eq!(merged.case_id.as_deref(), Some("WS-0001"));
    }

    #[test]
    fn recent_evidence_orders_by_upload_time() {
        let store = SledStore::temporary().unwrap();
        let base = t(1);
        for (id, offset) in [("a", Some(1)), ("b", Some(3)), ("c", None), ("d", Some(2))] {
            store
                .put_evidence(&Evidence {
                    id: id.into(),
                    uploaded_at: offset.map(|h| base + Duration::hours(h)),
                    ..Default::default()
                })
                .unwrap();
        }

        assert_eq!(ids(&store.recent_evidence(3).unwrap()), ["b", "d", "a"]);
        assert_eq!(ids(&store.recent_evidence(10).unwrap()), ["b", "d", "a", "c"]);

        // 改了上传时间，旧的索引键要被替换掉
        store
            .put_evidence(&Evidence {
                id: "a".into(),
                uploaded_at: Some(base + Duration::hours(9)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ids(&store.recent_evidence(10).unwrap()), ["a", "b", "d", "c"]);
        assert_eq!(store.evidence_uploaded.len(), 4);
    }

    #[test]
    fn undecodable_document_does_not_fail_the_page() {
        let store = SledStore::temporary().unwrap();
        store
            .put_evidence(&Evidence {
                id: "good".into(),
                uploaded_at: Some(t(2)),
                ..Default::default()
            })
            .unwrap();
        // 录入方把上传时间写成了 epoch 秒
        store
            .put_evidence_document("bad", &json!({"id": "bad", "uploadedAt": 1767225600}))
            .unwrap();
        store
            .put_evidence(&Evidence {
                id: "older".into(),
                uploaded_at: Some(t(1)),
                ..Default::default()
            })
            .unwrap();

        let page = store.recent_evidence(20).unwrap();
        assert_eq!(ids(&page), ["good", "older"]);
        assert_eq!(page.undecodable, ["bad"]);
    }

    #[test]
    fn flushed_cases_survive_reopen() {
        let dir = std::env::temp_dir().join(format!("wildscan-flush-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        {
            let store = SledStore::open(&dir).unwrap();
            store.upsert_case("WS-0007", &patch(Some("cc")), t(3)).unwrap();
            store.flush().unwrap();
        }

        let store = SledStore::open(&dir).unwrap();
        assert_eq!(store.latest_case().unwrap().unwrap().id, "WS-0007");
        assert_eq!(store.cases_by_fingerprint("cc", 3).unwrap().len(), 1);

        drop(store);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn reopening_indexes_documents_written_without_index() {
        let dir = std::env::temp_dir().join(format!("wildscan-reindex-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        {
            let db = sled::open(&dir).unwrap();
            let evidence = db.open_tree("evidence").unwrap();
            let doc = json!({"id": "raw", "uploadedAt": "2026-05-01T08:00:00Z"});
            evidence.insert("raw", serde_json::to_vec(&doc).unwrap()).unwrap();
            db.flush().unwrap();
        }

        let store = SledStore::open(&dir).unwrap();
        let page = store.recent_evidence(5).unwrap();
        assert_eq!(ids(&page), ["raw"]);
        assert_eq!(page.items[0].uploaded_at, Some(t(1)));

        drop(store);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
