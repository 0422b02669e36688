use serde::Serialize;

use crate::store::{StoreResult, TriageStore};

/// 查重时最多取回的候选案件数
pub const DUPLICATE_CANDIDATES: usize = 3;

/// 查重结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    pub duplicate_of_case_id: Option<String>,
}

impl DuplicateCheck {
    fn unique() -> Self {
        Self::default()
    }

    fn of(case_id: String) -> Self {
        Self {
            is_duplicate: true,
            duplicate_of_case_id: Some(case_id),
        }
    }
}

/// 在已有案件里找同指纹、不同案件号的记录
///
/// 没有指纹 (空字节) 直接判为不重复；自己的案件号永远不算重复。
pub fn find_duplicate<S: TriageStore + ?Sized>(
    store: &S,
    fingerprint: Option<&str>,
    case_id: &str,
) -> StoreResult<DuplicateCheck> {
    let Some(fingerprint) = fingerprint else {
        return Ok(DuplicateCheck::unique());
    };

    let other = store
        .cases_by_fingerprint(fingerprint, DUPLICATE_CANDIDATES)?
        .into_iter()
        .find(|case| case.id != case_id);

    Ok(match other {
        Some(case) => {
            tracing::info!(case_id, duplicate_of = %case.id, "Duplicate fingerprint detected");
            DuplicateCheck::of(case.id)
        }
        None => DuplicateCheck::unique(),
    })
}
