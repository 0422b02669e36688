use tokio::sync::{Mutex, MutexGuard};

use crate::store::{StoreResult, TriageStore};

pub const CASE_ID_PREFIX: &str = "WS-";
pub const FIRST_CASE_ID: &str = "WS-0001";

/// 由上一个案件号推出下一个
///
/// `WS-0042` -> `WS-0043`；没有上一个、或者格式不对 (`WS-abc`、`CASE-7`) 都从 `WS-0001` 重新开始。
pub fn next_case_id(latest: Option<&str>) -> String {
    let number = latest
        .and_then(|id| id.strip_prefix(CASE_ID_PREFIX))
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse::<u64>().ok())
        .and_then(|n| n.checked_add(1));

    match number {
        Some(n) => format!("{CASE_ID_PREFIX}{n:04}"),
        None => FIRST_CASE_ID.to_string(),
    }
}

/// 案件号分配器
///
/// “读最新案件 -> 加一” 本身不是原子的：两条并发证据会读到同一个最新案件，算出同一个号。
/// 所以分配必须拿 `reserve()` 返回的预留凭证，并且一直持有到新案件写入存储为止。
#[derive(Debug, Default)]
pub struct CaseIdAllocator {
    lock: Mutex<()>,
}

impl CaseIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reserve(&self) -> CaseIdReservation<'_> {
        CaseIdReservation {
            _guard: self.lock.lock().await,
        }
    }
}

/// 持有期间没有别的分配能发生
pub struct CaseIdReservation<'a> {
    _guard: MutexGuard<'a, ()>,
}

/// 从存储里最新的案件推出下一个案件号
///
/// 调用方必须持有 `CaseIdReservation`，直到用这个号的案件写入完成。
pub fn allocate_case_id<S: TriageStore + ?Sized>(store: &S) -> StoreResult<String> {
    let latest = store.latest_case()?;
    let id = next_case_id(latest.as_ref().map(|case| case.id.as_str()));
    tracing::debug!(latest = ?latest.map(|case| case.id), next = %id, "Allocated case id");
    Ok(id)
}
