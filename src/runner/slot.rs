use std::sync::Arc;

use parking_lot::Mutex;

use super::observation::FusedObservation;

/// 单槽观测队列
///
/// 只保留最新的一帧：push 直接覆盖，peek 不移除。
/// 锁只在替换/克隆 [Arc] 时持有，读写都不会读到写了一半的数据。
#[derive(Debug, Default)]
pub struct ObservationSlot {
    inner: Mutex<SlotState>,
}

#[derive(Debug, Default)]
struct SlotState {
    latest: Option<SlotEntry>,
    next_seq: u64,
}

#[derive(Debug, Clone)]
pub struct SlotEntry {
    /// 入队序号，每次 push 加一
    pub seq: u64,
    /// 入队时刻（秒）
    pub pushed_at: f64,
    pub observation: Arc<FusedObservation>,
}

impl ObservationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 覆盖写入，返回被覆盖的旧观测（若有）
    pub fn push(&self, observation: FusedObservation, now: f64) -> Option<SlotEntry> {
        let observation = Arc::new(observation);
        let mut state = self.inner.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.latest.replace(SlotEntry {
            seq,
            pushed_at: now,
            observation,
        })
    }

    pub fn peek_latest(&self) -> Option<SlotEntry> {
        self.inner.lock().latest.clone()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().latest.is_none()
    }

    /// 总共 push 过的次数
    pub fn pushed(&self) -> u64 {
        self.inner.lock().next_seq
    }
}
