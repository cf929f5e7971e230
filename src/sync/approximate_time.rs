use std::collections::VecDeque;

use super::Stamped;
use crate::global_types::Timestamp;

/// 三路近似时间同步
///
/// 每路最多缓存 `queue_size` 条消息，满了丢最旧的。每来一条消息尝试匹配：
/// 在三路缓存的所有组合里找跨度不超过 `slop` 的一组，优先最早的一组，
/// 同样早时取跨度最小的；输出后丢掉三路中比它更旧的消息。
/// 找不到时，最旧的队首若已不可能再匹配就丢掉，否则等待新消息。
#[derive(Debug)]
pub struct ApproximateTimeSync<A, B, C> {
    slop: f64,
    queue_size: usize,
    a: VecDeque<A>,
    b: VecDeque<B>,
    c: VecDeque<C>,
    /// 被丢弃的消息数
    dropped: usize,
}

impl<A, B, C> ApproximateTimeSync<A, B, C>
where
    A: Stamped,
    B: Stamped,
    C: Stamped,
{
    pub fn new(slop: f64, queue_size: usize) -> Self {
        let queue_size = queue_size.max(1);
        Self {
            slop,
            queue_size,
            a: VecDeque::with_capacity(queue_size),
            b: VecDeque::with_capacity(queue_size),
            c: VecDeque::with_capacity(queue_size),
            dropped: 0,
        }
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn push_a(&mut self, msg: A) -> Option<(A, B, C)> {
        self.dropped += enqueue(&mut self.a, msg, self.queue_size, "a");
        self.try_match()
    }

    pub fn push_b(&mut self, msg: B) -> Option<(A, B, C)> {
        self.dropped += enqueue(&mut self.b, msg, self.queue_size, "b");
        self.try_match()
    }

    pub fn push_c(&mut self, msg: C) -> Option<(A, B, C)> {
        self.dropped += enqueue(&mut self.c, msg, self.queue_size, "c");
        self.try_match()
    }

    fn fronts(&self) -> Option<[Timestamp; 3]> {
        Some([
            self.a.front()?.stamp(),
            self.b.front()?.stamp(),
            self.c.front()?.stamp(),
        ])
    }

    /// 跨度不超过 slop 的组合下标：最新时间戳最早者优先，其次跨度最小
    fn best_match(&self) -> Option<[usize; 3]> {
        let a = stamps(&self.a);
        let b = stamps(&self.b);
        let c = stamps(&self.c);
        let mut best: Option<(Timestamp, f64, [usize; 3])> = None;
        for (i, ta) in a.iter().enumerate() {
            for (j, tb) in b.iter().enumerate() {
                if ta.duration_since(tb).abs() > self.slop {
                    continue;
                }
                for (k, tc) in c.iter().enumerate() {
                    let lo = (*ta).min(*tb).min(*tc);
                    let hi = (*ta).max(*tb).max(*tc);
                    let spread = hi.duration_since(&lo);
                    if spread > self.slop {
                        continue;
                    }
                    let better = match &best {
                        None => true,
                        Some((best_hi, best_spread, _)) => {
                            hi < *best_hi || (hi == *best_hi && spread < *best_spread)
                        }
                    };
                    if better {
                        best = Some((hi, spread, [i, j, k]));
                    }
                }
            }
        }
        best.map(|(_, _, index)| index)
    }

    /// 该时刻的消息是否还可能和 `skip` 以外的两路凑成一组
    fn can_still_match(&self, stamp: Timestamp, skip: usize) -> bool {
        let a = skip == 0 || reachable(&self.a, stamp, self.slop);
        let b = skip == 1 || reachable(&self.b, stamp, self.slop);
        let c = skip == 2 || reachable(&self.c, stamp, self.slop);
        a && b && c
    }

    fn try_match(&mut self) -> Option<(A, B, C)> {
        loop {
            let fronts = self.fronts()?;
            if let Some([i, j, k]) = self.best_match() {
                self.dropped += i + j + k;
                return Some((
                    take_at(&mut self.a, i)?,
                    take_at(&mut self.b, j)?,
                    take_at(&mut self.c, k)?,
                ));
            }

            let (oldest, lo) = fronts
                .iter()
                .copied()
                .enumerate()
                .min_by_key(|(_, stamp)| *stamp)?;
            if self.can_still_match(lo, oldest) {
                return None;
            }
            log::debug!(
                "[Sync] message at {:.3} can no longer match within {:.3}s, dropping",
                lo.as_sec(),
                self.slop
            );
            match oldest {
                0 => {
                    self.a.pop_front();
                }
                1 => {
                    self.b.pop_front();
                }
                _ => {
                    self.c.pop_front();
                }
            }
            self.dropped += 1;
        }
    }
}

fn stamps<T: Stamped>(queue: &VecDeque<T>) -> Vec<Timestamp> {
    queue.iter().map(Stamped::stamp).collect()
}

/// 队列里已有或之后到达的消息能否落在 stamp ± slop 内
fn reachable<T: Stamped>(queue: &VecDeque<T>, stamp: Timestamp, slop: f64) -> bool {
    let Some(back) = queue.back() else {
        return true;
    };
    // 之后的消息不早于队尾
    if back.stamp().duration_since(&stamp) <= slop {
        return true;
    }
    queue
        .iter()
        .any(|msg| msg.stamp().duration_since(&stamp).abs() <= slop)
}

/// 取出下标处的消息，之前的一并丢弃
fn take_at<T>(queue: &mut VecDeque<T>, index: usize) -> Option<T> {
    queue.drain(..index);
    queue.pop_front()
}

/// 入队，返回丢弃的消息数
fn enqueue<T: Stamped>(queue: &mut VecDeque<T>, msg: T, queue_size: usize, name: &str) -> usize {
    if let Some(back) = queue.back() {
        if msg.stamp() < back.stamp() {
            log::debug!(
                "[Sync] stream {} went back in time ({:.3} < {:.3}), dropping",
                name,
                msg.stamp().as_sec(),
                back.stamp().as_sec()
            );
            return 1;
        }
    }
    let mut dropped = 0;
    while queue.len() >= queue_size {
        queue.pop_front();
        dropped += 1;
    }
    queue.push_back(msg);
    dropped
}
