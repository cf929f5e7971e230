use std::path::Path;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context};
use crossbeam_channel::Sender;
use nalgebra::Matrix4;

use super::{KeyframePolicy, KeyframePolicyConfig, MappingEngine};
use crate::runner::FusedObservation;
use crate::save::{KeyframeRecord, KeyframeWriter};

/// 最简单的建图引擎：记录关键帧轨迹
///
/// 顺序模式在调度线程里直接写；并行模式交给后台写线程，调度线程立即返回。
#[derive(Debug)]
pub struct TrajectoryEngine {
    policy: KeyframePolicy,
    keyframes: Vec<KeyframeRecord>,
    writer: Option<KeyframeWriter>,
    worker: Option<Worker>,
    next_idx: usize,
}

#[derive(Debug)]
struct Worker {
    tx: Sender<KeyframeRecord>,
    handle: JoinHandle<anyhow::Result<(Vec<KeyframeRecord>, Option<KeyframeWriter>)>>,
}

impl TrajectoryEngine {
    pub fn new(policy: KeyframePolicyConfig, output_path: Option<&Path>) -> anyhow::Result<Self> {
        let writer = output_path.map(KeyframeWriter::create).transpose()?;
        if let Some(writer) = &writer {
            log::info!("[Engine] writing keyframes to {:?}", writer.path());
        }
        Ok(Self {
            policy: KeyframePolicy::new(policy),
            keyframes: Vec::new(),
            writer,
            worker: None,
            next_idx: 0,
        })
    }

    #[cfg(test)]
    pub fn keyframes(&self) -> &[KeyframeRecord] {
        &self.keyframes
    }

    fn spawn_worker(&mut self) -> anyhow::Result<&Worker> {
        if self.worker.is_none() {
            let (tx, rx) = crossbeam_channel::unbounded::<KeyframeRecord>();
            let mut writer = self.writer.take();
            let handle = thread::Builder::new()
                .name("keyframe-writer".into())
                .spawn(move || {
                    let mut records = Vec::new();
                    for record in rx {
                        if let Some(writer) = writer.as_mut() {
                            writer.write(&record)?;
                        }
                        records.push(record);
                    }
                    Ok((records, writer))
                })
                .context("failed to spawn keyframe writer")?;
            self.worker = Some(Worker { tx, handle });
        }
        self.worker
            .as_ref()
            .ok_or_else(|| anyhow!("keyframe writer is not running"))
    }

    fn join_worker(&mut self) -> anyhow::Result<()> {
        let Some(Worker { tx, handle }) = self.worker.take() else {
            return Ok(());
        };
        drop(tx);
        let (records, writer) = handle
            .join()
            .map_err(|_| anyhow!("keyframe writer panicked"))??;
        self.keyframes.extend(records);
        self.writer = writer;
        Ok(())
    }
}

impl MappingEngine for TrajectoryEngine {
    fn calculate_path(&self) -> bool {
        false
    }

    fn check_keyframe(&mut self, timestamp: f64, pose: &Matrix4<f64>) -> bool {
        self.policy.check(timestamp, pose)
    }

    fn keyframe_idx(&self) -> usize {
        self.next_idx
    }

    fn sequential_process(&mut self, observation: FusedObservation) -> anyhow::Result<()> {
        let record = KeyframeRecord::from(&observation);
        if let Some(writer) = self.writer.as_mut() {
            writer.write(&record)?;
        }
        self.keyframes.push(record);
        self.next_idx += 1;
        Ok(())
    }

    fn parallel_process(&mut self, observation: FusedObservation) -> anyhow::Result<()> {
        let record = KeyframeRecord::from(&observation);
        self.spawn_worker()?
            .tx
            .send(record)
            .map_err(|_| anyhow!("keyframe writer stopped"))?;
        self.next_idx += 1;
        Ok(())
    }

    fn end_process(&mut self) -> anyhow::Result<()> {
        self.join_worker()?;
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        log::warn!(
            "[Engine] end of stream, {} keyframes recorded",
            self.keyframes.len()
        );
        Ok(())
    }
}

impl Drop for TrajectoryEngine {
    /// 未走 end_process 就退出时，等写线程写完剩余关键帧
    fn drop(&mut self) {
        if let Err(e) = self.join_worker() {
            log::error!("[Engine] keyframe writer: {:#}", e);
        }
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                log::error!("[Engine] failed to flush keyframes: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::observation::blank_observation;

    #[test]
    fn sequential_records_in_order() {
        let mut engine = TrajectoryEngine::new(KeyframePolicyConfig::default(), None).unwrap();
        for i in 0..3 {
            assert_eq!(engine.keyframe_idx(), i);
            engine
                .sequential_process(blank_observation(i, i as f64, Matrix4::identity()))
                .unwrap();
        }
        engine.end_process().unwrap();
        let indices: Vec<usize> = engine.keyframes().iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn parallel_records_after_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine =
            TrajectoryEngine::new(KeyframePolicyConfig::default(), Some(dir.path())).unwrap();
        for i in 0..4 {
            engine
                .parallel_process(blank_observation(i, i as f64, Matrix4::identity()))
                .unwrap();
        }
        assert_eq!(engine.keyframe_idx(), 4);
        engine.end_process().unwrap();
        assert_eq!(engine.keyframes().len(), 4);

        let text = std::fs::read_to_string(dir.path().join(KeyframeWriter::FILE_NAME)).unwrap();
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn drop_without_end_keeps_parallel_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine =
            TrajectoryEngine::new(KeyframePolicyConfig::default(), Some(dir.path())).unwrap();
        for i in 0..5 {
            engine
                .parallel_process(blank_observation(i, i as f64, Matrix4::identity()))
                .unwrap();
        }
        drop(engine);

        let text = std::fs::read_to_string(dir.path().join(KeyframeWriter::FILE_NAME)).unwrap();
        assert_eq!(text.lines().count(), 5);
    }
}
