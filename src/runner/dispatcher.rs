use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use nalgebra::Matrix4;

use super::clock::Clock;
use super::slot::ObservationSlot;
use crate::engine::MappingEngine;
use crate::signal::ShutdownToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    #[default]
    Sequential,
    Parallel,
}

impl DispatchMode {
    pub fn from_parallel_flag(use_parallel: bool) -> Self {
        if use_parallel {
            DispatchMode::Parallel
        } else {
            DispatchMode::Sequential
        }
    }
}

/// 一次 tick 的结果
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// 队列为空
    Idle,
    /// 数据流停止，已调用 end_process
    Stalled,
    /// 已经结束，不再处理
    Finished,
    /// 队列里仍是上次评估过的观测
    AlreadyEvaluated,
    /// 不是关键帧
    Rejected,
    Dispatched { index: usize, elapsed: Duration },
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub world_transform: Matrix4<f64>,
    pub extrinsics: Matrix4<f64>,
    pub mode: DispatchMode,
    pub use_end_process: bool,
    pub stall_timeout: f64,
}

/// 关键帧调度
///
/// 按固定频率 tick：取队列里最新的观测，把位姿转到世界系后问引擎是否为关键帧，
/// 是则写入关键帧编号，再按模式交给引擎处理。
/// 长时间没有新数据时调用 end_process 并请求退出。
pub struct KeyframeDispatcher<E: MappingEngine> {
    engine: E,
    slot: Arc<ObservationSlot>,
    shutdown: ShutdownToken,
    config: DispatcherConfig,
    /// 上次评估过的入队序号
    last_evaluated: Option<u64>,
    finished: bool,
}

impl<E: MappingEngine> KeyframeDispatcher<E> {
    pub fn new(
        engine: E,
        slot: Arc<ObservationSlot>,
        shutdown: ShutdownToken,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            engine,
            slot,
            shutdown,
            config,
            last_evaluated: None,
            finished: false,
        }
    }

    #[cfg(test)]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    #[cfg(test)]
    pub fn into_engine(self) -> E {
        self.engine
    }

    pub fn tick(&mut self, now: f64) -> anyhow::Result<TickOutcome> {
        if self.finished {
            return Ok(TickOutcome::Finished);
        }
        let Some(entry) = self.slot.peek_latest() else {
            return Ok(TickOutcome::Idle);
        };

        if self.config.use_end_process
            && !self.engine.calculate_path()
            && now - entry.pushed_at > self.config.stall_timeout
        {
            log::warn!(
                "[Dispatcher] No data for {:.1}s, ending process.",
                now - entry.pushed_at
            );
            self.finished = true;
            let result = self.engine.end_process();
            self.shutdown.request();
            result.context("end_process failed")?;
            return Ok(TickOutcome::Stalled);
        }

        if self.last_evaluated == Some(entry.seq) {
            return Ok(TickOutcome::AlreadyEvaluated);
        }
        self.last_evaluated = Some(entry.seq);

        let observation = &entry.observation;
        let anchored =
            self.config.world_transform * (observation.pose * self.config.extrinsics);
        if !self.engine.check_keyframe(observation.timestamp, &anchored) {
            return Ok(TickOutcome::Rejected);
        }

        let mut keyframe = (**observation).clone();
        drop(entry);
        keyframe.pose = anchored;
        keyframe.index = self.engine.keyframe_idx();
        let index = keyframe.index;
        let timestamp = keyframe.timestamp;

        let start = Instant::now();
        match self.config.mode {
            DispatchMode::Sequential => self.engine.sequential_process(keyframe),
            DispatchMode::Parallel => self.engine.parallel_process(keyframe),
        }
        .with_context(|| format!("processing keyframe {} at {:.3}", index, timestamp))?;
        let elapsed = start.elapsed();
        log::info!(
            "[Dispatcher] keyframe {} ({:?}) processed in {:.3}s",
            index,
            self.config.mode,
            elapsed.as_secs_f64()
        );
        Ok(TickOutcome::Dispatched { index, elapsed })
    }

    /// 调度循环，直到请求退出
    ///
    /// 单次 tick 出错只记录日志，继续下一次。
    pub fn run(&mut self, rate_hz: f64, clock: &dyn Clock) {
        let ticker = crossbeam_channel::tick(Duration::from_secs_f64(1.0 / rate_hz));
        log::info!("[Dispatcher] running at {} Hz", rate_hz);
        while !self.shutdown.is_requested() {
            if let Err(e) = self.tick(clock.now()) {
                log::error!("[Dispatcher] Exception: {:#}", e);
            }
            if ticker.recv().is_err() {
                break;
            }
        }
        log::info!("[Dispatcher] stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::clock::ManualClock;
    use crate::runner::observation::blank_observation;
    use crate::runner::FusedObservation;
    use approx::assert_relative_eq;

    /// 记录调用的假引擎
    #[derive(Debug, Default)]
    struct MockEngine {
        calculate_path: bool,
        accept: bool,
        fail_process: bool,
        checks: usize,
        checked_poses: Vec<Matrix4<f64>>,
        ends: usize,
        sequential: Vec<FusedObservation>,
        parallel: Vec<FusedObservation>,
    }

    impl MappingEngine for MockEngine {
        fn calculate_path(&self) -> bool {
            self.calculate_path
        }
        fn check_keyframe(&mut self, _timestamp: f64, pose: &Matrix4<f64>) -> bool {
            self.checks += 1;
            self.checked_poses.push(*pose);
            self.accept
        }
        fn keyframe_idx(&self) -> usize {
            100 + self.sequential.len() + self.parallel.len()
        }
        fn sequential_process(&mut self, observation: FusedObservation) -> anyhow::Result<()> {
            if self.fail_process {
                anyhow::bail!("boom");
            }
            self.sequential.push(observation);
            Ok(())
        }
        fn parallel_process(&mut self, observation: FusedObservation) -> anyhow::Result<()> {
            self.parallel.push(observation);
            Ok(())
        }
        fn end_process(&mut self) -> anyhow::Result<()> {
            self.ends += 1;
            Ok(())
        }
    }

    fn config(mode: DispatchMode) -> DispatcherConfig {
        DispatcherConfig {
            world_transform: Matrix4::identity(),
            extrinsics: Matrix4::identity(),
            mode,
            use_end_process: true,
            stall_timeout: 20.0,
        }
    }

    fn dispatcher(
        engine: MockEngine,
        config: DispatcherConfig,
    ) -> (KeyframeDispatcher<MockEngine>, Arc<ObservationSlot>, ShutdownToken) {
        let slot = Arc::new(ObservationSlot::new());
        let shutdown = ShutdownToken::new();
        (
            KeyframeDispatcher::new(engine, slot.clone(), shutdown.clone(), config),
            slot,
            shutdown,
        )
    }

    fn accepting() -> MockEngine {
        MockEngine {
            accept: true,
            ..Default::default()
        }
    }

    #[test]
    fn empty_queue_is_idle() {
        let (mut d, _, _) = dispatcher(accepting(), config(DispatchMode::Sequential));
        assert_eq!(d.tick(100.0).unwrap(), TickOutcome::Idle);
        assert_eq!(d.engine().checks, 0);
    }

    #[test]
    fn stall_ends_process_once() {
        let (mut d, slot, shutdown) = dispatcher(accepting(), config(DispatchMode::Sequential));
        slot.push(blank_observation(0, 0.0, Matrix4::identity()), 0.0);

        assert!(matches!(d.tick(1.0).unwrap(), TickOutcome::Dispatched { .. }));
        assert_eq!(d.tick(21.0).unwrap(), TickOutcome::Stalled);
        assert!(shutdown.is_requested());
        assert_eq!(d.tick(22.0).unwrap(), TickOutcome::Finished);
        assert_eq!(d.engine().ends, 1);
    }

    #[test]
    fn push_resets_stall_timer() {
        let (mut d, slot, shutdown) = dispatcher(accepting(), config(DispatchMode::Sequential));
        slot.push(blank_observation(0, 0.0, Matrix4::identity()), 0.0);
        d.tick(0.0).unwrap();
        slot.push(blank_observation(1, 19.0, Matrix4::identity()), 19.0);
        assert!(matches!(d.tick(20.0).unwrap(), TickOutcome::Dispatched { .. }));
        assert_eq!(d.tick(20.5).unwrap(), TickOutcome::AlreadyEvaluated);
        assert!(!shutdown.is_requested());
        assert_eq!(d.engine().ends, 0);
    }

    #[test]
    fn no_stall_when_engine_calculates_path_or_disabled() {
        let engine = MockEngine {
            calculate_path: true,
            ..accepting()
        };
        let (mut d, slot, shutdown) = dispatcher(engine, config(DispatchMode::Sequential));
        slot.push(blank_observation(0, 0.0, Matrix4::identity()), 0.0);
        d.tick(0.0).unwrap();
        assert_eq!(d.tick(100.0).unwrap(), TickOutcome::AlreadyEvaluated);
        assert!(!shutdown.is_requested());

        let mut disabled = config(DispatchMode::Sequential);
        disabled.use_end_process = false;
        let (mut d, slot, _) = dispatcher(accepting(), disabled);
        slot.push(blank_observation(0, 0.0, Matrix4::identity()), 0.0);
        d.tick(0.0).unwrap();
        assert_eq!(d.tick(100.0).unwrap(), TickOutcome::AlreadyEvaluated);
        assert_eq!(d.engine().ends, 0);
    }

    #[test]
    fn rejected_observation_is_not_retried() {
        let engine = MockEngine::default();
        let (mut d, slot, _) = dispatcher(engine, config(DispatchMode::Sequential));
        slot.push(blank_observation(0, 0.0, Matrix4::identity()), 0.0);
        assert_eq!(d.tick(0.1).unwrap(), TickOutcome::Rejected);
        assert_eq!(d.tick(0.2).unwrap(), TickOutcome::AlreadyEvaluated);
        assert_eq!(d.engine().checks, 1);

        slot.push(blank_observation(1, 0.3, Matrix4::identity()), 0.3);
        assert_eq!(d.tick(0.4).unwrap(), TickOutcome::Rejected);
        assert_eq!(d.engine().checks, 2);
    }

    #[test]
    fn dispatch_applies_extrinsics_then_world() {
        let mut extrinsics = Matrix4::identity();
        extrinsics[(0, 3)] = 1.0;
        let mut cfg = config(DispatchMode::Sequential);
        cfg.extrinsics = extrinsics;
        let (mut d, slot, _) = dispatcher(accepting(), cfg);

        slot.push(blank_observation(0, 5.0, Matrix4::identity()), 5.0);
        let outcome = d.tick(5.0).unwrap();
        assert!(matches!(outcome, TickOutcome::Dispatched { index: 100, .. }));

        let processed = &d.engine().sequential[0];
        assert_eq!(processed.pose, extrinsics);
        assert_eq!(processed.index, 100);
        // 队列中的原观测不被修改
        assert_eq!(slot.peek_latest().unwrap().observation.index, 0);
        assert_eq!(slot.peek_latest().unwrap().observation.pose, Matrix4::identity());
    }

    #[test]
    fn world_transform_is_applied_last() {
        let world = crate::utility::Utility::world_transform(0.0, 0.0, 90.0);
        let mut extrinsics = Matrix4::identity();
        extrinsics[(0, 3)] = 1.0;
        let mut raw = Matrix4::identity();
        raw[(1, 3)] = 2.0;

        let mut cfg = config(DispatchMode::Sequential);
        cfg.world_transform = world;
        cfg.extrinsics = extrinsics;
        let (mut d, slot, _) = dispatcher(accepting(), cfg);
        slot.push(blank_observation(0, 0.0, raw), 0.0);
        d.tick(0.0).unwrap();

        let pose = d.engine().sequential[0].pose;
        // raw * ext 平移 (1, 2, 0)，绕 z 转 90 度后为 (-2, 1, 0)
        assert_relative_eq!(pose[(0, 3)], -2.0, epsilon = 1e-12);
        assert_relative_eq!(pose[(1, 3)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(pose, world * (raw * extrinsics));
        assert_relative_eq!(d.engine().checked_poses[0], pose);
    }

    #[test]
    fn keyframe_gate_sees_world_pose() {
        use crate::engine::{KeyframePolicyConfig, TrajectoryEngine};

        // 相机相对机体偏 1m，机体原地转 90 度：原始位姿平移不变，世界系下相机移动约 1.41m
        let mut extrinsics = Matrix4::identity();
        extrinsics[(0, 3)] = 1.0;
        let mut cfg = config(DispatchMode::Sequential);
        cfg.extrinsics = extrinsics;
        let policy = KeyframePolicyConfig {
            min_translation: 0.5,
            min_rotation: 360.0,
            max_interval: 100.0,
        };
        let engine = TrajectoryEngine::new(policy, None).unwrap();
        let slot = Arc::new(ObservationSlot::new());
        let mut d = KeyframeDispatcher::new(engine, slot.clone(), ShutdownToken::new(), cfg);

        slot.push(blank_observation(0, 0.0, Matrix4::identity()), 0.0);
        assert!(matches!(d.tick(0.0).unwrap(), TickOutcome::Dispatched { .. }));

        let turned = crate::utility::Utility::world_transform(0.0, 0.0, 90.0);
        slot.push(blank_observation(1, 0.1, turned), 0.1);
        assert!(matches!(d.tick(0.1).unwrap(), TickOutcome::Dispatched { index: 1, .. }));
    }

    #[test]
    fn parallel_mode_uses_parallel_process() {
        let (mut d, slot, _) = dispatcher(accepting(), config(DispatchMode::Parallel));
        slot.push(blank_observation(0, 0.0, Matrix4::identity()), 0.0);
        d.tick(0.0).unwrap();
        let engine = d.into_engine();
        assert_eq!(engine.parallel.len(), 1);
        assert!(engine.sequential.is_empty());
    }

    #[test]
    fn processing_error_does_not_stop_next_frame() {
        let engine = MockEngine {
            fail_process: true,
            ..accepting()
        };
        let (mut d, slot, _) = dispatcher(engine, config(DispatchMode::Sequential));
        slot.push(blank_observation(0, 0.0, Matrix4::identity()), 0.0);
        assert!(d.tick(0.0).is_err());
        assert_eq!(d.tick(0.1).unwrap(), TickOutcome::AlreadyEvaluated);

        d.engine.fail_process = false;
        slot.push(blank_observation(1, 0.2, Matrix4::identity()), 0.2);
        assert!(matches!(d.tick(0.3).unwrap(), TickOutcome::Dispatched { .. }));
    }

    #[test]
    fn run_loop_stops_on_stall() {
        let (mut d, slot, shutdown) = dispatcher(accepting(), config(DispatchMode::Sequential));
        slot.push(blank_observation(0, 0.0, Matrix4::identity()), 0.0);
        let clock = ManualClock::default();
        clock.set(30.0);
        d.run(200.0, &clock);
        assert!(shutdown.is_requested());
        assert_eq!(d.engine().ends, 1);
    }
}
