//! 建图引擎接口
//!
//! 调度器只通过 [MappingEngine] 调用下游。引擎内部是否并发由引擎自己负责。

mod keyframe_policy;
mod trajectory;

pub use keyframe_policy::{KeyframePolicy, KeyframePolicyConfig};
pub use trajectory::TrajectoryEngine;

use nalgebra::Matrix4;

use crate::runner::FusedObservation;

pub trait MappingEngine: Send {
    /// 引擎自己计算轨迹时，不做数据流停止检测
    fn calculate_path(&self) -> bool;

    /// 是否把该时刻、该位姿的观测作为关键帧
    fn check_keyframe(&mut self, timestamp: f64, pose: &Matrix4<f64>) -> bool;

    /// 下一个关键帧编号
    fn keyframe_idx(&self) -> usize;

    fn sequential_process(&mut self, observation: FusedObservation) -> anyhow::Result<()>;

    fn parallel_process(&mut self, observation: FusedObservation) -> anyhow::Result<()>;

    /// 数据流结束
    fn end_process(&mut self) -> anyhow::Result<()>;
}
