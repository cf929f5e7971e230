//! 关键帧输出

mod keyframe;

pub use keyframe::{KeyframeRecord, KeyframeWriter};
