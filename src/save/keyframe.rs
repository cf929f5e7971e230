use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::runner::FusedObservation;

/// 关键帧记录，一行一个 JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyframeRecord {
    pub index: usize,
    pub timestamp: f64,
    pub color_name: String,
    pub height: usize,
    pub width: usize,
    /// 行优先
    pub intrinsics: Option<[[f64; 3]; 3]>,
    /// 世界系位姿，行优先
    pub pose: [[f64; 4]; 4],
}

impl From<&FusedObservation> for KeyframeRecord {
    fn from(observation: &FusedObservation) -> Self {
        let (height, width) = observation.image_size();
        let pose = &observation.pose;
        Self {
            index: observation.index,
            timestamp: observation.timestamp,
            color_name: observation.color_name.clone(),
            height,
            width,
            intrinsics: observation
                .intrinsics
                .map(|k| std::array::from_fn(|i| std::array::from_fn(|j| k[(i, j)]))),
            pose: std::array::from_fn(|i| std::array::from_fn(|j| pose[(i, j)])),
        }
    }
}

#[derive(Debug)]
pub struct KeyframeWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl KeyframeWriter {
    pub const FILE_NAME: &'static str = "keyframes.jsonl";

    pub fn create(dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {:?}", dir))?;
        let path = dir.join(Self::FILE_NAME);
        let file = File::create(&path).with_context(|| format!("failed to create {:?}", path))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, record: &KeyframeRecord) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
