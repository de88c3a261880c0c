// 该文件是 Shijue （视觉） 项目的一部分。
// src/engine.rs - 推理引擎接口
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::blob::Blob;

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("张量文件长度 {0} 不是 4 的整数倍: {1}")]
  MalformedDump(usize, PathBuf),
  #[error("输入张量形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  InputShapeMismatch {
    expected: [usize; 3],
    actual: [usize; 3],
  },
  #[error("推理后端错误: {0}")]
  Backend(Box<dyn std::error::Error + Send + Sync>),
}

/// 推理引擎：输入 (C, H, W) 张量，同步返回原始输出缓冲区
pub trait InferenceEngine {
  fn infer(&self, blob: &Blob) -> Result<Box<[f32]>, EngineError>;
}

impl<F> InferenceEngine for F
where
  F: Fn(&Blob) -> Result<Box<[f32]>, EngineError>,
{
  fn infer(&self, blob: &Blob) -> Result<Box<[f32]>, EngineError> {
    self(blob)
  }
}

/// 回放已导出的输出张量（小端 f32 原始数据）
///
/// 用于脱离加速硬件调试后处理。
#[derive(Debug, Clone)]
pub struct TensorDumpEngine {
  output: Box<[f32]>,
  input_shape: Option<[usize; 3]>,
}

impl TensorDumpEngine {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
    let path = path.as_ref();
    info!("加载输出张量文件: {}", path.display());
    let bytes = std::fs::read(path)?;
    if bytes.len() % 4 != 0 {
      return Err(EngineError::MalformedDump(bytes.len(), path.to_path_buf()));
    }

    let output: Box<[f32]> = bytes
      .chunks_exact(4)
      .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
      .collect();
    debug!(
      "输出张量大小: {} 个元素 ({:.2} MB)",
      output.len(),
      bytes.len() as f64 / (1024.0 * 1024.0)
    );

    Ok(Self::from_output(output))
  }

  pub fn from_output(output: impl Into<Box<[f32]>>) -> Self {
    Self {
      output: output.into(),
      input_shape: None,
    }
  }

  /// 要求输入张量具有固定形状 (C, H, W)
  pub fn with_input_shape(mut self, shape: [usize; 3]) -> Self {
    self.input_shape = Some(shape);
    self
  }

  pub fn output_len(&self) -> usize {
    self.output.len()
  }
}

impl InferenceEngine for TensorDumpEngine {
  fn infer(&self, blob: &Blob) -> Result<Box<[f32]>, EngineError> {
    if let Some(expected) = self.input_shape
      && expected != blob.shape()
    {
      return Err(EngineError::InputShapeMismatch {
        expected,
        actual: blob.shape(),
      });
    }
    Ok(self.output.clone())
  }
}

/// 将张量以小端 f32 写入文件，与 [`TensorDumpEngine::open`] 对应
pub fn write_tensor_dump(path: impl AsRef<Path>, data: &[f32]) -> Result<(), EngineError> {
  let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
  std::fs::write(path, bytes)?;
  Ok(())
}
