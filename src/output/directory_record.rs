// 该文件是 Shijue （视觉） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
use std::sync::atomic::{AtomicU16, Ordering};

use chrono::{DateTime, Datelike, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{DetectResult, SegmentResult, WithLabel, WithPalette},
  output::{
    Render,
    draw::{Draw, DrawResult, Record, RecordFormat, RecordResult},
  },
  url_file_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无效路径: {0}")]
  InvalidPath(String),
  #[error("未知的记录格式: {0}")]
  UnknownRecordFormat(String),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

pub enum DrawWrapper<'a> {
  Draw(Box<Draw<'a>>),
  Record(Record),
}

impl DrawWrapper<'_> {
  pub fn save_result<R>(
    &self,
    path: &Path,
    frame: &Frame,
    result: &R,
  ) -> Result<(), DirectoryRecordOutputError>
  where
    for<'d> Draw<'d>: DrawResult<R>,
    Record: RecordResult<R>,
  {
    match self {
      DrawWrapper::Draw(draw) => {
        draw.draw_result(frame, result).save(path)?;
      }
      DrawWrapper::Record(record) => {
        frame.image().save(path)?;
        record.record(frame, result, path)?;
      }
    };

    Ok(())
  }

  pub fn with(kind: Option<&str>) -> Result<Self, DirectoryRecordOutputError> {
    let format = match kind {
      None => return Ok(DrawWrapper::Draw(Box::default())),
      Some("name") | Some("") => RecordFormat::Name,
      Some("id") => RecordFormat::Id,
      Some("json") => RecordFormat::Json,
      Some(other) => {
        return Err(DirectoryRecordOutputError::UnknownRecordFormat(
          other.to_string(),
        ));
      }
    };
    Ok(DrawWrapper::Record(Record { format }))
  }
}

/// 按日期分目录保存每一帧
///
/// 文件位于 `<dir>/YYYY/MM/DD/`，名为 `HH-MM-SS[-name]-XXXX.png`，
/// `XXXX` 为十六进制帧计数。没有结果的帧默认跳过，`always` 时照常保存。
pub struct DirectoryRecordOutput<'a> {
  directory: PathBuf,
  draw: DrawWrapper<'a>,
  frame_counter: AtomicU16,
  always: bool,
}

impl<'a> FromUrlWithScheme for DirectoryRecordOutput<'a> {
  const SCHEME: &'static str = "folder";
}

impl<'a> FromUrl for DirectoryRecordOutput<'a> {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let kind = uri
      .query_pairs()
      .find(|(k, _)| k == "record")
      .map(|(_, v)| v.into_owned());
    let always = uri.query_pairs().any(|(k, _)| k == "always");
    let directory =
      url_file_path(uri).map_err(|e| DirectoryRecordOutputError::InvalidPath(e.to_string()))?;

    info!("记录输出目录: {}", directory.display());
    Ok(DirectoryRecordOutput {
      directory,
      draw: DrawWrapper::with(kind.as_deref())?,
      frame_counter: AtomicU16::new(0),
      always,
    })
  }
}

impl<'a> DirectoryRecordOutput<'a> {
  fn frame_id(&self) -> u16 {
    self
      .frame_counter
      .fetch_add(1, Ordering::Relaxed)
      .wrapping_add(1)
  }

  fn frame_path(&self, frame: &Frame, now: DateTime<Utc>) -> Result<PathBuf, std::io::Error> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    let time = now.format("%H-%M-%S");
    let filename = match frame.name() {
      Some(name) => format!("{}-{}-{:04X}.png", time, name, self.frame_id()),
      None => format!("{}-{:04X}.png", time, self.frame_id()),
    };
    Ok(directory.join(filename))
  }

  fn save<R>(&self, frame: &Frame, result: &R, empty: bool) -> Result<(), DirectoryRecordOutputError>
  where
    for<'d> Draw<'d>: DrawResult<R>,
    Record: RecordResult<R>,
  {
    if empty && !self.always {
      debug!("帧 {} 没有结果，跳过", frame.index());
      return Ok(());
    }
    let path = self.frame_path(frame, Utc::now())?;
    self.draw.save_result(&path, frame, result)?;
    debug!("保存帧 {} 到 {}", frame.index(), path.display());
    Ok(())
  }
}

impl<'a, T: WithLabel> Render<Frame, DetectResult<T>> for DirectoryRecordOutput<'a> {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Frame, result: &DetectResult<T>) -> Result<(), Self::Error> {
    self.save(frame, result, result.is_empty())
  }
}

impl<'a, T: WithPalette> Render<Frame, SegmentResult<T>> for DirectoryRecordOutput<'a> {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Frame, result: &SegmentResult<T>) -> Result<(), Self::Error> {
    // 只有背景类别时视为无结果
    let empty = result
      .present_classes()
      .iter()
      .all(|(kind, _)| kind.to_label_id() == 0);
    self.save(frame, result, empty)
  }
}
