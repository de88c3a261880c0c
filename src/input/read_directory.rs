// 该文件是 Shijue （视觉） 项目的一部分。
// src/input/read_directory.rs - 目录批量图像输入
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

use image::ImageFormat;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;
use walkdir::WalkDir;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_file_path};

use super::read_image_file::read_frame;

#[derive(Error, Debug)]
pub enum DirectoryInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("Invalid path: {0}")]
  InvalidPath(String),
  #[error("Not a directory: {0}")]
  NotADirectory(PathBuf),
  #[error("Directory walk error: {0}")]
  WalkError(#[from] walkdir::Error),
}

/// 按文件名顺序逐张读取目录中的图像
///
/// 只扫描第一层，不递归子目录。无法解码的文件记录警告后跳过。
pub struct DirectoryInput {
  files: std::vec::IntoIter<PathBuf>,
  index: u64,
}

impl FromUrlWithScheme for DirectoryInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryInput {
  type Error = DirectoryInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(DirectoryInputError::SchemaMismatch);
    }

    let path = url_file_path(url).map_err(|e| DirectoryInputError::InvalidPath(e.to_string()))?;
    Self::open(path)
  }
}

impl DirectoryInput {
  pub fn open(dir: impl AsRef<Path>) -> Result<Self, DirectoryInputError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
      return Err(DirectoryInputError::NotADirectory(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
      let entry = entry?;
      if entry.file_type().is_file() && ImageFormat::from_path(entry.path()).is_ok() {
        files.push(entry.into_path());
      }
    }
    files.sort();

    info!("目录 {} 中找到 {} 张图像", dir.display(), files.len());
    Ok(DirectoryInput {
      files: files.into_iter(),
      index: 0,
    })
  }

  /// 剩余待读取的文件数
  pub fn remaining(&self) -> usize {
    self.files.len()
  }
}

impl Iterator for DirectoryInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    for path in self.files.by_ref() {
      match read_frame(&path) {
        Ok(frame) => {
          let frame = frame.with_index(self.index);
          self.index += 1;
          return Some(frame);
        }
        Err(e) => warn!("跳过无法读取的图像 {}: {}", path.display(), e),
      }
    }
    None
  }
}
