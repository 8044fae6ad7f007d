// 该文件是 MapBench （扰动精度评测） 项目的一部分。
// src/frame.rs - 图像帧读取
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::debug;

/// 支持的图像文件扩展名
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("I/O 错误: {path}: {source}")]
  IoError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("图像解码错误: {path}: {source}")]
  ImageLoadError {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
}

/// 单帧图像
#[derive(Debug, Clone)]
pub struct Frame {
  /// 帧索引，即排序后的位置
  pub index: u32,
  /// 源文件路径
  pub path: PathBuf,
  /// RGB 图像数据
  pub image: RgbImage,
}

impl Frame {
  pub fn open(index: u32, path: &Path) -> Result<Self, FrameError> {
    let image = ImageReader::open(path)
      .map_err(|source| FrameError::IoError {
        path: path.to_path_buf(),
        source,
      })?
      .decode()
      .map_err(|source| FrameError::ImageLoadError {
        path: path.to_path_buf(),
        source,
      })?
      .to_rgb8();

    debug!(
      "读取图像 {} ({}x{})",
      path.display(),
      image.width(),
      image.height()
    );

    Ok(Frame {
      index,
      path: path.to_path_buf(),
      image,
    })
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  /// 去掉扩展名的文件名
  pub fn stem(&self) -> Option<&str> {
    self.path.file_stem().and_then(|s| s.to_str())
  }
}

pub fn is_image_file(path: &Path) -> bool {
  has_extension(path, &IMAGE_EXTENSIONS)
}

pub(crate) fn has_extension(path: &Path, extensions: &[&str]) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      let ext = ext.to_ascii_lowercase();
      extensions.iter().any(|e| *e == ext)
    })
    .unwrap_or(false)
}

/// 列出目录中满足条件的文件，按文件名排序
pub(crate) fn list_sorted_files<F>(dir: &Path, filter: F) -> Result<Vec<PathBuf>, FrameError>
where
  F: Fn(&Path) -> bool,
{
  let io_error = |source| FrameError::IoError {
    path: dir.to_path_buf(),
    source,
  };

  let mut files = Vec::new();
  for entry in std::fs::read_dir(dir).map_err(io_error)? {
    let path = entry.map_err(io_error)?.path();
    if path.is_file() && filter(&path) {
      files.push(path);
    }
  }
  files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
  Ok(files)
}

/// 列出目录中的图像文件，按文件名排序
pub fn list_image_files(dir: &Path) -> Result<Vec<PathBuf>, FrameError> {
  list_sorted_files(dir, is_image_file)
}
