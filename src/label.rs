// 该文件是 Jiannan （剑南春雨） 项目的一部分。
// src/label.rs - 类别标签表
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

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

/// 类别标签表
///
/// 从逐行文本文件加载，行号即类别索引。加载后只读，
/// 整个会话期间由使用方显式传递。
#[derive(Debug, Clone)]
pub struct LabelTable {
  names: Box<[String]>,
}

#[derive(Error, Debug)]
pub enum LabelFileError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签文件为空: {0}")]
  Empty(String),
}

#[derive(Error, Debug)]
pub enum LabelLookupError {
  #[error("类别索引 {class_id} 越界, 标签表共 {num_labels} 项")]
  OutOfRange { class_id: u32, num_labels: usize },
}

impl FromUrlWithScheme for LabelTable {
  const SCHEME: &'static str = "file";
}

impl FromUrl for LabelTable {
  type Error = LabelFileError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(LabelFileError::SchemeMismatch(format!(
        "期望标签方案 '{}', 实际方案 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    Self::from_path(url.path())
  }
}

impl LabelTable {
  pub fn new(names: Vec<String>) -> Self {
    Self {
      names: names.into_boxed_slice(),
    }
  }

  /// 从逐行文本文件加载标签表
  ///
  /// 空行保留为占位名称，保证行号与类别索引一一对应。
  pub fn from_path(path: &str) -> Result<Self, LabelFileError> {
    let content = std::fs::read_to_string(path)?;
    let names: Vec<String> = content
      .lines()
      .map(|line| line.trim_end().to_string())
      .collect();

    if names.is_empty() {
      return Err(LabelFileError::Empty(path.to_string()));
    }

    info!("加载标签表: {}, 共 {} 项", path, names.len());

    Ok(Self::new(names))
  }

  /// 按类别索引查找名称，越界返回查找错误而不是替代名称
  pub fn get(&self, class_id: u32) -> Result<&str, LabelLookupError> {
    self
      .names
      .get(class_id as usize)
      .map(String::as_str)
      .ok_or(LabelLookupError::OutOfRange {
        class_id,
        num_labels: self.names.len(),
      })
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn table() -> LabelTable {
    LabelTable::new(vec![
      "person".to_string(),
      "bicycle".to_string(),
      "car".to_string(),
    ])
  }

  #[test]
  fn lookup_in_range() {
    let table = table();
    assert_eq!(table.get(0).unwrap(), "person");
    assert_eq!(table.get(2).unwrap(), "car");
  }

  #[test]
  fn lookup_out_of_range() {
    let table = table();
    let err = table.get(3).unwrap_err();
    match err {
      LabelLookupError::OutOfRange {
        class_id,
        num_labels,
      } => {
        assert_eq!(class_id, 3);
        assert_eq!(num_labels, 3);
      }
    }
  }

  #[test]
  fn from_path_keeps_line_order() {
    let path = std::env::temp_dir().join("jiannan-label-test.txt");
    std::fs::write(&path, "person\nbicycle\n\ncar\n").unwrap();

    let table = LabelTable::from_path(path.to_str().unwrap()).unwrap();
    assert_eq!(table.len(), 4);
    assert_eq!(table.get(1).unwrap(), "bicycle");
    assert_eq!(table.get(2).unwrap(), "");
    assert_eq!(table.get(3).unwrap(), "car");

    std::fs::remove_file(&path).unwrap();
  }

  #[test]
  fn from_url_rejects_other_scheme() {
    let url = Url::parse("image:///tmp/coco.txt").unwrap();
    assert!(matches!(
      LabelTable::from_url(&url),
      Err(LabelFileError::SchemeMismatch(_))
    ));
  }
}
