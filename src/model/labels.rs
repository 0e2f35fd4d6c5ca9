// 该文件是 DsFlow 项目的一部分。
// src/model/labels.rs - 类别标签表
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 DsFlow Contributors

use std::{fs, path::Path};

use thiserror::Error;
use tracing::debug;

const COCO_LABELS: &str = include_str!("../../labels/coco.txt");

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("读取标签文件失败: {0}")]
  IoError(#[from] std::io::Error),
}

/// 标签表，类别编号即行号（从 0 开始）
///
/// 空行也占一个编号，保证和 nvinfer 读取 `labelfile-path` 的结果一致。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
  labels: Vec<String>,
}

impl LabelTable {
  /// 内置的 80 类 COCO 标签
  pub fn coco() -> Self {
    Self::parse(COCO_LABELS)
  }

  pub fn parse(content: &str) -> Self {
    let mut labels: Vec<String> = content.lines().map(|l| l.trim().to_string()).collect();
    // 文件末尾的空行不算类别
    while labels.last().is_some_and(|l| l.is_empty()) {
      labels.pop();
    }
    LabelTable { labels }
  }

  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LabelError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let table = Self::parse(&content);
    debug!("从 {} 读取了 {} 个标签", path.display(), table.len());
    Ok(table)
  }

  pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<(), LabelError> {
    let mut content = self.labels.join("\n");
    content.push('\n');
    fs::write(path, content)?;
    Ok(())
  }

  /// 按名称查找类别编号，取第一个完全匹配的行
  pub fn class_id(&self, name: &str) -> Option<u32> {
    let name = name.trim();
    if name.is_empty() {
      return None;
    }
    self
      .labels
      .iter()
      .position(|label| label == name)
      .map(|idx| idx as u32)
  }

  pub fn name(&self, class_id: u32) -> Option<&str> {
    self.labels.get(class_id as usize).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn coco_table() {
    let coco = LabelTable::coco();
    assert_eq!(coco.len(), 80);
    assert_eq!(coco.class_id("person"), Some(0));
    assert_eq!(coco.class_id("car"), Some(2));
    assert_eq!(coco.class_id("dog"), Some(16));
    assert_eq!(coco.class_id("toothbrush"), Some(79));
    assert_eq!(coco.name(9), Some("traffic light"));
    assert_eq!(coco.name(80), None);
  }

  #[test]
  fn lookup_is_exact_match() {
    let table = LabelTable::parse("car\ncarrot\n  bus \n");
    assert_eq!(table.class_id("car"), Some(0));
    assert_eq!(table.class_id("carrot"), Some(1));
    assert_eq!(table.class_id("bus"), Some(2));
    assert_eq!(table.class_id("ca"), None);
    assert_eq!(table.class_id(""), None);
  }

  #[test]
  fn blank_lines_keep_their_index() {
    let table = LabelTable::parse("a\n\nc\n\n\n");
    assert_eq!(table.len(), 3);
    assert_eq!(table.class_id("c"), Some(2));
    assert_eq!(table.name(1), Some(""));
  }

  #[test]
  fn first_match_wins() {
    let table = LabelTable::parse("x\ny\nx");
    assert_eq!(table.class_id("x"), Some(0));
  }
}
