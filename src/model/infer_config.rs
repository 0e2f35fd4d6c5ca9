// 该文件是 DsFlow 项目的一部分。
// src/model/infer_config.rs - nvinfer 配置文件
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

//! # nvinfer 配置
//!
//! nvinfer 的 `config-file-path` 是 INI 风格的文本：`[property]` 段描述模型，
//! `[class-attrs-all]` 与 `[class-attrs-<id>]` 段描述各类别的聚类阈值。
//!
//! [`InferConfig`] 保留注释、空行和原始顺序，只改动需要改的键。
//! 类别过滤的做法是给目标类别单独的阈值段，再把 `[class-attrs-all]`
//! 的阈值设为 1.0，其余类别的检测框就都不会输出。

use std::{
  convert::Infallible,
  fmt, fs,
  path::{Path, PathBuf},
  str::FromStr,
};

use thiserror::Error;
use tracing::{debug, info};

pub const PROPERTY_SECTION: &str = "property";
pub const CLASS_ATTRS_ALL: &str = "class-attrs-all";
pub const DEFAULT_CLASS_THRESHOLD: f32 = 0.25;
/// 任何检测都达不到的阈值
pub const HIDDEN_CLASS_THRESHOLD: f32 = 1.0;

const CLASS_ATTRS_PREFIX: &str = "class-attrs-";
const PRE_CLUSTER_THRESHOLD: &str = "pre-cluster-threshold";
const MODEL_ENGINE_FILE: &str = "model-engine-file";

/// `[property]` 中以配置文件所在目录为基准的路径键
const PATH_KEYS: [&str; 9] = [
  "onnx-file",
  "model-engine-file",
  "labelfile-path",
  "custom-lib-path",
  "int8-calib-file",
  "model-file",
  "proto-file",
  "tlt-encoded-model",
  "mean-file",
];

#[derive(Error, Debug)]
pub enum InferConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置缺少 [{0}] 段")]
  MissingSection(String),
  #[error("无效的阈值 {0}，需在 [0.0, 1.0) 之间")]
  InvalidThreshold(f32),
}

/// 检查目标类别阈值：必须是有限值且低于 [`HIDDEN_CLASS_THRESHOLD`]
pub fn validate_threshold(threshold: f32) -> Result<f32, InferConfigError> {
  if threshold.is_finite() && (0.0..HIDDEN_CLASS_THRESHOLD).contains(&threshold) {
    Ok(threshold)
  } else {
    Err(InferConfigError::InvalidThreshold(threshold))
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLine {
  Entry { key: String, value: String },
  /// 注释或空行，原样保留
  Comment(String),
  Raw(String),
}

impl ConfigLine {
  fn parse(line: &str) -> Self {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
      return ConfigLine::Comment(line.trim_end().to_string());
    }
    match trimmed.split_once('=') {
      Some((key, value)) => ConfigLine::Entry {
        key: key.trim().to_string(),
        value: value.trim().to_string(),
      },
      None => ConfigLine::Raw(line.trim_end().to_string()),
    }
  }

  fn is_blank(&self) -> bool {
    matches!(self, ConfigLine::Comment(c) if c.trim().is_empty())
  }
}

impl fmt::Display for ConfigLine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConfigLine::Entry { key, value } => write!(f, "{}={}", key, value),
      ConfigLine::Comment(line) | ConfigLine::Raw(line) => f.write_str(line),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
  name: String,
  lines: Vec<ConfigLine>,
}

impl Section {
  pub fn new(name: impl Into<String>) -> Self {
    Section {
      name: name.into(),
      lines: Vec::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn lines(&self) -> &[ConfigLine] {
    &self.lines
  }

  pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
    self.lines.iter().filter_map(|line| match line {
      ConfigLine::Entry { key, value } => Some((key.as_str(), value.as_str())),
      _ => None,
    })
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.entries().find(|(k, _)| *k == key).map(|(_, v)| v)
  }

  /// 修改已有键；不存在时插在最后一个键值对之后
  pub fn set(&mut self, key: &str, value: impl Into<String>) {
    let value = value.into();
    for line in self.lines.iter_mut() {
      if let ConfigLine::Entry { key: k, value: v } = line
        && k == key
      {
        *v = value;
        return;
      }
    }

    let insert_at = self
      .lines
      .iter()
      .rposition(|line| matches!(line, ConfigLine::Entry { .. }))
      .map(|idx| idx + 1)
      .unwrap_or(0);
    self.lines.insert(
      insert_at,
      ConfigLine::Entry {
        key: key.to_string(),
        value,
      },
    );
  }

  pub fn remove(&mut self, key: &str) -> Option<String> {
    let idx = self
      .lines
      .iter()
      .position(|line| matches!(line, ConfigLine::Entry { key: k, .. } if k == key))?;
    match self.lines.remove(idx) {
      ConfigLine::Entry { value, .. } => Some(value),
      _ => None,
    }
  }

  fn ends_with_blank(&self) -> bool {
    self.lines.last().is_some_and(ConfigLine::is_blank)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InferConfig {
  preamble: Vec<ConfigLine>,
  sections: Vec<Section>,
}

impl InferConfig {
  pub fn parse(content: &str) -> Self {
    let mut config = InferConfig::default();
    for line in content.lines() {
      let trimmed = line.trim();
      if trimmed.starts_with('[') && trimmed.ends_with(']') {
        let name = trimmed[1..trimmed.len() - 1].trim();
        config.sections.push(Section::new(name));
        continue;
      }
      let parsed = ConfigLine::parse(line);
      match config.sections.last_mut() {
        Some(section) => section.lines.push(parsed),
        None => config.preamble.push(parsed),
      }
    }
    config
  }

  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, InferConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let config = Self::parse(&content);
    debug!(
      "读取 nvinfer 配置 {}: {} 个段",
      path.display(),
      config.sections.len()
    );
    Ok(config)
  }

  pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), InferConfigError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      fs::create_dir_all(parent)?;
    }
    fs::write(path, self.to_string())?;
    info!("已写入 nvinfer 配置: {}", path.display());
    Ok(())
  }

  pub fn sections(&self) -> &[Section] {
    &self.sections
  }

  pub fn section(&self, name: &str) -> Option<&Section> {
    self.sections.iter().find(|s| s.name == name)
  }

  pub fn section_mut(&mut self, name: &str) -> Option<&mut Section> {
    self.sections.iter_mut().find(|s| s.name == name)
  }

  pub fn get(&self, section: &str, key: &str) -> Option<&str> {
    self.section(section)?.get(key)
  }

  /// 设置键值，段不存在时追加到末尾
  pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
    if self.section(section).is_none() {
      self.push_section(Section::new(section));
    }
    if let Some(s) = self.section_mut(section) {
      s.set(key, value);
    }
  }

  /// 删除同名的所有段，返回第一个
  pub fn remove_section(&mut self, name: &str) -> Option<Section> {
    let mut removed = None;
    while let Some(idx) = self.sections.iter().position(|s| s.name == name) {
      let section = self.sections.remove(idx);
      removed.get_or_insert(section);
    }
    removed
  }

  /// 追加段，并与前文之间保留一个空行
  pub fn push_section(&mut self, section: Section) {
    let needs_gap = match self.sections.last() {
      Some(last) => !last.ends_with_blank(),
      None => self.preamble.last().is_some_and(|line| !line.is_blank()),
    };
    if needs_gap {
      let gap = ConfigLine::Comment(String::new());
      match self.sections.last_mut() {
        Some(last) => last.lines.push(gap),
        None => self.preamble.push(gap),
      }
    }
    self.sections.push(section);
  }

  /// 只保留 `class_id` 一个类别的检测结果
  ///
  /// 原有的 `[class-attrs-*]` 段全部移除。原 `[class-attrs-all]` 中除阈值外的键
  /// （如 `nms-iou-threshold`、`topk`）会移到目标类别段中。
  pub fn filter_to_class(&mut self, class_id: u32, threshold: f32) -> Result<(), InferConfigError> {
    let threshold = validate_threshold(threshold)?;
    let target_name = format!("{}{}", CLASS_ATTRS_PREFIX, class_id);
    let inherited = self.remove_section(CLASS_ATTRS_ALL);
    let previous = self.remove_section(&target_name);

    let others: Vec<String> = self
      .sections
      .iter()
      .filter(|s| s.name.starts_with(CLASS_ATTRS_PREFIX))
      .map(|s| s.name.clone())
      .collect();
    for name in others {
      debug!("移除 [{}]", name);
      self.remove_section(&name);
    }

    let mut target = Section::new(target_name);
    for section in [inherited, previous].into_iter().flatten() {
      for (key, value) in section.entries() {
        target.set(key, value);
      }
    }
    target.remove(PRE_CLUSTER_THRESHOLD);
    target.set(PRE_CLUSTER_THRESHOLD, format_threshold(threshold));
    self.push_section(target);

    let mut hidden = Section::new(CLASS_ATTRS_ALL);
    hidden.set(PRE_CLUSTER_THRESHOLD, format_threshold(HIDDEN_CLASS_THRESHOLD));
    self.push_section(hidden);

    debug!("类别过滤: 仅保留类别 {} (阈值 {})", class_id, threshold);
    Ok(())
  }

  /// 当前过滤的目标类别：`[class-attrs-all]` 被隐藏时，阈值仍可通过的那个类别段
  pub fn filtered_class(&self) -> Option<u32> {
    let hidden = self.get(CLASS_ATTRS_ALL, PRE_CLUSTER_THRESHOLD)?;
    if hidden.parse::<f32>().ok()? < HIDDEN_CLASS_THRESHOLD {
      return None;
    }
    self.sections.iter().find_map(|s| {
      let class_id = s.name.strip_prefix(CLASS_ATTRS_PREFIX)?.parse().ok()?;
      let threshold: f32 = s.get(PRE_CLUSTER_THRESHOLD)?.parse().ok()?;
      (threshold < HIDDEN_CLASS_THRESHOLD).then_some(class_id)
    })
  }

  pub fn engine_file(&self) -> Option<&str> {
    self.get(PROPERTY_SECTION, MODEL_ENGINE_FILE)
  }

  pub fn set_engine_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), InferConfigError> {
    let property = self
      .section_mut(PROPERTY_SECTION)
      .ok_or_else(|| InferConfigError::MissingSection(PROPERTY_SECTION.to_string()))?;
    property.set(MODEL_ENGINE_FILE, path.as_ref().display().to_string());
    Ok(())
  }

  /// 保留引擎文件名，把目录换成 `dir`；没有 `model-engine-file` 时返回 `false`
  pub fn rewrite_engine_dir<P: AsRef<Path>>(&mut self, dir: P) -> Result<bool, InferConfigError> {
    let file_name = match self.engine_file() {
      Some(engine) => Path::new(engine).file_name().map(|n| n.to_os_string()),
      None if self.section(PROPERTY_SECTION).is_none() => {
        return Err(InferConfigError::MissingSection(
          PROPERTY_SECTION.to_string(),
        ));
      }
      None => None,
    };
    match file_name {
      Some(name) => {
        self.set_engine_file(dir.as_ref().join(name))?;
        Ok(true)
      }
      None => Ok(false),
    }
  }

  /// 把 `[property]` 中的相对路径改为基于 `base_dir` 的绝对路径
  ///
  /// 配置写到别的目录后，nvinfer 会按新位置解析相对路径。
  pub fn absolutize_paths<P: AsRef<Path>>(&mut self, base_dir: P) {
    let base_dir = base_dir.as_ref();
    let Some(property) = self.section_mut(PROPERTY_SECTION) else {
      return;
    };
    for line in property.lines.iter_mut() {
      if let ConfigLine::Entry { key, value } = line
        && PATH_KEYS.contains(&key.as_str())
        && !value.is_empty()
        && Path::new(value.as_str()).is_relative()
      {
        *value = base_dir.join(PathBuf::from(value.as_str())).display().to_string();
      }
    }
  }
}

impl FromStr for InferConfig {
  type Err = Infallible;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(Self::parse(s))
  }
}

impl fmt::Display for InferConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for line in &self.preamble {
      writeln!(f, "{}", line)?;
    }
    for section in &self.sections {
      writeln!(f, "[{}]", section.name)?;
      for line in &section.lines {
        writeln!(f, "{}", line)?;
      }
    }
    Ok(())
  }
}

fn format_threshold(value: f32) -> String {
  format!("{:?}", value)
}

#[cfg(test)]
mod tests {
  use super::*;

  const BASE: &str = "\
# primary detector
[property]
gpu-id=0
onnx-file=yolo11s.pt.onnx
model-engine-file=model_b1_gpu0_fp32.engine
labelfile-path=labels.txt
custom-lib-path=/opt/lib/libnvdsinfer_custom_impl_Yolo.so

[class-attrs-all]
nms-iou-threshold=0.45
pre-cluster-threshold=0.25
topk=300
";

  #[test]
  fn parse_and_render_preserve_text() {
    let config = InferConfig::parse(BASE);
    assert_eq!(config.to_string(), BASE);
    assert_eq!(config.sections().len(), 2);
    assert_eq!(config.get("property", "gpu-id"), Some("0"));
    assert_eq!(config.get(CLASS_ATTRS_ALL, "topk"), Some("300"));
    assert_eq!(config.get("property", "missing"), None);
  }

  #[test]
  fn filter_to_class_hides_other_classes() {
    let mut config = InferConfig::parse(BASE);
    config.filter_to_class(2, DEFAULT_CLASS_THRESHOLD).unwrap();

    let names: Vec<_> = config.sections().iter().map(Section::name).collect();
    assert_eq!(names, ["property", "class-attrs-2", "class-attrs-all"]);

    let target = config.section("class-attrs-2").unwrap();
    let entries: Vec<_> = target.entries().collect();
    assert_eq!(
      entries,
      [
        ("nms-iou-threshold", "0.45"),
        ("topk", "300"),
        ("pre-cluster-threshold", "0.25"),
      ]
    );

    let all = config.section(CLASS_ATTRS_ALL).unwrap();
    assert_eq!(all.entries().collect::<Vec<_>>(), [("pre-cluster-threshold", "1.0")]);
    assert_eq!(config.filtered_class(), Some(2));

    assert!(config.to_string().ends_with(
      "\n[class-attrs-2]\nnms-iou-threshold=0.45\ntopk=300\npre-cluster-threshold=0.25\n\n\
       [class-attrs-all]\npre-cluster-threshold=1.0\n"
    ));
  }

  #[test]
  fn filtering_twice_replaces_previous_target() {
    let mut config = InferConfig::parse(BASE);
    config.filter_to_class(0, 0.25).unwrap();
    config.filter_to_class(0, 0.4).unwrap();
    let names: Vec<_> = config.sections().iter().map(Section::name).collect();
    assert_eq!(names, ["property", "class-attrs-0", "class-attrs-all"]);
    assert_eq!(config.get("class-attrs-0", "pre-cluster-threshold"), Some("0.4"));
    assert_eq!(config.get("class-attrs-0", "topk"), Some("300"));
  }

  #[test]
  fn filter_without_class_attrs() {
    let mut config = InferConfig::parse("[property]\ngpu-id=0");
    config.filter_to_class(5, DEFAULT_CLASS_THRESHOLD).unwrap();
    assert_eq!(
      config.to_string(),
      "[property]\ngpu-id=0\n\n[class-attrs-5]\npre-cluster-threshold=0.25\n\n\
       [class-attrs-all]\npre-cluster-threshold=1.0\n"
    );
    assert!(InferConfig::parse(BASE).filtered_class().is_none());
  }

  #[test]
  fn filter_replaces_existing_class_stanzas() {
    let text = format!("{}\n[class-attrs-3]\npre-cluster-threshold=0.2\ntopk=20\n", BASE);
    let mut config = InferConfig::parse(&text);
    config.filter_to_class(0, 0.25).unwrap();

    let names: Vec<_> = config.sections().iter().map(Section::name).collect();
    assert_eq!(names, ["property", "class-attrs-0", "class-attrs-all"]);
    assert_eq!(config.filtered_class(), Some(0));
    assert_eq!(config.get("class-attrs-0", "topk"), Some("300"));
  }

  #[test]
  fn filtered_class_skips_hidden_stanzas() {
    let config = InferConfig::parse(
      "[class-attrs-3]\npre-cluster-threshold=1.0\n\n\
       [class-attrs-7]\npre-cluster-threshold=0.3\n\n\
       [class-attrs-all]\npre-cluster-threshold=1.0\n",
    );
    assert_eq!(config.filtered_class(), Some(7));
  }

  #[test]
  fn invalid_thresholds_are_rejected() {
    for bad in [f32::NAN, f32::INFINITY, -0.1, 1.0, 1.5] {
      let mut config = InferConfig::parse(BASE);
      assert!(
        matches!(
          config.filter_to_class(0, bad),
          Err(InferConfigError::InvalidThreshold(_))
        ),
        "{}",
        bad
      );
      assert_eq!(config, InferConfig::parse(BASE));
    }
    assert_eq!(validate_threshold(0.0).unwrap(), 0.0);
    assert_eq!(validate_threshold(0.99).unwrap(), 0.99);
  }

  #[test]
  fn section_remove() {
    let mut config = InferConfig::parse(BASE);
    let all = config.section_mut(CLASS_ATTRS_ALL).unwrap();
    assert_eq!(all.remove("topk"), Some("300".to_string()));
    assert_eq!(all.remove("topk"), None);
    assert_eq!(
      all.entries().collect::<Vec<_>>(),
      [("nms-iou-threshold", "0.45"), ("pre-cluster-threshold", "0.25")]
    );
  }

  #[test]
  fn set_inserts_before_trailing_blank() {
    let mut config = InferConfig::parse(BASE);
    config.set("property", "batch-size", "1");
    let rendered = config.to_string();
    assert!(rendered.contains(
      "custom-lib-path=/opt/lib/libnvdsinfer_custom_impl_Yolo.so\nbatch-size=1\n\n[class-attrs-all]"
    ));

    config.set("tracker", "enable", "1");
    assert!(config.to_string().ends_with("topk=300\n\n[tracker]\nenable=1\n"));
  }

  #[test]
  fn engine_rewrites() {
    let mut config = InferConfig::parse(BASE);
    assert_eq!(config.engine_file(), Some("model_b1_gpu0_fp32.engine"));
    assert!(config.rewrite_engine_dir("/workdir").unwrap());
    assert_eq!(
      config.engine_file(),
      Some("/workdir/model_b1_gpu0_fp32.engine")
    );

    config.set_engine_file("/models/custom.engine").unwrap();
    assert_eq!(config.engine_file(), Some("/models/custom.engine"));

    let mut no_engine = InferConfig::parse("[property]\ngpu-id=0\n");
    assert!(!no_engine.rewrite_engine_dir("/workdir").unwrap());

    let mut no_property = InferConfig::parse("[class-attrs-all]\ntopk=1\n");
    assert!(matches!(
      no_property.rewrite_engine_dir("/workdir"),
      Err(InferConfigError::MissingSection(_))
    ));
    assert!(no_property.set_engine_file("/x.engine").is_err());
  }

  #[test]
  fn relative_paths_become_absolute() {
    let mut config = InferConfig::parse(BASE);
    config.absolutize_paths("/models");
    assert_eq!(
      config.get("property", "onnx-file"),
      Some("/models/yolo11s.pt.onnx")
    );
    assert_eq!(
      config.get("property", "labelfile-path"),
      Some("/models/labels.txt")
    );
    assert_eq!(
      config.get("property", "custom-lib-path"),
      Some("/opt/lib/libnvdsinfer_custom_impl_Yolo.so")
    );
    assert_eq!(config.get("property", "gpu-id"), Some("0"));
  }

  #[test]
  fn raw_lines_and_comments_survive() {
    let text = "[property]\n; legacy comment\nsomething odd\nkey = value with spaces \n";
    let config = InferConfig::parse(text);
    assert_eq!(config.get("property", "key"), Some("value with spaces"));
    assert_eq!(
      config.to_string(),
      "[property]\n; legacy comment\nsomething odd\nkey=value with spaces\n"
    );
  }
}
