// 该文件是 Qingfeng （清风） 项目的一部分。
// src/config.rs - 流水线与阶段配置
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

use std::{collections::BTreeMap, fmt, path::Path, str::FromStr, time::Duration};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, context::Slot};

pub const DEFAULT_GRACE_PERIOD_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
  Input,
  Preprocessor,
  Inference,
  Postprocessor,
  Output,
}

impl fmt::Display for StageKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      StageKind::Input => "输入",
      StageKind::Preprocessor => "预处理",
      StageKind::Inference => "推理",
      StageKind::Postprocessor => "后处理",
      StageKind::Output => "输出",
    })
  }
}

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("缺少{0}阶段")]
  MissingStage(StageKind),
  #[error("未知的{kind}阶段: {name}")]
  UnknownStage { kind: StageKind, name: String },
  #[error("不支持的{kind}阶段 {name}: {reason}")]
  UnsupportedStage {
    kind: StageKind,
    name: String,
    reason: String,
  },
  #[error("阶段 {stage} 缺少必需参数 {key}")]
  MissingOption { stage: String, key: String },
  #[error("阶段 {stage} 的参数 {key}={value} 无效: {reason}")]
  InvalidOption {
    stage: String,
    key: String,
    value: String,
    reason: String,
  },
  #[error("阶段 {stage} 存在未识别的参数: {keys:?}")]
  UnknownOption { stage: String, keys: Vec<String> },
  #[error("阶段 {stage} 需要上下文字段 {slot}, 但前序阶段没有提供")]
  UnsatisfiedSlot { stage: String, slot: Slot },
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch { expected: String, actual: String },
  #[error("URL 解析失败: {0}")]
  Url(#[from] url::ParseError),
  #[error("配置文件读取失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("配置文件解析失败: {0}")]
  Json(#[from] serde_json::Error),
}

/// 阶段名称与参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
  pub name: String,
  #[serde(default, deserialize_with = "stringify_options")]
  pub options: BTreeMap<String, String>,
}

/// JSON 中的数字与布尔参数统一转换为字符串，由阶段自行解析
fn stringify_options<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
  D: Deserializer<'de>,
{
  let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
  Ok(
    raw
      .into_iter()
      .map(|(k, v)| match v {
        serde_json::Value::String(s) => (k, s),
        other => (k, other.to_string()),
      })
      .collect(),
  )
}

impl StageSpec {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      options: BTreeMap::new(),
    }
  }

  pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
    self.options.insert(key.into(), value.to_string());
    self
  }

  pub fn options(&self) -> StageOptions {
    StageOptions::new(self.name.clone(), self.options.clone())
  }
}

impl TryFrom<&Url> for StageSpec {
  type Error = ConfigError;

  /// `scheme://host/path?k=v`: 方案为阶段名，主机名写入 `host`，路径写入 `path`
  fn try_from(url: &Url) -> Result<Self, Self::Error> {
    let mut options = BTreeMap::new();
    if let Some(host) = url.host_str().filter(|h| !h.is_empty()) {
      options.insert("host".to_string(), host.to_string());
    }
    let path = urlencoding::decode(url.path())
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| url.path().to_string());
    if !path.is_empty() && path != "/" {
      options.insert("path".to_string(), path);
    }
    for (k, v) in url.query_pairs() {
      options.insert(k.into_owned(), v.into_owned());
    }
    Ok(Self {
      name: url.scheme().to_string(),
      options,
    })
  }
}

impl FromStr for StageSpec {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    StageSpec::try_from(&Url::parse(s)?)
  }
}

/// 阶段参数，读取后移除，最后由 [`StageOptions::finish`] 检查剩余参数
#[derive(Debug, Clone)]
pub struct StageOptions {
  stage: String,
  values: BTreeMap<String, String>,
}

impl StageOptions {
  pub fn new(stage: impl Into<String>, values: BTreeMap<String, String>) -> Self {
    Self {
      stage: stage.into(),
      values,
    }
  }

  pub fn stage(&self) -> &str {
    &self.stage
  }

  pub fn take_raw(&mut self, key: &str) -> Option<String> {
    self.values.remove(key)
  }

  pub fn take<T>(&mut self, key: &str) -> Result<Option<T>, ConfigError>
  where
    T: FromStr,
    T::Err: fmt::Display,
  {
    match self.values.remove(key) {
      None => Ok(None),
      Some(value) => value
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::InvalidOption {
          stage: self.stage.clone(),
          key: key.to_string(),
          reason: e.to_string(),
          value,
        }),
    }
  }

  pub fn take_or<T>(&mut self, key: &str, default: T) -> Result<T, ConfigError>
  where
    T: FromStr,
    T::Err: fmt::Display,
  {
    Ok(self.take(key)?.unwrap_or(default))
  }

  pub fn require<T>(&mut self, key: &str) -> Result<T, ConfigError>
  where
    T: FromStr,
    T::Err: fmt::Display,
  {
    self.take(key)?.ok_or_else(|| ConfigError::MissingOption {
      stage: self.stage.clone(),
      key: key.to_string(),
    })
  }

  /// 开关参数，出现但无值时视为开启
  pub fn take_flag(&mut self, key: &str) -> Result<bool, ConfigError> {
    match self.values.remove(key).as_deref() {
      None => Ok(false),
      Some("" | "1" | "true" | "yes" | "on") => Ok(true),
      Some("0" | "false" | "no" | "off") => Ok(false),
      Some(other) => Err(ConfigError::InvalidOption {
        stage: self.stage.clone(),
        key: key.to_string(),
        value: other.to_string(),
        reason: "应为布尔值".to_string(),
      }),
    }
  }

  /// 以毫秒为单位的时长
  pub fn take_millis(&mut self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
    Ok(
      self
        .take::<u64>(key)?
        .map(Duration::from_millis)
        .unwrap_or(default),
    )
  }

  pub fn finish(self) -> Result<(), ConfigError> {
    if self.values.is_empty() {
      Ok(())
    } else {
      Err(ConfigError::UnknownOption {
        stage: self.stage,
        keys: self.values.into_keys().collect(),
      })
    }
  }
}

/// 可由 [`StageSpec`] 构造的阶段或阶段配置
pub trait FromStageSpec: Sized {
  const SCHEME: &'static str;

  fn from_options(options: &mut StageOptions) -> Result<Self, ConfigError>;

  fn from_spec(spec: &StageSpec) -> Result<Self, ConfigError> {
    if spec.name != Self::SCHEME {
      return Err(ConfigError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        actual: spec.name.clone(),
      });
    }
    let mut options = spec.options();
    let stage = Self::from_options(&mut options)?;
    options.finish()?;
    Ok(stage)
  }
}

impl<T: FromStageSpec> FromUrl for T {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    T::from_spec(&StageSpec::try_from(url)?)
  }
}

fn default_grace_period_ms() -> u64 {
  DEFAULT_GRACE_PERIOD_MS
}

/// 流水线配置文件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
  #[serde(default)]
  pub input: Option<StageSpec>,
  #[serde(default)]
  pub preprocessors: Vec<StageSpec>,
  #[serde(default)]
  pub inference: Option<StageSpec>,
  #[serde(default)]
  pub postprocessors: Vec<StageSpec>,
  #[serde(default)]
  pub outputs: Vec<StageSpec>,
  /// 停止后等待后台写入的时间
  #[serde(default = "default_grace_period_ms")]
  pub grace_period_ms: u64,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      input: None,
      preprocessors: Vec::new(),
      inference: None,
      postprocessors: Vec::new(),
      outputs: Vec::new(),
      grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
    }
  }
}

impl PipelineConfig {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("加载配置文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    Self::from_json(&text)
  }

  pub fn from_json(text: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(text)?)
  }

  pub fn grace_period(&self) -> Duration {
    Duration::from_millis(self.grace_period_ms)
  }
}
