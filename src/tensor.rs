// 该文件是 Qingfeng （清风） 项目的一部分。
// src/tensor.rs - 模型输出张量
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

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
  #[error("张量形状 {shape:?} 需要 {expected} 个元素, 实际 {actual} 个")]
  ShapeMismatch {
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
  #[error("张量形状 {0:?} 的元素数溢出")]
  Overflow(Vec<usize>),
}

/// 形状对应的元素数，溢出时返回 `None`
pub fn element_count(shape: &[usize]) -> Option<usize> {
  shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

#[derive(Deserialize)]
struct RawTensor {
  shape: Vec<usize>,
  data: Vec<f32>,
}

/// 行主序的 f32 张量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTensor")]
pub struct Tensor {
  shape: Vec<usize>,
  data: Vec<f32>,
}

impl TryFrom<RawTensor> for Tensor {
  type Error = TensorError;

  fn try_from(raw: RawTensor) -> Result<Self, Self::Error> {
    Tensor::new(raw.shape, raw.data)
  }
}

impl Tensor {
  pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, TensorError> {
    let Some(expected) = element_count(&shape) else {
      return Err(TensorError::Overflow(shape));
    };
    if expected != data.len() {
      return Err(TensorError::ShapeMismatch {
        shape,
        expected,
        actual: data.len(),
      });
    }
    Ok(Self { shape, data })
  }

  pub fn zeros(shape: Vec<usize>) -> Self {
    let len = shape.iter().product::<usize>();
    Self {
      shape,
      data: vec![0.0; len],
    }
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn data_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_inconsistent_shape() {
    assert!(Tensor::new(vec![2, 3], vec![0.0; 5]).is_err());
    assert_eq!(Tensor::zeros(vec![1, 2, 2]).len(), 4);
  }

  #[test]
  fn deserialize_validates_shape() {
    let ok: Tensor = serde_json::from_str(r#"{"shape":[1,2],"data":[0.5,1.5]}"#).unwrap();
    assert_eq!(ok.shape(), &[1, 2]);
    let bad = serde_json::from_str::<Tensor>(r#"{"shape":[3],"data":[0.5]}"#);
    assert!(bad.is_err());
  }

  #[test]
  fn overflowing_shape_is_an_error() {
    let shape = vec![1 << 62, 2, 2, 18];
    assert_eq!(element_count(&shape), None);
    assert_eq!(
      Tensor::new(shape.clone(), vec![]),
      Err(TensorError::Overflow(shape))
    );
    let bad =
      serde_json::from_str::<Tensor>(r#"{"shape":[4611686018427387904,2,2,18],"data":[]}"#);
    assert!(bad.is_err());
  }
}
