// 该文件是 Anquan （安全） 项目的一部分。
// src/catalog.rs - 类别目录
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

/// PPE 模型的类别名称（顺序与模型输出的类别索引一致）
pub const PPE_CLASSES: [&str; 5] = ["boots", "gloves", "helmet", "human", "vest"];

/// 类别目录
///
/// 有序的类别名称表，`class_id` 即下标。越界的 `class_id` 查询返回
/// `None`，由调用方决定告警或跳过，目录本身不做静默兜底。
#[derive(Debug, Clone)]
pub struct ClassCatalog {
  names: Vec<String>,
}

impl ClassCatalog {
  /// 从有序名称列表创建类别目录
  pub fn new<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  /// PPE 检测模型的默认目录
  pub fn ppe() -> Self {
    Self::new(PPE_CLASSES)
  }

  /// 按类别索引查询名称，越界返回 None
  pub fn name(&self, class_id: usize) -> Option<&str> {
    self.names.get(class_id).map(String::as_str)
  }

  /// 类别数量
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

  #[test]
  fn ppe_catalog_order() {
    let catalog = ClassCatalog::ppe();
    assert_eq!(catalog.len(), 5);
    assert_eq!(catalog.name(2), Some("helmet"));
    assert_eq!(catalog.name(4), Some("vest"));
  }

  #[test]
  fn out_of_range_class_id_is_none() {
    let catalog = ClassCatalog::ppe();
    assert_eq!(catalog.name(9), None);
  }
}
