// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/cascade.rs - 首次成功级联
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

//! 按 (配置 × 预处理变体) 的固定优先级依次尝试检测，第一个产生结果的
//! 组合立即返回，后续组合不再尝试。标记定位与载荷解码共用这一策略。

use tracing::debug;

/// 级联命中的组合与结果
#[derive(Debug, Clone, PartialEq)]
pub struct Hit<T> {
  pub config_index: usize,
  pub variant_index: usize,
  pub value: T,
}

/// 配置在外层、变体在内层的首次成功级联
#[derive(Debug, Clone, Copy)]
pub struct Cascade<'a, C, V> {
  configs: &'a [C],
  variants: &'a [V],
}

impl<'a, C, V> Cascade<'a, C, V> {
  pub fn new(configs: &'a [C], variants: &'a [V]) -> Self {
    Self { configs, variants }
  }

  /// 组合总数
  pub fn len(&self) -> usize {
    self.configs.len() * self.variants.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 依次执行 `attempt`，返回第一个 `Some`
  pub fn run<T, F>(&self, mut attempt: F) -> Option<Hit<T>>
  where
    F: FnMut(usize, &C, usize, &V) -> Option<T>,
  {
    for (config_index, config) in self.configs.iter().enumerate() {
      for (variant_index, variant) in self.variants.iter().enumerate() {
        if let Some(value) = attempt(config_index, config, variant_index, variant) {
          debug!("级联命中: 配置 #{} × 变体 #{}", config_index, variant_index);
          return Some(Hit {
            config_index,
            variant_index,
            value,
          });
        }
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stops_at_first_success() {
    let configs = ["a", "b"];
    let variants = [1, 2, 3];
    let mut tried = Vec::new();
    let hit = Cascade::new(&configs, &variants).run(|_, c, _, v| {
      tried.push((*c, *v));
      (*c == "b" && *v == 2).then_some(*v * 10)
    });
    let hit = hit.unwrap();
    assert_eq!(hit.config_index, 1);
    assert_eq!(hit.variant_index, 1);
    assert_eq!(hit.value, 20);
    assert_eq!(tried, vec![("a", 1), ("a", 2), ("a", 3), ("b", 1), ("b", 2)]);
  }

  #[test]
  fn earlier_success_wins_over_later() {
    let configs = [0u8];
    let variants = [5, 9, 7];
    let hit = Cascade::new(&configs, &variants)
      .run(|_, _, _, v| (*v > 4).then_some(*v))
      .unwrap();
    assert_eq!(hit.value, 5);
  }

  #[test]
  fn no_success_is_none() {
    let configs = [(), ()];
    let variants = [1, 2];
    let mut count = 0;
    let hit: Option<Hit<()>> = Cascade::new(&configs, &variants).run(|_, _, _, _| {
      count += 1;
      None
    });
    assert!(hit.is_none());
    assert_eq!(count, 4);
  }
}
