// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

/// 基于定位标记读取包装上的变质指示条
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 单图模式：分析一张图像后退出
  #[arg(long, value_name = "PATH", conflicts_with = "serve")]
  pub image: Option<PathBuf>,

  /// 摄像头序号（对应 /dev/videoN）
  #[arg(long, default_value_t = 0, value_name = "INDEX")]
  pub camera: u32,

  /// 直接指定 V4L2 设备节点，优先于 --camera
  #[arg(long, value_name = "PATH")]
  pub device: Option<String>,

  /// 输出调试日志
  #[arg(long)]
  pub debug: bool,

  /// 启动 HTTP 检测接口
  #[arg(long)]
  pub serve: bool,

  /// 接口端口
  #[arg(long, default_value_t = 5002)]
  pub port: u16,

  /// 接口监听地址
  #[arg(long, default_value = "0.0.0.0")]
  pub host: String,

  /// 叠加层输出，例如 image:///tmp/out.png 或 folder:///var/xinxian?always
  #[arg(long, value_name = "URL")]
  pub output: Option<Url>,

  /// 叠加层文字使用的 TTF/OTF 字体
  #[arg(long, value_name = "PATH")]
  pub font: Option<PathBuf>,

  /// 标记字典（JSON 码表），默认使用内置字典
  #[arg(long, value_name = "PATH")]
  pub dictionary: Option<PathBuf>,

  /// 视频流最多处理的帧数
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<usize>,

  /// 分级后锁定的帧数
  #[arg(long, default_value_t = 30, value_name = "FRAMES")]
  pub cooldown: u32,

  /// 锁定期间标记消失时清除叠加层
  #[arg(long)]
  pub clear_stale: bool,

  /// 按 s 保存结果的目录
  #[arg(long, default_value = ".", value_name = "DIR")]
  pub save_dir: PathBuf,
}

impl Args {
  /// 视频流输入的 URL
  pub fn camera_url(&self) -> Result<Url, url::ParseError> {
    let device = self
      .device
      .clone()
      .unwrap_or_else(|| format!("/dev/video{}", self.camera));
    Url::parse(&format!("v4l://{}", device))
  }

  pub fn image_url(&self) -> Option<Result<Url, url::ParseError>> {
    let path = self.image.as_ref()?;
    let path = std::path::absolute(path).unwrap_or_else(|_| path.clone());
    Some(Url::parse(&format!(
      "image://{}",
      urlencoding::encode(&path.to_string_lossy()).replace("%2F", "/")
    )))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_documented_values() {
    let args = Args::parse_from(["xinxian"]);
    assert_eq!(args.camera, 0);
    assert_eq!(args.port, 5002);
    assert_eq!(args.host, "0.0.0.0");
    assert_eq!(args.cooldown, 30);
    assert!(!args.serve);
    assert_eq!(args.camera_url().unwrap().as_str(), "v4l:///dev/video0");
  }

  #[test]
  fn device_overrides_camera_index() {
    let args = Args::parse_from(["xinxian", "--camera", "3", "--device", "/dev/video9"]);
    assert_eq!(args.camera_url().unwrap().path(), "/dev/video9");
  }

  #[test]
  fn image_path_round_trips_through_url() {
    let args = Args::parse_from(["xinxian", "--image", "/tmp/my label.jpg"]);
    let url = args.image_url().unwrap().unwrap();
    assert_eq!(url.scheme(), "image");
    assert_eq!(xinxian::url_file_path(&url), "/tmp/my label.jpg");
  }
}
