// 该文件是 Xinxian （新鲜） 项目的一部分。
// tests/server.rs - HTTP 检测接口
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

mod common;

use std::io::{Cursor, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use image::ImageFormat;
use xinxian::detector::SpoilageDetector;
use xinxian::server::{ApiConfig, ApiHandle, ApiServer};

use common::{RED, label};

fn start() -> ApiHandle {
  let cfg = ApiConfig {
    addr: "127.0.0.1:0".to_string(),
  };
  ApiServer::new(cfg, Arc::new(SpoilageDetector::default()))
    .spawn()
    .unwrap()
}

/// 发送请求，返回 (状态码, 响应体)
fn send(addr: SocketAddr, head: &str, body: &[u8]) -> (u16, serde_json::Value) {
  let mut stream = TcpStream::connect(addr).unwrap();
  let request = format!(
    "{}\r\nHost: localhost\r\nContent-Length: {}\r\n",
    head,
    body.len()
  );
  stream.write_all(request.as_bytes()).unwrap();
  stream.write_all(b"\r\n").unwrap();
  stream.write_all(body).unwrap();

  let mut response = Vec::new();
  stream.read_to_end(&mut response).unwrap();
  let text = String::from_utf8_lossy(&response);
  let status = text
    .split_whitespace()
    .nth(1)
    .and_then(|s| s.parse().ok())
    .unwrap();
  let (_, body) = text.split_once("\r\n\r\n").unwrap();
  (status, serde_json::from_str(body).unwrap())
}

#[test]
fn health_and_errors() {
  let handle = start();
  let addr = handle.addr;

  let (status, body) = send(addr, "GET /health HTTP/1.1", b"");
  assert_eq!(status, 200);
  assert_eq!(body["status"], "ok");

  let (status, body) = send(
    addr,
    "POST /api/detect HTTP/1.1\r\nContent-Type: application/json",
    b"{}",
  );
  assert_eq!(status, 400);
  assert_eq!(body["error"], "No image provided");

  let (status, body) = send(
    addr,
    "POST /api/detect HTTP/1.1\r\nContent-Type: image/jpeg",
    b"\xff\xd8 broken",
  );
  assert_eq!(status, 400);
  assert_eq!(body["error"], "Could not decode image");

  let (status, _) = send(addr, "DELETE /health HTTP/1.1", b"");
  assert_eq!(status, 405);

  handle.stop().unwrap();
}

#[test]
fn detects_label_from_raw_upload() {
  let handle = start();
  let mut png = Cursor::new(Vec::new());
  label(RED).write_to(&mut png, ImageFormat::Png).unwrap();

  let (status, body) = send(
    handle.addr,
    "POST /api/detect HTTP/1.1\r\nContent-Type: image/png",
    png.get_ref(),
  );
  assert_eq!(status, 200);
  assert_eq!(body["success"], true);
  assert_eq!(body["result"]["aruco_id"], 7);
  assert_eq!(body["result"]["spoilage_level"], "SPOILED");
  assert_eq!(body["result"]["is_safe"], false);
  assert!(body["result"].get("timestamp").is_none());
  assert!(
    body["result_image"]
      .as_str()
      .unwrap()
      .starts_with("data:image/jpeg;base64,")
  );

  handle.stop().unwrap();
}
