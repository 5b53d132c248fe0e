// 该文件是 Xinxian （新鲜） 项目的一部分。
// src/server.rs - HTTP 检测接口
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

//! 基于 `std::net` 的最小 HTTP/1.1 服务：
//!
//! - `GET /health`
//! - `POST /api/detect`：请求体为图像字节、`multipart/form-data` 中的
//!   `image` 字段，或 JSON `{"image": "<base64 / data URL>"}`。
//!
//! 每个连接一个线程，每个请求独立跑一次单图流水线，互不共享可变状态。

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, RgbImage};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::detector::SpoilageDetector;
use crate::input::{decode_base64_image, decode_image_bytes};
use crate::output::Draw;

/// 请求体上限
pub const MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;
const MAX_HEADER_BYTES: usize = 16 * 1024;

pub const NO_IMAGE: &str = "No image provided";
pub const UNDECODABLE_IMAGE: &str = "Could not decode image";
pub const NO_DETECTION: &str = "No VECNA label detected. Ensure ArUco marker is visible.";

#[derive(Error, Debug)]
pub enum ServerError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("监听地址无效: {0}")]
  AddrError(#[from] std::net::AddrParseError),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("图像编码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("请求过大: {0} 字节")]
  RequestTooLarge(usize),
  #[error("请求格式错误: {0}")]
  Malformed(&'static str),
  #[error("服务线程异常退出")]
  ThreadPanicked,
}

#[derive(Clone, Debug)]
pub struct ApiConfig {
  pub addr: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      addr: "0.0.0.0:5002".to_string(),
    }
  }
}

impl ApiConfig {
  pub fn new(host: &str, port: u16) -> Self {
    Self {
      addr: format!("{}:{}", host, port),
    }
  }
}

#[derive(Debug)]
pub struct ApiHandle {
  pub addr: SocketAddr,
  shutdown: Arc<AtomicBool>,
  join: Option<JoinHandle<()>>,
}

impl ApiHandle {
  pub fn stop(mut self) -> Result<(), ServerError> {
    self.shutdown.store(true, Ordering::SeqCst);
    if let Some(join) = self.join.take() {
      join.join().map_err(|_| ServerError::ThreadPanicked)?;
    }
    Ok(())
  }

  /// 阻塞直到服务线程退出
  pub fn wait(mut self) -> Result<(), ServerError> {
    if let Some(join) = self.join.take() {
      join.join().map_err(|_| ServerError::ThreadPanicked)?;
    }
    Ok(())
  }

  /// 可交给 Ctrl-C 处理器的停止开关
  pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
    self.shutdown.clone()
  }
}

pub struct ApiServer {
  cfg: ApiConfig,
  detector: Arc<SpoilageDetector>,
  draw: Arc<Draw>,
}

impl ApiServer {
  pub fn new(cfg: ApiConfig, detector: Arc<SpoilageDetector>) -> Self {
    Self {
      cfg,
      detector,
      draw: Arc::new(Draw::default()),
    }
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = Arc::new(draw);
    self
  }

  pub fn spawn(self) -> Result<ApiHandle, ServerError> {
    let configured_addr: SocketAddr = self.cfg.addr.parse()?;
    let listener = TcpListener::bind(configured_addr)?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;
    info!("检测接口监听于 http://{}", addr);

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_thread = shutdown.clone();
    let join = std::thread::spawn(move || {
      if let Err(err) = run_api(listener, self.detector, self.draw, shutdown_thread) {
        error!("检测接口停止: {}", err);
      }
    });

    Ok(ApiHandle {
      addr,
      shutdown,
      join: Some(join),
    })
  }
}

fn run_api(
  listener: TcpListener,
  detector: Arc<SpoilageDetector>,
  draw: Arc<Draw>,
  shutdown: Arc<AtomicBool>,
) -> Result<(), ServerError> {
  loop {
    if shutdown.load(Ordering::SeqCst) {
      info!("检测接口关闭");
      break;
    }
    match listener.accept() {
      Ok((stream, peer)) => {
        let detector = detector.clone();
        let draw = draw.clone();
        std::thread::spawn(move || {
          if let Err(err) = handle_connection(stream, &detector, &draw) {
            warn!("请求处理失败 ({}): {}", peer, err);
          }
        });
      }
      Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
        std::thread::sleep(Duration::from_millis(50));
        continue;
      }
      Err(err) => return Err(err.into()),
    }
  }
  Ok(())
}

fn handle_connection(
  mut stream: TcpStream,
  detector: &SpoilageDetector,
  draw: &Draw,
) -> Result<(), ServerError> {
  stream.set_nonblocking(false)?;
  let response = match read_request(&mut stream) {
    Ok(request) => {
      debug!("{} {} ({} 字节)", request.method, request.path, request.body.len());
      handle_request(&request, detector, draw)
    }
    Err(ServerError::RequestTooLarge(n)) => {
      warn!("拒绝过大的请求: {} 字节", n);
      Response::error(413, "Request too large")
    }
    Err(err) => return Err(err),
  };
  write_response(&mut stream, &response)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
  pub method: String,
  pub path: String,
  pub headers: HashMap<String, String>,
  pub body: Vec<u8>,
}

impl HttpRequest {
  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_lowercase()).map(String::as_str)
  }

  fn content_type(&self) -> String {
    self
      .header("content-type")
      .unwrap_or_default()
      .to_ascii_lowercase()
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
  pub status: u16,
  pub content_type: &'static str,
  pub body: Vec<u8>,
}

impl Response {
  pub fn json(status: u16, value: &Value) -> Self {
    Self {
      status,
      content_type: "application/json",
      body: value.to_string().into_bytes(),
    }
  }

  pub fn error(status: u16, message: &str) -> Self {
    Self::json(status, &json!({ "success": false, "error": message }))
  }

  pub fn body_json(&self) -> Result<Value, serde_json::Error> {
    serde_json::from_slice(&self.body)
  }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
  if needle.is_empty() || haystack.len() < needle.len() {
    return None;
  }
  haystack.windows(needle.len()).position(|w| w == needle)
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest, ServerError> {
  stream.set_read_timeout(Some(Duration::from_secs(5)))?;
  let mut buf = [0u8; 8192];
  let mut data = Vec::new();
  let header_end = loop {
    let n = stream.read(&mut buf)?;
    if n == 0 {
      return Err(ServerError::Malformed("连接提前关闭"));
    }
    data.extend_from_slice(&buf[..n]);
    if let Some(pos) = find(&data, b"\r\n\r\n") {
      break pos;
    }
    if data.len() > MAX_HEADER_BYTES {
      return Err(ServerError::RequestTooLarge(data.len()));
    }
  };

  let mut request = parse_head(&data[..header_end])?;
  let length: usize = request
    .header("content-length")
    .map(|v| v.parse())
    .transpose()
    .map_err(|_| ServerError::Malformed("Content-Length 无效"))?
    .unwrap_or(0);
  if length > MAX_REQUEST_BYTES {
    return Err(ServerError::RequestTooLarge(length));
  }

  let mut body = data.split_off(header_end + 4);
  while body.len() < length {
    let n = stream.read(&mut buf)?;
    if n == 0 {
      return Err(ServerError::Malformed("请求体不完整"));
    }
    body.extend_from_slice(&buf[..n]);
  }
  body.truncate(length);
  request.body = body;
  Ok(request)
}

fn parse_head(head: &[u8]) -> Result<HttpRequest, ServerError> {
  let text = String::from_utf8_lossy(head);
  let mut lines = text.split("\r\n");
  let request_line = lines.next().ok_or(ServerError::Malformed("空请求"))?;
  let mut parts = request_line.split_whitespace();
  let method = parts.next().ok_or(ServerError::Malformed("缺少方法"))?;
  let raw_path = parts.next().ok_or(ServerError::Malformed("缺少路径"))?;
  let mut headers = HashMap::new();
  for line in lines {
    if let Some((k, v)) = line.split_once(':') {
      headers.insert(k.trim().to_lowercase(), v.trim().to_string());
    }
  }
  let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
  Ok(HttpRequest {
    method: method.to_string(),
    path,
    headers,
    body: Vec::new(),
  })
}

fn write_response(stream: &mut TcpStream, response: &Response) -> Result<(), ServerError> {
  let status_line = match response.status {
    200 => "HTTP/1.1 200 OK",
    400 => "HTTP/1.1 400 Bad Request",
    404 => "HTTP/1.1 404 Not Found",
    405 => "HTTP/1.1 405 Method Not Allowed",
    413 => "HTTP/1.1 413 Payload Too Large",
    _ => "HTTP/1.1 500 Internal Server Error",
  };
  let header = format!(
    "{}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
    status_line,
    response.content_type,
    response.body.len()
  );
  stream.write_all(header.as_bytes())?;
  stream.write_all(&response.body)?;
  stream.flush()?;
  Ok(())
}

/// 路由与处理，不涉及网络，可直接测试
pub fn handle_request(
  request: &HttpRequest,
  detector: &SpoilageDetector,
  draw: &Draw,
) -> Response {
  match (request.method.as_str(), request.path.as_str()) {
    ("GET", "/health") => Response::json(200, &json!({ "status": "ok" })),
    ("POST", "/api/detect") => match detect(request, detector, draw) {
      Ok(response) => response,
      Err(err) => {
        error!("检测请求失败: {}", err);
        Response::error(500, &err.to_string())
      }
    },
    (_, "/health") | (_, "/api/detect") => Response::error(405, "Method not allowed"),
    _ => Response::error(404, "Not found"),
  }
}

/// 请求中的图像数据；没有时返回 `None`
enum ImageBody<'a> {
  Bytes(&'a [u8]),
  Base64(String),
}

fn image_body(request: &HttpRequest) -> Option<ImageBody<'_>> {
  let content_type = request.content_type();
  if content_type.starts_with("application/json") {
    let value: Value = serde_json::from_slice(&request.body).ok()?;
    let text = value.get("image")?.as_str()?;
    return Some(ImageBody::Base64(text.to_string()));
  }
  if content_type.starts_with("multipart/form-data") {
    let raw = request.header("content-type")?;
    let boundary = raw
      .split(';')
      .filter_map(|p| {
        let (k, v) = p.trim().split_once('=')?;
        k.eq_ignore_ascii_case("boundary")
          .then(|| v.trim_matches('"'))
      })
      .next()?;
    return multipart_field(&request.body, boundary, "image").map(ImageBody::Bytes);
  }
  if request.body.is_empty() {
    return None;
  }
  Some(ImageBody::Bytes(&request.body))
}

/// 取出 multipart 中指定名称字段的内容
pub fn multipart_field<'a>(body: &'a [u8], boundary: &str, name: &str) -> Option<&'a [u8]> {
  let delimiter = format!("--{}", boundary);
  let delimiter = delimiter.as_bytes();
  let wanted = format!("name=\"{}\"", name);

  let mut rest = body;
  while let Some(pos) = find(rest, delimiter) {
    rest = &rest[pos + delimiter.len()..];
    let end = find(rest, delimiter).unwrap_or(rest.len());
    let part = &rest[..end];
    if let Some(header_end) = find(part, b"\r\n\r\n") {
      let headers = String::from_utf8_lossy(&part[..header_end]);
      if headers.contains(&wanted) {
        let content = &part[header_end + 4..];
        return Some(content.strip_suffix(b"\r\n").unwrap_or(content));
      }
    }
  }
  None
}

fn encode_jpeg_data_url(image: &RgbImage) -> Result<String, ServerError> {
  let mut buffer = Cursor::new(Vec::new());
  image.write_to(&mut buffer, ImageFormat::Jpeg)?;
  Ok(format!(
    "data:image/jpeg;base64,{}",
    STANDARD.encode(buffer.into_inner())
  ))
}

fn detect(
  request: &HttpRequest,
  detector: &SpoilageDetector,
  draw: &Draw,
) -> Result<Response, ServerError> {
  let decoded = match image_body(request) {
    None => return Ok(Response::error(400, NO_IMAGE)),
    Some(ImageBody::Bytes(bytes)) => decode_image_bytes(bytes),
    Some(ImageBody::Base64(text)) => decode_base64_image(&text),
  };
  let image = match decoded {
    Ok(image) => image,
    Err(err) => {
      debug!("图像解码失败: {}", err);
      return Ok(Response::error(400, UNDECODABLE_IMAGE));
    }
  };

  let Some(detection) = detector.analyze_image(&image) else {
    info!("请求图像中未检出标签");
    return Ok(Response::json(
      200,
      &json!({
        "success": false,
        "error": NO_DETECTION,
        "result_image": encode_jpeg_data_url(&image)?,
      }),
    ));
  };

  let mut result = serde_json::to_value(&detection.result)?;
  if let Value::Object(map) = &mut result {
    map.remove("timestamp");
  }
  let overlay = draw.draw_overlay(&image, Some(&detection));
  info!(
    "接口检测: {} -> {}",
    detection.result.package_id, detection.result.spoilage_level
  );
  Ok(Response::json(
    200,
    &json!({
      "success": true,
      "result": result,
      "result_image": encode_jpeg_data_url(&overlay)?,
    }),
  ))
}
