// 该文件是 Kanjian （看见） 项目的一部分。
// src/lib.rs - 库主文件
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

pub mod export;
pub mod frame;
pub mod input;
pub mod model;
pub mod output;
pub mod task;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// 将本地路径转换为指定方案的 URL，例如 `image:///tmp/a.png`
pub fn path_to_url(scheme: &str, path: &str) -> Result<url::Url, url::ParseError> {
  let absolute = if path.starts_with('/') {
    path.to_string()
  } else {
    match std::env::current_dir() {
      Ok(dir) => dir.join(path).to_string_lossy().into_owned(),
      Err(_) => format!("/{}", path),
    }
  };
  let mut url = url::Url::parse(&format!("{}://", scheme))?;
  url.set_path(&absolute);
  Ok(url)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn absolute_path_keeps_location() {
    let url = path_to_url("image", "/tmp/frame.png").unwrap();
    assert_eq!(url.scheme(), "image");
    assert_eq!(url.path(), "/tmp/frame.png");
  }

  #[test]
  fn relative_path_is_anchored_to_cwd() {
    let url = path_to_url("image", "frame.png").unwrap();
    assert!(url.path().starts_with('/'));
    assert!(url.path().ends_with("/frame.png"));
  }
}
