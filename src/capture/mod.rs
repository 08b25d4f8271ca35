// 内容采集模块 - 负责整理用户输入的文本与图片

use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

use crate::session::StateKind;

/// 未知类型文件使用的 MIME
const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// 内容采集错误
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// 分析开始后内容只读
    #[error("当前状态 {0} 下内容不可修改")]
    Locked(StateKind),
    /// 读取图片文件失败
    #[error("读取图片失败 {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// 用户上传的单张图片
#[derive(Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    /// 原始字节（不做格式校验）
    pub bytes: Vec<u8>,
    /// MIME 类型
    pub mime_type: String,
    /// 原文件名
    pub file_name: Option<String>,
}

impl std::fmt::Debug for ImageAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageAttachment")
            .field("bytes", &format_args!("[{} bytes]", self.bytes.len()))
            .field("mime_type", &self.mime_type)
            .field("file_name", &self.file_name)
            .finish()
    }
}

impl ImageAttachment {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            file_name: None,
        }
    }

    /// 编码为传输用的 base64（标准字母表，带填充）
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.bytes)
    }
}

/// 待评判的用户内容
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserContent {
    pub text: String,
    pub image: Option<ImageAttachment>,
}

impl UserContent {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    /// 文本非空或附带图片时才允许提交
    pub fn is_submittable(&self) -> bool {
        !self.text.is_empty() || self.image.is_some()
    }

    pub fn preview(&self) -> ContentPreview {
        ContentPreview {
            text: self.text.clone(),
            has_image: self.image.is_some(),
            mime_type: self.image.as_ref().map(|i| i.mime_type.clone()),
            image_size: self.image.as_ref().map(|i| i.bytes.len()).unwrap_or(0),
        }
    }
}

/// 给渲染层的内容摘要（不含图片字节）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPreview {
    pub text: String,
    pub has_image: bool,
    pub mime_type: Option<String>,
    pub image_size: usize,
}

/// 内容采集器
#[derive(Debug, Clone, Default)]
pub struct ContentCapture {
    content: UserContent,
}

impl ContentCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.content.text = text.into();
    }

    /// 替换已有图片（同一时间只允许一张）
    pub fn set_image(&mut self, bytes: Vec<u8>, mime_type: impl Into<String>) {
        self.attach(ImageAttachment::new(bytes, mime_type));
    }

    pub fn attach(&mut self, image: ImageAttachment) {
        if let Some(previous) = self.content.image.replace(image) {
            debug!("替换已有图片: {} 字节", previous.bytes.len());
        }
    }

    pub fn remove_image(&mut self) {
        self.content.image = None;
    }

    pub fn clear(&mut self) {
        self.content = UserContent::default();
    }

    pub fn is_submittable(&self) -> bool {
        self.content.is_submittable()
    }

    pub fn content(&self) -> &UserContent {
        &self.content
    }
}

/// 从磁盘读取图片（整文件读入内存，不限制大小）
pub async fn load_image_file(path: impl AsRef<Path>) -> Result<ImageAttachment, CaptureError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.map_err(|source| CaptureError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let mime_type = infer_mime_type(&bytes, path);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string());

    info!(
        "已载入图片: {:?}, {} 字节, 类型 {}",
        file_name,
        bytes.len(),
        mime_type
    );

    Ok(ImageAttachment {
        bytes,
        mime_type,
        file_name,
    })
}

/// 推断 MIME：先看文件头，再看扩展名
pub fn infer_mime_type(bytes: &[u8], path: &Path) -> String {
    if let Some(mime) = sniff_magic(bytes) {
        return mime.to_string();
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("heif") => "image/heif",
        Some("bmp") => "image/bmp",
        _ => FALLBACK_MIME_TYPE,
    }
    .to_string()
}

/// 交给 image 识别文件头
fn sniff_magic(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn test_empty_content_not_submittable() {
        let capture = ContentCapture::new();
        assert!(!capture.is_submittable());
    }

    #[test]
    fn test_text_or_image_is_submittable() {
        let mut capture = ContentCapture::new();
        capture.set_text("hello world");
        assert!(capture.is_submittable());

        let mut capture = ContentCapture::new();
        capture.set_image(vec![1, 2, 3], "image/png");
        assert!(capture.is_submittable());

        // 空字节的图片仍视为已附带
        let mut capture = ContentCapture::new();
        capture.set_image(Vec::new(), "image/png");
        assert!(capture.is_submittable());
    }

    #[test]
    fn test_set_image_replaces_previous() {
        let mut capture = ContentCapture::new();
        capture.set_image(vec![1], "image/png");
        capture.set_image(vec![2, 2], "image/jpeg");

        let image = capture.content().image.as_ref().unwrap();
        assert_eq!(image.bytes, vec![2, 2]);
        assert_eq!(image.mime_type, "image/jpeg");
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut capture = ContentCapture::new();
        capture.set_text("something cringe");
        capture.set_image(vec![9; 16], "image/gif");

        capture.clear();
        let once = capture.content().clone();
        capture.clear();

        assert_eq!(&once, capture.content());
        assert_eq!(once, UserContent::default());
    }

    #[test]
    fn test_base64_encoding() {
        let image = ImageAttachment::new(b"hi!".to_vec(), "image/png");
        assert_eq!(image.to_base64(), "aGkh");
    }

    #[test]
    fn test_infer_mime_prefers_magic_bytes() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        assert_eq!(infer_mime_type(&png, &PathBuf::from("x.jpg")), "image/png");
        assert_eq!(infer_mime_type(b"????", &PathBuf::from("a.WEBP")), "image/webp");
        assert_eq!(
            infer_mime_type(b"????", &PathBuf::from("notes.txt")),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_infer_mime_without_extension() {
        let tiff = [b'I', b'I', 0x2A, 0, 8, 0, 0, 0];
        assert_eq!(infer_mime_type(&tiff, Path::new("")), "image/tiff");

        let ico = [0, 0, 1, 0, 1, 0, 16, 16];
        assert_eq!(infer_mime_type(&ico, Path::new("")), "image/x-icon");

        let gif = b"GIF89a\x01\x00";
        assert_eq!(infer_mime_type(gif, Path::new("")), "image/gif");
    }

    #[tokio::test]
    async fn test_load_image_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meme.jpeg");
        std::fs::write(&path, [0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3]).unwrap();

        let image = load_image_file(&path).await.unwrap();
        assert_eq!(image.mime_type, "image/jpeg");
        assert_eq!(image.bytes.len(), 7);
        assert_eq!(image.file_name.as_deref(), Some("meme.jpeg"));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let result = load_image_file(dir.path().join("nope.png")).await;
        assert!(matches!(result, Err(CaptureError::Io { .. })));
    }
}
