//! 插图格式转换。
//!
//! DOCX 对 PNG（P3 色域、alpha 通道）兼容性差，统一铺白底转 sRGB JPEG。

use std::path::Path;

use anyhow::{Context, Result};
use image::GenericImageView;

/// 转换后的插图：JPEG 字节与像素尺寸。
pub struct PreparedImage {
    pub jpeg: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
}

/// 读取图片并转为白底 JPEG。
pub fn prepare_image(path: &Path, quality: u8) -> Result<PreparedImage> {
    let img = image::open(path).with_context(|| format!("无法解码图片 {}", path.display()))?;
    let (width_px, height_px) = img.dimensions();

    let rgb = flatten_onto_white(&img);

    let mut jpeg = Vec::new();
    let q = quality.clamp(1, 100);
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, q);
    encoder
        .encode(&rgb, rgb.width(), rgb.height(), image::ExtendedColorType::Rgb8)
        .with_context(|| format!("JPEG 编码失败 {}", path.display()))?;

    Ok(PreparedImage {
        jpeg,
        width_px,
        height_px,
    })
}

/// 带 alpha 的像素按透明度混合到白色背景上。
fn flatten_onto_white(img: &image::DynamicImage) -> image::RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }

    let rgba = img.to_rgba8();
    let mut out = image::RgbImage::new(rgba.width(), rgba.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        let a = a as u32;
        let blend = |c: u8| ((c as u32 * a + 255 * (255 - a)) / 255) as u8;
        out.put_pixel(x, y, image::Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}

/// EPUB 资源的 mime 类型（按扩展名）。
pub fn mime_from_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}
