//! Markdown → HTML 及 HTML 后处理。
//!
//! EPUB 与 PDF 两条导出路径共用：转换、epigraph 标记、h2 锚点、图片路径改写。

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use pulldown_cmark::{Options, Parser};
use regex::{Captures, Regex};

fn re_after_h1_blockquotes() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r"(?s)(</h1>\s*)((?:<blockquote>\s*.*?</blockquote>\s*)+)").unwrap()
    })
}

fn re_h2_open() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"<h2[^>]*>").unwrap())
}

fn re_h1_open() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"<h1[^>]*>").unwrap())
}

fn re_src_attr() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r#"src="([^"]+)""#).unwrap())
}

/// Markdown 转换选项，对应原脚本的 `extra, toc, sane_lists, smarty`。
fn markdown_options() -> Options {
    Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_SMART_PUNCTUATION
}

pub fn markdown_to_html(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, markdown_options());
    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, parser);
    html
}

/// 供 DOCX 导出直接走事件流。
pub fn markdown_events(markdown: &str) -> Parser<'_> {
    Parser::new_ext(markdown, markdown_options())
}

/// 将紧跟在 `</h1>` 后面的连续 `<blockquote>` 标记为 epigraph。
pub fn mark_epigraphs(html: &str) -> String {
    re_after_h1_blockquotes()
        .replace_all(html, |caps: &Captures| {
            format!(
                "{}{}",
                &caps[1],
                caps[2].replace("<blockquote>", "<blockquote class=\"epigraph\">")
            )
        })
        .into_owned()
}

/// 为每个 `<h2>` 注入 `id="{chapter_id}-h2-{n}"`，供目录锚点链接。
pub fn add_h2_anchors(html: &str, chapter_id: &str) -> String {
    let mut idx = 0usize;
    re_h2_open()
        .replace_all(html, |_: &Captures| {
            idx += 1;
            format!("<h2 id=\"{}-h2-{}\">", chapter_id, idx)
        })
        .into_owned()
}

/// 将章节第一个 `<h1>` 的 id 设为章节标识（PDF 目录锚点）。
pub fn set_first_h1_id(html: &str, chapter_id: &str) -> String {
    re_h1_open()
        .replace(html, format!("<h1 id=\"{}\">", chapter_id).as_str())
        .into_owned()
}

/// 章节内引用的一张本地图片。
#[derive(Debug, Clone, PartialEq)]
pub struct LocalImage {
    /// HTML 中的原始 src。
    pub src: String,
    pub abs_path: PathBuf,
    /// 在 EPUB 包内的路径（`images/<文件名>`）。
    pub epub_path: String,
}

/// 将相对 src 解析为磁盘绝对路径：先按章节文件所在目录，再回退书稿根目录。
pub fn resolve_image_path(root: &Path, chapter_file: &str, src: &str) -> Option<PathBuf> {
    let chapter_dir = root
        .join(chapter_file)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.to_path_buf());
    let candidate = chapter_dir.join(src);
    if candidate.exists() {
        return Some(candidate);
    }
    let fallback = root.join(src);
    fallback.exists().then_some(fallback)
}

fn is_remote(src: &str) -> bool {
    src.starts_with("http://") || src.starts_with("https://") || src.starts_with("file://")
}

/// 收集章节 HTML 中引用的本地图片（跳过远程链接与不存在的文件）。
pub fn collect_local_images(html: &str, root: &Path, chapter_file: &str) -> Vec<LocalImage> {
    let mut images = Vec::new();
    for cap in re_src_attr().captures_iter(html) {
        let src = cap[1].to_string();
        if is_remote(&src) || images.iter().any(|i: &LocalImage| i.src == src) {
            continue;
        }
        if let Some(abs_path) = resolve_image_path(root, chapter_file, &src) {
            let filename = abs_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("image")
                .to_string();
            images.push(LocalImage {
                src,
                abs_path,
                epub_path: format!("images/{}", filename),
            });
        }
    }
    images
}

/// 将相对图片路径改写为 `file://` 绝对 URI（PDF 引擎用）。
pub fn absolutize_image_paths(html: &str, root: &Path, chapter_file: &str) -> String {
    re_src_attr()
        .replace_all(html, |caps: &Captures| {
            let src = &caps[1];
            if is_remote(src) {
                return caps[0].to_string();
            }
            match resolve_image_path(root, chapter_file, src) {
                Some(abs) => format!("src=\"file://{}\"", abs.display()),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn converts_tables_and_blockquotes() {
        let html = markdown_to_html("# 标题\n\n> 引言\n\n| a | b |\n|---|---|\n| 1 | 2 |\n");
        assert!(html.contains("<h1>"));
        assert!(html.contains("<blockquote>"));
        assert!(html.contains("<table>"));
    }

    #[test]
    fn marks_blockquote_after_h1_as_epigraph() {
        let html = markdown_to_html("# 标题\n\n> 引言一\n\n正文段落。\n\n> 普通引用\n");
        let marked = mark_epigraphs(&html);
        assert!(marked.contains("<blockquote class=\"epigraph\">"));
        // 正文中段的引用不受影响
        assert_eq!(marked.matches("<blockquote class=\"epigraph\">").count(), 1);
        assert_eq!(marked.matches("<blockquote>").count(), 1);
    }

    #[test]
    fn consecutive_epigraphs_all_marked() {
        let html = "<h1>t</h1>\n<blockquote>\n<p>a</p>\n</blockquote>\n<blockquote>\n<p>b</p>\n</blockquote>\n<p>body</p>";
        let marked = mark_epigraphs(html);
        assert_eq!(marked.matches("class=\"epigraph\"").count(), 2);
    }

    #[test]
    fn anchors_each_h2_in_order() {
        let html = "<h2>一</h2><p>x</p><h2>二</h2>";
        let out = add_h2_anchors(html, "ch01");
        assert!(out.contains("<h2 id=\"ch01-h2-1\">一"));
        assert!(out.contains("<h2 id=\"ch01-h2-2\">二"));
    }

    #[test]
    fn only_first_h1_gets_chapter_id() {
        let html = "<h1>一</h1><h1>二</h1>";
        let out = set_first_h1_id(html, "ch01");
        assert_eq!(out, "<h1 id=\"ch01\">一</h1><h1>二</h1>");
    }

    #[test]
    fn collects_and_absolutizes_local_images() {
        let dir = tempfile::tempdir().unwrap();
        let book = dir.path().join("book");
        fs::create_dir_all(book.join("img")).unwrap();
        fs::write(book.join("img/pic.png"), b"x").unwrap();
        fs::write(book.join("ch.md"), "x").unwrap();

        let html = r#"<img src="img/pic.png" /><img src="https://e.com/a.png" /><img src="img/missing.png" />"#;
        let images = collect_local_images(html, dir.path(), "book/ch.md");
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].epub_path, "images/pic.png");

        let abs = absolutize_image_paths(html, dir.path(), "book/ch.md");
        assert!(abs.contains("src=\"file://"));
        assert!(abs.contains("https://e.com/a.png"));
        // 不存在的文件保持原样
        assert!(abs.contains("src=\"img/missing.png\""));
    }
}
