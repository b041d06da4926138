//! EPUB 导出：epub-builder 容器 + 页面流装配。

use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use epub_builder::{EpubBuilder, EpubContent, EpubVersion, ReferenceType, TocElement, ZipLibrary};
use tracing::{debug, info};

use crate::base_system::context::Config;
use crate::exporter::html_render::{
    add_h2_anchors, collect_local_images, escape_html, mark_epigraphs, markdown_to_html,
};
use crate::exporter::image_utils::mime_from_path;
use crate::exporter::{BookPage, h2_display_title};

/// 从书名确定性生成 UUID v5 的命名空间。
/// 同一本书多次导出，dc:identifier 保持不变，阅读器可正确恢复进度。
const EPUB_UUID_NAMESPACE: uuid::Uuid = uuid::Uuid::from_bytes([
    0x6b, 0xa7, 0xb8, 0x10, 0x9d, 0xad, 0x11, 0xd1, 0x80, 0xb4, 0x00, 0xc0, 0x4f, 0xd4, 0x30, 0xc8,
]);

/// EPUB 样式（阅读器排版）。
const EPUB_CSS: &str = r#"body { font-family: sans-serif; font-size: 1em; line-height: 1.8; color: #333; }
h1 { font-size: 1.6em; font-weight: 700; margin: 0 0 0.8em 0; color: #222; border-bottom: 1px solid #ddd; padding-bottom: 0.3em; }
h2 { font-size: 1.3em; font-weight: 600; margin: 1.5em 0 0.5em 0; color: #333; }
h3 { font-size: 1.1em; font-weight: 600; margin: 1.2em 0 0.4em 0; color: #444; }
p { margin: 0.6em 0; text-align: justify; }
blockquote { margin: 1em 0; padding: 0.5em 1em; border-left: 3px solid #ccc; color: #666; font-style: italic; background: #fafafa; }
blockquote p { margin: 0.3em 0; }
blockquote.epigraph { border-left: none; background: #f7f3ee; border-radius: 4px; padding: 1em 1.5em; margin: 1.2em 0 1.5em 0; color: #555; font-style: italic; line-height: 2; }
hr { border: none; border-top: 1px solid #ddd; margin: 1.5em 0; }
img { max-width: 100%; height: auto; display: block; margin: 1em auto; }
code { font-family: monospace; font-size: 0.9em; background: #f5f5f5; padding: 0.1em 0.3em; border-radius: 3px; }
pre { background: #f5f5f5; padding: 1em; border-radius: 4px; overflow-x: auto; font-size: 0.85em; line-height: 1.5; }
pre code { background: none; padding: 0; }
ul, ol { margin: 0.5em 0; padding-left: 1.5em; }
li { margin: 0.2em 0; }
a { color: #333; text-decoration: none; }
table { border-collapse: collapse; width: 100%; margin: 1em 0; font-size: 0.9em; }
th, td { border: 1px solid #ddd; padding: 0.4em 0.6em; text-align: left; }
th { background: #f5f5f5; font-weight: 600; }
.part-title { text-align: center; font-size: 1.8em; font-weight: 700; margin-top: 40%; color: #222; border: none; }
.section-title { text-align: center; font-size: 1.4em; font-weight: 600; margin-top: 40%; color: #444; }
.question-page { page-break-before: always; page-break-after: always; height: 100%; }
.question-text { text-align: center; font-size: 1.2em; color: #555; font-style: italic; line-height: 2; margin-top: 40%; }
"#;

pub fn export(
    root: &Path,
    cfg: &Config,
    book_title: &str,
    pages: &[BookPage],
    output: &Path,
) -> Result<()> {
    let zip = ZipLibrary::new().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let mut book = EpubBuilder::new(zip).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    book.epub_version(EpubVersion::V30);
    book.set_uuid(uuid::Uuid::new_v5(
        &EPUB_UUID_NAMESPACE,
        book_title.as_bytes(),
    ));
    book.metadata("title", book_title).ok();
    book.metadata("lang", &cfg.language).ok();
    book.metadata("toc_name", "目录").ok();
    book.metadata("generator", "markdown-book-exporter").ok();
    let author = cfg.author.trim();
    if !author.is_empty() {
        book.metadata("author", author).ok();
    }

    book.stylesheet(Cursor::new(EPUB_CSS.to_string()))
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    book.inline_toc();

    // epub 包内路径 -> 磁盘路径，跨章节去重
    let mut all_images: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut in_part = false;
    let mut in_section = false;

    for page in pages {
        match page {
            BookPage::Part { label, id } => {
                in_part = true;
                in_section = false;
                let body = format!("<h1 class=\"part-title\">{}</h1>", escape_html(label));
                book.add_content(
                    EpubContent::new(
                        format!("{}.xhtml", id),
                        Cursor::new(wrap_page(label, &body, &cfg.language)),
                    )
                    .title(label)
                    .level(1)
                    .reftype(ReferenceType::Text),
                )
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            }
            BookPage::Section { label, id } => {
                in_section = true;
                let body = format!("<p class=\"section-title\">{}</p>", escape_html(label));
                book.add_content(
                    EpubContent::new(
                        format!("{}.xhtml", id),
                        Cursor::new(wrap_page(label, &body, &cfg.language)),
                    )
                    .title(label)
                    .level(2)
                    .reftype(ReferenceType::Text),
                )
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            }
            BookPage::Question { text, chapter_id } => {
                let body = format!(
                    "<div class=\"question-page\"><p class=\"question-text\">{}</p></div>",
                    escape_html(text)
                );
                // 不设标题：只进书脊，不进目录
                book.add_content(
                    EpubContent::new(
                        format!("question-{}.xhtml", chapter_id),
                        Cursor::new(wrap_page("问题", &body, &cfg.language)),
                    )
                    .reftype(ReferenceType::Text),
                )
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            }
            BookPage::Chapter(ch) => {
                let chapter_id = ch.meta.id();
                let mut html = markdown_to_html(&ch.body_markdown);
                html = mark_epigraphs(&html);
                html = add_h2_anchors(&html, &chapter_id);

                for img in collect_local_images(&html, root, &ch.meta.file) {
                    html = html.replace(
                        &format!("src=\"{}\"", img.src),
                        &format!("src=\"{}\"", img.epub_path),
                    );
                    all_images.entry(img.epub_path).or_insert(img.abs_path);
                }

                let display_title = ch.meta.display_title();
                let file_name = format!("{}.xhtml", chapter_id);
                let level = 1 + in_part as i32 + in_section as i32;

                let mut content = EpubContent::new(
                    file_name.clone(),
                    Cursor::new(wrap_page(&display_title, &html, &cfg.language)),
                )
                .title(&display_title)
                .level(level)
                .reftype(ReferenceType::Text);

                if ch.meta.number.is_some() {
                    for (i, heading) in ch.h2_headings.iter().enumerate() {
                        let sub_title = h2_display_title(ch.meta.number, i + 1, heading);
                        content = content.child(
                            TocElement::new(
                                format!("{}#{}-h2-{}", file_name, chapter_id, i + 1),
                                sub_title,
                            )
                            .level(level + 1),
                        );
                    }
                }

                book.add_content(content)
                    .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            }
        }
    }

    for (epub_path, abs_path) in &all_images {
        let bytes = fs::read(abs_path)
            .with_context(|| format!("读取图片失败 {}", abs_path.display()))?;
        debug!("嵌入图片 {} ({} 字节)", epub_path, bytes.len());
        book.add_resource(epub_path, Cursor::new(bytes), mime_from_path(abs_path))
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    }

    let parent = output.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut file = fs::File::create(output)
        .with_context(|| format!("无法创建输出文件 {}", output.display()))?;
    book.generate(&mut file)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    info!("生成 EPUB: {}", output.display());
    Ok(())
}

fn wrap_page(title: &str, body: &str, lang: &str) -> String {
    let escaped_title = escape_html(title);
    let body = if body.trim().is_empty() { "<p></p>" } else { body };
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!DOCTYPE html>\n<html xmlns=\"http://www.w3.org/1999/xhtml\" xml:lang=\"{lang}\" lang=\"{lang}\">\n<head>\n  <meta charset=\"utf-8\" />\n  <title>{escaped_title}</title>\n  <link rel=\"stylesheet\" type=\"text/css\" href=\"stylesheet.css\" />\n</head>\n<body>\n{body}\n</body>\n</html>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book_model::outline::Outline;
    use crate::exporter::{AssembleOptions, assemble_pages};
    use std::io::Read as _;

    fn sample_book(dir: &Path) -> (Config, Outline) {
        let book = dir.join("book");
        fs::create_dir_all(&book).unwrap();
        fs::write(
            dir.join("index.md"),
            "# 样书\n\n- 第一部分：做产品\n  - [第一章](book/ch01.md)\n",
        )
        .unwrap();
        fs::write(
            book.join("ch01.md"),
            "问题？\n\n---\n# 第一章\n\n> 引言\n\n## 第一节\n\n正文。\n",
        )
        .unwrap();
        let cfg = Config::default();
        let outline = Outline::load(dir, &cfg).unwrap();
        (cfg, outline)
    }

    #[test]
    fn generates_valid_epub_container() {
        let dir = tempfile::tempdir().unwrap();
        let (cfg, outline) = sample_book(dir.path());
        let pages = assemble_pages(
            dir.path(),
            &cfg,
            &outline.chapters,
            AssembleOptions {
                single_chapter: false,
                number_h3: false,
            },
        );
        let out = dir.path().join("output/样书.epub");
        export(dir.path(), &cfg, &outline.title, &pages, &out).unwrap();

        let file = fs::File::open(&out).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.iter().any(|n| n == "mimetype"));
        assert!(names.iter().any(|n| n.ends_with("container.xml")));
        assert!(names.iter().any(|n| n.ends_with("ch01.xhtml")));
        assert!(names.iter().any(|n| n.ends_with("question-ch01.xhtml")));
        assert!(names.iter().any(|n| n.ends_with("part-1.xhtml")));

        // 章节页包含编号标题与 epigraph 标记
        let mut chapter_html = String::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).unwrap();
            if entry.name().ends_with("ch01.xhtml") && !entry.name().contains("question") {
                entry.read_to_string(&mut chapter_html).unwrap();
            }
        }
        assert!(chapter_html.contains("1. 第一章"));
        assert!(chapter_html.contains("class=\"epigraph\""));
        assert!(chapter_html.contains("id=\"ch01-h2-1\""));
    }

    #[test]
    fn identifier_is_stable_across_runs() {
        let a = uuid::Uuid::new_v5(&EPUB_UUID_NAMESPACE, "样书".as_bytes());
        let b = uuid::Uuid::new_v5(&EPUB_UUID_NAMESPACE, "样书".as_bytes());
        assert_eq!(a, b);
    }
}
