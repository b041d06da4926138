//! PDF 导出：装配完整 HTML（封面 + 目录 + 正文），交给外部 HTML→PDF 引擎渲染。
//!
//! 目录页码依赖引擎的 `target-counter(attr(href), page)` 支持（weasyprint 可用）。

use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::base_system::context::Config;
use crate::exporter::html_render::{
    absolutize_image_paths, add_h2_anchors, escape_html, mark_epigraphs, markdown_to_html,
    set_first_h1_id,
};
use crate::exporter::{BookPage, h2_display_title};

#[derive(Debug, Clone, Copy)]
pub struct PdfOptions {
    /// 单章导出：不含封面与目录页。
    pub single_chapter: bool,
    /// 在输出文件旁保留中间 HTML。
    pub keep_html: bool,
}

pub fn export(
    root: &Path,
    cfg: &Config,
    book_title: &str,
    pages: &[BookPage],
    output: &Path,
    opts: PdfOptions,
) -> Result<()> {
    let html = if opts.single_chapter {
        build_standalone_html(root, cfg, book_title, pages)
    } else {
        build_html(root, cfg, book_title, pages)
    };

    let parent = output.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    // 中间 HTML：--html 时落在输出文件旁，否则写进临时文件
    let mut tmp_guard = None;
    let html_path = if opts.keep_html {
        let path = output.with_extension("html");
        fs::write(&path, &html)
            .with_context(|| format!("无法写入 HTML {}", path.display()))?;
        info!("HTML 已保存: {}", path.display());
        path
    } else {
        let mut tmp = tempfile::Builder::new()
            .prefix("book-export-")
            .suffix(".html")
            .tempfile()
            .context("无法创建临时 HTML 文件")?;
        tmp.write_all(html.as_bytes())?;
        tmp.flush()?;
        let path = tmp.path().to_path_buf();
        tmp_guard = Some(tmp);
        path
    };

    run_engine(cfg, &html_path, output)?;
    drop(tmp_guard);

    info!("生成 PDF: {}", output.display());
    Ok(())
}

/// 调用外部渲染引擎（默认 weasyprint）：`<engine> [args...] <input.html> <output.pdf>`。
fn run_engine(cfg: &Config, html_path: &Path, output: &Path) -> Result<()> {
    let mut cmd = Command::new(&cfg.pdf_engine);
    cmd.args(&cfg.pdf_engine_args).arg(html_path).arg(output);
    debug!("执行: {:?}", cmd);

    let result = cmd.output().with_context(|| {
        format!(
            "无法启动 PDF 引擎 {}，请确认已安装并在 PATH 中",
            cfg.pdf_engine
        )
    })?;
    if !result.status.success() {
        bail!(
            "PDF 引擎 {} 渲染失败（{}）：{}",
            cfg.pdf_engine,
            result.status,
            String::from_utf8_lossy(&result.stderr).trim()
        );
    }
    Ok(())
}

/// 整本书的完整 HTML：封面页、目录页、正文页面流。
pub fn build_html(root: &Path, cfg: &Config, book_title: &str, pages: &[BookPage]) -> String {
    let toc = build_toc_html(pages);
    let body = build_body_html(root, pages);
    let title = escape_html(book_title);

    format!(
        "<!DOCTYPE html>\n<html lang=\"{lang}\">\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n<style>\n{css}\n</style>\n</head>\n<body>\n\n\
         <div class=\"cover-page\">\n    <h1 class=\"cover-title\">{title}</h1>\n</div>\n\n\
         <div class=\"toc-page\">\n    <h1 class=\"toc-heading\">目录</h1>\n    {toc}\n</div>\n\n\
         {body}\n\n</body>\n</html>",
        lang = cfg.language,
        title = title,
        css = build_css(cfg),
        toc = toc,
        body = body,
    )
}

/// 单章 HTML：无封面、无目录。
pub fn build_standalone_html(
    root: &Path,
    cfg: &Config,
    book_title: &str,
    pages: &[BookPage],
) -> String {
    let body = build_body_html(root, pages);
    format!(
        "<!DOCTYPE html>\n<html lang=\"{lang}\">\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n<style>\n{css}\n</style>\n</head>\n<body>\n{body}\n</body>\n</html>",
        lang = cfg.language,
        title = escape_html(book_title),
        css = build_css(cfg),
        body = body,
    )
}

fn build_body_html(root: &Path, pages: &[BookPage]) -> String {
    let mut parts = Vec::new();
    for page in pages {
        match page {
            BookPage::Part { label, id } => {
                parts.push(format!(
                    "<div class=\"part-page\" id=\"{}\"><h1>{}</h1></div>",
                    id,
                    escape_html(label)
                ));
            }
            BookPage::Section { label, id } => {
                parts.push(format!(
                    "<div class=\"section-page\" id=\"{}\"><p class=\"section-page-title\">{}</p></div>",
                    id,
                    escape_html(label)
                ));
            }
            BookPage::Question { text, .. } => {
                parts.push(format!(
                    "<div class=\"question-page\"><p class=\"question-text\">{}</p></div>",
                    escape_html(text)
                ));
            }
            BookPage::Chapter(ch) => {
                let id = ch.meta.id();
                let mut html = markdown_to_html(&ch.body_markdown);
                html = absolutize_image_paths(&html, root, &ch.meta.file);
                html = mark_epigraphs(&html);
                html = add_h2_anchors(&html, &id);
                html = set_first_h1_id(&html, &id);
                parts.push(format!("<div class=\"chapter\">{}</div>", html));
            }
        }
    }
    parts.join("\n")
}

/// 目录 HTML：部分 / 子分类 / 章节 / h2 子标题，层级用缩进类表达。
fn build_toc_html(pages: &[BookPage]) -> String {
    let mut lines = vec!["<nav class=\"toc\">".to_string()];
    let mut in_part = false;

    for page in pages {
        match page {
            BookPage::Part { label, id } => {
                if in_part {
                    lines.push("</div>".to_string());
                }
                in_part = true;
                lines.push(format!(
                    "<div class=\"toc-part\"><a href=\"#{}\">{}</a>",
                    id,
                    escape_html(label)
                ));
            }
            BookPage::Section { label, .. } => {
                lines.push(format!(
                    "<div class=\"toc-section\">{}</div>",
                    escape_html(label)
                ));
            }
            BookPage::Question { .. } => {}
            BookPage::Chapter(ch) => {
                let id = ch.meta.id();
                let top = if in_part { "" } else { " toc-top" };
                lines.push(format!(
                    "<div class=\"toc-chapter{}\"><a href=\"#{}\">{}</a></div>",
                    top,
                    id,
                    escape_html(&ch.meta.display_title())
                ));
                if ch.meta.number.is_some() {
                    let sub_top = if in_part { "" } else { " toc-top-sub" };
                    for (i, heading) in ch.h2_headings.iter().enumerate() {
                        lines.push(format!(
                            "<div class=\"toc-subheading{}\"><a href=\"#{}-h2-{}\">{}</a></div>",
                            sub_top,
                            id,
                            i + 1,
                            escape_html(&h2_display_title(ch.meta.number, i + 1, heading))
                        ));
                    }
                }
            }
        }
    }

    if in_part {
        lines.push("</div>".to_string());
    }
    lines.push("</nav>".to_string());
    lines.join("\n")
}

fn build_css(cfg: &Config) -> String {
    PDF_CSS_TEMPLATE
        .replace("__CJK_FONT__", &cfg.cjk_font)
        .replace("__CODE_FONT__", &cfg.code_font)
}

const PDF_CSS_TEMPLATE: &str = r#"
@page {
    size: A4;
    margin: 2.5cm 2cm;

    @bottom-center {
        content: counter(page);
        font-size: 9pt;
        color: #999;
    }
}

@page :first {
    @bottom-center { content: none; }
}

body {
    font-family: "__CJK_FONT__", "PingFang SC", "Hiragino Sans GB", "Microsoft YaHei",
                 "Noto Sans CJK SC", "Source Han Sans SC", sans-serif;
    font-size: 11pt;
    line-height: 1.8;
    color: #333;
}

/* 封面 */
.cover-page {
    page-break-after: always;
    padding-top: 35vh;
    text-align: center;
}

.cover-title {
    font-size: 32pt;
    font-weight: 700;
    letter-spacing: 0.1em;
    color: #222;
    border: none;
}

/* 目录页 */
.toc-page {
    page-break-after: always;
}

.toc-heading {
    font-size: 20pt;
    margin-bottom: 1.5em;
    text-align: center;
    color: #222;
}

.toc a {
    text-decoration: none;
    color: #333;
}

.toc a::after {
    content: target-counter(attr(href), page);
    float: right;
    color: #999;
}

.toc-part {
    margin-top: 1.2em;
    margin-bottom: 0.3em;
}

.toc-part > a {
    font-size: 12pt;
    font-weight: 700;
    color: #222;
}

.toc-section {
    font-size: 10.5pt;
    font-weight: 600;
    color: #555;
    margin: 0.5em 0 0.2em 1em;
}

.toc-chapter {
    font-size: 10.5pt;
    margin-left: 2em;
    line-height: 2;
}

.toc-chapter a {
    color: #444;
}

.toc-top {
    margin-left: 1em;
    font-size: 11pt;
}

.toc-subheading {
    font-size: 10pt;
    margin-left: 3.5em;
    line-height: 1.8;
}

.toc-subheading a {
    color: #666;
}

.toc-subheading a::after {
    content: target-counter(attr(href), page);
    float: right;
    color: #bbb;
}

.toc-top-sub {
    margin-left: 2.5em;
}

/* 部分标题页 */
.part-page {
    page-break-before: always;
    page-break-after: always;
    padding-top: 35vh;
    text-align: center;
}

.part-page h1 {
    font-size: 26pt;
    font-weight: 700;
    color: #222;
    border: none;
}

/* 子分类标题页 */
.section-page {
    page-break-before: always;
    page-break-after: always;
    padding-top: 35vh;
    text-align: center;
}

.section-page-title {
    font-size: 20pt;
    font-weight: 600;
    color: #444;
    text-align: center;
}

/* 问题页 */
.question-page {
    page-break-before: always;
    page-break-after: always;
    padding-top: 35vh;
    text-align: center;
}

.question-text {
    font-size: 16pt;
    color: #555;
    font-style: italic;
    line-height: 2;
    text-align: center;
}

/* 章节 */
.chapter {
    page-break-before: always;
}

h1 {
    font-size: 20pt;
    font-weight: 700;
    margin-top: 0;
    margin-bottom: 0.8em;
    color: #222;
    border-bottom: 1px solid #ddd;
    padding-bottom: 0.3em;
}

h2 {
    font-size: 15pt;
    font-weight: 600;
    margin-top: 1.5em;
    margin-bottom: 0.5em;
    color: #333;
}

h3 {
    font-size: 13pt;
    font-weight: 600;
    margin-top: 1.2em;
    margin-bottom: 0.4em;
    color: #444;
}

p {
    margin: 0.6em 0;
    text-align: justify;
}

/* 引用 */
blockquote {
    margin: 1em 0;
    padding: 0.5em 1em;
    border-left: 3px solid #ccc;
    color: #666;
    font-style: italic;
    background: #fafafa;
}

blockquote p {
    margin: 0.3em 0;
}

/* 章节开头引言 */
blockquote.epigraph {
    border-left: none;
    background: #f7f3ee;
    border-radius: 4px;
    padding: 1em 1.5em;
    margin: 1.2em 0 1.5em 0;
    color: #555;
    font-style: italic;
    line-height: 2;
}

/* 水平线 */
hr {
    border: none;
    border-top: 1px solid #ddd;
    margin: 1.5em 0;
}

/* 图片 */
img {
    max-width: 85%;
    max-height: 500px;
    width: auto;
    height: auto;
    display: block;
    margin: 1em auto;
    object-fit: contain;
}

/* 代码 */
code {
    font-family: "__CODE_FONT__", "SF Mono", "Menlo", "Monaco", monospace;
    font-size: 9.5pt;
    background: #f5f5f5;
    padding: 0.1em 0.3em;
    border-radius: 3px;
}

pre {
    background: #f5f5f5;
    padding: 1em;
    border-radius: 4px;
    overflow-x: auto;
    font-size: 9pt;
    line-height: 1.5;
}

pre code {
    background: none;
    padding: 0;
}

/* 列表 */
ul, ol {
    margin: 0.5em 0;
    padding-left: 1.5em;
}

li {
    margin: 0.2em 0;
}

/* 链接 */
a {
    color: #333;
    text-decoration: none;
}

/* 表格 */
table {
    border-collapse: collapse;
    width: 100%;
    margin: 1em 0;
    font-size: 10pt;
}

th, td {
    border: 1px solid #ddd;
    padding: 0.4em 0.6em;
    text-align: left;
}

th {
    background: #f5f5f5;
    font-weight: 600;
}
"#;
