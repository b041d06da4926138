//! 导出模块入口。
//!
//! 三种格式共用同一套页面装配逻辑（`assemble_pages`）：
//! 部分标题页 / 子分类标题页 / 问题页 / 章节页，按目录顺序排成页面流，
//! 各导出器只负责把页面流写进自己的文档对象模型。

pub mod docx;
pub mod epub;
pub mod html_render;
pub mod image_utils;
pub mod pdf;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::base_system::context::{Config, safe_fs_name};
use crate::book_model::chapter::{extract_h2_headings, extract_question, number_headings, read_chapter};
use crate::book_model::outline::Chapter;

/// 页面流中的一页。
#[derive(Debug, Clone)]
pub enum BookPage {
    /// 部分标题页（每个部分首次出现时插入一页）。
    Part { label: String, id: String },
    /// 子分类标题页。
    Section { label: String, id: String },
    /// 章首引导问题页，排在所属章节正文之前。
    Question { text: String, chapter_id: String },
    Chapter(ChapterPage),
}

#[derive(Debug, Clone)]
pub struct ChapterPage {
    pub meta: Chapter,
    /// 已编号、已剥离问题块的 markdown 正文。
    pub body_markdown: String,
    /// 原始 h2 标题（未编号），目录子条目用。
    pub h2_headings: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct AssembleOptions {
    /// 单章导出：跳过部分/子分类标题页。
    pub single_chapter: bool,
    /// 是否为 h3 编号（PDF 为 true，DOCX/EPUB 为 false）。
    pub number_h3: bool,
}

/// 读取章节并装配页面流。缺失的章节文件已在读取时告警并跳过。
pub fn assemble_pages(
    root: &Path,
    cfg: &Config,
    chapters: &[Chapter],
    opts: AssembleOptions,
) -> Vec<BookPage> {
    let mut pages = Vec::new();
    let mut seen_parts: HashSet<String> = HashSet::new();
    let mut seen_sections: HashSet<String> = HashSet::new();
    let mut part_counter = 0usize;

    for ch in chapters {
        let Some(content) = read_chapter(root, &ch.file) else {
            continue;
        };

        if !opts.single_chapter
            && let Some(part) = &ch.part
            && !seen_parts.contains(part)
        {
            seen_parts.insert(part.clone());
            part_counter += 1;
            seen_sections.clear();
            pages.push(BookPage::Part {
                label: part.clone(),
                id: format!("part-{}", part_counter),
            });
        }

        if !opts.single_chapter
            && let Some(section) = &ch.section
            && !seen_sections.contains(section)
        {
            seen_sections.insert(section.clone());
            pages.push(BookPage::Section {
                label: section.clone(),
                id: format!("section-{}-{}", seen_sections.len(), part_counter),
            });
        }

        let (question, body) = extract_question(&content, cfg.skips_question(ch.basename()));
        let h2_headings = extract_h2_headings(body);
        let body_markdown = number_headings(body, ch.number, opts.number_h3);

        if let Some(text) = question {
            pages.push(BookPage::Question {
                text,
                chapter_id: ch.id(),
            });
        }

        pages.push(BookPage::Chapter(ChapterPage {
            meta: ch.clone(),
            body_markdown,
            h2_headings,
        }));
    }

    pages
}

/// 目录子条目的展示标题：`N.M 标题`。
pub fn h2_display_title(number: Option<u32>, index: usize, heading: &str) -> String {
    match number {
        Some(n) => format!("{}.{} {}", n, index, heading),
        None => heading.to_string(),
    }
}

/// 输出路径：显式 `-o` 优先；单章导出为 `NN-标题.ext`，整本为 `书名.ext`。
pub fn resolve_output_path(
    root: &Path,
    cfg: &Config,
    book_title: &str,
    selected: Option<&Chapter>,
    cli_output: Option<PathBuf>,
    ext: &str,
) -> PathBuf {
    if let Some(path) = cli_output {
        return path;
    }
    let out_dir = root.join(&cfg.output_dir);
    match selected {
        Some(ch) => {
            let num = ch.number.unwrap_or(0);
            out_dir.join(format!(
                "{:02}-{}.{}",
                num,
                safe_fs_name(&ch.title, "_", 120),
                ext
            ))
        }
        None => out_dir.join(format!("{}.{}", safe_fs_name(book_title, "_", 120), ext)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book_model::outline::Outline;
    use std::fs;

    fn write_book(dir: &Path) {
        let book = dir.join("book");
        fs::create_dir_all(&book).unwrap();
        fs::write(
            dir.join("index.md"),
            "# 样书\n\n- 前言：[重启](book/restart.md)\n- 第一部分：做产品\n  - 产品认知\n    - [第一章](book/ch01.md)\n    - [第二章](book/ch02.md)\n",
        )
        .unwrap();
        fs::write(book.join("restart.md"), "# 重启\n\n前言正文。\n").unwrap();
        fs::write(
            book.join("ch01.md"),
            "为什么做产品？\n\n---\n# 第一章\n\n> 引言\n\n## 第一节\n\n正文。\n",
        )
        .unwrap();
        // ch02.md 故意缺失
    }

    fn load(dir: &Path) -> (Config, Outline) {
        let cfg = Config::default();
        let outline = Outline::load(dir, &cfg).unwrap();
        (cfg, outline)
    }

    #[test]
    fn page_stream_order_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        write_book(dir.path());
        let (cfg, outline) = load(dir.path());

        let pages = assemble_pages(
            dir.path(),
            &cfg,
            &outline.chapters,
            AssembleOptions {
                single_chapter: false,
                number_h3: false,
            },
        );

        // 前言部分页、前言章、第一部分页、子分类页、问题页、第一章；ch02 缺失被跳过
        assert_eq!(pages.len(), 6);
        assert!(matches!(&pages[0], BookPage::Part { label, id } if label == "前言" && id == "part-1"));
        assert!(matches!(&pages[1], BookPage::Chapter(p) if p.meta.title == "重启"));
        assert!(matches!(&pages[2], BookPage::Part { id, .. } if id == "part-2"));
        assert!(matches!(&pages[3], BookPage::Section { label, id } if label == "产品认知" && id == "section-1-2"));
        assert!(
            matches!(&pages[4], BookPage::Question { text, chapter_id } if text == "为什么做产品？" && chapter_id == "ch01")
        );
        let BookPage::Chapter(ch1) = &pages[5] else {
            panic!("expected chapter page");
        };
        assert!(ch1.body_markdown.contains("# 1. 第一章"));
        assert!(ch1.body_markdown.contains("## 1.1 第一节"));
        assert_eq!(ch1.h2_headings, vec!["第一节"]);
    }

    #[test]
    fn restart_is_in_question_skip_list() {
        let dir = tempfile::tempdir().unwrap();
        write_book(dir.path());
        // restart.md 在 skip_question_files 中，即使有分隔线也不出问题页
        fs::write(
            dir.path().join("book/restart.md"),
            "看似问题\n\n---\n# 重启\n",
        )
        .unwrap();
        let (cfg, outline) = load(dir.path());
        let pages = assemble_pages(
            dir.path(),
            &cfg,
            &outline.chapters,
            AssembleOptions {
                single_chapter: false,
                number_h3: false,
            },
        );
        assert!(
            !pages
                .iter()
                .any(|p| matches!(p, BookPage::Question { chapter_id, .. } if chapter_id == "restart"))
        );
    }

    #[test]
    fn single_chapter_skips_part_and_section_pages() {
        let dir = tempfile::tempdir().unwrap();
        write_book(dir.path());
        let (cfg, outline) = load(dir.path());
        let selected = outline.select_chapter(1).unwrap().clone();
        let pages = assemble_pages(
            dir.path(),
            &cfg,
            std::slice::from_ref(&selected),
            AssembleOptions {
                single_chapter: true,
                number_h3: false,
            },
        );
        assert_eq!(pages.len(), 2); // 问题页 + 章节页
        assert!(matches!(&pages[0], BookPage::Question { .. }));
    }

    #[test]
    fn output_path_naming() {
        let dir = tempfile::tempdir().unwrap();
        write_book(dir.path());
        let (cfg, outline) = load(dir.path());

        let whole = resolve_output_path(dir.path(), &cfg, &outline.title, None, None, "epub");
        assert!(whole.ends_with("output/样书.epub"));

        let ch = outline.select_chapter(1).unwrap();
        let single = resolve_output_path(dir.path(), &cfg, &outline.title, Some(ch), None, "pdf");
        assert!(single.ends_with("output/01-第一章.pdf"));

        let explicit = resolve_output_path(
            dir.path(),
            &cfg,
            &outline.title,
            None,
            Some(PathBuf::from("/tmp/x.docx")),
            "docx",
        );
        assert_eq!(explicit, PathBuf::from("/tmp/x.docx"));
    }
}
