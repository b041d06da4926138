//! DOCX 导出：pulldown-cmark 事件流 → docx-rs 文档对象。

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use docx_rs::{
    AbstractNumbering, AlignmentType, BreakType, Docx, IndentLevel, Level, LevelJc, LevelText,
    LineSpacing, NumberFormat, Numbering, NumberingId, PageMargin, Paragraph, Pic, Run, RunFonts,
    Start, Style, StyleType, Table, TableCell, TableRow,
};
use pulldown_cmark::{Event, HeadingLevel, Tag, TagEnd};
use tracing::{info, warn};

use crate::base_system::context::Config;
use crate::exporter::html_render::resolve_image_path;
use crate::exporter::image_utils::prepare_image;
use crate::exporter::{BookPage, ChapterPage, h2_display_title};

// twips：A4 页面，上下 2.5cm、左右 2cm 边距
const PAGE_W: u32 = 11906;
const PAGE_H: u32 = 16838;
const MARGIN_TB: i32 = 1417;
const MARGIN_LR: i32 = 1134;

const BULLET_NUMBERING: usize = 1;
const DECIMAL_NUMBERING: usize = 2;

const EMU_PER_CM: f32 = 360_000.0;

/// 文档中的一个块级元素。
enum Block {
    Para(Paragraph),
    Tbl(Table),
}

pub fn export(
    root: &Path,
    cfg: &Config,
    book_title: &str,
    pages: &[BookPage],
    output: &Path,
    single_chapter: bool,
) -> Result<()> {
    let mut blocks: Vec<Block> = Vec::new();

    if !single_chapter {
        add_cover_page(&mut blocks, cfg, book_title);
        add_toc_page(&mut blocks, cfg, pages);
    }

    for page in pages {
        match page {
            BookPage::Part { label, .. } => {
                add_centered_page(&mut blocks, cfg, label, 52, "222222", false);
            }
            BookPage::Section { label, .. } => {
                add_centered_page(&mut blocks, cfg, label, 40, "444444", false);
            }
            BookPage::Question { text, .. } => {
                add_centered_page(&mut blocks, cfg, text, 32, "555555", true);
            }
            BookPage::Chapter(ch) => {
                let mut writer = ChapterWriter::new(root, cfg, ch);
                writer.walk();
                blocks.extend(writer.finish());
                blocks.push(Block::Para(page_break()));
            }
        }
    }

    let mut docx = Docx::new()
        .page_size(PAGE_W, PAGE_H)
        .page_margin(
            PageMargin::new()
                .top(MARGIN_TB)
                .bottom(MARGIN_TB)
                .left(MARGIN_LR)
                .right(MARGIN_LR),
        )
        .default_size(22)
        .default_fonts(
            RunFonts::new()
                .ascii(cfg.latin_font.as_str())
                .east_asia(cfg.cjk_font.as_str()),
        )
        .add_style(
            Style::new("Heading1", StyleType::Paragraph)
                .name("Heading 1")
                .size(40)
                .bold()
                .color("222222"),
        )
        .add_style(
            Style::new("Heading2", StyleType::Paragraph)
                .name("Heading 2")
                .size(30)
                .bold()
                .color("222222"),
        )
        .add_style(
            Style::new("Heading3", StyleType::Paragraph)
                .name("Heading 3")
                .size(26)
                .bold()
                .color("222222"),
        )
        .add_abstract_numbering(AbstractNumbering::new(BULLET_NUMBERING).add_level(Level::new(
            0,
            Start::new(1),
            NumberFormat::new("bullet"),
            LevelText::new("•"),
            LevelJc::new("left"),
        )))
        .add_numbering(Numbering::new(BULLET_NUMBERING, BULLET_NUMBERING))
        .add_abstract_numbering(AbstractNumbering::new(DECIMAL_NUMBERING).add_level(Level::new(
            0,
            Start::new(1),
            NumberFormat::new("decimal"),
            LevelText::new("%1."),
            LevelJc::new("left"),
        )))
        .add_numbering(Numbering::new(DECIMAL_NUMBERING, DECIMAL_NUMBERING));

    for block in blocks {
        docx = match block {
            Block::Para(p) => docx.add_paragraph(p),
            Block::Tbl(t) => docx.add_table(t),
        };
    }

    let parent = output.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let file = fs::File::create(output)
        .with_context(|| format!("无法创建输出文件 {}", output.display()))?;
    docx.build()
        .pack(file)
        .with_context(|| format!("写入 DOCX 失败 {}", output.display()))?;

    info!("生成 DOCX: {}", output.display());
    Ok(())
}

fn base_run(cfg: &Config, text: &str) -> Run {
    Run::new().add_text(text).fonts(
        RunFonts::new()
            .ascii(cfg.latin_font.as_str())
            .east_asia(cfg.cjk_font.as_str()),
    )
}

fn code_run(cfg: &Config, text: &str) -> Run {
    Run::new().add_text(text).fonts(
        RunFonts::new()
            .ascii(cfg.code_font.as_str())
            .east_asia(cfg.cjk_font.as_str()),
    )
}

fn body_paragraph() -> Paragraph {
    Paragraph::new().line_spacing(LineSpacing::new().line(432).after(120))
}

fn page_break() -> Paragraph {
    Paragraph::new().add_run(Run::new().add_break(BreakType::Page))
}

/// 居中大字的独立页面（封面、部分标题、子分类标题、问题页）。
fn add_centered_page(
    blocks: &mut Vec<Block>,
    cfg: &Config,
    text: &str,
    size: usize,
    color: &str,
    italic: bool,
) {
    for _ in 0..12 {
        blocks.push(Block::Para(Paragraph::new()));
    }
    let mut run = base_run(cfg, text).size(size).color(color);
    run = if italic { run.italic() } else { run.bold() };
    blocks.push(Block::Para(
        Paragraph::new().align(AlignmentType::Center).add_run(run),
    ));
    blocks.push(Block::Para(page_break()));
}

fn add_cover_page(blocks: &mut Vec<Block>, cfg: &Config, title: &str) {
    add_centered_page(blocks, cfg, title, 64, "222222", false);
}

/// 目录页：部分 / 子分类 / 章节 / h2 子标题逐行缩进排版。
fn add_toc_page(blocks: &mut Vec<Block>, cfg: &Config, pages: &[BookPage]) {
    blocks.push(Block::Para(
        Paragraph::new()
            .style("Heading1")
            .align(AlignmentType::Center)
            .add_run(base_run(cfg, "目录").size(40).bold().color("222222")),
    ));

    for page in pages {
        match page {
            BookPage::Part { label, .. } => {
                blocks.push(Block::Para(
                    Paragraph::new()
                        .line_spacing(LineSpacing::new().before(240).after(40))
                        .add_run(base_run(cfg, label).size(24).bold().color("222222")),
                ));
            }
            BookPage::Section { label, .. } => {
                blocks.push(Block::Para(
                    Paragraph::new()
                        .indent(Some(567), None, None, None)
                        .line_spacing(LineSpacing::new().before(120).after(40))
                        .add_run(base_run(cfg, label).size(21).bold().color("555555")),
                ));
            }
            BookPage::Question { .. } => {}
            BookPage::Chapter(ch) => {
                blocks.push(Block::Para(
                    Paragraph::new()
                        .indent(Some(1134), None, None, None)
                        .line_spacing(LineSpacing::new().before(20).after(20))
                        .add_run(base_run(cfg, &ch.meta.display_title()).size(21).color("444444")),
                ));
                if ch.meta.number.is_some() {
                    for (i, heading) in ch.h2_headings.iter().enumerate() {
                        let sub = h2_display_title(ch.meta.number, i + 1, heading);
                        blocks.push(Block::Para(
                            Paragraph::new()
                                .indent(Some(1701), None, None, None)
                                .add_run(base_run(cfg, &sub).size(19).color("666666")),
                        ));
                    }
                }
            }
        }
    }

    blocks.push(Block::Para(page_break()));
}

#[derive(Clone, Copy)]
enum ListKind {
    Bullet,
    Ordered,
}

/// 单章正文的事件流写入器。
struct ChapterWriter<'a> {
    root: &'a Path,
    cfg: &'a Config,
    page: &'a ChapterPage,
    blocks: Vec<Block>,
    paragraph: Option<Paragraph>,
    bold: usize,
    italic: usize,
    strike: usize,
    quote_depth: usize,
    list_stack: Vec<ListKind>,
    in_code_block: bool,
    in_image: bool,
    heading: Option<HeadingLevel>,
    // 表格装配
    table_rows: Vec<TableRow>,
    row_cells: Vec<TableCell>,
    cell_paragraphs: Vec<Paragraph>,
    in_table: bool,
    in_table_header: bool,
}

impl<'a> ChapterWriter<'a> {
    fn new(root: &'a Path, cfg: &'a Config, page: &'a ChapterPage) -> Self {
        Self {
            root,
            cfg,
            page,
            blocks: Vec::new(),
            paragraph: None,
            bold: 0,
            italic: 0,
            strike: 0,
            quote_depth: 0,
            list_stack: Vec::new(),
            in_code_block: false,
            in_image: false,
            heading: None,
            table_rows: Vec::new(),
            row_cells: Vec::new(),
            cell_paragraphs: Vec::new(),
            in_table: false,
            in_table_header: false,
        }
    }

    fn walk(&mut self) {
        let events: Vec<Event> =
            crate::exporter::html_render::markdown_events(&self.page.body_markdown).collect();
        for event in events {
            self.handle(event);
        }
        self.finish_paragraph();
    }

    fn finish(mut self) -> Vec<Block> {
        self.finish_paragraph();
        self.blocks
    }

    fn finish_paragraph(&mut self) {
        if let Some(p) = self.paragraph.take() {
            if self.in_table {
                self.cell_paragraphs.push(p);
            } else {
                self.blocks.push(Block::Para(p));
            }
        }
    }

    fn ensure_paragraph(&mut self) -> Paragraph {
        self.paragraph.take().unwrap_or_else(body_paragraph)
    }

    fn push_run(&mut self, run: Run) {
        let p = self.ensure_paragraph();
        self.paragraph = Some(p.add_run(run));
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Start(tag) => self.start_tag(tag),
            Event::End(tag) => self.end_tag(tag),
            Event::Text(text) => self.text(&text),
            Event::Code(text) => {
                let run = code_run(self.cfg, &text).size(19).color("555555");
                self.push_run(run);
            }
            Event::SoftBreak => self.text(" "),
            Event::HardBreak => {
                let p = self.ensure_paragraph();
                self.paragraph = Some(p.add_run(Run::new().add_break(BreakType::TextWrapping)));
            }
            Event::Rule => {
                self.finish_paragraph();
                self.blocks.push(Block::Para(
                    Paragraph::new()
                        .align(AlignmentType::Center)
                        .add_run(base_run(self.cfg, "* * *").size(22).color("999999")),
                ));
            }
            // 原始 HTML、脚注、任务列表标记在书稿中不出现，忽略
            _ => {}
        }
    }

    fn start_tag(&mut self, tag: Tag) {
        match tag {
            Tag::Heading { level, .. } => {
                self.finish_paragraph();
                self.heading = Some(level);
                let style = match level {
                    HeadingLevel::H1 => "Heading1",
                    HeadingLevel::H2 => "Heading2",
                    _ => "Heading3",
                };
                self.paragraph = Some(Paragraph::new().style(style));
            }
            Tag::Paragraph => {
                self.finish_paragraph();
                let mut p = body_paragraph();
                if self.quote_depth > 0 {
                    p = p.indent(Some(850), None, None, None);
                }
                self.paragraph = Some(p);
            }
            Tag::BlockQuote(_) => {
                self.quote_depth += 1;
            }
            Tag::List(start) => {
                self.finish_paragraph();
                self.list_stack.push(match start {
                    Some(_) => ListKind::Ordered,
                    None => ListKind::Bullet,
                });
            }
            Tag::Item => {
                self.finish_paragraph();
                let depth = self.list_stack.len().saturating_sub(1);
                let numbering = match self.list_stack.last() {
                    Some(ListKind::Ordered) => DECIMAL_NUMBERING,
                    _ => BULLET_NUMBERING,
                };
                let mut p = Paragraph::new()
                    .numbering(NumberingId::new(numbering), IndentLevel::new(0));
                if depth > 0 {
                    p = p.indent(Some(720 * depth as i32), None, None, None);
                }
                self.paragraph = Some(p);
            }
            Tag::CodeBlock(_) => {
                self.finish_paragraph();
                self.in_code_block = true;
            }
            Tag::Emphasis => self.italic += 1,
            Tag::Strong => self.bold += 1,
            Tag::Strikethrough => self.strike += 1,
            Tag::Link { .. } => {}
            Tag::Image { dest_url, .. } => {
                self.in_image = true;
                self.add_image(&dest_url);
            }
            Tag::Table(_) => {
                self.finish_paragraph();
                self.in_table = true;
                self.table_rows.clear();
            }
            Tag::TableHead => {
                self.in_table_header = true;
                self.row_cells.clear();
            }
            Tag::TableRow => {
                self.row_cells.clear();
            }
            Tag::TableCell => {
                self.cell_paragraphs.clear();
                self.paragraph = Some(Paragraph::new());
            }
            _ => {}
        }
    }

    fn end_tag(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Heading(_) => {
                self.finish_paragraph();
                self.heading = None;
            }
            TagEnd::Paragraph => self.finish_paragraph(),
            TagEnd::BlockQuote(_) => {
                self.quote_depth = self.quote_depth.saturating_sub(1);
            }
            TagEnd::List(_) => {
                self.list_stack.pop();
            }
            TagEnd::Item => self.finish_paragraph(),
            TagEnd::CodeBlock => {
                self.finish_paragraph();
                self.in_code_block = false;
            }
            TagEnd::Emphasis => self.italic = self.italic.saturating_sub(1),
            TagEnd::Strong => self.bold = self.bold.saturating_sub(1),
            TagEnd::Strikethrough => self.strike = self.strike.saturating_sub(1),
            TagEnd::Image => self.in_image = false,
            TagEnd::TableCell => {
                self.finish_paragraph();
                let mut cell = TableCell::new();
                let paragraphs = std::mem::take(&mut self.cell_paragraphs);
                if paragraphs.is_empty() {
                    cell = cell.add_paragraph(Paragraph::new());
                } else {
                    for p in paragraphs {
                        cell = cell.add_paragraph(p);
                    }
                }
                self.row_cells.push(cell);
            }
            TagEnd::TableHead | TagEnd::TableRow => {
                let cells = std::mem::take(&mut self.row_cells);
                if !cells.is_empty() {
                    self.table_rows.push(TableRow::new(cells));
                }
                self.in_table_header = false;
            }
            TagEnd::Table => {
                self.in_table = false;
                let rows = std::mem::take(&mut self.table_rows);
                if !rows.is_empty() {
                    self.blocks.push(Block::Tbl(Table::new(rows)));
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if self.in_image {
            // 图片 alt 文本不进正文
            return;
        }

        if self.in_code_block {
            for line in text.lines() {
                let p = Paragraph::new()
                    .indent(Some(567), None, None, None)
                    .line_spacing(LineSpacing::new().before(40).after(40))
                    .add_run(code_run(self.cfg, line).size(18).color("333333"));
                self.blocks.push(Block::Para(p));
            }
            return;
        }

        let mut run = base_run(self.cfg, text);
        if self.heading.is_none() {
            run = run.size(22);
        }
        if self.bold > 0 || (self.in_table_header && self.in_table) {
            run = run.bold();
        }
        if self.italic > 0 || self.quote_depth > 0 {
            run = run.italic();
        }
        if self.strike > 0 {
            run = run.strike();
        }
        if self.quote_depth > 0 {
            run = run.color("666666");
        }
        self.push_run(run);
    }

    /// 插图：统一转 JPEG 后按配置宽度居中插入；失败时退化为文字占位。
    fn add_image(&mut self, src: &str) {
        if src.starts_with("http://") || src.starts_with("https://") {
            return;
        }
        self.finish_paragraph();

        let resolved = resolve_image_path(self.root, &self.page.meta.file, src);
        let prepared = resolved
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("文件不存在"))
            .and_then(|path| prepare_image(path, self.cfg.jpeg_quality));

        match prepared {
            Ok(img) => {
                let width_emu = (self.cfg.docx_image_width_cm * EMU_PER_CM) as u32;
                let height_emu =
                    (width_emu as f64 * img.height_px as f64 / img.width_px.max(1) as f64) as u32;
                let pic = Pic::new(&img.jpeg).size(width_emu, height_emu);
                self.blocks.push(Block::Para(
                    Paragraph::new()
                        .align(AlignmentType::Center)
                        .add_run(Run::new().add_image(pic)),
                ));
            }
            Err(err) => {
                let name = Path::new(src)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(src);
                warn!("图片插入失败 {}: {}", src, err);
                self.blocks.push(Block::Para(
                    Paragraph::new()
                        .align(AlignmentType::Center)
                        .add_run(base_run(self.cfg, &format!("[图片: {}]", name))),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_system::context::Config;
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
            "问题？\n\n---\n# 第一章\n\n> 引言\n\n## 第一节\n\n**加粗**与*斜体*。\n\n- 甲\n- 乙\n\n| a | b |\n|---|---|\n| 1 | 2 |\n\n![图](img/missing.png)\n",
        )
        .unwrap();
        let cfg = Config::default();
        let outline = Outline::load(dir, &cfg).unwrap();
        (cfg, outline)
    }

    fn document_xml(path: &Path) -> String {
        let file = fs::File::open(path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let mut xml = String::new();
        archive
            .by_name("word/document.xml")
            .unwrap()
            .read_to_string(&mut xml)
            .unwrap();
        xml
    }

    #[test]
    fn whole_book_docx_contains_cover_toc_and_content() {
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
        let out = dir.path().join("output/样书.docx");
        export(dir.path(), &cfg, &outline.title, &pages, &out, false).unwrap();

        let xml = document_xml(&out);
        assert!(xml.contains("样书"));
        assert!(xml.contains("目录"));
        assert!(xml.contains("1. 第一章"));
        assert!(xml.contains("1.1 第一节"));
        assert!(xml.contains("问题？"));
        // 引用块经由 blockquote 开始/结束事件渲染
        assert!(xml.contains("引言"));
        // 缺失图片退化为占位文本
        assert!(xml.contains("[图片: missing.png]"));
    }

    #[test]
    fn single_chapter_docx_has_no_cover() {
        let dir = tempfile::tempdir().unwrap();
        let (cfg, outline) = sample_book(dir.path());
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
        let out = dir.path().join("output/01.docx");
        export(dir.path(), &cfg, &outline.title, &pages, &out, true).unwrap();

        let xml = document_xml(&out);
        assert!(!xml.contains("目录"));
        assert!(xml.contains("1. 第一章"));
    }

    #[test]
    fn table_cell_keeps_every_paragraph() {
        let dir = tempfile::tempdir().unwrap();
        let (cfg, outline) = sample_book(dir.path());
        let page = ChapterPage {
            meta: outline.chapters[0].clone(),
            body_markdown: String::new(),
            h2_headings: Vec::new(),
        };
        let mut writer = ChapterWriter::new(dir.path(), &cfg, &page);

        writer.handle(Event::Start(Tag::Table(vec![])));
        writer.handle(Event::Start(Tag::TableRow));
        writer.handle(Event::Start(Tag::TableCell));
        writer.handle(Event::Start(Tag::Paragraph));
        writer.handle(Event::Text("第一段".into()));
        writer.handle(Event::End(TagEnd::Paragraph));
        writer.handle(Event::Start(Tag::Paragraph));
        writer.handle(Event::Text("第二段".into()));
        writer.handle(Event::End(TagEnd::Paragraph));
        // 两个段落都留在单元格里
        assert_eq!(writer.cell_paragraphs.len(), 2);

        writer.handle(Event::End(TagEnd::TableCell));
        assert_eq!(writer.row_cells.len(), 1);
        assert!(writer.cell_paragraphs.is_empty());

        writer.handle(Event::End(TagEnd::TableRow));
        writer.handle(Event::End(TagEnd::Table));
        assert!(matches!(writer.finish().last(), Some(Block::Tbl(_))));
    }

    #[test]
    fn table_rows_become_docx_table() {
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
        let out = dir.path().join("t.docx");
        export(dir.path(), &cfg, &outline.title, &pages, &out, true).unwrap();
        let xml = document_xml(&out);
        assert!(xml.contains("<w:tbl>"));
    }
}
