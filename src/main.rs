//! Markdown Book Exporter（Markdown 书稿导出器）。
//!
//! 把按 `index.md` 目录组织的 Markdown 书稿导出为 DOCX / EPUB / PDF 三种格式。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志等基础设施
//! - `book_model`：目录解析、章节读取、问题块与标题编号
//! - `exporter`：页面流装配与三种格式的导出器

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::info;

mod base_system;
mod book_model;
mod exporter;

use base_system::config::load_or_create;
use base_system::context::Config;
use base_system::logging::{LogOptions, LogSystem};
use book_model::outline::{Chapter, Outline};
use exporter::{AssembleOptions, assemble_pages, resolve_output_path};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "book-exporter", version = VERSION)]
#[command(about = "Markdown 书稿导出器（DOCX/EPUB/PDF）")]
struct Cli {
    /// 书稿根目录（包含 index.md）
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// 配置文件路径（默认 <root>/config.yml，不存在时生成）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// 导出 DOCX
    Docx {
        /// 输出路径（默认 <root>/output/<书名>.docx）
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 只导出指定编号的章节
        #[arg(long)]
        chapter: Option<u32>,
    },
    /// 导出 EPUB
    Epub {
        /// 输出路径（默认 <root>/output/<书名>.epub）
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 只导出指定编号的章节
        #[arg(long)]
        chapter: Option<u32>,
    },
    /// 导出 PDF（依赖外部渲染引擎，默认 weasyprint）
    Pdf {
        /// 输出路径（默认 <root>/output/<书名>.pdf）
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 只导出指定编号的章节
        #[arg(long)]
        chapter: Option<u32>,

        /// 同时保留中间 HTML 文件
        #[arg(long, default_value_t = false)]
        html: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _log = LogSystem::init(
        LogOptions {
            debug: cli.debug,
            use_color: true,
            archive_on_exit: true,
        },
        &cli.root,
    )?;

    let cfg = load_or_create::<Config>(cli.config.as_deref(), &cli.root)
        .map_err(|e| anyhow!(e.to_string()))?;

    info!("解析目录结构...");
    let outline = Outline::load(&cli.root, &cfg)?;
    info!("书名: {}", outline.title);
    info!("章节数: {}", outline.chapters.len());

    let output = match cli.command {
        Commands::Docx { output, chapter } => {
            let (pages, selected, single) = prepare(&cli.root, &cfg, &outline, chapter, false)?;
            let out = resolve_output_path(&cli.root, &cfg, &outline.title, selected.as_ref(), output, "docx");
            exporter::docx::export(&cli.root, &cfg, &outline.title, &pages, &out, single)?;
            out
        }
        Commands::Epub { output, chapter } => {
            let (pages, selected, _single) = prepare(&cli.root, &cfg, &outline, chapter, false)?;
            let out = resolve_output_path(&cli.root, &cfg, &outline.title, selected.as_ref(), output, "epub");
            exporter::epub::export(&cli.root, &cfg, &outline.title, &pages, &out)?;
            out
        }
        Commands::Pdf {
            output,
            chapter,
            html,
        } => {
            let (pages, selected, single) = prepare(&cli.root, &cfg, &outline, chapter, true)?;
            let out = resolve_output_path(&cli.root, &cfg, &outline.title, selected.as_ref(), output, "pdf");
            exporter::pdf::export(
                &cli.root,
                &cfg,
                &outline.title,
                &pages,
                &out,
                exporter::pdf::PdfOptions {
                    single_chapter: single,
                    keep_html: html,
                },
            )?;
            out
        }
    };

    info!("完成: {}", output.display());
    println!("{}", output.display());
    Ok(())
}

/// 按 `--chapter` 过滤并装配页面流。返回（页面流，选中的章节，是否单章导出）。
fn prepare(
    root: &Path,
    cfg: &Config,
    outline: &Outline,
    chapter: Option<u32>,
    number_h3: bool,
) -> Result<(Vec<exporter::BookPage>, Option<Chapter>, bool)> {
    match chapter {
        Some(num) => {
            let Some(selected) = outline.select_chapter(num) else {
                bail!("错误：找不到第 {} 章", num);
            };
            info!("导出章节: {}", selected.display_title());
            let pages = assemble_pages(
                root,
                cfg,
                std::slice::from_ref(selected),
                AssembleOptions {
                    single_chapter: true,
                    number_h3,
                },
            );
            Ok((pages, Some(selected.clone()), true))
        }
        None => {
            let pages = assemble_pages(
                root,
                cfg,
                &outline.chapters,
                AssembleOptions {
                    single_chapter: false,
                    number_h3,
                },
            );
            Ok((pages, None, false))
        }
    }
}
