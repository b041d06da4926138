//! 目录（index.md）解析：部分 / 子分类 / 章节链接 → 章节列表。
//!
//! 目录文件的大纲语法：
//! - `- 第N部分：XXX`、`- 前言：…`、`- 后记：…` 开启一个部分；
//!   行内自带 `[标题](路径)` 链接的（前言、后记）同时是一条不编号的章节；
//! - 缩进的 `- 文本`（无链接）开启当前部分下的子分类；
//! - 含 `[标题](路径)` 的行是一条章节。

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::base_system::context::Config;

#[derive(Debug, Error)]
pub enum OutlineError {
    #[error("目录文件不存在: {0}")]
    MissingIndex(PathBuf),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn re_title() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?m)^#\s+(.+)").unwrap())
}

fn re_part() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"^-\s+(第.+部分：.+|前言：|后记：|第.+部分：)").unwrap())
}

fn re_link() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"\[(.+?)\]\((.+?)\)").unwrap())
}

fn re_section() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"^\s*-\s+(.+?)$").unwrap())
}

fn re_numbered_part() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"^第.+部分").unwrap())
}

/// 目录中的一条章节。
#[derive(Debug, Clone)]
pub struct Chapter {
    pub part: Option<String>,
    pub section: Option<String>,
    pub title: String,
    /// 相对书稿根目录的文件路径。
    pub file: String,
    /// 该条目本身就是部分标题行（前言、后记这类自带链接的行）。
    pub is_part_header: bool,
    /// 顺序章节编号；前言、后记、致谢等不编号。
    pub number: Option<u32>,
}

impl Chapter {
    pub fn basename(&self) -> &str {
        Path::new(&self.file)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.file)
    }

    /// 章节标识（文件名去扩展名），用于页面文件名与锚点。
    pub fn id(&self) -> String {
        Path::new(&self.file)
            .file_stem()
            .and_then(|n| n.to_str())
            .unwrap_or("chapter")
            .to_string()
    }

    /// 展示标题：编号章节为 `N. 标题`。
    pub fn display_title(&self) -> String {
        match self.number {
            Some(n) => format!("{}. {}", n, self.title),
            None => self.title.clone(),
        }
    }
}

/// 一次运行内重建、用后即弃的书稿结构。
#[derive(Debug, Clone)]
pub struct Outline {
    pub title: String,
    pub chapters: Vec<Chapter>,
}

impl Outline {
    /// 读取并解析 `root/index_file`，随后分配章节编号。
    pub fn load(root: &Path, cfg: &Config) -> Result<Self, OutlineError> {
        let index_path = root.join(&cfg.index_file);
        if !index_path.exists() {
            return Err(OutlineError::MissingIndex(index_path));
        }
        let content = fs::read_to_string(&index_path).map_err(|source| OutlineError::Io {
            path: index_path,
            source,
        })?;
        let mut outline = Self::parse(&content, cfg);
        outline.assign_numbers(cfg);
        Ok(outline)
    }

    pub fn parse(content: &str, cfg: &Config) -> Self {
        let title = re_title()
            .captures(content)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_else(|| cfg.default_title.clone());

        let mut chapters = Vec::new();
        let mut current_part: Option<String> = None;
        let mut current_section: Option<String> = None;

        for line in content.lines() {
            let line = line.trim_end();

            if let Some(cap) = re_part().captures(line) {
                let part_text = cap[1]
                    .trim_end_matches('：')
                    .trim_end_matches(':')
                    .to_string();
                current_part = Some(part_text);
                current_section = None;
                if let Some(link) = re_link().captures(line) {
                    chapters.push(Chapter {
                        part: current_part.clone(),
                        section: None,
                        title: link[1].to_string(),
                        file: link[2].to_string(),
                        is_part_header: true,
                        number: None,
                    });
                }
                continue;
            }

            if !line.contains('[')
                && let Some(cap) = re_section().captures(line)
            {
                current_section = Some(cap[1].trim().to_string());
                continue;
            }

            if let Some(link) = re_link().captures(line) {
                chapters.push(Chapter {
                    part: current_part.clone(),
                    section: current_section.clone(),
                    title: link[1].to_string(),
                    file: link[2].to_string(),
                    is_part_header: false,
                    number: None,
                });
            }
        }

        Self { title, chapters }
    }

    /// 为常规章节分配顺序编号：仅限位于 `第N部分` 之下、
    /// 非部分标题行、且文件名不在免编号名单中的章节。
    pub fn assign_numbers(&mut self, cfg: &Config) {
        let mut num = 0u32;
        for ch in &mut self.chapters {
            let unnumbered = cfg.is_unnumbered(ch.basename()) || ch.is_part_header;
            let in_numbered_part = ch
                .part
                .as_deref()
                .is_some_and(|p| re_numbered_part().is_match(p));
            ch.number = if !unnumbered && in_numbered_part {
                num += 1;
                Some(num)
            } else {
                None
            };
        }
    }

    /// 取出指定编号的章节（`--chapter` 单章导出）。
    pub fn select_chapter(&self, number: u32) -> Option<&Chapter> {
        self.chapters.iter().find(|ch| ch.number == Some(number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# 夹缝生长

- 前言：[重启](book/restart.md)
- 第一部分：做产品
  - 产品认知
    - [第一章](book/ch01.md)
    - [第二章](book/ch02.md)
  - 产品方法
    - [第三章](book/ch03.md)
- 第二部分：做增长
  - [第四章](book/ch04.md)
- 后记：[裂缝](book/crack.md)
  - [致谢](book/acknowledgments.md)
";

    fn parsed() -> Outline {
        let cfg = Config::default();
        let mut o = Outline::parse(SAMPLE, &cfg);
        o.assign_numbers(&cfg);
        o
    }

    #[test]
    fn extracts_book_title() {
        assert_eq!(parsed().title, "夹缝生长");
    }

    #[test]
    fn falls_back_to_default_title() {
        let cfg = Config::default();
        let o = Outline::parse("- [x](y.md)\n", &cfg);
        assert_eq!(o.title, cfg.default_title);
    }

    #[test]
    fn parses_parts_sections_and_links() {
        let o = parsed();
        assert_eq!(o.chapters.len(), 7);

        let preface = &o.chapters[0];
        assert!(preface.is_part_header);
        assert_eq!(preface.part.as_deref(), Some("前言"));
        assert_eq!(preface.title, "重启");
        assert_eq!(preface.file, "book/restart.md");

        let ch1 = &o.chapters[1];
        assert_eq!(ch1.part.as_deref(), Some("第一部分：做产品"));
        assert_eq!(ch1.section.as_deref(), Some("产品认知"));

        let ch3 = &o.chapters[3];
        assert_eq!(ch3.section.as_deref(), Some("产品方法"));

        // 新部分重置子分类
        let ch4 = &o.chapters[4];
        assert_eq!(ch4.part.as_deref(), Some("第二部分：做增长"));
        assert_eq!(ch4.section, None);
    }

    #[test]
    fn numbers_only_regular_chapters_in_numbered_parts() {
        let o = parsed();
        let numbers: Vec<Option<u32>> = o.chapters.iter().map(|c| c.number).collect();
        assert_eq!(
            numbers,
            vec![
                None,
                Some(1),
                Some(2),
                Some(3),
                Some(4),
                None,
                None // acknowledgments.md 在免编号名单中
            ]
        );
    }

    #[test]
    fn part_line_with_bare_colon_opens_a_part() {
        let cfg = Config::default();
        let mut o = Outline::parse("# 书\n\n- 第三部分：\n  - [第五章](book/ch05.md)\n", &cfg);
        o.assign_numbers(&cfg);
        assert_eq!(o.chapters.len(), 1);
        assert_eq!(o.chapters[0].part.as_deref(), Some("第三部分"));
        assert_eq!(o.chapters[0].number, Some(1));
    }

    #[test]
    fn display_title_includes_number() {
        let o = parsed();
        assert_eq!(o.chapters[1].display_title(), "1. 第一章");
        assert_eq!(o.chapters[0].display_title(), "重启");
    }

    #[test]
    fn select_chapter_by_number() {
        let o = parsed();
        assert_eq!(o.select_chapter(2).unwrap().title, "第二章");
        assert!(o.select_chapter(99).is_none());
    }

    #[test]
    fn chapter_id_is_file_stem() {
        let o = parsed();
        assert_eq!(o.chapters[1].id(), "ch01");
    }
}
