//! 章节正文操作：读取、引导问题提取、标题编号、h2 提取。

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

fn re_question() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?s)^(.+?)\n\n---\n").unwrap())
}

fn re_h2() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"^## (.+)").unwrap())
}

/// 读取章节 markdown。文件不存在时告警并返回 None（跳过该章继续）。
pub fn read_chapter(root: &Path, file: &str) -> Option<String> {
    let full_path = root.join(file);
    if !full_path.exists() {
        warn!("文件不存在，跳过 {}", file);
        return None;
    }
    match fs::read_to_string(&full_path) {
        Ok(content) => Some(content),
        Err(err) => {
            warn!("读取失败，跳过 {}: {}", file, err);
            None
        }
    }
}

/// 提取章首引导问题。
///
/// 常规章节格式为：
/// ```text
/// 问题文本
///
/// ---
/// # 标题
/// ```
///
/// 返回 `(question, body)`；无问题时返回 `(None, 原文)`。
pub fn extract_question<'a>(content: &'a str, skip: bool) -> (Option<String>, &'a str) {
    if skip {
        return (None, content);
    }
    if let Some(m) = re_question().captures(content) {
        let question = m[1].trim().to_string();
        let body = &content[m.get(0).unwrap().end()..];
        return (Some(question), body);
    }
    (None, content)
}

/// 为 h1/h2（可选 h3）标题添加章节编号。
///
/// `# T` → `# N. T`，`## T` → `## N.M T`；PDF 导出额外编号
/// `### T` → `### N.M.K T`，DOCX/EPUB 只到 h2。
pub fn number_headings(content: &str, number: Option<u32>, include_h3: bool) -> String {
    let Some(num) = number else {
        return content.to_string();
    };

    let mut h2_counter = 0u32;
    let mut h3_counter = 0u32;
    let mut result = Vec::new();
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("# ") {
            result.push(format!("# {}. {}", num, rest));
        } else if let Some(rest) = line.strip_prefix("## ") {
            h2_counter += 1;
            h3_counter = 0;
            result.push(format!("## {}.{} {}", num, h2_counter, rest));
        } else if include_h3
            && let Some(rest) = line.strip_prefix("### ")
        {
            h3_counter += 1;
            result.push(format!("### {}.{}.{} {}", num, h2_counter, h3_counter, rest));
        } else {
            result.push(line.to_string());
        }
    }
    result.join("\n")
}

/// 提取全部 h2 标题（原始文本，未编号），用于目录子条目。
pub fn extract_h2_headings(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| re_h2().captures(line))
        .map(|cap| cap[1].trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const WITH_QUESTION: &str = "你最近一次重启是什么时候？\n\n---\n# 重启\n\n正文。\n";

    #[test]
    fn splits_question_from_body() {
        let (q, body) = extract_question(WITH_QUESTION, false);
        assert_eq!(q.as_deref(), Some("你最近一次重启是什么时候？"));
        assert!(body.starts_with("# 重启"));
    }

    #[test]
    fn skip_list_suppresses_question() {
        let (q, body) = extract_question(WITH_QUESTION, true);
        assert_eq!(q, None);
        assert_eq!(body, WITH_QUESTION);
    }

    #[test]
    fn no_question_when_no_rule() {
        let content = "# 直接开始\n\n正文。\n";
        let (q, body) = extract_question(content, false);
        assert_eq!(q, None);
        assert_eq!(body, content);
    }

    #[test]
    fn numbers_h1_and_h2() {
        let src = "# 标题\n\n## 一\n\n## 二\n\n### 深层\n";
        let out = number_headings(src, Some(3), false);
        assert!(out.contains("# 3. 标题"));
        assert!(out.contains("## 3.1 一"));
        assert!(out.contains("## 3.2 二"));
        // 不含 h3 编号
        assert!(out.contains("### 深层"));
    }

    #[test]
    fn numbers_h3_when_requested() {
        let src = "# 标题\n\n## 一\n\n### 甲\n\n### 乙\n\n## 二\n\n### 丙\n";
        let out = number_headings(src, Some(2), true);
        assert!(out.contains("### 2.1.1 甲"));
        assert!(out.contains("### 2.1.2 乙"));
        // h3 计数随 h2 重置
        assert!(out.contains("### 2.2.1 丙"));
    }

    #[test]
    fn unnumbered_chapter_is_untouched() {
        let src = "# 前言\n\n## 小节\n";
        assert_eq!(number_headings(src, None, true), src);
    }

    #[test]
    fn collects_h2_headings_in_order() {
        let src = "# 标题\n\n## 第一节 \n\n正文 ## 不算\n\n## 第二节\n";
        assert_eq!(extract_h2_headings(src), vec!["第一节", "第二节"]);
    }
}
