//! 导出配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息。

use serde::{Deserialize, Serialize};

use super::config::{ConfigSpec, FieldMeta};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 书稿结构
    #[serde(default = "default_index_file")]
    pub index_file: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_title")]
    pub default_title: String,
    #[serde(default = "default_string")]
    pub author: String,
    #[serde(default = "default_language")]
    pub language: String,

    // 章节处理
    #[serde(default = "default_skip_question_files")]
    pub skip_question_files: Vec<String>,
    #[serde(default = "default_unnumbered_files")]
    pub unnumbered_files: Vec<String>,

    // 字体配置（DOCX / PDF）
    #[serde(default = "default_cjk_font")]
    pub cjk_font: String,
    #[serde(default = "default_latin_font")]
    pub latin_font: String,
    #[serde(default = "default_code_font")]
    pub code_font: String,

    // 图片配置
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_docx_image_width_cm")]
    pub docx_image_width_cm: f32,

    // PDF 渲染引擎
    #[serde(default = "default_pdf_engine")]
    pub pdf_engine: String,
    #[serde(default)]
    pub pdf_engine_args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_file: default_index_file(),
            output_dir: default_output_dir(),
            default_title: default_title(),
            author: default_string(),
            language: default_language(),
            skip_question_files: default_skip_question_files(),
            unnumbered_files: default_unnumbered_files(),
            cjk_font: default_cjk_font(),
            latin_font: default_latin_font(),
            code_font: default_code_font(),
            jpeg_quality: default_jpeg_quality(),
            docx_image_width_cm: default_docx_image_width_cm(),
            pdf_engine: default_pdf_engine(),
            pdf_engine_args: Vec::new(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 14] = [
            FieldMeta {
                name: "index_file",
                description: "目录文件名（相对书稿根目录）",
            },
            FieldMeta {
                name: "output_dir",
                description: "输出目录（相对书稿根目录）",
            },
            FieldMeta {
                name: "default_title",
                description: "目录文件没有一级标题时使用的书名",
            },
            FieldMeta {
                name: "author",
                description: "作者名，写入 DOCX/EPUB 元数据",
            },
            FieldMeta {
                name: "language",
                description: "文档语言（BCP 47，如 zh-CN）",
            },
            FieldMeta {
                name: "skip_question_files",
                description: "不提取引导问题的章节文件名列表",
            },
            FieldMeta {
                name: "unnumbered_files",
                description: "不参与章节编号的文件名列表（前言、后记、致谢等）",
            },
            FieldMeta {
                name: "cjk_font",
                description: "中文字体（DOCX 的 eastAsia 字体与 PDF 正文字体）",
            },
            FieldMeta {
                name: "latin_font",
                description: "西文字体",
            },
            FieldMeta {
                name: "code_font",
                description: "代码字体",
            },
            FieldMeta {
                name: "jpeg_quality",
                description: "DOCX 插图统一转 JPEG 时的质量（1-100）",
            },
            FieldMeta {
                name: "docx_image_width_cm",
                description: "DOCX 插图显示宽度（厘米）",
            },
            FieldMeta {
                name: "pdf_engine",
                description: "外部 HTML 转 PDF 引擎命令（如 weasyprint）",
            },
            FieldMeta {
                name: "pdf_engine_args",
                description: "传给 PDF 引擎的额外参数（在输入输出路径之前）",
            },
        ];
        &FIELDS
    }
}

impl Config {
    pub fn skips_question(&self, basename: &str) -> bool {
        self.skip_question_files.iter().any(|f| f == basename)
    }

    pub fn is_unnumbered(&self, basename: &str) -> bool {
        self.unnumbered_files.iter().any(|f| f == basename)
    }
}

/// 将标题清洗为跨平台安全的文件名。
pub fn safe_fs_name(name: &str, replacement: &str, max_len: usize) -> String {
    let mut cleaned: String = name
        .chars()
        .map(|ch| match ch {
            ':' => '：',
            '"' => '”',
            '<' => '《',
            '>' => '》',
            '/' | '\\' => '、',
            '|' => '｜',
            '?' => '？',
            '*' => '＊',
            c if (c as u32) < 32 => replacement.chars().next().unwrap_or('_'),
            _ => ch,
        })
        .collect();

    while cleaned.ends_with(' ') || cleaned.ends_with('.') {
        cleaned.pop();
    }
    if cleaned.is_empty() {
        cleaned.push_str("unnamed");
    }
    if cleaned.chars().count() > max_len {
        cleaned = cleaned.chars().take(max_len).collect();
    }
    cleaned
}

fn default_index_file() -> String {
    "index.md".to_string()
}

fn default_output_dir() -> String {
    "output".to_string()
}

fn default_title() -> String {
    "未命名书稿".to_string()
}

fn default_string() -> String {
    String::new()
}

fn default_language() -> String {
    "zh-CN".to_string()
}

fn default_skip_question_files() -> Vec<String> {
    ["restart.md", "crack.md", "flomo.md", "acknowledgments.md"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_unnumbered_files() -> Vec<String> {
    ["restart.md", "crack.md", "acknowledgments.md"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_cjk_font() -> String {
    "PingFang SC".to_string()
}

fn default_latin_font() -> String {
    "PingFang SC".to_string()
}

fn default_code_font() -> String {
    "Menlo".to_string()
}

fn default_jpeg_quality() -> u8 {
    90
}

fn default_docx_image_width_cm() -> f32 {
    12.0
}

fn default_pdf_engine() -> String {
    "weasyprint".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_fs_name_replaces_forbidden_chars() {
        assert_eq!(safe_fs_name("a/b:c?", "_", 120), "a、b：c？");
        assert_eq!(safe_fs_name("  .", "_", 120), "unnamed");
    }

    #[test]
    fn default_lists_match_book_conventions() {
        let cfg = Config::default();
        assert!(cfg.skips_question("flomo.md"));
        assert!(!cfg.skips_question("chapter01.md"));
        assert!(cfg.is_unnumbered("acknowledgments.md"));
        assert!(!cfg.is_unnumbered("flomo.md"));
    }
}
