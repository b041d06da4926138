//! 书稿结构模型：目录解析与章节正文处理。

pub mod chapter;
pub mod outline;
