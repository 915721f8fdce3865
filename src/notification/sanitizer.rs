//! 文本净化模块 - 生成符合 MarkdownV2 规则的消息正文
//!
//! Telegram 的 MarkdownV2 方言要求转义所有保留字符，否则整条消息
//! 会被 API 以 400 拒绝。正文先截断再转义：转义只会让文本变长，
//! 上限约束的是原始文本而非转义后的长度。

/// 正文截断上限（原始字符数，转义前）
pub const MAX_BODY_CHARS: usize = 3000;

/// 转义 MarkdownV2 的全部保留字符
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '=' | '|'
                | '{' | '}' | '.' | '!'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// 代码块内只需转义反引号和反斜杠
pub fn escape_markdown_code(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '`' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// 组装最终消息：加粗的来源名、空行、代码块包裹的正文
pub fn format_message(source: &str, text: &str) -> String {
    let body: String = if text.chars().count() <= MAX_BODY_CHARS {
        text.to_string()
    } else {
        text.chars().take(MAX_BODY_CHARS).collect()
    };
    format!(
        "*{}*\n\n```\n{}```",
        escape_markdown(source),
        escape_markdown_code(&body)
    )
}
