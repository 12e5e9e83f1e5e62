//! Markdown grammars committed to the user's repository.

use chrono::{NaiveDate, NaiveDateTime};

use crate::model::{IssueIndexRow, IssueState, ValidationError};

// ---------------------------------------------------------------------------
// TODO lines
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoItem {
    pub msg_id: i64,
    pub chat_id: i64,
    pub text: String,
    pub date: NaiveDate,
    pub done: bool,
}

/// Format one TODO line in the current (preferred) grammar. Rejects content
/// with embedded line breaks.
pub fn format_todo_item(item: &TodoItem) -> Result<String, ValidationError> {
    if item.text.contains('\n') {
        return Err(ValidationError::TodoHasLineBreak);
    }
    let checkbox = if item.done { "x" } else { " " };
    Ok(format!(
        "- [{checkbox}] <!--[{}] [{}]--> {} ({})",
        item.msg_id,
        item.chat_id,
        item.text,
        item.date.format("%Y-%m-%d")
    ))
}

/// Parse a TODO line, accepting the current grammar and two legacy
/// grammars. Lines that don't match any grammar return `None` so callers
/// can skip them (forward compatibility for human edits, mirroring the
/// issue-index parser's tolerance).
pub fn parse_todo_line(line: &str) -> Option<TodoItem> {
    let rest = line.strip_prefix("- [")?;
    let mut chars = rest.chars();
    let marker = chars.next()?;
    if marker != 'x' && marker != ' ' {
        return None;
    }
    let done = marker == 'x';
    let rest = chars.as_str().strip_prefix("] ")?;

    if let Some(rest) = rest.strip_prefix("<!--[") {
        let (msg_id_str, rest) = rest.split_once("] [")?;
        let (chat_id_str, rest) = rest.split_once("]-->")?;
        let rest = rest.strip_prefix(' ')?;
        let (text, date) = split_text_and_date(rest)?;
        return Some(TodoItem {
            msg_id: msg_id_str.parse().ok()?,
            chat_id: chat_id_str.parse().ok()?,
            text,
            date,
            done,
        });
    }

    // Legacy grammars: "[<msgID>] [<chatID>] <text> (<date>)" or
    // "[<msgID>] <text> (<date>)" (chatID defaults to 0).
    let rest = rest.strip_prefix('[')?;
    let (msg_id_str, after_msg_id) = rest.split_once("] ")?;
    let msg_id: i64 = msg_id_str.parse().ok()?;

    if let Some(rest2) = after_msg_id.strip_prefix('[') {
        if let Some((chat_id_str, rest3)) = rest2.split_once("] ") {
            if let Ok(chat_id) = chat_id_str.parse::<i64>() {
                if let Some((text, date)) = split_text_and_date(rest3) {
                    return Some(TodoItem { msg_id, chat_id, text, date, done });
                }
            }
        }
    }

    let (text, date) = split_text_and_date(after_msg_id)?;
    Some(TodoItem { msg_id, chat_id: 0, text, date, done })
}

fn split_text_and_date(s: &str) -> Option<(String, NaiveDate)> {
    let open = s.rfind(" (")?;
    if !s.ends_with(')') {
        return None;
    }
    let text = &s[..open];
    let date_str = &s[open + 2..s.len() - 1];
    let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").ok()?;
    Some((text.to_string(), date))
}

// ---------------------------------------------------------------------------
// Note / message blocks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteBlock {
    pub msg_id: i64,
    pub chat_id: i64,
    pub timestamp: NaiveDateTime,
    pub title: String,
    pub tags: Vec<String>,
    pub body: String,
}

/// Format a note block for prepending to a non-TODO target file
///. Each body line is padded with
/// two trailing spaces (Markdown hard line break).
pub fn format_note_block(b: &NoteBlock) -> String {
    let mut out = format!(
        "<!--\n[{}] [{}] [{}]\n-->\n\n## {}\n",
        b.msg_id,
        b.chat_id,
        b.timestamp.format("%Y-%m-%d %H:%M"),
        b.title
    );
    if !b.tags.is_empty() {
        out.push('#');
        out.push_str(&b.tags.join(" #"));
        out.push('\n');
    }
    out.push('\n');
    for line in b.body.lines() {
        out.push_str(line);
        out.push_str("  \n");
    }
    out.push_str("\n---\n");
    out
}

/// Recover the `(msgID, chatID, timestamp)` triple from a formatted note
/// block.
pub fn parse_note_block_metadata(block: &str) -> Option<(i64, i64, NaiveDateTime)> {
    let inner = block.strip_prefix("<!--\n")?;
    let (meta_line, _) = inner.split_once("\n-->")?;
    let meta_line = meta_line.trim();
    let rest = meta_line.strip_prefix('[')?;
    let (msg_id_str, rest) = rest.split_once("] [")?;
    let (chat_id_str, rest) = rest.split_once("] [")?;
    let ts_str = rest.strip_suffix(']')?;
    Some((
        msg_id_str.parse().ok()?,
        chat_id_str.parse().ok()?,
        NaiveDateTime::parse_from_str(ts_str, "%Y-%m-%d %H:%M").ok()?,
    ))
}

// ---------------------------------------------------------------------------
// Issue index lines
// ---------------------------------------------------------------------------

/// Format one bullet for `issue.md` / `issue_archived.md`.
pub fn format_issue_index_line(row: &IssueIndexRow) -> String {
    format!(
        "- {} {}/{}#{} [{}]",
        row.state.emoji(),
        row.owner,
        row.repo,
        row.number,
        row.title
    )
}

/// Parse one bullet, ignoring lines that don't match the grammar.
pub fn parse_issue_index_line(line: &str) -> Option<IssueIndexRow> {
    let rest = line.strip_prefix("- ")?;
    let mut chars = rest.chars();
    let emoji = chars.next()?;
    let state = IssueState::from_emoji(emoji)?;
    let rest = chars.as_str().strip_prefix(' ')?;
    let (owner_repo_num, title_part) = rest.split_once(" [")?;
    let title = title_part.strip_suffix(']')?;
    let (owner_repo, num_str) = owner_repo_num.rsplit_once('#')?;
    let (owner, repo) = owner_repo.split_once('/')?;
    Some(IssueIndexRow {
        owner: owner.to_string(),
        repo: repo.to_string(),
        number: num_str.parse().ok()?,
        title: title.to_string(),
        state,
    })
}

/// Parse every matching bullet out of a whole file's contents, skipping
/// lines that don't match (human edits, headers, blank lines).
pub fn parse_issue_index(contents: &str) -> Vec<IssueIndexRow> {
    contents.lines().filter_map(parse_issue_index_line).collect()
}

// ---------------------------------------------------------------------------
// Photo inclusion
// ---------------------------------------------------------------------------

/// `![Photo](url)` on its own line; a non-empty caption appends a blank
/// line then the caption body.
pub fn format_photo_block(cdn_url: &str, caption: Option<&str>) -> String {
    match caption {
        Some(c) if !c.is_empty() => format!("![Photo]({cdn_url})\n\n{c}"),
        _ => format!("![Photo]({cdn_url})"),
    }
}
