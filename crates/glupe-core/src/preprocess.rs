//! Text passes that run before scanning.

const META_START: &str = "META_START";
const META_END: &str = "META_END";

/// Uncomment containers hidden in host-language comments.
///
/// `/* $$ ... $$ */` and `/* $ ... $ */` become their content, as does
/// `// $ ... $`. This lets a blueprint live inside a compilable source file.
pub fn lift_commented_containers(text: &str) -> String {
    let lifted = lift_block_comments(text);
    lift_line_comments(&lifted)
}

fn looks_like_container(content: &str, allow_block: bool) -> bool {
    let trimmed = content.trim();
    if trimmed.len() < 2 {
        return false;
    }
    let block = allow_block && trimmed.starts_with("$$") && trimmed.ends_with("$$") && trimmed.len() >= 4;
    let inline = trimmed.starts_with('$') && trimmed.ends_with('$');
    block || inline
}

fn lift_block_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find("/*") {
        let Some(len) = rest[open + 2..].find("*/") else {
            break;
        };
        let close = open + 2 + len;
        let content = &rest[open + 2..close];

        out.push_str(&rest[..open]);
        if looks_like_container(content, true) {
            out.push_str(content);
        } else {
            out.push_str(&rest[open..close + 2]);
        }
        rest = &rest[close + 2..];
    }

    out.push_str(rest);
    out
}

fn lift_line_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        let body = line.trim_end_matches(['\n', '\r']);
        let ending = &line[body.len()..];
        match body.find("//") {
            Some(at) if looks_like_container(&body[at + 2..], false) => {
                out.push_str(&body[..at]);
                out.push_str(&body[at + 2..]);
                out.push_str(ending);
            }
            _ => out.push_str(line),
        }
    }
    out
}

/// Remove the first `META_START ... META_END` region.
pub fn strip_metadata(text: &str) -> String {
    match metadata_bounds(text) {
        Some((start, end)) => format!("{}{}", &text[..start], &text[end + META_END.len()..]),
        None => text.to_string(),
    }
}

/// Parse the JSON between `META_START` and `META_END`, if present.
pub fn read_metadata(text: &str) -> Result<Option<serde_json::Value>, serde_json::Error> {
    let Some((start, end)) = metadata_bounds(text) else {
        return Ok(None);
    };
    serde_json::from_str(&text[start + META_START.len()..end]).map(Some)
}

fn metadata_bounds(text: &str) -> Option<(usize, usize)> {
    let start = text.find(META_START)?;
    let end = text[start..].find(META_END)? + start;
    Some((start, end))
}
