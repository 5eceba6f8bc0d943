//! Best-effort repair of container syntax mangled by the oracle.
//!
//! Applied only to output that no longer scans. Fixes, in order:
//! glued inline openers (`${`), glued inline closers (`}$`), inline
//! containers split across lines, block openers without `{` and blocks
//! without `}$$`.

use crate::scanner::inline_closer;
use crate::token::parse_header;

/// Repair container syntax in `text`.
pub fn repair_container_syntax(text: &str) -> String {
    let out = text.replace("${", "$ {");
    let out = separate_inline_closers(&out);
    let out = flatten_inline_containers(out);
    close_blocks(out)
}

/// `}$` → `} $`, leaving `}$$` alone.
fn separate_inline_closers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(i) = rest.find("}$") {
        out.push_str(&rest[..i]);
        if rest[i + 2..].starts_with('$') {
            out.push_str("}$$");
            rest = &rest[i + 3..];
        } else {
            out.push_str("} $");
            rest = &rest[i + 2..];
        }
    }
    out.push_str(rest);
    out
}

/// Join the lines of an inline container whose closer sits on a later line.
fn flatten_inline_containers(mut text: String) -> String {
    let mut pos = 0;
    while let Some(off) = text[pos..].find('$') {
        let at = pos + off;
        let bytes = text.as_bytes();
        let doubled = bytes.get(at + 1) == Some(&b'$') || (at > 0 && bytes[at - 1] == b'$');
        if doubled {
            pos = at + 1;
            continue;
        }

        let line_end = text[at..].find('\n').map(|i| at + i).unwrap_or(text.len());
        let Some(body_start) = parse_header(&text, at + 1, line_end).map(|h| h.body_start) else {
            pos = at + 1;
            continue;
        };
        if let Some((_, after)) = inline_closer(&text, body_start, line_end) {
            pos = after;
            continue;
        }

        match text[body_start..].find("} $") {
            Some(len) if !text[body_start..body_start + len].contains("$$") => {
                let end = body_start + len;
                let flat = text[at..end].replace('\n', " ");
                text.replace_range(at..end, &flat);
                pos = end + 3;
            }
            _ => pos = at + 1,
        }
    }
    text
}

fn close_blocks(mut text: String) -> String {
    let mut pos = 0;
    while let Some(off) = text[pos..].find("$$") {
        let at = pos + off;
        let is_closer = at > 0 && text.as_bytes()[at - 1] == b'}';
        if is_closer || text[at..].starts_with("$$:") {
            pos = at + 2;
            continue;
        }

        let next = |t: &str| t[at + 2..].find("$$").map(|i| at + 2 + i);

        let next_opener = next(&text);
        let brace = text[at..].find('{').map(|i| at + i);
        let has_brace = match (brace, next_opener) {
            (Some(b), Some(n)) => b < n,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !has_brace {
            let newline = text[at..].find('\n').map(|i| at + i);
            match newline {
                Some(nl) if next_opener.map(|n| nl < n).unwrap_or(true) => text.insert_str(nl, " {"),
                _ => text.insert_str(at + 2, " {"),
            }
        }

        let next_opener = next(&text);
        let closer = text[at + 2..].find("}$$").map(|i| at + 2 + i);
        let closed = match (closer, next_opener) {
            (Some(c), Some(n)) => n > c,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !closed {
            match next_opener {
                Some(n) => {
                    let insert_at = if text.as_bytes()[n - 1] == b'\n' { n - 1 } else { n };
                    text.insert_str(insert_at, "\n}$$");
                }
                None => text.push_str("\n}$$"),
            }
        }

        pos = at + 2;
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::scan;

    #[test]
    fn test_glued_inline_syntax() {
        assert_eq!(repair_container_syntax("x ${ y }$ z"), "x $ { y } $ z");
        assert!(scan(&repair_container_syntax("x ${ y }$ z")).is_ok());
    }

    #[test]
    fn test_block_closer_untouched() {
        let text = "$$ a { b }$$";
        assert_eq!(repair_container_syntax(text), text);
    }

    #[test]
    fn test_multiline_inline_flattened() {
        let repaired = repair_container_syntax("$ x {\n do it\n} $ after");
        assert_eq!(repaired, "$ x {  do it } $ after");
        assert!(scan(&repaired).is_ok());
    }

    #[test]
    fn test_missing_block_closer_appended() {
        let repaired = repair_container_syntax("$$ a {\n body");
        assert_eq!(repaired, "$$ a {\n body\n}$$");
        assert!(scan(&repaired).is_ok());
    }

    #[test]
    fn test_missing_open_brace_inserted() {
        let repaired = repair_container_syntax("$$ a\nbody\n}$$");
        assert_eq!(repaired, "$$ a {\nbody\n}$$");
        assert_eq!(scan(&repaired).unwrap().units().count(), 1);
    }

    #[test]
    fn test_unclosed_before_next_block() {
        let repaired = repair_container_syntax("$$ a { one\n$$ b { two }$$");
        let scan = scan(&repaired).unwrap();
        assert_eq!(scan.units().count(), 2);
    }
}
