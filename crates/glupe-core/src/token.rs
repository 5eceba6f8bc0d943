//! Container header lexer.
//!
//! A container header is everything between the opening delimiter and the
//! body brace: `[ABSTRACT] id [(p1, p2)] [-> parent1, parent2] {`.
//! The lexer turns that region into typed tokens; [`parse_header`] is the
//! small recursive-descent parser on top of it.

/// Header token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// `ABSTRACT` keyword, only valid as the first token
    Abstract,
    /// Container, parent or parameter identifier
    Ident(&'a str),
    /// `( a, b )`
    ParamList(Vec<&'a str>),
    /// `->`
    Arrow,
    /// `,` between parents
    Comma,
    /// `{` opening the body
    Open,
}

const ABSTRACT_KEYWORD: &str = "ABSTRACT";

/// Whether `c` may appear in an identifier.
pub fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'
}

/// Lexer over a header region `src[pos..limit]`.
pub struct HeaderLexer<'a> {
    src: &'a str,
    pos: usize,
    limit: usize,
    /// No token produced yet; `ABSTRACT` is only a keyword here
    at_start: bool,
}

impl<'a> HeaderLexer<'a> {
    /// Lex `src` starting at `pos`, never reading at or beyond `limit`.
    pub fn new(src: &'a str, pos: usize, limit: usize) -> Self {
        debug_assert!(pos <= limit, "Lexer start past its limit");
        debug_assert!(limit <= src.len(), "Lexer limit past end of input");

        Self {
            src,
            pos,
            limit,
            at_start: true,
        }
    }

    /// Current byte offset.
    pub fn pos(&self) -> usize {
        self.pos
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..self.limit]
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    /// Next token, or `None` if the input at this point is not header syntax.
    pub fn next_token(&mut self) -> Option<Token<'a>> {
        self.skip_ws();
        let rest = self.rest();
        let first = rest.chars().next()?;

        let token = match first {
            '{' => {
                self.pos += 1;
                Token::Open
            }
            ',' => {
                self.pos += 1;
                Token::Comma
            }
            '(' => {
                let close = rest.find(')')?;
                let inner = &rest[1..close];
                self.pos += close + 1;
                Token::ParamList(
                    inner
                        .split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .collect(),
                )
            }
            _ if rest.starts_with("->") => {
                self.pos += 2;
                Token::Arrow
            }
            _ if self.at_start && starts_with_keyword(rest, ABSTRACT_KEYWORD) => {
                self.pos += ABSTRACT_KEYWORD.len();
                Token::Abstract
            }
            c if is_ident_char(c) => {
                let len = ident_len(rest);
                debug_assert!(len > 0);
                self.pos += len;
                Token::Ident(&rest[..len])
            }
            _ => return None,
        };

        self.at_start = false;
        Some(token)
    }
}

/// `rest` starts with `keyword` followed by whitespace.
fn starts_with_keyword(rest: &str, keyword: &str) -> bool {
    rest.starts_with(keyword)
        && rest[keyword.len()..]
            .chars()
            .next()
            .map(char::is_whitespace)
            .unwrap_or(false)
}

/// Length of the identifier at the start of `rest`; stops before `->`.
pub(crate) fn ident_len(rest: &str) -> usize {
    let bytes = rest.as_bytes();
    let mut len = 0;
    for (i, c) in rest.char_indices() {
        if c == '-' && bytes.get(i + 1) == Some(&b'>') {
            break;
        }
        if !is_ident_char(c) {
            break;
        }
        len = i + c.len_utf8();
    }
    len
}

/// A parsed container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header<'a> {
    /// `ABSTRACT` keyword present
    pub is_abstract: bool,
    /// Container id; `None` for anonymous templates such as `$${ ... }$$`
    pub id: Option<&'a str>,
    /// Parameter ids
    pub params: Vec<&'a str>,
    /// Parent ids
    pub parents: Vec<&'a str>,
    /// Byte offset just past the opening `{`
    pub body_start: usize,
}

/// Parse a header starting at `pos`.
///
/// Grammar: `[ABSTRACT] [Ident [ParamList]] [Arrow Ident (Comma Ident)*] Open`.
/// Returns `None` when the region is not a header, in which case the
/// delimiter that introduced it is inert text.
pub fn parse_header(src: &str, pos: usize, limit: usize) -> Option<Header<'_>> {
    let mut lexer = HeaderLexer::new(src, pos, limit);
    let mut header = Header {
        is_abstract: false,
        id: None,
        params: Vec::new(),
        parents: Vec::new(),
        body_start: 0,
    };

    let mut token = lexer.next_token()?;

    if token == Token::Abstract {
        header.is_abstract = true;
        token = lexer.next_token()?;
    }

    if let Token::Ident(id) = token {
        header.id = Some(id);
        token = lexer.next_token()?;
        if let Token::ParamList(params) = token {
            header.params = params;
            token = lexer.next_token()?;
        }
    }

    if token == Token::Arrow {
        header.parents = parse_parents(&mut lexer)?;
        token = Token::Open;
    }

    if token != Token::Open {
        return None;
    }

    // An abstract container must be named
    if header.is_abstract && header.id.is_none() {
        return None;
    }

    header.body_start = lexer.pos();
    Some(header)
}

/// `Ident (Comma Ident)* Open`, consuming the `Open`.
fn parse_parents<'a>(lexer: &mut HeaderLexer<'a>) -> Option<Vec<&'a str>> {
    let mut parents = Vec::new();
    loop {
        match lexer.next_token()? {
            Token::Ident(parent) => parents.push(parent),
            Token::Comma => continue,
            Token::Open => return Some(parents),
            _ => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token<'_>> {
        let mut lexer = HeaderLexer::new(src, 0, src.len());
        let mut out = Vec::new();
        while let Some(t) = lexer.next_token() {
            out.push(t);
        }
        out
    }

    #[test]
    fn test_lex_full_header() {
        let toks = tokens("ABSTRACT shape (ctx, size) -> base, other {");
        assert_eq!(
            toks,
            vec![
                Token::Abstract,
                Token::Ident("shape"),
                Token::ParamList(vec!["ctx", "size"]),
                Token::Arrow,
                Token::Ident("base"),
                Token::Comma,
                Token::Ident("other"),
                Token::Open,
            ]
        );
    }

    #[test]
    fn test_ident_stops_before_arrow() {
        assert_eq!(
            tokens("child->parent{"),
            vec![
                Token::Ident("child"),
                Token::Arrow,
                Token::Ident("parent"),
                Token::Open
            ]
        );
    }

    #[test]
    fn test_abstract_prefix_is_an_identifier() {
        assert_eq!(tokens("ABSTRACTION {"), vec![Token::Ident("ABSTRACTION"), Token::Open]);
    }

    #[test]
    fn test_parse_header_with_parents() {
        let src = " greet -> base, polite { body";
        let header = parse_header(src, 0, src.len()).unwrap();
        assert_eq!(header.id, Some("greet"));
        assert_eq!(header.parents, vec!["base", "polite"]);
        assert!(!header.is_abstract);
        assert_eq!(&src[header.body_start..], " body");
    }

    #[test]
    fn test_parse_anonymous_header() {
        let header = parse_header("{ x", 0, 3).unwrap();
        assert_eq!(header.id, None);
        assert_eq!(header.body_start, 1);
    }

    #[test]
    fn test_not_a_header() {
        assert!(parse_header("HOME/bin", 0, 8).is_none());
        assert!(parse_header(" 5.00 and more", 0, 14).is_none());
        assert!(parse_header("ABSTRACT {", 0, 10).is_none());
    }

    #[test]
    fn test_limit_is_respected() {
        let src = "name\n{";
        assert!(parse_header(src, 0, 4).is_none());
        assert!(parse_header(src, 0, src.len()).is_some());
    }
}
