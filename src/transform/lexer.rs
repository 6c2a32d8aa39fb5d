use super::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Num(f64),
    Str(String),
    Template(Vec<TemplatePart>),
    Regex { pattern: String, flags: String },
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    /// Source of a `${...}` substitution, parsed separately.
    Expr(String),
}

/// Longest first, so `===` wins over `==` and `=`.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "(", ")", "[", "]", "{",
    "}", ",", ".", ";", ":", "?", "+", "-", "*", "/", "%", "!", "<", ">", "=",
];

const REGEX_AFTER_KEYWORDS: &[&str] = &["return", "typeof", "throw", "case", "else"];

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub fn tokenize(input: &str) -> Result<Vec<Spanned>, ScriptError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens: Vec<Spanned> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '/' && next == Some('/') {
            while i < chars.len() && chars[i].1 != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && next == Some('*') {
            i += 2;
            loop {
                if i + 1 >= chars.len() {
                    return Err(ScriptError::syntax(offset, "unterminated comment"));
                }
                if chars[i].1 == '*' && chars[i + 1].1 == '/' {
                    i += 2;
                    break;
                }
                i += 1;
            }
            continue;
        }

        let token = if c == '"' || c == '\'' {
            let (s, end) = lex_string(&chars, i, c)?;
            i = end;
            Token::Str(s)
        } else if c == '`' {
            let (parts, end) = lex_template(&chars, i)?;
            i = end;
            Token::Template(parts)
        } else if c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) {
            let (n, end) = lex_number(&chars, i)?;
            i = end;
            Token::Num(n)
        } else if c == '/' && regex_allowed(tokens.last().map(|t| &t.token)) {
            let (pattern, flags, end) = lex_regex(&chars, i)?;
            i = end;
            Token::Regex { pattern, flags }
        } else if is_ident_start(c) {
            let start = i;
            while i < chars.len() && is_ident_part(chars[i].1) {
                i += 1;
            }
            Token::Ident(chars[start..i].iter().map(|(_, c)| c).collect())
        } else {
            let rest: String = chars[i..chars.len().min(i + 3)].iter().map(|(_, c)| c).collect();
            let punct = PUNCTUATORS
                .iter()
                .find(|p| rest.starts_with(**p))
                .copied()
                .ok_or_else(|| ScriptError::syntax(offset, format!("unexpected character '{c}'")))?;
            // `a?.5:b` is a conditional, not optional chaining
            if punct == "?." && chars.get(i + 2).is_some_and(|(_, c)| c.is_ascii_digit()) {
                i += 1;
                Token::Punct("?")
            } else {
                i += punct.chars().count();
                Token::Punct(punct)
            }
        };
        tokens.push(Spanned { token, offset });
    }

    tokens.push(Spanned {
        token: Token::Eof,
        offset: input.len(),
    });
    Ok(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn regex_allowed(prev: Option<&Token>) -> bool {
    match prev {
        None => true,
        Some(Token::Punct(p)) => !matches!(*p, ")" | "]" | "}"),
        Some(Token::Ident(word)) => REGEX_AFTER_KEYWORDS.contains(&word.as_str()),
        Some(_) => false,
    }
}

fn lex_escape(chars: &[(usize, char)], i: usize) -> Result<(char, usize), ScriptError> {
    let Some(&(offset, c)) = chars.get(i) else {
        return Err(ScriptError::syntax(
            chars.last().map(|(o, _)| *o).unwrap_or(0),
            "unterminated escape",
        ));
    };
    let simple = match c {
        'n' => Some('\n'),
        't' => Some('\t'),
        'r' => Some('\r'),
        '0' => Some('\0'),
        'b' => Some('\u{8}'),
        'f' => Some('\u{c}'),
        'v' => Some('\u{b}'),
        'x' | 'u' => None,
        other => Some(other),
    };
    if let Some(ch) = simple {
        return Ok((ch, i + 1));
    }

    let braced = c == 'u' && chars.get(i + 1).is_some_and(|(_, c)| *c == '{');
    let (start, end) = if braced {
        let close = chars[i..]
            .iter()
            .position(|(_, c)| *c == '}')
            .map(|p| i + p)
            .ok_or_else(|| ScriptError::syntax(offset, "invalid unicode escape"))?;
        (i + 2, close)
    } else {
        let width = if c == 'x' { 2 } else { 4 };
        (i + 1, i + 1 + width)
    };
    if end > chars.len() {
        return Err(ScriptError::syntax(offset, "invalid escape sequence"));
    }
    let hex: String = chars[start..end].iter().map(|(_, c)| c).collect();
    let ch = u32::from_str_radix(&hex, 16)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| ScriptError::syntax(offset, "invalid escape sequence"))?;
    Ok((ch, if braced { end + 1 } else { end }))
}

fn lex_string(
    chars: &[(usize, char)],
    start: usize,
    quote: char,
) -> Result<(String, usize), ScriptError> {
    let mut out = String::new();
    let mut i = start + 1;
    loop {
        match chars.get(i) {
            None => return Err(ScriptError::syntax(chars[start].0, "unterminated string")),
            Some((_, '\n')) => {
                return Err(ScriptError::syntax(chars[start].0, "unterminated string"))
            }
            Some((_, c)) if *c == quote => return Ok((out, i + 1)),
            Some((_, '\\')) => {
                let (ch, next) = lex_escape(chars, i + 1)?;
                out.push(ch);
                i = next;
            }
            Some((_, c)) => {
                out.push(*c);
                i += 1;
            }
        }
    }
}

fn lex_template(
    chars: &[(usize, char)],
    start: usize,
) -> Result<(Vec<TemplatePart>, usize), ScriptError> {
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut i = start + 1;
    loop {
        match chars.get(i) {
            None => return Err(ScriptError::syntax(chars[start].0, "unterminated template")),
            Some((_, '`')) => {
                if !text.is_empty() {
                    parts.push(TemplatePart::Text(text));
                }
                return Ok((parts, i + 1));
            }
            Some((_, '\\')) => {
                let (ch, next) = lex_escape(chars, i + 1)?;
                text.push(ch);
                i = next;
            }
            Some((offset, '$')) if chars.get(i + 1).is_some_and(|(_, c)| *c == '{') => {
                if !text.is_empty() {
                    parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                }
                let body_start = i + 2;
                let mut depth = 1;
                let mut j = body_start;
                let mut quote: Option<char> = None;
                while depth > 0 {
                    let Some((_, c)) = chars.get(j) else {
                        return Err(ScriptError::syntax(*offset, "unterminated substitution"));
                    };
                    match (quote, *c) {
                        (Some(_), '\\') => j += 1,
                        (Some(q), c) if c == q => quote = None,
                        (Some(_), _) => {}
                        (None, '"' | '\'' | '`') => quote = Some(*c),
                        (None, '{') => depth += 1,
                        (None, '}') => depth -= 1,
                        (None, _) => {}
                    }
                    j += 1;
                }
                let source: String = chars[body_start..j - 1].iter().map(|(_, c)| c).collect();
                parts.push(TemplatePart::Expr(source));
                i = j;
            }
            Some((_, c)) => {
                text.push(*c);
                i += 1;
            }
        }
    }
}

fn lex_number(chars: &[(usize, char)], start: usize) -> Result<(f64, usize), ScriptError> {
    let mut i = start;
    let digits = |i: &mut usize| {
        while chars.get(*i).is_some_and(|(_, c)| c.is_ascii_digit() || *c == '_') {
            *i += 1;
        }
    };
    digits(&mut i);
    if chars.get(i).is_some_and(|(_, c)| *c == '.') {
        i += 1;
        digits(&mut i);
    }
    if chars.get(i).is_some_and(|(_, c)| *c == 'e' || *c == 'E') {
        let mut j = i + 1;
        if chars.get(j).is_some_and(|(_, c)| *c == '+' || *c == '-') {
            j += 1;
        }
        if chars.get(j).is_some_and(|(_, c)| c.is_ascii_digit()) {
            i = j;
            digits(&mut i);
        }
    }
    if chars.get(i).is_some_and(|(_, c)| is_ident_start(*c)) {
        return Err(ScriptError::syntax(chars[start].0, "invalid number literal"));
    }
    let text: String = chars[start..i]
        .iter()
        .map(|(_, c)| *c)
        .filter(|c| *c != '_')
        .collect();
    text.parse::<f64>()
        .map(|n| (n, i))
        .map_err(|_| ScriptError::syntax(chars[start].0, "invalid number literal"))
}

fn lex_regex(
    chars: &[(usize, char)],
    start: usize,
) -> Result<(String, String, usize), ScriptError> {
    let mut pattern = String::new();
    let mut in_class = false;
    let mut i = start + 1;
    loop {
        match chars.get(i) {
            None | Some((_, '\n')) => {
                return Err(ScriptError::syntax(chars[start].0, "unterminated regular expression"))
            }
            Some((_, '\\')) => {
                pattern.push('\\');
                if let Some((_, c)) = chars.get(i + 1) {
                    pattern.push(*c);
                }
                i += 2;
            }
            Some((_, '[')) => {
                in_class = true;
                pattern.push('[');
                i += 1;
            }
            Some((_, ']')) => {
                in_class = false;
                pattern.push(']');
                i += 1;
            }
            Some((_, '/')) if !in_class => {
                i += 1;
                break;
            }
            Some((_, c)) => {
                pattern.push(*c);
                i += 1;
            }
        }
    }
    let mut flags = String::new();
    while let Some((_, c)) = chars.get(i).filter(|(_, c)| c.is_ascii_alphabetic()) {
        flags.push(*c);
        i += 1;
    }
    Ok((pattern, flags, i))
}
