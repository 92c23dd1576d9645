//! Language-agnostic code tokenizer for the normalized-code method.
//!
//! Drops whitespace and comments (`//`, `/* */`, and `#` followed by
//! whitespace), rewrites string literals to one quoting style and checks
//! bracket nesting. It is not a parser; two inputs compare equal when their
//! token streams do.

use anyhow::bail;

pub(crate) fn tokenize(src: &str) -> anyhow::Result<Vec<String>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut brackets: Vec<(char, usize)> = Vec::new();
    let mut line = 1usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c == '\n' {
            line += 1;
            i += 1;
        } else if c.is_whitespace() {
            i += 1;
        } else if c == '/' && next == Some('/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '#' && next.map_or(true, char::is_whitespace) {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '/' && next == Some('*') {
            let start_line = line;
            i += 2;
            loop {
                match (chars.get(i), chars.get(i + 1)) {
                    (Some('*'), Some('/')) => {
                        i += 2;
                        break;
                    }
                    (Some(ch), _) => {
                        if *ch == '\n' {
                            line += 1;
                        }
                        i += 1;
                    }
                    (None, _) => bail!("unterminated block comment starting at line {start_line}"),
                }
            }
        } else if c == '"' || c == '`' {
            let (body, end, newlines) = scan_string(&chars, i, c)
                .ok_or_else(|| anyhow::anyhow!("unterminated string starting at line {line}"))?;
            tokens.push(quote(&body));
            line += newlines;
            i = end;
        } else if c == '\'' {
            let run = chars[i + 1..]
                .iter()
                .take_while(|ch| ch.is_alphanumeric() || **ch == '_')
                .count();
            let closes_after_run = chars.get(i + 1 + run) == Some(&'\'');
            let after_type_punct = matches!(tokens.last().map(String::as_str), Some("&" | "<" | ","));
            if run > 0 && !closes_after_run && after_type_punct {
                // Lifetime or label such as `&'a`.
                tokens.push(chars[i..i + 1 + run].iter().collect());
                i += 1 + run;
            } else {
                match scan_string(&chars, i, c) {
                    Some((body, end, 0)) => {
                        tokens.push(quote(&body));
                        i = end;
                    }
                    _ => {
                        tokens.push("'".to_string());
                        i += 1;
                    }
                }
            }
        } else if c.is_alphanumeric() || c == '_' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || chars[i] == '_' || (chars[i] == '.' && is_numeric_start(&chars, start)))
            {
                i += 1;
            }
            tokens.push(chars[start..i].iter().collect());
        } else {
            match c {
                '(' | '[' | '{' => brackets.push((c, line)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match brackets.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, open_line)) => bail!(
                            "mismatched '{c}' at line {line} (opened '{open}' at line {open_line})"
                        ),
                        None => bail!("unbalanced '{c}' at line {line}"),
                    }
                }
                _ => {}
            }
            tokens.push(c.to_string());
            i += 1;
        }
    }

    if let Some((open, open_line)) = brackets.pop() {
        bail!("unclosed '{open}' opened at line {open_line}");
    }
    Ok(tokens)
}

fn is_numeric_start(chars: &[char], start: usize) -> bool {
    chars[start].is_ascii_digit()
}

/// Returns the unescaped body, the index after the closing quote and the
/// number of newlines crossed. `None` when the string never closes.
fn scan_string(chars: &[char], start: usize, quote_char: char) -> Option<(String, usize, usize)> {
    let mut body = String::new();
    let mut newlines = 0;
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            let escaped = *chars.get(i + 1)?;
            if escaped != quote_char {
                body.push('\\');
            }
            body.push(escaped);
            i += 2;
            continue;
        }
        if c == quote_char {
            return Some((body, i + 1, newlines));
        }
        if c == '\n' {
            if quote_char == '\'' {
                return None;
            }
            newlines += 1;
        }
        body.push(c);
        i += 1;
    }
    None
}

fn quote(body: &str) -> String {
    format!("\"{}\"", body.replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_layout_are_ignored() {
        let a = "fn add(a, b) {\n    // sum\n    return a + b; /* done */\n}\n";
        let b = "fn add(a,b){return a+b;}";
        assert_eq!(tokenize(a).unwrap(), tokenize(b).unwrap());
    }

    #[test]
    fn quoting_style_is_normalized() {
        assert_eq!(
            tokenize("x = 'hi'").unwrap(),
            tokenize("x = \"hi\"").unwrap()
        );
        assert_ne!(
            tokenize("x = 'hi'").unwrap(),
            tokenize("x = 'ho'").unwrap()
        );
    }

    #[test]
    fn hash_comment_needs_whitespace() {
        assert_eq!(
            tokenize("x = 1  # note").unwrap(),
            tokenize("x = 1").unwrap()
        );
        assert_ne!(
            tokenize("#[derive(Debug)]\nstruct S;").unwrap(),
            tokenize("#[derive(Clone)]\nstruct S;").unwrap()
        );
    }

    #[test]
    fn lifetimes_do_not_open_strings() {
        assert!(tokenize("fn f<'a>(x: &'a str) -> &'a str { x }").is_ok());
    }

    #[test]
    fn structural_errors() {
        assert!(tokenize("fn f( {").is_err());
        assert!(tokenize("a ] b").is_err());
        assert!(tokenize("(]").is_err());
        assert!(tokenize("s = \"open").is_err());
        assert!(tokenize("/* never closed").is_err());
    }

    #[test]
    fn numbers_keep_their_fraction() {
        assert_ne!(tokenize("x = 1.5").unwrap(), tokenize("x = 1.6").unwrap());
        assert_eq!(tokenize("a.b").unwrap(), vec!["a", ".", "b"]);
    }
}
