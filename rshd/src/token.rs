//! Command-line tokenizer.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    Pipe,
    /// `>`
    Truncate,
    /// `>>`
    Append,
}

impl Token {
    pub fn word(s: &str) -> Token {
        Token::Word(s.to_string())
    }
}

/// Split a line into words and operators.
///
/// Whitespace separates words. A double-quoted span is part of the current
/// word with the quotes removed; nothing inside it is special, and an
/// unterminated quote runs to the end of the line. `|`, `>` and `>>` are
/// operators only outside quotes.
pub fn tokenize(line: &str) -> Vec<Token> {
    let mut out = Vec::new();
    let mut cur = String::new();
    // a word may be empty ("") so presence is tracked separately
    let mut in_word = false;
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if quoted {
            if c == '"' {
                quoted = false;
            } else {
                cur.push(c);
            }
            continue;
        }
        match c {
            '"' => {
                quoted = true;
                in_word = true;
            }
            '|' => {
                flush(&mut out, &mut cur, &mut in_word);
                out.push(Token::Pipe);
            }
            '>' => {
                flush(&mut out, &mut cur, &mut in_word);
                if chars.peek() == Some(&'>') {
                    chars.next();
                    out.push(Token::Append);
                } else {
                    out.push(Token::Truncate);
                }
            }
            c if c.is_whitespace() => flush(&mut out, &mut cur, &mut in_word),
            c => {
                cur.push(c);
                in_word = true;
            }
        }
    }
    flush(&mut out, &mut cur, &mut in_word);
    out
}

fn flush(out: &mut Vec<Token>, cur: &mut String, in_word: &mut bool) {
    if *in_word {
        out.push(Token::Word(std::mem::take(cur)));
        *in_word = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::Token::*;

    fn words(list: &[&str]) -> Vec<Token> {
        list.iter().map(|w| Token::word(w)).collect()
    }

    #[test]
    fn plain_words() {
        assert_eq!(tokenize("ls  -la\t/tmp"), words(&["ls", "-la", "/tmp"]));
    }

    #[test]
    fn blank_line_has_no_tokens() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   \t ").is_empty());
    }

    #[test]
    fn quoted_span_is_one_word() {
        assert_eq!(tokenize(r#"echo "a b" c"#), words(&["echo", "a b", "c"]));
    }

    #[test]
    fn quotes_inside_a_word_are_stripped() {
        assert_eq!(tokenize(r#"pre"fix suf"fix"#), words(&["prefix suffix"]));
        assert_eq!(tokenize(r#"echo """#), words(&["echo", ""]));
    }

    #[test]
    fn operators_need_no_spaces() {
        assert_eq!(
            tokenize("ls -la|cat>out.txt"),
            vec![word("ls"), word("-la"), Pipe, word("cat"), Truncate, word("out.txt")]
        );
        assert_eq!(tokenize("echo hi>>log"), vec![word("echo"), word("hi"), Append, word("log")]);
    }

    #[test]
    fn quoted_operators_are_literal() {
        assert_eq!(tokenize(r#"echo "|" ">>""#), words(&["echo", "|", ">>"]));
    }

    #[test]
    fn unterminated_quote_runs_to_end() {
        assert_eq!(tokenize(r#"echo "a | b"#), words(&["echo", "a | b"]));
    }

    #[test]
    fn triple_gt_is_append_then_truncate() {
        assert_eq!(tokenize(">>>"), vec![Append, Truncate]);
    }

    fn word(s: &str) -> Token {
        Token::word(s)
    }
}
