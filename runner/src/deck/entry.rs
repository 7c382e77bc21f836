/// marker used both for commenting out a whole line and for inline comments
pub const COMMENT_MARKER: char = ';';

/// A single line of a solver deck.
///
/// Lines come in two shapes:
/// - `KEYWORD: value [unit]`, where only the value token is replaced on update
/// - anything else, where the whole token sequence is the value
///
/// The keyword is always derived from the first token with a trailing colon
/// removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    tokens: Vec<String>,
    // index of the value token for colon-style lines
    value_index: Option<usize>,
    commented_out: bool,
    trailing_comment: String,
}

/// byte offset of the first comment marker outside of quotes and not escaped
fn comment_offset(line: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (offset, character) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }

        match (quote, character) {
            (Some('\''), '\'') => quote = None,
            (Some('\''), _) => {}
            (_, '\\') => escaped = true,
            (Some('"'), '"') => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(character),
            (None, COMMENT_MARKER) => return Some(offset),
            (None, _) => {}
        }
    }

    None
}

/// POSIX shell-like split, returns `None` on unbalanced quotes or a dangling escape
fn shell_split(text: &str) -> Option<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = text.chars();

    while let Some(character) = chars.next() {
        match character {
            '\'' => {
                in_token = true;
                loop {
                    match chars.next()? {
                        '\'' => break,
                        inner => current.push(inner),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next()? {
                        '"' => break,
                        '\\' => match chars.next()? {
                            escaped @ ('"' | '\\' | '$' | '`') => current.push(escaped),
                            other => {
                                current.push('\\');
                                current.push(other);
                            }
                        },
                        inner => current.push(inner),
                    }
                }
            }
            '\\' => {
                in_token = true;
                current.push(chars.next()?);
            }
            whitespace if whitespace.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            other => {
                in_token = true;
                current.push(other);
            }
        }
    }

    if in_token {
        tokens.push(current);
    }

    Some(tokens)
}

/// quote a token so that `shell_split` yields it back unchanged
fn quote(token: &str) -> String {
    let needs_quotes = token.is_empty()
        || token
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | COMMENT_MARKER));

    if !needs_quotes {
        return token.to_string();
    }

    let mut quoted = String::with_capacity(token.len() + 2);
    quoted.push('"');
    for character in token.chars() {
        if matches!(character, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(character);
    }
    quoted.push('"');

    quoted
}

impl ConfigEntry {
    /// Parse one deck line. Parsing never fails, an empty line becomes a single
    /// empty token and unbalanced quoting falls back to whitespace splitting.
    pub fn parse(line: &str) -> Self {
        let mut text = line.trim();
        let commented_out = text.starts_with(COMMENT_MARKER);

        if commented_out {
            text = &text[COMMENT_MARKER.len_utf8()..];
        }

        let (body, trailing_comment) = match comment_offset(text) {
            Some(offset) => (&text[..offset], text[offset..].trim_end().to_string()),
            None => (text, String::new()),
        };

        let mut tokens = shell_split(body)
            .unwrap_or_else(|| body.split_whitespace().map(str::to_string).collect());

        if tokens.is_empty() {
            tokens.push(String::new());
        }

        let value_index = tokens
            .iter()
            .position(|token| token.ends_with(':'))
            .map(|index| index + 1);

        // colon-style lines always carry value and unit slots
        if let Some(index) = value_index {
            while tokens.len() < index + 2 {
                tokens.push(String::new());
            }
        }

        Self {
            tokens,
            value_index,
            commented_out,
            trailing_comment,
        }
    }

    pub fn keyword(&self) -> &str {
        self.tokens[0].trim_end_matches(':')
    }

    pub fn is_colon_style(&self) -> bool {
        self.value_index.is_some()
    }

    /// the value token, or the whole line body for non colon-style lines
    pub fn value(&self) -> String {
        match self.value_index {
            Some(index) => self.tokens[index].clone(),
            None => self.body(),
        }
    }

    /// Replace the value. Colon-style lines only swap the value token, any
    /// other line is replaced by a fresh parse of `value`.
    pub fn set_value(&mut self, value: &str) {
        match self.value_index {
            Some(index) => self.tokens[index] = value.to_string(),
            None => *self = Self::parse(value),
        }
    }

    pub fn unit(&self) -> Option<&str> {
        self.value_index
            .and_then(|index| self.tokens.get(index + 1))
            .map(String::as_str)
            .filter(|unit| !unit.is_empty())
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn is_commented_out(&self) -> bool {
        self.commented_out
    }

    pub fn set_commented_out(&mut self, commented_out: bool) {
        self.commented_out = commented_out;
    }

    pub fn trailing_comment(&self) -> &str {
        &self.trailing_comment
    }

    /// tokens joined with single spaces, trailing empty slots omitted
    fn body(&self) -> String {
        let used = self
            .tokens
            .iter()
            .rposition(|token| !token.is_empty())
            .map_or(0, |index| index + 1);

        self.tokens[..used]
            .iter()
            .map(|token| quote(token))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// the line as it is written back to a deck
    pub fn output_line(&self) -> String {
        let mut line = String::new();

        if self.commented_out {
            line.push(COMMENT_MARKER);
        }

        let body = self.body();
        line.push_str(&body);

        if !self.trailing_comment.is_empty() {
            if !body.is_empty() {
                line.push(' ');
            }
            line.push_str(&self.trailing_comment);
        }

        line
    }
}
