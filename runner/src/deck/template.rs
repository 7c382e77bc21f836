#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece<'a> {
    Text(&'a str),
    Key(&'a str),
}

/// error returned when a placeholder could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedKey(pub String);

fn is_key(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '{' | '}' | '%' | '/'))
}

fn split(template: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let bytes = template.as_bytes();
    let mut start = 0;
    let mut index = 0;

    while index < bytes.len() {
        match bytes[index] {
            b'{' | b'}' if bytes.get(index + 1) == Some(&bytes[index]) => {
                pieces.push(Piece::Text(&template[start..index + 1]));
                index += 2;
                start = index;
            }
            open @ (b'{' | b'%') => {
                let close = if open == b'{' { '}' } else { '%' };

                match template[index + 1..].find(close) {
                    Some(offset) if is_key(&template[index + 1..index + 1 + offset]) => {
                        pieces.push(Piece::Text(&template[start..index]));
                        pieces.push(Piece::Key(&template[index + 1..index + 1 + offset]));
                        index += offset + 2;
                        start = index;
                    }
                    _ => index += 1,
                }
            }
            _ => index += 1,
        }
    }

    pieces.push(Piece::Text(&template[start..]));
    pieces.retain(|piece| *piece != Piece::Text(""));
    pieces
}

/// all placeholder names in order of first appearance, without duplicates
pub fn placeholders(template: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();

    for piece in split(template) {
        if let Piece::Key(key) = piece {
            if !keys.iter().any(|known| known == key) {
                keys.push(key.to_string());
            }
        }
    }

    keys
}

/// Substitute every `{KEY}` and `%KEY%` placeholder with the value returned by
/// `lookup`. `{{` and `}}` render as literal braces.
pub fn render<F>(template: &str, mut lookup: F) -> Result<String, UnresolvedKey>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut output = String::with_capacity(template.len());

    for piece in split(template) {
        match piece {
            Piece::Text(text) => output.push_str(text),
            Piece::Key(key) => match lookup(key) {
                Some(value) => output.push_str(&value),
                None => return Err(UnresolvedKey(key.to_string())),
            },
        }
    }

    Ok(output)
}
