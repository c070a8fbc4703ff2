// Dotted / bracket-indexed path navigation over decoded requests

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Parse `a.b[0].c` into segments. Brackets are accepted at any segment,
/// including chained indexes (`matrix[1][2]`).
pub fn parse(path: &str) -> Vec<Segment> {
    let mut segments = Vec::new();

    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }

        let mut rest = part;
        while let Some(open) = rest.find('[') {
            let key = &rest[..open];
            if !key.is_empty() {
                segments.push(Segment::Key(key.to_string()));
            }
            match rest[open + 1..].find(']') {
                Some(close) => {
                    let index = &rest[open + 1..open + 1 + close];
                    match index.parse::<usize>() {
                        Ok(i) => segments.push(Segment::Index(i)),
                        // Not an index; treat the raw text as a literal key
                        Err(_) => segments.push(Segment::Key(index.to_string())),
                    }
                    rest = &rest[open + 1 + close + 1..];
                }
                None => {
                    segments.push(Segment::Key(rest.to_string()));
                    rest = "";
                }
            }
        }
        if !rest.is_empty() {
            segments.push(Segment::Key(rest.to_string()));
        }
    }

    segments
}

/// Walk a decoded request along a parsed path. Object keys resolve with
/// the same snake/camel tolerance the equality comparison uses.
pub fn walk<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;

    for segment in parse(path) {
        match segment {
            Segment::Key(key) => {
                let map = current.as_object()?;
                let resolved = super::equality::resolve_key(map, &key)?;
                current = map.get(&resolved)?;
            }
            Segment::Index(index) => {
                current = current.as_array()?.get(index)?;
            }
        }
    }

    Some(current)
}
