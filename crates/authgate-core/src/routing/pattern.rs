use std::fmt;

/// One `/`-separated piece of a path template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Stored decoded and lowercased
    Literal(String),
    /// `{name}`: exactly one segment
    Param(String),
    /// `{*name}`, `{**name}` or `*`: zero or more trailing segments
    CatchAll(Option<String>),
}

/// A parsed path template
///
/// Matching is segment-based and case-insensitive, against the request path
/// as an upstream would resolve it: percent-decoded once, with empty and `.`
/// segments dropped and `..` removing the segment before it. So `/api/`,
/// `//API`, `/%61pi` and `/x/../api` all name the same path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, String> {
        if !raw.starts_with('/') {
            return Err(format!("path '{raw}' must start with '/'"));
        }

        let parts: Vec<&str> = raw.split('/').filter(|part| !part.is_empty()).collect();
        let mut segments = Vec::with_capacity(parts.len());

        for (index, part) in parts.iter().enumerate() {
            let segment = parse_segment(part).map_err(|e| format!("path '{raw}': {e}"))?;
            if matches!(segment, Segment::CatchAll(_)) && index + 1 != parts.len() {
                return Err(format!("path '{raw}': catch-all must be the last segment"));
            }
            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_catch_all(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::CatchAll(_)))
    }

    pub fn matches(&self, path: &str) -> bool {
        let normalized = normalize(path);
        let mut parts = normalized.iter();

        for segment in &self.segments {
            match segment {
                Segment::CatchAll(_) => return true,
                Segment::Literal(literal) => {
                    if parts.next() != Some(literal) {
                        return false;
                    }
                }
                Segment::Param(_) => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
            }
        }

        parts.next().is_none()
    }

    /// Whether every path matched by `other` is also matched by `self`
    pub fn shadows(&self, other: &PathPattern) -> bool {
        let mut theirs = other.segments.iter();

        for ours in &self.segments {
            match (ours, theirs.next()) {
                (Segment::CatchAll(_), _) => return true,
                (_, None) | (_, Some(Segment::CatchAll(_))) => return false,
                (Segment::Param(_), Some(_)) => {}
                (Segment::Literal(a), Some(Segment::Literal(b))) if a == b => {}
                (Segment::Literal(_), Some(_)) => return false,
            }
        }

        theirs.next().is_none()
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Decoded, lowercased segments of a request path
fn normalize(path: &str) -> Vec<String> {
    let decoded = urlencoding::decode_binary(path.as_bytes());
    let decoded = String::from_utf8_lossy(&decoded);

    let mut segments: Vec<String> = Vec::new();
    for part in decoded.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            part => segments.push(part.to_lowercase()),
        }
    }
    segments
}

fn parse_segment(part: &str) -> Result<Segment, String> {
    if part == "*" {
        return Ok(Segment::CatchAll(None));
    }

    if let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
        let (catch_all, name) = match inner.strip_prefix("**").or_else(|| inner.strip_prefix('*')) {
            Some(name) => (true, name),
            None => (false, inner),
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(format!("invalid parameter '{part}'"));
        }
        return Ok(if catch_all {
            Segment::CatchAll(Some(name.to_string()))
        } else {
            Segment::Param(name.to_string())
        });
    }

    if part.contains(['{', '}', '*']) {
        return Err(format!("invalid segment '{part}'"));
    }

    let literal = urlencoding::decode(part).map_err(|_| format!("invalid percent-encoding in '{part}'"))?;
    if literal.contains('/') || literal == "." || literal == ".." {
        return Err(format!("invalid segment '{part}'"));
    }

    Ok(Segment::Literal(literal.to_lowercase()))
}
