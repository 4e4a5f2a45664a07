//! In-place edits of manifest files

use regex::Regex;
use serde_yaml::Value;

use crate::errors::AgentError;

enum Segment {
    Key(String),
    Index(usize),
}

/// Parse a field path such as `$.spec.containers[0].image`
fn parse_path(path: &str) -> Result<Vec<Segment>, AgentError> {
    let invalid = || AgentError::ValidationError(format!("invalid yaml field path {:?}", path));
    let rest = path.strip_prefix("$.").ok_or_else(invalid)?;

    let mut segments = Vec::new();
    for part in rest.split('.') {
        let (key, mut indexes) = match part.find('[') {
            Some(i) => (&part[..i], &part[i..]),
            None => (part, ""),
        };
        if key.is_empty() {
            return Err(invalid());
        }
        segments.push(Segment::Key(key.to_string()));
        while !indexes.is_empty() {
            let end = indexes.find(']').ok_or_else(invalid)?;
            let index = indexes[1..end].parse::<usize>().map_err(|_| invalid())?;
            segments.push(Segment::Index(index));
            indexes = &indexes[end + 1..];
            if !indexes.is_empty() && !indexes.starts_with('[') {
                return Err(invalid());
            }
        }
    }
    Ok(segments)
}

/// Set the field at `path` to `value`.
///
/// Returns `None` when the field already holds `value`.
pub fn replace_yaml_field(content: &str, path: &str, value: &str) -> Result<Option<String>, AgentError> {
    let segments = parse_path(path)?;
    let mut doc: Value = serde_yaml::from_str(content)?;

    let mut node = &mut doc;
    for segment in &segments {
        node = match segment {
            Segment::Key(key) => node.get_mut(key.as_str()),
            Segment::Index(i) => node.get_mut(*i),
        }
        .ok_or_else(|| AgentError::NotFound(format!("field {} was not found", path)))?;
    }

    let current = match node {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => {
            return Err(AgentError::ValidationError(format!(
                "field {} is not a scalar",
                path
            )))
        }
    };
    if current == value {
        return Ok(None);
    }
    *node = Value::String(value.to_string());
    Ok(Some(serde_yaml::to_string(&doc)?))
}

/// Replace the first capture group of every match of `pattern` with `value`.
///
/// Returns `None` when nothing changes.
pub fn replace_regex(content: &str, pattern: &str, value: &str) -> Result<Option<String>, AgentError> {
    let re = Regex::new(pattern)
        .map_err(|e| AgentError::ValidationError(format!("invalid regex {:?}: {}", pattern, e)))?;
    if re.captures_len() < 2 {
        return Err(AgentError::ValidationError(format!(
            "regex {:?} has no capture group",
            pattern
        )));
    }
    if !re.is_match(content) {
        return Err(AgentError::NotFound(format!(
            "no match for {:?}",
            pattern
        )));
    }

    let replaced = re.replace_all(content, |caps: &regex::Captures| {
        let (Some(whole), Some(group)) = (caps.get(0), caps.get(1)) else {
            return caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default();
        };
        let start = group.start() - whole.start();
        let end = group.end() - whole.start();
        let text = whole.as_str();
        format!("{}{}{}", &text[..start], value, &text[end..])
    });
    if replaced == content {
        return Ok(None);
    }
    Ok(Some(replaced.into_owned()))
}
