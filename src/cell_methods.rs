use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// A measurement interval attached to a cell method, e.g. `1 degree_north`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub value: f64,
    pub units: Option<String>,
}

/// One parsed block of a CF `cell_methods` attribute string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedCellMethod {
    pub axes: Vec<String>,
    pub method: String,
    pub within: Option<String>,
    pub where_: Option<String>,
    pub over: Option<String>,
    pub intervals: Vec<Interval>,
    pub comment: Option<String>,
}

/// Parse a CF `cell_methods` string into one record per method block.
///
/// The grammar per block is `(axis ':')* method ('within'|'where'|'over'
/// value)* ('(' extra ')')?` where `extra` is a sequence of `interval:` and
/// `comment:` sub-clauses; a parenthesised group that starts with anything
/// else is an implicit comment. Cell-method strings are untrusted free text
/// from files the catalog does not control, so every malformed shape comes
/// back as a recoverable error rather than a panic.
pub fn parse_cell_methods(input: &str) -> Result<Vec<ParsedCellMethod>, CatalogError> {
    let normalized = input.replace('(', " ( ").replace(')', " ) ");
    let mut tokens: Vec<&str> = normalized.split_whitespace().collect();
    tokens.reverse();

    let mut out = Vec::new();
    while !tokens.is_empty() {
        out.push(parse_block(&mut tokens)?);
    }
    Ok(out)
}

fn parse_block(tokens: &mut Vec<&str>) -> Result<ParsedCellMethod, CatalogError> {
    let mut cm = ParsedCellMethod::default();

    while let Some(token) = tokens.last().copied() {
        match token.strip_suffix(':') {
            Some(axis) if !axis.is_empty() => {
                cm.axes.push(axis.to_string());
                tokens.pop();
            }
            _ => break,
        }
    }

    match tokens.pop() {
        Some(method) if method != "(" && method != ")" => cm.method = method.to_string(),
        Some(other) => {
            return Err(CatalogError::MalformedCellMethods(format!(
                "expected a method, found {other:?}"
            )));
        }
        None => {
            return Err(CatalogError::MalformedCellMethods(
                "axes without a method".to_string(),
            ));
        }
    }

    while let Some(qualifier) = tokens.last().copied() {
        if !matches!(qualifier, "within" | "where" | "over") {
            break;
        }
        tokens.pop();
        let value = tokens.pop().ok_or_else(|| {
            CatalogError::MalformedCellMethods(format!("{qualifier} without a value"))
        })?;
        let value = Some(value.to_string());
        match qualifier {
            "within" => cm.within = value,
            "where" => cm.where_ = value,
            _ => cm.over = value,
        }
    }

    if tokens.last().copied() == Some("(") {
        tokens.pop();
        parse_group(tokens, &mut cm)?;
    }

    let n_intervals = cm.intervals.len();
    if n_intervals > 1 && n_intervals != cm.axes.len() {
        return Err(CatalogError::IntervalAxisMismatch {
            intervals: n_intervals,
            axes: cm.axes.len(),
        });
    }

    Ok(cm)
}

fn parse_group(tokens: &mut Vec<&str>, cm: &mut ParsedCellMethod) -> Result<(), CatalogError> {
    // A group whose first token is not a known sub-clause key is one big
    // comment, e.g. "lat: mean (area-weighted)".
    match tokens.last().copied() {
        Some("interval:") | Some("comment:") | Some(")") => {}
        Some(_) => tokens.push("comment:"),
        None => return Err(unterminated()),
    }

    loop {
        let term = match tokens.pop() {
            Some(")") => return Ok(()),
            Some(term) => term,
            None => return Err(unterminated()),
        };

        match term {
            "interval:" => {
                let literal = tokens.pop().ok_or_else(unterminated)?;
                let units = match tokens.last().copied() {
                    Some(")") => None,
                    Some(_) => tokens.pop().map(str::to_string),
                    None => return Err(unterminated()),
                };
                let value: f64 = literal.parse().map_err(|_| {
                    CatalogError::MalformedCellMethods(format!(
                        "interval {literal:?} is not a number"
                    ))
                })?;
                cm.intervals.push(Interval { value, units });
            }
            "comment:" => {
                let mut words = Vec::new();
                while let Some(token) = tokens.last().copied() {
                    if token == ")" || token.ends_with(':') {
                        break;
                    }
                    words.push(token.to_string());
                    tokens.pop();
                }
                if !words.is_empty() {
                    cm.comment = Some(words.join(" "));
                }
            }
            // Unknown sub-clause keys are skipped, matching the tolerant
            // treatment of free-text groups.
            _ => {}
        }
    }
}

fn unterminated() -> CatalogError {
    CatalogError::MalformedCellMethods("unterminated parenthesised group".to_string())
}
