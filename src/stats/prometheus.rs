//! Minimal Prometheus text exposition parser
//!
//! The scraper only needs four gauge values out of each engine's /metrics
//! page, so this parses the text exposition format (version 0.0.4) just far
//! enough to yield `(metric_name, value)` samples. `# HELP`/`# TYPE` comment
//! lines are skipped, labels are not interpreted, and malformed lines are
//! ignored rather than failing the whole scrape.

/// One parsed sample line.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub value: f64,
}

/// Parse an exposition page into samples.
pub fn parse_samples(text: &str) -> Vec<Sample> {
    text.lines().filter_map(parse_line).collect()
}

/// Parse a single `name{labels} value [timestamp]` line.
///
/// Returns None for comments, blank lines, and anything that does not
/// scan as a sample.
fn parse_line(line: &str) -> Option<Sample> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    // The metric name ends at the label block or the first whitespace.
    let (name, rest) = match line.find('{') {
        Some(brace) => {
            // Label values are quoted and may contain spaces or escaped
            // quotes, so scan for the closing brace respecting quoting.
            let close = find_label_block_end(&line[brace..])? + brace;
            (&line[..brace], &line[close + 1..])
        }
        None => {
            let ws = line.find(char::is_whitespace)?;
            (&line[..ws], &line[ws..])
        }
    };

    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    // First whitespace-separated token after the name/labels is the value;
    // an optional timestamp may follow and is ignored.
    let value_token = rest.split_whitespace().next()?;
    let value = parse_value(value_token)?;

    Some(Sample {
        name: name.to_string(),
        value,
    })
}

/// Find the index of the closing `}` of a label block starting at `{`.
fn find_label_block_end(block: &str) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in block.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '}' if !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_value(token: &str) -> Option<f64> {
    match token {
        "+Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ => token.parse().ok(),
    }
}
