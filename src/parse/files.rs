//! Index listing and attribute query parsing

use std::collections::HashMap;

use crate::cache::Classification;
use crate::error::Result;

use super::{MalformedTally, unquote_path};

/// Parse `git ls-files --stage` into path → blob id
///
/// Conflicted paths appear once per stage; the first listed stage wins.
pub fn parse_staged_files(output: &str) -> Result<HashMap<String, String>> {
    let mut tally = MalformedTally::new("ls-files");
    let mut files = HashMap::new();

    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        tally.line();
        let Some((meta, path)) = line.split_once('\t') else {
            tally.malformed(line);
            continue;
        };
        let mut fields = meta.split_whitespace();
        match (fields.next(), fields.next(), fields.next()) {
            (Some(_mode), Some(blob), Some(_stage)) if !path.is_empty() => {
                files
                    .entry(unquote_path(path))
                    .or_insert_with(|| blob.to_string());
            }
            _ => tally.malformed(line),
        }
    }

    tally.finish()?;
    Ok(files)
}

/// Parse `git check-attr -z binary diff filter` output into a classification per path
///
/// Records are `path NUL attribute NUL value NUL`. `filter=lfs`,
/// `binary: set` or `diff: unset` mark a file binary; anything else that was
/// reported is text.
pub fn parse_attributes(output: &str) -> Result<HashMap<String, Classification>> {
    let mut tally = MalformedTally::new("check-attr");
    let mut classes: HashMap<String, Classification> = HashMap::new();
    if output.is_empty() {
        return Ok(classes);
    }

    let fields: Vec<&str> = output.strip_suffix('\0').unwrap_or(output).split('\0').collect();
    for record in fields.chunks(3) {
        tally.line();
        let &[path, attribute, value] = record else {
            tally.malformed(&record.join(" "));
            continue;
        };
        if path.is_empty() {
            tally.malformed(&record.join(" "));
            continue;
        }

        let binary = matches!(
            (attribute, value),
            ("filter", "lfs") | ("binary", "set") | ("diff", "unset")
        );
        let entry = classes.entry(path.to_string()).or_insert(Classification::Text);
        if binary {
            *entry = Classification::Binary;
        }
    }

    tally.finish()?;
    Ok(classes)
}
