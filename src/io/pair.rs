//! Pairing list (`pair.txt`).
//!
//! ```text
//! <num_images>
//! <ref_id>
//! <m> <src_id_1> <score_1> ... <src_id_m> <score_m>
//! ...
//! ```
//!
//! Sources with a non-positive score are dropped; a reference never lists
//! itself as a source.

use crate::problem::Problem;
use crate::util::{ApdError, ApdResult};
use std::path::Path;

/// One reference image and its ranked sources.
#[derive(Clone, Debug, PartialEq)]
pub struct PairEntry {
    pub ref_id: u32,
    pub sources: Vec<(u32, f32)>,
}

fn parse_error(origin: &str, line: usize, reason: impl Into<String>) -> ApdError {
    ApdError::Parse {
        path: origin.to_string(),
        line,
        reason: reason.into(),
    }
}

/// Parses the pairing list text.
pub fn parse_pairing_list(text: &str, origin: &str) -> ApdResult<Vec<PairEntry>> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty());

    let Some((n, first)) = lines.next() else {
        return Err(parse_error(origin, 0, "empty pairing list"));
    };
    let count: usize = first
        .parse()
        .map_err(|_| parse_error(origin, n, format!("invalid image count '{first}'")))?;

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let (n, ref_line) = lines
            .next()
            .ok_or_else(|| parse_error(origin, 0, "missing reference line"))?;
        let ref_id: u32 = ref_line
            .parse()
            .map_err(|_| parse_error(origin, n, format!("invalid reference id '{ref_line}'")))?;

        let (n, src_line) = lines
            .next()
            .ok_or_else(|| parse_error(origin, 0, "missing source line"))?;
        let mut tokens = src_line.split_whitespace();
        let m: usize = tokens
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| parse_error(origin, n, "invalid source count"))?;
        let mut sources = Vec::with_capacity(m);
        for _ in 0..m {
            let id = tokens.next().and_then(|t| t.parse::<u32>().ok());
            let score = tokens.next().and_then(|t| t.parse::<f32>().ok());
            let (Some(id), Some(score)) = (id, score) else {
                return Err(parse_error(origin, n, "truncated source list"));
            };
            if score > 0.0 && id != ref_id {
                sources.push((id, score));
            }
        }
        entries.push(PairEntry { ref_id, sources });
    }
    Ok(entries)
}

/// Reads a pairing list and turns every entry into a problem writing under
/// `output_root/<ref_id:08>`.
pub fn read_pairing_list<P: AsRef<Path>, Q: AsRef<Path>>(
    path: P,
    output_root: Q,
) -> ApdResult<Vec<Problem>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|err| ApdError::io(path, err))?;
    let entries = parse_pairing_list(&text, &path.display().to_string())?;
    problems_from_entries(&entries, output_root.as_ref())
}

/// Builds problems in pairing-list order.
pub fn problems_from_entries(
    entries: &[PairEntry],
    output_root: &Path,
) -> ApdResult<Vec<Problem>> {
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let sources = entry.sources.iter().map(|&(id, _)| id).collect();
            let folder = output_root.join(format!("{:08}", entry.ref_id));
            Problem::new(index, entry.ref_id, sources, folder)
        })
        .collect()
}
