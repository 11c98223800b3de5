//! Collision-free document and folder names.

use crate::error::ServiceResult;

/// Split `name` into stem and extension (extension keeps its dot).
/// Leading-dot names such as `.env` have no extension.
pub(crate) fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => name.split_at(pos),
        _ => (name, ""),
    }
}

/// Lower-cased extension without the dot
pub(crate) fn suffix(name: &str) -> String {
    split_extension(name).1.trim_start_matches('.').to_lowercase()
}

/// Make `name` unique: `a.txt` becomes `a(1).txt`, `a(1).txt` becomes
/// `a(2).txt`, and so on until `taken` reports the candidate free.
pub(crate) fn duplicate_name(
    name: &str,
    mut taken: impl FnMut(&str) -> ServiceResult<bool>,
) -> ServiceResult<String> {
    let mut candidate = name.to_string();

    while taken(&candidate)? {
        let (stem, ext) = split_extension(&candidate);
        let (base, counter) = split_counter(stem);
        candidate = match counter.checked_add(1) {
            Some(next) => format!("{base}({next}){ext}"),
            None => format!("{stem}(1){ext}"),
        };
    }

    Ok(candidate)
}

/// `report(3)` -> (`report`, 3); no trailing counter -> (stem, 0)
fn split_counter(stem: &str) -> (&str, u64) {
    let Some(open) = stem.strip_suffix(')').and_then(|s| s.rfind('(')) else {
        return (stem, 0);
    };
    let digits = &stem[open + 1..stem.len() - 1];
    match digits.parse::<u64>() {
        Ok(n) if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) => {
            (&stem[..open], n)
        }
        _ => (stem, 0),
    }
}

/// Blob key for a new object: the file name, suffixed with `_` until free
pub(crate) fn free_location(
    filename: &str,
    mut exists: impl FnMut(&str) -> ServiceResult<bool>,
) -> ServiceResult<String> {
    let mut location = filename.to_string();
    while exists(&location)? {
        location.push('_');
    }
    Ok(location)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn taken(names: &[&str]) -> impl FnMut(&str) -> ServiceResult<bool> {
        let set: HashSet<String> = names.iter().map(|s| s.to_string()).collect();
        move |candidate| Ok(set.contains(candidate))
    }

    #[test]
    fn free_name_is_unchanged() {
        assert_eq!(duplicate_name("a.txt", taken(&[])).unwrap(), "a.txt");
    }

    #[test]
    fn counters_increment() {
        assert_eq!(duplicate_name("a.txt", taken(&["a.txt"])).unwrap(), "a(1).txt");
        assert_eq!(
            duplicate_name("a.txt", taken(&["a.txt", "a(1).txt", "a(2).txt"])).unwrap(),
            "a(3).txt"
        );
        assert_eq!(duplicate_name("a(4).txt", taken(&["a(4).txt"])).unwrap(), "a(5).txt");
        assert_eq!(duplicate_name("notes", taken(&["notes"])).unwrap(), "notes(1)");
    }

    #[test]
    fn saturated_counter_starts_a_new_one() {
        let max = format!("a({}).txt", u64::MAX);
        let next = duplicate_name(&max, taken(&[max.as_str()])).unwrap();
        assert_eq!(next, format!("a({})(1).txt", u64::MAX));
    }

    #[test]
    fn extension_edge_cases() {
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension(".env"), (".env", ""));
        assert_eq!(split_extension("trailing."), ("trailing.", ""));
        assert_eq!(suffix("Report.PDF"), "pdf");
        assert_eq!(suffix("README"), "");
    }

    #[test]
    fn location_probe_appends_underscores() {
        let location = free_location("a.txt", taken(&["a.txt", "a.txt_"])).unwrap();
        assert_eq!(location, "a.txt__");
    }
}
