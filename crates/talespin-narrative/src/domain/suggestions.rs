//! The suggestion count contract: every turn offers exactly `n` actions.

const GENERIC: &[&str] = &[
    "Look around",
    "Check your inventory",
    "Wait and see what happens",
    "Rest for a moment",
    "Review your quests",
];

fn key(suggestion: &str) -> String {
    suggestion
        .trim()
        .trim_end_matches(['.', '!', '?'])
        .to_lowercase()
}

/// Trims, deduplicates (case-insensitively) and truncates `generated`, then
/// pads from `defaults` and a generic list until exactly `n` remain.
///
/// Returns the list and whether it differs from what the generator offered.
#[must_use]
pub fn normalize(generated: Vec<String>, defaults: &[String], n: usize) -> (Vec<String>, bool) {
    let offered = generated.len();
    let mut seen = std::collections::HashSet::new();
    let mut out: Vec<String> = Vec::with_capacity(n);

    let candidates = generated
        .into_iter()
        .map(|s| s.trim().to_owned())
        .chain(defaults.iter().cloned())
        .chain(GENERIC.iter().map(|s| (*s).to_owned()));
    let mut taken_from_generator = 0;
    for (index, candidate) in candidates.enumerate() {
        if out.len() == n {
            break;
        }
        if candidate.is_empty() || !seen.insert(key(&candidate)) {
            continue;
        }
        if index < offered {
            taken_from_generator += 1;
        }
        out.push(candidate);
    }

    let mut filler = 1;
    while out.len() < n {
        let candidate = format!("Consider your next move ({filler})");
        filler += 1;
        if seen.insert(key(&candidate)) {
            out.push(candidate);
        }
    }
    (out, taken_from_generator != offered || offered != n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_exact_count_is_untouched() {
        let generated = strings(&["Run", "Hide", "Fight", "Talk"]);

        let (out, adjusted) = normalize(generated.clone(), &[], 4);

        assert_eq!(out, generated);
        assert!(!adjusted);
    }

    #[test]
    fn test_duplicates_and_blanks_are_replaced_by_defaults() {
        let generated = strings(&["Run away", "run away.", "  ", "Fight"]);
        let defaults = strings(&["Talk to Quill"]);

        let (out, adjusted) = normalize(generated, &defaults, 4);

        assert_eq!(out, strings(&["Run away", "Fight", "Talk to Quill", "Look around"]));
        assert!(adjusted);
    }

    #[test]
    fn test_surplus_is_truncated() {
        let generated = strings(&["a", "b", "c", "d", "e", "f"]);

        let (out, adjusted) = normalize(generated, &[], 4);

        assert_eq!(out.len(), 4);
        assert!(adjusted);
    }

    #[test]
    fn test_large_counts_are_always_filled() {
        let (out, _) = normalize(Vec::new(), &[], 9);

        assert_eq!(out.len(), 9);
        assert_eq!(out[8], "Consider your next move (4)");
    }
}
