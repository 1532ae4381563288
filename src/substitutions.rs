#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Substitution {
    FirstName,
    FullName,
}

impl Substitution {
    pub const ALL: [Substitution; 2] = [Substitution::FirstName, Substitution::FullName];

    pub fn literal(self) -> &'static str {
        match self {
            Substitution::FirstName => "<student first name>",
            Substitution::FullName => "<student full name>",
        }
    }

    pub fn explanation(self) -> &'static str {
        match self {
            Substitution::FirstName => "Insert student's first name",
            Substitution::FullName => "Insert student's full name",
        }
    }
}

/// Number of token occurrences in `body`. Zero means one bulk message can be
/// sent to everybody.
pub fn count_substitutions(body: &str) -> usize {
    Substitution::ALL
        .iter()
        .map(|s| body.matches(s.literal()).count())
        .sum()
}

/// Replaces both tokens in one left-to-right pass over `body`. Inserted names
/// are never scanned again, so a name that looks like a token stays literal.
pub fn expand(body: &str, full_name: &str, first_name: &str) -> String {
    let mut output = String::with_capacity(body.len());
    let mut rest = body;

    loop {
        let earliest = Substitution::ALL
            .iter()
            .filter_map(|s| rest.find(s.literal()).map(|at| (at, *s)))
            .min_by_key(|(at, _)| *at);

        let Some((at, substitution)) = earliest else {
            output.push_str(rest);
            return output;
        };

        output.push_str(&rest[..at]);
        output.push_str(match substitution {
            Substitution::FirstName => first_name,
            Substitution::FullName => full_name,
        });
        rest = &rest[at + substitution.literal().len()..];
    }
}

const HONORIFICS: [&str; 10] = [
    "mr", "mrs", "ms", "miss", "mx", "dr", "prof", "sir", "rev", "fr",
];

/// Given name from a display name. Handles "Last, First" ordering and a
/// leading honorific; anything unparseable yields the full name.
pub fn first_name(full_name: &str) -> String {
    let trimmed = full_name.trim();

    let given_part = match trimmed.split_once(',') {
        Some((_, given)) if !given.trim().is_empty() => given,
        _ => trimmed,
    };

    given_part
        .split_whitespace()
        .find(|word| !is_honorific(word))
        .map(str::to_string)
        .unwrap_or_else(|| full_name.to_string())
}

fn is_honorific(word: &str) -> bool {
    let bare = word.trim_end_matches('.').to_lowercase();
    HONORIFICS.contains(&bare.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_each_token_once() {
        let body = "Hi <student first name>, this is for <student full name>.";
        assert_eq!(count_substitutions(body), 2);
        assert_eq!(count_substitutions("No tokens here"), 0);
        assert_eq!(
            count_substitutions("<student first name><student first name>"),
            2
        );
    }

    #[test]
    fn expand_replaces_every_occurrence() {
        let body = "<student first name>! <student full name>, <student first name>.";
        assert_eq!(expand(body, "Avery Lee", "Avery"), "Avery! Avery Lee, Avery.");
    }

    #[test]
    fn expand_does_not_recurse() {
        let body = "Hello <student first name>";
        let expanded = expand(body, "x", "<student full name>");
        assert_eq!(expanded, "Hello <student full name>");
    }

    #[test]
    fn names_resembling_tokens_stay_literal() {
        let body = "Hi <student first name>, <student full name>";
        let expanded = expand(body, "<student first name>", "<student full name>");
        assert_eq!(expanded, "Hi <student full name>, <student first name>");
    }

    #[test]
    fn expand_is_idempotent_without_tokens() {
        let expanded = expand("Hi <student full name>", "Avery Lee", "Avery");
        assert_eq!(expand(&expanded, "Jules", "Jules"), expanded);
    }

    #[test]
    fn first_name_extraction() {
        assert_eq!(first_name("Avery Lee"), "Avery");
        assert_eq!(first_name("Lee, Avery"), "Avery");
        assert_eq!(first_name("Dr. Kiara Patel"), "Kiara");
        assert_eq!(first_name("Madonna"), "Madonna");
        assert_eq!(first_name(""), "");
        assert_eq!(first_name("Dr."), "Dr.");
    }

    #[test]
    fn explanations_match_tokens() {
        for substitution in Substitution::ALL {
            assert!(substitution.literal().starts_with("<student"));
            assert!(substitution.explanation().starts_with("Insert student's"));
        }
    }
}
