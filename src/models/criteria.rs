//! Match and filter criteria.
//!
//! Values within one category are OR-ed. Across categories a match set is
//! AND-ed, while a filter excludes a result as soon as any defined category
//! hits.

use regex::Regex;

/// Per-category criteria for matching or filtering results.
#[derive(Debug, Clone, Default)]
pub struct MatchFilterCriteria {
    pub status_codes: Vec<u16>,
    pub content_lengths: Vec<usize>,
    pub line_counts: Vec<usize>,
    pub word_counts: Vec<usize>,
    pub favicon_hashes: Vec<String>,
    pub strings: Vec<String>,
    pub regexes: Vec<Regex>,
}

/// The measured properties of a response that criteria are checked against.
#[derive(Debug, Clone, Copy)]
pub struct CriteriaSubject<'a> {
    pub status_code: u16,
    pub content_length: usize,
    pub lines: usize,
    pub words: usize,
    pub favicon_hash: Option<&'a str>,
    pub body: &'a str,
}

impl MatchFilterCriteria {
    /// True when no category is defined.
    pub fn is_empty(&self) -> bool {
        self.status_codes.is_empty()
            && self.content_lengths.is_empty()
            && self.line_counts.is_empty()
            && self.word_counts.is_empty()
            && self.favicon_hashes.is_empty()
            && self.strings.is_empty()
            && self.regexes.is_empty()
    }

    /// One verdict per defined category.
    fn verdicts(&self, subject: &CriteriaSubject<'_>) -> Vec<bool> {
        let mut verdicts = Vec::new();

        if !self.status_codes.is_empty() {
            verdicts.push(self.status_codes.contains(&subject.status_code));
        }
        if !self.content_lengths.is_empty() {
            verdicts.push(self.content_lengths.contains(&subject.content_length));
        }
        if !self.line_counts.is_empty() {
            verdicts.push(self.line_counts.contains(&subject.lines));
        }
        if !self.word_counts.is_empty() {
            verdicts.push(self.word_counts.contains(&subject.words));
        }
        if !self.favicon_hashes.is_empty() {
            verdicts.push(
                subject
                    .favicon_hash
                    .is_some_and(|hash| self.favicon_hashes.iter().any(|h| h == hash)),
            );
        }
        if !self.strings.is_empty() {
            verdicts.push(self.strings.iter().any(|s| subject.body.contains(s.as_str())));
        }
        if !self.regexes.is_empty() {
            verdicts.push(self.regexes.iter().any(|re| re.is_match(subject.body)));
        }

        verdicts
    }

    /// Every defined category matches. Empty criteria match everything.
    pub fn matches_all(&self, subject: &CriteriaSubject<'_>) -> bool {
        self.verdicts(subject).into_iter().all(|v| v)
    }

    /// At least one defined category matches. Empty criteria match nothing.
    pub fn matches_any(&self, subject: &CriteriaSubject<'_>) -> bool {
        self.verdicts(subject).into_iter().any(|v| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(status_code: u16, body: &str) -> CriteriaSubject<'_> {
        CriteriaSubject {
            status_code,
            content_length: body.len(),
            lines: body.lines().count(),
            words: body.split_whitespace().count(),
            favicon_hash: None,
            body,
        }
    }

    #[test]
    fn test_empty_criteria() {
        let criteria = MatchFilterCriteria::default();
        assert!(criteria.is_empty());
        assert!(criteria.matches_all(&subject(200, "x")));
        assert!(!criteria.matches_any(&subject(200, "x")));
    }

    #[test]
    fn test_or_within_category() {
        let criteria = MatchFilterCriteria {
            status_codes: vec![200, 302],
            ..Default::default()
        };
        assert!(criteria.matches_all(&subject(302, "")));
        assert!(!criteria.matches_all(&subject(404, "")));
    }

    #[test]
    fn test_and_across_categories() {
        let criteria = MatchFilterCriteria {
            status_codes: vec![200],
            strings: vec!["admin".into()],
            ..Default::default()
        };
        assert!(criteria.matches_all(&subject(200, "admin panel")));
        assert!(!criteria.matches_all(&subject(200, "login")));
        assert!(criteria.matches_any(&subject(200, "login")));
    }

    #[test]
    fn test_regex_and_favicon() {
        let criteria = MatchFilterCriteria {
            regexes: vec![Regex::new(r"v\d+\.\d+").unwrap()],
            favicon_hashes: vec!["-1234".into()],
            ..Default::default()
        };
        let mut s = subject(200, "running v1.2");
        assert!(!criteria.matches_all(&s));
        s.favicon_hash = Some("-1234");
        assert!(criteria.matches_all(&s));
    }
}
