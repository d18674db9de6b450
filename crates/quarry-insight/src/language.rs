//! Language detection seam.
//!
//! The normalizer only applies the pass/fail decision; what counts as a
//! language comes from a [`LanguageDetector`].

/// Reports the ISO-639-1 code of a text, or `None` when it cannot tell.
pub trait LanguageDetector: Send + Sync {
    fn detect(&self, text: &str) -> Option<String>;
}

/// Script ranges for non-Latin languages, stopword ratios for Latin ones.
#[derive(Debug, Clone)]
pub struct HeuristicLanguageDetector {
    /// Share of tokens that must be stopwords of the winning Latin language.
    pub min_stopword_ratio: f64,
}

impl Default for HeuristicLanguageDetector {
    fn default() -> Self {
        Self {
            min_stopword_ratio: 0.05,
        }
    }
}

const SCRIPTS: &[(&str, &[(char, char)])] = &[
    ("ja", &[('\u{3040}', '\u{309F}'), ('\u{30A0}', '\u{30FF}')]),
    ("ko", &[('\u{AC00}', '\u{D7AF}')]),
    ("zh", &[('\u{4E00}', '\u{9FFF}'), ('\u{3400}', '\u{4DBF}')]),
    ("ru", &[('\u{0400}', '\u{04FF}')]),
    ("ar", &[('\u{0600}', '\u{06FF}')]),
    ("hi", &[('\u{0900}', '\u{097F}')]),
];

const STOPWORDS: &[(&str, &[&str])] = &[
    (
        "en",
        &[
            "the", "is", "are", "was", "were", "have", "has", "had", "does", "did", "will",
            "would", "could", "should", "can", "to", "of", "in", "for", "on", "with", "at",
            "from", "by", "about", "and", "or", "but", "not", "this", "that", "it", "my", "i",
            "you", "we", "they", "how", "what", "why", "any", "when", "be", "there",
        ],
    ),
    (
        "es",
        &[
            "el", "la", "los", "las", "que", "es", "un", "una", "por", "con", "para", "pero",
            "como", "del", "muy", "está", "son", "y",
        ],
    ),
    (
        "fr",
        &[
            "le", "les", "des", "une", "est", "et", "être", "avec", "pour", "pas", "je", "nous",
            "vous", "ce", "sont", "dans", "du", "au",
        ],
    ),
    (
        "de",
        &[
            "der", "die", "das", "ist", "ich", "nicht", "ein", "eine", "und", "zu", "haben",
            "werden", "mit", "auf", "für", "sind", "wir",
        ],
    ),
];

impl LanguageDetector for HeuristicLanguageDetector {
    fn detect(&self, text: &str) -> Option<String> {
        let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
        if letters.is_empty() {
            return None;
        }

        for (code, ranges) in SCRIPTS {
            let hits = letters
                .iter()
                .filter(|c| ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(*c)))
                .count();
            if hits as f64 / letters.len() as f64 > 0.3 {
                return Some(code.to_string());
            }
        }

        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect();
        if tokens.is_empty() {
            return None;
        }

        let mut best: Option<(&str, usize)> = None;
        for (code, words) in STOPWORDS {
            let hits = tokens.iter().filter(|t| words.contains(&t.as_str())).count();
            if hits > best.map_or(0, |(_, h)| h) {
                best = Some((*code, hits));
            }
        }

        let (code, hits) = best?;
        if (hits as f64 / tokens.len() as f64) < self.min_stopword_ratio {
            return None;
        }
        Some(code.to_string())
    }
}
