//! # Reliability Model
//!
//! Reliability grades (A/B/C) and their numeric weights, plus a configurable
//! mapping from publishers (e.g. "Home Depot", "RSMeans", "CoStar") to the
//! grade their evidence gets when the record itself carries none.
//!
//! - `weight_of`: A = 3, B = 2, C = 1. Used by the proposal generator for
//!   the weighted mean and the grade sub-score.
//! - Publisher registry loads from JSON config (grades + aliases).
//! - Case-insensitive lookup with normalization of punctuation, dashes, etc.
//! - Fallback order: aliases → exact match → substring match → default.
//! - Includes a built-in `default_seed()` with common publishers.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, fs, path::Path, str::FromStr};

use crate::errors::EngineError;

/// Quality tier of a source or record. A is most trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Grade {
    A,
    B,
    C,
}

/// Highest weight any grade can carry; normalizes the grade sub-score.
pub const MAX_GRADE_WEIGHT: u32 = 3;

/// Numeric weight of a grade. C is the baseline.
pub fn weight_of(grade: Grade) -> u32 {
    match grade {
        Grade::A => 3,
        Grade::B => 2,
        Grade::C => 1,
    }
}

impl Grade {
    pub fn weight(self) -> u32 {
        weight_of(self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Grade {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(Grade::A),
            "B" | "b" => Ok(Grade::B),
            "C" | "c" => Ok(Grade::C),
            other => Err(EngineError::InvalidGrade {
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for Grade {
    type Error = EngineError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Grade> for String {
    fn from(g: Grade) -> Self {
        g.as_str().to_string()
    }
}

/// Registry of default grades per publisher, loaded from JSON or defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct PublisherGrades {
    /// Grade for publishers nobody registered.
    #[serde(default = "default_default_grade")]
    pub default_grade: Grade,
    /// Explicit grades for canonical publisher names.
    #[serde(default)]
    pub grades: HashMap<String, Grade>,
    /// Aliases mapping non-canonical names → canonical names.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

fn default_default_grade() -> Grade {
    Grade::C
}

impl PublisherGrades {
    /// Load the registry from a JSON file.
    /// Falls back to `default_seed()` on error.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(path.as_ref()) {
            Ok(s) => match serde_json::from_str::<Self>(&s) {
                Ok(cfg) => cfg.normalized(),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        path = %path.as_ref().display(),
                        "publisher grades: bad JSON, using seed"
                    );
                    Self::default_seed()
                }
            },
            Err(_) => Self::default_seed(),
        }
    }

    /// Grade for a given publisher.
    ///
    /// Steps:
    /// 1. Alias lookup (normalized) → canonical → grade.
    /// 2. Exact match.
    /// 3. Token-run fallback (e.g. "The Home Depot Inc" → "home depot").
    /// 4. Default grade.
    pub fn grade_for(&self, publisher: &str) -> Grade {
        let s = normalize_publisher(publisher);

        if let Some(canon) = self.aliases.get(&s) {
            if let Some(&g) = self.grades.get(&normalize_publisher(canon)) {
                return g;
            }
        }

        if let Some(&g) = self.grades.get(&s) {
            return g;
        }

        // Whole-token match only; longest key wins so "home depot pro" beats "home depot".
        let tokens: Vec<&str> = s.split_whitespace().collect();
        let mut best: Option<(&str, Grade)> = None;
        for (k, &g) in &self.grades {
            let longer = best.map_or(true, |(b, _)| k.len() > b.len());
            if longer && contains_tokens(&tokens, k) {
                best = Some((k.as_str(), g));
            }
        }
        if let Some((_, g)) = best {
            return g;
        }

        self.default_grade
    }

    /// Re-key maps through `normalize_publisher` so file contents may use any casing.
    fn normalized(self) -> Self {
        Self {
            default_grade: self.default_grade,
            grades: self
                .grades
                .into_iter()
                .map(|(k, g)| (normalize_publisher(&k), g))
                .collect(),
            aliases: self
                .aliases
                .into_iter()
                .map(|(a, c)| (normalize_publisher(&a), normalize_publisher(&c)))
                .collect(),
        }
    }

    /// Built-in seed with common construction-cost and real-estate publishers.
    pub fn default_seed() -> Self {
        let mut grades = HashMap::new();
        let mut aliases = HashMap::new();

        for (k, v) in [
            ("rsmeans", Grade::A),
            ("bureau of labor statistics", Grade::A),
            ("census bureau", Grade::A),
            ("costar", Grade::A),
            ("home depot", Grade::B),
            ("lowes", Grade::B),
            ("floor and decor", Grade::B),
            ("ferguson", Grade::B),
            ("zillow", Grade::B),
            ("apartments com", Grade::B),
            ("craigslist", Grade::C),
            ("facebook marketplace", Grade::C),
        ] {
            grades.insert(k.to_string(), v);
        }

        for (a, c) in [
            ("bls", "bureau of labor statistics"),
            ("us census", "census bureau"),
            ("the home depot", "home depot"),
            ("homedepot com", "home depot"),
            ("lowes com", "lowes"),
            ("floor decor", "floor and decor"),
            ("rs means", "rsmeans"),
            ("gordian rsmeans", "rsmeans"),
            ("zillow rentals", "zillow"),
        ] {
            aliases.insert(a.to_string(), c.to_string());
        }

        Self {
            default_grade: Grade::C,
            grades,
            aliases,
        }
    }
}

/// True when the words of `key` appear as a contiguous run in `tokens`.
fn contains_tokens(tokens: &[&str], key: &str) -> bool {
    let needle: Vec<&str> = key.split_whitespace().collect();
    !needle.is_empty() && tokens.windows(needle.len()).any(|w| w == needle.as_slice())
}

/// Identity key for a publisher: lowercase, punctuation/dashes to spaces,
/// whitespace collapsed. Two spellings of one organization map to one key.
pub fn normalize_publisher(s: &str) -> String {
    static RE_SEP: OnceCell<Regex> = OnceCell::new();
    let re_sep = RE_SEP
        .get_or_init(|| Regex::new(r"[^\p{L}\p{N}]+").expect("publisher separator regex"));

    let lower = s.trim().to_lowercase().replace(['\'', '’'], "");
    re_sep
        .replace_all(&lower, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PublisherGrades {
        PublisherGrades::default_seed()
    }

    #[test]
    fn weights_follow_grade_order() {
        assert_eq!(weight_of(Grade::A), 3);
        assert_eq!(weight_of(Grade::B), 2);
        assert_eq!(weight_of(Grade::C), 1);
        assert_eq!(Grade::A.weight(), MAX_GRADE_WEIGHT);
    }

    #[test]
    fn unknown_grade_fails_fast() {
        assert_eq!(
            "D".parse::<Grade>(),
            Err(EngineError::InvalidGrade { value: "D".into() })
        );
        assert!(serde_json::from_str::<Grade>("\"AA\"").is_err());
        assert_eq!(serde_json::from_str::<Grade>("\"b\"").unwrap(), Grade::B);
        assert_eq!(serde_json::to_string(&Grade::A).unwrap(), "\"A\"");
    }

    #[test]
    fn exact_match() {
        assert_eq!(cfg().grade_for("RSMeans"), Grade::A);
    }

    #[test]
    fn alias_match() {
        let c = cfg();
        assert_eq!(c.grade_for("BLS"), Grade::A);
        assert_eq!(c.grade_for("The Home Depot"), Grade::B);
        assert_eq!(c.grade_for("Lowe's"), Grade::B);
    }

    #[test]
    fn substring_match() {
        assert_eq!(cfg().grade_for("Zillow Group Research"), Grade::B);
        assert_eq!(cfg().grade_for("The Home Depot Inc"), Grade::B);
    }

    #[test]
    fn substring_match_respects_word_boundaries() {
        let c = cfg();
        // "slowest" contains "lowes" but is a different word
        assert_eq!(c.grade_for("Slowest Supply"), c.default_grade);
        assert_eq!(c.grade_for("Craigslistings Weekly"), c.default_grade);
        assert_eq!(c.grade_for("Lowes Pro Desk"), Grade::B);
    }

    #[test]
    fn default_grade_used() {
        let c = cfg();
        assert_eq!(c.grade_for("Totally Unknown Blog"), c.default_grade);
    }

    #[test]
    fn publisher_normalization_collapses_spelling() {
        assert_eq!(normalize_publisher("Home-Depot"), "home depot");
        assert_eq!(normalize_publisher("  HOME   depot "), "home depot");
        assert_eq!(normalize_publisher("Lowe’s"), "lowes");
        assert_eq!(normalize_publisher("Floor & Decor"), "floor decor");
    }

    #[test]
    fn loads_and_normalizes_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("publisher_grades.json");
        let body = concat!(
            r#"{"default_grade":"B","grades":{"Acme Supply":"A"},"#,
            r#""aliases":{"ACME":"acme supply"}}"#,
        );
        fs::write(&p, body).unwrap();
        let c = PublisherGrades::load_from_file(&p);
        assert_eq!(c.grade_for("acme"), Grade::A);
        assert_eq!(c.grade_for("Acme-Supply"), Grade::A);
        assert_eq!(c.grade_for("nobody"), Grade::B);
    }

    #[test]
    fn missing_file_falls_back_to_seed() {
        let c = PublisherGrades::load_from_file("does/not/exist.json");
        assert_eq!(c.grade_for("costar"), Grade::A);
    }
}
