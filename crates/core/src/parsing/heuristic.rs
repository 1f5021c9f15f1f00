//! Derives author/series/title/volume from a file's path and stem using an
//! ordered list of patterns, the first match winning.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeuristicCandidate {
    pub author: Option<String>,
    pub series: Option<String>,
    pub title: Option<String>,
    pub series_position: Option<i32>,
    /// (fields extracted) / (fields the winning pattern is expected to fill).
    pub confidence: f32,
}

impl HeuristicCandidate {
    fn filled_count(&self) -> usize {
        [
            self.author.is_some(),
            self.series.is_some(),
            self.title.is_some(),
            self.series_position.is_some(),
        ]
        .into_iter()
        .filter(|b| *b)
        .count()
    }
}

fn normalize(value: &str) -> String {
    let collapsed: String = value.trim().nfc().collect();
    collapsed.split_whitespace().collect::<Vec<_>>().join(" ")
}

struct Pattern {
    regex: &'static Regex,
    expected_fields: usize,
}

fn author_dash_title() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<author>.+?)\s*-\s*(?P<title>.+)$").unwrap())
}

fn title_dash_author() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<title>.+?)\s*-\s*(?P<author>[^-]+)$").unwrap())
}

fn series_n_title() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<series>.+?)\s+(?P<vol>\d+)\s*-\s*(?P<title>.+)$").unwrap()
    })
}

fn title_vol() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(?P<title>.+?),\s*Vol\.?\s*(?P<vol>\d+)$").unwrap())
}

fn bracket_title_vol() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\[[^\]]*\]\s*(?P<title>.+?),\s*Vol\.?\s*(?P<vol>\d+)$").unwrap()
    })
}

pub struct HeuristicParser;

impl HeuristicParser {
    pub fn new() -> Self {
        Self
    }

    /// Never fails; an unrecognized path yields an empty, zero-confidence
    /// candidate rather than an error.
    pub fn parse(&self, path: &Path) -> HeuristicCandidate {
        if let Some(candidate) = self.parse_directory_structure(path) {
            return candidate;
        }

        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            return HeuristicCandidate::default();
        };
        let stem = normalize(stem);

        let patterns: [Pattern; 5] = [
            Pattern {
                regex: bracket_title_vol(),
                expected_fields: 2,
            },
            Pattern {
                regex: title_vol(),
                expected_fields: 2,
            },
            Pattern {
                regex: series_n_title(),
                expected_fields: 3,
            },
            Pattern {
                regex: author_dash_title(),
                expected_fields: 2,
            },
            Pattern {
                regex: title_dash_author(),
                expected_fields: 2,
            },
        ];

        for pattern in &patterns {
            if let Some(caps) = pattern.regex.captures(&stem) {
                let mut candidate = HeuristicCandidate {
                    author: caps.name("author").map(|m| normalize(m.as_str())),
                    series: caps.name("series").map(|m| normalize(m.as_str())),
                    title: caps.name("title").map(|m| normalize(m.as_str())),
                    series_position: caps
                        .name("vol")
                        .and_then(|m| m.as_str().parse::<i32>().ok()),
                    confidence: 0.0,
                };
                candidate.confidence =
                    candidate.filled_count() as f32 / pattern.expected_fields as f32;
                return candidate;
            }
        }

        HeuristicCandidate {
            title: Some(stem),
            confidence: 1.0 / 4.0,
            ..Default::default()
        }
    }

    /// `{author}/{series}/{title}`: the file's grandparent and parent
    /// directory names, when both are ordinary (non-root) path components.
    fn parse_directory_structure(&self, path: &Path) -> Option<HeuristicCandidate> {
        let series_dir = path.parent()?.file_name()?.to_str()?;
        let author_dir = path.parent()?.parent()?.file_name()?.to_str()?;
        let title = path.file_stem()?.to_str()?;

        Some(HeuristicCandidate {
            author: Some(normalize(author_dir)),
            series: Some(normalize(series_dir)),
            title: Some(normalize(title)),
            series_position: None,
            confidence: 3.0 / 3.0,
        })
    }
}

impl Default for HeuristicParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_author_dash_title() {
        let parser = HeuristicParser::new();
        let candidate = parser.parse(Path::new("Tolkien - The Hobbit.m4b"));
        assert_eq!(candidate.author.as_deref(), Some("Tolkien"));
        assert_eq!(candidate.title.as_deref(), Some("The Hobbit"));
    }

    #[test]
    fn recognizes_series_n_dash_title() {
        let parser = HeuristicParser::new();
        let candidate = parser.parse(Path::new("Discworld 14 - Feet of Clay.m4b"));
        assert_eq!(candidate.series.as_deref(), Some("Discworld"));
        assert_eq!(candidate.series_position, Some(14));
        assert_eq!(candidate.title.as_deref(), Some("Feet of Clay"));
    }

    #[test]
    fn recognizes_title_vol_suffix() {
        let parser = HeuristicParser::new();
        let candidate = parser.parse(Path::new("Foundation, Vol. 2.m4b"));
        assert_eq!(candidate.title.as_deref(), Some("Foundation"));
        assert_eq!(candidate.series_position, Some(2));
    }

    #[test]
    fn recognizes_bracket_tagged_release_scene_variant() {
        let parser = HeuristicParser::new();
        let candidate = parser.parse(Path::new("[AudioRel] Foundation, Vol. 2.m4b"));
        assert_eq!(candidate.title.as_deref(), Some("Foundation"));
        assert_eq!(candidate.series_position, Some(2));
    }

    #[test]
    fn directory_structure_pattern_wins_when_path_has_two_ancestors() {
        let parser = HeuristicParser::new();
        let candidate = parser.parse(Path::new("/in/Asimov/Foundation/Book One.m4b"));
        assert_eq!(candidate.author.as_deref(), Some("Asimov"));
        assert_eq!(candidate.series.as_deref(), Some("Foundation"));
        assert_eq!(candidate.title.as_deref(), Some("Book One"));
        assert_eq!(candidate.confidence, 1.0);
    }

    #[test]
    fn unrecognized_stem_falls_back_to_title_only_low_confidence() {
        let parser = HeuristicParser::new();
        let candidate = parser.parse(Path::new("xyz.m4b"));
        assert_eq!(candidate.title.as_deref(), Some("xyz"));
        assert!(candidate.confidence < 0.5);
    }
}
