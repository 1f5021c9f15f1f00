//! Reads embedded metadata from a single audio file via `lofty`.
//!
//! Grounded on the tag extractor in the example pool (the teacher's
//! `ID3Extractor`): probe the file, pull the primary tag, normalize the
//! handful of fields the catalog tracks.

use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey, Tag};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    M4a,
    M4b,
    Aac,
    Flac,
    Ogg,
    Wma,
    Opus,
    Unknown,
}

impl AudioFormat {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" => AudioFormat::Mp3,
            "m4a" => AudioFormat::M4a,
            "m4b" => AudioFormat::M4b,
            "aac" => AudioFormat::Aac,
            "flac" => AudioFormat::Flac,
            "ogg" | "oga" => AudioFormat::Ogg,
            "wma" => AudioFormat::Wma,
            "opus" => AudioFormat::Opus,
            _ => AudioFormat::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::M4b => "m4b",
            AudioFormat::Aac => "aac",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Wma => "wma",
            AudioFormat::Opus => "opus",
            AudioFormat::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("io error reading {0}: {1}")]
    Io(std::path::PathBuf, std::io::Error),
    #[error("unsupported file: {0}")]
    Unsupported(std::path::PathBuf),
}

/// Normalized tag output. Every field is best-effort; absence just means
/// the container carried no such tag.
#[derive(Debug, Clone, Default)]
pub struct TagCandidate {
    pub title: Option<String>,
    pub author_primary: Option<String>,
    pub author_additional: Vec<String>,
    pub narrator: Option<String>,
    pub series: Option<String>,
    pub series_position: Option<i32>,
    pub publisher: Option<String>,
    pub publish_year: Option<i32>,
    pub language: Option<String>,
    pub duration_seconds: Option<u64>,
    pub genre: Option<String>,
    pub comment: Option<String>,
    pub cover_art: Option<Vec<u8>>,
    pub format: AudioFormat,
}

fn normalize(value: &str) -> String {
    value.trim().nfc().collect()
}

fn split_authors(raw: &str) -> (Option<String>, Vec<String>) {
    let normalized = normalize(raw);
    if normalized.is_empty() {
        return (None, Vec::new());
    }
    let mut names: Vec<String> = Vec::new();
    for part in normalized.split(" & ") {
        for sub in part.split(", ") {
            let trimmed = sub.trim();
            if !trimmed.is_empty() {
                names.push(trimmed.to_string());
            }
        }
    }
    let mut iter = names.into_iter();
    let primary = iter.next();
    (primary, iter.collect())
}

fn album_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?P<series>.+?)(?:,\s*Vol\.?\s*(?P<vol1>\d+)|\s*-\s*Book\s*(?P<vol2>\d+))$")
            .expect("static album decomposition pattern is valid")
    })
}

/// Split an album tag like `Foundation, Vol. 2` or `Foundation - Book 2`
/// into a series name and an integer volume.
fn decompose_album(raw: &str) -> (Option<String>, Option<i32>) {
    let normalized = normalize(raw);
    if let Some(caps) = album_pattern().captures(&normalized) {
        let series = caps.name("series").map(|m| m.as_str().trim().to_string());
        let vol = caps
            .name("vol1")
            .or_else(|| caps.name("vol2"))
            .and_then(|m| m.as_str().parse::<i32>().ok());
        (series, vol)
    } else {
        (Some(normalized), None)
    }
}

pub struct TagExtractor;

impl TagExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, path: &Path) -> Result<TagCandidate, ExtractError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let format = AudioFormat::from_extension(ext);

        let probe = Probe::open(path)
            .map_err(|e| ExtractError::Io(path.to_path_buf(), std::io::Error::other(e)))?;
        let tagged_file = probe
            .read()
            .map_err(|_| ExtractError::Unsupported(path.to_path_buf()))?;

        let duration_seconds = Some(tagged_file.properties().duration().as_secs());

        let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
            debug!(path = ?path, "no tags present");
            return Ok(TagCandidate {
                duration_seconds,
                format,
                ..Default::default()
            });
        };

        Ok(self.build_candidate(tag, format, duration_seconds))
    }

    fn build_candidate(
        &self,
        tag: &Tag,
        format: AudioFormat,
        duration_seconds: Option<u64>,
    ) -> TagCandidate {
        let title = tag.title().map(|t| normalize(&t));
        let (author_primary, author_additional) = tag
            .artist()
            .map(|a| split_authors(&a))
            .unwrap_or((None, Vec::new()));
        let narrator = tag
            .get_string(&ItemKey::Composer)
            .map(normalize)
            .or_else(|| tag.get_string(&ItemKey::InvolvedPeople).map(normalize));
        let (series, series_position) = tag
            .album()
            .map(|a| decompose_album(&a))
            .unwrap_or((None, None));
        let publisher = tag.get_string(&ItemKey::Publisher).map(normalize);
        let publish_year = tag.year().map(|y| y as i32);
        let language = tag.get_string(&ItemKey::Language).map(normalize);
        let genre = tag.genre().map(|g| normalize(&g));
        let comment = tag.comment().map(|c| normalize(&c));
        let cover_art = tag.pictures().first().map(|p| p.data().to_vec());

        TagCandidate {
            title,
            author_primary,
            author_additional,
            narrator,
            series,
            series_position,
            publisher,
            publish_year,
            language,
            duration_seconds,
            genre,
            comment,
            cover_art,
            format,
        }
    }
}

impl Default for TagExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_multi_value_authors_on_comma_and_ampersand() {
        let (primary, rest) = split_authors("Terry Pratchett, Neil Gaiman & Lyn Pratchett");
        assert_eq!(primary.as_deref(), Some("Terry Pratchett"));
        assert_eq!(rest, vec!["Neil Gaiman", "Lyn Pratchett"]);
    }

    #[test]
    fn decomposes_vol_suffixed_album() {
        let (series, vol) = decompose_album("Foundation, Vol. 2");
        assert_eq!(series.as_deref(), Some("Foundation"));
        assert_eq!(vol, Some(2));
    }

    #[test]
    fn decomposes_book_suffixed_album() {
        let (series, vol) = decompose_album("Discworld - Book 14");
        assert_eq!(series.as_deref(), Some("Discworld"));
        assert_eq!(vol, Some(14));
    }

    #[test]
    fn plain_album_with_no_volume_is_kept_as_series_candidate() {
        let (series, vol) = decompose_album("Standalone Title");
        assert_eq!(series.as_deref(), Some("Standalone Title"));
        assert_eq!(vol, None);
    }

    #[test]
    fn format_from_extension_recognizes_audiobook_containers() {
        assert_eq!(AudioFormat::from_extension("M4B"), AudioFormat::M4b);
        assert_eq!(AudioFormat::from_extension("xyz"), AudioFormat::Unknown);
    }
}
