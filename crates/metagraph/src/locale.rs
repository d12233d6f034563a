//! Locale tag extraction from label text.
//!
//! Some remote systems model one multi-locale field as several fields whose
//! labels only differ by a locale marker ("Title", "Title (de)"). How the
//! marker is embedded differs per system, so parsing is a strategy behind
//! [`LocaleLabelParser`].

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

/// Label split into its base text and the locale it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLabel {
    /// Label text with the locale marker removed.
    pub base: String,
    /// Locale tag; the default locale when the label carries no marker.
    pub locale: String,
    /// Whether `locale` is the default locale.
    pub is_default: bool,
}

/// Strategy that splits a label into `(base, locale)`.
pub trait LocaleLabelParser: Send + Sync {
    /// Parse a label. Labels without a recognisable marker belong to
    /// `default_locale`.
    fn parse(&self, label: &str, default_locale: &str) -> ParsedLabel;
}

/// Recognises a trailing `" (xx)"`, `" [xx]"` or `" - xx"` marker.
///
/// The tag is a lowercase 2-3 letter language code with an optional region or
/// script subtag separated by `-` or `_` (`de`, `fr-CH`, `zh_Hans`).
#[derive(Debug, Clone, Default)]
pub struct SuffixLocaleParser {
    known_locales: Option<BTreeSet<String>>,
}

static SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<base>.*\S)\s*(?:\((?P<paren>[a-z]{2,3}(?:[-_][A-Za-z]{2,4})?)\)|\[(?P<bracket>[a-z]{2,3}(?:[-_][A-Za-z]{2,4})?)\]|\s-\s*(?P<dash>[a-z]{2,3}(?:[-_][A-Za-z]{2,4})?))$",
    )
    .expect("SUFFIX_RE is a valid regex pattern")
});

impl SuffixLocaleParser {
    /// Create a parser accepting any well-formed tag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only treat markers naming one of these locales as locale markers.
    /// Anything else stays part of the base label.
    #[must_use]
    pub fn with_known_locales<I, S>(mut self, locales: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.known_locales = Some(
            locales
                .into_iter()
                .map(|l| normalize_tag(l.as_ref()))
                .collect(),
        );
        self
    }

    fn is_known(&self, tag: &str) -> bool {
        self.known_locales
            .as_ref()
            .map_or(true, |known| known.contains(&normalize_tag(tag)))
    }
}

impl LocaleLabelParser for SuffixLocaleParser {
    fn parse(&self, label: &str, default_locale: &str) -> ParsedLabel {
        let trimmed = label.trim();

        if let Some(caps) = SUFFIX_RE.captures(trimmed) {
            let tag = caps
                .name("paren")
                .or_else(|| caps.name("bracket"))
                .or_else(|| caps.name("dash"))
                .map(|m| m.as_str());

            if let (Some(tag), Some(base)) = (tag, caps.name("base")) {
                if self.is_known(tag) {
                    return ParsedLabel {
                        base: base.as_str().to_string(),
                        locale: tag.to_string(),
                        is_default: same_locale(tag, default_locale),
                    };
                }
            }
        }

        ParsedLabel {
            base: trimmed.to_string(),
            locale: default_locale.to_string(),
            is_default: true,
        }
    }
}

/// Compare locale tags ignoring case and `-`/`_` differences.
pub fn same_locale(a: &str, b: &str) -> bool {
    normalize_tag(a) == normalize_tag(b)
}

fn normalize_tag(tag: &str) -> String {
    tag.trim().replace('_', "-").to_lowercase()
}
