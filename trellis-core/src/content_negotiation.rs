//! Accept header negotiation for route matching.
//!
//! Routes may restrict themselves to a set of media types. A request whose
//! `Accept` header rules all of them out fails the match as "not
//! acceptable" rather than "unknown".
//!
//! ```
//! use trellis_core::content_negotiation::{Accept, MediaType};
//!
//! let accept = Accept::parse("application/json, text/html;q=0.9, */*;q=0.1");
//! assert!(accept.accepts(&MediaType::json()));
//! assert!(accept.accepts(&MediaType::new("image", "png")));
//! ```

use std::cmp::Ordering;
use std::fmt;

// ============================================================================
// Media Types
// ============================================================================

/// A media type without parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    /// The type (e.g., "application", "text")
    pub type_: String,
    /// The subtype (e.g., "json", "html")
    pub subtype: String,
}

impl MediaType {
    pub fn new(type_: impl Into<String>, subtype: impl Into<String>) -> Self {
        Self {
            type_: type_.into().to_lowercase(),
            subtype: subtype.into().to_lowercase(),
        }
    }

    /// `application/json`
    pub fn json() -> Self {
        Self::new("application", "json")
    }

    /// `text/html`
    pub fn html() -> Self {
        Self::new("text", "html")
    }

    /// `text/plain`
    pub fn plain_text() -> Self {
        Self::new("text", "plain")
    }

    /// `*/*`
    pub fn any() -> Self {
        Self::new("*", "*")
    }

    /// Parse `type/subtype[; params]`, ignoring parameters.
    pub fn parse(s: &str) -> Option<Self> {
        let type_subtype = s.split(';').next()?.trim();
        let (type_, subtype) = type_subtype.split_once('/')?;
        let (type_, subtype) = (type_.trim(), subtype.trim());

        if type_.is_empty() || subtype.is_empty() {
            return None;
        }

        Some(Self::new(type_, subtype))
    }

    /// Check if this media type matches another (considering wildcards).
    pub fn matches(&self, other: &MediaType) -> bool {
        let type_matches = self.type_ == "*" || other.type_ == "*" || self.type_ == other.type_;
        let subtype_matches =
            self.subtype == "*" || other.subtype == "*" || self.subtype == other.subtype;
        type_matches && subtype_matches
    }

    fn specificity(&self) -> u8 {
        let mut score = 0u8;
        if self.type_ != "*" {
            score += 2;
        }
        if self.subtype != "*" {
            score += 1;
        }
        score
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_, self.subtype)
    }
}

// ============================================================================
// Accept Header
// ============================================================================

/// A parsed `Accept` header with quality values.
#[derive(Debug, Clone)]
pub struct Accept {
    /// Media types with their quality values, most preferred first.
    pub media_types: Vec<(MediaType, f32)>,
}

impl Accept {
    /// Parse an Accept header string. Unparseable entries are skipped.
    pub fn parse(header: &str) -> Self {
        let mut media_types: Vec<(MediaType, f32)> = header
            .split(',')
            .filter_map(|part| {
                let part = part.trim();
                if part.is_empty() {
                    return None;
                }
                let (media_part, quality) = Self::extract_quality(part);
                MediaType::parse(media_part).map(|mt| (mt, quality))
            })
            .collect();

        media_types.sort_by(|a, b| match b.1.partial_cmp(&a.1) {
            Some(Ordering::Equal) | None => b.0.specificity().cmp(&a.0.specificity()),
            Some(ord) => ord,
        });

        Self { media_types }
    }

    fn extract_quality(s: &str) -> (&str, f32) {
        if let Some(q_pos) = s.to_lowercase().find(";q=") {
            let quality = s[q_pos + 3..]
                .split(';')
                .next()
                .and_then(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0)
                .clamp(0.0, 1.0);
            (&s[..q_pos], quality)
        } else {
            (s, 1.0)
        }
    }

    /// Quality the client assigns to `media_type`.
    ///
    /// The most specific matching entry wins, so `text/html;q=0, */*` rejects
    /// HTML while still accepting everything else.
    pub fn quality_for(&self, media_type: &MediaType) -> f32 {
        self.media_types
            .iter()
            .filter(|(mt, _)| mt.matches(media_type))
            .max_by_key(|(mt, _)| mt.specificity())
            .map(|(_, quality)| *quality)
            .unwrap_or(0.0)
    }

    pub fn accepts(&self, media_type: &MediaType) -> bool {
        self.quality_for(media_type) > 0.0
    }

    /// True if any of `offered` is acceptable.
    pub fn accepts_any(&self, offered: &[MediaType]) -> bool {
        offered.iter().any(|mt| self.accepts(mt))
    }
}
