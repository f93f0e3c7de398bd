//! # Tag String Handling
//!
//! Tokenization and metatag extraction for the two consumers of raw tag
//! strings: the edit path (tag merges) and the read path (query
//! compilation). Both speak the same token classification so a string
//! means the same thing everywhere.

pub mod diff;
pub mod merge;

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;

/// The recognized metatag families. Anything else is a plain tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetatagKind {
    Id,
    Fav,
    Pool,
    Uploader,
    Rating,
    Status,
    Source,
    Md5,
    Order,
}

/// Fixed prefix → variant lookup. Unrecognized prefixes deliberately fall
/// through to plain tags, so `artist:someone` stays a searchable tag.
static METATAG_PREFIXES: Lazy<HashMap<&'static str, MetatagKind>> = Lazy::new(|| {
    HashMap::from([
        ("id", MetatagKind::Id),
        ("fav", MetatagKind::Fav),
        ("pool", MetatagKind::Pool),
        ("uploader", MetatagKind::Uploader),
        ("rating", MetatagKind::Rating),
        ("status", MetatagKind::Status),
        ("source", MetatagKind::Source),
        ("md5", MetatagKind::Md5),
        ("order", MetatagKind::Order),
    ])
});

/// One recognized `prefix:value` token, with its leading `-` folded into
/// the `negated` flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metatag {
    pub kind: MetatagKind,
    pub value: String,
    pub negated: bool,
}

/// A classified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Plain(String),
    Meta(Metatag),
}

/// The result of splitting a raw tag string: plain tags in first-seen
/// order (exact duplicates dropped) plus the structured metatags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagExpansion {
    pub plain: Vec<String>,
    pub metatags: Vec<Metatag>,
}

/// Classify a single whitespace-free token.
///
/// Negation is only meaningful for metatags here; a `-`-prefixed plain
/// tag is passed through verbatim and the query compiler decides what the
/// dash means on the read path.
pub fn classify(token: &str) -> Token {
    let (negated, body) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    if let Some((prefix, value)) = body.split_once(':') {
        if let Some(kind) = METATAG_PREFIXES.get(prefix) {
            return Token::Meta(Metatag {
                kind: *kind,
                value: value.to_string(),
                negated,
            });
        }
    }
    Token::Plain(token.to_string())
}

/// Tokenize on whitespace and split metatags out of a raw tag string.
/// Pure function: no I/O, no side effects.
pub fn extract(raw: &str) -> TagExpansion {
    let mut expansion = TagExpansion::default();
    let mut seen = HashSet::new();
    for token in raw.split_whitespace() {
        match classify(token) {
            Token::Meta(meta) => expansion.metatags.push(meta),
            Token::Plain(tag) => {
                if seen.insert(tag.clone()) {
                    expansion.plain.push(tag);
                }
            }
        }
    }
    expansion
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_metatags_from_plain_tags() {
        let expansion = extract("aaa pool:cats rating:e bbb");
        assert_eq!(expansion.plain, vec!["aaa", "bbb"]);
        assert_eq!(expansion.metatags.len(), 2);
        assert_eq!(expansion.metatags[0].kind, MetatagKind::Pool);
        assert_eq!(expansion.metatags[0].value, "cats");
        assert_eq!(expansion.metatags[1].kind, MetatagKind::Rating);
    }

    #[test]
    fn negated_metatags_are_flagged() {
        match classify("-rating:e") {
            Token::Meta(meta) => {
                assert_eq!(meta.kind, MetatagKind::Rating);
                assert!(meta.negated);
            }
            other => panic!("expected metatag, got {:?}", other),
        }
    }

    #[test]
    fn unrecognized_prefixes_pass_through() {
        assert_eq!(
            classify("artist:someone"),
            Token::Plain("artist:someone".to_string())
        );
    }

    #[test]
    fn negated_plain_tags_keep_their_dash() {
        assert_eq!(classify("-bbb"), Token::Plain("-bbb".to_string()));
    }

    #[test]
    fn duplicate_plain_tags_collapse() {
        let expansion = extract("aaa bbb aaa");
        assert_eq!(expansion.plain, vec!["aaa", "bbb"]);
    }

    #[test]
    fn empty_string_yields_nothing() {
        assert_eq!(extract("   "), TagExpansion::default());
    }
}
