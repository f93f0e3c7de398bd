//! # Query Compiler
//!
//! Turns a free-text search string into a `QueryPlan`: AND-combined
//! predicates plus one ordering directive. Pure translation — execution
//! belongs to the storage adapter, which keeps compilation deterministic
//! and unit-testable without a live store.

use domains::error::QueryParseError;
use domains::models::Rating;
use domains::query::{NumericCmp, PostOrder, PostPredicate, QueryPlan, StatusFilter};

use crate::tags::{classify, Metatag, MetatagKind, Token};

/// Compile a raw search string.
///
/// Every non-`order:` token contributes one predicate; when no `status:`
/// token appears, an implicit live-only filter is appended so
/// soft-deleted posts stay hidden by default. Only the last `order:`
/// token wins.
pub fn compile(raw: &str) -> Result<QueryPlan, QueryParseError> {
    let mut filters = Vec::new();
    let mut order = PostOrder::default();
    let mut status_given = false;

    for token in raw.split_whitespace() {
        match classify(token) {
            Token::Meta(meta) => match meta.kind {
                MetatagKind::Order => {
                    // A negated ordering has no meaning; drop it.
                    if !meta.negated {
                        order = parse_order(&meta.value)?;
                    }
                }
                MetatagKind::Status => {
                    if !meta.negated {
                        status_given = true;
                        filters.push(PostPredicate::StatusIs(parse_status(&meta.value)?));
                    }
                }
                _ => filters.push(filter_predicate(&meta)?),
            },
            Token::Plain(tag) => {
                if let Some(predicate) = plain_predicate(&tag) {
                    filters.push(predicate);
                }
            }
        }
    }

    if !status_given {
        filters.push(PostPredicate::StatusIs(StatusFilter::Active));
    }

    Ok(QueryPlan { filters, order })
}

/// Build the predicate for a filter metatag, wrapping in `Not` when the
/// token was negated.
fn filter_predicate(meta: &Metatag) -> Result<PostPredicate, QueryParseError> {
    let inner = match meta.kind {
        MetatagKind::Id => PostPredicate::IdCompare(parse_numeric(&meta.value)?),
        MetatagKind::Fav => PostPredicate::FavoritedBy(meta.value.clone()),
        MetatagKind::Pool => PostPredicate::InPool(meta.value.clone()),
        MetatagKind::Uploader => PostPredicate::UploadedBy(meta.value.clone()),
        MetatagKind::Rating => PostPredicate::RatingIs(
            Rating::parse(&meta.value)
                .ok_or_else(|| QueryParseError::InvalidRating(meta.value.clone()))?,
        ),
        MetatagKind::Source => PostPredicate::SourceContains(meta.value.clone()),
        MetatagKind::Md5 => PostPredicate::Md5In(
            meta.value
                .split(',')
                .filter(|digest| !digest.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        // Order and Status are handled by the caller.
        MetatagKind::Order | MetatagKind::Status => unreachable!(),
    };
    Ok(if meta.negated {
        PostPredicate::Not(Box::new(inner))
    } else {
        inner
    })
}

/// Plain tokens: a leading `-` negates, a `*` anywhere makes it a glob.
fn plain_predicate(token: &str) -> Option<PostPredicate> {
    let (negated, body) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    if body.is_empty() {
        return None;
    }
    let inner = if body.contains('*') {
        PostPredicate::MatchesPattern(body.to_string())
    } else {
        PostPredicate::HasTag(body.to_string())
    };
    Some(if negated {
        PostPredicate::Not(Box::new(inner))
    } else {
        inner
    })
}

fn parse_numeric(value: &str) -> Result<NumericCmp, QueryParseError> {
    let malformed = || QueryParseError::InvalidNumber(value.to_string());
    let (rest, build): (&str, fn(i64) -> NumericCmp) = if let Some(rest) = value.strip_prefix(">=")
    {
        (rest, NumericCmp::Ge)
    } else if let Some(rest) = value.strip_prefix("<=") {
        (rest, NumericCmp::Le)
    } else if let Some(rest) = value.strip_prefix('>') {
        (rest, NumericCmp::Gt)
    } else if let Some(rest) = value.strip_prefix('<') {
        (rest, NumericCmp::Lt)
    } else {
        (value, NumericCmp::Eq)
    };
    rest.parse::<i64>().map(build).map_err(|_| malformed())
}

fn parse_status(value: &str) -> Result<StatusFilter, QueryParseError> {
    match value {
        "active" => Ok(StatusFilter::Active),
        "pending" => Ok(StatusFilter::Pending),
        "flagged" => Ok(StatusFilter::Flagged),
        "deleted" => Ok(StatusFilter::Deleted),
        "any" | "all" => Ok(StatusFilter::Any),
        other => Err(QueryParseError::InvalidStatus(other.to_string())),
    }
}

fn parse_order(value: &str) -> Result<PostOrder, QueryParseError> {
    match value {
        "id" | "id_desc" => Ok(PostOrder::IdDesc),
        "id_asc" => Ok(PostOrder::IdAsc),
        "mpixels" => Ok(PostOrder::MpixelsDesc),
        "mpixels_asc" => Ok(PostOrder::MpixelsAsc),
        "landscape" => Ok(PostOrder::LandscapeFirst),
        "portrait" => Ok(PostOrder::PortraitFirst),
        "score" => Ok(PostOrder::ScoreDesc),
        "score_asc" => Ok(PostOrder::ScoreAsc),
        other => Err(QueryParseError::InvalidOrder(other.to_string())),
    }
}
