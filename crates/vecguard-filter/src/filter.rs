//! Mandatory isolation filter.
//!
//! A `SearchFilter` always carries the `(project_id, language)` pair of the
//! context it was built from. Refinements can only add conditions: there is
//! no refinement that names the project or language, and no method that
//! removes a condition once the filter exists.

use chrono::{DateTime, Utc};
use vecguard_types::{
    payload_fields, IsolationContext, IsolationError, Language, PointKind, PointPayload,
    ProjectId,
};

/// One additive narrowing condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Refinement {
    /// Point kind is one of these.
    Kinds(Vec<PointKind>),
    /// `importance >= value`. Points without importance never match.
    MinImportance(f32),
    /// `created_at >= value`
    CreatedAfter(DateTime<Utc>),
    /// `created_at < value`
    CreatedBefore(DateTime<Utc>),
    /// Point carries at least one of these tags.
    AnyTag(Vec<String>),
}

/// Builder for the optional refinements of a search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Refinements {
    items: Vec<Refinement>,
}

impl Refinements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = PointKind>) -> Self {
        self.items.push(Refinement::Kinds(kinds.into_iter().collect()));
        self
    }

    pub fn kind(self, kind: PointKind) -> Self {
        self.kinds([kind])
    }

    pub fn min_importance(mut self, value: f32) -> Self {
        self.items.push(Refinement::MinImportance(value));
        self
    }

    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.items.push(Refinement::CreatedAfter(at));
        self
    }

    pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.items.push(Refinement::CreatedBefore(at));
        self
    }

    pub fn any_tag<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.items
            .push(Refinement::AnyTag(tags.into_iter().map(Into::into).collect()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Refinement> {
        self.items.iter()
    }

    /// Reject refinements that cannot be expressed as a sane predicate.
    pub fn validate(&self) -> Result<(), IsolationError> {
        let mut newest_lower: Option<DateTime<Utc>> = None;
        let mut oldest_upper: Option<DateTime<Utc>> = None;

        for item in &self.items {
            match item {
                Refinement::Kinds(kinds) if kinds.is_empty() => {
                    return Err(IsolationError::InvalidQuery(
                        "kind refinement must name at least one kind".into(),
                    ));
                }
                Refinement::MinImportance(v) if !(0.0..=1.0).contains(v) => {
                    return Err(IsolationError::InvalidQuery(format!(
                        "min_importance must be within [0, 1], got {v}"
                    )));
                }
                Refinement::AnyTag(tags)
                    if tags.is_empty() || tags.iter().any(|t| t.trim().is_empty()) =>
                {
                    return Err(IsolationError::InvalidQuery(
                        "tag refinement must name non-empty tags".into(),
                    ));
                }
                Refinement::CreatedAfter(at) => {
                    newest_lower = Some(newest_lower.map_or(*at, |cur| cur.max(*at)));
                }
                Refinement::CreatedBefore(at) => {
                    oldest_upper = Some(oldest_upper.map_or(*at, |cur| cur.min(*at)));
                }
                _ => {}
            }
        }

        if let (Some(lower), Some(upper)) = (newest_lower, oldest_upper) {
            if lower >= upper {
                return Err(IsolationError::InvalidQuery(
                    "created_after must be earlier than created_before".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Engine-neutral predicate leaf. All conditions of a filter are ANDed.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Keyword {
        field: &'static str,
        value: String,
    },
    AnyKeyword {
        field: &'static str,
        values: Vec<String>,
    },
    Range {
        field: &'static str,
        gte: Option<f64>,
        lt: Option<f64>,
    },
}

/// Outcome of checking a returned payload against the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterCheck {
    Match,
    /// Wrong project or language: an isolation violation.
    ScopeMismatch,
    /// Right scope, fails a refinement.
    RefinementMismatch,
}

/// Immutable search predicate: `project_id == P AND language == L AND ...`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchFilter {
    context: IsolationContext,
    refinements: Refinements,
}

impl SearchFilter {
    pub fn context(&self) -> &IsolationContext {
        &self.context
    }

    pub fn project_id(&self) -> &ProjectId {
        self.context.project_id()
    }

    pub fn language(&self) -> &Language {
        self.context.language()
    }

    pub fn refinements(&self) -> &Refinements {
        &self.refinements
    }

    /// All conditions, mandatory pair first.
    pub fn conditions(&self) -> Vec<Condition> {
        let mut out = vec![
            Condition::Keyword {
                field: payload_fields::PROJECT_ID,
                value: self.project_id().as_str().to_string(),
            },
            Condition::Keyword {
                field: payload_fields::LANGUAGE,
                value: self.language().as_str().to_string(),
            },
        ];

        for item in self.refinements.iter() {
            out.push(match item {
                Refinement::Kinds(kinds) => Condition::AnyKeyword {
                    field: payload_fields::KIND,
                    values: kinds.iter().map(|k| k.as_str().to_string()).collect(),
                },
                Refinement::MinImportance(v) => Condition::Range {
                    field: payload_fields::IMPORTANCE,
                    gte: Some(f64::from(*v)),
                    lt: None,
                },
                Refinement::CreatedAfter(at) => Condition::Range {
                    field: payload_fields::CREATED_AT,
                    gte: Some(at.timestamp_millis() as f64),
                    lt: None,
                },
                Refinement::CreatedBefore(at) => Condition::Range {
                    field: payload_fields::CREATED_AT,
                    gte: None,
                    lt: Some(at.timestamp_millis() as f64),
                },
                Refinement::AnyTag(tags) => Condition::AnyKeyword {
                    field: payload_fields::TAGS,
                    values: tags.clone(),
                },
            });
        }
        out
    }

    /// True when the payload belongs to this filter's project and language.
    pub fn matches_scope(&self, payload: &PointPayload) -> bool {
        &payload.project_id == self.project_id() && &payload.language == self.language()
    }

    pub fn check(&self, payload: &PointPayload) -> FilterCheck {
        if !self.matches_scope(payload) {
            return FilterCheck::ScopeMismatch;
        }
        if self.refinements.iter().all(|r| refinement_matches(r, payload)) {
            FilterCheck::Match
        } else {
            FilterCheck::RefinementMismatch
        }
    }

    pub fn matches(&self, payload: &PointPayload) -> bool {
        self.check(payload) == FilterCheck::Match
    }
}

fn refinement_matches(refinement: &Refinement, payload: &PointPayload) -> bool {
    match refinement {
        Refinement::Kinds(kinds) => kinds.contains(&payload.kind),
        Refinement::MinImportance(min) => payload
            .metadata
            .importance
            .is_some_and(|v| v >= *min),
        Refinement::CreatedAfter(at) => {
            payload.created_at.timestamp_millis() >= at.timestamp_millis()
        }
        Refinement::CreatedBefore(at) => {
            payload.created_at.timestamp_millis() < at.timestamp_millis()
        }
        Refinement::AnyTag(tags) => payload.metadata.tags.iter().any(|t| tags.contains(t)),
    }
}

/// Build the mandatory `(project_id, language)` filter from raw values.
///
/// Fails with `InvalidIsolationContext` when either value is empty or
/// malformed. Never retried.
pub fn build_mandatory_filter(
    project_id: &str,
    language: &str,
) -> Result<SearchFilter, IsolationError> {
    let context = IsolationContext::parse(project_id, language)?;
    Ok(SearchFilter {
        context,
        refinements: Refinements::new(),
    })
}

/// Extend the mandatory filter for `context` with validated refinements.
pub fn build_search_filter(
    context: &IsolationContext,
    refinements: Refinements,
) -> Result<SearchFilter, IsolationError> {
    refinements.validate()?;
    Ok(SearchFilter {
        context: context.clone(),
        refinements,
    })
}
