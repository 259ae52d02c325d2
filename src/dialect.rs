//! Storage dialects for individual grant rows.
//!
//! Backends disagree on how an individual override is stored. Some only keep
//! the row (its presence means "allowed"), others carry an explicit boolean
//! column that can also record a denial. A [`Dialect`] is chosen once when the
//! resolver and store are built and is consulted both when rows are written
//! and when they are folded into a resolved set.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Interpretation of the `allowed` column of individual grant rows.
pub trait Dialect: fmt::Debug + Send + Sync {
    /// Short stable name, part of the persistent cache signature.
    fn name(&self) -> &'static str;

    /// Returns whether a stored row grants access.
    fn is_allowed(&self, stored: Option<bool>) -> bool;

    /// Value written to the `allowed` column when granting.
    fn grant_value(&self) -> Option<bool>;

    /// Value written to the `allowed` column for an explicit denial, or `None`
    /// when the dialect cannot represent one.
    fn denial_value(&self) -> Option<bool>;

    /// Returns whether an explicit denial can override a group grant.
    fn supports_explicit_denial(&self) -> bool {
        self.denial_value().is_some()
    }
}

/// Row presence means allowed; there is no `allowed` column.
#[derive(Debug, Default, Clone, Copy)]
pub struct PresenceDialect;

impl Dialect for PresenceDialect {
    fn name(&self) -> &'static str {
        "presence"
    }

    fn is_allowed(&self, _stored: Option<bool>) -> bool {
        true
    }

    fn grant_value(&self) -> Option<bool> {
        None
    }

    fn denial_value(&self) -> Option<bool> {
        None
    }
}

/// Explicit `allowed` column. A NULL column denies.
#[derive(Debug, Default, Clone, Copy)]
pub struct BooleanDialect;

impl Dialect for BooleanDialect {
    fn name(&self) -> &'static str {
        "boolean"
    }

    fn is_allowed(&self, stored: Option<bool>) -> bool {
        stored == Some(true)
    }

    fn grant_value(&self) -> Option<bool> {
        Some(true)
    }

    fn denial_value(&self) -> Option<bool> {
        Some(false)
    }
}

/// Dialect selector used by configuration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialectKind {
    /// [`PresenceDialect`].
    Presence,
    /// [`BooleanDialect`].
    #[default]
    Boolean,
}

impl DialectKind {
    /// Instantiates the selected dialect.
    pub fn into_dialect(self) -> Arc<dyn Dialect> {
        match self {
            Self::Presence => Arc::new(PresenceDialect),
            Self::Boolean => Arc::new(BooleanDialect),
        }
    }
}
