use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

const MAX_NAME_LEN: usize = 128;
const MAX_SLUG_LEN: usize = 255;

fn validate_simple_name(value: &str, kind: &str) -> Result<String> {
    validate_with(value, kind, MAX_NAME_LEN, is_allowed_name_char)
}

fn validate_with(
    value: &str,
    kind: &str,
    max_len: usize,
    allowed: fn(char) -> bool,
) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidId(format!("{kind} must not be empty")));
    }
    if trimmed.len() > max_len {
        return Err(Error::InvalidId(format!("{kind} length must be <= {max_len}")));
    }
    if !trimmed.chars().all(allowed) {
        return Err(Error::InvalidId(format!(
            "{kind} contains invalid characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn is_allowed_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, ':' | '_' | '-' | '.')
}

fn is_allowed_slug_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.' | '/')
}

macro_rules! define_id_type {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a validated identifier.
            pub fn new(value: impl AsRef<str>) -> Result<Self> {
                validate_simple_name(value.as_ref(), $kind).map(Self)
            }

            /// Creates an identifier from a trusted string without validation.
            ///
            /// Only for values that already passed validation, such as ids
            /// read back from the store or produced by an [`IdGenerator`].
            /// User input goes through [`Self::new`] or `TryFrom<&str>`.
            pub fn from_string(value: String) -> Self {
                Self(value)
            }

            /// Returns the underlying string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<&str> for $name {
            type Error = Error;

            fn try_from(value: &str) -> Result<Self> {
                Self::new(value)
            }
        }
    };
}

define_id_type!(
    /// Member identifier.
    PrincipalId,
    "principal id"
);
define_id_type!(
    /// Page identifier.
    PageId,
    "page id"
);
define_id_type!(
    /// Group identifier.
    GroupId,
    "group id"
);
define_id_type!(
    /// Application module name.
    ModuleName,
    "module name"
);
define_id_type!(
    /// Primary key of a grant or membership row.
    RowId,
    "row id"
);

/// URL slug of a page.
///
/// Slugs allow `/` so nested paths such as `docs/intro` stay addressable.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageSlug(String);

impl PageSlug {
    /// Creates a validated slug.
    pub fn new(value: impl AsRef<str>) -> Result<Self> {
        validate_with(value.as_ref(), "page slug", MAX_SLUG_LEN, is_allowed_slug_char).map(Self)
    }

    /// Creates a slug from a trusted string without validation.
    ///
    /// Only for values read back from the store; user input goes through
    /// [`Self::new`].
    pub fn from_string(value: String) -> Self {
        Self(value)
    }

    /// Returns the underlying string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PageSlug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PageSlug {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for PageSlug {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

/// A protected resource a group can be granted.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Resource {
    /// A page, addressed by id.
    Page(PageId),
    /// An application module, addressed by name.
    Module(ModuleName),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Page(page) => write!(f, "page:{page}"),
            Self::Module(module) => write!(f, "module:{module}"),
        }
    }
}

impl From<PageId> for Resource {
    fn from(page: PageId) -> Self {
        Self::Page(page)
    }
}

impl From<ModuleName> for Resource {
    fn from(module: ModuleName) -> Self {
        Self::Module(module)
    }
}

/// Source of opaque primary keys for rows the mutation layer inserts.
pub trait IdGenerator: Send + Sync {
    /// Returns a fresh row id.
    fn next_id(&self) -> RowId;
}

/// Random (v4) UUID row ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> RowId {
        RowId::from_string(uuid::Uuid::new_v4().to_string())
    }
}
