//! Order identifier type.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing an [`OrderUid`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderUidError {
    /// The input string is empty or only whitespace.
    #[error("order_uid cannot be empty")]
    Empty,
    /// The input string is too long.
    #[error("order_uid must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
}

/// A validated order identifier.
///
/// Orders arrive from the stream keyed by a producer-assigned string. An order
/// without one is invalid and must never reach the store or the cache, so every
/// path that keys on an order goes through [`OrderUid::parse`].
///
/// ## Examples
///
/// ```
/// use order_broker_core::OrderUid;
///
/// assert!(OrderUid::parse("b563feb7b2b84b6test").is_ok());
/// assert!(OrderUid::parse("").is_err());
/// assert!(OrderUid::parse("   ").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct OrderUid(String);

impl OrderUid {
    /// Maximum length of an order identifier (matches the `orders.order_uid` column).
    pub const MAX_LENGTH: usize = 255;

    /// Parse an `OrderUid` from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is blank or longer than 255 characters.
    pub fn parse(s: &str) -> Result<Self, OrderUidError> {
        if s.trim().is_empty() {
            return Err(OrderUidError::Empty);
        }

        if s.chars().count() > Self::MAX_LENGTH {
            return Err(OrderUidError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }

        Ok(Self(s.to_owned()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the `OrderUid` and returns its inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for OrderUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for OrderUid {
    type Err = OrderUidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for OrderUid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for OrderUid {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// SQLx support (with postgres feature)
#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for OrderUid {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for OrderUid {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self::parse(&s)?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for OrderUid {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}
