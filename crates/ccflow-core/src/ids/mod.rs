//!
//! Strongly-typed identifiers shared across the policy, ops and workflow layers.
//!
//! Every identifier is a string-backed newtype stored as `Cow<'static, str>`
//! so well-known constants stay zero-copy while values read from config or
//! the network allocate only when needed.
//!

///
/// string_id
/// Generates the shared constructor/conversion surface for a string-backed id.
///

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            #[must_use]
            pub const fn new(s: &'static str) -> Self {
                Self(::std::borrow::Cow::Borrowed(s))
            }

            #[must_use]
            pub const fn owned(s: String) -> Self {
                Self(::std::borrow::Cow::Owned(s))
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }

            #[must_use]
            pub fn into_string(self) -> String {
                self.0.into_owned()
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self::owned(s.to_string()))
            }
        }

        impl From<&'static str> for $name {
            fn from(s: &'static str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::owned(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl ::std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

mod chaincode;
mod network;
mod tx;

pub use chaincode::*;
pub use network::*;
pub use tx::*;
