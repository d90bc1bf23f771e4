//! Strongly-typed identifiers for domain entities
//!
//! Using newtype wrappers around UUIDs provides type safety and prevents
//! accidental mixing of different identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates a new time-ordered identifier (v7)
            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }

            /// Creates from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Returns the identifier prefix for display
            pub fn prefix() -> &'static str {
                $prefix
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                // Strip prefix if present
                let uuid_str = s.strip_prefix(concat!($prefix, "-")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(uuid_str)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

// Academic references owned by the surrounding application
define_id!(StudentId, "STU");
define_id!(EnrollmentId, "ENR");
define_id!(TermId, "TRM");
define_id!(ActorId, "USR");

// Fee catalog identifiers
define_id!(FeeCategoryId, "FCAT");
define_id!(FeeTemplateId, "FTPL");

// Ledger identifiers
define_id!(StudentFeeId, "SFEE");
define_id!(InvoiceId, "INV");
define_id!(InvoiceLineId, "INVL");
define_id!(PaymentId, "PAY");
define_id!(AdjustmentId, "ADJ");
define_id!(CarryoverId, "CRY");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_student_id_display() {
        let id = StudentId::new();
        let display = id.to_string();
        assert!(display.starts_with("STU-"));
    }

    #[test]
    fn test_id_parsing() {
        let original = StudentId::new();
        let parsed: StudentId = original.to_string().parse().unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_uuid_conversion() {
        let uuid = Uuid::new_v4();
        let student_id = StudentId::from(uuid);
        let back: Uuid = student_id.into();
        assert_eq!(uuid, back);
    }

    #[test]
    fn test_v7_ids_sort_in_creation_order() {
        let first = PaymentId::new_v7();
        let second = PaymentId::new_v7();
        assert!(first < second);
    }
}
