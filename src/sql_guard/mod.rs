//! SQL safety gate: identifier classification, lexical extraction and the
//! read-only safety validator that stands between generated SQL and the
//! warehouse.

pub mod classifier;
pub mod lexical;
pub mod validator;

pub use classifier::{classify, IdentifierKind};
pub use lexical::{extract, JoinInfo, JoinType, SqlReferences};
pub use validator::{validate, RuleId, Verdict};
