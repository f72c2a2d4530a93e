//! Query grammar engine for the broker's simple query language.
//!
//! An expression is a conjunction of terms (`attr op value`) joined by `;`:
//! - comparisons: `==`, `!=`, `>`, `<`, `>=`, `<=`
//! - value lists (OR within one attribute): `color==red,blue`
//! - ranges: `temperature==10..20`
//! - pattern matches: `name~=^Bo`
//!
//! Disjunction across attributes is not part of the grammar and is rejected.
//!
//! # Example
//!
//! ```ignore
//! let expr = QueryExpression::new()
//!     .and(Term::gt("temperature", 30))
//!     .and(Term::lt("temperature", 40));
//!
//! assert_eq!(compile(&expr)?, "temperature>30;temperature<40");
//! assert_eq!(parse("temperature>30;temperature<40")?, expr);
//! ```

mod compiler;
mod geo;
mod parser;
mod types;

pub use compiler::compile;
pub use geo::{GeoParams, GeoQuery, GeoRelation, Geometry};
pub use parser::parse;
pub use types::{Operand, Operator, QueryExpression, QueryValue, Term};
