pub mod auth;
pub mod pagination;
pub mod users;

/// A type alias that represents any record's id field data type as issued by the
/// remote API. Aliased so that it's easy to change the underlying type if necessary.
pub type Id = String;
