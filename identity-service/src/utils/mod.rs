pub mod base32;
pub mod token;
pub mod validation;

pub use validation::ValidatedJson;
