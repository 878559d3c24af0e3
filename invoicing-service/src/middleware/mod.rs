pub mod owner;

pub use owner::{OwnerContext, TokenVerifier};
