//! API request handlers

mod delegations;
mod health;
mod requests;
mod scan;
mod templates;

pub use delegations::*;
pub use health::*;
pub use requests::*;
pub use scan::*;
pub use templates::*;
