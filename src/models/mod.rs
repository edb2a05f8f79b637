pub mod health;
pub mod error;
pub mod callback;
pub mod messages;

pub use health::*;
pub use error::*;
pub use callback::*;
pub use messages::*;
