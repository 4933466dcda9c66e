//! Wire types for the subset of the Model Context Protocol this server speaks.

mod content;
mod initialization;
mod jsonrpc;
mod requests;
mod tools;

pub use content::*;
pub use initialization::*;
pub use jsonrpc::*;
pub use requests::*;
pub use tools::*;
