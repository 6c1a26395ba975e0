pub mod audit;
pub mod client;
pub mod consent;
pub mod flow;
pub mod idp;
pub mod keys;
pub mod oidc;
pub mod session;
pub mod tenant;
pub mod user;

pub use audit::*;
pub use client::*;
pub use consent::*;
pub use flow::*;
pub use idp::*;
pub use keys::*;
pub use oidc::*;
pub use session::*;
pub use tenant::*;
pub use user::*;
