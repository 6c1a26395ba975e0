pub mod captcha;
pub mod engine;
pub mod signals;

pub use engine::{FlowEngine, FlowResult};
