pub mod address;
pub mod archive;
pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod incident;
pub mod logging;
pub mod message;
pub mod policy;
pub mod proxy;
pub mod relay;
pub mod statistics;

pub use address::NormalizedAddress;
pub use config::Config;
pub use correlation::CorrelationId;
pub use dispatch::{ActionPlan, DispatchReport};
pub use message::Envelope;
pub use policy::{evaluate, Evaluation, Outcome, PolicyLists};
pub use proxy::{Invocation, InvocationReport};
