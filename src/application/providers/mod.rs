pub mod pool;

pub use pool::{DecisionProviderPool, FanOut, ProviderPoolConfig};
