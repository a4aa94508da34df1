pub mod aggregator;

pub use aggregator::{
    AggregatedSignal, AggregationError, EnsembleAggregator, EnsembleConfig, VotingStrategy,
};
