//! Stream operators.

pub mod count;
pub mod filter;
pub mod join;
pub mod map;
pub mod pipe;
pub mod rate_limit;
pub mod repartition;
pub mod table;
pub mod throughput;

pub use count::CountByKey;
pub use filter::Filter;
pub use join::{
    KtableInnerJoin, KtableLeftJoin, KtableOuterJoin, StreamInnerJoin, StreamLeftJoin,
};
pub use map::{Emitter, FlatMap, MapValues};
pub use pipe::Pipe;
pub use rate_limit::RateLimiter;
pub use repartition::Repartition;
pub use table::Ktable;
pub use throughput::ThroughputLimiter;
