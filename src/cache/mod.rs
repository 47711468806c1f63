pub mod layer;

pub use layer::CacheLayer;
