pub mod long_short;

pub use long_short::LongShortFeed;
