// Record processing: sanitization and normalization

pub mod normalize;

pub use normalize::EventNormalizer;
