/// Recognizes lock cells in read results.
pub mod detection;
/// Cleans up locks left by other transactions.
pub mod resolution;
