pub mod client;
pub mod solve;
pub mod types;

pub use client::GeminiHttpClient;
pub use solve::GeminiDocumentClient;
