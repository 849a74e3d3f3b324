//! Azure Cognitive Services speech backends.

pub mod messages;
mod recognizer;
mod synthesizer;

pub use recognizer::AzureRecognizer;
pub use synthesizer::AzureSynthesizer;
