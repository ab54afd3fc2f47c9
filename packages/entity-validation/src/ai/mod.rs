//! Remote judge transports.

pub mod openai;

pub use openai::OpenAIJudge;
