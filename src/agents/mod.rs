mod claude;
pub mod likelihood;
mod openai;
mod provider;

pub use claude::ClaudeAdapter;
pub use likelihood::AiLikelihood;
pub use openai::OpenAiAdapter;
pub use provider::*;
