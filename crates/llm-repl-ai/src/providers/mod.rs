mod catalog;
mod openai_compat;

pub use catalog::{ProviderKind, ProviderProfile};
pub use openai_compat::{OpenAiCompatService, CHAT_COMPLETIONS_PATH, MODELS_PATH};
