pub mod adapters;
pub mod cost;
pub mod credentials;
pub mod error;
pub mod prompts;
pub mod provider;
pub mod types;
pub mod validator;
