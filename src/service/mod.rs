pub mod app_state;
pub mod credential;
pub mod provider;
pub mod settings;
pub mod storage;
pub mod workflow;
