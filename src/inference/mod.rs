pub mod device;
pub mod loader;
pub mod models;
pub mod pretrained;
pub mod qa_pipeline;
pub mod task;
pub mod tokenizer;
