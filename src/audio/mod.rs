pub mod adapter;
pub mod decoder;
pub mod engine;
