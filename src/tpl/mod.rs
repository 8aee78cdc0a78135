pub mod ast;
mod cache;
pub mod engine;
pub mod eval;
pub mod functions;
pub mod parser;
mod render;
pub mod session;
pub mod validate;
