pub mod error;
pub mod tpl;
pub mod value;

pub use error::{ErrorKind, TemplateError};
pub use tpl::ast::Template;
pub use tpl::engine::{ENGINE, Engine, EngineOptions, render, render_vars};
pub use tpl::functions::FUNCTIONS;
pub use tpl::parser::parse_template;
pub use tpl::validate::{Vars, validate};
pub use value::Value;

pub type Result<T> = std::result::Result<T, TemplateError>;
