use crate::Result;
use crate::tpl::ast::Template;
use crate::tpl::cache::TemplateCache;
use crate::tpl::functions::FUNCTIONS;
use crate::tpl::parser::parse_template;
use crate::tpl::render;
use crate::tpl::session::Session;
use crate::tpl::validate::validate;
use crate::value::Value;
use crate::value::serializer::to_vars;
use log::debug;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

/// The default engine behind [`render`] and [`render_vars`].
pub static ENGINE: LazyLock<Engine> = LazyLock::new(Engine::new);

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Keep parsed templates keyed by their text and reuse them across renders.
    pub cache_templates: bool,
    /// Maximum number of cached templates; the cache is emptied when full.
    pub cache_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            cache_templates: true,
            cache_capacity: 1024,
        }
    }
}

/// Renders templates against flat sets of primitive variables.
///
/// An `Engine` holds no per-render state: every call validates its own
/// variables and renders with its own session. The parsed-template cache
/// and the function table are the only shared structures, and both are
/// read-only once an entry exists. An engine can therefore be shared
/// freely between threads.
pub struct Engine {
    options: EngineOptions,
    /// Unused when `options.cache_templates` is off
    cache: TemplateCache,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_options(EngineOptions::default())
    }

    pub fn with_options(options: EngineOptions) -> Self {
        let cache = TemplateCache::new(options.cache_capacity);
        Self { options, cache }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Parses `template`, reusing the cached AST when caching is enabled.
    pub fn compile(&self, template: &str) -> Result<Arc<Template>> {
        if self.options.cache_templates {
            self.cache.get_or_parse(template)
        } else {
            Ok(Arc::new(parse_template(template)?))
        }
    }

    /// Renders `template` with variables taken from any serializable map or
    /// struct.
    ///
    /// # Errors
    /// Returns `SerializationError` when `vars` is not a map or struct,
    /// `NonPrimitiveVariable` when any variable is a list, map or null,
    /// `SyntaxError` for malformed templates, and an evaluation error
    /// (`UndefinedVariable`, `TypeMismatch`, ...) when rendering fails.
    /// No partial output is ever returned.
    pub fn render<T: Serialize + ?Sized>(&self, template: &str, vars: &T) -> Result<String> {
        let vars = to_vars(vars)?;
        self.render_vars(template, vars)
    }

    /// Renders `template` with variables that are already [`Value`]s.
    pub fn render_vars(&self, template: &str, vars: HashMap<String, Value>) -> Result<String> {
        let start = Instant::now();
        let var_count = vars.len();
        let result = self.render_validated(template, vars);
        let elapsed = start.elapsed().as_micros();

        match &result {
            Ok(out) => debug!(
                "Render: template_len={}, vars={}, elapsed={}us, output_len={}",
                template.len(),
                var_count,
                elapsed,
                out.len()
            ),
            Err(e) => debug!(
                "Render: template_len={}, vars={}, elapsed={}us, error={:?}",
                template.len(),
                var_count,
                elapsed,
                e
            ),
        }

        result
    }

    fn render_validated(&self, template: &str, vars: HashMap<String, Value>) -> Result<String> {
        // Variables are checked before the template is even parsed.
        let vars = validate(vars)?;
        let ast = self.compile(template)?;

        let mut session = Session::new(&vars, &FUNCTIONS);
        let mut out = String::with_capacity(template.len());
        render::render(&ast.nodes, &mut session, &mut out)?;
        Ok(out)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cached_templates(&self) -> usize {
        self.cache.len()
    }
}

/// Renders `template` with the default engine.
///
/// ```rust
/// use std::collections::HashMap;
///
/// let mut vars = HashMap::new();
/// vars.insert("a", "hello");
/// let out = utpl::render(r#"${replace(a, "ello", "i")}"#, &vars).unwrap();
/// assert_eq!(out, "hi");
/// ```
pub fn render<T: Serialize + ?Sized>(template: &str, vars: &T) -> Result<String> {
    ENGINE.render(template, vars)
}

/// Renders `template` with the default engine and pre-built [`Value`]s.
pub fn render_vars(template: &str, vars: HashMap<String, Value>) -> Result<String> {
    ENGINE.render_vars(template, vars)
}
