use crate::Result;
use crate::error::TemplateError;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Largest list `range` will build.
const MAX_RANGE_LEN: usize = 1024;

/// Native implementation; receives its own name for error messages and
/// arguments whose count has already been checked.
type NativeFn = fn(&str, &[Value]) -> Result<Value>;

/// The built-in function table. Built once on first use and never mutated
/// afterwards, so lookups need no synchronization.
pub static FUNCTIONS: LazyLock<FunctionTable> = LazyLock::new(FunctionTable::builtin);

/// A built-in function callable from template expressions.
pub struct Function {
    /// Name as written in templates
    name: &'static str,
    /// Fewest arguments accepted
    min_args: usize,
    /// `None` for variadic functions
    max_args: Option<usize>,
    /// Runs after the arity check in [`Function::call`]
    call: NativeFn,
}

impl Function {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Checks the argument count, then runs the function.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        let got = args.len();
        let fits = got >= self.min_args && self.max_args.is_none_or(|max| got <= max);
        if !fits {
            return Err(TemplateError::ArityMismatch {
                name: self.name.to_string(),
                expected: self.expected_arity(),
                got,
            });
        }
        (self.call)(self.name, args)
    }

    fn expected_arity(&self) -> String {
        match self.max_args {
            Some(max) if max == self.min_args => max.to_string(),
            Some(max) => format!("{} to {}", self.min_args, max),
            None => format!("at least {}", self.min_args),
        }
    }
}

/// Name to function lookup, read-only after [`FUNCTIONS`] is built.
pub struct FunctionTable {
    functions: HashMap<&'static str, Function>,
}

impl FunctionTable {
    fn builtin() -> Self {
        let mut table = Self {
            functions: HashMap::new(),
        };
        table.register("upper", 1, Some(1), upper);
        table.register("lower", 1, Some(1), lower);
        table.register("title", 1, Some(1), title);
        table.register("trimspace", 1, Some(1), trimspace);
        table.register("replace", 3, Some(3), replace);
        table.register("substr", 3, Some(3), substr);
        table.register("join", 2, Some(2), join);
        table.register("split", 2, Some(2), split);
        table.register("length", 1, Some(1), length);
        table.register("format", 1, None, format);
        table.register("abs", 1, Some(1), abs);
        table.register("min", 1, None, min);
        table.register("max", 1, None, max);
        table.register("range", 1, Some(3), range);
        table.register("tostring", 1, Some(1), tostring);
        table.register("tonumber", 1, Some(1), tonumber);
        table
    }

    fn register(&mut self, name: &'static str, min_args: usize, max_args: Option<usize>, call: NativeFn) {
        self.functions.insert(
            name,
            Function {
                name,
                min_args,
                max_args,
                call,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    /// Sorted names of every registered function.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.functions.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

// --- argument helpers ---

fn arg_mismatch(name: &str, index: usize, expected: &str, got: &Value) -> TemplateError {
    TemplateError::TypeMismatch(format!(
        "{}: argument {} must be {}, got {}",
        name,
        index + 1,
        expected,
        got.type_name()
    ))
}

/// Argument helpers index `args` directly; arity is checked before any
/// native function runs.
fn str_arg<'v>(name: &str, args: &'v [Value], index: usize) -> Result<&'v str> {
    args[index]
        .as_str()
        .ok_or_else(|| arg_mismatch(name, index, "a string", &args[index]))
}

fn int_arg(name: &str, args: &[Value], index: usize) -> Result<i64> {
    match &args[index] {
        Value::Int(n) => Ok(*n),
        Value::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(*f as i64),
        other => Err(arg_mismatch(name, index, "a whole number", other)),
    }
}

fn list_arg<'v>(name: &str, args: &'v [Value], index: usize) -> Result<&'v [Value]> {
    match &args[index] {
        Value::List(items) => Ok(items),
        other => Err(arg_mismatch(name, index, "a tuple", other)),
    }
}

fn num_arg(name: &str, args: &[Value], index: usize) -> Result<Value> {
    match &args[index] {
        v @ (Value::Int(_) | Value::Float(_)) => Ok(v.clone()),
        other => Err(arg_mismatch(name, index, "a number", other)),
    }
}

// --- string functions ---

fn upper(name: &str, args: &[Value]) -> Result<Value> {
    Ok(Value::Str(str_arg(name, args, 0)?.to_uppercase()))
}

fn lower(name: &str, args: &[Value]) -> Result<Value> {
    Ok(Value::Str(str_arg(name, args, 0)?.to_lowercase()))
}

/// Upper-cases the first letter of every word.
fn title(name: &str, args: &[Value]) -> Result<Value> {
    let s = str_arg(name, args, 0)?;
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start && c.is_alphabetic() {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !c.is_alphanumeric();
    }
    Ok(Value::Str(out))
}

fn trimspace(name: &str, args: &[Value]) -> Result<Value> {
    Ok(Value::Str(str_arg(name, args, 0)?.trim().to_string()))
}

fn replace(name: &str, args: &[Value]) -> Result<Value> {
    let s = str_arg(name, args, 0)?;
    let search = str_arg(name, args, 1)?;
    let replacement = str_arg(name, args, 2)?;
    Ok(Value::Str(s.replace(search, replacement)))
}

/// `substr(s, offset, length)`, counted in characters. A negative offset
/// counts from the end; a length of -1 means "up to the end".
fn substr(name: &str, args: &[Value]) -> Result<Value> {
    let chars: Vec<char> = str_arg(name, args, 0)?.chars().collect();
    let offset = int_arg(name, args, 1)?;
    let length = int_arg(name, args, 2)?;
    let total = chars.len() as i64;

    let start = if offset < 0 { offset + total } else { offset };
    if start < 0 || start > total {
        return Err(TemplateError::invalid_argument(
            name,
            format!("offset {} is out of range for a string of length {}", offset, total),
        ));
    }
    let end = match length {
        -1 => total,
        n if n < 0 => {
            return Err(TemplateError::invalid_argument(
                name,
                "length must be -1 or a non-negative number",
            ));
        }
        n => start.saturating_add(n).min(total),
    };
    Ok(Value::Str(chars[start as usize..end as usize].iter().collect()))
}

fn join(name: &str, args: &[Value]) -> Result<Value> {
    let sep = str_arg(name, args, 0)?;
    let items = list_arg(name, args, 1)?;
    let parts = items
        .iter()
        .map(Value::to_output_string)
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::Str(parts.join(sep)))
}

fn split(name: &str, args: &[Value]) -> Result<Value> {
    let sep = str_arg(name, args, 0)?;
    let s = str_arg(name, args, 1)?;
    // An empty separator splits into characters.
    let parts: Vec<Value> = if sep.is_empty() {
        s.chars().map(|c| Value::Str(c.to_string())).collect()
    } else {
        s.split(sep).map(|part| Value::Str(part.to_string())).collect()
    };
    Ok(Value::List(parts))
}

fn length(name: &str, args: &[Value]) -> Result<Value> {
    let len = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.len(),
        other => return Err(arg_mismatch(name, 0, "a string or tuple", other)),
    };
    Ok(Value::Int(len as i64))
}

/// `format(pattern, args...)` with `%s`, `%d`, `%v`, `%t` and `%%`.
/// `%v` also prints tuples, e.g. `[1, "a"]`.
fn format(name: &str, args: &[Value]) -> Result<Value> {
    let pattern = str_arg(name, args, 0)?;
    let mut out = String::with_capacity(pattern.len());
    let mut next = 1;
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let verb = chars.next().ok_or_else(|| {
            TemplateError::invalid_argument(name, "format string ends with a lone '%'")
        })?;
        if verb == '%' {
            out.push('%');
            continue;
        }
        let arg = args.get(next).ok_or_else(|| {
            TemplateError::invalid_argument(name, format!("not enough arguments for %{}", verb))
        })?;
        match verb {
            'v' if matches!(arg, Value::List(_)) => out.push_str(&arg.to_string()),
            's' | 'v' => out.push_str(&arg.to_output_string()?),
            'd' => out.push_str(&int_arg(name, args, next)?.to_string()),
            't' => match arg {
                Value::Bool(b) => out.push_str(&b.to_string()),
                other => return Err(arg_mismatch(name, next, "a bool", other)),
            },
            other => {
                return Err(TemplateError::invalid_argument(
                    name,
                    format!("unsupported verb %{}", other),
                ));
            }
        }
        next += 1;
    }

    if next < args.len() {
        return Err(TemplateError::invalid_argument(
            name,
            format!("too many arguments; only {} used by the format string", next - 1),
        ));
    }
    Ok(Value::Str(out))
}

// --- numeric functions ---

fn abs(name: &str, args: &[Value]) -> Result<Value> {
    match num_arg(name, args, 0)? {
        Value::Int(n) => Ok(n
            .checked_abs()
            .map(Value::Int)
            .unwrap_or(Value::Float((n as f64).abs()))),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(arg_mismatch(name, 0, "a number", &other)),
    }
}

/// Shared body of `min`/`max`: keeps integers when every argument is one.
fn pick(name: &str, args: &[Value], prefer: fn(f64, f64) -> bool) -> Result<Value> {
    let mut best = num_arg(name, args, 0)?;
    let mut all_int = matches!(best, Value::Int(_));
    for index in 1..args.len() {
        let candidate = num_arg(name, args, index)?;
        all_int &= matches!(candidate, Value::Int(_));
        if let (Some(c), Some(b)) = (candidate.as_f64(), best.as_f64())
            && prefer(c, b)
        {
            best = candidate;
        }
    }
    if all_int {
        return Ok(best);
    }
    Ok(Value::Float(best.as_f64().unwrap_or(f64::NAN)))
}

fn min(name: &str, args: &[Value]) -> Result<Value> {
    pick(name, args, |candidate, best| candidate < best)
}

fn max(name: &str, args: &[Value]) -> Result<Value> {
    pick(name, args, |candidate, best| candidate > best)
}

/// `range(limit)`, `range(start, limit)` or `range(start, limit, step)`.
fn range(name: &str, args: &[Value]) -> Result<Value> {
    let ints = (0..args.len())
        .map(|i| int_arg(name, args, i))
        .collect::<Result<Vec<_>>>()?;
    let (start, limit, step) = match ints.as_slice() {
        [limit] => (0, *limit, 1),
        [start, limit] => (*start, *limit, if limit >= start { 1 } else { -1 }),
        [start, limit, step] => (*start, *limit, *step),
        _ => {
            return Err(TemplateError::invalid_argument(name, "expected 1 to 3 arguments"));
        }
    };
    if step == 0 {
        return Err(TemplateError::invalid_argument(name, "step must not be zero"));
    }

    let mut items = Vec::new();
    let mut current = start;
    while (step > 0 && current < limit) || (step < 0 && current > limit) {
        if items.len() == MAX_RANGE_LEN {
            return Err(TemplateError::invalid_argument(
                name,
                format!("more than {} values requested", MAX_RANGE_LEN),
            ));
        }
        items.push(Value::Int(current));
        current = match current.checked_add(step) {
            Some(n) => n,
            None => break,
        };
    }
    Ok(Value::List(items))
}

// --- conversions ---

fn tostring(name: &str, args: &[Value]) -> Result<Value> {
    match &args[0] {
        v if v.is_primitive() => Ok(Value::Str(v.to_output_string()?)),
        other => Err(arg_mismatch(name, 0, "a primitive value", other)),
    }
}

fn tonumber(name: &str, args: &[Value]) -> Result<Value> {
    match &args[0] {
        v @ (Value::Int(_) | Value::Float(_)) => Ok(v.clone()),
        Value::Str(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<i64>() {
                return Ok(Value::Int(n));
            }
            s.parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::Float)
                .ok_or_else(|| {
                    TemplateError::invalid_argument(name, format!("cannot parse {:?} as a number", s))
                })
        }
        other => Err(arg_mismatch(name, 0, "a string or number", other)),
    }
}
