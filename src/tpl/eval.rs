use crate::Result;
use crate::error::TemplateError;
use crate::tpl::ast::{BinOp, Expr, ExprKind, UnaryOp};
use crate::tpl::session::Session;
use crate::value::Value;
use std::cmp::Ordering;

/// Evaluates an expression against a session.
///
/// Errors are annotated with the offset of the innermost expression that
/// raised them. The session is only read.
pub fn eval(expr: &Expr, session: &Session) -> Result<Value> {
    eval_kind(&expr.node, session).map_err(|e| e.at(expr.span.start))
}

fn eval_kind(kind: &ExprKind, session: &Session) -> Result<Value> {
    match kind {
        ExprKind::Literal(v) => Ok(v.clone()),
        ExprKind::Var(name) => session
            .lookup(name)
            .cloned()
            .ok_or_else(|| TemplateError::UndefinedVariable(name.clone())),
        ExprKind::Tuple(items) => items
            .iter()
            .map(|item| eval(item, session))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        ExprKind::Unary(op, operand) => {
            let v = eval(operand, session)?;
            eval_unary(*op, v)
        }
        ExprKind::Binary(op @ (BinOp::And | BinOp::Or), left, right) => {
            let l = expect_bool(&eval(left, session)?, op.symbol())?;
            // Short-circuit: the right side is only evaluated when needed.
            match (op, l) {
                (BinOp::And, false) => Ok(Value::Bool(false)),
                (BinOp::Or, true) => Ok(Value::Bool(true)),
                _ => Ok(Value::Bool(expect_bool(&eval(right, session)?, op.symbol())?)),
            }
        }
        ExprKind::Binary(op, left, right) => {
            let l = eval(left, session)?;
            let r = eval(right, session)?;
            eval_binary(*op, &l, &r)
        }
        ExprKind::Conditional(test, then, otherwise) => {
            if expect_bool(&eval(test, session)?, "conditional")? {
                eval(then, session)
            } else {
                eval(otherwise, session)
            }
        }
        ExprKind::Index(collection, index) => {
            let collection = eval(collection, session)?;
            let index = eval(index, session)?;
            eval_index(collection, &index)
        }
        ExprKind::Call(name, args) => {
            let function = session
                .function(name)
                .ok_or_else(|| TemplateError::UnknownFunction(name.clone()))?;
            let args = args
                .iter()
                .map(|arg| eval(arg, session))
                .collect::<Result<Vec<_>>>()?;
            function.call(&args)
        }
    }
}

fn expect_bool(v: &Value, context: &str) -> Result<bool> {
    match v {
        Value::Bool(b) => Ok(*b),
        other => Err(TemplateError::TypeMismatch(format!(
            "{} requires a bool, got {}",
            context,
            other.type_name()
        ))),
    }
}

fn eval_unary(op: UnaryOp, v: Value) -> Result<Value> {
    match (op, v) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!expect_bool(&v, "!")?)),
        (UnaryOp::Neg, Value::Int(n)) => Ok(n
            .checked_neg()
            .map(Value::Int)
            .unwrap_or(Value::Float(-(n as f64)))),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, other) => Err(TemplateError::type_mismatch("a number", other.type_name())),
    }
}

fn eval_binary(op: BinOp, l: &Value, r: &Value) -> Result<Value> {
    match op {
        BinOp::Eq => Ok(Value::Bool(values_equal(l, r))),
        BinOp::Ne => Ok(Value::Bool(!values_equal(l, r))),
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
            let ordering = compare_numbers(op, l, r)?;
            Ok(Value::Bool(match op {
                BinOp::Lt => ordering == Ordering::Less,
                BinOp::Gt => ordering == Ordering::Greater,
                BinOp::Le => ordering != Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => arithmetic(op, l, r),
        BinOp::And => Ok(Value::Bool(expect_bool(l, "&&")? && expect_bool(r, "&&")?)),
        BinOp::Or => Ok(Value::Bool(expect_bool(l, "||")? || expect_bool(r, "||")?)),
    }
}

/// Numbers compare by value across int/float; everything else structurally.
/// Values of different kinds are simply unequal.
fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => l.as_f64() == r.as_f64(),
        _ => l == r,
    }
}

fn number_operands_mismatch(op: BinOp, l: &Value, r: &Value) -> TemplateError {
    TemplateError::TypeMismatch(format!(
        "operator {} requires numbers, got {} and {}",
        op.symbol(),
        l.type_name(),
        r.type_name()
    ))
}

fn compare_numbers(op: BinOp, l: &Value, r: &Value) -> Result<Ordering> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let (a, b) = (l.as_f64().unwrap_or(f64::NAN), r.as_f64().unwrap_or(f64::NAN));
            a.partial_cmp(&b).ok_or_else(|| {
                TemplateError::Arithmetic(format!("cannot compare {} and {}", a, b))
            })
        }
        _ => Err(number_operands_mismatch(op, l, r)),
    }
}

/// Integer operands stay integers, except for `/` which always yields a
/// float. Any float operand promotes the result to float, as does an
/// integer overflow.
fn arithmetic(op: BinOp, l: &Value, r: &Value) -> Result<Value> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => int_arithmetic(op, *a, *b),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => float_arithmetic(
            op,
            l.as_f64().unwrap_or(f64::NAN),
            r.as_f64().unwrap_or(f64::NAN),
        ),
        _ => Err(number_operands_mismatch(op, l, r)),
    }
}

fn int_arithmetic(op: BinOp, a: i64, b: i64) -> Result<Value> {
    let checked = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Mod => {
            if b == 0 {
                return Err(TemplateError::Arithmetic("modulo by zero".to_string()));
            }
            // i64::MIN % -1 overflows; the mathematical answer is 0.
            Some(a.checked_rem(b).unwrap_or(0))
        }
        _ => None,
    };
    match checked {
        Some(n) => Ok(Value::Int(n)),
        None => float_arithmetic(op, a as f64, b as f64),
    }
}

fn float_arithmetic(op: BinOp, a: f64, b: f64) -> Result<Value> {
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div if b == 0.0 => {
            return Err(TemplateError::Arithmetic("division by zero".to_string()));
        }
        BinOp::Mod if b == 0.0 => {
            return Err(TemplateError::Arithmetic("modulo by zero".to_string()));
        }
        BinOp::Div => a / b,
        BinOp::Mod => a % b,
        other => {
            return Err(TemplateError::TypeMismatch(format!(
                "operator {} is not arithmetic",
                other.symbol()
            )));
        }
    };
    if !result.is_finite() {
        return Err(TemplateError::Arithmetic(format!(
            "result of {} {} {} is not a finite number",
            a,
            op.symbol(),
            b
        )));
    }
    Ok(Value::Float(result))
}

fn eval_index(collection: Value, index: &Value) -> Result<Value> {
    let mut items = match collection {
        Value::List(items) => items,
        other => return Err(TemplateError::type_mismatch("a tuple to index", other.type_name())),
    };
    let position = match index {
        Value::Int(n) => *n,
        Value::Float(f) if f.fract() == 0.0 => *f as i64,
        other => return Err(TemplateError::type_mismatch("a whole number index", other.type_name())),
    };
    let len = items.len();
    match usize::try_from(position) {
        Ok(i) if i < len => Ok(items.swap_remove(i)),
        _ => Err(TemplateError::invalid_argument(
            "index",
            format!("index {} is out of range for a tuple of length {}", position, len),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::tpl::functions::FUNCTIONS;
    use crate::tpl::parser::parse_expr;
    use crate::tpl::validate::{Vars, validate};
    use std::collections::HashMap;

    fn vars() -> Vars {
        let mut map = HashMap::new();
        map.insert("a".to_string(), Value::Int(10));
        map.insert("b".to_string(), Value::Bool(true));
        map.insert("s".to_string(), Value::from("hello"));
        map.insert("f".to_string(), Value::Float(1.5));
        validate(map).unwrap()
    }

    fn run(src: &str) -> Result<Value> {
        let vars = vars();
        let session = Session::new(&vars, &FUNCTIONS);
        eval(&parse_expr(src).unwrap(), &session)
    }

    #[test]
    fn test_integer_arithmetic_stays_integer() {
        assert_eq!(run("1+2+3").unwrap(), Value::Int(6));
        assert_eq!(run("a * 2 - 5").unwrap(), Value::Int(15));
        assert_eq!(run("7 % 3").unwrap(), Value::Int(1));
        assert_eq!(run("-a").unwrap(), Value::Int(-10));
    }

    #[test]
    fn test_division_promotes_to_float() {
        assert_eq!(run("10 / 4").unwrap(), Value::Float(2.5));
        assert_eq!(run("4 / 2").unwrap(), Value::Float(2.0));
    }

    #[test]
    fn test_mixed_arithmetic_promotes_to_float() {
        assert_eq!(run("a + f").unwrap(), Value::Float(11.5));
        assert_eq!(run("2 * 0.5").unwrap(), Value::Float(1.0));
    }

    #[test]
    fn test_overflow_promotes_to_float() {
        assert_eq!(
            run("9223372036854775807 + 1").unwrap(),
            Value::Float(9223372036854775808.0)
        );
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(run("1 / 0").unwrap_err().kind(), ErrorKind::Arithmetic);
        assert_eq!(run("1 % 0").unwrap_err().kind(), ErrorKind::Arithmetic);
    }

    #[test]
    fn test_modulo_by_zero_names_modulo() {
        for src in ["7 % 0", "7.5 % 0", "7 % 0.0"] {
            let err = run(src).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Arithmetic);
            assert!(err.to_string().contains("modulo by zero"), "{}: {}", src, err);
        }
        assert!(run("1.5 / 0").unwrap_err().to_string().contains("division by zero"));
    }

    #[test]
    fn test_string_addition_is_type_mismatch() {
        let err = run(r#""a" + "b""#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        let err = run("s + 1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(run("a > 5").unwrap(), Value::Bool(true));
        assert_eq!(run("a <= 9").unwrap(), Value::Bool(false));
        assert_eq!(run("a == 10.0").unwrap(), Value::Bool(true));
        assert_eq!(run(r#"s == "hello""#).unwrap(), Value::Bool(true));
        assert_eq!(run(r#"s != 1"#).unwrap(), Value::Bool(true));
        assert_eq!(run(r#"s < 1"#).unwrap_err().kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_logic_short_circuits() {
        assert_eq!(run("b && a > 1").unwrap(), Value::Bool(true));
        assert_eq!(run("!b || missing").unwrap_err().kind(), ErrorKind::UndefinedVariable);
        assert_eq!(run("b || missing").unwrap(), Value::Bool(true));
        assert_eq!(run("!b && missing").unwrap(), Value::Bool(false));
        assert_eq!(run("a && b").unwrap_err().kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_conditional() {
        assert_eq!(run(r#"b ? "yes" : "no""#).unwrap(), Value::from("yes"));
        assert_eq!(run(r#"a ? 1 : 2"#).unwrap_err().kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_tuple_and_index() {
        assert_eq!(
            run(r#"["x", a]"#).unwrap(),
            Value::List(vec![Value::from("x"), Value::Int(10)])
        );
        assert_eq!(run(r#"["x", "y"][1]"#).unwrap(), Value::from("y"));
        assert_eq!(run(r#"["x"][3]"#).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(run("s[0]").unwrap_err().kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_undefined_variable_has_offset() {
        let err = run("a + nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UndefinedVariable);
        assert_eq!(err.offset(), Some(4));
    }

    #[test]
    fn test_function_calls() {
        assert_eq!(run(r#"replace(s, "ello", "i")"#).unwrap(), Value::from("hi"));
        assert_eq!(run("upper(s)").unwrap(), Value::from("HELLO"));
        assert_eq!(run("nope(s)").unwrap_err().kind(), ErrorKind::UnknownFunction);
        assert_eq!(run("upper(s, s)").unwrap_err().kind(), ErrorKind::ArityMismatch);
        assert_eq!(run("upper(a)").unwrap_err().kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_eval_does_not_touch_session() {
        let vars = vars();
        let session = Session::new(&vars, &FUNCTIONS);
        let expr = parse_expr("a + 1").unwrap();
        assert_eq!(eval(&expr, &session).unwrap(), Value::Int(11));
        assert_eq!(eval(&expr, &session).unwrap(), Value::Int(11));
        assert_eq!(session.lookup("a"), Some(&Value::Int(10)));
    }
}
