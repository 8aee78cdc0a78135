use crate::Result;
use crate::error::TemplateError;
use crate::tpl::ast::{Node, NodeKind};
use crate::tpl::eval::eval;
use crate::tpl::session::Session;
use crate::value::Value;

/// Renders `nodes` in document order, appending to `out`.
///
/// Errors carry the offset of the node (or inner expression) that raised
/// them. Loop bindings are pushed onto the session for the body only and
/// popped afterwards, including when the body fails.
pub(crate) fn render(nodes: &[Node], session: &mut Session, out: &mut String) -> Result<()> {
    for node in nodes {
        render_node(node, session, out).map_err(|e| e.at(node.span.start))?;
    }
    Ok(())
}

fn render_node(node: &Node, session: &mut Session, out: &mut String) -> Result<()> {
    match &node.node {
        NodeKind::Text(t) => out.push_str(t),
        NodeKind::Interpolation(expr) => {
            let value = eval(expr, session)?;
            let text = value.to_output_string().map_err(|e| e.at(expr.span.start))?;
            out.push_str(&text);
        }
        NodeKind::For {
            key,
            value,
            collection,
            body,
        } => {
            let items = match eval(collection, session)? {
                Value::List(items) => items,
                other => {
                    return Err(TemplateError::TypeMismatch(format!(
                        "for directive requires a tuple, got {}",
                        other.type_name()
                    ))
                    .at(collection.span.start));
                }
            };

            for (i, item) in items.into_iter().enumerate() {
                if let Some(key) = key {
                    session.push(key, Value::Int(i as i64));
                }
                session.push(value, item);
                let result = render(body, session, out);
                session.pop();
                if key.is_some() {
                    session.pop();
                }
                result?;
            }
        }
        NodeKind::If {
            test,
            then_body,
            else_body,
        } => {
            let branch = match eval(test, session)? {
                Value::Bool(true) => then_body,
                Value::Bool(false) => else_body,
                other => {
                    return Err(TemplateError::TypeMismatch(format!(
                        "if directive requires a bool, got {}",
                        other.type_name()
                    ))
                    .at(test.span.start));
                }
            };
            render(branch, session, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::tpl::functions::FUNCTIONS;
    use crate::tpl::parser::parse_template;
    use crate::tpl::validate::validate;
    use std::collections::HashMap;

    fn render_str(tpl: &str, pairs: Vec<(&str, Value)>) -> Result<String> {
        let vars = validate(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())?;
        let template = parse_template(tpl)?;
        let mut session = Session::new(&vars, &FUNCTIONS);
        let mut out = String::new();
        render(&template.nodes, &mut session, &mut out)?;
        Ok(out)
    }

    #[test]
    fn test_render_text_and_interpolation() {
        let out = render_str("Hello, ${name}! ${n + 1}", vec![
            ("name", Value::from("web")),
            ("n", Value::Int(1)),
        ])
        .unwrap();
        assert_eq!(out, "Hello, web! 2");
    }

    #[test]
    fn test_render_for_in_order() {
        let out = render_str(r#"%{ for x in ["a", "b", "c"] }${x};%{ endfor }"#, vec![]).unwrap();
        assert_eq!(out, "a;b;c;");
    }

    #[test]
    fn test_render_for_with_index() {
        let out = render_str(r#"%{ for i, x in ["a", "b"] }${i}=${x} %{ endfor }"#, vec![]).unwrap();
        assert_eq!(out, "0=a 1=b ");
    }

    #[test]
    fn test_render_empty_collection() {
        let out = render_str("[%{ for x in [] }${x}%{ endfor }]", vec![]).unwrap();
        assert_eq!(out, "[]");
    }

    #[test]
    fn test_loop_variable_shadows_and_restores() {
        let out = render_str(
            r#"${x}%{ for x in ["in"] }${x}%{ endfor }${x}"#,
            vec![("x", Value::from("out"))],
        )
        .unwrap();
        assert_eq!(out, "outinout");
    }

    #[test]
    fn test_nested_loops() {
        let out = render_str(
            r#"%{ for a in [1, 2] }%{ for b in ["x", "y"] }${a}${b} %{ endfor }%{ endfor }"#,
            vec![],
        )
        .unwrap();
        assert_eq!(out, "1x 1y 2x 2y ");
    }

    #[test]
    fn test_if_else() {
        let tpl = "%{ if n > 1 }many%{ else }one%{ endif }";
        assert_eq!(render_str(tpl, vec![("n", Value::Int(2))]).unwrap(), "many");
        assert_eq!(render_str(tpl, vec![("n", Value::Int(1))]).unwrap(), "one");
        assert_eq!(render_str("%{ if false }x%{ endif }", vec![]).unwrap(), "");
    }

    #[test]
    fn test_loop_over_non_tuple() {
        let err = render_str("ab%{ for x in s }${x}%{ endfor }", vec![("s", Value::from("str"))])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(err.offset(), Some(14));
    }

    #[test]
    fn test_interpolating_a_tuple_fails() {
        let err = render_str(r#"x${["a"]}"#, vec![]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(err.offset(), Some(3));
    }

    #[test]
    fn test_error_in_loop_body_unwinds_bindings() {
        let vars = validate(HashMap::new()).unwrap();
        let template = parse_template(r#"%{ for x in [1, 0] }${10 % x}%{ endfor }"#).unwrap();
        let mut session = Session::new(&vars, &FUNCTIONS);
        let mut out = String::new();
        let err = render(&template.nodes, &mut session, &mut out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Arithmetic);
        assert_eq!(session.lookup("x"), None);
    }
}
