use crate::Result;
use crate::error::TemplateError;
use crate::tpl::ast::{BinOp, Expr, ExprKind, Node, NodeKind, Span, Spanned, Template, UnaryOp};
use crate::value::Value;

/// Deepest expression nesting accepted before the parser gives up. Every
/// operator fold and index in a chain counts as one level, so the AST never
/// gets deeper than this.
const MAX_EXPR_DEPTH: usize = 128;

/// Deepest `%{ for }` / `%{ if }` nesting accepted.
const MAX_BLOCK_DEPTH: usize = 100;

/// An open `%{ for }` or `%{ if }` block waiting for its closing directive.
enum BlockFrame {
    For {
        /// Offset of the opening `%{`
        start: usize,
        key: Option<String>,
        value: String,
        collection: Expr,
    },
    If {
        /// Offset of the opening `%{`
        start: usize,
        test: Expr,
        /// Filled in once `%{ else }` has been seen.
        then_body: Option<Vec<Node>>,
    },
}

impl BlockFrame {
    fn start(&self) -> usize {
        match self {
            BlockFrame::For { start, .. } | BlockFrame::If { start, .. } => *start,
        }
    }

    fn opener(&self) -> &'static str {
        match self {
            BlockFrame::For { .. } => "for",
            BlockFrame::If { .. } => "if",
        }
    }
}

/// A hand-written parser for the template language.
///
/// It supports:
/// - Plain text, with `$${` and `%%{` escaping the markers
/// - Interpolation: `${ expr }`
/// - Iteration: `%{ for x in expr }...%{ endfor }` (also `for i, x in ...`)
/// - Conditionals: `%{ if expr }...%{ else }...%{ endif }`
/// - Strip markers: `${~`, `~}`, `%{~` trim neighbouring whitespace
///
/// Nested blocks are tracked with a stack of node lists, one per open block.
struct Parser<'a> {
    /// Source text being parsed
    template: &'a str,
    /// Byte offset of the next unread character
    pos: usize,
    /// The first element is always the root-level nodes.
    nodes_stack: Vec<Vec<Node>>,
    /// Open blocks, innermost last; bounded by `MAX_BLOCK_DEPTH`
    block_stack: Vec<BlockFrame>,
    /// Set by a `~}` marker: the next literal loses its leading whitespace.
    strip_next: bool,
}

impl<'a> Parser<'a> {
    fn new(template: &'a str) -> Self {
        Self {
            template,
            pos: 0,
            nodes_stack: vec![Vec::new()],
            block_stack: Vec::new(),
            strip_next: false,
        }
    }

    fn parse(mut self) -> Result<Template> {
        while self.pos < self.template.len() {
            if self.try_parse_escape() || self.try_parse_interpolation()? || self.try_parse_directive()? {
                continue;
            }
            self.parse_text();
        }

        if let Some(frame) = self.block_stack.last() {
            return Err(TemplateError::syntax(
                frame.start(),
                format!("unclosed %{{ {} }} directive", frame.opener()),
            ));
        }

        Ok(Template {
            nodes: self.nodes_stack.pop().unwrap_or_default(),
        })
    }

    /// `$${` and `%%{` render as the literal markers.
    fn try_parse_escape(&mut self) -> bool {
        let remaining = &self.template[self.pos..];
        for (escape, literal) in [("$${", "${"), ("%%{", "%{")] {
            if remaining.starts_with(escape) {
                let start = self.pos;
                self.pos += escape.len();
                self.append_text(literal, start);
                return true;
            }
        }
        false
    }

    fn try_parse_interpolation(&mut self) -> Result<bool> {
        if !self.template[self.pos..].starts_with("${") {
            return Ok(false);
        }
        let start = self.pos;
        let mut cursor = ExprParser::new(self.template, start + 2);
        if cursor.eat_raw("~") {
            self.strip_trailing_whitespace();
        }

        let expr = cursor.parse_expr()?;
        let strip_after = self.close_brace(&mut cursor, start, "interpolation")?;

        self.pos = cursor.pos;
        self.append_node(Spanned::new(
            NodeKind::Interpolation(expr),
            Span::new(start, self.pos),
        ));
        self.strip_next = strip_after;
        Ok(true)
    }

    fn try_parse_directive(&mut self) -> Result<bool> {
        if !self.template[self.pos..].starts_with("%{") {
            return Ok(false);
        }
        let start = self.pos;
        let mut cursor = ExprParser::new(self.template, start + 2);
        if cursor.eat_raw("~") {
            self.strip_trailing_whitespace();
        }

        cursor.skip_ws();
        let keyword_pos = cursor.pos;
        let keyword = cursor
            .ident()
            .ok_or_else(|| TemplateError::syntax(keyword_pos, "expected a directive keyword"))?;

        match keyword.as_str() {
            "for" => self.open_for(&mut cursor, start)?,
            "endfor" => self.close_for(&mut cursor, start)?,
            "if" => self.open_if(&mut cursor, start)?,
            "else" => self.handle_else(&mut cursor, start)?,
            "endif" => self.close_if(&mut cursor, start)?,
            other => {
                return Err(TemplateError::syntax(
                    keyword_pos,
                    format!("unknown directive '{}'", other),
                ));
            }
        }
        Ok(true)
    }

    fn open_for(&mut self, cursor: &mut ExprParser, start: usize) -> Result<()> {
        self.check_block_depth(start)?;
        let first = cursor.expect_ident("loop variable name")?;
        let (key, value) = if cursor.eat(",") {
            (Some(first), cursor.expect_ident("loop variable name")?)
        } else {
            (None, first)
        };

        cursor.skip_ws();
        let in_pos = cursor.pos;
        if cursor.ident().as_deref() != Some("in") {
            return Err(TemplateError::syntax(in_pos, "expected 'in' in for directive"));
        }

        let collection = cursor.parse_expr()?;
        let strip_after = self.close_brace(cursor, start, "for directive")?;

        self.pos = cursor.pos;
        self.block_stack.push(BlockFrame::For {
            start,
            key,
            value,
            collection,
        });
        self.nodes_stack.push(Vec::new());
        self.strip_next = strip_after;
        Ok(())
    }

    fn close_for(&mut self, cursor: &mut ExprParser, start: usize) -> Result<()> {
        let strip_after = self.close_brace(cursor, start, "endfor directive")?;
        let (block_start, key, value, collection) = match self.block_stack.pop() {
            Some(BlockFrame::For {
                start,
                key,
                value,
                collection,
            }) => (start, key, value, collection),
            other => {
                self.block_stack.extend(other);
                return Err(self.unexpected_closer(start, "endfor"));
            }
        };

        let body = self.nodes_stack.pop().unwrap_or_default();
        self.pos = cursor.pos;
        self.append_node(Spanned::new(
            NodeKind::For {
                key,
                value,
                collection,
                body,
            },
            Span::new(block_start, self.pos),
        ));
        self.strip_next = strip_after;
        Ok(())
    }

    fn open_if(&mut self, cursor: &mut ExprParser, start: usize) -> Result<()> {
        self.check_block_depth(start)?;
        let test = cursor.parse_expr()?;
        let strip_after = self.close_brace(cursor, start, "if directive")?;

        self.pos = cursor.pos;
        self.block_stack.push(BlockFrame::If {
            start,
            test,
            then_body: None,
        });
        self.nodes_stack.push(Vec::new());
        self.strip_next = strip_after;
        Ok(())
    }

    fn check_block_depth(&self, start: usize) -> Result<()> {
        if self.block_stack.len() >= MAX_BLOCK_DEPTH {
            return Err(TemplateError::syntax(
                start,
                format!("directives nested deeper than {} levels", MAX_BLOCK_DEPTH),
            ));
        }
        Ok(())
    }

    fn handle_else(&mut self, cursor: &mut ExprParser, start: usize) -> Result<()> {
        let strip_after = self.close_brace(cursor, start, "else directive")?;
        let then_nodes = match self.block_stack.last() {
            Some(BlockFrame::If {
                then_body: None, ..
            }) => self.nodes_stack.pop().unwrap_or_default(),
            _ => return Err(self.unexpected_closer(start, "else")),
        };
        if let Some(BlockFrame::If { then_body, .. }) = self.block_stack.last_mut() {
            *then_body = Some(then_nodes);
        }

        self.pos = cursor.pos;
        self.nodes_stack.push(Vec::new());
        self.strip_next = strip_after;
        Ok(())
    }

    fn close_if(&mut self, cursor: &mut ExprParser, start: usize) -> Result<()> {
        let strip_after = self.close_brace(cursor, start, "endif directive")?;
        let (block_start, test, then_body) = match self.block_stack.pop() {
            Some(BlockFrame::If {
                start,
                test,
                then_body,
            }) => (start, test, then_body),
            other => {
                self.block_stack.extend(other);
                return Err(self.unexpected_closer(start, "endif"));
            }
        };

        let last = self.nodes_stack.pop().unwrap_or_default();
        let (then_body, else_body) = match then_body {
            Some(then_body) => (then_body, last),
            None => (last, Vec::new()),
        };

        self.pos = cursor.pos;
        self.append_node(Spanned::new(
            NodeKind::If {
                test,
                then_body,
                else_body,
            },
            Span::new(block_start, self.pos),
        ));
        self.strip_next = strip_after;
        Ok(())
    }

    /// Consumes an optional `~` and the closing `}` of a marker.
    /// Returns whether a strip marker was present.
    fn close_brace(&self, cursor: &mut ExprParser, start: usize, what: &str) -> Result<bool> {
        cursor.skip_ws();
        let strip = cursor.eat_raw("~");
        if cursor.eat_raw("}") {
            return Ok(strip);
        }
        if cursor.at_end() {
            return Err(TemplateError::syntax(start, format!("unterminated {}", what)));
        }
        Err(TemplateError::syntax(
            cursor.pos,
            format!("expected '}}' to close {}", what),
        ))
    }

    fn unexpected_closer(&self, offset: usize, keyword: &str) -> TemplateError {
        match self.block_stack.last() {
            Some(frame) => TemplateError::syntax(
                offset,
                format!(
                    "unexpected %{{ {} }} inside %{{ {} }} block",
                    keyword,
                    frame.opener()
                ),
            ),
            None => TemplateError::syntax(
                offset,
                format!("unexpected %{{ {} }} without an open block", keyword),
            ),
        }
    }

    /// Consume text until the next `$` or `%`, which may start a marker.
    fn parse_text(&mut self) {
        let remaining = &self.template[self.pos..];
        let next_stop = remaining.find(['$', '%']).unwrap_or(remaining.len());
        let start = self.pos;

        if next_stop > 0 {
            self.pos += next_stop;
            self.append_text(&remaining[..next_stop], start);
        } else {
            // A lone `$` or `%` that does not open a marker.
            self.pos += 1;
            self.append_text(&remaining[..1], start);
        }
    }

    fn append_node(&mut self, node: Node) {
        self.strip_next = false;
        if let Some(nodes) = self.nodes_stack.last_mut() {
            nodes.push(node);
        }
    }

    /// Append text, merging with the previous text node when possible.
    fn append_text(&mut self, text: &str, start: usize) {
        let text = if std::mem::take(&mut self.strip_next) {
            text.trim_start()
        } else {
            text
        };
        if text.is_empty() {
            return;
        }

        if let Some(nodes) = self.nodes_stack.last_mut() {
            if let Some(Spanned {
                node: NodeKind::Text(last_text),
                span,
            }) = nodes.last_mut()
            {
                last_text.push_str(text);
                span.end = self.pos;
            } else {
                nodes.push(Spanned::new(
                    NodeKind::Text(text.to_string()),
                    Span::new(start, self.pos),
                ));
            }
        }
    }

    /// `${~` / `%{~`: trim whitespace at the end of the preceding literal.
    fn strip_trailing_whitespace(&mut self) {
        let Some(nodes) = self.nodes_stack.last_mut() else {
            return;
        };
        if let Some(Spanned {
            node: NodeKind::Text(text),
            ..
        }) = nodes.last_mut()
        {
            let trimmed_len = text.trim_end().len();
            text.truncate(trimmed_len);
            if text.is_empty() {
                nodes.pop();
            }
        }
    }
}

/// Main entry point: parse a template string into an AST.
pub fn parse_template(template: &str) -> Result<Template> {
    Parser::new(template).parse()
}

/// Parse a standalone expression; the whole input must be consumed.
pub fn parse_expr(source: &str) -> Result<Expr> {
    let mut cursor = ExprParser::new(source, 0);
    let expr = cursor.parse_expr()?;
    cursor.skip_ws();
    if !cursor.at_end() {
        return Err(TemplateError::syntax(cursor.pos, "unexpected trailing input"));
    }
    Ok(expr)
}

/// Recursive-descent expression parser working directly on the template
/// source, so that offsets in errors and spans are template offsets.
struct ExprParser<'a> {
    /// The whole template, not just the expression
    src: &'a str,
    /// Byte offset of the next unread character
    pos: usize,
    /// Current AST nesting, bounded by `MAX_EXPR_DEPTH`
    depth: usize,
}

impl<'a> ExprParser<'a> {
    fn new(src: &'a str, pos: usize) -> Self {
        Self { src, pos, depth: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    /// Skips whitespace, then consumes `token` if it comes next.
    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        self.eat_raw(token)
    }

    fn eat_raw(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str, context: &str) -> Result<()> {
        if self.eat(token) {
            return Ok(());
        }
        Err(TemplateError::syntax(
            self.pos,
            format!("expected '{}' {}", token, context),
        ))
    }

    /// Reads an identifier at the current position (no whitespace skipping).
    fn ident(&mut self) -> Option<String> {
        let rest = self.rest();
        let first = rest.chars().next()?;
        if !(first.is_ascii_alphabetic() || first == '_') {
            return None;
        }
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        self.pos += len;
        Some(rest[..len].to_string())
    }

    fn expect_ident(&mut self, what: &str) -> Result<String> {
        self.skip_ws();
        let pos = self.pos;
        self.ident()
            .ok_or_else(|| TemplateError::syntax(pos, format!("expected {}", what)))
    }

    /// Counts one more level of AST nesting, failing at `pos` past the limit.
    /// Callers restore `depth` once the nested part is built.
    fn enter(&mut self, pos: usize) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_EXPR_DEPTH {
            return Err(TemplateError::syntax(pos, "expression nested too deeply"));
        }
        Ok(())
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        let depth = self.depth;
        let expr = self.enter(self.pos).and_then(|_| self.parse_conditional());
        self.depth = depth;
        expr
    }

    fn parse_conditional(&mut self) -> Result<Expr> {
        let test = self.parse_binary(1)?;
        if !self.eat("?") {
            return Ok(test);
        }
        let then = self.parse_expr()?;
        self.expect(":", "in conditional expression")?;
        let otherwise = self.parse_expr()?;
        let span = test.span.merge(otherwise.span);
        Ok(Spanned::new(
            ExprKind::Conditional(Box::new(test), Box::new(then), Box::new(otherwise)),
            span,
        ))
    }

    /// Precedence climbing over the binary operators.
    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr> {
        let depth = self.depth;
        let expr = self.parse_binary_chain(min_prec);
        self.depth = depth;
        expr
    }

    /// Folds `a op b op c ...` into a left-deep tree; each fold is one level.
    fn parse_binary_chain(&mut self, min_prec: u8) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_ws();
            let Some((op, len)) = self.peek_binop() else {
                break;
            };
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.enter(self.pos)?;
            self.pos += len;
            let right = self.parse_binary(prec + 1)?;
            let span = left.span.merge(right.span);
            left = Spanned::new(ExprKind::Binary(op, Box::new(left), Box::new(right)), span);
        }
        Ok(left)
    }

    fn peek_binop(&self) -> Option<(BinOp, usize)> {
        // Longest symbols first.
        const OPS: [(&str, BinOp); 13] = [
            ("||", BinOp::Or),
            ("&&", BinOp::And),
            ("==", BinOp::Eq),
            ("!=", BinOp::Ne),
            ("<=", BinOp::Le),
            (">=", BinOp::Ge),
            ("<", BinOp::Lt),
            (">", BinOp::Gt),
            ("+", BinOp::Add),
            ("-", BinOp::Sub),
            ("*", BinOp::Mul),
            ("/", BinOp::Div),
            ("%", BinOp::Mod),
        ];
        let rest = self.rest();
        OPS.iter()
            .find(|(sym, _)| rest.starts_with(sym))
            .map(|(sym, op)| (*op, sym.len()))
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        self.skip_ws();
        let start = self.pos;
        let op = if self.eat_raw("!") {
            UnaryOp::Not
        } else if self.eat_raw("-") {
            UnaryOp::Neg
        } else {
            return self.parse_postfix();
        };

        let depth = self.depth;
        let operand = self.enter(start).and_then(|_| self.parse_unary());
        self.depth = depth;
        let operand = operand?;

        let span = Span::new(start, operand.span.end);
        Ok(Spanned::new(ExprKind::Unary(op, Box::new(operand)), span))
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let depth = self.depth;
        let expr = self.parse_index_chain();
        self.depth = depth;
        expr
    }

    /// `x[i][j]...`, one nesting level per index.
    fn parse_index_chain(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            self.skip_ws();
            let open = self.pos;
            if !self.eat_raw("[") {
                return Ok(expr);
            }
            self.enter(open)?;
            let index = self.parse_expr()?;
            self.expect("]", "to close index")?;
            let span = Span::new(expr.span.start, self.pos);
            expr = Spanned::new(ExprKind::Index(Box::new(expr), Box::new(index)), span);
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        self.skip_ws();
        let start = self.pos;
        let Some(c) = self.peek() else {
            return Err(TemplateError::syntax(
                start,
                "unexpected end of template, expected an expression",
            ));
        };

        match c {
            '(' => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                self.expect(")", "to close parenthesis")?;
                Ok(inner)
            }
            '[' => self.parse_tuple(),
            '"' => self.parse_string(),
            c if c.is_ascii_digit() => self.parse_number(),
            c if c.is_ascii_alphabetic() || c == '_' => {
                let name = self.ident().unwrap_or_default();
                let kind = match name.as_str() {
                    "true" => ExprKind::Literal(Value::Bool(true)),
                    "false" => ExprKind::Literal(Value::Bool(false)),
                    _ if self.eat("(") => {
                        let args = self.parse_list(")", "to close function call")?;
                        ExprKind::Call(name, args)
                    }
                    _ => ExprKind::Var(name),
                };
                Ok(self.spanned(kind, start))
            }
            other => Err(TemplateError::syntax(
                start,
                format!("unexpected character '{}' in expression", other),
            )),
        }
    }

    fn parse_tuple(&mut self) -> Result<Expr> {
        let start = self.pos;
        self.pos += 1;
        let items = self.parse_list("]", "to close tuple")?;
        Ok(self.spanned(ExprKind::Tuple(items), start))
    }

    /// Comma separated expressions up to `close`; a trailing comma is allowed.
    fn parse_list(&mut self, close: &str, context: &str) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        loop {
            if self.eat(close) {
                return Ok(items);
            }
            items.push(self.parse_expr()?);
            if self.eat(",") {
                continue;
            }
            self.expect(close, context)?;
            return Ok(items);
        }
    }

    fn parse_string(&mut self) -> Result<Expr> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        let mut chars = self.rest().char_indices();

        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += i + 1;
                    return Ok(self.spanned(ExprKind::Literal(Value::Str(out)), start));
                }
                '\\' => {
                    let escaped = match chars.next() {
                        Some((_, 'n')) => '\n',
                        Some((_, 't')) => '\t',
                        Some((_, 'r')) => '\r',
                        Some((_, '"')) => '"',
                        Some((_, '\\')) => '\\',
                        Some((j, other)) => {
                            return Err(TemplateError::syntax(
                                self.pos + j,
                                format!("invalid escape sequence '\\{}'", other),
                            ));
                        }
                        None => break,
                    };
                    out.push(escaped);
                }
                c => out.push(c),
            }
        }
        Err(TemplateError::syntax(start, "unterminated string literal"))
    }

    fn parse_number(&mut self) -> Result<Expr> {
        let start = self.pos;
        let bytes = self.src.as_bytes();
        let mut end = self.pos;
        let digits = |mut i: usize| {
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            i
        };

        end = digits(end);
        let mut is_float = false;
        if end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
            is_float = true;
            end = digits(end + 1);
        }
        if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
            let mut exp = end + 1;
            if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
                exp += 1;
            }
            if exp < bytes.len() && bytes[exp].is_ascii_digit() {
                is_float = true;
                end = digits(exp);
            }
        }

        let text = &self.src[start..end];
        self.pos = end;
        let value = match (is_float, text.parse::<i64>()) {
            (false, Ok(n)) => Value::Int(n),
            _ => Value::Float(text.parse::<f64>().map_err(|_| {
                TemplateError::syntax(start, format!("invalid number literal '{}'", text))
            })?),
        };
        Ok(self.spanned(ExprKind::Literal(value), start))
    }

    fn spanned(&self, kind: ExprKind, start: usize) -> Expr {
        Spanned::new(kind, Span::new(start, self.pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(node: &Node) -> &str {
        match &node.node {
            NodeKind::Text(t) => t,
            other => panic!("Expected Text, got {:?}", other),
        }
    }

    fn syntax_offset(err: TemplateError) -> usize {
        match err {
            TemplateError::SyntaxError { offset, .. } => offset,
            other => panic!("Expected SyntaxError, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_text() {
        let nodes = parse_template("hello world").unwrap().nodes;
        assert_eq!(nodes.len(), 1);
        assert_eq!(text(&nodes[0]), "hello world");
    }

    #[test]
    fn test_parse_merged_text() {
        let nodes = parse_template("100% of $5 / 2").unwrap().nodes;
        assert_eq!(nodes.len(), 1);
        assert_eq!(text(&nodes[0]), "100% of $5 / 2");
        assert_eq!(nodes[0].span, Span::new(0, 14));
    }

    #[test]
    fn test_parse_escapes() {
        let nodes = parse_template("$${a} and %%{ for }").unwrap().nodes;
        assert_eq!(nodes.len(), 1);
        assert_eq!(text(&nodes[0]), "${a} and %{ for }");
    }

    #[test]
    fn test_parse_interpolation() {
        let nodes = parse_template("hello ${name}!").unwrap().nodes;
        assert_eq!(nodes.len(), 3);
        assert_eq!(text(&nodes[0]), "hello ");
        match &nodes[1].node {
            NodeKind::Interpolation(expr) => {
                assert_eq!(expr.node, ExprKind::Var("name".to_string()));
                assert_eq!(expr.span, Span::new(8, 12));
            }
            other => panic!("Expected Interpolation, got {:?}", other),
        }
        assert_eq!(nodes[1].span, Span::new(6, 13));
        assert_eq!(text(&nodes[2]), "!");
    }

    #[test]
    fn test_operator_precedence() {
        let expr = parse_expr("1 + 2 * 3").unwrap();
        match expr.node {
            ExprKind::Binary(BinOp::Add, left, right) => {
                assert_eq!(left.node, ExprKind::Literal(Value::Int(1)));
                assert!(matches!(right.node, ExprKind::Binary(BinOp::Mul, _, _)));
            }
            other => panic!("Expected Add, got {:?}", other),
        }

        // Left associative
        let expr = parse_expr("8 - 4 - 2").unwrap();
        match expr.node {
            ExprKind::Binary(BinOp::Sub, left, _) => {
                assert!(matches!(left.node, ExprKind::Binary(BinOp::Sub, _, _)));
            }
            other => panic!("Expected Sub, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_literals() {
        assert_eq!(parse_expr("42").unwrap().node, ExprKind::Literal(Value::Int(42)));
        assert_eq!(parse_expr("4.5").unwrap().node, ExprKind::Literal(Value::Float(4.5)));
        assert_eq!(parse_expr("1e3").unwrap().node, ExprKind::Literal(Value::Float(1000.0)));
        assert_eq!(
            parse_expr(r#""a\"b\n""#).unwrap().node,
            ExprKind::Literal(Value::Str("a\"b\n".to_string()))
        );
        assert_eq!(parse_expr("true").unwrap().node, ExprKind::Literal(Value::Bool(true)));
    }

    #[test]
    fn test_parse_call_and_tuple() {
        let expr = parse_expr(r#"replace(a, "ello", "i")"#).unwrap();
        match expr.node {
            ExprKind::Call(name, args) => {
                assert_eq!(name, "replace");
                assert_eq!(args.len(), 3);
                assert_eq!(args[0].node, ExprKind::Var("a".to_string()));
            }
            other => panic!("Expected Call, got {:?}", other),
        }

        let expr = parse_expr(r#"["a", "b",]"#).unwrap();
        match expr.node {
            ExprKind::Tuple(items) => assert_eq!(items.len(), 2),
            other => panic!("Expected Tuple, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_conditional_and_index() {
        let expr = parse_expr("x > 1 ? xs[0] : -1").unwrap();
        match expr.node {
            ExprKind::Conditional(test, then, otherwise) => {
                assert!(matches!(test.node, ExprKind::Binary(BinOp::Gt, _, _)));
                assert!(matches!(then.node, ExprKind::Index(_, _)));
                assert!(matches!(otherwise.node, ExprKind::Unary(UnaryOp::Neg, _)));
            }
            other => panic!("Expected Conditional, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_for() {
        let tpl = r#"%{ for x in ["a", "b", "c"] }${x};%{ endfor }"#;
        let nodes = parse_template(tpl).unwrap().nodes;
        assert_eq!(nodes.len(), 1);
        match &nodes[0].node {
            NodeKind::For {
                key,
                value,
                collection,
                body,
            } => {
                assert_eq!(*key, None);
                assert_eq!(value, "x");
                assert!(matches!(collection.node, ExprKind::Tuple(_)));
                assert_eq!(body.len(), 2);
                assert_eq!(text(&body[1]), ";");
            }
            other => panic!("Expected For, got {:?}", other),
        }
        assert_eq!(nodes[0].span, Span::new(0, tpl.len()));
    }

    #[test]
    fn test_parse_for_with_key() {
        let nodes = parse_template("%{ for i, x in xs }${i}%{ endfor }").unwrap().nodes;
        match &nodes[0].node {
            NodeKind::For { key, value, .. } => {
                assert_eq!(key.as_deref(), Some("i"));
                assert_eq!(value, "x");
            }
            other => panic!("Expected For, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_nested() {
        let tpl = "%{ if ok }%{ for x in xs }${x}%{ endfor }%{ else }none%{ endif }";
        let nodes = parse_template(tpl).unwrap().nodes;
        assert_eq!(nodes.len(), 1);
        match &nodes[0].node {
            NodeKind::If {
                then_body,
                else_body,
                ..
            } => {
                assert_eq!(then_body.len(), 1);
                assert!(matches!(then_body[0].node, NodeKind::For { .. }));
                assert_eq!(else_body.len(), 1);
                assert_eq!(text(&else_body[0]), "none");
            }
            other => panic!("Expected If, got {:?}", other),
        }
    }

    #[test]
    fn test_strip_markers() {
        let tpl = "a  ${~ x ~}  b\n%{~ for y in ys ~}\n  c\n%{~ endfor ~}\n";
        let nodes = parse_template(tpl).unwrap().nodes;
        assert_eq!(text(&nodes[0]), "a");
        assert_eq!(text(&nodes[2]), "b");
        match &nodes[3].node {
            NodeKind::For { body, .. } => {
                assert_eq!(body.len(), 1);
                assert_eq!(text(&body[0]), "c");
            }
            other => panic!("Expected For, got {:?}", other),
        }
        assert_eq!(nodes.len(), 4);
    }

    #[test]
    fn test_unclosed_for() {
        let err = parse_template("x %{ for a in b }body").unwrap_err();
        assert_eq!(syntax_offset(err), 2);
    }

    #[test]
    fn test_stray_closers() {
        let err = parse_template("abc%{ endfor }").unwrap_err();
        assert_eq!(syntax_offset(err), 3);

        let err = parse_template("%{ for a in b }%{ endif }").unwrap_err();
        assert_eq!(syntax_offset(err), 15);

        let err = parse_template("%{ else }").unwrap_err();
        assert_eq!(syntax_offset(err), 0);
    }

    #[test]
    fn test_unterminated_interpolation() {
        let err = parse_template("ab${ name").unwrap_err();
        assert_eq!(syntax_offset(err), 2);

        let err = parse_template("${ 1 + }").unwrap_err();
        assert_eq!(syntax_offset(err), 7);
    }

    #[test]
    fn test_trailing_tokens_in_interpolation() {
        let err = parse_template("${ a b }").unwrap_err();
        assert_eq!(syntax_offset(err), 5);
    }

    #[test]
    fn test_unknown_directive() {
        let err = parse_template("%{ while x }").unwrap_err();
        assert_eq!(syntax_offset(err), 3);
    }

    #[test]
    fn test_for_requires_in() {
        let err = parse_template("%{ for x of xs }%{ endfor }").unwrap_err();
        assert_eq!(syntax_offset(err), 9);
    }

    #[test]
    fn test_unterminated_string() {
        let err = parse_template(r#"${ "abc }"#).unwrap_err();
        assert_eq!(syntax_offset(err), 3);
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let src = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        assert!(parse_expr(&src).is_err());
    }

    #[test]
    fn test_long_operator_chain_is_bounded() {
        let ok = vec!["1"; 100].join("+");
        assert!(parse_expr(&ok).is_ok());

        // The 128th `+` sits at offset 255.
        let err = parse_expr(&vec!["1"; 3_000].join("+")).unwrap_err();
        assert_eq!(syntax_offset(err), 255);

        let mixed = vec!["2*3"; 3_000].join("-");
        assert!(parse_expr(&mixed).is_err());
    }

    #[test]
    fn test_long_index_chain_is_bounded() {
        assert!(parse_expr(&format!("x{}", "[0]".repeat(50))).is_ok());
        assert!(parse_expr(&format!("x{}", "[0]".repeat(3_000))).is_err());
    }

    #[test]
    fn test_block_nesting_is_bounded() {
        let ok = format!("{}x{}", "%{ if true }".repeat(100), "%{ endif }".repeat(100));
        assert!(parse_template(&ok).is_ok());

        // The 101st opener starts at 100 * 12 bytes.
        let deep = format!("{}x{}", "%{ if true }".repeat(2_000), "%{ endif }".repeat(2_000));
        assert_eq!(syntax_offset(parse_template(&deep).unwrap_err()), 1_200);

        let deep_for = "%{ for x in [1] }".repeat(500);
        assert!(parse_template(&deep_for).is_err());
    }
}
