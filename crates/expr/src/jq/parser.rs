use super::{Ast, BinOp, Builtin, ObjKey};
use crate::lexer::{Cursor, Tok};
use crate::{Dialect, ExprError, Value};

pub(crate) fn parse(src: &str) -> Result<Ast, ExprError> {
    let mut c = Cursor::new(Dialect::Jq, src)?;
    if c.at_end() {
        return Err(c.error("empty filter"));
    }
    let ast = pipe(&mut c)?;
    if !c.at_end() {
        return Err(c.error("unexpected trailing input"));
    }
    Ok(ast)
}

fn boxed(a: Ast) -> Box<Ast> { Box::new(a) }

// pipe := comma ('|' pipe)?
fn pipe(c: &mut Cursor<'_>) -> Result<Ast, ExprError> {
    let lhs = comma(c)?;
    if c.eat("|") {
        let rhs = pipe(c)?;
        return Ok(Ast::Pipe(boxed(lhs), boxed(rhs)));
    }
    Ok(lhs)
}

fn comma(c: &mut Cursor<'_>) -> Result<Ast, ExprError> {
    let mut lhs = alternative(c)?;
    while c.eat(",") {
        let rhs = alternative(c)?;
        lhs = Ast::Comma(boxed(lhs), boxed(rhs));
    }
    Ok(lhs)
}

fn alternative(c: &mut Cursor<'_>) -> Result<Ast, ExprError> {
    let lhs = or(c)?;
    if c.eat("//") {
        let rhs = alternative(c)?;
        return Ok(Ast::Alt(boxed(lhs), boxed(rhs)));
    }
    Ok(lhs)
}

fn or(c: &mut Cursor<'_>) -> Result<Ast, ExprError> {
    let mut lhs = and(c)?;
    while c.eat_ident("or") {
        let rhs = and(c)?;
        lhs = Ast::Or(boxed(lhs), boxed(rhs));
    }
    Ok(lhs)
}

fn and(c: &mut Cursor<'_>) -> Result<Ast, ExprError> {
    let mut lhs = comparison(c)?;
    while c.eat_ident("and") {
        let rhs = comparison(c)?;
        lhs = Ast::And(boxed(lhs), boxed(rhs));
    }
    Ok(lhs)
}

fn comparison(c: &mut Cursor<'_>) -> Result<Ast, ExprError> {
    let lhs = additive(c)?;
    let op = match c.peek() {
        Some(Tok::Punct("==")) => BinOp::Eq,
        Some(Tok::Punct("!=")) => BinOp::Ne,
        Some(Tok::Punct("<")) => BinOp::Lt,
        Some(Tok::Punct("<=")) => BinOp::Le,
        Some(Tok::Punct(">")) => BinOp::Gt,
        Some(Tok::Punct(">=")) => BinOp::Ge,
        _ => return Ok(lhs),
    };
    c.bump();
    let rhs = additive(c)?;
    Ok(Ast::Binary(op, boxed(lhs), boxed(rhs)))
}

fn additive(c: &mut Cursor<'_>) -> Result<Ast, ExprError> {
    let mut lhs = multiplicative(c)?;
    loop {
        let op = match c.peek() {
            Some(Tok::Punct("+")) => BinOp::Add,
            Some(Tok::Punct("-")) => BinOp::Sub,
            _ => return Ok(lhs),
        };
        c.bump();
        let rhs = multiplicative(c)?;
        lhs = Ast::Binary(op, boxed(lhs), boxed(rhs));
    }
}

fn multiplicative(c: &mut Cursor<'_>) -> Result<Ast, ExprError> {
    let mut lhs = unary(c)?;
    loop {
        let op = match c.peek() {
            Some(Tok::Punct("*")) => BinOp::Mul,
            Some(Tok::Punct("/")) => BinOp::Div,
            Some(Tok::Punct("%")) => BinOp::Rem,
            _ => return Ok(lhs),
        };
        c.bump();
        let rhs = unary(c)?;
        lhs = Ast::Binary(op, boxed(lhs), boxed(rhs));
    }
}

fn unary(c: &mut Cursor<'_>) -> Result<Ast, ExprError> {
    if c.eat("-") {
        return Ok(Ast::Neg(boxed(postfix(c)?)));
    }
    postfix(c)
}

fn postfix(c: &mut Cursor<'_>) -> Result<Ast, ExprError> {
    let mut t = term(c)?;
    loop {
        if c.is_punct(".") && attached_name(c, 1) {
            c.bump();
            t = Ast::Field(boxed(t), field_name(c)?);
        } else if c.is_punct(".") && matches!(c.peek_at(1), Some(Tok::Punct("["))) {
            c.bump();
            c.bump();
            t = bracket(c, t)?;
        } else if c.eat("[") {
            t = bracket(c, t)?;
        } else if c.eat("?") {
            t = Ast::Try(boxed(t));
        } else {
            return Ok(t);
        }
    }
}

// `.name` only when the name directly follows the dot, so `if . then` stays an identity.
fn attached_name(c: &Cursor<'_>, n: usize) -> bool {
    matches!(c.peek_at(n), Some(Tok::Ident(_)) | Some(Tok::Str(_))) && c.offset_at(n) == c.offset_at(n - 1) + 1
}

fn field_name(c: &mut Cursor<'_>) -> Result<String, ExprError> {
    match c.bump() {
        Some(Tok::Ident(s)) | Some(Tok::Str(s)) => Ok(s),
        _ => Err(c.error("expected field name")),
    }
}

// Called after '[' has been consumed.
fn bracket(c: &mut Cursor<'_>, target: Ast) -> Result<Ast, ExprError> {
    if c.eat("]") {
        return Ok(Ast::Iterate(boxed(target)));
    }
    if c.eat(":") {
        let to = pipe(c)?;
        c.expect("]")?;
        return Ok(Ast::Slice(boxed(target), None, Some(boxed(to))));
    }
    let index = pipe(c)?;
    if c.eat(":") {
        let to = if c.is_punct("]") { None } else { Some(boxed(pipe(c)?)) };
        c.expect("]")?;
        return Ok(Ast::Slice(boxed(target), Some(boxed(index)), to));
    }
    c.expect("]")?;
    Ok(Ast::Index(boxed(target), boxed(index)))
}

fn term(c: &mut Cursor<'_>) -> Result<Ast, ExprError> {
    let Some(tok) = c.peek().cloned() else {
        return Err(c.error("expected expression"));
    };
    match tok {
        Tok::Punct(".") => {
            if attached_name(c, 1) {
                c.bump();
                return Ok(Ast::Field(boxed(Ast::Identity), field_name(c)?));
            }
            c.bump();
            match c.peek() {
                Some(Tok::Punct("[")) => {
                    c.bump();
                    bracket(c, Ast::Identity)
                }
                _ => Ok(Ast::Identity),
            }
        }
        Tok::Punct("..") => {
            c.bump();
            Ok(Ast::Recurse)
        }
        Tok::Int(i) => {
            c.bump();
            Ok(Ast::Literal(Value::Int(i)))
        }
        Tok::Float(f) => {
            c.bump();
            Ok(Ast::Literal(Value::Float(f)))
        }
        Tok::Str(s) => {
            c.bump();
            Ok(Ast::Literal(Value::String(s)))
        }
        Tok::Punct("(") => {
            c.bump();
            let inner = pipe(c)?;
            c.expect(")")?;
            Ok(inner)
        }
        Tok::Punct("[") => {
            c.bump();
            if c.eat("]") {
                return Ok(Ast::Array(None));
            }
            let inner = pipe(c)?;
            c.expect("]")?;
            Ok(Ast::Array(Some(boxed(inner))))
        }
        Tok::Punct("{") => {
            c.bump();
            object(c)
        }
        Tok::Punct("$") => Err(c.error("variables are not supported")),
        Tok::Ident(name) => ident_term(c, &name),
        Tok::Punct(_) => Err(c.error("expected expression")),
    }
}

fn ident_term(c: &mut Cursor<'_>, name: &str) -> Result<Ast, ExprError> {
    match name {
        "true" => { c.bump(); return Ok(Ast::Literal(Value::Bool(true))); }
        "false" => { c.bump(); return Ok(Ast::Literal(Value::Bool(false))); }
        "null" => { c.bump(); return Ok(Ast::Literal(Value::Null)); }
        "if" => { c.bump(); return if_chain(c); }
        "try" => {
            c.bump();
            return Ok(Ast::Try(boxed(postfix(c)?)));
        }
        "and" | "or" | "then" | "elif" | "else" | "end" | "def" | "reduce" | "foreach" | "as" => {
            return Err(c.error(format!("unexpected keyword {:?}", name)));
        }
        _ => {}
    }
    let at = c.offset();
    c.bump();
    let mut args = Vec::new();
    if c.eat("(") {
        loop {
            args.push(pipe(c)?);
            if c.eat(";") { continue; }
            c.expect(")")?;
            break;
        }
    }
    match Builtin::lookup(name, args.len()) {
        Some(b) => Ok(Ast::Call(b, args)),
        None => Err(c.error_at(at, format!("unknown function {}/{}", name, args.len()))),
    }
}

fn if_chain(c: &mut Cursor<'_>) -> Result<Ast, ExprError> {
    let cond = pipe(c)?;
    c.expect_ident("then")?;
    let then = pipe(c)?;
    let otherwise = if c.eat_ident("elif") {
        Some(boxed(if_chain(c)?))
    } else if c.eat_ident("else") {
        let e = pipe(c)?;
        c.expect_ident("end")?;
        Some(boxed(e))
    } else {
        c.expect_ident("end")?;
        None
    };
    Ok(Ast::If(boxed(cond), boxed(then), otherwise))
}

// Called after '{' has been consumed.
fn object(c: &mut Cursor<'_>) -> Result<Ast, ExprError> {
    let mut entries = Vec::new();
    if c.eat("}") {
        return Ok(Ast::Object(entries));
    }
    loop {
        let entry = match c.bump() {
            Some(Tok::Ident(k)) | Some(Tok::Str(k)) => {
                if c.eat(":") {
                    (ObjKey::Static(k), alternative(c)?)
                } else {
                    let shorthand = Ast::Field(boxed(Ast::Identity), k.clone());
                    (ObjKey::Static(k), shorthand)
                }
            }
            Some(Tok::Punct("(")) => {
                let key = pipe(c)?;
                c.expect(")")?;
                c.expect(":")?;
                (ObjKey::Dynamic(key), alternative(c)?)
            }
            _ => return Err(c.error("expected object key")),
        };
        entries.push(entry);
        if c.eat(",") { continue; }
        c.expect("}")?;
        return Ok(Ast::Object(entries));
    }
}
