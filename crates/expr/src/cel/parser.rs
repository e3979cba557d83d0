use super::{BinOp, Expr, Macro};
use crate::lexer::{Cursor, Tok};
use crate::{Dialect, ExprError, Value};

pub(crate) fn parse(src: &str) -> Result<Expr, ExprError> {
    let mut c = Cursor::new(Dialect::Cel, src)?;
    if c.at_end() {
        return Err(c.error("empty expression"));
    }
    let e = expr(&mut c)?;
    if !c.at_end() {
        return Err(c.error("unexpected trailing input"));
    }
    Ok(e)
}

fn boxed(e: Expr) -> Box<Expr> { Box::new(e) }

fn expr(c: &mut Cursor<'_>) -> Result<Expr, ExprError> {
    let cond = or(c)?;
    if c.eat("?") {
        let then = or(c)?;
        c.expect(":")?;
        let otherwise = expr(c)?;
        return Ok(Expr::Cond(boxed(cond), boxed(then), boxed(otherwise)));
    }
    Ok(cond)
}

fn or(c: &mut Cursor<'_>) -> Result<Expr, ExprError> {
    let mut lhs = and(c)?;
    while c.eat("||") {
        lhs = Expr::Or(boxed(lhs), boxed(and(c)?));
    }
    Ok(lhs)
}

fn and(c: &mut Cursor<'_>) -> Result<Expr, ExprError> {
    let mut lhs = relation(c)?;
    while c.eat("&&") {
        lhs = Expr::And(boxed(lhs), boxed(relation(c)?));
    }
    Ok(lhs)
}

fn relation(c: &mut Cursor<'_>) -> Result<Expr, ExprError> {
    let mut lhs = addition(c)?;
    loop {
        let op = match c.peek() {
            Some(Tok::Punct("==")) => BinOp::Eq,
            Some(Tok::Punct("!=")) => BinOp::Ne,
            Some(Tok::Punct("<")) => BinOp::Lt,
            Some(Tok::Punct("<=")) => BinOp::Le,
            Some(Tok::Punct(">")) => BinOp::Gt,
            Some(Tok::Punct(">=")) => BinOp::Ge,
            Some(Tok::Ident(kw)) if kw == "in" => BinOp::In,
            _ => return Ok(lhs),
        };
        c.bump();
        lhs = Expr::Binary(op, boxed(lhs), boxed(addition(c)?));
    }
}

fn addition(c: &mut Cursor<'_>) -> Result<Expr, ExprError> {
    let mut lhs = multiplication(c)?;
    loop {
        let op = match c.peek() {
            Some(Tok::Punct("+")) => BinOp::Add,
            Some(Tok::Punct("-")) => BinOp::Sub,
            _ => return Ok(lhs),
        };
        c.bump();
        lhs = Expr::Binary(op, boxed(lhs), boxed(multiplication(c)?));
    }
}

fn multiplication(c: &mut Cursor<'_>) -> Result<Expr, ExprError> {
    let mut lhs = unary(c)?;
    loop {
        let op = match c.peek() {
            Some(Tok::Punct("*")) => BinOp::Mul,
            Some(Tok::Punct("/")) => BinOp::Div,
            Some(Tok::Punct("%")) => BinOp::Rem,
            _ => return Ok(lhs),
        };
        c.bump();
        lhs = Expr::Binary(op, boxed(lhs), boxed(unary(c)?));
    }
}

fn unary(c: &mut Cursor<'_>) -> Result<Expr, ExprError> {
    if c.eat("!") {
        return Ok(Expr::Not(boxed(unary(c)?)));
    }
    if c.eat("-") {
        // Negative literals fold into the constant.
        return Ok(match unary(c)? {
            Expr::Lit(Value::Int(i)) => Expr::Lit(Value::Int(-i)),
            Expr::Lit(Value::Float(f)) => Expr::Lit(Value::Float(-f)),
            other => Expr::Neg(boxed(other)),
        });
    }
    member(c)
}

fn member(c: &mut Cursor<'_>) -> Result<Expr, ExprError> {
    let mut e = primary(c)?;
    loop {
        if c.eat(".") {
            let name = ident(c)?;
            if c.eat("(") {
                let args = arguments(c)?;
                e = method(c, e, name, args)?;
            } else {
                e = Expr::Select(boxed(e), name);
            }
        } else if c.eat("[") {
            let idx = expr(c)?;
            c.expect("]")?;
            e = Expr::Index(boxed(e), boxed(idx));
        } else {
            return Ok(e);
        }
    }
}

fn ident(c: &mut Cursor<'_>) -> Result<String, ExprError> {
    match c.peek() {
        Some(Tok::Ident(s)) => {
            let s = s.clone();
            c.bump();
            Ok(s)
        }
        _ => Err(c.error("expected identifier")),
    }
}

// Called after '(' has been consumed.
fn arguments(c: &mut Cursor<'_>) -> Result<Vec<Expr>, ExprError> {
    let mut args = Vec::new();
    if c.eat(")") {
        return Ok(args);
    }
    loop {
        args.push(expr(c)?);
        if c.eat(",") { continue; }
        c.expect(")")?;
        return Ok(args);
    }
}

fn method(c: &Cursor<'_>, target: Expr, name: String, mut args: Vec<Expr>) -> Result<Expr, ExprError> {
    let kind = match name.as_str() {
        "all" => Some(Macro::All),
        "exists" => Some(Macro::Exists),
        "exists_one" => Some(Macro::ExistsOne),
        "filter" => Some(Macro::Filter),
        "map" => Some(Macro::Map),
        _ => None,
    };
    let Some(kind) = kind else {
        return Ok(Expr::Call { target: Some(boxed(target)), name, args });
    };
    if args.len() != 2 {
        return Err(c.error(format!("{}() takes a variable and an expression", name)));
    }
    let body = args.pop().map(boxed);
    let var = match args.pop() {
        Some(Expr::Ident(v)) => v,
        _ => return Err(c.error(format!("first argument of {}() must be a simple identifier", name))),
    };
    let Some(body) = body else {
        return Err(c.error("missing macro body"));
    };
    Ok(Expr::Comprehension { kind, range: boxed(target), var, body })
}

fn primary(c: &mut Cursor<'_>) -> Result<Expr, ExprError> {
    let Some(tok) = c.peek().cloned() else {
        return Err(c.error("expected expression"));
    };
    match tok {
        Tok::Int(i) => {
            c.bump();
            Ok(Expr::Lit(Value::Int(i)))
        }
        Tok::Float(f) => {
            c.bump();
            Ok(Expr::Lit(Value::Float(f)))
        }
        Tok::Str(s) => {
            c.bump();
            Ok(Expr::Lit(Value::String(s)))
        }
        Tok::Punct("(") => {
            c.bump();
            let e = expr(c)?;
            c.expect(")")?;
            Ok(e)
        }
        Tok::Punct("[") => {
            c.bump();
            let mut items = Vec::new();
            if !c.eat("]") {
                loop {
                    items.push(expr(c)?);
                    if c.eat(",") && !c.is_punct("]") { continue; }
                    c.expect("]")?;
                    break;
                }
            }
            Ok(Expr::List(items))
        }
        Tok::Punct("{") => {
            c.bump();
            let mut entries = Vec::new();
            if !c.eat("}") {
                loop {
                    let k = expr(c)?;
                    c.expect(":")?;
                    let v = expr(c)?;
                    entries.push((k, v));
                    if c.eat(",") && !c.is_punct("}") { continue; }
                    c.expect("}")?;
                    break;
                }
            }
            Ok(Expr::Map(entries))
        }
        Tok::Punct(".") => {
            // Leading dot: root-scoped identifier.
            c.bump();
            Ok(Expr::Ident(ident(c)?))
        }
        Tok::Ident(name) => {
            c.bump();
            match name.as_str() {
                "true" => return Ok(Expr::Lit(Value::Bool(true))),
                "false" => return Ok(Expr::Lit(Value::Bool(false))),
                "null" => return Ok(Expr::Lit(Value::Null)),
                "in" => return Err(c.error("unexpected keyword \"in\"")),
                _ => {}
            }
            if !c.eat("(") {
                return Ok(Expr::Ident(name));
            }
            let mut args = arguments(c)?;
            if name == "has" {
                return match (args.pop(), args.is_empty()) {
                    (Some(Expr::Select(target, field)), true) => Ok(Expr::Has(target, field)),
                    _ => Err(c.error("has() requires a single field selection argument")),
                };
            }
            Ok(Expr::Call { target: None, name, args })
        }
        Tok::Punct(_) => Err(c.error("expected expression")),
    }
}
