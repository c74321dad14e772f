use crate::ast::{BinaryOp, Expr, Identifier, Literal, UnaryOp};
use crate::lexer::{Keyword, Lexer, Token};
use crate::{Error, MAX_PARSE_DEPTH, ParseErrorKind};

/// Configuration for parsing behavior
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParseConfig {
    /// Maximum nesting of forms before parsing fails with `TooDeeplyNested`
    pub max_depth: usize,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            max_depth: MAX_PARSE_DEPTH,
        }
    }
}

/// Parse every top-level form of a source file.
pub fn parse_file(source: &str) -> Result<Vec<Expr>, Error> {
    parse_file_with_config(source, ParseConfig::default())
}

pub fn parse_file_with_config(source: &str, config: ParseConfig) -> Result<Vec<Expr>, Error> {
    Parser::new(Lexer::new(source), config).parse_file()
}

/// Parse exactly one expression; anything after it is an error.
pub fn parse_expr(source: &str) -> Result<Expr, Error> {
    parse_expr_with_config(source, ParseConfig::default())
}

pub fn parse_expr_with_config(source: &str, config: ParseConfig) -> Result<Expr, Error> {
    Parser::new(Lexer::new(source), config).parse_expr()
}

/// Recursive-descent parser over a [`Lexer`], using the lexer's put-back slot
/// as its only lookahead.
#[derive(Debug)]
pub struct Parser {
    lexer: Lexer,
    config: ParseConfig,
    depth: usize,
}

impl Parser {
    pub fn new(lexer: Lexer, config: ParseConfig) -> Self {
        Parser {
            lexer,
            config,
            depth: 0,
        }
    }

    pub fn parse_file(&mut self) -> Result<Vec<Expr>, Error> {
        let mut exprs = Vec::new();
        loop {
            let token = self.lexer.get_token()?;
            if token == Token::Eof {
                return Ok(exprs);
            }
            self.lexer.put_token(token);
            exprs.push(self.parse_expr_aux()?);
        }
    }

    pub fn parse_expr(&mut self) -> Result<Expr, Error> {
        let expr = self.parse_expr_aux()?;
        let token = self.lexer.get_token()?;
        if token != Token::Eof {
            return Err(self.lexer.error_at(
                ParseErrorKind::TrailingContent,
                "Unexpected content after expression",
                self.lexer.offset(),
                Some(token.to_string()),
            ));
        }
        Ok(expr)
    }

    fn error(&self, message: impl Into<String>, found: Option<&Token>) -> Error {
        let kind = match found {
            Some(Token::Eof) => ParseErrorKind::Incomplete,
            _ => ParseErrorKind::InvalidSyntax,
        };
        self.lexer.error_at(
            kind,
            message,
            self.lexer.offset(),
            found.map(ToString::to_string),
        )
    }

    fn enter(&mut self) -> Result<(), Error> {
        self.depth += 1;
        if self.depth > self.config.max_depth {
            return Err(self.lexer.error_at(
                ParseErrorKind::TooDeeplyNested,
                format!(
                    "Expression too deeply nested (max depth: {})",
                    self.config.max_depth
                ),
                self.lexer.offset(),
                None,
            ));
        }
        Ok(())
    }

    fn expect_close_paren(&mut self, message: &str) -> Result<(), Error> {
        let token = self.lexer.get_token()?;
        if token != Token::CloseParen {
            return Err(self.error(message, Some(&token)));
        }
        Ok(())
    }

    /// Consume the keyword that introduces a form.
    fn expect_keyword(&mut self, keyword: Keyword) -> Result<(), Error> {
        let token = self.lexer.get_token()?;
        if token.keyword() != Some(keyword) {
            return Err(self.error(
                format!("Internal error: expected keyword {}", keyword.name()),
                Some(&token),
            ));
        }
        Ok(())
    }

    fn parse_expr_aux(&mut self) -> Result<Expr, Error> {
        self.enter()?;
        let result = self.parse_expr_inner();
        self.depth -= 1;
        result
    }

    fn parse_expr_inner(&mut self) -> Result<Expr, Error> {
        let token = self.lexer.get_token()?;
        let expr = match token {
            Token::Eof => {
                return Err(self.error(
                    "Unexpected EOF encountered while parsing expression",
                    Some(&token),
                ));
            }
            Token::Quote => {
                self.lexer.put_token(token);
                self.parse_quote_expr()?
            }
            Token::Paren => {
                self.lexer.put_token(token);
                self.parse_form()?
            }
            Token::Id(name) => Expr::id(name),
            Token::Keyword(kw, name) if kw.is_literal() => Expr::Id(Identifier {
                name,
                keyword: Some(kw),
            }),
            Token::Keyword(..) => {
                return Err(self.error("Keyword cannot be an expression", Some(&token)));
            }
            Token::Number(n) => Expr::Literal(Literal::Int(n)),
            Token::String(s) => Expr::Literal(Literal::Str(s)),
            Token::CloseParen | Token::Dot => {
                return Err(self.error(
                    "Unexpected token when expecting beginning of expression",
                    Some(&token),
                ));
            }
        };

        let next = self.lexer.get_token()?;
        let is_dot = next == Token::Dot;
        self.lexer.put_token(next);
        if is_dot {
            self.parse_dotted_expr(expr)
        } else {
            Ok(expr)
        }
    }

    /// A parenthesized form: a keyword form, or a call whose first
    /// sub-expression produces the callable.
    fn parse_form(&mut self) -> Result<Expr, Error> {
        let token = self.lexer.get_token()?;
        if token != Token::Paren {
            return Err(self.error("List expression must start with '('", Some(&token)));
        }
        let token = self.lexer.get_token()?;
        let keyword = token.keyword().filter(|kw| !kw.is_literal());
        self.lexer.put_token(token);
        match keyword {
            Some(kw) => self.parse_keyword_form(kw),
            None => self.parse_function_call(),
        }
    }

    fn parse_keyword_form(&mut self, keyword: Keyword) -> Result<Expr, Error> {
        match keyword {
            Keyword::Import => self.parse_import(),
            Keyword::Defun => self.parse_defun(),
            Keyword::Lambda => self.parse_lambda(),
            Keyword::Set => self.parse_set(),
            Keyword::LetStar => self.parse_let_star(),
            Keyword::Block => self.parse_block(),
            Keyword::Eq => self.parse_eq(),
            Keyword::Cons => self.parse_cons(),
            Keyword::List => self.parse_list_call(),
            Keyword::If => self.parse_if(),
            Keyword::New => self.parse_new(),
            Keyword::Loop => self.parse_loop(),
            Keyword::Break => self.parse_break(),
            Keyword::Elt => self.parse_elt(),
            Keyword::Quote => self.parse_quote_form(),
            Keyword::Not => self.parse_unary_op(),
            kw => match BinaryOp::from_keyword(kw) {
                Some(op) => self.parse_binary_op(op),
                None => Err(self.error(
                    format!("Internal error: unrecognized keyword form {}", kw.name()),
                    None,
                )),
            },
        }
    }

    fn parse_defun(&mut self) -> Result<Expr, Error> {
        self.expect_keyword(Keyword::Defun)?;
        let token = self.lexer.get_token()?;
        let Token::Id(name) = token else {
            return Err(self.error("Defun must have an ID for name", Some(&token)));
        };
        let params = self.parse_params("Defun")?;
        let body = self.parse_body(&format!("Hit EOF in function body {name}"))?;
        Ok(Expr::Defun { name, params, body })
    }

    fn parse_lambda(&mut self) -> Result<Expr, Error> {
        self.expect_keyword(Keyword::Lambda)?;
        let params = self.parse_params("Lambda")?;
        let body = self.parse_body("Hit EOF in function body")?;
        Ok(Expr::Lambda { params, body })
    }

    fn parse_params(&mut self, definer: &str) -> Result<Vec<String>, Error> {
        let token = self.lexer.get_token()?;
        if token != Token::Paren {
            return Err(self.error(
                format!("{definer} must have param list following name"),
                Some(&token),
            ));
        }
        self.lexer.put_token(token);
        let items = self.parse_list("param list")?;
        self.ensure_list_of_ids(items, false, &format!("{definer} params must be valid IDs"))
    }

    /// Expressions up to and including the closing paren of the enclosing form.
    fn parse_body(&mut self, eof_message: &str) -> Result<Vec<Expr>, Error> {
        let mut body = Vec::new();
        loop {
            let token = self.lexer.get_token()?;
            match token {
                Token::CloseParen => return Ok(body),
                Token::Eof => return Err(self.error(eof_message, Some(&token))),
                _ => {
                    self.lexer.put_token(token);
                    body.push(self.parse_expr_aux()?);
                }
            }
        }
    }

    // (import id[.id]* [{id | (id [id]*)} [{id | (id [id]*)}]])
    fn parse_import(&mut self) -> Result<Expr, Error> {
        self.expect_keyword(Keyword::Import)?;
        let path = self.parse_import_name_or_module()?;
        let members = self.parse_import_names("member names", true)?;
        let renames = self.parse_import_names("renames", false)?;
        if members.len() != renames.len() && !renames.is_empty() {
            return Err(self.error("Import as-names must be same form as member names", None));
        }
        self.expect_close_paren("Import must end with closing paren")?;
        Ok(Expr::Import {
            path,
            members,
            renames,
        })
    }

    fn parse_import_name_or_module(&mut self) -> Result<Vec<String>, Error> {
        let token = self.lexer.get_token()?;
        let first = match token {
            Token::Id(_) | Token::Keyword(..) => Expr::id(token.name().unwrap_or_default()),
            Token::String(path) => {
                let parts: Vec<String> = path.split('.').map(str::to_string).collect();
                if parts.iter().any(String::is_empty) {
                    return Err(self.error(
                        format!("Import path {path:?} must be dotted identifiers"),
                        None,
                    ));
                }
                return Ok(parts);
            }
            other => return Err(self.error("Id must follow Import symbol", Some(&other))),
        };

        let dot = self.lexer.get_token()?;
        let is_dot = dot == Token::Dot;
        self.lexer.put_token(dot);
        if !is_dot {
            return Ok(vec![first.as_id().map(|id| id.name.clone()).unwrap_or_default()]);
        }

        let Expr::Dotted { object, members } = self.parse_dotted_expr(first)? else {
            return Err(self.error("Internal error: expected dotted import path", None));
        };
        std::iter::once(*object)
            .chain(members)
            .map(|segment| match segment {
                Expr::Id(id) => Ok(id.name),
                other => Err(self.error(
                    format!("Import targets must be dotted identifiers -- {other}"),
                    None,
                )),
            })
            .collect()
    }

    fn parse_import_names(
        &mut self,
        name_kinds: &str,
        allow_keywords: bool,
    ) -> Result<Vec<String>, Error> {
        let token = self.lexer.get_token()?;
        match token {
            Token::Id(name) => Ok(vec![name]),
            Token::Keyword(_, name) if allow_keywords => Ok(vec![name]),
            Token::Paren => {
                self.lexer.put_token(token);
                let items = self.parse_list(&format!("Import {name_kinds}"))?;
                self.ensure_list_of_ids(
                    items,
                    allow_keywords,
                    &format!("Import {name_kinds} must be valid IDs"),
                )
            }
            Token::CloseParen => {
                self.lexer.put_token(token);
                Ok(Vec::new())
            }
            other => Err(self.error(
                "Import takes dotted names, then member vars",
                Some(&other),
            )),
        }
    }

    fn ensure_list_of_ids(
        &self,
        items: Vec<Expr>,
        allow_keywords: bool,
        message: &str,
    ) -> Result<Vec<String>, Error> {
        items
            .into_iter()
            .map(|item| match item {
                Expr::Id(id) if allow_keywords || !id.is_keyword() => Ok(id.name),
                other => Err(self.error(format!("{message} -- {other}"), None)),
            })
            .collect()
    }

    /// Members after `object`: identifiers or calls whose callee is an
    /// identifier, as in `a.b.(c 3).d`.
    fn parse_dotted_expr(&mut self, object: Expr) -> Result<Expr, Error> {
        let token = self.lexer.get_token()?;
        if token != Token::Dot {
            return Err(self.error("Internal error: parsing dotted expression", Some(&token)));
        }

        let mut members = Vec::new();
        let mut token = self.lexer.get_token()?;
        loop {
            let member = match token {
                // Keywords are fine as member names.
                Token::Id(name) => Expr::id(name),
                Token::Keyword(kw, name) => Expr::Id(Identifier {
                    name,
                    keyword: Some(kw),
                }),
                Token::Paren => {
                    self.lexer.put_token(token);
                    let form = self.parse_form()?;
                    match &form {
                        Expr::FunCall { callee, .. } if matches!(**callee, Expr::Id(_)) => form,
                        _ => {
                            return Err(self.error(
                                format!(
                                    "Dotted expressions must be identifiers or function calls \
                                     with identifiers as the function value -- {form}"
                                ),
                                None,
                            ));
                        }
                    }
                }
                other => {
                    return Err(self.error(
                        "Expected identifier or call after '.'",
                        Some(&other),
                    ));
                }
            };
            members.push(member);

            token = self.lexer.get_token()?;
            if token != Token::Dot {
                break;
            }
            token = self.lexer.get_token()?;
        }
        self.lexer.put_token(token);

        Ok(Expr::Dotted {
            object: Box::new(object),
            members,
        })
    }

    fn parse_set(&mut self) -> Result<Expr, Error> {
        self.expect_keyword(Keyword::Set)?;
        let target = self.parse_expr_aux()?;
        let value = self.parse_expr_aux()?;
        self.expect_close_paren("Expected close paren for Set expression")?;
        Ok(Expr::Assign {
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    // (let* ((<var> <expr>)*) <body>)
    fn parse_let_star(&mut self) -> Result<Expr, Error> {
        self.expect_keyword(Keyword::LetStar)?;
        let token = self.lexer.get_token()?;
        if token != Token::Paren {
            return Err(self.error("Let* expression has no bindings; missing '('", Some(&token)));
        }

        let mut bindings = Vec::new();
        let mut token = self.lexer.get_token()?;
        while token == Token::Paren {
            let name = match self.parse_expr_aux()? {
                Expr::Id(id) if !id.is_keyword() => id.name,
                other => {
                    return Err(self.error(
                        format!("Let binding must be (<ID> <expr>) -- {other}"),
                        None,
                    ));
                }
            };
            let init = self.parse_expr_aux()?;
            self.expect_close_paren(&format!("Let binding missing close paren -- {name}"))?;
            bindings.push((name, init));
            token = self.lexer.get_token()?;
        }
        if token != Token::CloseParen {
            return Err(self.error("Let bindings missing close paren", Some(&token)));
        }

        let body = self.parse_body("Unexpected EOF in Let*")?;
        Ok(Expr::LetStar { bindings, body })
    }

    fn parse_block(&mut self) -> Result<Expr, Error> {
        self.expect_keyword(Keyword::Block)?;
        Ok(Expr::Block(self.parse_body("Unexpected EOF in Block")?))
    }

    /// `(callee args...)`. A dotted callee must end in an identifier; the
    /// analyzer turns it into a member invoke on the preceding segments.
    fn parse_function_call(&mut self) -> Result<Expr, Error> {
        let callee = self.parse_expr_aux()?;
        if let Expr::Dotted { members, .. } = &callee
            && let Some(last) = members.last()
            && !matches!(last, Expr::Id(_))
        {
            return Err(self.error(
                format!(
                    "Function call with dotted expression for function must end with \
                     ID Expr, not member invoke -- {last}"
                ),
                None,
            ));
        }
        let args = self.parse_body(&format!("Unexpected EOF in arg list for {callee}"))?;
        Ok(Expr::FunCall {
            callee: Box::new(callee),
            args,
        })
    }

    fn parse_quote_expr(&mut self) -> Result<Expr, Error> {
        let token = self.lexer.get_token()?;
        if token != Token::Quote {
            return Err(self.error("Internal error: parsing quote", Some(&token)));
        }
        Ok(Expr::Quote(Box::new(self.parse_datum()?)))
    }

    // (quote <datum>)
    fn parse_quote_form(&mut self) -> Result<Expr, Error> {
        self.expect_keyword(Keyword::Quote)?;
        let datum = self.parse_datum()?;
        self.expect_close_paren("Expected close paren for Quote expression")?;
        Ok(Expr::Quote(Box::new(datum)))
    }

    /// A quoted list, identifier/keyword or literal.
    fn parse_datum(&mut self) -> Result<Expr, Error> {
        let token = self.lexer.get_token()?;
        match token {
            Token::Paren => {
                self.lexer.put_token(token);
                Ok(Expr::List(self.parse_list("quoted list")?))
            }
            Token::Id(name) => Ok(Expr::id(name)),
            Token::Keyword(kw, name) => Ok(Expr::Id(Identifier {
                name,
                keyword: Some(kw),
            })),
            Token::Number(n) => Ok(Expr::Literal(Literal::Int(n))),
            Token::String(s) => Ok(Expr::Literal(Literal::Str(s))),
            other => Err(self.error(
                "Quoted expression can only be list, ID/Symbol, or literal",
                Some(&other),
            )),
        }
    }

    fn parse_eq(&mut self) -> Result<Expr, Error> {
        self.expect_keyword(Keyword::Eq)?;
        let (left, right) = self.parse_two_operands("Eq")?;
        Ok(Expr::Eq(left, right))
    }

    fn parse_cons(&mut self) -> Result<Expr, Error> {
        self.expect_keyword(Keyword::Cons)?;
        let (left, right) = self.parse_two_operands("Cons")?;
        Ok(Expr::Cons(left, right))
    }

    /// Two expressions and the closing paren.
    fn parse_two_operands(&mut self, form: &str) -> Result<(Box<Expr>, Box<Expr>), Error> {
        let left = self.parse_expr_aux()?;
        let right = self.parse_expr_aux()?;
        self.expect_close_paren(&format!("Expected close paren for {form} expression"))?;
        Ok((Box::new(left), Box::new(right)))
    }

    fn parse_list_call(&mut self) -> Result<Expr, Error> {
        self.expect_keyword(Keyword::List)?;
        Ok(Expr::ListCall(
            self.parse_body("Unexpected EOF in arg list for call to List")?,
        ))
    }

    fn parse_if(&mut self) -> Result<Expr, Error> {
        self.expect_keyword(Keyword::If)?;
        let mut args = self.parse_body("Unexpected EOF in If form")?.into_iter();
        match (args.next(), args.next(), args.next(), args.next()) {
            (Some(test), Some(consequent), alternative, None) => Ok(Expr::If {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternative: alternative.map(Box::new),
            }),
            _ => Err(self.error(
                "IF must be (if <test> <consequent> [<alternative>])",
                None,
            )),
        }
    }

    fn parse_loop(&mut self) -> Result<Expr, Error> {
        self.expect_keyword(Keyword::Loop)?;
        Ok(Expr::Loop(self.parse_body("Unexpected EOF in Loop")?))
    }

    fn parse_break(&mut self) -> Result<Expr, Error> {
        self.expect_keyword(Keyword::Break)?;
        let token = self.lexer.get_token()?;
        if token == Token::CloseParen {
            return Ok(Expr::Break(None));
        }
        self.lexer.put_token(token);
        let value = self.parse_expr_aux()?;
        self.expect_close_paren("Break expression missing close paren")?;
        Ok(Expr::Break(Some(Box::new(value))))
    }

    fn parse_new(&mut self) -> Result<Expr, Error> {
        self.expect_keyword(Keyword::New)?;
        let type_expr = self.parse_expr_aux()?;
        let args = self.parse_body("Unexpected EOF in arg list for call to New")?;
        Ok(Expr::New {
            type_expr: Box::new(type_expr),
            args,
        })
    }

    /// Pure list structure whose atoms are identifiers, strings and numbers.
    /// Used for quoted lists, parameter lists and import name lists.
    fn parse_list(&mut self, what: &str) -> Result<Vec<Expr>, Error> {
        let token = self.lexer.get_token()?;
        if token != Token::Paren {
            return Err(self.error("List expression must start with '('", Some(&token)));
        }
        self.enter()?;
        let result = self.parse_list_items(what);
        self.depth -= 1;
        result
    }

    fn parse_list_items(&mut self, what: &str) -> Result<Vec<Expr>, Error> {
        let mut items = Vec::new();
        loop {
            let token = self.lexer.get_token()?;
            let item = match token {
                Token::CloseParen => return Ok(items),
                Token::Eof => {
                    return Err(self.error(
                        "Unexpected EOF encountered while parsing list",
                        Some(&token),
                    ));
                }
                Token::Paren => {
                    self.lexer.put_token(token);
                    Expr::List(self.parse_list(what)?)
                }
                Token::Id(name) => Expr::id(name),
                Token::Keyword(kw, name) => Expr::Id(Identifier {
                    name,
                    keyword: Some(kw),
                }),
                Token::Number(n) => Expr::Literal(Literal::Int(n)),
                Token::String(s) => Expr::Literal(Literal::Str(s)),
                Token::Dot => {
                    return Err(self.error(format!("Can't have dotted syntax in {what}"), Some(&token)));
                }
                Token::Quote => {
                    return Err(self.error(format!("Unexpected token in {what}"), Some(&token)));
                }
            };
            items.push(item);
        }
    }

    fn parse_elt(&mut self) -> Result<Expr, Error> {
        self.expect_keyword(Keyword::Elt)?;
        let object = self.parse_expr_aux()?;
        let indexes = self.parse_body("Unexpected EOF in arg list for call to Elt")?;
        Ok(Expr::Elt {
            object: Box::new(object),
            indexes,
        })
    }

    fn parse_binary_op(&mut self, op: BinaryOp) -> Result<Expr, Error> {
        self.lexer.get_token()?;
        let (left, right) = self.parse_two_operands(op.symbol())?;
        Ok(Expr::Binary { op, left, right })
    }

    fn parse_unary_op(&mut self) -> Result<Expr, Error> {
        self.expect_keyword(Keyword::Not)?;
        let operand = self.parse_expr_aux()?;
        self.expect_close_paren("Unary expression missing close paren")?;
        Ok(Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
        })
    }
}
