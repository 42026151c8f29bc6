use std::rc::Rc;

use hashbrown::HashMap;
use itertools::Itertools;

use crate::{
    frontend::{
        intern::InternedSymbol,
        lexer::{Keyword, Lexer, Span, Token, TokenKind},
        ParseError, SourceFile, Unit,
    },
    middle::{
        ast::{Expression, ExpressionKind, Procedure, Statement, Suite},
        primitive::ScalarKind,
        registry::{Registry, Synchronization},
        ty::{Type, TypeKind},
    },
};

type ParseResult<T> = Result<T, ParseError>;

/// Left-hand side of a bind, before the value fills in missing annotations
enum Binder {
    Name {
        symbol: InternedSymbol,
        ty: Option<Type>,
        span: Span,
    },
    Tuple(Vec<Binder>),
}

/// Parses and types a unit in one go. Every name must be bound before it is
/// used, so types flow strictly forward through the text.
#[derive(Debug)]
pub struct Parser<'source> {
    lexer: Lexer<'source>,
    registry: Registry,
    /// Procedures defined so far, with their (poly)function types
    procedures: HashMap<InternedSymbol, Type>,
    /// Types of the names bound in the current procedure; the latest bind wins
    locals: HashMap<InternedSymbol, Type>,
}

impl<'source> Parser<'source> {
    pub fn parse_unit(source_file: &'source SourceFile) -> ParseResult<Unit> {
        let mut parser = Self {
            lexer: Lexer::new(source_file),
            registry: Registry::default(),
            procedures: HashMap::new(),
            locals: HashMap::new(),
        };

        let mut statements = Vec::new();

        while let Some(peeked) = parser.lexer.peek() {
            match peeked.kind {
                TokenKind::Keyword(Keyword::Declare) => parser.parse_declaration()?,
                TokenKind::Keyword(Keyword::Procedure) => {
                    statements.push(parser.parse_procedure()?)
                }
                _ => {
                    return Err(parser.error(
                        peeked.span,
                        format!(
                            "expected `procedure` or `declare` but found `{}`",
                            parser.text(peeked)
                        ),
                    ))
                }
            }
        }

        Ok(Unit {
            module: Suite::new(statements),
            registry: parser.registry,
        })
    }

    fn error(&self, span: Span, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            span,
        }
    }

    fn text(&self, token: Token) -> &'source str {
        self.lexer.source().value_of_span(token.span)
    }

    fn expect_peek(&mut self, expecting: &str) -> ParseResult<Token> {
        let Some(token) = self.lexer.peek() else {
            return Err(self.error(
                self.lexer.eof_span(),
                format!("expected {expecting} but reached end of file"),
            ));
        };

        if token.kind == TokenKind::Unknown {
            return Err(self.error(
                token.span,
                format!("unexpected character `{}`", self.text(token)),
            ));
        }

        Ok(token)
    }

    fn expect_next(&mut self, expecting: &str) -> ParseResult<Token> {
        let token = self.expect_peek(expecting)?;
        self.lexer.next();

        Ok(token)
    }

    fn expect_next_to_be(&mut self, kind: TokenKind) -> ParseResult<Token> {
        let token = self.expect_next(&format!("{kind:?}"))?;

        if token.kind != kind {
            return Err(self.error(
                token.span,
                format!("expected {kind:?} but found `{}`", self.text(token)),
            ));
        }

        Ok(token)
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> ParseResult<Token> {
        self.expect_next_to_be(TokenKind::Keyword(keyword))
    }

    fn next_is(&mut self, kind: TokenKind) -> bool {
        self.lexer.peek().is_some_and(|t| t.kind == kind)
    }

    /// Consumes the next token if it is of the given kind
    fn eat(&mut self, kind: TokenKind) -> bool {
        let found = self.next_is(kind);

        if found {
            self.lexer.next();
        }

        found
    }

    fn identifier(&self, token: Token) -> ParseResult<(InternedSymbol, Span)> {
        let value = self.text(token);

        if value.starts_with('_') {
            return Err(self.error(
                token.span,
                format!("identifier `{value}` is reserved: names starting with `_` belong to the compiler"),
            ));
        }

        Ok((InternedSymbol::new(value), token.span))
    }

    // xs
    fn parse_identifier(&mut self) -> ParseResult<(InternedSymbol, Span)> {
        let token = self.expect_next_to_be(TokenKind::Identifier)?;
        self.identifier(token)
    }

    /// declare name : type ( "forces" | "propagates" | "opaque" ) ;
    fn parse_declaration(&mut self) -> ParseResult<()> {
        self.expect_keyword(Keyword::Declare)?;

        let (name, span) = self.parse_identifier()?;
        self.expect_next_to_be(TokenKind::Colon)?;
        let signature = self.parse_type()?;

        let token = self.expect_next_to_be(TokenKind::Identifier)?;
        let synchronization = self.text(token).parse::<Synchronization>().map_err(|_| {
            self.error(
                token.span,
                format!(
                    "unknown synchronization `{}`, expected `forces`, `propagates` or `opaque`",
                    self.text(token)
                ),
            )
        })?;

        self.expect_next_to_be(TokenKind::Semicolon)?;

        if !signature.is_function() {
            return Err(self.error(
                span,
                format!("`{name}` must be declared with a function type, not {signature}"),
            ));
        }

        if self.procedures.contains_key(&name) {
            return Err(self.error(span, format!("`{name}` is already defined")));
        }

        self.registry.insert(name, signature, synchronization);

        Ok(())
    }

    /// procedure name ( "<" IDENTIFIER ( "," IDENTIFIER )* ">" )? "(" parameters ")" "->" type block
    fn parse_procedure(&mut self) -> ParseResult<Rc<Statement>> {
        self.expect_keyword(Keyword::Procedure)?;

        let (name, name_span) = self.parse_identifier()?;

        if self.procedures.contains_key(&name) || self.registry.contains(name) {
            return Err(self.error(name_span, format!("`{name}` is already defined")));
        }

        let mut type_variables = Vec::new();

        if self.eat(TokenKind::LessThan) {
            loop {
                let (variable, _) = self.parse_identifier()?;
                type_variables.push(Type::named(variable.value()));

                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }

            self.expect_next_to_be(TokenKind::GreaterThan)?;
        }

        self.locals.clear();

        let mut arguments = Vec::new();

        self.expect_next_to_be(TokenKind::OpenParen)?;

        if !self.next_is(TokenKind::CloseParen) {
            loop {
                let (argument, span) = self.parse_identifier()?;
                self.expect_next_to_be(TokenKind::Colon)?;
                let ty = self.parse_type()?;

                if self.locals.insert(argument, ty.clone()).is_some() {
                    return Err(self.error(span, format!("duplicate parameter `{argument}`")));
                }

                arguments.push(Expression::name(argument, ty, None));

                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }

        self.expect_next_to_be(TokenKind::CloseParen)?;
        self.expect_next_to_be(TokenKind::Arrow)?;

        let result = self.parse_type()?;
        let monotype = Type::function(arguments.iter().map(|a| a.ty.clone()), result);
        let ty = if type_variables.is_empty() {
            monotype
        } else {
            Type::polytype(type_variables, monotype)
        };

        // Registered before the body so that the procedure can call itself
        self.procedures.insert(name, ty.clone());

        let body = self.parse_block()?;

        Ok(Rc::new(Statement::Procedure(Rc::new(Procedure {
            name: Expression::name(name, ty, None),
            arguments: arguments.into(),
            body,
        }))))
    }

    // type = "forall" IDENTIFIER+ "." type
    //        | "[" type "]"
    //        | "(" type ( "," type )* ")"
    //        | "fn" "(" ( type ( "," type )* )? ")" "->" type
    //        | IDENTIFIER ( "<" type ( "," type )* ">" )?
    fn parse_type(&mut self) -> ParseResult<Type> {
        let token = self.expect_next("type")?;

        match token.kind {
            TokenKind::Keyword(Keyword::Forall) => {
                let mut variables = Vec::new();

                while !self.eat(TokenKind::Dot) {
                    let (variable, _) = self.parse_identifier()?;
                    variables.push(Type::named(variable.value()));
                }

                if variables.is_empty() {
                    return Err(self.error(token.span, "`forall` binds no type variables"));
                }

                let monotype = self.parse_type()?;

                Ok(Type::polytype(variables, monotype))
            }
            TokenKind::OpenBracket => {
                let element = self.parse_type()?;
                self.expect_next_to_be(TokenKind::CloseBracket)?;

                Ok(Type::sequence(element))
            }
            TokenKind::OpenParen => {
                let mut fields = vec![self.parse_type()?];

                while self.eat(TokenKind::Comma) {
                    fields.push(self.parse_type()?);
                }

                self.expect_next_to_be(TokenKind::CloseParen)?;

                // A single parenthesized type is just that type
                if fields.len() == 1 {
                    Ok(fields.remove(0))
                } else {
                    Ok(Type::tuple(fields))
                }
            }
            TokenKind::Keyword(Keyword::Fn) => {
                let mut parameters = Vec::new();

                self.expect_next_to_be(TokenKind::OpenParen)?;

                if !self.next_is(TokenKind::CloseParen) {
                    parameters.push(self.parse_type()?);

                    while self.eat(TokenKind::Comma) {
                        parameters.push(self.parse_type()?);
                    }
                }

                self.expect_next_to_be(TokenKind::CloseParen)?;
                self.expect_next_to_be(TokenKind::Arrow)?;

                let result = self.parse_type()?;

                Ok(Type::function(parameters, result))
            }
            TokenKind::Identifier => {
                let (name, _) = self.identifier(token)?;

                if !self.eat(TokenKind::LessThan) {
                    return Ok(Type::named(name.value()));
                }

                let mut parameters = vec![self.parse_type()?];

                while self.eat(TokenKind::Comma) {
                    parameters.push(self.parse_type()?);
                }

                self.expect_next_to_be(TokenKind::GreaterThan)?;

                Ok(Type::parametrized(name.value(), parameters))
            }
            _ => Err(self.error(
                token.span,
                format!("expected a type but found `{}`", self.text(token)),
            )),
        }
    }

    // "{" ( statement )* "}"
    fn parse_block(&mut self) -> ParseResult<Rc<Suite>> {
        let mut statements = Vec::new();

        self.expect_next_to_be(TokenKind::OpenBrace)?;

        while self.expect_peek("statement or closing brace")?.kind != TokenKind::CloseBrace {
            statements.push(self.parse_statement()?);
        }

        self.expect_next_to_be(TokenKind::CloseBrace)?;

        Ok(Suite::new(statements))
    }

    /// statement -> "return" expression ";"
    ///              | "if" expression block ( "else" ( block | if ) )?
    ///              | "while" expression block
    ///              | binder "=" expression ";"
    fn parse_statement(&mut self) -> ParseResult<Rc<Statement>> {
        let peeked = self.expect_peek("statement")?;

        match peeked.kind {
            TokenKind::Keyword(Keyword::Return) => {
                self.lexer.next();
                let value = self.parse_expression()?;
                self.expect_next_to_be(TokenKind::Semicolon)?;

                Ok(Statement::ret(value))
            }
            TokenKind::Keyword(Keyword::If) => self.parse_conditional(),
            TokenKind::Keyword(Keyword::While) => {
                self.lexer.next();
                let predicate = self.parse_expression()?;
                let body = self.parse_block()?;

                Ok(Rc::new(Statement::While { predicate, body }))
            }
            TokenKind::Identifier | TokenKind::OpenParen => self.parse_bind(),
            _ => Err(self.error(
                peeked.span,
                format!("expected a statement but found `{}`", self.text(peeked)),
            )),
        }
    }

    fn parse_conditional(&mut self) -> ParseResult<Rc<Statement>> {
        self.expect_keyword(Keyword::If)?;

        let test = self.parse_expression()?;
        let then = self.parse_block()?;

        let orelse = if self.eat(TokenKind::Keyword(Keyword::Else)) {
            if self.next_is(TokenKind::Keyword(Keyword::If)) {
                Suite::new(vec![self.parse_conditional()?])
            } else {
                self.parse_block()?
            }
        } else {
            Suite::new(Vec::new())
        };

        Ok(Rc::new(Statement::Conditional { test, then, orelse }))
    }

    fn parse_bind(&mut self) -> ParseResult<Rc<Statement>> {
        let binder = self.parse_binder()?;

        self.expect_next_to_be(TokenKind::Equals)?;
        let rhs = self.parse_expression()?;
        self.expect_next_to_be(TokenKind::Semicolon)?;

        // The value is typed against the bindings before this statement
        let lhs = self.bind_target(&binder, Some(&rhs.ty))?;

        Ok(Statement::bind(lhs, rhs))
    }

    // binder = IDENTIFIER ( ":" type )? | "(" binder ( "," binder )* ")"
    fn parse_binder(&mut self) -> ParseResult<Binder> {
        if self.eat(TokenKind::OpenParen) {
            let mut binders = vec![self.parse_binder()?];

            while self.eat(TokenKind::Comma) {
                binders.push(self.parse_binder()?);
            }

            self.expect_next_to_be(TokenKind::CloseParen)?;

            return Ok(Binder::Tuple(binders));
        }

        let (symbol, span) = self.parse_identifier()?;
        let ty = if self.eat(TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };

        Ok(Binder::Name { symbol, ty, span })
    }

    /// Builds the bound expression and records the new types of its names.
    /// Unannotated names take their type from the value.
    fn bind_target(&mut self, binder: &Binder, value: Option<&Type>) -> ParseResult<Rc<Expression>> {
        match binder {
            Binder::Name { symbol, ty, span } => {
                let Some(ty) = ty.clone().or_else(|| value.cloned()) else {
                    return Err(self.error(
                        *span,
                        format!("the type of `{symbol}` cannot be inferred, annotate it"),
                    ));
                };

                self.locals.insert(*symbol, ty.clone());

                Ok(Expression::name(*symbol, ty, None))
            }
            Binder::Tuple(binders) => {
                let fields = value
                    .and_then(|ty| ty.tuple_fields())
                    .filter(|fields| fields.len() == binders.len());

                let elements = binders
                    .iter()
                    .enumerate()
                    .map(|(i, binder)| self.bind_target(binder, fields.map(|f| &f[i])))
                    .collect::<ParseResult<Vec<_>>>()?;
                let ty = Type::tuple(elements.iter().map(|e| e.ty.clone()));

                Ok(Expression::tuple(elements, ty, None))
            }
        }
    }

    /// expression  -> logical_or
    /// logical_or  -> logical_and ( "||" logical_and )*
    /// logical_and -> comparison ( "&&" comparison )*
    /// comparison  -> term ( ( "==" | "!=" | "<" | "<=" | ">" | ">=" ) term )*
    /// term        -> factor ( ( "+" | "-" ) factor )*
    /// factor      -> unary ( ( "*" | "/" | "%" ) unary )*
    /// unary       -> "!" unary | "-" NUMBER | atom
    /// atom        -> IDENTIFIER ( "(" ( expression ( "," expression )* )? ")" )?
    ///                | NUMBER | BOOL
    ///                | "(" expression ( "," expression )* ")"
    ///                | "closure" IDENTIFIER "[" ( expression ( "," expression )* )? "]"
    ///
    /// Operators lower to calls of the `op_*` procedures.
    fn parse_expression(&mut self) -> ParseResult<Rc<Expression>> {
        self.parse_logical_or_expression()
    }

    fn parse_logical_or_expression(&mut self) -> ParseResult<Rc<Expression>> {
        self.parse_binary_level(
            |kind| kind == TokenKind::LogicalOr,
            Self::parse_logical_and_expression,
        )
    }

    fn parse_logical_and_expression(&mut self) -> ParseResult<Rc<Expression>> {
        self.parse_binary_level(
            |kind| kind == TokenKind::LogicalAnd,
            Self::parse_comparison_expression,
        )
    }

    fn parse_comparison_expression(&mut self) -> ParseResult<Rc<Expression>> {
        self.parse_binary_level(
            |kind| kind.is_comparison_operator(),
            Self::parse_term_expression,
        )
    }

    fn parse_term_expression(&mut self) -> ParseResult<Rc<Expression>> {
        self.parse_binary_level(
            |kind| kind.is_term_operator(),
            Self::parse_factor_expression,
        )
    }

    fn parse_factor_expression(&mut self) -> ParseResult<Rc<Expression>> {
        self.parse_binary_level(
            |kind| kind.is_factor_operator(),
            Self::parse_unary_expression,
        )
    }

    /// One left-associative precedence level
    fn parse_binary_level(
        &mut self,
        is_operator: impl Fn(TokenKind) -> bool,
        operand: fn(&mut Self) -> ParseResult<Rc<Expression>>,
    ) -> ParseResult<Rc<Expression>> {
        let mut expression = operand(self)?;

        while let Some(operator) = self.lexer.peek().filter(|t| is_operator(t.kind)) {
            self.lexer.next();

            let rhs = operand(self)?;
            expression = self.apply_operator(operator, vec![expression, rhs])?;
        }

        Ok(expression)
    }

    fn parse_unary_expression(&mut self) -> ParseResult<Rc<Expression>> {
        let peeked = self.expect_peek("expression")?;

        match peeked.kind {
            TokenKind::Bang => {
                self.lexer.next();
                let operand = self.parse_unary_expression()?;

                self.apply_operator(peeked, vec![operand])
            }
            TokenKind::Minus => {
                self.lexer.next();
                let number = self.expect_next("number")?;

                if !matches!(number.kind, TokenKind::IntegerLiteral | TokenKind::FloatLiteral) {
                    return Err(self.error(
                        peeked.span.to(number.span),
                        "negation only applies to number literals",
                    ));
                }

                Ok(self.literal(number, &format!("-{}", self.text(number))))
            }
            _ => self.parse_atom(),
        }
    }

    fn parse_atom(&mut self) -> ParseResult<Rc<Expression>> {
        let token = self.expect_next("expression")?;

        match token.kind {
            TokenKind::Identifier => {
                let (symbol, span) = self.identifier(token)?;
                let name = self.resolve_name(symbol, span)?;

                if !self.next_is(TokenKind::OpenParen) {
                    return Ok(name);
                }

                let (arguments, close) =
                    self.parse_argument_list(TokenKind::OpenParen, TokenKind::CloseParen)?;

                self.apply(name, arguments, span.to(close))
            }
            TokenKind::IntegerLiteral | TokenKind::FloatLiteral | TokenKind::BooleanLiteral => {
                Ok(self.literal(token, self.text(token)))
            }
            TokenKind::OpenParen => {
                let mut elements = vec![self.parse_expression()?];

                while self.eat(TokenKind::Comma) {
                    elements.push(self.parse_expression()?);
                }

                self.expect_next_to_be(TokenKind::CloseParen)?;

                if elements.len() == 1 {
                    return Ok(elements.remove(0));
                }

                let ty = Type::tuple(elements.iter().map(|e| e.ty.clone()));

                Ok(Expression::tuple(elements, ty, None))
            }
            TokenKind::Keyword(Keyword::Closure) => self.parse_closure(token),
            _ => Err(self.error(
                token.span,
                format!("expected an expression but found `{}`", self.text(token)),
            )),
        }
    }

    // closure f [a, b]
    fn parse_closure(&mut self, keyword: Token) -> ParseResult<Rc<Expression>> {
        let (symbol, span) = self.parse_identifier()?;
        let function = self.resolve_name(symbol, span)?;

        let (captured, close) =
            self.parse_argument_list(TokenKind::OpenBracket, TokenKind::CloseBracket)?;

        // Curry the signature at the captured parameters and let instantiation
        // bind whatever type variables the captured values determine
        let curried = match &*function.ty {
            TypeKind::Polytype {
                variables,
                monotype,
            } => curry(monotype, captured.len())
                .map(|ty| Type::polytype(variables.iter().cloned(), ty)),
            _ => curry(&function.ty, captured.len()),
        };
        let captured_types = captured.iter().map(|c| c.ty.clone()).collect::<Vec<_>>();

        let Some((_, ty)) = curried.and_then(|ty| ty.instantiate(&captured_types)) else {
            return Err(self.error(
                keyword.span.to(close),
                format!(
                    "`{symbol}` of type {} cannot capture ({})",
                    function.ty,
                    captured_types.iter().join(", ")
                ),
            ));
        };

        Ok(Expression::new(
            ExpressionKind::Closure {
                function,
                captured: captured.into(),
            },
            ty,
            None,
        ))
    }

    fn parse_argument_list(
        &mut self,
        open: TokenKind,
        close: TokenKind,
    ) -> ParseResult<(Vec<Rc<Expression>>, Span)> {
        let mut arguments = Vec::new();

        self.expect_next_to_be(open)?;

        if !self.next_is(close) {
            arguments.push(self.parse_expression()?);

            while self.eat(TokenKind::Comma) {
                arguments.push(self.parse_expression()?);
            }
        }

        let close = self.expect_next_to_be(close)?;

        Ok((arguments, close.span))
    }

    fn literal(&self, token: Token, text: &str) -> Rc<Expression> {
        let kind = match token.kind {
            TokenKind::IntegerLiteral => ScalarKind::Int32,
            TokenKind::FloatLiteral => ScalarKind::Float32,
            _ => ScalarKind::Bool,
        };

        Expression::literal(InternedSymbol::new(text), Type::scalar(kind), None)
    }

    /// A name typed by its latest local binding, a procedure of this unit or
    /// a registry signature, in that order
    fn resolve_name(&self, symbol: InternedSymbol, span: Span) -> ParseResult<Rc<Expression>> {
        let ty = self
            .locals
            .get(&symbol)
            .or_else(|| self.procedures.get(&symbol))
            .or_else(|| self.registry.get(symbol).map(|info| &info.signature))
            .cloned()
            .ok_or_else(|| self.error(span, format!("`{symbol}` is not defined")))?;

        Ok(Expression::name(symbol, ty, None))
    }

    fn apply_operator(
        &self,
        operator: Token,
        arguments: Vec<Rc<Expression>>,
    ) -> ParseResult<Rc<Expression>> {
        let Some(procedure) = operator.kind.operator_procedure() else {
            return Err(self.error(
                operator.span,
                format!("`{}` is not an operator", self.text(operator)),
            ));
        };

        let function = self.resolve_name(InternedSymbol::new(procedure), operator.span)?;

        self.apply(function, arguments, operator.span)
    }

    /// A call typed by instantiating the callee's signature at the argument
    /// types
    fn apply(
        &self,
        function: Rc<Expression>,
        arguments: Vec<Rc<Expression>>,
        span: Span,
    ) -> ParseResult<Rc<Expression>> {
        let argument_types = arguments.iter().map(|a| a.ty.clone()).collect::<Vec<_>>();

        let Some((_, result)) = function.ty.instantiate(&argument_types) else {
            return Err(self.error(
                span,
                format!(
                    "`{function}` of type {} cannot be applied to ({})",
                    function.ty,
                    argument_types.iter().join(", ")
                ),
            ));
        };

        Ok(Expression::apply(function, arguments, result, None))
    }
}

/// `fn(A, B) -> R` curried after `count` parameters: `fn(A) -> fn(B) -> R`
fn curry(monotype: &Type, count: usize) -> Option<Type> {
    let TypeKind::Function { parameters, result } = &**monotype else {
        return None;
    };

    (count <= parameters.len()).then(|| {
        Type::function(
            parameters[..count].iter().cloned(),
            Type::function(parameters[count..].iter().cloned(), result.clone()),
        )
    })
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::frontend::parse_str;

    fn parse(source: &str) -> Unit {
        parse_str(source).expect("valid source")
    }

    fn parse_error(source: &str) -> ParseError {
        parse_str(source).expect_err("invalid source")
    }

    /// The value of the `index`th statement of `procedure`, which must be a
    /// bind or a return
    fn value_type(unit: &Unit, procedure: &str, index: usize) -> String {
        let procedure = unit
            .module
            .find_procedure(procedure.into())
            .expect("procedure is defined");

        match &*procedure.body.statements[index] {
            Statement::Bind { rhs, .. } => rhs.ty.to_string(),
            Statement::Return(value) => value.ty.to_string(),
            other => panic!("not a bind or return: {other}"),
        }
    }

    #[test]
    fn declarations_feed_the_registry() {
        let unit = parse(indoc! {"
            declare map : forall a b . fn(fn(a) -> b, [a]) -> [b] propagates;
            procedure entry(xs: [Float32]) -> [Float32] {
                return xs;
            }
        "});

        let map = unit.registry.get("map".into()).expect("map is declared");

        assert_eq!(unit.module.statements.len(), 1);
        assert_eq!(map.synchronization, Synchronization::Propagates);
        assert_eq!(
            map.signature.to_string(),
            "Polytype(a, b, Fn(Tuple(Fn(Tuple(a), b), Seq(a)), Seq(b)))"
        );
        assert!(unit.registry.contains("op_add".into()));
    }

    #[test]
    fn operators_follow_precedence() {
        let unit = parse(indoc! {"
            procedure entry(a: Int32, b: Int32, c: Bool) -> Bool {
                r: Bool = a + b * 2 < 10 && !c || a == -1;
                return r;
            }
        "});

        assert_eq!(
            unit.module.procedure_lines("entry").expect("entry is defined"),
            [
                "r = op_or(op_and(op_lt(op_add(a, op_mul(b, 2)), 10), op_not(c)), op_eq(a, -1))",
                "return r",
            ]
        );
        assert_eq!(value_type(&unit, "entry", 0), "Bool");
    }

    #[test]
    fn call_types_come_from_instantiation() {
        let unit = parse(indoc! {"
            declare map : forall a b . fn(fn(a) -> b, [a]) -> [b] propagates;
            declare round : fn(Float32) -> Int32 opaque;
            procedure entry(xs: [Float32]) -> [Int32] {
                ys = map(round, xs);
                return ys;
            }
        "});

        assert_eq!(value_type(&unit, "entry", 0), "Seq(Int32)");
        assert_eq!(value_type(&unit, "entry", 1), "Seq(Int32)");
    }

    #[test]
    fn generic_procedures_are_polytypes() {
        let unit = parse(indoc! {"
            procedure id<a>(x: a) -> a {
                return x;
            }
            procedure entry(n: Int32) -> Int32 {
                m: Int32 = id(n);
                return m;
            }
        "});

        let id = unit.module.find_procedure("id".into()).expect("id is defined");

        assert_eq!(id.name.ty.to_string(), "Polytype(a, Fn(Tuple(a), a))");
        assert_eq!(value_type(&unit, "entry", 0), "Int32");
    }

    #[test]
    fn closures_drop_captured_parameters() {
        let unit = parse(indoc! {"
            declare lookup : fn([Float32], Float32) -> Float32 opaque;
            declare scale : forall a . fn(a, a) -> a opaque;
            procedure entry(xs: [Float32], f: Float32) -> Float32 {
                g = closure lookup [xs];
                h = closure scale [f];
                return f;
            }
        "});

        assert_eq!(
            unit.module.procedure_lines("entry").expect("entry is defined")[0],
            "g = closure lookup [xs]"
        );
        assert_eq!(value_type(&unit, "entry", 0), "Fn(Tuple(Float32), Float32)");
        assert_eq!(value_type(&unit, "entry", 1), "Fn(Tuple(Float32), Float32)");
    }

    #[test]
    fn tuple_binders_and_chained_conditionals() {
        let unit = parse(indoc! {"
            procedure entry(p: (Int32, Int32), c: Bool) -> Int32 {
                (a, b: Int32) = p;
                if c {
                    a = b;
                } else if a > b {
                    b = a;
                }
                return a;
            }
        "});

        assert_eq!(
            unit.module.procedure_lines("entry").expect("entry is defined"),
            [
                "(a, b) = p",
                "if c {",
                "    a = b",
                "} else {",
                "    if op_gt(a, b) {",
                "        b = a",
                "    } else {",
                "    }",
                "}",
                "return a",
            ]
        );
    }

    #[test]
    fn reserved_identifiers_are_rejected() {
        let error = parse_error("procedure entry(_x: Int32) -> Int32 { return _x; }");

        assert!(error.message.contains("reserved"), "{}", error.message);
        assert_eq!(error.span, Span::new(16, 18));
    }

    #[test]
    fn names_must_be_bound_before_use() {
        let error = parse_error(indoc! {"
            procedure entry(x: Int32) -> Int32 {
                return y;
            }
        "});

        assert_eq!(error.message, "`y` is not defined");
    }

    #[test]
    fn calls_must_fit_the_signature() {
        let error = parse_error(indoc! {"
            declare incr : fn(Float32) -> Float32 opaque;
            procedure entry(x: Float32) -> Float32 {
                return incr(x, x);
            }
        "});

        assert!(error.message.starts_with("`incr` of type Fn(Tuple(Float32), Float32)"));
    }

    #[test]
    fn malformed_text_is_reported() {
        assert_eq!(
            parse_error("procedure entry(x: Int32) -> Int32 { return x @ 1; }").message,
            "unexpected character `@`"
        );
        assert!(parse_error("procedure entry(x: Int32) -> Int32 { return x")
            .message
            .ends_with("reached end of file"));
        assert!(parse_error("declare f : fn(Int32) -> Int32 sometimes;")
            .message
            .starts_with("unknown synchronization `sometimes`"));
        assert!(parse_error("declare f : Int32 opaque;")
            .message
            .contains("function type"));
    }
}
