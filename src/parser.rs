//! PQL 的语法分析器
//!
//! ## 解析流程图
//!
//! ```text
//! parse()
//!   └─ parse_call() (以逗号分隔，顶层子句之间为隐式 AND)
//!        ├─ 函数名 (Identifier)，必须是已知函数
//!        ├─ 期望 '('
//!        ├─ parse_arg() (以逗号分隔)
//!        │    ├─ Identifier '(' → 嵌套调用，递归 parse_call()
//!        │    ├─ Identifier      → 字段名或嵌套路径
//!        │    ├─ '+' / '-' Identifier → 带方向的排序字段
//!        │    ├─ String / Number → 字面值
//!        │    └─ '*'             → 通配
//!        └─ 期望 ')'
//! ```
//!
//! 本阶段只检查语法（未知函数、括号、字面值）。参数个数、字段是否存在等
//! 检查由 [`crate::builder`] 在构建 AST 时完成。
//!
//! ## 解析示例
//!
//! ```text
//! select(*),facets(gender),eq(gender,'male'),sort(-ssmAffectedGenes),limit(0,25)
//! in(sequencingStrategyNested,'WGA','WGD')
//! nested(gene,eq(gene.id,'ENSG00000141510'),ne(gene.type,'pseudogene'))
//! ```

use crate::ast::Terminal;
use crate::builder::AstBuilder;
use crate::error::{PqlError, SyntaxError};
use crate::lexer::Lexer;
use crate::registry::TypeModel;
use crate::token::{Span, Token, TokenKind};

/// 语言中所有已知的函数名
pub const FUNCTIONS: &[&str] = &[
    "select", "sort", "facets", "limit", "count", "eq", "ne", "gt", "ge", "lt", "le", "in",
    "and", "or", "not", "nested", "exists", "missing",
];

/// 排序方向前缀
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
}

/// 函数调用，例如 `eq(gender,'male')`
#[derive(Debug, Clone, PartialEq)]
pub struct Call<'a> {
    pub name: &'a str,
    /// 从函数名到右括号的整个范围
    pub span: Span,
    pub args: Vec<Arg<'a>>,
}

/// 函数参数
#[derive(Debug, Clone, PartialEq)]
pub enum Arg<'a> {
    Call(Call<'a>),
    Ident { name: &'a str, sign: Option<Sign>, span: Span },
    Literal { value: Terminal, span: Span },
    Star(Span),
}

impl Arg<'_> {
    pub fn span(&self) -> Span {
        match self {
            Arg::Call(call) => call.span,
            Arg::Ident { span, .. } | Arg::Literal { span, .. } | Arg::Star(span) => *span,
        }
    }
}

pub struct Parser<'a> {
    source: &'a str,
    tokens: &'a [Token<'a>],
    position: usize,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str, tokens: &'a [Token<'a>]) -> Self {
        Self {
            source,
            tokens,
            position: 0,
        }
    }

    /// 返回当前 token，不推进位置
    fn peek(&self) -> Option<&'a Token<'a>> {
        self.tokens.get(self.position)
    }

    /// 返回下一个 token，不推进位置
    fn peek_next(&self) -> Option<&'a Token<'a>> {
        self.tokens.get(self.position + 1)
    }

    /// 返回当前 token 并推进位置
    fn advance(&mut self) -> Option<&'a Token<'a>> {
        let token = self.tokens.get(self.position)?;
        self.position += 1;
        Some(token)
    }

    /// 检查当前 token 是否匹配给定类型
    fn match_token(&self, kind: &TokenKind) -> bool {
        self.peek()
            .is_some_and(|token| std::mem::discriminant(&token.kind) == std::mem::discriminant(kind))
    }

    /// 期望特定类型的 token 并推进，否则返回错误
    fn expect(&mut self, expected: TokenKind, description: &str) -> Result<&'a Token<'a>, SyntaxError> {
        match self.peek() {
            Some(token) if std::mem::discriminant(&token.kind) == std::mem::discriminant(&expected) => {
                self.position += 1;
                Ok(token)
            }
            Some(token) => Err(self.unexpected(token, description)),
            None => Err(SyntaxError::end_of_input(format!(
                "Expected {}, but reached end of input",
                description
            ))),
        }
    }

    /// 根据 token 类型生成错误信息；词法错误优先报告
    fn unexpected(&self, token: &Token<'a>, description: &str) -> SyntaxError {
        let message = match &token.kind {
            TokenKind::UnterminatedString => "Unterminated string literal".to_string(),
            TokenKind::Illegal => "Illegal character or malformed number".to_string(),
            other => format!("Expected {}, found {:?}", description, other),
        };
        SyntaxError::at(message, self.source, token.span)
    }

    /// 解析整个查询：逗号分隔的顶层函数调用
    pub fn parse(&mut self) -> Result<Vec<Call<'a>>, SyntaxError> {
        let mut calls = Vec::new();
        if self.peek().is_none() {
            return Ok(calls); // 空查询
        }

        loop {
            calls.push(self.parse_call()?);
            match self.peek() {
                None => break,
                Some(token) if matches!(token.kind, TokenKind::Comma) => {
                    self.advance(); // 消费逗号
                }
                Some(token) => return Err(self.unexpected(token, "`,` between clauses")),
            }
        }

        Ok(calls)
    }

    /// 解析函数调用：`name(arg, arg, ...)`
    fn parse_call(&mut self) -> Result<Call<'a>, SyntaxError> {
        let name_token = self.expect(TokenKind::Identifier(""), "a function name")?;
        let TokenKind::Identifier(name) = name_token.kind else {
            return Err(self.unexpected(name_token, "a function name"));
        };
        if !FUNCTIONS.contains(&name) {
            return Err(SyntaxError::at(
                format!("Unknown function `{}`", name),
                self.source,
                name_token.span,
            ));
        }

        self.expect(TokenKind::LParen, "`(`")?;
        let mut args = Vec::new();

        // 解析逗号分隔的参数列表
        if !self.match_token(&TokenKind::RParen) {
            loop {
                args.push(self.parse_arg()?);
                if self.match_token(&TokenKind::RParen) {
                    break;
                }
                self.expect(TokenKind::Comma, "`,` or `)`")?;
            }
        }

        let close = self.expect(TokenKind::RParen, "`)`")?;
        Ok(Call {
            name,
            span: Span::new(name_token.span.start, close.span.end),
            args,
        })
    }

    fn parse_arg(&mut self) -> Result<Arg<'a>, SyntaxError> {
        let Some(token) = self.peek() else {
            return Err(SyntaxError::end_of_input("Expected an argument, but reached end of input"));
        };

        match &token.kind {
            TokenKind::Identifier(name) => {
                if self.peek_next().is_some_and(|next| matches!(next.kind, TokenKind::LParen)) {
                    return Ok(Arg::Call(self.parse_call()?));
                }
                self.advance();
                Ok(Arg::Ident { name: *name, sign: None, span: token.span })
            }
            TokenKind::Plus | TokenKind::Minus => {
                let sign = if matches!(token.kind, TokenKind::Plus) { Sign::Plus } else { Sign::Minus };
                self.advance(); // 消费符号
                let ident = self.expect(TokenKind::Identifier(""), "a field name after sign")?;
                let TokenKind::Identifier(name) = ident.kind else {
                    return Err(self.unexpected(ident, "a field name after sign"));
                };
                Ok(Arg::Ident {
                    name,
                    sign: Some(sign),
                    span: Span::new(token.span.start, ident.span.end),
                })
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(Arg::Literal { value: Terminal::String(s.to_string()), span: token.span })
            }
            TokenKind::Integer(n) => {
                self.advance();
                Ok(Arg::Literal { value: Terminal::Integer(*n), span: token.span })
            }
            TokenKind::Float(f) => {
                self.advance();
                Ok(Arg::Literal { value: Terminal::Float(*f), span: token.span })
            }
            TokenKind::Star => {
                self.advance();
                Ok(Arg::Star(token.span))
            }
            _ => Err(self.unexpected(token, "an argument")),
        }
    }
}

/// 对查询文本进行完整的解析：词法分析、语法分析、按实体类型构建 AST
pub fn parse(source: &str, model: &TypeModel) -> Result<crate::ast::ExpressionNode, PqlError> {
    let tokens: Vec<_> = Lexer::new(source).collect();
    let calls = Parser::new(source, &tokens).parse()?;
    AstBuilder::new(source, model).build(&calls)
}
