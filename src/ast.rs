//! PQL 抽象语法树
//!
//! 每个节点独占其子节点，没有父指针：各个改写阶段读取一棵不可变的输入树，
//! 产出一棵新的输出树，因此同一子树不会同时挂在两个父节点之下。

use std::fmt;

use serde_json::Value;

/// 字面量的类型标记
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    String,
    Integer,
    Float,
}

/// 叶子字面量（字符串或数字）
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    String(String),
    Integer(i64),
    Float(f64),
}

impl Terminal {
    pub fn kind(&self) -> TerminalKind {
        match self {
            Terminal::String(_) => TerminalKind::String,
            Terminal::Integer(_) => TerminalKind::Integer,
            Terminal::Float(_) => TerminalKind::Float,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Terminal::String(_))
    }

    /// 转换为后端使用的 JSON 值
    pub fn to_json(&self) -> Value {
        match self {
            Terminal::String(s) => Value::from(s.as_str()),
            Terminal::Integer(n) => Value::from(*n),
            Terminal::Float(f) => Value::from(*f),
        }
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::String(s) => write!(f, "'{}'", s),
            Terminal::Integer(n) => write!(f, "{}", n),
            Terminal::Float(x) => write!(f, "{}", x),
        }
    }
}

/// 范围比较的边界类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeBound {
    Gt,  // >
    Gte, // >=
    Lt,  // <
    Lte, // <=
}

impl RangeBound {
    pub fn as_str(&self) -> &'static str {
        match self {
            RangeBound::Gt => "gt",
            RangeBound::Gte => "gte",
            RangeBound::Lt => "lt",
            RangeBound::Lte => "lte",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// 相关性得分的排序字段名
pub const SCORE_FIELD: &str = "_score";

#[derive(Debug, Clone, PartialEq)]
pub struct SortField {
    /// 物理字段路径，或 [`SCORE_FIELD`]
    pub field: String,
    pub order: SortOrder,
}

/// 对单个字段的分面（按值计数）请求
#[derive(Debug, Clone, PartialEq)]
pub struct TermsAggregation {
    /// 结果中的分面名称
    pub name: String,
    /// 物理字段路径
    pub field: String,
    /// 字段所在的嵌套文档路径（如果有）
    pub nested: Option<String>,
    /// 桶数量上限，由分面解析阶段根据配置填入
    pub size: Option<usize>,
}

/// 外部存储的 id 集合过滤器：匹配 `field` 的值属于该集合的文档
#[derive(Debug, Clone, PartialEq)]
pub struct TermsLookup {
    pub field: String,
    pub index: String,
    pub doc_type: String,
    pub id: String,
    pub path: String,
}

/// 表达式节点
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionNode {
    /// 整个查询
    Root(Vec<ExpressionNode>),
    /// 过滤条件子树
    Filter(Box<ExpressionNode>),
    /// 分面解析之后承载原始过滤条件，用于分页与打分
    Query(Box<ExpressionNode>),

    // 布尔组合
    Bool {
        must: Vec<ExpressionNode>,
        should: Vec<ExpressionNode>,
        must_not: Vec<ExpressionNode>,
    },
    And(Vec<ExpressionNode>),
    Or(Vec<ExpressionNode>),
    Not(Box<ExpressionNode>),

    // 叶子条件
    Term { field: String, value: Terminal },
    Terms { field: String, values: Vec<Terminal> },
    Range { field: String, bound: RangeBound, value: Terminal },
    Exists { field: String },
    Missing { field: String },
    TermsLookup(TermsLookup),
    MatchAll,

    /// 在重复子文档的单个实例上求值 `inner`
    Nested { path: String, inner: Box<ExpressionNode> },

    // 分面
    Aggregations(Vec<ExpressionNode>),
    TermsAggregation(TermsAggregation),
    FilterAggregation { filters: Box<ExpressionNode>, inner: TermsAggregation },

    // 请求形态
    Select(Vec<String>),
    Sort(Vec<SortField>),
    Limit { from: usize, size: usize },
    Count,
}

impl ExpressionNode {
    /// 构造 AND，单个子节点时直接返回该子节点
    pub fn and(mut children: Vec<ExpressionNode>) -> ExpressionNode {
        if children.len() == 1 {
            children.remove(0)
        } else {
            ExpressionNode::And(children)
        }
    }

    /// 构造 OR，单个子节点时直接返回该子节点
    pub fn or(mut children: Vec<ExpressionNode>) -> ExpressionNode {
        if children.len() == 1 {
            children.remove(0)
        } else {
            ExpressionNode::Or(children)
        }
    }

    /// 叶子条件所引用的字段
    pub fn field(&self) -> Option<&str> {
        match self {
            ExpressionNode::Term { field, .. }
            | ExpressionNode::Terms { field, .. }
            | ExpressionNode::Range { field, .. }
            | ExpressionNode::Exists { field }
            | ExpressionNode::Missing { field } => Some(field),
            ExpressionNode::TermsLookup(lookup) => Some(&lookup.field),
            _ => None,
        }
    }

    /// 按顺序返回直接子节点
    pub fn children(&self) -> Vec<&ExpressionNode> {
        match self {
            ExpressionNode::Root(children)
            | ExpressionNode::And(children)
            | ExpressionNode::Or(children)
            | ExpressionNode::Aggregations(children) => children.iter().collect(),
            ExpressionNode::Bool { must, should, must_not } => {
                must.iter().chain(should).chain(must_not).collect()
            }
            ExpressionNode::Filter(inner)
            | ExpressionNode::Query(inner)
            | ExpressionNode::Not(inner)
            | ExpressionNode::Nested { inner, .. } => vec![inner.as_ref()],
            ExpressionNode::FilterAggregation { filters, .. } => vec![filters.as_ref()],
            ExpressionNode::Term { .. }
            | ExpressionNode::Terms { .. }
            | ExpressionNode::Range { .. }
            | ExpressionNode::Exists { .. }
            | ExpressionNode::Missing { .. }
            | ExpressionNode::TermsLookup(_)
            | ExpressionNode::MatchAll
            | ExpressionNode::TermsAggregation(_)
            | ExpressionNode::Select(_)
            | ExpressionNode::Sort(_)
            | ExpressionNode::Limit { .. }
            | ExpressionNode::Count => Vec::new(),
        }
    }

    /// 先序遍历，收集满足条件的节点
    pub fn collect<'a>(&'a self, predicate: &dyn Fn(&ExpressionNode) -> bool, out: &mut Vec<&'a ExpressionNode>) {
        if predicate(self) {
            out.push(self);
        }
        for child in self.children() {
            child.collect(predicate, out);
        }
    }

    /// 子树中引用 `field` 的叶子条件数量
    pub fn count_field(&self, field: &str) -> usize {
        let mut found = Vec::new();
        self.collect(&|node| node.field() == Some(field), &mut found);
        found.len()
    }

    /// Root 的直接子节点；非 Root 节点返回空切片
    pub fn root_children(&self) -> &[ExpressionNode] {
        match self {
            ExpressionNode::Root(children) => children,
            _ => &[],
        }
    }

    /// Root 下的过滤条件（`Filter` 或 `Query` 的内容）
    pub fn root_filter(&self) -> Option<&ExpressionNode> {
        self.root_children().iter().find_map(|child| match child {
            ExpressionNode::Filter(inner) | ExpressionNode::Query(inner) => Some(inner.as_ref()),
            _ => None,
        })
    }

    /// Root 下的分面请求
    pub fn root_aggregations(&self) -> Option<&[ExpressionNode]> {
        self.root_children().iter().find_map(|child| match child {
            ExpressionNode::Aggregations(aggs) => Some(aggs.as_slice()),
            _ => None,
        })
    }

    pub fn is_count(&self) -> bool {
        self.root_children().iter().any(|child| matches!(child, ExpressionNode::Count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(field: &str, value: &str) -> ExpressionNode {
        ExpressionNode::Term { field: field.to_string(), value: Terminal::String(value.to_string()) }
    }

    #[test]
    fn test_and_or_collapse_singletons() {
        assert_eq!(ExpressionNode::and(vec![term("a", "1")]), term("a", "1"));
        assert_eq!(ExpressionNode::or(vec![term("a", "1")]), term("a", "1"));
        assert!(matches!(
            ExpressionNode::and(vec![term("a", "1"), term("b", "2")]),
            ExpressionNode::And(children) if children.len() == 2
        ));
    }

    #[test]
    fn test_count_field_walks_nested_booleans() {
        let tree = ExpressionNode::And(vec![
            term("gender", "male"),
            ExpressionNode::Or(vec![
                term("gender", "female"),
                ExpressionNode::Not(Box::new(term("project", "X"))),
            ]),
            ExpressionNode::Nested {
                path: "gene".to_string(),
                inner: Box::new(term("gene.id", "G1")),
            },
        ]);
        assert_eq!(tree.count_field("gender"), 2);
        assert_eq!(tree.count_field("project"), 1);
        assert_eq!(tree.count_field("gene.id"), 1);
        assert_eq!(tree.count_field("other"), 0);
    }

    #[test]
    fn test_root_accessors() {
        let root = ExpressionNode::Root(vec![
            ExpressionNode::Select(vec!["id".to_string()]),
            ExpressionNode::Filter(Box::new(term("a", "1"))),
            ExpressionNode::Count,
        ]);
        assert_eq!(root.root_filter(), Some(&term("a", "1")));
        assert!(root.root_aggregations().is_none());
        assert!(root.is_count());
    }

    #[test]
    fn test_terminal_kinds_and_json() {
        assert_eq!(Terminal::String("x".into()).kind(), TerminalKind::String);
        assert_eq!(Terminal::Integer(3).to_json(), serde_json::json!(3));
        assert_eq!(Terminal::Float(0.5).to_json(), serde_json::json!(0.5));
        assert!(Terminal::Float(0.5).is_numeric());
        assert_eq!(Terminal::String("MU1".into()).to_string(), "'MU1'");
    }
}
