//! Structural form of a query.
//!
//! The AST flattens call wrappers into `params` on the node they wrap, so
//! a consumer can inspect what a query reads without matching on nested
//! [`Expr::Call`]s. Conversion in both directions is lossless up to the
//! equivalence of `(:k {})` and `:k` for reads.

use crate::component::ClassId;
use crate::query::{Expr, Key, Params, Query, Recursion, Subquery, Union};
use crate::value::Keyword;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AstKind {
    Property,
    Join,
    Union,
    Call,
}

/// A query as a list of nodes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ast {
    pub children: Vec<AstNode>,
    pub component: Option<ClassId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AstNode {
    Prop { key: Key, params: Params },
    Join { key: Key, params: Params, target: JoinTarget },
    /// A mutation; its parameters are always kept, even when empty.
    Call { key: Key, params: Params },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinTarget {
    Query(Ast),
    Union(UnionAst),
    Recur(Recursion),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnionAst {
    pub entries: Vec<(Keyword, Ast)>,
    pub component: Option<ClassId>,
    pub focused: bool,
}

impl AstNode {
    pub const fn kind(&self) -> AstKind {
        match self {
            Self::Prop { .. } => AstKind::Property,
            Self::Join {
                target: JoinTarget::Union(_),
                ..
            } => AstKind::Union,
            Self::Join { .. } => AstKind::Join,
            Self::Call { .. } => AstKind::Call,
        }
    }

    pub const fn key(&self) -> &Key {
        match self {
            Self::Prop { key, .. } | Self::Join { key, .. } | Self::Call { key, .. } => key,
        }
    }

    pub const fn params(&self) -> &Params {
        match self {
            Self::Prop { params, .. } | Self::Join { params, .. } | Self::Call { params, .. } => {
                params
            }
        }
    }
}

/// Convert a query into its AST.
pub fn to_ast(query: &Query) -> Ast {
    Ast {
        children: query.exprs().iter().map(expr_to_node).collect(),
        component: query.component().cloned(),
    }
}

fn expr_to_node(expr: &Expr) -> AstNode {
    let params = call_params(expr);
    match (expr.key(), expr.join_value()) {
        (key @ Key::Mutation(_), _) => AstNode::Call {
            key: key.clone(),
            params,
        },
        (key, None) => AstNode::Prop {
            key: key.clone(),
            params,
        },
        (key, Some(subquery)) => AstNode::Join {
            key: key.clone(),
            params,
            target: subquery_to_target(subquery),
        },
    }
}

/// Parameters of nested call wrappers, outer wrappers winning.
fn call_params(expr: &Expr) -> Params {
    match expr {
        Expr::Call(inner, params) => {
            let mut merged = call_params(inner);
            merged.extend(params.iter().map(|(name, value)| (name.clone(), value.clone())));
            merged
        }
        Expr::Prop(_) | Expr::Join(..) => Params::new(),
    }
}

fn subquery_to_target(subquery: &Subquery) -> JoinTarget {
    match subquery {
        Subquery::Query(query) => JoinTarget::Query(to_ast(query)),
        Subquery::Union(union) => JoinTarget::Union(UnionAst {
            entries: union
                .branches()
                .iter()
                .map(|(tag, query)| (tag.clone(), to_ast(query)))
                .collect(),
            component: union.component().cloned(),
            focused: union.is_focused(),
        }),
        Subquery::Recur(recursion) => JoinTarget::Recur(*recursion),
    }
}

/// Convert an AST back into a query.
pub fn from_ast(ast: &Ast) -> Query {
    ast.children
        .iter()
        .map(node_to_expr)
        .collect::<Query>()
        .with_owner(ast.component.clone())
}

fn node_to_expr(node: &AstNode) -> Expr {
    match node {
        AstNode::Call { key, params } => Expr::Call(Box::new(Expr::Prop(key.clone())), params.clone()),
        AstNode::Prop { key, params } => wrap(Expr::Prop(key.clone()), params),
        AstNode::Join {
            key,
            params,
            target,
        } => wrap(Expr::Join(key.clone(), target_to_subquery(target)), params),
    }
}

fn wrap(expr: Expr, params: &Params) -> Expr {
    if params.is_empty() {
        expr
    } else {
        expr.with_params(params.clone())
    }
}

fn target_to_subquery(target: &JoinTarget) -> Subquery {
    match target {
        JoinTarget::Query(ast) => Subquery::Query(from_ast(ast)),
        JoinTarget::Union(union) => {
            let rebuilt = Union::new(
                union
                    .entries
                    .iter()
                    .map(|(tag, ast)| (tag.clone(), from_ast(ast))),
            )
            .with_owner(union.component.clone());
            Subquery::Union(if union.focused {
                rebuilt.into_focused()
            } else {
                rebuilt
            })
        }
        JoinTarget::Recur(recursion) => Subquery::Recur(*recursion),
    }
}
