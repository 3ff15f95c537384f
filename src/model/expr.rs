use std::fmt;
use std::sync::Arc;

use itertools::Itertools;

use crate::model::{Attr, EntityDef, Predicate};

/// A renderable free-form boolean expression, sent inside the `q` parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Predicate(Predicate),
    /// A bare key with no comparison
    Key(Attr),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    /// Pre-rendered expression text, passed through untouched
    Raw(String),
}

impl Expr {
    pub fn render(&self) -> String {
        match self {
            Expr::Predicate(p) => p.to_expression_string(),
            Expr::Key(attr) => attr.key(),
            Expr::And(items) => group(items, "&&"),
            Expr::Or(items) => group(items, "||"),
            Expr::Raw(text) => text.clone(),
        }
    }
}

fn group(items: &[Expr], op: &str) -> String {
    format!(
        "( {} )",
        items.iter().map(Expr::render).join(&format!(" {} ", op))
    )
}

/// `( e1 && e2 ... )`
pub fn and<I, E>(items: I) -> Expr
where
    I: IntoIterator<Item = E>,
    E: Into<Expr>,
{
    Expr::And(items.into_iter().map(Into::into).collect())
}

/// `( e1 || e2 ... )`
pub fn or<I, E>(items: I) -> Expr
where
    I: IntoIterator<Item = E>,
    E: Into<Expr>,
{
    Expr::Or(items.into_iter().map(Into::into).collect())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<Predicate> for Expr {
    fn from(p: Predicate) -> Self {
        Expr::Predicate(p)
    }
}

impl From<Attr> for Expr {
    fn from(attr: Attr) -> Self {
        Expr::Key(attr)
    }
}

impl From<&str> for Expr {
    fn from(text: &str) -> Self {
        Expr::Raw(text.to_string())
    }
}

impl From<String> for Expr {
    fn from(text: String) -> Self {
        Expr::Raw(text)
    }
}

/// An entry of a `fields`, `group_by` or `order_by` sequence.
#[derive(Debug, Clone)]
pub enum Field {
    Text(String),
    Path(Attr),
    /// The entity itself, rendered as `*`
    Entity(Arc<EntityDef>),
}

impl Field {
    pub fn render(&self) -> String {
        match self {
            Field::Text(text) => text.clone(),
            Field::Path(attr) => attr.key(),
            Field::Entity(_) => "*".to_string(),
        }
    }

    /// The entity definition this field belongs to, if it names one.
    pub fn owner(&self) -> Option<&Arc<EntityDef>> {
        match self {
            Field::Text(_) => None,
            Field::Path(attr) => attr.owner(),
            Field::Entity(def) => Some(def),
        }
    }
}

impl From<&str> for Field {
    fn from(text: &str) -> Self {
        Field::Text(text.to_string())
    }
}

impl From<String> for Field {
    fn from(text: String) -> Self {
        Field::Text(text)
    }
}

impl From<Attr> for Field {
    fn from(attr: Attr) -> Self {
        Field::Path(attr)
    }
}

impl From<Arc<EntityDef>> for Field {
    fn from(def: Arc<EntityDef>) -> Self {
        Field::Entity(def)
    }
}

impl From<&Arc<EntityDef>> for Field {
    fn from(def: &Arc<EntityDef>) -> Self {
        Field::Entity(Arc::clone(def))
    }
}
