//! Attribute paths and comparison predicates.
//!
//! An [`Attr`] is a symbolic reference to a field of an entity, built by
//! chaining explicit field accesses and method wraps:
//!
//! ```
//! use restmodel::model::Attr;
//!
//! let created = Attr::root().field("ticket").field("created_at").call("month");
//! assert_eq!(created.key(), "month(ticket[created_at])");
//!
//! let open = Attr::root().field("status").eq("open");
//! assert_eq!(open.to_filter_entry(), ("status".to_string(), "open".to_string()));
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::model::common::display_value;
use crate::model::EntityDef;

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Field(String),
    Call(String),
}

/// Immutable path to a (possibly nested, possibly method-wrapped) field.
///
/// Every builder call returns a new path; the receiver is left untouched.
#[derive(Debug, Clone)]
pub struct Attr {
    segments: Vec<Segment>,
    owner: Option<Arc<EntityDef>>,
}

impl Attr {
    /// The root sentinel, addressing nothing until a field is accessed.
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
            owner: None,
        }
    }

    /// Root path bound to an entity definition, used to infer the kind of a
    /// query from its projected fields.
    pub fn of(owner: Arc<EntityDef>) -> Self {
        Self {
            segments: Vec::new(),
            owner: Some(owner),
        }
    }

    pub fn field(&self, name: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.segments.push(Segment::Field(name.into()));
        next
    }

    /// Wrap the path so far in a method call: `a.b` -> `name(a[b])`.
    pub fn call(&self, name: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.segments.push(Segment::Call(name.into()));
        next
    }

    pub fn owner(&self) -> Option<&Arc<EntityDef>> {
        self.owner.as_ref()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// The bracket/method-call composed key.
    pub fn key(&self) -> String {
        let mut key = String::new();
        for segment in &self.segments {
            key = match segment {
                Segment::Field(name) if key.is_empty() => name.clone(),
                Segment::Field(name) => format!("{}[{}]", key, name),
                Segment::Call(name) => format!("{}({})", name, key),
            };
        }
        key
    }

    fn compare(self, op: Op, value: Value) -> Predicate {
        Predicate {
            attr: self,
            op,
            value,
        }
    }

    pub fn eq(self, value: impl Into<Value>) -> Predicate {
        self.compare(Op::Eq, value.into())
    }

    pub fn ne(self, value: impl Into<Value>) -> Predicate {
        self.compare(Op::Ne, value.into())
    }

    pub fn lt(self, value: impl Into<Value>) -> Predicate {
        self.compare(Op::Lt, value.into())
    }

    pub fn le(self, value: impl Into<Value>) -> Predicate {
        self.compare(Op::Le, value.into())
    }

    pub fn gt(self, value: impl Into<Value>) -> Predicate {
        self.compare(Op::Gt, value.into())
    }

    pub fn ge(self, value: impl Into<Value>) -> Predicate {
        self.compare(Op::Ge, value.into())
    }

    /// Substring match, sent as `?*value*`.
    pub fn contains(self, value: impl Into<Value>) -> Predicate {
        let wrapped = format!("*{}*", display_value(&value.into()));
        self.compare(Op::Contains, Value::String(wrapped))
    }
}

impl PartialEq for Attr {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

impl Op {
    pub fn symbol(self) -> &'static str {
        match self {
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Contains => "?",
        }
    }

    /// Prefix used in structured `key=value` filters. Equality renders bare,
    /// inequality as `!`.
    pub fn filter_prefix(self) -> &'static str {
        match self {
            Op::Eq => "",
            Op::Ne => "!",
            other => other.symbol(),
        }
    }
}

/// An attribute path with a comparison attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    attr: Attr,
    op: Op,
    value: Value,
}

impl Predicate {
    pub fn attr(&self) -> &Attr {
        &self.attr
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn key(&self) -> String {
        self.attr.key()
    }

    /// Replace the comparison; the last one set wins.
    pub fn eq(self, value: impl Into<Value>) -> Predicate {
        self.attr.eq(value)
    }

    pub fn ne(self, value: impl Into<Value>) -> Predicate {
        self.attr.ne(value)
    }

    pub fn lt(self, value: impl Into<Value>) -> Predicate {
        self.attr.lt(value)
    }

    pub fn le(self, value: impl Into<Value>) -> Predicate {
        self.attr.le(value)
    }

    pub fn gt(self, value: impl Into<Value>) -> Predicate {
        self.attr.gt(value)
    }

    pub fn ge(self, value: impl Into<Value>) -> Predicate {
        self.attr.ge(value)
    }

    pub fn contains(self, value: impl Into<Value>) -> Predicate {
        self.attr.contains(value)
    }

    pub fn to_filter_entry(&self) -> (String, String) {
        (
            self.key(),
            format!("{}{}", self.op.filter_prefix(), display_value(&self.value)),
        )
    }

    /// `<key> <op> <json value>`, used inside free boolean expressions.
    pub fn to_expression_string(&self) -> String {
        format!("{} {} {}", self.key(), self.op.symbol(), self.value)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_expression_string())
    }
}
