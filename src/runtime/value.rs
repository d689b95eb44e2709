//! Dynamic values threaded through composed steps
//!
//! Tuples are immutable and at least binary; pairs are the 2-tuple
//! specialization with shared mutable slots, the one sanctioned escape
//! hatch for carrying state through a value-passing chain.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use once_cell::unsync::OnceCell;

use super::error::{ValueError, ValueResult};

/// A dynamic value carried through a step chain
#[derive(Clone)]
pub enum Value {
    /// Absence of a value
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Text
    Text(Rc<str>),
    /// Named fields (event details, small records)
    Record(Rc<BTreeMap<String, Value>>),
    /// Immutable tuple of arity >= 2
    Tuple(Tuple),
    /// Pair with shared mutable slots
    Pair(Pair),
    /// Tagged yield from a loop body
    Loop(LoopYield),
    /// Application-owned payload, compared by identity
    Opaque(Rc<dyn Any>),
}

impl Value {
    /// Short kind name, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Record(_) => "record",
            Value::Tuple(_) => "tuple",
            Value::Pair(_) => "pair",
            Value::Loop(_) => "loop",
            Value::Opaque(_) => "opaque",
        }
    }

    /// Build a text value
    pub fn text(s: impl AsRef<str>) -> Self {
        Value::Text(Rc::from(s.as_ref()))
    }

    /// Build a record value from named fields
    pub fn record<'a>(fields: impl IntoIterator<Item = (&'a str, Value)>) -> Self {
        let map = fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Value::Record(Rc::new(map))
    }

    /// Build a pair value
    pub fn pair(fst: Value, snd: Value) -> Self {
        Value::Pair(Pair::new(fst, snd))
    }

    /// Build a tuple value; fails for fewer than two components
    pub fn tuple(items: Vec<Value>) -> ValueResult<Self> {
        Ok(Value::Tuple(Tuple::new(items)?))
    }

    /// Wrap an application payload
    pub fn opaque(payload: Rc<dyn Any>) -> Self {
        Value::Opaque(payload)
    }

    /// Collapse a list of values the way variadic call sites do:
    /// none yields `Null`, one yields the value itself, two yields a
    /// pair, more yield a tuple.
    pub fn from_values(mut items: Vec<Value>) -> Self {
        match items.len() {
            0 => Value::Null,
            1 => items.pop().unwrap_or(Value::Null),
            2 => {
                let snd = items.pop().unwrap_or(Value::Null);
                let fst = items.pop().unwrap_or(Value::Null);
                Value::pair(fst, snd)
            }
            _ => Value::Tuple(Tuple::new_unchecked(items)),
        }
    }

    /// Tag a value as "run the loop body again"
    pub fn continue_with(value: Value) -> Self {
        Value::Loop(LoopYield::Continue(Rc::new(value)))
    }

    /// Tag a value as "the loop is finished"
    pub fn done_with(value: Value) -> Self {
        Value::Loop(LoopYield::Done(Rc::new(value)))
    }

    /// Look up a field when the value is a record
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record(map) => map.get(name),
            _ => None,
        }
    }

    /// Integer view, if this value is an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Text view, if this value is text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Components view shared by tuples and pairs; `None` for leaves
    pub(crate) fn components(&self) -> Option<Vec<Value>> {
        match self {
            Value::Tuple(t) => Some(t.items().to_vec()),
            Value::Pair(p) => Some(vec![p.fst(), p.snd()]),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a.items() == b.items(),
            (Value::Pair(a), Value::Pair(b)) => a.fst() == b.fst() && a.snd() == b.snd(),
            (Value::Loop(a), Value::Loop(b)) => a == b,
            (Value::Opaque(a), Value::Opaque(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
            Value::Record(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{k}:{v}")?;
                }
                write!(f, "}}")
            }
            Value::Tuple(t) => {
                write!(f, "(")?;
                for (i, v) in t.items().iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
            Value::Pair(p) => write!(f, "({},{})", p.fst(), p.snd()),
            Value::Loop(y) => write!(f, "{y:?}"),
            Value::Opaque(_) => write!(f, "<opaque>"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::text(v)
    }
}

/// An immutable tuple of arity >= 2
///
/// The flattened view is computed once, iteratively, and shared between
/// clones; later writes through nested pair slots do not refresh it.
#[derive(Clone)]
pub struct Tuple {
    items: Rc<[Value]>,
    flat: Rc<OnceCell<Rc<[Value]>>>,
}

impl Tuple {
    /// Create a tuple; fails with an arity error for fewer than two
    /// components
    pub fn new(items: Vec<Value>) -> ValueResult<Self> {
        if items.len() < 2 {
            return Err(ValueError::Arity(items.len()));
        }
        Ok(Self::new_unchecked(items))
    }

    fn new_unchecked(items: Vec<Value>) -> Self {
        Self {
            items: items.into(),
            flat: Rc::new(OnceCell::new()),
        }
    }

    /// Number of direct components
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Always false; arity is at least two
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Direct components, un-flattened
    pub fn items(&self) -> &[Value] {
        &self.items
    }

    /// Component at position `n`
    pub fn item(&self, n: usize) -> Option<&Value> {
        self.items.get(n)
    }

    /// Ordered sequence of all leaf values, recursing through nested
    /// tuples and pairs; memoized on first use
    pub fn flatten(&self) -> Rc<[Value]> {
        self.flat
            .get_or_init(|| flatten_components(self.items.to_vec()))
            .clone()
    }

    /// Match this tuple against a textual pattern, binding names to
    /// components
    pub fn match_pattern(&self, pattern: &str) -> super::error::Result<super::pattern::Bindings> {
        super::pattern::match_value(&Value::Tuple(self.clone()), pattern)
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Tuple(self.clone()))
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// Walk components left to right with an explicit stack; deep nesting
/// must not recurse on the native stack.
fn flatten_components(root: Vec<Value>) -> Rc<[Value]> {
    let mut out: Vec<Value> = Vec::new();
    let mut stack: Vec<std::vec::IntoIter<Value>> = vec![root.into_iter()];
    while let Some(top) = stack.last_mut() {
        match top.next() {
            None => {
                stack.pop();
            }
            Some(Value::Tuple(t)) => {
                if let Some(flat) = t.flat.get() {
                    // reuse a flattening memoized earlier
                    out.extend(flat.iter().cloned());
                } else {
                    stack.push(t.items.to_vec().into_iter());
                }
            }
            Some(Value::Pair(p)) => stack.push(vec![p.fst(), p.snd()].into_iter()),
            Some(v) => out.push(v),
        }
    }
    out.into()
}

/// A 2-tuple with named, shared, mutable slots
///
/// Clones alias the same slots: writing through one clone is visible
/// through every other. A pair handed to a continuation is owned by the
/// single logical flow holding it; concurrent branches must not write
/// the same pair without their own coordination.
#[derive(Clone)]
pub struct Pair {
    fst: Rc<RefCell<Value>>,
    snd: Rc<RefCell<Value>>,
}

impl Pair {
    /// Create a pair
    pub fn new(fst: Value, snd: Value) -> Self {
        Self {
            fst: Rc::new(RefCell::new(fst)),
            snd: Rc::new(RefCell::new(snd)),
        }
    }

    /// Read the first slot
    pub fn fst(&self) -> Value {
        self.fst.borrow().clone()
    }

    /// Read the second slot
    pub fn snd(&self) -> Value {
        self.snd.borrow().clone()
    }

    /// Write the first slot in place, returning the stored value
    pub fn set_fst(&self, value: Value) -> Value {
        *self.fst.borrow_mut() = value.clone();
        value
    }

    /// Write the second slot in place, returning the stored value
    pub fn set_snd(&self, value: Value) -> Value {
        *self.snd.borrow_mut() = value.clone();
        value
    }

    /// Match this pair against a textual pattern, binding names to
    /// components
    pub fn match_pattern(&self, pattern: &str) -> super::error::Result<super::pattern::Bindings> {
        super::pattern::match_value(&Value::Pair(self.clone()), pattern)
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Pair(self.clone()))
    }
}

impl fmt::Debug for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// Tagged yield from the body of a loop
#[derive(Clone, PartialEq)]
pub enum LoopYield {
    /// Run the body again with this value
    Continue(Rc<Value>),
    /// Leave the loop, producing this value
    Done(Rc<Value>),
}

impl fmt::Debug for LoopYield {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopYield::Continue(v) => write!(f, "continue({v})"),
            LoopYield::Done(v) => write!(f, "done({v})"),
        }
    }
}

/// A named event with a detail value
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    name: Rc<str>,
    detail: Value,
}

impl Event {
    /// Create an event
    pub fn new(name: impl AsRef<str>, detail: Value) -> Self {
        Self {
            name: Rc::from(name.as_ref()),
            detail,
        }
    }

    /// Event name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Detail value carried by the event
    pub fn detail(&self) -> &Value {
        &self.detail
    }

    /// Look up a named field of the detail record
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.detail.field(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_arity_rules() {
        assert!(matches!(Tuple::new(vec![]), Err(ValueError::Arity(0))));
        assert!(matches!(
            Tuple::new(vec![Value::Int(1)]),
            Err(ValueError::Arity(1))
        ));
        assert!(Tuple::new(vec![Value::Int(1), Value::Int(2)]).is_ok());
    }

    #[test]
    fn test_from_values_collapse() {
        assert_eq!(Value::from_values(vec![]), Value::Null);
        assert_eq!(Value::from_values(vec![Value::Int(7)]), Value::Int(7));
        let pair = Value::from_values(vec![Value::Int(1), Value::Int(2)]);
        assert!(matches!(pair, Value::Pair(_)));
        let tuple = Value::from_values(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert!(matches!(tuple, Value::Tuple(_)));
    }

    #[test]
    fn test_flatten_nested() {
        let inner = Tuple::new(vec![Value::Int(3), Value::Int(4)]).unwrap();
        let outer = Tuple::new(vec![
            Value::Int(1),
            Value::Int(2),
            Value::Tuple(inner),
            Value::pair(Value::Int(5), Value::Int(6)),
        ])
        .unwrap();

        let flat = outer.flatten();
        let ints: Vec<i64> = flat.iter().filter_map(Value::as_int).collect();
        assert_eq!(ints, vec![1, 2, 3, 4, 5, 6]);

        // memoized view is shared across clones
        let again = outer.clone().flatten();
        assert!(Rc::ptr_eq(&flat, &again));
    }

    #[test]
    fn test_pair_slots_alias_across_clones() {
        let pair = Pair::new(Value::Int(1), Value::Bool(true));
        let alias = pair.clone();

        let stored = alias.set_snd(Value::Bool(false));
        assert_eq!(stored, Value::Bool(false));
        assert_eq!(pair.snd(), Value::Bool(false));
        assert_eq!(pair.fst(), Value::Int(1));
    }

    #[test]
    fn test_opaque_identity_equality() {
        let payload: Rc<dyn std::any::Any> = Rc::new(42u32);
        let a = Value::opaque(payload.clone());
        let b = Value::opaque(payload);
        let c = Value::opaque(Rc::new(42u32));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_display_tuple_shape() {
        let inner = Tuple::new(vec![Value::Int(3), Value::Int(4)]).unwrap();
        let outer = Tuple::new(vec![Value::Int(1), Value::Int(2), Value::Tuple(inner)]).unwrap();
        assert_eq!(outer.to_string(), "(1,2,(3,4))");
    }

    #[test]
    fn test_event_field() {
        let event = Event::new("take-prize", Value::record([("name", "key".into())]));
        assert_eq!(event.field("name"), Some(&Value::text("key")));
        assert_eq!(event.field("missing"), None);
    }
}
