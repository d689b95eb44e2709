//! Structural pattern matching for tuples
//!
//! Compiles textual patterns of names, blanks, and nested groups into a
//! node tree, caches compiled patterns by source text, and binds tuple
//! components to names.
//!
//! Grammar:
//!
//! ```text
//! pattern   ::= component (',' component)+
//! component ::= identifier | <blank> | '(' pattern ')'
//! ```
//!
//! `Tuple(1,2,Tuple(Tuple(3,4),5))` matched against `"a,,(b,c)"` binds
//! `a = 1`, `b = Tuple(3,4)`, `c = 5`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::error::{MatchError, MatchResult, PatternError, PatternResult, Result};
use super::value::Value;

/// One position in a compiled pattern
#[derive(Debug, Clone, PartialEq)]
enum PatNode {
    /// Bind the component to a name
    Bind(String),
    /// Skip the component
    Blank,
    /// Match a nested tuple of exactly this shape
    Group(Vec<PatNode>),
}

/// A compiled tuple pattern
#[derive(Debug, Clone)]
pub struct Pattern {
    nodes: Rc<[PatNode]>,
}

thread_local! {
    /// Compiled patterns, keyed by source text. The runtime is single
    /// threaded, so the cache is per thread rather than global.
    static COMPILED: RefCell<HashMap<String, Pattern>> = RefCell::new(HashMap::new());
}

impl Pattern {
    /// Compile a pattern, reusing a cached compilation when the same
    /// source text was seen before on this thread
    pub fn compile(source: &str) -> PatternResult<Self> {
        if let Some(found) = COMPILED.with(|cache| cache.borrow().get(source).cloned()) {
            return Ok(found);
        }
        let pattern = Self::parse(source)?;
        COMPILED.with(|cache| {
            cache
                .borrow_mut()
                .insert(source.to_string(), pattern.clone());
        });
        Ok(pattern)
    }

    /// Top-level arity this pattern expects
    pub fn arity(&self) -> usize {
        self.nodes.len()
    }

    fn parse(source: &str) -> PatternResult<Self> {
        // components accumulate into the top of the stack; a group in
        // progress is one stack level
        let mut stack: Vec<Vec<PatNode>> = vec![Vec::new()];
        let mut have_item = false;
        let mut ident = String::new();
        let mut ident_at = 0usize;

        fn flush_ident(
            stack: &mut Vec<Vec<PatNode>>,
            have_item: &mut bool,
            ident: &mut String,
            at: usize,
        ) -> PatternResult<()> {
            if ident.is_empty() {
                return Ok(());
            }
            if *have_item {
                return Err(PatternError::ExpectedComma(at));
            }
            let top = stack.last_mut().expect("pattern stack underflow");
            top.push(PatNode::Bind(std::mem::take(ident)));
            *have_item = true;
            Ok(())
        }

        for (offset, ch) in source.char_indices() {
            match ch {
                c if c.is_whitespace() => {
                    flush_ident(&mut stack, &mut have_item, &mut ident, ident_at)?;
                }
                ',' => {
                    flush_ident(&mut stack, &mut have_item, &mut ident, ident_at)?;
                    if !have_item {
                        let top = stack.last_mut().expect("pattern stack underflow");
                        top.push(PatNode::Blank);
                    }
                    have_item = false;
                }
                '(' => {
                    flush_ident(&mut stack, &mut have_item, &mut ident, ident_at)?;
                    if have_item {
                        return Err(PatternError::ExpectedComma(offset));
                    }
                    stack.push(Vec::new());
                }
                ')' => {
                    flush_ident(&mut stack, &mut have_item, &mut ident, ident_at)?;
                    if stack.len() < 2 {
                        return Err(PatternError::UnbalancedClose(offset));
                    }
                    let mut group = stack.pop().expect("pattern stack underflow");
                    // a trailing comma leaves one blank slot open
                    if !have_item && !group.is_empty() {
                        group.push(PatNode::Blank);
                    }
                    if group.len() < 2 {
                        return Err(PatternError::Arity(group.len()));
                    }
                    let top = stack.last_mut().expect("pattern stack underflow");
                    top.push(PatNode::Group(group));
                    have_item = true;
                }
                _ => {
                    if ident.is_empty() {
                        ident_at = offset;
                    }
                    ident.push(ch);
                }
            }
        }
        flush_ident(&mut stack, &mut have_item, &mut ident, source.len())?;

        if stack.len() != 1 {
            return Err(PatternError::UnbalancedOpen);
        }
        let mut nodes = stack.pop().expect("pattern stack underflow");
        if !have_item && !nodes.is_empty() {
            nodes.push(PatNode::Blank);
        }
        if nodes.is_empty() {
            return Err(PatternError::Empty);
        }
        if nodes.len() < 2 {
            return Err(PatternError::Arity(nodes.len()));
        }
        Ok(Pattern {
            nodes: nodes.into(),
        })
    }

    /// Match a value against this pattern, binding names to components
    pub fn bind(&self, value: &Value) -> MatchResult<Bindings> {
        let mut bound = HashMap::new();
        bind_group(&self.nodes, value, &mut bound)?;
        Ok(Bindings(bound))
    }
}

fn bind_group(
    nodes: &[PatNode],
    value: &Value,
    bound: &mut HashMap<String, Value>,
) -> MatchResult<()> {
    let components = value.components().ok_or(MatchError::NotATuple {
        found: value.kind(),
    })?;
    if components.len() > nodes.len() {
        return Err(MatchError::TooLong {
            expected: nodes.len(),
            found: components.len(),
        });
    }
    if components.len() < nodes.len() {
        return Err(MatchError::TooShort {
            expected: nodes.len(),
            found: components.len(),
        });
    }
    for (node, component) in nodes.iter().zip(components) {
        match node {
            PatNode::Blank => {}
            PatNode::Bind(name) => {
                bound.insert(name.clone(), component);
            }
            PatNode::Group(inner) => bind_group(inner, &component, bound)?,
        }
    }
    Ok(())
}

/// Match a tuple-shaped value against a textual pattern
pub fn match_value(value: &Value, pattern: &str) -> Result<Bindings> {
    let compiled = Pattern::compile(pattern)?;
    Ok(compiled.bind(value)?)
}

/// Names bound by a successful match
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings(HashMap<String, Value>);

impl Bindings {
    /// Value bound to a name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Whether a name was bound
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Number of bound names
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no names were bound
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for Bindings {
    type Item = (String, Value);
    type IntoIter = std::collections::hash_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
