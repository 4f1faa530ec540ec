//! # Path Selectors
//!
//! Parsing and resolution of path-like selector strings against an
//! `AssemblyGraph`.
//!
//! ## Grammar
//!
//! ```text
//! selector  := "/" steps | "//" steps
//! steps     := step ("/" step)*
//! step      := name predicate* | predicate+
//! name      := "*" | literal
//! predicate := "[@" key "='" value "']" | "[@cid=" digits "]"
//! ```
//!
//! A root-anchored selector (`/`) must match the root with its first step.
//! An anywhere selector (`//`) starts at every node reachable from the root.
//! Quoted values may contain `/` and `]`; no escaping exists.

use crate::graph::TraversalOrder;
use crate::primitives::{CID_PREDICATE, MAX_SELECTOR_LENGTH};
use crate::{AssemblyGraph, NodeId, StrataError};
use nom::IResult;
use nom::branch::alt;
use nom::bytes::complete::{is_not, tag, take_while, take_while1};
use nom::character::complete::{char as pchar, digit1};
use nom::combinator::{all_consuming, map, map_res, opt, verify};
use nom::multi::{many0, separated_list1};
use nom::sequence::{delimited, preceded, separated_pair, tuple};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// AST
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// `/...`: the first step must match the root itself.
    Root,
    /// `//...`: the first step may match any node.
    Anywhere,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepName {
    Literal(String),
    /// `*`, or a predicate-only step.
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// `[@key='value']`: textual attribute equality, missing key reads as "".
    Attribute { key: String, value: String },
    /// `[@cid=N]`: the node or one of its descendants owns dataset index N.
    CompositeId(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: StepName,
    pub predicates: Vec<Predicate>,
}

/// A parsed selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    text: String,
    anchor: Anchor,
    steps: Vec<Step>,
}

// =============================================================================
// PARSING
// =============================================================================

fn malformed(selector: &str, reason: &str) -> StrataError {
    StrataError::MalformedSelector {
        selector: selector.to_string(),
        reason: reason.to_string(),
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Step name up to the next separator or predicate.
fn step_name(input: &str) -> IResult<&str, StepName> {
    map(is_not("/[]'"), |name: &str| match name {
        "*" => StepName::Wildcard,
        literal => StepName::Literal(literal.to_string()),
    })(input)
}

/// `'...'` with no escaping; may contain `/` and `]`.
fn quoted(input: &str) -> IResult<&str, &str> {
    delimited(pchar('\''), take_while(|c| c != '\''), pchar('\''))(input)
}

fn attribute_predicate(input: &str) -> IResult<&str, Predicate> {
    map(
        separated_pair(take_while1(is_key_char), pchar('='), quoted),
        |(key, value): (&str, &str)| Predicate::Attribute {
            key: key.to_string(),
            value: value.to_string(),
        },
    )(input)
}

fn cid_predicate(input: &str) -> IResult<&str, Predicate> {
    map(
        preceded(
            tuple((tag(CID_PREDICATE), pchar('='))),
            map_res(digit1, str::parse::<u64>),
        ),
        Predicate::CompositeId,
    )(input)
}

fn predicate(input: &str) -> IResult<&str, Predicate> {
    delimited(
        tag("[@"),
        alt((attribute_predicate, cid_predicate)),
        pchar(']'),
    )(input)
}

/// `name predicate*` or `predicate+`.
fn step(input: &str) -> IResult<&str, Step> {
    map(
        verify(
            tuple((opt(step_name), many0(predicate))),
            |(name, predicates): &(Option<StepName>, Vec<Predicate>)| {
                name.is_some() || !predicates.is_empty()
            },
        ),
        |(name, predicates)| Step {
            name: name.unwrap_or(StepName::Wildcard),
            predicates,
        },
    )(input)
}

fn selector(input: &str) -> IResult<&str, (Anchor, Vec<Step>)> {
    let steps = || separated_list1(pchar('/'), step);
    alt((
        map(preceded(tag("//"), steps()), |s| (Anchor::Anywhere, s)),
        map(preceded(pchar('/'), steps()), |s| (Anchor::Root, s)),
    ))(input)
}

impl Selector {
    /// Parse a selector string, failing with `MalformedSelector`.
    pub fn parse(text: &str) -> Result<Self, StrataError> {
        if text.len() > MAX_SELECTOR_LENGTH {
            let head: String = text.chars().take(64).collect();
            return Err(malformed(&head, "selector too long"));
        }
        let (anchor, steps) = match all_consuming(selector)(text) {
            Ok((_, parsed)) => parsed,
            Err(nom::Err::Error(e) | nom::Err::Failure(e)) => {
                let offset = text.len().saturating_sub(e.input.len());
                return Err(malformed(
                    text,
                    &format!("unexpected input at offset {offset}"),
                ));
            }
            Err(nom::Err::Incomplete(_)) => return Err(malformed(text, "incomplete selector")),
        };

        Ok(Self {
            text: text.to_string(),
            anchor,
            steps,
        })
    }

    #[must_use]
    pub fn anchor(&self) -> Anchor {
        self.anchor
    }

    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    // =========================================================================
    // RESOLUTION
    // =========================================================================

    /// All nodes reached by some fully matching path, deduplicated, in
    /// depth-first pre-order of the graph.
    #[must_use]
    pub fn resolve(&self, graph: &AssemblyGraph) -> Vec<NodeId> {
        let order = graph.walk_ordered(NodeId::ROOT, TraversalOrder::DepthFirst);
        let Some((first, rest)) = self.steps.split_first() else {
            return Vec::new();
        };

        let starts: Vec<NodeId> = match self.anchor {
            Anchor::Root => vec![NodeId::ROOT],
            Anchor::Anywhere => order.clone(),
        };
        let mut current: BTreeSet<NodeId> = starts
            .into_iter()
            .filter(|n| step_matches(graph, *n, first))
            .collect();

        for step in rest {
            if current.is_empty() {
                break;
            }
            let mut next = BTreeSet::new();
            for node in &current {
                let Ok(children) = graph.children(*node) else {
                    continue;
                };
                next.extend(
                    children
                        .iter()
                        .copied()
                        .filter(|c| step_matches(graph, *c, step)),
                );
            }
            current = next;
        }

        order.into_iter().filter(|n| current.contains(n)).collect()
    }
}

fn step_matches(graph: &AssemblyGraph, node: NodeId, step: &Step) -> bool {
    let Ok(name) = graph.node_name(node) else {
        return false;
    };
    if let StepName::Literal(literal) = &step.name {
        if literal != name {
            return false;
        }
    }
    step.predicates.iter().all(|predicate| match predicate {
        Predicate::Attribute { key, value } => {
            graph.attribute_or_default(node, key, String::new()) == *value
        }
        Predicate::CompositeId(cid) => graph
            .dataset_indices(node, true)
            .map(|indices| indices.contains(cid))
            .unwrap_or(false),
    })
}

impl FromStr for Selector {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// =============================================================================
// TESTS
// =============================================================================
