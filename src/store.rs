//! Hierarchical counter store
//!
//! A tree keyed by path segments. Leaves are either a scalar tally or the
//! ordered list of shapes seen at a site. Intermediate branches are created on
//! first write and never removed.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{path_conflict, unexpected_record, AnalysisError, AnalysisResult};
use crate::shape::Signature;
use crate::value::{HostResolver, Site};

/// Fixed top-level categories of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    PolymorphicStatement,
    UninitArrayElem,
    ArrayTypeSwitch,
    IncontiguousArray,
    InitObjNonConstructor,
}

impl Category {
    /// Report order
    pub const ALL: [Category; 5] = [
        Category::PolymorphicStatement,
        Category::UninitArrayElem,
        Category::ArrayTypeSwitch,
        Category::IncontiguousArray,
        Category::InitObjNonConstructor,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Category::PolymorphicStatement => "polystmt",
            Category::UninitArrayElem => "uninit-array-elem",
            Category::ArrayTypeSwitch => "arr-type-switch",
            Category::IncontiguousArray => "incont-array",
            Category::InitObjNonConstructor => "init-obj-nonconstr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Tally {
    pub count: u64,
}

/// One distinct shape seen at a site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeEntry {
    pub count: u64,
    pub sig: Signature,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoreNode {
    Count(Tally),
    Shapes(Vec<ShapeEntry>),
    Branch(BTreeMap<String, StoreNode>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CounterStore {
    root: BTreeMap<String, StoreNode>,
}

impl CounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Look up the node at `path`, if every segment exists
    pub fn get(&self, path: &[&str]) -> Option<&StoreNode> {
        let (last, parents) = path.split_last()?;
        let mut current = &self.root;
        for key in parents {
            match current.get(*key)? {
                StoreNode::Branch(children) => current = children,
                _ => return None,
            }
        }
        current.get(*last)
    }

    /// Replace the node at `path`, creating missing branches
    pub fn set(&mut self, path: &[&str], node: StoreNode) -> AnalysisResult<()> {
        let (last, parents) = path.split_last().ok_or(AnalysisError::EmptyPath)?;
        self.branch_mut(parents)?.insert(last.to_string(), node);
        Ok(())
    }

    fn branch_mut(&mut self, path: &[&str]) -> AnalysisResult<&mut BTreeMap<String, StoreNode>> {
        let mut current = &mut self.root;
        for (depth, key) in path.iter().enumerate() {
            let node = current
                .entry(key.to_string())
                .or_insert_with(|| StoreNode::Branch(BTreeMap::new()));
            current = match node {
                StoreNode::Branch(children) => children,
                _ => return Err(path_conflict(&path[..=depth])),
            };
        }
        Ok(current)
    }

    /// Add one to the tally at `path`, creating it at 1. Returns the new count.
    pub fn increment_scalar(&mut self, path: &[&str]) -> AnalysisResult<u64> {
        let (last, parents) = path.split_last().ok_or(AnalysisError::EmptyPath)?;
        match self.branch_mut(parents)?.entry(last.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(StoreNode::Count(Tally { count: 1 }));
                Ok(1)
            }
            Entry::Occupied(mut slot) => match slot.get_mut() {
                StoreNode::Count(tally) => {
                    tally.count += 1;
                    Ok(tally.count)
                }
                _ => Err(unexpected_record(path, "count")),
            },
        }
    }

    /// Count one more observation of `signature` at `path`. An equal shape
    /// has its count bumped; a new one is appended in first-seen order.
    pub fn increment_or_append_shape(
        &mut self,
        path: &[&str],
        signature: Signature,
    ) -> AnalysisResult<()> {
        let (last, parents) = path.split_last().ok_or(AnalysisError::EmptyPath)?;
        match self.branch_mut(parents)?.entry(last.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(StoreNode::Shapes(vec![ShapeEntry { count: 1, sig: signature }]));
                Ok(())
            }
            Entry::Occupied(mut slot) => match slot.get_mut() {
                StoreNode::Shapes(entries) => {
                    add_shape(entries, ShapeEntry { count: 1, sig: signature });
                    Ok(())
                }
                _ => Err(unexpected_record(path, "shape list")),
            },
        }
    }

    /// Tally at `path`
    pub fn count(&self, path: &[&str]) -> Option<u64> {
        match self.get(path)? {
            StoreNode::Count(tally) => Some(tally.count),
            _ => None,
        }
    }

    /// Shape list at `path`
    pub fn shapes(&self, path: &[&str]) -> Option<&[ShapeEntry]> {
        match self.get(path)? {
            StoreNode::Shapes(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn record_count(&mut self, category: Category, site: Site) -> AnalysisResult<u64> {
        let site = site.key();
        self.increment_scalar(&[category.key(), site.as_str()])
    }

    pub fn record_shape(&mut self, site: Site, signature: Signature) -> AnalysisResult<()> {
        let site = site.key();
        self.increment_or_append_shape(&[Category::PolymorphicStatement.key(), site.as_str()], signature)
    }

    pub fn site_count(&self, category: Category, site: Site) -> Option<u64> {
        self.count(&[category.key(), site.key().as_str()])
    }

    pub fn site_shapes(&self, site: Site) -> Option<&[ShapeEntry]> {
        self.shapes(&[Category::PolymorphicStatement.key(), site.key().as_str()])
    }

    /// Children of a category branch
    pub fn category(&self, category: Category) -> AnalysisResult<Option<&BTreeMap<String, StoreNode>>> {
        match self.root.get(category.key()) {
            None => Ok(None),
            Some(StoreNode::Branch(children)) => Ok(Some(children)),
            Some(_) => Err(unexpected_record(&[category.key()], "branch")),
        }
    }

    /// Fold another store into this one: tallies add up, shape lists merge
    /// by signature equality. Both stores must come from the same run, or
    /// both be [`portable`](Self::portable).
    pub fn merge(&mut self, other: CounterStore) -> AnalysisResult<()> {
        merge_branch(&mut self.root, other.root, &mut Vec::new())
    }

    /// Copy with every signature made portable, for saving or merging with
    /// another run. Shapes that become equal are folded together.
    pub fn portable(&self, resolver: &dyn HostResolver) -> CounterStore {
        CounterStore {
            root: portable_branch(&self.root, resolver),
        }
    }
}

fn portable_branch(
    branch: &BTreeMap<String, StoreNode>,
    resolver: &dyn HostResolver,
) -> BTreeMap<String, StoreNode> {
    branch
        .iter()
        .map(|(key, node)| {
            let node = match node {
                StoreNode::Count(tally) => StoreNode::Count(*tally),
                StoreNode::Shapes(entries) => {
                    let mut folded = Vec::with_capacity(entries.len());
                    for entry in entries {
                        add_shape(
                            &mut folded,
                            ShapeEntry {
                                count: entry.count,
                                sig: entry.sig.portable(resolver),
                            },
                        );
                    }
                    StoreNode::Shapes(folded)
                }
                StoreNode::Branch(children) => StoreNode::Branch(portable_branch(children, resolver)),
            };
            (key.clone(), node)
        })
        .collect()
}

fn add_shape(entries: &mut Vec<ShapeEntry>, incoming: ShapeEntry) {
    match entries.iter_mut().find(|e| e.sig.same_shape(&incoming.sig)) {
        Some(existing) => existing.count += incoming.count,
        None => entries.push(incoming),
    }
}

fn merge_branch(
    target: &mut BTreeMap<String, StoreNode>,
    source: BTreeMap<String, StoreNode>,
    path: &mut Vec<String>,
) -> AnalysisResult<()> {
    for (key, incoming) in source {
        path.push(key.clone());
        match target.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(incoming);
            }
            Entry::Occupied(mut slot) => match (slot.get_mut(), incoming) {
                (StoreNode::Count(a), StoreNode::Count(b)) => a.count += b.count,
                (StoreNode::Shapes(a), StoreNode::Shapes(b)) => {
                    for entry in b {
                        add_shape(a, entry);
                    }
                }
                (StoreNode::Branch(a), StoreNode::Branch(b)) => merge_branch(a, b, path)?,
                _ => {
                    return Err(AnalysisError::PathConflict {
                        path: path.join("/"),
                    })
                }
            },
        }
        path.pop();
    }
    Ok(())
}
