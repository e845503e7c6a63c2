//! # Field Projection
//!
//! A projection names the protobuf fields a reader wants back from
//! transposed chunks. Paths are chains of field numbers from the message
//! root, each ending in one of two terminators:
//!
//! - [`Terminator::Subtree`]: keep the addressed field and everything
//!   below it (the default),
//! - [`Terminator::Exists`]: keep only a presence marker, emitted as an
//!   empty submessage.
//!
//! Fields matched by no path are dropped, and buckets holding only dropped
//! fields are never decompressed. Projection applies to transposed chunks
//! only; simple chunks are always returned verbatim.
//!
//! ## Matching
//!
//! The decoder compiles the projection into a trie once per chunk and walks
//! it alongside the tag tree, so matching costs one trie edge per visited
//! node. [`CompiledProjection`] exposes exactly that walk.

use smallvec::SmallVec;

/// How a projection path treats the field it addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// Include the field and its entire subtree.
    Subtree,
    /// Include only a presence marker (an empty submessage).
    Exists,
}

/// One projected path: field numbers from the root plus a terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionPath {
    tags: SmallVec<[u32; 8]>,
    terminator: Terminator,
}

impl ProjectionPath {
    /// A path keeping the addressed subtree.
    pub fn subtree(tags: impl IntoIterator<Item = u32>) -> Self {
        Self {
            tags: tags.into_iter().collect(),
            terminator: Terminator::Subtree,
        }
    }

    /// A path keeping only the presence marker.
    pub fn exists(tags: impl IntoIterator<Item = u32>) -> Self {
        Self {
            tags: tags.into_iter().collect(),
            terminator: Terminator::Exists,
        }
    }

    pub fn tags(&self) -> &[u32] {
        &self.tags
    }

    pub fn terminator(&self) -> Terminator {
        self.terminator
    }
}

/// The set of fields to keep while decoding transposed chunks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldProjection {
    /// `None` means everything (no projection).
    paths: Option<Vec<ProjectionPath>>,
}

impl FieldProjection {
    /// Keeps every field. This is the default.
    pub fn all() -> Self {
        Self { paths: None }
    }

    /// Keeps only the given paths.
    pub fn of(paths: impl IntoIterator<Item = ProjectionPath>) -> Self {
        Self {
            paths: Some(paths.into_iter().collect()),
        }
    }

    pub fn includes_all(&self) -> bool {
        self.paths.is_none()
    }

    pub(crate) fn compile(&self) -> CompiledProjection {
        let mut trie = vec![TrieNode::default()];
        if let Some(paths) = &self.paths {
            for path in paths {
                let mut node = 0usize;
                for &tag in path.tags() {
                    node = match trie[node].children.iter().find(|(t, _)| *t == tag) {
                        Some(&(_, child)) => child,
                        None => {
                            trie.push(TrieNode::default());
                            let child = trie.len() - 1;
                            trie[node].children.push((tag, child));
                            child
                        }
                    };
                }
                match path.terminator() {
                    Terminator::Subtree => trie[node].subtree = true,
                    Terminator::Exists => trie[node].exists = true,
                }
            }
        }
        CompiledProjection {
            all: self.paths.is_none(),
            trie,
        }
    }
}

#[derive(Debug, Default)]
struct TrieNode {
    children: SmallVec<[(u32, usize); 4]>,
    subtree: bool,
    exists: bool,
}

/// What a projection decides for one node of the tag tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    /// Keep the node and its whole subtree.
    Keep,
    /// Keep the node; descend with the given trie state to decide below it.
    Descend(usize),
    /// Keep only a presence marker; drop the subtree.
    ExistsOnly,
    /// Drop the node and its subtree.
    Drop,
}

/// A projection compiled to a trie, walked alongside the tag tree.
#[derive(Debug)]
pub(crate) struct CompiledProjection {
    all: bool,
    trie: Vec<TrieNode>,
}

impl CompiledProjection {
    /// Decision for a root-level field.
    pub(crate) fn root(&self, tag: u32, is_leaf: bool) -> Decision {
        if self.all {
            return Decision::Keep;
        }
        self.step(0, tag, is_leaf)
    }

    /// Decision for a field below a node that resolved to `Descend(state)`.
    pub(crate) fn step(&self, state: usize, tag: u32, is_leaf: bool) -> Decision {
        let child = self.trie[state]
            .children
            .iter()
            .find_map(|&(t, c)| (t == tag).then_some(c));
        let Some(child) = child else {
            return Decision::Drop;
        };
        let node = &self.trie[child];
        if node.subtree {
            return Decision::Keep;
        }
        if node.exists {
            // An exists-terminated path on a scalar keeps the value itself:
            // a scalar has no narrower presence marker.
            return if is_leaf {
                Decision::Keep
            } else {
                Decision::ExistsOnly
            };
        }
        if is_leaf {
            // The path continues below a scalar; nothing can match.
            return Decision::Drop;
        }
        Decision::Descend(child)
    }
}
